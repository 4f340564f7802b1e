//! Multi-instance simulation tests for svc-publisher.
//!
//! Several publishers share one in-memory registry, the way instances of a
//! cluster share one backend. Session loss and watch drops are injected
//! through the in-memory driver.

use std::sync::Arc;
use std::time::Duration;
use svc_publisher::{Error, Publisher, ServerConf, ServerType};
use svc_registry::{path, MemoryRegistry, Registry, SeedFormat, SeedScope};
use tokio::sync::mpsc;

type Report = (bool, i64, i64);

fn scope() -> SeedScope {
    SeedScope {
        plat_name: "p".into(),
        sys_name: "s".into(),
        cluster_name: "c".into(),
    }
}

fn seeded_registry() -> Arc<MemoryRegistry> {
    let doc = r#"
        [cron.main]
        sharding = 3

        [api.main]
        domain = "www.example.com"
    "#;
    Arc::new(MemoryRegistry::from_seed_str(doc, SeedFormat::Toml, &scope()).unwrap())
}

async fn instance(
    registry: &Arc<MemoryRegistry>,
    server_type: ServerType,
    server_id: &str,
) -> Publisher {
    let conf = ServerConf::load(registry.clone(), scope(), server_type)
        .await
        .unwrap()
        .with_server_id(server_id);
    Publisher::new(Arc::new(conf))
}

async fn watch(publisher: &Publisher) -> mpsc::UnboundedReceiver<Report> {
    let (tx, rx) = mpsc::unbounded_channel();
    publisher
        .watch_cluster_change(move |is_master, sharding, total| {
            let _ = tx.send((is_master, sharding, total));
        })
        .await
        .unwrap();
    rx
}

/// Receive reports until one equals `expected`.
async fn wait_for(rx: &mut mpsc::UnboundedReceiver<Report>, expected: Report) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(report) = rx.recv().await {
            if report == expected {
                return true;
            }
        }
        false
    })
    .await;
    assert_eq!(result, Ok(true), "never observed {:?}", expected);
}

#[tokio::test]
async fn test_three_instances_master_and_sharding() {
    let registry = seeded_registry();

    let a = instance(&registry, ServerType::Cron, "aaaaaaaa").await;
    let b = instance(&registry, ServerType::Cron, "bbbbbbbb").await;
    let c = instance(&registry, ServerType::Cron, "cccccccc").await;
    a.publish("10.0.0.1:9000", "10.0.0.1:9000", "c1", &[]).await.unwrap();
    b.publish("10.0.0.2:9000", "10.0.0.2:9000", "c1", &[]).await.unwrap();
    c.publish("10.0.0.3:9000", "10.0.0.3:9000", "c1", &[]).await.unwrap();

    let mut rx_a = watch(&a).await;
    let mut rx_b = watch(&b).await;
    let mut rx_c = watch(&c).await;

    wait_for(&mut rx_a, (true, 0, 3)).await;
    wait_for(&mut rx_b, (false, 1, 3)).await;
    wait_for(&mut rx_c, (false, 2, 3)).await;

    // master leaves: everyone moves up one rank
    a.close().await;
    wait_for(&mut rx_b, (true, 0, 3)).await;
    wait_for(&mut rx_c, (false, 1, 3)).await;

    b.close().await;
    c.close().await;
}

#[tokio::test]
async fn test_late_joiner_does_not_change_existing_ranks() {
    let registry = seeded_registry();

    let a = instance(&registry, ServerType::Cron, "aaaaaaaa").await;
    let b = instance(&registry, ServerType::Cron, "bbbbbbbb").await;
    a.publish("h:1", "h:1", "c1", &[]).await.unwrap();
    b.publish("h:2", "h:2", "c1", &[]).await.unwrap();
    let mut rx_a = watch(&a).await;
    let mut rx_b = watch(&b).await;
    wait_for(&mut rx_a, (true, 0, 3)).await;
    wait_for(&mut rx_b, (false, 1, 3)).await;

    let late = instance(&registry, ServerType::Cron, "dddddddd").await;
    late.publish("h:3", "h:3", "c1", &[]).await.unwrap();
    let mut rx_late = watch(&late).await;
    wait_for(&mut rx_late, (false, 2, 3)).await;

    // a and b only ever see their original standing again
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(report) = rx_a.try_recv() {
        assert_eq!(report, (true, 0, 3));
    }
    while let Ok(report) = rx_b.try_recv() {
        assert_eq!(report, (false, 1, 3));
    }

    a.close().await;
    b.close().await;
    late.close().await;
}

#[tokio::test]
async fn test_watch_survives_dropped_subscriptions() {
    let registry = seeded_registry();

    let first = instance(&registry, ServerType::Cron, "aaaaaaaa").await;
    let second = instance(&registry, ServerType::Cron, "bbbbbbbb").await;
    first.publish("h:1", "h:1", "c1", &[]).await.unwrap();
    second.publish("h:2", "h:2", "c1", &[]).await.unwrap();
    let mut rx = watch(&second).await;
    wait_for(&mut rx, (false, 1, 3)).await;

    registry.drop_watches().await;
    first.close().await;

    wait_for(&mut rx, (true, 0, 3)).await;
    second.close().await;
}

#[tokio::test]
async fn test_session_loss_is_healed() {
    let registry = seeded_registry();
    let api = instance(&registry, ServerType::Api, "aaaaaaaa").await;
    api.publish("10.0.0.1:8080", "http://10.0.0.1:8080", "c1", &[]).await.unwrap();
    let published = api.published().await;
    assert_eq!(published.len(), 3);
    assert!(published.contains_key("dns/www.example.com/10.0.0.1"));

    registry.expire_session().await;
    for path in published.keys() {
        assert!(!registry.exists(path).await.unwrap());
    }

    assert_eq!(api.heal().await.unwrap(), 3);
    for (path, data) in &published {
        let (value, _) = registry.get_value(path).await.unwrap();
        assert_eq!(&value, data);
    }

    // a second pass has nothing left to recover
    assert_eq!(api.heal().await.unwrap(), 0);
    api.close().await;
}

#[tokio::test]
async fn test_background_heal_converges() {
    let registry = seeded_registry();
    let conf = ServerConf::load(registry.clone(), scope(), ServerType::Mqc)
        .await
        .unwrap();
    let publisher = Publisher::with_heal_interval(Arc::new(conf), Duration::from_millis(50));
    publisher.publish("h:1", "h:1", "c1", &[]).await.unwrap();
    let node = publisher.server_node().unwrap();

    registry.expire_session().await;

    let healed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if registry.exists(&node).await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(healed.is_ok(), "node was not restored by the heal loop");
    publisher.close().await;
}

#[tokio::test]
async fn test_publish_then_clear_leaves_nothing() {
    let registry = seeded_registry();
    let rpc = instance(&registry, ServerType::Rpc, "aaaaaaaa").await;
    rpc.publish("10.0.0.5:8090", "10.0.0.5:8090", "c1", &["/order/query", "/user/get"])
        .await
        .unwrap();

    let published = rpc.published().await;
    assert_eq!(published.len(), 3);
    for service in ["order/query", "user/get"] {
        let providers = path::join(["p/services", service, "providers"]);
        let (children, _) = registry.get_children(&providers).await.unwrap();
        assert_eq!(children.len(), 1, "one provider under {}", providers);
    }

    rpc.clear().await;
    for path in published.keys() {
        assert!(!registry.exists(path).await.unwrap());
    }
    let (servers, _) = registry.get_children("p/s/rpc/c/servers").await.unwrap();
    assert!(servers.is_empty());

    rpc.close().await;
}

#[tokio::test]
async fn test_update_rejects_unpaired_values() {
    let registry = seeded_registry();
    let publisher = instance(&registry, ServerType::Cron, "aaaaaaaa").await;
    publisher.publish("h:1", "h:1", "c1", &[]).await.unwrap();
    let before = publisher.published().await;

    let result = publisher.update("h:1", "h:1", "c1", &["k1"]).await;

    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert_eq!(publisher.published().await, before);
    publisher.close().await;
}

#[tokio::test]
async fn test_close_withdraws_all_instances_nodes() {
    let registry = seeded_registry();
    let publisher = instance(&registry, ServerType::Cron, "aaaaaaaa").await;
    let server_path = "p/s/cron/c/servers";
    publisher.publish("h:1", "h:1", "c1", &[]).await.unwrap();
    assert_eq!(registry.get_children(server_path).await.unwrap().0.len(), 1);

    publisher.close().await;

    assert!(registry.get_children(server_path).await.unwrap().0.is_empty());
}
