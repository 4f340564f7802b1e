use arc_swap::{ArcSwap, ArcSwapOption};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use svc_registry::{path, ChildWatcher};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{payload, sharding, Error, MainConf};

const DEFAULT_HEAL_INTERVAL_SECS: u64 = 30;
const SHARDING_KEY: &str = "sharding";

/// Lifecycle of a publisher's presence in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Idle,
    Publishing,
    Published,
    Healing,
    Closed,
}

impl PublisherState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Publishing,
            2 => Self::Published,
            3 => Self::Healing,
            _ => Self::Closed,
        }
    }
}

struct Inner {
    conf: Arc<dyn MainConf>,
    /// resolved path -> last written payload
    pubs: Mutex<BTreeMap<String, String>>,
    server_node: ArcSwapOption<String>,
    done: AtomicBool,
    state: AtomicU8,
    close_token: CancellationToken,
    /// Cancelled and replaced whenever the cluster watch must be torn down.
    watch_token: ArcSwap<CancellationToken>,
}

impl Inner {
    fn set_state(&self, next: PublisherState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (PublisherState::from_u8(current) != PublisherState::Closed).then_some(next as u8)
            });
    }

    fn settle_state(&self, has_entries: bool) {
        self.set_state(if has_entries {
            PublisherState::Published
        } else {
            PublisherState::Idle
        });
    }

    async fn append_pub(&self, path: String, data: String) {
        let mut pubs = self.pubs.lock().await;
        pubs.insert(path, data);
    }

    /// One reconciliation pass. Any failure ends the pass; the remaining
    /// entries are retried on the next one.
    async fn heal(&self) -> Result<usize, Error> {
        let pubs = self.pubs.lock().await;
        if pubs.is_empty() {
            return Ok(0);
        }
        self.set_state(PublisherState::Healing);

        let registry = self.conf.registry();
        let mut recovered = 0;
        let mut result = Ok(());
        for (path, data) in pubs.iter() {
            if self.done.load(Ordering::Acquire) {
                break;
            }
            let step = match registry.exists(path).await {
                Ok(false) => registry.create_temp_node(path, data).await.map(|_| {
                    tracing::info!(%path, "Published node recovered");
                    recovered += 1;
                }),
                Ok(true) => registry.update(path, data).await,
                Err(e) => Err(e),
            };
            if let Err(e) = step {
                result = Err(Error::Registry(e));
                break;
            }
        }

        self.settle_state(!pubs.is_empty());
        result.map(|_| recovered)
    }

    async fn clear(&self) {
        let mut pubs = self.pubs.lock().await;

        let previous = self.watch_token.swap(Arc::new(CancellationToken::new()));
        previous.cancel();

        let registry = self.conf.registry();
        for path in pubs.keys() {
            if let Err(e) = registry.delete(path).await {
                tracing::debug!(%path, "Failed to delete published node: {}", e);
            }
        }
        let count = pubs.len();
        pubs.clear();
        self.settle_state(false);
        tracing::info!(count, "Cleared published nodes");
    }
}

/// Advertises one service instance in the registry and keeps it there.
///
/// Every node the publisher creates is remembered with its payload. A
/// background pass (every 30s by default) recreates nodes the registry lost,
/// e.g. after a session expiry, and rewrites the rest to undo external drift.
///
/// Must be created inside a Tokio runtime. Call [`Publisher::close`] to stop
/// the background work and withdraw every published node.
pub struct Publisher {
    inner: Arc<Inner>,
    heal_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if !self.inner.done.load(Ordering::Acquire) {
            tracing::debug!("Publisher dropped (close should be called explicitly)");
            self.inner.close_token.cancel();
        }
    }
}

impl Publisher {
    pub fn new(conf: Arc<dyn MainConf>) -> Self {
        Self::with_heal_interval(conf, Duration::from_secs(DEFAULT_HEAL_INTERVAL_SECS))
    }

    /// Create with a custom reconciliation interval.
    pub fn with_heal_interval(conf: Arc<dyn MainConf>, heal_interval: Duration) -> Self {
        let inner = Arc::new(Inner {
            conf,
            pubs: Mutex::new(BTreeMap::new()),
            server_node: ArcSwapOption::empty(),
            done: AtomicBool::new(false),
            state: AtomicU8::new(PublisherState::Idle as u8),
            close_token: CancellationToken::new(),
            watch_token: ArcSwap::from_pointee(CancellationToken::new()),
        });
        let heal_handle = Self::spawn_heal_task(inner.clone(), heal_interval);

        Self {
            inner,
            heal_handle: Some(heal_handle),
        }
    }

    fn spawn_heal_task(inner: Arc<Inner>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut heal_interval = tokio::time::interval_at(start, period);
            heal_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = inner.close_token.cancelled() => {
                        tracing::debug!("Heal task shutting down");
                        break;
                    }

                    _ = heal_interval.tick() => {
                        if inner.done.load(Ordering::Acquire) {
                            break;
                        }
                        if let Err(e) = inner.heal().await {
                            tracing::warn!("Heal pass aborted, retrying next tick: {}", e);
                        }
                    }
                }
            }
        })
    }

    /// Publish the server node and, depending on the role, DNS and service
    /// discovery nodes.
    ///
    /// Stops at the first failure. Nodes created before it stay published;
    /// calling `publish` again is safe.
    pub async fn publish(
        &self,
        server_name: &str,
        service_addr: &str,
        cluster_id: &str,
        services: &[&str],
    ) -> Result<(), Error> {
        let data = payload::build(service_addr, cluster_id, &[])?;

        self.inner.set_state(PublisherState::Publishing);
        let result = self.publish_nodes(server_name, &data, services).await;
        let has_entries = !self.inner.pubs.lock().await.is_empty();
        self.inner.settle_state(has_entries);
        result
    }

    async fn publish_nodes(
        &self,
        server_name: &str,
        data: &str,
        services: &[&str],
    ) -> Result<(), Error> {
        self.pub_server_node(server_name, data).await?;

        let server_type = self.inner.conf.server_type();
        if server_type.is_http() {
            self.pub_dns_node(server_name).await?;
            return self.pub_api_service_node(server_name, data).await;
        }
        if server_type == crate::ServerType::Rpc {
            for service in services {
                self.pub_rpc_service_node(server_name, service, data).await?;
            }
        }
        Ok(())
    }

    /// Server node under the cluster path; its name ranks this instance.
    async fn pub_server_node(&self, server_name: &str, data: &str) -> Result<(), Error> {
        let conf = &self.inner.conf;
        let prefix = path::join([
            conf.server_pub_path(),
            format!("{}_{}_", server_name, conf.server_id()),
        ]);
        let node = self.create_seq(&prefix, data).await?;
        self.inner.server_node.store(Some(Arc::new(node.clone())));
        self.inner.append_pub(node, data.to_string()).await;
        Ok(())
    }

    async fn pub_dns_node(&self, server_name: &str) -> Result<(), Error> {
        let conf = &self.inner.conf;
        let Some(domain) = conf.domain() else {
            return Ok(());
        };
        let ip = payload::host_of(server_name)?;
        let node = path::join([conf.dns_pub_path(&domain), ip.to_string()]);
        conf.registry()
            .create_temp_node(&node, "")
            .await
            .map_err(|source| Error::Publish {
                path: node.clone(),
                source,
            })?;
        tracing::info!(path = %node, "Published DNS node");
        self.inner.append_pub(node, String::new()).await;
        Ok(())
    }

    async fn pub_api_service_node(&self, server_name: &str, data: &str) -> Result<(), Error> {
        let prefix = path::join([self.inner.conf.service_pub_path(), format!("{}_", server_name)]);
        let node = self.create_seq(&prefix, data).await?;
        self.inner.append_pub(node, data.to_string()).await;
        Ok(())
    }

    async fn pub_rpc_service_node(
        &self,
        server_name: &str,
        service: &str,
        data: &str,
    ) -> Result<(), Error> {
        let prefix = path::join([
            self.inner.conf.rpc_service_pub_path(service),
            format!("{}_", server_name),
        ]);
        let node = self.create_seq(&prefix, data).await?;
        self.inner.append_pub(node, data.to_string()).await;
        Ok(())
    }

    async fn create_seq(&self, prefix: &str, data: &str) -> Result<String, Error> {
        let node = self
            .inner
            .conf
            .registry()
            .create_seq_node(prefix, data)
            .await
            .map_err(|source| Error::Publish {
                path: prefix.to_string(),
                source,
            })?;
        tracing::info!(path = %node, "Published node");
        Ok(node)
    }

    /// Refresh the payload of every published node whose path contains
    /// `server_name`, layering `kv` pairs over the base payload.
    ///
    /// # Errors
    ///
    /// Fails before touching the registry if `kv` has odd length. A registry
    /// failure stops the update; entries already rewritten locally are
    /// reconciled by the next heal pass.
    pub async fn update(
        &self,
        server_name: &str,
        service_addr: &str,
        cluster_id: &str,
        kv: &[&str],
    ) -> Result<(), Error> {
        let data = payload::build(service_addr, cluster_id, kv)?;

        let registry = self.inner.conf.registry();
        let mut pubs = self.inner.pubs.lock().await;
        for (path, value) in pubs.iter_mut() {
            if self.inner.done.load(Ordering::Acquire) {
                break;
            }
            if !path.contains(server_name) {
                continue;
            }
            *value = data.clone();
            registry.update(path, &data).await?;
        }
        Ok(())
    }

    /// Follow the cluster's server nodes and report this instance's standing.
    ///
    /// `notify(is_master, sharding, total)` runs on a background task, once
    /// for the current membership and again after every change. `total` is
    /// the `sharding` setting of the main configuration, read per event.
    /// A previous cluster watch of this publisher is replaced.
    pub async fn watch_cluster_change<F>(&self, notify: F) -> Result<(), Error>
    where
        F: Fn(bool, i64, i64) + Send + Sync + 'static,
    {
        let conf = &self.inner.conf;
        let mut watcher = ChildWatcher::new(conf.registry(), vec![conf.server_pub_path()]);
        let mut rx = watcher.start().await?;

        let watch_token = CancellationToken::new();
        self.inner
            .watch_token
            .swap(Arc::new(watch_token.clone()))
            .cancel();
        let inner = self.inner.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.close_token.cancelled() => break,
                    _ = watch_token.cancelled() => break,

                    change = rx.recv() => {
                        let Some(change) = change else { break };
                        let total = inner.conf.main_conf().get_int(SHARDING_KEY, 0);
                        let own = inner.server_node.load_full();
                        let own = own.as_deref().map(String::as_str).unwrap_or("");
                        let (sharding, is_master) = sharding::get_sharding(own, &change.children);
                        tracing::debug!(
                            members = change.children.len(),
                            sharding,
                            is_master,
                            total,
                            "Cluster membership changed"
                        );
                        notify(is_master, sharding, total);
                    }
                }
            }
            watcher.close();
            tracing::debug!("Cluster watch task shutting down");
        });
        Ok(())
    }

    /// Delete every published node and forget them. Deletion failures are
    /// ignored. Also ends the current cluster watch.
    pub async fn clear(&self) {
        self.inner.clear().await;
    }

    /// Run one reconciliation pass now; returns how many nodes were recreated.
    pub async fn heal(&self) -> Result<usize, Error> {
        self.inner.heal().await
    }

    pub fn state(&self) -> PublisherState {
        PublisherState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Resolved path of this instance's server node, once published.
    pub fn server_node(&self) -> Option<String> {
        self.inner.server_node.load_full().map(|node| node.to_string())
    }

    /// Snapshot of published paths and their last written payloads.
    pub async fn published(&self) -> BTreeMap<String, String> {
        self.inner.pubs.lock().await.clone()
    }

    /// Stop background work and withdraw every published node.
    pub async fn close(mut self) {
        self.inner.done.store(true, Ordering::Release);
        self.inner.close_token.cancel();
        self.inner.clear().await;
        self.inner.set_state(PublisherState::Closed);

        if let Some(handle) = self.heal_handle.take() {
            let _ = handle.await;
        }
        tracing::info!("Publisher closed");
    }
}
