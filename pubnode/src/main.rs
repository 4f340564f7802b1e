//! Runs one service instance against a registry.
//!
//! Publishes the instance, reports cluster standing as JSON lines on stdout
//! and withdraws everything on Ctrl+C/SIGTERM.
//!
//! Run: REGISTRY_ADDR=fs://./ SERVER_TYPE=cron SERVER_ADDR=127.0.0.1:9000 cargo run -p pub-node

use dotenv::dotenv;
use serde::Serialize;
use std::env;
use std::sync::Arc;
use svc_publisher::{MainConf, Publisher, ServerConf, ServerType};
use svc_registry::{DriverOptions, Registry, RegistryFacade, SeedScope, DEFAULT_LOCAL_CONF_NAME};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Serialize)]
struct Status<'a> {
    event: &'a str,
    server_id: &'a str,
    is_master: bool,
    sharding: i64,
    total: i64,
}

fn print_status(status: &Status<'_>) {
    match serde_json::to_string(status) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::warn!("Failed to encode status: {}", e),
    }
}

/// Validate required environment variables at startup
fn validate_environment() -> Result<(), String> {
    let mut errors = Vec::new();

    if env::var("REGISTRY_ADDR").is_err() {
        errors.push("REGISTRY_ADDR must be set (e.g. fs://./conf or lm://.)".to_string());
    }

    if env::var("SERVER_ADDR").is_err() {
        errors.push("SERVER_ADDR must be set (host:port this instance serves on)".to_string());
    }

    match env::var("SERVER_TYPE") {
        Ok(raw) => {
            if let Err(e) = raw.parse::<ServerType>() {
                errors.push(format!("SERVER_TYPE is invalid: {}", e));
            }
        }
        Err(_) => errors.push("SERVER_TYPE must be set (api|web|rpc|mqc|cron)".to_string()),
    }

    let is_rpc = matches!(env::var("SERVER_TYPE"), Ok(t) if t.trim().eq_ignore_ascii_case("rpc"));
    if is_rpc && env::var("RPC_SERVICES").is_err() {
        tracing::warn!("RPC_SERVICES not set, no RPC service nodes will be published");
    }

    if !errors.is_empty() {
        return Err(format!(
            "Missing or invalid environment variables:\n  - {}",
            errors.join("\n  - ")
        ));
    }

    Ok(())
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn std::error::Error>> {
    // JSON logs in production
    let is_production = env::var("NODE_ENV").unwrap_or_default() == "production";
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if is_production {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Err(e) = validate_environment() {
        eprintln!("\nConfiguration Error:\n{}\n", e);
        std::process::exit(1);
    }

    let registry_addr = env::var("REGISTRY_ADDR")?;
    let server_addr = env::var("SERVER_ADDR")?;
    let server_type: ServerType = env::var("SERVER_TYPE")?.parse()?;
    let rpc_services = env::var("RPC_SERVICES").unwrap_or_default();
    let services: Vec<&str> = rpc_services
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let scope = SeedScope {
        plat_name: env_or("PLAT_NAME", "hydra"),
        sys_name: env_or("SYS_NAME", "sys"),
        cluster_name: env_or("CLUSTER_NAME", "default"),
    };
    let options = DriverOptions::new(scope.clone())
        .with_local_conf_name(env_or("LOCAL_CONF_NAME", DEFAULT_LOCAL_CONF_NAME));

    let facade = RegistryFacade::with_builtin();
    let registry = facade.connect(&registry_addr, options).await?;
    tracing::info!(addr = %registry_addr, "Registry connected");

    let conf = ServerConf::load(registry.clone(), scope.clone(), server_type).await?;
    let conf_path = conf.conf_path();
    let short_id = conf.server_id().to_string();

    let publisher = Publisher::new(Arc::new(conf));
    publisher
        .publish(&server_addr, &server_addr, &scope.cluster_name, &services)
        .await?;
    tracing::info!(
        server_type = %server_type,
        node = ?publisher.server_node(),
        conf = %conf_path,
        "Instance published"
    );

    let watch_id = short_id.clone();
    publisher
        .watch_cluster_change(move |is_master, sharding, total| {
            tracing::info!(is_master, sharding, total, "Cluster standing changed");
            print_status(&Status {
                event: "cluster",
                server_id: &watch_id,
                is_master,
                sharding,
                total,
            });
        })
        .await?;

    wait_for_shutdown_signal().await;

    tracing::info!("Shutting down gracefully...");
    publisher.close().await;
    if let Err(e) = registry.close().await {
        tracing::warn!("Registry close failed: {}", e);
    }
    tracing::info!(server_id = %short_id, "Instance withdrawn");
    Ok(())
}
