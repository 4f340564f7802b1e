use arc_swap::ArcSwap;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use svc_registry::{path, Registry, SeedScope};
use uuid::Uuid;

use crate::Error;

/// Role of a running server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerType {
    Api,
    Web,
    Rpc,
    Mqc,
    Cron,
}

impl ServerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Web => "web",
            Self::Rpc => "rpc",
            Self::Mqc => "mqc",
            Self::Cron => "cron",
        }
    }

    /// HTTP-facing roles publish DNS and API service nodes.
    pub fn is_http(&self) -> bool {
        matches!(self, Self::Api | Self::Web)
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ServerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" => Ok(Self::Api),
            "web" => Ok(Self::Web),
            "rpc" => Ok(Self::Rpc),
            "mqc" => Ok(Self::Mqc),
            "cron" => Ok(Self::Cron),
            other => Err(Error::Config(format!("unknown server type: {}", other))),
        }
    }
}

/// Key/value settings of the main configuration node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings(Map<String, Value>);

impl Settings {
    pub fn new(values: Map<String, Value>) -> Self {
        Self(values)
    }

    /// Parse a JSON object. An empty payload is an empty settings map.
    pub fn from_json(raw: &str) -> Result<Self, Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        match serde_json::from_str::<Value>(raw)? {
            Value::Object(values) => Ok(Self(values)),
            other => Err(Error::Config(format!(
                "main configuration must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Integer setting; numeric strings are accepted. Falls back to `default`.
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.0.get(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

/// Read-only view of the running server's configuration, as consumed by the
/// publisher.
pub trait MainConf: Send + Sync {
    fn server_type(&self) -> ServerType;

    /// Current main configuration settings.
    fn main_conf(&self) -> Arc<Settings>;

    /// Parent of every server node in this cluster.
    fn server_pub_path(&self) -> String;

    /// Parent of the API service-discovery nodes.
    fn service_pub_path(&self) -> String;

    /// Parent of the service-discovery nodes of one RPC service.
    fn rpc_service_pub_path(&self, service: &str) -> String;

    /// Parent of the DNS nodes of `domain`.
    fn dns_pub_path(&self, domain: &str) -> String;

    fn server_id(&self) -> &str;

    fn registry(&self) -> Arc<dyn Registry>;

    /// Published domain of an HTTP server, if one is configured.
    fn domain(&self) -> Option<String> {
        self.main_conf()
            .get_string("domain")
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
    }
}

/// [`MainConf`] backed by the `plat/sys/type/cluster/conf` registry node.
pub struct ServerConf {
    scope: SeedScope,
    server_type: ServerType,
    server_id: String,
    registry: Arc<dyn Registry>,
    settings: ArcSwap<Settings>,
}

impl ServerConf {
    /// Read the main configuration node once. A missing node means defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry read fails or the node is not a JSON object.
    pub async fn load(
        registry: Arc<dyn Registry>,
        scope: SeedScope,
        server_type: ServerType,
    ) -> Result<Self, Error> {
        let conf = Self {
            scope,
            server_type,
            server_id: short_id(),
            registry,
            settings: ArcSwap::from_pointee(Settings::default()),
        };
        conf.reload().await?;
        Ok(conf)
    }

    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = server_id.into();
        self
    }

    /// Path of the main configuration node.
    pub fn conf_path(&self) -> String {
        path::join([
            self.scope.plat_name.as_str(),
            self.scope.sys_name.as_str(),
            self.server_type.as_str(),
            self.scope.cluster_name.as_str(),
            "conf",
        ])
    }

    /// Re-read the main configuration node.
    pub async fn reload(&self) -> Result<(), Error> {
        let conf_path = self.conf_path();
        let settings = match self.registry.get_value(&conf_path).await {
            Ok((raw, _)) => Settings::from_json(&raw)?,
            Err(svc_registry::Error::NotFound(_)) => {
                tracing::debug!(path = %conf_path, "No main configuration node, using defaults");
                Settings::default()
            }
            Err(e) => return Err(e.into()),
        };
        self.settings.store(Arc::new(settings));
        Ok(())
    }
}

impl MainConf for ServerConf {
    fn server_type(&self) -> ServerType {
        self.server_type
    }

    fn main_conf(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    fn server_pub_path(&self) -> String {
        path::join([
            self.scope.plat_name.as_str(),
            self.scope.sys_name.as_str(),
            self.server_type.as_str(),
            self.scope.cluster_name.as_str(),
            "servers",
        ])
    }

    fn service_pub_path(&self) -> String {
        path::join([
            self.scope.plat_name.as_str(),
            "services",
            self.server_type.as_str(),
            "providers",
        ])
    }

    fn rpc_service_pub_path(&self, service: &str) -> String {
        path::join([self.scope.plat_name.as_str(), "services", service, "providers"])
    }

    fn dns_pub_path(&self, domain: &str) -> String {
        path::join(["dns", domain])
    }

    fn server_id(&self) -> &str {
        &self.server_id
    }

    fn registry(&self) -> Arc<dyn Registry> {
        self.registry.clone()
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
