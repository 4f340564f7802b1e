use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::{Error, MemoryRegistry, Registry, SeedScope};

/// Scheme of the empty in-memory driver.
pub const LOCAL_MEMORY: &str = "lm";
/// Scheme of the in-memory driver seeded from a local settings file.
pub const FILE_SYSTEM: &str = "fs";
/// Seed file looked up under the first `fs://` address.
pub const DEFAULT_LOCAL_CONF_NAME: &str = "conf.toml";

/// Connection parameters handed to a driver factory.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub addrs: Vec<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub scope: SeedScope,
    pub local_conf_name: String,
}

impl DriverOptions {
    pub fn new(scope: SeedScope) -> Self {
        Self {
            addrs: Vec::new(),
            user: None,
            password: None,
            scope,
            local_conf_name: DEFAULT_LOCAL_CONF_NAME.to_string(),
        }
    }

    pub fn with_local_conf_name(mut self, name: impl Into<String>) -> Self {
        self.local_conf_name = name.into();
        self
    }
}

/// A parsed `scheme://[user[:password]@]addr1,addr2` registry address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAddr {
    pub scheme: String,
    pub addrs: Vec<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl RegistryAddr {
    pub fn parse(addr: &str) -> Result<Self, Error> {
        let (scheme, rest) = addr.split_once("://").ok_or_else(|| {
            Error::InvalidArgument(format!("registry address without scheme: {}", addr))
        })?;
        if scheme.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "registry address without scheme: {}",
                addr
            )));
        }

        let (user, password, hosts) = match rest.split_once('@') {
            Some((creds, hosts)) => match creds.split_once(':') {
                Some((u, p)) => (Some(u.to_string()), Some(p.to_string()), hosts),
                None => (Some(creds.to_string()), None, hosts),
            },
            None => (None, None, rest),
        };

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            addrs: hosts
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            user,
            password,
        })
    }
}

/// Builds a driver instance for one scheme.
#[async_trait]
pub trait RegistryFactory: Send + Sync {
    async fn create(&self, options: &DriverOptions) -> Result<Arc<dyn Registry>, Error>;
}

/// `lm://`: an empty in-memory registry.
pub struct LocalMemoryFactory;

#[async_trait]
impl RegistryFactory for LocalMemoryFactory {
    async fn create(&self, _options: &DriverOptions) -> Result<Arc<dyn Registry>, Error> {
        Ok(Arc::new(MemoryRegistry::new()))
    }
}

/// `fs://<dir>`: an in-memory registry seeded from `<dir>/<local_conf_name>`.
pub struct FileSystemFactory;

#[async_trait]
impl RegistryFactory for FileSystemFactory {
    async fn create(&self, options: &DriverOptions) -> Result<Arc<dyn Registry>, Error> {
        let dir = options
            .addrs
            .first()
            .ok_or_else(|| Error::InvalidArgument("fs registry requires a directory".into()))?;
        let file = Path::new(dir).join(&options.local_conf_name);
        Ok(Arc::new(MemoryRegistry::from_seed_file(file, &options.scope)?))
    }
}

/// Scheme -> factory table, owned by process bootstrap and passed to whoever
/// needs to open a registry.
///
/// Register every scheme before the first [`RegistryFacade::connect`].
#[derive(Default)]
pub struct RegistryFacade {
    factories: HashMap<String, Arc<dyn RegistryFactory>>,
}

impl RegistryFacade {
    pub fn new() -> Self {
        Self::default()
    }

    /// A facade with the `lm` and `fs` drivers registered.
    pub fn with_builtin() -> Self {
        let mut facade = Self::new();
        facade.register(LOCAL_MEMORY, Arc::new(LocalMemoryFactory));
        facade.register(FILE_SYSTEM, Arc::new(FileSystemFactory));
        facade
    }

    /// Add or replace the factory for `scheme`.
    pub fn register(&mut self, scheme: &str, factory: Arc<dyn RegistryFactory>) {
        let scheme = scheme.to_ascii_lowercase();
        if self.factories.insert(scheme.clone(), factory).is_some() {
            tracing::debug!(%scheme, "Replaced registry driver");
        }
    }

    pub fn is_registered(&self, scheme: &str) -> bool {
        self.factories.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Open a driver for `addr`, filling addresses and credentials from it.
    pub async fn connect(
        &self,
        addr: &str,
        options: DriverOptions,
    ) -> Result<Arc<dyn Registry>, Error> {
        let parsed = RegistryAddr::parse(addr)?;
        let options = DriverOptions {
            addrs: parsed.addrs,
            user: parsed.user,
            password: parsed.password,
            ..options
        };
        self.create(&parsed.scheme, &options).await
    }

    /// Open a driver for `scheme` with explicit options.
    pub async fn create(
        &self,
        scheme: &str,
        options: &DriverOptions,
    ) -> Result<Arc<dyn Registry>, Error> {
        let factory = self
            .factories
            .get(&scheme.to_ascii_lowercase())
            .ok_or_else(|| Error::UnknownDriver(scheme.to_string()))?;
        let registry = factory.create(options).await?;
        tracing::info!(%scheme, addrs = ?options.addrs, "Registry driver created");
        Ok(registry)
    }
}
