use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::RwLock;

use crate::path::{self, child_segment};
use crate::{ChildrenEvent, Error, Node, NodeKind, Registry, ValueEvent, Watch};

/// Node name that maps to the bare `conf` path when seeding.
const MAIN_CONF_NAME: &str = "main";

/// Names that place seeded settings in the node tree.
#[derive(Debug, Clone, Default)]
pub struct SeedScope {
    pub plat_name: String,
    pub sys_name: String,
    pub cluster_name: String,
}

/// Syntax of a seed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedFormat {
    Toml,
    Json,
}

impl SeedFormat {
    /// `.json` files are JSON, everything else is TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

/// server-type -> node-name -> settings
type SeedDocument = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

#[derive(Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    child_versions: HashMap<String, u64>,
    value_watches: HashMap<String, Vec<UnboundedSender<ValueEvent>>>,
    children_watches: HashMap<String, Vec<UnboundedSender<ChildrenEvent>>>,
}

impl State {
    fn children(&self, parent: &str) -> Vec<String> {
        let start = if parent.is_empty() {
            String::new()
        } else {
            format!("{}/", parent)
        };
        let names: BTreeSet<&str> = self
            .nodes
            .range(start.clone()..)
            .map(|(key, _)| key.as_str())
            .take_while(|key| key.starts_with(&start))
            .filter_map(|key| child_segment(parent, key))
            .collect();
        names.into_iter().map(str::to_string).collect()
    }

    fn child_version(&self, parent: &str) -> u64 {
        self.child_versions.get(parent).copied().unwrap_or(0)
    }

    fn insert(&mut self, path: String, value: &str, kind: NodeKind) {
        let created = match self.nodes.get_mut(&path) {
            Some(node) => {
                node.value = value.to_string();
                node.version += 1;
                node.kind = kind;
                false
            }
            None => {
                self.nodes.insert(
                    path.clone(),
                    Node {
                        value: value.to_string(),
                        version: 0,
                        kind,
                    },
                );
                true
            }
        };
        self.notify_value(&path);
        if created {
            self.on_children_changed(&path);
        }
    }

    fn remove(&mut self, path: &str) -> bool {
        if self.nodes.remove(path).is_none() {
            return false;
        }
        self.notify_value(path);
        self.on_children_changed(path);
        true
    }

    fn notify_value(&mut self, path: &str) {
        let event = match self.nodes.get(path) {
            Some(node) => ValueEvent {
                path: path.to_string(),
                value: Some(node.value.clone()),
                version: node.version,
            },
            None => ValueEvent {
                path: path.to_string(),
                value: None,
                version: 0,
            },
        };
        if let Some(senders) = self.value_watches.get_mut(path) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Bump the children version of the direct parent and of every watched
    /// ancestor, notify those watchers, then forget versions of ancestors
    /// left without children.
    fn on_children_changed(&mut self, path: &str) {
        let watched: Vec<String> = self
            .children_watches
            .keys()
            .filter(|w| child_segment(w, path).is_some())
            .cloned()
            .collect();

        let mut bumped: BTreeSet<String> = watched.iter().cloned().collect();
        if let Some(parent) = path::parent(path) {
            bumped.insert(parent.to_string());
        }
        for changed in &bumped {
            *self.child_versions.entry(changed.clone()).or_insert(0) += 1;
        }

        for watched_path in watched {
            let event = ChildrenEvent {
                children: self.children(&watched_path),
                version: self.child_version(&watched_path),
                path: watched_path.clone(),
            };
            if let Some(senders) = self.children_watches.get_mut(&watched_path) {
                senders.retain(|tx| tx.send(event.clone()).is_ok());
            }
        }
        self.value_watches.retain(|_, senders| !senders.is_empty());
        self.children_watches.retain(|_, senders| !senders.is_empty());

        let mut ancestor = path::parent(path);
        while let Some(current) = ancestor {
            if !self.children_watches.contains_key(current) && self.children(current).is_empty() {
                self.child_versions.remove(current);
            }
            ancestor = path::parent(current);
        }
    }
}

/// In-memory registry, optionally seeded from a local settings document.
///
/// Used for standalone operation and as the reference driver in tests.
/// Every operation runs under one reader/writer lock; watch notifications are
/// sent while the write lock is held, which keeps per-path delivery FIFO.
pub struct MemoryRegistry {
    state: RwLock<State>,
    seq: AtomicU64,
    closed: AtomicBool,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Seed from a file. Fails if the file is missing or any entry is malformed.
    pub fn from_seed_file(path: impl AsRef<Path>, scope: &SeedScope) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Seed(format!(
                "seed file not found: {}",
                path.display()
            )));
        }
        let doc = std::fs::read_to_string(path)?;
        let registry = Self::from_seed_str(&doc, SeedFormat::from_path(path), scope)?;
        tracing::info!(path = %path.display(), "Seeded in-memory registry from file");
        Ok(registry)
    }

    /// Seed from a document held in memory.
    ///
    /// Each `type -> name -> settings` entry is stored as JSON at
    /// `plat/sys/type/cluster/conf/name`, or at `plat/sys/type/cluster/conf`
    /// for the `main` entry.
    pub fn from_seed_str(doc: &str, format: SeedFormat, scope: &SeedScope) -> Result<Self, Error> {
        let parsed: SeedDocument = match format {
            SeedFormat::Toml => toml::from_str(doc).map_err(|e| Error::Seed(e.to_string()))?,
            SeedFormat::Json => {
                serde_json::from_str(doc).map_err(|e| Error::Seed(e.to_string()))?
            }
        };

        let mut state = State::default();
        for (server_type, entries) in &parsed {
            for (name, settings) in entries {
                let base = [
                    scope.plat_name.as_str(),
                    scope.sys_name.as_str(),
                    server_type.as_str(),
                    scope.cluster_name.as_str(),
                    "conf",
                ];
                let node_path = if name == MAIN_CONF_NAME {
                    path::join(base)
                } else {
                    path::join(base.into_iter().chain([name.as_str()]))
                };
                let value = serde_json::to_string(settings)?;
                state.nodes.insert(
                    node_path,
                    Node {
                        value,
                        version: 0,
                        kind: NodeKind::Persistent,
                    },
                );
            }
        }

        tracing::debug!(count = state.nodes.len(), "Loaded seed entries");
        Ok(Self {
            state: RwLock::new(state),
            seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Drop every ephemeral and sequential node, as a backend does when the
    /// owning session expires.
    pub async fn expire_session(&self) {
        let mut state = self.state.write().await;
        let lost: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, node)| node.kind.is_session_bound())
            .map(|(path, _)| path.clone())
            .collect();
        for path in &lost {
            state.remove(path);
        }
        tracing::info!(count = lost.len(), "Session expired, dropped session-bound nodes");
    }

    /// End every open watch stream without closing the registry, as a backend
    /// does when it loses its watch subscriptions.
    pub async fn drop_watches(&self) {
        let mut state = self.state.write().await;
        state.value_watches.clear();
        state.children_watches.clear();
        tracing::debug!("Dropped all watch subscriptions");
    }

    /// Kind of a node, if present.
    pub async fn kind(&self, path: &str) -> Option<NodeKind> {
        let state = self.state.read().await;
        state.nodes.get(&path::canonical(path)).map(|n| n.kind)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn exists(&self, path: &str) -> Result<bool, Error> {
        self.ensure_open()?;
        let state = self.state.read().await;
        Ok(state.nodes.contains_key(&path::canonical(path)))
    }

    async fn get_value(&self, path: &str) -> Result<(String, u64), Error> {
        self.ensure_open()?;
        let path = path::canonical(path);
        let state = self.state.read().await;
        state
            .nodes
            .get(&path)
            .map(|node| (node.value.clone(), node.version))
            .ok_or(Error::NotFound(path))
    }

    async fn update(&self, path: &str, value: &str) -> Result<(), Error> {
        self.ensure_open()?;
        let path = path::canonical(path);
        let mut state = self.state.write().await;
        match state.nodes.get(&path).map(|node| node.kind) {
            Some(kind) => {
                state.insert(path, value, kind);
                Ok(())
            }
            None => Err(Error::NotFound(path)),
        }
    }

    async fn create_persistent_node(&self, path: &str, value: &str) -> Result<(), Error> {
        self.ensure_open()?;
        let path = path::canonical(path);
        let mut state = self.state.write().await;
        state.insert(path, value, NodeKind::Persistent);
        Ok(())
    }

    async fn create_temp_node(&self, path: &str, value: &str) -> Result<(), Error> {
        self.ensure_open()?;
        let path = path::canonical(path);
        let mut state = self.state.write().await;
        if state.nodes.get(&path).map(|n| n.value.as_str()) == Some(value) {
            return Ok(());
        }
        state.insert(path, value, NodeKind::Ephemeral);
        Ok(())
    }

    async fn create_seq_node(&self, prefix: &str, value: &str) -> Result<String, Error> {
        self.ensure_open()?;
        let prefix = path::canonical(prefix);
        if prefix.is_empty() {
            return Err(Error::InvalidArgument("empty sequential prefix".into()));
        }
        let mut state = self.state.write().await;
        let id = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let resolved = format!("{}{:010}", prefix, id);
        state.insert(resolved.clone(), value, NodeKind::Sequential);
        Ok(resolved)
    }

    async fn get_children(&self, path: &str) -> Result<(Vec<String>, u64), Error> {
        self.ensure_open()?;
        let path = path::canonical(path);
        let state = self.state.read().await;
        Ok((state.children(&path), state.child_version(&path)))
    }

    async fn delete(&self, path: &str) -> Result<(), Error> {
        self.ensure_open()?;
        let path = path::canonical(path);
        let mut state = self.state.write().await;
        state.remove(&path);
        Ok(())
    }

    async fn watch_value(&self, path: &str) -> Result<Watch<ValueEvent>, Error> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.write().await;
        state
            .value_watches
            .entry(path::canonical(path))
            .or_default()
            .push(tx);
        Ok(Watch::new(rx))
    }

    async fn watch_children(&self, path: &str) -> Result<Watch<ChildrenEvent>, Error> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.write().await;
        state
            .children_watches
            .entry(path::canonical(path))
            .or_default()
            .push(tx);
        Ok(Watch::new(rx))
    }

    async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.state.write().await;
        state.value_watches.clear();
        state.children_watches.clear();
        tracing::debug!("In-memory registry closed");
        Ok(())
    }
}
