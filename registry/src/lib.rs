//! Hierarchical coordination registry.
//!
//! This crate provides:
//! - The [`Registry`] capability: a versioned node tree with persistent,
//!   ephemeral and sequential nodes, plus value and children watches
//! - [`MemoryRegistry`], an in-memory driver optionally seeded from a local
//!   TOML/JSON settings document, for standalone operation and tests
//! - [`RegistryFacade`], a scheme -> factory table that opens drivers from
//!   addresses such as `fs://./conf` or `lm://.`
//! - [`ChildWatcher`], which merges children watches on several paths into
//!   one cancellable channel and re-subscribes when the backend drops a watch
//!
//! # Example
//!
//! ```rust,ignore
//! use svc_registry::{DriverOptions, RegistryFacade, SeedScope};
//!
//! let facade = RegistryFacade::with_builtin();
//! let registry = facade.connect("lm://.", DriverOptions::new(SeedScope::default())).await?;
//!
//! let node = registry.create_seq_node("demo/servers/node_", "{}").await?;
//! let (children, _) = registry.get_children("demo/servers").await?;
//! assert_eq!(children.len(), 1);
//! registry.delete(&node).await?;
//! ```

mod error;
mod facade;
mod memory;
mod node;
pub mod path;
mod registry;
mod watcher;

pub use error::Error;
pub use facade::{
    DriverOptions, FileSystemFactory, LocalMemoryFactory, RegistryAddr, RegistryFacade,
    RegistryFactory, DEFAULT_LOCAL_CONF_NAME, FILE_SYSTEM, LOCAL_MEMORY,
};
pub use memory::{MemoryRegistry, SeedFormat, SeedScope};
pub use node::{ChildrenEvent, Node, NodeKind, ValueEvent, Watch};
pub use registry::Registry;
pub use watcher::{ChildWatcher, ChildrenChange};
