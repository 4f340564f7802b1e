use async_trait::async_trait;

use crate::{ChildrenEvent, Error, ValueEvent, Watch};

/// Hierarchical node store shared by every higher layer.
///
/// Paths are canonicalised by the driver (see [`crate::path`]). Unless noted,
/// operations on an absent path fail with [`Error::NotFound`], and every
/// operation fails with [`Error::Closed`] once [`Registry::close`] has run.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Whether a node exists. Absence is not an error.
    async fn exists(&self, path: &str) -> Result<bool, Error>;

    /// Value and version of a node.
    async fn get_value(&self, path: &str) -> Result<(String, u64), Error>;

    /// Replace the value of an existing node, bumping its version. Never creates.
    async fn update(&self, path: &str, value: &str) -> Result<(), Error>;

    /// Create or overwrite a persistent node.
    async fn create_persistent_node(&self, path: &str, value: &str) -> Result<(), Error>;

    /// Create or overwrite an ephemeral node bound to the current session.
    async fn create_temp_node(&self, path: &str, value: &str) -> Result<(), Error>;

    /// Create a sequential node under `prefix` and return its resolved path.
    ///
    /// The suffix is unique for the lifetime of the driver and never reused.
    async fn create_seq_node(&self, prefix: &str, value: &str) -> Result<String, Error>;

    /// Immediate child names of `path` (not full paths) and its children version.
    /// An absent path has no children.
    async fn get_children(&self, path: &str) -> Result<(Vec<String>, u64), Error>;

    /// Remove a node. Removing an absent node succeeds.
    async fn delete(&self, path: &str) -> Result<(), Error>;

    /// Subscribe to value changes of `path`, FIFO per path.
    async fn watch_value(&self, path: &str) -> Result<Watch<ValueEvent>, Error>;

    /// Subscribe to children changes of `path`, FIFO per path.
    async fn watch_children(&self, path: &str) -> Result<Watch<ChildrenEvent>, Error>;

    /// Release driver resources and end every open watch.
    async fn close(&self) -> Result<(), Error>;
}
