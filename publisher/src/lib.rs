//! Service publication on top of [`svc_registry`].
//!
//! A [`Publisher`] advertises one running server: a sequential server node
//! under its cluster, plus DNS and API service nodes for HTTP roles or one
//! service node per RPC service. Everything it writes is remembered, so a
//! periodic reconciliation pass can restore nodes the registry loses.
//!
//! [`Publisher::watch_cluster_change`] follows the cluster's server nodes and
//! reports `(is_master, sharding, total)` whenever membership changes; see
//! [`sharding`] for the ranking rule.

mod conf;
mod error;
mod payload;
mod publisher;
pub mod sharding;

pub use conf::{MainConf, ServerConf, ServerType, Settings};
pub use error::Error;
pub use payload::{build as build_payload, host_of};
pub use publisher::{Publisher, PublisherState};
