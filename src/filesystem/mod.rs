//! In-memory hierarchical tree of directories and files.
//!
//! Nodes live in an arena owned by [`Tree`]; [`TreeEngine`] wraps the tree
//! with a bounded-wait reader/writer lock and a path cache and exposes the
//! CRUD surface.

mod cache;
mod config;
mod engine;
mod error;
mod node;
mod path;
mod resolver;
mod snapshot;
mod tree;

pub use cache::{CacheCounters, PathCache};
pub use config::{DEFAULT_CACHE_CAPACITY, DEFAULT_LOCK_TIMEOUT, EngineConfig};
pub use engine::{EngineStats, NodeSpec, TreeEngine};
pub use error::{TreeError, TreeResult};
pub use node::{Node, NodeBody, NodeId, NodeInfo, NodeKind, content_digest, validate_name};
pub use path::{SEPARATOR, TreePath};
pub use resolver::{PathResolver, Resolution, Walk};
pub use snapshot::{Snapshot, SnapshotBody, SnapshotError, SnapshotNode};
pub use tree::Tree;
