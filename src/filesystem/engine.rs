use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::filesystem::cache::{CacheCounters, PathCache};
use crate::filesystem::config::EngineConfig;
use crate::filesystem::error::{
    AlreadyExistsSnafu, BusySnafu, CorruptedSnafu, CyclicMoveSnafu, DirectoryNotEmptySnafu,
    IsADirectorySnafu, NotADirectorySnafu, NotFoundSnafu, ParentNotFoundSnafu,
    RootNotAllowedSnafu, TreeResult,
};
use crate::filesystem::node::{NodeBody, NodeId, NodeInfo, validate_name};
use crate::filesystem::path::TreePath;
use crate::filesystem::resolver::{PathResolver, Resolution};
use crate::filesystem::tree::Tree;

/// What to create at a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSpec {
    Directory,
    File(Vec<u8>),
}

impl NodeSpec {
    fn into_body(self) -> NodeBody {
        match self {
            NodeSpec::Directory => NodeBody::directory(),
            NodeSpec::File(payload) => NodeBody::file(payload),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub cache: CacheCounters,
    pub cached_paths: usize,
    /// Resolver walks that had to run because the cache missed.
    pub resolver_walks: u64,
    /// Nodes visited across all resolver walks.
    pub resolver_steps: u64,
    pub nodes: usize,
}

/// One in-memory tree with its path cache.
///
/// Reads run concurrently, mutations are exclusive, and every lock
/// acquisition is bounded by [`EngineConfig::lock_timeout`]. All operations
/// complete on the caller's thread.
#[derive(Debug)]
pub struct TreeEngine {
    config: EngineConfig,
    tree: RwLock<Tree>,
    cache: Mutex<PathCache>,
    resolver_walks: AtomicU64,
    resolver_steps: AtomicU64,
}

impl Default for TreeEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl TreeEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::from_tree(Tree::new(), config)
    }

    pub(crate) fn from_tree(tree: Tree, config: EngineConfig) -> Self {
        Self {
            config,
            tree: RwLock::new(tree),
            cache: Mutex::new(PathCache::new(config.cache_capacity)),
            resolver_walks: AtomicU64::new(0),
            resolver_steps: AtomicU64::new(0),
        }
    }

    fn cache(&self) -> MutexGuard<'_, PathCache> {
        self.cache.lock()
    }

    /// Shared access to the tree, bounded by the configured lock timeout.
    pub(crate) fn tree(&self) -> TreeResult<RwLockReadGuard<'_, Tree>> {
        let timeout = self.config.lock_timeout;
        self.tree.try_read_for(timeout).ok_or_else(|| {
            warn!("Read access timed out after {:?}", timeout);
            BusySnafu {
                waited_ms: timeout.as_millis(),
            }
            .build()
        })
    }

    fn tree_mut(&self) -> TreeResult<RwLockWriteGuard<'_, Tree>> {
        let timeout = self.config.lock_timeout;
        self.tree.try_write_for(timeout).ok_or_else(|| {
            warn!("Write access timed out after {:?}", timeout);
            BusySnafu {
                waited_ms: timeout.as_millis(),
            }
            .build()
        })
    }

    /// Cache first, resolver second. Successful walks are written back.
    fn locate(&self, tree: &Tree, path: &TreePath) -> Resolution {
        let cached = self.cache().get(path);
        if let Some(id) = cached {
            if tree.get(id).is_some() {
                return Resolution::Found(id);
            }
            self.cache().invalidate(path);
        }

        let resolver = PathResolver::new(tree);
        let cached_parent = path
            .parent()
            .and_then(|parent| self.cache().peek(&parent))
            .filter(|id| tree.get(*id).is_some());
        let walk = match cached_parent {
            Some(parent) => resolver.resolve_from(parent, path.depth() - 1, path),
            None => resolver.resolve(path),
        };

        self.resolver_walks.fetch_add(1, Ordering::Relaxed);
        self.resolver_steps
            .fetch_add(walk.visited as u64, Ordering::Relaxed);

        if let Resolution::Found(id) = walk.resolution {
            self.cache().put(path, id);
        }
        walk.resolution
    }

    fn require(&self, tree: &Tree, path: &TreePath) -> TreeResult<NodeId> {
        match self.locate(tree, path) {
            Resolution::Found(id) => Ok(id),
            Resolution::Missing { .. } | Resolution::NotADirectory { .. } => NotFoundSnafu {
                path: path.to_string(),
            }
            .fail(),
        }
    }

    fn info(tree: &Tree, id: NodeId, with_payload: bool) -> TreeResult<NodeInfo> {
        tree.get(id)
            .map(|node| node.info(with_payload))
            .ok_or_else(|| {
                CorruptedSnafu {
                    detail: format!("resolved handle {id} is not in the tree"),
                }
                .build()
            })
    }

    /// Resolves `path` to its node handle.
    pub fn resolve(&self, path: &str) -> TreeResult<NodeId> {
        let path = TreePath::parse(path)?;
        let tree = self.tree()?;
        self.require(&tree, &path)
    }

    pub fn create(&self, path: &str, spec: NodeSpec) -> TreeResult<NodeInfo> {
        let path = TreePath::parse(path)?;
        let mut tree = self.tree_mut()?;
        let info = self.create_in(&mut tree, &path, spec)?;
        debug!("Created {} {}", info.kind, path);
        Ok(info)
    }

    pub fn create_dir(&self, path: &str) -> TreeResult<NodeInfo> {
        self.create(path, NodeSpec::Directory)
    }

    pub fn create_file(&self, path: &str, payload: impl Into<Vec<u8>>) -> TreeResult<NodeInfo> {
        self.create(path, NodeSpec::File(payload.into()))
    }

    fn create_in(&self, tree: &mut Tree, path: &TreePath, spec: NodeSpec) -> TreeResult<NodeInfo> {
        let Some(name) = path.file_name() else {
            return AlreadyExistsSnafu {
                path: path.to_string(),
            }
            .fail();
        };

        match self.locate(tree, path) {
            Resolution::Found(_) => AlreadyExistsSnafu {
                path: path.to_string(),
            }
            .fail(),
            Resolution::NotADirectory { segment, .. } => NotADirectorySnafu {
                path: path.prefix(segment).to_string(),
            }
            .fail(),
            Resolution::Missing { segment, deepest } if segment + 1 == path.depth() => {
                let id = tree.attach_new(deepest, name, spec.into_body(), path)?;
                tree.touch(&[deepest], SystemTime::now());
                self.cache().put(path, id);
                Self::info(tree, id, true)
            }
            Resolution::Missing { .. } => ParentNotFoundSnafu {
                path: path.parent().unwrap_or_default().to_string(),
            }
            .fail(),
        }
    }

    /// Returns the node including the payload of a file.
    pub fn read(&self, path: &str) -> TreeResult<NodeInfo> {
        let path = TreePath::parse(path)?;
        let tree = self.tree()?;
        let id = self.require(&tree, &path)?;
        Self::info(&tree, id, true)
    }

    /// Returns the node's metadata without its payload.
    pub fn stat(&self, path: &str) -> TreeResult<NodeInfo> {
        let path = TreePath::parse(path)?;
        let tree = self.tree()?;
        let id = self.require(&tree, &path)?;
        Self::info(&tree, id, false)
    }

    pub fn update(&self, path: &str, payload: impl Into<Vec<u8>>) -> TreeResult<NodeInfo> {
        let path = TreePath::parse(path)?;
        let mut tree = self.tree_mut()?;
        let id = self.require(&tree, &path)?;
        let info = Self::update_in(&mut tree, &path, id, payload.into())?;
        debug!("Updated {} ({} bytes)", path, info.size);
        Ok(info)
    }

    fn update_in(tree: &mut Tree, path: &TreePath, id: NodeId, payload: Vec<u8>) -> TreeResult<NodeInfo> {
        let Some(node) = tree.get_mut(id) else {
            return NotFoundSnafu {
                path: path.to_string(),
            }
            .fail();
        };
        if !node.set_payload(payload) {
            return IsADirectorySnafu {
                path: path.to_string(),
            }
            .fail();
        }
        let parent = node.parent();

        let now = SystemTime::now();
        tree.touch(&[id], now);
        if let Some(parent) = parent {
            tree.touch(&[parent], now);
        }
        Self::info(tree, id, true)
    }

    /// Updates the file at `path`, creating it first if it does not exist yet.
    pub fn write(&self, path: &str, payload: impl Into<Vec<u8>>) -> TreeResult<NodeInfo> {
        let path = TreePath::parse(path)?;
        let payload = payload.into();
        let mut tree = self.tree_mut()?;

        match self.locate(&tree, &path) {
            Resolution::Found(id) => Self::update_in(&mut tree, &path, id, payload),
            Resolution::Missing { .. } | Resolution::NotADirectory { .. } => {
                self.create_in(&mut tree, &path, NodeSpec::File(payload))
            }
        }
    }

    /// Removes the node at `path` and returns how many nodes were destroyed.
    pub fn delete(&self, path: &str, recursive: bool) -> TreeResult<usize> {
        let path = TreePath::parse(path)?;
        if path.is_root() {
            return RootNotAllowedSnafu {
                operation: "delete",
            }
            .fail();
        }

        let mut tree = self.tree_mut()?;
        let id = self.require(&tree, &path)?;
        let (parent, name, has_children) = {
            let node = tree.get(id).ok_or_else(|| {
                NotFoundSnafu {
                    path: path.to_string(),
                }
                .build()
            })?;
            let has_children = node.children().is_some_and(|children| !children.is_empty());
            (node.parent(), node.name().to_string(), has_children)
        };
        if has_children && !recursive {
            return DirectoryNotEmptySnafu {
                path: path.to_string(),
            }
            .fail();
        }
        let Some(parent) = parent else {
            return CorruptedSnafu {
                detail: format!("{path} has no parent"),
            }
            .fail();
        };

        tree.detach(parent, &name);
        let removed = tree.destroy(id);
        tree.touch(&[parent], SystemTime::now());
        self.cache().invalidate_subtree(&path);

        debug!("Deleted {} ({} nodes)", path, removed);
        Ok(removed)
    }

    /// Moves the subtree at `src` under the directory `dst_parent`, optionally
    /// giving it a new name.
    pub fn move_to(&self, src: &str, dst_parent: &str, new_name: Option<&str>) -> TreeResult<NodeInfo> {
        let src = TreePath::parse(src)?;
        let dst_parent = TreePath::parse(dst_parent)?;
        if src.is_root() {
            return RootNotAllowedSnafu { operation: "move" }.fail();
        }
        if let Some(name) = new_name {
            validate_name(name)?;
        }

        let mut tree = self.tree_mut()?;
        let src_id = self.require(&tree, &src)?;
        let dst_id = match self.locate(&tree, &dst_parent) {
            Resolution::Found(id) => id,
            Resolution::Missing { .. } | Resolution::NotADirectory { .. } => {
                return NotFoundSnafu {
                    path: dst_parent.to_string(),
                }
                .fail();
            }
        };

        let (old_parent, old_name) = match tree.get(src_id) {
            Some(node) => (node.parent(), node.name().to_string()),
            None => {
                return NotFoundSnafu {
                    path: src.to_string(),
                }
                .fail();
            }
        };
        let Some(old_parent) = old_parent else {
            return RootNotAllowedSnafu { operation: "move" }.fail();
        };
        let name = new_name.unwrap_or(&old_name).to_string();
        let dst_path = dst_parent.join(&name);

        if tree.is_ancestor_or_self(src_id, dst_id) {
            return CyclicMoveSnafu {
                from: src.to_string(),
                to: dst_path.to_string(),
            }
            .fail();
        }
        let Some(dst_node) = tree.get(dst_id) else {
            return NotFoundSnafu {
                path: dst_parent.to_string(),
            }
            .fail();
        };
        if dst_node.children().is_none() {
            return NotADirectorySnafu {
                path: dst_parent.to_string(),
            }
            .fail();
        }
        if dst_id == old_parent && name == old_name {
            return Self::info(&tree, src_id, false);
        }
        if dst_node.child(&name).is_some() {
            return AlreadyExistsSnafu {
                path: dst_path.to_string(),
            }
            .fail();
        }

        tree.detach(old_parent, &old_name);
        if let Err(err) = tree.reattach(src_id, dst_id, &name, &dst_path) {
            // Put the subtree back where it was so the tree stays whole.
            tree.reattach(src_id, old_parent, &old_name, &src)?;
            return Err(err);
        }
        tree.touch(&[src_id, old_parent, dst_id], SystemTime::now());
        self.cache().invalidate_subtree(&src);

        debug!("Moved {} to {}", src, dst_path);
        Self::info(&tree, src_id, false)
    }

    /// Renames the node at `path` within its current directory.
    pub fn rename(&self, path: &str, new_name: &str) -> TreeResult<NodeInfo> {
        let parsed = TreePath::parse(path)?;
        let Some(parent) = parsed.parent() else {
            return RootNotAllowedSnafu {
                operation: "rename",
            }
            .fail();
        };
        self.move_to(path, &parent.to_string(), Some(new_name))
    }

    /// Immediate children of the directory at `path`, ordered by name.
    pub fn list(&self, path: &str) -> TreeResult<Vec<NodeInfo>> {
        let path = TreePath::parse(path)?;
        let tree = self.tree()?;
        let id = self.require(&tree, &path)?;
        let Some(children) = tree.get(id).and_then(|node| node.children()) else {
            return NotADirectorySnafu {
                path: path.to_string(),
            }
            .fail();
        };

        children
            .values()
            .map(|child| Self::info(&tree, *child, false))
            .collect()
    }

    /// Depth-first, pre-order dump of the subtree at `path`.
    pub fn walk(&self, path: &str) -> TreeResult<Vec<(TreePath, NodeInfo)>> {
        let path = TreePath::parse(path)?;
        let tree = self.tree()?;
        let start = self.require(&tree, &path)?;

        let mut entries = Vec::new();
        let mut pending = vec![(path, start)];
        while let Some((current_path, id)) = pending.pop() {
            let Some(node) = tree.get(id) else {
                continue;
            };
            if let Some(children) = node.children() {
                pending.extend(
                    children
                        .iter()
                        .rev()
                        .map(|(name, child)| (current_path.join(name), *child)),
                );
            }
            entries.push((current_path, node.info(false)));
        }
        Ok(entries)
    }

    /// Checks the tree invariants and that every cached path still points at
    /// the node living at that path.
    pub fn verify(&self) -> TreeResult<()> {
        let tree = self.tree()?;
        tree.verify()?;

        let cache = self.cache();
        for (key, id) in cache.iter() {
            let actual = tree.path_of(id);
            if actual.as_ref() != Some(key) {
                return CorruptedSnafu {
                    detail: format!("cache maps {key} to {id}, which lives at {actual:?}"),
                }
                .fail();
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> TreeResult<EngineStats> {
        let nodes = self.tree()?.len();
        let cache = self.cache();

        Ok(EngineStats {
            cache: cache.counters(),
            cached_paths: cache.len(),
            resolver_walks: self.resolver_walks.load(Ordering::Relaxed),
            resolver_steps: self.resolver_steps.load(Ordering::Relaxed),
            nodes,
        })
    }

    /// Seeds the cache with up to `capacity` paths in pre-order.
    pub(crate) fn warm_cache(&self) -> TreeResult<usize> {
        let capacity = self.config.cache_capacity.get();
        let entries = self.walk("/")?;
        let mut cache = self.cache();
        let mut warmed = 0;
        for (path, info) in entries.into_iter().take(capacity) {
            cache.put(&path, info.id);
            warmed += 1;
        }
        Ok(warmed)
    }
}
