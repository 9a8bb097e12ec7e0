use std::time::SystemTime;

use bincode::{Decode, Encode};
use snafu::{ResultExt, Snafu};
use tracing::{debug, info};

use crate::filesystem::config::EngineConfig;
use crate::filesystem::engine::TreeEngine;
use crate::filesystem::error::{CorruptedSnafu, TreeResult};
use crate::filesystem::node::{Node, NodeBody, NodeId};
use crate::filesystem::path::TreePath;
use crate::filesystem::tree::Tree;

const COMPRESSION_LEVEL: i32 = 3;

/// Self-contained copy of a whole tree. Handles are not part of it, a restored
/// tree hands out fresh ones.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Snapshot {
    pub root: SnapshotNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct SnapshotNode {
    pub name: String,
    pub created_at: SystemTime,
    pub modified_at: SystemTime,
    pub body: SnapshotBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum SnapshotBody {
    Directory(Vec<SnapshotNode>),
    File(Vec<u8>),
}

#[derive(Debug, Snafu)]
pub enum SnapshotError {
    #[snafu(display("Failed to encode snapshot"))]
    Encode { source: bincode::error::EncodeError },
    #[snafu(display("Failed to decode snapshot"))]
    Decode { source: bincode::error::DecodeError },
    #[snafu(display("Failed to compress snapshot"))]
    Compress { source: std::io::Error },
    #[snafu(display("Failed to decompress snapshot"))]
    Decompress { source: std::io::Error },
}

impl Snapshot {
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![&self.root];
        while let Some(node) = pending.pop() {
            count += 1;
            if let SnapshotBody::Directory(children) = &node.body {
                pending.extend(children);
            }
        }
        count
    }

    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        let bytes = bincode::encode_to_vec(self, bincode::config::standard()).context(EncodeSnafu)?;
        zstd::encode_all(&bytes[..], COMPRESSION_LEVEL).context(CompressSnafu)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let bytes = zstd::decode_all(bytes).context(DecompressSnafu)?;
        let (snapshot, _) =
            bincode::decode_from_slice(&bytes, bincode::config::standard()).context(DecodeSnafu)?;
        Ok(snapshot)
    }
}

impl TreeEngine {
    /// Captures the whole tree under a read lock.
    pub fn snapshot(&self) -> TreeResult<Snapshot> {
        let tree = self.tree()?;
        let root = capture(&tree, tree.root())?;
        Ok(Snapshot { root })
    }

    /// Builds a new engine holding the tree described by `snapshot`.
    ///
    /// Every name is validated and siblings must be unique. The path cache is
    /// seeded with the restored paths up to its capacity.
    pub fn restore(snapshot: &Snapshot, config: EngineConfig) -> TreeResult<Self> {
        let root = &snapshot.root;
        let SnapshotBody::Directory(children) = &root.body else {
            return CorruptedSnafu {
                detail: "snapshot root is not a directory",
            }
            .fail();
        };
        if !root.name.is_empty() {
            return CorruptedSnafu {
                detail: format!("snapshot root is named '{}'", root.name),
            }
            .fail();
        }

        let mut tree = Tree::with_root_times(root.created_at, root.modified_at);
        let mut pending = children
            .iter()
            .map(|child| (tree.root(), TreePath::root(), child))
            .collect::<Vec<_>>();

        while let Some((parent, parent_path, node)) = pending.pop() {
            let path = parent_path.join(&node.name);
            let body = match &node.body {
                SnapshotBody::Directory(_) => NodeBody::directory(),
                SnapshotBody::File(payload) => NodeBody::file(payload.clone()),
            };
            let id = tree.attach_new(parent, &node.name, body, &path)?;
            if let Some(restored) = tree.get_mut(id) {
                restored.set_times(node.created_at, node.modified_at);
            }
            if let SnapshotBody::Directory(children) = &node.body {
                pending.extend(children.iter().map(|child| (id, path.clone(), child)));
            }
        }
        tree.verify()?;

        let engine = TreeEngine::from_tree(tree, config);
        let warmed = engine.warm_cache()?;
        info!(
            "Restored {} nodes, {} paths cached",
            snapshot.node_count(),
            warmed
        );
        Ok(engine)
    }
}

fn lookup(tree: &Tree, id: NodeId) -> TreeResult<&Node> {
    tree.get(id).ok_or_else(|| {
        CorruptedSnafu {
            detail: format!("dangling handle {id}"),
        }
        .build()
    })
}

fn capture(tree: &Tree, root: NodeId) -> TreeResult<SnapshotNode> {
    // Pre-order listing with the index of each node's parent entry.
    let mut order: Vec<(NodeId, Option<usize>)> = Vec::new();
    let mut pending = vec![(root, None)];
    while let Some((id, parent)) = pending.pop() {
        let index = order.len();
        order.push((id, parent));
        if let Some(children) = lookup(tree, id)?.children() {
            pending.extend(children.values().rev().map(|child| (*child, Some(index))));
        }
    }

    // Children sit after their parent, so walking backwards finishes every
    // child before the directory holding it.
    let mut finished: Vec<Vec<SnapshotNode>> = order.iter().map(|_| Vec::new()).collect();
    let mut captured = None;
    for (index, (id, parent)) in order.iter().enumerate().rev() {
        let node = lookup(tree, *id)?;
        let body = match node.body() {
            NodeBody::File { payload, .. } => SnapshotBody::File(payload.clone()),
            NodeBody::Directory { .. } => {
                let mut children = std::mem::take(&mut finished[index]);
                children.reverse();
                SnapshotBody::Directory(children)
            }
        };
        debug!("Captured {}", id);

        let snapshot_node = SnapshotNode {
            name: node.name().to_string(),
            created_at: node.created_at(),
            modified_at: node.modified_at(),
            body,
        };
        match parent {
            Some(parent) => finished[*parent].push(snapshot_node),
            None => captured = Some(snapshot_node),
        }
    }

    captured.ok_or_else(|| {
        CorruptedSnafu {
            detail: format!("root {root} was not captured"),
        }
        .build()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::error::TreeError;
    use std::num::NonZeroUsize;

    fn populated() -> TreeEngine {
        let engine = TreeEngine::default();
        for dir in ["/home", "/home/work", "/home/docs", "/etc"] {
            engine.create_dir(dir).expect("mkdir");
        }
        engine
            .create_file("/home/work/sample.txt", "sample")
            .expect("create");
        engine.create_file("/etc/hosts", vec![0u8, 1, 2]).expect("create");
        engine
    }

    fn leaf(name: &str, body: SnapshotBody) -> SnapshotNode {
        SnapshotNode {
            name: name.to_string(),
            created_at: SystemTime::UNIX_EPOCH,
            modified_at: SystemTime::UNIX_EPOCH,
            body,
        }
    }

    #[test]
    fn snapshot_survives_encode_decode_restore() {
        let engine = populated();
        let snapshot = engine.snapshot().expect("snapshot");
        assert_eq!(snapshot.node_count(), 7);

        let bytes = snapshot.encode().expect("encode");
        let decoded = Snapshot::decode(&bytes).expect("decode");
        assert_eq!(decoded, snapshot);

        let restored = TreeEngine::restore(&decoded, EngineConfig::default()).expect("restore");
        assert!(restored.verify().is_ok());
        assert_eq!(restored.stats().expect("stats").nodes, 7);

        let original = engine.walk("/").expect("walk");
        let copy = restored.walk("/").expect("walk");
        let shape = |entries: &[(TreePath, crate::filesystem::node::NodeInfo)]| {
            entries
                .iter()
                .map(|(path, info)| (path.to_string(), info.kind, info.size, info.modified_at))
                .collect::<Vec<_>>()
        };
        assert_eq!(shape(&original), shape(&copy));
        assert_eq!(
            restored
                .read("/etc/hosts")
                .expect("read restored file")
                .payload,
            Some(vec![0u8, 1, 2])
        );
    }

    #[test]
    fn capture_keeps_children_in_name_order() {
        let snapshot = populated().snapshot().expect("snapshot");
        let SnapshotBody::Directory(top) = &snapshot.root.body else {
            panic!("root should be a directory");
        };
        let names = top.iter().map(|node| node.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["etc", "home"]);

        let SnapshotBody::Directory(home) = &top[1].body else {
            panic!("/home should be a directory");
        };
        let names = home.iter().map(|node| node.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["docs", "work"]);
    }

    #[test]
    fn deep_chain_is_captured_without_recursion() {
        let engine = TreeEngine::default();
        let mut path = String::new();
        for level in 0..1000 {
            path.push_str(&format!("/d{level}"));
            engine.create_dir(&path).expect("mkdir");
        }

        let snapshot = engine.snapshot().expect("snapshot");
        assert_eq!(snapshot.node_count(), 1001);

        let mut deepest = &snapshot.root;
        while let SnapshotBody::Directory(children) = &deepest.body {
            match children.first() {
                Some(child) => deepest = child,
                None => break,
            }
        }
        assert_eq!(deepest.name, "d999");
    }

    #[test]
    fn restore_prewarms_cache_up_to_capacity() {
        let snapshot = populated().snapshot().expect("snapshot");
        let config = EngineConfig::default()
            .with_cache_capacity(NonZeroUsize::new(3).expect("non-zero"));
        let restored = TreeEngine::restore(&snapshot, config).expect("restore");

        let stats = restored.stats().expect("stats");
        assert_eq!(stats.cached_paths, 3);
        assert!(restored.verify().is_ok());
    }

    #[test]
    fn restore_rejects_duplicate_siblings() {
        let snapshot = Snapshot {
            root: leaf(
                "",
                SnapshotBody::Directory(vec![
                    leaf("twin", SnapshotBody::File(Vec::new())),
                    leaf("twin", SnapshotBody::Directory(Vec::new())),
                ]),
            ),
        };
        assert!(matches!(
            TreeEngine::restore(&snapshot, EngineConfig::default()),
            Err(TreeError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn restore_rejects_invalid_names() {
        let snapshot = Snapshot {
            root: leaf(
                "",
                SnapshotBody::Directory(vec![leaf("..", SnapshotBody::File(Vec::new()))]),
            ),
        };
        assert!(matches!(
            TreeEngine::restore(&snapshot, EngineConfig::default()),
            Err(TreeError::InvalidName { .. })
        ));
    }

    #[test]
    fn restore_rejects_file_root() {
        let snapshot = Snapshot {
            root: leaf("", SnapshotBody::File(b"x".to_vec())),
        };
        assert!(matches!(
            TreeEngine::restore(&snapshot, EngineConfig::default()),
            Err(TreeError::Corrupted { .. })
        ));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(
            Snapshot::decode(b"definitely not zstd"),
            Err(SnapshotError::Decompress { .. })
        ));
    }
}
