use std::collections::BTreeMap;
use std::hash::Hasher;
use std::time::SystemTime;

use derive_more::Display;
use metrohash::MetroHash64;
use snafu::Snafu;

use crate::filesystem::error::{InvalidNameSnafu, TreeResult};
use crate::filesystem::path::SEPARATOR;

/// Handle of a node inside one tree. Handles are never reused, so a stale one
/// can only miss, never alias another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("#{_0}")]
pub struct NodeId(u64);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum NodeKind {
    #[display("directory")]
    Directory,
    #[display("file")]
    File,
}

/// Kind-specific contents. A file can never hold children and a directory can
/// never hold a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeBody {
    Directory { children: BTreeMap<String, NodeId> },
    File { payload: Vec<u8>, digest: u64 },
}

impl NodeBody {
    pub fn directory() -> Self {
        NodeBody::Directory {
            children: BTreeMap::new(),
        }
    }

    pub fn file(payload: Vec<u8>) -> Self {
        let digest = content_digest(&payload);
        NodeBody::File { payload, digest }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeBody::Directory { .. } => NodeKind::Directory,
            NodeBody::File { .. } => NodeKind::File,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    name: String,
    parent: Option<NodeId>,
    body: NodeBody,
    created_at: SystemTime,
    modified_at: SystemTime,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: String, parent: Option<NodeId>, body: NodeBody) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            name,
            parent,
            body,
            created_at: now,
            modified_at: now,
        }
    }

    pub(crate) fn root() -> Self {
        Self::new(NodeId::ROOT, String::new(), None, NodeBody::directory())
    }

    pub(crate) fn with_times(mut self, created_at: SystemTime, modified_at: SystemTime) -> Self {
        self.set_times(created_at, modified_at);
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn body(&self) -> &NodeBody {
        &self.body
    }

    pub fn kind(&self) -> NodeKind {
        self.body.kind()
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn modified_at(&self) -> SystemTime {
        self.modified_at
    }

    pub fn children(&self) -> Option<&BTreeMap<String, NodeId>> {
        match &self.body {
            NodeBody::Directory { children } => Some(children),
            NodeBody::File { .. } => None,
        }
    }

    pub fn payload(&self) -> Option<&[u8]> {
        match &self.body {
            NodeBody::File { payload, .. } => Some(payload),
            NodeBody::Directory { .. } => None,
        }
    }

    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.children().and_then(|children| children.get(name).copied())
    }

    pub(crate) fn touch(&mut self, now: SystemTime) {
        self.modified_at = now;
    }

    pub(crate) fn set_times(&mut self, created_at: SystemTime, modified_at: SystemTime) {
        self.created_at = created_at;
        self.modified_at = modified_at;
    }

    pub(crate) fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    /// Replaces a file's payload. Returns `false` for directories.
    pub(crate) fn set_payload(&mut self, new_payload: Vec<u8>) -> bool {
        match &mut self.body {
            NodeBody::File { payload, digest } => {
                *digest = content_digest(&new_payload);
                *payload = new_payload;
                true
            }
            NodeBody::Directory { .. } => false,
        }
    }

    pub(crate) fn attach_child(&mut self, name: String, child: NodeId) -> Result<(), AttachError> {
        let NodeBody::Directory { children } = &mut self.body else {
            return Err(AttachError::NotADirectory);
        };
        if children.contains_key(&name) {
            return Err(AttachError::DuplicateChild { name });
        }
        children.insert(name, child);
        Ok(())
    }

    pub(crate) fn detach_child(&mut self, name: &str) -> Option<NodeId> {
        match &mut self.body {
            NodeBody::Directory { children } => children.remove(name),
            NodeBody::File { .. } => None,
        }
    }

    pub fn info(&self, with_payload: bool) -> NodeInfo {
        let (size, digest, payload) = match &self.body {
            NodeBody::Directory { children } => (children.len() as u64, None, None),
            NodeBody::File { payload, digest } => (
                payload.len() as u64,
                Some(*digest),
                with_payload.then(|| payload.clone()),
            ),
        };

        NodeInfo {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind(),
            size,
            digest,
            payload,
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}

#[derive(Debug, Snafu)]
pub(crate) enum AttachError {
    #[snafu(display("'{name}' is already taken in this directory"))]
    DuplicateChild { name: String },
    #[snafu(display("Cannot attach children to a file"))]
    NotADirectory,
}

/// Detached, owned view of a node handed out across the engine boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    /// Payload length for files, child count for directories.
    pub size: u64,
    /// Content reference for files.
    pub digest: Option<u64>,
    /// Only filled in by operations that return file contents.
    pub payload: Option<Vec<u8>>,
    pub created_at: SystemTime,
    pub modified_at: SystemTime,
}

pub fn content_digest(payload: &[u8]) -> u64 {
    let mut hasher = MetroHash64::default();
    hasher.write(payload);
    hasher.finish()
}

pub fn validate_name(name: &str) -> TreeResult<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.contains(SEPARATOR) {
        "name contains the path separator"
    } else if name.contains('\0') {
        "name contains a NUL byte"
    } else if name == "." || name == ".." {
        "relative path markers are not supported"
    } else {
        return Ok(());
    };

    InvalidNameSnafu { name, reason }.fail()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::error::TreeError;
    use rstest::rstest;

    #[rstest]
    #[case("readme")]
    #[case("notes.txt")]
    #[case(".hidden")]
    #[case("...")]
    #[case("тест")]
    fn accepts_plain_names(#[case] name: &str) {
        assert!(validate_name(name).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("a/b")]
    #[case(".")]
    #[case("..")]
    #[case("nul\0byte")]
    fn rejects_bad_names(#[case] name: &str) {
        assert!(matches!(
            validate_name(name),
            Err(TreeError::InvalidName { .. })
        ));
    }

    #[test]
    fn attach_rejects_duplicate_sibling() {
        let mut dir = Node::new(NodeId::new(1), "d".into(), None, NodeBody::directory());
        assert!(dir.attach_child("x".into(), NodeId::new(2)).is_ok());
        assert!(matches!(
            dir.attach_child("x".into(), NodeId::new(3)),
            Err(AttachError::DuplicateChild { .. })
        ));
        assert_eq!(dir.child("x"), Some(NodeId::new(2)));
    }

    #[test]
    fn files_refuse_children() {
        let mut file = Node::new(NodeId::new(1), "f".into(), None, NodeBody::file(vec![]));
        assert!(matches!(
            file.attach_child("x".into(), NodeId::new(2)),
            Err(AttachError::NotADirectory)
        ));
        assert_eq!(file.detach_child("x"), None);
        assert!(file.children().is_none());
    }

    #[test]
    fn detach_returns_the_child_handle() {
        let mut dir = Node::new(NodeId::new(1), "d".into(), None, NodeBody::directory());
        dir.attach_child("x".into(), NodeId::new(7))
            .expect("attach should succeed");
        assert_eq!(dir.detach_child("x"), Some(NodeId::new(7)));
        assert_eq!(dir.detach_child("x"), None);
    }

    #[test]
    fn set_payload_refreshes_digest() {
        let mut file = Node::new(NodeId::new(1), "f".into(), None, NodeBody::file(b"a".to_vec()));
        let before = file.info(false).digest;
        assert!(file.set_payload(b"b".to_vec()));
        let after = file.info(true);
        assert_ne!(before, after.digest);
        assert_eq!(after.payload.as_deref(), Some(&b"b"[..]));
        assert_eq!(after.size, 1);
    }

    #[test]
    fn directories_have_no_payload() {
        let mut dir = Node::root();
        assert!(!dir.set_payload(b"x".to_vec()));
        let info = dir.info(true);
        assert_eq!(info.kind, NodeKind::Directory);
        assert_eq!(info.payload, None);
        assert_eq!(info.digest, None);
    }

    #[test]
    fn digest_is_stable_for_equal_content() {
        assert_eq!(content_digest(b"hello"), content_digest(b"hello"));
        assert_ne!(content_digest(b"hello"), content_digest(b"world"));
    }
}
