//! Root-to-leaf path resolution.
//!
//! The resolver never fails with an error: it reports a typed [`Resolution`]
//! and leaves it to the engine to decide what a missing segment means for the
//! operation at hand.

use crate::filesystem::node::{NodeBody, NodeId};
use crate::filesystem::path::TreePath;
use crate::filesystem::tree::Tree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Found(NodeId),
    /// Segment `segment` has no entry in `deepest`, the last directory reached.
    Missing { segment: usize, deepest: NodeId },
    /// Segments remain but `at`, reached through `segment - 1`, is a file.
    NotADirectory { segment: usize, at: NodeId },
}

/// Outcome of one walk together with the number of nodes it visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Walk {
    pub resolution: Resolution,
    pub visited: usize,
}

pub struct PathResolver<'t> {
    tree: &'t Tree,
}

impl<'t> PathResolver<'t> {
    pub fn new(tree: &'t Tree) -> Self {
        Self { tree }
    }

    pub fn resolve(&self, path: &TreePath) -> Walk {
        self.resolve_from(self.tree.root(), 0, path)
    }

    /// Continues a walk from `start`, which must be the node at the first
    /// `skip` segments of `path`.
    pub fn resolve_from(&self, start: NodeId, skip: usize, path: &TreePath) -> Walk {
        let mut current = start;
        let mut visited = 1;

        for (index, segment) in path.segments().iter().enumerate().skip(skip) {
            let Some(node) = self.tree.get(current) else {
                // A handle that vanished under us means the prefix is gone as well.
                return Walk {
                    resolution: Resolution::Missing {
                        segment: index,
                        deepest: self.tree.root(),
                    },
                    visited,
                };
            };

            let next = match node.body() {
                NodeBody::Directory { children } => children.get(segment).copied(),
                NodeBody::File { .. } => {
                    return Walk {
                        resolution: Resolution::NotADirectory {
                            segment: index,
                            at: current,
                        },
                        visited,
                    };
                }
            };

            match next {
                Some(child) => {
                    current = child;
                    visited += 1;
                }
                None => {
                    return Walk {
                        resolution: Resolution::Missing {
                            segment: index,
                            deepest: current,
                        },
                        visited,
                    };
                }
            }
        }

        Walk {
            resolution: Resolution::Found(current),
            visited,
        }
    }
}
