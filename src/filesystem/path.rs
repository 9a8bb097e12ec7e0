//! Normalized absolute paths.
//!
//! A [`TreePath`] is the segment form every engine operation works on. Parsing
//! is lenient about separators (missing leading slash, trailing slash, runs of
//! slashes) and strict about segment contents: `.` and `..` are never
//! interpreted and are rejected together with any other invalid name.

use std::fmt;

use crate::filesystem::error::TreeResult;
use crate::filesystem::node::validate_name;

pub const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TreePath {
    segments: Vec<String>,
}

impl TreePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> TreeResult<Self> {
        let segments = raw
            .split(SEPARATOR)
            .filter(|segment| !segment.is_empty())
            .map(|segment| validate_name(segment).map(|()| segment.to_string()))
            .collect::<TreeResult<Vec<_>>>()?;

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<TreePath> {
        let (_, init) = self.segments.split_last()?;
        Some(Self {
            segments: init.to_vec(),
        })
    }

    /// Appends one already-validated segment.
    pub fn join(&self, name: &str) -> TreePath {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    /// Prefix test on whole segments, so `/ab` does not start with `/a`.
    pub fn starts_with(&self, prefix: &TreePath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Prefix of the first `len` segments.
    pub fn prefix(&self, len: usize) -> TreePath {
        Self {
            segments: self.segments[..len.min(self.segments.len())].to_vec(),
        }
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "{SEPARATOR}");
        }
        for segment in &self.segments {
            write!(f, "{SEPARATOR}{segment}")?;
        }
        Ok(())
    }
}
