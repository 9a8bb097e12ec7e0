use std::fmt;

use colored::{ColoredString, Colorize};
use derive_more::Display;

use crate::filesystem::{NodeInfo, NodeKind, TreeError};

/// Stable outcome classes. Every [`TreeError`] variant maps to its own status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Status {
    #[display("OK")]
    Ok,
    #[display("CREATED")]
    Created,
    #[display("DELETED")]
    Deleted,
    #[display("INVALID_NAME")]
    InvalidName,
    #[display("ROOT_NOT_ALLOWED")]
    RootNotAllowed,
    #[display("NOT_FOUND")]
    NotFound,
    #[display("IS_A_DIRECTORY")]
    IsADirectory,
    #[display("ALREADY_EXISTS")]
    AlreadyExists,
    #[display("DIRECTORY_NOT_EMPTY")]
    DirectoryNotEmpty,
    #[display("NOT_A_DIRECTORY")]
    NotADirectory,
    #[display("PARENT_NOT_FOUND")]
    ParentNotFound,
    #[display("INTERNAL")]
    Internal,
    #[display("BUSY")]
    Busy,
    #[display("CYCLIC_MOVE")]
    CyclicMove,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::Deleted => 204,
            Status::InvalidName => 400,
            Status::RootNotAllowed => 403,
            Status::NotFound => 404,
            Status::IsADirectory => 405,
            Status::AlreadyExists => 409,
            Status::DirectoryNotEmpty => 412,
            Status::NotADirectory => 422,
            Status::ParentNotFound => 424,
            Status::Internal => 500,
            Status::Busy => 503,
            Status::CyclicMove => 508,
        }
    }

    pub fn is_success(self) -> bool {
        self.code() < 300
    }

    fn paint(self, text: &str) -> ColoredString {
        if self.is_success() {
            text.green()
        } else if self.code() >= 500 {
            text.red().bold()
        } else {
            text.yellow()
        }
    }
}

impl From<&TreeError> for Status {
    fn from(error: &TreeError) -> Self {
        match error {
            TreeError::NotFound { .. } => Status::NotFound,
            TreeError::AlreadyExists { .. } => Status::AlreadyExists,
            TreeError::NotADirectory { .. } => Status::NotADirectory,
            TreeError::IsADirectory { .. } => Status::IsADirectory,
            TreeError::DirectoryNotEmpty { .. } => Status::DirectoryNotEmpty,
            TreeError::ParentNotFound { .. } => Status::ParentNotFound,
            TreeError::CyclicMove { .. } => Status::CyclicMove,
            TreeError::InvalidName { .. } => Status::InvalidName,
            TreeError::Busy { .. } => Status::Busy,
            TreeError::RootNotAllowed { .. } => Status::RootNotAllowed,
            TreeError::Corrupted { .. } => Status::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Node(NodeInfo),
    Listing(Vec<NodeInfo>),
    Tree(Vec<(String, NodeInfo)>),
    Deleted { removed: usize },
    Snapshot { nodes: usize, encoded_bytes: usize },
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub body: Body,
}

impl Response {
    pub fn new(status: Status, body: Body) -> Self {
        Self { status, body }
    }

    pub fn error(error: &TreeError) -> Self {
        Self::new(Status::from(error), Body::Error(error.to_string()))
    }

    /// The response as one terminal line, colored by status class.
    pub fn to_colored_line(&self) -> String {
        let status = self
            .status
            .paint(&format!("{} {}", self.status.code(), self.status));
        format!("{status} {}", self.body)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.status.code(), self.status, self.body)
    }
}

fn describe(info: &NodeInfo) -> String {
    match info.kind {
        NodeKind::Directory => format!("{}/ ({} entries)", info.name, info.size),
        NodeKind::File => format!("{} ({} bytes)", info.name, info.size),
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Node(info) => {
                write!(f, "{} {}", info.kind, describe(info))?;
                if let Some(payload) = &info.payload {
                    write!(f, " {:?}", String::from_utf8_lossy(payload))?;
                }
                Ok(())
            }
            Body::Listing(entries) => {
                let names = entries.iter().map(describe).collect::<Vec<_>>();
                write!(f, "[{}]", names.join(", "))
            }
            Body::Tree(entries) => {
                let paths = entries
                    .iter()
                    .map(|(path, _)| path.as_str())
                    .collect::<Vec<_>>();
                write!(f, "{}", paths.join(" "))
            }
            Body::Deleted { removed } => write!(f, "{removed} nodes removed"),
            Body::Snapshot {
                nodes,
                encoded_bytes,
            } => write!(f, "{nodes} nodes in {encoded_bytes} bytes"),
            Body::Error(message) => write!(f, "{message}"),
        }
    }
}
