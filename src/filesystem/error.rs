use snafu::Snafu;

/// Every failure the tree engine can report. All of them are recoverable by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TreeError {
    #[snafu(display("No such file or directory: {path}"))]
    NotFound { path: String },
    #[snafu(display("Entry already exists: {path}"))]
    AlreadyExists { path: String },
    #[snafu(display("Not a directory: {path}"))]
    NotADirectory { path: String },
    #[snafu(display("Is a directory: {path}"))]
    IsADirectory { path: String },
    #[snafu(display("Directory not empty: {path}"))]
    DirectoryNotEmpty { path: String },
    #[snafu(display("Parent directory does not exist: {path}"))]
    ParentNotFound { path: String },
    #[snafu(display("Cannot move {from} into its own subtree at {to}"))]
    CyclicMove { from: String, to: String },
    #[snafu(display("Invalid name '{name}': {reason}"))]
    InvalidName { name: String, reason: &'static str },
    #[snafu(display("Tree is busy, gave up after {waited_ms}ms"))]
    Busy { waited_ms: u128 },
    #[snafu(display("Operation '{operation}' is not allowed on the root directory"))]
    RootNotAllowed { operation: &'static str },
    #[snafu(display("Tree invariant violated: {detail}"))]
    Corrupted { detail: String },
}

pub type TreeResult<T> = Result<T, TreeError>;
