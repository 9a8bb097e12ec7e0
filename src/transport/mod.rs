//! Request/response layer over [`TreeEngine`](crate::filesystem::TreeEngine):
//! script parsing, status mapping and concurrent dispatch.

mod adapter;
mod dispatcher;
mod request;
mod response;
mod script;

pub use adapter::handle;
pub use dispatcher::{DispatchError, DispatcherCreationError, RequestDispatcher};
pub use request::Request;
pub use response::{Body, Response, Status};
pub use script::{EngineOverrides, RequestScript, ScriptError};
