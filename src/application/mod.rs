mod application;
mod runtime_config;

pub mod data;

pub use application::{Application, ApplicationError};
pub use runtime_config::RuntimeConfig;
