pub mod auth;
pub mod config;
pub mod error;
pub mod exec;
pub mod host;
pub mod lifecycle;
pub mod logging;
pub mod paths;
pub mod profile;
pub mod provision;
pub mod service;
pub mod site;
pub mod store;
pub mod vault;
pub mod webserver;

pub use error::{Error, ErrorCode, ErrorKind, Result};
