#![forbid(unsafe_code)]

//! Serve git repositories over HTTP.
//!
//! Smart-protocol requests are bridged to `git upload-pack` and
//! `git receive-pack` running in stateless-RPC mode; dumb-protocol
//! requests are answered from the repository's files. Repositories live
//! under one project root and can be created on first use.

pub mod access;
pub mod config;
pub mod errors;
pub mod events;
pub mod files;
pub mod pktline;
pub mod repo;
pub mod routing;
pub mod rpc;
pub mod scan;
pub mod server;
pub mod tool;

pub use config::ServerConfig;
pub use errors::{AppError, Result};
pub use server::GitHttp;
