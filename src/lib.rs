//! lineserve: a concurrent request/response server.
//!
//! One task per connection, a bounded session count, and coordinated
//! shutdown that lets in-flight exchanges finish before draining.
//!
//! Components, in dependency order:
//! - [`listener`]: binds a TCP or UDP endpoint
//! - [`dispatch`]: spawns one session per connection (or per UDP peer)
//! - [`session`]: the read/process/write loop for one connection
//! - [`service`]: transport-independent handlers (echo, RPC)
//! - [`registry`]: live-session tracking and shutdown draining

pub mod client;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod observe;
pub mod protocols;
pub mod registry;
pub mod server;
pub mod service;
pub mod session;

pub use config::{Config, ServiceType};
pub use endpoint::{Endpoint, Transport};
pub use registry::DrainOutcome;
pub use server::Server;
