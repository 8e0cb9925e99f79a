//! Protocol implementations.
//!
//! Each protocol provides a parser and a synchronous handler used by
//! [`crate::service::Service`]:
//! - `echo`: Line echo with an optional termination word
//! - `rpc`: Named-procedure calls over JSON lines

pub mod echo;
pub mod rpc;
