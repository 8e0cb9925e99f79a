//! Transport-independent request handling.
//!
//! A [`Service`] maps one request frame to one [`Reply`]. Handlers are
//! synchronous and never touch the connection, so the session decides when to
//! read and write.

use crate::config::ServiceType;
use crate::protocols::echo::EchoHandler;
use crate::protocols::rpc::RpcHandler;
use bytes::Bytes;

/// Handler output: bytes to write and whether the session ends afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub payload: Bytes,
    pub close: bool,
}

impl Reply {
    /// Reply and keep reading.
    pub fn keep(payload: Bytes) -> Self {
        Reply {
            payload,
            close: false,
        }
    }

    /// Reply, then close the session.
    pub fn close(payload: Bytes) -> Self {
        Reply {
            payload,
            close: true,
        }
    }
}

/// The handler variant a server runs.
#[derive(Debug, Clone)]
pub enum Service {
    Echo(EchoHandler),
    Rpc(RpcHandler),
}

impl Service {
    /// Build the handler for `kind`. `stop_word` applies to echo only.
    pub fn from_config(kind: ServiceType, stop_word: Option<String>) -> Self {
        match kind {
            ServiceType::Echo => Service::Echo(EchoHandler::new(stop_word)),
            ServiceType::Rpc => Service::Rpc(RpcHandler::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Service::Echo(_) => "echo",
            Service::Rpc(_) => "rpc",
        }
    }

    pub fn handle(&self, request: &Bytes) -> Reply {
        match self {
            Service::Echo(handler) => handler.handle(request),
            Service::Rpc(handler) => handler.handle(request),
        }
    }
}
