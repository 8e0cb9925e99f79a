//! Echo protocol handler.

use super::parser::{self, Command};
use crate::service::Reply;
use bytes::Bytes;

/// Default word that ends an echo session.
pub const DEFAULT_STOP_WORD: &str = "STOP";

/// Identity handler: the response is the request.
#[derive(Debug, Clone)]
pub struct EchoHandler {
    stop_word: Option<String>,
}

impl EchoHandler {
    /// `stop_word = None` disables the termination command.
    pub fn new(stop_word: Option<String>) -> Self {
        EchoHandler { stop_word }
    }

    pub fn stop_word(&self) -> Option<&str> {
        self.stop_word.as_deref()
    }

    pub fn handle(&self, request: &Bytes) -> Reply {
        match parser::parse(request, self.stop_word()) {
            Command::Echo => Reply::keep(request.clone()),
            Command::Stop => Reply::close(request.clone()),
        }
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new(Some(DEFAULT_STOP_WORD.to_string()))
    }
}
