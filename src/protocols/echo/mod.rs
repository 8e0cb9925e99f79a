//! Echo protocol implementation.
//!
//! Every request is written back verbatim:
//! - Stream transport: one newline-terminated line per request, echoed with
//!   its line ending
//! - Datagram transport: one datagram per request, echoed as one datagram
//!
//! ## Termination word
//!
//! When a stop word is configured (`STOP` by default), a request whose
//! whitespace-trimmed text equals it exactly is echoed once and the session
//! then closes. The match is case-sensitive.
//!
//! ```text
//! Request:  hello\n
//! Response: hello\n
//!
//! Request:  STOP\n
//! Response: STOP\n   (connection closed)
//! ```

pub mod handler;
pub mod parser;

pub use handler::EchoHandler;
