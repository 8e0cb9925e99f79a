//! RPC protocol implementation.
//!
//! Method invocation by name over newline-delimited JSON (stream) or one
//! JSON object per datagram:
//!
//! ```text
//! Request:  {"id":1,"method":"Add","params":[17,18,true,false]}\n
//! Response: {"id":1,"value":1,"error":null}\n
//!
//! Request:  {"id":2,"method":"Multiply","params":[1,2,false,false]}\n
//! Response: {"id":2,"value":0,"error":{"kind":"UnknownMethod","message":"unknown method: Multiply"}}\n
//! ```
//!
//! `params` is the positional record `[a, b, sign_a, sign_b]`, or the same
//! fields as an object. A set sign flag negates that operand before the
//! procedure combines them.
//!
//! Errors never close the session: unknown methods, bad arguments and
//! malformed JSON all come back as a response with `error` set.

pub mod handler;
pub mod parser;
pub mod procedures;

pub use handler::RpcHandler;
pub use parser::{ErrorBody, ErrorKind, RpcRequest, RpcResponse};
pub use procedures::{Operands, Procedure, ProcedureTable};
