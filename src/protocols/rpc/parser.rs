//! RPC wire format.

use crate::error::{HandlerError, ProtocolError};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A decoded call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id, echoed back in the response.
    #[serde(default)]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Error category carried in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownMethod,
    BadArgument,
    ProtocolError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Return value plus optional error. `value` is 0 when `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: Option<u64>,
    pub value: i64,
    pub error: Option<ErrorBody>,
}

impl RpcResponse {
    pub fn success(id: Option<u64>, value: i64) -> Self {
        RpcResponse {
            id,
            value,
            error: None,
        }
    }

    pub fn failure(id: Option<u64>, kind: ErrorKind, message: impl Into<String>) -> Self {
        RpcResponse {
            id,
            value: 0,
            error: Some(ErrorBody {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn from_handler_error(id: Option<u64>, err: &HandlerError) -> Self {
        let kind = match err {
            HandlerError::UnknownMethod(_) => ErrorKind::UnknownMethod,
            HandlerError::BadArgument(_) => ErrorKind::BadArgument,
        };
        Self::failure(id, kind, err.to_string())
    }

    pub fn from_protocol_error(err: &ProtocolError) -> Self {
        Self::failure(None, ErrorKind::ProtocolError, err.to_string())
    }

    /// Convert back into a result on the client side.
    pub fn into_result(self) -> Result<i64, ErrorBody> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.value),
        }
    }
}

/// Decode one request frame (trailing line ending allowed).
pub fn decode_request(frame: &[u8]) -> Result<RpcRequest, ProtocolError> {
    let text = trim_ascii(frame);
    if text.is_empty() {
        return Err(ProtocolError::MalformedRequest("empty request".to_string()));
    }
    serde_json::from_slice(text).map_err(|e| ProtocolError::MalformedRequest(e.to_string()))
}

/// Encode a request as one newline-terminated line.
pub fn encode_request(request: &RpcRequest) -> Result<Bytes, serde_json::Error> {
    encode_line(request)
}

/// Decode one response frame.
pub fn decode_response(frame: &[u8]) -> Result<RpcResponse, ProtocolError> {
    serde_json::from_slice(trim_ascii(frame))
        .map_err(|e| ProtocolError::MalformedRequest(e.to_string()))
}

/// Encode a response as one newline-terminated line.
pub fn encode_response(response: &RpcResponse) -> Result<Bytes, serde_json::Error> {
    encode_line(response)
}

fn encode_line<T: Serialize>(value: &T) -> Result<Bytes, serde_json::Error> {
    let mut out = BytesMut::with_capacity(64).writer();
    serde_json::to_writer(&mut out, value)?;
    let mut out = out.into_inner();
    out.put_u8(b'\n');
    Ok(out.freeze())
}

fn trim_ascii(frame: &[u8]) -> &[u8] {
    let start = frame
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(frame.len());
    let end = frame
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &frame[start..end]
}
