//! RPC protocol handler.

use super::parser::{self, RpcResponse};
use super::procedures::ProcedureTable;
use crate::service::Reply;
use bytes::Bytes;
use tracing::{error, warn};

/// Sent if a response cannot be serialized.
const ENCODE_FAILURE: &[u8] =
    b"{\"id\":null,\"value\":0,\"error\":{\"kind\":\"ProtocolError\",\"message\":\"failed to encode response\"}}\n";

/// Looks up the requested procedure and invokes it.
#[derive(Debug, Clone)]
pub struct RpcHandler {
    table: ProcedureTable,
}

impl RpcHandler {
    pub fn new(table: ProcedureTable) -> Self {
        RpcHandler { table }
    }

    pub fn handle(&self, request: &Bytes) -> Reply {
        let response = self.respond(request);
        let payload = parser::encode_response(&response).unwrap_or_else(|e| {
            error!(error = %e, "Failed to encode RPC response");
            Bytes::from_static(ENCODE_FAILURE)
        });
        Reply::keep(payload)
    }

    /// Decode, dispatch, and build the response for one frame.
    pub fn respond(&self, frame: &[u8]) -> RpcResponse {
        let request = match parser::decode_request(frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Malformed RPC request");
                return RpcResponse::from_protocol_error(&e);
            }
        };

        let result = self
            .table
            .lookup(&request.method)
            .and_then(|procedure| procedure.call(request.params));

        match result {
            Ok(value) => RpcResponse::success(request.id, value),
            Err(e) => {
                warn!(method = %request.method, error = %e, "RPC call failed");
                RpcResponse::from_handler_error(request.id, &e)
            }
        }
    }
}

impl Default for RpcHandler {
    fn default() -> Self {
        Self::new(ProcedureTable::arithmetic())
    }
}
