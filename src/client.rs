//! Clients for the line and RPC protocols over TCP.

use crate::error::ProtocolError;
use crate::protocols::rpc::parser::{self, ErrorBody, RpcRequest};
use crate::protocols::rpc::Operands;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Server closed the connection before replying.
    #[error("connection closed by server")]
    Closed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// Reply did not match the request.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Call reached the server and failed there.
    #[error("server returned {0}")]
    Remote(ErrorBody),
}

/// Newline-delimited text client.
pub struct LineClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl LineClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(LineClient {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Send one line; a trailing newline is added if missing.
    pub async fn send_line(&mut self, line: &str) -> Result<(), ClientError> {
        self.writer.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            self.writer.write_all(b"\n").await?;
        }
        Ok(())
    }

    /// Next line including its newline, or `None` at end of stream.
    pub async fn read_line(&mut self) -> Result<Option<String>, ClientError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        Ok((n > 0).then_some(line))
    }

    /// Send a line and wait for the reply line.
    pub async fn request(&mut self, line: &str) -> Result<String, ClientError> {
        self.send_line(line).await?;
        self.read_line().await?.ok_or(ClientError::Closed)
    }
}

/// Client for the arithmetic RPC service.
pub struct RpcClient {
    conn: LineClient,
    next_id: u64,
}

impl RpcClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        Ok(RpcClient {
            conn: LineClient::connect(addr).await?,
            next_id: 1,
        })
    }

    /// Invoke `method` with raw JSON params.
    pub async fn call(
        &mut self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<i64, ClientError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = RpcRequest {
            id: Some(id),
            method: method.to_string(),
            params,
        };
        let line = parser::encode_request(&request)?;
        self.conn.writer.write_all(&line).await?;

        let reply = self.conn.read_line().await?.ok_or(ClientError::Closed)?;
        let response = parser::decode_response(reply.as_bytes())?;
        if response.id != Some(id) {
            return Err(ClientError::UnexpectedResponse(format!(
                "expected id {id}, got {:?}",
                response.id
            )));
        }
        response.into_result().map_err(ClientError::Remote)
    }

    pub async fn add(&mut self, operands: Operands) -> Result<i64, ClientError> {
        self.call("Add", serde_json::to_value(operands)?).await
    }

    pub async fn subtract(&mut self, operands: Operands) -> Result<i64, ClientError> {
        self.call("Subtract", serde_json::to_value(operands)?).await
    }
}
