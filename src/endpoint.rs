//! Listening endpoint: host, port, and transport.

use crate::error::BindError;
use serde::Deserialize;
use std::fmt;

/// Host used when only a port is given.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Ports below this need elevated privileges on most systems.
const FIRST_UNPRIVILEGED_PORT: u16 = 1024;

/// Transport served by a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Connection-oriented byte stream (TCP).
    #[value(name = "tcp")]
    #[serde(alias = "tcp")]
    Stream,
    /// Message-oriented datagrams (UDP).
    #[value(name = "udp")]
    #[serde(alias = "udp")]
    Datagram,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Stream => write!(f, "tcp"),
            Transport::Datagram => write!(f, "udp"),
        }
    }
}

/// A validated address to bind. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    transport: Transport,
}

impl Endpoint {
    /// Parse a bare port (`"8080"`) or `host:port` (`"127.0.0.1:8080"`,
    /// `"[::1]:8080"`). Port 0 is rejected.
    pub fn parse(input: &str, transport: Transport) -> Result<Self, BindError> {
        let input = input.trim();

        let (host, port_str) = match input.rsplit_once(':') {
            Some((host, port)) => (host, port),
            None => (DEFAULT_HOST, input),
        };

        let host = host.trim_start_matches('[').trim_end_matches(']');
        let host = if host.is_empty() { DEFAULT_HOST } else { host };
        if host.chars().any(char::is_whitespace) {
            return Err(BindError::InvalidAddress(input.to_string()));
        }

        let port: u16 = port_str
            .parse()
            .map_err(|_| BindError::InvalidPort(port_str.to_string()))?;
        if port == 0 {
            return Err(BindError::InvalidPort(port_str.to_string()));
        }

        Ok(Endpoint {
            host: host.to_string(),
            port,
            transport,
        })
    }

    /// Loopback endpoint on an OS-assigned port.
    pub fn ephemeral(transport: Transport) -> Self {
        Endpoint {
            host: "127.0.0.1".to_string(),
            port: 0,
            transport,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// True for ports 1-1023.
    pub fn is_privileged(&self) -> bool {
        self.port != 0 && self.port < FIRST_UNPRIVILEGED_PORT
    }

    /// `host:port` suitable for address resolution.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.transport, self.authority())
    }
}
