//! Binding the listening socket.
//!
//! Sockets are built with `socket2` so the backlog and address-reuse flags
//! are explicit. Port reuse stays off: a second server on the same port must
//! fail with [`BindError::AddrInUse`] instead of sharing the port.

use crate::endpoint::{Endpoint, Transport};
use crate::error::BindError;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{info, warn};

/// Listen backlog for stream sockets.
const LISTEN_BACKLOG: i32 = 1024;

/// A bound listening resource, held until the server shuts down.
#[derive(Debug)]
pub enum Listener {
    Stream(TcpListener),
    Datagram(UdpSocket),
}

impl Listener {
    /// Resolve and bind `endpoint`.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, BindError> {
        let authority = endpoint.authority();
        let addr = tokio::net::lookup_host(&authority)
            .await
            .map_err(|_| BindError::InvalidAddress(authority.clone()))?
            .next()
            .ok_or_else(|| BindError::InvalidAddress(authority.clone()))?;

        if endpoint.is_privileged() {
            warn!(port = endpoint.port(), "Binding a privileged port");
        }

        let listener = match endpoint.transport() {
            Transport::Stream => {
                let std_listener =
                    create_stream_socket(addr).map_err(|e| BindError::from_io(&authority, e))?;
                let listener = TcpListener::from_std(std_listener)
                    .map_err(|e| BindError::from_io(&authority, e))?;
                Listener::Stream(listener)
            }
            Transport::Datagram => {
                let std_socket = create_datagram_socket(addr)
                    .map_err(|e| BindError::from_io(&authority, e))?;
                let socket = UdpSocket::from_std(std_socket)
                    .map_err(|e| BindError::from_io(&authority, e))?;
                Listener::Datagram(socket)
            }
        };

        info!(endpoint = %endpoint, local = ?listener.local_addr().ok(), "Bound listener");
        Ok(listener)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Listener::Stream(l) => l.local_addr(),
            Listener::Datagram(s) => s.local_addr(),
        }
    }

    pub fn transport(&self) -> Transport {
        match self {
            Listener::Stream(_) => Transport::Stream,
            Listener::Datagram(_) => Transport::Datagram,
        }
    }
}

fn domain_for(addr: SocketAddr) -> Domain {
    match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    }
}

fn create_stream_socket(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(domain_for(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

fn create_datagram_socket(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(domain_for(addr), Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_stream_ephemeral() {
        let listener = Listener::bind(&Endpoint::ephemeral(Transport::Stream))
            .await
            .unwrap();
        assert_eq!(listener.transport(), Transport::Stream);
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_second_bind_fails() {
        let first = Listener::bind(&Endpoint::ephemeral(Transport::Stream))
            .await
            .unwrap();
        let port = first.local_addr().unwrap().port();

        let endpoint = Endpoint::parse(&format!("127.0.0.1:{port}"), Transport::Stream).unwrap();
        let second = Listener::bind(&endpoint).await;
        assert!(matches!(second, Err(BindError::AddrInUse(_))));

        // First listener is unaffected
        assert_eq!(first.local_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn test_second_datagram_bind_fails() {
        let first = Listener::bind(&Endpoint::ephemeral(Transport::Datagram))
            .await
            .unwrap();
        let port = first.local_addr().unwrap().port();

        let endpoint =
            Endpoint::parse(&format!("127.0.0.1:{port}"), Transport::Datagram).unwrap();
        assert!(matches!(
            Listener::bind(&endpoint).await,
            Err(BindError::AddrInUse(_))
        ));
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let endpoint = Endpoint::parse("no such host.invalid:9000", Transport::Stream);
        // Whitespace is rejected before resolution is attempted
        assert!(matches!(endpoint, Err(BindError::InvalidAddress(_))));
    }
}
