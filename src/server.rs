//! Server wiring: bind, dispatch, drain.
//!
//! Binding happens up front so a bad or occupied address fails before any
//! session machinery starts. [`Server::run`] then dispatches until shutdown
//! is requested and drains live sessions within the grace period.

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{BindError, ServerError};
use crate::listener::Listener;
use crate::observe::ExchangeLog;
use crate::registry::{DrainOutcome, Registry};
use crate::service::Service;
use crate::session::SessionContext;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Server instance
pub struct Server {
    config: Config,
    listener: Listener,
    registry: Arc<Registry>,
    service: Arc<Service>,
    exchanges: ExchangeLog,
    session_limit: Option<Arc<Semaphore>>,
}

impl Server {
    /// Bind the configured endpoint and prepare the handler.
    pub async fn bind(config: Config) -> Result<Self, BindError> {
        let listener = Listener::bind(&config.endpoint).await?;
        let service = Service::from_config(config.service, config.stop_word.clone());
        let session_limit = config.max_sessions.map(|n| Arc::new(Semaphore::new(n)));

        Ok(Server {
            config,
            listener,
            registry: Registry::new(),
            service: Arc::new(service),
            exchanges: ExchangeLog::new(),
            session_limit,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Live-session registry, for inspection.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn exchanges(&self) -> &ExchangeLog {
        &self.exchanges
    }

    /// Handle that can trigger shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.registry))
    }

    /// Dispatch sessions until shutdown is requested, then drain them.
    pub async fn run(self) -> DrainOutcome {
        let local = self.listener.local_addr().ok();
        info!(
            address = ?local,
            transport = %self.listener.transport(),
            service = self.service.name(),
            max_sessions = ?self.config.max_sessions,
            "Server listening"
        );

        let context = SessionContext {
            service: Arc::clone(&self.service),
            exchanges: self.exchanges.clone(),
            idle_timeout: self.config.idle_timeout,
            shutdown: self.registry.shutdown_signal(),
        };
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.registry),
            self.session_limit.clone(),
            context,
        );

        match self.listener {
            Listener::Stream(listener) => dispatcher.serve_stream(listener).await,
            Listener::Datagram(socket) => dispatcher.serve_datagram(socket).await,
        }

        let outcome = self.registry.drain(self.config.grace_period).await;
        match &outcome {
            DrainOutcome::Drained => info!(
                served = self.registry.total_registered(),
                "Server stopped"
            ),
            DrainOutcome::TimedOut { forced } => warn!(
                served = self.registry.total_registered(),
                forced = forced.len(),
                "Server stopped after forcing sessions closed"
            ),
        }
        outcome
    }
}

/// Triggers server shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<Registry>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.request_shutdown();
    }
}

/// Bind, serve until `signal` resolves, then drain.
pub async fn serve<F>(config: Config, signal: F) -> Result<DrainOutcome, ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let server = Server::bind(config).await?;
    let handle = server.shutdown_handle();

    tokio::spawn(async move {
        signal.await;
        handle.shutdown();
    });

    Ok(server.run().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, LineClient, RpcClient};
    use crate::config::ServiceType;
    use crate::endpoint::{Endpoint, Transport};
    use crate::observe::Exchange;
    use crate::protocols::rpc::{ErrorKind, Operands};
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use tokio::task::JoinHandle;

    fn config(transport: Transport, service: ServiceType) -> Config {
        Config::new(Endpoint::ephemeral(transport), service)
    }

    async fn start(
        config: Config,
    ) -> (SocketAddr, ShutdownHandle, Arc<Registry>, JoinHandle<DrainOutcome>) {
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let registry = Arc::clone(server.registry());
        let task = tokio::spawn(server.run());
        (addr, handle, registry, task)
    }

    async fn wait_for_live(registry: &Registry, n: usize) {
        for _ in 0..200 {
            if registry.live_count() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} live sessions, have {}", registry.live_count());
    }

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let (addr, handle, _, task) = start(config(Transport::Stream, ServiceType::Echo)).await;

        let mut client = LineClient::connect(addr).await.unwrap();
        for line in ["hello", "with  spaces", "", "ünïcode", "stop"] {
            assert_eq!(client.request(line).await.unwrap(), format!("{line}\n"));
        }

        handle.shutdown();
        assert_eq!(task.await.unwrap(), DrainOutcome::Drained);
    }

    #[tokio::test]
    async fn test_stop_closes_connection() {
        let (addr, handle, _, task) = start(config(Transport::Stream, ServiceType::Echo)).await;

        let mut client = LineClient::connect(addr).await.unwrap();
        assert_eq!(client.request("STOP").await.unwrap(), "STOP\n");
        assert_eq!(client.read_line().await.unwrap(), None);
        assert!(matches!(
            client.request("after").await,
            Err(ClientError::Closed) | Err(ClientError::Io(_))
        ));

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_isolation() {
        let (addr, handle, _, task) = start(config(Transport::Stream, ServiceType::Echo)).await;

        let clients: Vec<_> = (0..8)
            .map(|c| {
                tokio::spawn(async move {
                    let mut client = LineClient::connect(addr).await.unwrap();
                    for i in 0..50 {
                        let line = format!("client {c} line {i}");
                        assert_eq!(client.request(&line).await.unwrap(), format!("{line}\n"));
                        if i % 7 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();

        for c in clients {
            c.await.unwrap();
        }

        handle.shutdown();
        assert_eq!(task.await.unwrap(), DrainOutcome::Drained);
    }

    #[tokio::test]
    async fn test_exchanges_observed() {
        let server = Server::bind(config(Transport::Stream, ServiceType::Echo))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let mut events = server.exchanges().subscribe();
        let task = tokio::spawn(server.run());

        let mut client = LineClient::connect(addr).await.unwrap();
        client.request("observed").await.unwrap();

        let received = events.recv().await.unwrap();
        let replied = events.recv().await.unwrap();
        assert!(matches!(received, Exchange::Received { ref request, .. } if &request[..] == b"observed\n"));
        assert!(matches!(replied, Exchange::Replied { ref response, .. } if &response[..] == b"observed\n"));
        assert_eq!(received.session(), replied.session());

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rpc_reference_calls() {
        let (addr, handle, _, task) = start(config(Transport::Stream, ServiceType::Rpc)).await;

        let mut client = RpcClient::connect(addr).await.unwrap();
        assert_eq!(client.add(Operands::new(17, 18, true, false)).await.unwrap(), 1);
        assert_eq!(
            client.subtract(Operands::new(17, 18, true, false)).await.unwrap(),
            -35
        );
        assert_eq!(client.add(Operands::new(5, 5, false, false)).await.unwrap(), 10);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rpc_unknown_method_keeps_session() {
        let (addr, handle, registry, task) =
            start(config(Transport::Stream, ServiceType::Rpc)).await;

        let mut client = RpcClient::connect(addr).await.unwrap();
        let err = client
            .call("Multiply", serde_json::json!([2, 3, false, false]))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Remote(ref body) if body.kind == ErrorKind::UnknownMethod));

        let err = client
            .call("Add", serde_json::json!(["two", 3, false, false]))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Remote(ref body) if body.kind == ErrorKind::BadArgument));

        // Same connection still works
        assert_eq!(client.add(Operands::new(1, 2, false, false)).await.unwrap(), 3);
        assert_eq!(registry.live_count(), 1);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_second_instance_bind_fails() {
        let (addr, handle, _, task) = start(config(Transport::Stream, ServiceType::Echo)).await;

        let endpoint = Endpoint::parse(&addr.to_string(), Transport::Stream).unwrap();
        let second = Server::bind(Config::new(endpoint, ServiceType::Echo)).await;
        assert!(matches!(second, Err(BindError::AddrInUse(_))));

        // First instance unaffected
        let mut client = LineClient::connect(addr).await.unwrap();
        assert_eq!(client.request("still here").await.unwrap(), "still here\n");

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_graceful_shutdown_drains_sessions() {
        let (addr, handle, registry, task) =
            start(config(Transport::Stream, ServiceType::Echo)).await;

        let mut clients = Vec::new();
        for i in 0..4 {
            let mut client = LineClient::connect(addr).await.unwrap();
            assert_eq!(client.request(&format!("c{i}")).await.unwrap(), format!("c{i}\n"));
            clients.push(client);
        }
        wait_for_live(&registry, 4).await;

        handle.shutdown();
        assert_eq!(task.await.unwrap(), DrainOutcome::Drained);
        assert_eq!(registry.live_count(), 0);

        for client in &mut clients {
            assert_eq!(client.read_line().await.unwrap(), None);
        }
        assert!(LineClient::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_mid_exchange_answers_every_client() {
        let (addr, handle, registry, task) =
            start(config(Transport::Stream, ServiceType::Echo)).await;

        let mut clients = Vec::new();
        for i in 0..4 {
            let mut client = LineClient::connect(addr).await.unwrap();
            let reply = client.request(&format!("warm {i}")).await.unwrap();
            assert_eq!(reply, format!("warm {i}\n"));
            clients.push(client);
        }
        wait_for_live(&registry, 4).await;

        // Every session has a request on the wire when shutdown arrives
        for (i, client) in clients.iter_mut().enumerate() {
            client.send_line(&format!("pending {i}")).await.unwrap();
        }
        handle.shutdown();

        for (i, client) in clients.iter_mut().enumerate() {
            assert_eq!(client.read_line().await.unwrap(), Some(format!("pending {i}\n")));
            assert_eq!(client.read_line().await.unwrap(), None);
        }
        assert_eq!(task.await.unwrap(), DrainOutcome::Drained);
        assert_eq!(registry.live_count(), 0);
    }

    #[tokio::test]
    async fn test_grace_period_forces_close() {
        let mut cfg = config(Transport::Datagram, ServiceType::Echo);
        cfg.grace_period = Duration::from_millis(50);

        let server = Server::bind(cfg).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let registry = Arc::clone(server.registry());

        // A session that never reaches Reading again
        let guard = registry.register("127.0.0.1:9".parse().unwrap(), None);
        let stuck_id = guard.id();
        let stuck = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        registry.attach(stuck_id, stuck.abort_handle());

        let task = tokio::spawn(server.run());
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"ping", addr).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        handle.shutdown();
        assert_eq!(
            task.await.unwrap(),
            DrainOutcome::TimedOut {
                forced: vec![stuck_id]
            }
        );
        assert_eq!(registry.live_count(), 0);
    }

    #[tokio::test]
    async fn test_datagram_echo_and_stop() {
        let (addr, handle, registry, task) =
            start(config(Transport::Datagram, ServiceType::Echo)).await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 64];

        client.send_to(b"hello udp", addr).await.unwrap();
        let (n, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello udp");

        client.send_to(b"STOP", addr).await.unwrap();
        let (n, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"STOP");
        wait_for_live(&registry, 0).await;

        // Next datagram opens a new session
        client.send_to(b"again", addr).await.unwrap();
        let (n, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"again");
        assert_eq!(registry.total_registered(), 2);

        handle.shutdown();
        assert_eq!(task.await.unwrap(), DrainOutcome::Drained);
    }

    #[tokio::test]
    async fn test_serve_reports_bind_error() {
        let (addr, handle, _, task) = start(config(Transport::Stream, ServiceType::Echo)).await;

        let endpoint = Endpoint::parse(&addr.to_string(), Transport::Stream).unwrap();
        let result = serve(Config::new(endpoint, ServiceType::Echo), async {}).await;
        assert!(matches!(
            result,
            Err(ServerError::Bind(BindError::AddrInUse(_)))
        ));

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_with_signal() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(serve(
            config(Transport::Stream, ServiceType::Echo),
            async move {
                let _ = rx.await;
            },
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, DrainOutcome::Drained);
    }
}
