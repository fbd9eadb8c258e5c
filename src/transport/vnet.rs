//! Bridge transport: dial, listen and the host callback dispatcher
//!
//! Handshake flow:
//! ```text
//! dial:    register key → bridge.connect(key, port) → wait on reply slot
//!                            ↓ (later, host event loop)
//!          ConnectResult(key) → register local port → fill reply slot
//!
//! listen:  reserve port → bridge.listen(port)
//!          Accepted(listen, server, client) → register server port → accept queue
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::bridge::{decode_payload, BridgeEvent, HostBridge};
use crate::common::{Address, IntoStream, Result, Stream, VirtualAddr};
use crate::config::TransportConfig;
use crate::error::{check_host_reply, host_error, Error};

use super::conn::Connection;
use super::listener::VirtualListener;
use super::registry::{AcceptEvent, Connected, CorrelationRegistry, Delivery, PortRegistry};
use super::{Listener, Transport};

/// Everything a transport instance owns: the bridge and both registries
pub(crate) struct TransportInner {
    pub bridge: Arc<dyn HostBridge>,
    pub ports: PortRegistry,
    pub correlations: CorrelationRegistry,
}

/// Virtual socket transport over a [`HostBridge`].
///
/// Cheap to clone; all clones share the same registries. Independent
/// instances never see each other's ports.
#[derive(Clone)]
pub struct BridgeTransport {
    inner: Arc<TransportInner>,
}

/// Removes a correlation entry if the dial gives up before the reply
struct PendingConnect<'a> {
    correlations: &'a CorrelationRegistry,
    key: u32,
}

impl Drop for PendingConnect<'_> {
    fn drop(&mut self) {
        self.correlations.take(self.key);
    }
}

impl BridgeTransport {
    pub fn new(bridge: Arc<dyn HostBridge>, config: &TransportConfig) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                bridge,
                ports: PortRegistry::new(config.receive_buffer, config.accept_buffer),
                correlations: CorrelationRegistry::new(),
            }),
        }
    }

    /// Dial a target of the form `localhost:<port>`.
    pub async fn dial(&self, target: &str) -> Result<Connection> {
        let addr = VirtualAddr::parse(target)?;
        self.dial_addr(addr).await
    }

    pub async fn dial_addr(&self, addr: VirtualAddr) -> Result<Connection> {
        let (key, reply) = self.inner.correlations.register();
        let _pending = PendingConnect {
            correlations: &self.inner.correlations,
            key,
        };

        check_host_reply(self.inner.bridge.connect(key, addr.port()))?;
        trace!("connect {} issued with key {:#010x}", addr, key);

        let connected = reply.await.map_err(|_| Error::ConnectionClosed)??;
        let local = VirtualAddr::new(connected.client_port);
        let remote = VirtualAddr::new(connected.server_port);
        debug!("Connected {} -> {}", local, remote);

        Ok(Connection::new(local, remote, Arc::clone(&self.inner), connected.channel))
    }

    /// Listen on `port`. At most one listener may own a port.
    pub fn listen(&self, port: u16) -> Result<VirtualListener> {
        let channel = self.inner.ports.reserve_listener(port)?;

        if let Err(e) = check_host_reply(self.inner.bridge.listen(port)) {
            self.inner.ports.remove_listener(port);
            return Err(e);
        }
        debug!("Listening on {}", VirtualAddr::new(port));

        Ok(VirtualListener::new(port, Arc::clone(&self.inner), channel))
    }

    /// Entry point for every host callback.
    ///
    /// The returned error is what the host receives as the callback's error
    /// string; the host is expected to reset the affected connection.
    ///
    /// # Panics
    ///
    /// Panics if an `Accepted` event names a server port that is already
    /// open: the port tables no longer describe the host's state.
    pub async fn dispatch(&self, event: BridgeEvent) -> Result<()> {
        match event {
            BridgeEvent::Accepted {
                listen_port,
                server_port,
                client_port,
            } => self.on_accepted(listen_port, server_port, client_port).await,
            BridgeEvent::ConnectResult {
                key,
                server_port,
                client_port,
                error,
            } => self.on_connect_result(key, server_port, client_port, error),
            BridgeEvent::DataReceived { port, payload } => self.on_data(port, &payload).await,
            BridgeEvent::Closed { port } => {
                self.on_closed(port);
                Ok(())
            }
        }
    }

    async fn on_accepted(&self, listen_port: u16, server_port: u16, client_port: u16) -> Result<()> {
        let accepter = self
            .inner
            .ports
            .accepter(listen_port)
            .ok_or_else(|| Error::Protocol(format!("port {} is not on standby", listen_port)))?;

        let channel = match self.inner.ports.register_receiver(server_port) {
            Ok(channel) => channel,
            Err(_) => panic!("duplicate registration of local port {}", server_port),
        };

        let event = AcceptEvent {
            server_port,
            client_port,
            channel,
        };
        if accepter.send(event).await.is_err() {
            self.inner.ports.remove_receiver(server_port);
            return Err(Error::Protocol(format!("port {} stopped accepting", listen_port)));
        }

        Ok(())
    }

    fn on_connect_result(
        &self,
        key: u32,
        server_port: u16,
        client_port: u16,
        error: Option<String>,
    ) -> Result<()> {
        let reply = self
            .inner
            .correlations
            .take(key)
            .ok_or_else(|| Error::Protocol(format!("there is no connector waiting for key {:#010x}", key)))?;

        let outcome = match error {
            Some(msg) => Err(host_error(msg)),
            None => match self.inner.ports.register_receiver(client_port) {
                Ok(channel) => Ok(Connected {
                    server_port,
                    client_port,
                    channel,
                }),
                Err(e) => {
                    warn!("connectReply assigned port {} which is already open", client_port);
                    let _ = reply.send(Err(e));
                    return Err(Error::AddrInUse(client_port));
                }
            },
        };

        if let Err(Ok(connected)) = reply.send(outcome) {
            self.inner.ports.remove_receiver(connected.client_port);
            return Err(Error::Protocol(format!("the dialer for key {:#010x} is gone", key)));
        }

        Ok(())
    }

    async fn on_data(&self, port: u16, payload: &str) -> Result<()> {
        let tx = self
            .inner
            .ports
            .receiver(port)
            .ok_or_else(|| Error::Protocol(format!("target port {} is not open", port)))?;

        let data = decode_payload(payload)
            .map_err(|e| Error::Protocol(format!("undecodable payload for port {}: {}", port, e)))?;
        trace!("[{}] received {} bytes", port, data.len());

        if tx.send(Delivery::Data(Bytes::from(data))).await.is_err() {
            // Reader is gone without closing
            self.inner.ports.remove_receiver_if_same(port, &tx);
            return Err(Error::Protocol(format!("target port {} is not open", port)));
        }

        Ok(())
    }

    fn on_closed(&self, port: u16) {
        let connection = self.inner.ports.remove_receiver(port);
        let listener = self.inner.ports.remove_listener(port);
        if connection || listener {
            debug!("Host closed port {}", port);
        }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn connect(&self, addr: &Address) -> Result<Stream> {
        let addr = VirtualAddr::from_address(addr)?;
        Ok(self.dial_addr(addr).await?.into_stream())
    }

    async fn bind(&self, addr: &Address) -> Result<Box<dyn Listener>> {
        let addr = VirtualAddr::from_address(addr)?;
        Ok(Box::new(self.listen(addr.port())?))
    }
}

#[cfg(test)]
impl BridgeTransport {
    pub(crate) fn is_receiving(&self, port: u16) -> bool {
        self.inner.ports.is_receiving(port)
    }

    pub(crate) fn is_listening(&self, port: u16) -> bool {
        self.inner.ports.is_listening(port)
    }

    pub(crate) fn pending_dials(&self) -> usize {
        self.inner.correlations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::bridge::recording::{Call, RecordingBridge};

    fn setup() -> (BridgeTransport, Arc<RecordingBridge>) {
        let bridge = Arc::new(RecordingBridge::new());
        let transport = BridgeTransport::new(bridge.clone(), &TransportConfig::default());
        (transport, bridge)
    }

    /// Wait until `n` connect calls reached the bridge; returns (key, port) pairs.
    async fn connect_calls(bridge: &RecordingBridge, n: usize) -> Vec<(u32, u16)> {
        loop {
            let connects: Vec<(u32, u16)> = bridge
                .calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Connect(key, port) => Some((key, port)),
                    _ => None,
                })
                .collect();
            if connects.len() >= n {
                return connects;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn accepted(transport: &BridgeTransport, listener: &VirtualListener, server: u16, client: u16) -> Connection {
        transport
            .dispatch(BridgeEvent::Accepted {
                listen_port: listener.local_addr().port(),
                server_port: server,
                client_port: client,
            })
            .await
            .unwrap();
        listener.accept().await.unwrap()
    }

    #[tokio::test]
    async fn test_accept_read_and_host_close() {
        let (transport, bridge) = setup();

        let listener = transport.listen(7000).unwrap();
        assert_eq!(bridge.calls(), vec![Call::Listen(7000)]);

        let mut conn = accepted(&transport, &listener, 42, 99).await;
        assert_eq!(conn.local_addr().port(), 42);
        assert_eq!(conn.remote_addr().port(), 99);
        assert_eq!(conn.local_addr().to_string(), "localhost:42");

        transport
            .dispatch(BridgeEvent::DataReceived {
                port: 42,
                payload: "aGVsbG8=".into(),
            })
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        transport.dispatch(BridgeEvent::Closed { port: 42 }).await.unwrap();
        assert_eq!(conn.read(&mut buf).await.unwrap(), 0);
        assert!(!transport.is_receiving(42));
    }

    #[tokio::test]
    async fn test_reads_preserve_byte_stream() {
        let (transport, _bridge) = setup();
        let listener = transport.listen(7000).unwrap();
        let mut conn = accepted(&transport, &listener, 42, 99).await;

        for chunk in [&b"hello "[..], b"", b"virtual ", b"world"] {
            transport.dispatch(BridgeEvent::data(42, chunk)).await.unwrap();
        }
        transport.dispatch(BridgeEvent::Closed { port: 42 }).await.unwrap();

        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = conn.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            assert!(n <= buf.len());
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"hello virtual world");
    }

    #[tokio::test]
    async fn test_close_unblocks_read() {
        let (transport, bridge) = setup();
        let listener = transport.listen(7000).unwrap();
        let mut conn = accepted(&transport, &listener, 42, 99).await;
        let handle = conn.handle();

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            conn.read(&mut buf).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        handle.close().unwrap();
        assert_eq!(reader.await.unwrap().unwrap(), 0);
        assert!(!transport.is_receiving(42));
        assert!(bridge.calls().contains(&Call::Close(42)));

        // Second close stays local
        handle.close().unwrap();
        assert_eq!(bridge.calls().iter().filter(|c| **c == Call::Close(42)).count(), 1);
        assert!(matches!(handle.write(b"late"), Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_listener_close_unblocks_accept() {
        let (transport, bridge) = setup();
        let listener = Arc::new(transport.listen(7000).unwrap());

        let waiting = Arc::clone(&listener);
        let acceptor = tokio::spawn(async move { waiting.accept().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        listener.close().unwrap();
        assert!(matches!(acceptor.await.unwrap(), Err(Error::ListenerClosed(7000))));
        assert!(!transport.is_listening(7000));
        assert!(bridge.calls().contains(&Call::Close(7000)));

        assert!(matches!(listener.close(), Err(Error::ListenerClosed(7000))));

        // The port is free again
        assert!(transport.listen(7000).is_ok());
    }

    #[tokio::test]
    async fn test_host_close_of_listen_port_unblocks_accept() {
        let (transport, _bridge) = setup();
        let listener = transport.listen(7000).unwrap();

        transport.dispatch(BridgeEvent::Closed { port: 7000 }).await.unwrap();
        assert!(matches!(listener.accept().await, Err(Error::ListenerClosed(7000))));
    }

    async fn pair_without_accept(transport: &BridgeTransport, server_ports: &[u16]) {
        for (i, server_port) in server_ports.iter().enumerate() {
            transport
                .dispatch(BridgeEvent::Accepted {
                    listen_port: 7000,
                    server_port: *server_port,
                    client_port: 99 + i as u16,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_listener_close_hangs_up_unaccepted() {
        let (transport, bridge) = setup();
        let listener = transport.listen(7000).unwrap();
        pair_without_accept(&transport, &[42, 43]).await;

        listener.close().unwrap();
        let calls = bridge.calls();
        for port in [7000, 42, 43] {
            assert!(calls.contains(&Call::Close(port)), "port {} left open", port);
        }
        assert!(!transport.is_receiving(42));
        assert!(!transport.is_receiving(43));

        assert!(matches!(listener.accept().await, Err(Error::ListenerClosed(7000))));
    }

    #[tokio::test]
    async fn test_dropped_listener_hangs_up_unaccepted() {
        let (transport, bridge) = setup();
        let listener = transport.listen(7000).unwrap();
        pair_without_accept(&transport, &[42]).await;

        drop(listener);
        assert!(bridge.calls().contains(&Call::Close(42)));
        assert!(!transport.is_receiving(42));
        assert!(!transport.is_listening(7000));
    }

    #[tokio::test]
    async fn test_deadline_changes_share_one_wake() {
        let (transport, _bridge) = setup();
        let listener = transport.listen(7000).unwrap();
        let mut conn = accepted(&transport, &listener, 42, 99).await;

        for _ in 0..20 {
            conn.set_deadline(None);
        }

        // Room is left for payloads; the host is never held up
        let deliveries = async {
            for i in 0..9u8 {
                transport.dispatch(BridgeEvent::data(42, &[b'0' + i])).await.unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(1), deliveries)
            .await
            .expect("deadline wakes filled the receive queue");

        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"0");

        // The reader saw the wake, so a new change queues a fresh one
        conn.set_deadline(None);
        let mut read = Vec::new();
        while read.len() < 8 {
            let n = conn.read(&mut buf).await.unwrap();
            read.extend_from_slice(&buf[..n]);
        }
        assert_eq!(read, b"12345678");
    }

    #[tokio::test]
    async fn test_expired_deadline_times_out_then_clears() {
        let (transport, _bridge) = setup();
        let listener = transport.listen(7000).unwrap();
        let mut conn = accepted(&transport, &listener, 42, 99).await;
        let mut buf = [0u8; 8];

        conn.set_deadline(Some(Instant::now() + Duration::from_millis(20)));
        assert!(matches!(conn.read(&mut buf).await, Err(Error::Timeout)));

        // Nothing was consumed, and the next read waits without a deadline
        transport.dispatch(BridgeEvent::data(42, b"late")).await.unwrap();
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"late");
    }

    #[tokio::test]
    async fn test_past_deadline_interrupts_blocked_read() {
        let (transport, _bridge) = setup();
        let listener = transport.listen(7000).unwrap();
        let mut conn = accepted(&transport, &listener, 42, 99).await;
        let handle = conn.handle();

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            conn.read(&mut buf).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        handle.set_read_deadline(Some(Instant::now()));
        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("read ignored the new deadline");
        assert!(matches!(result.unwrap(), Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn test_concurrent_dials_route_by_key() {
        let (transport, bridge) = setup();

        let t = transport.clone();
        let dial_a = tokio::spawn(async move { t.dial("localhost:80").await });
        let t = transport.clone();
        let dial_b = tokio::spawn(async move { t.dial("localhost:81").await });

        let calls = connect_calls(&bridge, 2).await;
        let key_for = |port: u16| calls.iter().find(|(_, p)| *p == port).map(|(k, _)| *k).unwrap();
        let (key_a, key_b) = (key_for(80), key_for(81));
        assert_ne!(key_a, key_b);

        for (key, server_port, client_port) in [(key_a, 80, 1000), (key_b, 81, 1001)] {
            transport
                .dispatch(BridgeEvent::ConnectResult {
                    key,
                    server_port,
                    client_port,
                    error: None,
                })
                .await
                .unwrap();
        }

        let a = dial_a.await.unwrap().unwrap();
        let b = dial_b.await.unwrap().unwrap();
        assert_eq!((a.local_addr().port(), a.remote_addr().port()), (1000, 80));
        assert_eq!((b.local_addr().port(), b.remote_addr().port()), (1001, 81));
        assert_eq!(transport.pending_dials(), 0);

        // Each key is answered once
        let again = transport
            .dispatch(BridgeEvent::ConnectResult {
                key: key_a,
                server_port: 80,
                client_port: 1002,
                error: None,
            })
            .await;
        assert!(matches!(again, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_data_right_after_connect_reply_is_kept() {
        let (transport, bridge) = setup();
        let t = transport.clone();
        let dial = tokio::spawn(async move { t.dial("localhost:1984").await });

        let (key, port) = connect_calls(&bridge, 1).await[0];
        assert_eq!(port, 1984);

        transport
            .dispatch(BridgeEvent::ConnectResult {
                key,
                server_port: 1984,
                client_port: 10000,
                error: None,
            })
            .await
            .unwrap();
        transport.dispatch(BridgeEvent::data(10000, b"early")).await.unwrap();

        let mut conn = dial.await.unwrap().unwrap();
        let mut buf = [0u8; 8];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"early");
    }

    #[tokio::test]
    async fn test_connect_reply_errors() {
        let (transport, bridge) = setup();

        for (attempt, (error, refused)) in [("connection refused", true), ("", false)].into_iter().enumerate() {
            let t = transport.clone();
            let dial = tokio::spawn(async move { t.dial("localhost:7000").await });
            connect_calls(&bridge, attempt + 1).await;
            let key = bridge.last_connect_key().unwrap();

            transport
                .dispatch(BridgeEvent::ConnectResult {
                    key,
                    server_port: 0,
                    client_port: 0,
                    error: Some(error.to_string()),
                })
                .await
                .unwrap();

            let result = dial.await.unwrap();
            if refused {
                assert!(matches!(result, Err(Error::Bridge(msg)) if msg == "connection refused"));
            } else {
                assert!(matches!(result, Err(Error::Protocol(_))));
            }
            assert_eq!(transport.pending_dials(), 0);
        }
    }

    #[tokio::test]
    async fn test_rejected_connect_releases_key() {
        let (transport, bridge) = setup();
        bridge.fail_with("unreachable");

        let result = transport.dial("localhost:7000").await;
        assert!(matches!(result, Err(Error::Bridge(msg)) if msg == "unreachable"));
        assert_eq!(transport.pending_dials(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_dial_releases_key() {
        let (transport, bridge) = setup();
        let t = transport.clone();
        let dial = tokio::spawn(async move { t.dial("localhost:7000").await });

        connect_calls(&bridge, 1).await;
        assert_eq!(transport.pending_dials(), 1);

        dial.abort();
        assert!(dial.await.unwrap_err().is_cancelled());
        assert_eq!(transport.pending_dials(), 0);
    }

    #[tokio::test]
    async fn test_malformed_target_never_reaches_bridge() {
        let (transport, bridge) = setup();
        assert!(matches!(
            transport.dial("example.com:80").await,
            Err(Error::InvalidAddress(_))
        ));
        assert!(bridge.calls().is_empty());
    }

    #[tokio::test]
    async fn test_two_accepts_are_independent() {
        let (transport, bridge) = setup();
        let listener = transport.listen(7000).unwrap();
        let first = accepted(&transport, &listener, 42, 99).await;
        let mut second = accepted(&transport, &listener, 43, 100).await;
        assert_ne!(first.local_addr(), second.local_addr());

        assert_eq!(first.write(b"a").unwrap(), 1);
        assert!(bridge.calls().contains(&Call::Write(42, "YQ==".into())));

        transport.dispatch(BridgeEvent::data(43, b"b")).await.unwrap();
        let mut buf = [0u8; 4];
        let n = second.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"b");
    }

    #[tokio::test]
    async fn test_empty_write_skips_bridge() {
        let (transport, bridge) = setup();
        let listener = transport.listen(7000).unwrap();
        let conn = accepted(&transport, &listener, 42, 99).await;

        assert_eq!(conn.write(&[]).unwrap(), 0);
        assert!(!bridge.calls().iter().any(|c| matches!(c, Call::Write(..))));
    }

    #[tokio::test]
    async fn test_write_surfaces_bridge_error() {
        let (transport, bridge) = setup();
        let listener = transport.listen(7000).unwrap();
        let conn = accepted(&transport, &listener, 42, 99).await;

        bridge.fail_with("broken pipe");
        assert!(matches!(conn.write(b"x"), Err(Error::Bridge(msg)) if msg == "broken pipe"));
    }

    #[tokio::test]
    async fn test_listen_is_exclusive() {
        let (transport, bridge) = setup();
        let _listener = transport.listen(7000).unwrap();
        assert!(matches!(transport.listen(7000), Err(Error::AddrInUse(7000))));
        assert_eq!(bridge.calls(), vec![Call::Listen(7000)]);
    }

    #[tokio::test]
    async fn test_rejected_listen_rolls_back() {
        let (transport, bridge) = setup();
        bridge.fail_with("permission denied");
        assert!(matches!(transport.listen(7000), Err(Error::Bridge(_))));
        assert!(!transport.is_listening(7000));
    }

    #[tokio::test]
    async fn test_callbacks_for_unknown_ports() {
        let (transport, _bridge) = setup();

        let data = transport.dispatch(BridgeEvent::data(42, b"x")).await;
        assert!(matches!(data, Err(Error::Protocol(_))));

        let accept = transport
            .dispatch(BridgeEvent::Accepted {
                listen_port: 7000,
                server_port: 42,
                client_port: 99,
            })
            .await;
        assert!(matches!(accept, Err(Error::Protocol(_))));
        assert!(!transport.is_receiving(42));

        assert!(transport.dispatch(BridgeEvent::Closed { port: 42 }).await.is_ok());
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_rejected() {
        let (transport, _bridge) = setup();
        let listener = transport.listen(7000).unwrap();
        let _conn = accepted(&transport, &listener, 42, 99).await;

        let result = transport
            .dispatch(BridgeEvent::DataReceived {
                port: 42,
                payload: "***".into(),
            })
            .await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    #[should_panic(expected = "duplicate registration")]
    async fn test_duplicate_accept_port_panics() {
        let (transport, _bridge) = setup();
        let listener = transport.listen(7000).unwrap();
        let _conn = accepted(&transport, &listener, 42, 99).await;

        let _ = transport
            .dispatch(BridgeEvent::Accepted {
                listen_port: 7000,
                server_port: 42,
                client_port: 100,
            })
            .await;
    }

    #[tokio::test]
    async fn test_stream_seam() {
        let (transport, bridge) = setup();

        let listener = Transport::bind(&transport, &Address::domain("localhost", 7000)).await.unwrap();
        assert_eq!(listener.local_addr().unwrap(), Address::domain("localhost", 7000));

        transport
            .dispatch(BridgeEvent::Accepted {
                listen_port: 7000,
                server_port: 42,
                client_port: 99,
            })
            .await
            .unwrap();
        let (mut stream, remote) = listener.accept().await.unwrap();
        assert_eq!(remote, Address::domain("localhost", 99));

        stream.write_all(b"ping").await.unwrap();
        assert!(bridge.calls().contains(&Call::Write(42, "cGluZw==".into())));

        transport.dispatch(BridgeEvent::data(42, b"pong")).await.unwrap();
        transport.dispatch(BridgeEvent::Closed { port: 42 }).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"pong");

        stream.shutdown().await.unwrap();
        listener.close().await.unwrap();

        let socket: Address = "127.0.0.1:7000".parse::<std::net::SocketAddr>().unwrap().into();
        assert!(matches!(
            Transport::bind(&transport, &socket).await,
            Err(Error::InvalidAddress(_))
        ));
    }
}
