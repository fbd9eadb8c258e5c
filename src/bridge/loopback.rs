//! In-process host
//!
//! Plays the privileged side of the bridge inside the same process: it keeps
//! the host's port table, pairs connections, and feeds callbacks back into a
//! [`BridgeTransport`] from one event-loop task, the way a real host does
//! from its single-threaded loop.
//!
//! Ephemeral ports are handed out from 10000 upwards, skipping ports in use.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{BridgeEvent, HostBridge, HostReply};
use crate::config::TransportConfig;
use crate::transport::BridgeTransport;

const EPHEMERAL_START: u16 = 10_000;

/// Work queued for the event loop
#[derive(Debug)]
enum HostOp {
    Event(BridgeEvent),
    Connect { key: u32, port: u16 },
}

struct HostState {
    listening: HashSet<u16>,
    /// Open connection port → port on the other end
    peers: HashMap<u16, u16>,
    next_port: u16,
}

impl HostState {
    fn in_use(&self, port: u16) -> bool {
        self.listening.contains(&port) || self.peers.contains_key(&port)
    }

    fn allocate(&mut self) -> u16 {
        loop {
            let port = self.next_port;
            self.next_port = port.checked_add(1).unwrap_or(EPHEMERAL_START);
            if !self.in_use(port) {
                return port;
            }
        }
    }

    fn disconnect(&mut self, port: u16) -> Option<u16> {
        let peer = self.peers.remove(&port)?;
        self.peers.remove(&peer);
        Some(peer)
    }
}

/// A host bridge that loops every connection back into the same transport.
pub struct LoopbackHost {
    state: Mutex<HostState>,
    ops: mpsc::UnboundedSender<HostOp>,
}

impl LoopbackHost {
    /// Create a host and a transport wired to it, and start the host's
    /// event loop. Must be called inside a tokio runtime.
    pub fn spawn(config: &TransportConfig) -> (BridgeTransport, Arc<LoopbackHost>) {
        let (ops, rx) = mpsc::unbounded_channel();
        let host = Arc::new(LoopbackHost {
            state: Mutex::new(HostState {
                listening: HashSet::new(),
                peers: HashMap::new(),
                next_port: EPHEMERAL_START,
            }),
            ops,
        });

        let transport = BridgeTransport::new(host.clone(), config);
        tokio::spawn(Arc::clone(&host).run(transport.clone(), rx));

        (transport, host)
    }

    /// Queue a raw callback event, as if the host had produced it.
    pub fn inject(&self, event: BridgeEvent) -> HostReply {
        self.enqueue(HostOp::Event(event))
    }

    fn enqueue(&self, op: HostOp) -> HostReply {
        self.ops
            .send(op)
            .map_err(|_| "host event loop has stopped".to_string())
    }

    async fn run(self: Arc<Self>, transport: BridgeTransport, mut rx: mpsc::UnboundedReceiver<HostOp>) {
        debug!("Loopback host started");

        while let Some(op) = rx.recv().await {
            match op {
                HostOp::Event(event) => {
                    let _ = deliver(&transport, event).await;
                }
                HostOp::Connect { key, port } => self.handshake(&transport, key, port).await,
            }
        }

        debug!("Loopback host stopped");
    }

    async fn handshake(&self, transport: &BridgeTransport, key: u32, port: u16) {
        let pair = {
            let mut state = self.state.lock();
            if state.listening.contains(&port) {
                let server_port = state.allocate();
                let client_port = state.allocate();
                state.peers.insert(server_port, client_port);
                state.peers.insert(client_port, server_port);
                Some((server_port, client_port))
            } else {
                None
            }
        };

        let Some((server_port, client_port)) = pair else {
            let _ = deliver(transport, refused(key)).await;
            return;
        };

        let accepted = BridgeEvent::Accepted {
            listen_port: port,
            server_port,
            client_port,
        };
        if deliver(transport, accepted).await.is_err() {
            self.state.lock().disconnect(server_port);
            let _ = deliver(transport, refused(key)).await;
            return;
        }

        let reply = BridgeEvent::ConnectResult {
            key,
            server_port,
            client_port,
            error: None,
        };
        if deliver(transport, reply).await.is_err() {
            // Nobody owns the client end; hang up the server end.
            let hung_up = self.state.lock().disconnect(client_port).is_some();
            if hung_up {
                let _ = deliver(transport, BridgeEvent::Closed { port: server_port }).await;
            }
        }
    }
}

impl HostBridge for LoopbackHost {
    fn listen(&self, port: u16) -> HostReply {
        let mut state = self.state.lock();
        if state.in_use(port) {
            return Err(format!("port {} is already in use", port));
        }
        state.listening.insert(port);
        Ok(())
    }

    fn connect(&self, key: u32, port: u16) -> HostReply {
        self.enqueue(HostOp::Connect { key, port })
    }

    fn write(&self, port: u16, payload: &str) -> HostReply {
        let peer = self
            .state
            .lock()
            .peers
            .get(&port)
            .copied()
            .ok_or_else(|| format!("port {} is not connected", port))?;

        self.enqueue(HostOp::Event(BridgeEvent::DataReceived {
            port: peer,
            payload: payload.to_string(),
        }))
    }

    fn close(&self, port: u16) -> HostReply {
        let peer = {
            let mut state = self.state.lock();
            if state.listening.remove(&port) {
                return Ok(());
            }
            state.disconnect(port)
        };

        match peer {
            Some(peer) => self.enqueue(HostOp::Event(BridgeEvent::Closed { port: peer })),
            None => Ok(()),
        }
    }
}

fn refused(key: u32) -> BridgeEvent {
    BridgeEvent::ConnectResult {
        key,
        server_port: 0,
        client_port: 0,
        error: Some("connection refused".to_string()),
    }
}

async fn deliver(transport: &BridgeTransport, event: BridgeEvent) -> crate::Result<()> {
    let name = event.name();
    let result = transport.dispatch(event).await;
    if let Err(e) = &result {
        warn!("{} callback failed: {}", name, e);
    }
    result
}
