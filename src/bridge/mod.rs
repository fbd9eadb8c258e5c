//! Bridge Layer
//!
//! The narrow boundary between the sandboxed guest and the privileged host
//! that owns the real network stack.
//!
//! - Calls (guest → host): [`HostBridge`], synchronous, answered with an
//!   optional error string.
//! - Callbacks (host → guest): [`BridgeEvent`], delivered asynchronously
//!   from the host's single-threaded event loop into
//!   [`BridgeTransport::dispatch`](crate::transport::BridgeTransport::dispatch).
//!
//! Payloads cross the boundary as standard base64 text.

pub mod loopback;

#[cfg(test)]
pub(crate) mod recording;

pub use loopback::LoopbackHost;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Raw reply of a bridge call: `Err` carries the host's error message.
pub type HostReply = std::result::Result<(), String>;

/// Calls the guest can issue into the host.
///
/// None of these may block: the host queues the work and reports the
/// outcome later through a [`BridgeEvent`] where one is defined.
pub trait HostBridge: Send + Sync {
    /// Start accepting connections on `port`.
    fn listen(&self, port: u16) -> HostReply;

    /// Request a connection to `port`. The result arrives later as
    /// [`BridgeEvent::ConnectResult`] carrying the same `key`.
    fn connect(&self, key: u32, port: u16) -> HostReply;

    /// Send a base64-encoded payload from local `port` to its peer.
    fn write(&self, port: u16, payload: &str) -> HostReply;

    /// Close a connection or listen port. Closing an unknown port is a no-op.
    fn close(&self, port: u16) -> HostReply;
}

/// Host-to-guest callback events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// A peer connected to a listening port.
    Accepted {
        listen_port: u16,
        server_port: u16,
        client_port: u16,
    },
    /// Outcome of an earlier `connect` call.
    ConnectResult {
        key: u32,
        server_port: u16,
        client_port: u16,
        error: Option<String>,
    },
    /// Inbound data for an open port, base64-encoded.
    DataReceived { port: u16, payload: String },
    /// The host closed the port.
    Closed { port: u16 },
}

impl BridgeEvent {
    /// Callback name, for logs
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::Accepted { .. } => "acceptor",
            BridgeEvent::ConnectResult { .. } => "connectReply",
            BridgeEvent::DataReceived { .. } => "receiver",
            BridgeEvent::Closed { .. } => "closer",
        }
    }

    /// Build a `DataReceived` event from raw bytes.
    pub fn data(port: u16, bytes: &[u8]) -> Self {
        BridgeEvent::DataReceived {
            port,
            payload: encode_payload(bytes),
        }
    }
}

pub fn encode_payload(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_payload(payload: &str) -> crate::Result<Vec<u8>> {
    Ok(BASE64.decode(payload)?)
}
