//! Transport Layer
//!
//! Responsibilities:
//! - Turn dial/listen/accept/read/write/close into bridge calls
//! - Route host callbacks back to the suspended operation they answer
//! - NO real sockets: every byte goes through a [`HostBridge`](crate::bridge::HostBridge)
//!
//! ```text
//! guest task ──► BridgeTransport ──► HostBridge calls
//!     ▲                                   │
//!     └── registries ◄── dispatch ◄── host callbacks
//! ```

mod conn;
mod listener;
mod registry;
mod vnet;

pub use conn::{Connection, ConnectionHandle};
pub use listener::VirtualListener;
pub use vnet::BridgeTransport;

use async_trait::async_trait;

use crate::common::{Address, Result, Stream};

/// Transport trait for establishing raw connections
///
/// Lets higher-level clients take any dialer, the bridge included.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to a remote address
    async fn connect(&self, addr: &Address) -> Result<Stream>;

    /// Create a listener bound to an address
    async fn bind(&self, addr: &Address) -> Result<Box<dyn Listener>>;
}

/// Listener trait for accepting incoming connections
#[async_trait]
pub trait Listener: Send + Sync {
    /// Accept a new connection
    async fn accept(&self) -> Result<(Stream, Address)>;

    /// Get the local bound address
    fn local_addr(&self) -> Result<Address>;

    /// Close the listener
    async fn close(&self) -> Result<()>;
}
