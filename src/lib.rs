//! guestnet - virtual sockets for sandboxed guests
//!
//! A guest with no socket access of its own dials, listens and streams bytes
//! through a narrow bridge into a host that owns the real network.
//!
//! # Architecture
//!
//! ```text
//! Connection / VirtualListener   (read, write, accept, deadlines)
//! → BridgeTransport              (registries, handshakes, dispatch)
//! → HostBridge                   (listen, connect, write, close)
//! ← BridgeEvent                  (acceptor, connectReply, receiver, closer)
//! ```
//!
//! ## Core Principles
//!
//! - Registries belong to a transport instance, never to the process
//! - Every host reply is routed by port or correlation key
//! - No registry lock is held across a bridge call or a channel wait
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Address, VirtualAddr, Stream
//! ├── bridge/          # HostBridge, BridgeEvent, loopback host
//! ├── transport/       # BridgeTransport, Connection, VirtualListener
//! ├── config.rs
//! └── error.rs
//! ```

// Core types
pub mod common;
pub mod error;

// Layered architecture
pub mod bridge;
pub mod transport;

// Supporting modules
pub mod config;

// Re-exports for convenience
pub use common::{Address, Stream, VirtualAddr};
pub use config::Config;
pub use error::{Error, Result};

pub use bridge::{BridgeEvent, HostBridge, LoopbackHost};
pub use transport::{BridgeTransport, Connection, ConnectionHandle, Listener, Transport, VirtualListener};
