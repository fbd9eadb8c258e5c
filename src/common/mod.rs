//! Common types and abstractions
//!
//! - Stream: unified async I/O abstraction
//! - Address / VirtualAddr: endpoint representation
//! - Error: unified error types

mod address;
mod stream;

pub use address::{Address, VirtualAddr, LOOPBACK_HOST, NETWORK_NAME};
pub use stream::{AsyncReadWrite, IntoStream, Stream};

// Re-export error types from crate root
pub use crate::error::{Error, Result};
