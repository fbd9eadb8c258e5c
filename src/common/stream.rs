//! Stream abstraction
//!
//! Unified stream type handed to higher-level clients. A virtual connection
//! is just another `AsyncRead + AsyncWrite`, so RPC clients built on tokio
//! can run over the bridge unchanged.

use tokio::io::{AsyncRead, AsyncWrite};

/// The boxed stream type returned by transports.
pub type Stream = Box<dyn AsyncReadWrite + Unpin + Send>;

/// Combined trait for async read + write
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

/// Trait for types that can be converted into a Stream
pub trait IntoStream {
    fn into_stream(self) -> Stream;
}

impl<T> IntoStream for T
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn into_stream(self) -> Stream {
        Box::new(self)
    }
}
