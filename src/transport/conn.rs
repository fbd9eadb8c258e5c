//! Virtual connection: byte-stream reads over a port's data channel
//!
//! Each payload delivered by the host is kept as a fragment; a read copies
//! from the oldest fragment and keeps whatever does not fit for the next
//! read. Writes go straight to the bridge and never block.

use std::collections::VecDeque;
use std::future::{poll_fn, Future};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant, Sleep};
use tracing::{debug, trace};

use crate::bridge::encode_payload;
use crate::common::{Result, VirtualAddr};
use crate::error::{check_host_reply, Error};

use super::registry::{Delivery, PortChannel};
use super::vnet::TransportInner;

/// State shared by a connection and its handles
struct ConnState {
    local: VirtualAddr,
    remote: VirtualAddr,
    inner: Arc<TransportInner>,
    deadline: Mutex<Option<Instant>>,
    wake: mpsc::WeakSender<Delivery>,
    /// A `DeadlineChanged` is queued and not yet seen by the reader
    wake_pending: AtomicBool,
    closed: AtomicBool,
}

impl ConnState {
    fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock()
    }

    fn set_deadline(&self, deadline: Option<std::time::Instant>) {
        *self.deadline.lock() = deadline.map(Instant::from_std);

        // One queued wake is enough; the reader re-reads the deadline after it.
        if self.wake_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let sent = match self.wake.upgrade() {
            // A full channel wakes the reader anyway.
            Some(tx) => tx.try_send(Delivery::DeadlineChanged).is_ok(),
            None => false,
        };
        if !sent {
            self.wake_pending.store(false, Ordering::SeqCst);
        }
    }

    /// Clear a deadline that fired, unless it was replaced in the meantime.
    fn expire_deadline(&self, fired: Instant) {
        let mut deadline = self.deadline.lock();
        if *deadline == Some(fired) {
            *deadline = None;
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let port = self.local.port();
        check_host_reply(self.inner.bridge.write(port, &encode_payload(buf)))?;
        trace!("[{}] wrote {} bytes", port, buf.len());

        Ok(buf.len())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let port = self.local.port();
        let reply = self.inner.bridge.close(port);

        if let Some(tx) = self.wake.upgrade() {
            self.inner.ports.remove_receiver_if_same(port, &tx);
        }
        debug!("Closed connection {} -> {}", self.local, self.remote);

        check_host_reply(reply)
    }
}

/// A virtual stream connection between two bridge ports.
///
/// `read` needs `&mut self`; use [`Connection::handle`] to close the
/// connection or move its deadline from another task while a read is
/// blocked. Dropping an open connection closes it.
pub struct Connection {
    state: Arc<ConnState>,
    receiver: mpsc::Receiver<Delivery>,
    pending: VecDeque<Bytes>,
    timer: Option<Pin<Box<Sleep>>>,
}

impl Connection {
    pub(crate) fn new(
        local: VirtualAddr,
        remote: VirtualAddr,
        inner: Arc<TransportInner>,
        channel: PortChannel,
    ) -> Self {
        Self {
            state: Arc::new(ConnState {
                local,
                remote,
                inner,
                deadline: Mutex::new(None),
                wake: channel.wake,
                wake_pending: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
            receiver: channel.receiver,
            pending: VecDeque::new(),
            timer: None,
        }
    }

    /// Read into `buf`, waiting until at least one byte is available.
    ///
    /// Returns `Ok(0)` once the connection is closed (locally or by the
    /// host) and all delivered data has been consumed, and
    /// [`Error::Timeout`] when the read deadline passes first.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        poll_fn(|cx| self.poll_read_priv(cx, buf)).await
    }

    /// Hand `buf` to the host in one bridge call.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.state.write(buf)
    }

    pub fn close(&self) -> Result<()> {
        self.state.close()
    }

    /// Set the read deadline; `None` waits forever. Also wakes a blocked read.
    pub fn set_deadline(&self, deadline: Option<std::time::Instant>) {
        self.state.set_deadline(deadline);
    }

    pub fn set_read_deadline(&self, deadline: Option<std::time::Instant>) {
        self.state.set_deadline(deadline);
    }

    /// Accepted for API parity; writes never block.
    pub fn set_write_deadline(&self, _deadline: Option<std::time::Instant>) {}

    pub fn local_addr(&self) -> VirtualAddr {
        self.state.local
    }

    pub fn remote_addr(&self) -> VirtualAddr {
        self.state.remote
    }

    /// Control half usable while another task is reading.
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn poll_read_priv(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        loop {
            if let Some(head) = self.pending.front_mut() {
                let n = head.len().min(buf.len());
                buf[..n].copy_from_slice(&head[..n]);
                head.advance(n);
                if head.is_empty() {
                    self.pending.pop_front();
                }
                return Poll::Ready(Ok(n));
            }

            match self.state.deadline() {
                Some(deadline) if deadline <= Instant::now() => {
                    self.state.expire_deadline(deadline);
                    self.timer = None;
                    return Poll::Ready(Err(Error::Timeout));
                }
                Some(deadline) => self.arm_timer(deadline),
                None => self.timer = None,
            }

            match self.receiver.poll_recv(cx) {
                Poll::Ready(Some(Delivery::Data(data))) => {
                    if !data.is_empty() {
                        self.pending.push_back(data);
                    }
                    continue;
                }
                Poll::Ready(Some(Delivery::DeadlineChanged)) => {
                    self.state.wake_pending.store(false, Ordering::SeqCst);
                    continue;
                }
                Poll::Ready(None) => return Poll::Ready(Ok(0)),
                Poll::Pending => {}
            }

            if let Some(timer) = self.timer.as_mut() {
                if timer.as_mut().poll(cx).is_ready() {
                    let fired = timer.deadline();
                    self.timer = None;
                    self.state.expire_deadline(fired);
                    return Poll::Ready(Err(Error::Timeout));
                }
            }

            return Poll::Pending;
        }
    }

    fn arm_timer(&mut self, deadline: Instant) {
        match self.timer.as_mut() {
            Some(timer) if timer.deadline() == deadline => {}
            Some(timer) => timer.as_mut().reset(deadline),
            None => self.timer = Some(Box::pin(sleep_until(deadline))),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("local", &self.state.local)
            .field("remote", &self.state.remote)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.state.closed.load(Ordering::SeqCst) {
            if let Err(e) = self.state.close() {
                debug!("Close on drop of {} failed: {}", self.state.local, e);
            }
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.poll_read_priv(cx, buf.initialize_unfilled()) {
            Poll::Ready(Ok(n)) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(self.state.write(buf).map_err(Into::into))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(self.state.close().map_err(Into::into))
    }
}

/// Clone-able control half of a [`Connection`].
#[derive(Clone)]
pub struct ConnectionHandle {
    state: Arc<ConnState>,
}

impl ConnectionHandle {
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.state.write(buf)
    }

    /// Close the connection; a read blocked on it returns `Ok(0)`.
    pub fn close(&self) -> Result<()> {
        self.state.close()
    }

    pub fn set_deadline(&self, deadline: Option<std::time::Instant>) {
        self.state.set_deadline(deadline);
    }

    pub fn set_read_deadline(&self, deadline: Option<std::time::Instant>) {
        self.state.set_deadline(deadline);
    }

    pub fn set_write_deadline(&self, _deadline: Option<std::time::Instant>) {}

    pub fn local_addr(&self) -> VirtualAddr {
        self.state.local
    }

    pub fn remote_addr(&self) -> VirtualAddr {
        self.state.remote
    }
}
