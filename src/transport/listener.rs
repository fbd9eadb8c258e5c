//! Virtual listener: accepts connections pushed by the host's acceptor callback

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::common::{Address, IntoStream, Result, Stream, VirtualAddr};
use crate::error::{check_host_reply, Error};

use super::conn::Connection;
use super::registry::{AcceptEvent, ListenChannel};
use super::vnet::TransportInner;
use super::Listener;

/// Listener bound to one virtual port. Dropping an open listener closes it.
pub struct VirtualListener {
    addr: VirtualAddr,
    inner: Arc<TransportInner>,
    events: Mutex<mpsc::Receiver<AcceptEvent>>,
    registration: mpsc::WeakSender<AcceptEvent>,
    closed: AtomicBool,
}

impl VirtualListener {
    pub(crate) fn new(port: u16, inner: Arc<TransportInner>, channel: ListenChannel) -> Self {
        Self {
            addr: VirtualAddr::new(port),
            inner,
            events: Mutex::new(channel.receiver),
            registration: channel.registration,
            closed: AtomicBool::new(false),
        }
    }

    /// Wait for the next inbound connection.
    ///
    /// Fails with [`Error::ListenerClosed`] once the listener is closed.
    pub async fn accept(&self) -> Result<Connection> {
        let port = self.addr.port();
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ListenerClosed(port));
        }

        let mut events = self.events.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            reject_pending(&self.inner, &mut events);
            return Err(Error::ListenerClosed(port));
        }

        match events.recv().await {
            // Handshakes that land after close are hung up
            Some(event) if self.closed.load(Ordering::SeqCst) => {
                reject(&self.inner, event);
                reject_pending(&self.inner, &mut events);
                Err(Error::ListenerClosed(port))
            }
            Some(event) => {
                let local = VirtualAddr::new(event.server_port);
                let remote = VirtualAddr::new(event.client_port);
                debug!("Accepted {} <- {} on {}", local, remote, self.addr);
                Ok(Connection::new(local, remote, Arc::clone(&self.inner), event.channel))
            }
            None => Err(Error::ListenerClosed(port)),
        }
    }

    /// Stop listening. A blocked `accept` fails; closing twice is an error.
    ///
    /// Connections the host already paired but nobody accepted are closed.
    pub fn close(&self) -> Result<()> {
        let port = self.addr.port();
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::ListenerClosed(port));
        }

        let reply = self.inner.bridge.close(port);
        if let Some(tx) = self.registration.upgrade() {
            self.inner.ports.remove_listener_if_same(port, &tx);
        }

        // A blocked accept holds the queue; it rejects what arrives instead.
        if let Ok(mut events) = self.events.try_lock() {
            events.close();
            reject_pending(&self.inner, &mut events);
        }
        debug!("Stopped listening on {}", self.addr);

        check_host_reply(reply)
    }

    pub fn local_addr(&self) -> VirtualAddr {
        self.addr
    }
}

impl std::fmt::Debug for VirtualListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualListener")
            .field("addr", &self.addr)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Drop for VirtualListener {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            if let Err(e) = self.close() {
                debug!("Close on drop of listener {} failed: {}", self.addr, e);
            }
        }

        // Anything queued behind an accept that was cancelled
        let events = self.events.get_mut();
        events.close();
        reject_pending(&self.inner, events);
    }
}

fn reject_pending(inner: &Arc<TransportInner>, events: &mut mpsc::Receiver<AcceptEvent>) {
    while let Ok(event) = events.try_recv() {
        reject(inner, event);
    }
}

/// Hang up a paired connection that will never be accepted.
fn reject(inner: &Arc<TransportInner>, event: AcceptEvent) {
    let local = VirtualAddr::new(event.server_port);
    let conn = Connection::new(
        local,
        VirtualAddr::new(event.client_port),
        Arc::clone(inner),
        event.channel,
    );
    if let Err(e) = conn.close() {
        debug!("Hang-up of unaccepted {} failed: {}", local, e);
    }
}

#[async_trait]
impl Listener for VirtualListener {
    async fn accept(&self) -> Result<(Stream, Address)> {
        let conn = VirtualListener::accept(self).await?;
        let remote = Address::from(conn.remote_addr());
        Ok((conn.into_stream(), remote))
    }

    fn local_addr(&self) -> Result<Address> {
        Ok(Address::from(self.addr))
    }

    async fn close(&self) -> Result<()> {
        VirtualListener::close(self)
    }
}
