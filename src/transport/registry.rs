//! Port and correlation registries
//!
//! Both tables belong to one [`BridgeTransport`](super::BridgeTransport)
//! instance. Entries are created and removed under the table's lock; sending
//! on a channel taken out of a table happens after the lock is released.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::common::Result;
use crate::error::Error;

/// Item carried by a port's data channel
#[derive(Debug)]
pub(crate) enum Delivery {
    /// Payload fragment decoded from a `receiver` callback
    Data(Bytes),
    /// Wakes a blocked reader so it re-reads the deadline; carries no data
    DeadlineChanged,
}

/// Receiving end of a freshly registered port.
///
/// `wake` never keeps the channel open: only the registry holds a strong
/// sender, so removing the entry is what ends the stream.
#[derive(Debug)]
pub(crate) struct PortChannel {
    pub receiver: mpsc::Receiver<Delivery>,
    pub wake: mpsc::WeakSender<Delivery>,
}

/// Receiving end of a listener's accept channel
#[derive(Debug)]
pub(crate) struct ListenChannel {
    pub receiver: mpsc::Receiver<AcceptEvent>,
    pub registration: mpsc::WeakSender<AcceptEvent>,
}

/// Inbound connection handed from the accept callback to `accept()`
#[derive(Debug)]
pub(crate) struct AcceptEvent {
    pub server_port: u16,
    pub client_port: u16,
    pub channel: PortChannel,
}

/// Successful connect handshake handed from the reply callback to `dial()`
#[derive(Debug)]
pub(crate) struct Connected {
    pub server_port: u16,
    pub client_port: u16,
    pub channel: PortChannel,
}

pub(crate) type ConnectOutcome = Result<Connected>;

/// Local port → data channel, listen port → accept channel
pub(crate) struct PortRegistry {
    receivers: Mutex<HashMap<u16, mpsc::Sender<Delivery>>>,
    accepters: Mutex<HashMap<u16, mpsc::Sender<AcceptEvent>>>,
    receive_buffer: usize,
    accept_buffer: usize,
}

impl PortRegistry {
    pub fn new(receive_buffer: usize, accept_buffer: usize) -> Self {
        Self {
            receivers: Mutex::new(HashMap::new()),
            accepters: Mutex::new(HashMap::new()),
            receive_buffer: receive_buffer.max(1),
            accept_buffer: accept_buffer.max(1),
        }
    }

    /// Register a data channel for a newly opened local port.
    pub fn register_receiver(&self, port: u16) -> Result<PortChannel> {
        let mut receivers = self.receivers.lock();
        if receivers.contains_key(&port) {
            return Err(Error::AddrInUse(port));
        }

        let (tx, rx) = mpsc::channel(self.receive_buffer);
        let wake = tx.downgrade();
        receivers.insert(port, tx);

        Ok(PortChannel { receiver: rx, wake })
    }

    pub fn receiver(&self, port: u16) -> Option<mpsc::Sender<Delivery>> {
        self.receivers.lock().get(&port).cloned()
    }

    /// Remove the data channel of `port`; pending reads observe end-of-stream.
    pub fn remove_receiver(&self, port: u16) -> bool {
        self.receivers.lock().remove(&port).is_some()
    }

    /// Remove the entry only if it is still the channel `tx` belongs to.
    ///
    /// A port the host already closed may have been handed to a new
    /// connection; the stale owner must not tear that one down.
    pub fn remove_receiver_if_same(&self, port: u16, tx: &mpsc::Sender<Delivery>) -> bool {
        let mut receivers = self.receivers.lock();
        match receivers.get(&port) {
            Some(current) if current.same_channel(tx) => receivers.remove(&port).is_some(),
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn is_receiving(&self, port: u16) -> bool {
        self.receivers.lock().contains_key(&port)
    }

    /// Claim `port` for a listener. Fails if a listener already owns it.
    pub fn reserve_listener(&self, port: u16) -> Result<ListenChannel> {
        let mut accepters = self.accepters.lock();
        if accepters.contains_key(&port) {
            return Err(Error::AddrInUse(port));
        }

        let (tx, rx) = mpsc::channel(self.accept_buffer);
        let registration = tx.downgrade();
        accepters.insert(port, tx);

        Ok(ListenChannel { receiver: rx, registration })
    }

    pub fn accepter(&self, port: u16) -> Option<mpsc::Sender<AcceptEvent>> {
        self.accepters.lock().get(&port).cloned()
    }

    /// Remove the accept channel of `port`; a blocked accept fails.
    pub fn remove_listener(&self, port: u16) -> bool {
        self.accepters.lock().remove(&port).is_some()
    }

    pub fn remove_listener_if_same(&self, port: u16, tx: &mpsc::Sender<AcceptEvent>) -> bool {
        let mut accepters = self.accepters.lock();
        match accepters.get(&port) {
            Some(current) if current.same_channel(tx) => accepters.remove(&port).is_some(),
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn is_listening(&self, port: u16) -> bool {
        self.accepters.lock().contains_key(&port)
    }
}

/// Correlation key → one-shot reply slot of a pending dial
#[derive(Default)]
pub(crate) struct CorrelationRegistry {
    connectors: Mutex<HashMap<u32, oneshot::Sender<ConnectOutcome>>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an unused random key and its reply slot.
    pub fn register(&self) -> (u32, oneshot::Receiver<ConnectOutcome>) {
        let mut connectors = self.connectors.lock();
        let key = loop {
            let key = rand::random::<u32>();
            if !connectors.contains_key(&key) {
                break key;
            }
        };

        let (tx, rx) = oneshot::channel();
        connectors.insert(key, tx);
        (key, rx)
    }

    /// Take the reply slot for `key`. Each key is answered at most once.
    pub fn take(&self, key: u32) -> Option<oneshot::Sender<ConnectOutcome>> {
        self.connectors.lock().remove(&key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.connectors.lock().len()
    }
}
