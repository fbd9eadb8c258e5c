//! Recording host used by unit tests that play the host by hand.

use parking_lot::Mutex;

use super::{HostBridge, HostReply};

/// A bridge call as observed by the fake host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Listen(u16),
    Connect(u32, u16),
    Write(u16, String),
    Close(u16),
}

/// Records every call and answers with a configurable error.
#[derive(Default)]
pub struct RecordingBridge {
    calls: Mutex<Vec<Call>>,
    fail_with: Mutex<Option<String>>,
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with `msg`.
    pub fn fail_with(&self, msg: &str) {
        *self.fail_with.lock() = Some(msg.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Correlation key of the most recent connect call
    pub fn last_connect_key(&self) -> Option<u32> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            Call::Connect(key, _) => Some(*key),
            _ => None,
        })
    }

    fn record(&self, call: Call) -> HostReply {
        self.calls.lock().push(call);
        match self.fail_with.lock().clone() {
            Some(msg) => Err(msg),
            None => Ok(()),
        }
    }
}

impl HostBridge for RecordingBridge {
    fn listen(&self, port: u16) -> HostReply {
        self.record(Call::Listen(port))
    }

    fn connect(&self, key: u32, port: u16) -> HostReply {
        self.record(Call::Connect(key, port))
    }

    fn write(&self, port: u16, payload: &str) -> HostReply {
        self.record(Call::Write(port, payload.to_string()))
    }

    fn close(&self, port: u16) -> HostReply {
        self.record(Call::Close(port))
    }
}
