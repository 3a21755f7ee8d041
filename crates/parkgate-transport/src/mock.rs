//! Scripted in-memory link for testing and development.
//!
//! [`MockLink`] answers each exchange from, in order:
//!
//! 1. the scripted queue (`push_*` on the handle)
//! 2. the responder closure, if one is installed
//! 3. a timeout
//!
//! Every transmitted frame and every RTS transition is recorded and can be
//! inspected through the [`MockLinkHandle`], which stays usable after the
//! link has been moved into a scheduler.

use crate::error::{Result, TransportError};
use crate::link::{Link, RawReply};
use bytes::Bytes;
use parkgate_core::ModuleAddress;
use parkgate_protocol::{Command, Opcode, StatusReport, encode, encode_frame};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

/// What the simulated bus does in answer to one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Raw reply bytes, delivered after `latency`.
    Reply { bytes: Bytes, latency: Duration },
    /// Nothing comes back; the exchange waits out its full timeout.
    Timeout,
    /// The port is gone.
    Unavailable,
    /// Read or write failure.
    Io(std::io::ErrorKind),
}

impl MockResponse {
    /// Well-formed reply with a short fixed latency.
    pub fn reply(bytes: impl Into<Bytes>) -> Self {
        Self::Reply {
            bytes: bytes.into(),
            latency: Duration::from_millis(5),
        }
    }

    /// Status reply from `address`.
    pub fn status(address: ModuleAddress, report: StatusReport) -> Self {
        Self::reply(encode_frame(address, Opcode::Status, &report.to_bytes()))
    }

    /// Echo acknowledging `command`.
    pub fn ack(command: &Command) -> Self {
        Self::reply(encode_frame(command.address(), command.opcode(), &[]))
    }
}

type Responder = Box<dyn FnMut(&Command) -> MockResponse + Send>;

#[derive(Default)]
struct MockState {
    script: VecDeque<MockResponse>,
    responder: Option<Responder>,
    sent: Vec<Command>,
    wire: Vec<Bytes>,
    rts: Vec<bool>,
    reopen_results: VecDeque<bool>,
    reopen_count: usize,
    open: bool,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Simulated half-duplex bus.
///
/// Created together with its [`MockLinkHandle`]; see the module docs for
/// how responses are chosen.
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    pub fn new() -> (Self, MockLinkHandle) {
        let state = Arc::new(Mutex::new(MockState {
            open: true,
            ..MockState::default()
        }));
        let handle = MockLinkHandle {
            state: Arc::clone(&state),
        };
        (Self { state }, handle)
    }

    /// Record one transmission, with the RTS edges around it.
    fn transmit(&self, command: &Command) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(TransportError::port_unavailable("mock", "port closed"));
        }
        state.rts.push(true);
        state.wire.push(encode(command));
        state.sent.push(command.clone());
        state.rts.push(false);
        Ok(())
    }

    fn next_response(&self, command: &Command) -> MockResponse {
        let mut state = lock(&self.state);
        if let Some(response) = state.script.pop_front() {
            return response;
        }
        match state.responder.as_mut() {
            Some(responder) => responder(command),
            None => MockResponse::Timeout,
        }
    }
}

impl Link for MockLink {
    async fn poll(&mut self, command: &Command, timeout: Duration) -> Result<RawReply> {
        self.transmit(command)?;

        match self.next_response(command) {
            MockResponse::Reply { bytes, latency } if latency <= timeout => {
                sleep(latency).await;
                Ok(RawReply::new(bytes, latency))
            }
            MockResponse::Reply { .. } | MockResponse::Timeout => {
                sleep(timeout).await;
                Err(TransportError::timeout(timeout))
            }
            MockResponse::Unavailable => {
                lock(&self.state).open = false;
                Err(TransportError::port_unavailable("mock", "device removed"))
            }
            MockResponse::Io(kind) => Err(std::io::Error::from(kind).into()),
        }
    }

    async fn send_only(&mut self, command: &Command) -> Result<()> {
        self.transmit(command)
    }

    async fn reopen(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.reopen_count += 1;
        let succeeds = state.reopen_results.pop_front().unwrap_or(true);
        state.open = succeeds;
        if succeeds {
            Ok(())
        } else {
            Err(TransportError::port_unavailable("mock", "reopen refused"))
        }
    }
}

/// Handle for scripting and inspecting a [`MockLink`].
#[derive(Clone)]
pub struct MockLinkHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockLinkHandle {
    /// Queue the response to the next exchange.
    pub fn push(&self, response: MockResponse) {
        lock(&self.state).script.push_back(response);
    }

    /// Answer exchanges the script does not cover.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&Command) -> MockResponse + Send + 'static,
    {
        lock(&self.state).responder = Some(Box::new(responder));
    }

    /// Outcome of the next reopen attempt (default: success).
    pub fn push_reopen_result(&self, succeeds: bool) {
        lock(&self.state).reopen_results.push_back(succeeds);
    }

    /// Commands transmitted so far, oldest first.
    pub fn sent(&self) -> Vec<Command> {
        lock(&self.state).sent.clone()
    }

    /// Encoded frames transmitted so far.
    pub fn wire(&self) -> Vec<Bytes> {
        lock(&self.state).wire.clone()
    }

    /// RTS levels in the order they were driven.
    pub fn rts_transitions(&self) -> Vec<bool> {
        lock(&self.state).rts.clone()
    }

    pub fn reopen_count(&self) -> usize {
        lock(&self.state).reopen_count
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Forget recorded traffic, keeping script and responder.
    pub fn clear_log(&self) {
        let mut state = lock(&self.state);
        state.sent.clear();
        state.wire.clear();
        state.rts.clear();
    }
}
