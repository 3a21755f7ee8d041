//! Out-of-band commands from operators and collaborators.
//!
//! A [`ControlHandle`] talks to a running scheduler over an mpsc channel.
//! The scheduler drains the channel between module iterations, so every
//! request is served while the link is idle and each call resolves after
//! at most one module exchange.

use crate::error::ControlError;
use parkgate_core::ModuleAddress;
use parkgate_protocol::{Command, Reply};
use tokio::sync::{mpsc, oneshot};

/// Default depth of the control channel.
pub const CONTROL_CHANNEL_CAPACITY: usize = 32;

pub(crate) type Responder<T> = oneshot::Sender<Result<T, ControlError>>;

#[derive(Debug)]
pub(crate) enum ControlRequest {
    /// Append to the module's queue.
    Enqueue {
        command: Command,
        reply: Responder<()>,
    },
    /// Pulse an output for the module's configured duration.
    Pulse {
        address: ModuleAddress,
        output: u8,
        reply: Responder<()>,
    },
    /// Send now, outside the module's turn.
    Immediate {
        command: Command,
        reply: Responder<Reply>,
    },
}

/// Cloneable handle for queueing commands on a running scheduler.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlRequest>,
}

impl ControlHandle {
    pub(crate) fn new(tx: mpsc::Sender<ControlRequest>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Responder<T>) -> ControlRequest,
    ) -> Result<T, ControlError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| ControlError::Stopped)?;
        response.await.map_err(|_| ControlError::Stopped)?
    }

    /// Queue `command` for its module's next turn.
    ///
    /// # Errors
    /// - `ControlError::Registry` if the module is unknown or offline
    /// - `ControlError::Stopped` if the scheduler is gone
    pub async fn enqueue(&self, command: Command) -> Result<(), ControlError> {
        self.request(|reply| ControlRequest::Enqueue { command, reply })
            .await
    }

    /// Open the barrier (continue sequence).
    pub async fn open(&self, address: ModuleAddress) -> Result<(), ControlError> {
        self.enqueue(Command::continue_sequence(address)).await
    }

    /// Close the barrier (stop sequence).
    pub async fn close(&self, address: ModuleAddress) -> Result<(), ControlError> {
        self.enqueue(Command::stop_sequence(address)).await
    }

    /// Pulse `output` (1-8) for the module's configured pulse duration.
    pub async fn pulse(&self, address: ModuleAddress, output: u8) -> Result<(), ControlError> {
        self.request(|reply| ControlRequest::Pulse {
            address,
            output,
            reply,
        })
        .await
    }

    /// Send `command` between module iterations and return the reply.
    ///
    /// Failures of an immediate exchange are reported to the caller only;
    /// they do not count against the module.
    pub async fn immediate(&self, command: Command) -> Result<Reply, ControlError> {
        self.request(|reply| ControlRequest::Immediate { command, reply })
            .await
    }

    /// Whether the scheduler side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
