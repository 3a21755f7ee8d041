//! Round-robin polling of every module on the link.
//!
//! # Module Iteration
//!
//! Each module's turn runs through the same steps:
//!
//! ```text
//! Idle → Sending → AwaitingReply → Processing → Idle (next module)
//! ```
//!
//! - a timeout, transport error or unusable reply is accounted with
//!   `record_failure` and the scheduler moves to the next module at once
//! - a good reply is accounted with `record_success`; a novelty is validated
//!   and answered with `K1` (allowed) or `K0` (denied), always followed by
//!   `O1` to release the module's buffer
//! - a novelty the module repeats because our answer never reached it (same
//!   identification and module clock) gets the same answer again without a
//!   second validation
//!
//! Between two turns the control channel is drained and the scheduler
//! pauses for `inter_module_pause`. Cancellation is checked before every
//! turn and during the pause, never while a frame is on the wire.
//!
//! # Link Recovery
//!
//! When the registry reports too many consecutive failures across modules
//! the link is reopened. A failed reopen ends [`PollingScheduler::run`]
//! with `SchedulerError::LinkLost`.

use crate::config::PollingConfig;
use crate::control::{CONTROL_CHANNEL_CAPACITY, ControlHandle, ControlRequest};
use crate::error::{ControlError, RegistryError, SchedulerError};
use crate::events::{BusEvent, CommErrorKind, EventBus};
use crate::module::StateDelta;
use crate::registry::ModuleRegistry;
use chrono::{Local, NaiveDateTime, Utc};
use parkgate_access::{
    AccessResult, AccessValidator, CredentialStore, SequenceConfig, SequenceMachine, SequenceState,
    SequenceEvent, SequenceViolation,
};
use parkgate_core::{Identification, ModuleAddress};
use parkgate_protocol::{Command, Novelty, Opcode, Reply, decode_reply};
use parkgate_transport::{Link, TimeoutTable};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Where the scheduler is within a module's turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    #[default]
    Idle,
    Sending,
    AwaitingReply,
    Processing,
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            StepPhase::Idle => "Idle",
            StepPhase::Sending => "Sending",
            StepPhase::AwaitingReply => "AwaitingReply",
            StepPhase::Processing => "Processing",
        };
        f.write_str(phase)
    }
}

/// Outcome of one module turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Replied,
    Failed(CommErrorKind),
}

/// Summary of one pass over every module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub polled: usize,
    pub replies: usize,
    pub failures: usize,
    /// The pass stopped early on cancellation.
    pub cancelled: bool,
}

/// Settings the scheduler needs besides its collaborators.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerSettings {
    pub polling: PollingConfig,
    pub timeouts: TimeoutTable,
    pub sequence: SequenceConfig,
}

/// Last novelty a module was answered for.
#[derive(Debug, Clone)]
struct AnsweredNovelty {
    identification: Identification,
    presented_at: NaiveDateTime,
    answer: Command,
}

impl AnsweredNovelty {
    fn matches(&self, novelty: &Novelty) -> bool {
        novelty.presented_at == Some(self.presented_at)
            && novelty.identification == self.identification
    }
}

/// Cooperative polling loop owning the link.
pub struct PollingScheduler<L, S> {
    link: L,
    registry: ModuleRegistry,
    validator: AccessValidator<S>,
    sequences: HashMap<ModuleAddress, SequenceMachine>,
    answered: HashMap<ModuleAddress, AnsweredNovelty>,
    settings: SchedulerSettings,
    events: EventBus,
    control_tx: mpsc::Sender<ControlRequest>,
    control_rx: mpsc::Receiver<ControlRequest>,
    phase: StepPhase,
}

impl<L: Link, S: CredentialStore> PollingScheduler<L, S> {
    /// Build a scheduler and queue a time sync for every module.
    pub fn new(
        link: L,
        mut registry: ModuleRegistry,
        validator: AccessValidator<S>,
        settings: SchedulerSettings,
        events: EventBus,
    ) -> Self {
        let mut sequences = HashMap::new();
        let addresses = registry.addresses().to_vec();
        for address in addresses {
            if let Ok(module) = registry.config(address)
                && module.requires_ticket
            {
                sequences.insert(address, SequenceMachine::new(settings.sequence));
            }
            queue_time_sync(&mut registry, address);
        }

        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        Self {
            link,
            registry,
            validator,
            sequences,
            answered: HashMap::new(),
            settings,
            events,
            control_tx,
            control_rx,
            phase: StepPhase::Idle,
        }
    }

    pub fn control(&self) -> ControlHandle {
        ControlHandle::new(self.control_tx.clone())
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn validator(&self) -> &AccessValidator<S> {
        &self.validator
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    /// Sequence state of a ticket module, `None` for other modules.
    pub fn sequence_state(&self, address: ModuleAddress) -> Option<SequenceState> {
        self.sequences.get(&address).map(SequenceMachine::state)
    }

    /// Poll until `token` is cancelled or the link is lost.
    ///
    /// # Errors
    /// - `SchedulerError::NoModules` if the registry is empty
    /// - `SchedulerError::LinkLost` if reopening the link fails
    pub async fn run(&mut self, token: CancellationToken) -> Result<(), SchedulerError> {
        if self.registry.is_empty() {
            return Err(SchedulerError::NoModules);
        }
        info!(modules = self.registry.len(), "polling_started");

        let result = loop {
            match self.cycle(Some(&token)).await {
                Ok(report) if report.cancelled => break Ok(()),
                Ok(report) => trace!(?report, "cycle_complete"),
                Err(e) => break Err(e),
            }
        };

        // Pending control calls resolve as Stopped.
        self.control_rx.close();
        while self.control_rx.try_recv().is_ok() {}

        match &result {
            Ok(()) => info!("polling_stopped"),
            Err(e) => error!(error = %e, "polling_halted"),
        }
        result
    }

    /// Poll every module exactly once.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, SchedulerError> {
        if self.registry.is_empty() {
            return Err(SchedulerError::NoModules);
        }
        self.cycle(None).await
    }

    async fn cycle(
        &mut self,
        token: Option<&CancellationToken>,
    ) -> Result<CycleReport, SchedulerError> {
        let mut report = CycleReport::default();
        let addresses = self.registry.addresses().to_vec();

        for (index, address) in addresses.iter().copied().enumerate() {
            if token.is_some_and(CancellationToken::is_cancelled) {
                report.cancelled = true;
                return Ok(report);
            }

            self.drain_control().await;

            match self.poll_module(address).await? {
                StepOutcome::Replied => report.replies += 1,
                StepOutcome::Failed(_) => report.failures += 1,
            }
            report.polled += 1;

            let last = index + 1 == addresses.len();
            if !last || token.is_some() {
                let pause = self.settings.polling.inter_module_pause();
                if !self.pause(pause, token).await {
                    report.cancelled = true;
                    return Ok(report);
                }
            }
        }

        Ok(report)
    }

    /// Sleep between modules. Returns `false` if cancelled meanwhile.
    async fn pause(&self, duration: Duration, token: Option<&CancellationToken>) -> bool {
        if duration.is_zero() {
            return !token.is_some_and(CancellationToken::is_cancelled);
        }
        match token {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => false,
                    _ = sleep(duration) => true,
                }
            }
            None => {
                sleep(duration).await;
                true
            }
        }
    }

    /// One module's turn.
    async fn poll_module(&mut self, address: ModuleAddress) -> Result<StepOutcome, SchedulerError> {
        let command = self.registry.next_command_for(address)?;
        let command = refresh_time_sync(command);
        let timeout = self.settings.timeouts.for_opcode(command.opcode());

        self.phase = StepPhase::Sending;
        trace!(address = %address, command = %command, phase = %self.phase, "module_turn");

        let exchange = self.link.poll(&command, timeout);
        self.phase = StepPhase::AwaitingReply;
        let result = exchange.await;

        self.phase = StepPhase::Processing;
        let outcome = match result {
            Ok(raw) => match interpret(&command, &raw.bytes) {
                Ok(reply) => {
                    self.on_reply(address, reply, raw.elapsed).await?;
                    StepOutcome::Replied
                }
                Err(kind) => {
                    self.on_failure(address, kind).await?;
                    StepOutcome::Failed(kind)
                }
            },
            Err(e) => {
                let kind = CommErrorKind::from(&e);
                debug!(address = %address, command = %command, error = %e, "exchange_failed");
                self.on_failure(address, kind).await?;
                StepOutcome::Failed(kind)
            }
        };

        self.tick_sequence(address);
        self.phase = StepPhase::Idle;
        Ok(outcome)
    }

    async fn on_reply(
        &mut self,
        address: ModuleAddress,
        reply: Reply,
        elapsed: Duration,
    ) -> Result<(), SchedulerError> {
        let delta = self
            .registry
            .record_success(address, reply.status().copied(), elapsed)?;

        if delta.came_online {
            queue_time_sync(&mut self.registry, address);
        }
        if delta.changed() {
            self.publish_state(address, &delta)?;
        }

        match &reply {
            Reply::Novelty(novelty) => self.process_novelty(address, novelty).await?,
            Reply::Ack(opcode) => debug!(address = %address, opcode = %opcode, "command_acknowledged"),
            Reply::Status(_) => {}
        }

        if let Some(status) = reply.status() {
            self.observe_ticket_sensor(address, status.ticket_at_slot);
        }
        Ok(())
    }

    async fn on_failure(
        &mut self,
        address: ModuleAddress,
        kind: CommErrorKind,
    ) -> Result<(), SchedulerError> {
        let outcome = self.registry.record_failure(address)?;
        warn!(
            address = %address,
            kind = %kind,
            consecutive_errors = outcome.consecutive_errors,
            "comm_error"
        );
        self.events.publish(BusEvent::CommError { address, kind });

        if outcome.went_offline {
            if let Some(machine) = self.sequences.get_mut(&address) {
                machine.reset();
            }
            let state = self.registry.state(address)?.snapshot();
            self.events
                .publish(BusEvent::ModuleStateChanged { address, state });
        }

        if outcome.link_reset_required {
            self.reset_link().await?;
        }
        Ok(())
    }

    async fn reset_link(&mut self) -> Result<(), SchedulerError> {
        warn!(
            consecutive_failures = self.registry.stats().consecutive_failures,
            "link_reset"
        );
        match self.link.reopen().await {
            Ok(()) => {
                self.registry.link_reset();
                info!("link_reopened");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "link_lost");
                Err(SchedulerError::LinkLost {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Validate a presented identification and answer the module.
    async fn process_novelty(
        &mut self,
        address: ModuleAddress,
        novelty: &Novelty,
    ) -> Result<(), SchedulerError> {
        if let Some(previous) = self.answered.get(&address)
            && previous.matches(novelty)
        {
            let answer = previous.answer.clone();
            info!(
                address = %address,
                identification = %novelty.identification,
                answer = %answer.opcode(),
                "novelty_answer_repeated"
            );
            if answer.opcode() == Opcode::ContinueSequence {
                self.present_ticket(address);
            }
            self.queue_novelty_answer(address, answer);
            return Ok(());
        }

        let module = self.registry.config(address)?.clone();
        let point = module.access_point();
        info!(
            address = %address,
            identification = %novelty.identification,
            presented_at = ?novelty.presented_at,
            "novelty_received"
        );

        let answer = match self
            .validator
            .validate_and_commit(&novelty.identification, &point, Utc::now())
            .await
        {
            Ok(decision) => match decision.result {
                AccessResult::Allowed => {
                    if let Some(movement_id) = decision.movement_id {
                        self.events.publish(BusEvent::MovementDetected {
                            identification: novelty.identification.clone(),
                            module_id: module.id,
                            movement_id,
                            direction: module.direction,
                        });
                    }
                    self.present_ticket(address);
                    Command::continue_sequence(address)
                }
                AccessResult::Denied(reason) => {
                    warn!(
                        address = %address,
                        identification = %novelty.identification,
                        reason = %reason,
                        "access_denied"
                    );
                    self.events.publish(BusEvent::AccessDenied {
                        identification: novelty.identification.clone(),
                        module_id: module.id,
                        reason,
                    });
                    Command::stop_sequence(address)
                }
            },
            Err(e) => {
                // The barrier stays closed while the store is unavailable.
                error!(
                    address = %address,
                    identification = %novelty.identification,
                    error = %e,
                    "validation_failed"
                );
                Command::stop_sequence(address)
            }
        };

        if let Some(presented_at) = novelty.presented_at {
            self.answered.insert(
                address,
                AnsweredNovelty {
                    identification: novelty.identification.clone(),
                    presented_at,
                    answer: answer.clone(),
                },
            );
        }
        self.queue_novelty_answer(address, answer);
        Ok(())
    }

    /// Queue `answer` followed by the novelty acknowledgement.
    fn queue_novelty_answer(&mut self, address: ModuleAddress, answer: Command) {
        for command in [answer, Command::ack_novelty(address)] {
            if let Err(e) = self.registry.enqueue(address, command) {
                warn!(address = %address, error = %e, "novelty_answer_not_queued");
            }
        }
    }

    fn present_ticket(&mut self, address: ModuleAddress) {
        if let Some(machine) = self.sequences.get_mut(&address)
            && let Err(violation) = machine.present(Instant::now().into_std())
        {
            report_violation(&self.events, address, violation);
        }
    }

    fn observe_ticket_sensor(&mut self, address: ModuleAddress, ticket_at_slot: bool) {
        let Some(machine) = self.sequences.get_mut(&address) else {
            return;
        };
        match machine.observe_ticket_sensor(ticket_at_slot, Instant::now().into_std()) {
            Ok(Some(transition)) => debug!(
                address = %address,
                from = %transition.from,
                to = %transition.to,
                "sequence_transition"
            ),
            Ok(None) => {}
            Err(violation) => report_violation(&self.events, address, violation),
        }
    }

    fn tick_sequence(&mut self, address: ModuleAddress) {
        let Some(transition) = self
            .sequences
            .get_mut(&address)
            .and_then(|machine| machine.tick(Instant::now().into_std()))
        else {
            return;
        };
        if transition.event == SequenceEvent::Abandoned {
            warn!(address = %address, from = %transition.from, "sequence_abandoned");
        } else {
            debug!(
                address = %address,
                from = %transition.from,
                to = %transition.to,
                "sequence_transition"
            );
        }
    }

    fn publish_state(&self, address: ModuleAddress, delta: &StateDelta) -> Result<(), RegistryError> {
        let state = self.registry.state(address)?.snapshot();
        if let Some(current) = delta.current {
            debug!(
                address = %address,
                barrier = ?current.barrier,
                loop_occupied = current.loop_occupied,
                ticket_at_slot = current.ticket_at_slot,
                "module_status"
            );
        }
        self.events
            .publish(BusEvent::ModuleStateChanged { address, state });
        Ok(())
    }

    /// Serve every queued control request.
    async fn drain_control(&mut self) {
        while let Ok(request) = self.control_rx.try_recv() {
            match request {
                ControlRequest::Enqueue { command, reply } => {
                    let result = self
                        .registry
                        .enqueue(command.address(), command)
                        .map_err(ControlError::from);
                    let _ = reply.send(result);
                }
                ControlRequest::Pulse {
                    address,
                    output,
                    reply,
                } => {
                    let _ = reply.send(self.queue_pulse(address, output));
                }
                ControlRequest::Immediate { command, reply } => {
                    let result = self.immediate(&command).await;
                    let _ = reply.send(result);
                }
            }
        }
    }

    fn queue_pulse(&mut self, address: ModuleAddress, output: u8) -> Result<(), ControlError> {
        let duration_ms = self.registry.config(address)?.pulse_ms;
        let command = Command::pulse(address, output, duration_ms)?;
        self.registry.enqueue(address, command)?;
        Ok(())
    }

    async fn immediate(&mut self, command: &Command) -> Result<Reply, ControlError> {
        let address = command.address();
        self.registry.config(address)?;

        let timeout = self.settings.timeouts.for_opcode(command.opcode());
        info!(address = %address, command = %command, "immediate_command");
        let raw = self
            .link
            .poll(command, timeout)
            .await
            .map_err(|e| ControlError::Exchange(CommErrorKind::from(&e)))?;
        interpret(command, &raw.bytes).map_err(ControlError::Exchange)
    }
}

fn report_violation(events: &EventBus, address: ModuleAddress, violation: SequenceViolation) {
    warn!(
        address = %address,
        from = %violation.from,
        observed = %violation.observed,
        "sequence_violation"
    );
    events.publish(BusEvent::SequenceViolation {
        address,
        from: violation.from,
        observed: violation.observed,
    });
}

fn queue_time_sync(registry: &mut ModuleRegistry, address: ModuleAddress) {
    let command = Command::set_time(address, Local::now().naive_local());
    if let Err(e) = registry.enqueue(address, command) {
        warn!(address = %address, error = %e, "time_sync_not_queued");
    }
}

/// A queued `T0` carries the clock at transmission, not at queueing.
fn refresh_time_sync(command: Command) -> Command {
    if command.opcode() == Opcode::SetTime {
        Command::set_time(command.address(), Local::now().naive_local())
    } else {
        command
    }
}

/// Decode a reply and check that it answers `command`.
fn interpret(command: &Command, bytes: &[u8]) -> Result<Reply, CommErrorKind> {
    let frame = decode_reply(bytes).map_err(|e| {
        debug!(address = %command.address(), error = %e, "reply_rejected");
        CommErrorKind::from(&e)
    })?;

    if frame.address != command.address() {
        debug!(
            expected = %command.address(),
            actual = %frame.address,
            "reply_from_wrong_address"
        );
        return Err(CommErrorKind::WrongAddress);
    }
    if !command.opcode().accepts_reply(frame.opcode) {
        debug!(
            address = %frame.address,
            sent = %command.opcode(),
            received = %frame.opcode,
            "reply_opcode_mismatch"
        );
        return Err(CommErrorKind::UnexpectedReply);
    }

    Reply::from_frame(&frame).map_err(|e| CommErrorKind::from(&e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parkgate_protocol::{StatusReport, encode_frame};
    use rstest::rstest;

    fn addr(n: u8) -> ModuleAddress {
        ModuleAddress::new(n).unwrap()
    }

    #[rstest]
    #[case(encode_frame(addr(1), Opcode::Status, &[0, 0]).to_vec(), Ok(Opcode::Status))]
    #[case(encode_frame(addr(2), Opcode::Status, &[0, 0]).to_vec(), Err(CommErrorKind::WrongAddress))]
    #[case(encode_frame(addr(1), Opcode::AckNovelty, &[]).to_vec(), Err(CommErrorKind::UnexpectedReply))]
    #[case(b"\x0201S0\x00\x00\x03FF".to_vec(), Err(CommErrorKind::Frame))]
    fn test_interpret_status_read(
        #[case] bytes: Vec<u8>,
        #[case] expected: Result<Opcode, CommErrorKind>,
    ) {
        let result = interpret(&Command::status(addr(1)), &bytes).map(|reply| match reply {
            Reply::Status(_) => Opcode::Status,
            Reply::Novelty(_) => Opcode::StatusNovelty,
            Reply::Ack(opcode) => opcode,
        });
        assert_eq!(result, expected);
    }

    #[test]
    fn test_interpret_ack() {
        let command = Command::continue_sequence(addr(4));
        let bytes = encode_frame(addr(4), Opcode::ContinueSequence, &[]);
        assert_eq!(
            interpret(&command, &bytes),
            Ok(Reply::Ack(Opcode::ContinueSequence))
        );
    }

    #[test]
    fn test_status_reply_carries_report() {
        let report = StatusReport {
            ticket_at_slot: true,
            ..StatusReport::default()
        };
        let bytes = encode_frame(addr(1), Opcode::Status, &report.to_bytes());
        let reply = interpret(&Command::status(addr(1)), &bytes).unwrap();
        assert_eq!(reply.status(), Some(&report));
    }

    #[test]
    fn test_refresh_time_sync_keeps_other_commands() {
        let command = Command::ack_novelty(addr(1));
        assert_eq!(refresh_time_sync(command.clone()), command);

        let stale = Command::set_time(
            addr(1),
            chrono::NaiveDate::from_ymd_opt(2000, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        );
        let fresh = refresh_time_sync(stale.clone());
        assert_eq!(fresh.opcode(), Opcode::SetTime);
        assert_ne!(fresh.payload(), stale.payload());
    }
}
