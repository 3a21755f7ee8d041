//! Ticket sequence state machine.
//!
//! One machine per module that requires ticket validation. It follows a
//! ticket from the moment its credential is granted until the slot has been
//! clear for the settle delay.
//!
//! # States
//!
//! - `NoSequence`: nothing in progress
//! - `TicketPresented`: credential granted, waiting for the ticket to seat
//! - `TicketAtSlot`: the slot sensor confirms the ticket
//! - `TicketWithdrawn`: the slot sensor cleared, settling
//!
//! # Valid Transitions
//!
//! - NoSequence → TicketPresented → TicketAtSlot → TicketWithdrawn → NoSequence
//! - TicketPresented → NoSequence when no ticket seats within the
//!   presentation timeout
//!
//! A slot sensor that already reads occupied when the grant arrives, or at
//! any later status read while `TicketPresented`, seats the ticket.
//!
//! Any other edge is a [`SequenceViolation`] and leaves the state unchanged.
//!
//! # Examples
//!
//! ```
//! use parkgate_access::{SequenceConfig, SequenceMachine, SequenceState};
//! use std::time::{Duration, Instant};
//!
//! let mut machine = SequenceMachine::new(SequenceConfig::default());
//! let t0 = Instant::now();
//!
//! machine.observe_ticket_sensor(false, t0).unwrap();
//! machine.present(t0).unwrap();
//! machine.observe_ticket_sensor(true, t0).unwrap();
//! machine.observe_ticket_sensor(false, t0).unwrap();
//! assert_eq!(machine.state(), SequenceState::TicketWithdrawn);
//!
//! machine.tick(t0 + Duration::from_secs(2));
//! assert_eq!(machine.state(), SequenceState::NoSequence);
//! ```

use parkgate_core::constants::{DEFAULT_PRESENTED_TIMEOUT_MS, DEFAULT_SETTLE_DELAY_MS};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Maximum number of transitions kept per machine.
///
/// A complete sequence is four transitions, so this holds the last 16
/// tickets at a module.
pub const MAX_HISTORY_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceState {
    #[default]
    NoSequence,
    TicketPresented,
    TicketAtSlot,
    TicketWithdrawn,
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            SequenceState::NoSequence => "NoSequence",
            SequenceState::TicketPresented => "TicketPresented",
            SequenceState::TicketAtSlot => "TicketAtSlot",
            SequenceState::TicketWithdrawn => "TicketWithdrawn",
        };
        write!(f, "{state_str}")
    }
}

impl SequenceState {
    /// Check if a transition to `target` is allowed from this state.
    ///
    /// ```
    /// use parkgate_access::SequenceState;
    ///
    /// assert!(SequenceState::NoSequence.can_transition_to(&SequenceState::TicketPresented));
    /// assert!(!SequenceState::NoSequence.can_transition_to(&SequenceState::TicketWithdrawn));
    /// ```
    pub fn can_transition_to(&self, target: &SequenceState) -> bool {
        matches!(
            (self, target),
            (SequenceState::NoSequence, SequenceState::TicketPresented)
                | (SequenceState::TicketPresented, SequenceState::TicketAtSlot)
                | (SequenceState::TicketAtSlot, SequenceState::TicketWithdrawn)
                | (SequenceState::TicketWithdrawn, SequenceState::NoSequence)
                | (SequenceState::TicketPresented, SequenceState::NoSequence)
        )
    }

    /// Check if `event` is legal in this state.
    pub fn accepts(&self, event: SequenceEvent) -> bool {
        matches!(
            (self, event),
            (SequenceState::NoSequence, SequenceEvent::CredentialGranted)
                | (SequenceState::TicketPresented, SequenceEvent::TicketSeated)
                | (SequenceState::TicketPresented, SequenceEvent::Abandoned)
                | (SequenceState::TicketAtSlot, SequenceEvent::TicketCleared)
                | (SequenceState::TicketWithdrawn, SequenceEvent::Settled)
        )
    }
}

/// Something observed at the module that may move the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceEvent {
    /// A presented credential was granted.
    CredentialGranted,
    /// The slot sensor went from clear to occupied.
    TicketSeated,
    /// The slot sensor went from occupied to clear.
    TicketCleared,
    /// The settle delay ran out.
    Settled,
    /// No ticket reached the slot within the presentation timeout.
    Abandoned,
}

impl SequenceEvent {
    /// State this event leads to when legal.
    pub fn target(self) -> SequenceState {
        match self {
            SequenceEvent::CredentialGranted => SequenceState::TicketPresented,
            SequenceEvent::TicketSeated => SequenceState::TicketAtSlot,
            SequenceEvent::TicketCleared => SequenceState::TicketWithdrawn,
            SequenceEvent::Settled | SequenceEvent::Abandoned => SequenceState::NoSequence,
        }
    }
}

impl fmt::Display for SequenceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let event_str = match self {
            SequenceEvent::CredentialGranted => "CredentialGranted",
            SequenceEvent::TicketSeated => "TicketSeated",
            SequenceEvent::TicketCleared => "TicketCleared",
            SequenceEvent::Settled => "Settled",
            SequenceEvent::Abandoned => "Abandoned",
        };
        write!(f, "{event_str}")
    }
}

/// An event that is not legal in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("Sequence violation: {observed} observed in {from}")]
pub struct SequenceViolation {
    pub from: SequenceState,
    pub observed: SequenceEvent,
}

/// One applied transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SequenceTransition {
    pub from: SequenceState,
    pub to: SequenceState,
    pub event: SequenceEvent,
    /// Process-local; not serialized.
    #[serde(skip)]
    pub at: Option<Instant>,
}

/// Settings from the `[sequence]` table of the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceConfig {
    /// Time the slot must stay clear before a new sequence may start.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Time a granted sequence waits for the ticket before it is abandoned.
    #[serde(default = "default_presented_timeout_ms")]
    pub presented_timeout_ms: u64,
}

fn default_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}

fn default_presented_timeout_ms() -> u64 {
    DEFAULT_PRESENTED_TIMEOUT_MS
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            presented_timeout_ms: DEFAULT_PRESENTED_TIMEOUT_MS,
        }
    }
}

impl SequenceConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn presented_timeout(&self) -> Duration {
        Duration::from_millis(self.presented_timeout_ms)
    }
}

/// Ticket sequence tracker for one module.
///
/// Time is passed in by the caller so the machine works the same under a
/// paused test clock.
#[derive(Debug, Clone)]
pub struct SequenceMachine {
    state: SequenceState,
    entered_at: Option<Instant>,
    /// Last slot sensor reading, `None` until the first status arrives.
    ticket_sensor: Option<bool>,
    settle_delay: Duration,
    presented_timeout: Duration,
    history: VecDeque<SequenceTransition>,
}

impl Default for SequenceMachine {
    fn default() -> Self {
        Self::new(SequenceConfig::default())
    }
}

impl SequenceMachine {
    pub fn new(config: SequenceConfig) -> Self {
        Self {
            state: SequenceState::NoSequence,
            entered_at: None,
            ticket_sensor: None,
            settle_delay: config.settle_delay(),
            presented_timeout: config.presented_timeout(),
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    /// Transitions applied so far, oldest first.
    pub fn history(&self) -> &VecDeque<SequenceTransition> {
        &self.history
    }

    /// Time spent in the current state, zero if it was never entered by a
    /// transition.
    pub fn time_in_state(&self, now: Instant) -> Duration {
        self.entered_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default()
    }

    /// Apply `event`.
    ///
    /// # Errors
    /// Returns `SequenceViolation` if the event is not legal in the current
    /// state. The state is left unchanged.
    pub fn apply(
        &mut self,
        event: SequenceEvent,
        now: Instant,
    ) -> Result<SequenceTransition, SequenceViolation> {
        let target = event.target();
        if !self.state.accepts(event) {
            return Err(SequenceViolation {
                from: self.state,
                observed: event,
            });
        }

        let transition = SequenceTransition {
            from: self.state,
            to: target,
            event,
            at: Some(now),
        };
        self.state = target;
        self.entered_at = Some(now);

        if self.history.len() >= MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(transition);

        Ok(transition)
    }

    /// A credential presented at this module was granted.
    ///
    /// If the last slot reading was occupied the ticket is seated at once and
    /// the returned transition is the one into `TicketAtSlot`.
    pub fn present(&mut self, now: Instant) -> Result<SequenceTransition, SequenceViolation> {
        let granted = self.apply(SequenceEvent::CredentialGranted, now)?;
        if self.ticket_sensor == Some(true) {
            return self.apply(SequenceEvent::TicketSeated, now);
        }
        Ok(granted)
    }

    /// Feed the slot sensor flag from a status report.
    ///
    /// Outside `TicketPresented` only edges count: a reading equal to the
    /// previous one is `Ok(None)`, and so is the very first reading. While
    /// `TicketPresented`, any occupied reading seats the ticket. The reading
    /// is remembered even when the edge it forms is a violation.
    pub fn observe_ticket_sensor(
        &mut self,
        ticket_at_slot: bool,
        now: Instant,
    ) -> Result<Option<SequenceTransition>, SequenceViolation> {
        let previous = self.ticket_sensor.replace(ticket_at_slot);
        let event = match (previous, ticket_at_slot) {
            (_, true) if self.state == SequenceState::TicketPresented => {
                SequenceEvent::TicketSeated
            }
            (Some(false), true) => SequenceEvent::TicketSeated,
            (Some(true), false) => SequenceEvent::TicketCleared,
            _ => return Ok(None),
        };
        self.apply(event, now).map(Some)
    }

    /// Complete a withdrawn sequence once the settle delay has passed, or
    /// abandon a granted one whose ticket never seated.
    pub fn tick(&mut self, now: Instant) -> Option<SequenceTransition> {
        let event = match self.state {
            SequenceState::TicketWithdrawn if self.time_in_state(now) >= self.settle_delay => {
                SequenceEvent::Settled
            }
            SequenceState::TicketPresented
                if self.time_in_state(now) >= self.presented_timeout =>
            {
                SequenceEvent::Abandoned
            }
            _ => return None,
        };
        self.apply(event, now).ok()
    }

    /// Abandon any sequence in progress, keeping the history.
    pub fn reset(&mut self) {
        self.state = SequenceState::NoSequence;
        self.entered_at = None;
        self.ticket_sensor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn full_sequence(machine: &mut SequenceMachine, t0: Instant) {
        machine.observe_ticket_sensor(false, t0).unwrap();
        machine.present(t0).unwrap();
        machine
            .observe_ticket_sensor(true, t0 + Duration::from_millis(500))
            .unwrap();
        machine
            .observe_ticket_sensor(false, t0 + Duration::from_secs(1))
            .unwrap();
    }

    #[test]
    fn test_initial_state() {
        let machine = SequenceMachine::default();
        assert_eq!(machine.state(), SequenceState::NoSequence);
        assert!(machine.history().is_empty());
    }

    #[test]
    fn test_full_sequence_and_settle() {
        let mut machine = SequenceMachine::default();
        let t0 = Instant::now();
        full_sequence(&mut machine, t0);
        assert_eq!(machine.state(), SequenceState::TicketWithdrawn);

        // Withdrawn at t0+1s; settle delay 2s.
        assert!(machine.tick(t0 + Duration::from_millis(2999)).is_none());
        assert_eq!(machine.state(), SequenceState::TicketWithdrawn);

        let settled = machine.tick(t0 + Duration::from_secs(3)).unwrap();
        assert_eq!(settled.event, SequenceEvent::Settled);
        assert_eq!(machine.state(), SequenceState::NoSequence);
        assert_eq!(machine.history().len(), 4);
    }

    #[test]
    fn test_withdrawn_from_no_sequence_is_violation() {
        let mut machine = SequenceMachine::default();
        let t0 = Instant::now();
        machine.observe_ticket_sensor(true, t0).unwrap();

        let err = machine.observe_ticket_sensor(false, t0).unwrap_err();
        assert_eq!(
            err,
            SequenceViolation {
                from: SequenceState::NoSequence,
                observed: SequenceEvent::TicketCleared,
            }
        );
        assert_eq!(machine.state(), SequenceState::NoSequence);
        assert!(machine.history().is_empty());
    }

    #[rstest]
    #[case(SequenceState::NoSequence, SequenceEvent::TicketSeated)]
    #[case(SequenceState::NoSequence, SequenceEvent::Settled)]
    #[case(SequenceState::TicketPresented, SequenceEvent::CredentialGranted)]
    #[case(SequenceState::TicketPresented, SequenceEvent::TicketCleared)]
    #[case(SequenceState::TicketAtSlot, SequenceEvent::CredentialGranted)]
    #[case(SequenceState::TicketWithdrawn, SequenceEvent::TicketSeated)]
    #[case(SequenceState::TicketWithdrawn, SequenceEvent::Abandoned)]
    #[case(SequenceState::NoSequence, SequenceEvent::Abandoned)]
    fn test_illegal_edges_keep_state(#[case] from: SequenceState, #[case] event: SequenceEvent) {
        let mut machine = SequenceMachine::default();
        let t0 = Instant::now();
        let path = [
            SequenceEvent::CredentialGranted,
            SequenceEvent::TicketSeated,
            SequenceEvent::TicketCleared,
        ];
        for step in path {
            if machine.state() == from {
                break;
            }
            machine.apply(step, t0).unwrap();
        }
        assert_eq!(machine.state(), from);

        let err = machine.apply(event, t0).unwrap_err();
        assert_eq!(err.from, from);
        assert_eq!(machine.state(), from);
    }

    #[test]
    fn test_steady_sensor_is_not_an_edge() {
        let mut machine = SequenceMachine::default();
        let t0 = Instant::now();
        assert!(machine.observe_ticket_sensor(true, t0).unwrap().is_none());
        assert!(machine.observe_ticket_sensor(true, t0).unwrap().is_none());
        assert_eq!(machine.state(), SequenceState::NoSequence);
    }

    #[test]
    fn test_grant_with_ticket_already_seated() {
        let mut machine = SequenceMachine::default();
        let t0 = Instant::now();
        machine.observe_ticket_sensor(true, t0).unwrap();

        let seated = machine.present(t0).unwrap();
        assert_eq!(seated.to, SequenceState::TicketAtSlot);
        assert_eq!(machine.history().len(), 2);

        machine
            .observe_ticket_sensor(false, t0 + Duration::from_secs(1))
            .unwrap();
        assert_eq!(machine.state(), SequenceState::TicketWithdrawn);
        machine.tick(t0 + Duration::from_secs(3)).unwrap();
        assert_eq!(machine.state(), SequenceState::NoSequence);

        // The slot is clear now, so the next grant waits for its ticket.
        machine.present(t0 + Duration::from_secs(4)).unwrap();
        assert_eq!(machine.state(), SequenceState::TicketPresented);
    }

    #[test]
    fn test_occupied_reading_seats_ticket_after_grant() {
        let mut machine = SequenceMachine::default();
        let t0 = Instant::now();
        machine.present(t0).unwrap();

        // First reading ever, no edge.
        let seated = machine.observe_ticket_sensor(true, t0).unwrap().unwrap();
        assert_eq!(seated.event, SequenceEvent::TicketSeated);
        assert_eq!(machine.state(), SequenceState::TicketAtSlot);
    }

    #[test]
    fn test_unseated_grant_is_abandoned() {
        let mut machine = SequenceMachine::default();
        let t0 = Instant::now();
        machine.observe_ticket_sensor(false, t0).unwrap();
        machine.present(t0).unwrap();

        let err = machine.present(t0 + Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.from, SequenceState::TicketPresented);

        assert!(machine.tick(t0 + Duration::from_secs(29)).is_none());
        let abandoned = machine.tick(t0 + Duration::from_secs(30)).unwrap();
        assert_eq!(abandoned.event, SequenceEvent::Abandoned);
        assert_eq!(machine.state(), SequenceState::NoSequence);

        machine.present(t0 + Duration::from_secs(31)).unwrap();
        assert_eq!(machine.state(), SequenceState::TicketPresented);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut machine = SequenceMachine::new(SequenceConfig {
            settle_delay_ms: 0,
            ..SequenceConfig::default()
        });
        let t0 = Instant::now();
        for i in 0..(MAX_HISTORY_SIZE as u64) {
            full_sequence(&mut machine, t0 + Duration::from_secs(i * 10));
            machine.tick(t0 + Duration::from_secs(i * 10 + 5)).unwrap();
        }
        assert_eq!(machine.history().len(), MAX_HISTORY_SIZE);
        assert_eq!(machine.history()[0].from, SequenceState::NoSequence);
    }

    #[test]
    fn test_reset() {
        let mut machine = SequenceMachine::default();
        let t0 = Instant::now();
        machine.present(t0).unwrap();
        machine.reset();
        assert_eq!(machine.state(), SequenceState::NoSequence);
        assert_eq!(machine.history().len(), 1);
    }

    #[test]
    fn test_violation_message() {
        let violation = SequenceViolation {
            from: SequenceState::NoSequence,
            observed: SequenceEvent::TicketCleared,
        };
        assert_eq!(
            violation.to_string(),
            "Sequence violation: TicketCleared observed in NoSequence"
        );
    }
}
