//! Per-module configuration and runtime state.

use parkgate_access::AccessPoint;
use parkgate_core::constants::DEFAULT_PULSE_MS;
use parkgate_core::{Direction, GroupId, ModuleAddress, ModuleId};
use parkgate_protocol::{Command, StatusReport};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Static description of one module, as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub id: ModuleId,
    pub address: ModuleAddress,
    pub name: String,
    /// Position in the polling cycle. Unique, lowest first.
    pub order: u32,
    pub group: GroupId,
    pub direction: Direction,
    /// Duration for `P1`..`P8` pulses sent through the control handle.
    #[serde(default = "default_pulse_ms")]
    pub pulse_ms: u32,
    /// Track ticket sequences at this module.
    #[serde(default)]
    pub requires_ticket: bool,
}

fn default_pulse_ms() -> u32 {
    DEFAULT_PULSE_MS
}

impl ModuleConfig {
    pub fn access_point(&self) -> AccessPoint {
        AccessPoint {
            module_id: self.id,
            group_id: self.group,
            direction: self.direction,
        }
    }
}

/// Exchange counters for one module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModuleCounters {
    pub commands_sent: u64,
    pub replies_received: u64,
    pub total_response_time: Duration,
}

impl ModuleCounters {
    pub fn mean_response_time(&self) -> Option<Duration> {
        let replies = u32::try_from(self.replies_received).ok().filter(|n| *n > 0)?;
        Some(self.total_response_time / replies)
    }
}

/// Mutable state of one module. Owned by the registry.
#[derive(Debug, Clone)]
pub struct ModuleRuntimeState {
    pub(crate) last_status: Option<StatusReport>,
    pub(crate) pending: VecDeque<Command>,
    /// The queue head is on the wire; popped on success.
    pub(crate) head_in_flight: bool,
    pub(crate) consecutive_errors: u32,
    pub(crate) last_success: Option<Instant>,
    pub(crate) online: bool,
    pub(crate) counters: ModuleCounters,
}

impl ModuleRuntimeState {
    /// Modules start online: they have not failed yet.
    pub(crate) fn new() -> Self {
        Self {
            last_status: None,
            pending: VecDeque::new(),
            head_in_flight: false,
            consecutive_errors: 0,
            last_success: None,
            online: true,
            counters: ModuleCounters::default(),
        }
    }

    pub fn last_status(&self) -> Option<&StatusReport> {
        self.last_status.as_ref()
    }

    pub fn pending(&self) -> impl ExactSizeIterator<Item = &Command> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn counters(&self) -> &ModuleCounters {
        &self.counters
    }

    pub fn snapshot(&self) -> ModuleSnapshot {
        ModuleSnapshot {
            online: self.online,
            status: self.last_status,
            consecutive_errors: self.consecutive_errors,
            pending: self.pending.len(),
        }
    }
}

/// Serializable view of a module's state, carried by events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModuleSnapshot {
    pub online: bool,
    pub status: Option<StatusReport>,
    pub consecutive_errors: u32,
    pub pending: usize,
}

/// What a successful exchange changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateDelta {
    pub previous: Option<StatusReport>,
    pub current: Option<StatusReport>,
    /// The module was offline before this reply.
    pub came_online: bool,
}

impl StateDelta {
    pub fn changed(&self) -> bool {
        self.came_online || self.previous != self.current
    }
}

/// What a failed exchange changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub consecutive_errors: u32,
    /// This failure took the module offline.
    pub went_offline: bool,
    /// Aggregate failures reached the reopen threshold.
    pub link_reset_required: bool,
}
