//! Module registry: configuration and runtime state for every module on the
//! bus, iterated in polling order.
//!
//! # Failure Accounting
//!
//! Two counters drive recovery:
//!
//! - per module: `offline_threshold` consecutive failures take the module
//!   offline and clear its queue. Offline modules are still polled, with
//!   status reads only, so they can come back.
//! - aggregate: `reopen_threshold` consecutive failures across all modules
//!   ask for a link reset. Any success clears it.

use crate::config::PollingConfig;
use crate::error::RegistryError;
use crate::module::{
    FailureOutcome, ModuleConfig, ModuleCounters, ModuleRuntimeState, StateDelta,
};
use parkgate_core::constants::{MAX_ADDRESS, MIN_ADDRESS};
use parkgate_core::ModuleAddress;
use parkgate_protocol::{Command, StatusReport};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct Entry {
    config: ModuleConfig,
    state: ModuleRuntimeState,
}

/// Aggregate view of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegistryStats {
    pub total_modules: usize,
    pub online_modules: usize,
    pub offline_modules: usize,
    pub commands_sent: u64,
    pub replies_received: u64,
    /// Replies per command sent, `1.0` before any traffic.
    pub success_rate: f64,
    pub mean_response_time: Option<Duration>,
    pub consecutive_failures: u32,
    pub link_resets: u64,
}

pub struct ModuleRegistry {
    entries: HashMap<ModuleAddress, Entry>,
    /// Addresses sorted by polling order.
    order: Vec<ModuleAddress>,
    offline_threshold: u32,
    reopen_threshold: u32,
    max_pending: usize,
    aggregate_failures: u32,
    link_resets: u64,
}

impl ModuleRegistry {
    /// Validate `modules` and register them.
    ///
    /// # Errors
    /// - `RegistryError::DuplicateAddress`, `DuplicateModuleId` or
    ///   `DuplicateOrder` if a key is used twice
    /// - `RegistryError::InvalidConfig` for an empty name or an address
    ///   outside the bus range
    pub fn new(modules: Vec<ModuleConfig>, config: &PollingConfig) -> Result<Self, RegistryError> {
        let mut ids = HashSet::new();
        let mut orders = HashSet::new();
        let mut entries = HashMap::with_capacity(modules.len());

        for module in modules {
            let raw = module.address.as_u8();
            if !(MIN_ADDRESS..=MAX_ADDRESS).contains(&raw) {
                return Err(RegistryError::InvalidConfig(format!(
                    "module {} address {raw} outside {MIN_ADDRESS}-{MAX_ADDRESS}",
                    module.id
                )));
            }
            if module.name.trim().is_empty() {
                return Err(RegistryError::InvalidConfig(format!(
                    "module {} has an empty name",
                    module.id
                )));
            }
            if !ids.insert(module.id) {
                return Err(RegistryError::DuplicateModuleId(module.id));
            }
            if !orders.insert(module.order) {
                return Err(RegistryError::DuplicateOrder(module.order));
            }
            if entries.contains_key(&module.address) {
                return Err(RegistryError::DuplicateAddress(module.address));
            }

            debug!(
                address = %module.address,
                module_id = %module.id,
                name = %module.name,
                order = module.order,
                "module_registered"
            );
            entries.insert(
                module.address,
                Entry {
                    config: module,
                    state: ModuleRuntimeState::new(),
                },
            );
        }

        let mut order: Vec<ModuleAddress> = entries.keys().copied().collect();
        order.sort_by_key(|address| entries[address].config.order);

        info!(modules = order.len(), "registry_loaded");

        Ok(Self {
            entries,
            order,
            offline_threshold: config.offline_threshold.max(1),
            reopen_threshold: config.reopen_threshold.max(1),
            max_pending: config.max_pending.max(1),
            aggregate_failures: 0,
            link_resets: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Addresses in polling order.
    pub fn addresses(&self) -> &[ModuleAddress] {
        &self.order
    }

    /// Modules in polling order.
    pub fn iter(&self) -> impl Iterator<Item = (&ModuleConfig, &ModuleRuntimeState)> {
        self.order.iter().filter_map(|address| {
            self.entries
                .get(address)
                .map(|entry| (&entry.config, &entry.state))
        })
    }

    pub fn config(&self, address: ModuleAddress) -> Result<&ModuleConfig, RegistryError> {
        self.entry(address).map(|entry| &entry.config)
    }

    pub fn state(&self, address: ModuleAddress) -> Result<&ModuleRuntimeState, RegistryError> {
        self.entry(address).map(|entry| &entry.state)
    }

    fn entry(&self, address: ModuleAddress) -> Result<&Entry, RegistryError> {
        self.entries
            .get(&address)
            .ok_or(RegistryError::UnknownModule(address))
    }

    fn entry_mut(&mut self, address: ModuleAddress) -> Result<&mut Entry, RegistryError> {
        self.entries
            .get_mut(&address)
            .ok_or(RegistryError::UnknownModule(address))
    }

    /// Command to send on this module's turn.
    ///
    /// The queue head when the module is online and has one, otherwise a
    /// status read. The head stays queued until [`record_success`](Self::record_success).
    pub fn next_command_for(&mut self, address: ModuleAddress) -> Result<Command, RegistryError> {
        let state = &mut self.entry_mut(address)?.state;

        if state.online
            && let Some(head) = state.pending.front()
        {
            state.head_in_flight = true;
            return Ok(head.clone());
        }

        state.head_in_flight = false;
        Ok(Command::status(address))
    }

    /// Queue `command` for the module's next turns.
    ///
    /// A command equal to one already queued is dropped silently. When the
    /// queue is full the oldest command not on the wire is discarded.
    ///
    /// # Errors
    /// - `RegistryError::UnknownModule` if no module has this address
    /// - `RegistryError::ModuleOffline` if the module is offline
    pub fn enqueue(&mut self, address: ModuleAddress, command: Command) -> Result<(), RegistryError> {
        let max_pending = self.max_pending;
        let state = &mut self.entry_mut(address)?.state;

        if !state.online {
            return Err(RegistryError::ModuleOffline(address));
        }
        if state.pending.contains(&command) {
            debug!(address = %address, command = %command, "command_already_queued");
            return Ok(());
        }

        if state.pending.len() >= max_pending {
            // Keep the in-flight head so its completion pops the right entry.
            let victim = usize::from(state.head_in_flight);
            if let Some(dropped) = state.pending.remove(victim) {
                warn!(
                    address = %address,
                    dropped = %dropped,
                    max_pending,
                    "command_dropped_queue_full"
                );
            }
        }

        debug!(address = %address, command = %command, "command_queued");
        state.pending.push_back(command);
        Ok(())
    }

    /// Account a reply that decoded and matched the request.
    ///
    /// `status` is `None` for replies without a status block; the previous
    /// status is kept.
    pub fn record_success(
        &mut self,
        address: ModuleAddress,
        status: Option<StatusReport>,
        response_time: Duration,
    ) -> Result<StateDelta, RegistryError> {
        let state = &mut self.entry_mut(address)?.state;

        if std::mem::take(&mut state.head_in_flight) {
            state.pending.pop_front();
        }

        let previous = state.last_status;
        if status.is_some() {
            state.last_status = status;
        }
        let came_online = !state.online;

        state.online = true;
        state.consecutive_errors = 0;
        state.last_success = Some(Instant::now());
        state.counters.commands_sent += 1;
        state.counters.replies_received += 1;
        state.counters.total_response_time += response_time;

        let delta = StateDelta {
            previous,
            current: state.last_status,
            came_online,
        };
        self.aggregate_failures = 0;

        if came_online {
            info!(address = %address, "module_online");
        }
        Ok(delta)
    }

    /// Account a timeout, transport error or unusable reply.
    pub fn record_failure(&mut self, address: ModuleAddress) -> Result<FailureOutcome, RegistryError> {
        let offline_threshold = self.offline_threshold;
        let state = &mut self.entry_mut(address)?.state;

        state.head_in_flight = false;
        state.consecutive_errors = state.consecutive_errors.saturating_add(1);
        state.counters.commands_sent += 1;

        let went_offline = state.online && state.consecutive_errors >= offline_threshold;
        if went_offline {
            state.online = false;
            let cleared = state.pending.len();
            state.pending.clear();
            warn!(
                address = %address,
                consecutive_errors = state.consecutive_errors,
                cleared,
                "module_offline"
            );
        }
        let consecutive_errors = state.consecutive_errors;

        self.aggregate_failures = self.aggregate_failures.saturating_add(1);

        Ok(FailureOutcome {
            consecutive_errors,
            went_offline,
            link_reset_required: self.aggregate_failures >= self.reopen_threshold,
        })
    }

    /// Whether aggregate failures have reached the reopen threshold.
    pub fn link_reset_required(&self) -> bool {
        self.aggregate_failures >= self.reopen_threshold
    }

    /// Clear the aggregate counter after the link was reopened.
    pub fn link_reset(&mut self) {
        self.aggregate_failures = 0;
        self.link_resets += 1;
    }

    pub fn stats(&self) -> RegistryStats {
        let mut totals = ModuleCounters::default();
        let mut online = 0;
        for entry in self.entries.values() {
            if entry.state.online {
                online += 1;
            }
            totals.commands_sent += entry.state.counters.commands_sent;
            totals.replies_received += entry.state.counters.replies_received;
            totals.total_response_time += entry.state.counters.total_response_time;
        }

        let success_rate = if totals.commands_sent == 0 {
            1.0
        } else {
            totals.replies_received as f64 / totals.commands_sent as f64
        };

        RegistryStats {
            total_modules: self.entries.len(),
            online_modules: online,
            offline_modules: self.entries.len() - online,
            commands_sent: totals.commands_sent,
            replies_received: totals.replies_received,
            success_rate,
            mean_response_time: totals.mean_response_time(),
            consecutive_failures: self.aggregate_failures,
            link_resets: self.link_resets,
        }
    }
}
