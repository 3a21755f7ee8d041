//! Persistence contract for credentials and movements.
//!
//! The controller never owns a schema. It reads credentials and past
//! movements through [`CredentialStore`] and asks the store to record a new
//! movement once access has been granted. [`MemoryStore`] is the in-process
//! implementation used by tests and by the CLI demo mode.
//!
//! # Implementation Note
//!
//! The trait uses native async trait methods (Edition 2024). It is not
//! object-safe; the validator is generic over `S: CredentialStore`.

#![allow(async_fn_in_trait)]

use crate::error::{AccessError, Result};
use chrono::{DateTime, Utc};
use parkgate_core::{Direction, GroupId, Identification, ModuleId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Identifier assigned to a recorded movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(Uuid);

impl MovementId {
    /// Fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MovementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MovementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A credential known to the store.
///
/// Inactive credentials and credentials outside their validity window are
/// refused as expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub identification: Identification,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl Credential {
    /// Active credential without a validity window.
    pub fn new(identification: Identification) -> Self {
        Self {
            identification,
            active: true,
            valid_from: None,
            valid_until: None,
        }
    }

    #[must_use]
    pub fn with_validity(
        mut self,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = valid_from;
        self.valid_until = valid_until;
        self
    }

    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Whether the credential may be used at `now`.
    ///
    /// Both window bounds are inclusive.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }

        if let Some(start) = self.valid_from
            && now < start
        {
            return false;
        }

        if let Some(end) = self.valid_until
            && now > end
        {
            return false;
        }

        true
    }
}

/// Movement to be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMovement {
    pub identification: Identification,
    pub module_id: ModuleId,
    pub group_id: GroupId,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
}

/// A recorded movement. Never modified once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Movement {
    pub id: MovementId,
    pub identification: Identification,
    pub module_id: ModuleId,
    pub group_id: GroupId,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
}

impl Movement {
    fn recorded(id: MovementId, movement: NewMovement) -> Self {
        Self {
            id,
            identification: movement.identification,
            module_id: movement.module_id,
            group_id: movement.group_id,
            direction: movement.direction,
            timestamp: movement.timestamp,
        }
    }
}

/// Credential and movement persistence consumed by the validator.
pub trait CredentialStore: Send + Sync {
    /// Look up the credential for an identification.
    async fn find_credential(&self, identification: &Identification)
    -> Result<Option<Credential>>;

    /// Most recent movement of the identification anywhere.
    async fn last_movement(&self, identification: &Identification) -> Result<Option<Movement>>;

    /// Most recent movement of the identification within one module group.
    async fn last_movement_in_group(
        &self,
        identification: &Identification,
        group_id: GroupId,
    ) -> Result<Option<Movement>>;

    /// Record a granted movement.
    async fn create_movement(&self, movement: NewMovement) -> Result<MovementId>;
}

impl<S: CredentialStore> CredentialStore for Arc<S> {
    async fn find_credential(
        &self,
        identification: &Identification,
    ) -> Result<Option<Credential>> {
        (**self).find_credential(identification).await
    }

    async fn last_movement(&self, identification: &Identification) -> Result<Option<Movement>> {
        (**self).last_movement(identification).await
    }

    async fn last_movement_in_group(
        &self,
        identification: &Identification,
        group_id: GroupId,
    ) -> Result<Option<Movement>> {
        (**self).last_movement_in_group(identification, group_id).await
    }

    async fn create_movement(&self, movement: NewMovement) -> Result<MovementId> {
        (**self).create_movement(movement).await
    }
}

/// In-memory [`CredentialStore`].
///
/// Movements are kept in insertion order. "Last" means the latest
/// timestamp; ties go to the movement recorded later.
#[derive(Debug, Default)]
pub struct MemoryStore {
    credentials: RwLock<HashMap<Identification, Credential>>,
    movements: RwLock<Vec<Movement>>,
}

fn poisoned<T>(_: T) -> AccessError {
    AccessError::store("memory store lock poisoned")
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with `credentials`.
    pub fn with_credentials(credentials: impl IntoIterator<Item = Credential>) -> Self {
        let map = credentials
            .into_iter()
            .map(|c| (c.identification.clone(), c))
            .collect();
        Self {
            credentials: RwLock::new(map),
            movements: RwLock::new(Vec::new()),
        }
    }

    /// Add or replace a credential.
    pub fn insert_credential(&self, credential: Credential) -> Result<()> {
        self.credentials
            .write()
            .map_err(poisoned)?
            .insert(credential.identification.clone(), credential);
        Ok(())
    }

    pub fn remove_credential(&self, identification: &Identification) -> Result<Option<Credential>> {
        Ok(self
            .credentials
            .write()
            .map_err(poisoned)?
            .remove(identification))
    }

    /// Snapshot of every recorded movement, oldest first.
    pub fn movements(&self) -> Result<Vec<Movement>> {
        Ok(self.movements.read().map_err(poisoned)?.clone())
    }

    pub fn movement_count(&self) -> Result<usize> {
        Ok(self.movements.read().map_err(poisoned)?.len())
    }

    fn latest<F>(&self, filter: F) -> Result<Option<Movement>>
    where
        F: Fn(&Movement) -> bool,
    {
        let movements = self.movements.read().map_err(poisoned)?;
        Ok(movements
            .iter()
            .filter(|m| filter(m))
            .max_by_key(|m| m.timestamp)
            .cloned())
    }
}

impl CredentialStore for MemoryStore {
    async fn find_credential(
        &self,
        identification: &Identification,
    ) -> Result<Option<Credential>> {
        Ok(self
            .credentials
            .read()
            .map_err(poisoned)?
            .get(identification)
            .cloned())
    }

    async fn last_movement(&self, identification: &Identification) -> Result<Option<Movement>> {
        self.latest(|m| &m.identification == identification)
    }

    async fn last_movement_in_group(
        &self,
        identification: &Identification,
        group_id: GroupId,
    ) -> Result<Option<Movement>> {
        self.latest(|m| &m.identification == identification && m.group_id == group_id)
    }

    async fn create_movement(&self, movement: NewMovement) -> Result<MovementId> {
        let id = MovementId::new();
        self.movements
            .write()
            .map_err(poisoned)?
            .push(Movement::recorded(id, movement));
        Ok(id)
    }
}
