use crate::error::Result;
use crate::result::{AccessResult, DenyReason};
use crate::store::{Credential, CredentialStore, Movement, MovementId, NewMovement};
use chrono::{DateTime, Utc};
use parkgate_core::constants::DEFAULT_MIN_DWELL_SECS;
use parkgate_core::{Direction, GroupId, Identification, ModuleId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default lookback for antipassback: movements older than this are ignored.
pub const DEFAULT_ANTIPASSBACK_WINDOW_SECS: u64 = 48 * 3600;

/// Rules applied by [`AccessValidator`].
///
/// Deserializes from the `[access]` table of the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Refuse two consecutive movements in the same direction.
    #[serde(default = "default_true")]
    pub antipassback: bool,
    /// Only movements younger than this count for antipassback. `0` means
    /// no limit.
    #[serde(default = "default_antipassback_window_secs")]
    pub antipassback_window_secs: u64,
    /// Enforce the minimum dwell time within a module group.
    #[serde(default = "default_true")]
    pub min_dwell: bool,
    #[serde(default = "default_min_dwell_secs")]
    pub min_dwell_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_antipassback_window_secs() -> u64 {
    DEFAULT_ANTIPASSBACK_WINDOW_SECS
}

fn default_min_dwell_secs() -> u64 {
    DEFAULT_MIN_DWELL_SECS
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            antipassback: true,
            antipassback_window_secs: DEFAULT_ANTIPASSBACK_WINDOW_SECS,
            min_dwell: true,
            min_dwell_secs: DEFAULT_MIN_DWELL_SECS,
        }
    }
}

impl ValidatorConfig {
    /// Every rule disabled except credential lookup and validity.
    pub fn permissive() -> Self {
        Self {
            antipassback: false,
            min_dwell: false,
            ..Self::default()
        }
    }

    fn min_dwell(&self) -> chrono::Duration {
        i64::try_from(self.min_dwell_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    fn antipassback_window(&self) -> Option<chrono::Duration> {
        if self.antipassback_window_secs == 0 {
            return None;
        }
        i64::try_from(self.antipassback_window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    }
}

/// The module an identification was presented at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessPoint {
    pub module_id: ModuleId,
    pub group_id: GroupId,
    pub direction: Direction,
}

/// Everything a decision depends on, fetched before deciding.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    pub credential: Option<Credential>,
    pub last_movement: Option<Movement>,
    pub last_in_group: Option<Movement>,
}

/// Result of [`AccessValidator::validate_and_commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub result: AccessResult,
    /// Set exactly when the result is `Allowed`.
    pub movement_id: Option<MovementId>,
}

/// Access validator for identifications presented at a module.
///
/// # Validation Flow
///
/// Checks run in a fixed order and stop at the first denial:
///
/// 1. **Lookup**: no credential for the identification → `Unknown`
/// 2. **Validity**: inactive or outside its window → `Expired`
/// 3. **Antipassback**: last movement went in the module's direction →
///    `AntipassbackViolation`
/// 4. **Minimum dwell**: time since the last movement in the module's group
///    is not strictly greater than `min_dwell_secs` → `MinDwellNotElapsed`
/// 5. **Grant**: `Allowed`
///
/// All reads happen before the decision and the decision itself
/// ([`decide`]) is pure. Only [`validate_and_commit`](Self::validate_and_commit)
/// writes, and only after `Allowed`.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use parkgate_access::{AccessPoint, AccessValidator, Credential, MemoryStore, ValidatorConfig};
/// use parkgate_core::{Direction, GroupId, Identification, ModuleId};
///
/// # async fn example() -> parkgate_access::Result<()> {
/// let code = Identification::new("00001234").unwrap();
/// let store = MemoryStore::with_credentials([Credential::new(code.clone())]);
/// let validator = AccessValidator::new(store, ValidatorConfig::default());
///
/// let point = AccessPoint {
///     module_id: ModuleId(1),
///     group_id: GroupId(1),
///     direction: Direction::Entry,
/// };
/// let decision = validator.validate_and_commit(&code, &point, Utc::now()).await?;
/// assert!(decision.result.is_allowed());
/// # Ok(())
/// # }
/// ```
pub struct AccessValidator<S> {
    store: S,
    config: ValidatorConfig,
}

impl<S: CredentialStore> AccessValidator<S> {
    pub fn new(store: S, config: ValidatorConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetch everything the decision depends on.
    ///
    /// Movement lookups are skipped when the credential is missing or the
    /// rule that would use them is disabled.
    async fn load(
        &self,
        identification: &Identification,
        point: &AccessPoint,
    ) -> Result<ValidationContext> {
        let credential = self.store.find_credential(identification).await?;
        if credential.is_none() {
            return Ok(ValidationContext::default());
        }

        let last_movement = if self.config.antipassback {
            self.store.last_movement(identification).await?
        } else {
            None
        };
        let last_in_group = if self.config.min_dwell {
            self.store
                .last_movement_in_group(identification, point.group_id)
                .await?
        } else {
            None
        };

        Ok(ValidationContext {
            credential,
            last_movement,
            last_in_group,
        })
    }

    /// Decide on an identification without recording anything.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::Store` if the store fails. A refused
    /// identification is `Ok(AccessResult::Denied(_))`, not an error.
    pub async fn validate(
        &self,
        identification: &Identification,
        point: &AccessPoint,
        now: DateTime<Utc>,
    ) -> Result<AccessResult> {
        let context = self.load(identification, point).await?;
        let result = decide(&self.config, &context, point, now);
        debug!(
            identification = %identification,
            module_id = %point.module_id,
            direction = %point.direction,
            result = %result,
            "access_validated"
        );
        Ok(result)
    }

    /// Decide, and record the movement when access is allowed.
    pub async fn validate_and_commit(
        &self,
        identification: &Identification,
        point: &AccessPoint,
        now: DateTime<Utc>,
    ) -> Result<AccessDecision> {
        let result = self.validate(identification, point, now).await?;
        if !result.is_allowed() {
            return Ok(AccessDecision {
                result,
                movement_id: None,
            });
        }

        let movement_id = self
            .store
            .create_movement(NewMovement {
                identification: identification.clone(),
                module_id: point.module_id,
                group_id: point.group_id,
                direction: point.direction,
                timestamp: now,
            })
            .await?;
        info!(
            identification = %identification,
            module_id = %point.module_id,
            movement_id = %movement_id,
            "movement_recorded"
        );

        Ok(AccessDecision {
            result,
            movement_id: Some(movement_id),
        })
    }
}

/// The decision rules, applied to already fetched data.
pub fn decide(
    config: &ValidatorConfig,
    context: &ValidationContext,
    point: &AccessPoint,
    now: DateTime<Utc>,
) -> AccessResult {
    let Some(credential) = context.credential.as_ref() else {
        return AccessResult::Denied(DenyReason::Unknown);
    };

    if !credential.is_valid_at(now) {
        return AccessResult::Denied(DenyReason::Expired);
    }

    if config.antipassback
        && let Some(last) = context.last_movement.as_ref()
    {
        let within_window = config
            .antipassback_window()
            .is_none_or(|window| now - last.timestamp <= window);
        if within_window && last.direction == point.direction {
            return AccessResult::Denied(DenyReason::AntipassbackViolation);
        }
    }

    if config.min_dwell
        && let Some(last) = context.last_in_group.as_ref()
        && now - last.timestamp <= config.min_dwell()
    {
        return AccessResult::Denied(DenyReason::MinDwellNotElapsed);
    }

    AccessResult::Allowed
}
