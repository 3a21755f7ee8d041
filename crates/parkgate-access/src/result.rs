//! Outcome of validating one presented identification.

use serde::Serialize;
use std::fmt;

/// Why an identification was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// No credential matches the identification.
    Unknown,
    /// The credential is inactive or outside its validity window.
    Expired,
    /// The previous movement went the same way as this module.
    AntipassbackViolation,
    /// The previous movement in this group is too recent.
    MinDwellNotElapsed,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DenyReason::Unknown => "unknown identification",
            DenyReason::Expired => "credential expired",
            DenyReason::AntipassbackViolation => "antipassback violation",
            DenyReason::MinDwellNotElapsed => "minimum dwell not elapsed",
        };
        f.write_str(text)
    }
}

/// Decision for one presented identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum AccessResult {
    Allowed,
    Denied(DenyReason),
}

impl AccessResult {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessResult::Allowed)
    }

    /// Reason for a denial, `None` when allowed.
    #[must_use]
    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            AccessResult::Allowed => None,
            AccessResult::Denied(reason) => Some(*reason),
        }
    }
}

impl fmt::Display for AccessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessResult::Allowed => f.write_str("allowed"),
            AccessResult::Denied(reason) => write!(f, "denied ({reason})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_shape() {
        let allowed = serde_json::to_value(AccessResult::Allowed).unwrap();
        assert_eq!(allowed, serde_json::json!({ "result": "allowed" }));

        let denied =
            serde_json::to_value(AccessResult::Denied(DenyReason::MinDwellNotElapsed)).unwrap();
        assert_eq!(
            denied,
            serde_json::json!({ "result": "denied", "reason": "min_dwell_not_elapsed" })
        );
    }

    #[test]
    fn test_deny_reason() {
        assert_eq!(AccessResult::Allowed.deny_reason(), None);
        assert_eq!(
            AccessResult::Denied(DenyReason::Expired).deny_reason(),
            Some(DenyReason::Expired)
        );
        assert_eq!(
            AccessResult::Denied(DenyReason::Unknown).to_string(),
            "denied (unknown identification)"
        );
    }
}
