//! # Condition Merging
//!
//! Merges a single named condition into a status condition list.
//!
//! The list behaves like a small ordered map keyed by condition type:
//! - a new type is appended with `lastTransitionTime = now`
//! - a changed status replaces the entry and moves `lastTransitionTime` to `now`
//! - an unchanged status only refreshes reason and message
//!
//! Entries of other types keep their position.

use crate::crd::{Condition, ConditionStatus};
use chrono::{DateTime, SecondsFormat, Utc};

/// Condition type reported by the extension controller
pub const VIRTUAL_CLUSTER_EXTENSION_RECONCILED: &str = "VirtualClusterExtensionReconciled";

/// Reason used when the extension was applied to the virtual cluster
pub const CONDITION_RECONCILE_SUCCESS: &str = "ReconcileSuccess";

/// Reason used when applying the extension failed
pub const CONDITION_RECONCILE_FAILED: &str = "ReconcileFailed";

/// Merge one condition into `existing`, returning the new list
#[must_use]
pub fn merge_condition(
    existing: &[Condition],
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) -> Vec<Condition> {
    let mut conditions = existing.to_vec();
    let now = format_time(now);

    match conditions.iter_mut().find(|c| c.r#type == condition_type) {
        Some(current) => {
            if current.status != status {
                current.status = status;
                current.last_transition_time = Some(now);
            }
            current.reason = Some(reason.to_string());
            current.message = Some(message.to_string());
        }
        None => conditions.push(Condition {
            r#type: condition_type.to_string(),
            status,
            last_transition_time: Some(now),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }),
    }

    conditions
}

/// Look up a condition by type
#[must_use]
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}
