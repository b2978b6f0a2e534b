//! Ready-condition bookkeeping shared by all reconcilers
//!
//! Conditions are kept as a small list keyed by type. An update replaces the
//! entry of the same type in place; `lastTransitionTime` only moves when the
//! status flips, while `observedGeneration` is stamped on every write.

use chrono::{DateTime, Utc};

use crate::crd::{Condition, ConditionStatus};

/// Type of the single condition every Pangolin object carries
pub const READY_CONDITION: &str = "Ready";

/// Insert or update a condition by type.
///
/// `now` becomes the transition time for a new condition or when the status
/// differs from the stored one; otherwise the stored transition time is kept.
pub fn upsert_condition(conditions: &mut Vec<Condition>, mut new: Condition, now: DateTime<Utc>) {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            new.last_transition_time = if existing.status == new.status {
                existing.last_transition_time
            } else {
                now
            };
            *existing = new;
        }
        None => {
            new.last_transition_time = now;
            conditions.push(new);
        }
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Whether the Ready condition is present and True
pub fn is_ready(conditions: &[Condition]) -> bool {
    find_condition(conditions, READY_CONDITION).is_some_and(|c| c.status == ConditionStatus::True)
}
