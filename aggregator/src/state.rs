//! Per-institution refresh state and outcomes.

use serde::Serialize;

use crate::reconciler::MergeSummary;

/// Where an institution is in its refresh cycle.
///
/// There is no terminal state: every outcome becomes `Stale` again once the
/// staleness threshold elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshState {
    /// Due for refresh.
    Stale,
    /// Adapter invoked, merge pending.
    Refreshing,
    /// Merged and at least one value changed.
    Reconciled,
    /// Merged and no value changed.
    Unchanged,
    /// Nothing persisted this tick.
    Failed,
}

impl RefreshState {
    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[RefreshState] {
        match self {
            RefreshState::Stale => &[RefreshState::Refreshing],
            RefreshState::Refreshing => &[
                RefreshState::Reconciled,
                RefreshState::Unchanged,
                RefreshState::Failed,
            ],
            RefreshState::Reconciled | RefreshState::Unchanged | RefreshState::Failed => {
                &[RefreshState::Stale]
            }
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: RefreshState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Why a refresh persisted nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// Adapter returned no quotes.
    NoData,
    /// Adapter returned an error.
    AdapterError(String),
    /// Adapter panicked.
    AdapterPanicked,
    /// Every quote was filtered out.
    NothingAccepted,
    /// Snapshot changed underneath the merge.
    Conflict,
}

impl FailureReason {
    /// Get a stable code for logs.
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::NoData => "NO_DATA",
            FailureReason::AdapterError(_) => "ADAPTER_ERROR",
            FailureReason::AdapterPanicked => "ADAPTER_PANICKED",
            FailureReason::NothingAccepted => "NOTHING_ACCEPTED",
            FailureReason::Conflict => "CONFLICT",
        }
    }
}

/// Result of refreshing one institution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshOutcome {
    /// Persisted with at least one changed currency.
    Reconciled(MergeSummary),
    /// Persisted, values identical to before.
    Unchanged(MergeSummary),
    /// Nothing persisted.
    Failed(FailureReason),
}

impl RefreshOutcome {
    /// The state this outcome leaves the institution in.
    pub fn state(&self) -> RefreshState {
        match self {
            RefreshOutcome::Reconciled(_) => RefreshState::Reconciled,
            RefreshOutcome::Unchanged(_) => RefreshState::Unchanged,
            RefreshOutcome::Failed(_) => RefreshState::Failed,
        }
    }

    /// Check if the snapshot was written.
    pub fn is_persisted(&self) -> bool {
        !matches!(self, RefreshOutcome::Failed(_))
    }

    /// Merge details, when the snapshot was written.
    pub fn summary(&self) -> Option<&MergeSummary> {
        match self {
            RefreshOutcome::Reconciled(summary) | RefreshOutcome::Unchanged(summary) => Some(summary),
            RefreshOutcome::Failed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_returns_to_stale() {
        let mut state = RefreshState::Stale;
        for next in [RefreshState::Refreshing, RefreshState::Failed, RefreshState::Stale] {
            assert!(state.can_transition_to(next));
            state = next;
        }
        assert!(!RefreshState::Stale.can_transition_to(RefreshState::Reconciled));
        assert!(!RefreshState::Failed.can_transition_to(RefreshState::Reconciled));
    }

    #[test]
    fn test_outcome_state() {
        let outcome = RefreshOutcome::Failed(FailureReason::Conflict);
        assert_eq!(outcome.state(), RefreshState::Failed);
        assert!(!outcome.is_persisted());
        assert!(outcome.summary().is_none());

        let outcome = RefreshOutcome::Unchanged(MergeSummary::default());
        assert_eq!(outcome.state(), RefreshState::Unchanged);
        assert!(outcome.is_persisted());
    }

    #[test]
    fn test_failure_reason_serialization() {
        let json = serde_json::to_value(RefreshOutcome::Failed(FailureReason::AdapterError(
            "timeout".into(),
        )))
        .unwrap();
        assert_eq!(json["outcome"], "FAILED");
    }
}
