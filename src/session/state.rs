//! Session phase state machine.
//!
//! ```text
//! Created → ItemsLoaded → Exchanging → Computed → Persisted → Finalized
//!     └──────────┴─────────────┴───────────┴──────────┴──→ Failed
//! ```
//!
//! Phases only advance. `Failed` is absorbing and reachable from every
//! non-terminal phase.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Created,
    ItemsLoaded,
    Exchanging,
    Computed,
    Persisted,
    Finalized,
    Failed,
}

impl SessionPhase {
    fn rank(self) -> u8 {
        match self {
            SessionPhase::Created => 0,
            SessionPhase::ItemsLoaded => 1,
            SessionPhase::Exchanging => 2,
            SessionPhase::Computed => 3,
            SessionPhase::Persisted => 4,
            SessionPhase::Finalized => 5,
            SessionPhase::Failed => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Created => "created",
            SessionPhase::ItemsLoaded => "items_loaded",
            SessionPhase::Exchanging => "exchanging",
            SessionPhase::Computed => "computed",
            SessionPhase::Persisted => "persisted",
            SessionPhase::Finalized => "finalized",
            SessionPhase::Failed => "failed",
        }
    }

    /// `Finalized` and `Failed` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Finalized | SessionPhase::Failed)
    }

    /// Whether a result may be read in this phase.
    pub fn has_result(self) -> bool {
        matches!(self, SessionPhase::Persisted | SessionPhase::Finalized)
    }

    /// Allowed transitions: one step forward, or to `Failed` from any
    /// non-terminal phase. `Exchanging` may repeat for multi-round variants,
    /// and `Finalized` is reachable from `Persisted` only.
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            SessionPhase::Failed => true,
            SessionPhase::Exchanging if self == SessionPhase::Exchanging => true,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HAPPY_PATH: [SessionPhase; 6] = [
        SessionPhase::Created,
        SessionPhase::ItemsLoaded,
        SessionPhase::Exchanging,
        SessionPhase::Computed,
        SessionPhase::Persisted,
        SessionPhase::Finalized,
    ];

    #[test]
    fn test_happy_path_is_allowed() {
        for pair in HAPPY_PATH.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_no_rollback_or_skip() {
        assert!(!SessionPhase::Computed.can_transition_to(SessionPhase::Exchanging));
        assert!(!SessionPhase::Persisted.can_transition_to(SessionPhase::Created));
        assert!(!SessionPhase::Created.can_transition_to(SessionPhase::Computed));
        assert!(!SessionPhase::Computed.can_transition_to(SessionPhase::Finalized));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal() {
        for phase in &HAPPY_PATH[..5] {
            assert!(phase.can_transition_to(SessionPhase::Failed));
        }
    }

    #[test]
    fn test_terminal_phases_are_absorbing() {
        for next in HAPPY_PATH {
            assert!(!SessionPhase::Failed.can_transition_to(next));
            assert!(!SessionPhase::Finalized.can_transition_to(next));
        }
        assert!(!SessionPhase::Failed.can_transition_to(SessionPhase::Failed));
    }

    #[test]
    fn test_exchanging_loops() {
        assert!(SessionPhase::Exchanging.can_transition_to(SessionPhase::Exchanging));
    }

    #[test]
    fn test_result_visibility() {
        assert!(!SessionPhase::Computed.has_result());
        assert!(SessionPhase::Persisted.has_result());
        assert!(SessionPhase::Finalized.has_result());
        assert!(!SessionPhase::Failed.has_result());
    }
}
