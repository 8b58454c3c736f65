//! Open Request State Machine
//!
//! ```text
//! Pending
//!   ↓ upgrade needed (optional)
//! Upgrading
//!   ↓ success          ↘ error
//! Ready              Failed
//! ```
//! `Pending` may also fail directly.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    /// Engine open call in flight
    Pending,
    /// Engine asked for a schema upgrade; the upgrade hook runs here
    Upgrading,
    /// Connection delivered; continuations run against it
    Ready,
    /// Open failed; no continuation will ever run
    Failed,
}

impl RequestState {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, target: RequestState) -> bool {
        matches!(
            (self, target),
            (RequestState::Pending, RequestState::Upgrading)
                | (RequestState::Pending, RequestState::Ready)
                | (RequestState::Pending, RequestState::Failed)
                | (RequestState::Upgrading, RequestState::Ready)
                | (RequestState::Upgrading, RequestState::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Ready | RequestState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::Upgrading => "upgrading",
            RequestState::Ready => "ready",
            RequestState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RequestState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RequestState::Pending),
            "upgrading" => Ok(RequestState::Upgrading),
            "ready" => Ok(RequestState::Ready),
            "failed" => Ok(RequestState::Failed),
            _ => Err(format!("Unknown request state: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(RequestState::Pending.can_transition_to(RequestState::Upgrading));
        assert!(RequestState::Pending.can_transition_to(RequestState::Ready));
        assert!(RequestState::Pending.can_transition_to(RequestState::Failed));
        assert!(RequestState::Upgrading.can_transition_to(RequestState::Ready));
        assert!(RequestState::Upgrading.can_transition_to(RequestState::Failed));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for target in [
            RequestState::Pending,
            RequestState::Upgrading,
            RequestState::Ready,
            RequestState::Failed,
        ] {
            assert!(!RequestState::Ready.can_transition_to(target));
            assert!(!RequestState::Failed.can_transition_to(target));
        }
        // Resolving twice is not a transition
        assert!(!RequestState::Upgrading.can_transition_to(RequestState::Upgrading));
        assert!(!RequestState::Upgrading.can_transition_to(RequestState::Pending));
    }

    #[test]
    fn test_round_trip_names() {
        let state: RequestState = "Upgrading".parse().unwrap();
        assert_eq!(state, RequestState::Upgrading);
        assert_eq!(state.to_string(), "upgrading");
        assert!("open".parse::<RequestState>().is_err());
    }
}
