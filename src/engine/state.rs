//! Session state machine and the committed status snapshot.

use serde::{Deserialize, Serialize};

use crate::error::AudioError;

/// Lifecycle state of the single capture session
///
/// ```text
/// Stopped -> Starting -> Running -> Stopping -> Stopped
///               |           |
///               v           v
///            Stopped     Starting  (switch)
///                          Stopped  (capture failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Running, Starting)
                | (Running, Stopped)
                | (Stopping, Stopped)
        )
    }

    /// Checked transition
    pub fn transition(self, next: SessionState) -> Result<SessionState, AudioError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AudioError::InvalidTransition {
                from: format!("{:?}", self),
                to: format!("{:?}", next),
            })
        }
    }
}

/// Status as of the last committed transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EngineStatus {
    pub running: bool,
    pub state: SessionState,
    /// Identity of the running session; changes on every (re)start
    pub session_id: Option<u64>,
    pub device_id: Option<usize>,
    pub device_name: Option<String>,
    pub sample_rate: Option<u32>,
    pub block_size: Option<usize>,
}

impl EngineStatus {
    pub fn stopped() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_cycle() {
        let state = SessionState::Stopped
            .transition(SessionState::Starting)
            .and_then(|s| s.transition(SessionState::Running))
            .and_then(|s| s.transition(SessionState::Stopping))
            .and_then(|s| s.transition(SessionState::Stopped))
            .unwrap();
        assert_eq!(state, SessionState::Stopped);
    }

    #[test]
    fn test_switch_and_failures() {
        assert!(SessionState::Running.can_transition_to(SessionState::Starting));
        assert!(SessionState::Starting.can_transition_to(SessionState::Stopped));
        assert!(SessionState::Running.can_transition_to(SessionState::Stopped));
    }

    #[test]
    fn test_rejected_transitions() {
        for (from, to) in [
            (SessionState::Stopped, SessionState::Running),
            (SessionState::Stopped, SessionState::Stopping),
            (SessionState::Stopping, SessionState::Running),
            (SessionState::Starting, SessionState::Stopping),
        ] {
            assert!(matches!(
                from.transition(to),
                Err(AudioError::InvalidTransition { .. })
            ));
        }
    }

    #[test]
    fn test_default_status_is_stopped() {
        let status = EngineStatus::stopped();
        assert!(!status.running);
        assert_eq!(status.state, SessionState::Stopped);
        assert!(status.device_id.is_none());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "stopped");
    }
}
