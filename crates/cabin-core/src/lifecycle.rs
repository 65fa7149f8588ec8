use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Observed state of an environment. Never stored: reconciled from the
/// runtime config and the engine on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvState {
    Absent,
    Built,
    Running,
}

impl fmt::Display for EnvState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Absent => "absent",
            Self::Built => "built",
            Self::Running => "running",
        })
    }
}

pub fn validate_transition(from: EnvState, to: EnvState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (
            EnvState::Absent | EnvState::Built | EnvState::Running,
            EnvState::Built
        ) | (EnvState::Built, EnvState::Running)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(EnvState::Absent, EnvState::Built).is_ok());
        assert!(validate_transition(EnvState::Built, EnvState::Built).is_ok()); // idempotent rebuild
        assert!(validate_transition(EnvState::Running, EnvState::Built).is_ok());
        assert!(validate_transition(EnvState::Built, EnvState::Running).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(EnvState::Absent, EnvState::Running).is_err());
        assert!(validate_transition(EnvState::Running, EnvState::Running).is_err());
        assert!(validate_transition(EnvState::Built, EnvState::Absent).is_err());
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(EnvState::Running.to_string(), "running");
        assert_eq!(
            serde_json::to_string(&EnvState::Absent).unwrap(),
            "\"absent\""
        );
    }
}
