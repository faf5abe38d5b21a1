//! Relay lifecycle state machine.
//!
//! ```text
//! Starting ──► Running ──► Stopping
//!     └────────────────────────▲
//! ```
//!
//! There is no edge back to `Starting`: the serial handle is
//! opened exactly once per process.  A transient read failure is retried by
//! the read loop itself and never re-enters startup.

use std::fmt;

use thiserror::Error;

/// The phases a relay passes through during one process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RelayState {
    /// Opening the serial device and binding the listener.
    #[default]
    Starting,
    /// Pumping serial lines to clients and client lines to the device.
    Running,
    /// Interrupt received; closing clients and the device.
    Stopping,
}

/// Error returned for an illegal lifecycle transition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("invalid relay transition {from} -> {to}")]
    InvalidTransition { from: RelayState, to: RelayState },
}

impl RelayState {
    /// Returns `true` if moving from `self` to `next` is allowed.
    ///
    /// Staying in `Stopping` is allowed so that shutdown is idempotent.
    pub fn can_transition_to(self, next: RelayState) -> bool {
        matches!(
            (self, next),
            (RelayState::Starting, RelayState::Running)
                | (RelayState::Starting, RelayState::Stopping)
                | (RelayState::Running, RelayState::Stopping)
                | (RelayState::Stopping, RelayState::Stopping)
        )
    }

    /// Validates and performs a transition, returning the new state.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] for any edge not in the
    /// diagram above (e.g. `Running -> Starting`).
    pub fn transition(self, next: RelayState) -> Result<RelayState, LifecycleError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(LifecycleError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// `true` while the relay should keep moving data.
    pub fn is_running(self) -> bool {
        self == RelayState::Running
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayState::Starting => "STARTING",
            RelayState::Running => "RUNNING",
            RelayState::Stopping => "STOPPING",
        };
        f.write_str(name)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_starting() {
        assert_eq!(RelayState::default(), RelayState::Starting);
    }

    #[test]
    fn test_starting_to_running_is_allowed() {
        let next = RelayState::Starting.transition(RelayState::Running);
        assert_eq!(next, Ok(RelayState::Running));
    }

    #[test]
    fn test_running_to_stopping_is_allowed() {
        let next = RelayState::Running.transition(RelayState::Stopping);
        assert_eq!(next, Ok(RelayState::Stopping));
    }

    #[test]
    fn test_starting_to_stopping_is_allowed() {
        // Interrupt can arrive before the relay is fully up.
        assert!(RelayState::Starting.can_transition_to(RelayState::Stopping));
    }

    #[test]
    fn test_stopping_is_idempotent() {
        assert_eq!(
            RelayState::Stopping.transition(RelayState::Stopping),
            Ok(RelayState::Stopping)
        );
    }

    #[test]
    fn test_running_to_starting_is_rejected() {
        // Arrange / Act
        let result = RelayState::Running.transition(RelayState::Starting);

        // Assert: the serial handle is never re-opened
        assert_eq!(
            result,
            Err(LifecycleError::InvalidTransition {
                from: RelayState::Running,
                to: RelayState::Starting,
            })
        );
    }

    #[test]
    fn test_stopping_cannot_resume() {
        assert!(!RelayState::Stopping.can_transition_to(RelayState::Running));
        assert!(!RelayState::Stopping.can_transition_to(RelayState::Starting));
    }

    #[test]
    fn test_is_running_only_in_running() {
        assert!(!RelayState::Starting.is_running());
        assert!(RelayState::Running.is_running());
        assert!(!RelayState::Stopping.is_running());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(RelayState::Running.to_string(), "RUNNING");
        assert_eq!(
            LifecycleError::InvalidTransition {
                from: RelayState::Running,
                to: RelayState::Starting
            }
            .to_string(),
            "invalid relay transition RUNNING -> STARTING"
        );
    }
}
