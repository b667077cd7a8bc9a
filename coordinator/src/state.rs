//! Coordinator state definitions.

/// Coordinator operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Coordinator is constructed; recovery has not run.
    Starting,
    /// Pending records from a previous run are being replayed.
    Recovering,
    /// Coordinator is running and accepting exchanges.
    Running,
    /// Coordinator is shutting down, not accepting new exchanges.
    ShuttingDown,
    /// Coordinator is stopped.
    Stopped,
}

impl CoordinatorState {
    /// Check if the coordinator is accepting new exchanges.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, CoordinatorState::Running)
    }

    /// Check if recovery may start from this state.
    pub fn can_recover(&self) -> bool {
        matches!(self, CoordinatorState::Starting)
    }

    /// Check if the coordinator is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CoordinatorState::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_running_accepts() {
        for state in [
            CoordinatorState::Starting,
            CoordinatorState::Recovering,
            CoordinatorState::ShuttingDown,
            CoordinatorState::Stopped,
        ] {
            assert!(!state.accepts_requests());
        }
        assert!(CoordinatorState::Running.accepts_requests());
        assert!(CoordinatorState::Starting.can_recover());
        assert!(!CoordinatorState::Running.can_recover());
    }
}
