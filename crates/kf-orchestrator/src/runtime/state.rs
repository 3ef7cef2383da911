//! Runtime lifecycle states

use std::fmt;
use std::sync::Mutex;

use kf_core::error::ConfigError;

/// Where a runtime is in the cluster lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// No control plane yet
    Uninitialized,
    /// `init` in progress
    Bootstrapping,
    /// Control plane up, ready for scale operations
    Bootstrapped,
    Joining,
    Deleting,
    Resetting,
    Upgrading,
    /// Torn down; terminal
    Reset,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeState::Uninitialized => "uninitialized",
            RuntimeState::Bootstrapping => "bootstrapping",
            RuntimeState::Bootstrapped => "bootstrapped",
            RuntimeState::Joining => "joining",
            RuntimeState::Deleting => "deleting",
            RuntimeState::Resetting => "resetting",
            RuntimeState::Upgrading => "upgrading",
            RuntimeState::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// A state-changing runtime operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Init,
    Join,
    Delete,
    Reset,
    Upgrade,
}

impl Operation {
    fn required(self) -> RuntimeState {
        match self {
            Operation::Init => RuntimeState::Uninitialized,
            _ => RuntimeState::Bootstrapped,
        }
    }

    fn busy(self) -> RuntimeState {
        match self {
            Operation::Init => RuntimeState::Bootstrapping,
            Operation::Join => RuntimeState::Joining,
            Operation::Delete => RuntimeState::Deleting,
            Operation::Reset => RuntimeState::Resetting,
            Operation::Upgrade => RuntimeState::Upgrading,
        }
    }

    fn done(self) -> RuntimeState {
        match self {
            Operation::Reset => RuntimeState::Reset,
            _ => RuntimeState::Bootstrapped,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Init => "init",
            Operation::Join => "join",
            Operation::Delete => "delete",
            Operation::Reset => "reset",
            Operation::Upgrade => "upgrade",
        };
        f.write_str(name)
    }
}

/// Guards runtime operations against the current state
///
/// A failed operation returns the runtime to the state it started from.
#[derive(Debug)]
pub struct StateMachine {
    state: Mutex<RuntimeState>,
}

impl StateMachine {
    pub fn new(initial: RuntimeState) -> Self {
        Self {
            state: Mutex::new(initial),
        }
    }

    pub fn current(&self) -> RuntimeState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enter the busy state of `op`, returning the state to restore on failure
    pub fn begin(&self, op: Operation) -> Result<RuntimeState, ConfigError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != op.required() {
            return Err(ConfigError::Invalid(format!(
                "cannot {} a cluster runtime in state {}",
                op, *state
            )));
        }
        let previous = *state;
        *state = op.busy();
        Ok(previous)
    }

    /// Leave the busy state of `op`
    pub fn finish(&self, op: Operation, previous: RuntimeState, succeeded: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = if succeeded { op.done() } else { previous };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_join() {
        let machine = StateMachine::new(RuntimeState::Uninitialized);
        assert!(machine.begin(Operation::Join).is_err());

        let previous = machine.begin(Operation::Init).unwrap();
        assert_eq!(machine.current(), RuntimeState::Bootstrapping);
        machine.finish(Operation::Init, previous, true);
        assert_eq!(machine.current(), RuntimeState::Bootstrapped);

        let previous = machine.begin(Operation::Join).unwrap();
        assert_eq!(machine.current(), RuntimeState::Joining);
        machine.finish(Operation::Join, previous, true);
        assert_eq!(machine.current(), RuntimeState::Bootstrapped);
    }

    #[test]
    fn test_failure_restores_previous_state() {
        let machine = StateMachine::new(RuntimeState::Bootstrapped);
        let previous = machine.begin(Operation::Delete).unwrap();
        machine.finish(Operation::Delete, previous, false);
        assert_eq!(machine.current(), RuntimeState::Bootstrapped);
    }

    #[test]
    fn test_reset_is_terminal() {
        let machine = StateMachine::new(RuntimeState::Bootstrapped);
        let previous = machine.begin(Operation::Reset).unwrap();
        machine.finish(Operation::Reset, previous, true);
        assert_eq!(machine.current(), RuntimeState::Reset);

        for op in [
            Operation::Init,
            Operation::Join,
            Operation::Delete,
            Operation::Reset,
            Operation::Upgrade,
        ] {
            assert!(machine.begin(op).is_err(), "{} after reset", op);
        }
    }

    #[test]
    fn test_busy_runtime_rejects_second_operation() {
        let machine = StateMachine::new(RuntimeState::Bootstrapped);
        machine.begin(Operation::Upgrade).unwrap();
        assert!(machine.begin(Operation::Join).is_err());
    }
}
