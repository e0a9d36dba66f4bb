//! Running rsync: argument building, process supervision, output
//! classification and the run state machine.

pub mod classify;
pub mod command;
pub mod exit_codes;
pub mod manager;
pub mod runner;
pub mod types;

pub use command::CommandBuilder;
pub use exit_codes::ExitCodeTable;
pub use manager::{ManagerConfig, ManagerError, Notification, ProcessManager, RunOutcome};
pub use runner::{ProcessRunner, RunnerError};
pub use types::{OutputEvent, RunOptions, RunRequest, Severity, EXIT_KILLED};
