pub mod config;
pub mod coordinator;
pub mod environment;
pub mod error_codes;
pub mod input_validation;
pub mod logging;
pub mod rsync;
pub mod settings;
pub mod state;


pub use config::AppConfig;
pub use coordinator::Coordinator;
pub use rsync::{ManagerError, Notification, ProcessManager, RunOutcome, RunRequest};
pub use state::{AppState, RunStatus};

/// Version from Cargo.toml
pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
