//! The layer between a front end and the [`ProcessManager`].
//!
//! It owns the persisted configuration: sources, destination and option
//! flags are loaded from the settings store on startup, and every edit is
//! written back. Edits that would change what a run copies drop any saved
//! resume position.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::environment::{self, RsyncInfo};
use crate::error_codes::ERR_RSYNC_NOT_FOUND;
use crate::input_validation::{validate_option_name, validate_path_argument};
use crate::rsync::manager::{ManagerConfig, ManagerError, Notification, ProcessManager};
use crate::rsync::types::{RunOptions, RunRequest, Severity};
use crate::settings::{self, SettingsStore};
use crate::state::AppState;

/// Result of [`Coordinator::add_sources`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SourceEdit {
    pub added: Vec<PathBuf>,
    /// Paths that do not exist and were left out.
    pub skipped: Vec<PathBuf>,
}

pub struct Coordinator<S: SettingsStore> {
    manager: ProcessManager<S>,
}

impl<S: SettingsStore> Coordinator<S> {
    pub fn new(config: ManagerConfig, store: S) -> Self {
        let mut manager = ProcessManager::new(config, store);

        let sources = settings::load_sources(manager.store());
        let destination = settings::load_destination(manager.store());
        let options = settings::load_options(manager.store());
        let state = manager.state_mut();
        state.set_sources(sources);
        state.set_destination(destination);
        state.set_options(options);
        debug!(sources = state.sources.len(), "configuration loaded");

        Self { manager }
    }

    pub fn from_config(config: &AppConfig, store: S) -> Self {
        Self::new(ManagerConfig::from(config), store)
    }

    pub fn state(&self) -> &AppState {
        self.manager.state()
    }

    pub fn manager(&self) -> &ProcessManager<S> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ProcessManager<S> {
        &mut self.manager
    }

    pub fn add_sources<I>(&mut self, paths: I) -> Result<SourceEdit>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.ensure_idle()?;
        let mut edit = SourceEdit::default();
        let mut sources = self.state().sources.clone();

        for path in paths {
            validate_path_argument(&path)?;
            let path = absolute(&path)?;
            if !path.exists() {
                warn!(path = %path.display(), "source does not exist; skipped");
                self.manager.log(
                    Severity::Warning,
                    &format!("Skipped missing source: {}", path.display()),
                    None,
                );
                edit.skipped.push(path);
                continue;
            }
            if !sources.contains(&path) {
                sources.push(path.clone());
                edit.added.push(path);
            }
        }

        self.replace_sources(sources)?;
        Ok(edit)
    }

    /// Remove the given sources. Returns how many were present.
    pub fn remove_sources(&mut self, paths: &[PathBuf]) -> Result<usize> {
        self.ensure_idle()?;
        let mut targets = Vec::with_capacity(paths.len());
        for path in paths {
            targets.push(absolute(path)?);
        }

        let before = self.state().sources.len();
        let sources: Vec<PathBuf> = self
            .state()
            .sources
            .iter()
            .filter(|s| !targets.contains(s) && !paths.contains(s))
            .cloned()
            .collect();
        let removed = before - sources.len();

        self.replace_sources(sources)?;
        Ok(removed)
    }

    pub fn clear_sources(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.replace_sources(Vec::new())
    }

    pub fn set_destination(&mut self, destination: Option<PathBuf>) -> Result<()> {
        self.ensure_idle()?;
        let destination = match destination {
            Some(path) => {
                validate_path_argument(&path)?;
                Some(absolute(&path)?)
            }
            None => None,
        };

        if self.manager.state_mut().set_destination(destination.clone()) {
            settings::save_destination(self.manager.store_mut(), destination.as_deref())?;
            settings::clear_resume(self.manager.store_mut())?;
        }
        Ok(())
    }

    pub fn set_option(&mut self, name: &str, value: bool) -> Result<()> {
        validate_option_name(name)?;
        let mut options = self.state().options.clone();
        options.set(name, value);
        self.set_options(options)
    }

    pub fn set_options(&mut self, options: RunOptions) -> Result<()> {
        self.ensure_idle()?;
        if self.manager.state_mut().set_options(options.clone()) {
            settings::save_options(self.manager.store_mut(), &options)?;
            settings::clear_resume(self.manager.store_mut())?;
        }
        Ok(())
    }

    /// Request for the configured sources, destination and options.
    pub fn request(&self) -> RunRequest {
        let state = self.state();
        RunRequest::new(
            state.sources.clone(),
            state.destination.clone().unwrap_or_default(),
            state.options.clone(),
        )
    }

    /// Source index the next [`run`](Self::run) would start from, when it
    /// would resume rather than start over.
    pub fn resume_index(&self) -> Option<usize> {
        let index = self.manager.resume_index(&self.request());
        (index > 0).then_some(index)
    }

    pub fn run(&mut self) -> Result<(), ManagerError> {
        let request = self.request();
        self.manager.start(request)
    }

    /// Run a request that is not taken from (or saved to) the configuration.
    pub fn run_request(&mut self, request: RunRequest) -> Result<(), ManagerError> {
        self.manager.start(request)
    }

    pub fn interrupt(&mut self) -> Result<(), ManagerError> {
        self.manager.interrupt()
    }

    pub fn poll(&mut self) -> usize {
        self.manager.poll()
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<Notification> {
        self.manager.subscribe()
    }

    pub async fn check_rsync(&mut self) -> Result<RsyncInfo> {
        let program = self.manager.config().program.clone();
        match environment::check_rsync(&program).await {
            Ok(info) => Ok(info),
            Err(e) => {
                self.manager.log(
                    Severity::Error,
                    &format!("{ERR_RSYNC_NOT_FOUND}: {e:#}"),
                    None,
                );
                Err(e)
            }
        }
    }

    fn replace_sources(&mut self, sources: Vec<PathBuf>) -> Result<()> {
        if self.manager.state_mut().set_sources(sources) {
            let sources = self.state().sources.clone();
            settings::save_sources(self.manager.store_mut(), &sources)?;
            settings::clear_resume(self.manager.store_mut())?;
        }
        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.manager.is_running() {
            bail!("Cannot change configuration while a run is in progress");
        }
        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
