use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::environment::rsync_argument;
use crate::error_codes::{ERR_INTERRUPTED, ERR_PROCESS_EXIT, ERR_SPAWN_FAILED};
use crate::input_validation::validate_request;
use crate::logging::{LogEntry, LogManager, DEFAULT_MAX_LOG_LINES};
use crate::rsync::command::CommandBuilder;
use crate::rsync::exit_codes::ExitCodeTable;
use crate::rsync::runner::{ProcessRunner, RunnerError};
use crate::rsync::types::{OutputEvent, RunRequest, Severity};
use crate::settings::{self, ResumePoint, SettingsStore};
use crate::state::{AppState, RunProgress, RunStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagerError {
    #[error("cannot run: {0}")]
    InvalidRequest(String),
    #[error("a run is already in progress")]
    AlreadyRunning,
    #[error("no run is in progress")]
    NotRunning,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded {
        total: usize,
    },
    Failed {
        index: usize,
        total: usize,
        source: PathBuf,
        exit_code: Option<i32>,
        reason: String,
        code: &'static str,
    },
    Interrupted {
        /// First source that still has to run.
        index: usize,
        total: usize,
    },
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Succeeded { .. } => RunStatus::Succeeded,
            RunOutcome::Failed { .. } => RunStatus::Failed,
            RunOutcome::Interrupted { .. } => RunStatus::Interrupted,
        }
    }

    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            RunOutcome::Succeeded { .. } => None,
            RunOutcome::Failed { code, .. } => Some(code),
            RunOutcome::Interrupted { .. } => Some(ERR_INTERRUPTED),
        }
    }

    pub fn message(&self) -> String {
        match self {
            RunOutcome::Succeeded { total } => {
                format!("All {total} source(s) copied successfully.")
            }
            RunOutcome::Failed {
                index,
                total,
                source,
                reason,
                ..
            } => format!(
                "Source {}/{} (index {}) '{}' failed: {}",
                index + 1,
                total,
                index,
                source.display(),
                reason
            ),
            RunOutcome::Interrupted { index, total } => format!(
                "Run interrupted; {index} of {total} source(s) completed. Run again to resume."
            ),
        }
    }
}

/// What subscribers receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Notification {
    Log(LogEntry),
    Progress(RunProgress),
    Status(RunStatus),
    Finished(RunOutcome),
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub program: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub grace_period: Duration,
    pub exit_codes: ExitCodeTable,
    pub max_log_lines: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("rsync"),
            working_dir: None,
            grace_period: Duration::from_secs(2),
            exit_codes: ExitCodeTable::default(),
            max_log_lines: DEFAULT_MAX_LOG_LINES,
        }
    }
}

impl From<&AppConfig> for ManagerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            program: config.rsync_program.clone(),
            working_dir: config.working_dir.clone(),
            grace_period: config.grace_period(),
            exit_codes: config.exit_code_table(),
            max_log_lines: config.max_log_lines,
        }
    }
}

struct ActiveRun {
    request: RunRequest,
    /// None for dry runs, which never touch the saved resume position.
    fingerprint: Option<String>,
    flags: Vec<String>,
    index: usize,
}

impl ActiveRun {
    fn total(&self) -> usize {
        self.request.sources.len()
    }
}

/// Drives rsync over the sources of a [`RunRequest`], one at a time.
///
/// All state changes happen inside [`poll`](Self::poll), which the host
/// calls on a timer from a single context. The runner's background tasks
/// only ever append to the event channel.
pub struct ProcessManager<S: SettingsStore> {
    config: ManagerConfig,
    builder: CommandBuilder,
    runner: ProcessRunner,
    events: UnboundedReceiver<OutputEvent>,
    state: AppState,
    run: Option<ActiveRun>,
    store: S,
    logs: LogManager,
    subscribers: Vec<UnboundedSender<Notification>>,
}

impl<S: SettingsStore> ProcessManager<S> {
    pub fn new(config: ManagerConfig, store: S) -> Self {
        let (tx, rx) = unbounded_channel();
        let runner = ProcessRunner::new(config.program.clone(), config.grace_period, tx);
        let logs = LogManager::new(config.max_log_lines);
        Self {
            config,
            builder: CommandBuilder::new(),
            runner,
            events: rx,
            state: AppState::default(),
            run: None,
            store,
            logs,
            subscribers: Vec::new(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// For the orchestration layer, which edits configuration between runs.
    pub fn state_mut(&mut self) -> &mut AppState {
        &mut self.state
    }

    pub fn status(&self) -> RunStatus {
        self.state.status
    }

    pub fn is_running(&self) -> bool {
        self.state.status.is_active()
    }

    pub fn logs(&self) -> &LogManager {
        &self.logs
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Receive every log line, progress update, status change and outcome
    /// from now on.
    pub fn subscribe(&mut self) -> UnboundedReceiver<Notification> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Add a line to the run log and send it to subscribers.
    pub fn log(&mut self, severity: Severity, message: &str, item: Option<usize>) {
        self.record(severity, message, item);
    }

    /// Index a run of `request` would start at. Dry runs always start at 0.
    pub fn resume_index(&self, request: &RunRequest) -> usize {
        if request.options.dry_run {
            return 0;
        }
        let total = request.sources.len();
        settings::load_resume(&self.store)
            .filter(|p| p.fingerprint == request.fingerprint())
            .map(|p| p.index)
            .filter(|index| *index > 0 && *index < total)
            .unwrap_or(0)
    }

    pub fn start(&mut self, request: RunRequest) -> Result<(), ManagerError> {
        if self.is_running() || self.runner.is_running() {
            return Err(ManagerError::AlreadyRunning);
        }
        validate_request(&request).map_err(|e| ManagerError::InvalidRequest(e.to_string()))?;

        let total = request.sources.len();
        let fingerprint = (!request.options.dry_run).then(|| request.fingerprint());
        let start_index = self.resume_index(&request);
        let flags = self.builder.build(&request.options);

        self.record(Severity::Info, &"-".repeat(20), None);
        if start_index > 0 {
            self.record(
                Severity::Info,
                &format!("Resuming rsync process from source {}/{}...", start_index + 1, total),
                None,
            );
        } else {
            self.record(
                Severity::Info,
                &format!("Starting rsync process for {total} source(s)..."),
                None,
            );
        }
        if fingerprint.is_none() {
            self.record(Severity::Info, "Dry run: saved resume position is left unchanged.", None);
        }
        self.record(
            Severity::Info,
            &format!("Using effective rsync options: {}", flags.join(" ")),
            None,
        );

        self.state.sources = request.sources.clone();
        self.state.destination = Some(request.destination.clone());
        self.state.options = request.options.clone();
        self.state.progress = RunProgress::starting(start_index, total);
        self.run = Some(ActiveRun {
            request,
            fingerprint,
            flags,
            index: start_index,
        });
        if start_index == 0 {
            self.save_progress(None);
        }
        self.set_status(RunStatus::Running);
        self.spawn_current();
        Ok(())
    }

    /// Request termination of the active run. Returns at once; the run
    /// becomes Interrupted when the process is gone.
    pub fn interrupt(&mut self) -> Result<(), ManagerError> {
        match self.state.status {
            RunStatus::Running => {
                self.record(Severity::Warning, "Interrupt requested. Stopping rsync...", self.current_index());
                self.set_status(RunStatus::Interrupting);
                if !self.runner.interrupt() {
                    debug!("process already exiting; waiting for its final event");
                }
                Ok(())
            }
            RunStatus::Interrupting => Ok(()),
            _ => Err(ManagerError::NotRunning),
        }
    }

    /// Handle every queued event in arrival order. Returns how many were
    /// handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Poll on `tick` until no run is active.
    pub async fn wait_until_finished(&mut self, tick: Duration) -> RunStatus {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            self.poll();
            if !self.is_running() {
                return self.state.status;
            }
        }
    }

    fn current_index(&self) -> Option<usize> {
        self.run.as_ref().map(|r| r.index)
    }

    fn handle_event(&mut self, event: OutputEvent) {
        match event {
            OutputEvent::Log { text, severity } => {
                self.record(severity, &text, self.current_index());
            }
            OutputEvent::Progress { percent, filename } => {
                if self.run.is_none() {
                    return;
                }
                self.state.progress.percent = percent;
                if filename.is_some() {
                    self.state.progress.filename = filename;
                }
                let progress = self.state.progress.clone();
                self.publish(Notification::Progress(progress));
            }
            OutputEvent::RunError { message } => {
                self.record(Severity::Error, &message, self.current_index());
            }
            OutputEvent::ItemFinished { index, exit_code } => {
                self.on_item_finished(index, exit_code);
            }
            OutputEvent::RunFinished { exit_code } => {
                if let Some(index) = self.current_index() {
                    self.on_item_finished(index, exit_code);
                }
            }
        }
    }

    fn on_item_finished(&mut self, index: usize, exit_code: i32) {
        let Some(run) = self.run.as_ref() else {
            debug!(index, exit_code, "finish event without an active run");
            return;
        };
        if run.index != index {
            warn!(expected = run.index, index, "finish event for another source ignored");
            return;
        }
        let total = run.total();
        let source = run.request.sources[index].clone();
        let interrupting = self.state.status == RunStatus::Interrupting;

        if exit_code == 0 {
            self.record(
                Severity::Success,
                &format!("Command ({}/{}) completed successfully.", index + 1, total),
                Some(index),
            );
            let next = index + 1;
            if next >= total {
                self.save_progress(None);
                self.finish(RunOutcome::Succeeded { total });
                return;
            }
            self.save_progress(Some(next));
            if interrupting {
                self.finish(RunOutcome::Interrupted { index: next, total });
                return;
            }
            if let Some(run) = self.run.as_mut() {
                run.index = next;
            }
            self.state.progress = RunProgress::starting(next, total);
            self.spawn_current();
            return;
        }

        self.save_progress(Some(index));
        if interrupting {
            self.record(
                Severity::Warning,
                &format!("Rsync process ({}/{}) interrupted by user.", index + 1, total),
                Some(index),
            );
            self.finish(RunOutcome::Interrupted { index, total });
        } else {
            let reason = self.config.exit_codes.describe(exit_code);
            self.finish(RunOutcome::Failed {
                index,
                total,
                source,
                exit_code: Some(exit_code),
                reason,
                code: ERR_PROCESS_EXIT,
            });
        }
    }

    fn spawn_current(&mut self) {
        let Some(run) = self.run.as_ref() else {
            return;
        };
        let index = run.index;
        let total = run.total();
        let source = run.request.sources[index].clone();
        let mut args = run.flags.clone();
        args.push(rsync_argument(&source));
        args.push(rsync_argument(&run.request.destination));

        self.record(
            Severity::Info,
            &format!(
                "Running command ({}/{}): {} {}",
                index + 1,
                total,
                self.config.program.display(),
                args.join(" ")
            ),
            Some(index),
        );
        let progress = self.state.progress.clone();
        self.publish(Notification::Progress(progress));

        let working_dir = self.config.working_dir.clone();
        if let Err(e) = self.runner.spawn_item(index, &args, working_dir.as_deref()) {
            self.on_spawn_failed(index, total, source, e);
        }
    }

    fn on_spawn_failed(&mut self, index: usize, total: usize, source: PathBuf, error: RunnerError) {
        self.save_progress((index > 0).then_some(index));

        let reason = match &error {
            RunnerError::Spawn { .. } => format!("{error}. Is rsync installed and in your PATH?"),
            RunnerError::AlreadyRunning => error.to_string(),
        };
        self.finish(RunOutcome::Failed {
            index,
            total,
            source,
            exit_code: None,
            reason,
            code: ERR_SPAWN_FAILED,
        });
    }

    fn finish(&mut self, outcome: RunOutcome) {
        let index = self.current_index();
        self.run = None;

        let message = outcome.message();
        let severity = match outcome {
            RunOutcome::Succeeded { .. } => Severity::Success,
            RunOutcome::Failed { .. } => Severity::Error,
            RunOutcome::Interrupted { .. } => Severity::Warning,
        };
        self.record(severity, &message, index);
        info!(status = ?outcome.status(), "{message}");

        self.set_status(outcome.status());
        if let RunOutcome::Failed { .. } = outcome {
            self.state.last_error = Some(message);
        }
        self.publish(Notification::Finished(outcome));
    }

    fn set_status(&mut self, status: RunStatus) {
        let previous = self.state.status;
        if self.state.set_status(status) {
            debug!(?previous, ?status, "status changed");
            self.publish(Notification::Status(status));
        }
    }

    fn record(&mut self, severity: Severity, message: &str, item: Option<usize>) {
        let entry = self.logs.log(severity, message, item);
        self.publish(Notification::Log(entry));
    }

    /// Save the active run's resume position; `None` clears it. Settings
    /// failures never affect the run; they are logged and dropped.
    fn save_progress(&mut self, index: Option<usize>) {
        let Some(fingerprint) = self.run.as_ref().and_then(|r| r.fingerprint.clone()) else {
            return;
        };
        let written = match index {
            Some(index) => settings::save_resume(&mut self.store, &ResumePoint { fingerprint, index }),
            None => settings::clear_resume(&mut self.store),
        };
        if let Err(e) = written {
            warn!(error = %e, "failed to persist resume state");
            self.record(
                Severity::Warning,
                &format!("Could not save resume state: {e:#}"),
                None,
            );
        }
    }

    fn publish(&mut self, notification: Notification) {
        self.subscribers
            .retain(|subscriber| subscriber.send(notification.clone()).is_ok());
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::rsync::types::RunOptions;
    use crate::settings::MemorySettingsStore;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    /// Stand-in for rsync. It records each source it is run for, fails with
    /// code 23 when `fail-<name>` exists and hangs (ignoring SIGTERM) when
    /// `hang-<name>` exists.
    struct FakeRsync {
        dir: TempDir,
        program: PathBuf,
        calls: PathBuf,
    }

    impl FakeRsync {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let program = dir.path().join("fake-rsync");
            let calls = dir.path().join("calls.log");
            let script = format!(
                r#"#!/bin/sh
for arg; do src="$dest"; dest="$arg"; done
echo "$src" >> "{calls}"
name=$(basename "$src")
if [ -e "{dir}/fail-$name" ]; then
    echo "rsync error: some files could not be transferred (code 23)" >&2
    exit 23
fi
if [ -e "{dir}/hang-$name" ]; then
    trap '' TERM
    echo "sending incremental file list"
    sleep 30
fi
printf '  45%%  12,345  file.txt\n'
exit 0
"#,
                calls = calls.display(),
                dir = dir.path().display()
            );
            std::fs::write(&program, script).unwrap();
            std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
            Self { dir, program, calls }
        }

        fn mark(&self, kind: &str, name: &str) {
            std::fs::write(self.dir.path().join(format!("{kind}-{name}")), "").unwrap();
        }

        fn unmark(&self, kind: &str, name: &str) {
            std::fs::remove_file(self.dir.path().join(format!("{kind}-{name}"))).unwrap();
        }

        fn calls(&self) -> Vec<String> {
            std::fs::read_to_string(&self.calls)
                .unwrap_or_default()
                .lines()
                .map(|l| Path::new(l).file_name().unwrap().to_string_lossy().to_string())
                .collect()
        }

        fn manager(&self, grace: Duration) -> ProcessManager<MemorySettingsStore> {
            let config = ManagerConfig {
                program: self.program.clone(),
                grace_period: grace,
                ..ManagerConfig::default()
            };
            ProcessManager::new(config, MemorySettingsStore::new())
        }
    }

    fn request(names: &[&str]) -> RunRequest {
        RunRequest::new(
            names.iter().map(|n| PathBuf::from(format!("/data/{n}"))).collect(),
            PathBuf::from("/backup"),
            RunOptions::default(),
        )
    }

    async fn drive<S: SettingsStore>(manager: &mut ProcessManager<S>) -> RunStatus {
        tokio::time::timeout(
            Duration::from_secs(10),
            manager.wait_until_finished(Duration::from_millis(10)),
        )
        .await
        .expect("run finished in time")
    }

    fn outcomes(rx: &mut UnboundedReceiver<Notification>) -> Vec<RunOutcome> {
        let mut found = Vec::new();
        while let Ok(n) = rx.try_recv() {
            if let Notification::Finished(outcome) = n {
                found.push(outcome);
            }
        }
        found
    }

    #[tokio::test]
    async fn test_all_sources_succeed_in_order() {
        let fake = FakeRsync::new();
        let mut manager = fake.manager(Duration::from_secs(2));
        let mut rx = manager.subscribe();

        manager.start(request(&["a", "b", "c"])).unwrap();
        assert_eq!(manager.status(), RunStatus::Running);
        assert_eq!(drive(&mut manager).await, RunStatus::Succeeded);

        assert_eq!(fake.calls(), vec!["a", "b", "c"]);
        assert_eq!(settings::load_resume(manager.store()), None);
        assert_eq!(outcomes(&mut rx), vec![RunOutcome::Succeeded { total: 3 }]);
        assert_eq!(manager.state().progress.percent, 45);
        assert_eq!(manager.state().progress.filename.as_deref(), Some("file.txt"));
    }

    #[tokio::test]
    async fn test_failure_persists_index_and_resume_starts_there() {
        let fake = FakeRsync::new();
        fake.mark("fail", "b");
        let mut manager = fake.manager(Duration::from_secs(2));
        let mut rx = manager.subscribe();
        let req = request(&["a", "b", "c"]);

        manager.start(req.clone()).unwrap();
        assert_eq!(drive(&mut manager).await, RunStatus::Failed);

        let resume = settings::load_resume(manager.store()).unwrap();
        assert_eq!(resume.index, 1);
        assert_eq!(resume.fingerprint, req.fingerprint());

        let failed = outcomes(&mut rx);
        assert_eq!(failed.len(), 1);
        match &failed[0] {
            RunOutcome::Failed { index, exit_code, code, .. } => {
                assert_eq!(*index, 1);
                assert_eq!(*exit_code, Some(23));
                assert_eq!(*code, ERR_PROCESS_EXIT);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        let error = manager.state().last_error.clone().unwrap();
        assert!(error.contains("partial transfer"));
        assert!(error.contains("index 1"));
        assert!(manager
            .logs()
            .get_logs(Some(1))
            .iter()
            .any(|l| l.level == Severity::Error && l.message.contains("code 23")));

        fake.unmark("fail", "b");
        assert_eq!(manager.resume_index(&req), 1);
        manager.start(req).unwrap();
        assert_eq!(drive(&mut manager).await, RunStatus::Succeeded);
        assert_eq!(fake.calls(), vec!["a", "b", "b", "c"]);
        assert_eq!(settings::load_resume(manager.store()), None);
    }

    #[tokio::test]
    async fn test_different_request_does_not_resume() {
        let fake = FakeRsync::new();
        fake.mark("fail", "b");
        let mut manager = fake.manager(Duration::from_secs(2));

        manager.start(request(&["a", "b"])).unwrap();
        assert_eq!(drive(&mut manager).await, RunStatus::Failed);

        fake.unmark("fail", "b");
        manager.start(request(&["a", "b", "c"])).unwrap();
        assert_eq!(drive(&mut manager).await, RunStatus::Succeeded);
        assert_eq!(fake.calls(), vec!["a", "b", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_start_while_running_is_rejected_then_interrupt() {
        let fake = FakeRsync::new();
        fake.mark("hang", "a");
        let grace = Duration::from_millis(300);
        let mut manager = fake.manager(grace);
        let req = request(&["a", "b"]);

        manager.start(req.clone()).unwrap();
        let before = settings::load_resume(manager.store());
        assert_eq!(manager.start(req.clone()), Err(ManagerError::AlreadyRunning));
        assert_eq!(manager.status(), RunStatus::Running);
        assert_eq!(settings::load_resume(manager.store()), before);

        // Wait until the script has installed its trap.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                manager.poll();
                if manager
                    .logs()
                    .get_logs(Some(0))
                    .iter()
                    .any(|l| l.message == "sending incremental file list")
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let started = tokio::time::Instant::now();
        manager.interrupt().unwrap();
        assert_eq!(manager.status(), RunStatus::Interrupting);
        assert_eq!(manager.interrupt(), Ok(()));

        assert_eq!(drive(&mut manager).await, RunStatus::Interrupted);
        assert!(started.elapsed() < grace * 2 + Duration::from_secs(2));
        assert_eq!(settings::load_resume(manager.store()).map(|p| p.index), Some(0));
        assert_eq!(fake.calls(), vec!["a"]);

        // A terminal state accepts a new start.
        fake.unmark("hang", "a");
        manager.start(req).unwrap();
        assert_eq!(drive(&mut manager).await, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_resume_position_alone() {
        let fake = FakeRsync::new();
        fake.mark("fail", "b");
        let mut manager = fake.manager(Duration::from_secs(2));
        let req = request(&["a", "b", "c"]);

        manager.start(req.clone()).unwrap();
        assert_eq!(drive(&mut manager).await, RunStatus::Failed);
        let saved = settings::load_resume(manager.store());
        assert_eq!(saved.as_ref().map(|p| p.index), Some(1));

        let mut dry = req.clone();
        dry.options.dry_run = true;
        fake.unmark("fail", "b");
        fake.mark("fail", "c");
        assert_eq!(manager.resume_index(&dry), 0);
        manager.start(dry.clone()).unwrap();
        assert_eq!(drive(&mut manager).await, RunStatus::Failed);
        assert_eq!(settings::load_resume(manager.store()), saved);

        fake.unmark("fail", "c");
        manager.start(dry).unwrap();
        assert_eq!(drive(&mut manager).await, RunStatus::Succeeded);
        assert_eq!(settings::load_resume(manager.store()), saved);

        manager.start(req).unwrap();
        assert_eq!(drive(&mut manager).await, RunStatus::Succeeded);
        assert_eq!(
            fake.calls(),
            vec!["a", "b", "a", "b", "c", "a", "b", "c", "b", "c"]
        );
        assert_eq!(settings::load_resume(manager.store()), None);
    }

    #[tokio::test]
    async fn test_spawn_failure_on_later_source_keeps_completed_count() {
        let dir = TempDir::new().unwrap();
        let program = dir.path().join("vanishing-rsync");
        std::fs::write(&program, "#!/bin/sh\nrm -f \"$0\"\nexit 0\n").unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
        let config = ManagerConfig {
            program,
            ..ManagerConfig::default()
        };
        let mut manager = ProcessManager::new(config, MemorySettingsStore::new());
        let mut rx = manager.subscribe();
        let req = request(&["a", "b", "c"]);

        manager.start(req.clone()).unwrap();
        assert_eq!(drive(&mut manager).await, RunStatus::Failed);

        assert_eq!(
            settings::load_resume(manager.store()),
            Some(ResumePoint {
                fingerprint: req.fingerprint(),
                index: 1
            })
        );
        assert!(matches!(
            outcomes(&mut rx).as_slice(),
            [RunOutcome::Failed { index: 1, code: ERR_SPAWN_FAILED, exit_code: None, .. }]
        ));
        assert_eq!(manager.resume_index(&req), 1);
    }

    #[tokio::test]
    async fn test_log_reaches_subscribers() {
        let mut manager = ProcessManager::new(ManagerConfig::default(), MemorySettingsStore::new());
        let mut rx = manager.subscribe();
        manager.log(Severity::Warning, "heads up", None);

        assert_eq!(manager.logs().len(), 1);
        match rx.try_recv() {
            Ok(Notification::Log(entry)) => {
                assert_eq!(entry.level, Severity::Warning);
                assert_eq!(entry.message, "heads up");
            }
            other => panic!("unexpected notification {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_request_changes_nothing() {
        let fake = FakeRsync::new();
        let mut manager = fake.manager(Duration::from_secs(1));

        let empty = RunRequest::new(Vec::new(), PathBuf::from("/backup"), RunOptions::default());
        assert!(matches!(manager.start(empty), Err(ManagerError::InvalidRequest(_))));

        let no_dest = RunRequest::new(vec![PathBuf::from("/a")], PathBuf::new(), RunOptions::default());
        assert!(matches!(manager.start(no_dest), Err(ManagerError::InvalidRequest(_))));

        assert_eq!(manager.status(), RunStatus::Idle);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_when_idle() {
        let fake = FakeRsync::new();
        let mut manager = fake.manager(Duration::from_secs(1));
        assert_eq!(manager.interrupt(), Err(ManagerError::NotRunning));
    }

    #[tokio::test]
    async fn test_spawn_failure_on_first_source() {
        let config = ManagerConfig {
            program: PathBuf::from("/nonexistent/rsync"),
            ..ManagerConfig::default()
        };
        let mut store = MemorySettingsStore::new();
        settings::save_resume(
            &mut store,
            &ResumePoint {
                fingerprint: "stale".to_string(),
                index: 3,
            },
        )
        .unwrap();
        let mut manager = ProcessManager::new(config, store);
        let mut rx = manager.subscribe();

        manager.start(request(&["a", "b"])).unwrap();
        assert_eq!(manager.status(), RunStatus::Failed);
        assert_eq!(settings::load_resume(manager.store()), None);

        let found = outcomes(&mut rx);
        assert!(matches!(
            found.as_slice(),
            [RunOutcome::Failed { index: 0, code: ERR_SPAWN_FAILED, exit_code: None, .. }]
        ));

        // The manager stays usable.
        assert!(matches!(
            manager.start(request(&["a"])),
            Ok(())
        ));
    }
}
