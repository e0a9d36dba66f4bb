use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rsync::classify::classify_chunk;
use crate::rsync::types::{OutputEvent, Severity, EXIT_KILLED};

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("a process is already running")]
    AlreadyRunning,
}

/// Runs one external process at a time and forwards its classified output.
///
/// Output is read on background tasks and pushed into an unbounded channel;
/// the runner itself never touches shared state. Each process produces
/// exactly one terminal event, sent after both output streams are drained.
pub struct ProcessRunner {
    program: PathBuf,
    grace_period: Duration,
    events: UnboundedSender<OutputEvent>,
    active: Arc<AtomicBool>,
    cancel: Option<CancellationToken>,
}

impl ProcessRunner {
    pub fn new(
        program: impl Into<PathBuf>,
        grace_period: Duration,
        events: UnboundedSender<OutputEvent>,
    ) -> Self {
        Self {
            program: program.into(),
            grace_period,
            events,
            active: Arc::new(AtomicBool::new(false)),
            cancel: None,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start the program; its terminal event is [`OutputEvent::RunFinished`].
    pub fn spawn(&mut self, args: &[String], working_dir: Option<&Path>) -> Result<(), RunnerError> {
        self.launch(None, args, working_dir)
    }

    /// Start the program for source `index`; its terminal event is
    /// [`OutputEvent::ItemFinished`].
    pub fn spawn_item(
        &mut self,
        index: usize,
        args: &[String],
        working_dir: Option<&Path>,
    ) -> Result<(), RunnerError> {
        self.launch(Some(index), args, working_dir)
    }

    /// Ask the running process to stop. Returns immediately; the terminal
    /// event follows once the process is gone. Returns false when nothing
    /// is running.
    pub fn interrupt(&self) -> bool {
        match &self.cancel {
            Some(token) if self.is_running() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    fn launch(
        &mut self,
        item: Option<usize>,
        args: &[String],
        working_dir: Option<&Path>,
    ) -> Result<(), RunnerError> {
        if self.is_running() {
            return Err(RunnerError::AlreadyRunning);
        }

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }
        // Own process group, so termination also reaches rsync's forked helpers.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        info!(program = %self.program.display(), pid = ?child.id(), ?item, "process started");

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, "stdout", self.events.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, "stderr", self.events.clone()));
        }

        let token = CancellationToken::new();
        self.cancel = Some(token.clone());
        self.active.store(true, Ordering::SeqCst);

        let active = self.active.clone();
        let events = self.events.clone();
        let grace = self.grace_period;
        tokio::spawn(async move {
            let exit_code = supervise(child, readers, token, grace, &events).await;
            active.store(false, Ordering::SeqCst);
            let terminal = match item {
                Some(index) => OutputEvent::ItemFinished { index, exit_code },
                None => OutputEvent::RunFinished { exit_code },
            };
            debug!(?terminal, "process finished");
            let _ = events.send(terminal);
        });

        Ok(())
    }
}

/// Wait for exit (or interruption), then drain the readers.
async fn supervise(
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    token: CancellationToken,
    grace: Duration,
    events: &UnboundedSender<OutputEvent>,
) -> i32 {
    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = token.cancelled() => None,
    };
    let interrupted = waited.is_none();
    let status = match waited {
        Some(status) => status,
        None => terminate_then_kill(&mut child, grace, events).await,
    };

    // After a forced kill a stray helper may still hold a pipe open, so the
    // drain is bounded; otherwise read to EOF.
    let deadline = tokio::time::Instant::now() + grace;
    for mut reader in readers {
        if !interrupted {
            let _ = reader.await;
            continue;
        }
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            reader.abort();
            let _ = reader.await;
        }
    }

    match status {
        Ok(status) => exit_code_of(status),
        Err(e) => {
            let _ = events.send(OutputEvent::RunError {
                message: format!("failed to wait for process: {e}"),
            });
            EXIT_KILLED
        }
    }
}

async fn terminate_then_kill(
    child: &mut Child,
    grace: Duration,
    events: &UnboundedSender<OutputEvent>,
) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Some(pid) = child.id() {
            match killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => {
                    let _ = events.send(OutputEvent::log(Severity::Info, "Sent SIGTERM to rsync process."));
                }
                Err(e) => warn!(pid, error = %e, "SIGTERM failed"),
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    if let Ok(status) = timeout(grace, child.wait()).await {
        return status;
    }

    let _ = events.send(OutputEvent::log(
        Severity::Warning,
        format!(
            "rsync did not terminate within {} ms, sending SIGKILL.",
            grace.as_millis()
        ),
    ));
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Some(pid) = child.id() {
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }
    let _ = child.start_kill();
    child.wait().await
}

fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(EXIT_KILLED)
}

fn spawn_reader<R>(stream: R, label: &'static str, events: UnboundedSender<OutputEvent>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            match read_segment(&mut reader, &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    for event in classify_chunk(&text) {
                        if events.send(event).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = events.send(OutputEvent::RunError {
                        message: format!("failed to read {label}: {e}"),
                    });
                    break;
                }
            }
        }
    })
}

/// Read up to and including the next `\n` or `\r`.
async fn read_segment<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut total = 0;
    loop {
        let (found, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(total);
            }
            match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(i) => {
                    buf.extend_from_slice(&available[..=i]);
                    (true, i + 1)
                }
                None => {
                    buf.extend_from_slice(available);
                    (false, available.len())
                }
            }
        };
        reader.consume(used);
        total += used;
        if found {
            return Ok(total);
        }
    }
}
