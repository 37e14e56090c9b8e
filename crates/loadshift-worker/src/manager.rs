//! Worker manager — spawns, watches, and stops the worker process.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use loadshift_core::WorkerConfig;
use loadshift_probe::{Endpoint, Readiness, http_probe};

use crate::error::{WorkerError, WorkerResult};

/// Per-attempt timeout for readiness probes.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause between readiness probes.
const PROBE_INTERVAL: Duration = Duration::from_millis(200);

/// How the manager decides a freshly spawned worker can take traffic.
#[derive(Debug, Clone)]
pub enum ReadinessPolicy {
    /// Poll an HTTP endpoint until it answers 2xx.
    Probe(Endpoint),
    /// The worker has no readiness signal; wait a fixed delay.
    StartupDelay(Duration),
}

/// Everything needed to launch the worker.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub readiness: ReadinessPolicy,
    /// Upper bound on the whole readiness wait, startup delay included.
    pub ready_timeout: Duration,
    /// Time between SIGTERM and a forced kill.
    pub stop_grace: Duration,
}

impl WorkerSpec {
    pub fn from_config(config: &WorkerConfig) -> WorkerResult<Self> {
        let readiness = match &config.ready_url {
            Some(url) => ReadinessPolicy::Probe(Endpoint::parse(url)?),
            None => ReadinessPolicy::StartupDelay(config.startup_delay()),
        };

        Ok(Self {
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            working_dir: config.working_dir.clone(),
            readiness,
            ready_timeout: config.ready_timeout(),
            stop_grace: config.stop_grace(),
        })
    }
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl WorkerExit {
    /// The exit could not be observed (the observer went away).
    fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for WorkerExit {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(sig)) => write!(f, "signal {sig}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// What the manager asks of the exit observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopRequest {
    Terminate,
    Kill,
}

/// A running (or just exited) worker owned by the manager.
struct WorkerHandle {
    pid: u32,
    started_at: Instant,
    /// Set once by the observer task when the child has been reaped.
    exit_rx: watch::Receiver<Option<WorkerExit>>,
    /// Requests to the observer, which alone may signal the child.
    /// Dropping it forces a kill.
    stop_tx: mpsc::UnboundedSender<StopRequest>,
}

impl WorkerHandle {
    fn exit(&self) -> Option<WorkerExit> {
        *self.exit_rx.borrow()
    }
}

/// Owns the lifecycle of the single worker process.
pub struct WorkerManager {
    spec: WorkerSpec,
    handle: Option<WorkerHandle>,
}

impl WorkerManager {
    pub fn new(spec: WorkerSpec) -> Self {
        Self { spec, handle: None }
    }

    /// PID of the current worker, if one is tracked.
    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(|h| h.pid)
    }

    /// Whether the worker is alive.
    ///
    /// Clears the handle if the process has exited since the last check.
    pub fn is_running(&mut self) -> bool {
        let Some(handle) = &self.handle else {
            return false;
        };

        match handle.exit() {
            None => true,
            Some(exit) => {
                debug!(pid = handle.pid, %exit, "clearing handle of exited worker");
                self.handle = None;
                false
            }
        }
    }

    /// Start the worker and wait until it is ready.
    ///
    /// A no-op returning the existing PID if a worker is already running.
    /// On any failure the child is stopped before returning, so no
    /// orphan is left behind.
    pub async fn spawn(&mut self) -> WorkerResult<u32> {
        if self.is_running()
            && let Some(pid) = self.pid()
        {
            debug!(pid, "worker already running, spawn skipped");
            return Ok(pid);
        }

        let mut cmd = Command::new(&self.spec.command);
        cmd.args(&self.spec.args)
            .envs(&self.spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| WorkerError::Spawn {
            command: self.spec.command.clone(),
            source,
        })?;

        let Some(pid) = child.id() else {
            return Err(WorkerError::ExitedEarly {
                exit: WorkerExit::unknown(),
            });
        };

        if let Some(stdout) = child.stdout.take() {
            pump_output(stdout, pid, OutputStream::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            pump_output(stderr, pid, OutputStream::Stderr);
        }

        let started_at = Instant::now();
        let (exit_tx, exit_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        tokio::spawn(observe_exit(child, pid, started_at, exit_tx, stop_rx));

        self.handle = Some(WorkerHandle {
            pid,
            started_at,
            exit_rx: exit_rx.clone(),
            stop_tx,
        });
        info!(pid, command = %self.spec.command, "worker spawned");

        if let Err(e) = self.await_ready(exit_rx).await {
            warn!(pid, error = %e, "worker failed to become ready");
            self.stop().await;
            return Err(e);
        }

        info!(
            pid,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "worker ready"
        );
        Ok(pid)
    }

    /// Stop the worker: SIGTERM, then a forced kill after the grace window.
    ///
    /// A no-op returning `None` when no worker is tracked. The handle is
    /// cleared on every path.
    pub async fn stop(&mut self) -> Option<WorkerExit> {
        let mut handle = self.handle.take()?;
        if let Some(exit) = handle.exit() {
            debug!(pid = handle.pid, %exit, "worker already exited");
            return Some(exit);
        }

        let pid = handle.pid;
        info!(pid, grace_ms = self.spec.stop_grace.as_millis() as u64, "stopping worker");

        let _ = handle.stop_tx.send(StopRequest::Terminate);

        let grace = self.spec.stop_grace;
        if let Ok(exit) = tokio::time::timeout(grace, wait_exit(&mut handle.exit_rx)).await {
            return Some(exit);
        }

        warn!(pid, ?grace, "worker ignored SIGTERM, killing");
        let _ = handle.stop_tx.send(StopRequest::Kill);

        match tokio::time::timeout(grace, wait_exit(&mut handle.exit_rx)).await {
            Ok(exit) => Some(exit),
            Err(_) => {
                error!(pid, "worker did not exit after SIGKILL");
                None
            }
        }
    }

    async fn await_ready(
        &self,
        mut exit_rx: watch::Receiver<Option<WorkerExit>>,
    ) -> WorkerResult<()> {
        let timeout = self.spec.ready_timeout;
        let ready = async {
            match &self.spec.readiness {
                ReadinessPolicy::StartupDelay(delay) => tokio::time::sleep(*delay).await,
                ReadinessPolicy::Probe(endpoint) => {
                    let probe_timeout = PROBE_TIMEOUT.min(timeout);
                    while http_probe(endpoint, probe_timeout).await != Readiness::Ready {
                        tokio::time::sleep(PROBE_INTERVAL).await;
                    }
                }
            }
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, ready) => {
                result.map_err(|_| WorkerError::NotReady { timeout })
            }
            exit = wait_exit(&mut exit_rx) => Err(WorkerError::ExitedEarly { exit }),
        }
    }
}

impl Drop for WorkerManager {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle
            && handle.exit().is_none()
        {
            warn!(
                pid = handle.pid,
                uptime_secs = handle.started_at.elapsed().as_secs(),
                "worker manager dropped with a live worker, killing it"
            );
        }
    }
}

/// Wait for the observer to publish the exit status.
async fn wait_exit(exit_rx: &mut watch::Receiver<Option<WorkerExit>>) -> WorkerExit {
    match exit_rx.wait_for(Option::is_some).await {
        Ok(exit) => (*exit).unwrap_or_else(WorkerExit::unknown),
        Err(_) => WorkerExit::unknown(),
    }
}

/// Owns the child until it exits: reaps it, logs how it ended, and
/// publishes the status. Signals are only sent from here, while the
/// child is known to be unreaped. A kill request, or the manager's
/// sender going away, forces termination.
async fn observe_exit(
    mut child: Child,
    pid: u32,
    started_at: Instant,
    exit_tx: watch::Sender<Option<WorkerExit>>,
    mut stop_rx: mpsc::UnboundedReceiver<StopRequest>,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            request = stop_rx.recv() => match request {
                Some(StopRequest::Terminate) => {
                    // `id()` is gone once the child has been reaped.
                    if let Some(pid) = child.id()
                        && let Err(e) = send_terminate(pid)
                    {
                        warn!(pid, error = %e, "failed to send SIGTERM");
                    }
                }
                Some(StopRequest::Kill) | None => {
                    if let Err(e) = child.start_kill() {
                        warn!(pid, error = %e, "failed to kill worker");
                    }
                    break child.wait().await;
                }
            },
        }
    };

    let exit = match status {
        Ok(status) => WorkerExit::from(status),
        Err(e) => {
            error!(pid, error = %e, "failed to reap worker");
            WorkerExit::unknown()
        }
    };

    let uptime_secs = started_at.elapsed().as_secs();
    if exit.success() {
        info!(pid, %exit, uptime_secs, "worker exited");
    } else {
        warn!(pid, %exit, uptime_secs, "worker exited");
    }

    let _ = exit_tx.send(Some(exit));
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Forward the worker's output to the log, one event per line.
fn pump_output<R>(reader: R, pid: u32, stream: OutputStream)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match stream {
                    OutputStream::Stdout => {
                        info!(target: "loadshift::worker_output", pid, "{line}")
                    }
                    OutputStream::Stderr => {
                        warn!(target: "loadshift::worker_output", pid, "{line}")
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    debug!(pid, ?stream, error = %e, "worker output closed");
                    break;
                }
            }
        }
    });
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> std::io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "graceful termination needs unix signals",
    ))
}
