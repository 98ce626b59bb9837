//! Worker process lifecycle.
//!
//! The supervisor spawns the worker in its own process group, watches it
//! from a background monitor thread, and tears it down with SIGTERM then
//! SIGKILL to the whole group.

use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};

/// Step between exit checks during the grace period.
const EXIT_POLL_STEP: Duration = Duration::from_millis(10);

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Spawned, monitor not yet running.
    Starting,
    /// Accepting calls.
    Running,
    /// Stop in progress.
    Stopping,
    /// Exited, either stopped or unexpectedly.
    Stopped,
}

/// An unexpected worker exit observed while no stop was in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerFault {
    /// Exit code, if the worker exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if any.
    pub signal: Option<i32>,
}

impl From<ExitStatus> for WorkerFault {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl std::fmt::Display for WorkerFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "worker exited with code {code}"),
            (None, Some(signal)) => write!(f, "worker killed by signal {signal}"),
            (None, None) => write!(f, "worker exited"),
        }
    }
}

/// How a stop request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A previous stop already ran; nothing was done.
    AlreadyStopped,
    /// The worker had already exited; no signal was needed.
    AlreadyExited,
    /// The worker exited within the grace period after SIGTERM.
    Graceful,
    /// The worker was killed with SIGKILL.
    Forced,
}

/// The worker's standard streams, handed to the channel.
#[derive(Debug)]
pub struct WorkerStdio {
    /// Request stream.
    pub stdin: ChildStdin,
    /// Payload stream.
    pub stdout: ChildStdout,
    /// Diagnostic stream.
    pub stderr: ChildStderr,
}

/// State shared with the monitor thread.
struct Shared {
    pid: u32,
    child: Mutex<Child>,
    state: Mutex<WorkerState>,
    fault: Mutex<Option<WorkerFault>>,
    shutdown: AtomicBool,
}

impl Shared {
    /// Probe the child without blocking, recording an unexpected exit.
    fn probe(&self) -> Option<ExitStatus> {
        let status = match self.child.lock().try_wait() {
            Ok(status) => status?,
            Err(e) => {
                warn!(pid = self.pid, error = %e, "Failed to probe worker");
                return None;
            }
        };

        if !self.shutdown.load(Ordering::SeqCst) {
            let mut fault = self.fault.lock();
            if fault.is_none() {
                let observed = WorkerFault::from(status);
                error!(pid = self.pid, fault = %observed, "Worker exited unexpectedly");
                *fault = Some(observed);
            }
            *self.state.lock() = WorkerState::Stopped;
        }
        Some(status)
    }
}

/// Owns a worker process and its monitor.
///
/// Dropping the supervisor stops the worker.
pub struct ProcessSupervisor {
    shared: Arc<Shared>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    wake: Mutex<Option<Sender<()>>>,
    grace_period: Duration,
    monitor_join_timeout: Duration,
}

impl ProcessSupervisor {
    /// Spawn the configured command in a new process group.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::EmptyCommand`] or [`DaemonError::SpawnFailed`].
    pub fn spawn(config: &DaemonConfig) -> DaemonResult<(Self, WorkerStdio)> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or(DaemonError::EmptyCommand)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = command.spawn().map_err(|source| DaemonError::SpawnFailed {
            command: program.clone(),
            source,
        })?;

        let pid = child.id();
        let stdio = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => WorkerStdio {
                stdin,
                stdout,
                stderr,
            },
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(DaemonError::SpawnFailed {
                    command: program.clone(),
                    source: std::io::Error::other("worker streams unavailable"),
                });
            }
        };

        let shared = Arc::new(Shared {
            pid,
            child: Mutex::new(child),
            state: Mutex::new(WorkerState::Starting),
            fault: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        });

        let supervisor = Self {
            shared,
            monitor: Mutex::new(None),
            wake: Mutex::new(None),
            grace_period: config.grace_period,
            monitor_join_timeout: config.monitor_join_timeout,
        };
        supervisor.start_monitor(config.monitor_interval)?;
        *supervisor.shared.state.lock() = WorkerState::Running;

        info!(pid, command = ?config.command, "Started worker");
        Ok((supervisor, stdio))
    }

    fn start_monitor(&self, interval: Duration) -> DaemonResult<()> {
        let shared = Arc::clone(&self.shared);
        let (wake_tx, wake_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(format!("suola-worker-monitor-{}", self.shared.pid))
            .spawn(move || {
                debug!(pid = shared.pid, "Worker monitor started");
                loop {
                    match wake_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if shared.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    if shared.probe().is_some() {
                        break;
                    }
                }
                debug!(pid = shared.pid, "Worker monitor stopped");
            })?;

        *self.monitor.lock() = Some(handle);
        *self.wake.lock() = Some(wake_tx);
        Ok(())
    }

    /// Process id of the worker, which is also its process group id.
    pub fn pid(&self) -> u32 {
        self.shared.pid
    }

    /// Whether the worker is alive and no stop has been requested.
    pub fn is_running(&self) -> bool {
        !self.shared.shutdown.load(Ordering::SeqCst) && self.shared.probe().is_none()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        *self.shared.state.lock()
    }

    /// The unexpected exit recorded by the monitor, if any.
    pub fn fault(&self) -> Option<WorkerFault> {
        *self.shared.fault.lock()
    }

    /// Stop the worker. Idempotent.
    ///
    /// Sends SIGTERM to the process group, waits up to the grace period,
    /// then sends SIGKILL and waits for exit. A worker that has already
    /// exited counts as stopped.
    pub fn stop(&self) -> StopOutcome {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return StopOutcome::AlreadyStopped;
        }

        {
            let mut state = self.shared.state.lock();
            if *state != WorkerState::Stopped {
                *state = WorkerState::Stopping;
            }
        }
        if let Some(wake) = self.wake.lock().take() {
            let _ = wake.send(());
        }

        let outcome = self.terminate();
        *self.shared.state.lock() = WorkerState::Stopped;
        self.join_monitor();

        info!(pid = self.shared.pid, outcome = ?outcome, "Stopped worker");
        outcome
    }

    fn terminate(&self) -> StopOutcome {
        let pid = self.shared.pid;
        let mut child = self.shared.child.lock();

        if let Ok(Some(_)) = child.try_wait() {
            return StopOutcome::AlreadyExited;
        }

        let group = Pid::from_raw(pid as i32);
        match killpg(group, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                let _ = child.wait();
                return StopOutcome::AlreadyExited;
            }
            Err(e) => warn!(pid, error = %e, "SIGTERM to worker group failed"),
        }

        let deadline = Instant::now() + self.grace_period;
        loop {
            if let Ok(Some(_)) = child.try_wait() {
                return StopOutcome::Graceful;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(EXIT_POLL_STEP.min(deadline - now));
        }

        warn!(pid, grace = ?self.grace_period, "Worker ignored SIGTERM, sending SIGKILL");
        match killpg(group, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(pid, error = %e, "SIGKILL to worker group failed"),
        }
        if let Err(e) = child.wait() {
            warn!(pid, error = %e, "Failed to reap worker");
        }
        StopOutcome::Forced
    }

    fn join_monitor(&self) {
        let Some(handle) = self.monitor.lock().take() else {
            return;
        };

        let deadline = Instant::now() + self.monitor_join_timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        if handle.is_finished() {
            if handle.join().is_err() {
                warn!(pid = self.shared.pid, "Worker monitor panicked");
            }
        } else {
            warn!(
                pid = self.shared.pid,
                timeout = ?self.monitor_join_timeout,
                "Worker monitor did not stop in time, detaching"
            );
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("pid", &self.shared.pid)
            .field("state", &self.state())
            .field("fault", &self.fault())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config(command: &[&str]) -> DaemonConfig {
        DaemonConfig::new(command.iter().copied())
            .with_grace_period(Duration::from_millis(500))
            .with_monitor_interval(Duration::from_millis(10))
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_spawn_and_stop() {
        let (supervisor, _stdio) = ProcessSupervisor::spawn(&quick_config(&["sleep", "30"])).unwrap();
        assert!(supervisor.pid() > 0);
        assert!(supervisor.is_running());
        assert_eq!(supervisor.state(), WorkerState::Running);

        assert_eq!(supervisor.stop(), StopOutcome::Graceful);
        assert_eq!(supervisor.state(), WorkerState::Stopped);
        assert!(!supervisor.is_running());
        assert!(supervisor.fault().is_none());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (supervisor, _stdio) = ProcessSupervisor::spawn(&quick_config(&["sleep", "30"])).unwrap();
        assert_eq!(supervisor.stop(), StopOutcome::Graceful);
        assert_eq!(supervisor.stop(), StopOutcome::AlreadyStopped);
    }

    #[test]
    fn test_empty_command() {
        let result = ProcessSupervisor::spawn(&DaemonConfig::default());
        assert!(matches!(result, Err(DaemonError::EmptyCommand)));
    }

    #[test]
    fn test_missing_program() {
        let result = ProcessSupervisor::spawn(&quick_config(&["/nonexistent/suola-worker"]));
        assert!(matches!(result, Err(DaemonError::SpawnFailed { .. })));
    }

    #[test]
    fn test_monitor_records_unexpected_exit() {
        let (supervisor, _stdio) =
            ProcessSupervisor::spawn(&quick_config(&["sh", "-c", "exit 7"])).unwrap();

        assert!(wait_until(|| supervisor.fault().is_some()));
        assert_eq!(
            supervisor.fault(),
            Some(WorkerFault {
                code: Some(7),
                signal: None
            })
        );
        assert_eq!(supervisor.state(), WorkerState::Stopped);
        assert_eq!(supervisor.stop(), StopOutcome::AlreadyExited);
    }

    #[test]
    fn test_fault_display() {
        let fault = WorkerFault {
            code: None,
            signal: Some(9),
        };
        assert_eq!(fault.to_string(), "worker killed by signal 9");
    }
}
