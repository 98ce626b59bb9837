//! Request/response exchange with a worker over its standard streams.
//!
//! The worker protocol has no request identifiers: responses are paired
//! with requests purely by order. Every call therefore holds the stream
//! lock from the write until the response is read.

use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::AsFd;
use std::process::{ChildStderr, ChildStdin, ChildStdout};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::protocol::Request;
use crate::supervisor::{ProcessSupervisor, StopOutcome, WorkerStdio};

const READ_CHUNK: usize = 4096;

/// Splits a byte stream into lines.
#[derive(Debug)]
struct LineReader<R> {
    source: R,
    buf: Vec<u8>,
    eof: bool,
}

impl<R: Read> LineReader<R> {
    fn new(source: R) -> Self {
        Self {
            source,
            buf: Vec::new(),
            eof: false,
        }
    }

    /// One read from the source. Only call when the source is readable.
    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.source.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Pop the next complete line, without its terminator. At EOF a
    /// trailing partial line counts as complete.
    fn next_line(&mut self) -> Option<String> {
        let line = match self.buf.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                line
            }
            None if self.eof && !self.buf.is_empty() => std::mem::take(&mut self.buf),
            None => return None,
        };
        let text = String::from_utf8_lossy(&line);
        Some(text.strip_suffix('\r').unwrap_or(&text).to_string())
    }
}

/// The worker's streams. Only touched under the channel lock.
struct WorkerIo {
    pid: u32,
    stdin: ChildStdin,
    stdout: LineReader<ChildStdout>,
    stderr: LineReader<ChildStderr>,
}

impl WorkerIo {
    fn new(pid: u32, stdio: WorkerStdio) -> Self {
        Self {
            pid,
            stdin: stdio.stdin,
            stdout: LineReader::new(stdio.stdout),
            stderr: LineReader::new(stdio.stderr),
        }
    }

    /// Wait up to `timeout` for either output stream to become readable,
    /// then read once from each ready stream. Streams at EOF are not
    /// watched.
    fn fill_ready(&mut self, timeout: Duration) -> DaemonResult<()> {
        let watch_stdout = !self.stdout.eof;
        let watch_stderr = !self.stderr.eof;

        let (stdout_ready, stderr_ready) = {
            let mut fds = Vec::with_capacity(2);
            if watch_stdout {
                fds.push(PollFd::new(self.stdout.source.as_fd(), PollFlags::POLLIN));
            }
            if watch_stderr {
                fds.push(PollFd::new(self.stderr.source.as_fd(), PollFlags::POLLIN));
            }
            if fds.is_empty() {
                return Ok(());
            }

            let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
            loop {
                match poll(&mut fds, PollTimeout::from(millis)) {
                    Ok(_) => break,
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            let readable = |fd: &PollFd<'_>| {
                fd.revents().is_some_and(|r| {
                    r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
                })
            };
            let mut ready = fds.iter();
            let stdout_ready = watch_stdout && ready.next().is_some_and(readable);
            let stderr_ready = watch_stderr && ready.next().is_some_and(readable);
            (stdout_ready, stderr_ready)
        };

        if stdout_ready {
            self.stdout.fill()?;
        }
        if stderr_ready {
            self.stderr.fill()?;
        }
        Ok(())
    }

    /// Log every complete stderr line as a diagnostic.
    fn log_diagnostics(&mut self) {
        while let Some(line) = self.stderr.next_line() {
            if !line.is_empty() {
                warn!(pid = self.pid, line = %line, "Worker diagnostic");
            }
        }
    }

    /// Every complete, non-blank stdout line.
    fn take_output(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.stdout.next_line() {
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Discard output left over from before this call, e.g. after a
    /// previous call timed out.
    fn discard_stale(&mut self) -> DaemonResult<()> {
        loop {
            let before = (self.stdout.buf.len(), self.stderr.buf.len(), self.stdout.eof, self.stderr.eof);
            self.fill_ready(Duration::ZERO)?;
            let after = (self.stdout.buf.len(), self.stderr.buf.len(), self.stdout.eof, self.stderr.eof);
            if before == after {
                break;
            }
        }
        self.log_diagnostics();
        for line in self.take_output() {
            warn!(pid = self.pid, line = %line, "Discarding stale worker output");
        }
        Ok(())
    }

    /// Wait for a stderr line containing `marker`.
    fn await_marker(&mut self, marker: &str, timeout: Duration) -> DaemonResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            while let Some(line) = self.stderr.next_line() {
                if line.contains(marker) {
                    debug!(pid = self.pid, line = %line, "Worker reported ready");
                    return Ok(());
                }
                if !line.is_empty() {
                    info!(pid = self.pid, line = %line, "Worker startup");
                }
            }
            for line in self.take_output() {
                debug!(pid = self.pid, line = %line, "Ignoring worker output before ready");
            }
            if self.stdout.eof && self.stderr.eof {
                return Err(DaemonError::WorkerExited);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DaemonError::NotReady {
                    marker: marker.to_string(),
                    timeout,
                });
            }
            self.fill_ready(deadline - now)?;
        }
    }

    fn send(&mut self, payload: &str) -> DaemonResult<()> {
        let written = self
            .stdin
            .write_all(payload.as_bytes())
            .and_then(|()| self.stdin.flush());
        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Err(DaemonError::WorkerExited),
            Err(e) => Err(e.into()),
        }
    }

    fn receive(&mut self, timeout: Duration) -> DaemonResult<String> {
        let deadline = Instant::now() + timeout;
        loop {
            self.log_diagnostics();
            let mut lines = self.take_output();
            if !lines.is_empty() {
                // Pick up lines that arrived together with the first one.
                self.fill_ready(Duration::ZERO)?;
                self.log_diagnostics();
                lines.extend(self.take_output());
                return Ok(lines.join("\n"));
            }
            if self.stdout.eof {
                return Err(DaemonError::WorkerExited);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DaemonError::ResponseTimeout(timeout));
            }
            self.fill_ready(deadline - now)?;
        }
    }
}

/// A running worker and the serialized channel to it.
///
/// # Example
///
/// ```no_run
/// use suola_daemon::{DaemonConfig, Request, SubprocessChannel};
///
/// let channel = SubprocessChannel::spawn(DaemonConfig::new(["cat"]))?;
/// let echoed = channel.invoke(&Request::new().arg("hello"))?;
/// assert_eq!(echoed, "hello");
/// channel.stop();
/// # Ok::<(), suola_daemon::DaemonError>(())
/// ```
pub struct SubprocessChannel {
    supervisor: ProcessSupervisor,
    io: Mutex<WorkerIo>,
    response_timeout: Duration,
}

impl SubprocessChannel {
    /// Start the worker and, if a ready marker is configured, wait for it.
    ///
    /// # Errors
    ///
    /// Fails if the worker cannot be spawned or does not become ready in
    /// time. The worker is stopped before the error is returned.
    pub fn spawn(config: DaemonConfig) -> DaemonResult<Self> {
        let (supervisor, stdio) = ProcessSupervisor::spawn(&config)?;
        let mut io = WorkerIo::new(supervisor.pid(), stdio);

        if let Some(marker) = &config.ready_marker {
            io.await_marker(marker, config.response_timeout)?;
        }

        Ok(Self {
            supervisor,
            io: Mutex::new(io),
            response_timeout: config.response_timeout,
        })
    }

    /// Send a request and return the worker's response.
    ///
    /// The response is the first non-blank stdout line, joined with any
    /// further lines that arrived together with it. Stderr lines are
    /// logged and never end the call.
    ///
    /// # Errors
    ///
    /// - [`DaemonError::NotRunning`] after stop or an unexpected exit.
    /// - [`DaemonError::ResponseTimeout`] if no line arrives in time. The
    ///   worker is left running.
    /// - [`DaemonError::WorkerExited`] if the worker closes its output.
    pub fn invoke(&self, request: &Request) -> DaemonResult<String> {
        let payload = request.encode()?;

        let mut io = self.io.lock();
        if !self.supervisor.is_running() {
            return Err(DaemonError::NotRunning);
        }

        io.discard_stale()?;
        debug!(pid = io.pid, request = %payload.trim_end(), "Sending request to worker");
        io.send(&payload)?;

        match io.receive(self.response_timeout) {
            Ok(response) => {
                debug!(pid = io.pid, response = %response, "Received worker response");
                Ok(response)
            }
            Err(e) => {
                warn!(pid = io.pid, error = %e, "Worker call failed");
                Err(e)
            }
        }
    }

    /// Send positional values only.
    pub fn invoke_args<I, S>(&self, args: I) -> DaemonResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = args
            .into_iter()
            .fold(Request::new(), |request, arg| request.arg(arg));
        self.invoke(&request)
    }

    /// The underlying supervisor.
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Process id of the worker.
    pub fn pid(&self) -> u32 {
        self.supervisor.pid()
    }

    /// Whether the worker can take calls.
    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// Stop the worker. Idempotent.
    ///
    /// Waits for an in-flight call to finish first. Calls made after stop
    /// fail with [`DaemonError::NotRunning`].
    pub fn stop(&self) -> StopOutcome {
        let _io = self.io.lock();
        self.supervisor.stop()
    }
}

impl std::fmt::Debug for SubprocessChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessChannel")
            .field("supervisor", &self.supervisor)
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}
