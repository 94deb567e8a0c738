//! Process Supervisor: owns one external process from spawn to reap.
//!
//! Both output pipes are drained by reader threads into a single channel so
//! the child never stalls on a full pipe, whatever the consumer is doing.
//! Dropping a [`ProcessHandle`] that has not been reaped kills and reaps it.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::error::{EngineError, EngineResult};

const READ_CHUNK: usize = 8 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const CAPTURE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamId {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: StreamId,
    pub data: Vec<u8>,
}

/// Result of waiting for output
#[derive(Debug)]
pub enum ChunkPoll {
    Chunk(OutputChunk),
    /// Nothing arrived within the wait
    Idle,
    /// Both pipes are closed and drained
    Closed,
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R, stream: StreamId, tx: Sender<OutputChunk>) {
    thread::spawn(move || {
        let mut buf = [0u8; READ_CHUNK];
        // Keep draining after the receiver is gone so the child cannot block
        let mut forward = true;
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if forward
                        && tx
                            .send(OutputChunk {
                                stream,
                                data: buf[..n].to_vec(),
                            })
                            .is_err()
                    {
                        forward = false;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
}

/// Spawn `program` with `args`, stdin closed and both outputs captured.
///
/// A missing executable is reported as [`EngineError::ToolNotFound`], any
/// other spawn refusal as [`EngineError::LaunchFailure`].
pub fn launch<I, S>(program: &str, args: I) -> EngineResult<ProcessHandle>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    launch_command(program, cmd)
}

pub fn launch_command(tool: &str, mut cmd: Command) -> EngineResult<ProcessHandle> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| EngineError::from_spawn(tool, e))?;
    debug!(tool, pid = child.id(), "Launched process");

    let (tx, rx) = mpsc::channel();
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(EngineError::LaunchFailure {
            tool: tool.to_string(),
            source: std::io::Error::other("failed to capture process output"),
        });
    };
    spawn_reader(stdout, StreamId::Stdout, tx.clone());
    spawn_reader(stderr, StreamId::Stderr, tx);

    Ok(ProcessHandle {
        tool: tool.to_string(),
        child,
        output: rx,
        status: None,
    })
}

/// Everything a short-lived helper command printed, plus how it exited
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Run `program` to completion and collect both streams.
///
/// The process is killed and [`EngineError::TrialTimeout`] returned once
/// `timeout` has passed, whether it is still printing or has gone quiet.
pub fn run_capture<I, S>(program: &str, args: I, timeout: Duration) -> EngineResult<CapturedOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    run_capture_command(program, cmd, timeout)
}

pub fn run_capture_command(tool: &str, cmd: Command, timeout: Duration) -> EngineResult<CapturedOutput> {
    let mut handle = launch_command(tool, cmd)?;
    let deadline = Instant::now() + timeout;
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let timed_out = |handle: &mut ProcessHandle| -> EngineResult<CapturedOutput> {
        warn!(tool, timeout_ms = timeout.as_millis() as u64, "Helper command timed out, killing");
        handle.kill()?;
        Err(EngineError::TrialTimeout { after: timeout })
    };

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return timed_out(&mut handle);
        }
        match handle.next_chunk(remaining.min(CAPTURE_POLL)) {
            ChunkPoll::Chunk(chunk) => match chunk.stream {
                StreamId::Stdout => stdout.extend(chunk.data),
                StreamId::Stderr => stderr.extend(chunk.data),
            },
            ChunkPoll::Idle => {
                // Exited, but a leftover child of its own still holds the pipes
                if let Some(status) = handle.try_wait()? {
                    for chunk in handle.drain_ready() {
                        match chunk.stream {
                            StreamId::Stdout => stdout.extend(chunk.data),
                            StreamId::Stderr => stderr.extend(chunk.data),
                        }
                    }
                    return Ok(CapturedOutput {
                        status,
                        stdout,
                        stderr,
                    });
                }
            }
            ChunkPoll::Closed => break,
        }
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    match handle.wait_timeout(remaining)? {
        Some(status) => Ok(CapturedOutput {
            status,
            stdout,
            stderr,
        }),
        None => timed_out(&mut handle),
    }
}

/// Live handle to a supervised process
#[derive(Debug)]
pub struct ProcessHandle {
    tool: String,
    child: Child,
    output: Receiver<OutputChunk>,
    status: Option<ExitStatus>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Exit status once reaped
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Wait up to `timeout` for the next chunk from either stream
    pub fn next_chunk(&self, timeout: Duration) -> ChunkPoll {
        match self.output.recv_timeout(timeout) {
            Ok(chunk) => ChunkPoll::Chunk(chunk),
            Err(RecvTimeoutError::Timeout) => ChunkPoll::Idle,
            Err(RecvTimeoutError::Disconnected) => ChunkPoll::Closed,
        }
    }

    /// Everything already buffered, without blocking
    pub fn drain_ready(&self) -> Vec<OutputChunk> {
        self.output.try_iter().collect()
    }

    pub fn try_wait(&mut self) -> EngineResult<Option<ExitStatus>> {
        if self.status.is_some() {
            return Ok(self.status);
        }
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.status = status;
        }
        Ok(status)
    }

    /// Block until the process exits
    pub fn wait(&mut self) -> EngineResult<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait()?;
        self.status = Some(status);
        Ok(status)
    }

    /// Wait at most `timeout`; `None` if still running
    pub fn wait_timeout(&mut self, timeout: Duration) -> EngineResult<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Forceful kill, then reap
    pub fn kill(&mut self) -> EngineResult<ExitStatus> {
        if let Some(status) = self.try_wait()? {
            return Ok(status);
        }
        if let Err(e) = self.child.kill() {
            // Already exited between the check and the kill
            if e.kind() != std::io::ErrorKind::InvalidInput {
                return Err(e.into());
            }
        }
        self.wait()
    }

    /// Ask the process to stop (SIGTERM on unix), escalating to a kill after
    /// `grace`
    pub fn terminate(&mut self, grace: Duration) -> EngineResult<ExitStatus> {
        if let Some(status) = self.try_wait()? {
            return Ok(status);
        }

        if self.request_stop() {
            if let Some(status) = self.wait_timeout(grace)? {
                debug!(tool = %self.tool, pid = self.pid(), "Process stopped after SIGTERM");
                return Ok(status);
            }
            warn!(
                tool = %self.tool,
                pid = self.pid(),
                grace_ms = grace.as_millis() as u64,
                "Process ignored SIGTERM, killing"
            );
        }
        self.kill()
    }

    /// SIGTERM through kill(1); the pid is still ours because the child has
    /// not been reaped yet
    #[cfg(unix)]
    fn request_stop(&self) -> bool {
        Command::new("kill")
            .args(["-TERM", &self.child.id().to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    #[cfg(not(unix))]
    fn request_stop(&self) -> bool {
        false
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.status.is_none() {
            if let Ok(None) = self.child.try_wait() {
                debug!(tool = %self.tool, pid = self.child.id(), "Killing unreaped process on drop");
                let _ = self.child.kill();
            }
            let _ = self.child.wait();
        }
    }
}
