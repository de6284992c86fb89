//! Out-of-process handler supervision.
//!
//! One [`Session`] per running handler. The handler's stdout and stderr share
//! a single pipe whose read end is non-blocking; the event loop calls
//! [`Session::drain`] whenever that pipe is readable, and [`Session::finish`]
//! once it reports end-of-stream.
//!
//! ## Handler contract
//!
//! ```text
//! <program> -i -e <event> -- <problem dir>      REPORT_CLIENT_NONINTERACTIVE=1
//!
//! exit 0          → Succeeded
//! exit <stop>     → Suppressed   (default 70)
//! anything else   → Failed
//! ```

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use crashwatch_protocol::HANDLER_NONINTERACTIVE_ENV;
use tracing::{debug, info, warn};

use crate::config::HandlerSettings;
use crate::error::{Result, TriageError};
use crate::problem::Problem;

/// Handlers usually emit one short line at a time.
const READ_CHUNK_SIZE: usize = 256;

/// Why a handler was started; decides what its outcome leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPurpose {
    AutoReport,
    UserReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Succeeded,
    Suppressed,
    Failed { exit_code: Option<i32> },
}

/// Maps a handler's exit code (`None` when killed by a signal) to an outcome.
pub fn classify_exit(code: Option<i32>, stop_exit_code: i32) -> HandlerOutcome {
    match code {
        Some(code) if code == stop_exit_code => HandlerOutcome::Suppressed,
        Some(0) => HandlerOutcome::Succeeded,
        other => HandlerOutcome::Failed { exit_code: other },
    }
}

#[derive(Debug, Clone)]
pub struct HandlerCommand {
    program: PathBuf,
    stop_exit_code: i32,
}

impl HandlerCommand {
    pub fn new(program: PathBuf, stop_exit_code: i32) -> Self {
        Self {
            program,
            stop_exit_code,
        }
    }

    pub fn from_settings(settings: &HandlerSettings) -> Self {
        Self::new(settings.program.clone(), settings.stop_exit_code)
    }

    /// Starts the handler for `problem` and returns the session owning it.
    pub fn spawn(
        &self,
        problem: Problem,
        event_name: &str,
        purpose: SessionPurpose,
    ) -> Result<Session> {
        let spawn_err = |source: io::Error| TriageError::Spawn {
            program: self.program.clone(),
            source,
        };

        let (output, write_end) = output_pipe().map_err(spawn_err)?;
        let stderr_end = write_end.try_clone().map_err(spawn_err)?;

        // The Command (and with it our copies of the write end) is dropped at
        // the end of this statement, so EOF arrives once the child exits.
        let child = Command::new(&self.program)
            .arg("-i")
            .arg("-e")
            .arg(event_name)
            .arg("--")
            .arg(problem.dir())
            .env(HANDLER_NONINTERACTIVE_ENV, "1")
            .stdin(Stdio::null())
            .stdout(Stdio::from(write_end))
            .stderr(Stdio::from(stderr_end))
            .spawn()
            .map_err(spawn_err)?;

        info!(
            problem = %problem.id,
            dir = %problem.dir().display(),
            event = event_name,
            pid = child.id(),
            purpose = ?purpose,
            "Handler started"
        );

        Ok(Session {
            problem,
            event_name: event_name.to_string(),
            purpose,
            child,
            output,
            lines: LineBuffer::default(),
            stop_exit_code: self.stop_exit_code,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// Everything available was read; wait for the next readiness signal.
    Pending,
    /// End-of-stream: the child closed its output.
    Closed,
    /// The read failed; the session should be finished early.
    ReadFailed,
}

/// Transient state of one in-flight handler.
#[derive(Debug)]
pub struct Session {
    problem: Problem,
    event_name: String,
    purpose: SessionPurpose,
    child: Child,
    output: File,
    lines: LineBuffer,
    stop_exit_code: i32,
}

impl Session {
    pub fn purpose(&self) -> SessionPurpose {
        self.purpose
    }

    pub fn output_fd(&self) -> RawFd {
        self.output.as_raw_fd()
    }

    /// Reads whatever output is available and logs complete lines.
    pub fn drain(&mut self) -> DrainStatus {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.output.read(&mut chunk) {
                Ok(0) => return DrainStatus::Closed,
                Ok(n) => {
                    for line in self.lines.push(&chunk[..n]) {
                        debug!(problem = %self.problem.id, pid = self.child.id(), "{}", line);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return DrainStatus::Pending
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    let err = TriageError::IoRead { source: err };
                    warn!(problem = %self.problem.id, error = %err, "Handler output lost");
                    return DrainStatus::ReadFailed;
                }
            }
        }
    }

    /// Reaps the child and hands the problem back with its outcome.
    ///
    /// The output pipe is closed before waiting, so a child still writing
    /// gets EPIPE instead of blocking on a full pipe. Only call after
    /// end-of-stream or a read failure.
    pub fn finish(self) -> (Problem, HandlerOutcome) {
        let Session {
            problem,
            event_name,
            mut child,
            output,
            mut lines,
            stop_exit_code,
            ..
        } = self;
        drop(output);

        if let Some(line) = lines.take_partial() {
            debug!(problem = %problem.id, pid = child.id(), "{}", line);
        }

        let code = match child.wait() {
            Ok(status) => status.code(),
            Err(err) => {
                warn!(pid = child.id(), error = %err, "Failed to reap handler");
                None
            }
        };
        let outcome = classify_exit(code, stop_exit_code);
        debug!(
            problem = %problem.id,
            event = %event_name,
            exit_code = ?code,
            outcome = ?outcome,
            "Handler finished"
        );
        (problem, outcome)
    }
}

/// Splits streamed bytes into lines, keeping a trailing partial line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = bytes;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.partial.extend_from_slice(&rest[..pos]);
            lines.push(String::from_utf8_lossy(&self.partial).into_owned());
            self.partial.clear();
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);
        lines
    }

    pub fn take_partial(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        Some(line)
    }
}

fn output_pipe() -> io::Result<(File, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: fds has room for the two descriptors pipe() writes.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe() succeeded, so both descriptors are open and unowned.
    let (read_end, write_end) =
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    set_fd_flag(read_end.as_raw_fd(), libc::F_GETFD, libc::F_SETFD, libc::FD_CLOEXEC)?;
    set_fd_flag(write_end.as_raw_fd(), libc::F_GETFD, libc::F_SETFD, libc::FD_CLOEXEC)?;
    set_fd_flag(read_end.as_raw_fd(), libc::F_GETFL, libc::F_SETFL, libc::O_NONBLOCK)?;

    Ok((File::from(read_end), write_end))
}

fn set_fd_flag(fd: RawFd, get: libc::c_int, set: libc::c_int, flag: libc::c_int) -> io::Result<()> {
    // SAFETY: fd is an open descriptor owned by the caller.
    let current = unsafe { libc::fcntl(fd, get) };
    if current < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, set, current | flag) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
