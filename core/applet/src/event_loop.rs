//! The main loop: `poll(2)` over the wake-up socket and handler pipes.
//!
//! Priorities per iteration:
//! 1. queued messages from the transport,
//! 2. ready handler output,
//! 3. idle work (deferred flush), only when nothing else is ready.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use triage_core::{poll_readable, Message, Orchestrator};

use crate::signals;

/// Upper bound on how long the loop sleeps before re-checking for shutdown.
const MAX_SLEEP: Duration = Duration::from_secs(1);

/// Write end of the wake-up socket, shared by listener threads.
#[derive(Debug, Clone)]
pub struct Waker {
    stream: Arc<UnixStream>,
}

impl Waker {
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream: Arc::new(stream),
        }
    }

    pub fn wake(&self) {
        if let Err(err) = (&*self.stream).write_all(&[1]) {
            warn!(error = %err, "Failed to wake event loop");
        }
    }
}

pub fn run(
    orchestrator: &mut Orchestrator,
    inbox: &Receiver<Message>,
    wake_rx: &UnixStream,
) -> io::Result<()> {
    wake_rx.set_nonblocking(true)?;

    while !signals::shutdown_requested() {
        loop {
            match inbox.try_recv() {
                Ok(message) => orchestrator.dispatch(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("Transport closed");
                    return Ok(());
                }
            }
        }

        let sessions = orchestrator.session_fds();
        let mut fds: Vec<RawFd> = Vec::with_capacity(sessions.len() + 1);
        fds.push(wake_rx.as_raw_fd());
        fds.extend(sessions.iter().map(|(_, fd)| *fd));

        let timeout = if orchestrator.has_idle_work() {
            Duration::ZERO
        } else {
            MAX_SLEEP
        };
        let ready = poll_readable(&fds, Some(timeout))?;

        if ready.is_empty() {
            orchestrator.on_idle();
            continue;
        }

        for index in ready {
            if index == 0 {
                drain_wakeups(wake_rx);
            } else {
                orchestrator.dispatch(Message::ChildOutputReady(sessions[index - 1].0));
            }
        }
    }

    debug!("Shutdown requested");
    Ok(())
}

fn drain_wakeups(mut wake_rx: &UnixStream) {
    let mut buf = [0u8; 64];
    loop {
        match wake_rx.read(&mut buf) {
            Ok(0) => return,
            Ok(_) => continue,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return,
        }
    }
}
