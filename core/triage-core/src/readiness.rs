//! Thin `poll(2)` wrapper shared by the event loop and tests.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Waits until at least one of `fds` is readable (or hung up).
///
/// Returns the indices of the ready descriptors; empty on timeout. `None`
/// waits indefinitely. `EINTR` is reported as an empty result so callers can
/// check for shutdown.
pub fn poll_readable(fds: &[RawFd], timeout: Option<Duration>) -> io::Result<Vec<usize>> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|fd| libc::pollfd {
            fd: *fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    let timeout_ms = match timeout {
        Some(timeout) => timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        None => -1,
    };

    // SAFETY: pollfds is a live, correctly sized buffer for the whole call.
    let rc = unsafe {
        libc::poll(
            pollfds.as_mut_ptr(),
            pollfds.len() as libc::nfds_t,
            timeout_ms,
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(Vec::new());
        }
        return Err(err);
    }

    Ok(pollfds
        .iter()
        .enumerate()
        .filter(|(_, pollfd)| pollfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
        .map(|(index, _)| index)
        .collect())
}
