//! Claiming a problem record for local mutation.
//!
//! Records written by the system collector may belong to another user. Before
//! a handler can write into one, ownership has to be transferred to us by a
//! privileged helper; that helper is the [`OwnershipClaimer`] collaborator.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::error::{Result, TriageError};
use crate::problem::Problem;

pub trait OwnershipClaimer {
    /// Asks for `dir` to be handed over to the current user.
    fn claim(&self, dir: &Path) -> std::result::Result<(), String>;
}

/// Claimer without a privileged helper: succeeds only for records we can
/// already write.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOwnership;

impl OwnershipClaimer for LocalOwnership {
    fn claim(&self, dir: &Path) -> std::result::Result<(), String> {
        if is_dir_writable(dir) {
            Ok(())
        } else {
            Err("no privileged ownership helper available".to_string())
        }
    }
}

pub fn is_dir_writable(dir: &Path) -> bool {
    let Ok(c_path) = CString::new(dir.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 }
}

/// Makes sure the problem's record is writable by us.
///
/// The claim is always attempted, since records of our own kernel oopses
/// still need it; its failure only matters for foreign records.
pub fn ensure_writable(problem: &mut Problem, claimer: &dyn OwnershipClaimer) -> Result<()> {
    if problem.is_writable() {
        return Ok(());
    }

    let dir: PathBuf = problem.dir().to_path_buf();
    if let Err(details) = claimer.claim(&dir) {
        if problem.is_foreign {
            return Err(TriageError::Ownership { path: dir, details });
        }
    }

    if !dir.is_dir() || !is_dir_writable(&dir) {
        return Err(TriageError::Ownership {
            path: dir,
            details: "can't open directory for writing".to_string(),
        });
    }

    problem.mark_claimed(dir);
    Ok(())
}
