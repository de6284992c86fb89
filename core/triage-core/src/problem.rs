//! The problem record carried through triage.

use std::fmt;
use std::path::{Path, PathBuf};

use crashwatch_protocol::CrashEvent;

use crate::dump_dir::{DumpDir, FILENAME_COMPONENT, FILENAME_DUPHASH, FILENAME_UUID};

/// Process-unique identity of one Problem instance.
///
/// Two crash events for the same directory yield two Problems with distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProblemId(pub u64);

impl fmt::Display for ProblemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "problem-{}", self.0)
    }
}

/// One observed crash under triage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub id: ProblemId,
    pub directory_path: PathBuf,
    pub is_foreign: bool,
    pub occurrence_count: u32,
    pub is_packaged: bool,
    pub command_line: Option<String>,
    pub component: Option<String>,
    pub correlation_id: Option<String>,
    pub dedup_hash: Option<String>,
    is_writable: bool,
    was_announced: bool,
    was_reported: bool,
    was_known: bool,
}

impl Problem {
    pub fn new(id: ProblemId, directory_path: PathBuf) -> Self {
        Self {
            id,
            directory_path,
            is_foreign: false,
            occurrence_count: 1,
            is_packaged: false,
            command_line: None,
            component: None,
            correlation_id: None,
            dedup_hash: None,
            is_writable: false,
            was_announced: false,
            was_reported: false,
            was_known: false,
        }
    }

    /// Builds a problem from a bus crash event plus whatever the record says
    /// about its command line and occurrence count.
    pub fn from_crash_event(
        id: ProblemId,
        event: &CrashEvent,
        current_uid: u32,
        record: Option<&DumpDir>,
    ) -> Self {
        let mut problem = Problem::new(id, PathBuf::from(&event.directory_path));
        problem.is_foreign = event.is_foreign(current_uid);
        problem.component = non_empty(&event.component_name);
        problem.correlation_id = non_empty(&event.correlation_id);
        problem.dedup_hash = non_empty(&event.dedup_hash);
        problem.is_packaged = problem.component.is_some();
        if let Some(record) = record {
            problem.command_line = record.command_line();
            problem.occurrence_count = record.count();
        }
        problem
    }

    /// Builds a problem for a record found on disk at startup.
    ///
    /// Such records are readable by us, so they are never foreign.
    pub fn from_record(id: ProblemId, record: &DumpDir) -> Self {
        let mut problem = Problem::new(id, record.path().to_path_buf());
        problem.component = record.load_text(FILENAME_COMPONENT);
        problem.correlation_id = record.load_text(FILENAME_UUID);
        problem.dedup_hash = record.load_text(FILENAME_DUPHASH);
        problem.is_packaged = problem.component.is_some();
        problem.command_line = record.command_line();
        problem.occurrence_count = record.count();
        problem
    }

    pub fn dir(&self) -> &Path {
        &self.directory_path
    }

    pub fn already_reported(&self) -> bool {
        self.occurrence_count > 1
    }

    pub fn is_writable(&self) -> bool {
        self.is_writable
    }

    pub fn was_announced(&self) -> bool {
        self.was_announced
    }

    pub fn was_reported(&self) -> bool {
        self.was_reported
    }

    pub fn was_known(&self) -> bool {
        self.was_known
    }

    /// Ownership has been transferred to us; the record is ours from now on.
    pub(crate) fn mark_claimed(&mut self, directory_path: PathBuf) {
        self.directory_path = directory_path;
        self.is_foreign = false;
        self.is_writable = true;
    }

    pub(crate) fn mark_announced(&mut self) {
        self.was_announced = true;
    }

    pub(crate) fn mark_reported(&mut self) {
        self.was_reported = true;
    }

    pub(crate) fn mark_known(&mut self) {
        self.was_known = true;
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Real uid of the running process.
pub fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}
