//! Read-only access to an on-disk problem record.
//!
//! A problem record is a directory holding one small text file per element
//! (`cmdline`, `count`, `time`, ...). Missing or unreadable elements are
//! reported as absent rather than as errors.

use chrono::{DateTime, TimeZone, Utc};
use fs_err as fs;
use std::path::{Path, PathBuf};

pub const FILENAME_CMDLINE: &str = "cmdline";
pub const FILENAME_COUNT: &str = "count";
pub const FILENAME_TIME: &str = "time";
pub const FILENAME_COMPONENT: &str = "component";
pub const FILENAME_UUID: &str = "uuid";
pub const FILENAME_DUPHASH: &str = "duphash";
pub const FILENAME_REPORTED_TO: &str = "reported_to";

#[derive(Debug, Clone)]
pub struct DumpDir {
    path: PathBuf,
}

impl DumpDir {
    /// Opens `path` if it is a directory; `None` otherwise.
    pub fn open(path: &Path) -> Option<Self> {
        let metadata = fs::metadata(path).ok()?;
        if !metadata.is_dir() {
            return None;
        }
        Some(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads a text element with trailing newlines trimmed; empty is absent.
    pub fn load_text(&self, element: &str) -> Option<String> {
        let raw = fs::read_to_string(self.path.join(element)).ok()?;
        let value = raw.trim_end_matches(['\n', '\r']);
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }

    pub fn exists(&self, element: &str) -> bool {
        self.path.join(element).exists()
    }

    pub fn command_line(&self) -> Option<String> {
        self.load_text(FILENAME_CMDLINE)
    }

    /// Number of times this problem occurred; never less than one.
    pub fn count(&self) -> u32 {
        self.load_text(FILENAME_COUNT)
            .and_then(|value| value.trim().parse::<u32>().ok())
            .unwrap_or(1)
            .max(1)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.load_text(FILENAME_TIME)?.trim().parse::<i64>().ok()?;
        Utc.timestamp_opt(secs, 0).single()
    }

    /// The collector writes `count` last, so its presence marks a finished record.
    pub fn is_complete(&self) -> bool {
        self.exists(FILENAME_COUNT)
    }

    pub fn is_reported(&self) -> bool {
        self.exists(FILENAME_REPORTED_TO)
    }
}
