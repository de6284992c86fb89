//! Persisted list of problem directories the user has already been told about.
//!
//! # File Format
//!
//! One absolute directory path per line, sorted ascending by raw bytes:
//!
//! ```text
//! /var/spool/abrt/ccpp-2026-01-30-12:00:00-1234
//! /var/spool/abrt/oops-2026-01-31-08:15:02-1
//! ```
//!
//! Paths are stored as the bytes the filesystem returned, so names that are
//! not valid UTF-8 survive a round trip.
//!
//! The file is rewritten wholesale (temp file + rename) and only when its
//! content would change. If the rewrite fails, the old file stays
//! authoritative and the caller still gets the in-memory delta. If the file
//! exists but cannot be read, nothing is reported as new and nothing is
//! rewritten for that call.

use fs_err as fs;
use std::cmp::Ordering;
use std::ffi::OsStr;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Result, TriageError};

/// Lists the immediate subdirectories of every watch root.
///
/// Never recurses. Plain files and symlinks are skipped, and a root that is
/// missing or unreadable contributes nothing. The result is sorted by bytes
/// and deduplicated.
pub fn enumerate_current(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut current = Vec::new();
    for root in roots {
        debug!(root = %root.display(), "Looking for crashes");
        for entry in WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
        {
            if entry.file_type().is_dir() {
                current.push(entry.into_path());
            }
        }
    }
    sort_ids(&mut current);
    current
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistStatus {
    Unchanged,
    Rewritten,
    Failed,
    /// The stored list exists but could not be read; it was left alone.
    Unreadable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenDiff {
    /// Directories present now but absent from the stored list, ascending.
    pub new_ids: Vec<PathBuf>,
    pub persisted: PersistStatus,
}

#[derive(Debug, Clone)]
pub struct SeenSetStore {
    path: PathBuf,
}

impl SeenSetStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored list. A store that does not exist yet is empty.
    pub fn load(&self) -> io::Result<Vec<PathBuf>> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(err) if is_missing(&err) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        Ok(content
            .split(|byte| *byte == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| PathBuf::from(OsStr::from_bytes(line)))
            .collect())
    }

    /// Computes `current − stored` and makes the stored list equal `current`.
    pub fn diff_and_persist(&self, current: &[PathBuf]) -> SeenDiff {
        let mut current = current.to_vec();
        sort_ids(&mut current);

        let mut previous = match self.load() {
            Ok(previous) => previous,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Failed to read seen list; leaving it untouched"
                );
                return SeenDiff {
                    new_ids: Vec::new(),
                    persisted: PersistStatus::Unreadable,
                };
            }
        };
        sort_ids(&mut previous);

        let (new_ids, stale) = diff_sorted(&current, &previous);
        for dir in &new_ids {
            debug!(dir = %dir.display(), "New dir detected");
        }

        if new_ids.is_empty() && stale == 0 {
            return SeenDiff {
                new_ids,
                persisted: PersistStatus::Unchanged,
            };
        }

        let persisted = match self.write(&current) {
            Ok(()) => PersistStatus::Rewritten,
            Err(err) => {
                warn!(error = %err, "Seen list not updated; keeping previous content");
                PersistStatus::Failed
            }
        };

        SeenDiff { new_ids, persisted }
    }

    fn write(&self, ids: &[PathBuf]) -> Result<()> {
        let write_err = |source: io::Error| TriageError::PersistenceWrite {
            path: self.path.clone(),
            source,
        };

        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(write_err)?;

        let mut content = Vec::new();
        for id in ids {
            content.extend_from_slice(id.as_os_str().as_bytes());
            content.push(b'\n');
        }

        let mut temp_file = NamedTempFile::new_in(parent).map_err(write_err)?;
        temp_file.write_all(&content).map_err(write_err)?;
        temp_file.flush().map_err(write_err)?;
        temp_file
            .persist(&self.path)
            .map_err(|err| write_err(err.error))?;
        Ok(())
    }
}

/// Absent store, including one whose parent is not a directory.
fn is_missing(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ENOTDIR)
}

fn id_bytes(id: &Path) -> &[u8] {
    id.as_os_str().as_bytes()
}

fn sort_ids(ids: &mut Vec<PathBuf>) {
    ids.sort_by(|a, b| id_bytes(a).cmp(id_bytes(b)));
    ids.dedup();
}

/// Two-pointer merge over lists sorted by bytes.
///
/// Returns the entries only in `current` (ascending) and how many entries
/// only exist in `previous`.
fn diff_sorted(current: &[PathBuf], previous: &[PathBuf]) -> (Vec<PathBuf>, usize) {
    let mut new_ids = Vec::new();
    let mut stale = 0;
    let (mut i, mut j) = (0, 0);

    while i < current.len() && j < previous.len() {
        match id_bytes(&current[i]).cmp(id_bytes(&previous[j])) {
            Ordering::Less => {
                new_ids.push(current[i].clone());
                i += 1;
            }
            Ordering::Greater => {
                stale += 1;
                j += 1;
            }
            Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    new_ids.extend(current[i..].iter().cloned());
    stale += previous.len() - j;

    (new_ids, stale)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<PathBuf> {
        values.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn enumerate_lists_only_immediate_directories() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let root = temp_dir.path().join("spool");
        fs::create_dir_all(root.join("ccpp-1").join("nested")).expect("mkdir");
        fs::create_dir_all(root.join("oops-2")).expect("mkdir");
        fs::write(root.join("stray-file"), "x").expect("write");
        #[cfg(unix)]
        std::os::unix::fs::symlink(root.join("oops-2"), root.join("link")).expect("symlink");

        let current = enumerate_current(&[root.clone(), temp_dir.path().join("missing")]);
        assert_eq!(
            current,
            vec![root.join("ccpp-1"), root.join("oops-2")]
        );
    }

    #[test]
    fn first_run_reports_everything_and_persists() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = SeenSetStore::new(temp_dir.path().join("cache").join("applet_dirlist"));

        let diff = store.diff_and_persist(&ids(&["/s/b", "/s/a"]));
        assert_eq!(diff.new_ids, ids(&["/s/a", "/s/b"]));
        assert_eq!(diff.persisted, PersistStatus::Rewritten);
        assert_eq!(
            fs::read_to_string(store.path()).expect("read"),
            "/s/a\n/s/b\n"
        );
    }

    #[test]
    fn diff_is_idempotent() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = SeenSetStore::new(temp_dir.path().join("applet_dirlist"));
        let current = ids(&["/s/a", "/s/c"]);

        store.diff_and_persist(&current);
        let second = store.diff_and_persist(&current);
        assert!(second.new_ids.is_empty());
        assert_eq!(second.persisted, PersistStatus::Unchanged);
    }

    #[test]
    fn diff_is_order_independent() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let left = SeenSetStore::new(temp_dir.path().join("left"));
        let right = SeenSetStore::new(temp_dir.path().join("right"));
        left.diff_and_persist(&ids(&["/s/b"]));
        right.diff_and_persist(&ids(&["/s/b"]));

        let a = left.diff_and_persist(&ids(&["/s/d", "/s/a", "/s/b", "/s/c"]));
        let b = right.diff_and_persist(&ids(&["/s/c", "/s/b", "/s/d", "/s/a"]));
        assert_eq!(a.new_ids, ids(&["/s/a", "/s/c", "/s/d"]));
        assert_eq!(a.new_ids, b.new_ids);
    }

    #[test]
    fn stale_entries_are_dropped() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = SeenSetStore::new(temp_dir.path().join("applet_dirlist"));
        fs::write(store.path(), "/s/gone\n/s/kept\n").expect("seed");

        let diff = store.diff_and_persist(&ids(&["/s/kept"]));
        assert!(diff.new_ids.is_empty());
        assert_eq!(diff.persisted, PersistStatus::Rewritten);
        assert_eq!(store.load().expect("load"), ids(&["/s/kept"]));
    }

    #[test]
    fn unchanged_set_leaves_file_untouched() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = SeenSetStore::new(temp_dir.path().join("applet_dirlist"));
        // Same set, different order: a rewrite would sort it.
        fs::write(store.path(), "/s/b\n/s/a\n").expect("seed");

        let diff = store.diff_and_persist(&ids(&["/s/a", "/s/b"]));
        assert_eq!(diff.persisted, PersistStatus::Unchanged);
        assert_eq!(
            fs::read_to_string(store.path()).expect("read"),
            "/s/b\n/s/a\n"
        );
    }

    #[test]
    fn write_failure_still_returns_delta() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "not a directory").expect("write blocker");
        let store = SeenSetStore::new(blocker.join("applet_dirlist"));

        let diff = store.diff_and_persist(&ids(&["/s/a"]));
        assert_eq!(diff.new_ids, ids(&["/s/a"]));
        assert_eq!(diff.persisted, PersistStatus::Failed);
    }

    #[test]
    fn merge_counts_new_and_stale() {
        let (new_ids, stale) = diff_sorted(&ids(&["a", "c", "e"]), &ids(&["b", "c", "d"]));
        assert_eq!(new_ids, ids(&["a", "e"]));
        assert_eq!(stale, 2);
    }

    #[test]
    fn non_utf8_names_survive_round_trip() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let root = temp_dir.path().join("spool");
        let odd = root.join(OsStr::from_bytes(b"ccpp-\xff"));
        fs::create_dir_all(&odd).expect("mkdir");
        fs::create_dir_all(root.join("ccpp-ok")).expect("mkdir");

        let current = enumerate_current(&[root.clone()]);
        assert_eq!(current, vec![root.join("ccpp-ok"), odd.clone()]);

        let store = SeenSetStore::new(temp_dir.path().join("applet_dirlist"));
        let diff = store.diff_and_persist(&current);
        assert_eq!(diff.new_ids, current);
        assert_eq!(store.load().expect("load"), current);
        assert!(store.load().expect("load")[1].is_dir());

        let again = store.diff_and_persist(&enumerate_current(&[root]));
        assert!(again.new_ids.is_empty());
        assert_eq!(again.persisted, PersistStatus::Unchanged);
    }

    #[test]
    fn unreadable_store_is_not_treated_as_empty() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        // A directory where the file should be: reads fail with EISDIR.
        let path = temp_dir.path().join("applet_dirlist");
        fs::create_dir_all(&path).expect("mkdir");
        let store = SeenSetStore::new(path.clone());

        assert!(store.load().is_err());
        let diff = store.diff_and_persist(&ids(&["/s/a", "/s/b"]));
        assert!(diff.new_ids.is_empty());
        assert_eq!(diff.persisted, PersistStatus::Unreadable);
        assert!(path.is_dir());
    }
}
