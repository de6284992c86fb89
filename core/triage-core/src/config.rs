//! Applet configuration loading.
//!
//! The config file is optional TOML; every field has a default so a missing
//! file, or a file that sets only one key, is fine.
//!
//! ```toml
//! [triage]
//! auto_reporting = true
//! privileged_user = false
//! max_problem_age_days = 3
//!
//! [handler]
//! program = "/usr/libexec/abrt-handle-event"
//! autoreport_event = "report_uReport"
//!
//! [watch]
//! dirs = ["/var/spool/abrt"]
//!
//! [[applications]]
//! name = "Text Editor"
//! exec = "gedit %U"
//! ```

use std::path::{Path, PathBuf};

use crashwatch_protocol::HANDLER_EXIT_STOP_EVENT;
use serde::Deserialize;
use tracing::warn;

use crate::apps::AppInfo;
use crate::error::{Result, TriageError};
use crate::storage::StorageConfig;

const DEFAULT_HANDLER_PROGRAM: &str = "/usr/libexec/abrt-handle-event";
const DEFAULT_AUTOREPORT_EVENT: &str = "report_uReport";
const DEFAULT_REPORT_EVENT: &str = "report-gui";
const DEFAULT_MAX_PROBLEM_AGE_DAYS: i64 = 3;
/// Upper bound for `max_problem_age_days` (about a century).
pub const MAX_PROBLEM_AGE_DAYS_LIMIT: i64 = 36_500;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AppletConfig {
    pub triage: TriageSettings,
    pub handler: HandlerSettings,
    pub watch: WatchSettings,
    pub applications: Vec<AppInfo>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TriageSettings {
    /// System-wide policy: report eligible problems without asking.
    pub auto_reporting: bool,
    /// Answer of the permission check; privileged users see foreign crashes.
    pub privileged_user: bool,
    /// Problems discovered at startup older than this are ignored.
    pub max_problem_age_days: i64,
    /// Connectivity assumed before the first connectivity signal arrives.
    pub assume_online: bool,
}

impl TriageSettings {
    /// Age limit for startup discovery.
    ///
    /// Values outside `0..=MAX_PROBLEM_AGE_DAYS_LIMIT` fall back to the default.
    pub fn max_problem_age(&self) -> chrono::Duration {
        let days = self.max_problem_age_days;
        let checked = (0..=MAX_PROBLEM_AGE_DAYS_LIMIT)
            .contains(&days)
            .then(|| chrono::Duration::try_days(days))
            .flatten();
        match checked {
            Some(age) => age,
            None => {
                warn!(
                    max_problem_age_days = days,
                    default = DEFAULT_MAX_PROBLEM_AGE_DAYS,
                    "Problem age limit out of range; using default"
                );
                chrono::Duration::days(DEFAULT_MAX_PROBLEM_AGE_DAYS)
            }
        }
    }
}

impl Default for TriageSettings {
    fn default() -> Self {
        Self {
            auto_reporting: false,
            privileged_user: false,
            max_problem_age_days: DEFAULT_MAX_PROBLEM_AGE_DAYS,
            assume_online: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HandlerSettings {
    pub program: PathBuf,
    pub autoreport_event: String,
    pub report_event: String,
    pub stop_exit_code: i32,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_HANDLER_PROGRAM),
            autoreport_event: DEFAULT_AUTOREPORT_EVENT.to_string(),
            report_event: DEFAULT_REPORT_EVENT.to_string(),
            stop_exit_code: HANDLER_EXIT_STOP_EVENT,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WatchSettings {
    pub dirs: Vec<PathBuf>,
}

impl AppletConfig {
    /// Watch roots in effect: configured ones, or the storage defaults.
    pub fn watch_dirs(&self, storage: &StorageConfig) -> Vec<PathBuf> {
        if self.watch.dirs.is_empty() {
            storage.default_watch_dirs()
        } else {
            self.watch.dirs.clone()
        }
    }
}

/// Loads the applet config, returning defaults when the file is missing.
pub fn load_config(path: &Path) -> Result<AppletConfig> {
    if !path.exists() {
        return Ok(AppletConfig::default());
    }

    let content = fs_err::read_to_string(path).map_err(|err| TriageError::Io {
        context: format!("Failed to read config {}", path.display()),
        source: err,
    })?;
    let config =
        toml::from_str::<AppletConfig>(&content).map_err(|err| TriageError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })?;

    let days = config.triage.max_problem_age_days;
    if !(0..=MAX_PROBLEM_AGE_DAYS_LIMIT).contains(&days) {
        return Err(TriageError::ConfigMalformed {
            path: path.to_path_buf(),
            details: format!(
                "triage.max_problem_age_days must be between 0 and {}, got {}",
                MAX_PROBLEM_AGE_DAYS_LIMIT, days
            ),
        });
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_config(&temp_dir.path().join("missing.toml")).expect("load config");
        assert_eq!(config, AppletConfig::default());
        assert!(!config.triage.auto_reporting);
        assert_eq!(config.handler.stop_exit_code, 70);
        assert_eq!(config.handler.autoreport_event, "report_uReport");
    }

    #[test]
    fn load_config_parses_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("applet.toml");
        fs_err::write(
            &path,
            r#"
[triage]
auto_reporting = true
max_problem_age_days = 7

[handler]
program = "/opt/handler"
stop_exit_code = 42

[watch]
dirs = ["/srv/dumps"]

[[applications]]
name = "Text Editor"
exec = "gedit %U"
"#,
        )
        .expect("write config");

        let config = load_config(&path).expect("load config");
        assert!(config.triage.auto_reporting);
        assert!(!config.triage.privileged_user);
        assert!(config.triage.assume_online);
        assert_eq!(config.triage.max_problem_age_days, 7);
        assert_eq!(config.handler.program, PathBuf::from("/opt/handler"));
        assert_eq!(config.handler.stop_exit_code, 42);
        assert_eq!(config.handler.report_event, "report-gui");
        assert_eq!(config.watch.dirs, vec![PathBuf::from("/srv/dumps")]);
        assert_eq!(config.applications.len(), 1);
        assert_eq!(config.applications[0].name, "Text Editor");
    }

    #[test]
    fn load_config_rejects_unknown_keys() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("applet.toml");
        fs_err::write(&path, "[triage]\nautoreport = true\n").expect("write config");
        assert!(matches!(
            load_config(&path),
            Err(TriageError::ConfigMalformed { .. })
        ));
    }

    #[test]
    fn load_config_rejects_out_of_range_age() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("applet.toml");

        for days in ["9223372036854775807", "-1"] {
            fs_err::write(&path, format!("[triage]\nmax_problem_age_days = {}\n", days))
                .expect("write config");
            assert!(matches!(
                load_config(&path),
                Err(TriageError::ConfigMalformed { .. })
            ));
        }
    }

    #[test]
    fn out_of_range_age_falls_back_to_default() {
        let mut settings = TriageSettings {
            max_problem_age_days: i64::MAX,
            ..TriageSettings::default()
        };
        assert_eq!(settings.max_problem_age(), chrono::Duration::days(3));
        settings.max_problem_age_days = -5;
        assert_eq!(settings.max_problem_age(), chrono::Duration::days(3));
        settings.max_problem_age_days = 0;
        assert_eq!(settings.max_problem_age(), chrono::Duration::zero());
    }

    #[test]
    fn watch_dirs_fall_back_to_storage_defaults() {
        let storage = StorageConfig::with_root(PathBuf::from("/tmp/cw"));
        let config = AppletConfig::default();
        assert_eq!(config.watch_dirs(&storage), storage.default_watch_dirs());
    }
}
