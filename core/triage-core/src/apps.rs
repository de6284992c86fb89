//! Launchable application catalog and command-line matching.
//!
//! A crashed process counts as an "app" when its command line matches the
//! `exec` line of a visible catalog entry. Matching understands the desktop
//! entry field codes:
//!
//! | code | meaning |
//! |------|---------|
//! | `%f` | exactly one non-option argument |
//! | `%F` | zero or more non-option arguments |
//! | `%u` | exactly one URL or non-option argument |
//! | `%U` | zero or more URLs or non-option arguments |
//! | `%i` | icon option, skips two arguments |

use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Stdio};
use sysinfo::System;

use crate::error::{Result, TriageError};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AppInfo {
    pub name: String,
    pub exec: String,
    #[serde(default)]
    pub hidden: bool,
}

impl AppInfo {
    pub fn new(name: &str, exec: &str) -> Self {
        Self {
            name: name.to_string(),
            exec: exec.to_string(),
            hidden: false,
        }
    }

    pub fn executable(&self) -> &str {
        argv0(&self.exec)
    }
}

/// Source of knowledge about launchable applications.
pub trait AppCatalog {
    /// Resolves a crashed command line to the application it launched, if any.
    fn find_by_command_line(&self, command_line: &str) -> Option<AppInfo>;

    /// Whether the application is already back up. Best effort.
    fn is_running(&self, _app: &AppInfo) -> bool {
        false
    }

    fn launch(&self, app: &AppInfo) -> Result<()>;
}

/// Catalog backed by a fixed list of applications (from the config file).
#[derive(Debug, Clone, Default)]
pub struct StaticAppCatalog {
    apps: Vec<AppInfo>,
}

impl StaticAppCatalog {
    pub fn new(apps: Vec<AppInfo>) -> Self {
        Self { apps }
    }
}

impl AppCatalog for StaticAppCatalog {
    fn find_by_command_line(&self, command_line: &str) -> Option<AppInfo> {
        find_app(&self.apps, command_line).cloned()
    }

    fn is_running(&self, app: &AppInfo) -> bool {
        let binary = basename(app.executable());
        if binary.is_empty() {
            return false;
        }
        let mut sys = System::new();
        sys.refresh_processes();
        sys.processes().values().any(|process| {
            process
                .exe()
                .and_then(|exe| exe.file_name())
                .map(|name| name.to_string_lossy() == binary)
                .unwrap_or(false)
        })
    }

    fn launch(&self, app: &AppInfo) -> Result<()> {
        let args = launch_args(&app.exec);
        let (program, rest) = match args.split_first() {
            Some(split) => split,
            None => {
                return Err(TriageError::Io {
                    context: format!("Application {} has an empty exec line", app.name),
                    source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
                })
            }
        };
        Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
            .map_err(|err| TriageError::Io {
                context: format!("Could not launch '{}'", app.name),
                source: err,
            })
    }
}

/// First space-separated token of a command line.
pub fn argv0(command_line: &str) -> &str {
    command_line.split(' ').next().unwrap_or("")
}

/// Finds the first visible app whose exec line matches `command_line`.
pub fn find_app<'a>(apps: &'a [AppInfo], command_line: &str) -> Option<&'a AppInfo> {
    let binary = argv0(command_line);
    let mut shortlist = apps
        .iter()
        .filter(|app| !app.hidden)
        .filter(|app| same_binary(binary, app.executable()))
        .peekable();
    shortlist.peek()?;

    let args = split_unquoted(command_line);
    shortlist.find(|app| args_match(&args, &split_unquoted(&app.exec)))
}

fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

fn same_binary(cmd: &str, exec: &str) -> bool {
    cmd == exec || basename(cmd) == basename(exec)
}

fn split_unquoted(line: &str) -> Vec<String> {
    line.split(' ').map(|arg| arg.replace('"', "")).collect()
}

fn is_file_arg(arg: &str) -> bool {
    !arg.starts_with('-')
}

fn is_url(arg: &str) -> bool {
    arg.contains("://")
}

/// Compares argument lists after the binary, honoring field codes.
fn args_match(cmd: &[String], exec: &[String]) -> bool {
    let (mut c, mut d) = (1, 1);

    while d < exec.len() {
        let current = cmd.get(c).map(String::as_str);
        match exec[d].as_str() {
            "%f" => match current {
                Some(arg) if is_file_arg(arg) => {
                    c += 1;
                    d += 1;
                }
                _ => return false,
            },
            "%F" => match current {
                Some(arg) if is_file_arg(arg) => c += 1,
                _ => d += 1,
            },
            "%u" => match current {
                Some(arg) if is_url(arg) || is_file_arg(arg) => {
                    c += 1;
                    d += 1;
                }
                _ => return false,
            },
            "%U" => match current {
                Some(arg) if is_url(arg) || is_file_arg(arg) => c += 1,
                _ => d += 1,
            },
            "%i" => {
                c += 2;
                d += 1;
            }
            literal => match current {
                Some(arg) if arg == literal => {
                    c += 1;
                    d += 1;
                }
                _ => return false,
            },
        }
    }

    c == cmd.len() && d == exec.len()
}

/// Exec line with field codes removed, ready to spawn.
fn launch_args(exec: &str) -> Vec<String> {
    split_unquoted(exec)
        .into_iter()
        .filter(|arg| !arg.is_empty())
        .filter(|arg| !(arg.len() == 2 && arg.starts_with('%')))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        split_unquoted(line)
    }

    #[test]
    fn argv0_takes_first_token() {
        assert_eq!(argv0("/usr/bin/gedit --new-window"), "/usr/bin/gedit");
        assert_eq!(argv0(""), "");
    }

    #[test]
    fn binaries_match_by_basename() {
        assert!(same_binary("/usr/bin/gedit", "gedit"));
        assert!(same_binary("gedit", "gedit"));
        assert!(!same_binary("/usr/bin/gedit", "geany"));
    }

    #[test]
    fn literal_arguments_must_match() {
        assert!(args_match(&args("totem --fullscreen"), &args("totem --fullscreen")));
        assert!(!args_match(&args("totem --quiet"), &args("totem --fullscreen")));
        assert!(!args_match(&args("totem"), &args("totem --fullscreen")));
        assert!(!args_match(&args("totem --fullscreen x"), &args("totem --fullscreen")));
    }

    #[test]
    fn single_file_code_needs_one_file() {
        let exec = args("eog %f");
        assert!(args_match(&args("eog /tmp/a.png"), &exec));
        assert!(!args_match(&args("eog"), &exec));
        assert!(!args_match(&args("eog --slideshow"), &exec));
    }

    #[test]
    fn multi_file_code_accepts_zero_or_more() {
        let exec = args("gedit %F");
        assert!(args_match(&args("gedit"), &exec));
        assert!(args_match(&args("gedit a.txt b.txt"), &exec));
        assert!(!args_match(&args("gedit --verbose"), &exec));
    }

    #[test]
    fn url_codes_accept_urls_and_files() {
        assert!(args_match(&args("firefox https://example.org"), &args("firefox %u")));
        assert!(args_match(&args("firefox"), &args("firefox %U")));
        assert!(args_match(
            &args("firefox https://a.org file.html"),
            &args("firefox %U")
        ));
        assert!(!args_match(&args("firefox"), &args("firefox %u")));
    }

    #[test]
    fn icon_code_skips_two_arguments() {
        assert!(args_match(&args("app --icon foo"), &args("app %i")));
    }

    #[test]
    fn quotes_are_ignored() {
        assert!(args_match(
            &args("viewer \"--mode\""),
            &args("viewer --mode")
        ));
    }

    #[test]
    fn find_app_skips_hidden_entries() {
        let mut hidden = AppInfo::new("Hidden Editor", "gedit %U");
        hidden.hidden = true;
        let visible = AppInfo::new("Text Editor", "/usr/bin/gedit %U");
        let apps = vec![hidden, visible.clone()];

        assert_eq!(find_app(&apps, "gedit /tmp/notes.txt"), Some(&visible));
        assert_eq!(find_app(&apps, "geany /tmp/notes.txt"), None);
    }

    #[test]
    fn launch_args_drop_field_codes() {
        assert_eq!(
            launch_args("gedit --new-window %U"),
            vec!["gedit".to_string(), "--new-window".to_string()]
        );
    }

    #[test]
    fn catalog_resolves_command_lines() {
        let catalog = StaticAppCatalog::new(vec![AppInfo::new("Image Viewer", "eog %f")]);
        let app = catalog
            .find_by_command_line("/usr/bin/eog /tmp/cat.png")
            .expect("app");
        assert_eq!(app.name, "Image Viewer");
        assert!(catalog.find_by_command_line("/usr/bin/eog").is_none());
    }
}
