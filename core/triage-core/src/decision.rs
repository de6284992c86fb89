//! Triage decision table.
//!
//! Maps what we know about a problem plus two environment flags to what the
//! user should see. Pure: no I/O, no mutation. The caller marks the problem
//! as announced only once a notification has actually been shown.
//!
//! ```text
//! app  auto  pkg  net  seen  → message                   report
//! ───  ────  ───  ───  ────    ───────────────────────── ──────
//!  y    y     y    y    *      auto-reported              -
//!  y    y     y    n    *      will report when online    -
//!  y    y     n    *    n      contact developer          -
//!  y    y     n    *    y      (suppress)
//!  y    n     y    *    *      send a report              y
//!  y    n     n    *    n      contact developer          -
//!  y    n     n    *    y      (suppress)
//!  n    *     *    *    y      (suppress)
//!  n    y     y    y    n      auto-reported (component)  -
//!  n    y     y    n    n      will report when online    -
//!  n    n     *    *    n      send a report              y
//!  n    y     n    *    n      contact developer (exe)    -
//! ```
//!
//! Apps additionally get a restart action when they crashed for the current
//! user and are not running again, whether or not a message is shown.

use serde::Serialize;

use crate::apps::{argv0, AppCatalog};
use crate::problem::Problem;

pub const NOTIFICATION_SUMMARY: &str = "Oops!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TriageEnv {
    pub auto_reporting_enabled: bool,
    pub network_available: bool,
}

/// Derived per-problem facts the table is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriageFacts {
    /// Display name of the application the command line resolved to.
    pub app_name: Option<String>,
    /// First token of the command line, for non-app messages.
    pub executable: Option<String>,
    pub is_packaged: bool,
    pub already_reported: bool,
    pub is_running_again: bool,
    pub is_current_user: bool,
}

impl TriageFacts {
    pub fn gather(problem: &Problem, catalog: &dyn AppCatalog) -> Self {
        let app = problem
            .command_line
            .as_deref()
            .and_then(|cmdline| catalog.find_by_command_line(cmdline));
        let is_running_again = app.as_ref().map(|app| catalog.is_running(app)).unwrap_or(false);
        Self {
            app_name: app.map(|app| app.name),
            executable: problem
                .command_line
                .as_deref()
                .map(argv0)
                .filter(|exe| !exe.is_empty())
                .map(str::to_string),
            is_packaged: problem.is_packaged,
            already_reported: problem.already_reported(),
            is_running_again,
            is_current_user: !problem.is_foreign,
        }
    }

    pub fn is_app(&self) -> bool {
        self.app_name.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    AutoReported,
    ReportWhenOnline,
    SendReport,
    ContactDeveloper,
}

/// Who the message talks about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Application(String),
    Component,
    Unspecified,
    Executable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub kind: MessageKind,
    pub subject: Subject,
}

impl Message {
    pub fn body(&self) -> String {
        const SORRY: &str = "We're sorry, it looks like";
        let lead = match &self.subject {
            Subject::Application(name) | Subject::Executable(name) => {
                format!("{} {} crashed.", SORRY, name)
            }
            Subject::Component => format!("{} a problem occurred in a component.", SORRY),
            Subject::Unspecified => format!("{} a problem occurred.", SORRY),
        };
        let tail = match self.kind {
            MessageKind::AutoReported => "The problem has been automatically reported.",
            MessageKind::ReportWhenOnline => {
                "The problem will be reported when the internet is available."
            }
            MessageKind::SendReport => {
                "If you'd like to help resolve the issue, please send a report."
            }
            MessageKind::ContactDeveloper => {
                "Please contact the developer if you want to report the issue."
            }
        };
        format!("{} {}", lead, tail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresentationDirective {
    pub message: Option<Message>,
    pub show_report_action: bool,
    pub show_restart_action: bool,
    /// Nothing should be shown for this problem.
    pub suppress: bool,
}

pub fn decide(facts: &TriageFacts, env: &TriageEnv) -> PresentationDirective {
    use MessageKind::*;

    let is_app = facts.is_app();
    let row = (
        is_app,
        env.auto_reporting_enabled,
        facts.is_packaged,
        env.network_available,
        facts.already_reported,
    );

    let verdict: Option<(MessageKind, bool)> = match row {
        (true, true, true, true, _) => Some((AutoReported, false)),
        (true, true, true, false, _) => Some((ReportWhenOnline, false)),
        (true, true, false, _, false) => Some((ContactDeveloper, false)),
        (true, true, false, _, true) => None,
        (true, false, true, _, _) => Some((SendReport, true)),
        (true, false, false, _, false) => Some((ContactDeveloper, false)),
        (true, false, false, _, true) => None,
        (false, _, _, _, true) => None,
        (false, true, true, true, false) => Some((AutoReported, false)),
        (false, true, true, false, false) => Some((ReportWhenOnline, false)),
        (false, false, _, _, false) => Some((SendReport, true)),
        (false, true, false, _, false) => Some((ContactDeveloper, false)),
    };

    let message = verdict.map(|(kind, _)| Message {
        kind,
        subject: subject_for(facts, kind),
    });

    PresentationDirective {
        suppress: message.is_none(),
        message,
        show_report_action: verdict.map(|(_, report)| report).unwrap_or(false),
        show_restart_action: is_app && facts.is_current_user && !facts.is_running_again,
    }
}

fn subject_for(facts: &TriageFacts, kind: MessageKind) -> Subject {
    if let Some(name) = &facts.app_name {
        return Subject::Application(name.clone());
    }
    match kind {
        MessageKind::AutoReported | MessageKind::ReportWhenOnline => Subject::Component,
        MessageKind::SendReport => Subject::Unspecified,
        MessageKind::ContactDeveloper => {
            Subject::Executable(facts.executable.clone().unwrap_or_else(|| "a program".to_string()))
        }
    }
}
