//! Notification collaborator seam.

use std::path::PathBuf;

use crashwatch_protocol::NotificationActionKind;

/// What the orchestrator asks the notification widget to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub summary: String,
    pub body: String,
    pub actions: Vec<NotificationActionKind>,
    pub problem_dir: PathBuf,
}

/// The notification widget.
///
/// `show` returns the id the widget will later use for action-selected and
/// closed callbacks. Ids must be non-zero.
pub trait Notifier {
    fn show(&mut self, notification: &Notification) -> Result<u64, String>;

    fn close(&mut self, _notification_id: u64) {}
}
