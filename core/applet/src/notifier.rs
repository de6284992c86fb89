//! Notifier that hands notifications to the widget process over stdout.

use std::io::{self, Write};

use crashwatch_protocol::NotifierOutput;
use triage_core::{Notification, Notifier};

/// Writes one [`NotifierOutput`] JSON record per line.
pub struct StdoutNotifier<W: Write = io::Stdout> {
    out: W,
    next_id: u64,
}

impl StdoutNotifier {
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }
}

impl Default for StdoutNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> StdoutNotifier<W> {
    pub fn with_writer(out: W) -> Self {
        Self { out, next_id: 0 }
    }

    fn emit(&mut self, record: &NotifierOutput) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

impl<W: Write> Notifier for StdoutNotifier<W> {
    fn show(&mut self, notification: &Notification) -> Result<u64, String> {
        self.next_id += 1;
        let notification_id = self.next_id;
        let record = NotifierOutput::Show {
            notification_id,
            summary: notification.summary.clone(),
            body: notification.body.clone(),
            actions: notification.actions.clone(),
            problem_dir: notification.problem_dir.to_string_lossy().to_string(),
        };
        self.emit(&record).map_err(|err| err.to_string())?;
        Ok(notification_id)
    }

    fn close(&mut self, notification_id: u64) {
        if let Err(err) = self.emit(&NotifierOutput::Close { notification_id }) {
            tracing::warn!(notification_id, error = %err, "Failed to close notification");
        }
    }
}
