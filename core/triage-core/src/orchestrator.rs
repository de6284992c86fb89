//! The orchestrator: one value owning all triage state.
//!
//! Everything arrives as a [`Message`] and goes through [`Orchestrator::dispatch`].
//! Handling a message may produce follow-up messages (a drained session
//! reaching end-of-stream produces `ChildExited`); those are queued and
//! handled after the current one, never re-entrantly.
//!
//! ```text
//! crash event ──► Problem ──► auto-report? ──yes──► Session ──► outcome
//!                                 │no                             │
//!                                 ▼                               ▼
//!                              present ◄──── online ◄──── Failed / Succeeded
//!                                                │offline
//!                                                ▼
//!                                          deferred queue ──(idle flush)──► show path
//! ```

use std::collections::{HashMap, VecDeque};
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use crashwatch_protocol::{
    ConnectivityChange, CrashEvent, NotificationAction, NotificationActionKind,
    NotificationClosed,
};
use tracing::{debug, info, warn};

use crate::apps::AppCatalog;
use crate::config::AppletConfig;
use crate::decision::{decide, TriageEnv, TriageFacts, NOTIFICATION_SUMMARY};
use crate::deferred::{DeferredQueue, FlushScheduler};
use crate::dump_dir::DumpDir;
use crate::notify::{Notification, Notifier};
use crate::ownership::{ensure_writable, OwnershipClaimer};
use crate::problem::{current_uid, Problem, ProblemId};
use crate::seen_set::{enumerate_current, SeenSetStore};
use crate::supervisor::{DrainStatus, HandlerCommand, HandlerOutcome, Session, SessionPurpose};

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    CrashEvent(CrashEvent),
    ConnectivityChanged(ConnectivityChange),
    ChildOutputReady(ProblemId),
    ChildExited(ProblemId),
    UserAction(NotificationAction),
    NotificationClosed(NotificationClosed),
}

/// External collaborators, injected so tests can stand in for them.
pub struct Collaborators {
    pub notifier: Box<dyn Notifier>,
    pub apps: Box<dyn AppCatalog>,
    pub ownership: Box<dyn OwnershipClaimer>,
}

pub struct Orchestrator {
    config: AppletConfig,
    watch_dirs: Vec<PathBuf>,
    seen: SeenSetStore,
    handler: HandlerCommand,
    deferred: DeferredQueue,
    flush: FlushScheduler,
    sessions: HashMap<ProblemId, Session>,
    /// Problems currently on screen, by notification id.
    announced: HashMap<u64, Problem>,
    last_announced: Option<PathBuf>,
    last_finished: Option<Problem>,
    connectivity: ConnectivityChange,
    next_problem_id: u64,
    current_uid: u32,
    pending: VecDeque<Message>,
    collaborators: Collaborators,
}

impl Orchestrator {
    pub fn new(
        config: AppletConfig,
        watch_dirs: Vec<PathBuf>,
        seen: SeenSetStore,
        collaborators: Collaborators,
    ) -> Self {
        let connectivity = if config.triage.assume_online {
            ConnectivityChange::online()
        } else {
            ConnectivityChange::offline()
        };
        Self {
            handler: HandlerCommand::from_settings(&config.handler),
            config,
            watch_dirs,
            seen,
            deferred: DeferredQueue::new(),
            flush: FlushScheduler::default(),
            sessions: HashMap::new(),
            announced: HashMap::new(),
            last_announced: None,
            last_finished: None,
            connectivity,
            next_problem_id: 0,
            current_uid: current_uid(),
            pending: VecDeque::new(),
            collaborators,
        }
    }

    /// Overrides the uid crash events are compared against.
    pub fn with_current_uid(mut self, uid: u32) -> Self {
        self.current_uid = uid;
        self
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event loop surface
    // ─────────────────────────────────────────────────────────────────────

    /// Handles `message` and every follow-up message it produces.
    pub fn dispatch(&mut self, message: Message) {
        self.pending.push_back(message);
        while let Some(message) = self.pending.pop_front() {
            self.handle(message);
        }
    }

    /// Runs idle-priority work. Returns whether anything ran.
    pub fn on_idle(&mut self) -> bool {
        let Some(token) = self.flush.take_due() else {
            return false;
        };
        let problems = self.deferred.drain();
        debug!(?token, count = problems.len(), "Flushing deferred problems");
        if !problems.is_empty() {
            self.show_problems(problems);
        }
        true
    }

    pub fn has_idle_work(&self) -> bool {
        self.flush.is_pending()
    }

    /// Output descriptors of all running handlers, for readiness polling.
    pub fn session_fds(&self) -> Vec<(ProblemId, RawFd)> {
        let mut fds: Vec<(ProblemId, RawFd)> = self
            .sessions
            .iter()
            .map(|(id, session)| (*id, session.output_fd()))
            .collect();
        fds.sort_by_key(|(id, _)| *id);
        fds
    }

    pub fn has_sessions(&self) -> bool {
        !self.sessions.is_empty()
    }

    /// Announces problems that appeared while we were not running.
    pub fn discover_on_startup(&mut self, now: DateTime<Utc>) {
        let max_age = self.config.triage.max_problem_age();
        let mut problems = Vec::new();

        for dir in self.refresh_seen_set() {
            let Some(record) = DumpDir::open(&dir) else {
                debug!(dir = %dir.display(), "Not a problem directory; ignoring");
                continue;
            };
            let Some(created_at) = record.created_at() else {
                debug!(dir = %dir.display(), "Problem directory has no creation time; ignoring");
                continue;
            };
            if now.signed_duration_since(created_at) > max_age {
                debug!(dir = %dir.display(), "Ignoring outdated problem");
                continue;
            }
            if !record.is_complete() {
                debug!(dir = %dir.display(), "Ignoring incomplete problem");
                continue;
            }
            if record.is_reported() {
                debug!(dir = %dir.display(), "Ignoring already reported problem");
                continue;
            }

            let id = self.next_id();
            problems.push(Problem::from_record(id, &record));
        }

        if !problems.is_empty() {
            info!(count = problems.len(), "Found problems from a previous session");
            self.show_problems(problems);
        }
    }

    /// Re-syncs the persisted seen list with the watch roots.
    ///
    /// Returns the directories that were not in the list before.
    pub fn refresh_seen_set(&mut self) -> Vec<PathBuf> {
        let current = enumerate_current(&self.watch_dirs);
        self.seen.diff_and_persist(&current).new_ids
    }

    pub fn shutdown(&mut self) {
        if !self.sessions.is_empty() {
            info!(count = self.sessions.len(), "Leaving handlers running");
        }
        self.refresh_seen_set();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Observers
    // ─────────────────────────────────────────────────────────────────────

    pub fn network_available(&self) -> bool {
        self.connectivity.is_available_for_reporting()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn announced_count(&self) -> usize {
        self.announced.len()
    }

    /// Directory of the most recently shown problem.
    pub fn last_announced(&self) -> Option<&Path> {
        self.last_announced.as_deref()
    }

    /// The most recent problem whose handler finished, with the flags its
    /// outcome set.
    pub fn last_finished(&self) -> Option<&Problem> {
        self.last_finished.as_ref()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Message handling
    // ─────────────────────────────────────────────────────────────────────

    fn handle(&mut self, message: Message) {
        match message {
            Message::CrashEvent(event) => self.on_crash(event),
            Message::ConnectivityChanged(change) => self.on_connectivity(change),
            Message::ChildOutputReady(id) => self.on_output_ready(id),
            Message::ChildExited(id) => self.on_child_exited(id),
            Message::UserAction(action) => self.on_user_action(action),
            Message::NotificationClosed(closed) => self.on_notification_closed(closed),
        }
    }

    fn on_crash(&mut self, event: CrashEvent) {
        let id = self.next_id();
        let record = DumpDir::open(Path::new(&event.directory_path));
        let problem = Problem::from_crash_event(id, &event, self.current_uid, record.as_ref());

        if problem.is_foreign && !self.config.triage.privileged_user {
            debug!(
                dir = %problem.dir().display(),
                uid = %event.uid,
                "Ignoring crash of another user"
            );
            return;
        }

        info!(
            problem = %problem.id,
            dir = %problem.dir().display(),
            component = problem.component.as_deref().unwrap_or(""),
            foreign = problem.is_foreign,
            "Crash detected"
        );
        self.show_problems(vec![problem]);
    }

    fn on_connectivity(&mut self, change: ConnectivityChange) {
        self.connectivity = change;
        let available = self.network_available();
        info!(
            network_available = change.network_available,
            connectivity_full = change.connectivity_full,
            "Connectivity changed"
        );

        let cancelled = self.flush.cancel();
        if available {
            let token = self.flush.schedule();
            debug!(?token, ?cancelled, queued = self.deferred.len(), "Deferred flush scheduled");
        } else if let Some(token) = cancelled {
            debug!(?token, "Deferred flush cancelled");
        }
    }

    fn on_output_ready(&mut self, id: ProblemId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            debug!(problem = %id, "Output for unknown session");
            return;
        };
        match session.drain() {
            DrainStatus::Pending => {}
            DrainStatus::Closed | DrainStatus::ReadFailed => {
                self.pending.push_back(Message::ChildExited(id));
            }
        }
    }

    fn on_child_exited(&mut self, id: ProblemId) {
        let Some(session) = self.sessions.remove(&id) else {
            debug!(problem = %id, "Session already finished");
            return;
        };
        let purpose = session.purpose();
        let (problem, outcome) = session.finish();
        self.on_outcome(problem, outcome, purpose);
    }

    fn on_outcome(&mut self, mut problem: Problem, outcome: HandlerOutcome, purpose: SessionPurpose) {
        if let HandlerOutcome::Failed { exit_code: None } = outcome {
            warn!(problem = %problem.id, "Handler was killed by a signal");
        }

        match (purpose, outcome) {
            (_, HandlerOutcome::Suppressed) => {
                problem.mark_known();
                info!(problem = %problem.id, "Problem is already known; not notifying");
                self.last_finished = Some(problem);
            }
            (SessionPurpose::UserReport, HandlerOutcome::Succeeded) => {
                problem.mark_reported();
                info!(problem = %problem.id, "Problem reported");
                self.last_finished = Some(problem);
            }
            (SessionPurpose::UserReport, HandlerOutcome::Failed { exit_code }) => {
                warn!(problem = %problem.id, ?exit_code, "Reporting failed");
                self.last_finished = Some(problem);
            }
            (SessionPurpose::AutoReport, HandlerOutcome::Succeeded) => {
                problem.mark_reported();
                debug!(problem = %problem.id, "Automatic report finished successfully");
                self.last_finished = Some(problem.clone());
                self.present(problem);
            }
            (SessionPurpose::AutoReport, HandlerOutcome::Failed { exit_code }) => {
                debug!(problem = %problem.id, ?exit_code, "Automatic report failed");
                self.last_finished = Some(problem.clone());
                if self.network_available() {
                    self.present(problem);
                } else {
                    info!(problem = %problem.id, "Offline; deferring problem");
                    self.deferred.enqueue(problem);
                }
            }
        }
    }

    fn on_user_action(&mut self, action: NotificationAction) {
        let Some(problem) = self.announced.remove(&action.notification_id) else {
            debug!(notification_id = action.notification_id, "Action for unknown notification");
            return;
        };
        self.collaborators.notifier.close(action.notification_id);
        info!(
            problem = %problem.id,
            action = action.action.as_str(),
            "Notification action selected"
        );

        match action.action {
            NotificationActionKind::Report => {
                let event = self.config.handler.report_event.clone();
                self.run_handler(problem, &event, SessionPurpose::UserReport);
            }
            NotificationActionKind::Restart => self.restart_app(&problem),
        }

        self.refresh_seen_set();
    }

    fn on_notification_closed(&mut self, closed: NotificationClosed) {
        if self.announced.remove(&closed.notification_id).is_none() {
            debug!(notification_id = closed.notification_id, "Close for unknown notification");
            return;
        }
        debug!(notification_id = closed.notification_id, "Notification closed");
        self.refresh_seen_set();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Show path
    // ─────────────────────────────────────────────────────────────────────

    /// Auto-reports own problems when enabled; presents the rest.
    fn show_problems(&mut self, problems: Vec<Problem>) {
        let mut to_present = Vec::new();
        for problem in problems {
            if self.config.triage.auto_reporting && !problem.is_foreign {
                let event = self.config.handler.autoreport_event.clone();
                self.run_handler(problem, &event, SessionPurpose::AutoReport);
            } else {
                to_present.push(problem);
            }
        }
        for problem in to_present {
            self.present(problem);
        }
    }

    fn run_handler(&mut self, mut problem: Problem, event_name: &str, purpose: SessionPurpose) {
        if let Err(err) = ensure_writable(&mut problem, self.collaborators.ownership.as_ref()) {
            warn!(problem = %problem.id, error = %err, "Dropping problem");
            return;
        }

        let id = problem.id;
        match self.handler.spawn(problem, event_name, purpose) {
            Ok(session) => {
                self.sessions.insert(id, session);
            }
            Err(err) => warn!(problem = %id, error = %err, "Dropping problem"),
        }
    }

    fn present(&mut self, mut problem: Problem) {
        let facts = TriageFacts::gather(&problem, self.collaborators.apps.as_ref());
        let env = self.triage_env();
        let directive = decide(&facts, &env);

        let Some(message) = directive.message.as_ref() else {
            debug!(problem = %problem.id, ?facts, "Not notifying");
            return;
        };

        let mut actions = Vec::new();
        if directive.show_report_action {
            actions.push(NotificationActionKind::Report);
        }
        if directive.show_restart_action {
            actions.push(NotificationActionKind::Restart);
        }
        let notification = Notification {
            summary: NOTIFICATION_SUMMARY.to_string(),
            body: message.body(),
            actions,
            problem_dir: problem.dir().to_path_buf(),
        };

        match self.collaborators.notifier.show(&notification) {
            Ok(notification_id) => {
                problem.mark_announced();
                self.last_announced = Some(problem.dir().to_path_buf());
                debug!(problem = %problem.id, notification_id, kind = ?message.kind, "Notification shown");
                self.announced.insert(notification_id, problem);
            }
            Err(err) => {
                warn!(problem = %problem.id, error = %err, "Failed to show notification");
            }
        }
    }

    fn restart_app(&self, problem: &Problem) {
        let app = problem
            .command_line
            .as_deref()
            .and_then(|cmdline| self.collaborators.apps.find_by_command_line(cmdline));
        let Some(app) = app else {
            warn!(problem = %problem.id, "No application to restart");
            return;
        };
        if let Err(err) = self.collaborators.apps.launch(&app) {
            warn!(app = %app.name, error = %err, "Restart failed");
        }
    }

    fn triage_env(&self) -> TriageEnv {
        TriageEnv {
            auto_reporting_enabled: self.config.triage.auto_reporting,
            network_available: self.network_available(),
        }
    }

    fn next_id(&mut self) -> ProblemId {
        self.next_problem_id += 1;
        ProblemId(self.next_problem_id)
    }
}
