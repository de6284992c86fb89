//! # triage-core
//!
//! Core library for crashwatch: crash-event triage and asynchronous
//! reporting, shared by the applet binary and its tests.
//!
//! ## Design Principles
//!
//! - **Single owner**: all mutable state lives in one [`Orchestrator`], driven
//!   by one thread. No globals, no locks.
//! - **No async runtime**: readiness comes from `poll(2)`; the caller owns the loop.
//! - **Graceful degradation**: missing files return empty/default values; a
//!   problem that cannot be handled is dropped, never the process.
//! - **Collaborators behind traits**: notification widget, application
//!   catalog and ownership helper are injected.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use triage_core::{Message, Orchestrator};
//!
//! let mut orchestrator = Orchestrator::new(config, watch_dirs, seen, collaborators);
//! orchestrator.discover_on_startup(chrono::Utc::now());
//! orchestrator.dispatch(Message::CrashEvent(event));
//! ```

pub mod apps;
pub mod config;
pub mod decision;
pub mod deferred;
pub mod dump_dir;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod ownership;
pub mod problem;
pub mod readiness;
pub mod seen_set;
pub mod storage;
pub mod supervisor;

// Re-export commonly used items at crate root
pub use apps::{AppCatalog, AppInfo, StaticAppCatalog};
pub use config::{load_config, AppletConfig, HandlerSettings, TriageSettings, WatchSettings};
pub use decision::{decide, Message as TriageMessage, MessageKind, PresentationDirective, TriageEnv, TriageFacts};
pub use deferred::{DeferredQueue, FlushScheduler};
pub use dump_dir::DumpDir;
pub use error::{Result, TriageError};
pub use notify::{Notification, Notifier};
pub use orchestrator::{Collaborators, Message, Orchestrator};
pub use ownership::{LocalOwnership, OwnershipClaimer};
pub use problem::{Problem, ProblemId};
pub use readiness::poll_readable;
pub use seen_set::{enumerate_current, PersistStatus, SeenDiff, SeenSetStore};
pub use storage::StorageConfig;
pub use supervisor::{classify_exit, HandlerCommand, HandlerOutcome, Session, SessionPurpose};
