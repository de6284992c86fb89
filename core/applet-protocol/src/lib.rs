//! IPC protocol types and validation for crashwatch-applet.
//!
//! This crate is shared by the applet and its clients (the bus bridge, the
//! notification widget, `crashwatch-ctl`) to prevent schema drift. The applet
//! remains the authority on validation, but clients can reuse the same types
//! to construct valid requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_PATH_BYTES: usize = 4096;

/// Exit status a handler uses to say "stop processing this problem".
pub const HANDLER_EXIT_STOP_EVENT: i32 = 70;
/// Environment override that makes the handler answer its own questions.
pub const HANDLER_NONINTERACTIVE_ENV: &str = "REPORT_CLIENT_NONINTERACTIVE";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Crash,
    Connectivity,
    NotificationAction,
    NotificationClosed,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// A crash as announced on the system bus.
///
/// All fields are strings on the wire; empty means "not provided".
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CrashEvent {
    #[serde(default)]
    pub component_name: String,
    pub directory_path: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub dedup_hash: String,
}

impl CrashEvent {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.directory_path.trim().is_empty() {
            return Err(ErrorInfo::new(
                "missing_field",
                "directory_path is required",
            ));
        }
        if !self.directory_path.starts_with('/') {
            return Err(ErrorInfo::new(
                "invalid_path",
                "directory_path must be absolute",
            ));
        }
        if self.directory_path.len() > MAX_PATH_BYTES {
            return Err(ErrorInfo::new(
                "invalid_path",
                format!("directory_path must be {} bytes or fewer", MAX_PATH_BYTES),
            ));
        }
        Ok(())
    }

    /// Whether the crashed process belonged to someone other than `current_uid`.
    ///
    /// An empty uid is treated as ours; anything unparsable is foreign.
    pub fn is_foreign(&self, current_uid: u32) -> bool {
        if self.uid.is_empty() {
            return false;
        }
        match self.uid.parse::<u32>() {
            Ok(uid) => uid != current_uid,
            Err(_) => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConnectivityChange {
    pub network_available: bool,
    pub connectivity_full: bool,
}

impl ConnectivityChange {
    pub fn online() -> Self {
        Self {
            network_available: true,
            connectivity_full: true,
        }
    }

    pub fn offline() -> Self {
        Self::default()
    }

    /// Reports can only go out when the link is up and the internet is reachable.
    pub fn is_available_for_reporting(&self) -> bool {
        self.network_available && self.connectivity_full
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationActionKind {
    Report,
    Restart,
}

impl NotificationActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationActionKind::Report => "report",
            NotificationActionKind::Restart => "restart",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NotificationActionKind::Report => "Report",
            NotificationActionKind::Restart => "Restart",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NotificationAction {
    pub notification_id: u64,
    pub action: NotificationActionKind,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NotificationClosed {
    pub notification_id: u64,
}

/// Records the applet writes for the notification widget, one JSON object per line.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierOutput {
    Show {
        notification_id: u64,
        summary: String,
        body: String,
        actions: Vec<NotificationActionKind>,
        problem_dir: String,
    },
    Close {
        notification_id: u64,
    },
}

pub fn parse_crash_event(params: Value) -> Result<CrashEvent, ErrorInfo> {
    let event: CrashEvent = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("crash payload is invalid JSON: {}", err),
        )
    })?;
    event.validate()?;
    Ok(event)
}

pub fn parse_connectivity(params: Value) -> Result<ConnectivityChange, ErrorInfo> {
    serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("connectivity payload is invalid JSON: {}", err),
        )
    })
}

pub fn parse_notification_action(params: Value) -> Result<NotificationAction, ErrorInfo> {
    let action: NotificationAction = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("notification action payload is invalid JSON: {}", err),
        )
    })?;
    require_notification_id(action.notification_id)?;
    Ok(action)
}

pub fn parse_notification_closed(params: Value) -> Result<NotificationClosed, ErrorInfo> {
    let closed: NotificationClosed = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("notification closed payload is invalid JSON: {}", err),
        )
    })?;
    require_notification_id(closed.notification_id)?;
    Ok(closed)
}

fn require_notification_id(id: u64) -> Result<(), ErrorInfo> {
    if id == 0 {
        return Err(ErrorInfo::new(
            "invalid_notification_id",
            "notification_id is required",
        ));
    }
    Ok(())
}
