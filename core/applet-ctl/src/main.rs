//! crashwatch-ctl: delivers external callbacks to the crashwatch applet.
//!
//! The bus bridge calls `crash` for each crash signal, the network monitor
//! calls `connectivity`, and the notification widget calls `action` and
//! `closed`.
//!
//! ## Subcommands
//!
//! - `crash`: A crash record appeared
//! - `connectivity`: Network state changed
//! - `action`: The user picked a notification action
//! - `closed`: A notification went away
//! - `health`: Check that the applet is up

mod applet_client;

use clap::{Parser, Subcommand, ValueEnum};
use crashwatch_protocol::{
    ConnectivityChange, CrashEvent, Method, NotificationAction, NotificationActionKind,
    NotificationClosed,
};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use triage_core::StorageConfig;

#[derive(Parser)]
#[command(name = "crashwatch-ctl")]
#[command(about = "Send events to the crashwatch applet")]
#[command(version)]
struct Cli {
    /// Applet socket (default: $CRASHWATCH_SOCKET or <cache>/applet.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Announce a crash
    Crash {
        /// Absolute path of the problem directory
        #[arg(value_name = "DIR")]
        dir: String,

        /// Package component the crashed program belongs to
        #[arg(long, default_value = "")]
        component: String,

        /// Uid of the crashed process
        #[arg(long, default_value = "")]
        uid: String,

        /// Correlation id of the crash
        #[arg(long, default_value = "")]
        uuid: String,

        /// Deduplication hash of the crash
        #[arg(long, default_value = "")]
        duphash: String,
    },

    /// Report the current network state
    Connectivity {
        #[arg(value_enum)]
        state: NetworkState,
    },

    /// Forward a notification action
    Action {
        #[arg(value_name = "NOTIFICATION_ID")]
        notification_id: u64,

        #[arg(value_enum)]
        action: ActionArg,
    },

    /// Forward a notification close
    Closed {
        #[arg(value_name = "NOTIFICATION_ID")]
        notification_id: u64,
    },

    /// Check applet health
    Health,
}

#[derive(Clone, Copy, ValueEnum)]
enum NetworkState {
    /// Link up and internet reachable
    Online,
    /// Link up but no full connectivity
    Limited,
    /// No link
    Offline,
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    Report,
    Restart,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let socket = match cli.socket {
        Some(socket) => socket,
        None => match StorageConfig::from_user_dirs() {
            Ok(storage) => storage.socket_file(),
            Err(err) => {
                tracing::error!(error = %err, "Failed to resolve applet socket");
                std::process::exit(1);
            }
        },
    };

    let (method, params) = match build_request(cli.command) {
        Ok(request) => request,
        Err(err) => {
            tracing::error!(error = %err, "Invalid arguments");
            std::process::exit(2);
        }
    };

    match applet_client::call(&socket, method, params) {
        Ok(data) => println!("{}", data),
        Err(err) => {
            tracing::error!(error = %err, "crashwatch-ctl request failed");
            std::process::exit(1);
        }
    }
}

fn build_request(command: Commands) -> Result<(Method, Option<Value>), String> {
    let to_value = |value: serde_json::Result<Value>| {
        value.map(Some).map_err(|err| format!("Failed to serialize params: {}", err))
    };

    match command {
        Commands::Crash {
            dir,
            component,
            uid,
            uuid,
            duphash,
        } => {
            let event = CrashEvent {
                component_name: component,
                directory_path: dir,
                uid,
                correlation_id: uuid,
                dedup_hash: duphash,
            };
            event.validate().map_err(|err| err.message)?;
            Ok((Method::Crash, to_value(serde_json::to_value(event))?))
        }
        Commands::Connectivity { state } => {
            let change = match state {
                NetworkState::Online => ConnectivityChange::online(),
                NetworkState::Limited => ConnectivityChange {
                    network_available: true,
                    connectivity_full: false,
                },
                NetworkState::Offline => ConnectivityChange::offline(),
            };
            Ok((Method::Connectivity, to_value(serde_json::to_value(change))?))
        }
        Commands::Action {
            notification_id,
            action,
        } => {
            let action = NotificationAction {
                notification_id,
                action: match action {
                    ActionArg::Report => NotificationActionKind::Report,
                    ActionArg::Restart => NotificationActionKind::Restart,
                },
            };
            Ok((Method::NotificationAction, to_value(serde_json::to_value(action))?))
        }
        Commands::Closed { notification_id } => {
            let closed = NotificationClosed { notification_id };
            Ok((Method::NotificationClosed, to_value(serde_json::to_value(closed))?))
        }
        Commands::Health => Ok((Method::GetHealth, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crash_command_builds_event() {
        let (method, params) = build_request(Commands::Crash {
            dir: "/var/spool/abrt/ccpp-1".to_string(),
            component: "gedit".to_string(),
            uid: "1000".to_string(),
            uuid: String::new(),
            duphash: String::new(),
        })
        .expect("request");
        assert!(matches!(method, Method::Crash));
        let params = params.expect("params");
        assert_eq!(params["directory_path"], "/var/spool/abrt/ccpp-1");
        assert_eq!(params["component_name"], "gedit");
    }

    #[test]
    fn relative_crash_dir_is_rejected_locally() {
        let result = build_request(Commands::Crash {
            dir: "ccpp-1".to_string(),
            component: String::new(),
            uid: String::new(),
            uuid: String::new(),
            duphash: String::new(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn limited_connectivity_is_not_full() {
        let (_, params) = build_request(Commands::Connectivity {
            state: NetworkState::Limited,
        })
        .expect("request");
        assert_eq!(
            params,
            Some(serde_json::json!({ "network_available": true, "connectivity_full": false }))
        );
    }

    #[test]
    fn action_command_uses_wire_names() {
        let (method, params) = build_request(Commands::Action {
            notification_id: 4,
            action: ActionArg::Restart,
        })
        .expect("request");
        assert!(matches!(method, Method::NotificationAction));
        assert_eq!(
            params,
            Some(serde_json::json!({ "notification_id": 4, "action": "restart" }))
        );
    }
}
