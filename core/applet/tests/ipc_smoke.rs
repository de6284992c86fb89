use crashwatch_protocol::{Method, NotifierOutput, Request, Response, PROTOCOL_VERSION};
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, sleep};
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct AppletGuard {
    child: Child,
}

impl Drop for AppletGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

struct Workspace {
    root: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let root = TempDir::new().expect("Failed to create temp dir");
        std::fs::create_dir_all(root.path().join("spool")).expect("create spool");

        let handler = root.path().join("handler.sh");
        std::fs::write(&handler, "#!/bin/sh\necho \"reporting $5\"\nexit 0\n")
            .expect("write handler");
        std::fs::set_permissions(&handler, std::fs::Permissions::from_mode(0o755))
            .expect("chmod handler");

        std::fs::write(
            root.path().join("applet.toml"),
            format!(
                "[triage]\nauto_reporting = true\n\n[handler]\nprogram = \"{}\"\n\n\
                 [[applications]]\nname = \"Text Editor\"\nexec = \"gedit %U\"\n",
                handler.display()
            ),
        )
        .expect("write config");

        Self { root }
    }

    fn cache_dir(&self) -> PathBuf {
        self.root.path().join("cache")
    }

    fn spool(&self) -> PathBuf {
        self.root.path().join("spool")
    }

    fn socket(&self) -> PathBuf {
        self.cache_dir().join("applet.sock")
    }

    fn spawn(&self) -> Child {
        Command::new(env!("CARGO_BIN_EXE_crashwatch-applet"))
            .arg("--config")
            .arg(self.root.path().join("applet.toml"))
            .arg(self.spool())
            .env("CRASHWATCH_CACHE_DIR", self.cache_dir())
            .env_remove("CRASHWATCH_SOCKET")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to spawn crashwatch-applet")
    }

    fn problem_dir(&self, name: &str) -> PathBuf {
        let dir = self.spool().join(name);
        std::fs::create_dir_all(&dir).expect("create problem dir");
        std::fs::write(dir.join("cmdline"), "/usr/bin/gedit /tmp/notes.txt\n").expect("cmdline");
        std::fs::write(dir.join("component"), "gedit").expect("component");
        std::fs::write(dir.join("count"), "1").expect("count");
        dir
    }
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for applet socket at {}", path.display());
}

fn stdout_lines(child: &mut Child) -> Receiver<String> {
    let stdout = child.stdout.take().expect("piped stdout");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn send_raw(socket: &Path, payload: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to applet socket");
    stream.write_all(payload).expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn send_request(socket: &Path, method: Method, params: Option<serde_json::Value>) -> Response {
    let request = Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some("test".to_string()),
        params,
    };
    let mut payload = serde_json::to_vec(&request).expect("Failed to serialize request");
    payload.push(b'\n');
    send_raw(socket, &payload)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn error_code(response: &Response) -> Option<&str> {
    response.error.as_ref().map(|err| err.code.as_str())
}

#[test]
fn applet_health_and_validation_smoke() {
    let workspace = Workspace::new();
    let child = workspace.spawn();
    let _guard = AppletGuard { child };
    wait_for_socket(&workspace.socket(), Duration::from_secs(5));

    let health = send_request(&workspace.socket(), Method::GetHealth, None);
    assert!(health.ok, "health response was not ok");
    assert_eq!(health.id.as_deref(), Some("test"));
    let status = health
        .data
        .as_ref()
        .and_then(|data| data.get("status"))
        .and_then(|value| value.as_str());
    assert_eq!(status, Some("ok"));

    let missing = send_request(&workspace.socket(), Method::Crash, None);
    assert!(!missing.ok);
    assert_eq!(error_code(&missing), Some("invalid_params"));

    let bad_id = send_request(
        &workspace.socket(),
        Method::NotificationClosed,
        Some(serde_json::json!({ "notification_id": 0 })),
    );
    assert_eq!(error_code(&bad_id), Some("invalid_notification_id"));

    let invalid = send_raw(&workspace.socket(), b"{not json}\n");
    assert_eq!(error_code(&invalid), Some("invalid_json"));

    let empty = send_raw(&workspace.socket(), b"  \n");
    assert_eq!(error_code(&empty), Some("empty_request"));

    let mismatch = send_raw(
        &workspace.socket(),
        b"{\"protocol_version\":99,\"method\":\"get_health\"}\n",
    );
    assert_eq!(error_code(&mismatch), Some("protocol_mismatch"));
}

#[test]
fn applet_auto_reports_crash_and_notifies() {
    let workspace = Workspace::new();
    let mut child = workspace.spawn();
    let lines = stdout_lines(&mut child);
    let _guard = AppletGuard { child };
    wait_for_socket(&workspace.socket(), Duration::from_secs(5));

    let dir = workspace.problem_dir("ccpp-1");
    let response = send_request(
        &workspace.socket(),
        Method::Crash,
        Some(serde_json::json!({
            "component_name": "gedit",
            "directory_path": dir.to_string_lossy(),
        })),
    );
    assert!(response.ok, "crash was not accepted: {:?}", response.error);

    let line = lines
        .recv_timeout(Duration::from_secs(10))
        .expect("no notification emitted");
    let record: NotifierOutput = serde_json::from_str(&line).expect("notifier record");
    match record {
        NotifierOutput::Show {
            notification_id,
            summary,
            body,
            problem_dir,
            ..
        } => {
            assert_eq!(notification_id, 1);
            assert_eq!(summary, "Oops!");
            assert_eq!(
                body,
                "We're sorry, it looks like Text Editor crashed. The problem has been automatically reported."
            );
            assert_eq!(problem_dir, dir.to_string_lossy());
        }
        other => panic!("unexpected record: {:?}", other),
    }
}

#[test]
fn applet_refreshes_seen_list_on_sigterm() {
    let workspace = Workspace::new();
    let child = workspace.spawn();
    let mut guard = AppletGuard { child };
    wait_for_socket(&workspace.socket(), Duration::from_secs(5));

    let dir = workspace.problem_dir("ccpp-late");
    // SAFETY: plain kill(2) on our own child.
    let rc = unsafe { libc::kill(guard.child.id() as libc::pid_t, libc::SIGTERM) };
    assert_eq!(rc, 0);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(status) = guard.child.try_wait().expect("try_wait") {
            assert!(status.success(), "applet exited with {:?}", status);
            break;
        }
        assert!(Instant::now() < deadline, "applet did not exit on SIGTERM");
        sleep(Duration::from_millis(25));
    }

    let seen = std::fs::read_to_string(workspace.cache_dir().join("applet_dirlist"))
        .expect("seen list");
    assert_eq!(seen, format!("{}\n", dir.display()));
}
