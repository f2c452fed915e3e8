//! Integration tests for the terminal daemon.
//!
//! These tests start a real service and talk to it over the control socket
//! the way an operator or authentication backend would.

use std::io::{BufRead, BufReader, Write};
use std::net::Ipv4Addr;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nix::unistd::getuid;
use tempfile::TempDir;

use termd::config::Settings;
use termd::{MacAddr, TermService, TermTable};

const MAC: &str = "00:11:22:33:44:55";

/// Test service instance.
struct TestDaemon {
    service: TermService,
    socket_path: PathBuf,
    audit_path: PathBuf,
    _temp_dir: TempDir,
}

impl TestDaemon {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(configure: impl FnOnce(&mut Settings)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let socket_path = temp_dir.path().join("run/term.sock");
        let audit_path = temp_dir.path().join("log/audit.log");

        let mut settings = Settings::default();
        settings.control.path = socket_path.clone();
        settings.control.allowed_peer_uids = vec![getuid().as_raw()];
        settings.control.socket_timeout_seconds = 5;
        settings.logging.level = "warn".to_string();
        settings.audit.log_path = audit_path.clone();
        configure(&mut settings);

        let service = TermService::init(&settings)
            .await
            .expect("Failed to start service");

        // Wait for the listener task to start accepting
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            service,
            socket_path,
            audit_path,
            _temp_dir: temp_dir,
        }
    }

    fn table(&self) -> Arc<TermTable> {
        self.service.table()
    }

    fn connect(&self) -> ControlClient {
        let stream = UnixStream::connect(&self.socket_path).expect("Failed to connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .expect("Failed to set read timeout");
        let reader = BufReader::new(stream.try_clone().expect("Failed to clone stream"));
        ControlClient { stream, reader }
    }

    async fn stop(self) {
        self.service
            .shutdown(Duration::from_secs(5))
            .await
            .expect("Shutdown failed");
    }
}

struct ControlClient {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
}

impl ControlClient {
    /// Send one line and return the single-line reply.
    fn write(&mut self, line: &str) -> String {
        self.stream
            .write_all(format!("{}\n", line).as_bytes())
            .expect("Failed to write");
        let mut reply = String::new();
        self.reader.read_line(&mut reply).expect("Failed to read reply");
        reply
    }

    /// Request a dump and return its lines, without the terminating blank line.
    fn dump(&mut self) -> Vec<String> {
        self.stream.write_all(b"dump\n").expect("Failed to write");
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).expect("Failed to read dump");
            if n == 0 || line == "\n" {
                break;
            }
            lines.push(line.trim_end().to_string());
        }
        lines
    }
}

fn mac() -> MacAddr {
    MAC.parse().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_socket_created_with_permissions() {
    let daemon = TestDaemon::start().await;
    assert!(daemon.socket_path.exists(), "Socket file should exist");
    let mode = std::fs::metadata(&daemon.socket_path)
        .unwrap()
        .permissions()
        .mode();
    // Connecting needs write access, so every local user must have it.
    assert_eq!(mode & 0o777, 0o666);
    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_add_then_lookup_via_table() {
    let daemon = TestDaemon::start().await;
    let table = daemon.table();

    table.add(mac(), Ipv4Addr::new(10, 0, 0, 5)).unwrap();
    let view = table.lookup(&mac()).expect("terminal should be present");
    assert_eq!(view.ip, Ipv4Addr::new(10, 0, 0, 5));
    assert!(!view.authorized);

    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_authorize_and_deny_over_socket() {
    let daemon = TestDaemon::start().await;
    let table = daemon.table();
    table.add(mac(), Ipv4Addr::new(10, 0, 0, 5)).unwrap();

    let mut client = daemon.connect();
    assert_eq!(client.write("+00:11:22:33:44:55"), "OK 19\n");
    assert!(table.is_authenticated(&mac()));

    assert_eq!(client.write("-00:11:22:33:44:55"), "OK 19\n");
    assert!(!table.is_authenticated(&mac()));

    // Unknown terminals are silently ignored.
    assert_eq!(client.write("+AA:BB:CC:DD:EE:FF"), "OK 19\n");
    assert_eq!(table.len(), 1);

    drop(client);
    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dump_lists_terminals() {
    let daemon = TestDaemon::start().await;
    let table = daemon.table();
    table.add(mac(), Ipv4Addr::new(10, 0, 0, 5)).unwrap();
    table.record_traffic(&mac(), 1200, 340);
    table.mark(&mac(), true).unwrap();

    let mut client = daemon.connect();
    let lines = client.dump();
    assert_eq!(lines.len(), 2);

    let header: Vec<&str> = lines[0].split_whitespace().collect();
    assert_eq!(header, vec!["MAC", "IP", "Rx", "Tx", "Time", "Authed"]);

    let row: Vec<&str> = lines[1].split_whitespace().collect();
    assert_eq!(row[0], MAC);
    assert_eq!(row[1], "10.0.0.5");
    assert_eq!(row[2], "1200");
    assert_eq!(row[3], "340");
    assert_eq!(row[5], "1");

    drop(client);
    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clear_leaves_header_only() {
    let daemon = TestDaemon::start().await;
    let table = daemon.table();
    for i in 0..5u8 {
        table
            .add(MacAddr::new([0, 0x11, 0x22, 0x33, 0x44, i]), Ipv4Addr::new(10, 0, 0, i))
            .unwrap();
    }

    let mut client = daemon.connect();
    assert_eq!(client.write("clear"), "OK 6\n");
    assert_eq!(client.dump().len(), 1);
    assert_eq!(table.pending_timers(), 0);

    drop(client);
    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_input_is_not_an_error() {
    let daemon = TestDaemon::start().await;
    let table = daemon.table();
    table.add(mac(), Ipv4Addr::new(10, 0, 0, 5)).unwrap();

    let mut client = daemon.connect();
    let before = client.dump();
    assert_eq!(client.write("zzz"), "OK 4\n");
    assert_eq!(client.write("*00:11:22:33:44:55"), "OK 19\n");
    assert_eq!(client.dump(), before);

    // The connection stays usable.
    assert_eq!(client.write("+00:11:22:33:44:55"), "OK 19\n");
    assert!(table.is_authenticated(&mac()));

    drop(client);
    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unlisted_peer_can_only_dump() {
    let other_uid = getuid().as_raw().wrapping_add(1);
    let daemon = TestDaemon::start_with(|s| s.control.allowed_peer_uids = vec![other_uid]).await;
    let table = daemon.table();
    table.add(mac(), Ipv4Addr::new(10, 0, 0, 5)).unwrap();

    let mut client = daemon.connect();
    assert_eq!(client.write("+00:11:22:33:44:55"), "OK 19\n");
    assert!(!table.is_authenticated(&mac()));
    assert_eq!(client.write("clear"), "OK 6\n");
    assert_eq!(table.len(), 1);
    assert_eq!(client.dump().len(), 2);

    drop(client);
    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_changes_are_audited() {
    let daemon = TestDaemon::start().await;
    daemon.table().add(mac(), Ipv4Addr::new(10, 0, 0, 5)).unwrap();

    let mut client = daemon.connect();
    client.write("+00:11:22:33:44:55");
    client.write("clear");
    client.dump();

    let content = std::fs::read_to_string(&daemon.audit_path).expect("audit log should exist");
    let entries: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["command"], "authorize");
    assert_eq!(entries[0]["mac"], MAC);
    assert_eq!(entries[1]["command"], "clear");
    assert_eq!(entries[1]["result"]["dropped"], 1);

    drop(client);
    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_idle_terminal_expires() {
    let daemon = TestDaemon::start_with(|s| s.table.ttl_seconds = 1).await;
    let table = daemon.table();
    table.add(mac(), Ipv4Addr::new(10, 0, 0, 5)).unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(table.lookup(&mac()).is_none());

    let mut client = daemon.connect();
    assert_eq!(client.dump().len(), 1);

    drop(client);
    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_removes_socket_and_flushes() {
    let daemon = TestDaemon::start().await;
    let table = daemon.table();
    table.add(mac(), Ipv4Addr::new(10, 0, 0, 5)).unwrap();
    let socket_path = daemon.socket_path.clone();

    daemon.stop().await;
    assert!(!socket_path.exists());
    assert!(table.is_empty());
}
