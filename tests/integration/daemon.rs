//! Full daemon lifecycle: real mount-table watcher, all three workers,
//! shutdown and join.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use shadowd::stats::MessageKind;
use shadowd::supervisor::{MountTableWatcher, RunningDaemon};

use super::helpers::*;

fn append_line(t: &TestSupervisor, line: &str) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(&t.mount_table)
        .expect("Failed to open mount table");
    file.write_all(line.as_bytes())
        .expect("Failed to append to mount table");
}

#[test]
fn test_daemon_follows_mount_table() {
    let t = TestSupervisor::new("");
    let transport = Arc::new(RecordingTransport::default());
    let listener = t.status_dir().join("shadowstat.1");
    transport.add_listener(&listener, FakeListener::default());

    let watcher = MountTableWatcher::new(&t.mount_table).expect("Failed to watch mount table");
    let daemon = RunningDaemon::spawn(Arc::clone(&t.supervisor), Box::new(watcher), transport.clone())
        .expect("Failed to spawn daemon");

    wait_until("first pass", || t.supervisor.first_pass_done());
    wait_until("first publish", || !transport.sent_to(&listener).is_empty());
    assert_eq!(transport.sent_to(&listener)[0].kind, MessageKind::Final);

    append_line(&t, ACTIVE_DS1);
    wait_until("migration start", || t.registry.contains("tank/ds1"));

    t.write_table("");
    wait_until("migration removal", || !t.registry.contains("tank/ds1"));

    daemon.shutdown();
    daemon.join();
    assert!(t.registry.is_stopped());
}

#[test]
fn test_daemon_retries_standby_after_mount_event() {
    let t = TestSupervisor::new(STANDBY_DS1);
    let transport = Arc::new(RecordingTransport::default());

    let watcher = MountTableWatcher::new(&t.mount_table).expect("Failed to watch mount table");
    let daemon = RunningDaemon::spawn(Arc::clone(&t.supervisor), Box::new(watcher), transport)
        .expect("Failed to spawn daemon");

    wait_until("first pass", || t.supervisor.first_pass_done());
    assert_eq!(t.supervisor.pending_remounts().len(), 1);

    // Source comes back; an unrelated mount event triggers the retry, and
    // the promotion itself rewrites the table.
    t.remounter.set_reachable(true);
    append_line(&t, "tmpfs /scratch tmpfs rw 0 0\n");

    wait_until("promoted migration", || t.registry.contains("tank/ds1"));
    assert!(t.supervisor.pending_remounts().is_empty());

    daemon.shutdown();
    daemon.join();
}

#[test]
fn test_refresh_keeps_daemon_running() {
    let t = TestSupervisor::new(ACTIVE_DS1);
    let transport = Arc::new(RecordingTransport::default());

    let watcher = MountTableWatcher::new(&t.mount_table).expect("Failed to watch mount table");
    let daemon = RunningDaemon::spawn(Arc::clone(&t.supervisor), Box::new(watcher), transport)
        .expect("Failed to spawn daemon");
    wait_until("first pass", || t.supervisor.first_pass_done());

    daemon.refresh().expect("refresh should succeed");
    assert!(!t.supervisor.exit_requested());

    daemon.shutdown();
    daemon.join();
    assert!(t.supervisor.exit_requested());
}
