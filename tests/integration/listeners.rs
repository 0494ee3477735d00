//! Listener fan-out and dead-listener eviction

use serial_test::serial;
use std::sync::Arc;

use shadowd::registry::MigrationRegistry;
use shadowd::stats::{QueueStats, StatPublisher, StatusListener, SysvTransport};

use super::helpers::*;

#[test]
fn test_dead_listener_destroyed_and_skipped() {
    let t = TestSupervisor::new(ACTIVE_DS1);
    t.supervisor.assess_now();

    let transport = Arc::new(RecordingTransport::default());
    let live = t.status_dir().join("shadowstat.10");
    let dead = t.status_dir().join("shadowstat.20");
    transport.add_listener(&live, FakeListener::default());
    transport.add_listener(
        &dead,
        FakeListener {
            stats: QueueStats {
                depth: 40,
                last_send: 10_000,
                last_recv: 9_000,
            },
            fail_sends: false,
        },
    );

    let publisher = StatPublisher::new(Arc::clone(&t.supervisor), transport.clone());
    let report = publisher.publish_once().expect("publisher should run");

    assert_eq!(report.delivered, 1);
    assert_eq!(report.evicted, 1);
    assert_eq!(transport.sent_to(&live).len(), 1);
    assert!(transport.sent_to(&dead).is_empty());
    assert_eq!(transport.destroyed(), vec![dead]);
}

#[test]
fn test_full_queue_treated_as_dead_listener() {
    let t = TestSupervisor::new("");
    t.supervisor.assess_now();

    let transport = Arc::new(RecordingTransport::default());
    let stuck = t.status_dir().join("shadowstat.30");
    transport.add_listener(
        &stuck,
        FakeListener {
            fail_sends: true,
            ..FakeListener::default()
        },
    );

    let publisher = StatPublisher::new(Arc::clone(&t.supervisor), transport.clone());
    let report = publisher.publish_once().expect("publisher should run");

    assert_eq!(report.delivered, 0);
    assert_eq!(report.evicted, 1);
    assert_eq!(transport.destroyed(), vec![stuck]);
}

#[test]
fn test_files_without_prefix_are_not_listeners() {
    let t = TestSupervisor::new("");
    t.supervisor.assess_now();

    let transport = Arc::new(RecordingTransport::default());
    let other = t.status_dir().join("not-a-listener");
    transport.add_listener(&other, FakeListener::default());

    let publisher = StatPublisher::new(Arc::clone(&t.supervisor), transport.clone());
    let report = publisher.publish_once().expect("publisher should run");

    assert_eq!(report.delivered, 0);
    assert!(transport.sent_to(&other).is_empty());
}

/// Round trip through real System V message queues.
#[test]
#[serial]
fn test_sysv_listener_receives_batch() {
    let t = TestSupervisor::with_config(
        &format!("{ACTIVE_DS1}tank/ds2 /tank/ds2 zfs rw,shadow=active 0 0\n"),
        |config| config.message_size = 512,
    );
    t.supervisor.assess_now();
    for i in 0..40 {
        t.registry
            .start(
                &format!("tank/bulk/dataset-{i:03}"),
                std::path::Path::new("/tank/bulk"),
                "rw,shadow=active",
            )
            .unwrap();
    }

    let project_id = t.supervisor.config().ipc_project_id;
    let mut listener = match StatusListener::register(t.status_dir(), "shadowstat.", project_id)
    {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Skipping: System V message queues unavailable: {e}");
            return;
        }
    };

    let publisher = StatPublisher::new(
        Arc::clone(&t.supervisor),
        Arc::new(SysvTransport::new(project_id)),
    );
    let report = publisher.publish_once().expect("publisher should run");
    assert_eq!(report.delivered, 1);
    assert!(report.messages > 1);

    let batch = listener.receive_batch().expect("Failed to receive batch");
    assert_eq!(batch.len(), 42);
    assert_eq!(batch[0].dataset, "tank/bulk/dataset-000");
    assert!(batch.iter().any(|row| row.dataset == "tank/ds2"));
}

#[test]
#[serial]
fn test_sysv_listener_sees_sentinel_as_empty_batch() {
    let t = TestSupervisor::new("");
    t.supervisor.assess_now();

    let project_id = t.supervisor.config().ipc_project_id;
    let mut listener = match StatusListener::register(t.status_dir(), "shadowstat.", project_id)
    {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Skipping: System V message queues unavailable: {e}");
            return;
        }
    };

    let publisher = StatPublisher::new(
        Arc::clone(&t.supervisor),
        Arc::new(SysvTransport::new(project_id)),
    );
    publisher.publish_once().expect("publisher should run");

    assert!(listener.receive_batch().unwrap().is_empty());
}
