//! End-to-end reconciliation scenarios
//!
//! Each test runs assessment passes by hand against a mount table on disk,
//! the way the waiter thread would after mount-table events.

use std::sync::Arc;

use shadowd::registry::MigrationRegistry;
use shadowd::stats::{MessageKind, StatPublisher, NO_MIGRATIONS};
use shadowd::supervisor::MAX_REMOUNT_TRIES;

use super::helpers::*;

#[test]
fn test_empty_table_publishes_sentinel() {
    let t = TestSupervisor::new("");
    t.supervisor.assess_now();
    assert_eq!(t.registry.count(), 0);

    let transport = Arc::new(RecordingTransport::default());
    let listener = t.status_dir().join("shadowstat.4242");
    transport.add_listener(&listener, FakeListener::default());

    let publisher = StatPublisher::new(Arc::clone(&t.supervisor), transport.clone());
    let report = publisher.publish_once().expect("publisher should run");
    assert_eq!(report.delivered, 1);

    let sent = transport.sent_to(&listener);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, MessageKind::Final);
    assert_eq!(sent[0].payload, format!("^{NO_MIGRATIONS}^ 0 0 0 0 Y\n"));
}

#[test]
fn test_reachable_standby_promoted_directly() {
    let t = TestSupervisor::new(STANDBY_DS1);
    t.remounter.set_reachable(true);

    t.supervisor.assess_now();

    assert_eq!(t.tracked(), vec!["tank/ds1".to_string()]);
    assert!(t.supervisor.pending_remounts().is_empty());
    assert_eq!(t.remounter.calls(), 1);
}

#[test]
fn test_unreachable_standby_promoted_on_later_pass() {
    let t = TestSupervisor::new(STANDBY_DS1);

    t.supervisor.assess_now();
    let pending = t.supervisor.pending_remounts();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].dataset, "tank/ds1");
    assert_eq!(pending[0].tries, 1);
    assert!(t.tracked().is_empty());

    t.remounter.set_reachable(true);
    t.supervisor.assess_now();
    assert!(t.supervisor.pending_remounts().is_empty());

    // The successful remount rewrote the table; its event drives this pass.
    t.supervisor.assess_now();
    assert_eq!(t.tracked(), vec!["tank/ds1".to_string()]);
}

#[test]
fn test_unreachable_standby_abandoned_after_ceiling() {
    let t = TestSupervisor::new(STANDBY_DS1);
    t.supervisor.assess_now();

    let mut passes = 0;
    while !t.supervisor.pending_remounts().is_empty() {
        t.supervisor.assess_now();
        passes += 1;
        assert!(passes < 100, "retry queue never drained");
    }

    assert_eq!(passes, MAX_REMOUNT_TRIES - 1);
    assert_eq!(t.remounter.calls(), MAX_REMOUNT_TRIES as usize);
    assert!(t.tracked().is_empty());
}

#[test]
fn test_standby_vanishing_during_retry_is_dropped() {
    let t = TestSupervisor::new(STANDBY_DS1);
    t.supervisor.assess_now();
    assert_eq!(t.supervisor.pending_remounts().len(), 1);

    t.remounter.set_missing("tank/ds1");
    t.supervisor.assess_now();
    assert!(t.supervisor.pending_remounts().is_empty());
    assert!(t.tracked().is_empty());
}

#[test]
fn test_migrating_dataset_removed_when_unmounted() {
    let t = TestSupervisor::new(&format!(
        "{ACTIVE_DS1}tank/ds2 /tank/ds2 nfs rw,shadow=nfs://src/export 0 0\n"
    ));
    t.supervisor.assess_now();
    assert_eq!(
        t.tracked(),
        vec!["tank/ds1".to_string(), "tank/ds2".to_string()]
    );

    t.write_table("tank/ds2 /tank/ds2 nfs rw,shadow=nfs://src/export 0 0\n");
    t.supervisor.assess_now();
    assert_eq!(t.tracked(), vec!["tank/ds2".to_string()]);
}

#[test]
fn test_published_rows_follow_registry() {
    let t = TestSupervisor::new(ACTIVE_DS1);
    t.supervisor.assess_now();
    t.registry.record_progress("tank/ds1", 4096, 1024, 2);

    let transport = Arc::new(RecordingTransport::default());
    let listener = t.status_dir().join("shadowstat.1");
    transport.add_listener(&listener, FakeListener::default());

    let publisher = StatPublisher::new(Arc::clone(&t.supervisor), transport.clone());
    publisher.publish_once().expect("publisher should run");

    let sent = transport.sent_to(&listener);
    assert_eq!(sent.len(), 1);
    let rows = shadowd::stats::parse_batch(&sent[0].payload).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].dataset, "tank/ds1");
    assert_eq!(rows[0].xferred, 4096);
    assert_eq!(rows[0].remaining, 1024);
    assert_eq!(rows[0].errors, 2);
    assert!(!rows[0].complete);
    assert_eq!(t.registry.status_all().unwrap().len(), 1);
}
