// ═══════════════════════════════════════════════════════════════════
// Sync Tests: SyncDrainer passes, retry cap, parking, per-entity
// ordering, trigger loop, concurrency guard
// ═══════════════════════════════════════════════════════════════════

mod common;

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use common::*;
use pocketlog_core::config::CoreConfig;
use pocketlog_core::errors::CoreError;
use pocketlog_core::models::category::Category;
use pocketlog_core::models::sync::{DrainReport, PendingSyncOperation, SyncEvent, SyncPayload};
use pocketlog_core::remote::RemoteOutcome;
use pocketlog_core::services::{ConnectivityMonitor, SyncDrainer};
use pocketlog_core::storage::LocalStore;

struct Harness {
    store: Arc<LocalStore>,
    remote: Arc<ScriptedRemote>,
    connectivity: Arc<ConnectivityMonitor>,
    drainer: Arc<SyncDrainer>,
    events: broadcast::Receiver<SyncEvent>,
}

fn test_config() -> CoreConfig {
    CoreConfig {
        drain_interval_secs: 60,
        remote_timeout_secs: 1,
        ..CoreConfig::default()
    }
}

fn harness(remote: ScriptedRemote, online: bool) -> Harness {
    let store = memory_store();
    let remote = Arc::new(remote);
    let connectivity = Arc::new(ConnectivityMonitor::new(online));
    let (tx, events) = broadcast::channel(64);
    let drainer = Arc::new(SyncDrainer::new(
        Arc::clone(&store),
        remote.clone(),
        Arc::clone(&connectivity),
        manual_clock(),
        &test_config(),
        tx,
    ));
    Harness {
        store,
        remote,
        connectivity,
        drainer,
        events,
    }
}

/// Queue a payload `seconds` after the reference instant.
fn queue(store: &LocalStore, payload: SyncPayload, seconds: i64) -> PendingSyncOperation {
    let op = PendingSyncOperation::new(payload, reference_now() + ChronoDuration::seconds(seconds));
    store.enqueue(&op).unwrap();
    op
}

fn create(id: &str) -> SyncPayload {
    SyncPayload::CreateTransaction(txn(id, "10", Category::Dining, reference_now()))
}

fn update(id: &str) -> SyncPayload {
    SyncPayload::UpdateTransaction(txn(id, "11", Category::Dining, reference_now()))
}

async fn next_report(events: &mut broadcast::Receiver<SyncEvent>) -> Option<DrainReport> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(SyncEvent::DrainFinished(report)) => return Some(report),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .ok()
        .flatten()
}

// ═══════════════════════════════════════════════════════════════════
// Single pass
// ═══════════════════════════════════════════════════════════════════

mod drain_pass {
    use super::*;

    #[tokio::test]
    async fn replays_in_fifo_order_and_empties_the_queue() {
        let h = harness(ScriptedRemote::succeeding(), true);
        queue(&h.store, create("b"), 2);
        queue(&h.store, create("a"), 1);
        queue(&h.store, SyncPayload::DeleteTransaction { id: "c".into() }, 3);

        let report = h.drainer.drain().await.unwrap();
        assert_eq!(report.replayed, 3);
        assert_eq!(
            h.remote.calls(),
            vec![
                "create transaction a",
                "create transaction b",
                "delete transaction c"
            ]
        );
        assert_eq!(h.store.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_queue_still_reports() {
        let mut h = harness(ScriptedRemote::succeeding(), true);
        let report = h.drainer.drain().await.unwrap();
        assert_eq!(report, DrainReport::default());
        assert_eq!(
            h.events.try_recv().unwrap(),
            SyncEvent::DrainFinished(DrainReport::default())
        );
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_pass() {
        let h = harness(ScriptedRemote::succeeding(), true);
        h.remote.push(RemoteOutcome::Retryable("503".into()));
        let failing = queue(&h.store, create("a"), 1);
        queue(&h.store, create("b"), 2);

        let report = h.drainer.drain().await.unwrap();
        assert_eq!((report.replayed, report.failed), (1, 1));

        let left = h.store.list_pending().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, failing.id);
        assert_eq!(left[0].attempt_count, 1);
        assert_eq!(left[0].last_attempt_at, Some(reference_now()));
    }

    #[tokio::test]
    async fn later_operations_of_a_failing_entity_wait() {
        let h = harness(ScriptedRemote::succeeding(), true);
        h.remote.push(RemoteOutcome::Retryable("timeout".into()));
        queue(&h.store, create("a"), 1);
        queue(&h.store, update("a"), 2);
        queue(&h.store, create("b"), 3);

        let report = h.drainer.drain().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(
            h.remote.calls(),
            vec!["create transaction a", "create transaction b"]
        );

        // Next pass sends them in order.
        let report = h.drainer.drain().await.unwrap();
        assert_eq!(report.replayed, 2);
        assert_eq!(
            &h.remote.calls()[2..],
            ["create transaction a", "update transaction a"]
        );
    }

    #[tokio::test]
    async fn terminal_rejection_drops_the_operation() {
        let mut h = harness(ScriptedRemote::succeeding(), true);
        h.remote.push(RemoteOutcome::Terminal {
            status: Some(400),
            message: "amount missing".into(),
        });
        queue(&h.store, create("bad"), 1);
        queue(&h.store, create("good"), 2);

        let report = h.drainer.drain().await.unwrap();
        assert_eq!((report.rejected, report.replayed), (1, 1));
        assert_eq!(h.store.pending_count().unwrap(), 0);

        let rejected = h.events.try_recv().unwrap();
        match &rejected {
            SyncEvent::Rejected { operation, status, .. } => {
                assert_eq!(operation.entity_id, "bad");
                assert_eq!(*status, Some(400));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn calorie_create_marks_entry_synced() {
        let h = harness(ScriptedRemote::succeeding(), true);
        let entry = meal("c1", "avocado", 240, reference_now());
        h.store.insert_calorie_entry(&entry).unwrap();
        queue(&h.store, SyncPayload::CreateCalorieEntry(entry), 1);
        h.remote.push(RemoteOutcome::Success {
            server_id: Some("srv-7".into()),
        });

        h.drainer.drain().await.unwrap();
        let stored = h.store.get_calorie_entry("c1").unwrap().unwrap();
        assert!(stored.synced);
        assert_eq!(stored.server_id.as_deref(), Some("srv-7"));
    }

    #[tokio::test]
    async fn entry_stays_unsynced_while_later_edits_are_queued() {
        let h = harness(ScriptedRemote::offline(), true);
        let entry = meal("c1", "avocado", 240, reference_now());
        h.store.insert_calorie_entry(&entry).unwrap();
        queue(&h.store, SyncPayload::CreateCalorieEntry(entry.clone()), 1);
        let mut edited = entry;
        edited.calories = 300;
        queue(&h.store, SyncPayload::UpdateCalorieEntry(edited), 2);
        h.remote.push(RemoteOutcome::success());

        h.drainer.drain().await.unwrap();
        assert!(!h.store.get_calorie_entry("c1").unwrap().unwrap().synced);
        assert_eq!(h.store.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn queued_update_is_sent_with_the_server_id_from_its_create() {
        let h = harness(ScriptedRemote::succeeding(), true);
        let entry = meal("uuid-1", "lentils", 310, reference_now());
        h.store.insert_calorie_entry(&entry).unwrap();
        queue(&h.store, SyncPayload::CreateCalorieEntry(entry.clone()), 1);
        let mut edited = entry;
        edited.calories = 340;
        queue(&h.store, SyncPayload::UpdateCalorieEntry(edited), 2);
        h.remote.push(RemoteOutcome::Success {
            server_id: Some("42".into()),
        });

        let report = h.drainer.drain().await.unwrap();
        assert_eq!(report.replayed, 2);
        assert_eq!(
            h.remote.calls(),
            vec!["create calorie_entry uuid-1", "update calorie_entry 42"]
        );
        let stored = h.store.get_calorie_entry("uuid-1").unwrap().unwrap();
        assert!(stored.synced);
        assert_eq!(stored.server_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn queued_calorie_delete_targets_the_server_id() {
        let h = harness(ScriptedRemote::succeeding(), true);
        queue(
            &h.store,
            SyncPayload::DeleteCalorieEntry {
                id: "uuid-1".into(),
                server_id: Some("42".into()),
            },
            1,
        );
        h.drainer.drain().await.unwrap();
        assert_eq!(h.remote.calls(), vec!["delete calorie_entry 42"]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_counts_as_a_failed_attempt() {
        let h = harness(
            ScriptedRemote::succeeding().with_delay(Duration::from_secs(600)),
            true,
        );
        queue(&h.store, create("slow"), 1);

        let report = h.drainer.drain().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(h.store.list_pending().unwrap()[0].attempt_count, 1);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Retry cap & parking
// ═══════════════════════════════════════════════════════════════════

mod parking {
    use super::*;

    #[tokio::test]
    async fn three_failed_passes_park_the_operation() {
        let mut h = harness(ScriptedRemote::offline(), true);
        let op = queue(&h.store, create("a"), 1);

        for _ in 0..3 {
            h.drainer.drain().await.unwrap();
        }
        let parked_event = loop {
            match h.events.try_recv().unwrap() {
                event @ SyncEvent::Parked { .. } => break event,
                _ => continue,
            }
        };
        match parked_event.to_error() {
            Some(CoreError::MaxAttemptsExceeded {
                operation_id,
                attempts,
            }) => {
                assert_eq!(operation_id, op.id);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected MaxAttemptsExceeded, got {other:?}"),
        }

        assert!(h.store.list_retryable(3).unwrap().is_empty());
        let all = h.store.list_pending().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].attempt_count, 3);

        // Parked operations are not retried automatically.
        let report = h.drainer.drain().await.unwrap();
        assert_eq!(report.attempted(), 0);
        assert_eq!(h.remote.call_count(), 3);
    }

    #[tokio::test]
    async fn parked_operation_blocks_its_entity_until_reenabled() {
        let h = harness(ScriptedRemote::offline(), true);
        let op = queue(&h.store, create("a"), 1);
        for _ in 0..3 {
            h.drainer.drain().await.unwrap();
        }

        queue(&h.store, update("a"), 2);
        h.remote.set_fallback(RemoteOutcome::success());
        let report = h.drainer.drain().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(h.remote.call_count(), 3);

        h.store.reenable(&op.id).unwrap();
        let report = h.drainer.drain().await.unwrap();
        assert_eq!(report.replayed, 2);
        assert_eq!(
            &h.remote.calls()[3..],
            ["create transaction a", "update transaction a"]
        );
    }
}

// ═══════════════════════════════════════════════════════════════════
// Concurrency guard & trigger loop
// ═══════════════════════════════════════════════════════════════════

mod triggers {
    use super::*;

    #[tokio::test]
    async fn overlapping_drains_run_one_pass() {
        let h = harness(
            ScriptedRemote::succeeding().with_delay(Duration::from_millis(20)),
            true,
        );
        queue(&h.store, create("a"), 1);

        let (first, second) = tokio::join!(h.drainer.drain(), h.drainer.drain());
        let passes = [first, second].iter().filter(|r| r.is_some()).count();
        assert_eq!(passes, 1);
        assert_eq!(h.remote.call_count(), 1);
        assert!(!h.drainer.is_draining());
    }

    #[tokio::test(start_paused = true)]
    async fn coming_online_triggers_a_drain() {
        let mut h = harness(ScriptedRemote::succeeding(), false);
        queue(&h.store, create("a"), 1);
        h.drainer.start();
        tokio::task::yield_now().await;
        assert_eq!(h.remote.call_count(), 0);

        h.connectivity.set_online(true);
        let report = next_report(&mut h.events).await.unwrap();
        assert_eq!(report.replayed, 1);
        h.drainer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timer_drains_only_while_online() {
        let mut h = harness(ScriptedRemote::succeeding(), true);
        h.drainer.start();
        // Startup pass.
        assert!(next_report(&mut h.events).await.is_some());

        queue(&h.store, create("a"), 1);
        tokio::time::advance(Duration::from_secs(61)).await;
        let report = next_report(&mut h.events).await.unwrap();
        assert_eq!(report.replayed, 1);

        h.connectivity.set_online(false);
        queue(&h.store, create("b"), 2);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(next_report(&mut h.events).await.is_none());
        assert_eq!(h.store.pending_count().unwrap(), 1);
        h.drainer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timer_and_transition_in_the_same_tick_drain_once() {
        let mut h = harness(ScriptedRemote::succeeding(), false);
        queue(&h.store, create("a"), 1);
        h.drainer.start();
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(59)).await;
        h.connectivity.set_online(true);
        tokio::time::advance(Duration::from_secs(1)).await;

        let report = next_report(&mut h.events).await.unwrap();
        assert_eq!(report.replayed, 1);
        assert!(next_report(&mut h.events).await.is_none());
        assert_eq!(h.remote.call_count(), 1);
        h.drainer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_during_a_failed_pass_triggers_another() {
        let mut h = harness(
            ScriptedRemote::succeeding().with_delay(Duration::from_millis(10)),
            true,
        );
        h.remote.push(RemoteOutcome::Retryable("connection reset".into()));
        queue(&h.store, create("a"), 1);
        h.drainer.start();
        while h.remote.call_count() == 0 {
            tokio::task::yield_now().await;
        }

        // The link drops and returns while the startup pass is still waiting on the remote.
        h.connectivity.set_online(false);
        h.connectivity.set_online(true);

        let first = next_report(&mut h.events).await.unwrap();
        assert_eq!(first.failed, 1);
        // Well before the 60s timer.
        let second = next_report(&mut h.events).await.unwrap();
        assert_eq!(second.replayed, 1);
        assert_eq!(h.store.pending_count().unwrap(), 0);
        h.drainer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_drainer_ends_its_loop() {
        let h = harness(ScriptedRemote::succeeding(), false);
        h.drainer.start();
        tokio::task::yield_now().await;
        let weak = Arc::downgrade(&h.drainer);
        let Harness {
            store,
            remote,
            connectivity,
            drainer,
            ..
        } = h;
        drop(drainer);
        assert!(weak.upgrade().is_none());

        queue(&store, create("a"), 1);
        connectivity.set_online(true);
        tokio::time::advance(Duration::from_secs(120)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(remote.call_count(), 0);
        assert_eq!(store.pending_count().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_timer_and_subscription() {
        let mut h = harness(ScriptedRemote::succeeding(), false);
        h.drainer.start();
        assert!(h.drainer.is_running());
        tokio::task::yield_now().await;

        h.drainer.stop().await;
        assert!(!h.drainer.is_running());

        queue(&h.store, create("a"), 1);
        h.connectivity.set_online(true);
        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(next_report(&mut h.events).await.is_none());
        assert_eq!(h.remote.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_is_a_no_op() {
        let mut h = harness(ScriptedRemote::succeeding(), true);
        h.drainer.start();
        h.drainer.start();
        assert!(next_report(&mut h.events).await.is_some());
        assert!(next_report(&mut h.events).await.is_none());
        h.drainer.stop().await;
    }
}
