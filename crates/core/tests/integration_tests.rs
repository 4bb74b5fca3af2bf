// ═══════════════════════════════════════════════════════════════════
// Integration Tests: PocketLog facade end to end, configuration,
// HTTP transport classification
// ═══════════════════════════════════════════════════════════════════

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use common::*;
use pocketlog_core::clock::{Clock, SystemClock};
use pocketlog_core::config::CoreConfig;
use pocketlog_core::errors::CoreError;
use pocketlog_core::models::category::Category;
use pocketlog_core::models::period::Period;
use pocketlog_core::models::sync::{DrainReport, PendingSyncOperation, SyncEvent, SyncPayload};
use pocketlog_core::remote::{HttpRemoteApi, RemoteApi, RemoteOutcome};
use pocketlog_core::services::{CacheTtls, ConnectivityKind, RemoteStatus};
use pocketlog_core::PocketLog;

fn build(remote: Arc<ScriptedRemote>) -> PocketLog {
    PocketLog::with_store(CoreConfig::default(), memory_store(), remote, manual_clock()).unwrap()
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
// Offline-first round trip
// ═══════════════════════════════════════════════════════════════════

mod offline_first {
    use super::*;

    #[tokio::test]
    async fn offline_writes_sync_once_connectivity_returns() {
        let remote = Arc::new(ScriptedRemote::offline());
        let app = build(remote.clone());
        let mut events = app.subscribe_events();
        app.start();
        assert!(!app.connectivity().is_online());

        let receipt = app
            .commands()
            .add_transaction(txn("t1", "25", Category::Dining, reference_now()))
            .await
            .unwrap();
        assert_eq!(receipt.remote, RemoteStatus::Queued);
        let entry = app
            .commands()
            .add_calorie_entry(meal("c1", "burrito", 650, reference_now()))
            .await
            .unwrap();
        assert_eq!(entry.remote, RemoteStatus::Queued);

        // Readable immediately.
        let local = app.queries().get_transaction("t1").unwrap().unwrap();
        assert_eq!(local.amount, dec("25"));
        assert_eq!(local.category, Category::Dining);
        assert_eq!(app.pending_operations().unwrap().len(), 2);

        remote.set_fallback(RemoteOutcome::success());
        app.connectivity().report(&[ConnectivityKind::Wifi]);
        let report = next_report(&mut events).await.unwrap();

        assert_eq!(report.replayed, 2);
        assert!(app.pending_operations().unwrap().is_empty());
        assert!(app.queries().get_calorie_entry("c1").unwrap().unwrap().synced);
        app.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_without_stop_ends_background_sync() {
        let remote = Arc::new(ScriptedRemote::succeeding());
        let app = build(remote.clone());
        let store = Arc::clone(app.store());
        let connectivity = Arc::clone(app.connectivity());
        let drainer = Arc::clone(app.drainer());
        app.start();
        connectivity.set_online(true);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        drop(app);
        assert!(!drainer.is_running());

        let late = txn("late", "4", Category::Other, reference_now());
        store
            .enqueue(&PendingSyncOperation::new(
                SyncPayload::CreateTransaction(late),
                reference_now(),
            ))
            .unwrap();
        connectivity.set_online(false);
        connectivity.set_online(true);
        tokio::time::advance(Duration::from_secs(16 * 60)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(remote.call_count(), 0);
        assert_eq!(store.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn aggregates_reflect_writes_without_forcing_refresh() {
        let app = build(Arc::new(ScriptedRemote::succeeding()));
        app.commands()
            .add_transaction(txn("a", "40", Category::Groceries, reference_now()))
            .await
            .unwrap();
        let before = app.queries().get_category_totals(Period::Month, false).unwrap();
        assert_eq!(before.grand_total(), dec("40"));

        app.commands().delete_transaction("a").await.unwrap();
        let after = app.queries().get_category_totals(Period::Month, false).unwrap();
        assert!(after.totals.is_empty());
    }

    #[tokio::test]
    async fn parked_operations_can_be_reenabled_or_discarded() {
        let remote = Arc::new(ScriptedRemote::offline());
        let app = build(remote.clone());
        app.commands()
            .add_transaction(txn("a", "1", Category::Other, reference_now()))
            .await
            .unwrap();
        app.commands()
            .add_transaction(txn("b", "2", Category::Other, reference_now()))
            .await
            .unwrap();
        for _ in 0..3 {
            app.sync_now().await.unwrap();
        }
        let parked = app.parked_operations().unwrap();
        assert_eq!(parked.len(), 2);

        app.discard_operation(&parked[1].id).unwrap();
        app.reenable_operation(&parked[0].id).unwrap();
        remote.set_fallback(RemoteOutcome::success());
        let report = app.sync_now().await.unwrap();
        assert_eq!(report.replayed, 1);
        assert!(app.pending_operations().unwrap().is_empty());

        assert!(matches!(
            app.discard_operation("missing"),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn rejected_command_is_visible_to_subscribers() {
        let app = build(Arc::new(ScriptedRemote::rejecting(400)));
        let mut events = app.subscribe_events();
        app.commands()
            .add_calorie_entry(meal("c1", "???", 10, reference_now()))
            .await
            .unwrap();
        match events.try_recv().unwrap() {
            SyncEvent::Rejected { operation, .. } => {
                assert_eq!(operation.entity_id, "c1");
                assert!(operation.op_id.is_none());
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(app.pending_operations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn on_disk_queue_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig {
            database_path: Some(dir.path().join("db").join("pocketlog.sqlite3")),
            ..CoreConfig::default()
        };
        {
            let app = PocketLog::open(
                config.clone(),
                Arc::new(ScriptedRemote::offline()),
                manual_clock(),
            )
            .unwrap();
            app.commands()
                .add_transaction(txn("t1", "5", Category::Transport, reference_now()))
                .await
                .unwrap();
        }

        let remote = Arc::new(ScriptedRemote::succeeding());
        let app = PocketLog::open(config, remote.clone(), manual_clock()).unwrap();
        assert_eq!(app.pending_operations().unwrap().len(), 1);
        app.sync_now().await.unwrap();
        assert_eq!(remote.calls(), vec!["create transaction t1"]);
        assert!(app.pending_operations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_caches_keeps_data() {
        let app = build(Arc::new(ScriptedRemote::succeeding()));
        app.commands()
            .add_transaction(txn("a", "3", Category::Dining, reference_now()))
            .await
            .unwrap();
        app.queries().get_category_totals(Period::Month, false).unwrap();
        app.clear_caches().unwrap();
        assert!(app.store().get_cached_category_totals(Period::Month).unwrap().is_none());
        assert!(app.queries().get_transaction("a").unwrap().is_some());
    }
}

// ═══════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════

mod config {
    use super::*;

    #[test]
    fn defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.drain_interval(), Duration::from_secs(15 * 60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, CoreConfig::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("config.json");
        let config = CoreConfig {
            max_attempts: 5,
            api_base_url: Some("https://api.example.test".into()),
            ..CoreConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(CoreConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"remote_timeout_secs": 10}"#).unwrap();
        let config = CoreConfig::load(&path).unwrap();
        assert_eq!(config.remote_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_attempts": 0}"#).unwrap();
        assert!(matches!(CoreConfig::load(&path), Err(CoreError::Config(_))));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(CoreConfig::load(&path), Err(CoreError::Config(_))));

        let zero_interval = CoreConfig {
            drain_interval_secs: 0,
            ..CoreConfig::default()
        };
        let result = PocketLog::with_store(
            zero_interval,
            memory_store(),
            Arc::new(ScriptedRemote::succeeding()),
            Arc::new(SystemClock),
        );
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn out_of_range_durations_are_rejected() {
        let huge_ttl = CoreConfig {
            category_totals_ttl_secs: 100_000_000_000_000_000,
            ..CoreConfig::default()
        };
        assert!(matches!(huge_ttl.validate(), Err(CoreError::Config(_))));
        // Converting an unvalidated value saturates instead of panicking.
        let ttls = CacheTtls::from_config(&huge_ttl);
        assert_eq!(ttls.category_totals, chrono::Duration::MAX);
        let result = PocketLog::with_store(
            huge_ttl,
            memory_store(),
            Arc::new(ScriptedRemote::succeeding()),
            manual_clock(),
        );
        assert!(matches!(result, Err(CoreError::Config(_))));

        let huge_interval = CoreConfig {
            drain_interval_secs: u64::MAX,
            ..CoreConfig::default()
        };
        assert!(matches!(huge_interval.validate(), Err(CoreError::Config(_))));

        let limit = CoreConfig {
            analysis_ttl_secs: pocketlog_core::config::MAX_DURATION_SECS,
            ..CoreConfig::default()
        };
        assert!(limit.validate().is_ok());
    }

    #[test]
    fn explicit_database_path_wins() {
        let config = CoreConfig {
            database_path: Some("/tmp/custom.sqlite3".into()),
            ..CoreConfig::default()
        };
        assert_eq!(
            config.resolved_database_path().unwrap(),
            std::path::PathBuf::from("/tmp/custom.sqlite3")
        );
    }

    #[test]
    fn tracing_can_be_initialised_twice() {
        pocketlog_core::telemetry::init_tracing("pocketlog_core=debug");
        pocketlog_core::telemetry::init_tracing("pocketlog_core=info");
    }

    #[test]
    fn system_clock_moves_forward() {
        let a = SystemClock.now();
        let b = SystemClock.now();
        assert!(b >= a);
    }
}

// ═══════════════════════════════════════════════════════════════════
// HTTP transport
// ═══════════════════════════════════════════════════════════════════

mod http {
    use super::*;

    #[test]
    fn base_url_is_required() {
        let err = HttpRemoteApi::from_config(&CoreConfig::default()).err().unwrap();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[tokio::test]
    async fn unreachable_service_is_retryable() {
        let api = HttpRemoteApi::new("http://127.0.0.1:1/", Duration::from_secs(2))
            .unwrap()
            .with_token("secret");
        let outcome = api
            .create_transaction(&txn("t1", "1", Category::Other, reference_now()))
            .await;
        assert!(matches!(outcome, RemoteOutcome::Retryable(_)));
    }
}
