//! Queued writes survive a process restart

use assert_fs::TempDir;
use ledger_common::{DeliveryLog, DeliveryLogs};
use ledger_sync::{
    BackoffPolicy, ConnectivityMonitor, DataStore, DocumentPath, DrainPhase, LocalStore,
    MemoryRemote, Operation, SyncConfig, SyncStatus,
};
use ledger_test_helpers::prelude::suppress_logs;
use std::sync::Arc;
use std::time::Duration;

fn config() -> SyncConfig {
    SyncConfig {
        backoff: BackoffPolicy::default().without_jitter(),
        ..Default::default()
    }
}

fn log(id: &str, tip_cents: i64) -> DeliveryLog {
    DeliveryLog {
        id: id.to_string(),
        date: chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        platform: "doordash".to_string(),
        stops: 4,
        miles: 12.5,
        base_pay_cents: 2_000,
        tip_cents,
        notes: None,
    }
}

#[tokio::test(start_paused = true)]
async fn pending_writes_resume_after_restart() {
    suppress_logs();
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("ledger.db");

    // First session: offline the whole time
    {
        let store = LocalStore::open(&db).unwrap();
        let data = DataStore::open(
            config(),
            "driver-7",
            &store,
            Arc::new(MemoryRemote::new()),
            ConnectivityMonitor::new(false),
        )
        .unwrap();

        let logs = data.collection::<DeliveryLogs>();
        logs.update_data(vec![log("d1", 300)]).unwrap();
        logs.update_data(vec![log("d1", 300), log("d2", 450)]).unwrap();
        data.shutdown();
    }

    // Second session: cache is readable before anything syncs
    let remote = Arc::new(MemoryRemote::new());
    let store = LocalStore::open(&db).unwrap();
    let connectivity = ConnectivityMonitor::new(false);
    let data = DataStore::open(config(), "driver-7", &store, remote.clone(), connectivity.clone())
        .unwrap();

    let entries = data.engine().pending_entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].operation, Operation::Create);
    assert_eq!(entries[1].operation, Operation::Update);

    let logs = data.collection::<DeliveryLogs>();
    let view = logs.snapshot();
    assert_eq!(view.data.as_ref().map(Vec::len), Some(2));
    assert!(!view.loading);
    assert_eq!(view.sync_status, SyncStatus::Offline);

    connectivity.set_online(true);
    tokio::time::timeout(Duration::from_secs(30), async {
        while data.engine().pending_count("deliveryLogs").unwrap() > 0
            || data.engine().phase("deliveryLogs") != DrainPhase::Idle
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let pushed = remote
        .document(&DocumentPath::for_collection("driver-7", "deliveryLogs"))
        .unwrap();
    assert_eq!(pushed.as_array().map(Vec::len), Some(2));
    assert_eq!(pushed[1]["tipCents"], 450);
    assert_eq!(remote.writes().len(), 2);
}

#[tokio::test]
async fn queue_is_scoped_per_user() {
    suppress_logs();
    let temp = TempDir::new().unwrap();
    let store = LocalStore::open(&temp.path().join("ledger.db")).unwrap();

    let first = DataStore::open(
        config(),
        "driver-a",
        &store,
        Arc::new(MemoryRemote::new()),
        ConnectivityMonitor::new(false),
    )
    .unwrap();
    first
        .collection_by_name("settings")
        .update_data(serde_json::json!({"currency": "USD"}))
        .unwrap();

    let second = DataStore::open(
        config(),
        "driver-b",
        &store,
        Arc::new(MemoryRemote::new()),
        ConnectivityMonitor::new(false),
    )
    .unwrap();
    assert!(second.engine().pending_entries().unwrap().is_empty());
    assert!(second.collection_by_name("settings").data().is_none());

    second.logout().await.unwrap();
    assert_eq!(first.engine().pending_entries().unwrap().len(), 1);
}
