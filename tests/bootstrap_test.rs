mod common;

use std::sync::Arc;

use common::*;
use nutrient_ledger::{
    config::{LedgerConfig, NotifyBackend},
    Ledger,
};

fn in_memory_config() -> LedgerConfig {
    let mut cfg = LedgerConfig::new("sqlite::memory:");
    cfg.auto_migrate = true;
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    cfg.db_idle_timeout_secs = 3600;
    cfg
}

#[tokio::test]
async fn ledger_from_config_migrates_and_wires_services() {
    let cfg = in_memory_config();
    let ledger = Ledger::from_config(&cfg, Arc::new(directory()))
        .await
        .expect("ledger should start");

    assert!(ledger.containers().list(None).await.unwrap().is_empty());
    assert_eq!(ledger.stock().lock_timeout(), cfg.lock_timeout());

    let mut notifications = ledger.subscribe().expect("broadcast backend");
    let container = ledger
        .containers()
        .get_or_create(GREENHOUSE, GROWER)
        .await
        .unwrap();
    let created = notifications.recv().await.unwrap();
    assert_eq!(created.subject_id, container.id);
}

#[tokio::test]
async fn disabled_backend_has_no_subscribers() {
    let mut cfg = in_memory_config();
    cfg.notify_backend = NotifyBackend::Disabled;
    let ledger = Ledger::from_config(&cfg, Arc::new(directory()))
        .await
        .unwrap();

    assert!(ledger.subscribe().is_none());
    ledger
        .containers()
        .get_or_create(GREENHOUSE, "auto")
        .await
        .expect("operations work without a notifier");
}
