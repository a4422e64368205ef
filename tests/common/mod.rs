#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use nutrient_ledger::{
    db::{establish_connection_with_config, run_migrations, DbConfig},
    entities::inventory_container,
    services::containers::NewContainer,
    Actor, ChangeNotification, ChangeNotifier, Ledger, StaticDirectory,
};
use sea_orm::{DatabaseConnection, EntityTrait};
use tempfile::TempDir;
use tokio::sync::broadcast;

pub const GREENHOUSE: i32 = 8;
pub const OTHER_GREENHOUSE: i32 = 9;
/// Greenhouse the directory knows about but that has no container yet.
pub const EMPTY_GREENHOUSE: i32 = 10;

pub const LETTUCE: i32 = 3;
pub const BASIL: i32 = 4;
/// Planted in `OTHER_GREENHOUSE`.
pub const TOMATO: i32 = 5;

pub const GROWER: &str = "dana";
pub const GROWER_ID: i32 = 12;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// A ledger backed by a migrated SQLite database, in memory unless built
/// with [`TestLedger::file_backed`].
pub struct TestLedger {
    pub ledger: Ledger,
    pub db: Arc<DatabaseConnection>,
    pub directory: Arc<StaticDirectory>,
    pub notifications: broadcast::Receiver<ChangeNotification>,
    _scratch: Option<TempDir>,
}

pub fn directory() -> StaticDirectory {
    StaticDirectory::new()
        .with_greenhouse(EMPTY_GREENHOUSE)
        .with_plant(LETTUCE, "Butterhead Lettuce", GREENHOUSE)
        .with_plant(BASIL, "Genovese Basil", GREENHOUSE)
        .with_plant(TOMATO, "Cherry Tomato", OTHER_GREENHOUSE)
        .with_actor(GROWER, Actor::new(GROWER_ID, "Dana Reyes"))
}

pub async fn migrated_pool() -> Arc<DatabaseConnection> {
    let pool = establish_connection_with_config(&DbConfig::sqlite_memory())
        .await
        .expect("failed to open in-memory database");
    run_migrations(&pool).await.expect("failed to migrate");
    Arc::new(pool)
}

/// A migrated SQLite file in `dir` behind a pool of `max_connections`.
pub async fn migrated_file_pool(dir: &TempDir, max_connections: u32) -> Arc<DatabaseConnection> {
    let path = dir.path().join("ledger.db");
    let config = DbConfig {
        url: format!("sqlite://{}?mode=rwc", path.display()),
        max_connections,
        min_connections: 1,
        ..Default::default()
    };
    let pool = establish_connection_with_config(&config)
        .await
        .expect("failed to open database file");
    run_migrations(&pool).await.expect("failed to migrate");
    Arc::new(pool)
}

impl TestLedger {
    pub async fn new() -> Self {
        let notifier = ChangeNotifier::broadcast(256);
        Self::with_notifier(notifier).await
    }

    /// Same harness with a caller-supplied notifier. `notifications` is then
    /// a detached receiver that never yields anything.
    pub async fn with_notifier(notifier: ChangeNotifier) -> Self {
        Self::over(migrated_pool().await, notifier, None)
    }

    /// A ledger over a database file with several pooled connections, so
    /// transactions really contend for locks.
    pub async fn file_backed(max_connections: u32) -> Self {
        let scratch = TempDir::new().expect("failed to create scratch dir");
        let db = migrated_file_pool(&scratch, max_connections).await;
        Self::over(db, ChangeNotifier::broadcast(256), Some(scratch))
    }

    fn over(
        db: Arc<DatabaseConnection>,
        notifier: ChangeNotifier,
        scratch: Option<TempDir>,
    ) -> Self {
        let directory = Arc::new(directory());
        let notifications = notifier
            .subscribe()
            .unwrap_or_else(|| broadcast::channel(1).1);
        let ledger = Ledger::new(
            db.clone(),
            directory.clone(),
            notifier,
            DEFAULT_LOCK_TIMEOUT,
        );
        Self {
            ledger,
            db,
            directory,
            notifications,
            _scratch: scratch,
        }
    }

    /// Another ledger over the same database with a different lock timeout.
    pub fn sharing_with_lock_timeout(&self, lock_timeout: Duration) -> Ledger {
        Ledger::new(
            self.db.clone(),
            self.directory.clone(),
            ChangeNotifier::disabled(),
            lock_timeout,
        )
    }

    /// Creates the container of `GREENHOUSE` with every level at `level`.
    pub async fn seed_container(&self, level: i32) -> inventory_container::Model {
        self.ledger
            .containers()
            .create(
                NewContainer {
                    greenhouse_id: GREENHOUSE,
                    ph_up: level,
                    ph_down: level,
                    solution_a: level,
                    solution_b: level,
                    critical_level: Some(50),
                },
                GROWER,
            )
            .await
            .expect("failed to seed container")
    }

    pub async fn reload(&self, container_id: i32) -> inventory_container::Model {
        inventory_container::Entity::find_by_id(container_id)
            .one(&*self.db)
            .await
            .expect("query failed")
            .expect("container missing")
    }

    /// Everything published so far.
    pub fn drain_notifications(&mut self) -> Vec<ChangeNotification> {
        let mut received = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            received.push(notification);
        }
        received
    }
}
