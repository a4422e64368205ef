//! Nutrient Ledger
//!
//! Stock bookkeeping for greenhouse consumables: one container per greenhouse
//! tracking pH Up, pH Down and two nutrient solutions, with dispensing,
//! purchases and an append-only audit trail. Every stock change is checked
//! against a locked read and committed together with its audit entry;
//! notifications go out after commit.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod directory;
pub mod entities;
pub mod errors;
pub mod migrator;
pub mod models;
pub mod notifications;
pub mod services;

use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

pub use directory::{Actor, GreenhouseDirectory, Plant, StaticDirectory};
pub use errors::ServiceError;
pub use models::{ChangeKind, ResourceKind, SubjectKind};
pub use notifications::{ChangeNotification, ChangeNotifier, Channel, NotifyResult};
pub use services::factory::{ServiceContainer, ServiceFactory};
pub use services::DeletionReceipt;

/// The wired-up ledger. Owns the pool; every service shares it.
#[derive(Clone)]
pub struct Ledger {
    db: Arc<DatabaseConnection>,
    notifier: ChangeNotifier,
    services: ServiceContainer,
}

impl Ledger {
    pub fn new(
        db: Arc<DatabaseConnection>,
        directory: Arc<dyn GreenhouseDirectory>,
        notifier: ChangeNotifier,
        lock_timeout: Duration,
    ) -> Self {
        let factory = ServiceFactory::new(db.clone(), directory, notifier.clone(), lock_timeout);
        Self {
            db,
            notifier,
            services: ServiceContainer::new(&factory),
        }
    }

    /// Connects, migrates when configured to, and wires the services.
    pub async fn from_config(
        cfg: &config::LedgerConfig,
        directory: Arc<dyn GreenhouseDirectory>,
    ) -> Result<Self, ServiceError> {
        let db = Arc::new(db::connect(cfg).await?);
        let notifier =
            ChangeNotifier::from_backend(cfg.notify_backend, cfg.notify_buffer, db.clone());
        info!(
            environment = %cfg.environment,
            lock_timeout_ms = cfg.lock_timeout_ms,
            notify_backend = ?cfg.notify_backend,
            "Ledger initialized"
        );
        Ok(Self::new(db, directory, notifier, cfg.lock_timeout()))
    }

    pub fn containers(&self) -> &services::containers::ContainerStore {
        &self.services.containers
    }

    pub fn stock(&self) -> &services::stock_ledger::StockLedger {
        &self.services.stock
    }

    pub fn dispensing(&self) -> &services::dispensing::DispensingCoordinator {
        &self.services.dispensing
    }

    pub fn purchases(&self) -> &services::purchases::PurchaseRecorder {
        &self.services.purchases
    }

    pub fn audit(&self) -> &services::audit_log::AuditTrail {
        &self.services.audit
    }

    pub fn db(&self) -> &Arc<DatabaseConnection> {
        &self.db
    }

    /// In-process notification stream, when the broadcast backend is in use.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<ChangeNotification>> {
        self.notifier.subscribe()
    }
}
