use std::sync::Arc;
use std::time::Duration;

use crate::{
    db::DbPool,
    directory::GreenhouseDirectory,
    notifications::ChangeNotifier,
    services::{
        audit_log::AuditTrail, containers::ContainerStore, dispensing::DispensingCoordinator,
        purchases::PurchaseRecorder, stock_ledger::StockLedger,
    },
};

/// Factory for creating service instances with shared dependencies
#[derive(Clone)]
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    directory: Arc<dyn GreenhouseDirectory>,
    notifier: ChangeNotifier,
    lock_timeout: Duration,
}

impl ServiceFactory {
    pub fn new(
        db_pool: Arc<DbPool>,
        directory: Arc<dyn GreenhouseDirectory>,
        notifier: ChangeNotifier,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            db_pool,
            directory,
            notifier,
            lock_timeout,
        }
    }

    pub fn stock_ledger(&self) -> StockLedger {
        StockLedger::new(
            self.db_pool.clone(),
            self.notifier.clone(),
            self.lock_timeout,
        )
    }

    pub fn container_store(&self) -> ContainerStore {
        ContainerStore::new(self.directory.clone(), self.stock_ledger())
    }

    pub fn dispensing_coordinator(&self) -> DispensingCoordinator {
        DispensingCoordinator::new(self.directory.clone(), self.stock_ledger())
    }

    pub fn purchase_recorder(&self) -> PurchaseRecorder {
        PurchaseRecorder::new(
            self.directory.clone(),
            self.stock_ledger(),
            self.container_store(),
        )
    }

    pub fn audit_trail(&self) -> AuditTrail {
        AuditTrail::new(self.db_pool.clone())
    }

    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }
}

/// Service container holding all ledger services
#[derive(Clone)]
pub struct ServiceContainer {
    pub containers: ContainerStore,
    pub stock: StockLedger,
    pub dispensing: DispensingCoordinator,
    pub purchases: PurchaseRecorder,
    pub audit: AuditTrail,
}

impl ServiceContainer {
    pub fn new(factory: &ServiceFactory) -> Self {
        Self {
            containers: factory.container_store(),
            stock: factory.stock_ledger(),
            dispensing: factory.dispensing_coordinator(),
            purchases: factory.purchase_recorder(),
            audit: factory.audit_trail(),
        }
    }
}
