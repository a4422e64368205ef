//! Stock mutation engine.
//!
//! All changes to container stock go through [`StockLedger::apply_delta_in`]:
//! lock the container row, read the current level, reject anything that
//! would leave it negative, write the new level and append the audit entry,
//! all inside the caller's transaction.

use metrics::{counter, histogram};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    DbBackend, DbErr, EntityName, EntityTrait, QueryFilter, QuerySelect, Statement,
    TransactionTrait,
};
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

use crate::directory::Actor;
use crate::entities::inventory_container;
use crate::errors::ServiceError;
use crate::models::{ChangeKind, ResourceKind, SubjectKind};
use crate::notifications::{ChangeNotification, ChangeNotifier, Channel};
use crate::services::audit_log::{self, AuditEntry, AuditRecord};

/// An open ledger transaction. Dropping it without [`commit`](Self::commit)
/// rolls everything back.
pub struct LedgerTransaction {
    txn: DatabaseTransaction,
    started: Instant,
    waited_ms: u64,
}

impl LedgerTransaction {
    pub async fn commit(self, operation: &'static str) -> Result<(), ServiceError> {
        let waited_ms = self.waited_ms;
        self.txn.commit().await.map_err(|e| {
            error!(operation, "Failed to commit transaction: {}", e);
            counter!("ledger.transaction.failed", 1, "operation" => operation);
            ServiceError::from_lock_wait(e, operation, waited_ms)
        })?;
        histogram!(
            "ledger.transaction.duration",
            self.started.elapsed(),
            "operation" => operation
        );
        Ok(())
    }
}

impl Deref for LedgerTransaction {
    type Target = DatabaseTransaction;

    fn deref(&self) -> &DatabaseTransaction {
        &self.txn
    }
}

/// A signed change to one consumable of one container.
#[derive(Debug, Clone)]
pub struct StockDelta {
    pub container_id: i32,
    pub kind: ResourceKind,
    pub delta: i32,
    pub actor: Actor,
    pub change_kind: ChangeKind,
    pub description: String,
}

/// Result of an applied delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub container_id: i32,
    pub greenhouse_id: i32,
    pub kind: ResourceKind,
    pub old_value: i32,
    pub new_value: i32,
    pub critical_level: i32,
    pub audit_entry: AuditEntry,
}

impl StockChange {
    pub fn delta(&self) -> i32 {
        self.new_value - self.old_value
    }

    /// Whether the new level is at or below the container's critical level.
    pub fn is_low(&self) -> bool {
        self.new_value <= self.critical_level
    }

    pub fn notification(&self, actor: &Actor) -> ChangeNotification {
        ChangeNotification::new(
            Channel::ContainerUpdated,
            self.audit_entry.change_kind,
            self.container_id,
            actor,
        )
        .with_change(
            self.kind.column_name(),
            Some(self.old_value),
            Some(self.new_value),
        )
        .with_field("greenhouse_id", self.greenhouse_id)
        .with_field("low_stock", self.is_low())
    }
}

/// Row locks exist on every supported backend except SQLite, which
/// serializes writers with its database lock instead.
fn supports_row_locks<C: ConnectionTrait>(conn: &C) -> bool {
    conn.get_database_backend() != DbBackend::Sqlite
}

/// A write that touches no rows. Running it first makes a deferred SQLite
/// transaction take the database write lock, as `BEGIN IMMEDIATE` would, so
/// concurrent writers queue on the busy handler instead of failing later.
fn sqlite_write_lock() -> Statement {
    Statement::from_string(
        DbBackend::Sqlite,
        format!(
            "UPDATE {table} SET id = id WHERE 0",
            table = inventory_container::Entity.table_name()
        ),
    )
}

#[derive(Clone)]
pub struct StockLedger {
    db: Arc<DatabaseConnection>,
    notifier: ChangeNotifier,
    lock_timeout: Duration,
}

impl StockLedger {
    pub fn new(db: Arc<DatabaseConnection>, notifier: ChangeNotifier, lock_timeout: Duration) -> Self {
        Self {
            db,
            notifier,
            lock_timeout,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    fn waited_ms(&self) -> u64 {
        self.lock_timeout.as_millis() as u64
    }

    /// Waits at most `lock_timeout` for `fut`, classifying expiry and lock
    /// errors as `LockTimeout`.
    async fn bounded<T, F>(&self, resource: String, fut: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, DbErr>>,
    {
        let waited_ms = self.waited_ms();
        let result = match tokio::time::timeout(self.lock_timeout, fut).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => ServiceError::from_lock_wait(e, resource, waited_ms),
            Err(_) => ServiceError::LockTimeout {
                resource,
                waited_ms,
            },
        };
        if let ServiceError::LockTimeout { resource, .. } = &result {
            warn!(resource = %resource, waited_ms, "Gave up waiting for lock");
            counter!("ledger.lock.timeouts", 1);
        }
        Err(result)
    }

    /// Opens a transaction whose lock waits are bounded by `lock_timeout`.
    pub async fn begin(&self) -> Result<LedgerTransaction, ServiceError> {
        let txn = self
            .bounded("transaction".to_string(), self.db.begin())
            .await?;

        match txn.get_database_backend() {
            DbBackend::Postgres => {
                let stmt = Statement::from_string(
                    DbBackend::Postgres,
                    format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis()),
                );
                txn.execute(stmt).await.map_err(|e| {
                    error!("Failed to set lock timeout: {}", e);
                    ServiceError::DatabaseError(e)
                })?;
            }
            DbBackend::Sqlite => {
                self.bounded(
                    "database write lock".to_string(),
                    txn.execute(sqlite_write_lock()),
                )
                .await?;
            }
            _ => {}
        }

        Ok(LedgerTransaction {
            txn,
            started: Instant::now(),
            waited_ms: self.waited_ms(),
        })
    }

    /// Reads a container under an exclusive row lock.
    pub async fn lock_container(
        &self,
        txn: &LedgerTransaction,
        container_id: i32,
    ) -> Result<inventory_container::Model, ServiceError> {
        let mut query = inventory_container::Entity::find_by_id(container_id);
        if supports_row_locks(&**txn) {
            query = query.lock_exclusive();
        }
        self.bounded(format!("container {}", container_id), query.one(&**txn))
            .await?
            .ok_or_else(|| ServiceError::container_not_found(container_id))
    }

    /// Reads the container of a greenhouse under an exclusive row lock.
    pub async fn lock_greenhouse_container(
        &self,
        txn: &LedgerTransaction,
        greenhouse_id: i32,
    ) -> Result<Option<inventory_container::Model>, ServiceError> {
        let mut query = inventory_container::Entity::find()
            .filter(inventory_container::Column::GreenhouseId.eq(greenhouse_id));
        if supports_row_locks(&**txn) {
            query = query.lock_exclusive();
        }
        self.bounded(
            format!("container of greenhouse {}", greenhouse_id),
            query.one(&**txn),
        )
        .await
    }

    /// Applies `change` inside `txn` and records it in the container log.
    /// Nothing is written when the delta would leave the level negative.
    #[instrument(skip(self, txn, change), fields(container_id = change.container_id, kind = %change.kind, delta = change.delta))]
    pub async fn apply_delta_in(
        &self,
        txn: &LedgerTransaction,
        change: StockDelta,
    ) -> Result<StockChange, ServiceError> {
        if change.delta == 0 {
            return Err(ServiceError::ValidationError(
                "Stock delta must be non-zero".to_string(),
            ));
        }

        let container = self.lock_container(txn, change.container_id).await?;
        let old_value = change.kind.level(&container);

        let new_value = old_value.checked_add(change.delta).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Applying {} to {} of container {} overflows",
                change.delta, change.kind, change.container_id
            ))
        })?;

        if new_value < 0 {
            warn!(
                container_id = change.container_id,
                kind = %change.kind,
                available = old_value,
                requested = -change.delta,
                "Insufficient stock"
            );
            counter!("ledger.stock.rejected", 1, "kind" => change.kind.to_string());
            return Err(ServiceError::InsufficientStock {
                container_id: change.container_id,
                kind: change.kind,
                available: old_value,
                requested: -change.delta,
            });
        }

        let greenhouse_id = container.greenhouse_id;
        let critical_level = container.critical_level;
        let mut active: inventory_container::ActiveModel = container.into();
        change.kind.set_level(&mut active, new_value);
        active.update(&**txn).await.map_err(|e| {
            error!(container_id = change.container_id, "Failed to update container: {}", e);
            ServiceError::from_lock_wait(
                e,
                format!("container {}", change.container_id),
                txn.waited_ms,
            )
        })?;

        let audit_entry = audit_log::append(
            txn,
            AuditRecord::new(
                SubjectKind::Container,
                change.container_id,
                change.actor.id,
                change.change_kind,
                change.description,
            )
            .with_values(change.kind.column_name(), old_value, new_value),
        )
        .await?;

        counter!(
            "ledger.stock.mutations",
            1,
            "kind" => change.kind.to_string(),
            "change" => change.change_kind.as_str()
        );

        Ok(StockChange {
            container_id: change.container_id,
            greenhouse_id,
            kind: change.kind,
            old_value,
            new_value,
            critical_level,
            audit_entry,
        })
    }

    /// Applies a delta in its own transaction, then publishes the change.
    pub async fn apply_delta(&self, change: StockDelta) -> Result<StockChange, ServiceError> {
        let actor = change.actor.clone();
        let txn = self.begin().await?;
        let applied = self.apply_delta_in(&txn, change).await?;
        txn.commit("apply_delta").await?;

        info!(
            container_id = applied.container_id,
            kind = %applied.kind,
            old_value = applied.old_value,
            new_value = applied.new_value,
            "Container stock updated"
        );
        self.announce(&applied, &actor).await;
        Ok(applied)
    }

    /// Post-commit bookkeeping for an applied change: low-stock warning and
    /// container notification.
    pub(crate) async fn announce(&self, applied: &StockChange, actor: &Actor) {
        if applied.delta() < 0 && applied.is_low() {
            warn!(
                container_id = applied.container_id,
                greenhouse_id = applied.greenhouse_id,
                kind = %applied.kind,
                level = applied.new_value,
                critical_level = applied.critical_level,
                "Stock at or below critical level"
            );
        }
        self.notifier.publish(applied.notification(actor)).await;
    }

    pub(crate) fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    pub(crate) fn db(&self) -> &Arc<DatabaseConnection> {
        &self.db
    }
}
