//! Per-greenhouse inventory containers.

use chrono::Utc;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait,
    ActiveValue::Set,
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::directory::{resolve_actor_or_system, Actor, GreenhouseDirectory};
use crate::entities::{inventory_container, inventory_purchase};
use crate::errors::{MissingEntity, ServiceError};
use crate::models::{ChangeKind, ResourceKind, SubjectKind};
use crate::notifications::{ChangeNotification, Channel};
use crate::services::audit_log::{self, AuditRecord};
use crate::services::stock_ledger::{LedgerTransaction, StockChange, StockDelta, StockLedger};
use crate::services::DeletionReceipt;

/// Initial state for an explicitly created container.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct NewContainer {
    pub greenhouse_id: i32,
    #[validate(range(min = 0))]
    pub ph_up: i32,
    #[validate(range(min = 0))]
    pub ph_down: i32,
    #[validate(range(min = 0))]
    pub solution_a: i32,
    #[validate(range(min = 0))]
    pub solution_b: i32,
    #[validate(range(min = 0))]
    pub critical_level: Option<i32>,
}

impl NewContainer {
    pub fn empty(greenhouse_id: i32) -> Self {
        Self {
            greenhouse_id,
            ..Default::default()
        }
    }

    fn level(&self, kind: ResourceKind) -> i32 {
        match kind {
            ResourceKind::PhUp => self.ph_up,
            ResourceKind::PhDown => self.ph_down,
            ResourceKind::SolutionA => self.solution_a,
            ResourceKind::SolutionB => self.solution_b,
        }
    }
}

/// Manual correction. Absent fields are left alone; present ones are
/// absolute values.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ContainerPatch {
    #[validate(range(min = 0))]
    pub ph_up: Option<i32>,
    #[validate(range(min = 0))]
    pub ph_down: Option<i32>,
    #[validate(range(min = 0))]
    pub solution_a: Option<i32>,
    #[validate(range(min = 0))]
    pub solution_b: Option<i32>,
    #[validate(range(min = 0))]
    pub critical_level: Option<i32>,
}

impl ContainerPatch {
    fn level(&self, kind: ResourceKind) -> Option<i32> {
        match kind {
            ResourceKind::PhUp => self.ph_up,
            ResourceKind::PhDown => self.ph_down,
            ResourceKind::SolutionA => self.solution_a,
            ResourceKind::SolutionB => self.solution_b,
        }
    }
}

/// Container after a manual adjustment, with the stock changes applied.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerAdjustment {
    pub container: inventory_container::Model,
    pub changed_fields: Vec<String>,
}

/// Kinds whose level is at or below the container's critical level.
pub fn low_stock(container: &inventory_container::Model) -> Vec<ResourceKind> {
    ResourceKind::ALL
        .into_iter()
        .filter(|kind| kind.level(container) <= container.critical_level)
        .collect()
}

#[derive(Clone)]
pub struct ContainerStore {
    db: Arc<DatabaseConnection>,
    directory: Arc<dyn GreenhouseDirectory>,
    ledger: StockLedger,
}

impl ContainerStore {
    pub fn new(directory: Arc<dyn GreenhouseDirectory>, ledger: StockLedger) -> Self {
        Self {
            db: ledger.db().clone(),
            directory,
            ledger,
        }
    }

    #[instrument(skip(self))]
    pub async fn get(&self, container_id: i32) -> Result<inventory_container::Model, ServiceError> {
        inventory_container::Entity::find_by_id(container_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::container_not_found(container_id))
    }

    #[instrument(skip(self))]
    pub async fn find_by_greenhouse(
        &self,
        greenhouse_id: i32,
    ) -> Result<Option<inventory_container::Model>, ServiceError> {
        Ok(inventory_container::Entity::find()
            .filter(inventory_container::Column::GreenhouseId.eq(greenhouse_id))
            .one(&*self.db)
            .await?)
    }

    /// All containers, or the one of `greenhouse_id`, ordered by greenhouse.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        greenhouse_id: Option<i32>,
    ) -> Result<Vec<inventory_container::Model>, ServiceError> {
        let mut query = inventory_container::Entity::find();
        if let Some(greenhouse_id) = greenhouse_id {
            query = query.filter(inventory_container::Column::GreenhouseId.eq(greenhouse_id));
        }
        Ok(query
            .order_by_asc(inventory_container::Column::GreenhouseId)
            .all(&*self.db)
            .await?)
    }

    /// Returns the greenhouse's container, creating an empty one first if
    /// needed.
    #[instrument(skip(self))]
    pub async fn get_or_create(
        &self,
        greenhouse_id: i32,
        actor: &str,
    ) -> Result<inventory_container::Model, ServiceError> {
        if let Some(existing) = self.find_by_greenhouse(greenhouse_id).await? {
            return Ok(existing);
        }
        self.ensure_greenhouse(greenhouse_id).await?;
        let actor = resolve_actor_or_system(self.directory.as_ref(), actor).await?;

        let txn = self.ledger.begin().await?;
        let (container, created) = self.get_or_create_in(&txn, greenhouse_id, &actor).await?;
        txn.commit("get_or_create_container").await?;

        if created {
            self.announce_created(&container, &actor).await;
        }
        Ok(container)
    }

    /// Locks the greenhouse's container inside `txn`, inserting it when
    /// missing. The flag tells whether this call created it.
    pub(crate) async fn get_or_create_in(
        &self,
        txn: &LedgerTransaction,
        greenhouse_id: i32,
        actor: &Actor,
    ) -> Result<(inventory_container::Model, bool), ServiceError> {
        if let Some(existing) = self.ledger.lock_greenhouse_container(txn, greenhouse_id).await? {
            return Ok((existing, false));
        }

        // A concurrent creator may win between the read and the insert;
        // ON CONFLICT DO NOTHING leaves their row in place.
        let inserted = inventory_container::Entity::insert(Self::active_model(
            &NewContainer::empty(greenhouse_id),
        ))
        .on_conflict(
            OnConflict::column(inventory_container::Column::GreenhouseId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(&**txn)
        .await
        .map_err(ServiceError::from_write)?;

        let container = self
            .ledger
            .lock_greenhouse_container(txn, greenhouse_id)
            .await?
            .ok_or_else(|| {
                error!(greenhouse_id, "Container missing after insert");
                ServiceError::InternalError(format!(
                    "Container for greenhouse {} vanished after insert",
                    greenhouse_id
                ))
            })?;

        let created = inserted > 0;
        if created {
            audit_log::append(
                txn,
                AuditRecord::new(
                    SubjectKind::Container,
                    container.id,
                    actor.id,
                    ChangeKind::Create,
                    format!(
                        "Container created for greenhouse {} by {}",
                        greenhouse_id, actor.display_name
                    ),
                ),
            )
            .await?;
        }
        Ok((container, created))
    }

    /// Creates a container with initial levels. Fails with `Conflict` when
    /// the greenhouse already has one.
    #[instrument(skip(self, input), fields(greenhouse_id = input.greenhouse_id))]
    pub async fn create(
        &self,
        input: NewContainer,
        actor: &str,
    ) -> Result<inventory_container::Model, ServiceError> {
        input.validate()?;
        self.ensure_greenhouse(input.greenhouse_id).await?;
        let actor = resolve_actor_or_system(self.directory.as_ref(), actor).await?;

        let txn = self.ledger.begin().await?;
        if self
            .ledger
            .lock_greenhouse_container(&txn, input.greenhouse_id)
            .await?
            .is_some()
        {
            warn!(greenhouse_id = input.greenhouse_id, "Container already exists");
            return Err(ServiceError::Conflict(format!(
                "Inventory container already exists for greenhouse {}",
                input.greenhouse_id
            )));
        }

        let container = Self::active_model(&input)
            .insert(&*txn)
            .await
            .map_err(ServiceError::from_write)?;

        let levels = ResourceKind::ALL
            .iter()
            .map(|kind| format!("{}={}", kind.column_name(), input.level(*kind)))
            .collect::<Vec<_>>()
            .join(", ");
        audit_log::append(
            &txn,
            AuditRecord::new(
                SubjectKind::Container,
                container.id,
                actor.id,
                ChangeKind::Create,
                format!(
                    "Container created for greenhouse {} with {}, critical_level={} by {}",
                    container.greenhouse_id, levels, container.critical_level, actor.display_name
                ),
            ),
        )
        .await?;
        txn.commit("create_container").await?;

        info!(
            container_id = container.id,
            greenhouse_id = container.greenhouse_id,
            "Inventory container created"
        );
        self.announce_created(&container, &actor).await;
        Ok(container)
    }

    /// Sets absolute levels and/or the critical level. Each changed field
    /// gets its own `update` entry; unchanged fields are skipped.
    #[instrument(skip(self, patch))]
    pub async fn adjust(
        &self,
        container_id: i32,
        patch: ContainerPatch,
        actor: &str,
    ) -> Result<ContainerAdjustment, ServiceError> {
        patch.validate()?;
        let actor = resolve_actor_or_system(self.directory.as_ref(), actor).await?;

        let txn = self.ledger.begin().await?;
        let current = self.ledger.lock_container(&txn, container_id).await?;

        let mut changes: Vec<StockChange> = Vec::new();
        for kind in ResourceKind::ALL {
            let Some(target) = patch.level(kind) else {
                continue;
            };
            let old = kind.level(&current);
            if target == old {
                continue;
            }
            let applied = self
                .ledger
                .apply_delta_in(
                    &txn,
                    StockDelta {
                        container_id,
                        kind,
                        delta: target - old,
                        actor: actor.clone(),
                        change_kind: ChangeKind::Update,
                        description: format!(
                            "Container {} field '{}' changed from {} to {} by {}",
                            container_id,
                            kind.column_name(),
                            old,
                            target,
                            actor.display_name
                        ),
                    },
                )
                .await?;
            changes.push(applied);
        }

        let mut changed_fields: Vec<String> =
            changes.iter().map(|c| c.kind.column_name().to_string()).collect();
        let mut critical_change = None;
        if let Some(critical) = patch.critical_level {
            if critical != current.critical_level {
                let mut active: inventory_container::ActiveModel = self
                    .ledger
                    .lock_container(&txn, container_id)
                    .await?
                    .into();
                active.critical_level = Set(critical);
                active.update(&*txn).await?;
                audit_log::append(
                    &txn,
                    AuditRecord::new(
                        SubjectKind::Container,
                        container_id,
                        actor.id,
                        ChangeKind::Update,
                        format!(
                            "Container {} field 'critical_level' changed from {} to {} by {}",
                            container_id, current.critical_level, critical, actor.display_name
                        ),
                    )
                    .with_values("critical_level", current.critical_level, critical),
                )
                .await?;
                changed_fields.push("critical_level".to_string());
                critical_change = Some((current.critical_level, critical));
            }
        }

        if changed_fields.is_empty() {
            info!(container_id, "No container changes to apply");
            return Ok(ContainerAdjustment {
                container: current,
                changed_fields,
            });
        }

        let container = self.ledger.lock_container(&txn, container_id).await?;
        txn.commit("adjust_container").await?;

        info!(container_id, fields = ?changed_fields, "Inventory container adjusted");
        let mut notification = ChangeNotification::new(
            Channel::ContainerUpdated,
            ChangeKind::Update,
            container_id,
            &actor,
        )
        .with_field("greenhouse_id", container.greenhouse_id);
        for change in &changes {
            notification = notification.with_change(
                change.kind.column_name(),
                Some(change.old_value),
                Some(change.new_value),
            );
        }
        if let Some((old, new)) = critical_change {
            notification = notification.with_change("critical_level", Some(old), Some(new));
        }
        self.ledger.notifier().publish(notification).await;

        Ok(ContainerAdjustment {
            container,
            changed_fields,
        })
    }

    /// Consumption not tied to a plant, such as spillage or a manual top-off
    /// of a reservoir.
    #[instrument(skip(self))]
    pub async fn record_usage(
        &self,
        greenhouse_id: i32,
        resource_kind: &str,
        amount: i32,
        actor: &str,
    ) -> Result<StockChange, ServiceError> {
        if amount <= 0 {
            return Err(ServiceError::ValidationError(
                "Usage amount must be a positive integer".to_string(),
            ));
        }
        let kind = ResourceKind::parse(resource_kind).ok_or_else(|| {
            ServiceError::ValidationError(format!("Unknown resource kind '{}'", resource_kind))
        })?;
        let actor = resolve_actor_or_system(self.directory.as_ref(), actor).await?;
        let container = self
            .find_by_greenhouse(greenhouse_id)
            .await?
            .ok_or_else(|| {
                ServiceError::container_not_found(format!("greenhouse {}", greenhouse_id))
            })?;

        self.ledger
            .apply_delta(StockDelta {
                container_id: container.id,
                kind,
                delta: -amount,
                actor: actor.clone(),
                change_kind: ChangeKind::Usage,
                description: format!(
                    "Used {} of {} from greenhouse {} container by {}",
                    amount,
                    kind.label(),
                    greenhouse_id,
                    actor.display_name
                ),
            })
            .await
    }

    /// Deletes a container together with its log, unlinking (not deleting)
    /// the purchases that reference it.
    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        container_id: i32,
        actor: &str,
    ) -> Result<DeletionReceipt, ServiceError> {
        let actor = resolve_actor_or_system(self.directory.as_ref(), actor).await?;

        let txn = self.ledger.begin().await?;
        let container = self.ledger.lock_container(&txn, container_id).await?;

        let unlinked = inventory_purchase::Entity::update_many()
            .col_expr(
                inventory_purchase::Column::ContainerId,
                Expr::value(sea_orm::Value::Int(None)),
            )
            .filter(inventory_purchase::Column::ContainerId.eq(container_id))
            .exec(&*txn)
            .await?
            .rows_affected;
        let removed_log_entries =
            audit_log::purge(&txn, SubjectKind::Container, container_id).await?;
        inventory_container::Entity::delete_by_id(container_id)
            .exec(&*txn)
            .await?;
        txn.commit("delete_container").await?;

        let receipt = DeletionReceipt::new(
            SubjectKind::Container,
            container_id,
            &actor,
            format!(
                "Container {} of greenhouse {} deleted by {}; {} purchases unlinked",
                container_id, container.greenhouse_id, actor.display_name, unlinked
            ),
            removed_log_entries,
        );
        info!(
            container_id,
            greenhouse_id = container.greenhouse_id,
            unlinked_purchases = unlinked,
            removed_log_entries,
            "Inventory container deleted"
        );
        self.ledger
            .notifier()
            .publish(
                receipt
                    .notification(Channel::ContainerUpdated)
                    .with_field("greenhouse_id", container.greenhouse_id)
                    .with_field("unlinked_purchases", unlinked),
            )
            .await;
        Ok(receipt)
    }

    async fn ensure_greenhouse(&self, greenhouse_id: i32) -> Result<(), ServiceError> {
        if self.directory.greenhouse_exists(greenhouse_id).await? {
            Ok(())
        } else {
            Err(ServiceError::not_found(MissingEntity::Greenhouse, greenhouse_id))
        }
    }

    pub(crate) async fn announce_created(
        &self,
        container: &inventory_container::Model,
        actor: &Actor,
    ) {
        let mut notification = ChangeNotification::new(
            Channel::ContainerUpdated,
            ChangeKind::Create,
            container.id,
            actor,
        )
        .with_field("greenhouse_id", container.greenhouse_id);
        for kind in ResourceKind::ALL {
            notification =
                notification.with_change(kind.column_name(), None, Some(kind.level(container)));
        }
        self.ledger.notifier().publish(notification).await;
    }

    fn active_model(input: &NewContainer) -> inventory_container::ActiveModel {
        inventory_container::ActiveModel {
            greenhouse_id: Set(input.greenhouse_id),
            ph_up: Set(input.ph_up),
            ph_down: Set(input.ph_down),
            solution_a: Set(input.solution_a),
            solution_b: Set(input.solution_b),
            critical_level: Set(input.critical_level.unwrap_or(0)),
            // Set here because bulk inserts skip `before_save`.
            created_at: Set(Utc::now()),
            ..Default::default()
        }
    }
}
