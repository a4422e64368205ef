//! Purchases of consumables and general inventory items.
//!
//! A purchase whose resource kind names one of the container's consumables
//! adds stock to the greenhouse's container, creating the container on first
//! use. Corrections and deletions never move stock back: they fix the
//! bookkeeping record only.

use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use validator::{Validate, ValidationError};

use crate::directory::{resolve_actor_or_system, Actor, GreenhouseDirectory};
use crate::entities::{inventory_item, inventory_purchase};
use crate::errors::{MissingEntity, ServiceError};
use crate::models::{ChangeKind, ResourceKind, SubjectKind};
use crate::notifications::{ChangeNotification, Channel};
use crate::services::audit_log::{self, AuditRecord};
use crate::services::containers::ContainerStore;
use crate::services::stock_ledger::{StockChange, StockDelta, StockLedger};
use crate::services::DeletionReceipt;

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(ValidationError::new("negative_price"));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewPurchase {
    pub greenhouse_id: i32,
    #[validate(length(min = 1, max = 255))]
    pub item_name: String,
    /// Free text; only moves stock when it names a consumable.
    pub resource_kind: String,
    #[validate(range(min = 1))]
    pub quantity: i32,
    #[validate(custom = "validate_price")]
    pub unit_price: Decimal,
    /// Container units per purchased package.
    #[validate(range(min = 0))]
    pub package_capacity: Option<i32>,
    pub actor: String,
}

impl NewPurchase {
    /// Units added to the container: packages times capacity when the
    /// capacity is known, otherwise the quantity itself.
    pub fn stock_units(&self) -> Result<i32, ServiceError> {
        stock_units(self.quantity, self.package_capacity)
    }
}

fn stock_units(quantity: i32, package_capacity: Option<i32>) -> Result<i32, ServiceError> {
    match package_capacity {
        Some(capacity) if capacity > 0 => quantity.checked_mul(capacity).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "{} packages of {} units overflow the container",
                quantity, capacity
            ))
        }),
        _ => Ok(quantity),
    }
}

/// Administrative correction of a purchase record. Absent fields are kept.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct PurchaseCorrection {
    #[validate(length(min = 1, max = 255))]
    pub item_name: Option<String>,
    #[validate(range(min = 1))]
    pub quantity: Option<i32>,
    #[validate(custom = "validate_price")]
    pub unit_price: Option<Decimal>,
    #[validate(range(min = 0))]
    pub package_capacity: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewItem {
    pub greenhouse_id: i32,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    #[validate(range(min = 1))]
    pub count: i32,
    #[validate(length(min = 1, max = 32))]
    pub unit: String,
    #[validate(custom = "validate_price")]
    pub unit_price: Decimal,
    pub actor: String,
}

/// A recorded purchase and, when it named a consumable, the stock it added.
#[derive(Debug, Clone)]
pub struct RecordedPurchase {
    pub purchase: inventory_purchase::Model,
    pub stock_change: Option<StockChange>,
    pub container_created: bool,
}

#[derive(Clone)]
pub struct PurchaseRecorder {
    db: Arc<DatabaseConnection>,
    directory: Arc<dyn GreenhouseDirectory>,
    ledger: StockLedger,
    containers: ContainerStore,
}

impl PurchaseRecorder {
    pub fn new(
        directory: Arc<dyn GreenhouseDirectory>,
        ledger: StockLedger,
        containers: ContainerStore,
    ) -> Self {
        Self {
            db: ledger.db().clone(),
            directory,
            ledger,
            containers,
        }
    }

    #[instrument(skip(self, input), fields(greenhouse_id = input.greenhouse_id, resource_kind = %input.resource_kind))]
    pub async fn record_purchase(
        &self,
        input: NewPurchase,
    ) -> Result<RecordedPurchase, ServiceError> {
        input.validate()?;
        let units = input.stock_units()?;
        self.ensure_greenhouse(input.greenhouse_id).await?;
        let actor = resolve_actor_or_system(self.directory.as_ref(), &input.actor).await?;
        let total_price = Decimal::from(input.quantity) * input.unit_price;
        let kind = ResourceKind::parse(&input.resource_kind);

        let txn = self.ledger.begin().await?;
        let linked = match kind {
            Some(_) => Some(
                self.containers
                    .get_or_create_in(&txn, input.greenhouse_id, &actor)
                    .await?,
            ),
            None => None,
        };

        let purchase = inventory_purchase::ActiveModel {
            container_id: Set(linked.as_ref().map(|(container, _)| container.id)),
            greenhouse_id: Set(input.greenhouse_id),
            actor_id: Set(actor.id),
            item_name: Set(input.item_name.clone()),
            resource_kind: Set(input.resource_kind.trim().to_string()),
            quantity: Set(input.quantity),
            unit_price: Set(input.unit_price),
            total_price: Set(total_price),
            package_capacity: Set(input.package_capacity),
            ..Default::default()
        }
        .insert(&*txn)
        .await
        .map_err(ServiceError::from_write)?;

        let stock_change = match (kind, &linked) {
            (Some(kind), Some((container, _))) => Some(
                self.ledger
                    .apply_delta_in(
                        &txn,
                        StockDelta {
                            container_id: container.id,
                            kind,
                            delta: units,
                            actor: actor.clone(),
                            change_kind: ChangeKind::AddStock,
                            description: format!(
                                "Added {} of {} from purchase {} ('{}') by {}",
                                units,
                                kind.label(),
                                purchase.id,
                                purchase.item_name,
                                actor.display_name
                            ),
                        },
                    )
                    .await?,
            ),
            _ => None,
        };

        audit_log::append(
            &txn,
            AuditRecord {
                field: Some("quantity".to_string()),
                new_value: Some(purchase.quantity),
                ..AuditRecord::new(
                    SubjectKind::Purchase,
                    purchase.id,
                    actor.id,
                    ChangeKind::Create,
                    format!(
                        "Purchased {} x '{}' at {} each (total {}) for greenhouse {} by {}",
                        purchase.quantity,
                        purchase.item_name,
                        purchase.unit_price,
                        purchase.total_price,
                        purchase.greenhouse_id,
                        actor.display_name
                    ),
                )
            },
        )
        .await?;
        txn.commit("record_purchase").await?;

        info!(
            purchase_id = purchase.id,
            container_id = ?purchase.container_id,
            units = stock_change.as_ref().map(StockChange::delta),
            "Purchase recorded"
        );

        let container_created = matches!(linked, Some((_, true)));
        if let Some((container, true)) = &linked {
            self.containers.announce_created(container, &actor).await;
        }
        if let Some(change) = &stock_change {
            self.ledger.announce(change, &actor).await;
        }
        self.ledger
            .notifier()
            .publish(
                Self::purchase_notification(&purchase, ChangeKind::Create, &actor)
                    .with_change("quantity", None, Some(purchase.quantity)),
            )
            .await;

        Ok(RecordedPurchase {
            purchase,
            stock_change,
            container_created,
        })
    }

    /// Corrects a purchase record and recomputes its total. Container stock
    /// is left as it is.
    #[instrument(skip(self, correction))]
    pub async fn update_purchase(
        &self,
        purchase_id: i32,
        correction: PurchaseCorrection,
        actor: &str,
    ) -> Result<inventory_purchase::Model, ServiceError> {
        correction.validate()?;
        let actor = resolve_actor_or_system(self.directory.as_ref(), actor).await?;

        let txn = self.ledger.begin().await?;
        let current = inventory_purchase::Entity::find_by_id(purchase_id)
            .one(&*txn)
            .await?
            .ok_or_else(|| ServiceError::not_found(MissingEntity::Purchase, purchase_id))?;

        let mut records = Vec::new();
        let mut active: inventory_purchase::ActiveModel = current.clone().into();
        let describe = |field: &str, old: &dyn std::fmt::Display, new: &dyn std::fmt::Display| {
            format!(
                "Purchase {} field '{}' changed from {} to {} by {}",
                purchase_id, field, old, new, actor.display_name
            )
        };

        if let Some(name) = correction.item_name.as_ref().filter(|n| **n != current.item_name) {
            records.push(AuditRecord::new(
                SubjectKind::Purchase,
                purchase_id,
                actor.id,
                ChangeKind::Update,
                describe("item_name", &current.item_name, name),
            ));
            active.item_name = Set(name.clone());
        }
        if let Some(quantity) = correction.quantity.filter(|q| *q != current.quantity) {
            records.push(
                AuditRecord::new(
                    SubjectKind::Purchase,
                    purchase_id,
                    actor.id,
                    ChangeKind::Update,
                    describe("quantity", &current.quantity, &quantity),
                )
                .with_values("quantity", current.quantity, quantity),
            );
            active.quantity = Set(quantity);
        }
        if let Some(price) = correction.unit_price.filter(|p| *p != current.unit_price) {
            records.push(AuditRecord::new(
                SubjectKind::Purchase,
                purchase_id,
                actor.id,
                ChangeKind::Update,
                describe("unit_price", &current.unit_price, &price),
            ));
            active.unit_price = Set(price);
        }
        if let Some(capacity) = correction
            .package_capacity
            .filter(|c| Some(*c) != current.package_capacity)
        {
            let old = current.package_capacity.unwrap_or(0);
            records.push(
                AuditRecord::new(
                    SubjectKind::Purchase,
                    purchase_id,
                    actor.id,
                    ChangeKind::Update,
                    describe("package_capacity", &old, &capacity),
                )
                .with_values("package_capacity", old, capacity),
            );
            active.package_capacity = Set(Some(capacity));
        }

        if records.is_empty() {
            info!(purchase_id, "No purchase changes to apply");
            return Ok(current);
        }

        let quantity = correction.quantity.unwrap_or(current.quantity);
        let unit_price = correction.unit_price.unwrap_or(current.unit_price);
        active.total_price = Set(Decimal::from(quantity) * unit_price);
        let updated = active.update(&*txn).await?;

        let fields: Vec<String> = records
            .iter()
            .filter_map(|r| r.field.clone())
            .collect();
        for record in records {
            audit_log::append(&txn, record).await?;
        }
        txn.commit("update_purchase").await?;

        info!(
            purchase_id,
            total_price = %updated.total_price,
            "Purchase corrected"
        );
        let mut notification = Self::purchase_notification(&updated, ChangeKind::Update, &actor)
            .with_field("total_price", updated.total_price.to_string());
        if updated.total_price != current.total_price {
            notification = notification
                .with_field("previous_total_price", current.total_price.to_string());
        }
        if fields.iter().any(|f| f == "quantity") {
            notification =
                notification.with_change("quantity", Some(current.quantity), Some(updated.quantity));
        }
        self.ledger.notifier().publish(notification).await;

        Ok(updated)
    }

    /// Removes a purchase and its log. Stock it added stays in the container.
    #[instrument(skip(self))]
    pub async fn delete_purchase(
        &self,
        purchase_id: i32,
        actor: &str,
    ) -> Result<DeletionReceipt, ServiceError> {
        let actor = resolve_actor_or_system(self.directory.as_ref(), actor).await?;

        let txn = self.ledger.begin().await?;
        let purchase = inventory_purchase::Entity::find_by_id(purchase_id)
            .one(&*txn)
            .await?
            .ok_or_else(|| ServiceError::not_found(MissingEntity::Purchase, purchase_id))?;
        let removed_log_entries =
            audit_log::purge(&txn, SubjectKind::Purchase, purchase_id).await?;
        inventory_purchase::Entity::delete_by_id(purchase_id)
            .exec(&*txn)
            .await?;
        txn.commit("delete_purchase").await?;

        let receipt = DeletionReceipt::new(
            SubjectKind::Purchase,
            purchase_id,
            &actor,
            format!(
                "Purchase {} ('{}', {} x {}) deleted by {}",
                purchase_id,
                purchase.item_name,
                purchase.quantity,
                purchase.unit_price,
                actor.display_name
            ),
            removed_log_entries,
        );
        info!(purchase_id, removed_log_entries, "Purchase deleted");
        self.ledger
            .notifier()
            .publish(
                receipt
                    .notification(Channel::PurchaseLogged)
                    .with_field("greenhouse_id", purchase.greenhouse_id),
            )
            .await;
        Ok(receipt)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, purchase_id: i32) -> Result<inventory_purchase::Model, ServiceError> {
        inventory_purchase::Entity::find_by_id(purchase_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found(MissingEntity::Purchase, purchase_id))
    }

    /// Purchases, newest first.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        greenhouse_id: Option<i32>,
    ) -> Result<Vec<inventory_purchase::Model>, ServiceError> {
        let mut query = inventory_purchase::Entity::find();
        if let Some(greenhouse_id) = greenhouse_id {
            query = query.filter(inventory_purchase::Column::GreenhouseId.eq(greenhouse_id));
        }
        Ok(query
            .order_by_desc(inventory_purchase::Column::CreatedAt)
            .order_by_desc(inventory_purchase::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Records a general supply. Items never touch a container.
    #[instrument(skip(self, input), fields(greenhouse_id = input.greenhouse_id))]
    pub async fn record_item(&self, input: NewItem) -> Result<inventory_item::Model, ServiceError> {
        input.validate()?;
        self.ensure_greenhouse(input.greenhouse_id).await?;
        let actor = resolve_actor_or_system(self.directory.as_ref(), &input.actor).await?;

        let txn = self.ledger.begin().await?;
        let item = inventory_item::ActiveModel {
            greenhouse_id: Set(input.greenhouse_id),
            user_id: Set(actor.id),
            name: Set(input.name),
            description: Set(input.description),
            count: Set(input.count),
            unit: Set(input.unit),
            unit_price: Set(input.unit_price),
            total_price: Set(Decimal::from(input.count) * input.unit_price),
            ..Default::default()
        }
        .insert(&*txn)
        .await?;

        audit_log::append(
            &txn,
            AuditRecord {
                field: Some("count".to_string()),
                new_value: Some(item.count),
                ..AuditRecord::new(
                    SubjectKind::Item,
                    item.id,
                    actor.id,
                    ChangeKind::Create,
                    format!(
                        "Received {} {} of '{}' for greenhouse {} by {}",
                        item.count, item.unit, item.name, item.greenhouse_id, actor.display_name
                    ),
                )
            },
        )
        .await?;
        txn.commit("record_item").await?;

        info!(item_id = item.id, "Inventory item recorded");
        self.ledger
            .notifier()
            .publish(
                ChangeNotification::new(Channel::ItemLogged, ChangeKind::Create, item.id, &actor)
                    .with_change("count", None, Some(item.count))
                    .with_field("greenhouse_id", item.greenhouse_id)
                    .with_field("name", item.name.clone()),
            )
            .await;
        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn get_item(&self, item_id: i32) -> Result<inventory_item::Model, ServiceError> {
        inventory_item::Entity::find_by_id(item_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found(MissingEntity::Item, item_id))
    }

    #[instrument(skip(self))]
    pub async fn list_items(
        &self,
        greenhouse_id: Option<i32>,
    ) -> Result<Vec<inventory_item::Model>, ServiceError> {
        let mut query = inventory_item::Entity::find();
        if let Some(greenhouse_id) = greenhouse_id {
            query = query.filter(inventory_item::Column::GreenhouseId.eq(greenhouse_id));
        }
        Ok(query
            .order_by_desc(inventory_item::Column::ReceivedAt)
            .order_by_desc(inventory_item::Column::Id)
            .all(&*self.db)
            .await?)
    }

    async fn ensure_greenhouse(&self, greenhouse_id: i32) -> Result<(), ServiceError> {
        if self.directory.greenhouse_exists(greenhouse_id).await? {
            Ok(())
        } else {
            Err(ServiceError::not_found(MissingEntity::Greenhouse, greenhouse_id))
        }
    }

    fn purchase_notification(
        purchase: &inventory_purchase::Model,
        action: ChangeKind,
        actor: &Actor,
    ) -> ChangeNotification {
        let mut notification =
            ChangeNotification::new(Channel::PurchaseLogged, action, purchase.id, actor)
                .with_field("greenhouse_id", purchase.greenhouse_id)
                .with_field("item_name", purchase.item_name.clone())
                .with_field("resource_kind", purchase.resource_kind.clone());
        if let Some(container_id) = purchase.container_id {
            notification = notification.with_field("container_id", container_id);
        }
        notification
    }
}
