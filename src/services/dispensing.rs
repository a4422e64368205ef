//! Dispensing of consumables to planted crops.

use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::directory::{resolve_actor_or_system, GreenhouseDirectory};
use crate::entities::{dispense_event, inventory_container};
use crate::errors::{MissingEntity, ServiceError};
use crate::models::{ChangeKind, ResourceKind, SubjectKind};
use crate::notifications::{ChangeNotification, Channel};
use crate::services::audit_log::{self, AuditRecord};
use crate::services::stock_ledger::{StockDelta, StockLedger};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DispenseRequest {
    pub greenhouse_id: i32,
    pub plant_id: i32,
    /// Storage name or label of the consumable, e.g. `ph_down` or `pH Down`.
    #[validate(length(min = 1))]
    pub resource_kind: String,
    #[validate(range(min = 1))]
    pub amount: i32,
    /// Login identifier, or `auto` for automated dosing.
    pub actor: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DispenseFilter {
    pub greenhouse_id: Option<i32>,
    pub plant_id: Option<i32>,
}

#[derive(Clone)]
pub struct DispensingCoordinator {
    db: Arc<DatabaseConnection>,
    directory: Arc<dyn GreenhouseDirectory>,
    ledger: StockLedger,
}

impl DispensingCoordinator {
    pub fn new(directory: Arc<dyn GreenhouseDirectory>, ledger: StockLedger) -> Self {
        Self {
            db: ledger.db().clone(),
            directory,
            ledger,
        }
    }

    /// Takes `amount` of a consumable out of the greenhouse's container and
    /// records it against the plant. The decrement, the event and both log
    /// entries commit together; on insufficient stock nothing is written.
    #[instrument(skip(self, request), fields(greenhouse_id = request.greenhouse_id, plant_id = request.plant_id))]
    pub async fn dispense(
        &self,
        request: DispenseRequest,
    ) -> Result<dispense_event::Model, ServiceError> {
        request.validate()?;
        let kind = ResourceKind::parse(&request.resource_kind).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Unknown resource kind '{}'",
                request.resource_kind
            ))
        })?;

        if !self
            .directory
            .greenhouse_exists(request.greenhouse_id)
            .await?
        {
            return Err(ServiceError::not_found(
                MissingEntity::Greenhouse,
                request.greenhouse_id,
            ));
        }
        // Container before plant. The locked read below re-checks it.
        if inventory_container::Entity::find()
            .filter(inventory_container::Column::GreenhouseId.eq(request.greenhouse_id))
            .one(&*self.db)
            .await?
            .is_none()
        {
            return Err(ServiceError::container_not_found(format!(
                "greenhouse {}",
                request.greenhouse_id
            )));
        }
        let plant = self
            .directory
            .get_plant(request.plant_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(MissingEntity::Plant, request.plant_id))?;
        if plant.greenhouse_id != request.greenhouse_id {
            warn!(
                plant_id = plant.id,
                plant_greenhouse = plant.greenhouse_id,
                "Plant is in another greenhouse"
            );
            return Err(ServiceError::ValidationError(format!(
                "Plant {} does not belong to greenhouse {}",
                plant.id, request.greenhouse_id
            )));
        }
        let actor = resolve_actor_or_system(self.directory.as_ref(), &request.actor).await?;

        let txn = self.ledger.begin().await?;
        let container = self
            .ledger
            .lock_greenhouse_container(&txn, request.greenhouse_id)
            .await?
            .ok_or_else(|| {
                ServiceError::container_not_found(format!("greenhouse {}", request.greenhouse_id))
            })?;

        let description = format!(
            "Dispensed {} of {} to plant '{}' in greenhouse {} by {}",
            request.amount,
            kind.label(),
            plant.name,
            request.greenhouse_id,
            actor.display_name
        );
        let applied = self
            .ledger
            .apply_delta_in(
                &txn,
                StockDelta {
                    container_id: container.id,
                    kind,
                    delta: -request.amount,
                    actor: actor.clone(),
                    change_kind: ChangeKind::Usage,
                    description: description.clone(),
                },
            )
            .await?;

        let event = dispense_event::ActiveModel {
            greenhouse_id: Set(request.greenhouse_id),
            plant_id: Set(plant.id),
            plant_name: Set(plant.name.clone()),
            resource_kind: Set(kind),
            amount: Set(request.amount),
            actor_id: Set(actor.id),
            activated_by: Set(actor.display_name.clone()),
            ..Default::default()
        }
        .insert(&*txn)
        .await?;

        audit_log::append(
            &txn,
            AuditRecord::new(
                SubjectKind::Dispense,
                event.id,
                actor.id,
                ChangeKind::Usage,
                description,
            )
            .with_values(kind.column_name(), applied.old_value, applied.new_value),
        )
        .await?;
        txn.commit("dispense").await?;

        info!(
            event_id = event.id,
            container_id = applied.container_id,
            kind = %kind,
            amount = request.amount,
            remaining = applied.new_value,
            "Dispensed stock"
        );

        self.ledger.announce(&applied, &actor).await;
        self.ledger
            .notifier()
            .publish(
                ChangeNotification::new(Channel::DispenseLogged, ChangeKind::Usage, event.id, &actor)
                    .with_change(
                        kind.column_name(),
                        Some(applied.old_value),
                        Some(applied.new_value),
                    )
                    .with_field("greenhouse_id", event.greenhouse_id)
                    .with_field("plant_id", event.plant_id)
                    .with_field("amount", event.amount),
            )
            .await;

        Ok(event)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, event_id: i32) -> Result<dispense_event::Model, ServiceError> {
        dispense_event::Entity::find_by_id(event_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found(MissingEntity::DispenseEvent, event_id))
    }

    /// Dispense history, newest first.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        filter: DispenseFilter,
    ) -> Result<Vec<dispense_event::Model>, ServiceError> {
        let mut query = dispense_event::Entity::find();
        if let Some(greenhouse_id) = filter.greenhouse_id {
            query = query.filter(dispense_event::Column::GreenhouseId.eq(greenhouse_id));
        }
        if let Some(plant_id) = filter.plant_id {
            query = query.filter(dispense_event::Column::PlantId.eq(plant_id));
        }
        Ok(query
            .order_by_desc(dispense_event::Column::DispensedAt)
            .order_by_desc(dispense_event::Column::Id)
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_validation_rejects_non_positive_amounts() {
        let mut request = DispenseRequest {
            greenhouse_id: 8,
            plant_id: 3,
            resource_kind: "pH Down".into(),
            amount: 0,
            actor: "auto".into(),
        };
        assert!(request.validate().is_err());
        request.amount = 5;
        assert!(request.validate().is_ok());
    }
}
