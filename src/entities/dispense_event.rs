use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};

use crate::models::ResourceKind;

/// One consumption of stock to treat a planted crop. References the container
/// through greenhouse and kind rather than a foreign key.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dispense_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub greenhouse_id: i32,
    pub plant_id: i32,
    /// Plant name at the time of dispensing.
    pub plant_name: String,
    pub resource_kind: ResourceKind,
    pub amount: i32,
    pub actor_id: i32,
    /// Display name of the actor, `Auto` for automated dosing.
    pub activated_by: String,
    pub dispensed_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::dispense_log::Entity")]
    Logs,
}

impl Related<super::dispense_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Logs.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if let ActiveValue::NotSet = active_model.dispensed_at {
            active_model.dispensed_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}
