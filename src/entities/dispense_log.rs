use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};

use crate::models::ChangeKind;

/// Append-only audit entry for a dispense event.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dispense_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub subject_id: i32,
    pub actor_id: i32,
    pub change_kind: ChangeKind,
    pub field: Option<String>,
    pub old_value: Option<i32>,
    pub new_value: Option<i32>,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::dispense_event::Entity",
        from = "Column::SubjectId",
        to = "super::dispense_event::Column::Id",
        on_delete = "Cascade"
    )]
    DispenseEvent,
}

impl Related<super::dispense_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DispenseEvent.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if let ActiveValue::NotSet = active_model.created_at {
            active_model.created_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}
