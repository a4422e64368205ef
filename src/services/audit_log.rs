//! Append-only audit trail.
//!
//! Every write goes through [`append`], which only accepts an open
//! transaction: an entry is committed together with the mutation it documents
//! or not at all. Rows are only ever removed by [`purge`] when their subject
//! is deleted.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, instrument};

use crate::errors::ServiceError;
use crate::models::{ChangeKind, SubjectKind};

/// Runs `$body` with `$log` bound to the log table module for `$subject`.
macro_rules! with_log_table {
    ($subject:expr, $log:ident => $body:expr) => {
        match $subject {
            SubjectKind::Container => {
                use crate::entities::container_log as $log;
                $body
            }
            SubjectKind::Purchase => {
                use crate::entities::purchase_log as $log;
                $body
            }
            SubjectKind::Dispense => {
                use crate::entities::dispense_log as $log;
                $body
            }
            SubjectKind::Item => {
                use crate::entities::item_log as $log;
                $body
            }
        }
    };
}

macro_rules! entry_from_model {
    ($subject:expr, $model:expr) => {{
        let model = $model;
        AuditEntry {
            id: model.id,
            subject: $subject,
            subject_id: model.subject_id,
            actor_id: model.actor_id,
            change_kind: model.change_kind,
            field: model.field,
            old_value: model.old_value,
            new_value: model.new_value,
            description: model.description,
            created_at: model.created_at,
        }
    }};
}

/// What to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub subject: SubjectKind,
    pub subject_id: i32,
    pub actor_id: i32,
    pub change_kind: ChangeKind,
    pub field: Option<String>,
    pub old_value: Option<i32>,
    pub new_value: Option<i32>,
    pub description: String,
}

impl AuditRecord {
    pub fn new(
        subject: SubjectKind,
        subject_id: i32,
        actor_id: i32,
        change_kind: ChangeKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            subject,
            subject_id,
            actor_id,
            change_kind,
            field: None,
            old_value: None,
            new_value: None,
            description: description.into(),
        }
    }

    /// Records a numeric field moving from `old` to `new`.
    pub fn with_values(mut self, field: &str, old: i32, new: i32) -> Self {
        self.field = Some(field.to_string());
        self.old_value = Some(old);
        self.new_value = Some(new);
        self
    }
}

/// A committed audit entry, whichever table it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub id: i32,
    pub subject: SubjectKind,
    pub subject_id: i32,
    pub actor_id: i32,
    pub change_kind: ChangeKind,
    pub field: Option<String>,
    pub old_value: Option<i32>,
    pub new_value: Option<i32>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Signed change recorded by the entry, when it carries values.
    pub fn delta(&self) -> Option<i64> {
        match (self.old_value, self.new_value) {
            (Some(old), Some(new)) => Some(i64::from(new) - i64::from(old)),
            _ => None,
        }
    }
}

/// Appends one entry inside `txn`. A failure here must abort the caller's
/// transaction, so the error is returned rather than logged and dropped.
pub async fn append(
    txn: &DatabaseTransaction,
    record: AuditRecord,
) -> Result<AuditEntry, ServiceError> {
    let subject = record.subject;
    let entry = with_log_table!(subject, log => {
        let model = log::ActiveModel {
            subject_id: Set(record.subject_id),
            actor_id: Set(record.actor_id),
            change_kind: Set(record.change_kind),
            field: Set(record.field),
            old_value: Set(record.old_value),
            new_value: Set(record.new_value),
            description: Set(record.description),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(|e| {
            error!(subject = subject.as_str(), "Failed to write audit entry: {}", e);
            ServiceError::DatabaseError(e)
        })?;
        entry_from_model!(subject, model)
    });

    debug!(
        subject = subject.as_str(),
        subject_id = entry.subject_id,
        entry_id = entry.id,
        change_kind = entry.change_kind.as_str(),
        "Audit entry appended"
    );
    Ok(entry)
}

/// Entries for one subject in the order they were written.
pub async fn entries_for<C: ConnectionTrait>(
    db: &C,
    subject: SubjectKind,
    subject_id: i32,
) -> Result<Vec<AuditEntry>, ServiceError> {
    with_log_table!(subject, log => {
        let rows = log::Entity::find()
            .filter(log::Column::SubjectId.eq(subject_id))
            .order_by_asc(log::Column::Id)
            .all(db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|model| entry_from_model!(subject, model))
            .collect())
    })
}

/// Removes every entry of a subject that is being deleted in `txn`.
pub(crate) async fn purge(
    txn: &DatabaseTransaction,
    subject: SubjectKind,
    subject_id: i32,
) -> Result<u64, ServiceError> {
    let removed = with_log_table!(subject, log => {
        log::Entity::delete_many()
            .filter(log::Column::SubjectId.eq(subject_id))
            .exec(txn)
            .await?
            .rows_affected
    });
    debug!(
        subject = subject.as_str(),
        subject_id, removed, "Audit entries purged with subject"
    );
    Ok(removed)
}

/// Read side of the audit trail.
#[derive(Clone)]
pub struct AuditTrail {
    db: Arc<DatabaseConnection>,
}

impl AuditTrail {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn entries_for(
        &self,
        subject: SubjectKind,
        subject_id: i32,
    ) -> Result<Vec<AuditEntry>, ServiceError> {
        entries_for(&*self.db, subject, subject_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_with_values_sets_field_and_levels() {
        let record = AuditRecord::new(
            SubjectKind::Container,
            1,
            12,
            ChangeKind::Usage,
            "Dispensed 5 of pH Down",
        )
        .with_values("ph_down", 1000, 995);
        assert_eq!(record.field.as_deref(), Some("ph_down"));
        assert_eq!(record.old_value, Some(1000));
        assert_eq!(record.new_value, Some(995));
    }

    #[test]
    fn delta_requires_both_values() {
        let mut entry = AuditEntry {
            id: 1,
            subject: SubjectKind::Container,
            subject_id: 1,
            actor_id: 0,
            change_kind: ChangeKind::AddStock,
            field: Some("ph_up".into()),
            old_value: Some(0),
            new_value: Some(1000),
            description: String::new(),
            created_at: Utc::now(),
        };
        assert_eq!(entry.delta(), Some(1000));
        entry.old_value = None;
        assert_eq!(entry.delta(), None);
    }
}
