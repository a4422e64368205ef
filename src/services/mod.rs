// Stock mutation and audit trail
pub mod audit_log;
pub mod stock_ledger;

// Record families
pub mod containers;
pub mod dispensing;
pub mod purchases;

// Service factory for dependency injection
pub mod factory;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::directory::Actor;
use crate::models::{ChangeKind, SubjectKind};
use crate::notifications::{ChangeNotification, Channel};

/// What remains of a deleted record. Its audit entries are removed together
/// with it, so the receipt is the only trace the caller gets back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionReceipt {
    pub subject: SubjectKind,
    pub subject_id: i32,
    pub actor: Actor,
    pub description: String,
    pub removed_log_entries: u64,
    pub deleted_at: DateTime<Utc>,
}

impl DeletionReceipt {
    pub fn new(
        subject: SubjectKind,
        subject_id: i32,
        actor: &Actor,
        description: impl Into<String>,
        removed_log_entries: u64,
    ) -> Self {
        Self {
            subject,
            subject_id,
            actor: actor.clone(),
            description: description.into(),
            removed_log_entries,
            deleted_at: Utc::now(),
        }
    }

    pub fn notification(&self, channel: Channel) -> ChangeNotification {
        ChangeNotification::new(channel, ChangeKind::Delete, self.subject_id, &self.actor)
            .with_field("description", self.description.clone())
            .with_field("removed_log_entries", self.removed_log_entries)
    }
}
