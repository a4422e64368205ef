use crate::models::ResourceKind;
use sea_orm::error::DbErr;
use sea_orm::{RuntimeErr, SqlErr};
use serde::Serialize;
use std::fmt;

/// Records the ledger can fail to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingEntity {
    Container,
    Greenhouse,
    Plant,
    Actor,
    Purchase,
    Item,
    DispenseEvent,
}

impl fmt::Display for MissingEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MissingEntity::Container => "Inventory container",
            MissingEntity::Greenhouse => "Greenhouse",
            MissingEntity::Plant => "Plant",
            MissingEntity::Actor => "Actor",
            MissingEntity::Purchase => "Inventory purchase",
            MissingEntity::Item => "Inventory item",
            MissingEntity::DispenseEvent => "Dispense event",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: MissingEntity, key: String },

    #[error(
        "Insufficient stock in container {container_id}: {kind} has {available}, requested {requested}"
    )]
    InsufficientStock {
        container_id: i32,
        kind: ResourceKind,
        available: i32,
        requested: i32,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Timed out after {waited_ms}ms waiting for lock on {resource}")]
    LockTimeout { resource: String, waited_ms: u64 },

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    pub fn not_found(entity: MissingEntity, key: impl fmt::Display) -> Self {
        ServiceError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn container_not_found(key: impl fmt::Display) -> Self {
        Self::not_found(MissingEntity::Container, key)
    }

    /// Classifies a database error raised while a row lock was being waited on.
    /// Lock-wait expiry (Postgres `55P03`, SQLite busy) and pool acquire
    /// timeouts become `LockTimeout`; a unique violation becomes `Conflict`.
    pub fn from_lock_wait(err: DbErr, resource: impl Into<String>, waited_ms: u64) -> Self {
        if is_lock_timeout(&err) {
            return ServiceError::LockTimeout {
                resource: resource.into(),
                waited_ms,
            };
        }
        Self::from_write(err)
    }

    /// Maps constraint violations on writes to `Conflict`, everything else to
    /// a persistence failure.
    pub fn from_write(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => ServiceError::Conflict(detail),
            _ => ServiceError::DatabaseError(err),
        }
    }

    /// Stable machine-readable tag for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::DatabaseError(_) => "persistence_failure",
            ServiceError::ValidationError(_) => "validation_error",
            ServiceError::NotFound { .. } => "not_found",
            ServiceError::InsufficientStock { .. } => "insufficient_stock",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::LockTimeout { .. } => "lock_timeout",
            ServiceError::InternalError(_) => "internal_error",
        }
    }

    /// Whether repeating the same call may succeed without changing input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::LockTimeout { .. })
    }
}

fn is_lock_timeout(err: &DbErr) -> bool {
    match err {
        DbErr::ConnectionAcquire(_) => true,
        DbErr::Conn(RuntimeErr::SqlxError(e))
        | DbErr::Exec(RuntimeErr::SqlxError(e))
        | DbErr::Query(RuntimeErr::SqlxError(e)) => match e {
            sea_orm::sqlx::Error::PoolTimedOut => true,
            sea_orm::sqlx::Error::Database(db) => {
                db.code().as_deref() == Some("55P03")
                    || db.message().contains("lock timeout")
                    || db.message().contains("database is locked")
            }
            _ => false,
        },
        other => other.to_string().contains("lock timeout"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            ServiceError::ValidationError("x".into()).code(),
            "validation_error"
        );
        assert_eq!(ServiceError::container_not_found(3).code(), "not_found");
        assert_eq!(ServiceError::Conflict("x".into()).code(), "conflict");
        assert_eq!(
            ServiceError::from(DbErr::Custom("connection reset".into())).code(),
            "persistence_failure"
        );
    }

    #[test]
    fn not_found_message_names_the_entity() {
        let err = ServiceError::not_found(MissingEntity::Plant, 42);
        assert_eq!(err.to_string(), "Plant not found: 42");
    }

    #[test]
    fn insufficient_stock_message_carries_levels() {
        let err = ServiceError::InsufficientStock {
            container_id: 1,
            kind: ResourceKind::PhDown,
            available: 995,
            requested: 1001,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock in container 1: ph_down has 995, requested 1001"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn only_lock_timeouts_are_retryable() {
        let err = ServiceError::LockTimeout {
            resource: "container 7".into(),
            waited_ms: 250,
        };
        assert!(err.is_retryable());
        assert!(!ServiceError::Conflict("dup".into()).is_retryable());
    }

    #[test]
    fn lock_wait_classification_falls_back_to_persistence_failure() {
        let err = ServiceError::from_lock_wait(DbErr::Custom("disk full".into()), "container 1", 5);
        assert_eq!(err.code(), "persistence_failure");

        let err = ServiceError::from_lock_wait(
            DbErr::Custom("canceling statement due to lock timeout".into()),
            "container 1",
            5,
        );
        assert_eq!(err.code(), "lock_timeout");
    }
}
