//! Post-commit change notifications.
//!
//! Publishing happens only after the owning transaction has committed, so a
//! failed publish never undoes or fails the operation. Delivery is
//! at-most-once with no ordering across channels; subscribers must tolerate
//! gaps and duplicates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, DbErr, Statement};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::NotifyBackend;
use crate::directory::Actor;
use crate::models::ChangeKind;

/// Postgres rejects NOTIFY payloads of 8000 bytes or more.
const PG_NOTIFY_MAX_PAYLOAD: usize = 7999;

/// Logical channel, one per entity family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    ContainerUpdated,
    PurchaseLogged,
    DispenseLogged,
    ItemLogged,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::ContainerUpdated => "container-updated",
            Channel::PurchaseLogged => "purchase-logged",
            Channel::DispenseLogged => "dispense-logged",
            Channel::ItemLogged => "item-logged",
        }
    }
}

/// Serializable description of one committed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub id: Uuid,
    pub channel: Channel,
    pub action: ChangeKind,
    pub subject_id: i32,
    pub actor: Actor,
    /// Old/new values keyed by field, or other changed fields.
    pub changes: Map<String, Value>,
    pub published_at: DateTime<Utc>,
}

impl ChangeNotification {
    pub fn new(channel: Channel, action: ChangeKind, subject_id: i32, actor: &Actor) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel,
            action,
            subject_id,
            actor: actor.clone(),
            changes: Map::new(),
            published_at: Utc::now(),
        }
    }

    pub fn with_change(mut self, field: &str, old: Option<i32>, new: Option<i32>) -> Self {
        self.changes
            .insert(field.to_string(), json!({ "old": old, "new": new }));
        self
    }

    pub fn with_field(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.changes.insert(field.to_string(), value.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Payload of {0} bytes exceeds the transport limit")]
    PayloadTooLarge(usize),
}

/// Outcome of a publish attempt. Callers log it; it never becomes an
/// operation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyResult {
    Delivered,
    Failed(String),
}

impl NotifyResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, NotifyResult::Delivered)
    }
}

/// Transport for change notifications.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, notification: &ChangeNotification) -> Result<(), NotifyError>;
}

/// In-process fan-out over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<ChangeNotification>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Publisher for BroadcastPublisher {
    async fn publish(&self, notification: &ChangeNotification) -> Result<(), NotifyError> {
        // No receivers is not a failure: nobody was listening.
        if self.sender.send(notification.clone()).is_err() {
            debug!(
                channel = notification.channel.as_str(),
                "No subscribers for change notification"
            );
        }
        Ok(())
    }
}

/// Publishes through Postgres `pg_notify`, one NOTIFY channel per logical
/// channel.
#[derive(Debug, Clone)]
pub struct PgNotifyPublisher {
    db: Arc<DatabaseConnection>,
}

impl PgNotifyPublisher {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Publisher for PgNotifyPublisher {
    async fn publish(&self, notification: &ChangeNotification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(notification)?;
        if payload.len() > PG_NOTIFY_MAX_PAYLOAD {
            return Err(NotifyError::PayloadTooLarge(payload.len()));
        }
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT pg_notify($1, $2)",
            vec![
                sea_orm::Value::from(notification.channel.as_str()),
                sea_orm::Value::from(payload),
            ],
        );
        self.db.execute(stmt).await?;
        Ok(())
    }
}

/// Drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledPublisher;

#[async_trait]
impl Publisher for DisabledPublisher {
    async fn publish(&self, _notification: &ChangeNotification) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Entry point the services use to publish after commit.
#[derive(Clone)]
pub struct ChangeNotifier {
    publisher: Arc<dyn Publisher>,
    local: Option<BroadcastPublisher>,
}

impl ChangeNotifier {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            local: None,
        }
    }

    pub fn broadcast(capacity: usize) -> Self {
        let publisher = BroadcastPublisher::new(capacity);
        Self {
            publisher: Arc::new(publisher.clone()),
            local: Some(publisher),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledPublisher))
    }

    pub fn from_backend(
        backend: NotifyBackend,
        buffer: usize,
        db: Arc<DatabaseConnection>,
    ) -> Self {
        match backend {
            NotifyBackend::Broadcast => Self::broadcast(buffer),
            NotifyBackend::PgNotify => Self::new(Arc::new(PgNotifyPublisher::new(db))),
            NotifyBackend::Disabled => Self::disabled(),
        }
    }

    /// Receiver for in-process subscribers, when the broadcast backend is in use.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<ChangeNotification>> {
        self.local.as_ref().map(BroadcastPublisher::subscribe)
    }

    pub async fn publish(&self, notification: ChangeNotification) -> NotifyResult {
        let channel = notification.channel.as_str();
        match self.publisher.publish(&notification).await {
            Ok(()) => {
                debug!(
                    channel,
                    notification_id = %notification.id,
                    subject_id = notification.subject_id,
                    "Change notification published"
                );
                NotifyResult::Delivered
            }
            Err(e) => {
                warn!(
                    channel,
                    notification_id = %notification.id,
                    error = %e,
                    "Change notification dropped"
                );
                counter!("ledger.notify.failed", 1, "channel" => channel);
                NotifyResult::Failed(e.to_string())
            }
        }
    }

    /// Publishes independent notifications concurrently.
    pub async fn publish_all(&self, notifications: Vec<ChangeNotification>) -> Vec<NotifyResult> {
        futures::future::join_all(notifications.into_iter().map(|n| self.publish(n))).await
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("local", &self.local.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingPublisher;

    #[async_trait]
    impl Publisher for FailingPublisher {
        async fn publish(&self, _notification: &ChangeNotification) -> Result<(), NotifyError> {
            Err(NotifyError::PayloadTooLarge(9000))
        }
    }

    fn sample() -> ChangeNotification {
        ChangeNotification::new(
            Channel::ContainerUpdated,
            ChangeKind::Usage,
            4,
            &Actor::new(12, "Dana Reyes"),
        )
        .with_change("ph_down", Some(1000), Some(995))
    }

    #[tokio::test]
    async fn broadcast_subscribers_receive_notifications() {
        let notifier = ChangeNotifier::broadcast(8);
        let mut rx = notifier.subscribe().unwrap();

        let result = notifier.publish(sample()).await;
        assert_eq!(result, NotifyResult::Delivered);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.channel, Channel::ContainerUpdated);
        assert_eq!(received.changes["ph_down"], json!({"old": 1000, "new": 995}));
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_still_delivers() {
        let notifier = ChangeNotifier::broadcast(8);
        assert!(notifier.publish(sample()).await.is_delivered());
    }

    #[tokio::test]
    async fn publisher_errors_become_failed_results() {
        let notifier = ChangeNotifier::new(Arc::new(FailingPublisher));
        let results = notifier.publish_all(vec![sample(), sample()]).await;
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| matches!(r, NotifyResult::Failed(reason) if reason.contains("9000"))));
    }

    #[test]
    fn payload_serializes_channel_in_kebab_case() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["channel"], "container-updated");
        assert_eq!(value["action"], "usage");
        assert_eq!(value["actor"]["display_name"], "Dana Reyes");
    }
}
