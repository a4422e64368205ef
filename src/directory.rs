//! Lookups the ledger needs from the rest of the greenhouse system.
//!
//! Greenhouses, plants and user accounts are owned elsewhere; the ledger only
//! asks whether they exist and who an actor is.

use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Identifier callers pass for automated dosing.
pub const AUTO_ACTOR_IDENTIFIER: &str = "auto";

/// Who is attributed with a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: i32,
    pub display_name: String,
}

impl Actor {
    pub fn new(id: i32, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }

    /// The automated dosing process.
    pub fn system() -> Self {
        Self::new(0, "Auto")
    }

    pub fn is_system(&self) -> bool {
        self.id == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plant {
    pub id: i32,
    pub name: String,
    pub greenhouse_id: i32,
}

#[async_trait]
pub trait GreenhouseDirectory: Send + Sync {
    async fn greenhouse_exists(&self, greenhouse_id: i32) -> Result<bool, ServiceError>;

    async fn get_plant(&self, plant_id: i32) -> Result<Option<Plant>, ServiceError>;

    /// Looks up a user by login identifier (case-insensitive).
    async fn resolve_actor(&self, identifier: &str) -> Result<Option<Actor>, ServiceError>;
}

/// Resolves an actor identifier, mapping `auto` to the system actor.
pub async fn resolve_actor_or_system(
    directory: &dyn GreenhouseDirectory,
    identifier: &str,
) -> Result<Actor, ServiceError> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(ServiceError::ValidationError(
            "Actor identifier is required".to_string(),
        ));
    }
    if identifier.eq_ignore_ascii_case(AUTO_ACTOR_IDENTIFIER) {
        return Ok(Actor::system());
    }
    directory
        .resolve_actor(identifier)
        .await?
        .ok_or_else(|| ServiceError::not_found(crate::errors::MissingEntity::Actor, identifier))
}

/// Fixed directory held in memory, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    greenhouses: HashSet<i32>,
    plants: HashMap<i32, Plant>,
    actors: HashMap<String, Actor>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_greenhouse(mut self, greenhouse_id: i32) -> Self {
        self.greenhouses.insert(greenhouse_id);
        self
    }

    pub fn with_plant(mut self, id: i32, name: impl Into<String>, greenhouse_id: i32) -> Self {
        self.greenhouses.insert(greenhouse_id);
        self.plants.insert(
            id,
            Plant {
                id,
                name: name.into(),
                greenhouse_id,
            },
        );
        self
    }

    pub fn with_actor(mut self, identifier: &str, actor: Actor) -> Self {
        self.actors.insert(identifier.to_lowercase(), actor);
        self
    }
}

#[async_trait]
impl GreenhouseDirectory for StaticDirectory {
    async fn greenhouse_exists(&self, greenhouse_id: i32) -> Result<bool, ServiceError> {
        Ok(self.greenhouses.contains(&greenhouse_id))
    }

    async fn get_plant(&self, plant_id: i32) -> Result<Option<Plant>, ServiceError> {
        Ok(self.plants.get(&plant_id).cloned())
    }

    async fn resolve_actor(&self, identifier: &str) -> Result<Option<Actor>, ServiceError> {
        Ok(self.actors.get(&identifier.to_lowercase()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn directory() -> StaticDirectory {
        StaticDirectory::new()
            .with_plant(3, "Lettuce", 8)
            .with_actor("grower@example.com", Actor::new(12, "Dana Reyes"))
    }

    #[tokio::test]
    async fn auto_resolves_to_system_actor() {
        let actor = resolve_actor_or_system(&directory(), " AUTO ").await.unwrap();
        assert!(actor.is_system());
        assert_eq!(actor.display_name, "Auto");
    }

    #[tokio::test]
    async fn actor_lookup_ignores_case() {
        let actor = resolve_actor_or_system(&directory(), "Grower@Example.com")
            .await
            .unwrap();
        assert_eq!(actor.id, 12);
    }

    #[tokio::test]
    async fn unknown_and_blank_actors_are_rejected() {
        assert_matches!(
            resolve_actor_or_system(&directory(), "nobody@example.com").await,
            Err(ServiceError::NotFound { .. })
        );
        assert_matches!(
            resolve_actor_or_system(&directory(), "   ").await,
            Err(ServiceError::ValidationError(_))
        );
    }

    #[tokio::test]
    async fn plants_register_their_greenhouse() {
        let dir = directory();
        assert!(dir.greenhouse_exists(8).await.unwrap());
        assert_eq!(dir.get_plant(3).await.unwrap().unwrap().greenhouse_id, 8);
        assert!(dir.get_plant(4).await.unwrap().is_none());
    }
}
