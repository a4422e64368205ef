//! Closed vocabularies shared by the entities, services and notifications.

use crate::entities::inventory_container;
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One of the four consumables a container tracks.
///
/// Parsing accepts both the storage names (`ph_up`) and the labels shown to
/// growers (`pH Up`, `Nutrient A`), ignoring case and surrounding whitespace.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum ResourceKind {
    #[sea_orm(string_value = "ph_up")]
    #[strum(to_string = "ph_up", serialize = "pH Up", serialize = "ph-up")]
    PhUp,
    #[sea_orm(string_value = "ph_down")]
    #[strum(to_string = "ph_down", serialize = "pH Down", serialize = "ph-down")]
    PhDown,
    #[sea_orm(string_value = "solution_a")]
    #[strum(
        to_string = "solution_a",
        serialize = "Nutrient A",
        serialize = "Solution A",
        serialize = "nutrient_a"
    )]
    SolutionA,
    #[sea_orm(string_value = "solution_b")]
    #[strum(
        to_string = "solution_b",
        serialize = "Nutrient B",
        serialize = "Solution B",
        serialize = "nutrient_b"
    )]
    SolutionB,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::PhUp,
        ResourceKind::PhDown,
        ResourceKind::SolutionA,
        ResourceKind::SolutionB,
    ];

    /// Parses user input, trimming whitespace first.
    pub fn parse(input: &str) -> Option<Self> {
        Self::from_str(input.trim()).ok()
    }

    /// Label used in descriptions and dispense records.
    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::PhUp => "pH Up",
            ResourceKind::PhDown => "pH Down",
            ResourceKind::SolutionA => "Nutrient A",
            ResourceKind::SolutionB => "Nutrient B",
        }
    }

    /// Container column name, also used as the audit `field`.
    pub fn column_name(self) -> &'static str {
        match self {
            ResourceKind::PhUp => "ph_up",
            ResourceKind::PhDown => "ph_down",
            ResourceKind::SolutionA => "solution_a",
            ResourceKind::SolutionB => "solution_b",
        }
    }

    /// Current level of this kind in a container.
    pub fn level(self, container: &inventory_container::Model) -> i32 {
        match self {
            ResourceKind::PhUp => container.ph_up,
            ResourceKind::PhDown => container.ph_down,
            ResourceKind::SolutionA => container.solution_a,
            ResourceKind::SolutionB => container.solution_b,
        }
    }

    pub fn set_level(self, container: &mut inventory_container::ActiveModel, value: i32) {
        match self {
            ResourceKind::PhUp => container.ph_up = Set(value),
            ResourceKind::PhDown => container.ph_down = Set(value),
            ResourceKind::SolutionA => container.solution_a = Set(value),
            ResourceKind::SolutionB => container.solution_b = Set(value),
        }
    }
}

/// What an audit entry records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    #[sea_orm(string_value = "create")]
    Create,
    #[sea_orm(string_value = "update")]
    Update,
    #[sea_orm(string_value = "delete")]
    Delete,
    #[sea_orm(string_value = "add_stock")]
    AddStock,
    #[sea_orm(string_value = "usage")]
    Usage,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
            ChangeKind::AddStock => "add_stock",
            ChangeKind::Usage => "usage",
        }
    }
}

/// Record family an audit entry belongs to. Each family has its own log table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Container,
    Purchase,
    Dispense,
    Item,
}

impl SubjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectKind::Container => "container",
            SubjectKind::Purchase => "purchase",
            SubjectKind::Dispense => "dispense",
            SubjectKind::Item => "item",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ph_up", ResourceKind::PhUp)]
    #[case("pH Up", ResourceKind::PhUp)]
    #[case("  PH DOWN ", ResourceKind::PhDown)]
    #[case("Nutrient A", ResourceKind::SolutionA)]
    #[case("solution_a", ResourceKind::SolutionA)]
    #[case("Solution B", ResourceKind::SolutionB)]
    fn parses_storage_names_and_labels(#[case] input: &str, #[case] expected: ResourceKind) {
        assert_eq!(ResourceKind::parse(input), Some(expected));
    }

    #[rstest]
    #[case("")]
    #[case("fertilizer")]
    #[case("ph")]
    fn rejects_unknown_kinds(#[case] input: &str) {
        assert_eq!(ResourceKind::parse(input), None);
    }

    #[test]
    fn accessor_and_mutator_address_the_same_field() {
        let container = inventory_container::Model {
            id: 1,
            greenhouse_id: 8,
            ph_up: 1,
            ph_down: 2,
            solution_a: 3,
            solution_b: 4,
            critical_level: 0,
            created_at: chrono::Utc::now(),
            updated_at: None,
        };
        for kind in ResourceKind::ALL {
            let mut active: inventory_container::ActiveModel = container.clone().into();
            kind.set_level(&mut active, 99);
            let expected = Set(99);
            let actual = match kind {
                ResourceKind::PhUp => active.ph_up,
                ResourceKind::PhDown => active.ph_down,
                ResourceKind::SolutionA => active.solution_a,
                ResourceKind::SolutionB => active.solution_b,
            };
            assert_eq!(actual, expected);
        }
        assert_eq!(ResourceKind::SolutionB.level(&container), 4);
    }

    #[test]
    fn display_uses_storage_name() {
        assert_eq!(ResourceKind::PhDown.to_string(), "ph_down");
        assert_eq!(ResourceKind::PhDown.label(), "pH Down");
        assert_eq!(ChangeKind::AddStock.as_str(), "add_stock");
    }
}
