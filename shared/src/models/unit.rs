//! Unit definitions and dimensional groups

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dimensional group of a unit; conversion across groups is never valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitGroup {
    Mass,
    Volume,
    Count,
}

impl UnitGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitGroup::Mass => "mass",
            UnitGroup::Volume => "volume",
            UnitGroup::Count => "count",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "mass" => Some(UnitGroup::Mass),
            "volume" => Some(UnitGroup::Volume),
            "count" => Some(UnitGroup::Count),
            _ => None,
        }
    }
}

/// A registered unit of measure
///
/// `to_base` is the factor converting one of this unit into the canonical
/// base unit of its dimensional group (grams, millilitres, pieces).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitDefinition {
    pub id: Uuid,
    pub code: String,
    pub group: UnitGroup,
    pub to_base: Decimal,
    pub aliases: Vec<String>,
}

impl UnitDefinition {
    /// Whether `input` names this unit, matching code or aliases
    /// case-insensitively.
    pub fn matches(&self, input: &str) -> bool {
        let needle = input.trim().to_lowercase();
        self.code.to_lowercase() == needle
            || self.aliases.iter().any(|a| a.to_lowercase() == needle)
    }
}
