//! Emergency categories.
//!
//! Each category routes a report to its own interview schema and authority
//! queue. The set is fixed at compile time but the per-category behavior is
//! data-driven (see `crate::schema`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The fixed set of emergency types the triage step can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Health emergencies: injuries, illnesses, ambulance needs
    Medical,

    /// Security emergencies: crimes, theft, violence
    Police,

    /// Power emergencies: outages, electrical hazards
    Electricity,

    /// Fires and fire hazards
    Fire,
}

impl Category {
    /// All categories, in the order they are presented to the citizen.
    pub const ALL: [Category; 4] = [
        Category::Medical,
        Category::Police,
        Category::Electricity,
        Category::Fire,
    ];

    /// Stable lowercase name used in storage, event ids, and the wire format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Medical => "medical",
            Category::Police => "police",
            Category::Electricity => "electricity",
            Category::Fire => "fire",
        }
    }

    /// The authority queue that receives cases of this category.
    pub fn authority_queue(&self) -> String {
        format!("authority:{}", self.as_str())
    }

    /// The literal menu shown when classification stays below the
    /// confidence threshold.
    pub fn menu() -> String {
        let names: Vec<&str> = Self::ALL.iter().map(|c| c.as_str()).collect();
        format!(
            "I couldn't tell what kind of emergency this is. Please pick one: {}.",
            names.join(", ")
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "medical" => Ok(Category::Medical),
            "police" => Ok(Category::Police),
            "electricity" => Ok(Category::Electricity),
            "fire" => Ok(Category::Fire),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

/// Returned when a label does not name any known category.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown emergency category: {0}")]
pub struct UnknownCategory(pub String);
