//! Typed attribute structs, one per world entity subtype. Validation runs
//! only at the serialization boundary; inside the kernel these are plain
//! data.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Attributes of the root scene.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SceneAttr {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Attributes of a person agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PersonAttr {
    pub name: String,
    #[serde(default)]
    pub sex: String,
    /// `YYYY-MM-DD`, validated on load.
    #[serde(default)]
    pub birth_date: String,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub iq: u32,
    #[serde(default)]
    pub stamina: u32,
    #[serde(default)]
    pub luck: u32,
    #[serde(default)]
    pub personality: Vec<String>,
    #[serde(default)]
    pub occupation: String,
    #[serde(default)]
    pub hobbies: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub backstory: String,
    #[serde(default)]
    pub emotion: String,
    #[serde(default)]
    pub hunger: u32,
    /// Initial long-term memories, applied once when the person is first
    /// placed into a fresh world. Snapshots carry live memories separately.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub long_memory_seeds: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub short_memory_seeds: Vec<String>,
}

impl PersonAttr {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("person name must not be empty".to_string());
        }
        if !self.birth_date.is_empty()
            && NaiveDate::parse_from_str(&self.birth_date, "%Y-%m-%d").is_err()
        {
            return Err(format!(
                "birth date must be YYYY-MM-DD, got {:?}",
                self.birth_date
            ));
        }
        Ok(())
    }

    /// Multi-line first-person identity block for prompt construction.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("name: {}", self.name)];
        if !self.sex.is_empty() {
            lines.push(format!("sex: {}", self.sex));
        }
        if !self.birth_date.is_empty() {
            lines.push(format!("born: {}", self.birth_date));
        }
        if !self.occupation.is_empty() {
            lines.push(format!("occupation: {}", self.occupation));
        }
        if !self.personality.is_empty() {
            lines.push(format!("personality: {}", self.personality.join(", ")));
        }
        if !self.hobbies.is_empty() {
            lines.push(format!("hobbies: {}", self.hobbies.join(", ")));
        }
        if !self.skills.is_empty() {
            lines.push(format!("skills: {}", self.skills.join(", ")));
        }
        if !self.emotion.is_empty() {
            lines.push(format!("current emotion: {}", self.emotion));
        }
        if !self.backstory.is_empty() {
            lines.push(format!("backstory: {}", self.backstory));
        }
        lines.join("\n")
    }
}

/// Attributes of a house environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HouseAttr {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub area: f64,
    #[serde(default)]
    pub layout: String,
    #[serde(default)]
    pub facing: String,
    #[serde(default)]
    pub description: String,
}

/// Attributes of a room environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RoomAttr {
    #[serde(default)]
    pub house: String,
    pub name: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub description: String,
}

/// Attributes of a furniture object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FurnitureAttr {
    #[serde(default)]
    pub room: String,
    pub name: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub placement: String,
    #[serde(default)]
    pub description: String,
}
