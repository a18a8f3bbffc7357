//! Mutable per-person state: status, long/short-term memory, relations.
//! Memories are immutable once written; short-term memory is a capped ring.

use chrono::{DateTime, Utc};

use crate::attrs::PersonAttr;

/// Marker in a relation description that is substituted with the previous
/// description when re-setting a relation, so a new description can extend
/// the old one instead of discarding it.
pub const OLD_DESCRIPTION_MARKER: &str = "<old>";

const DEFAULT_RELATION: &str = "acquaintance";

/// One timestamped memory. Content never changes after recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    pub time: DateTime<Utc>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PersonStatus {
    #[default]
    Idle,
    AtWork,
    Conversing,
    Studying,
    Resting,
    Custom(String),
}

impl PersonStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Idle => "idle",
            Self::AtWork => "at work",
            Self::Conversing => "conversing",
            Self::Studying => "studying",
            Self::Resting => "resting",
            Self::Custom(s) => s,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "idle" => Self::Idle,
            "at work" => Self::AtWork,
            "conversing" => Self::Conversing,
            "studying" => Self::Studying,
            "resting" => Self::Resting,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// A directed relation from the owning person to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonRelation {
    pub target: String,
    pub relation: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersonState {
    pub attr: PersonAttr,
    pub status: PersonStatus,
    pub long_memory: Vec<Memory>,
    pub short_memory: Vec<Memory>,
    pub relations: Vec<PersonRelation>,
}

impl PersonState {
    /// Fresh person: memory seeds from the attributes become live memories
    /// stamped with the current clock.
    pub fn new(attr: PersonAttr, now: DateTime<Utc>) -> Self {
        let mut state = Self::from_attr(attr);
        for content in state.attr.long_memory_seeds.clone() {
            state.long_memory.push(Memory { time: now, content });
        }
        for content in state.attr.short_memory_seeds.clone() {
            state.short_memory.push(Memory { time: now, content });
        }
        state
    }

    /// Bare state for snapshot loading; live memories are restored separately.
    pub fn from_attr(attr: PersonAttr) -> Self {
        Self {
            attr,
            status: PersonStatus::Idle,
            long_memory: Vec::new(),
            short_memory: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.attr.name
    }

    pub fn remember_long(&mut self, now: DateTime<Utc>, content: impl Into<String>) {
        self.long_memory.push(Memory {
            time: now,
            content: content.into(),
        });
    }

    /// Short-term memory keeps at most `cap` entries, dropping the oldest.
    pub fn remember_short(&mut self, now: DateTime<Utc>, content: impl Into<String>, cap: usize) {
        self.short_memory.push(Memory {
            time: now,
            content: content.into(),
        });
        if self.short_memory.len() > cap {
            let overflow = self.short_memory.len() - cap;
            self.short_memory.drain(..overflow);
        }
    }

    pub fn relation(&self, target: &str) -> Option<&PersonRelation> {
        self.relations.iter().find(|r| r.target == target)
    }

    /// Set or replace the relation to `target`. An `<old>` marker in the new
    /// description is substituted with the previous description (empty string
    /// when the relation did not exist).
    pub fn set_relation(&mut self, target: &str, relation: &str, description: &str) {
        let previous = self
            .relation(target)
            .map(|r| r.description.clone())
            .unwrap_or_default();
        let description = description.replace(OLD_DESCRIPTION_MARKER, &previous);
        match self.relations.iter_mut().find(|r| r.target == target) {
            Some(existing) => {
                existing.relation = relation.to_string();
                existing.description = description;
            }
            None => self.relations.push(PersonRelation {
                target: target.to_string(),
                relation: relation.to_string(),
                description,
            }),
        }
    }

    /// Append a note to the relation description, creating the relation as a
    /// plain acquaintance when none exists yet.
    pub fn describe_relation(&mut self, target: &str, note: &str) {
        match self.relations.iter_mut().find(|r| r.target == target) {
            Some(existing) => {
                if existing.description.is_empty() {
                    existing.description = note.to_string();
                } else {
                    existing.description.push_str("; ");
                    existing.description.push_str(note);
                }
            }
            None => self.relations.push(PersonRelation {
                target: target.to_string(),
                relation: DEFAULT_RELATION.to_string(),
                description: note.to_string(),
            }),
        }
    }

    /// Memories, long-term then short-term, whose content contains `filter`.
    /// An empty filter returns everything.
    pub fn recall(&self, filter: &str) -> Vec<&Memory> {
        self.long_memory
            .iter()
            .chain(self.short_memory.iter())
            .filter(|m| filter.is_empty() || m.content.contains(filter))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(name: &str) -> PersonState {
        PersonState::from_attr(PersonAttr {
            name: name.into(),
            ..Default::default()
        })
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    #[test]
    fn seeds_become_memories_on_creation() {
        let attr = PersonAttr {
            name: "Ada".into(),
            long_memory_seeds: vec!["grew up by the sea".into()],
            short_memory_seeds: vec!["hungry".into()],
            ..Default::default()
        };
        let state = PersonState::new(attr, t0());
        assert_eq!(state.long_memory.len(), 1);
        assert_eq!(state.short_memory.len(), 1);
        assert_eq!(state.long_memory[0].time, t0());
    }

    #[test]
    fn short_memory_drops_oldest_beyond_cap() {
        let mut state = person("Ada");
        for i in 0..5 {
            state.remember_short(t0(), format!("note {i}"), 3);
        }
        let contents: Vec<&str> = state.short_memory.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["note 2", "note 3", "note 4"]);
    }

    #[test]
    fn set_relation_substitutes_old_marker() {
        let mut state = person("Ada");
        state.set_relation("Bob", "friend", "met at the library");
        state.set_relation("Bob", "close friend", "<old>, then travelled together");
        let rel = state.relation("Bob").unwrap();
        assert_eq!(rel.relation, "close friend");
        assert_eq!(rel.description, "met at the library, then travelled together");
    }

    #[test]
    fn old_marker_on_fresh_relation_becomes_empty() {
        let mut state = person("Ada");
        state.set_relation("Bob", "stranger", "<old>first sight");
        assert_eq!(state.relation("Bob").unwrap().description, "first sight");
    }

    #[test]
    fn describe_relation_appends_and_defaults_to_acquaintance() {
        let mut state = person("Ada");
        state.describe_relation("Bob", "lent me a book");
        let rel = state.relation("Bob").unwrap();
        assert_eq!(rel.relation, "acquaintance");
        assert_eq!(rel.description, "lent me a book");

        state.describe_relation("Bob", "returned it");
        assert_eq!(
            state.relation("Bob").unwrap().description,
            "lent me a book; returned it"
        );
    }

    #[test]
    fn recall_filters_across_both_memories() {
        let mut state = person("Ada");
        state.remember_long(t0(), "the sea was calm");
        state.remember_short(t0(), "sea breeze today", 10);
        state.remember_short(t0(), "bought bread", 10);

        assert_eq!(state.recall("sea").len(), 2);
        assert_eq!(state.recall("").len(), 3);
        assert!(state.recall("mountain").is_empty());
    }
}
