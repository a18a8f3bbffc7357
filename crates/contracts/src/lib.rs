//! v1 cross-boundary contracts shared by the sim kernel, API, and persistence.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SCHEMA_VERSION_V1: &str = "1.0";

// ---------------------------------------------------------------------------
// Model interface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One role-tagged message in a model conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Failure of the external language-model call. Carries an HTTP-like status
/// so callers can distinguish timeouts from service errors without inspecting
/// provider-specific payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCallFailure {
    pub status: u16,
    pub message: String,
}

impl ModelCallFailure {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(408, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(503, message)
    }
}

impl fmt::Display for ModelCallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model call failed ({}): {}", self.status, self.message)
    }
}

impl std::error::Error for ModelCallFailure {}

// ---------------------------------------------------------------------------
// Game log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Player,
    System,
    Event,
    Overseer,
}

impl LogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::System => "system",
            Self::Event => "event",
            Self::Overseer => "overseer",
        }
    }
}

impl std::str::FromStr for LogKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "player" => Ok(Self::Player),
            "system" => Ok(Self::System),
            "event" => Ok(Self::Event),
            "overseer" => Ok(Self::Overseer),
            other => Err(format!("unknown log kind: {other}")),
        }
    }
}

/// One append-only game log entry. Entries are produced for every dispatched
/// event and consumed, newest first, to build turn context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub id: u64,
    pub time: DateTime<Utc>,
    pub kind: LogKind,
    pub source: String,
    pub targets: Vec<String>,
    pub message: String,
}

// ---------------------------------------------------------------------------
// World lifecycle and configuration
// ---------------------------------------------------------------------------

/// Coarse lifecycle stage of a world.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    NotStarted,
    AgentsActing,
    AgentsDone,
    EffectsApplying,
    EffectsApplied,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameConfig {
    pub schema_version: String,
    /// How many recent log entries a turn context carries.
    pub turn_log_window: usize,
    /// Corrective follow-up turns after a malformed or empty reply.
    pub max_turn_retries: u32,
    /// Simulated seconds before a spoken-to person takes their turn.
    pub speak_delay_secs: i64,
    /// Simulated seconds a move takes before the arrival notice lands.
    pub travel_secs: i64,
    /// Short-term memories kept per person; oldest dropped beyond this.
    pub short_memory_cap: usize,
    pub model_temperature: f32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            turn_log_window: 20,
            max_turn_retries: 1,
            speak_delay_secs: 30,
            travel_secs: 60,
            short_memory_cap: 64,
            model_temperature: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Serialized world structural form
// ---------------------------------------------------------------------------

/// Wire form of an environment: `(type tag, attribute bag, children)`.
/// The root node additionally carries `time` (epoch millis) and `stage`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvNode {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub attr: Value,
    pub objs: Vec<ObjNode>,
    pub objd: Vec<ObjNode>,
    pub senv: Vec<EnvNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
}

/// Wire form of an object. Person nodes carry status, memory, and relation
/// blocks; other kinds leave them out entirely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjNode {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub attr: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ltm: Option<Vec<MemoryNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stm: Option<Vec<MemoryNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<Vec<RelationNode>>,
}

/// Wire form of one timestamped memory: `t` epoch millis, `c` content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryNode {
    pub t: i64,
    pub c: String,
}

/// Wire form of one person relation: target, relation kind, description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationNode {
    pub t: String,
    pub r: String,
    pub d: String,
}

// ---------------------------------------------------------------------------
// API error envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    GameNotFound,
    InvalidQuery,
    InvalidCommand,
    SchemaViolation,
    ModelUnavailable,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}
