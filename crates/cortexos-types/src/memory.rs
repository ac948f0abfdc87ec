use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Cleared at the end of the plan execution that created it.
    Working,
    /// Durable facts and conventions, persisted across runs.
    Semantic,
    /// A log of what happened when, for later recall.
    Episodic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub importance: f64,
    pub accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub decay_factor: f64,
}

impl MemoryMetadata {
    pub const DEFAULT_DECAY_FACTOR: f64 = 0.98;
    pub const PROTECTED_THRESHOLD: f64 = 0.9;

    pub fn new(importance: f64) -> Self {
        Self {
            importance: importance.clamp(0.0, 1.0),
            accessed_at: Utc::now(),
            access_count: 0,
            decay_factor: Self::DEFAULT_DECAY_FACTOR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub content: String,
    pub metadata: MemoryMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}
