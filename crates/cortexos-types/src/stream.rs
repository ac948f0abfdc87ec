use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    PipelineStart,
    PipelineComplete,
    PipelineError,
    StageEnter,
    StageProgress,
    StageExit,
    AgentChunk,
    AgentToolCall,
    AgentThinking,
    QualityGateStart,
    QualityGateResult,
    MemoryRecallResult,
    CostUpdate,
    Heartbeat,
}

impl StreamEventType {
    pub fn wire_name(&self) -> &'static str {
        match self {
            StreamEventType::PipelineStart => "pipeline:start",
            StreamEventType::PipelineComplete => "pipeline:complete",
            StreamEventType::PipelineError => "pipeline:error",
            StreamEventType::StageEnter => "stage:enter",
            StreamEventType::StageProgress => "stage:progress",
            StreamEventType::StageExit => "stage:exit",
            StreamEventType::AgentChunk => "agent:chunk",
            StreamEventType::AgentToolCall => "agent:tool_call",
            StreamEventType::AgentThinking => "agent:thinking",
            StreamEventType::QualityGateStart => "quality:gate_start",
            StreamEventType::QualityGateResult => "quality:gate_result",
            StreamEventType::MemoryRecallResult => "memory:recall_result",
            StreamEventType::CostUpdate => "cost:update",
            StreamEventType::Heartbeat => "heartbeat",
        }
    }
}

/// An event as seen by external stream consumers (SSE, pull API).
///
/// `sequence` is monotonically increasing within a single controller;
/// ordering is preserved for every push and pull consumer (P4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}
