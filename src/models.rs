use crate::error::CallError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topic assigned when no override or classifier can place a prompt
pub const UNCLASSIFIED_TOPIC: &str = "unclassified";

/// One entry of the prompt source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub prompt_id: String,
    pub prompt_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_hint: Option<String>,
}

/// Identity of a unit of work; unique within a collection run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId {
    pub prompt_id: String,
    pub model_name: String,
    pub repetition_index: u32,
}

/// One (prompt, model, repetition) combination to run against the generation capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub prompt_id: String,
    pub prompt_text: String,
    pub topic_hint: Option<String>,
    pub model_name: String,
    pub repetition_index: u32,
}

impl WorkUnit {
    pub fn id(&self) -> UnitId {
        UnitId {
            prompt_id: self.prompt_id.clone(),
            model_name: self.model_name.clone(),
            repetition_index: self.repetition_index,
        }
    }
}

/// Token accounting returned by the generation API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Terminal outcome of a work unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome {
    Success { text: String },
    Failure { error: CallError },
}

/// A single line of the response log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub prompt_id: String,
    pub model_name: String,
    pub repetition_index: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
}

impl ResponseRecord {
    /// Start a record for `unit`; outcome-specific fields are filled by the caller
    pub fn for_unit(unit: &WorkUnit, outcome: Outcome) -> Self {
        Self {
            prompt_id: unit.prompt_id.clone(),
            model_name: unit.model_name.clone(),
            repetition_index: unit.repetition_index,
            timestamp: Utc::now(),
            prompt_text: Some(unit.prompt_text.clone()),
            topic: unit.topic_hint.clone(),
            outcome,
            latency_ms: None,
            usage: None,
            attempts: None,
            dry_run: false,
        }
    }

    pub fn id(&self) -> UnitId {
        UnitId {
            prompt_id: self.prompt_id.clone(),
            model_name: self.model_name.clone(),
            repetition_index: self.repetition_index,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    /// Response text when the call succeeded and produced something
    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success { text } if !text.trim().is_empty() => Some(text),
            _ => None,
        }
    }
}

/// Partition key used to summarise the canonical dataset
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupKey {
    pub topic: String,
    pub model_name: String,
}
