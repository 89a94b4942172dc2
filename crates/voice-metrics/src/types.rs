use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cumulative usage for one session. Every field only grows while the
/// session's counters are intact.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageSummary {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub stt_seconds: f64,
    pub tts_characters: u64,
}

impl UsageSummary {
    pub fn new(prompt_tokens: u64, completion_tokens: u64, stt_seconds: f64, tts_characters: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            stt_seconds,
            tts_characters,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UsageField {
    PromptTokens,
    CompletionTokens,
    SttSeconds,
    TtsCharacters,
}

impl UsageField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PromptTokens => "prompt_tokens",
            Self::CompletionTokens => "completion_tokens",
            Self::SttSeconds => "stt_seconds",
            Self::TtsCharacters => "tts_characters",
        }
    }
}

/// Non-negative difference between two consecutive usage summaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageDelta {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub stt_seconds: f64,
    pub tts_characters: u64,
    /// Fields whose raw delta was negative and got clamped to zero.
    pub clamped: Vec<UsageField>,
}

impl UsageDelta {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn is_zero(&self) -> bool {
        self.prompt_tokens == 0
            && self.completion_tokens == 0
            && self.stt_seconds == 0.0
            && self.tts_characters == 0
    }

    pub fn is_clamped(&self) -> bool {
        !self.clamped.is_empty()
    }
}

/// Running cost per modality, in USD.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CostBreakdown {
    pub llm: f64,
    pub stt: f64,
    pub tts: f64,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.llm + self.stt + self.tts
    }
}

/// Latency of one completed conversational turn, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnLatency {
    pub turn_id: u64,
    pub eou_delay_ms: f64,
    pub llm_ttft_ms: f64,
    pub tts_ttfb_ms: f64,
    pub total_latency_ms: f64,
    pub completed_at: DateTime<Utc>,
}

/// Final record flushed when a session shuts down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub agent_type: String,
    pub room: String,
    pub turns: u64,
    pub usage: UsageSummary,
    pub cost: CostBreakdown,
    pub total_cost: f64,
    pub finished_at: DateTime<Utc>,
}
