//! Every metric family a voice agent worker exports.
//!
//! Latency gauges have exactly one writer per label set and merge as
//! last-write-wins. Gauges every worker contributes to (active sessions, running
//! cost) merge as sum-of-latest. Counters are summed.

use crate::registry::{labels, AggregationMode, Labels, MetricDescriptor, MetricsRegistry, RegistryResult};

pub const LLM_DURATION_MS: &str = "llm_duration_ms";
pub const LLM_SMALL_DURATION_MS: &str = "llm_small_duration_ms";
pub const STT_DURATION_MS: &str = "stt_duration_ms";
pub const TTS_DURATION_MS: &str = "tts_duration_ms";
pub const EOU_DELAY_MS: &str = "eou_delay_ms";
pub const TOTAL_CONVERSATION_LATENCY_MS: &str = "total_conversation_latency_ms";
pub const ACTIVE_CONVERSATIONS: &str = "active_conversations";
pub const LLM_COST_TOTAL: &str = "llm_cost_total";
pub const STT_COST_TOTAL: &str = "stt_cost_total";
pub const TTS_COST_TOTAL: &str = "tts_cost_total";
pub const LLM_TOKENS_TOTAL: &str = "llm_tokens_total";
pub const STT_DURATION_SECONDS_TOTAL: &str = "stt_duration_seconds_total";
pub const TTS_CHARS_TOTAL: &str = "tts_chars_total";
pub const TOTAL_TOKENS_TOTAL: &str = "total_tokens_total";
pub const CONVERSATION_TURNS_TOTAL: &str = "conversation_turns_total";

pub fn descriptors() -> Vec<MetricDescriptor> {
    use AggregationMode::{LastWriteWins, SumOfLatest};

    vec![
        // Latency
        MetricDescriptor::gauge(
            LLM_DURATION_MS,
            "LLM time to first token in milliseconds",
            LastWriteWins,
            &["model", "agent_type"],
        ),
        MetricDescriptor::gauge(
            LLM_SMALL_DURATION_MS,
            "Fast LLM time to first token in milliseconds",
            LastWriteWins,
            &["model", "agent_type"],
        ),
        MetricDescriptor::gauge(
            STT_DURATION_MS,
            "Speech-to-text latency in milliseconds",
            LastWriteWins,
            &["provider", "agent_type"],
        ),
        MetricDescriptor::gauge(
            TTS_DURATION_MS,
            "Text-to-speech time to first byte in milliseconds",
            LastWriteWins,
            &["provider", "agent_type"],
        ),
        MetricDescriptor::gauge(
            EOU_DELAY_MS,
            "End-of-utterance delay in milliseconds",
            LastWriteWins,
            &["agent_type"],
        ),
        MetricDescriptor::gauge(
            TOTAL_CONVERSATION_LATENCY_MS,
            "Latest conversation turn latency in milliseconds",
            LastWriteWins,
            &["agent_type"],
        ),
        // Concurrency
        MetricDescriptor::gauge(
            ACTIVE_CONVERSATIONS,
            "Number of active conversations",
            SumOfLatest,
            &["agent_type"],
        ),
        // Cost
        MetricDescriptor::gauge(LLM_COST_TOTAL, "Total LLM cost in USD", SumOfLatest, &["model"]),
        MetricDescriptor::gauge(STT_COST_TOTAL, "Total STT cost in USD", SumOfLatest, &["provider"]),
        MetricDescriptor::gauge(TTS_COST_TOTAL, "Total TTS cost in USD", SumOfLatest, &["provider"]),
        // Usage
        MetricDescriptor::counter(LLM_TOKENS_TOTAL, "Total LLM tokens processed", &["type", "model"]),
        MetricDescriptor::counter(
            STT_DURATION_SECONDS_TOTAL,
            "Total STT audio duration in seconds",
            &["provider"],
        ),
        MetricDescriptor::counter(TTS_CHARS_TOTAL, "Total TTS characters processed", &["provider"]),
        MetricDescriptor::counter(TOTAL_TOKENS_TOTAL, "Total tokens processed", &[]),
        MetricDescriptor::counter(
            CONVERSATION_TURNS_TOTAL,
            "Number of conversation turns",
            &["agent_type", "room"],
        ),
    ]
}

pub fn register_all(registry: &MetricsRegistry) -> RegistryResult<()> {
    for descriptor in descriptors() {
        registry.register(descriptor)?;
    }
    Ok(())
}

/// Label values a worker stamps on its series, fixed by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesLabels {
    pub agent_type: String,
    pub llm_model: String,
    pub fast_llm_model: String,
    pub stt_provider: String,
    pub tts_provider: String,
}

impl SeriesLabels {
    pub fn agent(&self) -> Labels {
        labels(&[("agent_type", self.agent_type.as_str())])
    }

    pub fn llm_latency(&self) -> Labels {
        labels(&[("model", self.llm_model.as_str()), ("agent_type", self.agent_type.as_str())])
    }

    pub fn fast_llm_latency(&self) -> Labels {
        labels(&[("model", self.fast_llm_model.as_str()), ("agent_type", self.agent_type.as_str())])
    }

    pub fn stt_latency(&self) -> Labels {
        labels(&[("provider", self.stt_provider.as_str()), ("agent_type", self.agent_type.as_str())])
    }

    pub fn tts_latency(&self) -> Labels {
        labels(&[("provider", self.tts_provider.as_str()), ("agent_type", self.agent_type.as_str())])
    }

    pub fn llm_tokens(&self, token_type: &str) -> Labels {
        labels(&[("type", token_type), ("model", self.llm_model.as_str())])
    }

    pub fn llm_model(&self) -> Labels {
        labels(&[("model", self.llm_model.as_str())])
    }

    pub fn stt_provider(&self) -> Labels {
        labels(&[("provider", self.stt_provider.as_str())])
    }

    pub fn tts_provider(&self) -> Labels {
        labels(&[("provider", self.tts_provider.as_str())])
    }

    pub fn turns(&self, room: &str) -> Labels {
        labels(&[("agent_type", self.agent_type.as_str()), ("room", room)])
    }
}

/// Pre-register every series whose labels are known at process start, so a
/// scrape shows an explicit zero instead of a missing series.
pub fn preregister_worker_series(registry: &MetricsRegistry, series: &SeriesLabels) -> RegistryResult<()> {
    registry.preregister(LLM_DURATION_MS, &series.llm_latency())?;
    registry.preregister(LLM_SMALL_DURATION_MS, &series.fast_llm_latency())?;
    registry.preregister(STT_DURATION_MS, &series.stt_latency())?;
    registry.preregister(TTS_DURATION_MS, &series.tts_latency())?;
    registry.preregister(EOU_DELAY_MS, &series.agent())?;
    registry.preregister(TOTAL_CONVERSATION_LATENCY_MS, &series.agent())?;
    registry.preregister(ACTIVE_CONVERSATIONS, &series.agent())?;

    registry.preregister(LLM_TOKENS_TOTAL, &series.llm_tokens("prompt"))?;
    registry.preregister(LLM_TOKENS_TOTAL, &series.llm_tokens("completion"))?;
    registry.preregister(STT_DURATION_SECONDS_TOTAL, &series.stt_provider())?;
    registry.preregister(TTS_CHARS_TOTAL, &series.tts_provider())?;
    registry.preregister(TOTAL_TOKENS_TOTAL, &Labels::new())?;

    registry.preregister(LLM_COST_TOTAL, &series.llm_model())?;
    registry.preregister(STT_COST_TOTAL, &series.stt_provider())?;
    registry.preregister(TTS_COST_TOTAL, &series.tts_provider())?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_series_labels() -> SeriesLabels {
    SeriesLabels {
        agent_type: "fast-preresponse".to_string(),
        llm_model: "openai-gpt-4o".to_string(),
        fast_llm_model: "google-gemini-2.5-flash-lite".to_string(),
        stt_provider: "deepgram".to_string(),
        tts_provider: "openai".to_string(),
    }
}
