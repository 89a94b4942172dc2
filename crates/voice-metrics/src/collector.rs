use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;

use crate::catalog::{self, SeriesLabels};
use crate::correlator::TurnLatencyCorrelator;
use crate::cost::CostEstimator;
use crate::events::MetricEvent;
use crate::registry::{Labels, MetricsRegistry, RegistryResult};
use crate::types::{CostBreakdown, SessionSummary, TurnLatency, UsageDelta, UsageSummary};
use crate::usage::{UsageCollector, UsageDeltaAccumulator};

/// Turns one session's event stream into registry updates.
///
/// Runs on the session's single event-handling path, so it takes `&mut self`
/// and does no locking of its own.
pub struct MetricsCollector {
    registry: Arc<MetricsRegistry>,
    series: SeriesLabels,
    room: String,
    estimator: CostEstimator,
    correlator: TurnLatencyCorrelator,
    usage: UsageCollector,
    deltas: UsageDeltaAccumulator,
    cost: CostBreakdown,
}

impl MetricsCollector {
    pub fn new(
        registry: Arc<MetricsRegistry>,
        series: SeriesLabels,
        room: impl Into<String>,
        estimator: CostEstimator,
    ) -> RegistryResult<Self> {
        let room = room.into();
        registry.preregister(catalog::CONVERSATION_TURNS_TOTAL, &series.turns(&room))?;

        Ok(Self {
            registry,
            series,
            room,
            estimator,
            correlator: TurnLatencyCorrelator::new(),
            usage: UsageCollector::new(),
            deltas: UsageDeltaAccumulator::new(),
            cost: CostBreakdown::default(),
        })
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Last cumulative usage applied to the registry.
    pub fn usage(&self) -> UsageSummary {
        self.deltas.last()
    }

    pub fn cost(&self) -> CostBreakdown {
        self.cost
    }

    pub fn turns(&self) -> u64 {
        self.correlator.last_turn_id()
    }

    /// Handle one pipeline event. Returns the turn latency when the event
    /// completed a turn.
    pub fn handle_event(&mut self, event: &MetricEvent) -> Option<TurnLatency> {
        if matches!(event, MetricEvent::Unknown) {
            debug!("ignoring unknown metrics event");
            return None;
        }

        self.update_usage(event);
        self.update_latency(event)
    }

    /// Record time to first byte of the fast pre-response model.
    pub fn record_fast_response(&self, ttfb_ms: f64) {
        record_fast_response(&self.registry, &self.series, ttfb_ms);
    }

    /// Flush the final usage and cost of the session.
    pub fn finish(self) -> SessionSummary {
        let summary = self.deltas.last();
        let session = SessionSummary {
            agent_type: self.series.agent_type.clone(),
            room: self.room.clone(),
            turns: self.correlator.last_turn_id(),
            usage: summary,
            cost: self.cost,
            total_cost: self.cost.total(),
            finished_at: Utc::now(),
        };
        log_record("Session Summary", &session);
        session
    }

    fn update_usage(&mut self, event: &MetricEvent) {
        if self.usage.collect(event) {
            let summary = self.usage.summary();
            self.apply_usage(summary);
        }
    }

    fn apply_usage(&mut self, summary: UsageSummary) {
        let delta = self.deltas.update(summary);
        self.apply_delta(&delta);

        self.cost = self.estimator.estimate(&summary);
        self.write(self.registry.set(catalog::LLM_COST_TOTAL, &self.series.llm_model(), self.cost.llm));
        self.write(self.registry.set(catalog::STT_COST_TOTAL, &self.series.stt_provider(), self.cost.stt));
        self.write(self.registry.set(catalog::TTS_COST_TOTAL, &self.series.tts_provider(), self.cost.tts));

        log_record(
            "Updated cost metrics",
            &serde_json::json!({
                "prompt_tokens": summary.prompt_tokens,
                "completion_tokens": summary.completion_tokens,
                "stt_seconds": summary.stt_seconds,
                "tts_characters": summary.tts_characters,
                "llm_cost": self.cost.llm,
                "stt_cost": self.cost.stt,
                "tts_cost": self.cost.tts,
                "total_cost": self.cost.total(),
                "timestamp": Utc::now(),
            }),
        );
    }

    fn apply_delta(&self, delta: &UsageDelta) {
        if delta.prompt_tokens > 0 {
            self.write(self.registry.inc(
                catalog::LLM_TOKENS_TOTAL,
                &self.series.llm_tokens("prompt"),
                delta.prompt_tokens as f64,
            ));
        }
        if delta.completion_tokens > 0 {
            self.write(self.registry.inc(
                catalog::LLM_TOKENS_TOTAL,
                &self.series.llm_tokens("completion"),
                delta.completion_tokens as f64,
            ));
        }
        if delta.total_tokens() > 0 {
            self.write(self.registry.inc(
                catalog::TOTAL_TOKENS_TOTAL,
                &Labels::new(),
                delta.total_tokens() as f64,
            ));
        }
        if delta.stt_seconds > 0.0 {
            self.write(self.registry.inc(
                catalog::STT_DURATION_SECONDS_TOTAL,
                &self.series.stt_provider(),
                delta.stt_seconds,
            ));
        }
        if delta.tts_characters > 0 {
            self.write(self.registry.inc(
                catalog::TTS_CHARS_TOTAL,
                &self.series.tts_provider(),
                delta.tts_characters as f64,
            ));
        }
    }

    fn update_latency(&mut self, event: &MetricEvent) -> Option<TurnLatency> {
        match event {
            MetricEvent::EndOfUtterance {
                delay,
                transcription_delay,
                turn_completed_delay,
                speech_id,
            } => {
                self.write(self.registry.inc(
                    catalog::CONVERSATION_TURNS_TOTAL,
                    &self.series.turns(&self.room),
                    1.0,
                ));
                self.write(self.registry.set(catalog::EOU_DELAY_MS, &self.series.agent(), delay * 1000.0));
                log_record(
                    "EOU Metrics",
                    &serde_json::json!({
                        "end_of_utterance_delay": delay,
                        "transcription_delay": transcription_delay,
                        "on_user_turn_completed_delay": turn_completed_delay,
                        "speech_id": speech_id,
                        "turn_id": self.correlator.last_turn_id() + 1,
                        "timestamp": Utc::now(),
                    }),
                );
            }
            MetricEvent::GenerationStarted { ttft, duration, .. } => {
                self.write(self.registry.set(
                    catalog::LLM_DURATION_MS,
                    &self.series.llm_latency(),
                    ttft * 1000.0,
                ));
                log_record(
                    "LLM Metrics",
                    &serde_json::json!({
                        "ttft_ms": ttft * 1000.0,
                        "latency_ms": duration * 1000.0,
                        "turn_id": self.correlator.last_turn_id(),
                        "timestamp": Utc::now(),
                    }),
                );
            }
            MetricEvent::SynthesisStarted { ttfb, duration, .. } => {
                self.write(self.registry.set(
                    catalog::TTS_DURATION_MS,
                    &self.series.tts_latency(),
                    ttfb * 1000.0,
                ));
                log_record(
                    "TTS Metrics",
                    &serde_json::json!({
                        "ttfb_ms": ttfb * 1000.0,
                        "latency_ms": duration * 1000.0,
                        "turn_id": self.correlator.last_turn_id(),
                        "timestamp": Utc::now(),
                    }),
                );
            }
            MetricEvent::RecognitionCompleted { duration, .. } => {
                self.write(self.registry.set(
                    catalog::STT_DURATION_MS,
                    &self.series.stt_latency(),
                    duration * 1000.0,
                ));
                log_record(
                    "STT Metrics",
                    &serde_json::json!({
                        "latency_ms": duration * 1000.0,
                        "timestamp": Utc::now(),
                    }),
                );
            }
            MetricEvent::VoiceActivity | MetricEvent::Unknown => {}
        }

        let turn = self.correlator.observe(event)?;
        self.write(self.registry.set(
            catalog::TOTAL_CONVERSATION_LATENCY_MS,
            &self.series.agent(),
            turn.total_latency_ms,
        ));
        log_record("Total Conversation Latency", &turn);
        Some(turn)
    }

    fn write(&self, outcome: RegistryResult<()>) {
        if let Err(error) = outcome {
            warn!("metrics registry write failed: {}", error);
        }
    }
}

/// Record time to first byte of the fast pre-response model. The fast reply
/// runs beside the session's event path, so it writes the registry directly.
pub fn record_fast_response(registry: &MetricsRegistry, series: &SeriesLabels, ttfb_ms: f64) {
    if let Err(error) = registry.set(
        catalog::LLM_SMALL_DURATION_MS,
        &series.fast_llm_latency(),
        ttfb_ms,
    ) {
        warn!("metrics registry write failed: {}", error);
        return;
    }
    log_record(
        "Fast LLM TTFB",
        &serde_json::json!({
            "ttfb_ms": ttfb_ms,
            "model": series.fast_llm_model,
            "timestamp": Utc::now(),
        }),
    );
}

/// Log a structured record as a single JSON line.
pub fn log_record<T: Serialize>(message: &str, record: &T) {
    match serde_json::to_string(record) {
        Ok(json) => info!("{} {}", message, json),
        Err(error) => warn!("{}: failed to encode log record: {}", message, error),
    }
}
