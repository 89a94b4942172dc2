use log::{debug, warn};

use crate::events::MetricEvent;
use crate::types::{UsageDelta, UsageField, UsageSummary};

/// Folds pipeline events into the session's cumulative usage.
#[derive(Debug, Default)]
pub struct UsageCollector {
    summary: UsageSummary,
}

impl UsageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the event carried billable usage.
    pub fn collect(&mut self, event: &MetricEvent) -> bool {
        match event {
            MetricEvent::GenerationStarted {
                prompt_tokens,
                completion_tokens,
                ..
            } => {
                self.summary.prompt_tokens += prompt_tokens;
                self.summary.completion_tokens += completion_tokens;
                *prompt_tokens > 0 || *completion_tokens > 0
            }
            MetricEvent::SynthesisStarted {
                character_count, ..
            } => {
                self.summary.tts_characters += character_count;
                *character_count > 0
            }
            MetricEvent::RecognitionCompleted { audio_duration, .. } => {
                if audio_duration.is_finite() && *audio_duration > 0.0 {
                    self.summary.stt_seconds += audio_duration;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    pub fn summary(&self) -> UsageSummary {
        self.summary
    }
}

/// Turns successive cumulative summaries into non-negative deltas.
#[derive(Debug, Default)]
pub struct UsageDeltaAccumulator {
    last: UsageSummary,
}

impl UsageDeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_from(last: UsageSummary) -> Self {
        Self { last }
    }

    pub fn last(&self) -> UsageSummary {
        self.last
    }

    /// Compute the delta against the stored summary, clamping regressions to
    /// zero. The stored summary is always replaced, so a reset is reported
    /// once and later updates are measured from the new baseline.
    pub fn update(&mut self, summary: UsageSummary) -> UsageDelta {
        let previous = self.last;
        let mut delta = UsageDelta::default();

        delta.prompt_tokens = clamp_u64(
            previous.prompt_tokens,
            summary.prompt_tokens,
            UsageField::PromptTokens,
            &mut delta.clamped,
        );
        delta.completion_tokens = clamp_u64(
            previous.completion_tokens,
            summary.completion_tokens,
            UsageField::CompletionTokens,
            &mut delta.clamped,
        );
        delta.tts_characters = clamp_u64(
            previous.tts_characters,
            summary.tts_characters,
            UsageField::TtsCharacters,
            &mut delta.clamped,
        );

        let stt = summary.stt_seconds - previous.stt_seconds;
        delta.stt_seconds = if stt < 0.0 {
            delta.clamped.push(UsageField::SttSeconds);
            0.0
        } else {
            stt
        };

        if delta.is_clamped() {
            let fields: Vec<&str> = delta.clamped.iter().map(|field| field.as_str()).collect();
            warn!(
                "usage counter regression on {:?}: previous={:?} current={:?}; clamped to zero",
                fields, previous, summary
            );
        } else {
            debug!("usage delta: {:?}", delta);
        }

        self.last = summary;
        delta
    }
}

fn clamp_u64(previous: u64, current: u64, field: UsageField, clamped: &mut Vec<UsageField>) -> u64 {
    match current.checked_sub(previous) {
        Some(delta) => delta,
        None => {
            clamped.push(field);
            0
        }
    }
}
