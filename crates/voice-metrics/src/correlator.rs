use chrono::Utc;
use log::{debug, warn};

use crate::events::MetricEvent;
use crate::types::TurnLatency;

/// Partial latency components of the turn currently being assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnState {
    pub turn_id: u64,
    pub eou_delay_ms: Option<f64>,
    pub ttft_ms: Option<f64>,
    pub ttfb_ms: Option<f64>,
}

impl TurnState {
    fn new(turn_id: u64) -> Self {
        Self {
            turn_id,
            eou_delay_ms: None,
            ttft_ms: None,
            ttfb_ms: None,
        }
    }

    fn complete(&self) -> Option<TurnLatency> {
        let (eou, ttft, ttfb) = (self.eou_delay_ms?, self.ttft_ms?, self.ttfb_ms?);
        Some(TurnLatency {
            turn_id: self.turn_id,
            eou_delay_ms: eou,
            llm_ttft_ms: ttft,
            tts_ttfb_ms: ttfb,
            total_latency_ms: eou + ttft + ttfb,
            completed_at: Utc::now(),
        })
    }
}

/// Assembles end-of-utterance, first-token and first-byte delays into one
/// latency figure per turn.
///
/// Holds at most one in-flight turn. A new end-of-utterance discards an
/// incomplete turn without emitting it.
#[derive(Debug, Default)]
pub struct TurnLatencyCorrelator {
    current: Option<TurnState>,
    last_turn_id: u64,
    discarded: u64,
}

impl TurnLatencyCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&TurnState> {
        self.current.as_ref()
    }

    /// Id of the most recently opened turn, 0 before the first one.
    pub fn last_turn_id(&self) -> u64 {
        self.last_turn_id
    }

    /// Incomplete turns superseded so far.
    pub fn discarded_turns(&self) -> u64 {
        self.discarded
    }

    /// Feed one event. Returns the completed turn when this event was the
    /// last missing component.
    pub fn observe(&mut self, event: &MetricEvent) -> Option<TurnLatency> {
        match event {
            MetricEvent::EndOfUtterance { delay, .. } => {
                if let Some(stale) = self.current.take() {
                    self.discarded += 1;
                    debug!(
                        "turn {} superseded before completion (eou={:?} ttft={:?} ttfb={:?})",
                        stale.turn_id, stale.eou_delay_ms, stale.ttft_ms, stale.ttfb_ms
                    );
                }
                self.last_turn_id += 1;
                let mut turn = TurnState::new(self.last_turn_id);
                // A turn opened without a usable delay can never complete.
                turn.eou_delay_ms = delay_ms(event.kind(), *delay);
                self.current = Some(turn);
                None
            }
            MetricEvent::GenerationStarted { ttft, .. } => {
                self.fill(event.kind(), *ttft, |turn| &mut turn.ttft_ms)
            }
            MetricEvent::SynthesisStarted { ttfb, .. } => {
                self.fill(event.kind(), *ttfb, |turn| &mut turn.ttfb_ms)
            }
            _ => None,
        }
    }

    fn fill(
        &mut self,
        kind: &str,
        seconds: f64,
        field: impl FnOnce(&mut TurnState) -> &mut Option<f64>,
    ) -> Option<TurnLatency> {
        let Some(turn) = self.current.as_mut() else {
            debug!("{} without an open turn, dropping", kind);
            return None;
        };

        let slot = field(turn);
        if slot.is_some() {
            debug!("{} repeated within turn {}, keeping first value", kind, turn.turn_id);
            return None;
        }
        *slot = Some(delay_ms(kind, seconds)?);

        let completed = turn.complete();
        if completed.is_some() {
            self.current = None;
        }
        completed
    }
}

/// Seconds to milliseconds, or `None` for a value no clock could produce.
fn delay_ms(kind: &str, seconds: f64) -> Option<f64> {
    if seconds.is_finite() && seconds >= 0.0 {
        Some(seconds * 1000.0)
    } else {
        warn!("{} carries unusable delay {}, leaving it out of the turn", kind, seconds);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eou(delay: f64) -> MetricEvent {
        MetricEvent::EndOfUtterance {
            delay,
            transcription_delay: 0.0,
            turn_completed_delay: 0.0,
            speech_id: None,
        }
    }

    fn generation(ttft: f64) -> MetricEvent {
        MetricEvent::GenerationStarted {
            ttft,
            duration: 0.0,
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    fn synthesis(ttfb: f64) -> MetricEvent {
        MetricEvent::SynthesisStarted {
            ttfb,
            duration: 0.0,
            character_count: 0,
        }
    }

    #[test]
    fn test_total_is_exact_sum_in_either_order() {
        for generation_first in [true, false] {
            let mut correlator = TurnLatencyCorrelator::new();
            assert!(correlator.observe(&eou(0.5)).is_none());

            let (first, second) = if generation_first {
                (generation(0.25), synthesis(0.125))
            } else {
                (synthesis(0.125), generation(0.25))
            };
            assert!(correlator.observe(&first).is_none());
            let turn = correlator.observe(&second).expect("turn completes");

            assert_eq!(turn.eou_delay_ms, 500.0);
            assert_eq!(turn.llm_ttft_ms, 250.0);
            assert_eq!(turn.tts_ttfb_ms, 125.0);
            assert_eq!(
                turn.total_latency_ms,
                turn.eou_delay_ms + turn.llm_ttft_ms + turn.tts_ttfb_ms
            );
            assert_eq!(turn.total_latency_ms, 875.0);
            assert!(correlator.current().is_none());
        }
    }

    #[test]
    fn test_incomplete_turn_is_superseded_without_emission() {
        let mut correlator = TurnLatencyCorrelator::new();
        let mut emitted = Vec::new();

        for event in [eou(1.0), generation(1.0), eou(0.5), generation(0.25), synthesis(0.125)] {
            if let Some(turn) = correlator.observe(&event) {
                emitted.push(turn);
            }
        }

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].turn_id, 2);
        assert_eq!(emitted[0].total_latency_ms, 875.0);
        assert_eq!(correlator.discarded_turns(), 1);
    }

    #[test]
    fn test_components_without_open_turn_are_dropped() {
        let mut correlator = TurnLatencyCorrelator::new();
        assert!(correlator.observe(&generation(0.2)).is_none());
        assert!(correlator.observe(&synthesis(0.1)).is_none());
        assert!(correlator.current().is_none());
        assert_eq!(correlator.last_turn_id(), 0);

        // Late components after completion do not open a new turn either.
        correlator.observe(&eou(0.1));
        correlator.observe(&generation(0.1));
        assert!(correlator.observe(&synthesis(0.1)).is_some());
        assert!(correlator.observe(&synthesis(0.3)).is_none());
        assert!(correlator.current().is_none());
    }

    #[test]
    fn test_fields_never_revert_within_a_turn() {
        let mut correlator = TurnLatencyCorrelator::new();
        correlator.observe(&eou(0.5));
        correlator.observe(&generation(0.25));
        correlator.observe(&generation(2.0));

        let turn = correlator.current().expect("turn open");
        assert_eq!(turn.ttft_ms, Some(250.0));

        let completed = correlator.observe(&synthesis(0.125)).expect("completes");
        assert_eq!(completed.total_latency_ms, 875.0);
    }

    #[test]
    fn test_turn_ids_increment_per_end_of_utterance() {
        let mut correlator = TurnLatencyCorrelator::new();
        correlator.observe(&eou(0.1));
        correlator.observe(&eou(0.1));
        correlator.observe(&eou(0.1));
        assert_eq!(correlator.last_turn_id(), 3);
        assert_eq!(correlator.discarded_turns(), 2);
        assert!(correlator.observe(&MetricEvent::VoiceActivity).is_none());
    }

    #[test]
    fn test_unusable_delays_never_reach_the_total() {
        let mut correlator = TurnLatencyCorrelator::new();

        assert!(correlator.observe(&eou(0.5)).is_none());
        assert!(correlator.observe(&generation(f64::NAN)).is_none());
        assert!(correlator.observe(&synthesis(0.1)).is_none());
        assert_eq!(correlator.current().and_then(|turn| turn.ttft_ms), None);

        let turn = correlator.observe(&generation(0.2)).expect("turn completes");
        assert!(turn.total_latency_ms.is_finite());
        assert!((turn.total_latency_ms - 800.0).abs() < 1e-9);

        assert!(correlator.observe(&eou(-1.0)).is_none());
        assert!(correlator.observe(&generation(0.2)).is_none());
        assert!(correlator.observe(&synthesis(0.1)).is_none());
        assert_eq!(correlator.current().map(|turn| turn.eou_delay_ms), Some(None));
    }
}
