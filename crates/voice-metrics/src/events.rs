use serde::{Deserialize, Serialize};

/// Metrics emitted by the voice pipeline.
///
/// All delays and durations are in seconds, exactly as the pipeline reports
/// them. Conversion to milliseconds happens where gauges are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricEvent {
    /// The pipeline decided the user finished speaking.
    EndOfUtterance {
        delay: f64,
        #[serde(default)]
        transcription_delay: f64,
        #[serde(default)]
        turn_completed_delay: f64,
        #[serde(default)]
        speech_id: Option<String>,
    },
    /// The language model produced its first token.
    GenerationStarted {
        ttft: f64,
        #[serde(default)]
        duration: f64,
        #[serde(default)]
        prompt_tokens: u64,
        #[serde(default)]
        completion_tokens: u64,
    },
    /// Speech synthesis produced its first audio byte.
    SynthesisStarted {
        ttfb: f64,
        #[serde(default)]
        duration: f64,
        #[serde(default)]
        character_count: u64,
    },
    RecognitionCompleted {
        duration: f64,
        /// Seconds of audio billed by the recognizer.
        #[serde(default)]
        audio_duration: f64,
    },
    VoiceActivity,
    /// Any variant this build does not know about.
    #[serde(other)]
    Unknown,
}

impl MetricEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EndOfUtterance { .. } => "end_of_utterance",
            Self::GenerationStarted { .. } => "generation_started",
            Self::SynthesisStarted { .. } => "synthesis_started",
            Self::RecognitionCompleted { .. } => "recognition_completed",
            Self::VoiceActivity => "voice_activity",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_of_utterance_deserializes_with_defaults() {
        let event: MetricEvent =
            serde_json::from_str(r#"{"type":"end_of_utterance","delay":0.4}"#)
                .expect("deserialize");

        match event {
            MetricEvent::EndOfUtterance {
                delay,
                transcription_delay,
                speech_id,
                ..
            } => {
                assert_eq!(delay, 0.4);
                assert_eq!(transcription_delay, 0.0);
                assert!(speech_id.is_none());
            }
            other => panic!("Expected EndOfUtterance, got {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_variant_maps_to_unknown() {
        let event: MetricEvent =
            serde_json::from_str(r#"{"type":"interruption_detected","at":1.0}"#)
                .expect("deserialize");
        assert_eq!(event, MetricEvent::Unknown);
        assert_eq!(event.kind(), "unknown");
    }

    #[test]
    fn test_generation_started_serialization() {
        let event = MetricEvent::GenerationStarted {
            ttft: 0.25,
            duration: 1.5,
            prompt_tokens: 120,
            completion_tokens: 40,
        };

        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains(r#""type":"generation_started""#));

        let deserialized: MetricEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(deserialized, event);
    }
}
