use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use voice_metrics::{record_fast_response, MetricEvent, MetricsBus, MetricsRegistry, SeriesLabels};

/// Records that steer the worker itself instead of the session's event path.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlRecord {
    /// First byte of the fast pre-response model, in seconds.
    FastResponse { ttfb: f64 },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum IngestLine {
    Control(ControlRecord),
    Event(MetricEvent),
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct IngestStats {
    pub lines: u64,
    pub events: u64,
    pub fast_responses: u64,
    pub malformed: u64,
    pub dropped: u64,
}

/// Feeds one JSON object per line into the session's metrics bus.
pub struct EventIngest {
    bus: MetricsBus,
    registry: Arc<MetricsRegistry>,
    series: SeriesLabels,
}

impl EventIngest {
    pub fn new(bus: MetricsBus, registry: Arc<MetricsRegistry>, series: SeriesLabels) -> Self {
        Self {
            bus,
            registry,
            series,
        }
    }

    pub fn ingest_line(&self, line: &str, stats: &mut IngestStats) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        stats.lines += 1;

        match serde_json::from_str::<IngestLine>(line) {
            Ok(IngestLine::Event(event)) => {
                stats.events += 1;
                if !self.bus.emit(event) {
                    stats.dropped += 1;
                }
            }
            Ok(IngestLine::Control(ControlRecord::FastResponse { ttfb })) => {
                stats.fast_responses += 1;
                record_fast_response(&self.registry, &self.series, ttfb * 1000.0);
            }
            Err(error) => {
                stats.malformed += 1;
                log::warn!("Skipping malformed event line: {} ({})", error, line);
            }
        }
    }

    /// Read until end of input. The bus handle is released on return so the
    /// session's worker can finish.
    pub async fn run<R>(self, reader: R) -> std::io::Result<IngestStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut stats = IngestStats::default();
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            self.ingest_line(&line, &mut stats);
        }
        log_closed(&stats);
        Ok(stats)
    }

    /// Same as `run`, fed by `spawn_stdin_reader`.
    pub async fn run_channel(self, mut lines: mpsc::Receiver<String>) -> IngestStats {
        let mut stats = IngestStats::default();
        while let Some(line) = lines.recv().await {
            self.ingest_line(&line, &mut stats);
        }
        log_closed(&stats);
        stats
    }
}

/// Read stdin on a plain thread. A blocked read there does not hold up
/// runtime shutdown when the process is asked to stop.
pub fn spawn_stdin_reader(capacity: usize) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(capacity);
    std::thread::spawn(move || {
        use std::io::BufRead;

        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(error) => {
                    log::warn!("Failed to read stdin: {}", error);
                    break;
                }
            }
        }
    });
    rx
}

fn log_closed(stats: &IngestStats) {
    log::info!(
        "Event input closed: {}",
        serde_json::to_string(stats).unwrap_or_default()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_metrics::catalog::{self, register_all};

    fn series() -> SeriesLabels {
        SeriesLabels {
            agent_type: "fast-preresponse".to_string(),
            llm_model: "openai-gpt-4o".to_string(),
            fast_llm_model: "google-gemini-2.5-flash-lite".to_string(),
            stt_provider: "deepgram".to_string(),
            tts_provider: "openai".to_string(),
        }
    }

    #[tokio::test]
    async fn test_lines_become_bus_events() {
        let registry = Arc::new(MetricsRegistry::with_process_id("proc-test"));
        register_all(&registry).unwrap();
        let (bus, mut receiver) = MetricsBus::new(16);
        let ingest = EventIngest::new(bus, Arc::clone(&registry), series());

        let input = concat!(
            r#"{"type":"end_of_utterance","delay":0.5,"transcription_delay":0.1,"turn_completed_delay":0.0}"#,
            "\n",
            "\n",
            r#"{"type":"generation_started","ttft":0.25,"duration":1.0,"prompt_tokens":12,"completion_tokens":4}"#,
            "\n",
            "not json\n",
            r#"{"type":"fast_response","ttfb":0.08}"#,
            "\n",
            r#"{"type":"interruption_detected","at":3}"#,
            "\n",
        );

        let stats = ingest.run(input.as_bytes()).await.unwrap();
        assert_eq!(
            stats,
            IngestStats {
                lines: 5,
                events: 3,
                fast_responses: 1,
                malformed: 1,
                dropped: 0,
            }
        );

        assert!(matches!(
            receiver.recv().await,
            Some(MetricEvent::EndOfUtterance { .. })
        ));
        assert!(matches!(
            receiver.recv().await,
            Some(MetricEvent::GenerationStarted { prompt_tokens: 12, .. })
        ));
        assert_eq!(receiver.recv().await, Some(MetricEvent::Unknown));
        assert_eq!(receiver.recv().await, None);

        assert_eq!(
            registry.get(catalog::LLM_SMALL_DURATION_MS, &series().fast_llm_latency()),
            Some(80.0)
        );
    }

    #[tokio::test]
    async fn test_channel_input_ends_when_sender_drops() {
        let registry = Arc::new(MetricsRegistry::with_process_id("proc-test"));
        register_all(&registry).unwrap();
        let (bus, mut receiver) = MetricsBus::new(16);
        let ingest = EventIngest::new(bus, registry, series());

        let (tx, rx) = mpsc::channel(4);
        tx.send(r#"{"type":"synthesis_started","ttfb":0.1,"character_count":42}"#.to_string())
            .await
            .unwrap();
        drop(tx);

        let stats = ingest.run_channel(rx).await;
        assert_eq!(stats.events, 1);
        assert!(matches!(
            receiver.recv().await,
            Some(MetricEvent::SynthesisStarted { character_count: 42, .. })
        ));
    }

    #[tokio::test]
    async fn test_full_bus_counts_drops() {
        let registry = Arc::new(MetricsRegistry::with_process_id("proc-test"));
        register_all(&registry).unwrap();
        let (bus, _receiver) = MetricsBus::new(1);
        let ingest = EventIngest::new(bus, registry, series());

        let mut stats = IngestStats::default();
        ingest.ingest_line(r#"{"type":"voice_activity"}"#, &mut stats);
        ingest.ingest_line(r#"{"type":"voice_activity"}"#, &mut stats);

        assert_eq!(stats.events, 2);
        assert_eq!(stats.dropped, 1);
    }
}
