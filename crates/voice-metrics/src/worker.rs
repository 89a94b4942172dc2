use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::collector::MetricsCollector;
use crate::events::MetricEvent;

/// Drains one session's bus into its collector, one event at a time.
pub struct MetricsWorker {
    running: Arc<AtomicBool>,
    stop: Arc<Notify>,
}

impl MetricsWorker {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(Notify::new()),
        }
    }

    /// Spawn the event loop.
    ///
    /// The task ends when every bus handle is dropped or `stop` is called;
    /// events already queued are still applied. The collector is handed back
    /// so the caller can flush the session.
    pub fn spawn(
        &self,
        mut collector: MetricsCollector,
        mut receiver: mpsc::Receiver<MetricEvent>,
    ) -> JoinHandle<MetricsCollector> {
        let running = Arc::clone(&self.running);
        let stop = Arc::clone(&self.stop);
        running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            info!("MetricsWorker started for room {}", collector.room());

            loop {
                tokio::select! {
                    biased;
                    _ = stop.notified() => {
                        receiver.close();
                        let mut drained = 0usize;
                        while let Some(event) = receiver.recv().await {
                            collector.handle_event(&event);
                            drained += 1;
                        }
                        debug!("MetricsWorker drained {} queued events", drained);
                        break;
                    }
                    event = receiver.recv() => match event {
                        Some(event) => {
                            collector.handle_event(&event);
                        }
                        None => {
                            info!("MetricsWorker channel closed");
                            break;
                        }
                    },
                }
            }

            running.store(false, Ordering::SeqCst);
            info!("MetricsWorker stopped for room {}", collector.room());
            collector
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the worker gracefully
    pub fn stop(&self) {
        self.stop.notify_one();
    }
}

impl Default for MetricsWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MetricsBus;
    use crate::catalog::{self, register_all, test_series_labels};
    use crate::cost::CostEstimator;
    use crate::registry::MetricsRegistry;

    fn collector(registry: &Arc<MetricsRegistry>) -> MetricsCollector {
        register_all(registry).expect("register");
        MetricsCollector::new(
            Arc::clone(registry),
            test_series_labels(),
            "room-a",
            CostEstimator::default(),
        )
        .expect("collector")
    }

    #[tokio::test]
    async fn test_worker_applies_events_until_bus_closes() {
        let registry = Arc::new(MetricsRegistry::with_process_id("proc-1"));
        let worker = MetricsWorker::new();
        let (bus, rx) = MetricsBus::new(16);

        let handle = worker.spawn(collector(&registry), rx);
        assert!(worker.is_running());

        bus.emit(MetricEvent::EndOfUtterance {
            delay: 0.5,
            transcription_delay: 0.0,
            turn_completed_delay: 0.0,
            speech_id: None,
        });
        bus.emit(MetricEvent::GenerationStarted {
            ttft: 0.25,
            duration: 0.0,
            prompt_tokens: 3,
            completion_tokens: 2,
        });
        bus.emit(MetricEvent::SynthesisStarted {
            ttfb: 0.125,
            duration: 0.0,
            character_count: 0,
        });
        drop(bus);

        let collector = handle.await.expect("worker task");
        assert!(!worker.is_running());
        assert_eq!(collector.turns(), 1);
        assert_eq!(
            registry.get(
                catalog::TOTAL_CONVERSATION_LATENCY_MS,
                &test_series_labels().agent()
            ),
            Some(875.0)
        );
    }

    #[tokio::test]
    async fn test_stop_drains_queued_events() {
        let registry = Arc::new(MetricsRegistry::with_process_id("proc-1"));
        let worker = MetricsWorker::new();
        let (bus, rx) = MetricsBus::new(16);

        for _ in 0..3 {
            bus.emit(MetricEvent::GenerationStarted {
                ttft: 0.1,
                duration: 0.0,
                prompt_tokens: 10,
                completion_tokens: 0,
            });
        }
        worker.stop();
        let handle = worker.spawn(collector(&registry), rx);

        let collector = handle.await.expect("worker task");
        assert_eq!(collector.usage().prompt_tokens, 30);
        // The bus is still alive but nothing is consumed anymore.
        assert!(bus.is_closed());
    }
}
