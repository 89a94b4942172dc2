use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;
use voice_metrics::catalog;
use voice_metrics::{
    CostEstimator, Labels, MetricsBus, MetricsCollector, MetricsRegistry, MetricsWorker,
    RegistryError, SeriesLabels, SessionSummary,
};

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("metrics worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Holds one unit of `active_conversations` for the lifetime of a session.
///
/// `release` gives the unit back exactly once no matter how many of the
/// shutdown paths (normal end, drop, exit hook) reach it.
pub struct ActiveSessionGuard {
    registry: Arc<MetricsRegistry>,
    labels: Labels,
    released: AtomicBool,
}

impl ActiveSessionGuard {
    pub fn acquire(registry: Arc<MetricsRegistry>, series: &SeriesLabels) -> SessionResult<Arc<Self>> {
        let labels = series.agent();
        registry.add(catalog::ACTIVE_CONVERSATIONS, &labels, 1.0)?;
        Ok(Arc::new(Self {
            registry,
            labels,
            released: AtomicBool::new(false),
        }))
    }

    /// Returns true for the call that actually decremented the gauge.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Err(error) = self
            .registry
            .add(catalog::ACTIVE_CONVERSATIONS, &self.labels, -1.0)
        {
            log::warn!("Failed to decrement active conversations: {}", error);
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for ActiveSessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Callbacks that must run before the process exits, including on signals.
#[derive(Clone, Default)]
pub struct ExitHooks {
    hooks: Arc<Mutex<Vec<Hook>>>,
}

impl ExitHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hook: impl FnOnce() + Send + 'static) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    /// Run and forget every registered hook, most recent first. Returns how
    /// many ran.
    pub fn run(&self) -> usize {
        let hooks = std::mem::take(&mut *self.hooks.lock().unwrap_or_else(PoisonError::into_inner));
        let count = hooks.len();
        for hook in hooks.into_iter().rev() {
            hook();
        }
        count
    }
}

/// Resolve on Ctrl-C, or SIGTERM on unix. Returns the signal name.
pub async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "SIGINT",
                    _ = terminate.recv() => "SIGTERM",
                }
            }
            Err(error) => {
                log::warn!("Cannot listen for SIGTERM: {}", error);
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}

/// One conversation: its bus, its metrics worker and its active-session unit.
pub struct SessionRuntime {
    room: String,
    bus: MetricsBus,
    worker: MetricsWorker,
    handle: JoinHandle<MetricsCollector>,
    guard: Arc<ActiveSessionGuard>,
}

impl SessionRuntime {
    pub fn start(
        registry: Arc<MetricsRegistry>,
        series: SeriesLabels,
        room: impl Into<String>,
        estimator: CostEstimator,
        bus_capacity: usize,
    ) -> SessionResult<Self> {
        let room = room.into();
        let guard = ActiveSessionGuard::acquire(Arc::clone(&registry), &series)?;
        let collector = MetricsCollector::new(registry, series, room.clone(), estimator)?;

        let (bus, receiver) = MetricsBus::new(bus_capacity);
        let worker = MetricsWorker::new();
        let handle = worker.spawn(collector, receiver);
        log::info!("Session started in room {}", room);

        Ok(Self {
            room,
            bus,
            worker,
            handle,
            guard,
        })
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn bus(&self) -> MetricsBus {
        self.bus.clone()
    }

    pub fn guard(&self) -> Arc<ActiveSessionGuard> {
        Arc::clone(&self.guard)
    }

    /// Apply queued events, flush the session summary and give back the
    /// active-session unit.
    pub async fn finish(self) -> SessionResult<SessionSummary> {
        self.worker.stop();
        let dropped = self.bus.dropped_count();
        drop(self.bus);

        let result = self.handle.await;
        self.guard.release();
        let collector = result?;

        if dropped > 0 {
            log::warn!("Session in room {} dropped {} metrics events", self.room, dropped);
        }
        Ok(collector.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_metrics::catalog::register_all;
    use voice_metrics::MetricEvent;

    fn series() -> SeriesLabels {
        SeriesLabels {
            agent_type: "fast-preresponse".to_string(),
            llm_model: "openai-gpt-4o".to_string(),
            fast_llm_model: "google-gemini-2.5-flash-lite".to_string(),
            stt_provider: "deepgram".to_string(),
            tts_provider: "openai".to_string(),
        }
    }

    fn registry() -> Arc<MetricsRegistry> {
        let registry = Arc::new(MetricsRegistry::with_process_id("proc-test"));
        register_all(&registry).unwrap();
        registry
    }

    fn active(registry: &MetricsRegistry) -> Option<f64> {
        registry.get(catalog::ACTIVE_CONVERSATIONS, &series().agent())
    }

    #[test]
    fn test_guard_decrements_once_across_every_path() {
        let registry = registry();
        let hooks = ExitHooks::new();

        let guard = ActiveSessionGuard::acquire(Arc::clone(&registry), &series()).unwrap();
        assert_eq!(active(&registry), Some(1.0));

        let hook_guard = Arc::clone(&guard);
        hooks.register(move || {
            hook_guard.release();
        });

        assert!(guard.release());
        assert_eq!(active(&registry), Some(0.0));

        assert_eq!(hooks.run(), 1);
        assert_eq!(hooks.run(), 0);
        drop(guard);

        assert_eq!(active(&registry), Some(0.0));
    }

    #[test]
    fn test_guard_drop_releases_when_nothing_else_did() {
        let registry = registry();
        {
            let _first = ActiveSessionGuard::acquire(Arc::clone(&registry), &series()).unwrap();
            let _second = ActiveSessionGuard::acquire(Arc::clone(&registry), &series()).unwrap();
            assert_eq!(active(&registry), Some(2.0));
        }
        assert_eq!(active(&registry), Some(0.0));
    }

    #[test]
    fn test_exit_hook_alone_releases_guard() {
        let registry = registry();
        let hooks = ExitHooks::new();
        let guard = ActiveSessionGuard::acquire(Arc::clone(&registry), &series()).unwrap();

        let hook_guard = Arc::clone(&guard);
        hooks.register(move || {
            hook_guard.release();
        });
        hooks.run();

        assert!(guard.is_released());
        assert!(!guard.release());
        assert_eq!(active(&registry), Some(0.0));
    }

    #[tokio::test]
    async fn test_session_finish_flushes_summary() {
        let registry = registry();
        let session = SessionRuntime::start(
            Arc::clone(&registry),
            series(),
            "room-a",
            CostEstimator::default(),
            64,
        )
        .unwrap();
        assert_eq!(active(&registry), Some(1.0));

        let bus = session.bus();
        bus.emit(MetricEvent::GenerationStarted {
            ttft: 0.2,
            duration: 0.8,
            prompt_tokens: 100,
            completion_tokens: 50,
        });
        bus.emit(MetricEvent::SynthesisStarted {
            ttfb: 0.1,
            duration: 0.5,
            character_count: 200,
        });
        drop(bus);

        let guard = session.guard();
        let summary = session.finish().await.unwrap();

        assert_eq!(summary.room, "room-a");
        assert_eq!(summary.usage.prompt_tokens, 100);
        assert_eq!(summary.usage.tts_characters, 200);
        assert!(guard.is_released());
        assert_eq!(active(&registry), Some(0.0));
    }
}
