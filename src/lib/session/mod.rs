pub mod aggregator;
mod poller;
pub mod tracker;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast, time::Instant};
use tracing::*;

use crate::engine::{MeasurementEngine, PhaseTag, Snapshot};

use self::{
    aggregator::{SampleAggregator, SampleSeries},
    poller::{PollOutcome, ResultPoller},
    tracker::PhaseTracker,
};

pub use self::aggregator::SamplePoint;
pub use self::tracker::PhaseTransition;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Timing knobs of one measurement session, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub poll_interval_ms: u64,
    pub overall_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 160,
            overall_timeout_ms: 60_000,
            connect_timeout_ms: 15_000,
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    pub fn overall_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.overall_timeout_ms)
    }

    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Lifecycle of a session. `Connecting` is bounded by the connect
/// timeout; an engine that never answers fails without ever entering
/// `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Running,
    Completed,
    Failed,
}

/// Final outcome of a completed run. Throughputs come from the last
/// forwarded snapshot, the median from the aggregator's last
/// recomputation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub median_latency_ms: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// The engine reported a terminal `ERROR` snapshot, or failed to start.
    EngineError,
    /// The engine reported a terminal `ABORTED` snapshot.
    Aborted,
    /// No terminal snapshot within the overall timeout.
    Timeout,
    /// The engine never produced a snapshot within the connect timeout.
    ConnectTimeout,
    /// The caller cancelled the run.
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EngineError => write!(f, "engine-error"),
            Self::Aborted => write!(f, "aborted"),
            Self::Timeout => write!(f, "timeout"),
            Self::ConnectTimeout => write!(f, "connect-timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A failed run, still carrying whatever partial results were collected
/// so a consumer can show best-effort values.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("measurement session failed: {reason}")]
pub struct SessionFailure {
    pub reason: FailureReason,
    pub partial: FinalResult,
}

/// Events published to subscribers, in the exact order the underlying
/// phases and samples occurred. Series-carrying events hold a snapshot of
/// the full series at emission time.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    PhaseChanged { from: PhaseTag, to: PhaseTag },
    LatencySample(SampleSeries),
    DownloadSample(SampleSeries),
    UploadSample(SampleSeries),
    MedianLatency(f64),
    Finished(Result<FinalResult, SessionFailure>),
}

/// Cancels the owning session from any thread or task. Idempotent; a
/// no-op once the run has resolved.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// One measurement test run against an external engine.
///
/// The caller constructs a session per test, subscribes for live events,
/// and awaits [`Session::run`]. All state mutation happens inside the
/// `run` future (single-writer); the only cross-task surface is the
/// cancel flag and the broadcast channel.
#[derive(Debug)]
pub struct Session {
    id: uuid::Uuid,
    config: SessionConfig,
    state: SessionState,
    tracker: PhaseTracker,
    aggregator: SampleAggregator,
    cancelled: Arc<AtomicBool>,
    events: broadcast::Sender<SessionEvent>,
    last_snapshot: Option<Snapshot>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id: uuid::Uuid::new_v4(),
            config,
            state: SessionState::Idle,
            tracker: PhaseTracker::default(),
            aggregator: SampleAggregator::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
            events,
            last_snapshot: None,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn phase(&self) -> PhaseTag {
        self.tracker.current()
    }

    pub fn latency_series(&self) -> &SampleSeries {
        self.aggregator.latency()
    }

    pub fn download_series(&self) -> &SampleSeries {
        self.aggregator.download()
    }

    pub fn upload_series(&self) -> &SampleSeries {
        self.aggregator.upload()
    }

    pub fn median_latency_ms(&self) -> Option<f64> {
        self.aggregator.median_latency_ms()
    }

    /// Subscribes to the live event stream. Subscribe before calling
    /// [`Session::run`] to observe the run from its first snapshot.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Flags the running poll loop to stop; takes effect within one poll
    /// tick. Safe from any thread, idempotent, no-op once terminal.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// A cloneable handle for cancelling from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: self.cancelled.clone(),
        }
    }

    /// Returns the session to `Idle` with empty series, unset median, and
    /// a cleared cancel flag. No data leaks into the next run.
    pub fn reset(&mut self) {
        self.clear_run_state();
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Drives one full test: starts the engine, polls it to a terminal
    /// state, and resolves with the final result or a tagged failure
    /// carrying partial data. The engine is stopped before resolving on
    /// every path.
    ///
    /// Series and phase state are cleared at entry; the cancel flag is
    /// not, so a `cancel()` issued before the first poll tick resolves
    /// the run as cancelled.
    #[instrument(level = "debug", skip_all, fields(session_id = %self.id))]
    pub async fn run<E>(&mut self, engine: &E) -> Result<FinalResult, SessionFailure>
    where
        E: MeasurementEngine + ?Sized,
    {
        self.clear_run_state();
        self.state = SessionState::Connecting;
        let started_at = Instant::now();

        debug!("Starting measurement session...");

        if let Err(error) = engine.start().await {
            warn!("Measurement engine failed to start: {error:#?}");
            return Err(self.fail(FailureReason::EngineError));
        }

        let poller = ResultPoller::new(&self.config, started_at, self.cancelled.clone());
        let outcome = poller
            .run(engine, |elapsed_seconds, snapshot| {
                self.process_snapshot(elapsed_seconds, snapshot)
            })
            .await;

        // Release the engine connection before resolving.
        engine.stop().await;

        match outcome {
            PollOutcome::Terminal(PhaseTag::End) => {
                self.state = SessionState::Completed;
                let result = self.final_result();
                info!(
                    "Measurement session completed: download {download:?} Mbps, upload {upload:?} Mbps, median latency {median:?} ms",
                    download = result.download_mbps,
                    upload = result.upload_mbps,
                    median = result.median_latency_ms,
                );
                let _ = self.events.send(SessionEvent::Finished(Ok(result.clone())));
                Ok(result)
            }
            PollOutcome::Terminal(PhaseTag::Aborted) => Err(self.fail(FailureReason::Aborted)),
            PollOutcome::Terminal(_) => Err(self.fail(FailureReason::EngineError)),
            PollOutcome::TimedOut => Err(self.fail(FailureReason::Timeout)),
            PollOutcome::ConnectTimedOut => Err(self.fail(FailureReason::ConnectTimeout)),
            PollOutcome::Cancelled => Err(self.fail(FailureReason::Cancelled)),
        }
    }

    /// Handles one forwarded snapshot. Order mirrors the phase semantics:
    /// the latency sample lands first so a transition on the same
    /// snapshot recomputes the median including it, then the transition
    /// itself, then the phase-gated throughput samples.
    fn process_snapshot(&mut self, elapsed_seconds: f64, snapshot: &Snapshot) {
        if self.state == SessionState::Connecting {
            debug!("First snapshot received, session is running.");
            self.state = SessionState::Running;
        }

        if let Some(nanos) = snapshot.latency_nanos {
            self.aggregator.record_latency(elapsed_seconds, nanos);
            let _ = self
                .events
                .send(SessionEvent::LatencySample(self.aggregator.latency().clone()));
        }

        if let Some(transition) = self.tracker.observe(snapshot) {
            if let Some(median) = self.aggregator.recompute_median() {
                let _ = self.events.send(SessionEvent::MedianLatency(median));
            }
            debug!(
                "Phase changed: {from} -> {to}",
                from = transition.from,
                to = transition.to
            );
            let _ = self.events.send(SessionEvent::PhaseChanged {
                from: transition.from,
                to: transition.to,
            });
        }

        if let Some(bits_per_second) = snapshot.down_bits_per_sec {
            if self
                .aggregator
                .record_download(elapsed_seconds, bits_per_second, snapshot.phase)
            {
                let _ = self.events.send(SessionEvent::DownloadSample(
                    self.aggregator.download().clone(),
                ));
            }
        }

        if let Some(bits_per_second) = snapshot.up_bits_per_sec {
            if self
                .aggregator
                .record_upload(elapsed_seconds, bits_per_second, snapshot.phase)
            {
                let _ = self
                    .events
                    .send(SessionEvent::UploadSample(self.aggregator.upload().clone()));
            }
        }

        self.last_snapshot = Some(snapshot.clone());
    }

    fn final_result(&self) -> FinalResult {
        let last = self.last_snapshot.as_ref();
        FinalResult {
            download_mbps: last
                .and_then(|snapshot| snapshot.down_bits_per_sec)
                .map(|bits| bits as f64 / 1e6),
            upload_mbps: last
                .and_then(|snapshot| snapshot.up_bits_per_sec)
                .map(|bits| bits as f64 / 1e6),
            median_latency_ms: self.aggregator.running_median(),
        }
    }

    fn fail(&mut self, reason: FailureReason) -> SessionFailure {
        // Preserve partial results: make sure the median reflects every
        // sample collected up to the failure point.
        self.aggregator.recompute_median();
        self.state = SessionState::Failed;

        let failure = SessionFailure {
            reason,
            partial: self.final_result(),
        };
        warn!("Measurement session failed: {reason}");
        let _ = self.events.send(SessionEvent::Finished(Err(failure.clone())));

        failure
    }

    fn clear_run_state(&mut self) {
        self.tracker.reset();
        self.aggregator.reset();
        self.last_snapshot = None;
        self.state = SessionState::Idle;
    }
}
