use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::time::{Instant, MissedTickBehavior};
use tracing::*;

use crate::engine::{MeasurementEngine, PhaseTag, Snapshot};

use super::SessionConfig;

/// Why the polling loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PollOutcome {
    /// A terminal snapshot was forwarded.
    Terminal(PhaseTag),
    /// No terminal snapshot arrived within the overall timeout.
    TimedOut,
    /// The engine never produced a snapshot within the connect timeout.
    ConnectTimedOut,
    /// The cancel flag was raised.
    Cancelled,
}

/// Polls the measurement engine at a fixed cadence and forwards only
/// meaningfully different snapshots to the caller-supplied sink.
///
/// Holds no aggregation state; its only side effects are invoking the
/// sink and waiting out the next tick. The cancel flag is checked at the
/// top of every tick, so an external `cancel()` stops forwarding within
/// one interval.
pub(super) struct ResultPoller {
    started_at: Instant,
    overall_deadline: Instant,
    connect_deadline: Instant,
    interval: std::time::Duration,
    cancelled: Arc<AtomicBool>,
    last_progress: Option<f64>,
    last_phase: Option<PhaseTag>,
    saw_snapshot: bool,
}

impl ResultPoller {
    pub fn new(config: &SessionConfig, started_at: Instant, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            started_at,
            overall_deadline: started_at + config.overall_timeout(),
            connect_deadline: started_at + config.connect_timeout(),
            interval: config.poll_interval(),
            cancelled,
            last_progress: None,
            last_phase: None,
            saw_snapshot: false,
        }
    }

    #[instrument(level = "debug", skip_all)]
    pub async fn run<E, F>(mut self, engine: &E, mut on_snapshot: F) -> PollOutcome
    where
        E: MeasurementEngine + ?Sized,
        F: FnMut(f64, &Snapshot),
    {
        let mut period = tokio::time::interval(self.interval);
        period.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            period.tick().await;

            if self.cancelled.load(Ordering::SeqCst) {
                debug!("Polling cancelled.");
                return PollOutcome::Cancelled;
            }

            let now = Instant::now();
            if now >= self.overall_deadline {
                warn!("No terminal snapshot within the overall timeout.");
                return PollOutcome::TimedOut;
            }
            if !self.saw_snapshot && now >= self.connect_deadline {
                warn!("Engine produced no snapshot within the connect timeout.");
                return PollOutcome::ConnectTimedOut;
            }

            // "Not ready yet" keeps the loop going, it is never terminal.
            let Some(snapshot) = engine.intermediate_result().await else {
                continue;
            };
            self.saw_snapshot = true;

            if !self.should_forward(&snapshot) {
                continue;
            }

            self.last_progress = snapshot.progress;
            self.last_phase = Some(snapshot.phase);

            let elapsed_seconds = self.started_at.elapsed().as_secs_f64();
            on_snapshot(elapsed_seconds, &snapshot);

            if snapshot.phase.is_terminal() {
                debug!("Terminal snapshot forwarded: {phase}", phase = snapshot.phase);
                return PollOutcome::Terminal(snapshot.phase);
            }
        }
    }

    /// A snapshot is meaningfully different when its progress moved, its
    /// progress reached 1 (engines may keep repeating it near
    /// completion), its phase changed, or its phase is in the
    /// always-forward set.
    fn should_forward(&self, snapshot: &Snapshot) -> bool {
        if self.last_phase != Some(snapshot.phase) {
            return true;
        }
        if snapshot.progress != self.last_progress {
            return true;
        }
        if matches!(snapshot.progress, Some(progress) if progress >= 1.0) {
            return true;
        }
        snapshot.phase.is_always_forward()
    }
}
