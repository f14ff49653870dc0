use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Phases of a measurement run, in the expected progression order
/// `INIT → INIT_DOWN → PING → DOWN → INIT_UP → UP → END`.
///
/// `ERROR` and `ABORTED` are terminal and can be reached from any
/// non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseTag {
    Init,
    InitDown,
    Ping,
    Down,
    InitUp,
    Up,
    End,
    Error,
    Aborted,
}

impl PhaseTag {
    /// Terminal tags end the polling loop once forwarded.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End | Self::Error | Self::Aborted)
    }

    /// Tags that the poller forwards even when progress did not move.
    /// Engines are allowed to stop updating progress once they reach a
    /// completion status, so these must never be swallowed by the dedup
    /// predicate.
    pub fn is_always_forward(&self) -> bool {
        self.is_terminal()
    }
}

impl std::fmt::Display for PhaseTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::InitDown => write!(f, "INIT_DOWN"),
            Self::Ping => write!(f, "PING"),
            Self::Down => write!(f, "DOWN"),
            Self::InitUp => write!(f, "INIT_UP"),
            Self::Up => write!(f, "UP"),
            Self::End => write!(f, "END"),
            Self::Error => write!(f, "ERROR"),
            Self::Aborted => write!(f, "ABORTED"),
        }
    }
}

impl std::str::FromStr for PhaseTag {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INIT" => Ok(Self::Init),
            "INIT_DOWN" => Ok(Self::InitDown),
            "PING" => Ok(Self::Ping),
            "DOWN" => Ok(Self::Down),
            "INIT_UP" => Ok(Self::InitUp),
            "UP" => Ok(Self::Up),
            "END" => Ok(Self::End),
            "ERROR" => Ok(Self::Error),
            "ABORTED" => Ok(Self::Aborted),
            other => Err(format!("unknown phase tag: {other:?}")),
        }
    }
}

/// An intermediate result pulled from the measurement engine on a poll
/// tick. Read-only to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub phase: PhaseTag,
    /// Overall test progress in `[0, 1]`, when the engine reports one.
    pub progress: Option<f64>,
    pub latency_nanos: Option<u64>,
    pub down_bits_per_sec: Option<u64>,
    pub up_bits_per_sec: Option<u64>,
}

impl Snapshot {
    pub fn new(phase: PhaseTag) -> Self {
        Self {
            phase,
            progress: None,
            latency_nanos: None,
            down_bits_per_sec: None,
            up_bits_per_sec: None,
        }
    }

    /// Build a snapshot from an engine that encodes absent fields with
    /// negative markers (`-1` in the RMBT family of engines). Markers map
    /// to `None`, never to zero.
    pub fn from_raw(
        phase: PhaseTag,
        progress: f64,
        latency_nanos: i64,
        down_bits_per_sec: i64,
        up_bits_per_sec: i64,
    ) -> Self {
        Self {
            phase,
            progress: (0.0..=1.0).contains(&progress).then_some(progress),
            latency_nanos: u64::try_from(latency_nanos).ok(),
            down_bits_per_sec: u64::try_from(down_bits_per_sec).ok(),
            up_bits_per_sec: u64::try_from(up_bits_per_sec).ok(),
        }
    }
}

/// The consumed surface of the external measurement engine.
///
/// The orchestrator never inspects engine-internal state beyond this.
/// `intermediate_result` returning `None` means "not ready yet" and is
/// never treated as an error.
#[async_trait]
pub trait MeasurementEngine: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self);

    async fn intermediate_result(&self) -> Option<Snapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_tag_wire_names_round_trip() {
        for phase in [
            PhaseTag::Init,
            PhaseTag::InitDown,
            PhaseTag::Ping,
            PhaseTag::Down,
            PhaseTag::InitUp,
            PhaseTag::Up,
            PhaseTag::End,
            PhaseTag::Error,
            PhaseTag::Aborted,
        ] {
            let parsed: PhaseTag = phase.to_string().parse().unwrap();
            assert_eq!(parsed, phase);

            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(json, format!("\"{phase}\""));
        }
    }

    #[test]
    fn terminal_tags() {
        assert!(PhaseTag::End.is_terminal());
        assert!(PhaseTag::Error.is_terminal());
        assert!(PhaseTag::Aborted.is_terminal());
        assert!(!PhaseTag::Ping.is_terminal());
        assert!(!PhaseTag::Init.is_terminal());
    }

    #[test]
    fn from_raw_maps_negative_markers_to_none() {
        let snapshot = Snapshot::from_raw(PhaseTag::Ping, 0.5, -1, -1, -1);
        assert_eq!(snapshot.progress, Some(0.5));
        assert_eq!(snapshot.latency_nanos, None);
        assert_eq!(snapshot.down_bits_per_sec, None);
        assert_eq!(snapshot.up_bits_per_sec, None);

        let snapshot = Snapshot::from_raw(PhaseTag::Down, -1.0, 12_000_000, 85_000_000, -1);
        assert_eq!(snapshot.progress, None);
        assert_eq!(snapshot.latency_nanos, Some(12_000_000));
        assert_eq!(snapshot.down_bits_per_sec, Some(85_000_000));
    }
}
