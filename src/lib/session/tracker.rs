use crate::engine::{PhaseTag, Snapshot};

/// A detected change of the test phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    pub from: PhaseTag,
    pub to: PhaseTag,
}

/// Tracks the last-seen phase across forwarded snapshots.
///
/// A session is treated as already being in `INIT` when it starts, so the
/// first observed snapshot fires a transition exactly when its phase
/// differs from `INIT`. A direct jump from any phase to `ERROR`/`ABORTED`
/// is a valid transition like any other.
#[derive(Debug)]
pub struct PhaseTracker {
    current: PhaseTag,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            current: PhaseTag::Init,
        }
    }
}

impl PhaseTracker {
    pub fn current(&self) -> PhaseTag {
        self.current
    }

    /// Compares the snapshot's phase against the last-seen one. Unchanged
    /// phases yield `None`; a change updates the tracker and yields the
    /// transition for the caller to recompute the median and publish.
    pub fn observe(&mut self, snapshot: &Snapshot) -> Option<PhaseTransition> {
        if snapshot.phase == self.current {
            return None;
        }

        let transition = PhaseTransition {
            from: self.current,
            to: snapshot.phase,
        };
        self.current = snapshot.phase;

        Some(transition)
    }

    pub fn reset(&mut self) {
        self.current = PhaseTag::Init;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_phase_yields_nothing() {
        let mut tracker = PhaseTracker::default();
        assert_eq!(tracker.observe(&Snapshot::new(PhaseTag::Init)), None);
        assert_eq!(tracker.observe(&Snapshot::new(PhaseTag::Init)), None);
        assert_eq!(tracker.current(), PhaseTag::Init);
    }

    #[test]
    fn phase_change_yields_transition() {
        let mut tracker = PhaseTracker::default();
        let transition = tracker.observe(&Snapshot::new(PhaseTag::Ping)).unwrap();
        assert_eq!(transition.from, PhaseTag::Init);
        assert_eq!(transition.to, PhaseTag::Ping);
        assert_eq!(tracker.current(), PhaseTag::Ping);

        assert_eq!(tracker.observe(&Snapshot::new(PhaseTag::Ping)), None);
    }

    #[test]
    fn expected_progression_fires_once_per_phase() {
        let mut tracker = PhaseTracker::default();
        let phases = [
            PhaseTag::Init,
            PhaseTag::Ping,
            PhaseTag::Down,
            PhaseTag::Up,
            PhaseTag::End,
        ];

        let transitions: Vec<PhaseTransition> = phases
            .iter()
            .filter_map(|phase| tracker.observe(&Snapshot::new(*phase)))
            .collect();

        assert_eq!(transitions.len(), 4);
        assert_eq!(transitions[0].to, PhaseTag::Ping);
        assert_eq!(transitions[3].to, PhaseTag::End);
    }

    #[test]
    fn direct_jump_to_terminal_is_a_valid_transition() {
        let mut tracker = PhaseTracker::default();
        tracker.observe(&Snapshot::new(PhaseTag::Down));

        let transition = tracker.observe(&Snapshot::new(PhaseTag::Error)).unwrap();
        assert_eq!(transition.from, PhaseTag::Down);
        assert_eq!(transition.to, PhaseTag::Error);
    }

    #[test]
    fn reset_returns_to_init() {
        let mut tracker = PhaseTracker::default();
        tracker.observe(&Snapshot::new(PhaseTag::Up));
        tracker.reset();
        assert_eq!(tracker.current(), PhaseTag::Init);
    }
}
