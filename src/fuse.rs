//! Deconstruction fuses: absolute-time triggers that reclaim a pin

use crate::coordinator::DeconstructionCoordinator;
use crate::fuse_queue::{FuseIndex, FuseKey};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// The rule a fuse follows
///
/// | Kind | Armed | Prejudicial |
/// |---|---|---|
/// | `MaxLeaseTime` | once, when the pin is created | no |
/// | `MaxIdleTime` | at creation and whenever the pin is freed | no |
/// | `UnreturnedElementTimeout` | whenever the pin is served | yes |
/// | `MaxProcessingTime` | whenever the pin is served | yes |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum FuseKind {
    MaxLeaseTime,
    MaxIdleTime,
    UnreturnedElementTimeout,
    MaxProcessingTime,
}

impl FuseKind {
    /// Prejudicial fuses remove the pin even if it is still leased
    pub fn is_prejudicial(self) -> bool {
        matches!(
            self,
            FuseKind::UnreturnedElementTimeout | FuseKind::MaxProcessingTime
        )
    }
}

#[derive(Debug, Default)]
struct FuseState {
    armed: Option<FuseKey>,
    generation: u64,
}

/// One timer attached to one pin's coordinator
///
/// Each arm or abort bumps the generation; the scheduler hands the
/// generation it saw back to [`ignite`](Self::ignite), so an entry that was
/// popped just before a re-arm cannot fire.
pub(crate) struct DeconstructionFuse {
    kind: FuseKind,
    timeout: Duration,
    ordinal: u64,
    index: Arc<FuseIndex>,
    coordinator: Weak<DeconstructionCoordinator>,
    state: Mutex<FuseState>,
}

impl DeconstructionFuse {
    pub fn new(
        kind: FuseKind,
        timeout: Duration,
        index: &Arc<FuseIndex>,
        coordinator: Weak<DeconstructionCoordinator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            timeout,
            ordinal: index.next_ordinal(),
            index: Arc::clone(index),
            coordinator,
            state: Mutex::new(FuseState::default()),
        })
    }

    pub fn kind(&self) -> FuseKind {
        self.kind
    }

    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    pub fn is_prejudicial(&self) -> bool {
        self.kind.is_prejudicial()
    }

    #[cfg(test)]
    pub fn ignition_time(&self) -> Option<Instant> {
        self.state.lock().armed.map(|key| key.ignition)
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.state.lock().armed.is_some()
    }

    /// (Re)arm to fire at `ignition`
    pub fn arm(self: &Arc<Self>, ignition: Instant) {
        let mut state = self.state.lock();
        if let Some(previous) = state.armed.take() {
            self.index.remove(&previous);
        }
        state.generation = state.generation.wrapping_add(1);

        let key = FuseKey {
            ignition,
            ordinal: self.ordinal,
        };
        self.index.insert(key, Arc::clone(self), state.generation);
        state.armed = Some(key);
    }

    /// A timeout too large to land on the clock leaves the fuse disarmed
    fn arm_from_now(self: &Arc<Self>) {
        match Instant::now().checked_add(self.timeout) {
            Some(ignition) => self.arm(ignition),
            None => self.abort(),
        }
    }

    /// Disarm; a no-op if the fuse is not armed
    pub fn abort(&self) {
        let mut state = self.state.lock();
        if let Some(previous) = state.armed.take() {
            self.index.remove(&previous);
        }
        state.generation = state.generation.wrapping_add(1);
    }

    /// The pin was just constructed (and is about to be free or served)
    pub fn created(self: &Arc<Self>) {
        match self.kind {
            FuseKind::MaxLeaseTime | FuseKind::MaxIdleTime => self.arm_from_now(),
            FuseKind::UnreturnedElementTimeout | FuseKind::MaxProcessingTime => {}
        }
    }

    /// The pin went back to the free queue
    pub fn free(self: &Arc<Self>) {
        match self.kind {
            FuseKind::MaxLeaseTime => {}
            FuseKind::MaxIdleTime => self.arm_from_now(),
            FuseKind::UnreturnedElementTimeout | FuseKind::MaxProcessingTime => self.abort(),
        }
    }

    /// The pin was handed to a caller
    pub fn serve(self: &Arc<Self>) {
        match self.kind {
            FuseKind::MaxLeaseTime => {}
            FuseKind::MaxIdleTime => self.abort(),
            FuseKind::UnreturnedElementTimeout | FuseKind::MaxProcessingTime => {
                self.arm_from_now()
            }
        }
    }

    /// Called by the scheduler after removing this fuse from the index
    pub fn ignite(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.generation != generation || state.armed.is_none() {
                return;
            }
            state.armed = None;
        }

        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.ignite(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached(kind: FuseKind, index: &Arc<FuseIndex>) -> Arc<DeconstructionFuse> {
        DeconstructionFuse::new(kind, Duration::from_secs(60), index, Weak::new())
    }

    #[test]
    fn test_prejudice_by_kind() {
        assert!(!FuseKind::MaxLeaseTime.is_prejudicial());
        assert!(!FuseKind::MaxIdleTime.is_prejudicial());
        assert!(FuseKind::UnreturnedElementTimeout.is_prejudicial());
        assert!(FuseKind::MaxProcessingTime.is_prejudicial());
    }

    #[test]
    fn test_armed_iff_present_in_index() {
        let index = Arc::new(FuseIndex::new());
        let fuse = detached(FuseKind::MaxIdleTime, &index);

        fuse.created();
        assert!(fuse.is_armed());
        assert_eq!(index.len(), 1);

        // re-arming replaces the entry instead of adding one
        fuse.free();
        assert_eq!(index.len(), 1);

        fuse.serve();
        assert!(!fuse.is_armed());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_lease_fuse_ignores_traffic() {
        let index = Arc::new(FuseIndex::new());
        let fuse = detached(FuseKind::MaxLeaseTime, &index);

        fuse.created();
        let ignition = fuse.ignition_time();
        fuse.serve();
        fuse.free();

        assert_eq!(fuse.ignition_time(), ignition);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_serve_arms_and_free_disarms_checkout_fuses() {
        let index = Arc::new(FuseIndex::new());
        let unreturned = detached(FuseKind::UnreturnedElementTimeout, &index);
        let processing = detached(FuseKind::MaxProcessingTime, &index);

        unreturned.created();
        processing.created();
        assert_eq!(index.len(), 0);

        unreturned.serve();
        processing.serve();
        assert_eq!(index.len(), 2);

        unreturned.free();
        processing.free();
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_unreachable_timeout_leaves_fuse_disarmed() {
        let index = Arc::new(FuseIndex::new());
        let idle = DeconstructionFuse::new(FuseKind::MaxIdleTime, Duration::MAX, &index, Weak::new());
        let processing =
            DeconstructionFuse::new(FuseKind::MaxProcessingTime, Duration::MAX, &index, Weak::new());

        idle.created();
        idle.free();
        processing.serve();

        assert!(!idle.is_armed());
        assert!(!processing.is_armed());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_stale_generation_does_not_fire() {
        let index = Arc::new(FuseIndex::new());
        let fuse = detached(FuseKind::MaxProcessingTime, &index);

        fuse.serve();
        let stale = fuse.state.lock().generation;
        fuse.free();
        fuse.serve();

        fuse.ignite(stale);
        assert!(fuse.is_armed());
    }
}
