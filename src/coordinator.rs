//! Per-pin aggregate of deconstruction fuses

use crate::config::PoolConfiguration;
use crate::factory::StackTrace;
use crate::fuse::{DeconstructionFuse, FuseKind};
use crate::fuse_queue::FuseIndex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// What a coordinator needs from the pin it guards
pub(crate) trait Detonator: Send + Sync {
    /// Mark the pin terminated and ask the pool to remove it
    fn kaboom(&self, with_prejudice: bool);

    /// Stack trace of the current lease holder, if recorded
    fn holder_stack_trace(&self) -> Option<StackTrace>;
}

pub(crate) struct DeconstructionCoordinator {
    fuses: Vec<Arc<DeconstructionFuse>>,
    terminated: AtomicBool,
    pin: Weak<dyn Detonator>,
}

impl DeconstructionCoordinator {
    /// Build the coordinator for one pin, or `None` when no fuse is configured
    pub fn new(
        config: &PoolConfiguration,
        index: &Arc<FuseIndex>,
        pin: Weak<dyn Detonator>,
    ) -> Option<Arc<Self>> {
        if !config.requires_deconstruction() {
            return None;
        }

        let enabled = [
            (FuseKind::MaxLeaseTime, config.max_lease_time),
            (FuseKind::MaxIdleTime, config.max_idle_time),
            (FuseKind::UnreturnedElementTimeout, config.unreturned_element_timeout),
            (FuseKind::MaxProcessingTime, config.max_processing_time),
        ];

        Some(Arc::new_cyclic(|me: &Weak<Self>| Self {
            fuses: enabled
                .into_iter()
                .filter(|(_, timeout)| !timeout.is_zero())
                .map(|(kind, timeout)| DeconstructionFuse::new(kind, timeout, index, me.clone()))
                .collect(),
            terminated: AtomicBool::new(false),
            pin,
        }))
    }

    #[cfg(test)]
    pub fn fuses(&self) -> &[Arc<DeconstructionFuse>] {
        &self.fuses
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Arm the fuses that count from the pin's construction
    pub fn created(&self) {
        for fuse in &self.fuses {
            fuse.created();
        }
    }

    pub fn free(&self) {
        if self.is_terminated() {
            return;
        }
        for fuse in &self.fuses {
            fuse.free();
        }
    }

    pub fn serve(&self) {
        if self.is_terminated() {
            return;
        }
        for fuse in &self.fuses {
            fuse.serve();
        }
    }

    /// Disarm everything; the pool is removing the pin itself
    pub fn abort(&self) {
        self.terminated.store(true, Ordering::Release);
        for fuse in &self.fuses {
            fuse.abort();
        }
    }

    /// First fuse to get here wins; the rest are disarmed
    pub fn ignite(&self, igniting: &DeconstructionFuse) {
        if self
            .terminated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        for fuse in &self.fuses {
            if fuse.ordinal() != igniting.ordinal() {
                fuse.abort();
            }
        }

        let Some(pin) = self.pin.upgrade() else {
            return;
        };

        match igniting.kind() {
            FuseKind::MaxProcessingTime => match pin.holder_stack_trace() {
                Some(trace) => warn!(
                    kind = ?igniting.kind(),
                    "Component exceeded its maximum processing time; lease taken at:\n{}",
                    trace
                ),
                None => warn!(kind = ?igniting.kind(), "Component exceeded its maximum processing time"),
            },
            kind => debug!(?kind, prejudicial = kind.is_prejudicial(), "Deconstruction fuse ignited"),
        }

        pin.kaboom(igniting.is_prejudicial());
    }
}
