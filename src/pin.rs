//! A pin holds one component instance for its whole life in the pool

use crate::config::PoolConfiguration;
use crate::coordinator::{DeconstructionCoordinator, Detonator};
use crate::errors::BoxError;
use crate::factory::{ComponentInstance, InstanceKey, StackTrace};
use crate::fuse_queue::FuseIndex;
use crate::pool::PoolHandle;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

pub(crate) struct ComponentPin<C: Send + 'static> {
    instance: Arc<dyn ComponentInstance<C>>,
    key: InstanceKey,
    pool: PoolHandle<C>,
    coordinator: Option<Arc<DeconstructionCoordinator>>,
    lease_start: Mutex<Option<Instant>>,
    leased: AtomicBool,
    terminated: AtomicBool,
    report_lease_time: bool,
    existentially_aware: bool,
}

impl<C: Send + 'static> ComponentPin<C> {
    /// Wrap a fresh instance; fuses counting from creation are armed here
    pub fn new(
        pool: PoolHandle<C>,
        config: &PoolConfiguration,
        index: &Arc<FuseIndex>,
        instance: Arc<dyn ComponentInstance<C>>,
    ) -> Arc<Self> {
        let pin = Arc::new_cyclic(|me: &Weak<Self>| {
            let detonator: Weak<dyn Detonator> = me.clone();
            Self {
                key: InstanceKey::of(&*instance),
                instance,
                pool,
                coordinator: DeconstructionCoordinator::new(config, index, detonator),
                lease_start: Mutex::new(None),
                leased: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                report_lease_time: config.report_lease_time_nanos,
                existentially_aware: config.existentially_aware,
            }
        });

        if let Some(coordinator) = &pin.coordinator {
            coordinator.created();
        }
        pin
    }

    pub fn key(&self) -> InstanceKey {
        self.key
    }

    pub fn instance(&self) -> &Arc<dyn ComponentInstance<C>> {
        &self.instance
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn is_leased(&self) -> bool {
        self.leased.load(Ordering::Acquire)
    }

    /// Start a lease: obtain the component and arm the checkout fuses
    pub fn serve(&self) -> Result<C, BoxError> {
        let component = self.instance.serve()?;

        *self.lease_start.lock() = Some(Instant::now());
        self.leased.store(true, Ordering::Release);
        if let Some(coordinator) = &self.coordinator {
            coordinator.serve();
        }
        Ok(component)
    }

    /// End a lease; false if the pin was not leased (a duplicate return)
    pub fn free(&self) -> bool {
        if !self.leased.swap(false, Ordering::AcqRel) {
            return false;
        }

        let started = self.lease_start.lock().take();
        if self.report_lease_time
            && let Some(started) = started
        {
            self.pool.report_lease_time(started.elapsed());
        }

        if let Some(coordinator) = &self.coordinator {
            coordinator.free();
        }
        true
    }

    /// Terminated by the pool itself: disarm without calling back
    pub fn fizzle(&self) {
        self.terminated.store(true, Ordering::Release);
        if let Some(coordinator) = &self.coordinator {
            coordinator.abort();
        }
    }

    pub fn existential_stack_trace(&self) -> Option<StackTrace> {
        if self.existentially_aware {
            self.instance.existential_stack_trace()
        } else {
            None
        }
    }
}

impl<C: Send + 'static> Detonator for ComponentPin<C> {
    /// Terminated by a fuse: ask the pool to remove the pin
    fn kaboom(&self, with_prejudice: bool) {
        self.terminated.store(true, Ordering::Release);
        self.pool.remove_pin(self, with_prejudice);
    }

    fn holder_stack_trace(&self) -> Option<StackTrace> {
        self.existential_stack_trace()
    }
}
