//! Pin manager: owns the backing set, the free queue and the pool lifecycle

use crate::config::PoolConfiguration;
use crate::creation::{ComponentCreationWorker, CreationOutcome};
use crate::errors::{PoolError, PoolResult};
use crate::events::EventDispatcher;
use crate::factory::{ComponentInstance, ComponentInstanceFactory, InstanceKey, StackTrace};
use crate::free_queue::FreeQueue;
use crate::fuse_queue::DeconstructionQueue;
use crate::lifecycle::{LifecycleGate, PoolState};
use crate::metrics::{MetricsSink, MetricsTracker, PoolMetrics};
use crate::pin::ComponentPin;
use crate::pool::PoolHandle;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Pause after a full sweep of rejected pins before creating more
const REJECTION_BACKOFF: Duration = Duration::from_millis(10);

pub(crate) struct ComponentPinManager<C: Send + 'static> {
    name: String,
    pool: PoolHandle<C>,
    factory: Arc<dyn ComponentInstanceFactory<C>>,
    config: PoolConfiguration,
    backing: RwLock<HashMap<InstanceKey, Arc<ComponentPin<C>>>>,
    free_queue: FreeQueue<C>,
    deconstruction: DeconstructionQueue,
    lifecycle: LifecycleGate,
    // Only changed while the backing write lock is held
    size: AtomicUsize,
    tracker: MetricsTracker,
    sink: Arc<dyn MetricsSink>,
    events: EventDispatcher,
}

impl<C: Send + 'static> ComponentPinManager<C> {
    pub fn new(
        name: &str,
        pool: PoolHandle<C>,
        factory: Arc<dyn ComponentInstanceFactory<C>>,
        config: PoolConfiguration,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            name: name.to_string(),
            pool,
            factory,
            deconstruction: DeconstructionQueue::new(name, config.deconstruction_tick),
            config,
            backing: RwLock::new(HashMap::new()),
            free_queue: FreeQueue::new(),
            lifecycle: LifecycleGate::new(),
            size: AtomicUsize::new(0),
            tracker: MetricsTracker::new(),
            sink,
            events: EventDispatcher::new(name),
        }
    }

    pub fn state(&self) -> PoolState {
        self.lifecycle.get()
    }

    pub fn config(&self) -> &PoolConfiguration {
        &self.config
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub fn pool_size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn free_size(&self) -> usize {
        self.free_queue.len()
    }

    pub fn processing_size(&self) -> usize {
        self.pool_size().saturating_sub(self.free_size())
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.tracker
            .get_metrics(self.pool_size(), self.free_size(), self.config.max_pool_size)
    }

    fn track_size(&self) {
        let free = self.free_size();
        self.sink
            .record_sizes(&self.name, free, self.pool_size().saturating_sub(free));
    }

    /// Fill the pool to its startup size; on failure everything created so
    /// far is closed and the pool stays stopped
    pub fn startup(&self) -> PoolResult<()> {
        let transition = loop {
            if let Some(transition) = self.lifecycle.begin(PoolState::Stopped, PoolState::Starting) {
                break transition;
            }
            if self.lifecycle.await_settled() == PoolState::Started {
                return Ok(());
            }
        };

        debug!(pool = %self.name, startup_size = self.config.startup_size(), "Starting pin manager");
        self.free_queue.open();

        match panic::catch_unwind(AssertUnwindSafe(|| self.populate())) {
            Ok(Ok(())) => {
                self.track_size();
                transition.settle(PoolState::Started);
                debug!(pool = %self.name, size = self.pool_size(), "Pin manager started");
                Ok(())
            }
            Ok(Err(error)) => {
                error!(pool = %self.name, %error, "Pin manager failed to start");
                self.tear_down();
                transition.settle(PoolState::Stopped);
                Err(error)
            }
            Err(payload) => {
                error!(pool = %self.name, "Pin manager panicked while starting");
                self.tear_down();
                transition.settle(PoolState::Stopped);
                panic::resume_unwind(payload)
            }
        }
    }

    fn tear_down(&self) {
        self.free_queue.close();
        self.drain();
        self.deconstruction.shutdown();
        self.track_size();
    }

    fn populate(&self) -> PoolResult<()> {
        if self.config.requires_deconstruction() {
            self.deconstruction
                .startup()
                .map_err(|error| PoolError::creation(Box::new(error)))?;
        }

        let target = self.config.startup_size();
        while self.pool_size() < target {
            let instance = self.manufacture_component_instance()?;
            let pin = {
                let mut backing = self.backing.write();
                self.register(&mut backing, instance)
            };
            self.free_queue.put(pin);
        }
        Ok(())
    }

    fn register(
        &self,
        backing: &mut HashMap<InstanceKey, Arc<ComponentPin<C>>>,
        instance: Arc<dyn ComponentInstance<C>>,
    ) -> Arc<ComponentPin<C>> {
        let pin = ComponentPin::new(
            self.pool.clone(),
            &self.config,
            self.deconstruction.index(),
            instance,
        );
        backing.insert(pin.key(), Arc::clone(&pin));
        self.size.fetch_add(1, Ordering::AcqRel);
        pin
    }

    /// Acquire a pin and start a lease on it
    pub fn serve(&self) -> PoolResult<(Arc<ComponentPin<C>>, C)> {
        let started = Instant::now();

        let pin = match self.acquire() {
            Ok(pin) => pin,
            Err(error) => {
                if let PoolError::Timeout(_) = error {
                    MetricsTracker::increment(&self.tracker.acquire_timeouts);
                    self.sink.record_acquire_timeout(&self.name);
                    debug!(pool = %self.name, size = self.pool_size(), "Acquire timed out");
                }
                return Err(error);
            }
        };

        match pin.serve() {
            Ok(component) => {
                MetricsTracker::increment(&self.tracker.total_served);
                self.sink.record_acquire_time(&self.name, started.elapsed());
                self.track_size();
                Ok((pin, component))
            }
            Err(error) => {
                let error = PoolError::serve(error);
                warn!(pool = %self.name, %error, "Component instance failed to serve");
                self.terminate(pin.key(), true);
                Err(error)
            }
        }
    }

    fn acquire(&self) -> PoolResult<Arc<ComponentPin<C>>> {
        let state = self.state();
        if state != PoolState::Started {
            return Err(PoolError::NotStarted(state));
        }

        let wait = self.config.acquire_wait_timeout;
        let mut rejections = Rejections::new(self.pool_size(), Instant::now().checked_add(wait));

        loop {
            while let Some(pin) = self.free_queue.poll() {
                if self.accept(&pin) {
                    return Ok(pin);
                }
                if !rejections.record() {
                    return Err(PoolError::Timeout(wait));
                }
            }

            if let Some(pin) = self.add_component_pin(true)? {
                if self.accept(&pin) {
                    return Ok(pin);
                }
                if !rejections.record() {
                    return Err(PoolError::Timeout(wait));
                }
                continue;
            }

            match self.free_queue.poll_until(rejections.deadline) {
                Some(pin) => {
                    if self.accept(&pin) {
                        return Ok(pin);
                    }
                    if !rejections.record() {
                        return Err(PoolError::Timeout(wait));
                    }
                }
                None => {
                    let state = self.state();
                    if state != PoolState::Started {
                        return Err(PoolError::NotStarted(state));
                    }
                    return Err(PoolError::Timeout(wait));
                }
            }
        }
    }

    /// Whether a pin just taken off the queue (or grown) may be leased;
    /// rejected pins are terminated
    fn accept(&self, pin: &Arc<ComponentPin<C>>) -> bool {
        if pin.is_terminated() {
            self.terminate(pin.key(), true);
            return false;
        }
        if self.config.test_on_acquire && !pin.instance().validate() {
            MetricsTracker::increment(&self.tracker.validation_failures);
            debug!(pool = %self.name, "Component failed validation on acquire");
            self.terminate(pin.key(), true);
            return false;
        }
        true
    }

    /// Grow by one pin if the growth policy allows it
    ///
    /// Forced growth (an acquire found nothing free) may reach
    /// `max_pool_size`; replacement growth only restores `min_pool_size`.
    /// Creation happens under the backing write lock, so factories must not
    /// call back into the pool from `create_instance`.
    pub fn add_component_pin(&self, forced: bool) -> PoolResult<Option<Arc<ComponentPin<C>>>> {
        let mut backing = self.backing.write();
        if !self.lifecycle.is(PoolState::Started) {
            return Ok(None);
        }

        let size = self.pool_size();
        let room = if forced {
            self.config.has_room_for_more(size)
        } else {
            size < self.config.min_pool_size
        };
        if !room {
            return Ok(None);
        }

        let instance = self.manufacture_component_instance()?;
        let pin = self.register(&mut backing, instance);
        drop(backing);

        debug!(pool = %self.name, forced, size = self.pool_size(), "Added component pin");
        Ok(Some(pin))
    }

    /// Create and optionally validate one instance
    pub fn manufacture_component_instance(&self) -> PoolResult<Arc<dyn ComponentInstance<C>>> {
        let timeout = self.config.creation_timeout;

        let created = if timeout.is_zero() {
            self.factory
                .create_instance(&self.pool)
                .map_err(PoolError::creation)
        } else {
            self.create_with_timeout(timeout)
        };

        let instance = match created {
            Ok(instance) => instance,
            Err(error) => {
                MetricsTracker::increment(&self.tracker.creation_failures);
                return Err(error);
            }
        };

        if self.config.test_on_create && !instance.validate() {
            MetricsTracker::increment(&self.tracker.validation_failures);
            MetricsTracker::increment(&self.tracker.creation_failures);
            self.close_instance(&*instance);
            return Err(PoolError::ValidationFailed);
        }

        MetricsTracker::increment(&self.tracker.total_created);
        self.sink.record_creation(&self.name);
        Ok(instance)
    }

    fn create_with_timeout(&self, timeout: Duration) -> PoolResult<Arc<dyn ComponentInstance<C>>> {
        let worker = ComponentCreationWorker::spawn(
            Arc::clone(&self.factory),
            self.pool.clone(),
            &self.name,
        )
        .map_err(|error| PoolError::creation(Box::new(error)))?;

        match worker.await_outcome(timeout) {
            CreationOutcome::Created(instance) => Ok(instance),
            CreationOutcome::Failed(error) => Err(PoolError::creation(error)),
            CreationOutcome::TimedOut => {
                warn!(pool = %self.name, ?timeout, "Component creation timed out");
                Err(PoolError::CreationTimeout {
                    timeout,
                    pool_size: self.pool_size(),
                    free_size: self.free_size(),
                })
            }
        }
    }

    /// A fuse fired on `pin`
    ///
    /// Without prejudice a pin is only removed if it can be pulled out of
    /// the free queue; a leased pin stays marked terminated and is reclaimed
    /// when it comes back.
    pub fn remove(&self, pin: &ComponentPin<C>, with_prejudice: bool) {
        let key = pin.key();
        if with_prejudice || self.free_queue.remove(key) {
            self.terminate(key, true);
        } else {
            debug!(pool = %self.name, "Leased component marked for termination on return");
        }
    }

    /// Take back a served instance
    pub fn process(&self, instance: &dyn ComponentInstance<C>) {
        let key = InstanceKey::of(instance);
        let Some(pin) = self.backing.read().get(&key).cloned() else {
            debug!(pool = %self.name, "Ignoring return of an instance the pool does not own");
            return;
        };

        // Lease reporting reaches listeners, so no lock is held here
        if !pin.free() {
            debug!(pool = %self.name, "Ignoring duplicate return");
            return;
        }
        MetricsTracker::increment(&self.tracker.total_returned);

        if pin.is_terminated() {
            self.terminate(key, true);
            return;
        }

        let backing = self.backing.read();
        if backing.contains_key(&key) && self.lifecycle.is(PoolState::Started) {
            self.free_queue.put(pin);
        }
        drop(backing);
        self.track_size();
    }

    /// Remove and close the pin owning `instance`
    pub fn terminate_instance(&self, instance: &dyn ComponentInstance<C>) {
        self.terminate(InstanceKey::of(instance), true);
    }

    pub fn terminate(&self, key: InstanceKey, allow_replacement: bool) {
        let pin = {
            let mut backing = self.backing.write();
            let Some(pin) = backing.remove(&key) else {
                return;
            };
            self.size.fetch_sub(1, Ordering::AcqRel);
            self.free_queue.remove(key);
            pin
        };

        pin.fizzle();
        self.close_instance(&**pin.instance());
        MetricsTracker::increment(&self.tracker.total_terminated);
        self.sink.record_termination(&self.name);
        debug!(pool = %self.name, size = self.pool_size(), "Terminated component");

        if allow_replacement {
            match self.add_component_pin(false) {
                Ok(Some(replacement)) => {
                    let key = replacement.key();
                    if !self.free_queue.put(replacement) {
                        self.terminate(key, false);
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    error!(pool = %self.name, %error, "Failed to replace terminated component");
                    self.events.report_error(Arc::new(error));
                }
            }
        }
        self.track_size();
    }

    fn close_instance(&self, instance: &dyn ComponentInstance<C>) {
        if let Err(error) = instance.close() {
            error!(pool = %self.name, %error, "Failed to close component instance");
            self.events.report_error(Arc::from(error));
        }
    }

    /// Terminate every leased pin, replacing them up to the minimum size
    pub fn kill_all_processing(&self) {
        let free = self.free_queue.keys();
        let leased: Vec<InstanceKey> = self
            .backing
            .read()
            .keys()
            .filter(|key| !free.contains(key))
            .copied()
            .collect();

        if !leased.is_empty() {
            warn!(pool = %self.name, count = leased.len(), "Killing all processing components");
        }
        for key in leased {
            self.terminate(key, true);
        }
    }

    /// Lease-holder stack traces of every leased instance
    pub fn existential_stack_traces(&self) -> Vec<StackTrace> {
        self.backing
            .read()
            .values()
            .filter(|pin| pin.is_leased())
            .filter_map(|pin| pin.existential_stack_trace())
            .collect()
    }

    pub fn report_lease_time(&self, lease: Duration) {
        self.events.report_lease_time(lease);
        self.sink.record_lease_time(&self.name, lease);
    }

    /// Terminate every pin and stop the scheduler; safe to call repeatedly
    pub fn shutdown(&self) {
        let transition = loop {
            if let Some(transition) = self.lifecycle.begin(PoolState::Started, PoolState::Stopping) {
                break transition;
            }
            if self.lifecycle.await_settled() == PoolState::Stopped {
                return;
            }
        };

        debug!(pool = %self.name, size = self.pool_size(), "Stopping pin manager");
        self.tear_down();
        transition.settle(PoolState::Stopped);
        debug!(pool = %self.name, "Pin manager stopped");
    }

    fn drain(&self) {
        loop {
            let keys: Vec<InstanceKey> = self.backing.read().keys().copied().collect();
            if keys.is_empty() {
                break;
            }
            for key in keys {
                self.terminate(key, false);
            }
        }
        self.free_queue.clear();
    }
}

/// Pins one acquire turned down, and when it should give up
///
/// A sweep is one more rejection than the pool had pins when the acquire
/// began. After each full sweep the caller backs off briefly, and once the
/// deadline has passed it stops at the next sweep boundary. Without a
/// deadline it never stops on rejections alone.
struct Rejections {
    sweep: usize,
    count: usize,
    deadline: Option<Instant>,
}

impl Rejections {
    fn new(pool_size: usize, deadline: Option<Instant>) -> Self {
        Self {
            sweep: pool_size.max(1) + 1,
            count: 0,
            deadline,
        }
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Count one rejection; false means the acquire has timed out
    fn record(&mut self) -> bool {
        self.count += 1;
        if self.count < self.sweep {
            return true;
        }
        if self.expired() {
            return false;
        }
        if self.count % self.sweep == 0 {
            let pause = match self.deadline {
                Some(deadline) => {
                    REJECTION_BACKOFF.min(deadline.saturating_duration_since(Instant::now()))
                }
                None => REJECTION_BACKOFF,
            };
            thread::sleep(pause);
        }
        true
    }
}
