//! Component pool façade

use crate::config::PoolConfiguration;
use crate::errors::{BoxError, PoolError, PoolResult};
use crate::events::{ComponentPoolEventListener, ListenerId};
use crate::factory::{ComponentInstance, ComponentInstanceFactory, StackTrace};
use crate::lifecycle::PoolState;
use crate::metrics::{MetricsExporter, MetricsSink, NoopMetricsSink, PoolMetrics};
use crate::pin::ComponentPin;
use crate::pin_manager::ComponentPinManager;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info};

/// A leased component that is returned to the pool when dropped
pub struct PooledComponent<C: Send + 'static> {
    value: Option<C>,
    instance: Arc<dyn ComponentInstance<C>>,
    pool: PoolHandle<C>,
}

impl<C: Send + 'static> PooledComponent<C> {
    fn new(value: C, instance: Arc<dyn ComponentInstance<C>>, pool: PoolHandle<C>) -> Self {
        Self {
            value: Some(value),
            instance,
            pool,
        }
    }

    /// The instance this component was served from
    pub fn instance(&self) -> &Arc<dyn ComponentInstance<C>> {
        &self.instance
    }

    /// Destroy the instance instead of returning it
    pub fn terminate(mut self) {
        self.value.take();
        self.pool.terminate_instance(&*self.instance);
    }

    /// Take the component out without returning it; the caller becomes
    /// responsible for `return_instance` or `terminate_instance`
    pub fn detach(mut self) -> C {
        self.value.take().expect("Value already taken")
    }
}

impl<C: Send + 'static> Deref for PooledComponent<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        self.value.as_ref().expect("Value already taken")
    }
}

impl<C: Send + 'static> DerefMut for PooledComponent<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value.as_mut().expect("Value already taken")
    }
}

impl<C: Send + 'static> Drop for PooledComponent<C> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            // the component goes before its instance is reused
            drop(value);
            self.pool.return_instance(&*self.instance);
        }
    }
}

pub(crate) struct PoolInner<C: Send + 'static> {
    name: String,
    factory: Arc<dyn ComponentInstanceFactory<C>>,
    manager: ComponentPinManager<C>,
    transition: Mutex<()>,
}

impl<C: Send + 'static> Drop for PoolInner<C> {
    fn drop(&mut self) {
        if self.manager.state() != PoolState::Stopped {
            debug!(pool = %self.name, "Pool dropped while running, shutting down");
            self.manager.shutdown();
        }
    }
}

/// Weak reference to a pool, handed to factories and instances
///
/// A handle never keeps the pool alive; once the pool is gone every call
/// is a no-op.
pub struct PoolHandle<C: Send + 'static> {
    inner: Weak<PoolInner<C>>,
}

impl<C: Send + 'static> Clone for PoolHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<C: Send + 'static> PoolHandle<C> {
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self { inner: Weak::new() }
    }

    /// The pool, if it still exists
    pub fn upgrade(&self) -> Option<ComponentPool<C>> {
        self.inner.upgrade().map(|inner| ComponentPool { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn return_instance(&self, instance: &dyn ComponentInstance<C>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.manager.process(instance);
        }
    }

    pub fn terminate_instance(&self, instance: &dyn ComponentInstance<C>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.manager.terminate_instance(instance);
        }
    }

    /// Forward an error to the pool's error listeners
    pub fn report_error_occurred(&self, error: BoxError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.manager.events().report_error(Arc::from(error));
        }
    }

    pub(crate) fn remove_pin(&self, pin: &ComponentPin<C>, with_prejudice: bool) {
        if let Some(inner) = self.inner.upgrade() {
            inner.manager.remove(pin, with_prejudice);
        }
    }

    pub(crate) fn report_lease_time(&self, lease: Duration) {
        if let Some(inner) = self.inner.upgrade() {
            inner.manager.report_lease_time(lease);
        }
    }
}

/// Bounded, thread-safe pool of components built by a factory
///
/// Cloning is cheap and every clone refers to the same pool.
///
/// # Examples
///
/// ```
/// use esox_componentpool::{
///     BoxError, ComponentInstance, ComponentInstanceFactory, ComponentPool, PoolConfiguration,
///     PoolHandle,
/// };
/// use std::sync::Arc;
///
/// struct Counter;
///
/// impl ComponentInstance<u32> for Counter {
///     fn serve(&self) -> Result<u32, BoxError> { Ok(7) }
///     fn validate(&self) -> bool { true }
///     fn close(&self) -> Result<(), BoxError> { Ok(()) }
/// }
///
/// struct CounterFactory;
///
/// impl ComponentInstanceFactory<u32> for CounterFactory {
///     fn create_instance(&self, _pool: &PoolHandle<u32>) -> Result<Arc<dyn ComponentInstance<u32>>, BoxError> {
///         Ok(Arc::new(Counter))
///     }
/// }
///
/// let pool = ComponentPool::new("counters", Arc::new(CounterFactory), PoolConfiguration::new().with_min_pool_size(1))?;
/// pool.startup()?;
/// {
///     let value = pool.get_pooled()?;
///     assert_eq!(*value, 7);
/// }
/// assert_eq!(pool.free_size(), 1);
/// pool.shutdown()?;
/// # Ok::<(), esox_componentpool::PoolError>(())
/// ```
pub struct ComponentPool<C: Send + 'static> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Send + 'static> Clone for ComponentPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Send + 'static> ComponentPool<C> {
    /// Create a stopped pool; call [`startup`](Self::startup) before use
    pub fn new(
        name: &str,
        factory: Arc<dyn ComponentInstanceFactory<C>>,
        config: PoolConfiguration,
    ) -> PoolResult<Self> {
        Self::with_metrics_sink(name, factory, config, Arc::new(NoopMetricsSink))
    }

    /// Create a stopped pool that reports into `sink`
    pub fn with_metrics_sink(
        name: &str,
        factory: Arc<dyn ComponentInstanceFactory<C>>,
        config: PoolConfiguration,
        sink: Arc<dyn MetricsSink>,
    ) -> PoolResult<Self> {
        config.validate()?;

        let inner = Arc::new_cyclic(|me: &Weak<PoolInner<C>>| PoolInner {
            name: name.to_string(),
            manager: ComponentPinManager::new(
                name,
                PoolHandle { inner: me.clone() },
                Arc::clone(&factory),
                config,
                sink,
            ),
            factory,
            transition: Mutex::new(()),
        });
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> PoolState {
        self.inner.manager.state()
    }

    pub fn config(&self) -> &PoolConfiguration {
        self.inner.manager.config()
    }

    pub fn handle(&self) -> PoolHandle<C> {
        PoolHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Run the factory's `initialize`, fill the pool, then run `startup`
    ///
    /// Starting a started pool does nothing.
    pub fn startup(&self) -> PoolResult<()> {
        let _transition = self.inner.transition.lock();
        if self.state() == PoolState::Started {
            return Ok(());
        }

        self.inner
            .factory
            .initialize()
            .map_err(|error| PoolError::factory("initialize", error))?;

        if let Err(error) = self.inner.manager.startup() {
            self.deconstruct_factory();
            return Err(error);
        }

        if let Err(error) = self.inner.factory.startup() {
            let error = PoolError::factory("startup", error);
            error!(pool = %self.inner.name, %error, "Component factory failed to start");
            self.inner.manager.shutdown();
            self.deconstruct_factory();
            return Err(error);
        }

        info!(pool = %self.inner.name, size = self.pool_size(), "Component pool started");
        Ok(())
    }

    fn deconstruct_factory(&self) {
        if let Err(error) = self.inner.factory.deconstruct() {
            error!(pool = %self.inner.name, %error, "Component factory failed to deconstruct");
        }
    }

    /// Run the factory's `shutdown`, destroy every component, then run
    /// `deconstruct`
    ///
    /// Components are destroyed even if a factory hook fails; the first hook
    /// error is returned. Stopping a stopped pool does nothing.
    pub fn shutdown(&self) -> PoolResult<()> {
        let _transition = self.inner.transition.lock();
        if self.state() == PoolState::Stopped {
            return Ok(());
        }

        let stopped = self
            .inner
            .factory
            .shutdown()
            .map_err(|error| PoolError::factory("shutdown", error));
        self.inner.manager.shutdown();
        let deconstructed = self
            .inner
            .factory
            .deconstruct()
            .map_err(|error| PoolError::factory("deconstruct", error));

        info!(pool = %self.inner.name, "Component pool stopped");
        stopped.and(deconstructed)
    }

    /// Lease a component, waiting up to `acquire_wait_timeout` on a full pool
    ///
    /// Hand the instance back with [`return_instance`](Self::return_instance)
    /// when done.
    pub fn get_component(&self) -> PoolResult<C> {
        self.inner.manager.serve().map(|(_, component)| component)
    }

    /// Lease a component that returns itself when dropped
    pub fn get_pooled(&self) -> PoolResult<PooledComponent<C>> {
        let (pin, component) = self.inner.manager.serve()?;
        Ok(PooledComponent::new(
            component,
            Arc::clone(pin.instance()),
            self.handle(),
        ))
    }

    /// [`get_component`](Self::get_component) on tokio's blocking pool
    pub async fn get_component_async(&self) -> PoolResult<C> {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.get_component())
            .await
            .map_err(|_| PoolError::Cancelled)?
    }

    /// [`get_pooled`](Self::get_pooled) on tokio's blocking pool
    pub async fn get_pooled_async(&self) -> PoolResult<PooledComponent<C>> {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.get_pooled())
            .await
            .map_err(|_| PoolError::Cancelled)?
    }

    /// Give a served instance back; unknown or repeated returns are ignored
    pub fn return_instance(&self, instance: &dyn ComponentInstance<C>) {
        self.inner.manager.process(instance);
    }

    /// Destroy a served instance instead of returning it
    pub fn terminate_instance(&self, instance: &dyn ComponentInstance<C>) {
        self.inner.manager.terminate_instance(instance);
    }

    /// Destroy every leased component
    pub fn kill_all_processing(&self) {
        self.inner.manager.kill_all_processing();
    }

    /// Where each current lease was taken (needs `existentially_aware`)
    pub fn existential_stack_traces(&self) -> Vec<StackTrace> {
        self.inner.manager.existential_stack_traces()
    }

    pub fn pool_size(&self) -> usize {
        self.inner.manager.pool_size()
    }

    pub fn free_size(&self) -> usize {
        self.inner.manager.free_size()
    }

    pub fn processing_size(&self) -> usize {
        self.inner.manager.processing_size()
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        self.inner.manager.metrics()
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format, labelled with the pool name
    pub fn export_metrics_prometheus(&self, tags: Option<&HashMap<String, String>>) -> String {
        MetricsExporter::export_prometheus(&self.get_metrics(), &self.inner.name, tags)
    }

    pub fn add_listener(&self, listener: Arc<dyn ComponentPoolEventListener>) -> ListenerId {
        self.inner.manager.events().add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.manager.events().remove(id)
    }

    pub fn report_error_occurred(&self, error: BoxError) {
        self.inner.manager.events().report_error(Arc::from(error));
    }
}
