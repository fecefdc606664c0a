//! Instrumented factory shared by the unit tests

use crate::config::PoolConfiguration;
use crate::errors::BoxError;
use crate::factory::{ComponentInstance, ComponentInstanceFactory, StackTrace};
use crate::pool::{ComponentPool, PoolHandle};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct FactoryStats {
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub served: AtomicUsize,
    pub validated: AtomicUsize,
    pub initialized: AtomicUsize,
    pub started: AtomicUsize,
    pub shut_down: AtomicUsize,
    pub deconstructed: AtomicUsize,
}

/// Knobs flipped by tests; instances read them through the shared `Arc`
#[derive(Default)]
pub(crate) struct Switches {
    pub invalid: AtomicBool,
    pub refuse_serve: AtomicBool,
}

pub(crate) struct TestFactory {
    pub stats: Arc<FactoryStats>,
    pub switches: Arc<Switches>,
    pub fail_creation: AtomicBool,
    pub panic_on_creation: AtomicBool,
    /// Creation fails once this many instances exist
    pub creation_limit: AtomicUsize,
    pub fail_startup_hook: AtomicBool,
    creation_delay: Duration,
    next_id: AtomicUsize,
}

impl Default for TestFactory {
    fn default() -> Self {
        Self {
            stats: Arc::new(FactoryStats::default()),
            switches: Arc::new(Switches::default()),
            fail_creation: AtomicBool::new(false),
            panic_on_creation: AtomicBool::new(false),
            creation_limit: AtomicUsize::new(usize::MAX),
            fail_startup_hook: AtomicBool::new(false),
            creation_delay: Duration::ZERO,
            next_id: AtomicUsize::new(0),
        }
    }
}

impl TestFactory {
    pub fn with_creation_delay(mut self, delay: Duration) -> Self {
        self.creation_delay = delay;
        self
    }

    /// Build an instance outside of any pool
    pub fn instance(&self) -> Arc<dyn ComponentInstance<TestComponent>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Arc::new_cyclic(|me| TestInstance {
            id,
            me: me.clone(),
            stats: Arc::clone(&self.stats),
            switches: Arc::clone(&self.switches),
            holder: Mutex::new(None),
        })
    }

    pub fn created(&self) -> usize {
        self.stats.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }
}

impl ComponentInstanceFactory<TestComponent> for TestFactory {
    fn create_instance(
        &self,
        _pool: &PoolHandle<TestComponent>,
    ) -> Result<Arc<dyn ComponentInstance<TestComponent>>, BoxError> {
        if !self.creation_delay.is_zero() {
            thread::sleep(self.creation_delay);
        }
        if self.fail_creation.load(Ordering::SeqCst) {
            return Err("factory refused to create".into());
        }
        if self.panic_on_creation.load(Ordering::SeqCst) {
            panic!("factory panicked while creating");
        }
        if self.created() >= self.creation_limit.load(Ordering::SeqCst) {
            return Err("factory creation limit refused".into());
        }
        Ok(self.instance())
    }

    fn initialize(&self) -> Result<(), BoxError> {
        self.stats.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn startup(&self) -> Result<(), BoxError> {
        if self.fail_startup_hook.load(Ordering::SeqCst) {
            return Err("startup hook refused".into());
        }
        self.stats.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) -> Result<(), BoxError> {
        self.stats.shut_down.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deconstruct(&self) -> Result<(), BoxError> {
        self.stats.deconstructed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct TestInstance {
    id: usize,
    me: Weak<TestInstance>,
    stats: Arc<FactoryStats>,
    switches: Arc<Switches>,
    holder: Mutex<Option<StackTrace>>,
}

impl ComponentInstance<TestComponent> for TestInstance {
    fn serve(&self) -> Result<TestComponent, BoxError> {
        if self.switches.refuse_serve.load(Ordering::SeqCst) {
            return Err("instance refused to serve".into());
        }
        let instance: Arc<dyn ComponentInstance<TestComponent>> =
            self.me.upgrade().ok_or("instance already dropped")?;
        *self.holder.lock() = Some(StackTrace::new(vec![format!("testing::holder::{}", self.id)]));
        self.stats.served.fetch_add(1, Ordering::SeqCst);
        Ok(TestComponent { id: self.id, instance })
    }

    fn validate(&self) -> bool {
        self.stats.validated.fetch_add(1, Ordering::SeqCst);
        !self.switches.invalid.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<(), BoxError> {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn existential_stack_trace(&self) -> Option<StackTrace> {
        self.holder.lock().clone()
    }
}

/// What callers get out of a test pool
pub(crate) struct TestComponent {
    pub id: usize,
    pub instance: Arc<dyn ComponentInstance<TestComponent>>,
}

impl fmt::Debug for TestComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestComponent").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Configuration with a tick short enough for fuse tests
pub(crate) fn fast_config() -> PoolConfiguration {
    PoolConfiguration::new().with_deconstruction_tick(Duration::from_millis(5))
}

pub(crate) fn started_pool(
    config: PoolConfiguration,
) -> (ComponentPool<TestComponent>, Arc<TestFactory>) {
    started_pool_with(config, TestFactory::default())
}

pub(crate) fn started_pool_with(
    config: PoolConfiguration,
    factory: TestFactory,
) -> (ComponentPool<TestComponent>, Arc<TestFactory>) {
    let factory = Arc::new(factory);
    let pool = ComponentPool::new("test", factory.clone(), config).unwrap();
    pool.startup().unwrap();
    (pool, factory)
}
