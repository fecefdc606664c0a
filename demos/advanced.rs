//! Advanced features: fuses, listeners, metrics sinks, forced termination

use esox_componentpool::{
    BoxError, ComponentInstance, ComponentInstanceFactory, ComponentPool,
    ComponentPoolEventListener, ErrorReportingEvent, LeaseTimeReportingEvent, PoolConfiguration,
    PoolHandle, PrometheusMetricsSink, StackTrace,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct Connection {
    id: usize,
    data: String,
}

struct ConnectionInstance {
    id: usize,
    pool: PoolHandle<Connection>,
    holder: Mutex<Option<StackTrace>>,
}

impl ComponentInstance<Connection> for ConnectionInstance {
    fn serve(&self) -> Result<Connection, BoxError> {
        *self.holder.lock() = Some(StackTrace::capture());
        Ok(Connection {
            id: self.id,
            data: format!("Connection-{}", self.id),
        })
    }

    fn validate(&self) -> bool {
        true
    }

    fn close(&self) -> Result<(), BoxError> {
        if self.id == 0 {
            // instances can report trouble through their pool handle
            self.pool
                .report_error_occurred(format!("connection {} closed uncleanly", self.id).into());
        }
        Ok(())
    }

    fn existential_stack_trace(&self) -> Option<StackTrace> {
        self.holder.lock().clone()
    }
}

#[derive(Default)]
struct ConnectionFactory {
    next_id: AtomicUsize,
}

impl ComponentInstanceFactory<Connection> for ConnectionFactory {
    fn create_instance(
        &self,
        pool: &PoolHandle<Connection>,
    ) -> Result<Arc<dyn ComponentInstance<Connection>>, BoxError> {
        Ok(Arc::new(ConnectionInstance {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            pool: pool.clone(),
            holder: Mutex::new(None),
        }))
    }
}

struct PrintingListener;

impl ComponentPoolEventListener for PrintingListener {
    fn report_error_occurred(&self, event: &ErrorReportingEvent) {
        println!("   [{}] error: {}", event.pool_name, event.error);
    }

    fn report_lease_time(&self, event: &LeaseTimeReportingEvent<'_>) {
        println!("   [{}] lease took {:?}", event.pool_name, event.lease_time());
    }
}

fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== EsoxSolutions.ComponentPool - Advanced Features ===\n");

    // Example 1: Idle and unreturned fuses
    fuses()?;

    // Example 2: Event listeners
    listeners()?;

    // Example 3: Stack traces and forced termination
    kill_processing()?;

    // Example 4: Prometheus metrics
    prometheus_export()?;

    Ok(())
}

fn fuses() -> Result<(), BoxError> {
    println!("1. Deconstruction Fuses:");

    let config = PoolConfiguration::new()
        .with_min_pool_size(1)
        .with_max_pool_size(4)
        .with_max_idle_time(Duration::from_millis(300))
        .with_unreturned_element_timeout(Duration::from_millis(200))
        .with_deconstruction_tick(Duration::from_millis(50));
    let pool = ComponentPool::new("fuses", Arc::new(ConnectionFactory::default()), config)?;
    pool.startup()?;

    let leaked = pool.get_component()?;
    println!("   Leaked {:?}", leaked);

    {
        let extra = pool.get_pooled()?;
        println!("   Briefly used {}", extra.data);
    }
    println!("   Pool size: {}, free: {}", pool.pool_size(), pool.free_size());

    println!("   Waiting for the fuses...");
    thread::sleep(Duration::from_millis(600));
    println!("   Pool size: {}, free: {}", pool.pool_size(), pool.free_size());
    println!("   Terminated so far: {}", pool.get_metrics().total_terminated);

    pool.shutdown()?;
    println!();
    Ok(())
}

fn listeners() -> Result<(), BoxError> {
    println!("2. Event Listeners:");

    let config = PoolConfiguration::new()
        .with_min_pool_size(1)
        .with_lease_time_reporting(true);
    let pool = ComponentPool::new("listeners", Arc::new(ConnectionFactory::default()), config)?;
    let id = pool.add_listener(Arc::new(PrintingListener));
    pool.startup()?;

    {
        let _connection = pool.get_pooled()?;
        thread::sleep(Duration::from_millis(25));
    }

    pool.shutdown()?;
    pool.remove_listener(id);
    println!();
    Ok(())
}

fn kill_processing() -> Result<(), BoxError> {
    println!("3. Stack Traces and Kill All Processing:");

    let config = PoolConfiguration::new()
        .with_min_pool_size(2)
        .with_existential_awareness(true);
    let pool = ComponentPool::new("processing", Arc::new(ConnectionFactory::default()), config)?;
    pool.startup()?;

    let first = pool.get_pooled()?;
    let second = pool.get_pooled()?;
    println!("   Leased {} and {}", first.id, second.id);

    for trace in pool.existential_stack_traces() {
        let top = trace.frames().first().cloned().unwrap_or_default();
        println!("   Lease taken at: {}", top);
    }

    pool.kill_all_processing();
    println!("   Processing after kill: {}", pool.processing_size());
    println!("   Free after kill: {}", pool.free_size());

    // late returns of killed instances are ignored
    drop(first);
    drop(second);

    pool.shutdown()?;
    println!();
    Ok(())
}

fn prometheus_export() -> Result<(), BoxError> {
    println!("4. Prometheus Metrics Export:");

    let sink = Arc::new(PrometheusMetricsSink::new()?);
    let pool = ComponentPool::with_metrics_sink(
        "example_pool",
        Arc::new(ConnectionFactory::default()),
        PoolConfiguration::new().with_min_pool_size(3),
        sink.clone(),
    )?;
    pool.startup()?;

    {
        let _first = pool.get_pooled()?;
        let _second = pool.get_pooled()?;

        let mut tags = HashMap::new();
        tags.insert("service".to_string(), "example".to_string());
        tags.insert("env".to_string(), "dev".to_string());

        println!("{}", pool.export_metrics_prometheus(Some(&tags)));
    }

    println!("{}", sink.gather_text());
    pool.shutdown()?;
    Ok(())
}
