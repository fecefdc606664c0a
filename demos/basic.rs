//! Basic usage examples for ComponentPool

use esox_componentpool::{
    BoxError, ComponentInstance, ComponentInstanceFactory, ComponentPool, PoolConfiguration,
    PoolHandle,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct Connection {
    id: usize,
}

impl ComponentInstance<String> for Connection {
    fn serve(&self) -> Result<String, BoxError> {
        Ok(format!("Connection-{}", self.id))
    }

    fn validate(&self) -> bool {
        true
    }

    fn close(&self) -> Result<(), BoxError> {
        println!("   Closing connection {}", self.id);
        Ok(())
    }
}

#[derive(Default)]
struct ConnectionFactory {
    next_id: AtomicUsize,
}

impl ComponentInstanceFactory<String> for ConnectionFactory {
    fn create_instance(
        &self,
        _pool: &PoolHandle<String>,
    ) -> Result<Arc<dyn ComponentInstance<String>>, BoxError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        println!("   Opening connection {}", id);
        Ok(Arc::new(Connection { id }))
    }
}

fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== EsoxSolutions.ComponentPool - Basic Examples ===\n");

    // Example 1: Simple pool
    simple_pool()?;

    // Example 2: Bounded pool with a wait
    bounded_pool()?;

    // Example 3: Manual return
    manual_return()?;

    // Example 4: Metrics
    metrics()?;

    Ok(())
}

fn simple_pool() -> Result<(), BoxError> {
    println!("1. Simple Pool:");
    let pool = ComponentPool::new(
        "simple",
        Arc::new(ConnectionFactory::default()),
        PoolConfiguration::new().with_min_pool_size(2),
    )?;
    pool.startup()?;

    {
        let connection = pool.get_pooled()?;
        println!("   Got component: {}", *connection);
        // Returned automatically when dropped
    }

    println!("   Free after return: {}", pool.free_size());
    pool.shutdown()?;
    println!();
    Ok(())
}

fn bounded_pool() -> Result<(), BoxError> {
    println!("2. Bounded Pool:");

    let config = PoolConfiguration::new()
        .with_min_pool_size(1)
        .with_max_pool_size(2)
        .with_acquire_wait_timeout(Duration::from_millis(100));
    let pool = ComponentPool::new("bounded", Arc::new(ConnectionFactory::default()), config)?;
    pool.startup()?;

    let first = pool.get_pooled()?;
    let second = pool.get_pooled()?;
    println!("   Leased: {} and {}", *first, *second);
    println!("   Pool size: {}, processing: {}", pool.pool_size(), pool.processing_size());

    match pool.get_pooled() {
        Ok(_) => println!("   Unexpected third component"),
        Err(error) => println!("   Third acquire: {}", error),
    }

    drop(first);
    let third = pool.get_pooled()?;
    println!("   After a return: {}", *third);

    drop(second);
    drop(third);
    pool.shutdown()?;
    println!();
    Ok(())
}

fn manual_return() -> Result<(), BoxError> {
    println!("3. Manual Return:");
    let pool = ComponentPool::new(
        "manual",
        Arc::new(ConnectionFactory::default()),
        PoolConfiguration::new().with_min_pool_size(1),
    )?;
    pool.startup()?;

    let pooled = pool.get_pooled()?;
    let instance = Arc::clone(pooled.instance());
    let name = pooled.detach();
    println!("   Detached: {}", name);
    println!("   Free while detached: {}", pool.free_size());

    pool.return_instance(&*instance);
    println!("   Free after return_instance: {}", pool.free_size());

    pool.shutdown()?;
    println!();
    Ok(())
}

fn metrics() -> Result<(), BoxError> {
    println!("4. Metrics:");
    let pool = ComponentPool::new(
        "metrics",
        Arc::new(ConnectionFactory::default()),
        PoolConfiguration::new().with_min_pool_size(3),
    )?;
    pool.startup()?;

    {
        let _first = pool.get_pooled()?;
        let _second = pool.get_pooled()?;
        let metrics = pool.get_metrics();
        println!("   Utilization: {:.1}%", metrics.utilization * 100.0);
        println!("   Processing: {}, Free: {}", metrics.processing_size, metrics.free_size);
    }

    println!("\n   Metrics:");
    for (key, value) in pool.export_metrics() {
        println!("     {}: {}", key, value);
    }

    pool.shutdown()?;
    Ok(())
}
