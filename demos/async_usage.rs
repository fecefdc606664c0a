//! Async usage examples

use esox_componentpool::{
    BoxError, ComponentInstance, ComponentInstanceFactory, ComponentPool, PoolConfiguration,
    PoolHandle,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

struct Session {
    id: usize,
}

impl ComponentInstance<usize> for Session {
    fn serve(&self) -> Result<usize, BoxError> {
        Ok(self.id)
    }

    fn validate(&self) -> bool {
        true
    }

    fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

#[derive(Default)]
struct SessionFactory {
    next_id: AtomicUsize,
}

impl ComponentInstanceFactory<usize> for SessionFactory {
    fn create_instance(
        &self,
        _pool: &PoolHandle<usize>,
    ) -> Result<Arc<dyn ComponentInstance<usize>>, BoxError> {
        // pretend the handshake is slow
        std::thread::sleep(Duration::from_millis(20));
        Ok(Arc::new(Session {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        }))
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== EsoxSolutions.ComponentPool - Async Examples ===\n");

    // Example 1: Async get
    async_get().await?;

    // Example 2: Async with wait timeout
    async_with_timeout().await?;

    // Example 3: Concurrent access
    concurrent_access().await?;

    Ok(())
}

async fn async_get() -> Result<(), BoxError> {
    println!("1. Async Get:");
    let pool = ComponentPool::new(
        "sessions",
        Arc::new(SessionFactory::default()),
        PoolConfiguration::new().with_min_pool_size(1),
    )?;
    pool.startup()?;

    {
        let session = pool.get_pooled_async().await?;
        println!("   Got session asynchronously: {}", *session);
    }

    pool.shutdown()?;
    println!();
    Ok(())
}

async fn async_with_timeout() -> Result<(), BoxError> {
    println!("2. Async with Timeout:");

    let config = PoolConfiguration::new()
        .with_min_pool_size(1)
        .with_max_pool_size(1)
        .with_acquire_wait_timeout(Duration::from_millis(100));
    let pool = ComponentPool::new("sessions", Arc::new(SessionFactory::default()), config)?;
    pool.startup()?;

    // Hold the only session
    let _session = pool.get_pooled()?;

    // Try to get another (should time out)
    match pool.get_pooled_async().await {
        Ok(_) => println!("   Got session"),
        Err(error) => println!("   Error: {}", error),
    }

    pool.shutdown()?;
    println!();
    Ok(())
}

async fn concurrent_access() -> Result<(), BoxError> {
    println!("3. Concurrent Access:");

    let config = PoolConfiguration::new()
        .with_max_pool_size(3)
        .with_acquire_wait_timeout(Duration::from_secs(1));
    let pool = ComponentPool::new("sessions", Arc::new(SessionFactory::default()), config)?;
    pool.startup()?;

    let mut handles = vec![];

    for task in 0..10 {
        let pool = pool.clone();
        let handle = tokio::spawn(async move {
            match pool.get_pooled_async().await {
                Ok(session) => {
                    println!("   Task {} got session: {}", task, *session);
                    sleep(Duration::from_millis(50)).await;
                }
                Err(error) => println!("   Task {} couldn't get a session: {}", task, error),
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await?;
    }

    println!("   Pool size: {}, free: {}", pool.pool_size(), pool.free_size());
    pool.shutdown()?;
    Ok(())
}
