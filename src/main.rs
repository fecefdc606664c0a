// EsoxSolutions.ComponentPool
// Bounded, thread-safe component pool with fuse-driven eviction

// This is just a binary wrapper - the actual library is in lib.rs
// Run demos with: cargo run --example basic

use esox_componentpool::{
    BoxError, ComponentInstance, ComponentInstanceFactory, ComponentPool, PoolConfiguration,
    PoolHandle,
};
use std::sync::Arc;

struct Number(u32);

impl ComponentInstance<u32> for Number {
    fn serve(&self) -> Result<u32, BoxError> {
        Ok(self.0)
    }

    fn validate(&self) -> bool {
        true
    }

    fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

struct Numbers;

impl ComponentInstanceFactory<u32> for Numbers {
    fn create_instance(&self, _pool: &PoolHandle<u32>) -> Result<Arc<dyn ComponentInstance<u32>>, BoxError> {
        Ok(Arc::new(Number(42)))
    }
}

fn main() -> Result<(), BoxError> {
    println!("=== EsoxSolutions.ComponentPool v{} ===", env!("CARGO_PKG_VERSION"));
    println!("See the demos/ directory for usage examples");
    println!("Run: cargo run --example basic");
    println!();

    // Quick demo
    println!("Quick Demo:");
    let pool = ComponentPool::new("demo", Arc::new(Numbers), PoolConfiguration::new().with_min_pool_size(1))?;
    pool.startup()?;

    {
        let number = pool.get_pooled()?;
        println!("  Got component: {}", *number);
    }

    println!("  Free after return: {}", pool.free_size());
    pool.shutdown()?;
    Ok(())
}
