//! # EsoxSolutions.ComponentPool
//!
//! Bounded, thread-safe pool of expensive components (connections, sessions,
//! workers) built by a user-supplied factory.
//!
//! ## Features
//!
//! - Blocking acquisition with a configurable wait on a full pool
//! - On-demand growth up to a maximum, replenishment down to a minimum
//! - Creation timeouts and validation on create or on acquire
//! - Deconstruction fuses: maximum lease, idle, unreturned and processing time
//! - RAII leases via [`PooledComponent`] and async acquisition on tokio
//! - Event listeners for errors and lease times
//! - Metrics snapshots, Prometheus export and pluggable metrics sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_componentpool::{
//!     BoxError, ComponentInstance, ComponentInstanceFactory, ComponentPool, PoolConfiguration,
//!     PoolHandle,
//! };
//! use std::sync::Arc;
//!
//! struct Greeting;
//!
//! impl ComponentInstance<String> for Greeting {
//!     fn serve(&self) -> Result<String, BoxError> { Ok("hello".to_string()) }
//!     fn validate(&self) -> bool { true }
//!     fn close(&self) -> Result<(), BoxError> { Ok(()) }
//! }
//!
//! struct Greetings;
//!
//! impl ComponentInstanceFactory<String> for Greetings {
//!     fn create_instance(&self, _pool: &PoolHandle<String>) -> Result<Arc<dyn ComponentInstance<String>>, BoxError> {
//!         Ok(Arc::new(Greeting))
//!     }
//! }
//!
//! let pool = ComponentPool::new("greetings", Arc::new(Greetings), PoolConfiguration::default()).unwrap();
//! pool.startup().unwrap();
//! {
//!     let greeting = pool.get_pooled().unwrap();
//!     println!("Got: {}", *greeting);
//!     // Returned to the pool when `greeting` goes out of scope
//! }
//! pool.shutdown().unwrap();
//! ```

mod config;
mod coordinator;
mod creation;
mod errors;
mod events;
mod factory;
mod free_queue;
mod fuse;
mod fuse_queue;
mod lifecycle;
mod metrics;
mod pin;
mod pin_manager;
mod pool;

#[cfg(test)]
mod testing;

pub use config::PoolConfiguration;
pub use errors::{BoxError, PoolError, PoolResult, SharedError};
pub use events::{ComponentPoolEventListener, ErrorReportingEvent, LeaseTimeReportingEvent, ListenerId};
pub use factory::{ComponentInstance, ComponentInstanceFactory, StackTrace};
pub use lifecycle::PoolState;
pub use metrics::{MetricsExporter, MetricsSink, NoopMetricsSink, PoolMetrics};
#[cfg(feature = "metrics")]
pub use metrics::PrometheusMetricsSink;
pub use pool::{ComponentPool, PoolHandle, PooledComponent};
