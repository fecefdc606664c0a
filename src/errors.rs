//! Error types for the component pool

use crate::lifecycle::PoolState;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error type returned by factories and component instances
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared form of a collaborator error, so that `PoolError` stays `Clone`
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    Configuration(String),

    #[error("Component creation failed: {0}")]
    Creation(#[source] SharedError),

    #[error(
        "Exceeded timeout({timeout:?}) waiting on element creation (pool size = {pool_size}, free size = {free_size})"
    )]
    CreationTimeout {
        timeout: Duration,
        pool_size: usize,
        free_size: usize,
    },

    #[error("A new element was required, but failed to validate")]
    ValidationFailed,

    #[error("Exceeded the maximum acquire wait time({0:?})")]
    Timeout(Duration),

    #[error("Pool is not in the 'started' state (currently {0})")]
    NotStarted(PoolState),

    #[error("Component factory failed during {phase}: {source}")]
    Factory {
        phase: &'static str,
        #[source]
        source: SharedError,
    },

    #[error("Component instance could not be served: {0}")]
    Serve(#[source] SharedError),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl PoolError {
    pub(crate) fn creation(error: BoxError) -> Self {
        PoolError::Creation(Arc::from(error))
    }

    pub(crate) fn factory(phase: &'static str, error: BoxError) -> Self {
        PoolError::Factory {
            phase,
            source: Arc::from(error),
        }
    }

    pub(crate) fn serve(error: BoxError) -> Self {
        PoolError::Serve(Arc::from(error))
    }

    /// Whether the error reports an exhausted pool rather than a broken one
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::Timeout(_) | PoolError::CreationTimeout { .. })
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
