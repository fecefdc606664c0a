//! Pool configuration options

use crate::errors::{PoolError, PoolResult};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for component pool behavior
///
/// A zero duration disables the corresponding timeout, and a zero
/// `max_pool_size` leaves the pool unbounded.
///
/// # Examples
///
/// ```
/// use esox_componentpool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_min_pool_size(2)
///     .with_max_pool_size(10)
///     .with_acquire_wait_timeout(Duration::from_millis(500))
///     .with_max_idle_time(Duration::from_secs(300));
///
/// assert_eq!(config.max_pool_size, 10);
/// assert!(config.requires_deconstruction());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfiguration {
    /// Number of components created at startup (together with `min_pool_size`)
    pub initial_pool_size: usize,

    /// Size the pool replenishes itself to after terminations
    pub min_pool_size: usize,

    /// Maximum number of components in the pool, 0 for unbounded
    pub max_pool_size: usize,

    /// How long a single component creation may take
    pub creation_timeout: Duration,

    /// How long `get_component` waits for a free component once the pool is full
    pub acquire_wait_timeout: Duration,

    /// Lifetime cap for a component, counted from its creation
    pub max_lease_time: Duration,

    /// How long a component may sit unused in the free queue
    pub max_idle_time: Duration,

    /// How long a leased component may go unreturned before it is destroyed
    pub unreturned_element_timeout: Duration,

    /// How long a single checkout may last before it is destroyed
    pub max_processing_time: Duration,

    /// Validate components right after creation
    pub test_on_create: bool,

    /// Validate components when they leave the free queue
    pub test_on_acquire: bool,

    /// Report lease durations to listeners and the metrics sink
    pub report_lease_time_nanos: bool,

    /// Collect stack traces of leased components for diagnostics
    pub existentially_aware: bool,

    /// Interval at which armed fuses are checked
    pub deconstruction_tick: Duration,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            initial_pool_size: 0,
            min_pool_size: 0,
            max_pool_size: 10,
            creation_timeout: Duration::ZERO,
            acquire_wait_timeout: Duration::ZERO,
            max_lease_time: Duration::ZERO,
            max_idle_time: Duration::ZERO,
            unreturned_element_timeout: Duration::ZERO,
            max_processing_time: Duration::ZERO,
            test_on_create: false,
            test_on_acquire: false,
            report_lease_time_nanos: false,
            existentially_aware: false,
            deconstruction_tick: Duration::from_secs(1),
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether pins need a deconstruction coordinator at all
    pub fn requires_deconstruction(&self) -> bool {
        !self.max_lease_time.is_zero()
            || !self.max_idle_time.is_zero()
            || !self.unreturned_element_timeout.is_zero()
            || !self.max_processing_time.is_zero()
    }

    /// Number of pins created by `startup`
    pub fn startup_size(&self) -> usize {
        self.min_pool_size.max(self.initial_pool_size)
    }

    /// Whether the pool may grow past `current` components
    pub(crate) fn has_room_for_more(&self, current: usize) -> bool {
        self.max_pool_size == 0 || current < self.max_pool_size
    }

    /// Check the settings that cannot be expressed by the field types alone
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_componentpool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new()
    ///     .with_min_pool_size(5)
    ///     .with_max_pool_size(2);
    ///
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_pool_size > 0 {
            if self.min_pool_size > self.max_pool_size {
                return Err(PoolError::Configuration(format!(
                    "min_pool_size ({}) must not exceed max_pool_size ({})",
                    self.min_pool_size, self.max_pool_size
                )));
            }
            if self.initial_pool_size > self.max_pool_size {
                return Err(PoolError::Configuration(format!(
                    "initial_pool_size ({}) must not exceed max_pool_size ({})",
                    self.initial_pool_size, self.max_pool_size
                )));
            }
        }
        if self.requires_deconstruction() && self.deconstruction_tick.is_zero() {
            return Err(PoolError::Configuration(
                "deconstruction_tick must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the initial pool size
    pub fn with_initial_pool_size(mut self, size: usize) -> Self {
        self.initial_pool_size = size;
        self
    }

    /// Set the minimum pool size
    pub fn with_min_pool_size(mut self, size: usize) -> Self {
        self.min_pool_size = size;
        self
    }

    /// Set the maximum pool size (0 = unbounded)
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Bound the time a single component creation may take
    pub fn with_creation_timeout(mut self, timeout: Duration) -> Self {
        self.creation_timeout = timeout;
        self
    }

    /// Set how long acquisition waits on a full pool
    pub fn with_acquire_wait_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_wait_timeout = timeout;
        self
    }

    pub fn with_max_lease_time(mut self, lease: Duration) -> Self {
        self.max_lease_time = lease;
        self
    }

    pub fn with_max_idle_time(mut self, idle: Duration) -> Self {
        self.max_idle_time = idle;
        self
    }

    pub fn with_unreturned_element_timeout(mut self, timeout: Duration) -> Self {
        self.unreturned_element_timeout = timeout;
        self
    }

    pub fn with_max_processing_time(mut self, processing: Duration) -> Self {
        self.max_processing_time = processing;
        self
    }

    /// Enable validation of freshly created components
    pub fn with_test_on_create(mut self, enabled: bool) -> Self {
        self.test_on_create = enabled;
        self
    }

    /// Enable validation of components as they are acquired
    pub fn with_test_on_acquire(mut self, enabled: bool) -> Self {
        self.test_on_acquire = enabled;
        self
    }

    pub fn with_lease_time_reporting(mut self, enabled: bool) -> Self {
        self.report_lease_time_nanos = enabled;
        self
    }

    pub fn with_existential_awareness(mut self, enabled: bool) -> Self {
        self.existentially_aware = enabled;
        self
    }

    /// Set the fuse scheduler interval
    pub fn with_deconstruction_tick(mut self, tick: Duration) -> Self {
        self.deconstruction_tick = tick;
        self
    }
}
