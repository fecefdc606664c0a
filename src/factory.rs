//! Collaborator traits implemented by the embedding application

use crate::errors::BoxError;
use crate::pool::PoolHandle;
use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;

/// A constructed component owned by exactly one pin
///
/// The pool never inspects the instance beyond these calls. Instances are
/// identified by address, so an instance handed to
/// [`ComponentPool::return_instance`](crate::ComponentPool::return_instance)
/// must be the same allocation the factory created.
pub trait ComponentInstance<C>: Send + Sync + 'static {
    /// Produce the component handed to the caller for one lease
    fn serve(&self) -> Result<C, BoxError>;

    /// Whether the instance is still usable
    fn validate(&self) -> bool;

    /// Release the underlying resource
    fn close(&self) -> Result<(), BoxError>;

    /// Where the current lease was taken, if the instance records it
    fn existential_stack_trace(&self) -> Option<StackTrace> {
        None
    }
}

/// Creates instances and takes part in the pool's lifecycle
///
/// `initialize` runs before any pins exist and `startup` after the initial
/// pins were created; `shutdown` runs before pins are destroyed and
/// `deconstruct` afterwards.
pub trait ComponentInstanceFactory<C: Send + 'static>: Send + Sync + 'static {
    fn create_instance(&self, pool: &PoolHandle<C>) -> Result<Arc<dyn ComponentInstance<C>>, BoxError>;

    fn initialize(&self) -> Result<(), BoxError> {
        Ok(())
    }

    fn startup(&self) -> Result<(), BoxError> {
        Ok(())
    }

    fn shutdown(&self) -> Result<(), BoxError> {
        Ok(())
    }

    fn deconstruct(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Captured call stack of a lease holder
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackTrace {
    frames: Vec<String>,
}

impl StackTrace {
    pub fn new(frames: Vec<String>) -> Self {
        Self { frames }
    }

    /// Capture the current thread's stack regardless of `RUST_BACKTRACE`
    pub fn capture() -> Self {
        let rendered = Backtrace::force_capture().to_string();
        Self {
            frames: rendered
                .lines()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .collect(),
        }
    }

    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.frames {
            writeln!(f, "\tat {}", frame)?;
        }
        Ok(())
    }
}

/// Identity of an instance inside the backing set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct InstanceKey(usize);

impl InstanceKey {
    pub fn of<C>(instance: &dyn ComponentInstance<C>) -> Self {
        InstanceKey(instance as *const dyn ComponentInstance<C> as *const () as usize)
    }
}
