//! Timed component creation on a short-lived worker thread

use crate::errors::BoxError;
use crate::factory::{ComponentInstance, ComponentInstanceFactory};
use crate::pool::PoolHandle;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

type Created<C> = Result<Arc<dyn ComponentInstance<C>>, BoxError>;

#[derive(Default)]
struct Handoff {
    aborted: bool,
    delivered: bool,
}

pub(crate) enum CreationOutcome<C> {
    Created(Arc<dyn ComponentInstance<C>>),
    Failed(BoxError),
    TimedOut,
}

/// Runs one `create_instance` call so the caller can stop waiting for it
///
/// Whichever of the caller's abort and the worker's delivery happens first
/// decides the outcome; an instance delivered after the abort is closed.
pub(crate) struct ComponentCreationWorker<C: Send + 'static> {
    handoff: Arc<Mutex<Handoff>>,
    result: Receiver<Created<C>>,
}

impl<C: Send + 'static> ComponentCreationWorker<C> {
    pub fn spawn(
        factory: Arc<dyn ComponentInstanceFactory<C>>,
        pool: PoolHandle<C>,
        pool_name: &str,
    ) -> std::io::Result<Self> {
        let (deliver, result) = channel::bounded::<Created<C>>(1);
        let handoff = Arc::new(Mutex::new(Handoff::default()));

        let worker_handoff = Arc::clone(&handoff);
        thread::Builder::new()
            .name(format!("{}-creation", pool_name))
            .spawn(move || {
                let created = factory.create_instance(&pool);

                let mut handoff = worker_handoff.lock();
                if handoff.aborted {
                    drop(handoff);
                    if let Ok(instance) = created {
                        debug!("Closing component created after its creation timed out");
                        if let Err(error) = instance.close() {
                            warn!(%error, "Failed to close abandoned component");
                        }
                    }
                    return;
                }
                handoff.delivered = true;
                let _ = deliver.send(created);
            })?;

        Ok(Self { handoff, result })
    }

    /// Wait up to `timeout` for the worker to finish
    pub fn await_outcome(self, timeout: Duration) -> CreationOutcome<C> {
        match self.result.recv_timeout(timeout) {
            Ok(created) => Self::outcome(created),
            Err(RecvTimeoutError::Timeout) => self.abort(),
            Err(RecvTimeoutError::Disconnected) => {
                CreationOutcome::Failed("creation worker terminated without a result".into())
            }
        }
    }

    /// Give up on the worker unless it delivered in the meantime
    fn abort(self) -> CreationOutcome<C> {
        let mut handoff = self.handoff.lock();
        if handoff.delivered {
            drop(handoff);
            // Delivered between the timeout and the abort
            return match self.result.recv() {
                Ok(created) => Self::outcome(created),
                Err(_) => CreationOutcome::Failed("creation worker vanished".into()),
            };
        }
        handoff.aborted = true;
        CreationOutcome::TimedOut
    }

    fn outcome(created: Created<C>) -> CreationOutcome<C> {
        match created {
            Ok(instance) => CreationOutcome::Created(instance),
            Err(error) => CreationOutcome::Failed(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestComponent, TestFactory};
    use std::sync::atomic::Ordering;

    fn spawn(factory: &Arc<TestFactory>) -> ComponentCreationWorker<TestComponent> {
        let erased: Arc<dyn ComponentInstanceFactory<TestComponent>> = factory.clone();
        ComponentCreationWorker::spawn(erased, PoolHandle::detached(), "creation").unwrap()
    }

    #[test]
    fn test_fast_creation_is_delivered() {
        let factory = Arc::new(TestFactory::default());
        let outcome = spawn(&factory).await_outcome(Duration::from_secs(5));

        assert!(matches!(outcome, CreationOutcome::Created(_)));
        assert_eq!(factory.stats.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factory_error_is_reported() {
        let factory = Arc::new(TestFactory::default());
        factory.fail_creation.store(true, Ordering::SeqCst);

        let outcome = spawn(&factory).await_outcome(Duration::from_secs(5));
        match outcome {
            CreationOutcome::Failed(error) => assert!(error.to_string().contains("refused")),
            _ => panic!("expected a creation failure"),
        }
    }

    #[test]
    fn test_late_instance_is_closed() {
        let factory = Arc::new(TestFactory::default().with_creation_delay(Duration::from_millis(100)));
        let outcome = spawn(&factory).await_outcome(Duration::from_millis(10));
        assert!(matches!(outcome, CreationOutcome::TimedOut));

        thread::sleep(Duration::from_millis(250));
        assert_eq!(factory.stats.created.load(Ordering::SeqCst), 1);
        assert_eq!(factory.stats.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delivery_racing_the_timeout_is_honored() {
        let factory = Arc::new(TestFactory::default().with_creation_delay(Duration::from_millis(50)));
        let worker = spawn(&factory);

        // the caller's wait has already expired; hold the handoff so the
        // worker finishes creating and queues up behind the abort
        let handoff = worker.handoff.lock();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(factory.created(), 1);
        assert!(!handoff.delivered);
        drop(handoff);

        // let the worker publish before the abort takes the handoff
        while !worker.handoff.lock().delivered {
            thread::yield_now();
        }

        assert!(matches!(worker.abort(), CreationOutcome::Created(_)));
        assert_eq!(factory.closed(), 0);
    }

    #[test]
    fn test_abort_before_delivery_times_out() {
        let factory = Arc::new(TestFactory::default().with_creation_delay(Duration::from_millis(50)));
        let worker = spawn(&factory);

        assert!(matches!(worker.abort(), CreationOutcome::TimedOut));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(factory.closed(), 1);
    }
}
