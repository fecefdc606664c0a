//! Pool event listeners

use crate::errors::SharedError;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// An error reported by the pool or by one of its instances
#[derive(Debug, Clone)]
pub struct ErrorReportingEvent {
    pub pool_name: String,
    pub error: SharedError,
}

/// Duration of one completed lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseTimeReportingEvent<'a> {
    pub pool_name: &'a str,
    pub lease_time_nanos: u128,
}

impl LeaseTimeReportingEvent<'_> {
    pub fn lease_time(&self) -> Duration {
        Duration::from_nanos(self.lease_time_nanos.min(u64::MAX as u128) as u64)
    }
}

/// Receives pool notifications; both methods default to doing nothing
///
/// Listeners are called synchronously on the thread that raised the event
/// and must not block.
pub trait ComponentPoolEventListener: Send + Sync {
    fn report_error_occurred(&self, _event: &ErrorReportingEvent) {}

    fn report_lease_time(&self, _event: &LeaseTimeReportingEvent<'_>) {}
}

/// Handle returned by listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub(crate) struct EventDispatcher {
    pool_name: String,
    listeners: DashMap<ListenerId, Arc<dyn ComponentPoolEventListener>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new(pool_name: &str) -> Self {
        Self {
            pool_name: pool_name.to_string(),
            listeners: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn add(&self, listener: Arc<dyn ComponentPoolEventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, listener);
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn ComponentPoolEventListener>> {
        self.listeners.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn report_error(&self, error: SharedError) {
        if self.listeners.is_empty() {
            return;
        }
        let event = ErrorReportingEvent {
            pool_name: self.pool_name.clone(),
            error,
        };
        // Listeners may (de)register from inside a callback
        for listener in self.snapshot() {
            listener.report_error_occurred(&event);
        }
    }

    pub fn report_lease_time(&self, lease_time: Duration) {
        if self.listeners.is_empty() {
            return;
        }
        let event = LeaseTimeReportingEvent {
            pool_name: &self.pool_name,
            lease_time_nanos: lease_time.as_nanos(),
        };
        for listener in self.snapshot() {
            listener.report_lease_time(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        errors: AtomicUsize,
        leases: AtomicUsize,
    }

    impl ComponentPoolEventListener for Counting {
        fn report_error_occurred(&self, event: &ErrorReportingEvent) {
            assert_eq!(event.pool_name, "events");
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn report_lease_time(&self, event: &LeaseTimeReportingEvent<'_>) {
            assert_eq!(event.lease_time(), Duration::from_millis(7));
            self.leases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_dispatch_reaches_registered_listeners_only() {
        let dispatcher = EventDispatcher::new("events");
        let listener = Arc::new(Counting::default());
        let id = dispatcher.add(listener.clone());

        dispatcher.report_error(Arc::new(std::io::Error::other("boom")));
        dispatcher.report_lease_time(Duration::from_millis(7));
        assert_eq!(listener.errors.load(Ordering::SeqCst), 1);
        assert_eq!(listener.leases.load(Ordering::SeqCst), 1);

        assert!(dispatcher.remove(id));
        assert!(!dispatcher.remove(id));
        dispatcher.report_lease_time(Duration::from_millis(7));
        assert_eq!(listener.leases.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.len(), 0);
    }
}
