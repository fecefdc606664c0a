//! Time-ordered index of armed fuses and the scheduler thread that fires them

use crate::fuse::DeconstructionFuse;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Position of an armed fuse; equal ignition times fall back to the ordinal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct FuseKey {
    pub ignition: Instant,
    pub ordinal: u64,
}

struct ArmedFuse {
    fuse: Arc<DeconstructionFuse>,
    generation: u64,
}

/// Ordered set of armed fuses shared by every pin of one pool
pub(crate) struct FuseIndex {
    entries: Mutex<BTreeMap<FuseKey, ArmedFuse>>,
    ordinals: AtomicU64,
}

impl FuseIndex {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            ordinals: AtomicU64::new(0),
        }
    }

    pub fn next_ordinal(&self) -> u64 {
        self.ordinals.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, key: FuseKey, fuse: Arc<DeconstructionFuse>, generation: u64) {
        self.entries.lock().insert(key, ArmedFuse { fuse, generation });
    }

    pub fn remove(&self, key: &FuseKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[cfg(test)]
    pub fn earliest(&self) -> Option<Instant> {
        self.entries.lock().first_key_value().map(|(key, _)| key.ignition)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn pop_due(&self, now: Instant) -> Option<ArmedFuse> {
        let mut entries = self.entries.lock();
        match entries.first_key_value() {
            Some((key, _)) if key.ignition <= now => entries.pop_first().map(|(_, armed)| armed),
            _ => None,
        }
    }

    /// Ignite every fuse due at `now`, earliest first; returns how many fired
    pub fn fire_due(&self, now: Instant) -> usize {
        let mut fired = 0;
        // The index lock is released before igniting; ignition re-enters it
        while let Some(armed) = self.pop_due(now) {
            let ArmedFuse { fuse, generation } = armed;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| fuse.ignite(generation)));
            if outcome.is_err() {
                error!(ordinal = fuse.ordinal(), kind = ?fuse.kind(), "Fuse ignition panicked");
            }
            fired += 1;
        }
        fired
    }
}

impl Default for FuseIndex {
    fn default() -> Self {
        Self::new()
    }
}

struct Scheduler {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the scheduler thread servicing a [`FuseIndex`]
pub(crate) struct DeconstructionQueue {
    index: Arc<FuseIndex>,
    tick: Duration,
    thread_name: String,
    scheduler: Mutex<Option<Scheduler>>,
}

impl DeconstructionQueue {
    pub fn new(pool_name: &str, tick: Duration) -> Self {
        Self {
            index: Arc::new(FuseIndex::new()),
            tick,
            thread_name: format!("{}-deconstruction", pool_name),
            scheduler: Mutex::new(None),
        }
    }

    pub fn index(&self) -> &Arc<FuseIndex> {
        &self.index
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.scheduler.lock().is_some()
    }

    fn scheduler_thread(&self) -> Option<ThreadId> {
        self.scheduler.lock().as_ref().map(|scheduler| scheduler.handle.thread().id())
    }

    /// Start the scheduler thread if it is not already running
    pub fn startup(&self) -> std::io::Result<()> {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            return Ok(());
        }

        let (stop, stopped) = channel::bounded::<()>(1);
        let index = Arc::clone(&self.index);
        let tick = self.tick;
        let handle = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(tick) {
                        Err(RecvTimeoutError::Timeout) => {
                            let fired = index.fire_due(Instant::now());
                            if fired > 0 {
                                debug!(fired, "Deconstruction tick");
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        *scheduler = Some(Scheduler { stop, handle });
        Ok(())
    }

    /// Stop the scheduler, waiting for an in-flight tick to finish, and
    /// forget every armed fuse
    pub fn shutdown(&self) {
        let on_scheduler = self.scheduler_thread() == Some(thread::current().id());
        let scheduler = self.scheduler.lock().take();

        if let Some(Scheduler { stop, handle }) = scheduler {
            let _ = stop.send(());
            // A pool dropped from inside an ignition cannot join its own thread
            if !on_scheduler && handle.join().is_err() {
                error!(thread = %self.thread_name, "Deconstruction scheduler panicked");
            }
        }
        self.index.clear();
    }
}

impl Drop for DeconstructionQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_order_by_time_then_ordinal() {
        let now = Instant::now();
        let early = FuseKey { ignition: now, ordinal: 9 };
        let tie = FuseKey { ignition: now, ordinal: 10 };
        let late = FuseKey { ignition: now + Duration::from_millis(1), ordinal: 0 };

        assert!(early < tie);
        assert!(tie < late);
    }

    #[test]
    fn test_ordinals_are_monotonic() {
        let index = FuseIndex::new();
        let first = index.next_ordinal();
        assert!(index.next_ordinal() > first);
        assert_eq!(index.len(), 0);
        assert!(index.earliest().is_none());
        assert_eq!(index.fire_due(Instant::now()), 0);
    }

    #[test]
    fn test_scheduler_starts_once_and_stops() {
        let queue = DeconstructionQueue::new("test", Duration::from_millis(5));
        queue.startup().unwrap();
        queue.startup().unwrap();
        assert!(queue.is_running());

        thread::sleep(Duration::from_millis(20));
        queue.shutdown();
        assert!(!queue.is_running());

        // restartable
        queue.startup().unwrap();
        assert!(queue.is_running());
    }
}
