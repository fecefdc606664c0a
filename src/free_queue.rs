//! FIFO of free pins with timed blocking removal

use crate::factory::InstanceKey;
use crate::pin::ComponentPin;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

struct FreeState<C: Send + 'static> {
    pins: VecDeque<Arc<ComponentPin<C>>>,
    closed: bool,
}

pub(crate) struct FreeQueue<C: Send + 'static> {
    state: Mutex<FreeState<C>>,
    available: Condvar,
}

impl<C: Send + 'static> FreeQueue<C> {
    /// A new queue starts closed, like the pool that owns it
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FreeState {
                pins: VecDeque::new(),
                closed: true,
            }),
            available: Condvar::new(),
        }
    }

    /// Accept pins again, dropping anything left over from a previous run
    pub fn open(&self) {
        let mut state = self.state.lock();
        state.pins.clear();
        state.closed = false;
    }

    /// Refuse new pins and release every blocked poller
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    /// Returns false (and drops the pin) when the queue is closed
    pub fn put(&self, pin: Arc<ComponentPin<C>>) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.pins.push_back(pin);
        drop(state);
        self.available.notify_one();
        true
    }

    pub fn poll(&self) -> Option<Arc<ComponentPin<C>>> {
        self.state.lock().pins.pop_front()
    }

    /// Wait until a pin is free, the deadline passes, or the queue closes;
    /// with no deadline only a pin or the close ends the wait
    pub fn poll_until(&self, deadline: Option<Instant>) -> Option<Arc<ComponentPin<C>>> {
        let mut state = self.state.lock();
        loop {
            if let Some(pin) = state.pins.pop_front() {
                return Some(pin);
            }
            if state.closed {
                return None;
            }
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out() {
                        return state.pins.pop_front();
                    }
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    pub fn remove(&self, key: InstanceKey) -> bool {
        let mut state = self.state.lock();
        match state.pins.iter().position(|pin| pin.key() == key) {
            Some(position) => {
                state.pins.remove(position);
                true
            }
            None => false,
        }
    }

    pub fn keys(&self) -> HashSet<InstanceKey> {
        self.state.lock().pins.iter().map(|pin| pin.key()).collect()
    }

    pub fn clear(&self) {
        self.state.lock().pins.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().pins.len()
    }
}

impl<C: Send + 'static> Default for FreeQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}
