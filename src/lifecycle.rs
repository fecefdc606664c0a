//! Pool lifecycle states and the gate that serializes transitions between them

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PoolState {
    Stopped = 0,
    Starting = 1,
    Started = 2,
    Stopping = 3,
}

impl PoolState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PoolState::Starting,
            2 => PoolState::Started,
            3 => PoolState::Stopping,
            _ => PoolState::Stopped,
        }
    }

    /// Whether another caller is in the middle of a startup or shutdown
    pub fn is_transitional(self) -> bool {
        matches!(self, PoolState::Starting | PoolState::Stopping)
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolState::Stopped => "stopped",
            PoolState::Starting => "starting",
            PoolState::Started => "started",
            PoolState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Compare-and-set state holder; losers of a transition race park on a
/// condvar until the winner settles the state.
pub(crate) struct LifecycleGate {
    state: AtomicU8,
    lock: Mutex<()>,
    settled: Condvar,
}

impl LifecycleGate {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PoolState::Stopped as u8),
            lock: Mutex::new(()),
            settled: Condvar::new(),
        }
    }

    pub fn get(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is(&self, state: PoolState) -> bool {
        self.get() == state
    }

    /// Attempt `from -> to`; only one concurrent caller can win
    ///
    /// The winner holds the returned [`Transition`] until it settles. If it
    /// is dropped unsettled, for instance while unwinding, the gate falls
    /// back to `Stopped` so waiters are not parked forever.
    pub fn begin(&self, from: PoolState, to: PoolState) -> Option<Transition<'_>> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Transition {
                gate: self,
                settled: false,
            })
    }

    /// Publish the final state of a transition and wake every waiter
    fn settle(&self, state: PoolState) {
        self.state.store(state as u8, Ordering::Release);
        let _guard = self.lock.lock();
        self.settled.notify_all();
    }

    /// Block while another caller is starting or stopping the pool
    pub fn await_settled(&self) -> PoolState {
        let mut guard = self.lock.lock();
        loop {
            let state = self.get();
            if !state.is_transitional() {
                return state;
            }
            self.settled.wait(&mut guard);
        }
    }
}

/// A transition in flight, won through [`LifecycleGate::begin`]
#[must_use = "dropping a transition settles the gate as stopped"]
pub(crate) struct Transition<'a> {
    gate: &'a LifecycleGate,
    settled: bool,
}

impl Transition<'_> {
    pub fn settle(mut self, state: PoolState) {
        self.settled = true;
        self.gate.settle(state);
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.gate.settle(PoolState::Stopped);
        }
    }
}

impl Default for LifecycleGate {
    fn default() -> Self {
        Self::new()
    }
}
