use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Wake, Waker};

use fixedbitset::FixedBitSet;

/// Tracks which source slots are "ready" and should be polled.
#[derive(Debug)]
pub(crate) struct Readiness {
    ready_count: usize,
    readiness_list: FixedBitSet,
    parent_waker: Option<Waker>,
}

impl Readiness {
    /// Create a new instance of readiness with every slot marked not ready.
    pub(crate) fn new(len: usize) -> Self {
        Self {
            ready_count: 0,
            readiness_list: FixedBitSet::with_capacity(len),
            parent_waker: None,
        }
    }

    /// Set the ready state to `true` for the given index
    ///
    /// Returns the old ready state for this id
    pub(crate) fn set_ready(&mut self, index: usize) -> bool {
        if !self.readiness_list[index] {
            self.ready_count += 1;
            self.readiness_list.set(index, true);
            false
        } else {
            true
        }
    }

    /// Set the ready state to `false` for the given index
    ///
    /// Returns whether the index was previously ready
    pub(crate) fn clear_ready(&mut self, index: usize) -> bool {
        if self.readiness_list[index] {
            self.ready_count -= 1;
            self.readiness_list.set(index, false);
            true
        } else {
            false
        }
    }

    /// Returns `true` if any of the slots are ready.
    pub(crate) fn any_ready(&self) -> bool {
        self.ready_count > 0
    }

    /// The first ready slot at or after `from`, wrapping around to the start.
    pub(crate) fn next_ready(&self, from: usize) -> Option<usize> {
        if !self.any_ready() {
            return None;
        }
        self.readiness_list
            .ones()
            .find(|&index| index >= from)
            .or_else(|| self.readiness_list.ones().next())
    }

    /// Access the parent waker.
    #[inline]
    pub(crate) fn parent_waker(&self) -> Option<&Waker> {
        self.parent_waker.as_ref()
    }

    /// Set the parent `Waker`. This needs to be called at the start of every
    /// `poll` function.
    pub(crate) fn set_waker(&mut self, parent_waker: &Waker) {
        match &mut self.parent_waker {
            Some(prev) => prev.clone_from(parent_waker),
            None => self.parent_waker = Some(parent_waker.clone()),
        }
    }

    /// Grow to `len` slots. New slots start out not ready.
    pub(crate) fn grow(&mut self, len: usize) {
        self.readiness_list.grow(len);
    }
}

/// Marks one slot ready and forwards the wake-up to the parent waker.
#[derive(Debug, Clone)]
pub(crate) struct SlotWaker {
    index: usize,
    readiness: Arc<Mutex<Readiness>>,
}

impl Wake for SlotWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref()
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let mut readiness = lock(&self.readiness);
        // Only the not-ready -> ready edge needs to reach the coordinator.
        if !readiness.set_ready(self.index) {
            if let Some(parent) = readiness.parent_waker() {
                parent.wake_by_ref();
            }
        }
    }
}

/// One intermediate waker per source slot, all sharing one `Readiness`.
pub(crate) struct WakerVec {
    wakers: Vec<Waker>,
    readiness: Arc<Mutex<Readiness>>,
}

impl Default for WakerVec {
    fn default() -> Self {
        Self::new(0)
    }
}

impl WakerVec {
    /// Create a new instance of `WakerVec`.
    pub(crate) fn new(len: usize) -> Self {
        let readiness = Arc::new(Mutex::new(Readiness::new(len)));
        let mut wakers = Self {
            wakers: Vec::with_capacity(len),
            readiness,
        };
        wakers.grow(len);
        wakers
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Waker> {
        self.wakers.get(index)
    }

    /// Lock the shared `Readiness`.
    pub(crate) fn readiness(&self) -> MutexGuard<'_, Readiness> {
        lock(&self.readiness)
    }

    /// Grow to at least `len` slots.
    pub(crate) fn grow(&mut self, len: usize) {
        if len <= self.wakers.len() {
            return;
        }
        let mut index = self.wakers.len();
        self.wakers.resize_with(len, || {
            let waker = Arc::new(SlotWaker {
                index,
                readiness: self.readiness.clone(),
            })
            .into();
            index += 1;
            waker
        });
        lock(&self.readiness).grow(len);
    }
}

// A poisoned lock only means a source panicked mid-wake; the bitset is still
// consistent because every mutation is a single set/clear.
fn lock(readiness: &Mutex<Readiness>) -> MutexGuard<'_, Readiness> {
    readiness.lock().unwrap_or_else(PoisonError::into_inner)
}
