//! The set of active sources the coordinator waits on.
//!
//! Every source slot gets its own intermediate waker. When a source wakes, its
//! slot is flagged in a shared bitset and the coordinator is woken; `wait_any`
//! then polls only flagged slots. A source that returned `Pending` is not
//! polled again until it wakes, and a source that closed is removed, so a
//! waiting coordinator never spins.
//!
//! # Fairness
//!
//! Ready slots are serviced round-robin: each scan starts just past the slot
//! serviced last. A source that stays ready is therefore serviced at least
//! once per rotation of the set.

use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use futures_core::Stream;
use slab::Slab;
use tracing::trace;

use crate::error::EmptySetError;
use crate::source::{Event, SourceHandle, SourceId};
use crate::tracker::CompletionTracker;
use crate::utils::WakerVec;

/// The active sources of a merge, keyed by [`SourceId`].
///
/// Only handles in the [`Active`](crate::source::SourceState::Active) state
/// are held. A handle that reports closure must be taken out with
/// [`remove`](ReadinessSet::remove) before the next call to
/// [`wait_any`](ReadinessSet::wait_any).
pub struct ReadinessSet<S> {
    handles: Slab<SourceHandle<S>>,
    wakers: WakerVec,
    cursor: usize,
    registered: bool,
    polls: usize,
}

impl<S> ReadinessSet<S> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            handles: Slab::new(),
            wakers: WakerVec::default(),
            cursor: 0,
            registered: false,
            polls: 0,
        }
    }

    /// The number of active sources.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if no source is active.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Returns `true` if `id` names an active source.
    pub fn contains(&self, id: SourceId) -> bool {
        self.handles.contains(id.0)
    }

    /// The ids of all active sources, in slot order.
    pub fn ids(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.handles.iter().map(|(_, handle)| handle.id())
    }

    /// The number of times a source has been polled through this set.
    pub fn polls(&self) -> usize {
        self.polls
    }

    /// Insert the initial sources, all marked ready.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn register<I>(&mut self, sources: I) -> Vec<SourceId>
    where
        I: IntoIterator<Item = S>,
    {
        assert!(!self.registered, "sources registered more than once");
        self.registered = true;
        sources.into_iter().map(|source| self.insert(source)).collect()
    }

    /// Add one source while the merge is running, keeping `tracker` in step.
    pub fn insert_dynamic(&mut self, source: S, tracker: &mut CompletionTracker) -> SourceId {
        let id = self.insert(source);
        tracker.increment();
        id
    }

    fn insert(&mut self, source: S) -> SourceId {
        let entry = self.handles.vacant_entry();
        let id = SourceId(entry.key());
        entry.insert(SourceHandle::new(id, source));
        self.wakers.grow(id.0 + 1);
        // New sources have never been polled, so they start out ready.
        self.wakers.readiness().set_ready(id.0);
        id
    }

    /// Drop a closed source and count its closure in `tracker`.
    ///
    /// Returns `true` if this was the last active source.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not in the set or has not reported closure.
    pub fn remove(&mut self, id: SourceId, tracker: &mut CompletionTracker) -> bool {
        let handle = self
            .handles
            .try_remove(id.0)
            .unwrap_or_else(|| panic!("{id} is not in the readiness set"));
        assert!(handle.is_closed(), "{id} removed while still active");
        self.wakers.readiness().clear_ready(id.0);
        let last = tracker.decrement();
        trace!(%id, remaining = tracker.remaining(), "source closed");
        last
    }
}

impl<S: Stream> ReadinessSet<S> {
    /// Wait until some active source has an event.
    ///
    /// Resolves to `Err(EmptySetError)` if the set is empty.
    pub fn wait_any(&mut self) -> WaitAny<'_, S> {
        WaitAny { set: self }
    }

    /// Poll for the next event from any active source.
    ///
    /// On `Pending`, the waker in `cx` is woken once some source becomes
    /// ready.
    pub fn poll_wait_any(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(SourceId, Event<S::Item>), EmptySetError>> {
        if self.handles.is_empty() {
            return Poll::Ready(Err(EmptySetError));
        }

        let mut readiness = self.wakers.readiness();
        readiness.set_waker(cx.waker());
        loop {
            let Some(index) = readiness.next_ready(self.cursor) else {
                // Nothing is ready yet
                return Poll::Pending;
            };
            readiness.clear_ready(index);
            // unlock readiness so a source can wake itself while being polled
            drop(readiness);
            self.cursor = index + 1;

            if let (Some(handle), Some(waker)) = (self.handles.get_mut(index), self.wakers.get(index))
            {
                let mut cx = Context::from_waker(waker);
                self.polls += 1;
                match handle.poll_event(&mut cx) {
                    Poll::Ready(Event::Value(item)) => {
                        // Mark ourselves as ready again because we need to poll for the next item.
                        self.wakers.readiness().set_ready(index);
                        return Poll::Ready(Ok((handle.id(), Event::Value(item))));
                    }
                    Poll::Ready(Event::Closed) => {
                        return Poll::Ready(Ok((handle.id(), Event::Closed)));
                    }
                    Poll::Pending => {}
                }
            }

            readiness = self.wakers.readiness();
        }
    }
}

impl<S> Default for ReadinessSet<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for ReadinessSet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessSet")
            .field("len", &self.handles.len())
            .field("polls", &self.polls)
            .finish()
    }
}

/// Future returned by [`ReadinessSet::wait_any`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct WaitAny<'a, S> {
    set: &'a mut ReadinessSet<S>,
}

impl<S: Stream> Future for WaitAny<'_, S> {
    type Output = Result<(SourceId, Event<S::Item>), EmptySetError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.set.poll_wait_any(cx)
    }
}

impl<S> fmt::Debug for WaitAny<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WaitAny").field(&self.set).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::executor::LocalPool;
    use futures::task::LocalSpawnExt;
    use futures_lite::future::block_on;
    use futures_lite::stream;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn empty_set_errors() {
        let mut set: ReadinessSet<stream::Empty<u8>> = ReadinessSet::new();
        assert!(set.is_empty());
        assert_eq!(block_on(set.wait_any()), Err(EmptySetError));
    }

    #[test]
    fn drains_and_removes() {
        block_on(async {
            let mut set = ReadinessSet::new();
            let ids = set.register(vec![stream::iter(vec![1, 2]), stream::iter(vec![])]);
            let mut tracker = CompletionTracker::new(set.len());
            assert_eq!(ids.len(), 2);

            let mut values = vec![];
            loop {
                match set.wait_any().await.unwrap() {
                    (_, Event::Value(n)) => values.push(n),
                    (id, Event::Closed) => {
                        if set.remove(id, &mut tracker) {
                            break;
                        }
                    }
                }
                assert_eq!(set.len(), tracker.remaining());
            }
            assert_eq!(values, [1, 2]);
            assert!(set.is_empty());
            assert_eq!(set.polls(), 4);
        })
    }

    #[test]
    fn ready_sources_are_serviced_round_robin() {
        block_on(async {
            let mut set = ReadinessSet::new();
            let ids = set.register(vec![stream::repeat(0), stream::repeat(1), stream::repeat(2)]);

            let mut serviced = vec![];
            for _ in 0..9 {
                let (id, event) = set.wait_any().await.unwrap();
                assert!(!event.is_closed());
                serviced.push(id);
            }
            let expected: Vec<_> = ids.iter().cycle().take(9).copied().collect();
            assert_eq!(serviced, expected);
        })
    }

    #[test]
    #[should_panic(expected = "registered more than once")]
    fn register_twice_panics() {
        let mut set = ReadinessSet::new();
        set.register(vec![stream::once(1)]);
        set.register(vec![stream::once(2)]);
    }

    #[test]
    #[should_panic(expected = "removed while still active")]
    fn removing_active_source_panics() {
        let mut set = ReadinessSet::new();
        let ids = set.register(vec![stream::once(1)]);
        let mut tracker = CompletionTracker::new(1);
        set.remove(ids[0], &mut tracker);
    }

    /// Sources backed by channels return `Pending` until their producer
    /// sends, so this exercises the slot wakers.
    #[test]
    fn wakes_on_channel_sends() {
        let mut pool = LocalPool::new();
        let (send_a, recv_a) = mpsc::unbounded();
        let (send_b, recv_b) = mpsc::unbounded::<u32>();
        let polls = Rc::new(RefCell::new(0));
        let polls2 = polls.clone();

        pool.spawner()
            .spawn_local(async move {
                let mut set = ReadinessSet::new();
                set.register(vec![recv_a, recv_b]);
                let mut tracker = CompletionTracker::new(set.len());
                let mut sum = 0;
                while !tracker.is_complete() {
                    match set.wait_any().await.unwrap() {
                        (_, Event::Value(n)) => sum += n,
                        (id, Event::Closed) => {
                            set.remove(id, &mut tracker);
                        }
                    }
                }
                assert_eq!(sum, 6);
                *polls2.borrow_mut() = set.polls();
            })
            .unwrap();

        pool.run_until_stalled();
        drop(send_b);
        pool.run_until_stalled();
        for n in 1..=3 {
            send_a.unbounded_send(n).unwrap();
            pool.run_until_stalled();
        }
        drop(send_a);
        pool.run();

        // Each value costs one ready poll plus one pending poll; each closure
        // costs one poll. Nothing is polled while idle.
        assert!(*polls.borrow() <= 3 * 2 + 2 + 2);
    }
}
