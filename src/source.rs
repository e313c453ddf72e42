//! Source handles.
//!
//! A [`SourceHandle`] owns one producer stream for the duration of a merge and
//! reports each poll as an [`Event`]. Once a handle reports
//! [`Event::Closed`] it is removed from the readiness set and never polled
//! again.

use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};

use futures_core::Stream;

/// A boxed, type-erased source.
///
/// Useful when sources of different concrete types are merged, or when
/// sources are added through a [`Registrar`](crate::Registrar).
pub type BoxSource<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Identifies a source inside a [`ReadinessSet`](crate::readiness::ReadinessSet).
///
/// Ids are unique among the handles a set currently holds and stable for the
/// lifetime of a handle. Once a handle is removed its id may be handed out
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub(crate) usize);

impl SourceId {
    /// The slot this id refers to.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// Lifecycle of a [`SourceHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// The producer may still yield values.
    Active,
    /// The producer signalled exhaustion. Terminal.
    Closed,
}

/// The outcome of polling a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<T> {
    /// The source produced a value and stays active.
    Value(T),
    /// The source is exhausted.
    Closed,
}

impl<T> Event<T> {
    /// Returns `true` for [`Event::Closed`].
    pub fn is_closed(&self) -> bool {
        matches!(self, Event::Closed)
    }
}

/// One producer stream together with its identifier and state.
pub struct SourceHandle<S> {
    id: SourceId,
    state: SourceState,
    stream: Pin<Box<S>>,
}

impl<S> SourceHandle<S> {
    pub(crate) fn new(id: SourceId, stream: S) -> Self {
        Self {
            id,
            state: SourceState::Active,
            stream: Box::pin(stream),
        }
    }

    /// The identifier of this source.
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Returns `true` once the source has reported exhaustion.
    pub fn is_closed(&self) -> bool {
        self.state == SourceState::Closed
    }
}

impl<S: Stream> SourceHandle<S> {
    /// Poll the underlying producer for its next event.
    ///
    /// # Panics
    ///
    /// Panics if the handle already reported [`Event::Closed`]. Closed
    /// handles are removed from consideration before they could be polled.
    pub fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Event<S::Item>> {
        assert!(
            self.state == SourceState::Active,
            "{} polled after it reported closure",
            self.id
        );
        match self.stream.as_mut().poll_next(cx) {
            Poll::Ready(Some(item)) => Poll::Ready(Event::Value(item)),
            Poll::Ready(None) => {
                self.state = SourceState::Closed;
                Poll::Ready(Event::Closed)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> fmt::Debug for SourceHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}
