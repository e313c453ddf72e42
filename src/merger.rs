use core::fmt;
use core::future::{self, Future};
use core::pin::Pin;
use core::task::{ready, Context, Poll};
use std::time::Duration;

use async_io::Timer;
use futures_channel::mpsc;
use futures_core::Stream;
use pin_project::{pin_project, pinned_drop};
use tracing::{debug, error};

use crate::error::{MergeError, RegisterError};
use crate::readiness::ReadinessSet;
use crate::sink::{self, Output, OutputSink};
use crate::source::Event;
use crate::tracker::CompletionTracker;

/// Events handled in one poll of [`Run`] before it yields to the executor.
const YIELD_BUDGET: usize = 128;

/// Where a [`Merger`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Sources are being waited on and values forwarded.
    Running,
    /// Every source closed, or the merge was cancelled; the output is being
    /// closed.
    ///
    /// The output is closed synchronously, so this state only lasts for the
    /// poll that ends the merge and is never returned by
    /// [`Merger::state`].
    Draining,
    /// The output is closed. The merger cannot be run again.
    Terminated,
}

/// Counters describing the work a merge has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Values handed to the output.
    pub forwarded: usize,
    /// Sources that reported closure and were removed.
    pub closed: usize,
    /// Times any source was polled.
    pub polls: usize,
    /// Times the coordinator suspended because no source was ready.
    pub suspensions: usize,
}

/// Configures a [`Merger`].
///
/// # Example
///
/// ```
/// use futures_fan_in::MergerBuilder;
/// use futures_lite::stream;
/// use std::time::Duration;
///
/// let merger = MergerBuilder::new()
///     .output_capacity(16)
///     .wait_timeout(Duration::from_secs(5))
///     .build(vec![stream::iter(0..4), stream::iter(4..8)]);
/// assert_eq!(merger.active_sources(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MergerBuilder {
    output_capacity: usize,
    wait_timeout: Option<Duration>,
}

impl MergerBuilder {
    /// Create a builder with an unbounded output and no wait timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the output channel to `capacity` values. `0` means unbounded.
    pub fn output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    /// Give up if no source produces an event for `timeout`.
    ///
    /// The timer only runs while the coordinator waits on its sources; time
    /// spent waiting for room in a full output does not count.
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Create the merger over `sources`.
    pub fn build<I, S>(self, sources: I) -> Merger<S>
    where
        I: IntoIterator<Item = S>,
        S: Stream,
    {
        let mut set = ReadinessSet::new();
        set.register(sources);
        let tracker = CompletionTracker::new(set.len());
        let (sink, output) = sink::channel(self.output_capacity);
        let (registrar, registrations) = mpsc::unbounded();
        Merger {
            set,
            tracker,
            sink,
            output: Some(output),
            registrar,
            registrations,
            wait_timeout: self.wait_timeout,
            pending: None,
            timer: None,
            state: State::Running,
            stats: MergeStats::default(),
        }
    }
}

/// Merges many independently closable streams into one output stream.
///
/// Values from one source reach the output in the order that source produced
/// them. No order is kept between sources. The output is closed exactly once,
/// by the merger, after the last source closed or the merge was cancelled.
///
/// # Example
///
/// ```
/// use futures_fan_in::Merger;
/// use futures_lite::future::{self, block_on};
/// use futures_lite::{stream, StreamExt};
///
/// block_on(async {
///     let mut merger = Merger::new(vec![stream::iter(0..3), stream::iter(3..6)], 2);
///     let output = merger.output().unwrap();
///
///     let (res, mut values) = future::zip(
///         merger.run_to_completion(),
///         output.collect::<Vec<_>>(),
///     )
///     .await;
///     assert!(res.is_ok());
///     values.sort_unstable();
///     assert_eq!(values, [0, 1, 2, 3, 4, 5]);
/// })
/// ```
pub struct Merger<S: Stream> {
    set: ReadinessSet<S>,
    tracker: CompletionTracker,
    sink: OutputSink<S::Item>,
    output: Option<Output<S::Item>>,
    registrar: mpsc::UnboundedSender<S>,
    registrations: mpsc::UnboundedReceiver<S>,
    wait_timeout: Option<Duration>,
    // Taken from a source but not yet accepted by a full output.
    pending: Option<S::Item>,
    timer: Option<Timer>,
    state: State,
    stats: MergeStats,
}

impl<S: Stream> Merger<S> {
    /// Create a merger over `sources` with the given output capacity.
    ///
    /// An `output_capacity` of `0` selects an unbounded output.
    pub fn new<I>(sources: I, output_capacity: usize) -> Self
    where
        I: IntoIterator<Item = S>,
    {
        MergerBuilder::new()
            .output_capacity(output_capacity)
            .build(sources)
    }

    /// Take the merged output stream.
    ///
    /// Returns `None` after the first call. With a bounded capacity the
    /// output must be consumed while [`run`](Merger::run) is polled, or the
    /// merge stalls once the channel is full.
    pub fn output(&mut self) -> Option<Output<S::Item>> {
        self.output.take()
    }

    /// A handle for adding sources while the merge is running.
    pub fn registrar(&self) -> Registrar<S> {
        Registrar {
            sender: self.registrar.clone(),
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    /// The number of sources that have not closed yet.
    pub fn active_sources(&self) -> usize {
        self.tracker.remaining()
    }

    /// Counters for the work done so far.
    pub fn stats(&self) -> MergeStats {
        MergeStats {
            polls: self.set.polls(),
            ..self.stats
        }
    }

    /// Drive the merge until every source has closed or `cancel` resolves.
    ///
    /// Resolves to `Ok(())` once all sources are drained. If `cancel`
    /// resolves first, values not yet forwarded are dropped and the result is
    /// [`MergeError::Cancelled`]. Either way the output is closed before the
    /// future completes. Running a merger that already terminated yields
    /// [`MergeError::AlreadyTerminated`].
    ///
    /// Dropping the returned future after it has been polled cancels the
    /// merge the same way.
    pub fn run<C>(&mut self, cancel: C) -> Run<'_, S, C>
    where
        C: Future,
    {
        Run {
            merger: self,
            cancel,
            started: false,
            done: false,
        }
    }

    /// Drive the merge with no cancellation signal.
    pub fn run_to_completion(&mut self) -> Run<'_, S, future::Pending<()>> {
        self.run(future::pending())
    }

    fn poll_merge<C: Future>(
        &mut self,
        mut cancel: Pin<&mut C>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), MergeError>> {
        for _ in 0..YIELD_BUDGET {
            // Checked before every forward: nothing is sent once this fires.
            if cancel.as_mut().poll(cx).is_ready() {
                debug!(dropped = self.pending.is_some(), "fan-in merge cancelled");
                self.pending = None;
                return Poll::Ready(Err(MergeError::Cancelled));
            }

            if let Some(item) = self.pending.take() {
                match self.sink.poll_ready(cx) {
                    Poll::Pending => {
                        self.pending = Some(item);
                        return Poll::Pending;
                    }
                    Poll::Ready(Err(err)) => return Poll::Ready(Err(err.into())),
                    Poll::Ready(Ok(())) => {
                        self.sink.start_send(item)?;
                        self.stats.forwarded += 1;
                    }
                }
            }

            self.accept_registrations(cx);
            if self.tracker.is_complete() {
                // Refuse new sources, then pick up any that raced the last
                // closure.
                self.registrations.close();
                self.accept_registrations(cx);
                if self.tracker.is_complete() {
                    return Poll::Ready(Ok(()));
                }
            }

            match self.set.poll_wait_any(cx) {
                Poll::Ready(Ok((_, Event::Value(item)))) => {
                    self.timer = None;
                    self.pending = Some(item);
                }
                Poll::Ready(Ok((id, Event::Closed))) => {
                    self.timer = None;
                    self.set.remove(id, &mut self.tracker);
                    self.stats.closed += 1;
                }
                Poll::Ready(Err(err)) => {
                    error!(
                        %err,
                        remaining = self.tracker.remaining(),
                        "readiness set out of step with completion tracker"
                    );
                    return Poll::Ready(Err(err.into()));
                }
                Poll::Pending => {
                    self.stats.suspensions += 1;
                    if let Some(timeout) = self.wait_timeout {
                        let timer = self.timer.get_or_insert_with(|| Timer::after(timeout));
                        if Pin::new(timer).poll(cx).is_ready() {
                            debug!(?timeout, "no source became ready in time");
                            return Poll::Ready(Err(MergeError::TimedOut(timeout)));
                        }
                    }
                    return Poll::Pending;
                }
            }
        }

        cx.waker().wake_by_ref();
        Poll::Pending
    }

    fn accept_registrations(&mut self, cx: &mut Context<'_>) {
        while let Poll::Ready(Some(source)) = Pin::new(&mut self.registrations).poll_next(cx) {
            let id = self.set.insert_dynamic(source, &mut self.tracker);
            debug!(%id, active = self.tracker.remaining(), "source registered");
        }
    }

    /// Close the output exactly once and record the outcome.
    fn terminate(&mut self, outcome: Result<(), MergeError>) -> Result<(), MergeError> {
        self.state = State::Draining;
        self.registrations.close();
        self.timer = None;
        let outcome = match self.sink.close() {
            Ok(()) => outcome,
            Err(err) => {
                error!(%err, "output closed outside the coordinator");
                Err(err.into())
            }
        };
        self.state = State::Terminated;

        let stats = self.stats();
        match &outcome {
            Ok(()) => debug!(
                forwarded = stats.forwarded,
                closed = stats.closed,
                polls = stats.polls,
                "fan-in merge completed"
            ),
            Err(err) => debug!(
                %err,
                forwarded = stats.forwarded,
                active = self.tracker.remaining(),
                "fan-in merge stopped"
            ),
        }
        outcome
    }
}

impl<S: Stream> fmt::Debug for Merger<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Merger")
            .field("state", &self.state)
            .field("active", &self.tracker.remaining())
            .field("sink", &self.sink)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Future returned by [`Merger::run`].
///
/// Dropping a `Run` that has been polled but not completed cancels the
/// merge: the output is closed and the merger terminates.
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[pin_project(PinnedDrop)]
pub struct Run<'a, S, C>
where
    S: Stream,
{
    merger: &'a mut Merger<S>,
    #[pin]
    cancel: C,
    started: bool,
    done: bool,
}

impl<S, C> Future for Run<'_, S, C>
where
    S: Stream,
    C: Future,
{
    type Output = Result<(), MergeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        assert!(!*this.done, "`Run` polled after completing");

        if !*this.started {
            *this.started = true;
            if this.merger.state != State::Running {
                *this.done = true;
                error!(state = ?this.merger.state, "attempted to run a terminated merger");
                return Poll::Ready(Err(MergeError::AlreadyTerminated));
            }
            // Deadlines belong to a single wait of a single run.
            this.merger.timer = None;
            debug!(
                sources = this.merger.tracker.remaining(),
                capacity = this.merger.sink.capacity(),
                "fan-in merge started"
            );
        }

        let outcome = ready!(this.merger.poll_merge(this.cancel, cx));
        *this.done = true;
        Poll::Ready(this.merger.terminate(outcome))
    }
}

#[pinned_drop]
impl<S, C> PinnedDrop for Run<'_, S, C>
where
    S: Stream,
{
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if *this.started && !*this.done {
            *this.done = true;
            debug!("`Run` dropped before completing");
            // The outcome is already `Cancelled`; only the close matters here.
            let _ = this.merger.terminate(Err(MergeError::Cancelled));
        }
    }
}

impl<S, C> fmt::Debug for Run<'_, S, C>
where
    S: Stream,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Run")
            .field("merger", &self.merger)
            .field("done", &self.done)
            .finish()
    }
}

/// Adds sources to a running [`Merger`].
///
/// Sources are handed to the coordinator over a channel, so a registrar can
/// be cloned and used from any task. A source registered before the last
/// active source closes is merged like the initial ones. Once the merger
/// has stopped, [`register`](Registrar::register) hands the source back.
pub struct Registrar<S> {
    sender: mpsc::UnboundedSender<S>,
}

impl<S> Registrar<S> {
    /// Hand `source` to the merger.
    pub fn register(&self, source: S) -> Result<(), RegisterError<S>> {
        self.sender
            .unbounded_send(source)
            .map_err(|err| RegisterError(err.into_inner()))
    }

    /// Returns `true` once the merger no longer accepts sources.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<S> Clone for Registrar<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<S> fmt::Debug for Registrar<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registrar")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}
