//! The output side of a merge.
//!
//! [`channel`] creates the two halves: an [`OutputSink`] written by the
//! coordinator, and an [`Output`] stream read by the consumer. A capacity of
//! `0` selects an unbounded channel; any other capacity bounds the number of
//! values in flight, and `send` suspends while the channel is full.

use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{ready, Context, Poll};

use futures_channel::mpsc;
use futures_core::stream::{FusedStream, Stream};

use crate::error::{DoubleCloseError, SendError};

enum Sender<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

enum Receiver<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

/// Create a connected sink and output stream.
pub fn channel<T>(capacity: usize) -> (OutputSink<T>, Output<T>) {
    let (sender, receiver) = match capacity {
        0 => {
            let (tx, rx) = mpsc::unbounded();
            (Sender::Unbounded(tx), Receiver::Unbounded(rx))
        }
        // Every sender gets one guaranteed slot on top of the buffer.
        n => {
            let (tx, rx) = mpsc::channel(n - 1);
            (Sender::Bounded(tx), Receiver::Bounded(rx))
        }
    };
    let sink = OutputSink {
        sender,
        capacity,
        closed: false,
    };
    (sink, Output { receiver })
}

/// The write half of the output channel.
///
/// Closing is not idempotent: a second [`close`](OutputSink::close) is
/// reported as [`DoubleCloseError`]. Whoever owns the sink is the only party
/// allowed to close it.
pub struct OutputSink<T> {
    sender: Sender<T>,
    capacity: usize,
    closed: bool,
}

impl<T> OutputSink<T> {
    /// The configured capacity. `0` means unbounded.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` once the sink has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Poll until the sink can accept one value.
    pub fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), SendError>> {
        if self.closed {
            return Poll::Ready(Err(SendError::Closed));
        }
        let res = match &mut self.sender {
            Sender::Bounded(tx) => ready!(tx.poll_ready(cx)),
            Sender::Unbounded(tx) => ready!(tx.poll_ready(cx)),
        };
        Poll::Ready(res.map_err(|_| SendError::Disconnected))
    }

    /// Hand one value to the sink. Call only after `poll_ready` succeeded.
    pub fn start_send(&mut self, value: T) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }
        let res = match &mut self.sender {
            Sender::Bounded(tx) => tx.start_send(value),
            Sender::Unbounded(tx) => tx.start_send(value),
        };
        res.map_err(|_| SendError::Disconnected)
    }

    /// Send one value, waiting for capacity if the channel is full.
    pub fn send(&mut self, value: T) -> SendValue<'_, T> {
        SendValue {
            sink: self,
            value: Some(value),
        }
    }

    /// Close the sink. The consumer sees the end of the stream after reading
    /// every value already sent.
    pub fn close(&mut self) -> Result<(), DoubleCloseError> {
        if self.closed {
            return Err(DoubleCloseError);
        }
        self.closed = true;
        match &mut self.sender {
            Sender::Bounded(tx) => tx.close_channel(),
            Sender::Unbounded(tx) => tx.close_channel(),
        }
        Ok(())
    }
}

impl<T> fmt::Debug for OutputSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink")
            .field("capacity", &self.capacity)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Future returned by [`OutputSink::send`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct SendValue<'a, T> {
    sink: &'a mut OutputSink<T>,
    value: Option<T>,
}

// The value is only ever moved, never pinned.
impl<T> Unpin for SendValue<'_, T> {}

impl<T> Future for SendValue<'_, T> {
    type Output = Result<(), SendError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        ready!(this.sink.poll_ready(cx))?;
        let value = this
            .value
            .take()
            .expect("`SendValue` polled after completing");
        Poll::Ready(this.sink.start_send(value))
    }
}

impl<T> fmt::Debug for SendValue<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendValue")
            .field("sink", &self.sink)
            .finish()
    }
}

/// The merged stream handed to the consumer.
///
/// Yields every forwarded value, then `None` once the merger closes its sink.
#[must_use = "streams do nothing unless polled"]
pub struct Output<T> {
    receiver: Receiver<T>,
}

impl<T> Output<T> {
    /// Stop accepting values. Values already in the channel can still be
    /// read; the merger observes the disconnect on its next send.
    pub fn close(&mut self) {
        match &mut self.receiver {
            Receiver::Bounded(rx) => rx.close(),
            Receiver::Unbounded(rx) => rx.close(),
        }
    }
}

impl<T> Stream for Output<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.receiver {
            Receiver::Bounded(rx) => Pin::new(rx).poll_next(cx),
            Receiver::Unbounded(rx) => Pin::new(rx).poll_next(cx),
        }
    }
}

impl<T> FusedStream for Output<T> {
    fn is_terminated(&self) -> bool {
        match &self.receiver {
            Receiver::Bounded(rx) => rx.is_terminated(),
            Receiver::Unbounded(rx) => rx.is_terminated(),
        }
    }
}

impl<T> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output").finish_non_exhaustive()
    }
}
