//! Cancellation and wait timeouts.

use std::time::{Duration, Instant};

use async_io::Timer;
use futures::channel::{mpsc, oneshot};
use futures::{SinkExt, StreamExt};
use futures_fan_in::{MergeError, Merger, MergerBuilder, State};
use futures_lite::{future, stream};

#[async_std::test]
async fn cancel_mid_merge_stops_forwarding() {
    const CAPACITY: usize = 4;

    let mut merger = Merger::new(vec![stream::repeat(1u32), stream::repeat(2u32)], CAPACITY);
    let output = merger.output().unwrap();
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

    let consumer = async move {
        let mut output = output;
        let mut cancel_tx = Some(cancel_tx);
        let mut seen = 0;
        while output.next().await.is_some() {
            seen += 1;
            if seen == 100 {
                cancel_tx.take().unwrap().send(()).unwrap();
            }
        }
        seen
    };

    let (res, seen) = future::zip(merger.run(cancel_rx), consumer).await;
    assert_eq!(res, Err(MergeError::Cancelled));
    assert!(res.unwrap_err().is_cancellation());
    // Only values already in the channel when the signal fired get through.
    assert!((100..=100 + CAPACITY).contains(&seen), "saw {seen} values");
    assert_eq!(merger.state(), State::Terminated);
}

#[async_std::test]
async fn cancel_while_idle_returns_promptly() {
    let mut merger = Merger::new(vec![stream::pending::<u32>()], 0);
    let mut output = merger.output().unwrap();

    let start = Instant::now();
    let res = merger
        .run(Timer::after(Duration::from_millis(20)))
        .await;
    assert_eq!(res, Err(MergeError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(output.next().await, None);
}

#[async_std::test]
async fn wait_timeout_fires_when_sources_stall() {
    let timeout = Duration::from_millis(20);
    let mut merger = MergerBuilder::new()
        .wait_timeout(timeout)
        .build(vec![stream::pending::<u32>()]);
    let mut output = merger.output().unwrap();

    let start = Instant::now();
    let err = merger.run_to_completion().await.unwrap_err();
    assert_eq!(err, MergeError::TimedOut(timeout));
    assert!(err.is_cancellation());
    assert!(start.elapsed() >= timeout);
    assert_eq!(output.next().await, None);
    assert_eq!(merger.active_sources(), 1);
}

#[async_std::test]
async fn wait_timeout_resets_on_activity() {
    let (mut tx, rx) = mpsc::channel::<u32>(1);
    async_std::task::spawn(async move {
        for n in 0..15 {
            futures_time::task::sleep(futures_time::time::Duration::from_millis(10)).await;
            tx.send(n).await.unwrap();
        }
    });

    // The whole run takes longer than the timeout, but no single wait does.
    let mut merger = MergerBuilder::new()
        .wait_timeout(Duration::from_millis(100))
        .build(vec![rx]);
    let output = merger.output().unwrap();

    merger.run_to_completion().await.unwrap();
    assert_eq!(output.collect::<Vec<_>>().await, (0..15).collect::<Vec<_>>());
}

#[async_std::test]
async fn dropped_run_leaves_no_deadline_behind() {
    let timeout = Duration::from_millis(20);
    let mut merger = MergerBuilder::new()
        .wait_timeout(timeout)
        .build(vec![stream::pending::<u32>()]);
    let mut output = merger.output().unwrap();

    let mut run = merger.run_to_completion();
    assert!(futures::poll!(&mut run).is_pending());
    drop(run);
    assert_eq!(merger.state(), State::Terminated);
    assert_eq!(output.next().await, None);

    // Long past the old deadline, a rerun is refused rather than timed out.
    Timer::after(timeout * 3).await;
    assert_eq!(
        merger.run_to_completion().await,
        Err(MergeError::AlreadyTerminated)
    );
}
