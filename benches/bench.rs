use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use futures::channel::mpsc;
use futures_fan_in::Merger;
use futures_lite::future::{self, block_on};
use futures_lite::{stream, StreamExt};

const VALUES_PER_SOURCE: usize = 16;

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan-in");
    for sources in [10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("immediate", sources),
            &sources,
            |b, &n| b.iter(|| merge_immediate(black_box(n))),
        );
        group.bench_with_input(
            BenchmarkId::new("channels", sources),
            &sources,
            |b, &n| b.iter(|| merge_channels(black_box(n))),
        );
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

/// Every source is ready on every poll.
fn merge_immediate(sources: usize) {
    block_on(async {
        let streams: Vec<_> = (0..sources)
            .map(|_| stream::iter(0..VALUES_PER_SOURCE))
            .collect();
        let mut merger = Merger::new(streams, 64);
        let output = merger.output().unwrap();

        let (res, count) = future::zip(merger.run_to_completion(), output.count()).await;
        res.unwrap();
        assert_eq!(count, sources * VALUES_PER_SOURCE);
    })
}

/// Sources are fed one value at a time, so most of them are pending at any
/// point and readiness tracking does the work.
fn merge_channels(sources: usize) {
    block_on(async {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..sources).map(|_| mpsc::unbounded::<usize>()).unzip();
        let mut merger = Merger::new(receivers, 64);
        let output = merger.output().unwrap();

        let producer = async move {
            for n in 0..VALUES_PER_SOURCE {
                for sender in &senders {
                    sender.unbounded_send(n).unwrap();
                }
                future::yield_now().await;
            }
        };
        let consumer = output.count();

        let (res, (count, ())) =
            future::zip(merger.run_to_completion(), future::zip(consumer, producer)).await;
        res.unwrap();
        assert_eq!(count, sources * VALUES_PER_SOURCE);
    })
}
