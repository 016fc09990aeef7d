use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rqq::core::Dispatcher;
use rqq::prelude::*;
use rqq::stats::Statistics;
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn dispatcher(concurrency: usize) -> Dispatcher {
    let registry = StageRegistry::new()
        .with_fn("fetch", |input| async move { Ok(json!(input.item_id)) })
        .with_fn("store", |input| async move { Ok(input.carried.unwrap_or_default()) });

    let mut config = RqqConfig::testing();
    config.dispatcher.concurrency_limit = concurrency;
    Dispatcher::new(&config, Arc::new(registry), Arc::new(Statistics::new()))
}

fn drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain");

    for items in [100u64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(items), &items, |b, &items| {
            b.iter(|| {
                let mut dispatcher = dispatcher(64);
                for id in 0..items {
                    let pipeline = Pipeline::new(["fetch", "store"]).unwrap();
                    let item = NewItem::new(id, pipeline).with_priority((id % 7) as i64);
                    dispatcher.admit(item, Duration::ZERO).unwrap();
                }

                let mut now = Duration::ZERO;
                while dispatcher.queue_stats().active > 0 {
                    now += Duration::from_secs(1);
                    black_box(dispatcher.tick(now));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, drain);
criterion_main!(benches);
