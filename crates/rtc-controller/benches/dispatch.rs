//! Observer fan-out cost per event.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rtc_controller::events::{EventDispatcher, ObserverRef, RtcEvent};
use rtc_controller::params::StreamType;
use rtc_controller::registry::SubscriptionState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn counting_observer(counter: &Arc<AtomicU64>) -> ObserverRef {
    let counter = Arc::clone(counter);
    Arc::new(move |_: &RtcEvent| {
        counter.fetch_add(1, Ordering::Relaxed);
    })
}

fn availability_event() -> RtcEvent {
    RtcEvent::StreamAvailabilityChanged {
        user_id: "remote-user".to_string(),
        stream_type: StreamType::Big,
        state: SubscriptionState::NotSubscribed,
        available: true,
    }
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));
    let event = availability_event();

    for observers in [1usize, 4, 16, 64] {
        let dispatcher = EventDispatcher::new();
        let counter = Arc::new(AtomicU64::new(0));
        for _ in 0..observers {
            dispatcher.add(counting_observer(&counter));
        }

        group.bench_with_input(
            BenchmarkId::from_parameter(observers),
            &dispatcher,
            |b, dispatcher| b.iter(|| dispatcher.dispatch(black_box(&event))),
        );
    }
    group.finish();
}

fn bench_register(c: &mut Criterion) {
    let counter = Arc::new(AtomicU64::new(0));

    c.bench_function("register_and_remove", |b| {
        let dispatcher = EventDispatcher::new();
        for _ in 0..16 {
            dispatcher.add(counting_observer(&counter));
        }
        b.iter(|| {
            let observer = counting_observer(&counter);
            dispatcher.add(Arc::clone(&observer));
            dispatcher.remove(black_box(&observer));
        });
    });
}

criterion_group!(benches, bench_dispatch, bench_register);
criterion_main!(benches);
