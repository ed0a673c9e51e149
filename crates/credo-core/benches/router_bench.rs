use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use credo_core::router::{BusEvent, BusRouter, BusTopic, RouterConfig};
use credo_core::{TopicKey, Value};

fn variable_change(index: u32) -> BusEvent {
    BusEvent::VariableChange {
        key: format!("actualposition${}", index),
        value: Value::Float(1.25),
    }
}

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("router_publish");

    for subscribers in [1usize, 6, 24] {
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                let router = BusRouter::new();
                let counter = Arc::new(AtomicU64::new(0));
                for _ in 0..subscribers {
                    let counter = counter.clone();
                    router.subscribe(BusTopic::VariableChange, move |_| {
                        counter.fetch_add(1, Ordering::Relaxed);
                    });
                }
                let event = variable_change(3);
                b.iter(|| router.publish(BusTopic::VariableChange, black_box(event.clone())));
            },
        );
    }

    group.bench_function("with_history", |b| {
        let router = BusRouter::with_config(RouterConfig {
            enable_history: true,
            ..RouterConfig::default()
        });
        router.subscribe_all(|_| {});
        let event = variable_change(0);
        b.iter(|| router.publish(BusTopic::VariableChange, black_box(event.clone())));
    });

    group.finish();
}

fn bench_topic_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("topic_key");

    group.bench_function("parse", |b| {
        b.iter(|| TopicKey::parse(black_box("targetpositionreached$5")))
    });

    group.bench_function("parse_foreign_filtered", |b| {
        // What every proxy of a six-axis card does for each raw event
        b.iter(|| {
            (0..6u32)
                .filter(|index| {
                    TopicKey::parse(black_box("actualposition$3"))
                        .map(|key| key.index() == *index)
                        .unwrap_or(false)
                })
                .count()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_publish, bench_topic_key);
criterion_main!(benches);
