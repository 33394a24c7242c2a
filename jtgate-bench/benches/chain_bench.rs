//! Processing chain benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use jtgate_core::{ProcessorChain, SessionRegistry, Validator};
use jtgate_protocol::{msg_id, EmptyBody, Header, Message, RawBody};
use jtgate_server::{Dispatcher, PipelineConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

// Unique terminal ids across iterations
static TERMINAL_COUNTER: AtomicU64 = AtomicU64::new(13_800_000_000);

fn dispatcher() -> Dispatcher {
    let sessions = Arc::new(SessionRegistry::new(Duration::from_secs(1800)));
    Dispatcher::new(&PipelineConfig::default(), sessions).unwrap()
}

fn heartbeat(terminal_id: &str) -> Message {
    Message::new(Header::new(msg_id::HEARTBEAT, terminal_id, 1), EmptyBody)
}

fn bench_validator_only(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let chain = ProcessorChain::new()
        .with_stage(Arc::new(Validator::new(false)))
        .unwrap();
    let message = heartbeat("13800138000");

    c.bench_function("chain_validator_only", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(chain.process(message.clone()).await) });
    });
}

fn bench_authenticated_heartbeat(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dispatcher = dispatcher();
    rt.block_on(async {
        for id in [msg_id::REGISTRATION, msg_id::AUTHENTICATION, msg_id::HEARTBEAT] {
            let message = Message::new(Header::new(id, "13800138000", 1), RawBody::default());
            dispatcher.process(message).await;
        }
    });
    let message = heartbeat("13800138000");

    let mut group = c.benchmark_group("chain_standard");
    group.throughput(Throughput::Elements(1));
    group.bench_function("heartbeat", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(dispatcher.process(message.clone()).await) });
    });
    group.finish();
}

fn bench_registration_new_terminals(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dispatcher = dispatcher();

    c.bench_function("chain_standard_registration", |b| {
        b.to_async(&rt).iter(|| {
            let terminal = TERMINAL_COUNTER.fetch_add(1, Ordering::Relaxed).to_string();
            let dispatcher = &dispatcher;
            async move {
                let message =
                    Message::new(Header::new(msg_id::REGISTRATION, terminal, 1), RawBody::default());
                black_box(dispatcher.process(message).await)
            }
        });
    });
}

fn bench_rejected_message(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dispatcher = dispatcher();
    let message = Message::new(
        Header::new(msg_id::LOCATION_REPORT, "13900139000", 1),
        RawBody::default(),
    );

    c.bench_function("chain_standard_rejected", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(dispatcher.process(message.clone()).await) });
    });
}

criterion_group!(
    benches,
    bench_validator_only,
    bench_authenticated_heartbeat,
    bench_registration_new_terminals,
    bench_rejected_message,
);
criterion_main!(benches);
