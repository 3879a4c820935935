use criterion::{criterion_group, criterion_main, Criterion};
use iperf3_rs::pacer::Pacer;
use tokio::runtime::Runtime;

fn acquire_within_burst(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let pacer = Pacer::new(1_000_000_000);

    c.bench_function("pacer_acquire_within_burst", |b| {
        b.to_async(&rt).iter(|| async {
            pacer.acquire(1024).await;
        });
    });
}

criterion_group!(benches, acquire_within_burst);
criterion_main!(benches);
