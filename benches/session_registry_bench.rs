//! 连接注册表与帧修复性能基准测试
//! 测试独占注册、断开移除与帧修复的吞吐量

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use flare_stomp_core::frame::normalize_frame;
use flare_stomp_core::{ConnectionRegistry, SessionId, UserId};

fn bench_registry(c: &mut Criterion) {
    let users: Vec<UserId> = (0..1000).map(|i| UserId::from(format!("user_{}", i))).collect();
    let sessions: Vec<SessionId> = (0..10_000)
        .map(|i| SessionId::from(format!("session_{}", i)))
        .collect();

    let mut group = c.benchmark_group("connection_registry");
    group.throughput(Throughput::Elements(1));

    group.bench_function("register_exclusive_then_remove", |b| {
        let registry = ConnectionRegistry::new();
        let mut i = 0usize;
        b.iter(|| {
            let user_id = &users[i % users.len()];
            let session_id = &sessions[i % sessions.len()];
            let outcome = registry.register_exclusive(user_id, session_id);
            black_box(outcome);
            if i % 2 == 1 {
                registry.remove(session_id);
            }
            i += 1;
        })
    });

    group.bench_function("session_count_lookup", |b| {
        let registry = ConnectionRegistry::new();
        for (i, session_id) in sessions.iter().enumerate() {
            registry.register(&users[i % users.len()], session_id);
        }
        let mut i = 0usize;
        b.iter(|| {
            black_box(registry.session_count(&users[i % users.len()]));
            i += 1;
        })
    });

    group.finish();
}

fn bench_concurrent_registration(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("concurrent_exclusive_registration_64", |b| {
        b.to_async(&rt).iter(|| async {
            let registry = Arc::new(ConnectionRegistry::new());
            let user_id = UserId::from("alice");
            let tasks: Vec<_> = (0..64)
                .map(|i| {
                    let registry = registry.clone();
                    let user_id = user_id.clone();
                    tokio::spawn(async move {
                        registry
                            .register_exclusive(&user_id, &SessionId::from(format!("s_{}", i)))
                            .evicted
                            .len()
                    })
                })
                .collect();

            let mut evicted = 0;
            for task in tasks {
                evicted += task.await.unwrap();
            }
            assert_eq!(evicted, 63);
        })
    });
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_normalizer");
    group.throughput(Throughput::Elements(1));

    group.bench_function("terminated_passthrough", |b| {
        b.iter(|| normalize_frame(black_box("SEND\ndestination:/app/chat\n\nhello\0")))
    });
    group.bench_function("repair_disconnect", |b| {
        b.iter(|| normalize_frame(black_box("DISCONNECT\nreceipt:1\n")))
    });
    group.bench_function("repair_connect", |b| {
        b.iter(|| normalize_frame(black_box("CONNECT\naccept-version:1.2\nX-User-Id:alice\n\n")))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_registry,
    bench_concurrent_registration,
    bench_normalize
);
criterion_main!(benches);
