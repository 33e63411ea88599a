// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Uncontended lock and queue round-trip benchmarks.
//
// Run with:
//   cargo bench --bench sync
//
// Groups:
//   mutex_lock_unlock:  one lock/unlock pair per backend
//   fast_mq_round_trip: send then receive on one handle at several sizes

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ipckit::{FastMq, NamedMutex, OpenFlags, OpenMode, SemaMutex, SpinMutex, DEFAULT_PERM};

fn bench_name(label: &str) -> String {
    format!("bench_{label}_{}", std::process::id())
}

// ---------------------------------------------------------------------------
// Mutex backends
// ---------------------------------------------------------------------------

fn bench_mutex(c: &mut Criterion) {
    let mut group = c.benchmark_group("mutex_lock_unlock");
    let create = OpenFlags::from(OpenMode::CreateOrOpen);

    let name = bench_name("named");
    let m = NamedMutex::new(&name, create, DEFAULT_PERM).expect("named mutex");
    group.bench_function("named", |b| {
        b.iter(|| {
            m.lock().unwrap();
            m.unlock().unwrap();
        })
    });
    let _ = m.destroy();

    let name = bench_name("sema");
    let m = SemaMutex::new(&name, create, DEFAULT_PERM).expect("sema mutex");
    group.bench_function("sema", |b| {
        b.iter(|| {
            m.lock().unwrap();
            m.unlock().unwrap();
        })
    });
    let _ = m.destroy();

    let name = bench_name("spin");
    let m = SpinMutex::new(&name, create, DEFAULT_PERM).expect("spin mutex");
    group.bench_function("spin", |b| {
        b.iter(|| {
            m.lock().unwrap();
            m.unlock().unwrap();
        })
    });
    let _ = m.destroy();

    group.finish();
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

const SIZES: &[(&str, usize)] = &[("small_48", 48), ("medium_256", 256), ("large_4096", 4096)];

fn bench_fast_mq(c: &mut Criterion) {
    let mut group = c.benchmark_group("fast_mq_round_trip");
    let name = bench_name("mq");
    let _ = FastMq::destroy_by_name(&name);
    let mq = FastMq::new(&name, OpenMode::Create.into(), DEFAULT_PERM, 16, 4096).expect("queue");

    for &(label, size) in SIZES {
        let msg = vec![0xABu8; size];
        let mut buf = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &size, |b, _| {
            b.iter(|| {
                mq.send_with_priority(black_box(&msg), 1).unwrap();
                black_box(mq.receive_with_priority(&mut buf).unwrap())
            })
        });
    }

    group.finish();
    let _ = mq.destroy();
}

criterion_group!(benches, bench_mutex, bench_fast_mq);
criterion_main!(benches);
