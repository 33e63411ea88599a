// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named counting semaphores.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ipckit::{IpcError, NamedSemaphore, OpenMode, DEFAULT_PERM, SEMAPHORE_MAX_VALUE};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{n}", std::process::id())
}

fn fresh(prefix: &str, initial: u32) -> NamedSemaphore {
    let name = unique_name(prefix);
    NamedSemaphore::destroy_by_name(&name).expect("clear");
    NamedSemaphore::new(&name, OpenMode::Create.into(), DEFAULT_PERM, initial).expect("create")
}

#[test]
fn wait_signal() {
    let sem = fresh("sem_wait_signal", 1);
    assert!(sem.created());
    sem.wait().expect("wait");
    sem.signal(1).expect("signal");
    assert!(sem.try_wait().unwrap());
    sem.destroy().unwrap();
}

#[test]
fn signal_with_count() {
    let sem = fresh("sem_count", 0);
    sem.signal(5).expect("signal 5");
    for _ in 0..5 {
        assert!(sem.wait_timeout(Duration::from_millis(10)).expect("wait"));
    }
    assert!(!sem.try_wait().unwrap());
    sem.destroy().unwrap();
}

#[test]
fn wait_timeout_elapses() {
    let sem = fresh("sem_timeout", 0);
    let start = Instant::now();
    let waited = sem.wait_timeout(Duration::from_millis(50)).expect("wait");
    let elapsed = start.elapsed();
    assert!(!waited, "should time out");
    assert!(elapsed >= Duration::from_millis(40), "waited only {elapsed:?}");
    sem.destroy().unwrap();
}

#[test]
fn zero_timeout_polls() {
    let sem = fresh("sem_zero", 0);
    assert!(!sem.wait_timeout(Duration::ZERO).unwrap());
    sem.signal(1).unwrap();
    assert!(sem.wait_timeout(Duration::ZERO).unwrap());
    sem.destroy().unwrap();
}

#[test]
fn initial_value_only_on_create() {
    let sem = fresh("sem_initial", 3);
    let other = NamedSemaphore::new(sem.name(), OpenMode::CreateOrOpen.into(), DEFAULT_PERM, 10)
        .expect("open");
    assert!(!other.created());
    let mut taken = 0;
    while other.try_wait().unwrap() {
        taken += 1;
    }
    assert_eq!(taken, 3);
    drop(other);
    sem.destroy().unwrap();
}

#[test]
fn rejects_initial_over_max() {
    let name = unique_name("sem_over");
    let err = NamedSemaphore::new(&name, OpenMode::Create.into(), DEFAULT_PERM, SEMAPHORE_MAX_VALUE + 1)
        .unwrap_err();
    assert!(matches!(err, IpcError::InvalidLength));
}

#[test]
fn open_missing_is_not_found() {
    let name = unique_name("sem_missing");
    NamedSemaphore::destroy_by_name(&name).expect("clear");
    let err = NamedSemaphore::new(&name, OpenMode::Open.into(), DEFAULT_PERM, 0).unwrap_err();
    assert!(matches!(err, IpcError::NotFound), "{err:?}");
}

#[test]
fn create_existing_is_already_exists() {
    let sem = fresh("sem_exists", 0);
    let err = NamedSemaphore::new(sem.name(), OpenMode::Create.into(), DEFAULT_PERM, 0).unwrap_err();
    assert!(matches!(err, IpcError::AlreadyExists), "{err:?}");
    sem.destroy().unwrap();
}

#[test]
fn infinite_wait_is_released() {
    let sem = fresh("sem_infinite", 0);
    let name = sem.name().to_string();
    let t = thread::spawn(move || {
        let sem = NamedSemaphore::new(&name, OpenMode::Open.into(), DEFAULT_PERM, 0).unwrap();
        sem.wait().unwrap();
    });
    thread::sleep(Duration::from_millis(20));
    sem.signal(1).unwrap();
    t.join().unwrap();
    sem.destroy().unwrap();
}

#[test]
fn producer_consumer() {
    let sem = fresh("sem_pc", 0);
    let name = sem.name().to_string();
    let consumed = Arc::new(AtomicI32::new(0));
    let items = 100;

    let consumer = thread::spawn({
        let consumed = Arc::clone(&consumed);
        move || {
            let sem = NamedSemaphore::new(&name, OpenMode::Open.into(), DEFAULT_PERM, 0).unwrap();
            for _ in 0..items {
                sem.wait().unwrap();
                consumed.fetch_add(1, Ordering::Relaxed);
            }
        }
    });
    for _ in 0..items {
        sem.signal(1).unwrap();
    }
    consumer.join().unwrap();
    assert_eq!(consumed.load(Ordering::Relaxed), items);
    sem.destroy().unwrap();
}

#[test]
fn signal_n_wakes_n_waiters() {
    let sem = fresh("sem_many", 0);
    let woken = Arc::new(AtomicI32::new(0));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let (name, woken) = (sem.name().to_string(), Arc::clone(&woken));
            thread::spawn(move || {
                let sem = NamedSemaphore::new(&name, OpenMode::Open.into(), DEFAULT_PERM, 0).unwrap();
                if sem.wait_timeout(Duration::from_secs(5)).unwrap() {
                    woken.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();
    thread::sleep(Duration::from_millis(20));
    sem.signal(4).unwrap();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(woken.load(Ordering::Relaxed), 4);
    sem.destroy().unwrap();
}

#[cfg(unix)]
#[test]
fn outlives_handles_until_destroyed() {
    let sem = fresh("sem_persist", 2);
    let name = sem.name().to_string();
    sem.close().unwrap();
    let again = NamedSemaphore::new(&name, OpenMode::Open.into(), DEFAULT_PERM, 0).unwrap();
    assert_eq!(again.value().unwrap(), 2);
    again.destroy().unwrap();
    assert!(matches!(
        NamedSemaphore::new(&name, OpenMode::Open.into(), DEFAULT_PERM, 0),
        Err(IpcError::NotFound)
    ));
}
