use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dex_cache::domain::EntityId;
use dex_cache::pool::{PoolOptions, drain};

fn ids(range: std::ops::RangeInclusive<u16>) -> Vec<EntityId> {
    range.map(|n| EntityId::new(n).unwrap()).collect()
}

#[test]
fn every_id_is_processed_exactly_once() {
    let abort = AtomicBool::new(false);
    let seen = Mutex::new(HashMap::<u16, usize>::new());

    let out = drain(
        ids(1..=100),
        PoolOptions::new(10, 20),
        &abort,
        |id| {
            *seen.lock().unwrap().entry(id.get()).or_default() += 1;
            Ok::<_, String>(id.get() * 2)
        },
        |_| {},
    );

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.len(), 100);
    assert!(seen.values().all(|count| *count == 1));
    assert_eq!(out.len(), 100);
    assert_eq!(out[&EntityId::new(50).unwrap()], 100);
}

#[test]
fn failures_are_left_out_of_the_result() {
    let abort = AtomicBool::new(false);
    let out = drain(
        ids(1..=30),
        PoolOptions::new(4, 5),
        &abort,
        |id| {
            if id.get() % 3 == 0 {
                Err(format!("boom {id}"))
            } else {
                Ok(id.get())
            }
        },
        |_| {},
    );

    assert_eq!(out.len(), 20);
    assert!(!out.contains_key(&EntityId::new(3).unwrap()));
    assert!(out.contains_key(&EntityId::new(4).unwrap()));
}

#[test]
fn progress_is_reported_every_stride() {
    let abort = AtomicBool::new(false);
    let reports = Mutex::new(Vec::new());

    drain(
        ids(1..=100),
        PoolOptions::new(10, 20),
        &abort,
        |id| Ok::<_, String>(id),
        |completed| reports.lock().unwrap().push(completed),
    );

    let mut reports = reports.into_inner().unwrap();
    reports.sort_unstable();
    assert_eq!(reports, vec![20, 40, 60, 80, 100]);
}

#[test]
fn abort_stops_new_items_but_finishes_the_current_one() {
    let abort = AtomicBool::new(false);
    let started = AtomicUsize::new(0);

    let out = drain(
        ids(1..=50),
        PoolOptions::new(1, 1),
        &abort,
        |id| {
            started.fetch_add(1, Ordering::SeqCst);
            if id.get() == 3 {
                abort.store(true, Ordering::SeqCst);
            }
            Ok::<_, String>(id.get())
        },
        |_| {},
    );

    assert_eq!(started.load(Ordering::SeqCst), 3);
    let keys: Vec<u16> = out.keys().map(|id| id.get()).collect();
    assert_eq!(keys, vec![1, 2, 3]);
}

#[test]
fn single_worker_processes_in_ascending_order() {
    let abort = AtomicBool::new(false);
    let order = Mutex::new(Vec::new());

    drain(
        ids(1..=10),
        PoolOptions::new(1, 25),
        &abort,
        |id| {
            order.lock().unwrap().push(id.get());
            Ok::<_, String>(())
        },
        |_| {},
    );

    assert_eq!(order.into_inner().unwrap(), (1..=10).collect::<Vec<u16>>());
}

#[test]
fn pre_raised_abort_processes_nothing() {
    let abort = AtomicBool::new(true);
    let out = drain(
        ids(1..=10),
        PoolOptions::new(3, 1),
        &abort,
        |id| Ok::<_, String>(id),
        |_| {},
    );
    assert!(out.is_empty());
}
