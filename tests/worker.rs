use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;

use dex_cache::domain::{EntityId, NameCache, NameRecord};
use dex_cache::error::DexError;
use dex_cache::species::SpeciesClient;
use dex_cache::worker::{OffloadedPool, StartMessage, WorkerMessage};

#[derive(Clone)]
struct EvenOnly;

impl SpeciesClient for EvenOnly {
    fn fetch_one(&self, id: EntityId, timeout: Duration) -> Result<NameRecord, DexError> {
        if id.get() % 2 == 0 {
            Ok(NameRecord::new(format!("Name{id}"), format!("species-{id}")))
        } else {
            Err(DexError::Timeout {
                id: id.get(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }

    fn fetch_all_canonical(&self, _max_id: u16) -> Result<NameCache, DexError> {
        Err(DexError::SpeciesHttp("not used".to_string()))
    }
}

#[test]
fn message_shapes_match_protocol() {
    let start = serde_json::to_value(StartMessage { conc: 32 }).unwrap();
    assert_eq!(start, json!({ "conc": 32 }));

    let progress = serde_json::to_value(WorkerMessage::Progress { completed: 16 }).unwrap();
    assert_eq!(progress, json!({ "type": "progress", "completed": 16 }));

    let out: NameCache = [(EntityId::new(1).unwrap(), NameRecord::new("Bisasam", "bulbasaur"))]
        .into_iter()
        .collect();
    let done = serde_json::to_value(WorkerMessage::Done { out }).unwrap();
    assert_eq!(
        done,
        json!({
            "type": "done",
            "out": { "1": { "localized": "Bisasam", "canonical": "bulbasaur" } }
        })
    );
}

#[test]
fn offloaded_pool_posts_progress_then_done() {
    let ids: Vec<EntityId> = (1..=40).map(|n| EntityId::new(n).unwrap()).collect();
    let worker = OffloadedPool::spawn(EvenOnly, ids, Duration::from_millis(10));
    worker.start(8).unwrap();

    let mut progress = Vec::new();
    let out = loop {
        match worker.recv_timeout(Duration::from_secs(5)).unwrap() {
            Some(WorkerMessage::Progress { completed }) => progress.push(completed),
            Some(WorkerMessage::Done { out }) => break out,
            None => panic!("offloaded pool went quiet"),
        }
    };

    assert_eq!(out.len(), 20);
    assert!(out.iter().all(|(id, _)| id.get() % 2 == 0));
    progress.sort_unstable();
    assert_eq!(progress, vec![16, 32]);
}

#[derive(Clone, Default)]
struct Recording {
    calls: Arc<Mutex<Vec<u16>>>,
}

impl SpeciesClient for Recording {
    fn fetch_one(&self, id: EntityId, _timeout: Duration) -> Result<NameRecord, DexError> {
        thread::sleep(Duration::from_millis(5));
        self.calls.lock().unwrap().push(id.get());
        Ok(NameRecord::new(format!("Name{id}"), format!("species-{id}")))
    }

    fn fetch_all_canonical(&self, _max_id: u16) -> Result<NameCache, DexError> {
        Err(DexError::SpeciesHttp("not used".to_string()))
    }
}

#[test]
fn detached_pool_keeps_draining() {
    let client = Recording::default();
    let ids: Vec<EntityId> = (1..=8).map(|n| EntityId::new(n).unwrap()).collect();
    let worker = OffloadedPool::spawn(client.clone(), ids, Duration::from_millis(10));
    worker.start(2).unwrap();
    worker.detach();

    let deadline = Instant::now() + Duration::from_secs(5);
    while client.calls.lock().unwrap().len() < 8 {
        assert!(Instant::now() < deadline, "detached pool stopped draining");
        thread::sleep(Duration::from_millis(10));
    }
    let mut calls = client.calls.lock().unwrap().clone();
    calls.sort_unstable();
    assert_eq!(calls, (1..=8).collect::<Vec<_>>());
}
