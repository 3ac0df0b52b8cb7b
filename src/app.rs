use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;

use crate::domain::{
    EntityId, MAX_ID, NameCache, NameQuery, NameRecord, OwnershipCache, Strategy, placeholder_name,
};
use crate::error::DexError;
use crate::pool::{self, PoolOptions};
use crate::species::{FETCH_TIMEOUT, SpeciesClient};
use crate::store::Store;
use crate::worker::{MAX_OFFLOADED_WORKERS, OffloadedPool, WorkerMessage};

pub const SERIAL_STRIDE: usize = 25;
pub const FAST_STRIDE: usize = 20;
pub const MAX_FAST_WORKERS: usize = 48;
pub const PRIME_CHECKPOINT: f64 = 0.1;
const WORKER_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct LoadSettings {
    pub max_id: u16,
    pub timeout: Duration,
    pub concurrency: Option<usize>,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            max_id: MAX_ID,
            timeout: FETCH_TIMEOUT,
            concurrency: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Idle,
    Prime,
    Fetch,
    Store,
}

impl RunPhase {
    pub fn label(self) -> &'static str {
        match self {
            RunPhase::Idle => "Idle",
            RunPhase::Prime => "Prime",
            RunPhase::Fetch => "Fetch",
            RunPhase::Store => "Store",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    /// Identity of the run this state belongs to; 0 before the first run.
    pub run_id: u64,
    pub active: bool,
    pub progress: f64,
    pub cancel_requested: bool,
    pub phase: RunPhase,
    pub strategy: Option<Strategy>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            run_id: 0,
            active: false,
            progress: 0.0,
            cancel_requested: false,
            phase: RunPhase::Idle,
            strategy: None,
        }
    }
}

#[derive(Debug, Default)]
struct RunShared {
    state: Mutex<RunState>,
    abort: AtomicBool,
    runs: AtomicU64,
}

impl RunShared {
    /// Marks a new run active and returns its id, or `None` while another run
    /// holds the slot.
    fn try_begin(&self, strategy: Option<Strategy>) -> Option<u64> {
        let mut state = self.state.lock().ok()?;
        if state.active {
            return None;
        }
        let run_id = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        *state = RunState {
            run_id,
            active: true,
            strategy,
            ..RunState::default()
        };
        self.abort.store(false, Ordering::SeqCst);
        Some(run_id)
    }

    fn finish(&self, run_id: u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.run_id != run_id {
            return;
        }
        *state = RunState {
            run_id,
            ..RunState::default()
        };
        self.abort.store(false, Ordering::SeqCst);
    }

    fn snapshot(&self) -> RunState {
        let mut snapshot = self
            .state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_default();
        snapshot.cancel_requested = snapshot.active && self.abort.load(Ordering::SeqCst);
        snapshot
    }

    /// State of one run. Once a later run has begun, the earlier run reads as
    /// finished.
    fn snapshot_of(&self, run_id: u64) -> RunState {
        let snapshot = self.snapshot();
        if snapshot.run_id == run_id {
            return snapshot;
        }
        RunState {
            run_id,
            ..RunState::default()
        }
    }

    fn cancel(&self, run_id: u64) {
        if let Ok(state) = self.state.lock() {
            if state.active && state.run_id == run_id {
                self.abort.store(true, Ordering::SeqCst);
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: RunPhase) {
        if let Ok(mut state) = self.state.lock() {
            state.phase = phase;
        }
    }

    fn set_progress(&self, progress: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.progress = progress.clamp(state.progress, 1.0);
        }
    }
}

struct ActiveRun {
    shared: Arc<RunShared>,
    run_id: u64,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.shared.finish(self.run_id);
    }
}

pub struct RunHandle {
    run_id: u64,
    shared: Arc<RunShared>,
    handle: JoinHandle<Result<RunReport, DexError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn progress(&self) -> f64 {
        self.state().progress
    }

    pub fn state(&self) -> RunState {
        self.shared.snapshot_of(self.run_id)
    }

    /// Stops new items from being started. Items already in flight finish and
    /// are merged; an offloaded run is abandoned without merging. Does nothing
    /// once this run has finished.
    pub fn cancel(&self) {
        self.shared.cancel(self.run_id);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn wait(self) -> Result<RunReport, DexError> {
        self.handle.join().unwrap_or(Err(DexError::RunPanicked))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub strategy: Strategy,
    pub attempted: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub fallbacks: usize,
    pub cancelled: bool,
    pub entries: usize,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrimeReport {
    pub fetched: usize,
    pub merged: usize,
    pub entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub entries: Vec<ListEntry>,
    pub owned_count: usize,
    pub max_id: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub id: u16,
    pub localized: String,
    pub canonical: Option<String>,
    pub placeholder: bool,
    pub owned: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub id: u16,
    pub localized: String,
    pub canonical: String,
    pub placeholder: bool,
    pub owned: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OwnershipResult {
    pub id: u16,
    pub owned: bool,
    pub owned_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub cache_path: String,
    pub cached: bool,
    pub entries: usize,
    pub resolved: usize,
    pub placeholders: usize,
    pub owned_count: usize,
    pub max_id: u16,
    pub run: RunState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub cleared: bool,
}

struct RunContext<C> {
    store: Store,
    client: C,
    settings: LoadSettings,
    names: Arc<Mutex<Option<NameCache>>>,
    run: Arc<RunShared>,
}

impl<C: SpeciesClient> RunContext<C> {
    fn working_copy(&self) -> NameCache {
        self.names
            .lock()
            .ok()
            .and_then(|names| names.clone())
            .unwrap_or_default()
    }

    fn commit(&self, working: &NameCache) -> Result<(), DexError> {
        self.run.set_phase(RunPhase::Store);
        self.store.save_names(working)?;
        if let Ok(mut names) = self.names.lock() {
            *names = Some(working.clone());
        }
        Ok(())
    }

    fn report(&self, strategy: Strategy, counts: RunCounts, working: &NameCache) -> RunReport {
        RunReport {
            strategy,
            attempted: counts.attempted,
            resolved: counts.resolved,
            unresolved: counts.attempted.saturating_sub(counts.resolved),
            fallbacks: counts.fallbacks,
            cancelled: self.run.is_cancelled(),
            entries: working.len(),
            finished_at: iso_timestamp(),
        }
    }

    fn prime(&self, working: &mut NameCache) -> Result<PrimeReport, DexError> {
        self.run.set_phase(RunPhase::Prime);
        let mut primed = self.client.fetch_all_canonical(self.settings.max_id)?;
        let fetched = primed.len();
        let merged = primed.merge(std::mem::take(working));
        *working = primed;
        self.commit(working)?;
        Ok(PrimeReport {
            fetched,
            merged,
            entries: working.len(),
        })
    }

    fn pool_workers(&self, cap: usize) -> usize {
        self.settings
            .concurrency
            .map(|n| n.clamp(1, cap))
            .unwrap_or_else(|| pool::worker_count(cap))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RunCounts {
    attempted: usize,
    resolved: usize,
    fallbacks: usize,
}

pub struct App<C: SpeciesClient + Clone + 'static> {
    store: Store,
    client: C,
    settings: LoadSettings,
    names: Arc<Mutex<Option<NameCache>>>,
    ownership: Mutex<OwnershipCache>,
    run: Arc<RunShared>,
}

impl<C: SpeciesClient + Clone + 'static> App<C> {
    pub fn new(store: Store, client: C, settings: LoadSettings) -> Self {
        let mut names = store.load_names();
        if let Some(cache) = names.as_mut() {
            let dropped = cache.retain_range(settings.max_id);
            if dropped > 0 {
                tracing::debug!(dropped, max_id = settings.max_id, "ignoring ids above max_id");
            }
        }
        let ownership = store.load_ownership();
        tracing::debug!(
            cached = names.as_ref().map(NameCache::len).unwrap_or(0),
            owned = ownership.owned_count(),
            "loaded local documents"
        );
        Self {
            store,
            client,
            settings,
            names: Arc::new(Mutex::new(names)),
            ownership: Mutex::new(ownership),
            run: Arc::new(RunShared::default()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn names(&self) -> Option<NameCache> {
        self.names.lock().ok().and_then(|names| names.clone())
    }

    pub fn has_cache(&self) -> bool {
        self.names
            .lock()
            .map(|names| names.is_some())
            .unwrap_or(false)
    }

    pub fn ownership(&self) -> OwnershipCache {
        self.ownership
            .lock()
            .map(|ownership| ownership.clone())
            .unwrap_or_default()
    }

    pub fn run_state(&self) -> RunState {
        self.run.snapshot()
    }

    pub fn start(&self, strategy: Strategy) -> Option<RunHandle> {
        match strategy {
            Strategy::Serial => self.load_serial(),
            Strategy::Fast => self.load_fast(),
            Strategy::Ultra => self.load_ultra(),
        }
    }

    /// One worker over every id missing from the cache, ascending. Failed
    /// items get a synthetic fallback record so one pass covers every id.
    pub fn load_serial(&self) -> Option<RunHandle> {
        self.spawn_run(Strategy::Serial, |ctx| {
            let mut working = ctx.working_copy();
            let queue = working.missing_ids(ctx.settings.max_id);
            let total = queue.len().max(1);
            let fallbacks = AtomicUsize::new(0);

            ctx.run.set_phase(RunPhase::Fetch);
            let fetched = pool::drain(
                queue,
                PoolOptions::new(1, SERIAL_STRIDE),
                &ctx.run.abort,
                |id| {
                    let record = ctx
                        .client
                        .fetch_one(id, ctx.settings.timeout)
                        .unwrap_or_else(|err| {
                            tracing::debug!(%id, error = %err, "using fallback record");
                            fallbacks.fetch_add(1, Ordering::SeqCst);
                            NameRecord::fallback(id)
                        });
                    Ok::<_, DexError>(record)
                },
                |done| ctx.run.set_progress(done as f64 / total as f64),
            );

            let fallbacks = fallbacks.load(Ordering::SeqCst);
            let counts = RunCounts {
                attempted: fetched.len(),
                resolved: fetched.len().saturating_sub(fallbacks),
                fallbacks,
            };
            for (id, record) in fetched {
                working.merge_record(id, record);
            }
            ctx.commit(&working)?;
            ctx.run.set_progress(1.0);
            Ok(ctx.report(Strategy::Serial, counts, &working))
        })
    }

    /// Bulk-primes every id with a placeholder, then replaces placeholders
    /// through the in-process pool. Failed items keep their placeholder.
    pub fn load_fast(&self) -> Option<RunHandle> {
        self.spawn_run(Strategy::Fast, |ctx| {
            let mut working = ctx.working_copy();
            ctx.prime(&mut working)?;
            ctx.run.set_progress(PRIME_CHECKPOINT);
            if ctx.run.is_cancelled() {
                return Ok(ctx.report(Strategy::Fast, RunCounts::default(), &working));
            }

            let queue = working.refresh_ids(ctx.settings.max_id);
            let total = queue.len().max(1);
            let attempted = AtomicUsize::new(0);
            let workers = ctx.pool_workers(MAX_FAST_WORKERS);
            tracing::info!(queued = queue.len(), workers, "resolving placeholders");

            ctx.run.set_phase(RunPhase::Fetch);
            let fetched = pool::drain(
                queue,
                PoolOptions::new(workers, FAST_STRIDE),
                &ctx.run.abort,
                |id| {
                    attempted.fetch_add(1, Ordering::SeqCst);
                    ctx.client.fetch_one(id, ctx.settings.timeout)
                },
                |done| {
                    let fraction = done as f64 / total as f64;
                    ctx.run
                        .set_progress(PRIME_CHECKPOINT + fraction * (1.0 - PRIME_CHECKPOINT));
                },
            );

            let counts = RunCounts {
                attempted: attempted.load(Ordering::SeqCst),
                resolved: fetched.len(),
                fallbacks: 0,
            };
            for (id, record) in fetched {
                working.merge_record(id, record);
            }
            ctx.commit(&working)?;
            ctx.run.set_progress(1.0);
            Ok(ctx.report(Strategy::Fast, counts, &working))
        })
    }

    /// Hands the placeholder/missing ids to an offloaded pool and merges its
    /// batch once it reports `Done`. Cancelling stops listening; the
    /// offloaded thread keeps going and its results are discarded.
    pub fn load_ultra(&self) -> Option<RunHandle> {
        self.spawn_run(Strategy::Ultra, |ctx| {
            let mut working = ctx.working_copy();
            let queue = working.refresh_ids(ctx.settings.max_id);
            let total = queue.len();
            let conc = ctx.pool_workers(MAX_OFFLOADED_WORKERS);
            tracing::info!(queued = total, workers = conc, "starting offloaded pool");

            ctx.run.set_phase(RunPhase::Fetch);
            let worker = OffloadedPool::spawn(ctx.client.clone(), queue, ctx.settings.timeout);
            worker.start(conc)?;

            let out = loop {
                if ctx.run.is_cancelled() {
                    tracing::info!("ultra run cancelled, detaching offloaded pool");
                    worker.detach();
                    return Ok(ctx.report(Strategy::Ultra, RunCounts::default(), &working));
                }
                match worker.recv_timeout(WORKER_POLL)? {
                    Some(WorkerMessage::Progress { completed }) => {
                        ctx.run.set_progress(completed as f64 / total.max(1) as f64);
                    }
                    Some(WorkerMessage::Done { out }) => break out,
                    None => {}
                }
            };

            let counts = RunCounts {
                attempted: total,
                resolved: out.len(),
                fallbacks: 0,
            };
            working.merge(out);
            ctx.commit(&working)?;
            ctx.run.set_progress(1.0);
            Ok(ctx.report(Strategy::Ultra, counts, &working))
        })
    }

    /// Bulk fetch merged into the current cache and persisted, outside of any
    /// strategy. `None` when a run is active.
    pub fn prime(&self) -> Result<Option<PrimeReport>, DexError> {
        let Some(run_id) = self.run.try_begin(None) else {
            return Ok(None);
        };
        let _active = ActiveRun {
            shared: self.run.clone(),
            run_id,
        };
        let ctx = self.context();
        let mut working = ctx.working_copy();
        ctx.prime(&mut working).map(Some)
    }

    pub fn toggle_owned(&self, id: EntityId) -> Result<OwnershipResult, DexError> {
        self.check_range(id)?;
        let mut ownership = self
            .ownership
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = ownership.clone();
        let owned = next.toggle(id);
        self.store.save_ownership(&next)?;
        *ownership = next;
        tracing::debug!(%id, owned, "ownership toggled");
        Ok(OwnershipResult {
            id: id.get(),
            owned,
            owned_count: ownership.owned_count(),
        })
    }

    pub fn list(&self, query: Option<&str>, only_owned: bool) -> ListResult {
        let names = self.names().unwrap_or_default();
        let ownership = self.ownership();
        let query = query.and_then(NameQuery::parse);

        let entries = EntityId::range(self.settings.max_id)
            .filter_map(|id| {
                let owned = ownership.is_owned(id);
                if only_owned && !owned {
                    return None;
                }
                let record = names
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| NameRecord::new(placeholder_name(id), ""));
                if let Some(query) = &query {
                    if !query.matches(id, &record) {
                        return None;
                    }
                }
                Some(ListEntry {
                    id: id.get(),
                    placeholder: record.is_placeholder(),
                    canonical: (!record.canonical.is_empty()).then_some(record.canonical),
                    localized: record.localized,
                    owned,
                })
            })
            .collect();

        ListResult {
            entries,
            owned_count: ownership.owned_count(),
            max_id: self.settings.max_id,
        }
    }

    pub fn info(&self, id: EntityId) -> Result<InfoResult, DexError> {
        self.check_range(id)?;
        let record = self
            .names()
            .and_then(|names| names.get(id).cloned())
            .ok_or(DexError::EntityNotFound(id.get()))?;
        Ok(InfoResult {
            id: id.get(),
            placeholder: record.is_placeholder(),
            localized: record.localized,
            canonical: record.canonical,
            owned: self.ownership().is_owned(id),
        })
    }

    pub fn status(&self) -> StatusResult {
        let names = self.names();
        let (entries, resolved, placeholders) = names
            .as_ref()
            .map(|names| (names.len(), names.resolved_count(), names.placeholder_count()))
            .unwrap_or((0, 0, 0));
        StatusResult {
            cache_path: self.store.names_path().to_string(),
            cached: names.is_some(),
            entries,
            resolved,
            placeholders,
            owned_count: self.ownership().owned_count(),
            max_id: self.settings.max_id,
            run: self.run_state(),
        }
    }

    /// Deletes both documents and forgets the in-memory copies. Callers are
    /// expected to have confirmed with the user.
    pub fn clear(&self) -> Result<ClearResult, DexError> {
        self.store.clear()?;
        if let Ok(mut names) = self.names.lock() {
            *names = None;
        }
        if let Ok(mut ownership) = self.ownership.lock() {
            *ownership = OwnershipCache::new();
        }
        tracing::info!(root = %self.store.root(), "cleared local documents");
        Ok(ClearResult { cleared: true })
    }

    fn check_range(&self, id: EntityId) -> Result<(), DexError> {
        if id.get() > self.settings.max_id {
            return Err(DexError::InvalidEntityId(id.to_string()));
        }
        Ok(())
    }

    fn context(&self) -> RunContext<C> {
        RunContext {
            store: self.store.clone(),
            client: self.client.clone(),
            settings: self.settings.clone(),
            names: self.names.clone(),
            run: self.run.clone(),
        }
    }

    fn spawn_run<F>(&self, strategy: Strategy, body: F) -> Option<RunHandle>
    where
        F: FnOnce(&RunContext<C>) -> Result<RunReport, DexError> + Send + 'static,
    {
        let Some(run_id) = self.run.try_begin(Some(strategy)) else {
            tracing::info!(%strategy, "a refresh run is already active, ignoring");
            return None;
        };
        let ctx = self.context();
        let shared = self.run.clone();
        let handle = thread::spawn(move || {
            let _active = ActiveRun {
                shared: ctx.run.clone(),
                run_id,
            };
            tracing::info!(%strategy, run_id, max_id = ctx.settings.max_id, "refresh run started");
            let result = body(&ctx);
            match &result {
                Ok(report) => tracing::info!(
                    %strategy,
                    resolved = report.resolved,
                    unresolved = report.unresolved,
                    cancelled = report.cancelled,
                    "refresh run finished"
                ),
                Err(err) => tracing::warn!(%strategy, error = %err, "refresh run failed"),
            }
            result
        });
        Some(RunHandle {
            run_id,
            shared,
            handle,
        })
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};

    use super::*;

    #[derive(Clone)]
    struct Offline;

    impl SpeciesClient for Offline {
        fn fetch_one(&self, id: EntityId, _timeout: Duration) -> Result<NameRecord, DexError> {
            Err(DexError::SpeciesHttp(format!("offline: {id}")))
        }

        fn fetch_all_canonical(&self, _max_id: u16) -> Result<NameCache, DexError> {
            Err(DexError::SpeciesHttp("offline".to_string()))
        }
    }

    #[test]
    fn toggle_recovers_from_poisoned_ownership_lock() {
        let temp = tempfile::tempdir().unwrap();
        let root = camino::Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let app = App::new(Store::new_with_root(root), Offline, LoadSettings::default());

        let _ = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = app.ownership.lock().unwrap();
            panic!("poison the ownership lock");
        }));
        assert!(app.ownership.is_poisoned());

        let toggled = app.toggle_owned(EntityId::new(4).unwrap()).unwrap();
        assert!(toggled.owned);
        assert_eq!(toggled.owned_count, 1);
        assert!(app.store().load_ownership().is_owned(EntityId::new(4).unwrap()));
    }

    #[test]
    fn stale_run_id_cannot_cancel() {
        let shared = RunShared::default();
        let first = shared.try_begin(Some(Strategy::Serial)).unwrap();
        shared.finish(first);
        let second = shared.try_begin(Some(Strategy::Fast)).unwrap();

        shared.cancel(first);
        assert!(!shared.is_cancelled());
        assert!(!shared.snapshot_of(first).active);

        shared.cancel(second);
        assert!(shared.snapshot_of(second).cancel_requested);
    }
}
