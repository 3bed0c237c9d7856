//! Job lifecycle: IDs, PCH ordering, watcher registration, dirty issuance.
//!
//! The `Indexer` owns three moving parts: a worker pool running indexer
//! and dirty jobs, the syncer thread, and an event thread draining a
//! typed channel. The event thread is the only place that mutates the
//! dependency and watched tables, so their bookkeeping stays serialized
//! without long-held locks.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::config::Settings;
use crate::parsing::AstProvider;
use crate::storage::{decode, DatabaseId, KvStore};
use crate::types::DependencyMap;
use crate::watcher::{NotifyBackend, WatchBackend, WatchedMap};
use crate::{log_event, paths};

use super::dirty::DirtyJob;
use super::error::IndexResult;
use super::job::{args_mark_pch, IndexerJob, JobContext};
use super::pool::{PoolSubmitter, WorkerPool};
use super::syncer::Syncer;

/// Identifier of a live indexing job, unique among live jobs.
pub type JobId = u32;

pub(crate) enum IndexerEvent {
    Dependencies(DependencyMap),
    JobDone { id: JobId, input: PathBuf },
    DirectoryChanged(PathBuf),
    Reindex { input: PathBuf, args: Vec<String> },
    Barrier(Sender<()>),
    Shutdown,
}

pub(crate) struct CoordState {
    pub(crate) indexing: HashSet<PathBuf>,
    pub(crate) pch_header_error: HashSet<PathBuf>,
    pub(crate) jobs: HashMap<JobId, PathBuf>,
    pub(crate) last_job_id: JobId,
    pub(crate) job_counter: u32,
    pub(crate) dependencies: DependencyMap,
    pub(crate) default_args: Vec<String>,
}

pub(crate) struct Shared {
    pub(crate) settings: Arc<Settings>,
    pub(crate) state: Mutex<CoordState>,
    pub(crate) pch_cond: Condvar,
    pub(crate) watched: Mutex<WatchedMap>,
    pub(crate) pch_deps: RwLock<HashMap<PathBuf, BTreeSet<PathBuf>>>,
    pub(crate) kv: Arc<KvStore>,
    pub(crate) syncer: Syncer,
    pub(crate) events: Sender<IndexerEvent>,
    pub(crate) provider: Arc<dyn AstProvider>,
    pub(crate) watcher: Mutex<Box<dyn WatchBackend>>,
    pub(crate) done_subscribers: Mutex<Vec<Sender<(JobId, PathBuf)>>>,
}

/// Public handle to the indexing core.
pub struct Indexer {
    shared: Arc<Shared>,
    pool: WorkerPool,
    submitter: PoolSubmitter,
    events: Sender<IndexerEvent>,
    event_thread: Option<JoinHandle<()>>,
}

impl Indexer {
    /// Create an indexer watching the filesystem through `notify`.
    pub fn new(settings: Settings, provider: Arc<dyn AstProvider>) -> IndexResult<Self> {
        let (dir_tx, dir_rx) = unbounded::<PathBuf>();
        let backend = NotifyBackend::new(dir_tx)?;
        let indexer = Self::with_backend(settings, provider, Box::new(backend))?;
        let events = indexer.events.clone();
        std::thread::Builder::new()
            .name("ccdb-watch-bridge".to_string())
            .spawn(move || {
                while let Ok(dir) = dir_rx.recv() {
                    if events.send(IndexerEvent::DirectoryChanged(dir)).is_err() {
                        break;
                    }
                }
            })
            .expect("failed to spawn watch bridge thread");
        Ok(indexer)
    }

    /// Create an indexer with an explicit watch backend (tests drive
    /// directory events by hand via [`Indexer::directory_changed`]).
    pub fn with_backend(
        settings: Settings,
        provider: Arc<dyn AstProvider>,
        backend: Box<dyn WatchBackend>,
    ) -> IndexResult<Self> {
        let settings = Arc::new(settings);
        let kv = Arc::new(KvStore::open(&settings.project_root)?);
        let syncer = Syncer::spawn(
            Arc::clone(&kv),
            Duration::from_secs(settings.indexing.sync_timeout_secs),
        );
        let (events_tx, events_rx) = unbounded::<IndexerEvent>();
        let shared = Arc::new(Shared {
            settings: Arc::clone(&settings),
            state: Mutex::new(CoordState {
                indexing: HashSet::new(),
                pch_header_error: HashSet::new(),
                jobs: HashMap::new(),
                last_job_id: 0,
                job_counter: 0,
                dependencies: DependencyMap::new(),
                default_args: Vec::new(),
            }),
            pch_cond: Condvar::new(),
            watched: Mutex::new(WatchedMap::new()),
            pch_deps: RwLock::new(HashMap::new()),
            kv,
            syncer,
            events: events_tx.clone(),
            provider,
            watcher: Mutex::new(backend),
            done_subscribers: Mutex::new(Vec::new()),
        });
        let pool = WorkerPool::new(settings.indexing.parallel_threads);
        let submitter = pool.submitter();
        let loop_shared = Arc::clone(&shared);
        let loop_submitter = pool.submitter();
        let event_thread = std::thread::Builder::new()
            .name("ccdb-events".to_string())
            .spawn(move || event_loop(loop_shared, events_rx, loop_submitter))
            .expect("failed to spawn event thread");
        Ok(Self {
            shared,
            pool,
            submitter,
            events: events_tx,
            event_thread: Some(event_thread),
        })
    }

    /// Queue a translation unit for indexing.
    ///
    /// Returns `None` when the input is already owned by a live job.
    pub fn index(&self, input: impl Into<PathBuf>, args: Vec<String>) -> Option<JobId> {
        dispatch_index(&self.shared, &self.submitter, input.into(), args)
    }

    /// Arguments appended to every job's argument vector.
    pub fn set_default_args(&self, args: Vec<String>) {
        self.shared.state.lock().unwrap().default_args = args;
    }

    /// Receive `(job_id, input)` for every completed job.
    pub fn subscribe_done(&self) -> Receiver<(JobId, PathBuf)> {
        let (tx, rx) = unbounded();
        self.shared.done_subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Inject a directory-changed notification (what the watch backend
    /// delivers in production).
    pub fn directory_changed(&self, dir: impl Into<PathBuf>) {
        let _ = self
            .events
            .send(IndexerEvent::DirectoryChanged(dir.into()));
    }

    /// Read access to the underlying databases.
    pub fn store(&self) -> Arc<KvStore> {
        Arc::clone(&self.shared.kv)
    }

    /// Flush the syncer. Returns false on timeout.
    pub fn sync(&self, timeout: Duration) -> bool {
        self.shared.syncer.flush(timeout)
    }

    /// Wait until queued events and jobs (including dirty sweeps and the
    /// reindexing they trigger) have settled. Returns false on timeout.
    pub fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.barrier(deadline) {
                return false;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            if !self.pool.wait_idle(remaining) {
                return false;
            }
            if !self.barrier(deadline) {
                return false;
            }
            let jobs_empty = self.shared.state.lock().unwrap().jobs.is_empty();
            if jobs_empty && self.pool.wait_idle(Duration::ZERO) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
        }
    }

    /// Wait until the event thread has processed everything sent so far.
    fn barrier(&self, deadline: Instant) -> bool {
        let (tx, rx) = bounded(1);
        if self.events.send(IndexerEvent::Barrier(tx)).is_err() {
            return true;
        }
        rx.recv_deadline(deadline).is_ok()
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        let _ = self.drain(Duration::from_secs(5));
        self.shared.syncer.flush(Duration::from_secs(5));
        let _ = self.events.send(IndexerEvent::Shutdown);
        if let Some(thread) = self.event_thread.take() {
            let _ = thread.join();
        }
        // The event thread's submitter is gone with the thread; this
        // handle has to disconnect too before the workers can be joined.
        self.submitter.disconnect();
        self.pool.shutdown();
    }
}

fn event_loop(shared: Arc<Shared>, rx: Receiver<IndexerEvent>, pool: PoolSubmitter) {
    while let Ok(event) = rx.recv() {
        match event {
            IndexerEvent::Dependencies(delta) => commit_dependencies(&shared, delta),
            IndexerEvent::JobDone { id, input } => on_job_done(&shared, id, input),
            IndexerEvent::DirectoryChanged(dir) => on_directory_changed(&shared, &pool, dir),
            IndexerEvent::Reindex { input, args } => {
                let _ = dispatch_index(&shared, &pool, input, args);
            }
            IndexerEvent::Barrier(ack) => {
                let _ = ack.send(());
            }
            IndexerEvent::Shutdown => return,
        }
    }
}

fn dispatch_index(
    shared: &Arc<Shared>,
    pool: &PoolSubmitter,
    input: PathBuf,
    args: Vec<String>,
) -> Option<JobId> {
    let id = {
        let mut state = shared.state.lock().unwrap();
        if state.indexing.contains(&input) {
            return None;
        }
        let id = loop {
            let candidate = state.last_job_id;
            state.last_job_id = state.last_job_id.wrapping_add(1);
            if !state.jobs.contains_key(&candidate) {
                break candidate;
            }
        };
        state.indexing.insert(input.clone());
        state.jobs.insert(id, input.clone());
        id
    };
    let job = IndexerJob::new(
        id,
        input.clone(),
        args,
        JobContext {
            shared: Arc::clone(shared),
        },
    );
    if !pool.submit(move || job.run()) {
        let mut state = shared.state.lock().unwrap();
        state.jobs.remove(&id);
        state.indexing.remove(&input);
        shared.pch_cond.notify_all();
        return None;
    }
    Some(id)
}

/// Fold a job's dependency delta into the authoritative map, forward only
/// the genuinely new edges to the syncer, and register watches for newly
/// seen dependent paths.
fn commit_dependencies(shared: &Arc<Shared>, delta: DependencyMap) {
    let mut fresh = DependencyMap::new();
    {
        let mut state = shared.state.lock().unwrap();
        for (key, values) in &delta {
            let known = state.dependencies.entry(key.clone()).or_default();
            let new_values: BTreeSet<PathBuf> = values.difference(known).cloned().collect();
            known.extend(values.iter().cloned());
            if !new_values.is_empty() {
                fresh.insert(key.clone(), new_values);
            }
        }
    }
    if fresh.is_empty() {
        return;
    }
    shared.syncer.add_dependencies(fresh.clone());

    let mut new_dirs: Vec<PathBuf> = Vec::new();
    {
        let mut watched = shared.watched.lock().unwrap();
        for path in fresh.keys() {
            let Some(parent) = path.parent() else {
                continue;
            };
            let Some(name) = path.file_name() else {
                continue;
            };
            let parent = parent.to_path_buf();
            if !watched.contains_key(&parent) {
                new_dirs.push(parent.clone());
            }
            watched
                .entry(parent)
                .or_default()
                .insert((name.to_os_string(), paths::mtime_epoch(path)));
        }
    }
    if new_dirs.is_empty() {
        return;
    }
    let mut watcher = shared.watcher.lock().unwrap();
    for dir in new_dirs {
        if let Err(e) = watcher.watch(&dir) {
            log_event!("watcher", "failed to watch", "{}: {e}", dir.display());
        }
    }
}

fn on_job_done(shared: &Arc<Shared>, id: JobId, input: PathBuf) {
    let flush = {
        let mut state = shared.state.lock().unwrap();
        state.jobs.remove(&id);
        if state.indexing.remove(&input) {
            shared.pch_cond.notify_all();
        }
        state.job_counter += 1;
        let flush = state.jobs.is_empty()
            || state.job_counter >= shared.settings.indexing.sync_interval;
        if flush {
            state.job_counter = 0;
        }
        flush
    };
    if flush {
        shared.syncer.notify();
    }
    let mut subscribers = shared.done_subscribers.lock().unwrap();
    subscribers.retain(|tx| tx.send((id, input.clone())).is_ok());
}

/// Decide which watched files actually changed, propagate through the
/// dependency map, and hand the result to a dirty job.
fn on_directory_changed(shared: &Arc<Shared>, pool: &PoolSubmitter, dir: PathBuf) {
    let mut dirty: BTreeSet<PathBuf> = BTreeSet::new();
    let mut to_index: HashMap<PathBuf, Vec<String>> = HashMap::new();
    let mut to_index_pch: HashMap<PathBuf, Vec<String>> = HashMap::new();
    {
        let mut watched = shared.watched.lock().unwrap();
        let Some(entries) = watched.get_mut(&dir) else {
            log_event!(
                "watcher",
                "directory changed but not watched",
                "{}",
                dir.display()
            );
            return;
        };
        let file_info = shared.kv.open_read(DatabaseId::FileInformation);
        let observed: Vec<(OsString, u64)> = entries.iter().cloned().collect();
        let mut pending: Vec<(OsString, PathBuf)> = Vec::new();
        for (name, stored_mtime) in observed {
            let file = dir.join(&name);
            let current_mtime = paths::mtime_epoch(&file);
            if file.exists() && current_mtime == stored_mtime {
                continue;
            }
            entries.remove(&(name.clone(), stored_mtime));
            pending.push((name, file.clone()));
            dirty.insert(file.clone());

            let dependents = shared
                .state
                .lock()
                .unwrap()
                .dependencies
                .get(&file)
                .cloned();
            let Some(dependents) = dependents else {
                log_event!(
                    "watcher",
                    "modified file missing from dependency map",
                    "{}",
                    file.display()
                );
                continue;
            };
            for path in dependents {
                dirty.insert(path.clone());
                if !path.exists() {
                    continue;
                }
                // The syncer may still hold this file's compile command.
                let args = shared.syncer.pending_file_information(&path).or_else(|| {
                    let key = path.display().to_string();
                    match file_info.get(key.as_bytes()) {
                        Ok(Some(bytes)) => {
                            decode::<Vec<String>>(DatabaseId::FileInformation, &bytes).ok()
                        }
                        _ => None,
                    }
                });
                let Some(args) = args else {
                    continue;
                };
                if args_mark_pch(&args) {
                    to_index_pch.insert(path, args);
                } else {
                    to_index.insert(path, args);
                }
            }
        }
        for (name, file) in pending {
            entries.insert((name, paths::mtime_epoch(&file)));
        }
    }
    if dirty.is_empty() {
        return;
    }
    let job = DirtyJob::new(
        dirty,
        to_index_pch,
        to_index,
        Arc::clone(&shared.kv),
        shared.events.clone(),
    );
    if !pool.submit(move || job.run()) {
        log_event!("dirty", "pool rejected dirty job");
    }
}
