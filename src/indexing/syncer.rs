//! The single writer: merges job deltas into the persisted databases.
//!
//! Jobs enqueue deltas without blocking; a background thread swaps the
//! buffers out under the mutex, then performs all reads, merges and batch
//! commits with the mutex released. Every per-key merge is commutative and
//! associative, so the interleaving of cycles never changes the final
//! persisted state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::storage::{encode, DatabaseId, KvStore, StorageResult, WriteBatch};
use crate::types::{
    unite_dependencies, unite_symbol_names, unite_symbols, CursorInfo, DependencyMap, Location,
    SymbolMap, SymbolNameMap,
};
use crate::{debug_event, log_event};

#[derive(Default)]
struct Buffers {
    symbols: SymbolMap,
    symbol_names: SymbolNameMap,
    dependencies: DependencyMap,
    file_information: HashMap<PathBuf, Vec<String>>,
}

impl Buffers {
    fn is_empty(&self) -> bool {
        self.symbols.is_empty()
            && self.symbol_names.is_empty()
            && self.dependencies.is_empty()
            && self.file_information.is_empty()
    }
}

struct State {
    buffers: Buffers,
    stopped: bool,
    writing: bool,
}

struct Inner {
    state: Mutex<State>,
    // Wakes the sync loop.
    wake: Condvar,
    // Signals waiters that a cycle finished with empty buffers.
    drained: Condvar,
    kv: Arc<KvStore>,
    timeout: Duration,
}

/// Handle to the syncer thread. Dropping it stops and joins the thread.
pub struct Syncer {
    inner: Arc<Inner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Syncer {
    /// Spawn the syncer thread over `kv` with the idle-wakeup `timeout`.
    pub fn spawn(kv: Arc<KvStore>, timeout: Duration) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                buffers: Buffers::default(),
                stopped: false,
                writing: false,
            }),
            wake: Condvar::new(),
            drained: Condvar::new(),
            kv,
            timeout,
        });
        let loop_inner = Arc::clone(&inner);
        let thread = std::thread::Builder::new()
            .name("ccdb-syncer".to_string())
            .spawn(move || run(loop_inner))
            .expect("failed to spawn syncer thread");
        Self {
            inner,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Merge a symbol delta into the buffer. Non-blocking.
    pub fn add_symbols(&self, delta: SymbolMap) {
        if delta.is_empty() {
            return;
        }
        let mut state = self.inner.state.lock().unwrap();
        if state.buffers.symbols.is_empty() {
            state.buffers.symbols = delta;
        } else {
            unite_symbols(&mut state.buffers.symbols, &delta);
        }
    }

    /// Merge a symbol-name delta into the buffer. Non-blocking.
    pub fn add_symbol_names(&self, delta: SymbolNameMap) {
        if delta.is_empty() {
            return;
        }
        let mut state = self.inner.state.lock().unwrap();
        if state.buffers.symbol_names.is_empty() {
            state.buffers.symbol_names = delta;
        } else {
            unite_symbol_names(&mut state.buffers.symbol_names, &delta);
        }
    }

    /// Merge a dependency delta into the buffer. Non-blocking.
    pub fn add_dependencies(&self, delta: DependencyMap) {
        if delta.is_empty() {
            return;
        }
        let mut state = self.inner.state.lock().unwrap();
        if state.buffers.dependencies.is_empty() {
            state.buffers.dependencies = delta;
        } else {
            unite_dependencies(&mut state.buffers.dependencies, &delta);
        }
    }

    /// Record the compile command for `input`. Last write wins.
    pub fn add_file_information(&self, input: PathBuf, args: Vec<String>) {
        let mut state = self.inner.state.lock().unwrap();
        state.buffers.file_information.insert(input, args);
    }

    /// Compile command enqueued but not yet flushed, if any.
    ///
    /// Watcher processing consults this before the FileInformation
    /// database so freshly indexed files are never missed.
    pub fn pending_file_information(&self, input: &Path) -> Option<Vec<String>> {
        let state = self.inner.state.lock().unwrap();
        state.buffers.file_information.get(input).cloned()
    }

    /// Wake the sync loop even if the buffers are empty.
    pub fn notify(&self) {
        let _state = self.inner.state.lock().unwrap();
        self.inner.wake.notify_one();
    }

    /// Wake the loop and wait until every enqueued delta has been
    /// committed. Returns false on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock().unwrap();
        self.inner.wake.notify_one();
        while !(state.buffers.is_empty() && !state.writing) {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            let (guard, _) = self
                .inner
                .drained
                .wait_timeout(state, remaining)
                .unwrap();
            state = guard;
            self.inner.wake.notify_one();
        }
        true
    }

    /// Request the loop to exit. Idempotent; pending deltas are dropped.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.stopped = true;
        self.inner.wake.notify_one();
    }
}

impl Drop for Syncer {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }
    }
}

fn run(inner: Arc<Inner>) {
    loop {
        let taken = {
            let mut state = inner.state.lock().unwrap();
            if state.stopped {
                inner.drained.notify_all();
                return;
            }
            while state.buffers.is_empty() {
                inner.drained.notify_all();
                let (guard, _) = inner.wake.wait_timeout(state, inner.timeout).unwrap();
                state = guard;
                if state.stopped {
                    inner.drained.notify_all();
                    return;
                }
            }
            state.writing = true;
            std::mem::take(&mut state.buffers)
        };

        let failed = write_cycle(&inner.kv, taken);

        let mut state = inner.state.lock().unwrap();
        state.writing = false;
        if let Some(failed) = failed {
            requeue(&mut state.buffers, failed);
        }
        if state.buffers.is_empty() {
            inner.drained.notify_all();
        }
    }
}

/// Write the swapped-out buffers. Returns the portions that failed so the
/// caller can re-queue them for the next cycle.
fn write_cycle(kv: &KvStore, mut taken: Buffers) -> Option<Buffers> {
    let mut failed = Buffers::default();

    if !taken.symbol_names.is_empty() {
        let names = std::mem::take(&mut taken.symbol_names);
        if let Err(e) = sync_symbol_names(kv, &names) {
            log_event!("syncer", "symbol-name sync failed", "{e}");
            failed.symbol_names = names;
        }
    }
    if !taken.symbols.is_empty() {
        let symbols = std::mem::take(&mut taken.symbols);
        if let Err(e) = sync_symbols(kv, &symbols) {
            log_event!("syncer", "symbol sync failed", "{e}");
            failed.symbols = symbols;
        }
    }
    if !taken.dependencies.is_empty() {
        let dependencies = std::mem::take(&mut taken.dependencies);
        if let Err(e) = sync_dependencies(kv, &dependencies) {
            log_event!("syncer", "dependency sync failed", "{e}");
            failed.dependencies = dependencies;
        }
    }
    if !taken.file_information.is_empty() {
        let informations = std::mem::take(&mut taken.file_information);
        if let Err(e) = sync_file_information(kv, &informations) {
            log_event!("syncer", "file-information sync failed", "{e}");
            failed.file_information = informations;
        }
    }

    if failed.is_empty() {
        None
    } else {
        Some(failed)
    }
}

fn sync_symbols(kv: &KvStore, delta: &SymbolMap) -> StorageResult<()> {
    let db = kv.open_write(DatabaseId::Symbol)?;

    // Merge the delta against the persisted records first.
    let mut merged: HashMap<Location, (CursorInfo, bool)> = HashMap::new();
    for (loc, added) in delta {
        let mut current: CursorInfo = db.get_decoded(loc.store_key().as_bytes())?;
        let changed = current.unite(added);
        merged.insert(loc.clone(), (current, changed));
    }

    // Member functions share referrer sets between their declaration and
    // definition sites. The job resolves that within one translation
    // unit; here the same rule is applied across jobs, so a reference
    // merged onto a declaration also reaches the definition it targets
    // (and vice versa), whichever delta arrives first.
    let mut member_links: Vec<(Location, Location)> = Vec::new();
    for (loc, (info, changed)) in &merged {
        if !*changed
            || !info.kind.is_some_and(|kind| kind.is_member_function())
            || info.references.is_empty()
        {
            continue;
        }
        if let Some(target) = &info.target {
            if target != loc {
                member_links.push((loc.clone(), target.clone()));
            }
        }
    }
    for (loc, target) in member_links {
        let references = merged[&loc].0.references.clone();
        if !merged.contains_key(&target) {
            let persisted: CursorInfo = db.get_decoded(target.store_key().as_bytes())?;
            merged.insert(target.clone(), (persisted, false));
        }
        let entry = merged.get_mut(&target).unwrap();
        for reference in references {
            if reference != target && entry.0.references.insert(reference) {
                entry.1 = true;
            }
        }
    }

    let mut batch = WriteBatch::new();
    for (loc, (info, changed)) in &merged {
        if *changed {
            batch.put(
                loc.store_key().into_bytes(),
                encode(DatabaseId::Symbol, info)?,
            );
        }
    }
    debug_event!("syncer", "symbols", "{} merged, {} written", delta.len(), batch.len());
    db.commit(batch)
}

fn sync_symbol_names(kv: &KvStore, delta: &SymbolNameMap) -> StorageResult<()> {
    let db = kv.open_write(DatabaseId::SymbolName)?;
    let mut batch = WriteBatch::new();
    for (name, added) in delta {
        let mut current: std::collections::BTreeSet<Location> =
            db.get_decoded(name.as_bytes())?;
        let old_size = current.len();
        current.extend(added.iter().cloned());
        if current.len() != old_size {
            batch.put(
                name.as_bytes().to_vec(),
                encode(DatabaseId::SymbolName, &current)?,
            );
        }
    }
    db.commit(batch)
}

fn sync_dependencies(kv: &KvStore, delta: &DependencyMap) -> StorageResult<()> {
    let db = kv.open_write(DatabaseId::Dependency)?;
    let mut batch = WriteBatch::new();
    for (path, added) in delta {
        let key = path.display().to_string();
        let mut current: std::collections::BTreeSet<PathBuf> =
            db.get_decoded(key.as_bytes())?;
        let old_size = current.len();
        current.extend(added.iter().cloned());
        // Union cannot shrink, so a size change is the exact predicate.
        if current.len() != old_size {
            batch.put(key.into_bytes(), encode(DatabaseId::Dependency, &current)?);
        }
    }
    db.commit(batch)
}

fn sync_file_information(
    kv: &KvStore,
    delta: &HashMap<PathBuf, Vec<String>>,
) -> StorageResult<()> {
    let db = kv.open_write(DatabaseId::FileInformation)?;
    let mut batch = WriteBatch::new();
    for (input, args) in delta {
        let key = input.display().to_string();
        batch.put(
            key.into_bytes(),
            encode(DatabaseId::FileInformation, args)?,
        );
    }
    db.commit(batch)
}

fn requeue(buffers: &mut Buffers, failed: Buffers) {
    unite_symbols(&mut buffers.symbols, &failed.symbols);
    unite_symbol_names(&mut buffers.symbol_names, &failed.symbol_names);
    unite_dependencies(&mut buffers.dependencies, &failed.dependencies);
    for (input, args) in failed.file_information {
        // A newer command enqueued during the failed cycle wins.
        buffers.file_information.entry(input).or_insert(args);
    }
}
