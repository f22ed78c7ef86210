//! The indexing engine: explicit adds and removes, the watch loop,
//! in-flight deduplication, and hot reconfiguration.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use tokio::sync::{Mutex, Semaphore, watch};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use findex_storage::InvertedIndexStore;

use crate::error::{IndexError, Result};
use crate::event::{FileEvent, FileEventKind};
use crate::filter::PathFilter;
use crate::tokenizer::Tokenizer;
use crate::watch::{EventBatch, NotifyWatchService, WatchService, WatchToken};

/// Width of the worker pool executing indexing task bodies.
const WORKER_POOL_WIDTH: usize = 5;

/// How long an idle watch-loop iteration waits before polling again.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An in-flight indexing task that concurrent triggers can attach to.
type SharedIndexTask = Shared<BoxFuture<'static, Result<()>>>;

/// State of the watch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting between polls.
    Idle,

    /// Asking the watch primitive for pending events.
    Polling,

    /// Handling a directory's event batch.
    Dispatching,

    /// Terminal: the loop was stopped or a subscription became invalid.
    Stopped,
}

/// Live file indexer.
///
/// The collaborator triple (storage, tokenizer, filter) is immutable after
/// construction; reconfiguration never mutates an existing instance but
/// builds a new one via [`FileIndexer::with_storage`] and friends. Watch and
/// dedup bookkeeping is per-instance state, never shared across instances.
pub struct FileIndexer {
    store: Arc<InvertedIndexStore>,
    tokenizer: Arc<dyn Tokenizer>,
    filter: Arc<dyn PathFilter>,
    watcher: Arc<dyn WatchService>,

    /// Bounds how many indexing task bodies run concurrently.
    pool: Arc<Semaphore>,

    /// Active subscription per watched directory.
    watch_tokens: Mutex<HashMap<PathBuf, WatchToken>>,

    /// Files that were successfully scheduled for indexing and not since
    /// removed.
    watched_files: Mutex<HashSet<PathBuf>>,

    /// Dedup map: at most one in-flight indexing task per path. Entries are
    /// removed by the completing task itself.
    in_flight: Mutex<HashMap<PathBuf, SharedIndexTask>>,

    loop_state: std::sync::Mutex<LoopState>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl FileIndexer {
    /// Create an indexer over the platform watch primitive.
    pub fn new(
        store: Arc<InvertedIndexStore>,
        tokenizer: Arc<dyn Tokenizer>,
        filter: Arc<dyn PathFilter>,
    ) -> Result<Arc<Self>> {
        let watcher = Arc::new(NotifyWatchService::new()?);
        Ok(Self::with_watch_service(store, tokenizer, filter, watcher))
    }

    /// Create an indexer over an explicit watch primitive.
    pub fn with_watch_service(
        store: Arc<InvertedIndexStore>,
        tokenizer: Arc<dyn Tokenizer>,
        filter: Arc<dyn PathFilter>,
        watcher: Arc<dyn WatchService>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            store,
            tokenizer,
            filter,
            watcher,
            pool: Arc::new(Semaphore::new(WORKER_POOL_WIDTH)),
            watch_tokens: Mutex::new(HashMap::new()),
            watched_files: Mutex::new(HashSet::new()),
            in_flight: Mutex::new(HashMap::new()),
            loop_state: std::sync::Mutex::new(LoopState::Idle),
            running: AtomicBool::new(false),
            shutdown,
        })
    }

    /// Add `path` to the index and watch it for changes.
    ///
    /// A directory is visited recursively, registering every descendant
    /// concurrently; a file is indexed and its parent directory registered
    /// for change notifications so future siblings are picked up.
    ///
    /// The first error from any concurrent sub-task is surfaced; effects of
    /// sibling sub-tasks that already succeeded are not rolled back, so a
    /// failed call must be treated as possibly partial.
    pub async fn add_to_index(self: &Arc<Self>, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(IndexError::PathNotFound(path.to_path_buf()));
        }

        let mut jobs: Vec<BoxFuture<'static, Result<()>>> = Vec::new();
        for entry in WalkDir::new(path) {
            match entry {
                Ok(entry) => {
                    let this = Arc::clone(self);
                    let entry_path = entry.into_path();
                    jobs.push(async move { this.register_path(entry_path).await }.boxed());
                }
                Err(e) => {
                    let failed = e
                        .path()
                        .unwrap_or(path)
                        .to_path_buf();
                    jobs.push(futures::future::ready(Err(IndexError::indexing(failed, e))).boxed());
                }
            }
        }

        if path.is_file() {
            // Watch the parent directory so the watch service sees changes
            // to this file and its future siblings.
            if let Some(parent) = path.parent() {
                let this = Arc::clone(self);
                let parent = parent.to_path_buf();
                jobs.push(async move { this.register_path(parent).await }.boxed());
            }
        }

        for result in join_all(jobs).await {
            result?;
        }
        Ok(())
    }

    /// Remove `path` from the index and the watched set.
    ///
    /// A file call is redirected to its parent directory. For a directory,
    /// the watch subscription is cancelled and every tracked file directly
    /// inside it is dropped from both the watch-set and the store. Nested
    /// subdirectories are not cascaded. Unknown paths are a no-op.
    pub async fn remove_from_index(&self, path: &Path) -> Result<()> {
        let target = if path.is_file() {
            match path.parent() {
                Some(parent) => parent.to_path_buf(),
                None => return Ok(()),
            }
        } else {
            path.to_path_buf()
        };

        let token = self.watch_tokens.lock().await.remove(&target);
        if let Some(token) = token {
            self.watcher.cancel(&token);
            debug!("stopped watching {}", target.display());
        }

        let mut files = self.watched_files.lock().await;
        let affected: Vec<PathBuf> = files
            .iter()
            .filter(|file| file.parent() == Some(target.as_path()))
            .cloned()
            .collect();
        for file in affected {
            files.remove(&file);
            self.store
                .remove(&file)
                .map_err(|e| IndexError::indexing(&file, e))?;
        }
        Ok(())
    }

    /// Search for exact occurrences of `word`.
    ///
    /// Returns a lazy iterator over a point-in-time snapshot; calling again
    /// recomputes. Never errors: an unknown word — or a storage failure,
    /// which is logged — yields an empty result.
    pub fn search(&self, word: &str) -> std::vec::IntoIter<PathBuf> {
        let paths = match self.store.search(word) {
            Ok(paths) => paths,
            Err(e) => {
                warn!("search for {word:?} failed: {e}");
                Vec::new()
            }
        };
        paths.into_iter()
    }

    /// Start the watch loop on a dedicated task. Idempotent while running.
    pub fn run(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(false);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.watch_loop().await });
    }

    /// Request watch loop termination.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Directories currently registered with the watch primitive.
    pub async fn watched_directories(&self) -> Vec<PathBuf> {
        self.watch_tokens.lock().await.keys().cloned().collect()
    }

    /// Current state of the watch loop.
    pub fn loop_state(&self) -> LoopState {
        *self.loop_state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Human-readable description of the configuration.
    pub fn meta(&self) -> String {
        format!(
            "file indexer\nstorage: {}\ntokenizer: {}\nfilter: {}",
            self.store.meta(),
            self.tokenizer.meta(),
            self.filter.meta()
        )
    }

    /// Human-readable summary of the current state.
    pub async fn state(&self) -> String {
        format!(
            "watched directories: {}\nwatched files: {}\nwatch loop: {:?}\nstorage:\n{}",
            self.watch_tokens.lock().await.len(),
            self.watched_files.lock().await.len(),
            self.loop_state(),
            self.store.state()
        )
    }

    /// New indexer over `store`, with every currently watched file replayed
    /// into it. The caller owns swapping the active reference; this instance
    /// keeps serving requests until then.
    pub async fn with_storage(
        self: &Arc<Self>,
        store: Arc<InvertedIndexStore>,
    ) -> Result<Arc<Self>> {
        let next = Self::new(store, Arc::clone(&self.tokenizer), Arc::clone(&self.filter))?;
        self.replay_into(&next).await?;
        Ok(next)
    }

    /// New indexer over `tokenizer`; see [`FileIndexer::with_storage`].
    pub async fn with_tokenizer(
        self: &Arc<Self>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Arc<Self>> {
        let next = Self::new(Arc::clone(&self.store), tokenizer, Arc::clone(&self.filter))?;
        self.replay_into(&next).await?;
        Ok(next)
    }

    /// New indexer over `filter`; see [`FileIndexer::with_storage`].
    pub async fn with_filter(self: &Arc<Self>, filter: Arc<dyn PathFilter>) -> Result<Arc<Self>> {
        let next = Self::new(Arc::clone(&self.store), Arc::clone(&self.tokenizer), filter)?;
        self.replay_into(&next).await?;
        Ok(next)
    }

    /// Replay every watched file into `next`: register the parent-directory
    /// watch and index the file's content.
    async fn replay_into(&self, next: &Arc<Self>) -> Result<()> {
        let files: Vec<PathBuf> = self.watched_files.lock().await.iter().cloned().collect();
        let mut jobs: Vec<BoxFuture<'static, Result<()>>> = Vec::new();
        for file in files {
            let target = Arc::clone(next);
            jobs.push(
                async move {
                    let parent = file.parent().map(Path::to_path_buf);
                    if let Some(parent) = parent {
                        target.register_path(parent).await?;
                    }
                    target.register_path(file).await
                }
                .boxed(),
            );
        }

        for result in join_all(jobs).await {
            result?;
        }
        Ok(())
    }

    /// Register one path: directories get a watch subscription, files get
    /// an indexing task. Anything else (sockets, dangling links) is skipped.
    async fn register_path(self: &Arc<Self>, path: PathBuf) -> Result<()> {
        if path.is_dir() {
            let mut tokens = self.watch_tokens.lock().await;
            if !tokens.contains_key(&path) {
                let token = self.watcher.subscribe(&path)?;
                debug!("watching directory {}", path.display());
                tokens.insert(path, token);
            }
            return Ok(());
        }
        if path.is_file() {
            return self.schedule_index(path).await;
        }
        Ok(())
    }

    /// Schedule an indexing task for `path`, attaching to an already
    /// pending one instead of starting a duplicate.
    async fn schedule_index(self: &Arc<Self>, path: PathBuf) -> Result<()> {
        self.spawn_index_task(path).await.await
    }

    async fn spawn_index_task(self: &Arc<Self>, path: PathBuf) -> SharedIndexTask {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(existing) = in_flight.get(&path) {
            if existing.peek().is_none() {
                debug!("attaching to in-flight indexing of {}", path.display());
                return existing.clone();
            }
            // The task finished before its own cleanup was observed; a new
            // request must re-execute fresh.
            in_flight.remove(&path);
        }

        let this = Arc::clone(self);
        let task_path = path.clone();
        let handle = tokio::spawn(async move {
            let result = this.index_file(task_path.clone()).await;
            this.in_flight.lock().await.remove(&task_path);
            result
        });

        let err_path = path.clone();
        let shared = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(IndexError::TaskAborted(format!(
                    "{}: {e}",
                    err_path.display()
                ))),
            }
        }
        .boxed()
        .shared();

        in_flight.insert(path, shared.clone());
        shared
    }

    /// The indexing task body: filter gate, then tokenize and replace the
    /// path's word associations.
    async fn index_file(self: &Arc<Self>, path: PathBuf) -> Result<()> {
        let _permit = Arc::clone(&self.pool)
            .acquire_owned()
            .await
            .map_err(|e| IndexError::TaskAborted(e.to_string()))?;

        if !self.filter.is_allowed_path(&path) {
            debug!("filter rejected {}", path.display());
            return Ok(());
        }

        self.watched_files.lock().await.insert(path.clone());

        let store = Arc::clone(&self.store);
        let tokenizer = Arc::clone(&self.tokenizer);
        let task_path = path.clone();
        let outcome = tokio::task::spawn_blocking(move || -> Result<()> {
            store
                .remove(&task_path)
                .map_err(|e| IndexError::indexing(&task_path, e))?;
            let file =
                File::open(&task_path).map_err(|e| IndexError::indexing(&task_path, e))?;
            let words = tokenizer.tokenize(Box::new(BufReader::new(file)));
            store
                .add(words, &task_path)
                .map_err(|e| IndexError::indexing(&task_path, e))?;
            Ok(())
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(e) => Err(IndexError::TaskAborted(format!("{}: {e}", path.display()))),
        }
    }

    async fn watch_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        info!("watch loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.set_loop_state(LoopState::Polling);
            match self.watcher.poll() {
                Some(batch) => {
                    self.set_loop_state(LoopState::Dispatching);
                    let fatal = self.dispatch_batch(batch).await;
                    self.set_loop_state(LoopState::Idle);
                    if fatal {
                        break;
                    }
                }
                None => {
                    self.set_loop_state(LoopState::Idle);
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    }
                }
            }
        }
        self.set_loop_state(LoopState::Stopped);
        self.running.store(false, Ordering::SeqCst);
        info!("watch loop stopped");
    }

    /// Handle one directory's event batch. Per-event failures are logged
    /// and do not terminate the loop. Returns true when the directory's
    /// subscription turned invalid, which is fatal to the whole loop.
    async fn dispatch_batch(self: &Arc<Self>, batch: EventBatch) -> bool {
        let EventBatch { directory, events } = batch;
        for event in events {
            if let Err(e) = self.dispatch_event(&event).await {
                warn!(
                    "error handling {:?} event for {}: {e}",
                    event.kind,
                    event.path.display()
                );
            }
        }

        let token = self.watch_tokens.lock().await.get(&directory).cloned();
        match token {
            Some(token) => {
                if self.watcher.refresh(&token) {
                    false
                } else {
                    self.watcher.cancel(&token);
                    self.watch_tokens.lock().await.remove(&directory);
                    let err = IndexError::SubscriptionInvalid(directory);
                    error!("{err}; stopping watch loop");
                    true
                }
            }
            // The directory was removed while its events were pending.
            None => false,
        }
    }

    async fn dispatch_event(self: &Arc<Self>, event: &FileEvent) -> Result<()> {
        let path = &event.path;

        // Stale or irrelevant: a non-create event for a file nothing ever
        // indexed.
        if event.kind != FileEventKind::Created
            && path.is_file()
            && !self.watched_files.lock().await.contains(path)
        {
            return Ok(());
        }

        match event.kind {
            // A new entry may be a whole subtree; re-run the recursive add.
            FileEventKind::Created => self.add_to_index(path).await,
            FileEventKind::Modified => self.schedule_index(path.clone()).await,
            // Watch registrations are left alone on delete.
            FileEventKind::Deleted => self
                .store
                .remove(path)
                .map_err(|e| IndexError::indexing(path, e)),
        }
    }

    fn set_loop_state(&self, state: LoopState) {
        *self.loop_state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

/// Atomically swappable reference to the active indexer.
///
/// Reconfiguration produces a fresh [`FileIndexer`]; callers that hold the
/// "current" configuration in a cell like this can swap it in while the old
/// instance keeps serving in-flight requests.
pub struct ActiveIndexer {
    current: std::sync::RwLock<Arc<FileIndexer>>,
}

impl ActiveIndexer {
    /// Cell holding `indexer` as the active configuration.
    pub fn new(indexer: Arc<FileIndexer>) -> Self {
        Self {
            current: std::sync::RwLock::new(indexer),
        }
    }

    /// The currently active indexer.
    pub fn load(&self) -> Arc<FileIndexer> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Install `next` as the active indexer, returning the previous one.
    pub fn swap(&self, next: Arc<FileIndexer>) -> Arc<FileIndexer> {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *current, next)
    }
}
