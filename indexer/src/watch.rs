//! Watch primitive abstraction and the notify-backed implementation.
//!
//! The indexer only consumes the narrow [`WatchService`] contract: subscribe
//! to one directory (non-recursive), poll pending events without blocking,
//! refresh a subscription after a batch, cancel it. Initial index population
//! always happens through an explicit recursive walk, never through watch
//! events.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, mpsc};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::error::{IndexError, Result};
use crate::event::{FileEvent, FileEventKind};

/// Handle for one directory's subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchToken {
    id: u64,
    directory: PathBuf,
}

impl WatchToken {
    pub(crate) fn new(id: u64, directory: PathBuf) -> Self {
        Self { id, directory }
    }

    /// The directory this token subscribes to.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// One directory's pending events, as returned by a single poll.
#[derive(Debug, Clone)]
pub struct EventBatch {
    /// The subscribed directory the events belong to.
    pub directory: PathBuf,

    /// Events in arrival order.
    pub events: Vec<FileEvent>,
}

/// Filesystem change notification primitive.
pub trait WatchService: Send + Sync {
    /// Subscribe to create/modify/delete events for the direct children of
    /// `directory`.
    fn subscribe(&self, directory: &Path) -> Result<WatchToken>;

    /// Non-blocking: pending events for one subscribed directory, if any.
    fn poll(&self) -> Option<EventBatch>;

    /// Re-arm a subscription after its batch was processed. Returns false
    /// when the subscription is no longer valid.
    fn refresh(&self, token: &WatchToken) -> bool;

    /// Stop notifications for the subscription.
    fn cancel(&self, token: &WatchToken);
}

/// Production [`WatchService`] over a notify watcher.
///
/// Notify delivers events through a callback; they are buffered on an
/// internal channel and grouped per subscribed directory on `poll`. A
/// backend error poisons the affected subscriptions, which `refresh` then
/// reports as invalid.
pub struct NotifyWatchService {
    watcher: Mutex<RecommendedWatcher>,
    rx: Mutex<mpsc::Receiver<notify::Result<notify::Event>>>,
    subs: Mutex<Subscriptions>,
}

#[derive(Default)]
struct Subscriptions {
    next_id: u64,
    /// One live token id per subscribed directory.
    directories: HashMap<PathBuf, u64>,
    /// Directories whose backend reported an error.
    broken: HashSet<PathBuf>,
    pending: VecDeque<EventBatch>,
}

impl NotifyWatchService {
    /// Create a watch service over the platform's recommended backend.
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                // The receiver disappearing just means the service is gone.
                let _ = tx.send(res);
            })
            .map_err(|e| IndexError::Watch(e.to_string()))?;

        Ok(Self {
            watcher: Mutex::new(watcher),
            rx: Mutex::new(rx),
            subs: Mutex::new(Subscriptions::default()),
        })
    }

    /// Drain the notify channel, grouping events per subscribed directory.
    fn drain_events(&self) {
        let rx = self.rx.lock().unwrap_or_else(|e| e.into_inner());
        let mut subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
        let mut grouped: HashMap<PathBuf, Vec<FileEvent>> = HashMap::new();

        for result in rx.try_iter() {
            match result {
                Ok(event) => {
                    let Some(kind) = FileEventKind::from_notify(event.kind) else {
                        continue;
                    };
                    for path in event.paths {
                        let owner = path
                            .parent()
                            .filter(|parent| subs.directories.contains_key(*parent))
                            .map(Path::to_path_buf);
                        if let Some(directory) = owner {
                            grouped
                                .entry(directory)
                                .or_default()
                                .push(FileEvent::new(kind, path.clone()));
                        } else if kind == FileEventKind::Deleted
                            && subs.directories.contains_key(&path)
                        {
                            // The watched directory itself went away.
                            subs.broken.insert(path.clone());
                        }
                    }
                }
                Err(e) => {
                    warn!("watch backend error: {e}");
                    if e.paths.is_empty() {
                        let all: Vec<PathBuf> = subs.directories.keys().cloned().collect();
                        subs.broken.extend(all);
                    } else {
                        for path in e.paths {
                            if subs.directories.contains_key(&path) {
                                subs.broken.insert(path);
                            }
                        }
                    }
                }
            }
        }

        for (directory, events) in grouped {
            subs.pending.push_back(EventBatch { directory, events });
        }
    }
}

impl WatchService for NotifyWatchService {
    fn subscribe(&self, directory: &Path) -> Result<WatchToken> {
        let mut watcher = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .map_err(|e| IndexError::Watch(format!("{}: {e}", directory.display())))?;
        drop(watcher);

        let mut subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
        subs.next_id += 1;
        let id = subs.next_id;
        subs.directories.insert(directory.to_path_buf(), id);
        subs.broken.remove(directory);
        debug!("subscribed to {}", directory.display());

        Ok(WatchToken::new(id, directory.to_path_buf()))
    }

    fn poll(&self) -> Option<EventBatch> {
        self.drain_events();
        let mut subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
        subs.pending.pop_front()
    }

    fn refresh(&self, token: &WatchToken) -> bool {
        let subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
        subs.directories.get(&token.directory) == Some(&token.id)
            && !subs.broken.contains(&token.directory)
            && token.directory.is_dir()
    }

    fn cancel(&self, token: &WatchToken) {
        let mut subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
        if subs.directories.get(&token.directory) == Some(&token.id) {
            subs.directories.remove(&token.directory);
            subs.broken.remove(&token.directory);
            drop(subs);

            let mut watcher = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
            // Unwatch of an already-gone path is not an error worth surfacing.
            if let Err(e) = watcher.unwatch(&token.directory) {
                debug!("unwatch {} failed: {e}", token.directory.display());
            }
            debug!("cancelled subscription for {}", token.directory.display());
        }
    }
}
