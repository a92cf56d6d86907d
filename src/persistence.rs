//! Persistent store for the overlay record
//!
//! One well-known key maps to the serialized record; writes replace the whole
//! value. Subscribers hear about changes made by *other* execution contexts,
//! the way a browser storage event works. Nothing here interprets the record
//! beyond the `load`/`save` helpers.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::OverlayConfig;
use crate::constants::store;
use crate::error::SyncError;

#[cfg(test)]
pub use memory::MemoryStore;

/// Change to a stored key made by another context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// New value, `None` when the key was removed
    pub new_value: Option<String>,
}

pub type StorageCallback = Box<dyn Fn(StorageEvent) + Send + Sync>;

/// Durable per-user store for the record
pub trait ConfigStore: Send + Sync {
    /// Key the record lives under
    fn key(&self) -> &str;

    /// Stored text, `None` when nothing was saved yet
    fn load_raw(&self) -> Result<Option<String>>;

    /// Replace the stored text
    fn save_raw(&self, text: &str) -> Result<()>;

    /// Register for changes made by other contexts.
    ///
    /// Callbacks run on a store-owned thread (or the writer's thread) and
    /// must not call back into the store.
    fn subscribe(&self, callback: StorageCallback) -> Result<Subscription>;

    /// Last saved record, repaired; `None` if absent or unusable
    fn load(&self) -> Option<OverlayConfig> {
        match self.load_raw() {
            Ok(Some(text)) => {
                let config = OverlayConfig::from_json(&text);
                if config.is_none() {
                    let err = SyncError::Store(format!("unparsable value under '{}'", self.key()));
                    warn!(error = %err, "Ignoring stored config");
                }
                config
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %self.key(), error = ?e, "Failed to read stored config");
                None
            }
        }
    }

    fn save(&self, config: &OverlayConfig) -> Result<()> {
        self.save_raw(&config.to_json())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type SharedCallback = Arc<dyn Fn(StorageEvent) + Send + Sync>;

/// Subscriber list shared by a store and its subscriptions
#[derive(Default)]
struct Subscribers {
    next_id: u64,
    /// (subscription id, owning context, callback)
    entries: Vec<(u64, u64, SharedCallback)>,
    /// File watcher, alive while anyone is subscribed
    watcher: Option<Box<dyn Send>>,
}

impl Subscribers {
    fn add(&mut self, context: u64, callback: StorageCallback) -> u64 {
        self.next_id += 1;
        self.entries.push((self.next_id, context, Arc::from(callback)));
        self.next_id
    }

    /// Deliver to every subscriber not owned by `writer`
    fn notify_except(&self, writer: Option<u64>, event: &StorageEvent) {
        for (_, context, callback) in &self.entries {
            if Some(*context) != writer {
                callback(event.clone());
            }
        }
    }
}

/// Handle for a storage subscription.
///
/// Dropping it unsubscribes. Safe to cancel more than once, and after the
/// store itself is gone. Notifications are delivered while the subscriber
/// list is locked, so none arrives once `cancel` has returned.
pub struct Subscription {
    id: u64,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    fn new(id: u64, subscribers: &Arc<Mutex<Subscribers>>) -> Self {
        Self {
            id,
            subscribers: Arc::downgrade(subscribers),
        }
    }

    pub fn cancel(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            // Dropped after the lock is released
            let watcher = {
                let mut subscribers = lock(&subscribers);
                subscribers.entries.retain(|(id, _, _)| *id != self.id);
                if subscribers.entries.is_empty() {
                    subscribers.watcher.take()
                } else {
                    None
                }
            };
            if watcher.is_some() {
                debug!("Store watcher stopped");
            }
            debug!(subscription = self.id, "Storage subscription cancelled");
        }
        self.subscribers = Weak::new();
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        let Some(subscribers) = self.subscribers.upgrade() else {
            return false;
        };
        let active = lock(&subscribers).entries.iter().any(|(id, _, _)| *id == self.id);
        active
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ==============================================================================
// File-backed store (shared between processes)
// ==============================================================================

/// Temp file suffix counter, unique across every store in the process
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Store backed by `<dir>/<key>.json`.
///
/// Other processes' writes are picked up by a debounced `notify` watcher on
/// the store directory, running while at least one subscription is alive.
#[derive(Clone)]
pub struct FileStore {
    inner: Arc<FileStoreInner>,
}

struct FileStoreInner {
    key: String,
    path: PathBuf,
    debounce: Duration,
    /// Content this instance last wrote or observed
    last_seen: Mutex<Option<String>>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl FileStore {
    pub fn new(dir: &Path, debounce: Duration) -> Self {
        let key = store::KEY;
        let path = dir.join(format!("{key}.{}", store::FILE_EXTENSION));
        Self {
            inner: Arc::new(FileStoreInner {
                key: key.to_string(),
                path,
                debounce,
                last_seen: Mutex::new(None),
                subscribers: Arc::new(Mutex::new(Subscribers::default())),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Watch the store directory; caller holds the subscriber lock
    fn start_watcher(&self) -> Result<Box<dyn Send>> {
        let path = &self.inner.path;
        let dir = path
            .parent()
            .with_context(|| format!("Store file {:?} has no parent directory", path))?;
        fs::create_dir_all(dir).with_context(|| format!("Failed to create store directory {:?}", dir))?;

        // Baseline: content present now is not a change
        {
            let mut last_seen = lock(&self.inner.last_seen);
            if last_seen.is_none() {
                *last_seen = read_optional(path).ok().flatten();
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let mut debouncer = new_debouncer(self.inner.debounce, None, move |result: DebounceEventResult| {
            let Some(inner) = weak.upgrade() else { return };
            match result {
                Ok(events) => {
                    if events.iter().any(|e| inner.is_store_event(&e.event)) {
                        inner.check_for_change();
                    }
                }
                Err(errors) => warn!(path = %inner.path.display(), errors = ?errors, "Store watch error"),
            }
        })
        .context("Failed to create store watcher")?;

        debouncer
            .watcher()
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch store directory {:?}", dir))?;

        debug!(dir = %dir.display(), "Store watcher started");
        Ok(Box::new(debouncer))
    }
}

impl FileStoreInner {
    /// Event touching the store file itself (temp files and reads don't count)
    fn is_store_event(&self, event: &Event) -> bool {
        !matches!(event.kind, EventKind::Access(_))
            && event
                .paths
                .iter()
                .any(|p| p.file_name().is_some() && p.file_name() == self.path.file_name())
    }

    fn check_for_change(&self) {
        let event = {
            let mut last_seen = lock(&self.last_seen);
            let current = match read_optional(&self.path) {
                Ok(current) => current,
                Err(e) => {
                    debug!(path = %self.path.display(), error = ?e, "Store watcher read failed");
                    return;
                }
            };
            if current == *last_seen {
                return;
            }
            *last_seen = current.clone();
            StorageEvent {
                key: self.key.clone(),
                new_value: current,
            }
        };

        debug!(key = %event.key, removed = event.new_value.is_none(), "Stored config changed externally");
        lock(&self.subscribers).notify_except(None, &event);
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read store file {:?}", path)),
    }
}

impl ConfigStore for FileStore {
    fn key(&self) -> &str {
        &self.inner.key
    }

    fn load_raw(&self) -> Result<Option<String>> {
        read_optional(&self.inner.path)
    }

    fn save_raw(&self, text: &str) -> Result<()> {
        let path = &self.inner.path;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory {:?}", parent))?;
        }

        // Hold last_seen across the write so the watcher never reports our own write
        let mut last_seen = lock(&self.inner.last_seen);
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!(
            "{}.{}.{seq}.tmp",
            store::FILE_EXTENSION,
            std::process::id()
        ));
        fs::write(&tmp, text).with_context(|| format!("Failed to write store file {:?}", tmp))?;
        fs::rename(&tmp, path).with_context(|| format!("Failed to replace store file {:?}", path))?;
        *last_seen = Some(text.to_string());

        debug!(path = %path.display(), bytes = text.len(), "Saved config to store");
        Ok(())
    }

    fn subscribe(&self, callback: StorageCallback) -> Result<Subscription> {
        let id = {
            let mut subscribers = lock(&self.inner.subscribers);
            if subscribers.watcher.is_none() {
                subscribers.watcher = Some(self.start_watcher()?);
            }
            subscribers.add(0, callback)
        };
        info!(path = %self.inner.path.display(), subscription = id, "Watching store for external changes");
        Ok(Subscription::new(id, &self.inner.subscribers))
    }
}

// ==============================================================================
// In-process store (several contexts in one process)
// ==============================================================================
