//! Coalescing cache for directories and decoded tiles.
//!
//! Concurrent requests for the same key share one load. The load runs as its
//! own task, so a caller that gives up (its future is dropped or its abort
//! signal fires) does not disturb the others; the load is aborted only once
//! no caller is waiting for it anymore.
//!
//! With `retain` set, successful results stay in the cache for the lifetime of
//! the owner. Without it, entries exist only while a load is in flight, which
//! still gives at-most-one load per key at any time.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::error::{GeoTiffError, IoError};
use crate::io::{with_signal, AbortSignal};

type Slot<V> = Option<Result<V, GeoTiffError>>;

enum Entry<V> {
    Ready(V),
    Pending {
        rx: watch::Receiver<Slot<V>>,
        waiters: usize,
        handle: AbortHandle,
        id: u64,
    },
}

type Entries<K, V> = Arc<Mutex<HashMap<K, Entry<V>>>>;

fn lock<K, V>(entries: &Mutex<HashMap<K, Entry<V>>>) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keyed cache with per-key load coalescing.
pub struct SharedCache<K, V> {
    entries: Entries<K, V>,
    retain: bool,
    next_id: AtomicU64,
    loads: AtomicUsize,
}

impl<K, V> SharedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(retain: bool) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            retain,
            next_id: AtomicU64::new(0),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn retains(&self) -> bool {
        self.retain
    }

    /// Completed value for `key`, if cached.
    pub fn get(&self, key: &K) -> Option<V> {
        match lock(&self.entries).get(key) {
            Some(Entry::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Number of completed entries.
    pub fn len(&self) -> usize {
        lock(&self.entries)
            .values()
            .filter(|e| matches!(e, Entry::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of loads started so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Drop every completed entry. In-flight loads are left alone.
    pub fn clear(&self) {
        lock(&self.entries).retain(|_, e| matches!(e, Entry::Pending { .. }));
    }

    /// Return the value for `key`, joining an in-flight load or starting one.
    ///
    /// `loader` is only called when this caller starts the load. If `signal`
    /// fires, this call returns [`GeoTiffError::Aborted`] while other waiters
    /// keep receiving the shared result.
    pub async fn get_or_load<F, Fut>(
        &self,
        key: K,
        signal: Option<&AbortSignal>,
        loader: F,
    ) -> Result<V, GeoTiffError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V, GeoTiffError>> + Send + 'static,
    {
        if signal.is_some_and(|s| s.is_aborted()) {
            return Err(GeoTiffError::Aborted);
        }

        let (mut rx, id) = {
            let mut entries = lock(&self.entries);
            match entries.get_mut(&key) {
                Some(Entry::Ready(value)) => return Ok(value.clone()),
                Some(Entry::Pending {
                    rx, waiters, id, ..
                }) => {
                    *waiters += 1;
                    (rx.clone(), *id)
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    self.loads.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    let handle = tokio::spawn(run_load(
                        self.entries.clone(),
                        key.clone(),
                        id,
                        self.retain,
                        tx,
                        loader(),
                    ))
                    .abort_handle();
                    entries.insert(
                        key.clone(),
                        Entry::Pending {
                            rx: rx.clone(),
                            waiters: 1,
                            handle,
                            id,
                        },
                    );
                    (rx, id)
                }
            }
        };

        let _waiter = Waiter {
            entries: &self.entries,
            key: &key,
            id,
        };

        with_signal(signal, || GeoTiffError::Aborted, async {
            let slot = match rx.wait_for(Option::is_some).await {
                Ok(slot) => slot.clone(),
                Err(_) => None,
            };
            slot.unwrap_or_else(|| {
                Err(GeoTiffError::SourceUnavailable(IoError::Closed(
                    "shared load ended without a result".into(),
                )))
            })
        })
        .await
    }
}

async fn run_load<K, V, Fut>(
    entries: Entries<K, V>,
    key: K,
    id: u64,
    retain: bool,
    tx: watch::Sender<Slot<V>>,
    load: Fut,
) where
    K: Eq + Hash,
    V: Clone,
    Fut: Future<Output = Result<V, GeoTiffError>>,
{
    let result = load.await;
    {
        let mut entries = lock(&entries);
        let ours = matches!(entries.get(&key), Some(Entry::Pending { id: current, .. }) if *current == id);
        if ours {
            match &result {
                Ok(value) if retain => {
                    entries.insert(key, Entry::Ready(value.clone()));
                }
                _ => {
                    entries.remove(&key);
                }
            }
        }
    }
    tx.send_replace(Some(result));
}

/// Registration of one caller on a pending entry.
///
/// Dropping the last waiter of an unfinished load removes the entry and
/// aborts the load task.
struct Waiter<'a, K: Eq + Hash, V> {
    entries: &'a Mutex<HashMap<K, Entry<V>>>,
    key: &'a K,
    id: u64,
}

impl<K: Eq + Hash, V> Drop for Waiter<'_, K, V> {
    fn drop(&mut self) {
        let mut entries = lock(self.entries);
        let abandoned = match entries.get_mut(self.key) {
            Some(Entry::Pending {
                waiters, id, rx, ..
            }) if *id == self.id => {
                *waiters -= 1;
                *waiters == 0 || rx.has_changed().is_err()
            }
            _ => false,
        };
        if abandoned {
            if let Some(Entry::Pending { handle, .. }) = entries.remove(self.key) {
                trace!(id = self.id, "aborting abandoned load");
                handle.abort();
            }
        }
    }
}
