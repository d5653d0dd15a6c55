//! Result cache and paginator
//!
//! One entry per (run target, user). The first page is always answered by a
//! direct query while the full ordered id list is computed in a background
//! warm-up task. Later pages are sliced from that list. Concurrent requests for
//! the same key share a single warm-up.
//!
//! Entry lifecycle: Empty -> Warming -> Warm | Oversized | Failed. Invalidation
//! returns an entry to Empty; a Failed entry stays failed until retried.

use crate::db::Query;
use crate::models::RunTarget;
use crate::{Error, Result};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub target: RunTarget,
    pub user_id: i64,
}

impl CacheKey {
    pub fn new(target: RunTarget, user_id: i64) -> Self {
        Self { target, user_id }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Maximum number of entries before least-recently-used eviction.
    pub capacity: usize,
    /// Entries untouched for this long are dropped.
    pub idle_ttl: Duration,
    /// Result sets larger than this are not held in memory.
    pub max_cached_ids: usize,
    pub warmup_timeout: Duration,
    pub max_concurrent_warmups: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            idle_ttl: Duration::from_secs(30 * 60),
            max_cached_ids: 100_000,
            warmup_timeout: Duration::from_secs(60),
            max_concurrent_warmups: 4,
        }
    }
}

/// Ids for one page plus the full result count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResult {
    pub ids: Vec<i64>,
    pub total_count: u64,
    /// Served from a warm entry without touching the datastore.
    pub from_cache: bool,
}

/// Externally visible state of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Warming,
    Warm { ids: usize },
    Oversized { total: u64 },
    Failed(String),
}

#[derive(Debug, Clone)]
enum Settled {
    Warm(Arc<Vec<i64>>),
    /// Too many ids to hold; pages are recomputed on demand.
    Oversized { total: u64 },
    Failed(String),
}

enum EntryState {
    Warming(watch::Receiver<Option<Settled>>),
    Settled(Settled),
}

struct CacheEntry {
    fingerprint: u64,
    generation: u64,
    state: EntryState,
    last_access: Instant,
}

struct Inner {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    warmups: Arc<Semaphore>,
    settings: CacheSettings,
    generation: AtomicU64,
}

enum Lookup {
    Settled(Settled),
    Warming(watch::Receiver<Option<Settled>>),
}

#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<Inner>,
}

impl ResultCache {
    pub fn new(settings: CacheSettings) -> Self {
        let capacity = NonZeroUsize::new(settings.capacity).unwrap_or(NonZeroUsize::MIN);
        let permits = settings.max_concurrent_warmups.max(1);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(LruCache::new(capacity)),
                warmups: Arc::new(Semaphore::new(permits)),
                settings,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Ids on 1-based `page` for `query`.
    ///
    /// Page 1 never waits on a warm-up. Other pages wait for the in-flight
    /// warm-up of their key, starting one if none exists. A failed warm-up is
    /// reported as [`Error::CacheWarmupFailure`] until [`ResultCache::retry`].
    pub async fn page(
        &self,
        key: &CacheKey,
        query: &Query,
        page: u32,
        per_page: u32,
    ) -> Result<PageResult> {
        if page == 0 || per_page == 0 {
            return Err(Error::Validation(
                "page and per_page must be at least 1".to_string(),
            ));
        }

        let fingerprint = query.secured().fingerprint();
        match self.lookup(key, fingerprint, query)? {
            Lookup::Settled(settled) => {
                crate::metrics::CACHE_REQUESTS_TOTAL
                    .with_label_values(&["hit"])
                    .inc();
                serve(settled, query, page, per_page).await
            }
            Lookup::Warming(rx) => {
                crate::metrics::CACHE_REQUESTS_TOTAL
                    .with_label_values(&["miss"])
                    .inc();
                if page == 1 {
                    let ids = query.page(page, per_page).await?;
                    let total_count = query.count().await?;
                    return Ok(PageResult {
                        ids,
                        total_count,
                        from_cache: false,
                    });
                }
                let settled = wait(rx).await?;
                serve(settled, query, page, per_page).await
            }
        }
    }

    /// Wait for any in-flight warm-up of `key` and return the resulting state.
    pub async fn settled(&self, key: &CacheKey) -> CacheState {
        let rx = match self.inner.entries.lock() {
            Ok(entries) => match entries.peek(key).map(|e| &e.state) {
                Some(EntryState::Warming(rx)) => Some(rx.clone()),
                _ => None,
            },
            Err(_) => None,
        };
        if let Some(rx) = rx {
            let _ = wait(rx).await;
        }
        self.state(key)
    }

    pub fn state(&self, key: &CacheKey) -> CacheState {
        let Ok(entries) = self.inner.entries.lock() else {
            return CacheState::Empty;
        };
        match entries.peek(key).map(|e| &e.state) {
            None => CacheState::Empty,
            Some(EntryState::Warming(_)) => CacheState::Warming,
            Some(EntryState::Settled(Settled::Warm(ids))) => CacheState::Warm { ids: ids.len() },
            Some(EntryState::Settled(Settled::Oversized { total })) => {
                CacheState::Oversized { total: *total }
            }
            Some(EntryState::Settled(Settled::Failed(msg))) => CacheState::Failed(msg.clone()),
        }
    }

    /// Drop the entry for `key`. An in-flight warm-up for it is discarded on completion.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        match self.inner.entries.lock() {
            Ok(mut entries) => entries.pop(key).is_some(),
            Err(_) => false,
        }
    }

    /// Drop every user's entry for a search definition.
    pub fn invalidate_definition(&self, definition_id: i64) -> usize {
        let target = RunTarget::Definition(definition_id);
        let Ok(mut entries) = self.inner.entries.lock() else {
            return 0;
        };
        let keys: Vec<CacheKey> = entries
            .iter()
            .filter(|(k, _)| k.target == target)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
        keys.len()
    }

    /// Clear a failed entry so the next request warms again.
    pub fn retry(&self, key: &CacheKey) -> bool {
        let Ok(mut entries) = self.inner.entries.lock() else {
            return false;
        };
        let failed = matches!(
            entries.peek(key).map(|e| &e.state),
            Some(EntryState::Settled(Settled::Failed(_)))
        );
        if failed {
            entries.pop(key);
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries idle for longer than the configured TTL.
    pub fn sweep_idle(&self) -> usize {
        match self.inner.entries.lock() {
            Ok(mut entries) => evict_idle(&mut entries, self.inner.settings.idle_ttl),
            Err(_) => 0,
        }
    }

    fn lookup(&self, key: &CacheKey, fingerprint: u64, query: &Query) -> Result<Lookup> {
        let mut entries = self
            .inner
            .entries
            .lock()
            .map_err(|_| Error::Internal("result cache lock poisoned".to_string()))?;
        evict_idle(&mut entries, self.inner.settings.idle_ttl);

        if let Some(entry) = entries.get_mut(key) {
            if entry.fingerprint == fingerprint {
                entry.last_access = Instant::now();
                return Ok(match &entry.state {
                    EntryState::Warming(rx) => Lookup::Warming(rx.clone()),
                    EntryState::Settled(settled) => Lookup::Settled(settled.clone()),
                });
            }
            tracing::debug!(user_id = key.user_id, target = %key.target.storage_key(), "Query changed, resetting cache entry");
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = watch::channel(None);
        entries.put(
            key.clone(),
            CacheEntry {
                fingerprint,
                generation,
                state: EntryState::Warming(rx.clone()),
                last_access: Instant::now(),
            },
        );
        tokio::spawn(warm(
            self.inner.clone(),
            key.clone(),
            generation,
            query.clone(),
            tx,
        ));
        Ok(Lookup::Warming(rx))
    }
}

fn evict_idle(entries: &mut LruCache<CacheKey, CacheEntry>, ttl: Duration) -> usize {
    let stale: Vec<CacheKey> = entries
        .iter()
        .filter(|(_, e)| e.last_access.elapsed() > ttl)
        .map(|(k, _)| k.clone())
        .collect();
    for key in &stale {
        entries.pop(key);
    }
    stale.len()
}

/// Periodically drop idle entries so a quiet server does not hold id lists
/// until the next lookup. Stops when `shutdown` flips to true.
pub async fn run_idle_sweep(
    cache: ResultCache,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(interval = ?interval, "Result cache sweeper starting");
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Result cache sweeper stopping");
                    return;
                }
            }
            _ = tokio::time::sleep(interval) => {
                let evicted = cache.sweep_idle();
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = cache.len(), "Evicted idle cache entries");
                }
            }
        }
    }
}

async fn wait(mut rx: watch::Receiver<Option<Settled>>) -> Result<Settled> {
    match rx.wait_for(|s| s.is_some()).await {
        Ok(settled) => settled
            .clone()
            .ok_or_else(|| Error::Internal("warm-up settled without a result".to_string())),
        Err(_) => Err(Error::CacheWarmupFailure(
            "warm-up task ended without a result".to_string(),
        )),
    }
}

async fn serve(settled: Settled, query: &Query, page: u32, per_page: u32) -> Result<PageResult> {
    match settled {
        Settled::Warm(ids) => {
            let len = ids.len();
            let start = (u64::from(page - 1) * u64::from(per_page)).min(len as u64) as usize;
            let end = (start + per_page as usize).min(len);
            Ok(PageResult {
                ids: ids[start..end].to_vec(),
                total_count: len as u64,
                from_cache: true,
            })
        }
        Settled::Oversized { total } => Ok(PageResult {
            ids: query.page(page, per_page).await?,
            total_count: total,
            from_cache: false,
        }),
        Settled::Failed(msg) => Err(Error::CacheWarmupFailure(msg)),
    }
}

async fn warm(
    inner: Arc<Inner>,
    key: CacheKey,
    generation: u64,
    query: Query,
    tx: watch::Sender<Option<Settled>>,
) {
    let start = Instant::now();
    let settled = match inner.warmups.clone().acquire_owned().await {
        Ok(_permit) => {
            match tokio::time::timeout(
                inner.settings.warmup_timeout,
                compute(&query, inner.settings.max_cached_ids),
            )
            .await
            {
                Ok(Ok(settled)) => settled,
                Ok(Err(e)) => Settled::Failed(e.to_string()),
                Err(_) => Settled::Failed(format!(
                    "warm-up exceeded {:?}",
                    inner.settings.warmup_timeout
                )),
            }
        }
        Err(_) => Settled::Failed("warm-up pool closed".to_string()),
    };

    let outcome = match &settled {
        Settled::Warm(_) => "warm",
        Settled::Oversized { .. } => "oversized",
        Settled::Failed(_) => "failed",
    };
    crate::metrics::CACHE_WARMUP_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(start.elapsed().as_secs_f64());

    match &settled {
        Settled::Failed(reason) => tracing::warn!(
            user_id = key.user_id,
            target = %key.target.storage_key(),
            reason = %reason,
            "Result cache warm-up failed"
        ),
        _ => tracing::debug!(
            user_id = key.user_id,
            target = %key.target.storage_key(),
            outcome,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Result cache warmed"
        ),
    }

    if let Ok(mut entries) = inner.entries.lock() {
        if let Some(entry) = entries.peek_mut(&key) {
            if entry.generation == generation {
                entry.state = EntryState::Settled(settled.clone());
            }
        }
    }
    let _ = tx.send(Some(settled));
}

async fn compute(query: &Query, max_ids: usize) -> Result<Settled> {
    let ids = query.all_ids(max_ids as u64 + 1).await?;
    if ids.len() > max_ids {
        let total = query.count().await?;
        return Ok(Settled::Oversized { total });
    }
    Ok(Settled::Warm(Arc::new(ids)))
}
