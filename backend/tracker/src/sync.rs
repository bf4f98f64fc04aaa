//! Write-behind mirror of the store into the remote service, and startup
//! rehydration from the remote and local caches.
//!
//! ## Writes
//!
//! The store never awaits the remote. Mutations enqueue [`SyncOp`]s on an
//! unbounded channel; a single [`SyncWorker`] applies them in order. A failed
//! op is logged as `RemoteWriteFailed`, counted, and dropped (no retry).
//!
//! ## Rehydration
//!
//! [`rehydrate`] merges the remote `journeys` collection with the local
//! snapshot, fast-forwards each journey by the ticks that would have fired
//! while the process was down, and drops completed journeys whose grace
//! period has run out.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::LocalCache;
use crate::errors::TrackerError;
use crate::journey::JourneyRecord;
use crate::records::DonorProfile;
use crate::remote::{Collection, Filter, RemoteStore};

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOp {
    Upsert {
        collection: Collection,
        id: String,
        record: Value,
    },
    Clear {
        collection: Collection,
    },
}

impl SyncOp {
    /// Build an upsert from any serializable record.
    pub fn upsert<T: Serialize>(collection: Collection, id: &str, record: &T) -> Option<Self> {
        match serde_json::to_value(record) {
            Ok(record) => Some(Self::Upsert {
                collection,
                id: id.to_string(),
                record,
            }),
            Err(e) => {
                warn!("Could not serialize {}/{id}: {e}", collection.as_str());
                None
            }
        }
    }

    fn target(&self) -> (Collection, &str) {
        match self {
            Self::Upsert { collection, id, .. } => (*collection, id.as_str()),
            Self::Clear { collection } => (*collection, "*"),
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncStats {
    queued: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
}

impl SyncStats {
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Ops dropped after a `RemoteWriteFailed`.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Sending half held by the store.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: Option<mpsc::UnboundedSender<SyncOp>>,
    stats: Arc<SyncStats>,
}

impl SyncHandle {
    /// A handle with no remote behind it: ops are discarded.
    pub fn detached() -> Self {
        Self {
            tx: None,
            stats: Arc::new(SyncStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SyncStats> {
        Arc::clone(&self.stats)
    }

    /// Queue an op. Never blocks and never fails the caller.
    pub fn send(&self, op: SyncOp) {
        let Some(tx) = &self.tx else {
            return;
        };
        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        if let Err(mpsc::error::SendError(op)) = tx.send(op) {
            let (collection, id) = op.target();
            warn!(
                "Sync worker is gone; dropping write to {}/{id}",
                collection.as_str()
            );
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub struct SyncWorker {
    remote: Arc<dyn RemoteStore>,
    rx: mpsc::UnboundedReceiver<SyncOp>,
    stats: Arc<SyncStats>,
}

/// Create a connected handle/worker pair for `remote`.
pub fn channel(remote: Arc<dyn RemoteStore>) -> (SyncHandle, SyncWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stats = Arc::new(SyncStats::default());
    (
        SyncHandle {
            tx: Some(tx),
            stats: Arc::clone(&stats),
        },
        SyncWorker { remote, rx, stats },
    )
}

impl SyncWorker {
    /// Apply ops until every handle has been dropped.
    pub async fn run(mut self) {
        info!("Sync worker started — remote: {}", self.remote.name());
        while let Some(op) = self.rx.recv().await {
            self.apply(op).await;
        }
        info!("Sync worker stopped");
    }

    /// Apply whatever is queued right now and return how many ops ran.
    pub async fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Ok(op) = self.rx.try_recv() {
            self.apply(op).await;
            count += 1;
        }
        count
    }

    async fn apply(&self, op: SyncOp) {
        let result = match &op {
            SyncOp::Upsert {
                collection,
                id,
                record,
            } => self.remote.upsert(*collection, id, record).await,
            SyncOp::Clear { collection } => self.remote.clear(*collection).await.map(|_| ()),
        };

        let (collection, id) = op.target();
        match result {
            Ok(()) => {
                self.stats.applied.fetch_add(1, Ordering::Relaxed);
                debug!("Synced {}/{id}", collection.as_str());
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                let err = TrackerError::RemoteWriteFailed {
                    collection: collection.as_str().to_string(),
                    id: id.to_string(),
                    reason: e.to_string(),
                };
                warn!("{err}");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────
// Rehydration
// ─────────────────────────────────────────────────────────

/// Where the rehydrated state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RehydrateSource {
    /// Remote and local cache were both read.
    RemoteAndCache,
    /// Remote unreachable; local snapshot only.
    CacheOnly,
}

#[derive(Debug, Clone)]
pub struct Rehydrated {
    pub journeys: Vec<JourneyRecord>,
    pub donors: Vec<DonorProfile>,
    pub source: RehydrateSource,
    /// Journeys whose stage was fast-forwarded.
    pub repaired: usize,
    /// Completed journeys dropped because their grace period had passed.
    pub expired: usize,
    /// Stored journeys skipped because their stage was out of range.
    pub rejected: usize,
}

/// Rebuild the store's tracked set on startup. Never fails.
pub async fn rehydrate(
    remote: &dyn RemoteStore,
    cache: &LocalCache,
    step: Duration,
    grace: Duration,
    now: DateTime<Utc>,
) -> Rehydrated {
    let (remote_journeys, source) = match remote.list(Collection::Journeys, &Filter::all()).await {
        Ok(docs) => (
            decode_all::<JourneyRecord>(docs, Collection::Journeys),
            RehydrateSource::RemoteAndCache,
        ),
        Err(e) => {
            let err = TrackerError::RemoteReadFailed(e.to_string());
            warn!("{err} — falling back to local cache");
            (Vec::new(), RehydrateSource::CacheOnly)
        }
    };

    let donors = match remote.list(Collection::DonorProfiles, &Filter::all()).await {
        Ok(docs) => decode_all::<DonorProfile>(docs, Collection::DonorProfiles),
        Err(_) => Vec::new(),
    };

    let cached = cache.load().unwrap_or_else(|e| {
        warn!("Local cache unreadable ({e}) — ignoring it");
        Vec::new()
    });

    let mut merged: BTreeMap<String, JourneyRecord> = BTreeMap::new();
    let mut rejected = 0;
    for mut journey in remote_journeys.into_iter().chain(cached) {
        if let Err(e) = journey.repair_loaded() {
            warn!("Skipping {e}");
            rejected += 1;
            continue;
        }
        match merged.get(&journey.id) {
            Some(existing) if existing.progress_rank() >= journey.progress_rank() => {}
            _ => {
                merged.insert(journey.id.clone(), journey);
            }
        }
    }

    let mut repaired = 0;
    let mut expired = 0;
    let mut journeys = Vec::with_capacity(merged.len());
    for (_, mut journey) in merged {
        if journey.fast_forward(now, step) > 0 {
            repaired += 1;
        }
        if journey.grace_expired(now, grace) {
            expired += 1;
            continue;
        }
        journeys.push(journey);
    }

    info!(
        "Rehydrated {} journeys ({} fast-forwarded, {} expired, {} rejected, source: {:?})",
        journeys.len(),
        repaired,
        expired,
        rejected,
        source
    );

    Rehydrated {
        journeys,
        donors,
        source,
        repaired,
        expired,
        rejected,
    }
}

fn decode_all<T: serde::de::DeserializeOwned>(docs: Vec<Value>, collection: Collection) -> Vec<T> {
    docs.into_iter()
        .filter_map(|doc| match serde_json::from_value(doc) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping undecodable {} record: {e}", collection.as_str());
                None
            }
        })
        .collect()
}
