//! Global journey store — the single authoritative owner of journey state.
//!
//! All mutation funnels through [`JourneyStore::create`], [`JourneyStore::advance`],
//! [`JourneyStore::remove`] and [`JourneyStore::reset_all`]. Each mutation, while
//! still holding the state lock:
//!
//! 1. updates the in-memory map,
//! 2. rewrites the local cache snapshot,
//! 3. queues the remote writes on the sync handle,
//! 4. publishes a new [`StoreSnapshot`] to subscribers.
//!
//! Remote failures never reach the caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::LocalCache;
use crate::clock::{SharedClock, SystemClock};
use crate::errors::Result;
use crate::journey::{AdvanceOutcome, DonationRequest, JourneyRecord};
use crate::records::{DonationRecord, DonorProfile, SmsLog};
use crate::reference::ReferenceData;
use crate::remote::Collection;
use crate::sync::{SyncHandle, SyncOp};
use crate::waypoints::generate_waypoints;

/// What subscribers see after every mutation.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    /// Bumped by one on every mutation.
    pub version: u64,
    /// Tracked journeys, newest first.
    pub journeys: Vec<JourneyRecord>,
}

pub type StoreSubscription = watch::Receiver<StoreSnapshot>;

#[derive(Default)]
struct StoreState {
    journeys: HashMap<String, JourneyRecord>,
    donors: HashMap<String, DonorProfile>,
    version: u64,
}

impl StoreState {
    fn ordered(&self) -> Vec<JourneyRecord> {
        let mut journeys: Vec<JourneyRecord> = self.journeys.values().cloned().collect();
        journeys.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        journeys
    }
}

struct StoreInner {
    state: Mutex<StoreState>,
    reference: ReferenceData,
    cache: LocalCache,
    sync: SyncHandle,
    clock: SharedClock,
    rng: Mutex<StdRng>,
    notifier: watch::Sender<StoreSnapshot>,
}

/// Cheap-to-clone handle to the shared store.
#[derive(Clone)]
pub struct JourneyStore {
    inner: Arc<StoreInner>,
}

pub struct StoreBuilder {
    reference: ReferenceData,
    cache: LocalCache,
    sync: SyncHandle,
    clock: SharedClock,
    rng: Option<StdRng>,
    journeys: Vec<JourneyRecord>,
    donors: Vec<DonorProfile>,
}

impl StoreBuilder {
    pub fn cache(mut self, cache: LocalCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn sync(mut self, sync: SyncHandle) -> Self {
        self.sync = sync;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Fix the RNG used for route selection and id suffixes.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng = Some(StdRng::seed_from_u64(seed));
        self
    }

    /// Start from previously tracked journeys (see [`crate::sync::rehydrate`]).
    pub fn journeys(mut self, journeys: Vec<JourneyRecord>) -> Self {
        self.journeys = journeys;
        self
    }

    pub fn donors(mut self, donors: Vec<DonorProfile>) -> Self {
        self.donors = donors;
        self
    }

    pub fn build(self) -> JourneyStore {
        let state = StoreState {
            journeys: self
                .journeys
                .into_iter()
                .map(|j| (j.id.clone(), j))
                .collect(),
            donors: self.donors.into_iter().map(|d| (d.id.clone(), d)).collect(),
            version: 0,
        };
        let (notifier, _) = watch::channel(StoreSnapshot {
            version: 0,
            journeys: state.ordered(),
        });

        JourneyStore {
            inner: Arc::new(StoreInner {
                state: Mutex::new(state),
                reference: self.reference,
                cache: self.cache,
                sync: self.sync,
                clock: self.clock,
                rng: Mutex::new(self.rng.unwrap_or_else(StdRng::from_entropy)),
                notifier,
            }),
        }
    }
}

/// `TRK-<unix millis>-<8 hex chars>`. Collisions are not checked.
fn tracking_id<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> String {
    format!(
        "TRK-{}-{}",
        now.timestamp_millis(),
        hex::encode(rng.gen::<[u8; 4]>())
    )
}

impl JourneyStore {
    pub fn builder(reference: ReferenceData) -> StoreBuilder {
        StoreBuilder {
            reference,
            cache: LocalCache::disabled(),
            sync: SyncHandle::detached(),
            clock: Arc::new(SystemClock),
            rng: None,
            journeys: Vec::new(),
            donors: Vec::new(),
        }
    }

    pub fn reference(&self) -> &ReferenceData {
        &self.inner.reference
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    // ─────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────

    /// Open a journey for a donation. Fails only when the request is invalid
    /// or no route satisfies it; nothing is recorded in that case.
    pub fn create(&self, request: DonationRequest) -> Result<JourneyRecord> {
        request.validate()?;
        let now = self.now();

        let (waypoints, id) = {
            let mut rng = self.inner.rng.lock();
            let waypoints = generate_waypoints(&request.route, &self.inner.reference, &mut *rng)?;
            (waypoints, tracking_id(now, &mut *rng))
        };
        let record = JourneyRecord::new(id, &request, waypoints, now);

        let mut state = self.inner.state.lock();
        state.journeys.insert(record.id.clone(), record.clone());
        let donor = record.donor_id.as_deref().map(|donor_id| {
            state
                .donors
                .entry(donor_id.to_string())
                .and_modify(|profile| profile.record(&record))
                .or_insert_with(|| DonorProfile::first(&record, donor_id))
                .clone()
        });
        self.publish(&mut state, now);

        self.queue(Collection::Journeys, &record.id, &record);
        self.queue(
            Collection::Donations,
            &record.id,
            &DonationRecord::from_journey(&record),
        );
        if let Some(profile) = donor {
            self.queue(Collection::DonorProfiles, &profile.id, &profile);
        }
        if let Some(sms) = SmsLog::for_stage(&record, 1, now) {
            self.queue(Collection::SmsLogs, &sms.id, &sms);
        }
        drop(state);

        info!(
            journey_id = %record.id,
            journey_type = record.journey_type.as_str(),
            amount = %record.amount,
            "Journey created"
        );
        Ok(record)
    }

    /// Move one journey forward by one stage. Unknown ids are a no-op.
    pub fn advance(&self, id: &str) -> AdvanceOutcome {
        let now = self.now();
        let mut state = self.inner.state.lock();
        let Some(journey) = state.journeys.get_mut(id) else {
            debug!(journey_id = id, "Advance ignored: journey not tracked");
            return AdvanceOutcome::Unknown;
        };

        let outcome = journey.advance(now);
        if !outcome.changed() {
            return outcome;
        }
        let record = journey.clone();
        self.publish(&mut state, now);

        self.queue(Collection::Journeys, &record.id, &record);
        let sms = match outcome {
            AdvanceOutcome::Advanced(stage) => SmsLog::for_stage(&record, stage, now),
            AdvanceOutcome::Completed => Some(SmsLog::for_completion(&record, now)),
            AdvanceOutcome::Unchanged | AdvanceOutcome::Unknown => None,
        };
        if let Some(sms) = sms {
            self.queue(Collection::SmsLogs, &sms.id, &sms);
        }
        drop(state);

        match outcome {
            AdvanceOutcome::Completed => info!(journey_id = id, "Journey completed"),
            _ => debug!(journey_id = id, stage = record.current_stage, "Journey advanced"),
        }
        outcome
    }

    /// Drop a journey from the tracked set. The remote copy is kept.
    pub fn remove(&self, id: &str) -> bool {
        let now = self.now();
        let mut state = self.inner.state.lock();
        if state.journeys.remove(id).is_none() {
            debug!(journey_id = id, "Remove ignored: journey not tracked");
            return false;
        }
        self.publish(&mut state, now);
        debug!(journey_id = id, "Journey removed from active set");
        true
    }

    /// Remove every completed journey whose grace period has elapsed.
    pub fn remove_expired(&self, grace: Duration) -> Vec<String> {
        let now = self.now();
        let mut state = self.inner.state.lock();
        let expired: Vec<String> = state
            .journeys
            .values()
            .filter(|j| j.grace_expired(now, grace))
            .map(|j| j.id.clone())
            .collect();
        if expired.is_empty() {
            return expired;
        }
        for id in &expired {
            state.journeys.remove(id);
        }
        self.publish(&mut state, now);
        debug!("Removed {} journeys past their grace period", expired.len());
        expired
    }

    /// Clear every journey locally and remotely. Irreversible.
    pub fn reset_all(&self) {
        let now = self.now();
        let mut state = self.inner.state.lock();
        let cleared = state.journeys.len();
        state.journeys.clear();
        self.publish(&mut state, now);
        if let Err(e) = self.inner.cache.clear() {
            warn!("Failed to clear local cache: {e}");
        }
        for collection in Collection::RESETTABLE {
            self.inner.sync.send(SyncOp::Clear { collection });
        }
        drop(state);
        warn!("System reset — {cleared} journeys cleared");
    }

    /// Rewrite the local cache and re-queue every tracked journey for the
    /// remote. Used after rehydration so both mirrors converge.
    pub fn republish(&self) {
        let now = self.now();
        let state = self.inner.state.lock();
        let journeys = state.ordered();
        if let Err(e) = self.inner.cache.save(&journeys, now) {
            warn!("Failed to write local cache: {e}");
        }
        for journey in &journeys {
            self.queue(Collection::Journeys, &journey.id, journey);
        }
    }

    // ─────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────

    /// Tracked journeys (active and recently completed), newest first.
    pub fn list(&self) -> Vec<JourneyRecord> {
        self.inner.state.lock().ordered()
    }

    pub fn get(&self, id: &str) -> Option<JourneyRecord> {
        self.inner.state.lock().journeys.get(id).cloned()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .journeys
            .values()
            .filter(|j| j.is_active())
            .map(|j| j.id.clone())
            .collect()
    }

    pub fn donor(&self, id: &str) -> Option<DonorProfile> {
        self.inner.state.lock().donors.get(id).cloned()
    }

    pub fn subscribe(&self) -> StoreSubscription {
        self.inner.notifier.subscribe()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.notifier.borrow().clone()
    }

    pub fn sync_stats(&self) -> Arc<crate::sync::SyncStats> {
        self.inner.sync.stats()
    }

    // ─────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────

    fn publish(&self, state: &mut StoreState, now: DateTime<Utc>) {
        state.version += 1;
        let journeys = state.ordered();
        if let Err(e) = self.inner.cache.save(&journeys, now) {
            warn!("Failed to write local cache: {e}");
        }
        self.inner.notifier.send_replace(StoreSnapshot {
            version: state.version,
            journeys,
        });
    }

    fn queue<T: Serialize>(&self, collection: Collection, id: &str, record: &T) {
        if let Some(op) = SyncOp::upsert(collection, id, record) {
            self.inner.sync.send(op);
        }
    }
}
