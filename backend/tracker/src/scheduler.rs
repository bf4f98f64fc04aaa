//! Progression scheduler — one shared timer that ticks every active journey.
//!
//! Each tick advances every active journey by one stage, then drops completed
//! journeys whose grace period has passed. The tick body is synchronous, so
//! ticks never interleave; a `tick()` that finds another one in flight is
//! skipped.
//!
//! The timer runs only while at least one [`ConsumerLease`] is alive (or after
//! an explicit [`ProgressionScheduler::start`]). Stopping never touches journey
//! state, so a restart simply resumes ticking.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::seconds;
use crate::errors::{Result, TrackerError};
use crate::journey::AdvanceOutcome;
use crate::store::{JourneyStore, StoreSnapshot, StoreSubscription};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Another tick was in flight; nothing was done.
    pub skipped: bool,
    pub advanced: usize,
    pub completed: usize,
    pub removed: usize,
    /// Journeys whose advance panicked and was contained.
    pub failed: usize,
}

struct Timer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    store: JourneyStore,
    step_secs: AtomicU64,
    grace_secs: AtomicU64,
    ticking: AtomicBool,
    ticks: AtomicU64,
    timer: Mutex<Option<Timer>>,
    leases: Mutex<usize>,
}

#[derive(Clone)]
pub struct ProgressionScheduler {
    inner: Arc<SchedulerInner>,
}

/// Resets the in-flight flag even if the tick body unwinds.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ProgressionScheduler {
    pub fn new(store: JourneyStore, step_secs: u64, grace_secs: u64) -> Result<Self> {
        validate_step(step_secs)?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                store,
                step_secs: AtomicU64::new(step_secs),
                grace_secs: AtomicU64::new(grace_secs),
                ticking: AtomicBool::new(false),
                ticks: AtomicU64::new(0),
                timer: Mutex::new(None),
                leases: Mutex::new(0),
            }),
        })
    }

    pub fn store(&self) -> &JourneyStore {
        &self.inner.store
    }

    pub fn step_duration_secs(&self) -> u64 {
        self.inner.step_secs.load(Ordering::Acquire)
    }

    /// Change the tick interval. The timer picks it up for its next sleep.
    pub fn set_step_duration(&self, secs: u64) -> Result<()> {
        validate_step(secs)?;
        let previous = self.inner.step_secs.swap(secs, Ordering::AcqRel);
        if previous != secs {
            info!("Step duration changed: {previous}s → {secs}s");
        }
        Ok(())
    }

    pub fn grace_period_secs(&self) -> u64 {
        self.inner.grace_secs.load(Ordering::Acquire)
    }

    /// Number of ticks that actually ran.
    pub fn tick_count(&self) -> u64 {
        self.inner.ticks.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Start the shared timer. Idempotent. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut timer = self.inner.timer.lock();
        if timer.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(Arc::downgrade(&self.inner), cancel.clone()));
        *timer = Some(Timer { cancel, handle });
        info!(
            "Progression scheduler started — step {}s",
            self.step_duration_secs()
        );
    }

    /// Cancel the timer. Pending ticks never fire; journey state is untouched.
    pub fn stop(&self) {
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.cancel.cancel();
            info!("Progression scheduler stopped");
        }
    }

    /// Register a UI consumer. Attaching (re)starts the timer, even after an
    /// explicit [`stop`](Self::stop); dropping the last lease stops it.
    pub fn attach(&self) -> ConsumerLease {
        let mut leases = self.inner.leases.lock();
        *leases += 1;
        self.start();
        ConsumerLease {
            scheduler: self.clone(),
            subscription: self.inner.store.subscribe(),
        }
    }

    fn detach(&self) {
        let mut leases = self.inner.leases.lock();
        *leases = leases.saturating_sub(1);
        if *leases == 0 {
            self.stop();
        }
    }

    pub fn consumer_count(&self) -> usize {
        *self.inner.leases.lock()
    }

    /// Run one tick now.
    pub fn tick(&self) -> TickReport {
        self.inner.tick()
    }
}

impl SchedulerInner {
    fn tick(&self) -> TickReport {
        if self.ticking.swap(true, Ordering::AcqRel) {
            warn!("Tick skipped: previous tick still in flight");
            return TickReport {
                skipped: true,
                ..TickReport::default()
            };
        }
        let _guard = TickGuard(&self.ticking);
        let mut report = TickReport::default();

        for id in self.store.active_ids() {
            match catch_unwind(AssertUnwindSafe(|| self.store.advance(&id))) {
                Ok(AdvanceOutcome::Advanced(_)) => report.advanced += 1,
                Ok(AdvanceOutcome::Completed) => report.completed += 1,
                Ok(AdvanceOutcome::Unchanged | AdvanceOutcome::Unknown) => {}
                Err(_) => {
                    report.failed += 1;
                    error!(journey_id = %id, "Advancing journey panicked; continuing tick");
                }
            }
        }

        let grace = seconds(self.grace_secs.load(Ordering::Acquire));
        report.removed = self.store.remove_expired(grace).len();

        let n = self.ticks.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            tick = n,
            advanced = report.advanced,
            completed = report.completed,
            removed = report.removed,
            "Tick finished"
        );
        report
    }
}

/// Timer loop. Holds only a weak reference so a dropped scheduler ends it.
async fn run(inner: Weak<SchedulerInner>, cancel: CancellationToken) {
    loop {
        let step = match inner.upgrade() {
            Some(inner) => inner.step_secs.load(Ordering::Acquire),
            None => return,
        };
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(step)) => {}
        }
        match inner.upgrade() {
            Some(inner) => {
                inner.tick();
            }
            None => return,
        }
    }
}

fn validate_step(secs: u64) -> Result<()> {
    if secs == 0 {
        return Err(TrackerError::InvalidRequest(
            "step duration must be at least one second".to_string(),
        ));
    }
    Ok(())
}

/// A live UI consumer. Keeps the timer running and observes the store.
pub struct ConsumerLease {
    scheduler: ProgressionScheduler,
    subscription: StoreSubscription,
}

impl ConsumerLease {
    /// Latest published snapshot.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.subscription.borrow().clone()
    }

    /// Wait for the next mutation and return the snapshot it produced.
    pub async fn changed(&mut self) -> Option<StoreSnapshot> {
        self.subscription.changed().await.ok()?;
        Some(self.subscription.borrow_and_update().clone())
    }
}

impl Drop for ConsumerLease {
    fn drop(&mut self) {
        self.scheduler.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::journey::tests::{sample_waypoints, t0};
    use crate::journey::{DonationRequest, JourneyRecord, JourneyStatus};
    use crate::reference::ReferenceData;
    use rust_decimal::Decimal;

    fn setup(step: u64, grace: u64) -> (ProgressionScheduler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = JourneyStore::builder(ReferenceData::seed())
            .clock(clock.clone())
            .rng_seed(3)
            .build();
        (ProgressionScheduler::new(store, step, grace).unwrap(), clock)
    }

    fn donate(scheduler: &ProgressionScheduler) -> String {
        scheduler
            .store()
            .create(DonationRequest::general(Decimal::new(10, 0)))
            .unwrap()
            .id
    }

    // The out-of-range stage trips a debug assertion inside `advance`.
    #[cfg(debug_assertions)]
    #[test]
    fn failing_journey_does_not_stop_the_others() {
        let mut broken = JourneyRecord::new(
            "TRK-broken".to_string(),
            &DonationRequest::general(Decimal::ONE),
            sample_waypoints(),
            t0(),
        );
        broken.current_stage = 0;
        let store = JourneyStore::builder(ReferenceData::seed())
            .clock(Arc::new(ManualClock::new(t0())))
            .rng_seed(3)
            .journeys(vec![broken])
            .build();
        let scheduler = ProgressionScheduler::new(store, 1, 30).unwrap();
        let id = donate(&scheduler);

        let report = scheduler.tick();
        assert_eq!(report.failed, 1);
        assert_eq!(report.advanced, 1);
        assert_eq!(scheduler.store().get(&id).unwrap().current_stage, 2);
        assert_eq!(scheduler.store().get("TRK-broken").unwrap().current_stage, 0);

        let next = scheduler.tick();
        assert!(!next.skipped);
        assert_eq!(next.failed, 1);
        assert_eq!(scheduler.store().get(&id).unwrap().current_stage, 3);
        assert_eq!(scheduler.tick_count(), 2);
    }

    #[test]
    fn general_journey_completes_after_five_ticks() {
        let (scheduler, clock) = setup(1, 30);
        let id = donate(&scheduler);
        assert_eq!(scheduler.store().get(&id).unwrap().current_stage, 1);

        for _ in 0..4 {
            clock.advance(seconds(1));
            scheduler.tick();
        }
        let j = scheduler.store().get(&id).unwrap();
        assert_eq!(j.current_stage, 5);
        assert_eq!(j.status, JourneyStatus::Active);

        clock.advance(seconds(1));
        let report = scheduler.tick();
        assert_eq!(report.completed, 1);
        let j = scheduler.store().get(&id).unwrap();
        assert_eq!(j.status, JourneyStatus::Completed);
        assert_eq!(j.completed_at, Some(t0() + seconds(5)));
    }

    #[test]
    fn completion_happens_on_exactly_one_tick() {
        let (scheduler, _) = setup(1, 3600);
        donate(&scheduler);
        let completions: usize = (0..10).map(|_| scheduler.tick().completed).sum();
        assert_eq!(completions, 1);
    }

    #[test]
    fn journeys_created_together_tick_in_lockstep() {
        let (scheduler, _) = setup(1, 30);
        let a = donate(&scheduler);
        let b = donate(&scheduler);
        for n in 1..=3 {
            scheduler.tick();
            let sa = scheduler.store().get(&a).unwrap().current_stage;
            let sb = scheduler.store().get(&b).unwrap().current_stage;
            assert_eq!(sa, sb);
            assert_eq!(sa, 1 + n);
        }
    }

    #[test]
    fn completed_journeys_are_removed_after_grace() {
        let (scheduler, clock) = setup(1, 2);
        let id = donate(&scheduler);
        for _ in 0..5 {
            scheduler.tick();
        }
        assert!(scheduler.store().get(&id).is_some());
        clock.advance(seconds(1));
        assert_eq!(scheduler.tick().removed, 0);
        clock.advance(seconds(1));
        assert_eq!(scheduler.tick().removed, 1);
        assert!(scheduler.store().get(&id).is_none());
    }

    #[test]
    fn overlapping_tick_is_skipped() {
        let (scheduler, _) = setup(1, 30);
        let id = donate(&scheduler);
        scheduler.inner.ticking.store(true, Ordering::Release);
        let report = scheduler.tick();
        assert!(report.skipped);
        assert_eq!(scheduler.store().get(&id).unwrap().current_stage, 1);
        assert_eq!(scheduler.tick_count(), 0);

        scheduler.inner.ticking.store(false, Ordering::Release);
        assert!(!scheduler.tick().skipped);
        assert_eq!(scheduler.tick_count(), 1);
    }

    #[test]
    fn zero_step_is_rejected() {
        let (scheduler, _) = setup(1, 30);
        assert!(scheduler.set_step_duration(0).is_err());
        assert_eq!(scheduler.step_duration_secs(), 1);
        let store = scheduler.store().clone();
        assert!(ProgressionScheduler::new(store, 0, 30).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_ticks_on_each_step() {
        let (scheduler, _) = setup(1, 30);
        let id = donate(&scheduler);
        let lease = scheduler.attach();
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert_eq!(scheduler.store().get(&id).unwrap().current_stage, 5);
        assert_eq!(lease.snapshot().journeys[0].current_stage, 5);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            scheduler.store().get(&id).unwrap().status,
            JourneyStatus::Completed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn last_lease_stops_timer_and_reattach_resumes() {
        let (scheduler, _) = setup(1, 30);
        let id = donate(&scheduler);

        let first = scheduler.attach();
        let second = scheduler.attach();
        assert_eq!(scheduler.consumer_count(), 2);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        drop(first);
        assert!(scheduler.is_running());
        drop(second);
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.store().get(&id).unwrap().current_stage, 2);

        // Nobody watching: the journey stays put.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(scheduler.store().get(&id).unwrap().current_stage, 2);

        let _lease = scheduler.attach();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(scheduler.store().get(&id).unwrap().current_stage, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attach_after_explicit_stop_restarts_timer() {
        let (scheduler, _) = setup(1, 30);
        let id = donate(&scheduler);

        let _server = scheduler.attach();
        scheduler.stop();
        assert!(!scheduler.is_running());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(scheduler.store().get(&id).unwrap().current_stage, 1);

        let viewer = scheduler.attach();
        assert!(scheduler.is_running());
        assert_eq!(scheduler.consumer_count(), 2);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(scheduler.store().get(&id).unwrap().current_stage, 2);

        drop(viewer);
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_applies_to_next_tick() {
        let (scheduler, _) = setup(2, 30);
        let id = donate(&scheduler);
        scheduler.start();
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(scheduler.store().get(&id).unwrap().current_stage, 2);

        // Current sleep still ends at t=4s; later ones are 5s apart.
        scheduler.set_step_duration(5).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(scheduler.store().get(&id).unwrap().current_stage, 3);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(scheduler.store().get(&id).unwrap().current_stage, 3);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(scheduler.store().get(&id).unwrap().current_stage, 4);
        scheduler.stop();
    }

    #[tokio::test]
    async fn lease_observes_mutations() {
        let (scheduler, _) = setup(60, 30);
        let mut lease = scheduler.attach();
        donate(&scheduler);
        let snapshot = lease.changed().await.unwrap();
        assert_eq!(snapshot.journeys.len(), 1);
        assert_eq!(snapshot.version, 1);
    }
}
