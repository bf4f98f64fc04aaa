//! Startup wiring: remote selection, reference data, rehydration, sync worker,
//! store and scheduler.

use std::sync::Arc;

use reqwest::Client;
use tracing::info;

use crate::cache::LocalCache;
use crate::clock::{seconds, SharedClock};
use crate::config::{Config, RemoteBackend};
use crate::db::SqliteRemote;
use crate::errors::{Result, TrackerError};
use crate::reference::load_reference_data;
use crate::remote::{MemoryRemote, RemoteStore};
use crate::rest::RestRemote;
use crate::scheduler::ProgressionScheduler;
use crate::store::JourneyStore;
use crate::sync::{self, rehydrate};

/// Everything the HTTP layer and `main` need at runtime.
#[derive(Clone)]
pub struct TrackerState {
    pub store: JourneyStore,
    pub scheduler: ProgressionScheduler,
}

/// Build the remote backend selected by `config`.
pub async fn connect_remote(config: &Config, client: Client) -> Result<Arc<dyn RemoteStore>> {
    let remote: Arc<dyn RemoteStore> = match config.remote_backend {
        RemoteBackend::Sqlite => Arc::new(SqliteRemote::connect(&config.database_url).await?),
        RemoteBackend::Rest => {
            let (Some(url), Some(key)) = (&config.remote_url, &config.remote_api_key) else {
                return Err(TrackerError::Config(
                    "REMOTE_URL and REMOTE_API_KEY are required for the rest backend".to_string(),
                ));
            };
            Arc::new(RestRemote::new(client, url.clone(), key.clone()))
        }
        RemoteBackend::Memory => Arc::new(MemoryRemote::new()),
    };
    info!("Remote store: {}", remote.name());
    Ok(remote)
}

/// Rehydrate the store, spawn the sync worker and build the scheduler.
///
/// The scheduler is returned stopped; callers attach a consumer (or call
/// `start`) to begin ticking.
pub async fn start(
    config: &Config,
    remote: Arc<dyn RemoteStore>,
    clock: SharedClock,
) -> Result<TrackerState> {
    let reference = load_reference_data(remote.as_ref()).await;

    let cache = config
        .cache_path
        .clone()
        .map(LocalCache::at)
        .unwrap_or_else(LocalCache::disabled);

    let restored = rehydrate(
        remote.as_ref(),
        &cache,
        seconds(config.step_duration_secs),
        seconds(config.grace_period_secs),
        clock.now(),
    )
    .await;

    let (handle, worker) = sync::channel(remote);
    tokio::spawn(worker.run());

    let store = JourneyStore::builder(reference)
        .cache(cache)
        .sync(handle)
        .clock(clock)
        .journeys(restored.journeys)
        .donors(restored.donors)
        .build();
    // Push read-repaired stages back out so both mirrors agree.
    store.republish();

    let scheduler = ProgressionScheduler::new(
        store.clone(),
        config.step_duration_secs,
        config.grace_period_secs,
    )?;

    Ok(TrackerState { store, scheduler })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::journey::tests::t0;
    use crate::journey::{DonationRequest, JourneyStatus};
    use crate::remote::Collection;
    use rust_decimal::Decimal;

    fn config(cache: Option<std::path::PathBuf>) -> Config {
        Config {
            step_duration_secs: 1,
            grace_period_secs: 60,
            cache_path: cache,
            remote_backend: RemoteBackend::Memory,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn restart_resumes_from_remote_with_fast_forward() {
        let remote: Arc<dyn RemoteStore> = Arc::new(MemoryRemote::new());
        let clock = Arc::new(ManualClock::new(t0()));

        let first = start(&config(None), remote.clone(), clock.clone())
            .await
            .unwrap();
        let j = first
            .store
            .create(DonationRequest::general(Decimal::new(5, 0)))
            .unwrap();
        first.scheduler.tick();
        // Let the sync worker flush.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(first);

        clock.advance(seconds(2));
        let second = start(&config(None), remote.clone(), clock.clone())
            .await
            .unwrap();
        let restored = second.store.get(&j.id).unwrap();
        assert_eq!(restored.current_stage, 4);
        assert_eq!(restored.status, JourneyStatus::Active);
        // ticks resume from the repaired stage
        second.scheduler.tick();
        assert_eq!(second.store.get(&j.id).unwrap().current_stage, 5);
    }

    #[tokio::test]
    async fn memory_backend_boots_with_seed_reference_data() {
        let client = Client::new();
        let remote = connect_remote(&config(None), client).await.unwrap();
        assert_eq!(remote.name(), "memory");
        let state = start(&config(None), remote.clone(), Arc::new(ManualClock::new(t0())))
            .await
            .unwrap();
        assert!(state.store.list().is_empty());
        assert!(!state.scheduler.is_running());
        assert_eq!(state.store.reference().governorates.len(), 7);
        assert_eq!(remote.list(Collection::Journeys, &Default::default()).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn rest_backend_requires_credentials() {
        let mut cfg = config(None);
        cfg.remote_backend = RemoteBackend::Rest;
        assert!(connect_remote(&cfg, Client::new()).await.is_err());
    }
}
