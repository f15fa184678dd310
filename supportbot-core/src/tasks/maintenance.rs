// supportbot-core/src/tasks/maintenance.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use supportbot_common::traits::store::KeyValueStore;

use crate::Error;
use crate::config::SupportConfig;
use crate::repositories::{InMemoryKeyValueStore, PostgresKeyValueStore};
use crate::services::dedup_guard::DedupGuard;
use crate::services::rate_limiter::RateLimiter;
use crate::services::session_registry::SessionRegistry;

/// The concrete backend whose expired rows need an explicit purge.
#[derive(Clone)]
pub enum ExpiringBackend {
    Memory(Arc<InMemoryKeyValueStore>),
    Postgres(Arc<PostgresKeyValueStore>),
}

impl ExpiringBackend {
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        match self {
            ExpiringBackend::Memory(store) => Ok(store.purge_expired(Utc::now()) as u64),
            ExpiringBackend::Postgres(store) => store.purge_expired().await,
        }
    }
}

/// Everything the background timers touch. They share the request path's
/// components and go through the same per-key locks.
pub struct MaintenanceTargets {
    pub sessions: Arc<SessionRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub dedup: Arc<DedupGuard>,
    pub store: Arc<dyn KeyValueStore>,
    pub backend: ExpiringBackend,
}

/// Runs `tick` every `interval` until `shutdown` flips to true.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        debug!("{} task started (every {:?})", name, interval);
        loop {
            tokio::select! {
                _ = sleep(interval) => tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("{} task stopped", name);
    })
}

pub fn spawn_rate_limit_sweep_task(
    rate_limiter: Arc<RateLimiter>,
    store: Arc<dyn KeyValueStore>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    spawn_periodic("rate-limit sweep", interval, shutdown, move || {
        let rate_limiter = rate_limiter.clone();
        let store = store.clone();
        async move {
            let removed = rate_limiter.sweep(Utc::now());
            match rate_limiter.snapshot(&store).await {
                Ok(saved) => debug!("Rate limits: swept {}, persisted {}", removed, saved),
                Err(e) => error!("Rate limit snapshot failed: {}", e),
            }
        }
    })
}

pub fn spawn_dedup_eviction_task(
    dedup: Arc<DedupGuard>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    spawn_periodic("dedup eviction", interval, shutdown, move || {
        let dedup = dedup.clone();
        async move {
            dedup.evict_stale(Utc::now());
        }
    })
}

pub fn spawn_session_cleanup_task(
    sessions: Arc<SessionRegistry>,
    backend: ExpiringBackend,
    retention: chrono::Duration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    spawn_periodic("session cleanup", interval, shutdown, move || {
        let sessions = sessions.clone();
        let backend = backend.clone();
        async move {
            if let Err(e) = sessions.purge_closed(retention, Utc::now()).await {
                error!("Closed session purge failed: {}", e);
            }
            match backend.purge_expired().await {
                Ok(0) => {}
                Ok(n) => info!("Purged {} expired store entr(ies)", n),
                Err(e) => error!("Expired entry purge failed: {}", e),
            }
        }
    })
}

/// Starts every maintenance timer. Flip `shutdown` to stop them.
pub fn spawn_all(
    targets: MaintenanceTargets,
    config: &SupportConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let m = &config.maintenance;
    info!(
        "Starting maintenance: rate limits every {}s, dedup every {}s, sessions every {}s",
        m.rate_limit_sweep_seconds, m.dedup_eviction_seconds, m.session_cleanup_seconds
    );
    vec![
        spawn_rate_limit_sweep_task(
            targets.rate_limiter,
            targets.store,
            Duration::from_secs(m.rate_limit_sweep_seconds),
            shutdown.clone(),
        ),
        spawn_dedup_eviction_task(
            targets.dedup,
            Duration::from_secs(m.dedup_eviction_seconds),
            shutdown.clone(),
        ),
        spawn_session_cleanup_task(
            targets.sessions,
            targets.backend,
            chrono::Duration::hours(config.sessions.closed_retention_hours),
            Duration::from_secs(m.session_cleanup_seconds),
            shutdown,
        ),
    ]
}
