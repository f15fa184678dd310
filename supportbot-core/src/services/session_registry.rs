// File: supportbot-core/src/services/session_registry.rs

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use supportbot_common::models::catalog::GuildCatalog;
use supportbot_common::models::session::{SESSION_PREFIX, Session, SessionKey, SessionUpdate};
use supportbot_common::traits::api::PermissionProvider;
use supportbot_common::traits::store::{KeyValueStore, KeyValueStoreExt};

use crate::Error;
use crate::config::SessionConfig;
use crate::locks::KeyedLocks;
use crate::services::ticket_state::TicketStateMachine;

/// Durable per-conversation session state. Every write is a validated
/// read-modify-write under the session's own lock; rejected writes leave the
/// stored value untouched.
pub struct SessionRegistry {
    store: Arc<dyn KeyValueStore>,
    permissions: Arc<dyn PermissionProvider>,
    locks: KeyedLocks,
    ttl_seconds: Option<u64>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        permissions: Arc<dyn PermissionProvider>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            store,
            permissions,
            locks: KeyedLocks::new(),
            ttl_seconds: config.ttl_seconds(),
        }
    }

    async fn load(&self, key: &SessionKey) -> Result<Option<Session>, Error> {
        self.store.get_json::<Session>(&key.storage_key()).await
    }

    async fn persist(&self, session: &Session) -> Result<(), Error> {
        self.store
            .set_json(&session.key.storage_key(), session, self.ttl_seconds)
            .await
    }

    async fn catalog_for(&self, key: &SessionKey) -> Arc<GuildCatalog> {
        self.permissions.get_catalog(&key.guild_id).await
    }

    fn check_write(current: &Session, next: &Session, catalog: &GuildCatalog) -> Result<(), Error> {
        if current.is_closed() {
            return Err(supportbot_common::ValidationError::SessionClosed(current.key.to_string()).into());
        }
        if next.state != current.state {
            TicketStateMachine::validate_transition(current.state, next.state)?;
        }
        TicketStateMachine::validate_session(next, catalog)?;
        Ok(())
    }

    /// The stored session, or a fresh default that has not been persisted.
    pub async fn get(&self, key: &SessionKey) -> Result<Session, Error> {
        Ok(self
            .load(key)
            .await?
            .unwrap_or_else(|| Session::new_default(key.clone(), Utc::now())))
    }

    pub async fn has(&self, key: &SessionKey) -> Result<bool, Error> {
        Ok(self.store.get(&key.storage_key()).await?.is_some())
    }

    /// Applies `update` atomically. Fails without writing when the session is
    /// closed, the state change is not an allowed edge, or the result holds
    /// values outside the guild catalog.
    pub async fn set(&self, key: &SessionKey, update: SessionUpdate) -> Result<Session, Error> {
        let (session, _) = self.transact(key, move |_| Ok((update, ()))).await?;
        Ok(session)
    }

    /// Atomic read-modify-write where the update depends on the current value.
    /// `NotFound` when the session does not exist (or was deleted meanwhile).
    pub async fn update<F>(&self, key: &SessionKey, f: F) -> Result<Session, Error>
    where
        F: FnOnce(&Session) -> Result<SessionUpdate, Error> + Send,
    {
        let (session, _) = self.transact_existing(key, move |current| Ok((f(current)?, ()))).await?;
        Ok(session)
    }

    /// Read-modify-write under the session lock. `decide` sees the current
    /// value and returns the update plus anything the caller wants back. An
    /// empty update skips the write entirely. A missing session starts from
    /// the default.
    pub async fn transact<R, F>(&self, key: &SessionKey, decide: F) -> Result<(Session, R), Error>
    where
        F: FnOnce(&Session) -> Result<(SessionUpdate, R), Error> + Send,
        R: Send,
    {
        self.write(key, false, decide).await
    }

    /// Like [`transact`](Self::transact) but never brings a session into
    /// existence: a missing key yields `NotFound` and nothing is written.
    pub async fn transact_existing<R, F>(&self, key: &SessionKey, decide: F) -> Result<(Session, R), Error>
    where
        F: FnOnce(&Session) -> Result<(SessionUpdate, R), Error> + Send,
        R: Send,
    {
        self.write(key, true, decide).await
    }

    async fn write<R, F>(&self, key: &SessionKey, must_exist: bool, decide: F) -> Result<(Session, R), Error>
    where
        F: FnOnce(&Session) -> Result<(SessionUpdate, R), Error> + Send,
        R: Send,
    {
        let catalog = self.catalog_for(key).await;
        let _guard = self.locks.lock(&key.storage_key()).await;

        let now = Utc::now();
        let existing = self.load(key).await?;
        let exists = existing.is_some();
        if must_exist && !exists {
            return Err(Error::NotFound(format!("session {}", key)));
        }
        let current = existing.unwrap_or_else(|| Session::new_default(key.clone(), now));

        let (update, extra) = decide(&current)?;
        if update.is_empty() && exists {
            return Ok((current, extra));
        }

        let mut next = update.merged_onto(&current);
        Self::check_write(&current, &next, &catalog)?;
        next.last_updated = now;
        if !exists {
            next.created_at = now;
        }
        self.persist(&next).await?;
        debug!("Session {} written (state={}, human_help={})", key, next.state, next.human_help);
        Ok((next, extra))
    }

    /// Creates the default session if none exists. Returns it together with
    /// whether this call created it.
    pub async fn create(&self, key: &SessionKey) -> Result<(Session, bool), Error> {
        let _guard = self.locks.lock(&key.storage_key()).await;
        if let Some(existing) = self.load(key).await? {
            return Ok((existing, false));
        }
        let session = Session::new_default(key.clone(), Utc::now());
        self.persist(&session).await?;
        info!("Session {} created", key);
        Ok((session, true))
    }

    pub async fn delete(&self, key: &SessionKey) -> Result<(), Error> {
        let _guard = self.locks.lock(&key.storage_key()).await;
        self.store.del(&key.storage_key()).await?;
        debug!("Session {} deleted", key);
        Ok(())
    }

    pub async fn list_keys(&self) -> Result<Vec<SessionKey>, Error> {
        let raw = self.store.scan(SESSION_PREFIX).await?;
        let mut keys: Vec<SessionKey> = raw
            .iter()
            .filter_map(|k| {
                let parsed = SessionKey::from_storage_key(k);
                if parsed.is_none() {
                    warn!("Ignoring malformed session key '{}'", k);
                }
                parsed
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Staff override that lifts a sticky escalation. Bypasses the transition
    /// table but still refuses closed or non-escalated sessions.
    pub async fn resume(&self, key: &SessionKey) -> Result<Session, Error> {
        let _guard = self.locks.lock(&key.storage_key()).await;
        let current = self
            .load(key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {}", key)))?;
        let update = TicketStateMachine::resume(&current)?;
        let mut next = update.merged_onto(&current);
        next.last_updated = Utc::now();
        self.persist(&next).await?;
        info!("Session {} resumed into {}", key, next.state);
        Ok(next)
    }

    /// Caches the outcome of a transcript scan. Closed and missing sessions
    /// are left alone rather than rejected.
    pub async fn record_staff_detected(&self, key: &SessionKey, detected: bool) -> Result<(), Error> {
        let written = self
            .transact_existing(key, move |current| {
                if current.is_closed() || current.staff_detected == Some(detected) {
                    Ok((SessionUpdate::new(), ()))
                } else {
                    Ok((SessionUpdate::new().staff_detected(Some(detected)), ()))
                }
            })
            .await;
        ignore_missing(key, written)
    }

    pub async fn touch_activity(&self, key: &SessionKey, at: DateTime<Utc>) -> Result<(), Error> {
        let written = self
            .transact_existing(key, move |current| {
                if current.is_closed() {
                    Ok((SessionUpdate::new(), ()))
                } else {
                    Ok((SessionUpdate::new().last_activity(at), ()))
                }
            })
            .await;
        ignore_missing(key, written)
    }

    /// Deletes closed sessions untouched for longer than `retention`.
    pub async fn purge_closed(&self, retention: Duration, now: DateTime<Utc>) -> Result<usize, Error> {
        let cutoff = now - retention;
        let mut removed = 0;
        for key in self.list_keys().await? {
            let _guard = self.locks.lock(&key.storage_key()).await;
            match self.load(&key).await {
                Ok(Some(session)) if session.is_closed() && session.last_updated < cutoff => {
                    self.store.del(&key.storage_key()).await?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping session {} during cleanup: {}", key, e),
            }
        }
        let pruned = self.locks.prune();
        if removed > 0 || pruned > 0 {
            info!("Session cleanup: removed {} closed session(s), pruned {} idle lock(s)", removed, pruned);
        }
        Ok(removed)
    }
}

fn ignore_missing<R>(key: &SessionKey, written: Result<R, Error>) -> Result<(), Error> {
    match written {
        Ok(_) => Ok(()),
        Err(Error::NotFound(_)) => {
            debug!("Session {} is gone, nothing to record", key);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
