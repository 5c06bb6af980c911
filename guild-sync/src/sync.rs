use crate::discord::ratelimiter::RateLimiter;
use crate::discord::GuildMemberFetcher;
use crate::store::KeyValueStore;
use crate::{Error, Result};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_count: Option<usize>,
}

/// Fetches the roster and overwrites the stored snapshot with it.
pub struct RosterSync<T: RateLimiter, S: KeyValueStore> {
    fetcher: GuildMemberFetcher<T>,
    store: Arc<S>,
    snapshot_key: Box<str>,
    deadline: Duration,
    status: Arc<RwLock<SyncStatus>>,
}

impl<T: RateLimiter, S: KeyValueStore> RosterSync<T, S> {
    pub fn new(
        fetcher: GuildMemberFetcher<T>,
        store: Arc<S>,
        snapshot_key: impl Into<Box<str>>,
        deadline: Duration,
    ) -> Self {
        Self {
            fetcher,
            store,
            snapshot_key: snapshot_key.into(),
            deadline,
            status: Arc::new(RwLock::new(SyncStatus::default())),
        }
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.read()
    }

    /// Shared view of the sync status for the HTTP server.
    pub fn status_handle(&self) -> Arc<RwLock<SyncStatus>> {
        Arc::clone(&self.status)
    }

    /// Returns the number of members written. On error the store is left untouched.
    #[tracing::instrument(name = "refresh", skip(self), fields(guild_id = %self.fetcher.guild_id()))]
    pub async fn refresh(&self) -> Result<usize> {
        let snapshot = tokio::time::timeout(self.deadline, self.fetcher.fetch_all_guild_members())
            .await
            .map_err(|_| Error::DeadlineExceeded)??;

        let count = snapshot.len();
        let serialized = snapshot.to_json()?;
        debug!(count, bytes = serialized.len(), "Serialized snapshot");

        self.store.set(&self.snapshot_key, serialized).await?;

        {
            let mut status = self.status.write();
            status.last_sync_time = Some(Utc::now());
            status.last_count = Some(count);
        }

        info!(count, key = %self.snapshot_key, "Stored member snapshot");
        Ok(count)
    }
}
