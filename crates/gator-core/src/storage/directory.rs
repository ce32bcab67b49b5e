use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use super::{Database, FeedRepository};
use crate::feed::Feed;
use crate::Result;

/// The feed store as seen by the refresh scheduler
#[async_trait]
pub trait FeedDirectory: Send + Sync {
    /// Lease the feed most overdue for a refresh
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Feed>;

    /// Record a successful refresh
    async fn mark_fetched(&self, id: Uuid, fetched_at: DateTime<Utc>) -> Result<()>;

    /// Give up a lease without recording a refresh
    async fn release(&self, id: Uuid) -> Result<()>;
}

/// [`FeedDirectory`] backed by the SQLite database
#[derive(Clone)]
pub struct SqliteDirectory {
    db: Database,
    claim_lease: Duration,
}

impl SqliteDirectory {
    pub fn new(db: Database, claim_lease: Duration) -> Self {
        Self { db, claim_lease }
    }
}

#[async_trait]
impl FeedDirectory for SqliteDirectory {
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Feed> {
        FeedRepository::new(&self.db).claim_next(now, self.claim_lease).await
    }

    async fn mark_fetched(&self, id: Uuid, fetched_at: DateTime<Utc>) -> Result<()> {
        FeedRepository::new(&self.db).mark_fetched(id, fetched_at).await
    }

    async fn release(&self, id: Uuid) -> Result<()> {
        FeedRepository::new(&self.db).release_claim(id).await
    }
}
