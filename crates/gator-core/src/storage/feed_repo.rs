use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::time::Duration;
use uuid::Uuid;

use super::Database;
use crate::error::on_unique_violation;
use crate::feed::{Feed, FeedWithOwner, NewFeed};
use crate::{Error, Result};

const FEED_COLUMNS: &str =
    "id, url, name, user_id, last_fetched_at, claimed_at, created_at, updated_at";

/// Repository for feed CRUD operations and refresh bookkeeping
pub struct FeedRepository<'a> {
    db: &'a Database,
}

#[derive(FromRow)]
struct FeedRow {
    id: String,
    url: String,
    name: String,
    user_id: String,
    last_fetched_at: Option<DateTime<Utc>>,
    claimed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        Feed {
            id: Uuid::parse_str(&row.id).unwrap_or_default(),
            url: row.url,
            name: row.name,
            user_id: Uuid::parse_str(&row.user_id).unwrap_or_default(),
            last_fetched_at: row.last_fetched_at,
            claimed_at: row.claimed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct FeedWithOwnerRow {
    #[sqlx(flatten)]
    feed: FeedRow,
    owner_name: String,
}

impl<'a> FeedRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Register a new feed
    pub async fn create(&self, new_feed: &NewFeed) -> Result<Feed> {
        self.create_at(new_feed, Utc::now()).await
    }

    /// Register a new feed with an explicit creation time
    pub async fn create_at(&self, new_feed: &NewFeed, now: DateTime<Utc>) -> Result<Feed> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO feeds (id, url, name, user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&new_feed.url)
        .bind(&new_feed.name)
        .bind(new_feed.user_id.to_string())
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(|e| on_unique_violation(e, || Error::FeedExists(new_feed.url.clone())))?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| Error::FeedNotFound(id.to_string()))
    }

    /// Find a feed by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Feed>> {
        let row: Option<FeedRow> =
            sqlx::query_as(&format!("SELECT {} FROM feeds WHERE id = ?", FEED_COLUMNS))
                .bind(id.to_string())
                .fetch_optional(self.db.pool())
                .await?;

        Ok(row.map(Feed::from))
    }

    /// Find a feed by URL
    pub async fn find_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let row: Option<FeedRow> =
            sqlx::query_as(&format!("SELECT {} FROM feeds WHERE url = ?", FEED_COLUMNS))
                .bind(url)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(row.map(Feed::from))
    }

    /// All feeds with the name of the user who registered each
    pub async fn list_with_owners(&self) -> Result<Vec<FeedWithOwner>> {
        let rows: Vec<FeedWithOwnerRow> = sqlx::query_as(
            r#"
            SELECT f.id, f.url, f.name, f.user_id, f.last_fetched_at, f.claimed_at,
                   f.created_at, f.updated_at, u.name AS owner_name
            FROM feeds f
            JOIN users u ON u.id = f.user_id
            ORDER BY f.created_at ASC, f.id ASC
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| FeedWithOwner {
                feed: Feed::from(row.feed),
                owner_name: row.owner_name,
            })
            .collect())
    }

    /// Get total feed count
    pub async fn count(&self) -> Result<u32> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feeds")
            .fetch_one(self.db.pool())
            .await?;

        Ok(count.0 as u32)
    }

    /// Atomically select the feed most overdue for a refresh and lease it.
    ///
    /// Never-fetched feeds come first, then the oldest `last_fetched_at`; ties are
    /// broken by `created_at`, then `id`. Feeds leased less than `lease` ago are
    /// skipped. Selection and lease happen in a single statement, so two callers
    /// can never claim the same feed.
    pub async fn claim_next(&self, now: DateTime<Utc>, lease: Duration) -> Result<Feed> {
        let stale_before = chrono::Duration::from_std(lease)
            .ok()
            .and_then(|lease| now.checked_sub_signed(lease))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let row: Option<FeedRow> = sqlx::query_as(&format!(
            r#"
            UPDATE feeds
            SET claimed_at = ?
            WHERE id = (
                SELECT id FROM feeds
                WHERE claimed_at IS NULL OR claimed_at < ?
                ORDER BY last_fetched_at IS NOT NULL, last_fetched_at ASC, created_at ASC, id ASC
                LIMIT 1
            )
            RETURNING {}
            "#,
            FEED_COLUMNS
        ))
        .bind(now)
        .bind(stale_before)
        .fetch_optional(self.db.pool())
        .await?;

        if let Some(row) = row {
            return Ok(Feed::from(row));
        }

        if self.count().await? == 0 {
            Err(Error::NoFeedsAvailable)
        } else {
            Err(Error::AllFeedsClaimed)
        }
    }

    /// Record a successful refresh and drop the lease.
    ///
    /// `last_fetched_at` never moves backwards: an older `fetched_at` leaves it as is.
    pub async fn mark_fetched(&self, id: Uuid, fetched_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE feeds
            SET last_fetched_at = CASE
                    WHEN last_fetched_at IS NULL OR last_fetched_at < ? THEN ?
                    ELSE last_fetched_at
                END,
                claimed_at = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(fetched_at)
        .bind(fetched_at)
        .bind(fetched_at)
        .bind(id.to_string())
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::FeedNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Drop the lease after a failed refresh, leaving `last_fetched_at` untouched
    pub async fn release_claim(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE feeds SET claimed_at = NULL WHERE id = ?")
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::storage::UserRepository;

    const LEASE: Duration = Duration::from_secs(300);

    async fn setup() -> (Database, Uuid) {
        let db = Database::new_in_memory().await.unwrap();
        let user = UserRepository::new(&db).create("kahya").await.unwrap();
        (db, user.id)
    }

    fn new_feed(user_id: Uuid, name: &str) -> NewFeed {
        NewFeed {
            url: format!("https://{}.example.com/rss", name),
            name: name.to_string(),
            user_id,
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let (db, user_id) = setup().await;
        let repo = FeedRepository::new(&db);

        let feed = repo.create(&new_feed(user_id, "alpha")).await.unwrap();
        assert!(feed.is_unfetched());
        assert_eq!(feed.user_id, user_id);

        let by_url = repo.find_by_url("https://alpha.example.com/rss").await.unwrap();
        assert_eq!(by_url.map(|f| f.id), Some(feed.id));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_url_is_rejected() {
        let (db, user_id) = setup().await;
        let repo = FeedRepository::new(&db);

        repo.create(&new_feed(user_id, "alpha")).await.unwrap();
        let err = repo.create(&new_feed(user_id, "alpha")).await.unwrap_err();
        assert!(matches!(err, Error::FeedExists(_)));
    }

    #[tokio::test]
    async fn test_list_with_owners() {
        let (db, user_id) = setup().await;
        let repo = FeedRepository::new(&db);
        repo.create(&new_feed(user_id, "alpha")).await.unwrap();

        let listed = repo.list_with_owners().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].owner_name, "kahya");
        assert_eq!(listed[0].feed.name, "alpha");
    }

    #[tokio::test]
    async fn test_claim_on_empty_directory() {
        let (db, _) = setup().await;
        let err = FeedRepository::new(&db).claim_next(Utc::now(), LEASE).await.unwrap_err();
        assert!(matches!(err, Error::NoFeedsAvailable));
    }

    #[tokio::test]
    async fn test_never_fetched_feeds_come_first() {
        let (db, user_id) = setup().await;
        let repo = FeedRepository::new(&db);
        let now = Utc::now();

        // Fetched feed registered first, so insertion order alone would pick it
        let fetched = repo.create(&new_feed(user_id, "fetched")).await.unwrap();
        repo.mark_fetched(fetched.id, now - chrono::Duration::days(30)).await.unwrap();
        let fresh = repo.create(&new_feed(user_id, "fresh")).await.unwrap();

        let claimed = repo.claim_next(now, LEASE).await.unwrap();
        assert_eq!(claimed.id, fresh.id);
        assert_eq!(claimed.claimed_at, Some(now));

        let claimed = repo.claim_next(now, LEASE).await.unwrap();
        assert_eq!(claimed.id, fetched.id);
    }

    #[tokio::test]
    async fn test_oldest_fetch_wins() {
        let (db, user_id) = setup().await;
        let repo = FeedRepository::new(&db);
        let now = Utc::now();

        let recent = repo.create(&new_feed(user_id, "recent")).await.unwrap();
        let stale = repo.create(&new_feed(user_id, "stale")).await.unwrap();
        repo.mark_fetched(recent.id, now - chrono::Duration::minutes(5)).await.unwrap();
        repo.mark_fetched(stale.id, now - chrono::Duration::hours(5)).await.unwrap();

        assert_eq!(repo.claim_next(now, LEASE).await.unwrap().id, stale.id);
    }

    #[tokio::test]
    async fn test_ties_break_by_creation_then_id() {
        let (db, user_id) = setup().await;
        let repo = FeedRepository::new(&db);
        let now = Utc::now();
        let created = now - chrono::Duration::hours(1);

        let older = repo
            .create_at(&new_feed(user_id, "older"), created - chrono::Duration::seconds(1))
            .await
            .unwrap();
        let twin_a = repo.create_at(&new_feed(user_id, "twin-a"), created).await.unwrap();
        let twin_b = repo.create_at(&new_feed(user_id, "twin-b"), created).await.unwrap();

        let first = repo.claim_next(now, LEASE).await.unwrap();
        assert_eq!(first.id, older.id);

        let expected = if twin_a.id.to_string() < twin_b.id.to_string() {
            twin_a.id
        } else {
            twin_b.id
        };
        assert_eq!(repo.claim_next(now, LEASE).await.unwrap().id, expected);
    }

    #[tokio::test]
    async fn test_claim_is_deterministic_across_release() {
        let (db, user_id) = setup().await;
        let repo = FeedRepository::new(&db);
        let now = Utc::now();
        for name in ["one", "two", "three"] {
            repo.create_at(&new_feed(user_id, name), now).await.unwrap();
        }

        let first = repo.claim_next(now, LEASE).await.unwrap();
        repo.release_claim(first.id).await.unwrap();
        let again = repo.claim_next(now, LEASE).await.unwrap();

        assert_eq!(first.id, again.id);
    }

    #[tokio::test]
    async fn test_claimed_feed_is_not_claimed_twice() {
        let (db, user_id) = setup().await;
        let repo = FeedRepository::new(&db);
        let now = Utc::now();
        let only = repo.create(&new_feed(user_id, "only")).await.unwrap();

        assert_eq!(repo.claim_next(now, LEASE).await.unwrap().id, only.id);
        let err = repo.claim_next(now, LEASE).await.unwrap_err();
        assert!(matches!(err, Error::AllFeedsClaimed));

        // Released feeds are immediately claimable again
        repo.release_claim(only.id).await.unwrap();
        assert_eq!(repo.claim_next(now, LEASE).await.unwrap().id, only.id);
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_reclaimed() {
        let (db, user_id) = setup().await;
        let repo = FeedRepository::new(&db);
        let now = Utc::now();
        let only = repo.create(&new_feed(user_id, "only")).await.unwrap();

        repo.claim_next(now, LEASE).await.unwrap();
        let later = now + chrono::Duration::seconds(301);
        let reclaimed = repo.claim_next(later, LEASE).await.unwrap();

        assert_eq!(reclaimed.id, only.id);
        assert_eq!(reclaimed.claimed_at, Some(later));
    }

    #[tokio::test]
    async fn test_mark_fetched_is_monotonic_and_clears_lease() {
        let (db, user_id) = setup().await;
        let repo = FeedRepository::new(&db);
        let now = Utc::now();
        let feed = repo.create(&new_feed(user_id, "alpha")).await.unwrap();

        repo.claim_next(now, LEASE).await.unwrap();
        repo.mark_fetched(feed.id, now).await.unwrap();
        repo.mark_fetched(feed.id, now - chrono::Duration::hours(1)).await.unwrap();

        let stored = repo.find_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(stored.last_fetched_at, Some(now));
        assert_eq!(stored.claimed_at, None);
    }

    #[tokio::test]
    async fn test_mark_fetched_unknown_feed() {
        let (db, _) = setup().await;
        let err = FeedRepository::new(&db)
            .mark_fetched(Uuid::new_v4(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FeedNotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_claims_never_overlap() {
        // File-backed so the pool hands out several connections at once
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.general.data_dir = dir.path().to_path_buf();
        let db = Database::new(&config).await.unwrap();

        let user = UserRepository::new(&db).create("kahya").await.unwrap();
        let repo = FeedRepository::new(&db);
        for i in 0..20 {
            repo.create(&new_feed(user.id, &format!("feed-{}", i))).await.unwrap();
        }

        let now = Utc::now();
        let mut handles = Vec::new();
        for _ in 0..40 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                FeedRepository::new(&db).claim_next(now, LEASE).await
            }));
        }

        let mut claimed = Vec::new();
        let mut exhausted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(feed) => claimed.push(feed.id),
                Err(Error::AllFeedsClaimed) => exhausted += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        let total = claimed.len();
        claimed.sort();
        claimed.dedup();
        assert_eq!(total, 20);
        assert_eq!(claimed.len(), 20);
        assert_eq!(exhausted, 20);
    }
}
