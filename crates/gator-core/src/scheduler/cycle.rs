use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use super::Clock;
use crate::feed::{parse_feed, Feed, FeedDocument, FeedFetcher, FetchContext};
use crate::storage::FeedDirectory;
use crate::Error;

/// The step of a refresh cycle an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Claim,
    Fetch,
    Decode,
    Record,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleStage::Claim => "claim",
            CycleStage::Fetch => "fetch",
            CycleStage::Decode => "decode",
            CycleStage::Record => "record",
        };
        f.write_str(name)
    }
}

/// A failed refresh cycle
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct CycleError {
    pub stage: CycleStage,
    /// The feed being refreshed, if one was claimed
    pub feed: Option<Feed>,
    #[source]
    pub source: Error,
}

impl CycleError {
    fn new(stage: CycleStage, feed: Option<Feed>, source: Error) -> Self {
        Self {
            stage,
            feed,
            source,
        }
    }

    /// Whether the scheduler has to stop.
    ///
    /// Only claim failures are fatal, and a directory whose feeds are all
    /// leased by other workers is not a failure of the directory.
    pub fn is_fatal(&self) -> bool {
        self.stage == CycleStage::Claim && !matches!(self.source, Error::AllFeedsClaimed)
    }
}

/// A completed refresh cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub feed: Feed,
    pub document: FeedDocument,
    pub fetched_at: DateTime<Utc>,
}

/// Run one claim, fetch, decode, record cycle.
///
/// A feed that fails to fetch or decode has its lease released and its
/// `last_fetched_at` left untouched, so it stays first in line for the next
/// cycle. The document is returned only once the refresh has been recorded.
pub async fn run_cycle(
    directory: &dyn FeedDirectory,
    fetcher: &FeedFetcher,
    ctx: &mut FetchContext,
    clock: &dyn Clock,
) -> Result<CycleReport, CycleError> {
    let feed = directory
        .claim_next(clock.now())
        .await
        .map_err(|e| CycleError::new(CycleStage::Claim, None, e))?;

    debug!(feed = %feed.name, url = %feed.url, "Claimed feed");

    let body = match fetcher.fetch(ctx, &feed.url).await {
        Ok(body) => body,
        Err(e) => return Err(abandon(directory, feed, CycleStage::Fetch, e).await),
    };

    let document = match parse_feed(&body) {
        Ok(document) => document,
        Err(e) => return Err(abandon(directory, feed, CycleStage::Decode, e).await),
    };

    let fetched_at = clock.now();
    if let Err(e) = directory.mark_fetched(feed.id, fetched_at).await {
        return Err(CycleError::new(CycleStage::Record, Some(feed), e));
    }

    Ok(CycleReport {
        feed,
        document,
        fetched_at,
    })
}

async fn abandon(
    directory: &dyn FeedDirectory,
    feed: Feed,
    stage: CycleStage,
    source: Error,
) -> CycleError {
    // An unreleased lease expires on its own
    if let Err(e) = directory.release(feed.id).await {
        warn!(feed = %feed.name, "Failed to release claim: {}", e);
    }
    CycleError::new(stage, Some(feed), source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::feed::NewFeed;
    use crate::scheduler::SystemClock;
    use crate::storage::{Database, FeedRepository, SqliteDirectory, UserRepository};
    use async_trait::async_trait;
    use std::time::Duration;
    use uuid::Uuid;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Tom &amp;amp; Jerry</title>
  <link>https://example.com</link>
  <description>Cartoons</description>
  <item>
    <title>Episode 1</title>
    <link>https://example.com/1</link>
    <description>&lt;p&gt;Chase&lt;/p&gt;</description>
    <pubDate>Mon, 06 Sep 2021 12:00:00 GMT</pubDate>
  </item>
</channel></rss>"#;

    async fn setup(url: &str) -> (Database, Feed) {
        let db = Database::new_in_memory().await.unwrap();
        let user = UserRepository::new(&db).create("kahya").await.unwrap();
        let feed = FeedRepository::new(&db)
            .create(&NewFeed {
                url: url.to_string(),
                name: "cartoons".to_string(),
                user_id: user.id,
            })
            .await
            .unwrap();
        (db, feed)
    }

    async fn serve(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    async fn cycle(db: &Database, timeout: Duration) -> Result<CycleReport, CycleError> {
        let directory = SqliteDirectory::new(db.clone(), Duration::from_secs(300));
        let fetcher = FeedFetcher::new(&FetchConfig::default()).unwrap();
        let mut ctx = FetchContext::with_timeout(timeout);
        run_cycle(&directory, &fetcher, &mut ctx, &SystemClock).await
    }

    #[tokio::test]
    async fn test_successful_cycle_records_and_reports() {
        let server = serve(ResponseTemplate::new(200).set_body_string(RSS)).await;
        let (db, feed) = setup(&server.uri()).await;

        let report = cycle(&db, Duration::from_secs(5)).await.unwrap();

        assert_eq!(report.feed.id, feed.id);
        assert_eq!(report.document.title, "Tom & Jerry");
        assert_eq!(report.document.items[0].description, "<p>Chase</p>");

        let stored = FeedRepository::new(&db).find_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(stored.last_fetched_at, Some(report.fetched_at));
        assert_eq!(stored.claimed_at, None);
    }

    #[tokio::test]
    async fn test_not_found_leaves_feed_unfetched() {
        let server = serve(ResponseTemplate::new(404)).await;
        let (db, feed) = setup(&server.uri()).await;

        let err = cycle(&db, Duration::from_secs(5)).await.unwrap_err();

        assert_eq!(err.stage, CycleStage::Fetch);
        assert_eq!(err.source.status_code(), Some(404));
        assert!(!err.is_fatal());

        let stored = FeedRepository::new(&db).find_by_id(feed.id).await.unwrap().unwrap();
        assert!(stored.is_unfetched());
        assert_eq!(stored.claimed_at, None);
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = serve(ResponseTemplate::new(200).set_body_string("<rss><channel>")).await;
        let (db, feed) = setup(&server.uri()).await;

        let err = cycle(&db, Duration::from_secs(5)).await.unwrap_err();

        assert_eq!(err.stage, CycleStage::Decode);
        assert!(matches!(err.source, Error::Decode(_)));
        assert_eq!(err.feed.map(|f| f.id), Some(feed.id));

        let stored = FeedRepository::new(&db).find_by_id(feed.id).await.unwrap().unwrap();
        assert!(stored.is_unfetched());
    }

    #[tokio::test]
    async fn test_deadline_shorter_than_source_latency() {
        let server = serve(
            ResponseTemplate::new(200)
                .set_body_string(RSS)
                .set_delay(Duration::from_secs(5)),
        )
        .await;
        let (db, feed) = setup(&server.uri()).await;

        let started = std::time::Instant::now();
        let err = cycle(&db, Duration::from_millis(200)).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(err.stage, CycleStage::Fetch);
        assert!(err.source.is_network());

        let stored = FeedRepository::new(&db).find_by_id(feed.id).await.unwrap().unwrap();
        assert!(stored.is_unfetched());
    }

    #[tokio::test]
    async fn test_empty_directory_is_fatal() {
        let db = Database::new_in_memory().await.unwrap();
        let err = cycle(&db, Duration::from_secs(5)).await.unwrap_err();

        assert_eq!(err.stage, CycleStage::Claim);
        assert!(matches!(err.source, Error::NoFeedsAvailable));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_all_feeds_claimed_is_not_fatal() {
        let err = CycleError::new(CycleStage::Claim, None, Error::AllFeedsClaimed);
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "claim stage failed: Every feed is currently claimed by another worker");
    }

    /// Hands out one fixed feed and refuses to record anything
    struct ReadOnlyDirectory {
        feed: Feed,
    }

    #[async_trait]
    impl FeedDirectory for ReadOnlyDirectory {
        async fn claim_next(&self, _now: DateTime<Utc>) -> crate::Result<Feed> {
            Ok(self.feed.clone())
        }

        async fn mark_fetched(&self, _id: Uuid, _at: DateTime<Utc>) -> crate::Result<()> {
            Err(Error::Database(sqlx::Error::PoolClosed))
        }

        async fn release(&self, _id: Uuid) -> crate::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_record_failure_withholds_document() {
        let server = serve(ResponseTemplate::new(200).set_body_string(RSS)).await;
        let (_db, feed) = setup(&server.uri()).await;

        let directory = ReadOnlyDirectory { feed };
        let fetcher = FeedFetcher::new(&FetchConfig::default()).unwrap();
        let mut ctx = FetchContext::with_timeout(Duration::from_secs(5));
        let err = run_cycle(&directory, &fetcher, &mut ctx, &SystemClock)
            .await
            .unwrap_err();

        assert_eq!(err.stage, CycleStage::Record);
        assert!(!err.is_fatal());
    }
}
