use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A syndication source under refresh management
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: Uuid,
    pub url: String,
    pub name: String,
    pub user_id: Uuid,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Feed {
    /// Check if the feed has never been refreshed successfully
    pub fn is_unfetched(&self) -> bool {
        self.last_fetched_at.is_none()
    }
}

/// Data required to register a new feed
#[derive(Debug, Clone)]
pub struct NewFeed {
    pub url: String,
    pub name: String,
    pub user_id: Uuid,
}

/// A feed joined with the name of the user who registered it
#[derive(Debug, Clone)]
pub struct FeedWithOwner {
    pub feed: Feed,
    pub owner_name: String,
}

/// Decoded result of one fetch; never persisted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedDocument {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<FeedItem>,
}

/// One entry of a [`FeedDocument`], in source order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Publication date exactly as the source wrote it
    pub pub_date: String,
}
