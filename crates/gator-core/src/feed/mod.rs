mod fetcher;
mod models;
mod parser;
mod sanitize;

pub use fetcher::{FeedFetcher, FetchContext};
pub use models::{Feed, FeedDocument, FeedItem, FeedWithOwner, NewFeed};
pub use parser::parse_feed;
pub use sanitize::unescape_entities;
