use std::time::Duration;

use thiserror::Error;

use crate::interval::IntervalError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Unexpected HTTP status: {status}")]
    Protocol { status: u16 },

    #[error("Response too large ({size} bytes, limit {limit})")]
    ResponseTooLarge { size: usize, limit: usize },

    #[error("Feed decoding error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid interval: {0}")]
    Interval(#[from] IntervalError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("No feeds available to fetch")]
    NoFeedsAvailable,

    #[error("Every feed is currently claimed by another worker")]
    AllFeedsClaimed,

    #[error("Feed not found: {0}")]
    FeedNotFound(String),

    #[error("A feed with URL {0} already exists")]
    FeedExists(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("User {0} already exists")]
    UserExists(String),

    #[error("Already following feed: {0}")]
    AlreadyFollowing(String),

    #[error("Not following feed: {0}")]
    NotFollowing(String),

    #[error("No user is logged in; run `gator login <name>` first")]
    NotLoggedIn,
}

impl Error {
    /// Transport-level failures, including deadline and cancellation
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::Timeout(_)
                | Error::Cancelled
                | Error::UrlParse(_)
                | Error::ResponseTooLarge { .. }
        )
    }

    /// Status code of a non-success HTTP response, if this is one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Protocol { status } => Some(*status),
            _ => None,
        }
    }
}

/// Map a unique-constraint violation to a domain error, keeping every other error as-is
pub(crate) fn on_unique_violation(err: sqlx::Error, conflict: impl FnOnce() -> Error) -> Error {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => conflict(),
        _ => Error::Database(err),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
