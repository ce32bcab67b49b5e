use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reqwest::header::USER_AGENT;
use reqwest::{Client, Response, StatusCode};
use tokio::sync::watch;
use tokio::time::Instant;
use url::Url;

use crate::config::FetchConfig;
use crate::{Error, Result};

/// Deadline and cancellation for one fetch, passed in by the caller
#[derive(Debug, Clone)]
pub struct FetchContext {
    deadline: Instant,
    budget: Duration,
    shutdown: Option<watch::Receiver<bool>>,
}

impl FetchContext {
    /// Context whose deadline is `budget` from now
    pub fn with_timeout(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
            budget,
            shutdown: None,
        }
    }

    /// Abort the fetch as soon as `shutdown` turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Resolves once shutdown is requested; never resolves without a receiver
    async fn cancelled(&mut self) {
        if let Some(rx) = self.shutdown.as_mut() {
            if rx.wait_for(|&stop| stop).await.is_ok() {
                return;
            }
        }
        // No receiver, or the sender is gone: nothing can cancel us anymore
        std::future::pending::<()>().await
    }
}

/// Performs bounded HTTP retrievals of feed documents
#[derive(Clone)]
pub struct FeedFetcher {
    client: Client,
    user_agent: String,
    max_body_bytes: usize,
}

impl FeedFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .gzip(true)
            .deflate(true)
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Fetch the document at `url`.
    ///
    /// Only `200 OK` counts as success; any other status is returned as
    /// [`Error::Protocol`] without reading the body. The request is dropped, and
    /// with it the connection, when the context's deadline passes or shutdown is
    /// signalled. No retries are attempted.
    pub async fn fetch(&self, ctx: &mut FetchContext, url: &str) -> Result<Bytes> {
        let url = Url::parse(url)?;
        let deadline = ctx.deadline;
        let budget = ctx.budget;

        tracing::debug!(url = %url, "Fetching feed");

        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep_until(deadline) => Err(Error::Timeout(budget)),
            result = self.request(url) => result,
        }
    }

    async fn request(&self, url: Url) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::Protocol {
                status: status.as_u16(),
            });
        }

        self.read_body(response).await
    }

    async fn read_body(&self, mut response: Response) -> Result<Bytes> {
        let limit = self.max_body_bytes;

        if let Some(declared) = response.content_length() {
            if declared > limit as u64 {
                return Err(Error::ResponseTooLarge {
                    size: declared as usize,
                    limit,
                });
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(Error::ResponseTooLarge {
                    size: body.len() + chunk.len(),
                    limit,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body.freeze())
    }
}
