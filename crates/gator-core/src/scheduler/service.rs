use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::cycle::{run_cycle, CycleError, CycleReport, CycleStage};
use super::{Clock, SystemClock};
use crate::feed::{Feed, FeedDocument, FeedFetcher, FetchContext};
use crate::storage::FeedDirectory;
use crate::{Error, Result};

/// Events emitted by the scheduler after every cycle
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A feed was refreshed and its freshness recorded
    FeedRefreshed { feed: Feed, document: FeedDocument },
    /// A cycle ended early; `feed` is absent when nothing was claimed
    CycleFailed {
        feed: Option<Feed>,
        stage: CycleStage,
        message: String,
    },
}

/// Refreshes one feed per tick until shutdown or a fatal error
pub struct SchedulerService {
    directory: Arc<dyn FeedDirectory>,
    fetcher: FeedFetcher,
    request_timeout: Duration,
    clock: Arc<dyn Clock>,
    event_tx: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl SchedulerService {
    /// Create a new scheduler service
    pub fn new(
        directory: Arc<dyn FeedDirectory>,
        fetcher: FeedFetcher,
        request_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            fetcher,
            request_timeout,
            clock: Arc::new(SystemClock),
            event_tx: None,
        }
    }

    /// Replace the wall clock used for claim and record timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the event sender for cycle notifications
    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn send_event(&self, event: SchedulerEvent) {
        if let Some(ref tx) = self.event_tx {
            if tx.send(event).is_err() {
                warn!("Failed to send scheduler event: receiver dropped");
            }
        }
    }

    /// Run a single cycle and report its outcome.
    ///
    /// The fetch is bounded by the request timeout and aborted when `shutdown`
    /// turns true.
    pub async fn run_once(
        &self,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> std::result::Result<CycleReport, CycleError> {
        let mut ctx = FetchContext::with_timeout(self.request_timeout);
        if let Some(shutdown) = shutdown {
            ctx = ctx.with_shutdown(shutdown);
        }

        let outcome =
            run_cycle(self.directory.as_ref(), &self.fetcher, &mut ctx, self.clock.as_ref()).await;

        match &outcome {
            Ok(report) => {
                info!(
                    feed = %report.feed.name,
                    items = report.document.items.len(),
                    "Refreshed feed"
                );
                self.send_event(SchedulerEvent::FeedRefreshed {
                    feed: report.feed.clone(),
                    document: report.document.clone(),
                });
            }
            Err(e) => {
                let feed_name = e.feed.as_ref().map(|f| f.name.as_str()).unwrap_or("-");
                if e.is_fatal() {
                    error!(feed = feed_name, "Refresh cycle failed: {}", e);
                } else if matches!(e.source, Error::AllFeedsClaimed) {
                    debug!("Nothing to refresh: {}", e.source);
                } else {
                    warn!(feed = feed_name, "Refresh cycle failed: {}", e);
                }
                self.send_event(SchedulerEvent::CycleFailed {
                    feed: e.feed.clone(),
                    stage: e.stage,
                    message: e.source.to_string(),
                });
            }
        }

        outcome
    }

    /// Run cycles every `interval` until `shutdown` turns true.
    ///
    /// The first cycle starts immediately. A cycle that overruns the interval
    /// delays the next tick rather than triggering a burst. Returns the error of
    /// the first fatal cycle; a dropped shutdown sender also stops the loop.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::Config("refresh interval must be positive".to_string()));
        }

        info!("Scheduler started: collecting feeds every {:?}", interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = stop_requested(&mut shutdown) => {
                    info!("Scheduler received shutdown signal");
                    break;
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(Some(shutdown.clone())).await {
                        if e.is_fatal() {
                            return Err(e.source);
                        }
                    }
                }
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }
}

/// Resolves once shutdown is requested or the sender is gone
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|&stop| stop).await;
}
