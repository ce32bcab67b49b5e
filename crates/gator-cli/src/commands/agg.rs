use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::info;

use gator_core::{
    feed::{FeedDocument, FeedFetcher},
    parse_interval,
    scheduler::{SchedulerEvent, SchedulerService},
    storage::{Database, SqliteDirectory},
    AppConfig, Error,
};

pub async fn run(db: Database, config: &AppConfig, interval: &str) -> Result<()> {
    let interval = parse_interval(interval)
        .map_err(Error::from)
        .with_context(|| format!("invalid duration '{}'; try 1s, 1m or 1h", interval))?;

    println!("Collecting feeds every {:?}", interval);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let SchedulerEvent::FeedRefreshed { document, .. } = event {
                print_document(&document);
            }
        }
    });

    let directory = Arc::new(SqliteDirectory::new(db, config.fetch.claim_lease()));
    let fetcher = FeedFetcher::new(&config.fetch)?;
    let scheduler = SchedulerService::new(directory, fetcher, config.fetch.request_timeout())
        .with_event_sender(event_tx);

    // The scheduler owns the event sender, so the printer drains once it returns
    let result = scheduler.run(interval, shutdown_rx).await;
    printer.await.ok();

    result?;
    println!("Stopped collecting feeds.");
    Ok(())
}

fn print_document(document: &FeedDocument) {
    println!("Feed Update For {}", document.title);
    println!("Url: {}", document.link);

    for (i, item) in document.items.iter().enumerate() {
        println!("Item #{}:", i + 1);
        println!("{}", item.title);
        println!("{}", item.pub_date);
        println!("{}", item.link);
        println!("{}", item.description);
    }
}
