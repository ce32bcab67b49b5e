use anyhow::Result;

use gator_core::storage::{Database, FeedRepository};

pub async fn run(db: &Database) -> Result<()> {
    let feeds = FeedRepository::new(db).list_with_owners().await?;

    if feeds.is_empty() {
        println!("No feeds registered. Use 'gator addfeed <name> <url>' to add one.");
        return Ok(());
    }

    println!("Feeds ({}):", feeds.len());
    println!();

    for entry in feeds {
        let last_fetched = entry
            .feed
            .last_fetched_at
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());

        println!("  {}", entry.feed.name);
        println!("    URL: {}", entry.feed.url);
        println!("    Added by: {}", entry.owner_name);
        println!("    Last fetched: {}", last_fetched);
        println!();
    }

    Ok(())
}
