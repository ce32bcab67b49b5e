use anyhow::Result;

use gator_core::{
    account::User,
    feed::NewFeed,
    storage::{Database, FeedRepository, FollowRepository},
};

pub async fn run(db: &Database, user: &User, name: &str, url: &str) -> Result<()> {
    let new_feed = NewFeed {
        url: url.to_string(),
        name: name.to_string(),
        user_id: user.id,
    };

    let feed = FeedRepository::new(db).create(&new_feed).await?;
    FollowRepository::new(db).create(user.id, feed.id).await?;

    println!("Added feed '{}'", feed.name);
    println!("  ID: {}", feed.id);
    println!("  URL: {}", feed.url);
    println!("  Owner: {}", user.name);
    println!("  Created at: {}", feed.created_at.format("%Y-%m-%d %H:%M:%S"));

    Ok(())
}
