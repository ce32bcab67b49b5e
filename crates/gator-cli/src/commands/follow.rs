use anyhow::Result;

use gator_core::{
    account::User,
    storage::{Database, FeedRepository, FollowRepository},
    Error,
};

pub async fn run(db: &Database, user: &User, url: &str) -> Result<()> {
    let feed = FeedRepository::new(db)
        .find_by_url(url)
        .await?
        .ok_or_else(|| Error::FeedNotFound(url.to_string()))?;

    let follow = FollowRepository::new(db)
        .create(user.id, feed.id)
        .await
        .map_err(|e| match e {
            Error::AlreadyFollowing(_) => Error::AlreadyFollowing(feed.name.clone()),
            other => other,
        })?;

    println!("New feed followed: {}", follow.feed_name);
    println!("Followed by: {}", follow.user_name);

    Ok(())
}
