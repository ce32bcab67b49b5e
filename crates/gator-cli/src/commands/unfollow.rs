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

    if !FollowRepository::new(db).delete(user.id, feed.id).await? {
        return Err(Error::NotFollowing(feed.name).into());
    }

    println!("Unfollowed '{}'", feed.name);

    Ok(())
}
