use anyhow::Result;

use gator_core::{
    account::User,
    storage::{Database, FollowRepository},
};

pub async fn run(db: &Database, user: &User) -> Result<()> {
    let follows = FollowRepository::new(db).list_for_user(user.id).await?;

    if follows.is_empty() {
        println!("{} is not following any feeds.", user.name);
        return Ok(());
    }

    for follow in follows {
        println!("- {}", follow.feed_name);
    }

    Ok(())
}
