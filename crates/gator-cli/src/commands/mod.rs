pub mod addfeed;
pub mod agg;
pub mod feeds;
pub mod follow;
pub mod following;
pub mod login;
pub mod register;
pub mod reset;
pub mod unfollow;
pub mod users;

use anyhow::Result;

use gator_core::{
    account::User,
    storage::{Database, UserRepository},
    AppConfig, Error,
};

/// Resolve the logged-in user for commands that act on their behalf
pub async fn require_user(db: &Database, config: &AppConfig) -> Result<User> {
    let name = config
        .session
        .current_user_name
        .as_deref()
        .ok_or(Error::NotLoggedIn)?;

    let user = UserRepository::new(db)
        .find_by_name(name)
        .await?
        .ok_or_else(|| Error::UserNotFound(name.to_string()))?;

    Ok(user)
}
