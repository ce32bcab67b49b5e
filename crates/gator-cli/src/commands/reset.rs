use anyhow::Result;

use gator_core::storage::{Database, UserRepository};

pub async fn run(db: &Database) -> Result<()> {
    let removed = UserRepository::new(db).delete_all().await?;
    println!("Database reset: removed {} user(s) and their feeds", removed);

    Ok(())
}
