use anyhow::Result;

use gator_core::{
    storage::{Database, UserRepository},
    AppConfig,
};

pub async fn run(db: &Database, config: &AppConfig) -> Result<()> {
    let users = UserRepository::new(db).list_all().await?;

    if users.is_empty() {
        println!("No users registered. Use 'gator register <name>' to create one.");
        return Ok(());
    }

    let current = config.session.current_user_name.as_deref();
    for user in users {
        if current == Some(user.name.as_str()) {
            println!("* {} (current)", user.name);
        } else {
            println!("* {}", user.name);
        }
    }

    Ok(())
}
