mod database;
mod directory;
mod feed_repo;
mod follow_repo;
mod user_repo;

pub use database::Database;
pub use directory::{FeedDirectory, SqliteDirectory};
pub use feed_repo::FeedRepository;
pub use follow_repo::FollowRepository;
pub use user_repo::UserRepository;
