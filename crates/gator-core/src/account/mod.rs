mod models;

pub use models::{FeedFollow, User};
