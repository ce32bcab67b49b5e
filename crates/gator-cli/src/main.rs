use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gator_core::{storage::Database, AppConfig};

mod commands;

#[derive(Parser)]
#[command(name = "gator")]
#[command(author, version, about = "A terminal feed aggregator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a user and log in as them
    Register {
        name: String,
    },
    /// Log in as an existing user
    Login {
        name: String,
    },
    /// List all users
    Users,
    /// Delete every user, along with their feeds and follows
    Reset,
    /// Register a feed and follow it
    Addfeed {
        /// Display name for the feed
        name: String,
        url: String,
    },
    /// List all registered feeds
    Feeds,
    /// Follow an already registered feed
    Follow {
        url: String,
    },
    /// List the feeds the current user follows
    Following,
    /// Stop following a feed
    Unfollow {
        url: String,
    },
    /// Refresh the most overdue feed on a fixed interval until Ctrl+C
    Agg {
        /// Time between refreshes, e.g. 30s, 1m, 1h30m
        interval: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = AppConfig::load()?;

    // Initialize logging; stdout is reserved for command output
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Initialize database
    let db = Database::new(&config).await?;

    match cli.command {
        Commands::Register { name } => commands::register::run(&db, &mut config, &name).await,
        Commands::Login { name } => commands::login::run(&db, &mut config, &name).await,
        Commands::Users => commands::users::run(&db, &config).await,
        Commands::Reset => commands::reset::run(&db).await,
        Commands::Addfeed { name, url } => {
            let user = commands::require_user(&db, &config).await?;
            commands::addfeed::run(&db, &user, &name, &url).await
        }
        Commands::Feeds => commands::feeds::run(&db).await,
        Commands::Follow { url } => {
            let user = commands::require_user(&db, &config).await?;
            commands::follow::run(&db, &user, &url).await
        }
        Commands::Following => {
            let user = commands::require_user(&db, &config).await?;
            commands::following::run(&db, &user).await
        }
        Commands::Unfollow { url } => {
            let user = commands::require_user(&db, &config).await?;
            commands::unfollow::run(&db, &user, &url).await
        }
        Commands::Agg { interval } => commands::agg::run(db, &config, &interval).await,
    }
}
