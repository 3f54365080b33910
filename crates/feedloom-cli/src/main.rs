use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedloom_core::{AppConfig, Engine};

mod commands;

#[derive(Parser)]
#[command(name = "feedloom")]
#[command(author, version, about = "Background feed synchronizer with blog discovery")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to a feed URL
    Subscribe {
        url: String,
        #[arg(short, long, default_value = "")]
        category: String,
        /// Display title (defaults to the feed's own title)
        #[arg(short = 'n', long, default_value = "")]
        title: String,
    },
    /// Subscribe to a script that prints a feed document
    SubscribeScript {
        /// Path inside the scripts directory
        path: String,
        #[arg(short, long, default_value = "")]
        category: String,
        #[arg(short = 'n', long, default_value = "")]
        title: String,
    },
    /// Remove a subscription and its articles
    Unsubscribe {
        /// Feed id, title or location
        feed: String,
    },
    /// Change a subscription's settings
    Update(commands::update::UpdateArgs),
    /// List all subscriptions
    List,
    /// List stored articles
    Articles {
        /// Only articles of this feed (id, title or location)
        #[arg(short, long)]
        feed: Option<String>,
        #[arg(short, long)]
        unread: bool,
        #[arg(long)]
        favorites: bool,
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
    },
    /// Fetch feeds now
    Refresh {
        /// Only this feed (id, title or location); otherwise every due feed
        feed: Option<String>,
    },
    /// Delete old articles
    Cleanup,
    /// Find new blogs through the friend-link pages of subscribed ones
    Discover {
        /// Seed feed (id, title or location)
        #[arg(conflicts_with = "all")]
        feed: Option<String>,
        /// Crawl every feed not crawled before
        #[arg(long)]
        all: bool,
        /// Subscribe to everything found
        #[arg(long)]
        subscribe: bool,
    },
    /// Import subscriptions from an OPML file
    Import {
        file: String,
    },
    /// Show or change runtime settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
    /// Background daemon: scheduled refresh, cleanup and IPC socket
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// List every setting with its effective value
    List,
    Get { key: String },
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the background daemon
    Start,
    /// Stop the background daemon
    Stop,
    /// Check daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Daemon { action } => match action {
            DaemonAction::Start => commands::daemon::start(config).await,
            DaemonAction::Stop => commands::daemon::stop().await,
            DaemonAction::Status => commands::daemon::status(&config).await,
        },
        Commands::Discover { feed, all, subscribe } => {
            commands::discover::run(config, feed.as_deref(), all, subscribe).await
        }
        command => {
            let engine = Engine::open(config).await?;
            let result = run_local(&engine, command).await;
            engine.shutdown().await;
            result
        }
    }
}

async fn run_local(engine: &Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Subscribe { url, category, title } => {
            commands::subscribe::run(engine, &url, &category, &title).await
        }
        Commands::SubscribeScript { path, category, title } => {
            commands::subscribe::run_script(engine, &path, &category, &title).await
        }
        Commands::Unsubscribe { feed } => commands::unsubscribe::run(engine, &feed).await,
        Commands::Update(args) => commands::update::run(engine, args).await,
        Commands::List => commands::list::run(engine).await,
        Commands::Articles {
            feed,
            unread,
            favorites,
            limit,
        } => commands::articles::run(engine, feed.as_deref(), unread, favorites, limit).await,
        Commands::Refresh { feed } => commands::refresh::run(engine, feed.as_deref()).await,
        Commands::Cleanup => commands::cleanup::run(engine).await,
        Commands::Import { file } => commands::import::run(engine, &file).await,
        Commands::Settings { action } => match action.unwrap_or(SettingsAction::List) {
            SettingsAction::List => commands::settings::list(engine).await,
            SettingsAction::Get { key } => commands::settings::get(engine, &key).await,
            SettingsAction::Set { key, value } => commands::settings::set(engine, &key, &value).await,
        },
        Commands::Daemon { .. } | Commands::Discover { .. } => Ok(()),
    }
}
