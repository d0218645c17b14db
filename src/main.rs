//! hookbot - GroupMe webhook bot
//!
//! CLI for serving the webhook, preparing the database and firing periodic
//! jobs by hand.

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use hookbot::config::Config;
use hookbot::datetime::format_display;
use hookbot::jobs;
use hookbot::server;
use hookbot::store::Store;
use hookbot::Env;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// hookbot - chat commands, reminders and AI replies for GroupMe
#[derive(Parser)]
#[command(name = "hookbot")]
#[command(about = "GroupMe webhook bot")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the webhook and run scheduled jobs (default)
    Serve,

    /// Create or update the database schema
    Migrate,

    /// Record the bot used to post into a group
    RegisterGroup {
        /// GroupMe group id
        group_id: String,

        /// Bot id registered for that group
        bot_id: String,
    },

    /// Run the job for a cron schedule once
    Tick {
        /// Cron expression, e.g. "* * * * *"
        cron: String,
    },

    /// Show how a reminder time expression would be understood
    ParseTime {
        /// Time expression, e.g. "tomorrow at 3pm"
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => cmd_serve(config).await,
        Commands::Migrate => cmd_migrate(&config),
        Commands::RegisterGroup { group_id, bot_id } => {
            cmd_register_group(&config, &group_id, &bot_id)
        }
        Commands::Tick { cron } => cmd_tick(config, &cron).await,
        Commands::ParseTime { text } => cmd_parse_time(config, &text.join(" ")).await,
    }
}

async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    info!("hookbot starting");
    let env = Env::from_config(config).context("Failed to initialize")?;

    let scheduler_env = env.clone();
    tokio::spawn(async move {
        if let Err(e) = jobs::run_scheduler(scheduler_env).await {
            error!("Scheduler stopped: {}", e);
        }
    });

    server::serve(env).await.context("Server error")?;
    Ok(())
}

fn cmd_migrate(config: &Config) -> anyhow::Result<()> {
    let store = Store::open(&config.db_path)
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    let messages = store.total_messages()?;
    println!(
        "Database ready at {} ({} messages)",
        config.db_path.display(),
        messages
    );
    Ok(())
}

fn cmd_register_group(config: &Config, group_id: &str, bot_id: &str) -> anyhow::Result<()> {
    let store = Store::open(&config.db_path)
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    store.upsert_group(group_id, bot_id)?;
    println!("Registered group {} with bot {}", group_id, bot_id);
    Ok(())
}

async fn cmd_tick(config: Config, cron: &str) -> anyhow::Result<()> {
    let env = Env::from_config(config).context("Failed to initialize")?;
    match jobs::run_scheduled(&env, cron, Utc::now()).await {
        Some(job) => {
            println!("Ran {:?}", job);
            Ok(())
        }
        None => bail!("No job configured for schedule '{}'", cron),
    }
}

async fn cmd_parse_time(config: Config, text: &str) -> anyhow::Result<()> {
    let tz = config.display_tz;
    let env = Env::from_config(config).context("Failed to initialize")?;
    match env.dates.parse(text, Utc::now()).await {
        Some(ts) => {
            println!("{} ({})", format_display(&ts, tz), ts.to_rfc3339());
            Ok(())
        }
        None => bail!("Could not understand '{}'", text),
    }
}
