use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use insight_router::{QueryRouter, RouterConfig};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "insight-router")]
#[command(
    about = "Answer analytics questions from cached dumps, falling back to a token-budgeted model"
)]
struct Args {
    /// JSON config file (defaults apply for anything it omits)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Dump directory (or set INSIGHT_DUMP_DIR)
    #[arg(short, long, global = true)]
    dumps: Option<PathBuf>,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Per-minute token ceiling
    #[arg(long, global = true)]
    tokens_per_minute: Option<u64>,

    /// Per-day token ceiling
    #[arg(long, global = true)]
    tokens_per_day: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Route one question and print the answer as JSON
    Route {
        /// The question in natural language
        query: String,
    },
    /// List the query patterns the dump store knows about
    Patterns {
        #[arg(long)]
        category: Option<String>,
    },
    /// Route any given questions, then print token budget status and metrics
    Budget {
        queries: Vec<String>,
    },
    /// Answer questions read from stdin, one per line, picking up
    /// regenerated dumps as they land
    Repl,
}

fn load_config(args: &Args) -> Result<RouterConfig> {
    let mut config = match &args.config {
        Some(path) => RouterConfig::load(path)?,
        None => RouterConfig::default(),
    };

    dotenv::dotenv().ok();
    config.apply_env(|key| std::env::var(key).ok())?;

    if let Some(dir) = &args.dumps {
        config.dumps.dir = dir.clone();
    }
    if let Some(key) = &args.api_key {
        config.completion.api_key = Some(key.clone());
    }
    if let Some(limit) = args.tokens_per_minute {
        config.budget.per_minute_limit = limit;
    }
    if let Some(limit) = args.tokens_per_day {
        config.budget.per_day_limit = limit;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("insight_router=info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let router = QueryRouter::from_config(&config).context("Failed to start router")?;

    info!("Insight router starting...");

    match args.command {
        Command::Route { query } => {
            let answer = router.route(&query).await?;
            println!("{}", serde_json::to_string_pretty(&answer)?);
        }
        Command::Patterns { category } => {
            let patterns = router.store().list_patterns(category.as_deref());
            println!("{}", serde_json::to_string_pretty(&patterns)?);
        }
        Command::Budget { queries } => {
            for query in &queries {
                let answer = router.route(query).await?;
                info!("'{}' -> {} ({} tokens)", query, answer.source.as_str(), answer.tokens_used);
            }
            let report = serde_json::json!({
                "budget": router.budget().status(),
                "metrics": router.metrics().snapshot(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Repl => {
            let watcher =
                router.watch_dumps(config.dumps.dir.clone(), config.dumps.refresh_interval());
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                let answer = router.route(&line).await?;
                println!("{}", serde_json::to_string(&answer)?);
            }
            watcher.abort();
        }
    }

    Ok(())
}
