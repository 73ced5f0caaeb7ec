use std::io::Write as _;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use learnpulse::api::{AnalyticsApi, AnalyticsSource, ApiError};
use learnpulse::config::{ConfigError, LiveConfig, parse_channels};
use learnpulse::transport::WsConnector;
use learnpulse::{DashboardView, ViewError, bootstrap, render};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    View(#[from] ViewError),
    #[error("could not serialize snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not install signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "learnpulse", about = "Live LMS analytics dashboard")]
struct Cli {
    #[arg(long, env = "LEARNPULSE_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "LEARNPULSE_USER_ID")]
    user_id: Option<String>,

    #[arg(long, env = "LEARNPULSE_ROLE")]
    role: Option<String>,

    /// Comma-separated channel list.
    #[arg(long, env = "LEARNPULSE_CHANNELS")]
    channels: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mount the dashboard and redraw on every update until Ctrl-C.
    Watch,
    /// Load the initial state once and print it as JSON.
    Snapshot,
    /// Check the analytics service health endpoint.
    Ping,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("learnpulse=info,wire=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = LiveConfig::from_env();
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(user_id) = cli.user_id {
        config.user_id = user_id;
    }
    if let Some(role) = cli.role {
        config.role = role;
    }
    if let Some(channels) = cli.channels {
        config.channels = parse_channels(&channels);
    }
    config.validate()?;

    let api = AnalyticsApi::new(config.api_base(), config.request_timeout)?;
    match cli.command {
        Command::Watch => run_watch(&config, api).await,
        Command::Snapshot => run_snapshot(&config, &api).await,
        Command::Ping => run_ping(&api).await,
    }
}

async fn run_watch(config: &LiveConfig, api: AnalyticsApi) -> Result<(), CliError> {
    let view = match DashboardView::mount(config, Arc::new(WsConnector), Arc::new(api)).await {
        Ok(view) => view,
        Err(ViewError::Bootstrap(e)) => {
            eprint!("{}", render::render_bootstrap_error(&e));
            return Err(ViewError::Bootstrap(e).into());
        }
        Err(e) => return Err(e.into()),
    };

    let mut snapshots = view.watch();
    draw(&render::render_dashboard(&view.current_snapshot()));
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                draw(&render::render_dashboard(&snapshot));
            }
        }
    }

    view.unmount().await;
    Ok(())
}

async fn run_snapshot(config: &LiveConfig, api: &AnalyticsApi) -> Result<(), CliError> {
    let seed = bootstrap::load(api, &config.engagement_timeframe)
        .await
        .map_err(ViewError::from)?;
    let mut metrics = learnpulse::aggregator::LiveMetrics::new(config.limits());
    metrics.seed(seed);
    println!("{}", serde_json::to_string_pretty(&metrics.snapshot())?);
    Ok(())
}

async fn run_ping(api: &AnalyticsApi) -> Result<(), CliError> {
    let report = api.health().await?;
    match report.version {
        Some(version) => println!("{} ({version})", report.status),
        None => println!("{}", report.status),
    }
    Ok(())
}

fn draw(frame: &str) {
    // Clear screen and home the cursor before each redraw.
    let mut stdout = std::io::stdout().lock();
    let _ = write!(stdout, "\x1b[2J\x1b[H{frame}");
    let _ = stdout.flush();
}
