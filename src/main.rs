mod commands;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use todo_sync::config::Config;
use todo_sync::App;

#[derive(Parser, Debug)]
#[command(name = "todo-sync")]
#[command(about = "Command-line client for the todo API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/todo-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// API root, overriding the config file
  #[arg(long)]
  api_url: Option<String>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(url) = args.api_url {
    config.api.url = url;
  }

  let _guard = init_logging(&config)?;

  let app = App::init(&config)?;
  let result = commands::run(&app, args.command).await;
  app.teardown();

  result
}

/// Log to a daily-rolling file so terminal output stays clean.
fn init_logging(config: &Config) -> Result<WorkerGuard> {
  let dir = config.log_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, "todo-sync.log"));

  let level = config.log.level.as_deref().unwrap_or("info");
  let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false),
    )
    .init();

  Ok(guard)
}
