use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::core_config;

#[macro_use]
extern crate tracing;

mod api;
mod auth;
mod config;
mod errors;
mod helpers;
mod monitor;
mod reconcile;
mod scheduler;
mod state;
mod sync;
mod worker;

#[derive(Parser)]
#[command(name = "pulp-manager", version)]
struct Cli {
  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Run the control-plane API and metrics exporter (default).
  Api,
  /// Run a worker pulling jobs from the given queues.
  Worker {
    /// Worker name, defaults to the host name.
    #[arg(long)]
    name: Option<String>,
    /// Queues to watch, in priority order.
    #[arg(default_value = "default")]
    queues: Vec<String>,
  },
  /// Run the scheduler that materialises due cron jobs.
  Scheduler {
    /// Quit after one pass over the scheduled jobs.
    #[arg(short, long)]
    burst: bool,
    /// Seconds between scheduler ticks.
    #[arg(short, long, default_value_t = 60.0)]
    interval: f64,
    /// File to write the scheduler pid to.
    #[arg(long)]
    pid: Option<PathBuf>,
    /// Show more output.
    #[arg(short, long)]
    verbose: bool,
  },
}

async fn app(command: Option<Command>) -> anyhow::Result<()> {
  let config = core_config();
  info!("Pulp Manager version: v{}", env!("CARGO_PKG_VERSION"));

  state::init_db_client().await;
  state::init_queue_client().await;

  match command.unwrap_or(Command::Api) {
    Command::Api => {
      let sync_config = &config.sync_config_path;
      if sync_config.is_file() {
        if config.skip_parser_config {
          info!(
            "Skipping config parse due to PULP_MANAGER_SKIP_PARSER_CONFIG"
          );
        } else if let Err(e) =
          reconcile::config::ConfigParser::load_config(sync_config)
            .await
        {
          error!("Failed to parse the Pulp sync config | {e:#}");
        }
      } else {
        warn!(
          "Config missing at {}; no schedules updated",
          sync_config.display()
        );
      }

      monitor::spawn_metrics_server();

      let addr = format!("{}:{}", config.api.bind_ip, config.api.port);
      info!("Pulp Manager API listening on {addr}");
      let listener = tokio::net::TcpListener::bind(&addr).await?;
      axum::serve(listener, api::app()).await?;
      Ok(())
    }
    Command::Worker { name, queues } => {
      let name = name
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| String::from("pulp-manager-worker"));
      worker::run(name, queues).await
    }
    Command::Scheduler {
      burst,
      interval,
      pid,
      ..
    } => scheduler::run(interval, burst, pid).await,
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();

  let cli = Cli::parse();

  let mut log_config = core_config().logging.clone();
  if let Some(Command::Scheduler { verbose: true, .. }) = &cli.command
  {
    log_config.level =
      pulp_manager_client::entities::logger::LogLevel::Debug;
  }
  logger::init(&log_config)?;

  let mut term_signal = tokio::signal::unix::signal(
    tokio::signal::unix::SignalKind::terminate(),
  )?;

  let app = tokio::spawn(app(cli.command));

  tokio::select! {
    res = app => return res?,
    _ = term_signal.recv() => {
      info!("Received SIGTERM, shutting down");
    },
  }

  Ok(())
}
