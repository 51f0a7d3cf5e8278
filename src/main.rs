use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use remora_api::ApiState;
use remora_client::{AgentApi, ClientConfig, ServerClient};
use remora_config::AgentConfig;
use remora_executor::{Executor, ExecutorConfig};
use remora_gate::Gate;
use remora_poller::{Poller, PollerConfig};
use remora_scheduler::{Scheduler, SchedulerConfig};
use remora_store::SqliteStore;
use remora_syncer::Syncer;
use remora_task::{Task, TaskStatus};

/// Remora - claims leased tasks from a task authority and runs them locally
#[derive(Parser)]
#[command(name = "remora")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the config file (default: ./agent.json, then the user and
  /// system config directories)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the agent, and its local API, until SIGINT or SIGTERM
  Run,

  /// Run one command locally and print the resulting task as JSON
  Exec {
    /// Time limit in seconds (default: the engine's)
    #[arg(long)]
    timeout: Option<i64>,

    /// Working directory for the command
    #[arg(long)]
    workdir: Option<String>,

    /// Command and arguments; a single argument runs through the shell
    #[arg(last = true, required = true)]
    command: Vec<String>,
  },
}

fn main() -> Result<ExitCode> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let config = AgentConfig::load(cli.config.as_deref()).context("failed to load config")?;

  let rt = tokio::runtime::Runtime::new()?;
  match cli.command {
    Commands::Run => {
      rt.block_on(run_agent(config))?;
      Ok(ExitCode::SUCCESS)
    }
    Commands::Exec {
      timeout,
      workdir,
      command,
    } => rt.block_on(exec_once(config, command, timeout, workdir)),
  }
}

fn build_executor(config: &AgentConfig) -> Executor {
  Executor::new(ExecutorConfig {
    max_workers: config.max_workers,
    output_limit: config.limits.max_output_size,
    ..Default::default()
  })
  .with_gate(Gate::from_policy(&config.security))
}

async fn run_agent(config: AgentConfig) -> Result<()> {
  let store = Arc::new(
    SqliteStore::open(&config.db_path)
      .await
      .with_context(|| format!("failed to open task database: {}", config.db_path.display()))?,
  );
  let executor = Arc::new(build_executor(&config));

  let client: Option<Arc<dyn AgentApi>> = if config.server_configured() {
    let mut client_config = ClientConfig::new(
      &config.server.url,
      &config.server.agent_id,
      &config.server.machine_id,
    );
    client_config.token = Some(config.server.token.clone()).filter(|t| !t.is_empty());
    client_config.timeout = config.server.timeout();
    let client = ServerClient::new(client_config).context("failed to create server client")?;
    Some(Arc::new(client))
  } else {
    info!("no server configured, running local tasks only");
    None
  };

  let scheduler = Arc::new(Scheduler::new(
    executor,
    store.clone(),
    client.clone(),
    SchedulerConfig {
      renew_interval: config.lease.renew_interval(),
      ..Default::default()
    },
  ));
  scheduler
    .start()
    .await
    .context("failed to start scheduler")?;

  let api = if config.api.enabled() {
    let addr = config.api.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
      .await
      .with_context(|| format!("failed to bind local api on {addr}"))?;
    let shutdown = CancellationToken::new();
    let state = ApiState {
      scheduler: scheduler.clone(),
      store: store.clone(),
    };
    let handle = tokio::spawn(remora_api::serve(listener, state, shutdown.clone()));
    Some((shutdown, handle))
  } else {
    info!("local api disabled");
    None
  };

  let workers = client.map(|client| {
    let poller = Poller::new(
      client.clone(),
      scheduler.clone(),
      PollerConfig {
        interval: config.poll.interval(),
        batch_size: config.poll.batch_size,
      },
    );
    let syncer = Syncer::new(store.clone(), client, config.sync.interval());
    poller.start();
    syncer.start();
    (poller, syncer)
  });

  info!(
    agent_id = %config.server.agent_id,
    max_workers = config.max_workers,
    "agent running"
  );
  wait_for_shutdown().await?;
  info!("shutting down");

  // No new local submissions once shutdown begins.
  if let Some((shutdown, handle)) = api {
    shutdown.cancel();
    match handle.await {
      Ok(Ok(())) => {}
      Ok(Err(e)) => error!(error = %e, "local api failed"),
      Err(e) => error!(error = %e, "local api panicked"),
    }
  }
  if let Some((poller, syncer)) = workers {
    poller.stop().await;
    syncer.stop().await;
  }
  scheduler.stop().await;
  Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
  let mut terminate =
    signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
  tokio::select! {
    result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl-c")?,
    _ = terminate.recv() => {}
  }
  Ok(())
}

async fn exec_once(
  config: AgentConfig,
  command: Vec<String>,
  timeout: Option<i64>,
  workdir: Option<String>,
) -> Result<ExitCode> {
  let mut argv = command.into_iter();
  let program = argv.next().context("no command given")?;

  let mut task = Task::new(format!("exec-{}", uuid::Uuid::new_v4()), program).with_args(argv);
  if let Some(seconds) = timeout {
    task = task.with_timeout(seconds);
  }
  if let Some(dir) = workdir {
    task = task.with_workdir(dir);
  }

  let executor = build_executor(&config);
  let task_id = task.id.clone();
  {
    let run = executor.execute(&mut task);
    tokio::pin!(run);

    // Forward ctrl-c as a cancellation so the process group is cleaned up.
    tokio::select! {
      _ = &mut run => {}
      _ = tokio::signal::ctrl_c() => {
        executor.cancel(&task_id);
        run.await;
      }
    }
  }

  println!("{}", serde_json::to_string_pretty(&task)?);
  Ok(match task.status {
    TaskStatus::Completed => ExitCode::SUCCESS,
    _ => ExitCode::FAILURE,
  })
}
