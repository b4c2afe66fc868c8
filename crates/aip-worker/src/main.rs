// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! aip provisioning worker binary.

use std::path::PathBuf;
use std::sync::Arc;

use aip_worker_config::{LogFormat, LoggingConfig, WorkerConfig};
use aip_worker_db::RunRepository;
use aip_worker_jobs::{
	RedisJobQueue, StsCredentialBroker, TerraformProvisioner, WorkerDeps, WorkerPool,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod version;

/// aip-worker - consumes provisioning jobs and drives terraform.
#[derive(Parser, Debug)]
#[command(name = "aip-worker", about = "aip provisioning job worker", version)]
struct Args {
	/// Config file to load instead of /etc/aip/worker.toml
	#[arg(long, env = "AIP_WORKER_CONFIG")]
	config: Option<PathBuf>,

	/// Number of concurrent consumers (overrides worker.concurrency)
	#[arg(long)]
	concurrency: Option<usize>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Consume jobs until interrupted (default)
	Run,
	/// Show version and build information
	Version,
	/// Load configuration, print the resolved values and exit
	CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	dotenvy::dotenv().ok();

	// Tracing is configured by the file being loaded; until then events go
	// to stderr through a scoped subscriber.
	let bootstrap = bootstrap_subscriber(default_filter("info"), std::io::stderr);
	let config = tracing::subscriber::with_default(bootstrap, || load_config(&args))?;

	if let Some(Command::CheckConfig) = args.command {
		println!("{}", format_config(&config));
		return Ok(());
	}

	init_tracing(&config.logging);
	run(config).await
}

fn load_config(args: &Args) -> anyhow::Result<WorkerConfig> {
	let mut config = match &args.config {
		Some(path) => aip_worker_config::load_config_with_file(path)
			.with_context(|| format!("loading config from {}", path.display()))?,
		None => aip_worker_config::load_config().context("loading config")?,
	};

	if let Some(concurrency) = args.concurrency {
		anyhow::ensure!(concurrency >= 1, "--concurrency must be at least 1");
		config.worker.concurrency = concurrency;
	}

	Ok(config)
}

fn default_filter(level: &str) -> EnvFilter {
	EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn bootstrap_subscriber<W>(
	filter: EnvFilter,
	make_writer: W,
) -> impl tracing::Subscriber + Send + Sync
where
	W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
	tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer().with_writer(make_writer))
}

fn init_tracing(logging: &LoggingConfig) {
	let filter = default_filter(&logging.level);

	match logging.format {
		LogFormat::Json => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().json())
				.init();
		}
		LogFormat::Pretty => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer())
				.init();
		}
	}
}

async fn run(config: WorkerConfig) -> anyhow::Result<()> {
	tracing::info!(
		version = env!("CARGO_PKG_VERSION"),
		concurrency = config.worker.concurrency,
		"starting aip-worker"
	);

	let pool = aip_worker_db::create_pool(&config.database.url)
		.await
		.context("opening database")?;
	let store = Arc::new(RunRepository::new(pool));

	let queue = RedisJobQueue::connect(&config.queue.redis_url, config.queue.key.clone())
		.await
		.context("connecting to redis")?;
	queue.ping().await.context("redis ping failed")?;

	let credentials = StsCredentialBroker::from_env(config.aws.clone()).await;
	let provisioner = TerraformProvisioner::new(config.provisioner.binary.clone());

	let deps = WorkerDeps::new(
		&config,
		Arc::new(queue),
		Arc::new(credentials),
		Arc::new(provisioner),
		store,
	);
	let workers = WorkerPool::new(deps, config.worker.concurrency);
	workers.start().await;

	tracing::info!(queue = %config.queue.key, "worker listening on queue");

	shutdown_signal().await;
	tracing::info!("Received shutdown signal, waiting for in-flight jobs");
	workers.shutdown().await;

	tracing::info!("Worker shutdown complete");
	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::error!(error = %e, "failed to listen for Ctrl-C");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		use tokio::signal::unix::{signal, SignalKind};
		match signal(SignalKind::terminate()) {
			Ok(mut sigterm) => {
				sigterm.recv().await;
			}
			Err(e) => {
				tracing::error!(error = %e, "failed to register SIGTERM handler");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {}
		_ = terminate => {}
	}
}

/// Resolved configuration for `check-config`. Credentials in the Redis URL
/// are masked.
fn format_config(config: &WorkerConfig) -> String {
	let templates = config
		.provisioner
		.templates
		.iter()
		.map(|(key, dir)| format!("{key}={}", dir.display()))
		.collect::<Vec<_>>()
		.join(", ");

	format!(
		"database.url:                   {}\n\
         queue.redis_url:                {}\n\
         queue.key:                      {}\n\
         queue.pop_timeout_secs:         {}\n\
         queue.error_backoff_ms:         {}\n\
         worker.concurrency:             {}\n\
         worker.store_timeout_secs:      {}\n\
         provisioner.binary:             {}\n\
         provisioner.modules_root:       {}\n\
         provisioner.templates:          {}\n\
         provisioner.plan_timeout_secs:  {}\n\
         provisioner.apply_timeout_secs: {}\n\
         provisioner.output_timeout_secs: {}\n\
         aws.default_region:             {}\n\
         aws.session_duration_secs:      {}\n\
         aws.session_name_prefix:        {}\n\
         logging.level:                  {}\n\
         logging.format:                 {:?}",
		config.database.url,
		config.queue.redacted_redis_url(),
		config.queue.key,
		config.queue.pop_timeout_secs,
		config.queue.error_backoff_ms,
		config.worker.concurrency,
		config.worker.store_timeout_secs,
		config.provisioner.binary,
		config.provisioner.modules_root.display(),
		templates,
		config.provisioner.plan_timeout_secs,
		config.provisioner.apply_timeout_secs,
		config.provisioner.output_timeout_secs,
		config.aws.default_region,
		config.aws.session_duration_secs,
		config.aws.session_name_prefix,
		config.logging.level,
		config.logging.format,
	)
}
