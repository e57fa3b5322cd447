mod cli;
mod config;
mod job;
mod sink;
mod source;
mod trend;

use crate::cli::{Cli, Commands};
use crate::config::{Config, SinkConfig};
use crate::job::{JobError, RunOutcome};
use crate::sink::{DryRunSink, EstimateSink, HomeAssistantSink};
use crate::source::RecorderDb;
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,battery_trend=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

struct Estimator {
    config: Config,
    source: RecorderDb,
    sink: Box<dyn EstimateSink + Send + Sync>,
}

impl Estimator {
    fn new(config: Config) -> Result<Self> {
        let source = RecorderDb::new(config.db_path.clone(), config.db_timeout);
        let sink: Box<dyn EstimateSink + Send + Sync> = match &config.sink {
            SinkConfig::HomeAssistant {
                base_url,
                token,
                entity_id,
                timeout,
            } => Box::new(HomeAssistantSink::new(
                base_url,
                token.clone(),
                entity_id.clone(),
                *timeout,
            )?),
            SinkConfig::DryRun => Box::new(DryRunSink),
        };
        Ok(Self {
            config,
            source,
            sink,
        })
    }

    fn run_once(&self) -> Result<RunOutcome, JobError> {
        let outcome = job::run_once(&self.config, &self.source, self.sink.as_ref())?;
        if self.config.print_json {
            match serde_json::to_string(&outcome) {
                Ok(json) => println!("{json}"),
                Err(err) => tracing::warn!(error=%err, "failed to encode trend report"),
            }
        }
        Ok(outcome)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    match cli.command {
        Commands::Run(args) => {
            let estimator = Estimator::new(Config::from_args(args)?)?;
            tracing::debug!(db = %estimator.source.path().display(), "running single estimate");
            estimator.run_once().context("battery trend estimate failed")?;
            Ok(())
        }
        Commands::Schedule(args) => {
            if args.interval_secs == 0 {
                return Err(anyhow!("--interval-secs must be at least 1"));
            }
            let interval = Duration::from_secs(args.interval_secs);
            // The blocking HTTP client must be dropped outside the runtime, so main
            // keeps a handle until block_on returns.
            let estimator = Arc::new(Estimator::new(Config::from_args(args.run)?)?);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let result = runtime.block_on(schedule(estimator.clone(), interval));
            drop(runtime);
            result
        }
    }
}

/// Runs the estimator on `interval` until Ctrl-C. Only sink failures stop the loop.
async fn schedule(estimator: Arc<Estimator>, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(interval_secs = interval.as_secs(), "battery trend schedule started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                return Ok(());
            }
            _ = ticker.tick() => {
                let worker = estimator.clone();
                let result = tokio::task::spawn_blocking(move || worker.run_once())
                    .await
                    .context("estimator task panicked")?;
                match result {
                    Ok(_) => {}
                    Err(err) if err.is_fatal() => {
                        tracing::error!(error=%err, "battery trend estimate failed; exiting");
                        return Err(anyhow!(err));
                    }
                    Err(err) => {
                        tracing::warn!(error=%err, "battery trend tick failed");
                    }
                }
            }
        }
    }
}
