use alspipe::models::TrainingRunRecord;
use alspipe::pipeline::{self, publish, scheduler::RetrainScheduler, search};
use alspipe::services::ingest::{self, KafkaEventSource};
use alspipe::{init_tracing, Config, PipelineContext};
use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train once on a persisted event snapshot and publish the result.
    Train {
        /// Dataset prefix under the data directory.
        #[arg(short, long)]
        prefix: String,

        #[arg(long)]
        rank: Option<usize>,

        #[arg(long)]
        regularization: Option<f32>,

        #[arg(long)]
        iterations: Option<usize>,

        #[arg(long)]
        alpha: Option<f32>,
    },
    /// Run the periodic retraining loop until interrupted.
    Schedule {
        /// Seconds between cycles; overrides the config value.
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Random hyperparameter search over a persisted snapshot.
    Search {
        #[arg(short, long)]
        prefix: String,

        #[arg(short, long, default_value_t = 20)]
        trials: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    std::env::set_var("RUST_LOG", &cli.log_level);
    init_tracing();

    let config = if std::path::Path::new(&cli.config).exists() {
        Config::from_file(&cli.config)?
    } else {
        info!("config file not found, using default configuration");
        Config::default()
    };

    match cli.command {
        Command::Train {
            prefix,
            rank,
            regularization,
            iterations,
            alpha,
        } => {
            let mut config = config;
            if let Some(rank) = rank {
                config.training.rank = rank;
            }
            if let Some(reg) = regularization {
                config.training.regularization = reg;
            }
            if let Some(iters) = iterations {
                config.training.iterations = iters;
            }
            if let Some(alpha) = alpha {
                config.training.alpha = alpha;
            }
            train_once(config, &prefix).await
        }
        Command::Schedule { interval } => {
            let mut config = config;
            if let Some(interval) = interval {
                config.scheduler.interval_secs = interval;
            }
            schedule_forever(config).await
        }
        Command::Search { prefix, trials } => run_search(config, &prefix, trials).await,
    }
}

async fn train_once(config: Config, prefix: &str) -> Result<()> {
    let ctx = PipelineContext::new(config).await?;
    let events = ingest::load_snapshot(&ctx.config.data.dir, prefix)?;
    info!(prefix, events = events.len(), "training from snapshot");

    let outcome = pipeline::run_training(
        &events,
        &ctx.config.hyperparameters(),
        ctx.config.training.test_per_user,
        ctx.config.training.eval_k,
        ctx.config.training.seed,
    )?;

    let report = publish::publish(
        &outcome.model,
        &outcome.users,
        &outcome.products,
        &outcome.train,
        &ctx.config.publish,
        ctx.config.redis.ttl_seconds,
        ctx.cache.as_ref(),
    )
    .await;

    let record = TrainingRunRecord {
        run_id: Uuid::new_v4(),
        dataset_prefix: prefix.to_string(),
        hyperparameters: ctx.config.hyperparameters(),
        recall_at_k: outcome.recall_at_k,
        training_loss: outcome.training_loss,
        n_users: outcome.users.len(),
        n_products: outcome.products.len(),
        user_factors: outcome.model.user_factor_rows(),
        item_factors: outcome.model.item_factor_rows(),
        created_at: Utc::now(),
    };
    ctx.tracking.log_run(&record).await?;

    info!(
        recall_at_k = outcome.recall_at_k,
        published = report.published,
        failed = report.failures.len(),
        "training run complete"
    );
    Ok(())
}

async fn schedule_forever(config: Config) -> Result<()> {
    let ctx = PipelineContext::new(config).await?;
    let source = Arc::new(KafkaEventSource::new(&ctx.config.kafka)?);
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut scheduler = RetrainScheduler::new(
        ctx.config.clone(),
        source,
        ctx.cache.clone(),
        ctx.tracking.clone(),
        stop_rx,
    );

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop signal received");
            let _ = stop_tx.send(true);
        }
    });

    info!(
        interval_secs = ctx.config.scheduler.interval_secs,
        "retraining scheduler starting"
    );
    scheduler.run().await;
    Ok(())
}

async fn run_search(config: Config, prefix: &str, trials: usize) -> Result<()> {
    let ctx = PipelineContext::new(config).await?;
    let events = ingest::load_snapshot(&ctx.config.data.dir, prefix)?;

    let best = search::search(
        &events,
        prefix,
        trials,
        &search::Grids::default(),
        ctx.config.training.test_per_user,
        ctx.config.training.eval_k,
        ctx.config.training.seed,
        ctx.tracking.as_ref(),
    )
    .await;

    match best {
        Some(best) => {
            println!(
                "best trial {}: recall@{} = {:.4} with rank={} regularization={} iterations={} alpha={}",
                best.trial,
                ctx.config.training.eval_k,
                best.recall_at_k,
                best.hyperparameters.rank,
                best.hyperparameters.regularization,
                best.hyperparameters.iterations,
                best.hyperparameters.alpha,
            );
            Ok(())
        }
        None => anyhow::bail!("no search trial succeeded"),
    }
}
