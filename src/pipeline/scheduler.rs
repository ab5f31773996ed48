use crate::config::Config;
use crate::error::{PipelineError, Stage};
use crate::models::TrainingRunRecord;
use crate::pipeline::{self, publish};
use crate::services::cache::CacheStore;
use crate::services::ingest::{self, EventSource};
use crate::services::tracking::TrackingBackend;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How one cycle ended: normally, or cut short by shutdown.
enum CycleEnd {
    Completed,
    Stopped,
}

/// Periodic retraining control loop.
///
/// Each cycle runs ingest -> build -> split -> train -> evaluate ->
/// publish in a fixed order. A stage failure aborts the current cycle
/// only; the loop logs the stage and cause, sleeps, and retries from
/// ingestion. The loop never terminates on data or training errors,
/// only on the external stop signal, which is honored at the two
/// suspension points (the ingest poll and the inter-cycle sleep).
pub struct RetrainScheduler {
    config: Arc<Config>,
    source: Arc<dyn EventSource>,
    cache: Arc<dyn CacheStore>,
    tracking: Arc<dyn TrackingBackend>,
    stop: watch::Receiver<bool>,
    state: Stage,
}

impl RetrainScheduler {
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn EventSource>,
        cache: Arc<dyn CacheStore>,
        tracking: Arc<dyn TrackingBackend>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            source,
            cache,
            tracking,
            stop,
            state: Stage::Idle,
        }
    }

    /// Current stage, for observability.
    pub fn stage(&self) -> Stage {
        self.state
    }

    fn enter(&mut self, stage: Stage) {
        self.state = stage;
        info!(stage = %stage, "scheduler stage");
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// True when the stop flag is set or every sender is gone. A closed
    /// channel means no one can signal us anymore, so it reads as stop.
    fn stop_observed(&self, changed: Result<(), watch::error::RecvError>) -> bool {
        changed.is_err() || self.stopped()
    }

    pub async fn run(&mut self) {
        let interval = Duration::from_secs(self.config.scheduler.interval_secs);
        let mut cycle = 0u64;

        loop {
            if self.stopped() {
                break;
            }

            let prefix = Utc::now().format("%Y-%m-%d/%H-%M-%S").to_string();
            match self.run_cycle(&prefix, cycle).await {
                Ok(CycleEnd::Completed) => info!(cycle, prefix = %prefix, "cycle completed"),
                Ok(CycleEnd::Stopped) => break,
                Err((stage, e)) => {
                    error!(cycle, stage = %stage, error = %e, "cycle aborted")
                }
            }
            cycle += 1;

            self.enter(Stage::Sleeping);
            let mut stop = self.stop.clone();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = stop.changed() => {
                    if self.stop_observed(changed) {
                        break;
                    }
                }
            }
        }

        info!("scheduler stopped");
    }

    /// One full cycle. Errors carry the stage they occurred in; the
    /// publish of recommendations and metadata happens inside the single
    /// Publishing stage so cache readers observe one cycle's output.
    async fn run_cycle(
        &mut self,
        prefix: &str,
        cycle: u64,
    ) -> Result<CycleEnd, (Stage, PipelineError)> {
        self.enter(Stage::Ingesting);
        let mut stop = self.stop.clone();
        let events = loop {
            tokio::select! {
                batch = self.source.next_batch() => {
                    break batch.map_err(|e| (Stage::Ingesting, e))?;
                }
                changed = stop.changed() => {
                    if self.stop_observed(changed) {
                        // Discard the in-flight poll and shut down cleanly.
                        return Ok(CycleEnd::Stopped);
                    }
                }
            }
        };
        if self.stopped() {
            return Ok(CycleEnd::Stopped);
        }
        info!(events = events.len(), "ingestion finished");

        // The per-cycle seed varies so holdouts rotate while every cycle
        // stays reproducible from the base seed and its counter.
        let seed = self.config.training.seed.wrapping_add(cycle);
        let hp = self.config.hyperparameters();

        self.enter(Stage::Building);
        let data = pipeline::matrix::build(&events);
        if let Err(e) = ingest::write_snapshot(
            &self.config.data.dir,
            prefix,
            &events,
            &data.users,
            &data.products,
        ) {
            // Snapshot loss does not invalidate the trained model.
            warn!(error = %e, "snapshot persistence failed");
        }

        self.enter(Stage::Splitting);
        let mut rng = StdRng::seed_from_u64(seed);
        let split =
            pipeline::split::split(&data.matrix, self.config.training.test_per_user, &mut rng);
        let fit_seed = rng.gen::<u64>();

        self.enter(Stage::Training);
        let model = pipeline::als::AlsTrainer::fit(&split.train, &hp, fit_seed)
            .map_err(|e| (Stage::Training, e))?;
        let training_loss = model.loss(&split.train);

        self.enter(Stage::Evaluating);
        let ground_truth = pipeline::evaluate::GroundTruth::from_test_matrix(&split.test);
        let recall_at_k = pipeline::evaluate::recall_at_k(
            &model,
            &split.train,
            &ground_truth,
            self.config.training.eval_k,
        );
        info!(recall_at_k, training_loss = training_loss as f64, "cycle evaluation");

        self.enter(Stage::Publishing);
        let report = publish::publish(
            &model,
            &data.users,
            &data.products,
            &split.train,
            &self.config.publish,
            self.config.redis.ttl_seconds,
            self.cache.as_ref(),
        )
        .await;
        if !report.failures.is_empty() {
            warn!(failed = report.failures.len(), "partial publish failures");
        }

        let record = TrainingRunRecord {
            run_id: Uuid::new_v4(),
            dataset_prefix: prefix.to_string(),
            hyperparameters: hp,
            recall_at_k,
            training_loss,
            n_users: data.users.len(),
            n_products: data.products.len(),
            user_factors: model.user_factor_rows(),
            item_factors: model.item_factor_rows(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.tracking.log_run(&record).await {
            // Tracking unavailability never fails a cycle.
            warn!(error = %e, "tracking write failed");
        }

        Ok(CycleEnd::Completed)
    }
}
