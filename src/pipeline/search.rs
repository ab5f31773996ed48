use crate::models::{BestResult, Event, Hyperparameters, TrainingRunRecord};
use crate::pipeline;
use crate::services::tracking::TrackingBackend;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};
use uuid::Uuid;

/// Discrete hyperparameter grids sampled by the search.
#[derive(Debug, Clone)]
pub struct Grids {
    pub rank: Vec<usize>,
    pub regularization: Vec<f32>,
    pub iterations: Vec<usize>,
    pub alpha: Vec<f32>,
}

impl Default for Grids {
    fn default() -> Self {
        Self {
            rank: vec![16, 32, 50, 64],
            regularization: vec![0.01, 0.1, 1.0],
            iterations: vec![10, 15, 20],
            alpha: vec![1.0, 10.0, 40.0],
        }
    }
}

impl Grids {
    fn sample(&self, rng: &mut StdRng) -> Hyperparameters {
        Hyperparameters {
            rank: self.rank[rng.gen_range(0..self.rank.len())],
            regularization: self.regularization[rng.gen_range(0..self.regularization.len())],
            iterations: self.iterations[rng.gen_range(0..self.iterations.len())],
            alpha: self.alpha[rng.gen_range(0..self.alpha.len())],
        }
    }
}

/// Random search over the grids: `trials` independent repetitions of the
/// build -> split -> fit -> evaluate cycle on the same events, each with
/// a freshly sampled combination. Every trial is reported to the
/// tracking backend, and the best observed recall@K is retained and
/// returned rather than only logged. Failed trials are skipped.
///
/// Returns `None` only when every trial failed or `trials` is zero.
pub async fn search(
    events: &[Event],
    dataset_prefix: &str,
    trials: usize,
    grids: &Grids,
    test_per_user: usize,
    eval_k: usize,
    seed: u64,
    tracking: &dyn TrackingBackend,
) -> Option<BestResult> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut best: Option<BestResult> = None;

    for trial in 0..trials {
        let hp = grids.sample(&mut rng);
        let trial_seed = rng.gen::<u64>();
        info!(trial, ?hp, "search trial starting");

        let outcome = match pipeline::run_training(events, &hp, test_per_user, eval_k, trial_seed)
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(trial, error = %e, "search trial failed");
                continue;
            }
        };

        let record = TrainingRunRecord {
            run_id: Uuid::new_v4(),
            dataset_prefix: dataset_prefix.to_string(),
            hyperparameters: hp,
            recall_at_k: outcome.recall_at_k,
            training_loss: outcome.training_loss,
            n_users: outcome.users.len(),
            n_products: outcome.products.len(),
            user_factors: outcome.model.user_factor_rows(),
            item_factors: outcome.model.item_factor_rows(),
            created_at: Utc::now(),
        };
        if let Err(e) = tracking.log_run(&record).await {
            warn!(trial, error = %e, "tracking write failed");
        }

        let is_better = best
            .as_ref()
            .map(|b| outcome.recall_at_k > b.recall_at_k)
            .unwrap_or(true);
        if is_better {
            best = Some(BestResult {
                hyperparameters: hp,
                recall_at_k: outcome.recall_at_k,
                trial,
            });
        }
    }

    if let Some(ref b) = best {
        info!(
            trial = b.trial,
            recall_at_k = b.recall_at_k,
            hyperparameters = ?b.hyperparameters,
            "search finished"
        );
    }
    best
}
