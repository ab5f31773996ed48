pub mod als;
pub mod evaluate;
pub mod matrix;
pub mod publish;
pub mod scheduler;
pub mod search;
pub mod split;

use crate::error::PipelineError;
use crate::models::{Event, Hyperparameters, IndexMapping, SparseMatrix};
use als::{AlsModel, AlsTrainer};
use evaluate::GroundTruth;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

/// Everything one build -> split -> fit -> evaluate pass produces.
#[derive(Debug)]
pub struct TrainOutcome {
    pub model: AlsModel,
    pub users: IndexMapping,
    pub products: IndexMapping,
    pub train: SparseMatrix,
    pub recall_at_k: f64,
    pub training_loss: f32,
    pub skipped_events: usize,
}

/// Runs the offline half of one cycle. The single seed drives the split
/// sampling and the factor initialization, so the entire pass is
/// reproducible from (events, hyperparameters, config, seed).
pub fn run_training(
    events: &[Event],
    hp: &Hyperparameters,
    test_per_user: usize,
    eval_k: usize,
    seed: u64,
) -> Result<TrainOutcome, PipelineError> {
    let data = matrix::build(events);
    info!(
        users = data.users.len(),
        products = data.products.len(),
        interactions = data.matrix.nnz(),
        skipped = data.skipped,
        "interaction matrix built"
    );

    let mut rng = StdRng::seed_from_u64(seed);
    let split = split::split(&data.matrix, test_per_user, &mut rng);
    let fit_seed = rng.gen::<u64>();

    let model = AlsTrainer::fit(&split.train, hp, fit_seed)?;
    let training_loss = model.loss(&split.train);

    let ground_truth = GroundTruth::from_test_matrix(&split.test);
    let recall_at_k = evaluate::recall_at_k(&model, &split.train, &ground_truth, eval_k);
    info!(
        recall_at_k,
        training_loss = training_loss as f64,
        k = eval_k,
        evaluated_users = ground_truth.len(),
        "model evaluated"
    );

    Ok(TrainOutcome {
        model,
        users: data.users,
        products: data.products,
        train: split.train,
        recall_at_k,
        training_loss,
        skipped_events: data.skipped,
    })
}
