use crate::models::SparseMatrix;
use crate::pipeline::als::AlsModel;
use std::collections::HashMap;

/// Held-out items per user index, derived from the test matrix. Only
/// users with at least one held-out interaction appear.
#[derive(Debug, Clone, Default)]
pub struct GroundTruth {
    held: HashMap<usize, Vec<usize>>,
}

impl GroundTruth {
    pub fn from_test_matrix(test: &SparseMatrix) -> Self {
        let mut held = HashMap::new();
        for user in 0..test.n_rows() {
            let items: Vec<usize> = test.row(user).iter().map(|&(c, _)| c).collect();
            if !items.is_empty() {
                held.insert(user, items);
            }
        }
        Self { held }
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&usize, &Vec<usize>)> {
        self.held.iter()
    }
}

/// Recall@K over the held-out partition.
///
/// A user counts as a hit when any of their held-out item indices appears
/// in the top-k recommendations computed with the training row excluded.
/// The comparison is on bare item indices. Users with an empty training
/// row cannot be scored meaningfully and are excluded from the
/// denominator; an empty ground truth yields 0.0 rather than a division
/// error.
pub fn recall_at_k(
    model: &AlsModel,
    train: &SparseMatrix,
    ground_truth: &GroundTruth,
    k: usize,
) -> f64 {
    if ground_truth.is_empty() {
        return 0.0;
    }

    let mut evaluated = 0usize;
    let mut hits = 0usize;

    for (&user, held_items) in ground_truth.iter() {
        if train.row(user).is_empty() {
            continue;
        }
        evaluated += 1;
        let recs = model.recommend(user, train.row(user), k);
        if held_items
            .iter()
            .any(|held| recs.iter().any(|&(item, _)| item == *held))
        {
            hits += 1;
        }
    }

    if evaluated == 0 {
        return 0.0;
    }
    hits as f64 / evaluated as f64
}
