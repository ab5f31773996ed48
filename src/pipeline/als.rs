use crate::error::PipelineError;
use crate::models::{Hyperparameters, SparseMatrix};
use nalgebra::{Cholesky, DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Trained latent-factor model. Immutable once fit.
#[derive(Debug, Clone)]
pub struct AlsModel {
    user_factors: DMatrix<f32>,
    item_factors: DMatrix<f32>,
    hyperparameters: Hyperparameters,
}

/// Confidence-weighted alternating least squares on implicit counts.
///
/// Convention: preference is binarized (any count > 0 means p = 1) and
/// confidence is `1 + alpha * count`. Each half-iteration solves the
/// regularized normal equations per row with the rank-sized Gram-matrix
/// trick, so the cost scales with the nonzeros, not the full matrix.
pub struct AlsTrainer;

impl AlsTrainer {
    /// Fits a model on the training matrix. Factor initialization is
    /// drawn from the provided seed so a full cycle is reproducible.
    pub fn fit(
        matrix: &SparseMatrix,
        hp: &Hyperparameters,
        seed: u64,
    ) -> Result<AlsModel, PipelineError> {
        if hp.rank == 0 {
            return Err(PipelineError::Training("rank must be positive".to_string()));
        }
        if hp.iterations == 0 {
            return Err(PipelineError::Training(
                "iterations must be positive".to_string(),
            ));
        }
        if matrix.n_rows() == 0 || matrix.n_cols() == 0 {
            return Err(PipelineError::Training(format!(
                "degenerate training matrix: {} x {}",
                matrix.n_rows(),
                matrix.n_cols()
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut user_factors = init_factors(matrix.n_rows(), hp.rank, &mut rng);
        let mut item_factors = init_factors(matrix.n_cols(), hp.rank, &mut rng);
        let transposed = matrix.transposed();

        for _ in 0..hp.iterations {
            user_factors = solve_side(matrix, &item_factors, hp);
            item_factors = solve_side(&transposed, &user_factors, hp);
        }

        Ok(AlsModel {
            user_factors,
            item_factors,
            hyperparameters: *hp,
        })
    }
}

fn init_factors(rows: usize, rank: usize, rng: &mut StdRng) -> DMatrix<f32> {
    // Small uniform init keeps the first Gram matrix well conditioned.
    DMatrix::from_fn(rows, rank, |_, _| rng.gen_range(0.0..0.1))
}

/// One ALS half-step: recomputes every row factor of one side while the
/// other side is held fixed. Rows are independent, so they solve in
/// parallel without affecting determinism.
fn solve_side(matrix: &SparseMatrix, fixed: &DMatrix<f32>, hp: &Hyperparameters) -> DMatrix<f32> {
    let rank = hp.rank;
    let gram = fixed.transpose() * fixed;
    let reg = DMatrix::<f32>::identity(rank, rank) * hp.regularization;

    let solved: Vec<DVector<f32>> = (0..matrix.n_rows())
        .into_par_iter()
        .map(|row| {
            let entries = matrix.row(row);
            if entries.is_empty() {
                // No observations: the regularized solution is zero.
                return DVector::zeros(rank);
            }
            let mut a = &gram + &reg;
            let mut b = DVector::zeros(rank);
            for &(col, count) in entries {
                let confidence = 1.0 + hp.alpha * count;
                let y = fixed.row(col).transpose();
                a += (confidence - 1.0) * (&y * y.transpose());
                b += confidence * y;
            }
            solve_system(a, &b, rank)
        })
        .collect();

    let mut out = DMatrix::zeros(matrix.n_rows(), rank);
    for (row, factor) in solved.iter().enumerate() {
        out.set_row(row, &factor.transpose());
    }
    out
}

fn solve_system(a: DMatrix<f32>, b: &DVector<f32>, rank: usize) -> DVector<f32> {
    match Cholesky::new(a.clone()) {
        Some(chol) => chol.solve(b),
        // The regularized system is positive definite in theory; fall
        // back to LU if f32 rounding breaks the factorization.
        None => a.lu().solve(b).unwrap_or_else(|| DVector::zeros(rank)),
    }
}

impl AlsModel {
    /// Assembles a model from raw factor rows, bypassing training. Used
    /// by tests and by degenerate publish paths with zero users.
    pub fn from_factors(
        user_factors: Vec<Vec<f32>>,
        item_factors: Vec<Vec<f32>>,
        hyperparameters: Hyperparameters,
    ) -> Self {
        let rank = hyperparameters.rank;
        let users = DMatrix::from_fn(user_factors.len(), rank, |r, c| user_factors[r][c]);
        let items = DMatrix::from_fn(item_factors.len(), rank, |r, c| item_factors[r][c]);
        Self {
            user_factors: users,
            item_factors: items,
            hyperparameters,
        }
    }

    pub fn n_users(&self) -> usize {
        self.user_factors.nrows()
    }

    pub fn n_items(&self) -> usize {
        self.item_factors.nrows()
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    /// Predicted affinity: dot product of the latent vectors.
    pub fn score(&self, user: usize, item: usize) -> f32 {
        self.user_factors.row(user).dot(&self.item_factors.row(item))
    }

    /// Top-N items for a user by descending score, excluding every item
    /// already observed in the given training row. Ties break by
    /// ascending item index for determinism.
    pub fn recommend(&self, user: usize, exclude: &[(usize, f32)], n: usize) -> Vec<(usize, f32)> {
        let user_vec = self.user_factors.row(user).transpose();
        let scores = &self.item_factors * user_vec;

        let mut ranked: Vec<usize> = (0..self.n_items())
            .filter(|item| exclude.binary_search_by_key(item, |&(c, _)| c).is_err())
            .collect();
        ranked.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        ranked
            .into_iter()
            .take(n)
            .map(|item| (item, scores[item]))
            .collect()
    }

    /// Weighted squared reconstruction error over observed entries plus
    /// the L2 penalty. Reported to the tracking backend per run.
    pub fn loss(&self, matrix: &SparseMatrix) -> f32 {
        let alpha = self.hyperparameters.alpha;
        let mut total = 0.0f32;
        for user in 0..matrix.n_rows() {
            for &(item, count) in matrix.row(user) {
                let confidence = 1.0 + alpha * count;
                let err = 1.0 - self.score(user, item);
                total += confidence * err * err;
            }
        }
        total
            + self.hyperparameters.regularization
                * (self.user_factors.norm_squared() + self.item_factors.norm_squared())
    }

    pub fn user_factor_rows(&self) -> Vec<Vec<f32>> {
        (0..self.n_users())
            .map(|r| self.user_factors.row(r).iter().copied().collect())
            .collect()
    }

    pub fn item_factor_rows(&self) -> Vec<Vec<f32>> {
        (0..self.n_items())
            .map(|r| self.item_factors.row(r).iter().copied().collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hp(rank: usize, iterations: usize) -> Hyperparameters {
        Hyperparameters {
            rank,
            regularization: 0.1,
            iterations,
            alpha: 10.0,
        }
    }

    fn toy_matrix() -> SparseMatrix {
        // 3 users x 4 items with two clear taste groups.
        let mut m = SparseMatrix::zeros(3, 4);
        m.add(0, 0, 3.0);
        m.add(0, 1, 2.0);
        m.add(1, 0, 1.0);
        m.add(1, 1, 4.0);
        m.add(2, 2, 5.0);
        m.add(2, 3, 2.0);
        m
    }

    #[test]
    fn rejects_invalid_hyperparameters() {
        let m = toy_matrix();
        assert!(matches!(
            AlsTrainer::fit(&m, &hp(0, 5), 1),
            Err(PipelineError::Training(_))
        ));
        assert!(AlsTrainer::fit(&m, &hp(2, 0), 1).is_err());
    }

    #[test]
    fn rejects_degenerate_matrix() {
        let empty = SparseMatrix::zeros(0, 0);
        assert!(matches!(
            AlsTrainer::fit(&empty, &hp(2, 5), 1),
            Err(PipelineError::Training(_))
        ));
        let no_items = SparseMatrix::zeros(3, 0);
        assert!(AlsTrainer::fit(&no_items, &hp(2, 5), 1).is_err());
    }

    #[test]
    fn fit_is_reproducible_for_a_fixed_seed() {
        let m = toy_matrix();
        let a = AlsTrainer::fit(&m, &hp(2, 5), 42).unwrap();
        let b = AlsTrainer::fit(&m, &hp(2, 5), 42).unwrap();
        assert_eq!(a.user_factor_rows(), b.user_factor_rows());
        assert_eq!(a.item_factor_rows(), b.item_factor_rows());
    }

    #[test]
    fn observed_items_score_above_unobserved_ones() {
        let m = toy_matrix();
        let model = AlsTrainer::fit(&m, &hp(2, 20), 7).unwrap();
        // User 2 interacted with items 2 and 3 only.
        let liked = model.score(2, 2);
        let unseen = model.score(2, 0);
        assert!(liked > unseen, "liked={} unseen={}", liked, unseen);
    }

    #[test]
    fn recommend_excludes_training_items_and_bounds_length() {
        let m = toy_matrix();
        let model = AlsTrainer::fit(&m, &hp(2, 10), 7).unwrap();
        let recs = model.recommend(0, m.row(0), 10);
        // Items 0 and 1 are in user 0's training row.
        assert!(recs.iter().all(|&(i, _)| i != 0 && i != 1));
        assert!(recs.len() <= 2);
        assert!(recs.iter().all(|&(i, _)| i < 4));
    }

    #[test]
    fn recommend_orders_by_score_then_index() {
        let model = AlsModel::from_factors(
            vec![vec![1.0, 0.0]],
            // Items 1 and 2 tie exactly; 0 scores highest.
            vec![vec![2.0, 0.0], vec![1.0, 5.0], vec![1.0, -3.0], vec![0.5, 0.0]],
            hp(2, 1),
        );
        let recs = model.recommend(0, &[], 4);
        let items: Vec<usize> = recs.iter().map(|&(i, _)| i).collect();
        assert_eq!(items, vec![0, 1, 2, 3]);
    }

    #[test]
    fn tolerates_all_zero_rows() {
        let mut m = SparseMatrix::zeros(3, 3);
        m.add(0, 0, 1.0);
        m.add(0, 1, 1.0);
        m.add(2, 2, 1.0);
        // user 1 has no training signal at all
        let model = AlsTrainer::fit(&m, &hp(2, 5), 3).unwrap();
        let recs = model.recommend(1, m.row(1), 3);
        assert_eq!(recs.len(), 3);
    }

    #[test]
    fn alpha_scales_the_confidence_weighted_loss() {
        let m = toy_matrix();
        let low = AlsModel::from_factors(
            vec![vec![0.0; 2]; 3],
            vec![vec![0.0; 2]; 4],
            Hyperparameters { alpha: 1.0, ..hp(2, 1) },
        );
        let high = AlsModel::from_factors(
            vec![vec![0.0; 2]; 3],
            vec![vec![0.0; 2]; 4],
            Hyperparameters { alpha: 50.0, ..hp(2, 1) },
        );
        // Zero factors make the per-entry error exactly 1, so the loss
        // is the summed confidence and must grow with alpha.
        assert!(high.loss(&m) > low.loss(&m));
    }
}
