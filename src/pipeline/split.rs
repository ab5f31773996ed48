use crate::models::{SparseMatrix, Split};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Leave-N-out holdout split.
///
/// Per user row: an empty row stays empty in both outputs; a row with at
/// most `test_per_user` nonzeros moves entirely to the test matrix (the
/// user contributes no training signal at all); otherwise exactly
/// `test_per_user` entries are sampled without replacement into the test
/// matrix. The outputs are an exact partition of each row's nonzeros.
///
/// Fully deterministic for a fixed (matrix, test_per_user, rng seed):
/// the generator is threaded explicitly, never pulled from global state.
pub fn split(matrix: &SparseMatrix, test_per_user: usize, rng: &mut StdRng) -> Split {
    let mut train = SparseMatrix::zeros(matrix.n_rows(), matrix.n_cols());
    let mut test = SparseMatrix::zeros(matrix.n_rows(), matrix.n_cols());

    for user in 0..matrix.n_rows() {
        let entries = matrix.row(user);
        if entries.is_empty() {
            continue;
        }
        if entries.len() <= test_per_user {
            for &(col, value) in entries {
                test.add(user, col, value);
            }
            continue;
        }

        let mut positions: Vec<usize> = (0..entries.len()).collect();
        positions.shuffle(rng);
        positions.truncate(test_per_user);
        positions.sort_unstable();

        let mut held = positions.iter().copied().peekable();
        for (pos, &(col, value)) in entries.iter().enumerate() {
            if held.peek() == Some(&pos) {
                held.next();
                test.add(user, col, value);
            } else {
                train.add(user, col, value);
            }
        }
    }

    Split { train, test }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn sample_matrix() -> SparseMatrix {
        let mut m = SparseMatrix::zeros(3, 5);
        for col in 0..5 {
            m.add(0, col, (col + 1) as f32);
        }
        m.add(1, 2, 1.0);
        // row 2 left empty
        m
    }

    fn nonzero_cols(m: &SparseMatrix, row: usize) -> HashSet<usize> {
        m.row(row).iter().map(|&(c, _)| c).collect()
    }

    #[test]
    fn partition_is_exact_for_every_user() {
        let matrix = sample_matrix();
        let mut rng = StdRng::seed_from_u64(7);
        let split = split(&matrix, 2, &mut rng);

        for user in 0..matrix.n_rows() {
            let train = nonzero_cols(&split.train, user);
            let test = nonzero_cols(&split.test, user);
            let all = nonzero_cols(&matrix, user);
            assert!(train.is_disjoint(&test), "overlap for user {}", user);
            let union: HashSet<_> = train.union(&test).copied().collect();
            assert_eq!(union, all, "union mismatch for user {}", user);
            // Held-out values are carried over unchanged.
            for &(c, v) in split.test.row(user) {
                assert_eq!(v, matrix.get(user, c));
            }
        }
        assert_eq!(split.test.row(0).len(), 2);
        assert_eq!(split.train.row(0).len(), 3);
    }

    #[test]
    fn same_seed_reproduces_identical_split() {
        let matrix = sample_matrix();
        let a = split(&matrix, 2, &mut StdRng::seed_from_u64(42));
        let b = split(&matrix, 2, &mut StdRng::seed_from_u64(42));
        assert_eq!(a.train, b.train);
        assert_eq!(a.test, b.test);
    }

    #[test]
    fn user_with_too_few_interactions_is_fully_held_out() {
        let matrix = sample_matrix();
        let mut rng = StdRng::seed_from_u64(1);
        let split = split(&matrix, 1, &mut rng);
        // user 1 has exactly one interaction and test_per_user = 1
        assert!(split.train.row(1).is_empty());
        assert_eq!(split.test.row(1), &[(2, 1.0)]);
    }

    #[test]
    fn empty_row_stays_empty_in_both_outputs() {
        let matrix = sample_matrix();
        let mut rng = StdRng::seed_from_u64(1);
        let split = split(&matrix, 1, &mut rng);
        assert!(split.train.row(2).is_empty());
        assert!(split.test.row(2).is_empty());
    }

    #[test]
    fn zero_test_per_user_keeps_everything_in_train() {
        let matrix = sample_matrix();
        let mut rng = StdRng::seed_from_u64(1);
        let split = split(&matrix, 0, &mut rng);
        assert_eq!(split.train, matrix);
        assert_eq!(split.test.nnz(), 0);
    }
}
