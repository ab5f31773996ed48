use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A raw interaction event as produced by the storefront tracker.
///
/// The wire format uses `event` for the event type; older producers sent
/// `eventType`, so both spellings are accepted on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub user_id: String,
    pub product_id: String,
    #[serde(rename = "event", alias = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl Event {
    pub fn new(user_id: &str, product_id: &str, event_type: &str, timestamp: i64) -> Self {
        Self {
            user_id: user_id.to_string(),
            product_id: product_id.to_string(),
            event_type: event_type.to_string(),
            timestamp,
        }
    }

    /// Structural validity: both identifiers must be present. Invalid
    /// events are skipped and counted, never fatal for the batch.
    pub fn is_valid(&self) -> bool {
        !self.user_id.is_empty() && !self.product_id.is_empty()
    }
}

/// Bijection between raw identifiers and dense zero-based indices,
/// assigned in first-seen order. Built fresh per training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexMapping {
    forward: HashMap<String, usize>,
    reverse: Vec<String>,
}

impl IndexMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index for `id`, assigning the next dense index on
    /// first occurrence.
    pub fn get_or_insert(&mut self, id: &str) -> usize {
        if let Some(&idx) = self.forward.get(id) {
            return idx;
        }
        let idx = self.reverse.len();
        self.forward.insert(id.to_string(), idx);
        self.reverse.push(id.to_string());
        idx
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.forward.get(id).copied()
    }

    pub fn id_of(&self, idx: usize) -> Option<&str> {
        self.reverse.get(idx).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    /// Forward map view, used for the published metadata entry.
    pub fn as_map(&self) -> &HashMap<String, usize> {
        &self.forward
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.reverse.iter().map(|s| s.as_str())
    }
}

/// Row-major sparse nonnegative matrix. Each row holds (column, value)
/// pairs sorted by column with no duplicates; a missing pair is an
/// implicit zero. This is the only matrix representation in the
/// pipeline; a dense user x product intermediate is never materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    rows: Vec<Vec<(usize, f32)>>,
    n_cols: usize,
}

impl SparseMatrix {
    pub fn zeros(n_rows: usize, n_cols: usize) -> Self {
        Self {
            rows: vec![Vec::new(); n_rows],
            n_cols,
        }
    }

    /// Accumulates `value` into entry (row, col).
    pub fn add(&mut self, row: usize, col: usize, value: f32) {
        debug_assert!(row < self.rows.len() && col < self.n_cols);
        let entries = &mut self.rows[row];
        match entries.binary_search_by_key(&col, |&(c, _)| c) {
            Ok(pos) => entries[pos].1 += value,
            Err(pos) => entries.insert(pos, (col, value)),
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.rows[row]
            .binary_search_by_key(&col, |&(c, _)| c)
            .map(|pos| self.rows[row][pos].1)
            .unwrap_or(0.0)
    }

    pub fn row(&self, row: usize) -> &[(usize, f32)] {
        &self.rows[row]
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn nnz(&self) -> usize {
        self.rows.iter().map(|r| r.len()).sum()
    }

    /// Column-major copy, used by the ALS item-factor update.
    pub fn transposed(&self) -> SparseMatrix {
        let mut out = SparseMatrix::zeros(self.n_cols, self.rows.len());
        for (r, entries) in self.rows.iter().enumerate() {
            for &(c, v) in entries {
                out.rows[c].push((r, v));
            }
        }
        // Scanning rows in order already yields sorted columns per output row.
        out
    }
}

/// Exact partition of a matrix's nonzero entries into train and test.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: SparseMatrix,
    pub test: SparseMatrix,
}

/// ALS hyperparameters. `alpha` is the implicit-feedback confidence
/// multiplier: confidence = 1 + alpha * count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub rank: usize,
    pub regularization: f32,
    pub iterations: usize,
    pub alpha: f32,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            rank: 50,
            regularization: 0.1,
            iterations: 15,
            alpha: 40.0,
        }
    }
}

/// One failed per-user cache write, recorded without aborting the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishFailure {
    pub user_id: String,
    pub reason: String,
}

/// Outcome of one publish stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishReport {
    pub published: usize,
    /// Per-user write failures only; the metadata entry reports below.
    pub failures: Vec<PublishFailure>,
    pub metadata_written: bool,
    pub metadata_error: Option<String>,
}

/// Best hyperparameter combination observed across a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestResult {
    pub hyperparameters: Hyperparameters,
    pub recall_at_k: f64,
    pub trial: usize,
}

/// Record sent to the tracking backend after each training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRunRecord {
    pub run_id: Uuid,
    pub dataset_prefix: String,
    pub hyperparameters: Hyperparameters,
    pub recall_at_k: f64,
    pub training_loss: f32,
    pub n_users: usize,
    pub n_products: usize,
    pub user_factors: Vec<Vec<f32>>,
    pub item_factors: Vec<Vec<f32>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
