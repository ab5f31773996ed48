use crate::models::{Event, IndexMapping, SparseMatrix};
use tracing::warn;

/// Result of turning a raw event batch into an interaction matrix.
#[derive(Debug, Clone)]
pub struct InteractionData {
    pub matrix: SparseMatrix,
    pub users: IndexMapping,
    pub products: IndexMapping,
    /// Structurally invalid events dropped from the batch.
    pub skipped: usize,
}

/// Builds a user x product interaction matrix from raw events.
///
/// Indices are assigned in first-seen order, so the mapping is a total
/// injection over every identifier in the batch and is deterministic for
/// a fixed event order. Repeat interactions accumulate as counts. The
/// matrix is accumulated directly in sparse form; no dense intermediate
/// is ever allocated.
pub fn build(events: &[Event]) -> InteractionData {
    let mut users = IndexMapping::new();
    let mut products = IndexMapping::new();
    let mut triplets = Vec::with_capacity(events.len());
    let mut skipped = 0usize;

    for event in events {
        if !event.is_valid() {
            skipped += 1;
            continue;
        }
        let u = users.get_or_insert(&event.user_id);
        let p = products.get_or_insert(&event.product_id);
        triplets.push((u, p));
    }

    if skipped > 0 {
        warn!(skipped, total = events.len(), "skipped malformed events");
    }

    let mut matrix = SparseMatrix::zeros(users.len(), products.len());
    for (u, p) in triplets {
        matrix.add(u, p, 1.0);
    }

    InteractionData {
        matrix,
        users,
        products,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(user: &str, product: &str) -> Event {
        Event::new(user, product, "view", 0)
    }

    #[test]
    fn empty_batch_yields_empty_but_valid_result() {
        let data = build(&[]);
        assert_eq!(data.matrix.n_rows(), 0);
        assert_eq!(data.matrix.n_cols(), 0);
        assert!(data.users.is_empty());
        assert!(data.products.is_empty());
        assert_eq!(data.skipped, 0);
    }

    #[test]
    fn indices_follow_first_seen_order() {
        let events = vec![event("u2", "p9"), event("u1", "p3"), event("u2", "p3")];
        let data = build(&events);
        assert_eq!(data.users.index_of("u2"), Some(0));
        assert_eq!(data.users.index_of("u1"), Some(1));
        assert_eq!(data.products.index_of("p9"), Some(0));
        assert_eq!(data.products.index_of("p3"), Some(1));
    }

    #[test]
    fn repeated_interactions_accumulate() {
        let events = vec![event("u1", "p1"), event("u1", "p1"), event("u1", "p1")];
        let data = build(&events);
        assert_eq!(data.matrix.get(0, 0), 3.0);
        assert_eq!(data.matrix.nnz(), 1);
    }

    #[test]
    fn malformed_events_are_skipped_and_counted() {
        let events = vec![
            event("u1", "p1"),
            event("", "p1"),
            event("u2", ""),
            event("u2", "p2"),
        ];
        let data = build(&events);
        assert_eq!(data.skipped, 2);
        assert_eq!(data.users.len(), 2);
        assert_eq!(data.products.len(), 2);
        assert_eq!(data.matrix.nnz(), 2);
    }

    #[test]
    fn mapping_is_total_and_injective() {
        let events = vec![
            event("a", "x"),
            event("b", "y"),
            event("c", "x"),
            event("a", "z"),
        ];
        let data = build(&events);
        // Every id maps to exactly one index and every index is used.
        for id in ["a", "b", "c"] {
            let idx = data.users.index_of(id).unwrap();
            assert_eq!(data.users.id_of(idx), Some(id));
        }
        let mut seen: Vec<usize> = ["a", "b", "c"]
            .iter()
            .map(|id| data.users.index_of(id).unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(data.matrix.n_rows(), 3);
        assert_eq!(data.matrix.n_cols(), 3);
    }
}
