use crate::config::PublishConfig;
use crate::error::PipelineError;
use crate::models::{IndexMapping, PublishFailure, PublishReport, SparseMatrix};
use crate::pipeline::als::AlsModel;
use crate::services::cache::CacheStore;
use serde_json::json;
use tracing::{info, warn};

/// Computes top-N recommendations per user and writes them to the cache,
/// one entry per user plus one metadata entry carrying the index
/// mappings and model provenance.
///
/// Per-user write failures are isolated: they are recorded in the report
/// and never abort the remaining writes. Re-publishing the same user
/// overwrites the prior entry wholesale.
pub async fn publish(
    model: &AlsModel,
    users: &IndexMapping,
    products: &IndexMapping,
    train: &SparseMatrix,
    config: &PublishConfig,
    ttl: u64,
    cache: &dyn CacheStore,
) -> PublishReport {
    let mut report = PublishReport::default();

    for user_idx in 0..users.len() {
        let Some(user_id) = users.id_of(user_idx) else {
            continue;
        };
        let exclude: &[(usize, f32)] = if user_idx < train.n_rows() {
            train.row(user_idx)
        } else {
            &[]
        };
        let ranked = model.recommend(user_idx, exclude, config.top_n);
        let product_ids: Vec<&str> = ranked
            .iter()
            .filter_map(|&(item, _)| products.id_of(item))
            .collect();

        let key = user_key(config, user_id);
        let payload = match serde_json::to_string(&product_ids) {
            Ok(payload) => payload,
            Err(e) => {
                report.failures.push(PublishFailure {
                    user_id: user_id.to_string(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        match cache.set_ex(&key, &payload, ttl).await {
            Ok(()) => report.published += 1,
            Err(e) => {
                warn!(user = user_id, error = %e, "recommendation write failed");
                report.failures.push(PublishFailure {
                    user_id: user_id.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    match write_metadata(model, users, products, config, ttl, cache).await {
        Ok(()) => report.metadata_written = true,
        Err(e) => {
            warn!(error = %e, "metadata write failed");
            report.metadata_error = Some(e.to_string());
        }
    }

    info!(
        published = report.published,
        failed = report.failures.len(),
        metadata = report.metadata_written,
        "publish stage finished"
    );
    report
}

pub fn user_key(config: &PublishConfig, user_id: &str) -> String {
    format!("{}:user:{}", config.key_prefix, user_id)
}

pub fn metadata_key(config: &PublishConfig) -> String {
    format!("{}:metadata", config.key_prefix)
}

async fn write_metadata(
    model: &AlsModel,
    users: &IndexMapping,
    products: &IndexMapping,
    config: &PublishConfig,
    ttl: u64,
    cache: &dyn CacheStore,
) -> Result<(), PipelineError> {
    let hp = model.hyperparameters();
    let metadata = json!({
        "user_map": users.as_map(),
        "product_map": products.as_map(),
        "model_info": {
            "factors": hp.rank,
            "regularization": hp.regularization,
        },
    });
    let payload = serde_json::to_string(&metadata)
        .map_err(|e| PipelineError::Data(format!("metadata serialization: {}", e)))?;
    cache.set_ex(&metadata_key(config), &payload, ttl).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Hyperparameters;
    use crate::pipeline::matrix;
    use crate::services::cache::MemoryCacheStore;

    fn config() -> PublishConfig {
        PublishConfig {
            top_n: 5,
            key_prefix: "recommendations".to_string(),
        }
    }

    fn hp() -> Hyperparameters {
        Hyperparameters {
            rank: 2,
            regularization: 0.1,
            iterations: 1,
            alpha: 1.0,
        }
    }

    fn fixture() -> (AlsModel, IndexMapping, IndexMapping, SparseMatrix) {
        use crate::models::Event;
        let events = vec![
            Event::new("u1", "p1", "view", 1),
            Event::new("u1", "p2", "view", 2),
            Event::new("u2", "p1", "view", 3),
            Event::new("u2", "p3", "view", 4),
        ];
        let data = matrix::build(&events);
        let model = AlsModel::from_factors(
            vec![vec![1.0, 0.0]; data.users.len()],
            vec![vec![3.0, 0.0], vec![2.0, 0.0], vec![1.0, 0.0]],
            hp(),
        );
        (model, data.users, data.products, data.matrix)
    }

    #[tokio::test]
    async fn writes_one_entry_per_user_plus_metadata() {
        let (model, users, products, train) = fixture();
        let cache = MemoryCacheStore::new();
        let report = publish(&model, &users, &products, &train, &config(), 3600, &cache).await;

        assert_eq!(report.published, 2);
        assert!(report.failures.is_empty());
        assert!(report.metadata_written);

        // u1 trained on p1 and p2, so only p3 remains.
        let payload = cache.get("recommendations:user:u1").await.unwrap();
        let recs: Vec<String> = serde_json::from_str(&payload).unwrap();
        assert_eq!(recs, vec!["p3"]);
        assert_eq!(cache.ttl_of("recommendations:user:u1").await, Some(3600));

        let metadata = cache.get("recommendations:metadata").await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&metadata).unwrap();
        assert_eq!(parsed["user_map"]["u2"], 1);
        assert_eq!(parsed["product_map"]["p3"], 2);
        assert_eq!(parsed["model_info"]["factors"], 2);
    }

    #[tokio::test]
    async fn republish_overwrites_without_merge_artifacts() {
        let (model, users, products, train) = fixture();
        let cache = MemoryCacheStore::new();
        publish(&model, &users, &products, &train, &config(), 3600, &cache).await;
        let first = cache.get("recommendations:user:u1").await.unwrap();
        publish(&model, &users, &products, &train, &config(), 3600, &cache).await;
        let second = cache.get("recommendations:user:u1").await.unwrap();

        assert_eq!(first, second);
        // 2 user entries + 1 metadata entry, regardless of publish count.
        assert_eq!(cache.len().await, 3);
    }

    #[tokio::test]
    async fn per_user_failures_do_not_abort_the_batch() {
        let (model, users, products, train) = fixture();
        let cache = MemoryCacheStore::new();
        cache.fail_key("recommendations:user:u1").await;

        let report = publish(&model, &users, &products, &train, &config(), 3600, &cache).await;
        assert_eq!(report.published, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].user_id, "u1");
        assert!(report.metadata_written);
        assert!(cache.get("recommendations:user:u2").await.is_some());
    }

    #[tokio::test]
    async fn metadata_failure_is_reported_separately_from_user_entries() {
        let (model, users, products, train) = fixture();
        let cache = MemoryCacheStore::new();
        cache.fail_key("recommendations:metadata").await;

        let report = publish(&model, &users, &products, &train, &config(), 3600, &cache).await;
        assert_eq!(report.published, 2);
        assert!(!report.metadata_written);
        assert!(report.metadata_error.is_some());
        // The per-user list stays free of sentinel entries.
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn zero_users_writes_only_metadata() {
        let cache = MemoryCacheStore::new();
        let model = AlsModel::from_factors(vec![], vec![], hp());
        let users = IndexMapping::new();
        let products = IndexMapping::new();
        let train = SparseMatrix::zeros(0, 0);

        let report = publish(&model, &users, &products, &train, &config(), 3600, &cache).await;
        assert_eq!(report.published, 0);
        assert!(report.failures.is_empty());
        assert!(report.metadata_written);
        assert_eq!(cache.len().await, 1);
    }
}
