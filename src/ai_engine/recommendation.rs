//! User-based collaborative filtering.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::{EngineError, EngineResult};
use super::similarity::cosine_similarity;
use super::TrainReport;
use crate::config::RecommendationConfig;
use crate::database::{BehaviorKind, ModelType, NewArtifact, Product, ShopDatabase};

const MODEL_NAME: &str = "Collaborative Filtering";
const MODEL_VERSION: &str = "1.0";

/// User × product matrix of mean weighted interaction scores.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionMatrix {
    pub user_ids: Vec<i64>,
    pub product_ids: Vec<i64>,
    pub values: Array2<f64>,
}

/// Stored parameters of a trained recommendation model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationModel {
    pub user_ids: Vec<i64>,
    pub product_ids: Vec<i64>,
    /// `interactions[u][p]`, rows follow `user_ids`, columns follow `product_ids`
    pub interactions: Vec<Vec<f64>>,
    /// `similarity[u][v]` between the rows of `interactions`
    pub similarity: Vec<Vec<f64>>,
}

impl RecommendationModel {
    pub fn from_matrix(matrix: &InteractionMatrix) -> Self {
        let similarity = cosine_similarity(&matrix.values);
        Self {
            user_ids: matrix.user_ids.clone(),
            product_ids: matrix.product_ids.clone(),
            interactions: matrix.values.outer_iter().map(|row| row.to_vec()).collect(),
            similarity: similarity.outer_iter().map(|row| row.to_vec()).collect(),
        }
    }

    fn user_index(&self, user_id: i64) -> Option<usize> {
        self.user_ids.iter().position(|&id| id == user_id)
    }

    /// Similarity-weighted average rating of every product, best first.
    ///
    /// Only other users with positive similarity and a nonzero rating for the
    /// product contribute. Products nobody contributes to are left out; equal
    /// scores keep product-id order. `None` when the user was not in training.
    pub fn score_products(&self, user_id: i64) -> Option<Vec<(i64, f64)>> {
        let target = self.user_index(user_id)?;
        let similarities = &self.similarity[target];

        let mut scores = Vec::new();
        for (column, &product_id) in self.product_ids.iter().enumerate() {
            let mut weighted = 0.0;
            let mut total_similarity = 0.0;

            for (other, &similarity) in similarities.iter().enumerate() {
                if other == target {
                    continue;
                }
                let rating = self.interactions[other][column];
                if similarity > 0.0 && rating > 0.0 {
                    weighted += similarity * rating;
                    total_similarity += similarity;
                }
            }

            if total_similarity > 0.0 {
                scores.push((product_id, weighted / total_similarity));
            }
        }

        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        Some(scores)
    }
}

/// Where a recommendation score came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    Collaborative,
    Popularity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub product: Product,
    pub score: f64,
    pub source: RecommendationSource,
}

pub struct RecommendationEngine<'a> {
    config: &'a RecommendationConfig,
}

impl<'a> RecommendationEngine<'a> {
    pub fn new(config: &'a RecommendationConfig) -> Self {
        Self { config }
    }

    fn weight(&self, kind: BehaviorKind) -> Option<f64> {
        match kind {
            BehaviorKind::Purchase => Some(self.config.purchase_weight),
            BehaviorKind::View => Some(self.config.view_weight),
            _ => None,
        }
    }

    /// Builds the interaction matrix from view and purchase events.
    ///
    /// Returns `None` when no event with a product qualifies.
    pub fn prepare_data(&self, db: &ShopDatabase) -> EngineResult<Option<InteractionMatrix>> {
        let behaviors = db.get_behaviors(&[BehaviorKind::View, BehaviorKind::Purchase])?;

        let mut cells: BTreeMap<(i64, i64), (f64, usize)> = BTreeMap::new();
        let mut user_ids = BTreeSet::new();
        let mut product_ids = BTreeSet::new();

        for behavior in &behaviors {
            let (Some(product_id), Some(weight)) = (behavior.product_id, self.weight(behavior.kind))
            else {
                continue;
            };
            let cell = cells.entry((behavior.user_id, product_id)).or_insert((0.0, 0));
            cell.0 += weight;
            cell.1 += 1;
            user_ids.insert(behavior.user_id);
            product_ids.insert(product_id);
        }

        if cells.is_empty() {
            return Ok(None);
        }

        let user_ids: Vec<i64> = user_ids.into_iter().collect();
        let product_ids: Vec<i64> = product_ids.into_iter().collect();
        let rows: HashMap<i64, usize> = user_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let columns: HashMap<i64, usize> =
            product_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut values = Array2::<f64>::zeros((user_ids.len(), product_ids.len()));
        for ((user_id, product_id), (sum, count)) in cells {
            values[[rows[&user_id], columns[&product_id]]] = sum / count as f64;
        }

        debug!(
            users = user_ids.len(),
            products = product_ids.len(),
            events = behaviors.len(),
            "Interaction matrix prepared"
        );

        Ok(Some(InteractionMatrix {
            user_ids,
            product_ids,
            values,
        }))
    }

    /// Fits user-user similarity and stores it as the active recommendation model.
    pub fn train(&self, db: &mut ShopDatabase) -> EngineResult<TrainReport> {
        let matrix = self
            .prepare_data(db)?
            .ok_or_else(|| EngineError::insufficient(ModelType::Recommendation, 1, 0))?;

        let model = RecommendationModel::from_matrix(&matrix);
        let artifact = NewArtifact::encode(
            MODEL_NAME,
            ModelType::Recommendation,
            MODEL_VERSION,
            &model,
        )?;
        let saved = db.save_artifact(&artifact)?;

        info!(
            artifact_id = saved.id,
            users = model.user_ids.len(),
            products = model.product_ids.len(),
            "🤝 Recommendation model trained"
        );

        Ok(TrainReport {
            model_type: ModelType::Recommendation,
            artifact_id: saved.id,
            samples: model.user_ids.len(),
            accuracy: None,
            message: "Recommendation model trained successfully".to_string(),
        })
    }

    /// Top-`n` products for `user_id` from the active model.
    ///
    /// Users unseen at training time get the most popular products instead.
    pub fn recommend(
        &self,
        db: &ShopDatabase,
        user_id: i64,
        n: usize,
    ) -> EngineResult<Vec<Recommendation>> {
        let artifact = db
            .active_artifact(ModelType::Recommendation)?
            .ok_or(EngineError::NoActiveModel(ModelType::Recommendation))?;
        let model: RecommendationModel = artifact.decode()?;

        if n == 0 {
            return Ok(Vec::new());
        }

        let Some(scores) = model.score_products(user_id) else {
            debug!(user_id, "Cold start, falling back to popular products");
            return Ok(db
                .get_popular_products(n)?
                .into_iter()
                .map(|product| Recommendation {
                    score: product.popularity_score,
                    product,
                    source: RecommendationSource::Popularity,
                })
                .collect());
        };

        let mut recommendations = Vec::with_capacity(n.min(scores.len()));
        for (product_id, score) in scores.into_iter().take(n) {
            match db.get_product(product_id)? {
                Some(product) => recommendations.push(Recommendation {
                    product,
                    score,
                    source: RecommendationSource::Collaborative,
                }),
                None => debug!(product_id, "Recommended product no longer in catalog"),
            }
        }

        Ok(recommendations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{BehaviorRecord, NewProduct};
    use anyhow::Result;

    fn purchase(db: &mut ShopDatabase, user_id: i64, product_id: i64) -> Result<()> {
        db.record_behavior(&BehaviorRecord::new(
            user_id,
            Some(product_id),
            BehaviorKind::Purchase,
        ))?;
        Ok(())
    }

    fn view(db: &mut ShopDatabase, user_id: i64, product_id: i64) -> Result<()> {
        db.record_behavior(&BehaviorRecord::new(user_id, Some(product_id), BehaviorKind::View))?;
        Ok(())
    }

    fn catalog(db: &mut ShopDatabase, count: usize) -> Result<Vec<i64>> {
        (0..count)
            .map(|i| {
                db.insert_product(
                    &NewProduct::new(format!("Item {i}"), format!("SKU-{i}"), 100.0)
                        .with_popularity(i as f64),
                )
            })
            .collect()
    }

    #[test]
    fn test_prepare_data_weights_and_means() -> Result<()> {
        let mut db = ShopDatabase::new_in_memory()?;
        let products = catalog(&mut db, 2)?;
        let config = RecommendationConfig::default();
        let engine = RecommendationEngine::new(&config);

        view(&mut db, 7, products[0])?;
        purchase(&mut db, 7, products[0])?;
        view(&mut db, 3, products[1])?;
        db.record_behavior(&BehaviorRecord::new(3, Some(products[0]), BehaviorKind::CartAdd))?;
        db.record_behavior(&BehaviorRecord::new(9, None, BehaviorKind::View))?;

        let matrix = engine.prepare_data(&db)?.expect("matrix");
        assert_eq!(matrix.user_ids, vec![3, 7]);
        assert_eq!(matrix.product_ids, products);
        // user 7 viewed (1) and bought (3) the first product: mean 2
        assert_eq!(matrix.values[[1, 0]], 2.0);
        assert_eq!(matrix.values[[0, 1]], 1.0);
        assert_eq!(matrix.values[[0, 0]], 0.0);
        Ok(())
    }

    #[test]
    fn test_no_qualifying_events_means_no_data() -> Result<()> {
        let mut db = ShopDatabase::new_in_memory()?;
        let products = catalog(&mut db, 1)?;
        db.record_behavior(&BehaviorRecord::new(1, Some(products[0]), BehaviorKind::Review))?;

        let config = RecommendationConfig::default();
        let engine = RecommendationEngine::new(&config);
        assert!(engine.prepare_data(&db)?.is_none());

        let err = engine.train(&mut db).unwrap_err();
        assert!(err.is_insufficient_data());
        assert!(db.active_artifact(ModelType::Recommendation)?.is_none());
        Ok(())
    }

    #[test]
    fn test_recommend_without_model() -> Result<()> {
        let db = ShopDatabase::new_in_memory()?;
        let config = RecommendationConfig::default();
        let engine = RecommendationEngine::new(&config);
        assert!(matches!(
            engine.recommend(&db, 1, 5),
            Err(EngineError::NoActiveModel(ModelType::Recommendation))
        ));
        Ok(())
    }

    #[test]
    fn test_weighted_average_scores() {
        // users a, b, c; products p0, p1
        let model = RecommendationModel {
            user_ids: vec![1, 2, 3],
            product_ids: vec![10, 11],
            interactions: vec![vec![3.0, 0.0], vec![3.0, 1.0], vec![0.0, 3.0]],
            similarity: vec![
                vec![1.0, 0.5, 0.0],
                vec![0.5, 1.0, 0.25],
                vec![0.0, 0.25, 1.0],
            ],
        };

        let scores = model.score_products(2).expect("user 2 is known");
        // p0: only user 1 contributes (3.0); p1: only user 3 contributes (3.0)
        assert_eq!(scores, vec![(10, 3.0), (11, 3.0)]);

        let scores = model.score_products(1).expect("user 1 is known");
        // p0: user 2 rates 3 with sim 0.5; p1: user 2 rates 1 with sim 0.5
        assert_eq!(scores, vec![(10, 3.0), (11, 1.0)]);

        assert!(model.score_products(99).is_none());
    }

    #[test]
    fn test_cold_start_uses_popularity() -> Result<()> {
        let mut db = ShopDatabase::new_in_memory()?;
        let products = catalog(&mut db, 4)?;
        purchase(&mut db, 1, products[0])?;
        purchase(&mut db, 2, products[0])?;

        let config = RecommendationConfig::default();
        let engine = RecommendationEngine::new(&config);
        engine.train(&mut db)?;

        let recommendations = engine.recommend(&db, 3, 2)?;
        let ids: Vec<i64> = recommendations.iter().map(|r| r.product.id).collect();
        assert_eq!(ids, vec![products[3], products[2]]);
        assert!(recommendations
            .iter()
            .all(|r| r.source == RecommendationSource::Popularity && r.score == r.product.popularity_score));
        Ok(())
    }

    #[test]
    fn test_known_user_gets_neighbour_purchase() -> Result<()> {
        let mut db = ShopDatabase::new_in_memory()?;
        let products = catalog(&mut db, 3)?;
        purchase(&mut db, 1, products[0])?;
        purchase(&mut db, 2, products[0])?;
        view(&mut db, 2, products[1])?;

        let config = RecommendationConfig::default();
        let engine = RecommendationEngine::new(&config);
        engine.train(&mut db)?;

        let recommendations = engine.recommend(&db, 1, 10)?;
        let ids: Vec<i64> = recommendations.iter().map(|r| r.product.id).collect();
        assert_eq!(ids, vec![products[0], products[1]]);
        // 類似度が1未満なので (s·3)/s は丸め誤差を含む
        assert!((recommendations[0].score - 3.0).abs() < 1e-12);
        assert!((recommendations[1].score - 1.0).abs() < 1e-12);
        assert!(recommendations.iter().all(|r| r.source == RecommendationSource::Collaborative));

        let top_one = engine.recommend(&db, 1, 1)?;
        assert_eq!(top_one.len(), 1);
        Ok(())
    }

    #[test]
    fn test_scores_stay_within_rating_range() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let users = rng.gen_range(2..12);
            let products = rng.gen_range(1..15);
            let values = Array2::from_shape_fn((users, products), |_| match rng.gen_range(0..4) {
                0 => 0.0,
                1 => 1.0,
                2 => 2.0,
                _ => 3.0,
            });
            let matrix = InteractionMatrix {
                user_ids: (1..=users as i64).collect(),
                product_ids: (100..100 + products as i64).collect(),
                values,
            };
            let model = RecommendationModel::from_matrix(&matrix);

            for &user_id in &model.user_ids {
                let scores = model.score_products(user_id).expect("trained user");
                for (product_id, score) in &scores {
                    assert!(
                        (0.0..=3.0 + 1e-9).contains(score),
                        "user {user_id} product {product_id} scored {score}"
                    );
                }
                assert!(scores.windows(2).all(|w| w[0].1 >= w[1].1));
            }
        }
    }

    #[test]
    fn test_truncates_before_dropping_missing_products() -> Result<()> {
        let mut db = ShopDatabase::new_in_memory()?;
        let products = catalog(&mut db, 3)?;
        // user 2 bought p0 and p1, viewed p2: p0 and p1 outrank p2 for user 1
        purchase(&mut db, 1, products[0])?;
        purchase(&mut db, 2, products[0])?;
        purchase(&mut db, 2, products[1])?;
        view(&mut db, 2, products[2])?;

        let config = RecommendationConfig::default();
        let engine = RecommendationEngine::new(&config);
        engine.train(&mut db)?;

        let before: Vec<i64> = engine.recommend(&db, 1, 2)?.iter().map(|r| r.product.id).collect();
        assert_eq!(before, vec![products[0], products[1]]);

        // p1 leaves the catalog after training
        db.connection
            .execute("DELETE FROM products WHERE id = ?1", [products[1]])?;

        let after = engine.recommend(&db, 1, 2)?;
        let ids: Vec<i64> = after.iter().map(|r| r.product.id).collect();
        assert_eq!(ids, vec![products[0]]);

        let all: Vec<i64> = engine.recommend(&db, 1, 10)?.iter().map(|r| r.product.id).collect();
        assert_eq!(all, vec![products[0], products[2]]);
        Ok(())
    }
}
