//! Demand-driven price prediction.
//!
//! A random forest regresses each product's list price on its engagement
//! features; the prediction becomes the product's AI recommended price,
//! floored at a fixed share of the list price.

use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::{EngineError, EngineResult};
use super::forest::{ForestParams, RandomForestRegressor};
use super::TrainReport;
use crate::config::PricingConfig;
use crate::database::crud::write_ai_recommended_price;
use crate::database::{ModelType, NewArtifact, Product, ShopDatabase};

const MODEL_NAME: &str = "Dynamic Pricing RF";
const MODEL_VERSION: &str = "1.0";

pub const FEATURE_NAMES: [&str; 6] = [
    "views_count",
    "sales_count",
    "rating_average",
    "stock",
    "demand_score",
    "popularity_score",
];

/// One product's feature snapshot with its current list price as the label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductFeatures {
    pub product_id: i64,
    pub views_count: f64,
    pub sales_count: f64,
    pub rating_average: f64,
    pub stock: f64,
    pub demand_score: f64,
    pub popularity_score: f64,
    pub current_price: f64,
}

impl ProductFeatures {
    pub fn from_product(product: &Product) -> Self {
        Self {
            product_id: product.id,
            views_count: product.views_count as f64,
            sales_count: product.sales_count as f64,
            rating_average: product.rating_average,
            stock: product.stock as f64,
            demand_score: product.demand_score,
            popularity_score: product.popularity_score,
            current_price: product.price,
        }
    }

    /// Features in `FEATURE_NAMES` order.
    pub fn vector(&self) -> [f64; 6] {
        [
            self.views_count,
            self.sales_count,
            self.rating_average,
            self.stock,
            self.demand_score,
            self.popularity_score,
        ]
    }
}

/// Stored parameters of a trained pricing model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingModel {
    pub features: Vec<String>,
    pub forest: RandomForestRegressor,
}

impl PricingModel {
    pub fn predict(&self, features: &ProductFeatures) -> f64 {
        self.forest
            .predict_row(Array1::from(features.vector().to_vec()).view())
    }
}

/// Result of repricing one product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceUpdate {
    pub product_id: i64,
    pub list_price: f64,
    pub predicted_price: f64,
    pub recommended_price: f64,
}

fn feature_matrix(rows: &[ProductFeatures]) -> (Array2<f64>, Array1<f64>) {
    let vectors: Vec<[f64; 6]> = rows.iter().map(ProductFeatures::vector).collect();
    let x = Array2::from_shape_fn((rows.len(), FEATURE_NAMES.len()), |(i, j)| vectors[i][j]);
    let y = rows.iter().map(|row| row.current_price).collect();
    (x, y)
}

pub struct PricingEngine<'a> {
    config: &'a PricingConfig,
}

impl<'a> PricingEngine<'a> {
    pub fn new(config: &'a PricingConfig) -> Self {
        Self { config }
    }

    pub fn prepare_data(&self, db: &ShopDatabase) -> EngineResult<Vec<ProductFeatures>> {
        Ok(db
            .get_products()?
            .iter()
            .map(ProductFeatures::from_product)
            .collect())
    }

    /// Shuffled `(train, test)` row indices; the test side holds `ceil(n * test_fraction)` rows.
    fn split_indices(&self, n: usize) -> (Vec<usize>, Vec<usize>) {
        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(self.config.random_seed);
        indices.shuffle(&mut rng);

        let test_len = ((n as f64 * self.config.test_fraction).ceil() as usize)
            .clamp(1, n.saturating_sub(1).max(1));
        let train = indices.split_off(test_len);
        (train, indices)
    }

    pub fn train(&self, db: &mut ShopDatabase) -> EngineResult<TrainReport> {
        let rows = self.prepare_data(db)?;
        if rows.len() < self.config.min_products {
            return Err(EngineError::insufficient(
                ModelType::Pricing,
                self.config.min_products,
                rows.len(),
            ));
        }

        let (x, y) = feature_matrix(&rows);
        let (train_idx, test_idx) = self.split_indices(rows.len());

        let params = ForestParams {
            n_estimators: self.config.n_estimators,
            seed: self.config.random_seed,
            ..ForestParams::default()
        };
        let forest = RandomForestRegressor::fit(
            &x.select(Axis(0), &train_idx),
            &y.select(Axis(0), &train_idx),
            &params,
        )?;
        let accuracy = forest.score(&x.select(Axis(0), &test_idx), &y.select(Axis(0), &test_idx));

        let model = PricingModel {
            features: FEATURE_NAMES.iter().map(|name| name.to_string()).collect(),
            forest,
        };
        let artifact = NewArtifact::encode(MODEL_NAME, ModelType::Pricing, MODEL_VERSION, &model)?
            .with_accuracy(accuracy);
        let saved = db.save_artifact(&artifact)?;

        info!(
            artifact_id = saved.id,
            products = rows.len(),
            train = train_idx.len(),
            test = test_idx.len(),
            accuracy,
            "💰 Pricing model trained"
        );

        Ok(TrainReport {
            model_type: ModelType::Pricing,
            artifact_id: saved.id,
            samples: rows.len(),
            accuracy: Some(accuracy),
            message: format!("Pricing model trained successfully with accuracy: {accuracy:.2}"),
        })
    }

    fn active_model(&self, db: &ShopDatabase) -> EngineResult<PricingModel> {
        let artifact = db
            .active_artifact(ModelType::Pricing)?
            .ok_or(EngineError::NoActiveModel(ModelType::Pricing))?;
        Ok(artifact.decode()?)
    }

    /// Raw model prediction for one feature row.
    pub fn predict(&self, db: &ShopDatabase, features: &ProductFeatures) -> EngineResult<f64> {
        Ok(self.active_model(db)?.predict(features))
    }

    fn floored(&self, predicted: f64, list_price: f64) -> f64 {
        predicted.max(list_price * self.config.price_floor_ratio)
    }

    /// Reprices every product from the active model in a single transaction.
    pub fn apply_to_all(&self, db: &mut ShopDatabase) -> EngineResult<Vec<PriceUpdate>> {
        let model = self.active_model(db)?;
        let products = db.get_products()?;

        let updates: Vec<PriceUpdate> = products
            .iter()
            .map(|product| {
                let predicted_price = model.predict(&ProductFeatures::from_product(product));
                PriceUpdate {
                    product_id: product.id,
                    list_price: product.price,
                    predicted_price,
                    recommended_price: self.floored(predicted_price, product.price),
                }
            })
            .collect();

        let tx = db.connection.transaction()?;
        for update in &updates {
            write_ai_recommended_price(&tx, update.product_id, update.recommended_price)?;
            debug!(
                product_id = update.product_id,
                predicted = update.predicted_price,
                recommended = update.recommended_price,
                "Price updated"
            );
        }
        tx.commit()?;

        info!(updated = updates.len(), "🏷️ AI recommended prices applied");
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::NewProduct;
    use anyhow::Result;

    fn seed_catalog(db: &mut ShopDatabase, count: usize) -> Result<()> {
        for i in 0..count {
            let mut product = NewProduct::new(
                format!("Product {i}"),
                format!("SKU-{i:03}"),
                1000.0 + 250.0 * i as f64,
            )
            .with_popularity(i as f64 * 0.5)
            .with_stock(50 - i as i64);
            product.views_count = 10 * i as i64;
            product.sales_count = i as i64;
            product.rating_average = 3.0 + (i % 3) as f64 * 0.5;
            product.demand_score = i as f64 / count as f64;
            db.insert_product(&product)?;
        }
        Ok(())
    }

    #[test]
    fn test_split_sizes() {
        let config = PricingConfig::default();
        let engine = PricingEngine::new(&config);

        let (train, test) = engine.split_indices(10);
        assert_eq!((train.len(), test.len()), (8, 2));

        let (train, test) = engine.split_indices(11);
        assert_eq!((train.len(), test.len()), (8, 3));

        let mut all: Vec<usize> = train.iter().chain(test.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..11).collect::<Vec<_>>());

        assert_eq!(engine.split_indices(11), engine.split_indices(11));
    }

    #[test]
    fn test_nine_products_are_not_enough() -> Result<()> {
        let mut db = ShopDatabase::new_in_memory()?;
        seed_catalog(&mut db, 9)?;
        let config = PricingConfig::default();
        let engine = PricingEngine::new(&config);

        let err = engine.train(&mut db).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientData {
                model_type: ModelType::Pricing,
                required: 10,
                found: 9
            }
        ));
        assert!(db.list_artifacts(Some(ModelType::Pricing))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_apply_without_model() -> Result<()> {
        let mut db = ShopDatabase::new_in_memory()?;
        seed_catalog(&mut db, 3)?;
        let config = PricingConfig::default();
        let engine = PricingEngine::new(&config);

        assert!(matches!(
            engine.apply_to_all(&mut db),
            Err(EngineError::NoActiveModel(ModelType::Pricing))
        ));
        assert!(db.get_products()?.iter().all(|p| p.ai_recommended_price.is_none()));
        Ok(())
    }

    #[test]
    fn test_train_and_apply_respects_floor() -> Result<()> {
        let mut db = ShopDatabase::new_in_memory()?;
        seed_catalog(&mut db, 12)?;
        let config = PricingConfig {
            n_estimators: 20,
            ..PricingConfig::default()
        };
        let engine = PricingEngine::new(&config);

        let report = engine.train(&mut db)?;
        assert_eq!(report.samples, 12);
        assert!(report.accuracy.is_some());
        assert!(report.message.starts_with("Pricing model trained successfully with accuracy: "));

        let active = db.active_artifact(ModelType::Pricing)?.expect("active model");
        assert_eq!(active.name, "Dynamic Pricing RF");
        assert_eq!(active.accuracy, report.accuracy);

        // a product the model will underprice badly
        let outlier = db.insert_product(&NewProduct::new("Premium", "SKU-999", 1_000_000.0))?;

        let updates = engine.apply_to_all(&mut db)?;
        assert_eq!(updates.len(), 13);

        for product in db.get_products()? {
            let price = product.ai_recommended_price.expect("repriced");
            assert!(price >= 0.7 * product.price);
        }
        let premium = db.get_product(outlier)?.expect("outlier");
        assert_eq!(premium.ai_recommended_price, Some(1_000_000.0 * 0.7));
        Ok(())
    }

    #[test]
    fn test_stored_model_predicts_like_trained_model() -> Result<()> {
        let mut db = ShopDatabase::new_in_memory()?;
        seed_catalog(&mut db, 10)?;
        let config = PricingConfig {
            n_estimators: 10,
            ..PricingConfig::default()
        };
        let engine = PricingEngine::new(&config);
        engine.train(&mut db)?;

        let sample = engine.prepare_data(&db)?.remove(4);
        let first = engine.predict(&db, &sample)?;

        // retraining on unchanged data yields the same forest
        engine.train(&mut db)?;
        assert_eq!(engine.predict(&db, &sample)?, first);
        assert_eq!(db.list_artifacts(Some(ModelType::Pricing))?.len(), 2);
        Ok(())
    }
}
