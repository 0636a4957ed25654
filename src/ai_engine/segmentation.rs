//! Customer segmentation by k-means over standardized purchase statistics.
//!
//! Training is also the write path: every profile gets its segment label in
//! the same transaction that stores the model.

use linfa::prelude::*;
use linfa_clustering::KMeans;
use ndarray::{Array1, Array2, Axis};
use rand::{rngs::StdRng, SeedableRng};
use rusqlite::TransactionBehavior;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::error::{EngineError, EngineResult};
use super::TrainReport;
use crate::config::SegmentationConfig;
use crate::database::crud::{
    clear_segment_definitions, write_customer_segment, write_segment_definition,
};
use crate::database::{
    save_artifact_in, ModelType, NewArtifact, SegmentDefinition, ShopDatabase, UserProfile,
};

const MODEL_NAME: &str = "Customer Segmentation";
const MODEL_VERSION: &str = "1.0";

pub const FEATURE_NAMES: [&str; 3] = ["total_orders", "total_spent", "average_order_value"];

/// One customer's clustering input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerFeatures {
    pub user_id: i64,
    pub total_orders: f64,
    pub total_spent: f64,
    pub average_order_value: f64,
    /// Always 1: registration date is compared with itself, and a zero age counts as one day.
    /// Not used for clustering.
    pub days_since_registration: i64,
}

impl CustomerFeatures {
    pub fn from_profile(profile: &UserProfile) -> Self {
        let registered = profile.created_at.date_naive();
        let age = (registered - registered).num_days();

        Self {
            user_id: profile.user_id,
            total_orders: profile.total_orders as f64,
            total_spent: profile.total_spent,
            average_order_value: profile.average_order_value,
            days_since_registration: if age == 0 { 1 } else { age },
        }
    }

    pub fn vector(&self) -> [f64; 3] {
        [self.total_orders, self.total_spent, self.average_order_value]
    }
}

/// Zero-mean, unit-variance scaling fitted on one batch (population std).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(x: &Array2<f64>) -> Self {
        let mean = x
            .mean_axis(Axis(0))
            .map(|m| m.to_vec())
            .unwrap_or_else(|| vec![0.0; x.ncols()]);
        let scale = x
            .std_axis(Axis(0), 0.0)
            .iter()
            .map(|&std| if std == 0.0 { 1.0 } else { std })
            .collect();
        Self { mean, scale }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut scaled = x.clone();
        for mut row in scaled.rows_mut() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = (*value - self.mean[j]) / self.scale[j];
            }
        }
        scaled
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(j, value)| (value - self.mean[j]) / self.scale[j])
            .collect()
    }

    pub fn inverse_transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(j, value)| value * self.scale[j] + self.mean[j])
            .collect()
    }
}

/// Stored parameters of a trained segmentation model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentationModel {
    pub features: Vec<String>,
    pub scaler: StandardScaler,
    /// Cluster centres in scaled feature space, indexed by cluster id
    pub centroids: Vec<Vec<f64>>,
    pub segment_names: Vec<String>,
}

impl SegmentationModel {
    /// Nearest centroid; the lowest cluster id wins ties.
    pub fn cluster_of(&self, features: &CustomerFeatures) -> usize {
        let scaled = self.scaler.transform_row(&features.vector());

        let mut best = (0, f64::INFINITY);
        for (cluster, centroid) in self.centroids.iter().enumerate() {
            let distance: f64 = centroid
                .iter()
                .zip(&scaled)
                .map(|(c, v)| (c - v).powi(2))
                .sum();
            if distance < best.1 {
                best = (cluster, distance);
            }
        }
        best.0
    }

    /// Cluster ids map onto names by position, wrapping around.
    pub fn label_of(&self, cluster: usize) -> &str {
        &self.segment_names[cluster % self.segment_names.len()]
    }
}

/// A customer's segment label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentAssignment {
    pub user_id: i64,
    pub segment: String,
}

pub struct SegmentationEngine<'a> {
    config: &'a SegmentationConfig,
}

impl<'a> SegmentationEngine<'a> {
    pub fn new(config: &'a SegmentationConfig) -> Self {
        Self { config }
    }

    pub fn prepare_data(&self, db: &ShopDatabase) -> EngineResult<Vec<CustomerFeatures>> {
        Ok(db
            .get_user_profiles()?
            .iter()
            .map(CustomerFeatures::from_profile)
            .collect())
    }

    pub fn train(&self, db: &mut ShopDatabase) -> EngineResult<TrainReport> {
        let rows = self.prepare_data(db)?;
        if rows.len() < self.config.min_customers {
            return Err(EngineError::insufficient(
                ModelType::Segmentation,
                self.config.min_customers,
                rows.len(),
            ));
        }
        if self.config.segment_names.is_empty() {
            return Err(EngineError::failure("no segment names configured"));
        }

        let vectors: Vec<[f64; 3]> = rows.iter().map(CustomerFeatures::vector).collect();
        let x = Array2::from_shape_fn((rows.len(), FEATURE_NAMES.len()), |(i, j)| vectors[i][j]);
        let scaler = StandardScaler::fit(&x);
        let scaled = scaler.transform(&x);

        let n_clusters = self.config.max_clusters.min(rows.len()).max(1);
        let dataset = DatasetBase::from(scaled.clone());
        let kmeans = KMeans::params_with_rng(
            n_clusters,
            StdRng::seed_from_u64(self.config.random_seed),
        )
        .fit(&dataset)
        .map_err(|e| EngineError::Clustering(e.to_string()))?;
        let clusters: Array1<usize> = kmeans.predict(&scaled);

        let model = SegmentationModel {
            features: FEATURE_NAMES.iter().map(|name| name.to_string()).collect(),
            scaler,
            centroids: kmeans
                .centroids()
                .rows()
                .into_iter()
                .map(|row| row.to_vec())
                .collect(),
            segment_names: self.config.segment_names.clone(),
        };
        let artifact = NewArtifact::encode(
            MODEL_NAME,
            ModelType::Segmentation,
            MODEL_VERSION,
            &model,
        )?;

        let tx = db
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let artifact_id = save_artifact_in(&tx, &artifact)?;

        for (row, &cluster) in rows.iter().zip(clusters.iter()) {
            let label = model.label_of(cluster);
            if !write_customer_segment(&tx, row.user_id, label)? {
                debug!(user_id = row.user_id, "Profile vanished before labelling");
            }
        }

        // 前回の学習で作られた定義は残さない
        let stale = clear_segment_definitions(&tx)?;
        debug!(stale, "Previous segment definitions removed");

        for (cluster, centroid) in model.centroids.iter().enumerate() {
            let members = clusters.iter().filter(|&&c| c == cluster).count();
            let centre = model.scaler.inverse_transform_row(centroid);
            write_segment_definition(
                &tx,
                &SegmentDefinition {
                    name: model.label_of(cluster).to_string(),
                    description: format!("k-means cluster {cluster} of {n_clusters}"),
                    criteria: json!({
                        "cluster": cluster,
                        "customers": members,
                        "centroid": {
                            "total_orders": centre[0],
                            "total_spent": centre[1],
                            "average_order_value": centre[2],
                        },
                    }),
                    created_at: chrono::Utc::now(),
                },
            )?;
        }
        tx.commit()?;

        info!(
            artifact_id,
            customers = rows.len(),
            clusters = n_clusters,
            "👥 Customer segmentation trained"
        );

        Ok(TrainReport {
            model_type: ModelType::Segmentation,
            artifact_id,
            samples: rows.len(),
            accuracy: None,
            message: format!("Customer segmentation completed with {n_clusters} segments"),
        })
    }

    /// Segment for `features` under the active model, without writing it back.
    pub fn assign(
        &self,
        db: &ShopDatabase,
        features: &CustomerFeatures,
    ) -> EngineResult<SegmentAssignment> {
        let artifact = db
            .active_artifact(ModelType::Segmentation)?
            .ok_or(EngineError::NoActiveModel(ModelType::Segmentation))?;
        let model: SegmentationModel = artifact.decode()?;
        if model.centroids.is_empty() || model.segment_names.is_empty() {
            return Err(EngineError::failure("segmentation model has no clusters"));
        }

        let cluster = model.cluster_of(features);
        Ok(SegmentAssignment {
            user_id: features.user_id,
            segment: model.label_of(cluster).to_string(),
        })
    }
}
