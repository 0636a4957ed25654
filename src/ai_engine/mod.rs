//! 学習・推論エンジン
//!
//! 各エンジンはストアから学習データを読み、パラメータをJSONとして
//! `ml_models` に保存してアクティブ化する。

pub mod error;
pub mod forest;
pub mod pricing;
pub mod recommendation;
pub mod segmentation;
pub mod service;
pub mod similarity;

use serde::{Deserialize, Serialize};

use crate::database::ModelType;

pub use error::{EngineError, EngineResult};
pub use forest::{ForestParams, RandomForestRegressor};
pub use pricing::{PriceUpdate, PricingEngine, PricingModel};
pub use recommendation::{
    InteractionMatrix, Recommendation, RecommendationEngine, RecommendationModel,
    RecommendationSource,
};
pub use segmentation::{SegmentAssignment, SegmentationEngine, SegmentationModel};
pub use service::{AiService, SegmentReport, TrainOutcome};

/// 学習1回分の結果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainReport {
    pub model_type: ModelType,
    pub artifact_id: i64,
    /// 学習に使ったレコード数（ユーザー、商品、顧客）
    pub samples: usize,
    pub accuracy: Option<f64>,
    pub message: String,
}
