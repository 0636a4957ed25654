//! 外部呼び出し向けの窓口
//!
//! エンジンのエラーはここで握りつぶし、ログに残したうえで
//! 成否フラグ・空リスト・0件として返す。

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::error::{EngineError, EngineResult};
use super::pricing::PricingEngine;
use super::recommendation::{Recommendation, RecommendationEngine};
use super::segmentation::{SegmentAssignment, SegmentationEngine};
use super::TrainReport;
use crate::config::AppConfig;
use crate::database::{ModelType, SegmentDefinition, ShopDatabase};

/// 学習リクエストの結果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<i64>,
}

impl From<EngineResult<TrainReport>> for TrainOutcome {
    fn from(result: EngineResult<TrainReport>) -> Self {
        match result {
            Ok(report) => Self {
                success: true,
                message: report.message,
                accuracy: report.accuracy,
                artifact_id: Some(report.artifact_id),
            },
            Err(e) => Self {
                success: false,
                message: e.to_string(),
                accuracy: None,
                artifact_id: None,
            },
        }
    }
}

/// セグメント定義と顧客ごとの割り当て
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SegmentReport {
    pub definitions: Vec<SegmentDefinition>,
    pub assignments: Vec<SegmentAssignment>,
}

pub struct AiService {
    db: ShopDatabase,
    config: AppConfig,
}

impl AiService {
    pub fn new(db: ShopDatabase, config: AppConfig) -> Self {
        Self { db, config }
    }

    pub fn database(&self) -> &ShopDatabase {
        &self.db
    }

    pub fn database_mut(&mut self) -> &mut ShopDatabase {
        &mut self.db
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 指定種別のモデルを学習してアクティブにする
    pub fn train(&mut self, model_type: ModelType) -> TrainOutcome {
        info!(model_type = %model_type, "🧠 Training requested");

        let result = match model_type {
            ModelType::Recommendation => {
                RecommendationEngine::new(&self.config.recommendation).train(&mut self.db)
            }
            ModelType::Pricing => PricingEngine::new(&self.config.pricing).train(&mut self.db),
            ModelType::Segmentation => {
                SegmentationEngine::new(&self.config.segmentation).train(&mut self.db)
            }
            ModelType::Forecasting => {
                return TrainOutcome {
                    success: false,
                    message: "Invalid model type".to_string(),
                    accuracy: None,
                    artifact_id: None,
                };
            }
        };

        match &result {
            Ok(report) => info!(
                model_type = %model_type,
                artifact_id = report.artifact_id,
                message = %report.message,
                "✅ Training finished"
            ),
            Err(e) if e.is_insufficient_data() => {
                warn!(model_type = %model_type, error = %e, "Training skipped")
            }
            Err(e) => error!(model_type = %model_type, error = %e, "❌ Training failed"),
        }

        TrainOutcome::from(result)
    }

    /// ユーザーへのおすすめ商品（失敗時は空）
    pub fn get_recommendations(&self, user_id: i64, n: usize) -> Vec<Recommendation> {
        let engine = RecommendationEngine::new(&self.config.recommendation);
        match engine.recommend(&self.db, user_id, n) {
            Ok(recommendations) => recommendations,
            Err(EngineError::NoActiveModel(_)) => {
                warn!(user_id, "No active recommendation model");
                Vec::new()
            }
            Err(e) => {
                error!(user_id, error = %e, "❌ Failed to get recommendations");
                Vec::new()
            }
        }
    }

    /// 設定の既定件数でおすすめ商品を返す
    pub fn get_default_recommendations(&self, user_id: i64) -> Vec<Recommendation> {
        self.get_recommendations(user_id, self.config.recommendation.default_count)
    }

    /// 全商品のAI推奨価格を更新し、更新件数を返す（失敗時は0）
    pub fn update_all_prices(&mut self) -> usize {
        let engine = PricingEngine::new(&self.config.pricing);
        match engine.apply_to_all(&mut self.db) {
            Ok(updates) => updates.len(),
            Err(e) => {
                error!(error = %e, "❌ Error updating prices");
                0
            }
        }
    }

    /// セグメント定義と割り当て一覧（失敗時は空）
    pub fn get_segments(&self) -> SegmentReport {
        match self.load_segments() {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "❌ Failed to load segments");
                SegmentReport::default()
            }
        }
    }

    fn load_segments(&self) -> anyhow::Result<SegmentReport> {
        let definitions = self.db.get_segment_definitions()?;
        let assignments = self
            .db
            .get_user_profiles()?
            .into_iter()
            .filter_map(|profile| {
                profile.customer_segment.map(|segment| SegmentAssignment {
                    user_id: profile.user_id,
                    segment,
                })
            })
            .collect();

        Ok(SegmentReport {
            definitions,
            assignments,
        })
    }
}
