//! 学習済みモデルの保存領域（`ml_models` テーブル）
//!
//! 行は追記のみで、変更されるのはアクティブフラグだけ。モデル種別ごとの
//! アクティブ行の切り替えは「全解除 → 新しい行を設定」を1トランザクションで行う。

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::crud::parse_datetime;
use super::ShopDatabase;

/// モデル種別
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Recommendation,
    Pricing,
    Segmentation,
    Forecasting,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Recommendation => "recommendation",
            ModelType::Pricing => "pricing",
            ModelType::Segmentation => "segmentation",
            ModelType::Forecasting => "forecasting",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "recommendation" | "recommendations" => Ok(ModelType::Recommendation),
            "pricing" => Ok(ModelType::Pricing),
            "segmentation" => Ok(ModelType::Segmentation),
            "forecasting" => Ok(ModelType::Forecasting),
            other => Err(anyhow::anyhow!("unknown model type '{other}'")),
        }
    }
}

/// 保存済みモデル
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelArtifact {
    pub id: i64,
    pub name: String,
    pub model_type: ModelType,
    pub version: String,
    pub accuracy: Option<f64>,
    /// モデルの数値パラメータ（JSONエンコード）
    #[serde(skip)]
    pub payload: Vec<u8>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ModelArtifact {
    /// ペイロードをモデルパラメータに復元
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// 新規モデル（保存用）
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub name: String,
    pub model_type: ModelType,
    pub version: String,
    pub accuracy: Option<f64>,
    pub payload: Vec<u8>,
}

impl NewArtifact {
    /// モデルパラメータをエンコードして作成
    pub fn encode<T: Serialize>(
        name: impl Into<String>,
        model_type: ModelType,
        version: impl Into<String>,
        parameters: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            name: name.into(),
            model_type,
            version: version.into(),
            accuracy: None,
            payload: serde_json::to_vec(parameters)?,
        })
    }

    /// 精度を設定
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

const ARTIFACT_COLUMNS: &str =
    "id, name, model_type, version, accuracy, model_data, is_active, created_at";

/// 同じ種別のアクティブ行を解除してから新しい行をアクティブとして追加する。
/// 呼び出し側のトランザクション内で実行すること（`&Transaction` をそのまま渡せる）。
pub fn save_artifact_in(conn: &Connection, artifact: &NewArtifact) -> Result<i64> {
    conn.execute(
        "UPDATE ml_models SET is_active = 0 WHERE model_type = ?1 AND is_active = 1",
        params![artifact.model_type.as_str()],
    )?;

    conn.execute(
        "INSERT INTO ml_models (name, model_type, version, accuracy, model_data, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
        params![
            artifact.name,
            artifact.model_type.as_str(),
            artifact.version,
            artifact.accuracy,
            artifact.payload,
            Utc::now().to_rfc3339(),
        ],
    )
    .with_context(|| format!("failed to insert {} model", artifact.model_type))?;

    Ok(conn.last_insert_rowid())
}

impl ShopDatabase {
    /// モデルを保存し、その種別のアクティブモデルにする
    pub fn save_artifact(&mut self, artifact: &NewArtifact) -> Result<ModelArtifact> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let artifact_id = save_artifact_in(&tx, artifact)?;
        tx.commit()?;

        tracing::info!(
            artifact_id,
            model_type = %artifact.model_type,
            name = %artifact.name,
            "💾 Model artifact saved and activated"
        );

        self.get_artifact(artifact_id)?
            .ok_or_else(|| anyhow::anyhow!("model {artifact_id} not found after insert"))
    }

    /// IDでモデルを取得
    pub fn get_artifact(&self, artifact_id: i64) -> Result<Option<ModelArtifact>> {
        let sql = format!("SELECT {ARTIFACT_COLUMNS} FROM ml_models WHERE id = ?1");
        let artifact = self
            .connection
            .query_row(&sql, params![artifact_id], Self::row_to_artifact)
            .optional()?;
        Ok(artifact)
    }

    /// 種別ごとのアクティブモデルを取得
    pub fn active_artifact(&self, model_type: ModelType) -> Result<Option<ModelArtifact>> {
        let sql = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM ml_models
             WHERE model_type = ?1 AND is_active = 1
             ORDER BY id DESC
             LIMIT 1"
        );
        let artifact = self
            .connection
            .query_row(&sql, params![model_type.as_str()], Self::row_to_artifact)
            .optional()?;
        Ok(artifact)
    }

    /// 既存のモデルをアクティブに切り替え
    pub fn activate_artifact(&mut self, artifact_id: i64) -> Result<ModelArtifact> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let model_type: Option<String> = tx
            .query_row(
                "SELECT model_type FROM ml_models WHERE id = ?1",
                params![artifact_id],
                |row| row.get(0),
            )
            .optional()?;
        let model_type =
            model_type.ok_or_else(|| anyhow::anyhow!("model {artifact_id} does not exist"))?;

        tx.execute(
            "UPDATE ml_models SET is_active = 0 WHERE model_type = ?1 AND is_active = 1",
            params![model_type],
        )?;
        tx.execute(
            "UPDATE ml_models SET is_active = 1 WHERE id = ?1",
            params![artifact_id],
        )?;
        tx.commit()?;

        tracing::info!(artifact_id, model_type = %model_type, "🔄 Active model switched");

        self.get_artifact(artifact_id)?
            .ok_or_else(|| anyhow::anyhow!("model {artifact_id} not found after activation"))
    }

    /// モデル一覧を取得（新しい順）
    pub fn list_artifacts(&self, model_type: Option<ModelType>) -> Result<Vec<ModelArtifact>> {
        let mut artifacts = Vec::new();

        if let Some(model_type) = model_type {
            let sql = format!(
                "SELECT {ARTIFACT_COLUMNS} FROM ml_models WHERE model_type = ?1 ORDER BY id DESC"
            );
            let mut stmt = self.connection.prepare(&sql)?;
            let artifact_iter =
                stmt.query_map(params![model_type.as_str()], Self::row_to_artifact)?;
            for artifact in artifact_iter {
                artifacts.push(artifact?);
            }
        } else {
            let sql = format!("SELECT {ARTIFACT_COLUMNS} FROM ml_models ORDER BY id DESC");
            let mut stmt = self.connection.prepare(&sql)?;
            let artifact_iter = stmt.query_map([], Self::row_to_artifact)?;
            for artifact in artifact_iter {
                artifacts.push(artifact?);
            }
        }

        Ok(artifacts)
    }

    /// データベースの行をモデルに変換
    fn row_to_artifact(row: &Row) -> rusqlite::Result<ModelArtifact> {
        let model_type: String = row.get("model_type")?;

        Ok(ModelArtifact {
            id: row.get("id")?,
            name: row.get("name")?,
            model_type: model_type.parse().map_err(|_e| {
                rusqlite::Error::InvalidColumnType(
                    0,
                    "model_type".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?,
            version: row.get("version")?,
            accuracy: row.get("accuracy")?,
            payload: row.get("model_data")?,
            is_active: row.get("is_active")?,
            created_at: parse_datetime(&row.get::<_, String>("created_at")?, "created_at")?,
        })
    }
}
