//! アプリケーション設定管理モジュール
//!
//! XDGディレクトリ上の `config.toml` を読み書きする。各セクションは
//! `#[serde(default)]` なので、書かれていない項目はデフォルト値になる。

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// レコメンド設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecommendationConfig {
    /// 件数指定がない場合の推薦数
    pub default_count: usize,
    /// 購入1回あたりのスコア
    pub purchase_weight: f64,
    /// 閲覧1回あたりのスコア
    pub view_weight: f64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            default_count: 10,
            purchase_weight: 3.0,
            view_weight: 1.0,
        }
    }
}

/// 価格予測設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PricingConfig {
    /// 学習に必要な最小商品数
    pub min_products: usize,
    pub n_estimators: usize,
    /// 検証用に取り分ける割合
    pub test_fraction: f64,
    pub random_seed: u64,
    /// 推奨価格の下限（定価に対する比率）
    pub price_floor_ratio: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            min_products: 10,
            n_estimators: 100,
            test_fraction: 0.2,
            random_seed: 42,
            price_floor_ratio: 0.7,
        }
    }
}

/// 顧客セグメント設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmentationConfig {
    /// 学習に必要な最小顧客数
    pub min_customers: usize,
    /// クラスタ数の上限
    pub max_clusters: usize,
    pub random_seed: u64,
    /// クラスタ番号順に割り当てるセグメント名
    pub segment_names: Vec<String>,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            min_customers: 5,
            max_clusters: 4,
            random_seed: 42,
            segment_names: ["High Value", "Regular", "New Customer", "At Risk"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

/// ログ設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// カスタムログディレクトリ（Noneの場合はXDGデフォルト使用）
    pub log_dir: Option<PathBuf>,
    /// ログレベル (trace/debug/info/warn/error)
    pub log_level: String,
    /// ファイル出力有効化
    pub enable_file_logging: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_level: "info".to_string(),
            enable_file_logging: false,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// データベースファイル（Noneの場合はXDGデフォルト使用）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub recommendation: RecommendationConfig,

    #[serde(default)]
    pub pricing: PricingConfig,

    #[serde(default)]
    pub segmentation: SegmentationConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// 設定管理マネージャー
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// XDG設定ディレクトリを使う設定マネージャーを作成
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        // 設定ディレクトリを作成（存在しない場合）
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        Ok(Self { config_path })
    }

    /// 任意のファイルを使う設定マネージャーを作成
    pub fn with_path(config_path: impl AsRef<Path>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    /// XDGディレクトリに基づく設定ファイルパスを取得
    fn get_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("dev", "storefront", "storefront-ai")
            .context("Failed to get project directories")?;

        let config_file = project_dirs.config_dir().join("config.toml");

        debug!("Config file path: {}", config_file.display());

        Ok(config_file)
    }

    /// 設定を読み込み（ファイルがなければデフォルト）
    pub fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!(
                "Config file not found, using default settings: {}",
                self.config_path.display()
            );
            return Ok(AppConfig::default());
        }

        let config_content = fs::read_to_string(&self.config_path).with_context(|| {
            format!("Failed to read config file: {}", self.config_path.display())
        })?;

        let config: AppConfig = toml::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse config file: {}",
                self.config_path.display()
            )
        })?;

        info!(
            "✅ Configuration loaded from: {}",
            self.config_path.display()
        );

        Ok(config)
    }

    /// 設定を保存
    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        let config_content =
            toml::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(&self.config_path, config_content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })?;

        info!("💾 Configuration saved to: {}", self.config_path.display());

        Ok(())
    }

    /// 設定ファイルパスを取得
    pub fn get_config_file_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// 設定をリセット（デフォルト値に戻す）
    pub fn reset_config(&self) -> Result<()> {
        self.save_config(&AppConfig::default())?;
        info!("🔄 Configuration reset to defaults");
        Ok(())
    }

    /// 設定ファイルが存在するかチェック
    pub fn config_exists(&self) -> bool {
        self.config_path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: AppConfig = toml::from_str(&serialized).unwrap();

        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_config_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.recommendation.default_count, 10);
        assert_eq!(config.recommendation.purchase_weight, 3.0);
        assert_eq!(config.pricing.min_products, 10);
        assert_eq!(config.pricing.price_floor_ratio, 0.7);
        assert_eq!(config.segmentation.min_customers, 5);
        assert_eq!(
            config.segmentation.segment_names,
            vec!["High Value", "Regular", "New Customer", "At Risk"]
        );
        assert!(!config.log.enable_file_logging);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_config_manager_save_load() {
        let temp_dir = tempdir().unwrap();
        let manager = ConfigManager::with_path(temp_dir.path().join("test_config.toml"));

        let mut original_config = AppConfig::default();
        original_config.database_path = Some(PathBuf::from("/tmp/shop.db"));
        original_config.pricing.n_estimators = 25;

        // 保存
        manager.save_config(&original_config).unwrap();
        assert!(manager.config_exists());

        // 読み込み
        let loaded_config = manager.load_config().unwrap();
        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let temp_dir = tempdir().unwrap();
        let manager = ConfigManager::with_path(temp_dir.path().join("nonexistent.toml"));

        // 存在しないファイルの読み込み時はデフォルトが返される
        assert!(!manager.config_exists());
        assert_eq!(manager.load_config().unwrap(), AppConfig::default());
    }

    #[test]
    fn test_config_load_corrupted_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("corrupted.toml");

        // 破損したTOMLファイルを作成
        std::fs::write(&config_path, "invalid toml content [unclosed section").unwrap();

        let manager = ConfigManager::with_path(&config_path);

        let result = manager.load_config();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to parse config file"));
    }

    #[test]
    fn test_config_load_partial_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("partial.toml");

        let partial_toml = r#"
[pricing]
n_estimators = 50

[segmentation]
segment_names = ["Gold", "Silver"]
"#;
        std::fs::write(&config_path, partial_toml).unwrap();

        let loaded_config = ConfigManager::with_path(&config_path).load_config().unwrap();

        // 指定されたフィールドは読み込まれ、省略されたフィールドはデフォルト値になる
        assert_eq!(loaded_config.pricing.n_estimators, 50);
        assert_eq!(loaded_config.pricing.min_products, 10);
        assert_eq!(loaded_config.segmentation.segment_names, vec!["Gold", "Silver"]);
        assert_eq!(loaded_config.segmentation.max_clusters, 4);
        assert_eq!(loaded_config.recommendation, RecommendationConfig::default());
    }

    #[test]
    fn test_config_save_invalid_path() {
        let manager = ConfigManager::with_path("/nonexistent/directory/config.toml");

        // 存在しないディレクトリへの保存は失敗する
        assert!(manager.save_config(&AppConfig::default()).is_err());
    }

    #[test]
    fn test_config_reset() {
        let temp_dir = tempdir().unwrap();
        let manager = ConfigManager::with_path(temp_dir.path().join("reset.toml"));

        let mut config = AppConfig::default();
        config.log.log_level = "debug".to_string();
        manager.save_config(&config).unwrap();

        manager.reset_config().unwrap();
        assert_eq!(manager.load_config().unwrap().log.log_level, "info");
    }
}
