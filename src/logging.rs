//! ログ初期化

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

/// ログファイルの出力先（設定がなければXDGデータディレクトリ配下）
pub fn resolve_log_dir(config: &LogConfig) -> Result<PathBuf> {
    if let Some(dir) = &config.log_dir {
        return Ok(dir.clone());
    }

    let project_dirs = ProjectDirs::from("dev", "storefront", "storefront-ai")
        .context("Failed to get project directories")?;
    Ok(project_dirs.data_local_dir().join("logs"))
}

/// tracingを初期化する
///
/// `RUST_LOG` が設定されていれば設定ファイルのレベルより優先する。
/// ファイル出力が有効な場合は日次ローテーションのファイルにも書き出し、
/// 返されたガードが生きている間だけ書き込みが行われる。
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log level")?;

    let (file_layer, guard) = if config.enable_file_logging {
        let log_dir = resolve_log_dir(config)?;
        std::fs::create_dir_all(&log_dir).with_context(|| {
            format!("Failed to create log directory: {}", log_dir.display())
        })?;

        let appender = tracing_appender::rolling::daily(&log_dir, "storefront-ai.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_log_dir_is_used() {
        let config = LogConfig {
            log_dir: Some(PathBuf::from("/var/log/storefront")),
            ..LogConfig::default()
        };
        assert_eq!(
            resolve_log_dir(&config).unwrap(),
            PathBuf::from("/var/log/storefront")
        );
    }

    #[test]
    fn test_default_log_dir_under_project_dirs() {
        if let Ok(dir) = resolve_log_dir(&LogConfig::default()) {
            assert!(dir.ends_with("logs"));
        }
    }
}
