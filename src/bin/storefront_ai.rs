use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use storefront_ai::{
    config::{AppConfig, ConfigManager},
    database::{get_database_path, ModelType, ShopDatabase},
    io, logging, AiService,
};

/// ストアフロントのAI機能（レコメンド・価格予測・顧客セグメント）
#[derive(Parser)]
#[command(name = "storefront-ai")]
#[command(about = "Train and query the storefront recommendation, pricing and segmentation models")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model and make it active
    Train {
        /// recommendation, pricing or segmentation
        model_type: ModelType,
    },
    /// Recommend products for a customer
    Recommend {
        #[arg(short, long)]
        user: i64,
        /// Number of products (defaults to the configured count)
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Write AI recommended prices for every product
    UpdatePrices,
    /// Show segment definitions and customer assignments
    Segments,
    /// List stored models, newest first
    Models {
        #[arg(short = 't', long = "type")]
        model_type: Option<ModelType>,
    },
    /// Make a stored model the active one for its type
    Activate { id: i64 },
    /// Import NDJSON records
    Import { kind: ImportKind, file: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum ImportKind {
    Products,
    Profiles,
    Behaviors,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    let manager = match path {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    manager.load_config()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    let _log_guard = logging::init_logging(&config.log)?;

    let db_path = match cli.database.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => get_database_path()?,
    };
    tracing::info!(database = %db_path.display(), "🛒 Starting storefront-ai");

    let db = ShopDatabase::new(&db_path)?;
    let mut service = AiService::new(db, config);

    match cli.command {
        Commands::Train { model_type } => {
            let outcome = service.train(model_type);
            print_json(&outcome)?;
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Commands::Recommend { user, count } => {
            let recommendations = match count {
                Some(n) => service.get_recommendations(user, n),
                None => service.get_default_recommendations(user),
            };
            print_json(&recommendations)?;
        }
        Commands::UpdatePrices => {
            let updated = service.update_all_prices();
            print_json(&serde_json::json!({ "updated": updated }))?;
        }
        Commands::Segments => {
            print_json(&service.get_segments())?;
        }
        Commands::Models { model_type } => {
            print_json(&service.database().list_artifacts(model_type)?)?;
        }
        Commands::Activate { id } => {
            let artifact = service.database_mut().activate_artifact(id)?;
            print_json(&artifact)?;
        }
        Commands::Import { kind, file } => {
            let db = service.database_mut();
            let imported = match kind {
                ImportKind::Products => io::import_products(db, &file)?,
                ImportKind::Profiles => io::import_profiles(db, &file)?,
                ImportKind::Behaviors => io::import_behaviors(db, &file)?,
            };
            print_json(&serde_json::json!({ "imported": imported }))?;
        }
    }

    Ok(())
}
