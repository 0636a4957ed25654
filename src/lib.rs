pub mod ai_engine;
pub mod config;
pub mod database;
pub mod io;
pub mod logging;

// Re-export the engine entry points for convenience
pub use ai_engine::{
    AiService, EngineError, EngineResult, PricingEngine, Recommendation, RecommendationEngine,
    SegmentReport, SegmentationEngine, TrainOutcome, TrainReport,
};

// Re-export configuration
pub use config::{AppConfig, ConfigManager};

// Re-export database modules
pub use database::{ModelArtifact, ModelType, Product, ShopDatabase, UserProfile};

// Re-export the import error type
pub use io::ImportError;
