use thiserror::Error;

use crate::database::ModelType;

/// Failure kinds shared by the training and inference paths.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Fewer input records than the model needs
    #[error("Insufficient data for {model_type} training: need at least {required}, found {found}")]
    InsufficientData {
        model_type: ModelType,
        required: usize,
        found: usize,
    },

    /// Inference requested before any model of this type was activated
    #[error("No active {0} model")]
    NoActiveModel(ModelType),

    /// k-means fitting failed
    #[error("Clustering failed: {0}")]
    Clustering(String),

    /// Store access failed
    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),

    /// Stored model parameters could not be encoded or decoded
    #[error("Model payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// Anything else
    #[error("{0}")]
    Failure(String),
}

impl EngineError {
    pub fn insufficient(model_type: ModelType, required: usize, found: usize) -> Self {
        Self::InsufficientData {
            model_type,
            required,
            found,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }

    /// True for the "not enough records" case
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, Self::InsufficientData { .. })
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(anyhow::Error::new(err))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
