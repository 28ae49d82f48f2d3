use crate::types::FilterAttrition;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("No symbols passed eligibility filters ({0})")]
    NoEligibleSymbols(FilterAttrition),

    #[error("Covariance unavailable: {0}")]
    CovarianceUnavailable(String),

    #[error("Model artifact error: {0}")]
    ModelArtifact(String),

    #[error("No enabled models with positive ensemble weight")]
    NoEnabledModels,

    #[error("Calculation error: {0}")]
    Calculation(String),
}
