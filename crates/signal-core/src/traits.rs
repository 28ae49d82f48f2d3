use crate::{EngineError, FeatureSnapshot, ModelConfig, ModelOutput};
use async_trait::async_trait;

/// A trained classifier/regressor artifact, supplied by the model-loading
/// layer. Rows are feature vectors in whatever input order the owning
/// model documents; that may be raw columns or derived composites.
/// Construction failures are hard errors at that layer; inference
/// failures surface as `EngineError::ModelArtifact`.
pub trait Classifier: Send + Sync {
    /// Probability per row, each in [0, 1]
    fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, EngineError>;

    /// Continuous prediction per row (e.g. expected return)
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, EngineError>;
}

/// A pluggable signal model. Signal generation is async so a future
/// model may fetch remote features; the fusion engine invokes models
/// sequentially and isolates per-model failures.
#[async_trait]
pub trait SignalModel: Send + Sync {
    fn config(&self) -> &ModelConfig;

    /// Score every usable symbol in the snapshot.
    async fn generate_signals(
        &self,
        snapshot: &FeatureSnapshot,
    ) -> Result<Vec<ModelOutput>, EngineError>;

    /// Score a single symbol, if the model can use it.
    async fn get_signal(
        &self,
        snapshot: &FeatureSnapshot,
        symbol: &str,
    ) -> Result<Option<ModelOutput>, EngineError> {
        let outputs = self.generate_signals(snapshot).await?;
        Ok(outputs.into_iter().find(|o| o.symbol == symbol))
    }

    /// Human-readable explanation of one output.
    fn explain(&self, output: &ModelOutput) -> String;
}
