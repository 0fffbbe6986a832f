pub mod fake;
pub mod ollama;

use crate::errors::ClassifyError;
use crate::model::ClassificationRequest;
use async_trait::async_trait;

/// Transport to the external classification service.
///
/// Implementations return the assistant message content verbatim; parsing and
/// caching live in [`crate::client::ClassificationClient`].
#[async_trait]
pub trait ClassificationService: Send + Sync {
    async fn chat(&self, request: &ClassificationRequest) -> Result<String, ClassifyError>;

    /// Cheap reachability probe run before a batch.
    async fn health(&self) -> Result<(), ClassifyError> {
        Ok(())
    }

    fn provider_name(&self) -> &'static str;

    fn endpoint(&self) -> &str;
}
