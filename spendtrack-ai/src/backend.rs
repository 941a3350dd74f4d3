//! Text-generation backend interface.

use spendtrack_core::BackendError;

/// A pure request/response generation call. The resolver owns prompt
/// construction and response cleanup; implementations own transport, auth,
/// and model parameters.
#[allow(async_fn_in_trait)]
pub trait ModelBackend {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError>;
}
