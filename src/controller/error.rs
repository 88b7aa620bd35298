//! Error types for the XtraDBCluster controller

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`, `ExecError`).
/// This is idiomatic for error enums and improves readability at call sites.
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Exec error in pod {pod}: {message}")]
    ExecError { pod: String, message: String },

    #[error("Cannot parse crash log of pod {pod}: {reason}")]
    CrashLogParseError { pod: String, reason: String },

    #[error("Invalid storage quantity {0:?}")]
    QuantityError(String),

    #[error("Invalid resize annotation {0:?}: {1}")]
    AnnotationError(String, chrono::ParseError),

    #[error("Requested storage ({requested}) is less than actual storage ({actual})")]
    StorageShrinkError { requested: String, actual: String },

    #[error("Volume resize failed: {0}")]
    VolumeResizeError(String),

    #[error("Failed to write status: {0}")]
    StatusWriteError(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            // Kubernetes API errors are often retryable
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            Error::ExecError { .. } => true,
            Error::NotFound(_) => true,
            Error::StatusWriteError(_) => true,
            // The owner has to change the spec, retrying faster does not help
            Error::StorageShrinkError { .. } => false,
            Error::VolumeResizeError(_) => false,
            Error::QuantityError(_) => false,
            Error::AnnotationError(..) => false,
            Error::CrashLogParseError { .. } => false,
            Error::SerializationError(_) => false,
            Error::MissingObjectKey(_) => false,
        }
    }

    /// Whether the API server rejected a write because the object changed underneath us
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(resp)) if resp.code == 409)
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(resp)) => resp.code == 404,
            Error::NotFound(_) => true,
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300), // 5 minutes
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Short delays used between optimistic-concurrency retries of a single write
    pub fn conflict() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Get the delay for an error, with different handling for retryable vs non-retryable
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            // Non-retryable errors wait for the owner to fix the spec
            self.max_delay
        }
    }
}

/// Run a get-modify-update operation, retrying it while the write conflicts.
///
/// `operation` must re-read the object on every call so each attempt works on
/// the latest resource version. Any other error is returned immediately.
pub async fn retry_on_conflict<F, Fut, T>(
    max_attempts: u32,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let backoff = BackoffConfig::conflict();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_conflict() && attempt < max_attempts => {
                let delay = backoff.delay_for_attempt(attempt - 1);
                warn!(
                    operation = %operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Write conflict, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Build the API error kube returns for a stale write; used by tests
#[cfg(test)]
pub(crate) fn conflict_error() -> Error {
    Error::KubeError(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: "the object has been modified".to_string(),
        reason: "Conflict".to_string(),
        code: 409,
    }))
}
