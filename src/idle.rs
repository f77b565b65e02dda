//! Idle decision on top of the selected backend.

use tracing::debug;

use crate::backend::IdleBackend;
use crate::backend::Registry;
use crate::backend::SelectError;
use crate::config::BackendChoice;
use crate::config::IdleThreshold;

/// Idle monitor owning one backend for the life of the process.
pub struct IdleMonitor {
    backend: Box<dyn IdleBackend>,
    threshold: IdleThreshold,
}

impl IdleMonitor {
    /// Wrap an already constructed backend.
    pub fn new(backend: Box<dyn IdleBackend>, threshold: IdleThreshold) -> Self {
        Self { backend, threshold }
    }

    /// Ask the registry for a backend and wrap it.
    pub async fn select(
        registry: &Registry,
        threshold: IdleThreshold,
        choice: &BackendChoice,
    ) -> Result<Self, SelectError> {
        let backend = registry.select(threshold, choice).await?;
        Ok(Self::new(backend, threshold))
    }

    /// Name of the backend in use.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Configured threshold.
    pub fn threshold(&self) -> IdleThreshold {
        self.threshold
    }

    /// Seconds since the last user input.
    pub async fn idle_seconds(&mut self) -> f64 {
        self.backend.idle_seconds().await
    }

    /// Check if the session is idle, i.e. idle longer than the threshold.
    pub async fn is_idle(&mut self) -> bool {
        let idle = self.idle_seconds().await;
        let result = exceeds_threshold(idle, self.threshold);
        debug!(
            "Idle for {:.3}s (threshold {}): idle={}",
            idle, self.threshold, result
        );
        result
    }
}

/// Strictly greater than: exactly the threshold is still active.
#[allow(clippy::cast_precision_loss)]
pub fn exceeds_threshold(idle_seconds: f64, threshold: IdleThreshold) -> bool {
    idle_seconds > threshold.as_secs() as f64
}
