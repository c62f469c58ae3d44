//! Engine error types.

use lumen_gpu::GpuError;
use thiserror::Error;

/// Errors surfaced by the engine.
///
/// All of these are fatal for the running engine; swapchain staleness is
/// handled internally and never shows up here.
#[derive(Error, Debug)]
pub enum EngineError {
    /// GPU-layer failure, including bounded-wait timeouts.
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// `init` was called before a renderer was attached.
    #[error("No renderer attached")]
    NoRenderer,

    /// The context has no GPU device (simulated backend).
    #[error("Engine context is detached from a GPU device")]
    Detached,

    /// Negotiated renderer capabilities are contradictory.
    #[error("Invalid renderer capabilities: {0}")]
    InvalidCaps(String),

    /// A renderer or plugin hook failed.
    #[error("{hook} failed: {error:#}")]
    Renderer {
        /// Hook that reported the failure.
        hook: &'static str,
        /// The hook's error.
        error: anyhow::Error,
    },

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Wrap a hook error with the hook name.
    pub fn hook(hook: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |error| Self::Renderer { hook, error }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_errors_name_the_hook() {
        let result: anyhow::Result<()> = Err(anyhow::anyhow!("shader missing"));
        let err = result.map_err(EngineError::hook("initialize")).unwrap_err();
        assert_eq!(err.to_string(), "initialize failed: shader missing");
    }

    #[test]
    fn timeouts_pass_through() {
        let err = EngineError::from(GpuError::Timeout {
            operation: "waiting for the frame timeline",
            timeout_ms: 5000,
        });
        assert!(err.to_string().contains("5000 ms"));
    }
}
