//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
///
/// Everything here is fatal for the engine. Recoverable presentation states
/// (`ERROR_OUT_OF_DATE_KHR`, `SUBOPTIMAL_KHR`) are reported through
/// [`AcquireOutcome`](crate::AcquireOutcome) and
/// [`PresentOutcome`](crate::PresentOutcome) instead.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// A bounded GPU wait expired. Treated as device loss.
    #[error("GPU wait timed out after {timeout_ms} ms while {operation}")]
    Timeout {
        /// What the engine was waiting for.
        operation: &'static str,
        /// The timeout that expired.
        timeout_ms: u64,
    },

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
