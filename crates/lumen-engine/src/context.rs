//! Engine context shared with renderers and plugins.

use std::sync::Arc;

use ash::vk;
use lumen_gpu::GpuContext;
use parking_lot::Mutex;

use crate::error::{EngineError, Result};
use crate::ui::{TabsHost, UiServices};

/// Handles passed by reference to every renderer and plugin hook.
///
/// Unchanged between swapchain rebuilds. A context without a GPU is
/// "detached" and only occurs with simulated backends.
#[derive(Clone)]
pub struct EngineContext {
    gpu: Option<Arc<GpuContext>>,
    /// A separate compute queue exists and async compute was negotiated.
    pub async_compute: bool,
    /// Current swapchain image format.
    pub swapchain_format: vk::Format,
    /// Current swapchain extent.
    pub extent: vk::Extent2D,
    /// Number of frame slots.
    pub frame_overlap: usize,
    services: Arc<Mutex<UiServices>>,
}

impl EngineContext {
    pub(crate) fn new(gpu: Option<Arc<GpuContext>>) -> Self {
        Self {
            gpu,
            async_compute: false,
            swapchain_format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            frame_overlap: 0,
            services: Arc::new(Mutex::new(UiServices::default())),
        }
    }

    /// A context without a GPU, for exercising hooks off-device.
    pub fn detached() -> Self {
        Self::new(None)
    }

    /// The GPU context.
    pub fn gpu(&self) -> Result<&Arc<GpuContext>> {
        self.gpu.as_ref().ok_or(EngineError::Detached)
    }

    /// The logical device.
    pub fn device(&self) -> Result<&ash::Device> {
        Ok(self.gpu()?.device())
    }

    /// Whether a GPU device is attached.
    pub fn is_attached(&self) -> bool {
        self.gpu.is_some()
    }

    /// Shared UI services.
    pub fn services(&self) -> &Arc<Mutex<UiServices>> {
        &self.services
    }

    /// Run `f` against the tabs host.
    pub fn with_tabs<R>(&self, f: impl FnOnce(&mut dyn TabsHost) -> R) -> R {
        let mut services = self.services.lock();
        f(&mut *services)
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("attached", &self.is_attached())
            .field("async_compute", &self.async_compute)
            .field("swapchain_format", &self.swapchain_format)
            .field("extent", &self.extent)
            .field("frame_overlap", &self.frame_overlap)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_context_reports_missing_gpu() {
        let engine = EngineContext::new(None);
        assert!(matches!(engine.gpu(), Err(EngineError::Detached)));
        assert!(matches!(engine.device(), Err(EngineError::Detached)));
    }

    #[test]
    fn clones_share_services() {
        let engine = EngineContext::new(None);
        let clone = engine.clone();
        clone.with_tabs(|tabs| tabs.add_tab("Stats"));
        assert_eq!(engine.services().lock().tabs(), ["Stats".to_string()]);
    }
}
