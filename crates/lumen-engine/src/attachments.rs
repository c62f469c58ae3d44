//! Offscreen render targets.

use ash::vk;
use lumen_gpu::GpuImage;
use tracing::debug;

use crate::backend::GpuBackend;
use crate::caps::{AttachmentRequest, RendererCaps};
use crate::error::Result;
use crate::frame::AttachmentView;

struct AttachmentResource {
    request: AttachmentRequest,
    image: GpuImage,
}

impl AttachmentResource {
    fn view(&self) -> AttachmentView {
        AttachmentView {
            name: self.request.name.clone(),
            image: self.image.image,
            view: self.image.view,
            format: self.request.format,
            extent: self.image.extent_2d(),
            aspect: self.request.aspect,
            samples: self.request.samples,
            layout: self.request.initial_layout,
        }
    }
}

/// Owns the color and depth attachments described by [`RendererCaps`].
///
/// Rebuilt on every swapchain recreation.
#[derive(Default)]
pub struct AttachmentManager {
    colors: Vec<AttachmentResource>,
    depth: Option<AttachmentResource>,
    presentation_index: Option<usize>,
}

impl AttachmentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate every attachment in `caps` at `extent` (clamped to 1x1).
    ///
    /// On failure, anything already allocated is released.
    pub fn create_targets<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        caps: &RendererCaps,
        extent: vk::Extent2D,
    ) -> Result<()> {
        self.destroy_targets(backend);

        let extent = vk::Extent2D {
            width: extent.width.max(1),
            height: extent.height.max(1),
        };

        for request in &caps.color_attachments {
            match backend.create_attachment(request, extent) {
                Ok(image) => self.colors.push(AttachmentResource {
                    request: request.clone(),
                    image,
                }),
                Err(e) => {
                    self.destroy_targets(backend);
                    return Err(e);
                }
            }
        }

        if let Some(request) = &caps.depth_attachment {
            match backend.create_attachment(request, extent) {
                Ok(image) => {
                    self.depth = Some(AttachmentResource {
                        request: request.clone(),
                        image,
                    });
                }
                Err(e) => {
                    self.destroy_targets(backend);
                    return Err(e);
                }
            }
        }

        self.presentation_index = if self.colors.is_empty() {
            None
        } else {
            Some(
                caps.presentation_attachment
                    .as_deref()
                    .and_then(|name| self.colors.iter().position(|a| a.request.name == name))
                    .unwrap_or(0),
            )
        };

        debug!(
            "Render targets created: {}x{}, {} color, depth: {}",
            extent.width,
            extent.height,
            self.colors.len(),
            self.depth.is_some()
        );
        Ok(())
    }

    /// Release every attachment. The device must be idle.
    pub fn destroy_targets<B: GpuBackend>(&mut self, backend: &mut B) {
        for attachment in self.colors.drain(..).rev() {
            backend.destroy_attachment(attachment.image);
        }
        if let Some(depth) = self.depth.take() {
            backend.destroy_attachment(depth.image);
        }
        self.presentation_index = None;
    }

    /// Views of the color attachments, in declaration order.
    pub fn color_views(&self) -> Vec<AttachmentView> {
        self.colors.iter().map(AttachmentResource::view).collect()
    }

    /// View of the depth attachment.
    pub fn depth_view(&self) -> Option<AttachmentView> {
        self.depth.as_ref().map(AttachmentResource::view)
    }

    /// Index of the presentation attachment among the color attachments.
    pub fn presentation_index(&self) -> Option<usize> {
        self.presentation_index
    }

    /// Whether no attachment is allocated.
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty() && self.depth.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::PresentationMode;
    use crate::testing::MockBackend;

    fn caps_with(names: &[&str], presentation: Option<&str>, depth: bool) -> RendererCaps {
        RendererCaps {
            color_attachments: names
                .iter()
                .map(|n| AttachmentRequest::color(*n, vk::Format::R8G8B8A8_UNORM))
                .collect(),
            presentation_attachment: presentation.map(str::to_string),
            uses_depth: depth,
            ..RendererCaps::default()
        }
    }

    #[test]
    fn zero_extent_is_clamped() {
        let mut backend = MockBackend::new();
        let mut targets = AttachmentManager::new();
        let mut caps = caps_with(&["color"], None, true);
        caps.sanitize();

        targets
            .create_targets(&mut backend, &caps, vk::Extent2D::default())
            .unwrap();

        let color = &targets.color_views()[0];
        assert_eq!((color.extent.width, color.extent.height), (1, 1));
        let depth = targets.depth_view().unwrap();
        assert_eq!(depth.aspect, vk::ImageAspectFlags::DEPTH);
        assert_eq!(targets.presentation_index(), Some(0));
    }

    #[test]
    fn presentation_index_resolves_by_name() {
        let mut backend = MockBackend::new();
        let mut targets = AttachmentManager::new();
        let caps = caps_with(&["albedo", "final"], Some("final"), false);
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };

        targets.create_targets(&mut backend, &caps, extent).unwrap();
        assert_eq!(targets.presentation_index(), Some(1));

        let unknown = caps_with(&["albedo", "final"], Some("missing"), false);
        targets.create_targets(&mut backend, &unknown, extent).unwrap();
        assert_eq!(targets.presentation_index(), Some(0));
        assert_eq!(backend.live_attachments(), 2);
    }

    #[test]
    fn destroy_releases_everything() {
        let mut backend = MockBackend::new();
        let mut targets = AttachmentManager::new();
        let mut caps = caps_with(&["a", "b"], None, true);
        caps.sanitize();

        targets
            .create_targets(&mut backend, &caps, vk::Extent2D { width: 4, height: 4 })
            .unwrap();
        assert_eq!(backend.live_attachments(), 3);

        targets.destroy_targets(&mut backend);
        assert!(targets.is_empty());
        assert_eq!(targets.presentation_index(), None);
        assert_eq!(backend.live_attachments(), 0);
    }

    #[test]
    fn direct_mode_allocates_no_color() {
        let mut backend = MockBackend::new();
        let mut targets = AttachmentManager::new();
        let mut caps = caps_with(&["ignored"], None, false);
        caps.presentation_mode = PresentationMode::DirectToSwapchain;
        caps.sanitize();

        targets
            .create_targets(&mut backend, &caps, vk::Extent2D { width: 4, height: 4 })
            .unwrap();
        assert!(targets.is_empty());
        assert_eq!(targets.presentation_index(), None);
    }

    #[test]
    fn failed_allocation_rolls_back() {
        let mut backend = MockBackend::new();
        backend.fail_attachment_after(1);
        let mut targets = AttachmentManager::new();
        let caps = caps_with(&["a", "b", "c"], None, false);

        let result =
            targets.create_targets(&mut backend, &caps, vk::Extent2D { width: 4, height: 4 });
        assert!(result.is_err());
        assert!(targets.is_empty());
        assert_eq!(backend.live_attachments(), 0);
    }
}
