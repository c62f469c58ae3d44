//! Per-frame context for rendering.

use ash::vk;

use crate::caps::PresentationMode;

/// Non-owning view of an offscreen attachment for the current frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentView {
    pub name: String,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub aspect: vk::ImageAspectFlags,
    pub samples: vk::SampleCountFlags,
    /// Layout the attachment is in when renderer hooks run.
    pub layout: vk::ImageLayout,
}

/// Context for the current frame being rendered.
///
/// Built fresh for every frame and never mutated while renderer and plugin
/// hooks run. Hooks must not keep anything borrowed from it.
#[derive(Debug, Clone)]
pub struct FrameContext {
    /// Current frame number, starting at 0.
    pub frame_number: u64,
    /// Frame slot in use (`frame_number % frame_overlap`).
    pub slot: usize,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// Swapchain extent.
    pub extent: vk::Extent2D,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    /// Seconds since the engine started.
    pub elapsed: f64,
    /// Primary command buffer, recording.
    pub command_buffer: vk::CommandBuffer,
    /// The swapchain image for this frame.
    pub swapchain_image: vk::Image,
    pub swapchain_view: vk::ImageView,
    pub swapchain_format: vk::Format,
    /// Offscreen color attachments in declaration order.
    pub color_attachments: Vec<AttachmentView>,
    pub depth_attachment: Option<AttachmentView>,
    /// Index into `color_attachments` of the attachment that gets presented.
    pub presentation_index: Option<usize>,
    pub presentation_mode: PresentationMode,
}

impl FrameContext {
    /// A context without a command buffer, handed to `initialize` and
    /// `on_swapchain_ready`.
    pub fn is_stub(&self) -> bool {
        self.command_buffer == vk::CommandBuffer::null()
    }

    /// The attachment that reaches the screen, if any.
    pub fn presentation_attachment(&self) -> Option<&AttachmentView> {
        self.presentation_index
            .and_then(|index| self.color_attachments.get(index))
    }

    /// Look up a color attachment by name.
    pub fn color_attachment(&self, name: &str) -> Option<&AttachmentView> {
        self.color_attachments.iter().find(|a| a.name == name)
    }

    /// Width over height.
    #[allow(clippy::cast_precision_loss)]
    pub fn aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height.max(1) as f32
    }
}
