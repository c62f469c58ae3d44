//! Image layout transitions, blits and readback copies.
//!
//! [`ImageBarrier`] and [`BlitRegion`] are plain values so callers can plan a
//! sequence of transitions without a device and record it later.

use ash::vk;

/// Pipeline stage and access mask that touch an image in `layout`.
pub fn stage_access(layout: vk::ImageLayout) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
        ),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_SAMPLED_READ,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (
            vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            vk::AccessFlags2::NONE,
        ),
        // GENERAL and anything exotic: full barrier.
        _ => (
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
        ),
    }
}

/// A single-subresource image layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl ImageBarrier {
    /// Transition `image` between layouts, deriving stages and access masks
    /// from the layouts.
    pub fn transition(
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> Self {
        let (src_stage, src_access) = stage_access(old_layout);
        let (dst_stage, dst_access) = stage_access(new_layout);
        Self {
            image,
            aspect,
            old_layout,
            new_layout,
            src_stage,
            src_access,
            dst_stage,
            dst_access,
        }
    }

    /// Color-aspect shorthand for [`ImageBarrier::transition`].
    pub fn color(image: vk::Image, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        Self::transition(image, vk::ImageAspectFlags::COLOR, old_layout, new_layout)
    }

    /// Override the source scope.
    #[must_use]
    pub fn with_src(mut self, stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        self.src_stage = stage;
        self.src_access = access;
        self
    }

    /// Vulkan form of the barrier, covering mip 0 / layer 0.
    pub fn to_vk(&self) -> vk::ImageMemoryBarrier2<'static> {
        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(self.src_stage)
            .src_access_mask(self.src_access)
            .dst_stage_mask(self.dst_stage)
            .dst_access_mask(self.dst_access)
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: self.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
    }
}

/// Record all `barriers` in a single `vkCmdPipelineBarrier2`.
///
/// # Safety
/// The device, command buffer and images must be valid; the command buffer
/// must be recording.
pub unsafe fn record_barriers(device: &ash::Device, cmd: vk::CommandBuffer, barriers: &[ImageBarrier]) {
    if barriers.is_empty() {
        return;
    }
    let barriers: Vec<_> = barriers.iter().map(ImageBarrier::to_vk).collect();
    let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);
    device.cmd_pipeline_barrier2(cmd, &dependency_info);
}

/// A full-image color blit between two images of possibly different sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlitRegion {
    pub src_image: vk::Image,
    pub src_extent: vk::Extent2D,
    pub dst_image: vk::Image,
    pub dst_extent: vk::Extent2D,
}

impl BlitRegion {
    fn corner(extent: vk::Extent2D) -> vk::Offset3D {
        vk::Offset3D {
            x: i32::try_from(extent.width).unwrap_or(i32::MAX),
            y: i32::try_from(extent.height).unwrap_or(i32::MAX),
            z: 1,
        }
    }

    /// Vulkan form of the region.
    pub fn to_vk(&self) -> vk::ImageBlit {
        let layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        vk::ImageBlit {
            src_subresource: layers,
            src_offsets: [vk::Offset3D::default(), Self::corner(self.src_extent)],
            dst_subresource: layers,
            dst_offsets: [vk::Offset3D::default(), Self::corner(self.dst_extent)],
        }
    }
}

/// Record a linear-filtered blit. The source must be in `TRANSFER_SRC_OPTIMAL`
/// and the destination in `TRANSFER_DST_OPTIMAL`.
///
/// # Safety
/// The device, command buffer and images must be valid.
pub unsafe fn record_blit(device: &ash::Device, cmd: vk::CommandBuffer, region: &BlitRegion) {
    device.cmd_blit_image(
        cmd,
        region.src_image,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        region.dst_image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &[region.to_vk()],
        vk::Filter::LINEAR,
    );
}

/// Record a tightly packed copy of a color image into `buffer`. The image
/// must be in `TRANSFER_SRC_OPTIMAL`.
///
/// # Safety
/// The device, command buffer, image and buffer must be valid, and the buffer
/// must be large enough for the image.
pub unsafe fn record_copy_image_to_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    extent: vk::Extent2D,
    buffer: vk::Buffer,
) {
    let region = vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D::default(),
        image_extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
    };
    device.cmd_copy_image_to_buffer(
        cmd,
        image,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        buffer,
        &[region],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn transition_derives_scopes_from_layouts() {
        let image = vk::Image::from_raw(7);
        let barrier = ImageBarrier::color(
            image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert_eq!(barrier.src_stage, vk::PipelineStageFlags2::TOP_OF_PIPE);
        assert_eq!(barrier.src_access, vk::AccessFlags2::NONE);
        assert_eq!(barrier.dst_stage, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(barrier.dst_access, vk::AccessFlags2::TRANSFER_WRITE);

        let raw = barrier.to_vk();
        assert_eq!(raw.image, image);
        assert_eq!(raw.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(raw.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }

    #[test]
    fn present_is_bottom_of_pipe() {
        let (stage, access) = stage_access(vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(stage, vk::PipelineStageFlags2::BOTTOM_OF_PIPE);
        assert_eq!(access, vk::AccessFlags2::NONE);
    }

    #[test]
    fn blit_region_covers_both_extents() {
        let region = BlitRegion {
            src_image: vk::Image::from_raw(1),
            src_extent: vk::Extent2D {
                width: 640,
                height: 360,
            },
            dst_image: vk::Image::from_raw(2),
            dst_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
        };
        let blit = region.to_vk();
        assert_eq!(blit.src_offsets[1].x, 640);
        assert_eq!(blit.dst_offsets[1].y, 720);
        assert_eq!(blit.dst_offsets[1].z, 1);
    }
}
