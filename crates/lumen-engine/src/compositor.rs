//! Getting the finished frame onto the swapchain image.
//!
//! Planning is pure: [`plan_composition`] returns the barriers and blit for a
//! presentation mode and the backend records them. Whatever the mode, the
//! swapchain image is in `COLOR_ATTACHMENT_OPTIMAL` after composition so the
//! UI overlay and plugins can draw on top, and [`present_barrier`] moves it to
//! `PRESENT_SRC_KHR` last.

use ash::vk;
use lumen_gpu::{BlitRegion, ImageBarrier};

use crate::caps::PresentationMode;
use crate::frame::AttachmentView;

/// Swapchain image a frame renders to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainTarget {
    pub image: vk::Image,
    pub extent: vk::Extent2D,
}

/// Commands that compose one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositionPlan {
    pub pre_barriers: Vec<ImageBarrier>,
    pub blit: Option<BlitRegion>,
    pub post_barriers: Vec<ImageBarrier>,
}

impl CompositionPlan {
    /// Whether the plan records nothing.
    pub fn is_empty(&self) -> bool {
        self.pre_barriers.is_empty() && self.blit.is_none() && self.post_barriers.is_empty()
    }
}

/// Barrier run before `record_graphics` in direct-to-swapchain mode.
pub fn direct_barrier(target: SwapchainTarget) -> ImageBarrier {
    ImageBarrier::color(
        target.image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    )
}

/// Final transition before submission.
pub fn present_barrier(target: SwapchainTarget) -> ImageBarrier {
    ImageBarrier::color(
        target.image,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        vk::ImageLayout::PRESENT_SRC_KHR,
    )
}

/// Plan composition for `mode`.
///
/// `source` is the presentation attachment; it is only read in
/// [`PresentationMode::EngineBlit`] and is returned to its own layout
/// afterwards. Without a source, engine blit degrades to a bare transition.
pub fn plan_composition(
    mode: PresentationMode,
    target: SwapchainTarget,
    source: Option<&AttachmentView>,
) -> CompositionPlan {
    match (mode, source) {
        (PresentationMode::EngineBlit, Some(source)) => {
            let to_transfer_src = ImageBarrier::transition(
                source.image,
                source.aspect,
                source.layout,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            );
            let swapchain_to_dst = ImageBarrier::color(
                target.image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            let restore_source = ImageBarrier::transition(
                source.image,
                source.aspect,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                source.layout,
            );
            let swapchain_to_color = ImageBarrier::color(
                target.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            );
            CompositionPlan {
                pre_barriers: vec![to_transfer_src, swapchain_to_dst],
                blit: Some(BlitRegion {
                    src_image: source.image,
                    src_extent: source.extent,
                    dst_image: target.image,
                    dst_extent: target.extent,
                }),
                post_barriers: vec![restore_source, swapchain_to_color],
            }
        }
        (PresentationMode::EngineBlit | PresentationMode::RendererComposite, _) => {
            CompositionPlan {
                pre_barriers: vec![direct_barrier(target)],
                ..CompositionPlan::default()
            }
        }
        (PresentationMode::DirectToSwapchain, _) => CompositionPlan::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn target() -> SwapchainTarget {
        SwapchainTarget {
            image: vk::Image::from_raw(100),
            extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
        }
    }

    fn source() -> AttachmentView {
        AttachmentView {
            name: "color".to_string(),
            image: vk::Image::from_raw(7),
            view: vk::ImageView::from_raw(8),
            format: vk::Format::R16G16B16A16_SFLOAT,
            extent: vk::Extent2D {
                width: 640,
                height: 360,
            },
            aspect: vk::ImageAspectFlags::COLOR,
            samples: vk::SampleCountFlags::TYPE_1,
            layout: vk::ImageLayout::GENERAL,
        }
    }

    fn layouts(barriers: &[ImageBarrier]) -> Vec<(u64, vk::ImageLayout, vk::ImageLayout)> {
        barriers
            .iter()
            .map(|b| (b.image.as_raw(), b.old_layout, b.new_layout))
            .collect()
    }

    #[test]
    fn engine_blit_round_trips_the_source_layout() {
        let plan = plan_composition(PresentationMode::EngineBlit, target(), Some(&source()));

        assert_eq!(
            layouts(&plan.pre_barriers),
            [
                (
                    7,
                    vk::ImageLayout::GENERAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL
                ),
                (
                    100,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL
                ),
            ]
        );
        let blit = plan.blit.unwrap();
        assert_eq!(blit.src_extent.width, 640);
        assert_eq!(blit.dst_extent.width, 1280);
        assert_eq!(
            layouts(&plan.post_barriers),
            [
                (
                    7,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::ImageLayout::GENERAL
                ),
                (
                    100,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                ),
            ]
        );
    }

    #[test]
    fn renderer_composite_only_prepares_the_swapchain() {
        let plan = plan_composition(
            PresentationMode::RendererComposite,
            target(),
            Some(&source()),
        );
        assert!(plan.blit.is_none());
        assert!(plan.post_barriers.is_empty());
        assert_eq!(
            layouts(&plan.pre_barriers),
            [(
                100,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            )]
        );
    }

    #[test]
    fn direct_mode_composes_nothing() {
        let plan = plan_composition(PresentationMode::DirectToSwapchain, target(), None);
        assert!(plan.is_empty());
        assert_eq!(
            direct_barrier(target()).new_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn present_barrier_ends_in_present_src() {
        let barrier = present_barrier(target());
        assert_eq!(barrier.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }
}
