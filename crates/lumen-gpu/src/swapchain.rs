//! Swapchain management.
//!
//! [`Swapchain`] owns the presentable image chain for one surface. It can be
//! destroyed and created again any number of times without touching other
//! state; the loader and surface outlive every individual chain.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::surface::SurfaceContext;
use ash::vk;

/// Lifecycle of a [`Swapchain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    /// No chain exists; `create` may be called.
    Uninitialized,
    /// A chain exists and can be acquired from.
    Created,
    /// The chain was destroyed for a rebuild; `create` is expected next.
    Recreating,
    /// Final state after shutdown.
    Destroyed,
}

impl SwapchainState {
    /// State after a successful `create`.
    pub fn created(self) -> Result<Self> {
        match self {
            Self::Uninitialized | Self::Recreating => Ok(Self::Created),
            other => Err(GpuError::InvalidState(format!(
                "cannot create swapchain while {other:?}"
            ))),
        }
    }

    /// State after `destroy`. Destroying an empty chain is a no-op.
    pub fn destroyed(self, recreating: bool) -> Self {
        match self {
            Self::Created if recreating => Self::Recreating,
            Self::Created => Self::Uninitialized,
            other => other,
        }
    }

    /// Whether a chain currently exists.
    pub fn is_created(self) -> bool {
        self == Self::Created
    }
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired. `suboptimal` means it is usable but the chain
    /// should be rebuilt.
    Acquired { image_index: u32, suboptimal: bool },
    /// No image was acquired; the chain must be rebuilt.
    OutOfDate,
}

impl AcquireOutcome {
    /// Whether the chain should be rebuilt.
    pub fn needs_recreate(&self) -> bool {
        matches!(
            self,
            Self::OutOfDate
                | Self::Acquired {
                    suboptimal: true,
                    ..
                }
        )
    }
}

/// Result of presenting an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the chain should be rebuilt.
    pub fn needs_recreate(&self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// Swapchain wrapper.
pub struct Swapchain {
    loader: ash::khr::swapchain::Device,
    device: ash::Device,
    surface: vk::SurfaceKHR,
    state: SwapchainState,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Create an empty swapchain manager for `surface`.
    pub fn new(gpu: &GpuContext, surface: &SurfaceContext) -> Self {
        Self {
            loader: ash::khr::swapchain::Device::new(gpu.instance(), gpu.device()),
            device: gpu.device().clone(),
            surface: surface.surface,
            state: SwapchainState::Uninitialized,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SwapchainState {
        self.state
    }

    /// Build the image chain.
    ///
    /// `usage` is added to `COLOR_ATTACHMENT`, which every chain carries.
    ///
    /// # Safety
    /// The GPU context and surface must be valid.
    pub unsafe fn create(
        &mut self,
        gpu: &GpuContext,
        surface: &SurfaceContext,
        width: u32,
        height: u32,
        vsync: bool,
        usage: vk::ImageUsageFlags,
    ) -> Result<()> {
        let next_state = self.state.created()?;
        let caps = surface.capabilities(gpu)?;

        let surface_format = select_surface_format(&caps.formats).ok_or_else(|| {
            GpuError::SwapchainCreation("surface reports no formats".to_string())
        })?;
        let present_mode = select_present_mode(&caps.present_modes, vsync);
        let extent = calculate_extent(&caps.capabilities, width, height);
        let image_count = choose_image_count(&caps.capabilities);

        let usage = resolve_image_usage(usage, caps.capabilities.supported_usage_flags)?;

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = self
            .loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let images = match self.loader.get_swapchain_images(swapchain) {
            Ok(images) => images,
            Err(e) => {
                self.loader.destroy_swapchain(swapchain, None);
                return Err(e.into());
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(color_subresource_range());

            match self.device.create_image_view(&view_info, None) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    for view in image_views {
                        self.device.destroy_image_view(view, None);
                    }
                    self.loader.destroy_swapchain(swapchain, None);
                    return Err(e.into());
                }
            }
        }

        tracing::debug!(
            "Swapchain created: {}x{} {:?} {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            images.len()
        );

        self.swapchain = swapchain;
        self.images = images;
        self.image_views = image_views;
        self.format = surface_format.format;
        self.extent = extent;
        self.present_mode = present_mode;
        self.state = next_state;
        Ok(())
    }

    /// Acquire the next image.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(
        feature = "profiling",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquireOutcome> {
        if !self.state.is_created() {
            return Err(GpuError::InvalidState(format!(
                "acquire on swapchain in state {:?}",
                self.state
            )));
        }

        match self.loader.acquire_next_image(
            self.swapchain,
            timeout_ns,
            semaphore,
            vk::Fence::null(),
        ) {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(GpuError::Timeout {
                operation: "acquiring a swapchain image",
                timeout_ms: timeout_ns / 1_000_000,
            }),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Present an image.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(
        feature = "profiling",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match self.loader.queue_present(queue, &present_info) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Release the image views and the chain.
    ///
    /// With `recreating` the state moves to `Recreating`, otherwise back to
    /// `Uninitialized`. Either way `create` may be called again.
    ///
    /// # Safety
    /// The chain must not be in use by the GPU.
    pub unsafe fn destroy(&mut self, recreating: bool) {
        if !self.state.is_created() {
            return;
        }
        for view in self.image_views.drain(..) {
            self.device.destroy_image_view(view, None);
        }
        self.loader.destroy_swapchain(self.swapchain, None);
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();
        self.state = self.state.destroyed(recreating);
    }

    /// Destroy any live chain and mark the manager finished.
    ///
    /// # Safety
    /// The chain must not be in use by the GPU.
    pub unsafe fn shutdown(&mut self) {
        self.destroy(false);
        self.state = SwapchainState::Destroyed;
    }
}

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Select the best surface format. `None` if the surface reports none.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        // FIFO is always supported
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Full swapchain image usage: `COLOR_ATTACHMENT` plus `requested`.
///
/// Fails naming the bits the surface does not support. Images created
/// without a usage the engine records commands for would be invalid to use.
pub fn resolve_image_usage(
    requested: vk::ImageUsageFlags,
    supported: vk::ImageUsageFlags,
) -> Result<vk::ImageUsageFlags> {
    let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | requested;
    let missing = usage & !supported;
    if !missing.is_empty() {
        return Err(GpuError::SwapchainCreation(format!(
            "surface does not support image usage {missing:?} (supported: {supported:?})"
        )));
    }
    Ok(usage)
}

/// One more image than the minimum, clamped to the maximum (0 = unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn image_usage_always_includes_color_attachment() {
        let supported = vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;
        assert_eq!(
            resolve_image_usage(vk::ImageUsageFlags::empty(), supported).unwrap(),
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        );
        assert_eq!(
            resolve_image_usage(vk::ImageUsageFlags::TRANSFER_DST, supported).unwrap(),
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST
        );
    }

    #[test]
    fn unsupported_image_usage_is_an_error() {
        let supported = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC;
        let err = resolve_image_usage(
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
            supported,
        )
        .unwrap_err();
        match err {
            GpuError::SwapchainCreation(message) => {
                assert!(message.contains("image usage TRANSFER_DST ("), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(resolve_image_usage(
            vk::ImageUsageFlags::empty(),
            vk::ImageUsageFlags::TRANSFER_DST
        )
        .is_err());
    }

    #[test]
    fn prefers_srgb_bgra() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            select_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
        assert_eq!(
            select_surface_format(&formats[..1]).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
        assert!(select_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_fallbacks() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            select_present_mode(&all[..2], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            select_present_mode(&all[..1], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_uses_current_or_clamps() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        assert_eq!(calculate_extent(&caps, 10, 10).width, 800);

        caps.current_extent.width = u32::MAX;
        let extent = calculate_extent(&caps, 4096, 0);
        assert_eq!((extent.width, extent.height), (1024, 1));
    }

    #[test]
    fn image_count_is_min_plus_one_clamped() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
    }

    #[test]
    fn state_machine_allows_repeated_recreate() {
        let mut state = SwapchainState::Uninitialized;
        state = state.created().unwrap();
        for _ in 0..3 {
            state = state.destroyed(true);
            assert_eq!(state, SwapchainState::Recreating);
            state = state.created().unwrap();
        }
        state = state.destroyed(false);
        assert_eq!(state, SwapchainState::Uninitialized);
        // Destroying twice is harmless.
        assert_eq!(state.destroyed(false), SwapchainState::Uninitialized);
        assert!(SwapchainState::Created.created().is_err());
        assert!(SwapchainState::Destroyed.created().is_err());
    }

    #[test]
    fn outcomes_flag_recreation() {
        assert!(AcquireOutcome::OutOfDate.needs_recreate());
        assert!(AcquireOutcome::Acquired {
            image_index: 0,
            suboptimal: true
        }
        .needs_recreate());
        assert!(!AcquireOutcome::Acquired {
            image_index: 1,
            suboptimal: false
        }
        .needs_recreate());
        assert!(!PresentOutcome::Presented.needs_recreate());
        assert!(PresentOutcome::Suboptimal.needs_recreate());
        assert!(PresentOutcome::OutOfDate.needs_recreate());
    }
}
