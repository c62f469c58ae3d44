//! GPU context management.

use crate::capabilities::GpuCapabilities;
use crate::deletion::DeletionQueue;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::GpuAllocator;
use crate::requirements::DeviceRequirements;
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CString};
use std::sync::Arc;

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) requirements: DeviceRequirements,
    pub(crate) allocator: Mutex<GpuAllocator>,
    teardown: Mutex<DeletionQueue>,

    // Queue families and queues
    pub(crate) graphics_queue_family: u32,
    pub(crate) compute_queue_family: u32,
    pub(crate) transfer_queue_family: u32,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) compute_queue: vk::Queue,
    pub(crate) transfer_queue: vk::Queue,
}

impl GpuContext {
    /// Get the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Requirements the device was created with.
    pub fn requirements(&self) -> &DeviceRequirements {
        &self.requirements
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the compute queue. Equal to the graphics queue without async compute.
    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    /// Get the transfer queue.
    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Get the compute queue family index.
    pub fn compute_queue_family(&self) -> u32 {
        self.compute_queue_family
    }

    /// Get the transfer queue family index.
    pub fn transfer_queue_family(&self) -> u32 {
        self.transfer_queue_family
    }

    /// Whether compute work runs on a queue family separate from graphics.
    pub fn has_async_compute(&self) -> bool {
        self.compute_queue_family != self.graphics_queue_family
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }

        // Frees every VkDeviceMemory allocation; must precede device destruction.
        self.allocator.lock().shutdown();

        // Device, then instance.
        self.teardown.lock().flush_all();
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    requirements: DeviceRequirements,
    display: Option<RawDisplayHandle>,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Lumen".to_string(),
            enable_validation: cfg!(debug_assertions),
            requirements: DeviceRequirements::default(),
            display: None,
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Set the device requirements used for device selection and creation.
    pub fn requirements(mut self, requirements: DeviceRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Enable the instance extensions needed to present on this display.
    pub fn display(mut self, display: RawDisplayHandle) -> Self {
        self.display = Some(display);
        self
    }

    /// Build the GPU context.
    ///
    /// On failure every object created so far is destroyed in reverse order.
    pub fn build(self) -> Result<GpuContext> {
        let mut teardown = DeletionQueue::new();
        match self.build_inner(&mut teardown) {
            Ok(parts) => Ok(parts.finish(teardown)),
            Err(e) => {
                teardown.flush_all();
                Err(e)
            }
        }
    }

    fn build_inner(self, teardown: &mut DeletionQueue) -> Result<ContextParts> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let instance = unsafe {
            create_instance(&entry, &self.app_name, self.display, self.enable_validation)
        }?;
        {
            let instance = instance.clone();
            teardown.push("instance", move |_| unsafe { instance.destroy_instance(None) });
        }

        let (physical_device, capabilities) =
            unsafe { select_physical_device(&instance, &self.requirements) }?;
        tracing::info!("Selected GPU: {}", capabilities.summary());

        let queue_families = unsafe {
            find_queue_families(&instance, physical_device, self.requirements.async_compute)
        }?;
        tracing::debug!(
            "Queue families: graphics={} compute={} transfer={}",
            queue_families.graphics,
            queue_families.compute,
            queue_families.transfer
        );

        let (device, queues) = unsafe {
            create_device(
                &instance,
                physical_device,
                &capabilities,
                &self.requirements,
                &queue_families,
            )?
        };
        {
            let device = device.clone();
            teardown.push("device", move |_| unsafe { device.destroy_device(None) });
        }
        let device = Arc::new(device);

        let allocator = unsafe {
            GpuAllocator::new(
                &instance,
                device.clone(),
                physical_device,
                self.requirements.buffer_device_address,
            )
        }?;

        Ok(ContextParts {
            entry,
            instance,
            physical_device,
            device,
            capabilities,
            requirements: self.requirements,
            allocator,
            queue_families,
            queues,
        })
    }
}

/// Everything `build` produced before ownership moves into the context.
struct ContextParts {
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    requirements: DeviceRequirements,
    allocator: GpuAllocator,
    queue_families: QueueFamilyIndices,
    queues: Queues,
}

impl ContextParts {
    fn finish(self, teardown: DeletionQueue) -> GpuContext {
        GpuContext {
            entry: self.entry,
            instance: self.instance,
            physical_device: self.physical_device,
            device: self.device,
            capabilities: self.capabilities,
            requirements: self.requirements,
            allocator: Mutex::new(self.allocator),
            teardown: Mutex::new(teardown),
            graphics_queue_family: self.queue_families.graphics,
            compute_queue_family: self.queue_families.compute,
            transfer_queue_family: self.queue_families.transfer,
            graphics_queue: self.queues.graphics,
            compute_queue: self.queues.compute,
            transfer_queue: self.queues.transfer,
        }
    }
}

/// Queue family indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueFamilyIndices {
    graphics: u32,
    compute: u32,
    transfer: u32,
}

struct Queues {
    graphics: vk::Queue,
    compute: vk::Queue,
    transfer: vk::Queue,
}

/// Find queue families for graphics, compute, and transfer.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    want_async_compute: bool,
) -> Result<QueueFamilyIndices> {
    let flags: Vec<vk::QueueFlags> = instance
        .get_physical_device_queue_family_properties(physical_device)
        .iter()
        .map(|family| family.queue_flags)
        .collect();
    pick_queue_families(&flags, want_async_compute).ok_or(GpuError::NoSuitableDevice)
}

/// Pick queue families from their flags.
///
/// A dedicated compute family is only used when async compute was requested;
/// otherwise compute shares the graphics queue.
fn pick_queue_families(
    families: &[vk::QueueFlags],
    want_async_compute: bool,
) -> Option<QueueFamilyIndices> {
    let find = |pred: &dyn Fn(vk::QueueFlags) -> bool| {
        families.iter().position(|&f| pred(f)).map(|i| i as u32)
    };

    let graphics = find(&|f| f.contains(vk::QueueFlags::GRAPHICS))?;

    let compute = if want_async_compute {
        find(&|f| f.contains(vk::QueueFlags::COMPUTE) && !f.contains(vk::QueueFlags::GRAPHICS))
            .unwrap_or(graphics)
    } else {
        graphics
    };

    let transfer = find(&|f| {
        f.contains(vk::QueueFlags::TRANSFER)
            && !f.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
    })
    .unwrap_or(compute);

    Some(QueueFamilyIndices {
        graphics,
        compute,
        transfer,
    })
}

/// Create the logical device and retrieve queues.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    capabilities: &GpuCapabilities,
    requirements: &DeviceRequirements,
    queue_families: &QueueFamilyIndices,
) -> Result<(ash::Device, Queues)> {
    let mut unique_families = vec![
        queue_families.graphics,
        queue_families.compute,
        queue_families.transfer,
    ];
    unique_families.sort_unstable();
    unique_families.dedup();

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extensions = requirements
        .device_extensions()
        .into_iter()
        .map(|name| {
            CString::new(name).map_err(|e| GpuError::ExtensionNotSupported(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;
    let extension_names: Vec<*const c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true)
        .maintenance4(true);

    let buffer_device_address = (requirements.buffer_device_address || requirements.ray_tracing)
        && capabilities.supports_buffer_device_address;
    let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default()
        .timeline_semaphore(true)
        .buffer_device_address(buffer_device_address);

    let mut mesh_features = vk::PhysicalDeviceMeshShaderFeaturesEXT::default()
        .task_shader(true)
        .mesh_shader(true);
    let mut accel_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default().acceleration_structure(true);
    let mut rt_features =
        vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default().ray_tracing_pipeline(true);

    let features = vk::PhysicalDeviceFeatures::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(features)
        .push_next(&mut vulkan_1_3_features)
        .push_next(&mut vulkan_1_2_features);
    if requirements.mesh_shaders {
        features2 = features2.push_next(&mut mesh_features);
    }
    if requirements.ray_tracing {
        features2 = features2
            .push_next(&mut accel_features)
            .push_next(&mut rt_features);
    }

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance.create_device(physical_device, &device_create_info, None)?;

    let queues = Queues {
        graphics: device.get_device_queue(queue_families.graphics, 0),
        compute: device.get_device_queue(queue_families.compute, 0),
        transfer: device.get_device_queue(queue_families.transfer, 0),
    };

    Ok((device, queues))
}
