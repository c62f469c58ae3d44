//! GPU capability detection.

use crate::requirements::DeviceRequirements;
use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Device type (discrete, integrated, ...)
    pub device_type: vk::PhysicalDeviceType,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,

    /// Dynamic rendering, synchronization2 and timeline semaphores (VK 1.3 core)
    pub supports_vulkan_1_3: bool,
    /// Buffer device address support
    pub supports_buffer_device_address: bool,
    /// Hardware ray tracing support
    pub supports_ray_tracing: bool,
    /// Mesh shader support
    pub supports_mesh_shaders: bool,
    /// Timestamps are valid on graphics and compute queues
    pub supports_timestamps: bool,
    /// Nanoseconds per timestamp tick
    pub timestamp_period: f32,

    /// Device-local memory in MB
    pub device_local_memory_mb: u64,
    /// Maximum color attachment sample counts
    pub framebuffer_color_sample_counts: vk::SampleCountFlags,
    /// Maximum 2D image dimension
    pub max_image_dimension_2d: u32,

    /// Available device extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default();

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        let api_version = properties.api_version;
        let supports_vulkan_1_3 = vk::api_version_major(api_version) > 1
            || (vk::api_version_major(api_version) == 1
                && vk::api_version_minor(api_version) >= 3);

        let has = |name: &CStr| {
            name.to_str()
                .is_ok_and(|name| available_extensions.contains(name))
        };
        let supports_ray_tracing = has(ash::khr::acceleration_structure::NAME)
            && has(ash::khr::ray_tracing_pipeline::NAME)
            && has(ash::khr::deferred_host_operations::NAME);
        let supports_mesh_shaders = has(ash::ext::mesh_shader::NAME);
        let supports_buffer_device_address =
            supports_vulkan_1_3 || has(ash::khr::buffer_device_address::NAME);

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            device_type: properties.device_type,
            api_version,
            driver_version: properties.driver_version,

            supports_vulkan_1_3,
            supports_buffer_device_address,
            supports_ray_tracing,
            supports_mesh_shaders,
            supports_timestamps: properties.limits.timestamp_compute_and_graphics == vk::TRUE,
            timestamp_period: properties.limits.timestamp_period,

            device_local_memory_mb,
            framebuffer_color_sample_counts: properties.limits.framebuffer_color_sample_counts,
            max_image_dimension_2d: properties.limits.max_image_dimension2_d,

            available_extensions,
        }
    }

    /// List everything in `requirements` this device cannot provide.
    ///
    /// Queue-topology requests (async compute/transfer) are preferences and
    /// never make a device unsuitable.
    pub fn missing(&self, requirements: &DeviceRequirements) -> Vec<String> {
        let mut missing: Vec<String> = requirements
            .device_extensions()
            .into_iter()
            .filter(|ext| !self.available_extensions.contains(ext))
            .collect();

        if !self.supports_vulkan_1_3 {
            missing.push("Vulkan 1.3".to_string());
        }
        if requirements.buffer_device_address && !self.supports_buffer_device_address {
            missing.push("bufferDeviceAddress".to_string());
        }

        missing
    }

    /// Check if the GPU meets the given requirements.
    pub fn meets_requirements(&self, requirements: &DeviceRequirements) -> bool {
        self.missing(requirements).is_empty()
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps_with(extensions: &[&str]) -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Other(0),
            device_name: "test".to_string(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            api_version: vk::API_VERSION_1_3,
            driver_version: 0,
            supports_vulkan_1_3: true,
            supports_buffer_device_address: true,
            supports_ray_tracing: false,
            supports_mesh_shaders: false,
            supports_timestamps: true,
            timestamp_period: 1.0,
            device_local_memory_mb: 4096,
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1,
            max_image_dimension_2d: 16384,
            available_extensions: extensions.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn missing_reports_absent_extensions() {
        let caps = caps_with(&["VK_KHR_swapchain"]);
        let reqs = DeviceRequirements {
            mesh_shaders: true,
            ..Default::default()
        };
        assert_eq!(caps.missing(&reqs), vec!["VK_EXT_mesh_shader".to_string()]);
        assert!(caps.meets_requirements(&DeviceRequirements::new()));
    }

    #[test]
    fn async_queues_are_preferences() {
        let caps = caps_with(&["VK_KHR_swapchain"]);
        let reqs = DeviceRequirements {
            async_compute: true,
            async_transfer: true,
            ..Default::default()
        };
        assert!(caps.meets_requirements(&reqs));
    }
}
