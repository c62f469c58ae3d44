//! Device requirements declared before device creation.

use std::collections::BTreeSet;

/// Extensions and optional features a renderer needs from the device.
///
/// Filled in by renderers and plugins before the logical device exists, then
/// used both to filter physical devices and to enable features at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRequirements {
    /// Extra device extensions, by name.
    pub extensions: BTreeSet<String>,
    /// Hardware ray tracing (acceleration structures + RT pipelines).
    pub ray_tracing: bool,
    /// Task/mesh shaders.
    pub mesh_shaders: bool,
    /// Buffer device address.
    pub buffer_device_address: bool,
    /// A compute queue distinct from the graphics queue, if the device has one.
    pub async_compute: bool,
    /// A transfer queue distinct from graphics and compute, if the device has one.
    pub async_transfer: bool,
}

impl DeviceRequirements {
    /// Create an empty requirement set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a device extension by name.
    pub fn require_extension(&mut self, name: impl Into<String>) -> &mut Self {
        self.extensions.insert(name.into());
        self
    }

    /// Combine with another requirement set.
    pub fn merge(&mut self, other: &Self) {
        self.extensions.extend(other.extensions.iter().cloned());
        self.ray_tracing |= other.ray_tracing;
        self.mesh_shaders |= other.mesh_shaders;
        self.buffer_device_address |= other.buffer_device_address;
        self.async_compute |= other.async_compute;
        self.async_transfer |= other.async_transfer;
    }

    /// Every device extension implied by these requirements, swapchain included.
    pub fn device_extensions(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.extensions.clone();
        names.insert(cstr_name(ash::khr::swapchain::NAME));

        if self.ray_tracing {
            names.insert(cstr_name(ash::khr::acceleration_structure::NAME));
            names.insert(cstr_name(ash::khr::ray_tracing_pipeline::NAME));
            names.insert(cstr_name(ash::khr::deferred_host_operations::NAME));
        }
        if self.mesh_shaders {
            names.insert(cstr_name(ash::ext::mesh_shader::NAME));
        }

        names.into_iter().collect()
    }
}

fn cstr_name(name: &std::ffi::CStr) -> String {
    name.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapchain_is_always_required() {
        let reqs = DeviceRequirements::new();
        assert_eq!(reqs.device_extensions(), vec!["VK_KHR_swapchain".to_string()]);
    }

    #[test]
    fn feature_flags_imply_extensions() {
        let reqs = DeviceRequirements {
            ray_tracing: true,
            mesh_shaders: true,
            ..Default::default()
        };
        let exts = reqs.device_extensions();
        assert!(exts.contains(&"VK_KHR_acceleration_structure".to_string()));
        assert!(exts.contains(&"VK_KHR_ray_tracing_pipeline".to_string()));
        assert!(exts.contains(&"VK_KHR_deferred_host_operations".to_string()));
        assert!(exts.contains(&"VK_EXT_mesh_shader".to_string()));
    }

    #[test]
    fn merge_is_a_union() {
        let mut a = DeviceRequirements::new();
        a.require_extension("VK_EXT_a").async_compute = true;

        let mut b = DeviceRequirements::new();
        b.require_extension("VK_EXT_b");
        b.buffer_device_address = true;

        a.merge(&b);
        assert!(a.async_compute);
        assert!(a.buffer_device_address);
        assert!(!a.ray_tracing);
        assert_eq!(a.extensions.len(), 2);
    }
}
