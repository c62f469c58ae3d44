//! Vulkan instance creation and physical device selection.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use crate::requirements::DeviceRequirements;
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{CStr, CString};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance extensions needed to present to `display`.
///
/// Without a display the engine runs headless and only the bare surface
/// extension is requested.
pub fn required_instance_extensions(display: Option<RawDisplayHandle>) -> Result<Vec<&'static CStr>> {
    let mut extensions: Vec<&'static CStr> = match display {
        Some(display) => ash_window::enumerate_required_extensions(display)?
            .iter()
            // SAFETY: ash-window returns pointers to static extension name constants.
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
            .collect(),
        None => vec![ash::khr::surface::NAME],
    };

    #[cfg(target_os = "macos")]
    extensions.push(ash::khr::portability_enumeration::NAME);

    extensions.dedup();
    Ok(extensions)
}

/// Create a Vulkan instance.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    display: Option<RawDisplayHandle>,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|_| GpuError::Other("Application name contains a NUL byte".to_string()))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Lumen")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let extension_names: Vec<*const std::ffi::c_char> = required_instance_extensions(display)?
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let mut layer_names = Vec::new();
    if enable_validation {
        let available_layers = entry.enumerate_instance_layer_properties()?;
        let found = available_layers
            .iter()
            .any(|props| CStr::from_ptr(props.layer_name.as_ptr()) == VALIDATION_LAYER);
        if found {
            layer_names.push(VALIDATION_LAYER.as_ptr());
        } else {
            tracing::warn!(
                "Validation layer {} not available",
                VALIDATION_LAYER.to_string_lossy()
            );
        }
    }

    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    Ok(entry.create_instance(&create_info, None)?)
}

/// Select the best physical device that satisfies `requirements`.
///
/// Devices missing a required extension or feature are skipped with a log
/// line naming what they lack.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    requirements: &DeviceRequirements,
) -> Result<(vk::PhysicalDevice, GpuCapabilities)> {
    let devices = instance.enumerate_physical_devices()?;

    let mut rejected = Vec::new();
    let best = devices
        .into_iter()
        .filter_map(|device| {
            let caps = GpuCapabilities::query(instance, device);
            let missing = caps.missing(requirements);
            if missing.is_empty() {
                Some((score_device(&caps), device, caps))
            } else {
                tracing::info!("Skipping {}: missing {}", caps.device_name, missing.join(", "));
                rejected.push(format!("{} ({})", caps.device_name, missing.join(", ")));
                None
            }
        })
        .max_by_key(|(score, _, _)| *score);

    match best {
        Some((_, device, caps)) => Ok((device, caps)),
        None if rejected.is_empty() => Err(GpuError::NoSuitableDevice),
        None => Err(GpuError::ExtensionNotSupported(rejected.join("; "))),
    }
}

/// Score a suitable device for selection.
pub fn score_device(caps: &GpuCapabilities) -> u64 {
    let type_score = match caps.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    };
    // +1 per GB of VRAM
    type_score + caps.device_local_memory_mb / 1024
}
