//! Synchronization primitives.

use crate::error::{GpuError, Result};
use ash::vk;

/// Create a binary semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    Ok(device.create_semaphore(&create_info, None)?)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    Ok(device.create_fence(&create_info, None)?)
}

/// A timeline semaphore: a monotonically increasing 64-bit counter signaled by
/// queue submissions and waited on by the host.
pub struct TimelineSemaphore {
    semaphore: vk::Semaphore,
}

impl TimelineSemaphore {
    /// Create a timeline semaphore starting at `initial_value`.
    ///
    /// # Safety
    /// The device must be valid and have timeline semaphores enabled.
    pub unsafe fn new(device: &ash::Device, initial_value: u64) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        Ok(Self {
            semaphore: device.create_semaphore(&create_info, None)?,
        })
    }

    /// Raw handle, for submit infos.
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Block until the counter reaches `value`.
    ///
    /// Expiry of `timeout_ms` is reported as [`GpuError::Timeout`].
    ///
    /// # Safety
    /// The device must be valid.
    #[cfg_attr(
        feature = "profiling",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn wait(&self, device: &ash::Device, value: u64, timeout_ms: u64) -> Result<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        match device.wait_semaphores(&wait_info, timeout_ms.saturating_mul(1_000_000)) {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(GpuError::Timeout {
                operation: "waiting for the frame timeline",
                timeout_ms,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Current counter value.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn value(&self, device: &ash::Device) -> Result<u64> {
        Ok(device.get_semaphore_counter_value(self.semaphore)?)
    }

    /// Destroy the semaphore.
    ///
    /// # Safety
    /// No pending submission may reference it.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.semaphore, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GpuContextBuilder;

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn timeline_wait_on_reached_value_returns() {
        let ctx = GpuContextBuilder::new().validation(false).build().unwrap();
        let device = ctx.device();
        unsafe {
            let timeline = TimelineSemaphore::new(device, 3).unwrap();
            assert_eq!(timeline.value(device).unwrap(), 3);
            timeline.wait(device, 2, 10).unwrap();
            assert!(matches!(
                timeline.wait(device, 4, 1),
                Err(GpuError::Timeout { timeout_ms: 1, .. })
            ));
            timeline.destroy(device);
        }
    }
}
