//! Command buffer management.

use crate::error::{GpuError, Result};
use ash::vk;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate a single primary command buffer.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffer(&self, device: &ash::Device) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        device
            .allocate_command_buffers(&alloc_info)?
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::Other("driver returned no command buffer".to_string()))
    }

    /// Reset the command pool, recycling every buffer allocated from it.
    ///
    /// # Safety
    /// No command buffer from this pool may be pending execution.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        device.reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        Ok(())
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Begin recording a one-shot command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.end_command_buffer(cmd)?;
    Ok(())
}

/// Submit one command buffer with synchronization2 semaphore infos.
///
/// # Safety
/// All handles must be valid.
#[cfg_attr(feature = "profiling", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn submit2(
    device: &ash::Device,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    waits: &[vk::SemaphoreSubmitInfo<'_>],
    signals: &[vk::SemaphoreSubmitInfo<'_>],
    fence: vk::Fence,
) -> Result<()> {
    let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
    let submit = vk::SubmitInfo2::default()
        .wait_semaphore_infos(waits)
        .command_buffer_infos(&cmd_infos)
        .signal_semaphore_infos(signals);

    device.queue_submit2(queue, &[submit], fence)?;
    Ok(())
}

/// Record and synchronously execute a one-shot command buffer.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn execute_single_time_commands<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let cmd = pool.allocate_command_buffer(device)?;

    let result = (|| -> Result<()> {
        begin_command_buffer(device, cmd)?;
        f(cmd);
        end_command_buffer(device, cmd)?;
        submit2(device, queue, cmd, &[], &[], vk::Fence::null())?;
        device.queue_wait_idle(queue)?;
        Ok(())
    })();

    device.free_command_buffers(pool.handle(), &[cmd]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GpuContextBuilder;

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn single_time_commands_complete() {
        let ctx = GpuContextBuilder::new().validation(false).build().unwrap();
        unsafe {
            let pool = CommandPool::new(
                ctx.device(),
                ctx.graphics_queue_family(),
                vk::CommandPoolCreateFlags::TRANSIENT,
            )
            .unwrap();
            let mut recorded = false;
            execute_single_time_commands(ctx.device(), &pool, ctx.graphics_queue(), |_| {
                recorded = true;
            })
            .unwrap();
            assert!(recorded);
            pool.destroy(ctx.device());
        }
    }
}
