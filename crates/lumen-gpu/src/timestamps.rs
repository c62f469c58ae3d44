//! GPU frame timing via timestamp queries.

use crate::error::Result;
use ash::vk;

const QUERIES_PER_SLOT: u32 = 2;

/// A timestamp query pool with one begin/end pair per frame slot.
///
/// Results for a slot are read back after the host has waited for that
/// slot's previous submission, so reads never block.
pub struct GpuTimestamps {
    pool: vk::QueryPool,
    period_ns: f32,
    written: Vec<bool>,
}

impl GpuTimestamps {
    /// Create a query pool for `slots` frame slots.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, slots: usize, period_ns: f32) -> Result<Self> {
        let slot_count = u32::try_from(slots).unwrap_or(u32::MAX);
        let create_info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(slot_count.saturating_mul(QUERIES_PER_SLOT));
        Ok(Self {
            pool: device.create_query_pool(&create_info, None)?,
            period_ns,
            written: vec![false; slots],
        })
    }

    fn first_query(slot: usize) -> u32 {
        u32::try_from(slot).unwrap_or(0) * QUERIES_PER_SLOT
    }

    /// Reset the slot's queries and write the start timestamp.
    ///
    /// # Safety
    /// `cmd` must be recording on a queue that supports timestamps.
    pub unsafe fn begin(&mut self, device: &ash::Device, cmd: vk::CommandBuffer, slot: usize) {
        let first = Self::first_query(slot);
        device.cmd_reset_query_pool(cmd, self.pool, first, QUERIES_PER_SLOT);
        device.cmd_write_timestamp2(cmd, vk::PipelineStageFlags2::TOP_OF_PIPE, self.pool, first);
    }

    /// Write the end timestamp.
    ///
    /// # Safety
    /// `cmd` must be recording and `begin` must have been recorded into it.
    pub unsafe fn end(&mut self, device: &ash::Device, cmd: vk::CommandBuffer, slot: usize) {
        let first = Self::first_query(slot);
        device.cmd_write_timestamp2(
            cmd,
            vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            self.pool,
            first + 1,
        );
        if let Some(written) = self.written.get_mut(slot) {
            *written = true;
        }
    }

    /// GPU milliseconds spent on the slot's last completed frame.
    ///
    /// `None` before the slot has recorded a pair or while results are not
    /// yet available.
    ///
    /// # Safety
    /// The slot's last submission must have completed.
    pub unsafe fn read(&self, device: &ash::Device, slot: usize) -> Option<f64> {
        if !self.written.get(slot).copied().unwrap_or(false) {
            return None;
        }
        let mut ticks = [0u64; QUERIES_PER_SLOT as usize];
        device
            .get_query_pool_results(
                self.pool,
                Self::first_query(slot),
                &mut ticks,
                vk::QueryResultFlags::TYPE_64,
            )
            .ok()?;
        Some(ticks_to_ms(ticks[0], ticks[1], self.period_ns))
    }

    /// Destroy the query pool.
    ///
    /// # Safety
    /// No pending submission may reference the pool.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_query_pool(self.pool, None);
    }
}

/// Convert a pair of raw timestamps to milliseconds.
#[allow(clippy::cast_precision_loss)]
pub fn ticks_to_ms(start: u64, end: u64, period_ns: f32) -> f64 {
    end.saturating_sub(start) as f64 * f64::from(period_ns) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn tick_conversion() {
        assert_relative_eq!(ticks_to_ms(1_000, 2_001_000, 1.0), 2.0);
        assert_relative_eq!(ticks_to_ms(0, 1_000_000, 0.5), 0.5);
        // Wrapped or reordered values never go negative.
        assert_relative_eq!(ticks_to_ms(10, 5, 1.0), 0.0);
    }
}
