//! Frame timing statistics.

use tracing::info;

/// Running frame-rate statistics, logged at shutdown.
#[derive(Debug, Clone)]
pub struct FrameTimings {
    frames: u64,
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
    last_fps: f64,
    /// GPU time of the most recently completed frame, if timestamps are on.
    pub gpu_ms: Option<f64>,
}

impl Default for FrameTimings {
    fn default() -> Self {
        Self {
            frames: 0,
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
            last_fps: 0.0,
            gpu_ms: None,
        }
    }
}

impl FrameTimings {
    /// Record a frame that took `dt` seconds.
    pub fn record(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        let fps = 1.0 / f64::from(dt);
        self.frames += 1;
        self.min_fps = self.min_fps.min(fps);
        self.max_fps = self.max_fps.max(fps);
        self.fps_sum += fps;
        self.last_fps = fps;
    }

    /// Frames recorded.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Instantaneous FPS of the last frame.
    pub fn fps(&self) -> f64 {
        self.last_fps
    }

    /// Minimum FPS, if any frame was recorded.
    pub fn min_fps(&self) -> Option<f64> {
        (self.frames > 0).then_some(self.min_fps)
    }

    /// Maximum FPS, if any frame was recorded.
    pub fn max_fps(&self) -> Option<f64> {
        (self.frames > 0).then_some(self.max_fps)
    }

    /// Average FPS, if any frame was recorded.
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_fps(&self) -> Option<f64> {
        (self.frames > 0).then(|| self.fps_sum / self.frames as f64)
    }

    /// Log a summary.
    pub fn log_summary(&self) {
        if let (Some(min), Some(max), Some(avg)) = (self.min_fps(), self.max_fps(), self.avg_fps()) {
            info!("FPS Statistics:");
            info!("  Min: {min:.1}");
            info!("  Max: {max:.1}");
            info!("  Avg: {avg:.1}");
            info!("  Total frames: {}", self.frames);
        }
    }
}

/// Counters a renderer reports for display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RendererStats {
    pub draw_calls: u64,
    pub dispatches: u64,
    pub triangles: u64,
    /// Free-form named values.
    pub extra: Vec<(String, f64)>,
}
