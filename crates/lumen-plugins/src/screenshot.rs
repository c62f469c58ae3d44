//! Swapchain readback to image files.
//!
//! [`ScreenshotPlugin`] copies the finished swapchain image into a host-visible
//! buffer during the `PRESENT` phase. The copy is saved once the frame's GPU
//! work has completed, from the frame slot's cleanup queue, so capturing never
//! stalls the frame that requested it.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ash::vk;
use chrono::{DateTime, Local};
use gpu_allocator::MemoryLocation;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
use lumen_engine::{
    DeletionQueue, EngineContext, FrameContext, KeyCode, Plugin, PluginPhase, RendererCaps, WindowEvent,
};
use lumen_gpu::barrier::{record_barriers, record_copy_image_to_buffer, ImageBarrier};
use lumen_gpu::GpuBuffer;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use winit::event::ElementState;
use winit::keyboard::PhysicalKey;

/// Errors from parsing capture settings or writing image files.
#[derive(Error, Debug)]
pub enum ScreenshotError {
    /// A frame list such as `"0,5-7"` could not be parsed.
    #[error("Invalid frame list {0:?}")]
    InvalidFrames(String),

    /// The swapchain format has no byte layout we can convert.
    #[error("Unsupported swapchain format for capture: {0:?}")]
    UnsupportedFormat(vk::Format),

    /// Pixel data did not match the image size.
    #[error("Invalid image data: expected {expected} bytes, got {actual}")]
    InvalidImageData { expected: usize, actual: usize },

    /// The readback buffer was not host-visible.
    #[error("Readback buffer is not mapped")]
    NotMapped,

    #[error("Failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to save screenshot: {0}")]
    Save(#[from] image::ImageError),
}

/// Image file format of saved captures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotFormat {
    #[default]
    Png,
    #[serde(alias = "jpeg")]
    Jpg,
    Bmp,
    Tga,
}

impl ScreenshotFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Bmp => "bmp",
            Self::Tga => "tga",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpg => ImageFormat::Jpeg,
            Self::Bmp => ImageFormat::Bmp,
            Self::Tga => ImageFormat::Tga,
        }
    }

    /// Parse a file extension, case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpg),
            "bmp" => Some(Self::Bmp),
            "tga" => Some(Self::Tga),
            _ => None,
        }
    }
}

/// Screenshot settings, usually loaded from the `[screenshot]` table of the
/// viewer config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScreenshotConfig {
    /// Directory captures are written to. Created on first save.
    pub output_directory: PathBuf,
    /// File name prefix.
    pub prefix: String,
    pub format: ScreenshotFormat,
    /// Frame numbers captured automatically, e.g. `"0,5-7"`.
    #[serde(deserialize_with = "deserialize_frames")]
    pub frames: BTreeSet<u64>,
    /// Capture the first presented frame.
    pub capture_on_start: bool,
    /// Request exit once the last scheduled capture is saved.
    pub exit_after_capture: bool,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("screenshots"),
            prefix: "lumen".to_string(),
            format: ScreenshotFormat::Png,
            frames: BTreeSet::new(),
            capture_on_start: false,
            exit_after_capture: false,
        }
    }
}

fn deserialize_frames<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeSet<u64>, D::Error> {
    let list = String::deserialize(deserializer)?;
    parse_frame_indices(&list).map_err(serde::de::Error::custom)
}

impl ScreenshotConfig {
    /// Default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = dir.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_format(mut self, format: ScreenshotFormat) -> Self {
        self.format = format;
        self
    }

    /// Capture the given frame numbers.
    pub fn with_frames(mut self, frames: impl IntoIterator<Item = u64>) -> Self {
        self.frames.extend(frames);
        self
    }

    pub fn with_capture_on_start(mut self, enabled: bool) -> Self {
        self.capture_on_start = enabled;
        self
    }

    pub fn with_exit_after(mut self, exit: bool) -> Self {
        self.exit_after_capture = exit;
        self
    }

    /// `{output_directory}/{prefix}_{YYYYMMDD_HHMMSS}_{ms}.{ext}`
    pub fn output_path(&self, time: &DateTime<Local>) -> PathBuf {
        let name = format!(
            "{}_{}_{:03}.{}",
            self.prefix,
            time.format("%Y%m%d_%H%M%S"),
            time.timestamp_subsec_millis(),
            self.format.extension()
        );
        self.output_directory.join(name)
    }

    /// Resolve where a capture goes. A non-empty `hint` names the file; it
    /// gets the configured extension if it has none.
    pub fn resolve_path(&self, hint: &str, time: &DateTime<Local>) -> PathBuf {
        if hint.is_empty() {
            return self.output_path(time);
        }
        let path = PathBuf::from(hint);
        if path.extension().is_some() {
            path
        } else {
            path.with_extension(self.format.extension())
        }
    }

    /// The last frame scheduled for automatic capture.
    pub fn last_scheduled_frame(&self) -> Option<u64> {
        let last = self.frames.last().copied();
        if self.capture_on_start {
            last.or(Some(0))
        } else {
            last
        }
    }
}

/// Parse frame numbers from a list like `"0,5,10-15"`. Ranges are inclusive.
/// An empty string yields an empty set.
pub fn parse_frame_indices(list: &str) -> Result<BTreeSet<u64>, ScreenshotError> {
    let invalid = || ScreenshotError::InvalidFrames(list.to_string());
    let mut frames = BTreeSet::new();

    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let start: u64 = start.trim().parse().map_err(|_| invalid())?;
            let end: u64 = end.trim().parse().map_err(|_| invalid())?;
            if start > end {
                return Err(invalid());
            }
            frames.extend(start..=end);
        } else {
            frames.insert(part.parse().map_err(|_| invalid())?);
        }
    }

    Ok(frames)
}

/// Whether [`to_rgba8`] can convert texels of `format`.
pub fn is_capturable(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::B8G8R8A8_UNORM
            | vk::Format::B8G8R8A8_SRGB
            | vk::Format::R8G8B8A8_UNORM
            | vk::Format::R8G8B8A8_SRGB
    )
}

/// Convert tightly packed swapchain texels to RGBA8.
pub fn to_rgba8(format: vk::Format, mut data: Vec<u8>) -> Result<Vec<u8>, ScreenshotError> {
    match format {
        vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB => {
            for px in data.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
            Ok(data)
        }
        vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB => Ok(data),
        other => Err(ScreenshotError::UnsupportedFormat(other)),
    }
}

/// Write RGBA8 pixels to `path`, creating parent directories as needed.
pub fn save_rgba8(
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: ScreenshotFormat,
    path: &Path,
) -> Result<(), ScreenshotError> {
    let expected = width as usize * height as usize * 4;
    let actual = data.len();
    let buffer = ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, data)
        .ok_or(ScreenshotError::InvalidImageData { expected, actual })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ScreenshotError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let image = DynamicImage::ImageRgba8(buffer);
    match format {
        // JPEG has no alpha channel.
        ScreenshotFormat::Jpg => image.to_rgb8().save_with_format(path, format.image_format())?,
        _ => image.save_with_format(path, format.image_format())?,
    }
    Ok(())
}

/// One capture recorded this frame and waiting for its GPU work.
struct Readback {
    buffer: GpuBuffer,
    extent: vk::Extent2D,
    format: vk::Format,
    path: PathBuf,
    file_format: ScreenshotFormat,
    request_exit: bool,
}

impl Readback {
    fn save(&self) -> Result<(), ScreenshotError> {
        let len = self.extent.width as usize * self.extent.height as usize * 4;
        let mapped = self.buffer.mapped_slice().ok_or(ScreenshotError::NotMapped)?;
        let texels = mapped
            .get(..len)
            .ok_or(ScreenshotError::InvalidImageData {
                expected: len,
                actual: mapped.len(),
            })?
            .to_vec();
        let rgba = to_rgba8(self.format, texels)?;
        save_rgba8(rgba, self.extent.width, self.extent.height, self.file_format, &self.path)
    }

    /// Runs from the slot's cleanup queue once the frame has completed.
    fn finish(mut self, engine: &EngineContext) {
        match self.save() {
            Ok(()) => info!("Screenshot saved: {}", self.path.display()),
            Err(e) => error!("Screenshot {} failed: {e}", self.path.display()),
        }
        match engine.gpu() {
            Ok(gpu) => {
                if let Err(e) = gpu.allocator().lock().free_buffer(&mut self.buffer) {
                    warn!("Failed to free screenshot buffer: {e}");
                }
            }
            Err(e) => warn!("Screenshot buffer leaked: {e}"),
        }
        if self.request_exit {
            info!("All scheduled screenshots saved, exiting");
            engine.services().lock().request_exit();
        }
    }
}

/// Captures the swapchain image on F12, on [`UiServices`] requests and on
/// scheduled frame numbers.
///
/// [`UiServices`]: lumen_engine::UiServices
pub struct ScreenshotPlugin {
    config: ScreenshotConfig,
    key_requested: bool,
    start_pending: bool,
    captured: u64,
}

impl ScreenshotPlugin {
    pub fn new(config: ScreenshotConfig) -> Self {
        let start_pending = config.capture_on_start;
        Self {
            config,
            key_requested: false,
            start_pending,
            captured: 0,
        }
    }

    pub fn config(&self) -> &ScreenshotConfig {
        &self.config
    }

    /// Captures recorded so far.
    pub fn captured(&self) -> u64 {
        self.captured
    }

    /// Whether this frame is captured, and under which path hint.
    fn take_request(&mut self, engine: &EngineContext, frame_number: u64) -> Option<String> {
        let external = engine.services().lock().take_screenshot_request();
        let scheduled = self.config.frames.contains(&frame_number);
        let on_start = std::mem::take(&mut self.start_pending);
        let key = std::mem::take(&mut self.key_requested);

        match external {
            Some(hint) => Some(hint),
            None if scheduled || on_start || key => Some(String::new()),
            None => None,
        }
    }

    fn is_last_scheduled(&self, frame_number: u64) -> bool {
        self.config.exit_after_capture && self.config.last_scheduled_frame() == Some(frame_number)
    }
}

impl Plugin for ScreenshotPlugin {
    fn name(&self) -> &str {
        "screenshot"
    }

    fn phases(&self) -> PluginPhase {
        PluginPhase::SETUP | PluginPhase::PRESENT
    }

    fn configure_caps(&mut self, caps: &mut RendererCaps) {
        caps.swapchain_usage |= vk::ImageUsageFlags::TRANSFER_SRC;
    }

    fn present(
        &mut self,
        engine: &EngineContext,
        frame: &FrameContext,
        cleanup: &mut DeletionQueue<EngineContext>,
    ) -> anyhow::Result<()> {
        let Some(hint) = self.take_request(engine, frame.frame_number) else {
            return Ok(());
        };
        if frame.is_stub() {
            return Ok(());
        }
        if !is_capturable(frame.swapchain_format) {
            warn!(
                "Skipping screenshot: {}",
                ScreenshotError::UnsupportedFormat(frame.swapchain_format)
            );
            return Ok(());
        }

        let gpu = engine.gpu()?;
        let device = gpu.device();
        let extent = frame.extent;
        let size = u64::from(extent.width) * u64::from(extent.height) * 4;
        let buffer = gpu.allocator().lock().create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "screenshot readback",
        )?;

        let image = frame.swapchain_image;
        unsafe {
            record_barriers(
                device,
                frame.command_buffer,
                &[ImageBarrier::color(
                    image,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                )],
            );
            record_copy_image_to_buffer(device, frame.command_buffer, image, extent, buffer.buffer);
            record_host_read_barrier(device, frame.command_buffer, buffer.buffer);
            record_barriers(
                device,
                frame.command_buffer,
                &[ImageBarrier::color(
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                )],
            );
        }

        let readback = Readback {
            buffer,
            extent,
            format: frame.swapchain_format,
            path: self.config.resolve_path(&hint, &Local::now()),
            file_format: self.config.format,
            request_exit: self.is_last_scheduled(frame.frame_number),
        };
        debug!(
            "Screenshot of frame {} recorded -> {}",
            frame.frame_number,
            readback.path.display()
        );
        cleanup.push("screenshot readback", move |engine: &EngineContext| readback.finish(engine));
        self.captured += 1;
        Ok(())
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        if let WindowEvent::KeyboardInput { event, .. } = event {
            if event.state == ElementState::Pressed
                && !event.repeat
                && event.physical_key == PhysicalKey::Code(KeyCode::F12)
            {
                self.key_requested = true;
                return true;
            }
        }
        false
    }
}

/// Make the copy's writes visible to host reads after the frame completes.
unsafe fn record_host_read_barrier(device: &ash::Device, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
    let barrier = vk::BufferMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::COPY)
        .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::HOST)
        .dst_access_mask(vk::AccessFlags2::HOST_READ)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE);
    let barriers = [barrier];
    let dependency = vk::DependencyInfo::default().buffer_memory_barriers(&barriers);
    device.cmd_pipeline_barrier2(cmd, &dependency);
}
