//! Renderer capability negotiation.
//!
//! A renderer fills in [`RendererCaps`] after device creation; the engine then
//! runs [`RendererCaps::sanitize`] to fill defaults and resolve
//! inconsistencies, and [`RendererCaps::validate`] to reject configurations
//! that cannot be repaired.

use ash::vk;

use crate::error::{EngineError, Result};

/// Upper bound on frames in flight.
pub const MAX_FRAME_OVERLAP: usize = 4;

/// Frames in flight when nothing else is requested.
pub const DEFAULT_FRAME_OVERLAP: usize = 2;

/// Format of the color attachment inserted when a renderer declares none.
pub const DEFAULT_COLOR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Format of the depth attachment inserted for `uses_depth`.
pub const DEFAULT_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// How the finished frame reaches the swapchain image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PresentationMode {
    /// The engine blits the presentation attachment onto the swapchain image.
    #[default]
    EngineBlit,
    /// The renderer writes the swapchain image itself in `compose`.
    RendererComposite,
    /// No offscreen color attachment; the renderer draws onto the swapchain image.
    DirectToSwapchain,
}

/// Declarative description of one offscreen image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRequest {
    pub name: String,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub samples: vk::SampleCountFlags,
    pub initial_layout: vk::ImageLayout,
}

impl AttachmentRequest {
    /// A color target usable as attachment and storage image, kept in `GENERAL`.
    pub fn color(name: impl Into<String>, format: vk::Format) -> Self {
        Self {
            name: name.into(),
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::STORAGE,
            aspect: vk::ImageAspectFlags::COLOR,
            samples: vk::SampleCountFlags::TYPE_1,
            initial_layout: vk::ImageLayout::GENERAL,
        }
    }

    /// A depth (or depth/stencil) target named `"depth"`.
    pub fn depth(format: vk::Format) -> Self {
        Self {
            name: "depth".to_string(),
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: depth_aspect(format),
            samples: vk::SampleCountFlags::TYPE_1,
            initial_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }

    /// Add usage flags.
    #[must_use]
    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage |= usage;
        self
    }

    /// Set the sample count.
    #[must_use]
    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    /// Set the layout the image is transitioned to after creation.
    #[must_use]
    pub fn with_initial_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.initial_layout = layout;
        self
    }
}

/// Whether `format` has a depth or stencil component.
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Aspect mask for a depth format: DEPTH, plus STENCIL for combined formats.
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// The negotiated rendering configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererCaps {
    pub presentation_mode: PresentationMode,
    pub color_attachments: Vec<AttachmentRequest>,
    pub depth_attachment: Option<AttachmentRequest>,
    pub uses_depth: bool,
    /// Name of the color attachment that ends up on screen.
    pub presentation_attachment: Option<String>,
    /// Frames in flight.
    pub frame_overlap: usize,
    /// Record async compute work when a separate compute queue exists.
    pub async_compute: bool,
    /// Sample count the renderer draws color with.
    pub color_samples: vk::SampleCountFlags,
    /// Extra swapchain image usage on top of `COLOR_ATTACHMENT`.
    pub swapchain_usage: vk::ImageUsageFlags,
}

impl Default for RendererCaps {
    fn default() -> Self {
        Self {
            presentation_mode: PresentationMode::default(),
            color_attachments: Vec::new(),
            depth_attachment: None,
            uses_depth: false,
            presentation_attachment: None,
            frame_overlap: DEFAULT_FRAME_OVERLAP,
            async_compute: false,
            color_samples: vk::SampleCountFlags::TYPE_1,
            swapchain_usage: vk::ImageUsageFlags::empty(),
        }
    }
}

impl RendererCaps {
    /// Fill defaults and resolve inconsistencies. Never fails.
    ///
    /// Afterwards: `frame_overlap` is in `1..=MAX_FRAME_OVERLAP`; every mode
    /// except `DirectToSwapchain` has at least one uniquely named color
    /// attachment and a `presentation_attachment` naming one of them;
    /// `uses_depth == depth_attachment.is_some()`; no attachment starts in
    /// `UNDEFINED` or `PREINITIALIZED`. A default presentation attachment
    /// inserted in `EngineBlit` mode is single-sampled.
    pub fn sanitize(&mut self) {
        self.frame_overlap = self.frame_overlap.clamp(1, MAX_FRAME_OVERLAP);

        if self.color_samples.is_empty() {
            self.color_samples = vk::SampleCountFlags::TYPE_1;
        }
        for request in self
            .color_attachments
            .iter_mut()
            .chain(self.depth_attachment.as_mut())
        {
            if request.samples.is_empty() {
                request.samples = vk::SampleCountFlags::TYPE_1;
            }
        }

        if self.presentation_mode == PresentationMode::DirectToSwapchain {
            if !self.color_attachments.is_empty() {
                tracing::warn!(
                    "Ignoring {} color attachment(s) in direct-to-swapchain mode",
                    self.color_attachments.len()
                );
                self.color_attachments.clear();
            }
        } else if self.color_attachments.is_empty() {
            // The blit source must be single-sampled; depth keeps `color_samples`.
            let samples = if self.presentation_mode == PresentationMode::EngineBlit {
                vk::SampleCountFlags::TYPE_1
            } else {
                self.color_samples
            };
            self.color_attachments
                .push(AttachmentRequest::color("color", DEFAULT_COLOR_FORMAT).with_samples(samples));
        }

        self.make_names_unique();
        self.resolve_presentation_attachment();

        if self.presentation_mode == PresentationMode::EngineBlit {
            if let Some(index) = self.presentation_index() {
                self.color_attachments[index].usage |= vk::ImageUsageFlags::TRANSFER_SRC;
            }
            self.swapchain_usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }

        if self.uses_depth && self.depth_attachment.is_none() {
            self.depth_attachment = Some(
                AttachmentRequest::depth(DEFAULT_DEPTH_FORMAT).with_samples(self.color_samples),
            );
        }
        if let Some(depth) = &mut self.depth_attachment {
            if is_depth_format(depth.format) {
                depth.aspect = depth_aspect(depth.format);
            }
            depth.usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
            if depth.name.is_empty() {
                depth.name = "depth".to_string();
            }
        }
        self.uses_depth = self.depth_attachment.is_some();

        for request in &mut self.color_attachments {
            if !is_usable_layout(request.initial_layout) {
                request.initial_layout = vk::ImageLayout::GENERAL;
            }
        }
        if let Some(depth) = &mut self.depth_attachment {
            if !is_usable_layout(depth.initial_layout) {
                depth.initial_layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
            }
        }
    }

    fn make_names_unique(&mut self) {
        let mut seen: Vec<String> = Vec::with_capacity(self.color_attachments.len());
        for (i, request) in self.color_attachments.iter_mut().enumerate() {
            if request.name.is_empty() {
                request.name = format!("color{i}");
            }
            let mut candidate = request.name.clone();
            while seen.contains(&candidate) {
                candidate = format!("{candidate}_{i}");
            }
            request.name.clone_from(&candidate);
            seen.push(candidate);
        }
    }

    fn resolve_presentation_attachment(&mut self) {
        if self.presentation_mode == PresentationMode::DirectToSwapchain {
            self.presentation_attachment = None;
            return;
        }
        if self.presentation_index().is_none() {
            if let Some(name) = &self.presentation_attachment {
                tracing::warn!("Presentation attachment {name:?} not declared, using the first");
            }
            self.presentation_attachment = self.color_attachments.first().map(|a| a.name.clone());
        }
    }

    /// Reject configurations sanitization cannot repair.
    pub fn validate(&self) -> Result<()> {
        if let Some(depth) = &self.depth_attachment {
            if !is_depth_format(depth.format) {
                return Err(EngineError::InvalidCaps(format!(
                    "depth attachment {:?} has color format {:?}",
                    depth.name, depth.format
                )));
            }
        }
        if let Some(color) = self
            .color_attachments
            .iter()
            .find(|a| is_depth_format(a.format))
        {
            return Err(EngineError::InvalidCaps(format!(
                "color attachment {:?} has depth format {:?}",
                color.name, color.format
            )));
        }
        if self.presentation_mode != PresentationMode::DirectToSwapchain
            && self.presentation_index().is_none()
        {
            return Err(EngineError::InvalidCaps(
                "no presentation attachment among color attachments".to_string(),
            ));
        }
        if self.presentation_mode == PresentationMode::EngineBlit {
            if let Some(index) = self.presentation_index() {
                let samples = self.color_attachments[index].samples;
                if samples != vk::SampleCountFlags::TYPE_1 {
                    return Err(EngineError::InvalidCaps(format!(
                        "engine blit needs a single-sampled presentation attachment, got {samples:?}"
                    )));
                }
            }
        }
        if !(1..=MAX_FRAME_OVERLAP).contains(&self.frame_overlap) {
            return Err(EngineError::InvalidCaps(format!(
                "frame_overlap {} outside 1..={MAX_FRAME_OVERLAP}",
                self.frame_overlap
            )));
        }
        Ok(())
    }

    /// Index of the presentation attachment among the color attachments.
    pub fn presentation_index(&self) -> Option<usize> {
        let name = self.presentation_attachment.as_deref()?;
        self.color_attachments.iter().position(|a| a.name == name)
    }
}

/// Whether an attachment may rest in `layout` between frames.
fn is_usable_layout(layout: vk::ImageLayout) -> bool {
    layout != vk::ImageLayout::UNDEFINED && layout != vk::ImageLayout::PREINITIALIZED
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitized(mut caps: RendererCaps) -> RendererCaps {
        caps.sanitize();
        caps
    }

    /// Invariants every sanitized caps object satisfies.
    fn assert_total(caps: &RendererCaps) {
        assert!((1..=MAX_FRAME_OVERLAP).contains(&caps.frame_overlap));
        assert_eq!(caps.uses_depth, caps.depth_attachment.is_some());
        if caps.presentation_mode == PresentationMode::DirectToSwapchain {
            assert!(caps.color_attachments.is_empty());
            assert!(caps.presentation_attachment.is_none());
        } else {
            assert!(!caps.color_attachments.is_empty());
            let name = caps.presentation_attachment.as_deref().unwrap();
            assert!(caps.color_attachments.iter().any(|a| a.name == name));
        }
        let mut names: Vec<_> = caps.color_attachments.iter().map(|a| &a.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), caps.color_attachments.len());
        assert!(caps
            .color_attachments
            .iter()
            .all(|a| !a.name.is_empty() && !a.samples.is_empty()));
        assert!(caps
            .color_attachments
            .iter()
            .chain(caps.depth_attachment.as_ref())
            .all(|a| is_usable_layout(a.initial_layout)));
    }

    #[test]
    fn sanitize_is_total_over_awkward_inputs() {
        let modes = [
            PresentationMode::EngineBlit,
            PresentationMode::RendererComposite,
            PresentationMode::DirectToSwapchain,
        ];
        let attachment_sets: Vec<Vec<AttachmentRequest>> = vec![
            vec![],
            vec![AttachmentRequest::color("", vk::Format::R8G8B8A8_UNORM)],
            vec![
                AttachmentRequest::color("a", vk::Format::R8G8B8A8_UNORM),
                AttachmentRequest::color("a", vk::Format::R8G8B8A8_UNORM),
                AttachmentRequest::color("", vk::Format::R8G8B8A8_UNORM),
                AttachmentRequest::color("a_1", vk::Format::R8G8B8A8_UNORM),
            ],
            vec![AttachmentRequest::color("hdr", DEFAULT_COLOR_FORMAT)
                .with_samples(vk::SampleCountFlags::empty())],
            vec![AttachmentRequest::color("scratch", vk::Format::R8G8B8A8_UNORM)
                .with_initial_layout(vk::ImageLayout::UNDEFINED)],
        ];
        let presentation_names = [None, Some("missing"), Some("a"), Some("")];

        for mode in modes {
            for attachments in &attachment_sets {
                for name in presentation_names {
                    for uses_depth in [false, true] {
                        for overlap in [0, 1, 3, 99] {
                            for samples in [vk::SampleCountFlags::empty(), vk::SampleCountFlags::TYPE_4] {
                                let caps = sanitized(RendererCaps {
                                    presentation_mode: mode,
                                    color_attachments: attachments.clone(),
                                    presentation_attachment: name.map(String::from),
                                    uses_depth,
                                    frame_overlap: overlap,
                                    color_samples: samples,
                                    ..Default::default()
                                });
                                assert_total(&caps);
                                caps.validate().unwrap();
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn empty_caps_get_default_color() {
        let caps = sanitized(RendererCaps::default());
        assert_eq!(caps.color_attachments.len(), 1);
        let color = &caps.color_attachments[0];
        assert_eq!(color.name, "color");
        assert_eq!(color.format, DEFAULT_COLOR_FORMAT);
        assert_eq!(color.initial_layout, vk::ImageLayout::GENERAL);
        assert!(color.usage.contains(vk::ImageUsageFlags::STORAGE));
        assert_eq!(caps.presentation_attachment.as_deref(), Some("color"));
        assert_eq!(caps.presentation_index(), Some(0));
    }

    #[test]
    fn engine_blit_adds_transfer_usage() {
        let caps = sanitized(RendererCaps {
            color_attachments: vec![
                AttachmentRequest::color("gbuffer", vk::Format::R8G8B8A8_UNORM),
                AttachmentRequest::color("final", vk::Format::R8G8B8A8_UNORM),
            ],
            presentation_attachment: Some("final".to_string()),
            ..Default::default()
        });
        assert!(caps.color_attachments[1]
            .usage
            .contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(!caps.color_attachments[0]
            .usage
            .contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(caps
            .swapchain_usage
            .contains(vk::ImageUsageFlags::TRANSFER_DST));

        let composite = sanitized(RendererCaps {
            presentation_mode: PresentationMode::RendererComposite,
            ..Default::default()
        });
        assert!(composite.swapchain_usage.is_empty());
    }

    #[test]
    fn uses_depth_creates_matching_depth_request() {
        let caps = sanitized(RendererCaps {
            uses_depth: true,
            color_samples: vk::SampleCountFlags::TYPE_4,
            presentation_mode: PresentationMode::RendererComposite,
            ..Default::default()
        });
        let depth = caps.depth_attachment.as_ref().unwrap();
        assert_eq!(depth.aspect, vk::ImageAspectFlags::DEPTH);
        assert_eq!(depth.samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(depth.format, DEFAULT_DEPTH_FORMAT);
        assert!(caps.uses_depth);
    }

    #[test]
    fn explicit_depth_forces_uses_depth_and_aspect() {
        let mut request = AttachmentRequest::depth(vk::Format::D24_UNORM_S8_UINT);
        request.aspect = vk::ImageAspectFlags::COLOR;
        let caps = sanitized(RendererCaps {
            depth_attachment: Some(request),
            uses_depth: false,
            ..Default::default()
        });
        assert!(caps.uses_depth);
        assert_eq!(
            caps.depth_attachment.unwrap().aspect,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn direct_mode_drops_color_but_keeps_depth() {
        let caps = sanitized(RendererCaps {
            presentation_mode: PresentationMode::DirectToSwapchain,
            color_attachments: vec![AttachmentRequest::color("x", DEFAULT_COLOR_FORMAT)],
            presentation_attachment: Some("x".to_string()),
            uses_depth: true,
            ..Default::default()
        });
        assert!(caps.color_attachments.is_empty());
        assert!(caps.presentation_attachment.is_none());
        assert!(caps.depth_attachment.is_some());
        caps.validate().unwrap();
    }

    #[test]
    fn duplicate_and_empty_names_are_renamed() {
        let caps = sanitized(RendererCaps {
            color_attachments: vec![
                AttachmentRequest::color("a", DEFAULT_COLOR_FORMAT),
                AttachmentRequest::color("", DEFAULT_COLOR_FORMAT),
                AttachmentRequest::color("a", DEFAULT_COLOR_FORMAT),
            ],
            ..Default::default()
        });
        let names: Vec<_> = caps.color_attachments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a", "color1", "a_2"]);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitized(RendererCaps {
            uses_depth: true,
            color_attachments: vec![AttachmentRequest::color("", DEFAULT_COLOR_FORMAT)],
            ..Default::default()
        });
        assert_eq!(sanitized(once.clone()), once);
    }

    #[test]
    fn validate_rejects_color_format_depth() {
        let mut caps = RendererCaps {
            depth_attachment: Some(AttachmentRequest::depth(vk::Format::R8G8B8A8_UNORM)),
            ..Default::default()
        };
        caps.sanitize();
        assert!(matches!(caps.validate(), Err(EngineError::InvalidCaps(_))));
    }

    #[test]
    fn validate_rejects_multisampled_blit_source() {
        let mut caps = RendererCaps {
            color_attachments: vec![AttachmentRequest::color("msaa", DEFAULT_COLOR_FORMAT)
                .with_samples(vk::SampleCountFlags::TYPE_4)],
            ..Default::default()
        };
        caps.sanitize();
        assert!(matches!(caps.validate(), Err(EngineError::InvalidCaps(_))));
    }

    #[test]
    fn default_blit_target_is_single_sampled_under_msaa() {
        let caps = sanitized(RendererCaps {
            uses_depth: true,
            color_samples: vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        });
        assert_eq!(caps.presentation_mode, PresentationMode::EngineBlit);
        assert_eq!(caps.color_attachments[0].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(
            caps.depth_attachment.as_ref().unwrap().samples,
            vk::SampleCountFlags::TYPE_4
        );
        caps.validate().unwrap();

        let composite = sanitized(RendererCaps {
            presentation_mode: PresentationMode::RendererComposite,
            color_samples: vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        });
        assert_eq!(composite.color_attachments[0].samples, vk::SampleCountFlags::TYPE_4);
    }

    #[test]
    fn unusable_initial_layouts_are_replaced() {
        let caps = sanitized(RendererCaps {
            color_attachments: vec![
                AttachmentRequest::color("a", DEFAULT_COLOR_FORMAT)
                    .with_initial_layout(vk::ImageLayout::UNDEFINED),
                AttachmentRequest::color("b", DEFAULT_COLOR_FORMAT)
                    .with_initial_layout(vk::ImageLayout::PREINITIALIZED),
                AttachmentRequest::color("c", DEFAULT_COLOR_FORMAT)
                    .with_initial_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            ],
            depth_attachment: Some(
                AttachmentRequest::depth(DEFAULT_DEPTH_FORMAT)
                    .with_initial_layout(vk::ImageLayout::UNDEFINED),
            ),
            ..Default::default()
        });
        let layouts: Vec<_> = caps.color_attachments.iter().map(|a| a.initial_layout).collect();
        assert_eq!(
            layouts,
            vec![
                vk::ImageLayout::GENERAL,
                vk::ImageLayout::GENERAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ]
        );
        assert_eq!(
            caps.depth_attachment.unwrap().initial_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }
}
