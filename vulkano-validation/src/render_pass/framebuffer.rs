use super::RenderPassState;
use crate::{
    handle::TypedHandle,
    image::{ImageCreateFlags, ImageUsage, ImageViewState},
    macros::vulkan_bitflags,
    registry::{impl_state_object, ObjectBase, StateObject},
    ErrorKind, ValidationError,
};
use ash::vk;
use smallvec::SmallVec;
use std::sync::Arc;

vulkan_bitflags! {
    /// Flags that control how a framebuffer is created.
    FramebufferCreateFlags = FramebufferCreateFlags(u32);

    /// The image views are not given at creation, but when a render pass instance begins.
    IMAGELESS = IMAGELESS,
}

/// Describes the image views that an imageless framebuffer will be used with.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FramebufferAttachmentImageInfo {
    pub flags: ImageCreateFlags,
    pub usage: ImageUsage,
    pub width: u32,
    pub height: u32,
    pub layer_count: u32,
    pub view_formats: Vec<vk::Format>,
}

/// Parameters of a framebuffer.
#[derive(Clone, Debug)]
pub struct FramebufferCreateInfo {
    pub flags: FramebufferCreateFlags,
    pub render_pass: vk::RenderPass,

    /// The image views. Must be empty for imageless framebuffers.
    pub attachments: Vec<vk::ImageView>,

    /// One entry per attachment of the render pass, only for imageless framebuffers.
    pub attachment_image_infos: Vec<FramebufferAttachmentImageInfo>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

impl Default for FramebufferCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            flags: FramebufferCreateFlags::empty(),
            render_pass: vk::RenderPass::null(),
            attachments: Vec::new(),
            attachment_image_infos: Vec::new(),
            width: 0,
            height: 0,
            layers: 1,
        }
    }
}

/// The device limits that constrain a framebuffer.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FramebufferLimits {
    pub(crate) max_width: u32,
    pub(crate) max_height: u32,
    pub(crate) max_layers: u32,
}

impl FramebufferCreateInfo {
    #[inline]
    pub fn is_imageless(&self) -> bool {
        self.flags.intersects(FramebufferCreateFlags::IMAGELESS)
    }

    pub(crate) fn validate(
        &self,
        render_pass: &RenderPassState,
        views: &[Arc<ImageViewState>],
        limits: FramebufferLimits,
    ) -> Result<(), Box<ValidationError>> {
        let &Self {
            flags: _,
            render_pass: _,
            ref attachments,
            ref attachment_image_infos,
            width,
            height,
            layers,
        } = self;

        let extent_checks: [(u32, &str, u32, &'static [&'static str], &'static [&'static str]); 3] = [
            (
                width,
                "width",
                limits.max_width,
                &["VUID-VkFramebufferCreateInfo-width-00885"],
                &["VUID-VkFramebufferCreateInfo-width-00886"],
            ),
            (
                height,
                "height",
                limits.max_height,
                &["VUID-VkFramebufferCreateInfo-height-00887"],
                &["VUID-VkFramebufferCreateInfo-height-00888"],
            ),
            (
                layers,
                "layers",
                limits.max_layers,
                &["VUID-VkFramebufferCreateInfo-layers-00889"],
                &["VUID-VkFramebufferCreateInfo-layers-00890"],
            ),
        ];

        for (value, name, max, zero_vuids, max_vuids) in extent_checks {
            if value == 0 {
                return Err(Box::new(ValidationError {
                    context: name.into(),
                    problem: "is zero".into(),
                    vuids: zero_vuids,
                    kind: ErrorKind::ParameterOutOfRange,
                    ..Default::default()
                }));
            }

            if value > max {
                return Err(Box::new(ValidationError {
                    context: name.into(),
                    problem: format!("exceeds the device limit ({})", max).into(),
                    vuids: max_vuids,
                    kind: ErrorKind::ParameterOutOfRange,
                    ..Default::default()
                }));
            }
        }

        if self.is_imageless() {
            if attachment_image_infos.len() as u32 != render_pass.attachment_count() {
                return Err(Box::new(ValidationError {
                    context: "attachment_image_infos".into(),
                    problem: format!(
                        "has {} elements, but the render pass has {} attachments",
                        attachment_image_infos.len(),
                        render_pass.attachment_count(),
                    )
                    .into(),
                    vuids: &["VUID-VkFramebufferCreateInfo-flags-03191"],
                    objects: [render_pass.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }

            for (index, info) in attachment_image_infos.iter().enumerate() {
                let context = || format!("attachment_image_infos[{}]", index);

                if info.width < width || info.height < height || info.layer_count < layers {
                    return Err(Box::new(ValidationError {
                        context: context().into(),
                        problem: "the extent is smaller than the extent of the framebuffer".into(),
                        vuids: &[
                            "VUID-VkFramebufferCreateInfo-flags-04541",
                            "VUID-VkFramebufferCreateInfo-flags-04542",
                            "VUID-VkFramebufferCreateInfo-flags-04543",
                        ],
                        ..Default::default()
                    }));
                }

                if let Some((required, vuids)) = required_usage(render_pass, index as u32, true) {
                    if !info.usage.contains(required) {
                        return Err(Box::new(ValidationError {
                            context: format!("{}.usage", context()).into(),
                            problem: format!(
                                "does not contain {:?}, which is required by how the render \
                                pass uses attachment {}",
                                required, index,
                            )
                            .into(),
                            vuids,
                            objects: [render_pass.typed_handle()].into_iter().collect(),
                            ..Default::default()
                        }));
                    }
                }
            }

            return Ok(());
        }

        if attachments.len() as u32 != render_pass.attachment_count() {
            return Err(Box::new(ValidationError {
                context: "attachments".into(),
                problem: format!(
                    "has {} elements, but the render pass has {} attachments",
                    attachments.len(),
                    render_pass.attachment_count(),
                )
                .into(),
                vuids: &["VUID-VkFramebufferCreateInfo-attachmentCount-00876"],
                objects: [render_pass.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        for (index, (view, description)) in views
            .iter()
            .zip(&render_pass.create_info.attachments)
            .enumerate()
        {
            let context = || format!("attachments[{}]", index);
            let objects = || -> SmallVec<[TypedHandle; 2]> {
                [view.typed_handle(), render_pass.typed_handle()].into()
            };

            if view.create_info.format != description.format {
                return Err(Box::new(ValidationError {
                    context: context().into(),
                    problem: format!(
                        "the format of the image view ({:?}) does not equal the format of the \
                        render pass attachment ({:?})",
                        view.create_info.format, description.format,
                    )
                    .into(),
                    vuids: &["VUID-VkFramebufferCreateInfo-pAttachments-00880"],
                    objects: objects(),
                    ..Default::default()
                }));
            }

            if view.samples != description.samples {
                return Err(Box::new(ValidationError {
                    context: context().into(),
                    problem: "the sample count of the image view does not equal the sample \
                        count of the render pass attachment"
                        .into(),
                    vuids: &["VUID-VkFramebufferCreateInfo-pAttachments-00881"],
                    objects: objects(),
                    ..Default::default()
                }));
            }

            if view.normalized_range.level_count != 1 {
                return Err(Box::new(ValidationError {
                    context: context().into(),
                    problem: format!(
                        "the image view has {} mip levels, but framebuffer attachments must \
                        have exactly one",
                        view.normalized_range.level_count,
                    )
                    .into(),
                    vuids: &["VUID-VkFramebufferCreateInfo-pAttachments-00883"],
                    objects: objects(),
                    ..Default::default()
                }));
            }

            let [view_width, view_height, view_layers] = view.extent();

            if view_width < width || view_height < height || view_layers < layers {
                return Err(Box::new(ValidationError {
                    context: context().into(),
                    problem: format!(
                        "the extent of the image view ({}x{}x{}) is smaller than the extent of \
                        the framebuffer ({}x{}x{})",
                        view_width, view_height, view_layers, width, height, layers,
                    )
                    .into(),
                    vuids: &[
                        "VUID-VkFramebufferCreateInfo-flags-04533",
                        "VUID-VkFramebufferCreateInfo-flags-04534",
                        "VUID-VkFramebufferCreateInfo-flags-04535",
                    ],
                    objects: objects(),
                    ..Default::default()
                }));
            }

            if let Some((required, vuids)) = required_usage(render_pass, index as u32, false) {
                if !view.usage.contains(required) {
                    return Err(Box::new(ValidationError {
                        context: context().into(),
                        problem: format!(
                            "the usage of the image view does not contain {:?}, which is \
                            required by how the render pass uses the attachment",
                            required,
                        )
                        .into(),
                        vuids,
                        objects: objects(),
                        ..Default::default()
                    }));
                }
            }
        }

        Ok(())
    }
}

/// Returns the usage an image needs to be used as attachment `attachment` of `render_pass`.
fn required_usage(
    render_pass: &RenderPassState,
    attachment: u32,
    imageless: bool,
) -> Option<(ImageUsage, &'static [&'static str])> {
    for subpass in &render_pass.create_info.subpasses {
        let is = |references: &[super::AttachmentReference]| {
            references
                .iter()
                .any(|reference| reference.attachment == attachment)
        };

        if is(&subpass.color_attachments) || is(&subpass.resolve_attachments) {
            return Some((
                ImageUsage::COLOR_ATTACHMENT,
                if imageless {
                    &["VUID-VkFramebufferCreateInfo-flags-03201"]
                } else {
                    &["VUID-VkFramebufferCreateInfo-pAttachments-00877"]
                },
            ));
        }

        if is(subpass.depth_stencil_attachment.as_slice()) {
            return Some((
                ImageUsage::DEPTH_STENCIL_ATTACHMENT,
                if imageless {
                    &["VUID-VkFramebufferCreateInfo-flags-03202"]
                } else {
                    &["VUID-VkFramebufferCreateInfo-pAttachments-02633"]
                },
            ));
        }

        if is(&subpass.input_attachments) {
            return Some((
                ImageUsage::INPUT_ATTACHMENT,
                if imageless {
                    &["VUID-VkFramebufferCreateInfo-flags-03204"]
                } else {
                    &["VUID-VkFramebufferCreateInfo-pAttachments-00879"]
                },
            ));
        }
    }

    None
}

/// State of a `VkFramebuffer`.
#[derive(Debug)]
pub struct FramebufferState {
    base: ObjectBase,
    pub create_info: FramebufferCreateInfo,
    pub render_pass: Arc<RenderPassState>,

    /// The image views. Empty for imageless framebuffers.
    pub attachments: Vec<Arc<ImageViewState>>,
}

impl_state_object!(FramebufferState, vk::Framebuffer);

impl FramebufferState {
    pub(crate) fn new(
        framebuffer: vk::Framebuffer,
        create_info: FramebufferCreateInfo,
        render_pass: Arc<RenderPassState>,
        attachments: Vec<Arc<ImageViewState>>,
    ) -> Self {
        FramebufferState {
            base: ObjectBase::new(TypedHandle::new(framebuffer)),
            create_info,
            render_pass,
            attachments,
        }
    }

    #[inline]
    pub fn is_imageless(&self) -> bool {
        self.create_info.is_imageless()
    }

    /// Checks the image views given when beginning a render pass instance with an imageless
    /// framebuffer.
    pub(crate) fn validate_attachment_begin_info(
        &self,
        render_pass: &RenderPassState,
        views: &[Arc<ImageViewState>],
    ) -> Result<(), Box<ValidationError>> {
        let infos = &self.create_info.attachment_image_infos;

        if !self.is_imageless() {
            if !views.is_empty() {
                return Err(Box::new(ValidationError {
                    context: "attachments".into(),
                    problem: "is not empty, but the framebuffer is not imageless".into(),
                    vuids: &["VUID-VkRenderPassBeginInfo-framebuffer-03207"],
                    objects: [self.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }

            return Ok(());
        }

        if views.len() != infos.len() {
            return Err(Box::new(ValidationError {
                context: "attachments".into(),
                problem: format!(
                    "has {} elements, but the framebuffer was created with {} attachment image \
                    infos",
                    views.len(),
                    infos.len(),
                )
                .into(),
                vuids: &["VUID-VkRenderPassBeginInfo-framebuffer-03208"],
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        for (index, ((view, info), description)) in views
            .iter()
            .zip(infos)
            .zip(&render_pass.create_info.attachments)
            .enumerate()
        {
            let context = || format!("attachments[{}]", index);
            let objects = || -> SmallVec<[TypedHandle; 2]> {
                [self.typed_handle(), view.typed_handle()].into()
            };
            let [view_width, view_height, view_layers] = view.extent();

            let mismatch: Option<(String, &'static [&'static str])> =
                if view.image.create_info.flags != info.flags {
                    Some((
                        "the image flags differ from the attachment image info".into(),
                        &["VUID-VkRenderPassBeginInfo-framebuffer-03209"],
                    ))
                } else if view.usage != info.usage {
                    Some((
                        format!(
                            "the usage of the image view ({:?}) differs from the usage of the \
                            attachment image info ({:?})",
                            view.usage, info.usage,
                        ),
                        &["VUID-VkRenderPassBeginInfo-framebuffer-04627"],
                    ))
                } else if view_width != info.width {
                    Some((
                        format!(
                            "the width of the image view ({}) differs from the attachment image \
                            info ({})",
                            view_width, info.width,
                        ),
                        &["VUID-VkRenderPassBeginInfo-framebuffer-03211"],
                    ))
                } else if view_height != info.height {
                    Some((
                        format!(
                            "the height of the image view ({}) differs from the attachment \
                            image info ({})",
                            view_height, info.height,
                        ),
                        &["VUID-VkRenderPassBeginInfo-framebuffer-03212"],
                    ))
                } else if view_layers != info.layer_count {
                    Some((
                        format!(
                            "the layer count of the image view ({}) differs from the attachment \
                            image info ({})",
                            view_layers, info.layer_count,
                        ),
                        &["VUID-VkRenderPassBeginInfo-framebuffer-03213"],
                    ))
                } else if !info.view_formats.contains(&view.create_info.format) {
                    Some((
                        format!(
                            "the format of the image view ({:?}) is not one of the view formats \
                            of the attachment image info ({:?})",
                            view.create_info.format, info.view_formats,
                        ),
                        &["VUID-VkRenderPassBeginInfo-framebuffer-03215"],
                    ))
                } else if view.create_info.format != description.format {
                    Some((
                        format!(
                            "the format of the image view ({:?}) differs from the format of the \
                            render pass attachment ({:?})",
                            view.create_info.format, description.format,
                        ),
                        &["VUID-VkRenderPassBeginInfo-framebuffer-03216"],
                    ))
                } else if view.samples != description.samples {
                    Some((
                        "the sample count of the image view differs from the render pass \
                        attachment"
                            .into(),
                        &["VUID-VkRenderPassBeginInfo-framebuffer-09047"],
                    ))
                } else if view.normalized_range.level_count != 1 {
                    Some((
                        "the image view has more than one mip level".into(),
                        &["VUID-VkRenderPassAttachmentBeginInfo-pAttachments-03218"],
                    ))
                } else {
                    None
                };

            if let Some((problem, vuids)) = mismatch {
                return Err(Box::new(ValidationError {
                    context: context().into(),
                    problem: problem.into(),
                    vuids,
                    objects: objects(),
                    ..Default::default()
                }));
            }
        }

        Ok(())
    }

    /// The image views used by a render pass instance: the framebuffer's own, or the ones given
    /// at begin for imageless framebuffers.
    pub fn resolve_attachments<'a>(
        &'a self,
        begin_views: &'a [Arc<ImageViewState>],
    ) -> &'a [Arc<ImageViewState>] {
        if self.is_imageless() {
            begin_views
        } else {
            &self.attachments
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        image::{
            ImageCreateInfo, ImageLayout, ImageState, ImageSubresourceRange, ImageViewCreateInfo,
        },
        memory::MemoryRequirements,
        render_pass::{
            AttachmentDescription, AttachmentReference, RenderPassCreateInfo, SubpassDescription,
        },
        Handle,
    };

    const LIMITS: FramebufferLimits = FramebufferLimits {
        max_width: 4096,
        max_height: 4096,
        max_layers: 256,
    };

    fn render_pass() -> Arc<RenderPassState> {
        Arc::new(RenderPassState::new(
            vk::RenderPass::from_raw(1),
            RenderPassCreateInfo {
                attachments: vec![AttachmentDescription {
                    format: vk::Format::R8G8B8A8_UNORM,
                    final_layout: ImageLayout::ColorAttachmentOptimal,
                    ..Default::default()
                }],
                subpasses: vec![SubpassDescription {
                    color_attachments: vec![AttachmentReference::new(
                        0,
                        ImageLayout::ColorAttachmentOptimal,
                    )],
                    ..Default::default()
                }],
                ..Default::default()
            },
        ))
    }

    fn view(raw: u64, format: vk::Format, mip_levels: u32) -> Arc<ImageViewState> {
        let image = Arc::new(ImageState::new(
            vk::Image::from_raw(raw),
            ImageCreateInfo {
                format: vk::Format::R8G8B8A8_UNORM,
                extent: [64, 64, 1],
                mip_levels,
                usage: ImageUsage::COLOR_ATTACHMENT,
                flags: ImageCreateFlags::MUTABLE_FORMAT,
                ..Default::default()
            },
            MemoryRequirements::default(),
            Vec::new(),
        ));

        Arc::new(ImageViewState::new(
            vk::ImageView::from_raw(raw + 100),
            ImageViewCreateInfo {
                image: vk::Image::from_raw(raw),
                format,
                subresource_range: ImageSubresourceRange {
                    level_count: vk::REMAINING_MIP_LEVELS,
                    ..ImageSubresourceRange::from_parameters(format, 1, 1)
                },
                ..Default::default()
            },
            image,
        ))
    }

    #[test]
    fn single_mip_level() {
        let render_pass = render_pass();
        let create_info = FramebufferCreateInfo {
            render_pass: vk::RenderPass::from_raw(1),
            attachments: vec![vk::ImageView::from_raw(101)],
            width: 64,
            height: 64,
            ..Default::default()
        };

        create_info
            .validate(
                &render_pass,
                &[view(1, vk::Format::R8G8B8A8_UNORM, 1)],
                LIMITS,
            )
            .unwrap();

        assert_eq!(
            create_info
                .validate(
                    &render_pass,
                    &[view(1, vk::Format::R8G8B8A8_UNORM, 2)],
                    LIMITS,
                )
                .unwrap_err()
                .vuid(),
            "VUID-VkFramebufferCreateInfo-pAttachments-00883",
        );
    }

    #[test]
    fn imageless_begin() {
        let render_pass = render_pass();
        let create_info = FramebufferCreateInfo {
            flags: FramebufferCreateFlags::IMAGELESS,
            render_pass: vk::RenderPass::from_raw(1),
            attachment_image_infos: vec![FramebufferAttachmentImageInfo {
                flags: ImageCreateFlags::MUTABLE_FORMAT,
                usage: ImageUsage::COLOR_ATTACHMENT,
                width: 64,
                height: 64,
                layer_count: 1,
                view_formats: vec![vk::Format::R8G8B8A8_UNORM],
            }],
            width: 64,
            height: 64,
            ..Default::default()
        };
        create_info.validate(&render_pass, &[], LIMITS).unwrap();

        let framebuffer = FramebufferState::new(
            vk::Framebuffer::from_raw(1),
            create_info,
            render_pass.clone(),
            Vec::new(),
        );

        framebuffer
            .validate_attachment_begin_info(
                &render_pass,
                &[view(1, vk::Format::R8G8B8A8_UNORM, 1)],
            )
            .unwrap();

        let err = framebuffer
            .validate_attachment_begin_info(&render_pass, &[view(1, vk::Format::R8G8B8A8_SRGB, 1)])
            .unwrap_err();
        assert_eq!(err.vuid(), "VUID-VkRenderPassBeginInfo-framebuffer-03215");

        let err = framebuffer
            .validate_attachment_begin_info(&render_pass, &[])
            .unwrap_err();
        assert_eq!(err.vuid(), "VUID-VkRenderPassBeginInfo-framebuffer-03208");
    }
}
