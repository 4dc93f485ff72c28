//! Render passes and framebuffers.
//!
//! Render passes are stored in the `VkRenderPassCreateInfo2` form. Callers that start from the
//! version 1 structures widen them before creating a [`RenderPassState`].
//!
//! At creation, the dependencies are turned into a small graph over the subpasses: each subpass
//! knows the subpasses it depends on and the subpasses that depend on it, as well as the
//! dependencies it has on itself. Pipeline barriers recorded inside a subpass must match one of
//! those self-dependencies.

use crate::{
    handle::TypedHandle,
    image::{ImageAspects, ImageLayout, SampleCount},
    macros::vulkan_bitflags,
    registry::{impl_state_object, ObjectBase, StateObject},
    sync::{AccessFlags, DependencyFlags, DependencyInfo, PipelineStages},
    ErrorKind, ValidationError,
};
use ash::vk;
use smallvec::SmallVec;

pub mod framebuffer;

vulkan_bitflags! {
    /// Flags that apply to an attachment description.
    AttachmentDescriptionFlags = AttachmentDescriptionFlags(u32);

    /// The attachment may share memory with other attachments.
    MAY_ALIAS = MAY_ALIAS,
}

/// Describes an attachment that will be used in a render pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentDescription {
    pub flags: AttachmentDescriptionFlags,
    pub format: vk::Format,
    pub samples: SampleCount,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    pub initial_layout: ImageLayout,
    pub final_layout: ImageLayout,
}

impl Default for AttachmentDescription {
    #[inline]
    fn default() -> Self {
        Self {
            flags: AttachmentDescriptionFlags::empty(),
            format: vk::Format::UNDEFINED,
            samples: SampleCount::Sample1,
            load_op: vk::AttachmentLoadOp::DONT_CARE,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: ImageLayout::Undefined,
            final_layout: ImageLayout::General,
        }
    }
}

/// A reference in a subpass description to a particular attachment of the render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentReference {
    /// The index of the attachment, or `vk::ATTACHMENT_UNUSED`.
    pub attachment: u32,
    pub layout: ImageLayout,

    /// Only relevant for input attachments.
    pub aspects: ImageAspects,
}

impl AttachmentReference {
    #[inline]
    pub fn new(attachment: u32, layout: ImageLayout) -> Self {
        Self {
            attachment,
            layout,
            aspects: ImageAspects::empty(),
        }
    }

    #[inline]
    pub fn unused() -> Self {
        Self::new(vk::ATTACHMENT_UNUSED, ImageLayout::Undefined)
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        self.attachment != vk::ATTACHMENT_UNUSED
    }
}

/// Describes one of the subpasses of a render pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubpassDescription {
    /// If not zero, the subpass uses multiview and renders to each view whose bit is set.
    pub view_mask: u32,
    pub input_attachments: Vec<AttachmentReference>,
    pub color_attachments: Vec<AttachmentReference>,

    /// Either empty or one entry per color attachment.
    pub resolve_attachments: Vec<AttachmentReference>,
    pub depth_stencil_attachment: Option<AttachmentReference>,
    pub preserve_attachments: Vec<u32>,
}

impl SubpassDescription {
    /// Returns every used attachment reference of the subpass, except preserve attachments.
    pub fn attachment_references(&self) -> impl Iterator<Item = &AttachmentReference> + '_ {
        self.input_attachments
            .iter()
            .chain(&self.color_attachments)
            .chain(&self.resolve_attachments)
            .chain(&self.depth_stencil_attachment)
            .filter(|reference| reference.is_used())
    }
}

/// A memory dependency between two subpasses, or between a subpass and the outside of the
/// render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubpassDependency {
    /// The source subpass, or `vk::SUBPASS_EXTERNAL`.
    pub src_subpass: u32,

    /// The destination subpass, or `vk::SUBPASS_EXTERNAL`.
    pub dst_subpass: u32,
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub dependency_flags: DependencyFlags,

    /// Only meaningful with `DependencyFlags::VIEW_LOCAL`.
    pub view_offset: i32,
}

impl Default for SubpassDependency {
    #[inline]
    fn default() -> Self {
        Self {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stages: PipelineStages::empty(),
            dst_stages: PipelineStages::empty(),
            src_access: AccessFlags::empty(),
            dst_access: AccessFlags::empty(),
            dependency_flags: DependencyFlags::empty(),
            view_offset: 0,
        }
    }
}

impl SubpassDependency {
    #[inline]
    pub fn is_self_dependency(&self) -> bool {
        self.src_subpass == self.dst_subpass && self.src_subpass != vk::SUBPASS_EXTERNAL
    }
}

/// Parameters of a render pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderPassCreateInfo {
    pub attachments: Vec<AttachmentDescription>,
    pub subpasses: Vec<SubpassDescription>,
    pub dependencies: Vec<SubpassDependency>,
    pub correlated_view_masks: Vec<u32>,
}

impl RenderPassCreateInfo {
    pub(crate) fn validate(&self, max_color_attachments: u32) -> Result<(), Box<ValidationError>> {
        let &Self {
            ref attachments,
            ref subpasses,
            ref dependencies,
            ref correlated_view_masks,
        } = self;

        if subpasses.is_empty() {
            return Err(Box::new(ValidationError {
                context: "subpasses".into(),
                problem: "is empty".into(),
                vuids: &["VUID-VkRenderPassCreateInfo2-subpassCount-arraylength"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        let is_multiview = subpasses[0].view_mask != 0;

        for (subpass_index, subpass) in subpasses.iter().enumerate() {
            if (subpass.view_mask != 0) != is_multiview {
                return Err(Box::new(ValidationError {
                    problem: "some subpasses have a nonzero `view_mask`, but others do not".into(),
                    vuids: &["VUID-VkRenderPassCreateInfo2-viewMask-03058"],
                    ..Default::default()
                }));
            }

            if subpass.color_attachments.len() as u32 > max_color_attachments {
                return Err(Box::new(ValidationError {
                    context: format!("subpasses[{}].color_attachments", subpass_index).into(),
                    problem: format!(
                        "the number of elements exceeds the `max_color_attachments` limit ({})",
                        max_color_attachments,
                    )
                    .into(),
                    vuids: &["VUID-VkSubpassDescription2-colorAttachmentCount-03063"],
                    kind: ErrorKind::ParameterOutOfRange,
                    ..Default::default()
                }));
            }

            if !subpass.resolve_attachments.is_empty()
                && subpass.resolve_attachments.len() != subpass.color_attachments.len()
            {
                return Err(Box::new(ValidationError {
                    context: format!("subpasses[{}].resolve_attachments", subpass_index).into(),
                    problem: "is not empty, and does not have the same length as \
                        `color_attachments`"
                        .into(),
                    vuids: &["VUID-VkSubpassDescription2-pResolveAttachments-parameter"],
                    ..Default::default()
                }));
            }

            let out_of_range = subpass
                .attachment_references()
                .map(|reference| reference.attachment)
                .chain(subpass.preserve_attachments.iter().copied())
                .find(|&attachment| attachment as usize >= attachments.len());

            if let Some(attachment) = out_of_range {
                return Err(Box::new(ValidationError {
                    context: format!("subpasses[{}]", subpass_index).into(),
                    problem: format!(
                        "refers to attachment {}, but there are only {} attachments",
                        attachment,
                        attachments.len(),
                    )
                    .into(),
                    vuids: &["VUID-VkRenderPassCreateInfo2-attachment-03051"],
                    kind: ErrorKind::ParameterOutOfRange,
                    ..Default::default()
                }));
            }

            // Resolving only makes sense from a multisampled attachment.
            for (color, resolve) in subpass
                .color_attachments
                .iter()
                .zip(&subpass.resolve_attachments)
            {
                if resolve.is_used()
                    && color.is_used()
                    && attachments[color.attachment as usize].samples == SampleCount::Sample1
                {
                    return Err(Box::new(ValidationError {
                        context: format!("subpasses[{}].resolve_attachments", subpass_index)
                            .into(),
                        problem: format!(
                            "attachment {} is resolved, but it is single-sampled",
                            color.attachment,
                        )
                        .into(),
                        vuids: &["VUID-VkSubpassDescription2-pResolveAttachments-03067"],
                        ..Default::default()
                    }));
                }
            }
        }

        for (dependency_index, dependency) in dependencies.iter().enumerate() {
            validate_dependency(dependency, dependency_index, subpasses)?;
        }

        if !correlated_view_masks.is_empty() {
            if !is_multiview {
                return Err(Box::new(ValidationError {
                    context: "correlated_view_masks".into(),
                    problem: "is not empty, but multiview is not used".into(),
                    vuids: &["VUID-VkRenderPassCreateInfo2-viewMask-03057"],
                    ..Default::default()
                }));
            }

            let mut total = 0;

            for &mask in correlated_view_masks {
                if total & mask != 0 {
                    return Err(Box::new(ValidationError {
                        context: "correlated_view_masks".into(),
                        problem: "the elements overlap".into(),
                        vuids: &["VUID-VkRenderPassCreateInfo2-pCorrelatedViewMasks-03056"],
                        ..Default::default()
                    }));
                }

                total |= mask;
            }
        }

        Ok(())
    }
}

fn validate_dependency(
    dependency: &SubpassDependency,
    dependency_index: usize,
    subpasses: &[SubpassDescription],
) -> Result<(), Box<ValidationError>> {
    let &SubpassDependency {
        src_subpass,
        dst_subpass,
        src_stages,
        dst_stages,
        src_access,
        dst_access,
        dependency_flags,
        view_offset,
    } = dependency;

    let context = || format!("dependencies[{}]", dependency_index);

    if !src_access.unsupported_by(src_stages).is_empty() {
        return Err(Box::new(ValidationError {
            context: format!("{}.src_access", context()).into(),
            problem: "contains accesses that are not supported by `src_stages`".into(),
            vuids: &["VUID-VkSubpassDependency2-srcAccessMask-03088"],
            ..Default::default()
        }));
    }

    if !dst_access.unsupported_by(dst_stages).is_empty() {
        return Err(Box::new(ValidationError {
            context: format!("{}.dst_access", context()).into(),
            problem: "contains accesses that are not supported by `dst_stages`".into(),
            vuids: &["VUID-VkSubpassDependency2-dstAccessMask-03089"],
            ..Default::default()
        }));
    }

    if src_subpass == vk::SUBPASS_EXTERNAL && dst_subpass == vk::SUBPASS_EXTERNAL {
        return Err(Box::new(ValidationError {
            context: context().into(),
            problem: "`src_subpass` and `dst_subpass` are both `SUBPASS_EXTERNAL`".into(),
            vuids: &["VUID-VkSubpassDependency2-srcSubpass-03085"],
            ..Default::default()
        }));
    }

    let endpoints: [(u32, &str, &'static [&'static str]); 2] = [
        (
            src_subpass,
            "src_subpass",
            &["VUID-VkRenderPassCreateInfo2-srcSubpass-02526"],
        ),
        (
            dst_subpass,
            "dst_subpass",
            &["VUID-VkRenderPassCreateInfo2-dstSubpass-02527"],
        ),
    ];

    for (subpass, name, vuids) in endpoints {
        if subpass == vk::SUBPASS_EXTERNAL {
            if dependency_flags.intersects(DependencyFlags::VIEW_LOCAL) {
                return Err(Box::new(ValidationError {
                    context: context().into(),
                    problem: "is an external dependency, but `dependency_flags` contains \
                        `VIEW_LOCAL`"
                        .into(),
                    vuids: &["VUID-VkSubpassDependency2-dependencyFlags-03090"],
                    ..Default::default()
                }));
            }
        } else if subpass as usize >= subpasses.len() {
            return Err(Box::new(ValidationError {
                context: format!("{}.{}", context(), name).into(),
                problem: format!(
                    "is {}, but there are only {} subpasses",
                    subpass,
                    subpasses.len(),
                )
                .into(),
                vuids,
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }
    }

    if src_subpass == vk::SUBPASS_EXTERNAL || dst_subpass == vk::SUBPASS_EXTERNAL {
        return Ok(());
    }

    if src_subpass > dst_subpass {
        return Err(Box::new(ValidationError {
            context: context().into(),
            problem: "`src_subpass` is greater than `dst_subpass`".into(),
            vuids: &["VUID-VkSubpassDependency2-srcSubpass-03084"],
            ..Default::default()
        }));
    }

    if src_subpass != dst_subpass {
        return Ok(());
    }

    if dependency_flags.intersects(DependencyFlags::VIEW_LOCAL) {
        if view_offset != 0 {
            return Err(Box::new(ValidationError {
                context: format!("{}.view_offset", context()).into(),
                problem: "the dependency is a self-dependency, but the view offset is not zero"
                    .into(),
                vuids: &["VUID-VkSubpassDependency2-viewOffset-02530"],
                ..Default::default()
            }));
        }
    } else if subpasses[src_subpass as usize].view_mask.count_ones() > 1 {
        return Err(Box::new(ValidationError {
            context: format!("{}.dependency_flags", context()).into(),
            problem: format!(
                "the dependency is a self-dependency of subpass {}, which has more than one bit \
                set in its view mask, but `VIEW_LOCAL` is not set",
                src_subpass,
            )
            .into(),
            vuids: &["VUID-VkRenderPassCreateInfo2-pDependencies-03060"],
            ..Default::default()
        }));
    }

    if src_stages.is_framebuffer_space() && dst_stages.is_framebuffer_space() {
        if !dependency_flags.intersects(DependencyFlags::BY_REGION) {
            return Err(Box::new(ValidationError {
                context: format!("{}.dependency_flags", context()).into(),
                problem: "the dependency is a self-dependency between framebuffer-space stages, \
                    but `BY_REGION` is not set"
                    .into(),
                vuids: &["VUID-VkSubpassDependency2-srcSubpass-02245"],
                ..Default::default()
            }));
        }
    }

    if let (Some(latest_src), Some(earliest_dst)) = (
        src_stages.latest_graphics_stage(),
        dst_stages.earliest_graphics_stage(),
    ) {
        if latest_src > earliest_dst {
            return Err(Box::new(ValidationError {
                context: context().into(),
                problem: "the dependency is a self-dependency, but the logically latest stage of \
                    `src_stages` is logically later than the earliest stage of `dst_stages`"
                    .into(),
                vuids: &["VUID-VkSubpassDependency2-srcSubpass-03087"],
                ..Default::default()
            }));
        }
    }

    Ok(())
}

/// Parameters of beginning a render pass instance.
#[derive(Clone, Debug)]
pub struct RenderPassBeginInfo {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub render_area: vk::Rect2D,

    /// The image views of an imageless framebuffer. Empty otherwise.
    pub attachments: Vec<vk::ImageView>,

    /// Zero means the initial device mask of the command buffer.
    pub device_mask: u32,
}

impl Default for RenderPassBeginInfo {
    #[inline]
    fn default() -> Self {
        Self {
            render_pass: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
            render_area: vk::Rect2D::default(),
            attachments: Vec::new(),
            device_mask: 0,
        }
    }
}

/// The position of a subpass in the dependency graph.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubpassNode {
    /// Subpasses this subpass depends on.
    pub prev: SmallVec<[u32; 4]>,

    /// Subpasses that depend on this subpass.
    pub next: SmallVec<[u32; 4]>,
}

/// State of a `VkRenderPass`.
#[derive(Debug)]
pub struct RenderPassState {
    base: ObjectBase,
    pub create_info: RenderPassCreateInfo,
    pub subpass_to_node: Vec<SubpassNode>,

    /// For each subpass, the indices of the dependencies whose source and destination are that
    /// subpass.
    pub self_dependencies: Vec<SmallVec<[u32; 2]>>,

    /// For each attachment, whether its first use in the render pass is as an input attachment.
    pub attachment_first_read: Vec<bool>,
}

impl_state_object!(RenderPassState, vk::RenderPass);

impl RenderPassState {
    pub(crate) fn new(render_pass: vk::RenderPass, create_info: RenderPassCreateInfo) -> Self {
        let subpass_count = create_info.subpasses.len();
        let mut subpass_to_node = vec![SubpassNode::default(); subpass_count];
        let mut self_dependencies = vec![SmallVec::new(); subpass_count];

        for (index, dependency) in create_info.dependencies.iter().enumerate() {
            let (src, dst) = (dependency.src_subpass, dependency.dst_subpass);

            if src == vk::SUBPASS_EXTERNAL
                || dst == vk::SUBPASS_EXTERNAL
                || src as usize >= subpass_count
                || dst as usize >= subpass_count
            {
                continue;
            }

            if src == dst {
                self_dependencies[src as usize].push(index as u32);
            } else {
                if !subpass_to_node[dst as usize].prev.contains(&src) {
                    subpass_to_node[dst as usize].prev.push(src);
                }

                if !subpass_to_node[src as usize].next.contains(&dst) {
                    subpass_to_node[src as usize].next.push(dst);
                }
            }
        }

        let mut seen = vec![false; create_info.attachments.len()];
        let mut attachment_first_read = vec![false; create_info.attachments.len()];
        let mut mark = |reference: &AttachmentReference, is_read: bool| {
            if let Some(seen) = seen.get_mut(reference.attachment as usize) {
                if !*seen {
                    *seen = true;
                    attachment_first_read[reference.attachment as usize] = is_read;
                }
            }
        };

        for subpass in &create_info.subpasses {
            for reference in &subpass.input_attachments {
                mark(reference, true);
            }

            for reference in subpass
                .color_attachments
                .iter()
                .chain(&subpass.resolve_attachments)
                .chain(&subpass.depth_stencil_attachment)
            {
                mark(reference, false);
            }
        }

        RenderPassState {
            base: ObjectBase::new(TypedHandle::new(render_pass)),
            create_info,
            subpass_to_node,
            self_dependencies,
            attachment_first_read,
        }
    }

    #[inline]
    pub fn subpass_count(&self) -> u32 {
        self.create_info.subpasses.len() as u32
    }

    #[inline]
    pub fn attachment_count(&self) -> u32 {
        self.create_info.attachments.len() as u32
    }

    #[inline]
    pub fn is_multiview(&self) -> bool {
        self.create_info.subpasses[0].view_mask != 0
    }

    /// Returns the sample count shared by the color and depth/stencil attachments of `subpass`,
    /// or `None` if the subpass has no such attachments.
    pub fn subpass_samples(&self, subpass: u32) -> Option<SampleCount> {
        let subpass = self.create_info.subpasses.get(subpass as usize)?;

        subpass
            .color_attachments
            .iter()
            .chain(&subpass.depth_stencil_attachment)
            .filter(|reference| reference.is_used())
            .map(|reference| self.create_info.attachments[reference.attachment as usize].samples)
            .next()
    }

    /// Returns the layout each attachment used by `subpass` is in during that subpass.
    pub fn subpass_layouts(&self, subpass: u32) -> Vec<(u32, ImageLayout)> {
        let mut result: Vec<(u32, ImageLayout)> = Vec::new();

        if let Some(subpass) = self.create_info.subpasses.get(subpass as usize) {
            for reference in subpass.attachment_references() {
                if !result.iter().any(|&(a, _)| a == reference.attachment) {
                    result.push((reference.attachment, reference.layout));
                }
            }
        }

        result
    }

    /// Checks whether `self` and `other` are compatible, so that a framebuffer or pipeline
    /// created against one can be used with the other.
    pub fn validate_compatible(&self, other: &RenderPassState) -> Result<(), Box<ValidationError>> {
        if self.handle() == other.handle() {
            return Ok(());
        }

        let objects = [self.typed_handle(), other.typed_handle()];

        if self.subpass_count() != other.subpass_count() {
            return Err(Box::new(ValidationError {
                problem: format!(
                    "the render passes have a different number of subpasses ({} and {})",
                    self.subpass_count(),
                    other.subpass_count(),
                )
                .into(),
                objects: objects.into_iter().collect(),
                ..Default::default()
            }));
        }

        for (index, (a, b)) in self
            .create_info
            .subpasses
            .iter()
            .zip(&other.create_info.subpasses)
            .enumerate()
        {
            let lists: [(&str, &[AttachmentReference], &[AttachmentReference]); 4] = [
                ("input", &a.input_attachments, &b.input_attachments),
                ("color", &a.color_attachments, &b.color_attachments),
                ("resolve", &a.resolve_attachments, &b.resolve_attachments),
                (
                    "depth/stencil",
                    a.depth_stencil_attachment.as_slice(),
                    b.depth_stencil_attachment.as_slice(),
                ),
            ];

            for (kind, refs_a, refs_b) in lists {
                for slot in 0..refs_a.len().max(refs_b.len()) {
                    let ref_a = refs_a.get(slot).copied().unwrap_or_else(AttachmentReference::unused);
                    let ref_b = refs_b.get(slot).copied().unwrap_or_else(AttachmentReference::unused);

                    if !ref_a.is_used() || !ref_b.is_used() {
                        continue;
                    }

                    let desc_a = &self.create_info.attachments[ref_a.attachment as usize];
                    let desc_b = &other.create_info.attachments[ref_b.attachment as usize];

                    let mismatch = if desc_a.format != desc_b.format {
                        Some("format")
                    } else if desc_a.samples != desc_b.samples {
                        Some("sample count")
                    } else if desc_a.flags != desc_b.flags {
                        Some("flags")
                    } else {
                        None
                    };

                    if let Some(what) = mismatch {
                        return Err(Box::new(ValidationError {
                            problem: format!(
                                "{} attachment {} of subpass {} has a different {} \
                                (attachments {} and {})",
                                kind, slot, index, what, ref_a.attachment, ref_b.attachment,
                            )
                            .into(),
                            objects: objects.into_iter().collect(),
                            ..Default::default()
                        }));
                    }
                }
            }
        }

        Ok(())
    }

    /// Checks a pipeline barrier recorded inside `subpass` against the subpass's
    /// self-dependencies. `attachments` lists the images bound to the current framebuffer.
    pub(crate) fn validate_subpass_barrier(
        &self,
        subpass: u32,
        dependency_info: &DependencyInfo,
        attachments: &[vk::Image],
    ) -> Result<(), Box<ValidationError>> {
        let self_dependencies = self
            .self_dependencies
            .get(subpass as usize)
            .map(SmallVec::as_slice)
            .unwrap_or_default();

        if self_dependencies.is_empty() {
            return Err(Box::new(ValidationError {
                problem: format!(
                    "a pipeline barrier is recorded inside subpass {}, but the subpass has no \
                    self-dependency",
                    subpass,
                )
                .into(),
                vuids: &["VUID-vkCmdPipelineBarrier-pDependencies-02285"],
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        let src_stages = dependency_info.src_stages.expand();
        let dst_stages = dependency_info.dst_stages.expand();
        let src_access = dependency_info
            .memory_barriers
            .iter()
            .fold(AccessFlags::empty(), |acc, b| acc | b.src_access)
            | dependency_info
                .image_memory_barriers
                .iter()
                .fold(AccessFlags::empty(), |acc, b| acc | b.src_access);
        let dst_access = dependency_info
            .memory_barriers
            .iter()
            .fold(AccessFlags::empty(), |acc, b| acc | b.dst_access)
            | dependency_info
                .image_memory_barriers
                .iter()
                .fold(AccessFlags::empty(), |acc, b| acc | b.dst_access);

        let matches = self_dependencies.iter().any(|&index| {
            let dependency = &self.create_info.dependencies[index as usize];

            dependency.src_stages.expand().contains(src_stages)
                && dependency.dst_stages.expand().contains(dst_stages)
                && dependency.src_access.contains(src_access)
                && dependency.dst_access.contains(dst_access)
                && dependency.dependency_flags == dependency_info.dependency_flags
        });

        if !matches {
            return Err(Box::new(ValidationError {
                problem: format!(
                    "the stages, accesses and flags of a pipeline barrier recorded inside \
                    subpass {} are not a subset of any of the subpass's self-dependencies",
                    subpass,
                )
                .into(),
                vuids: &["VUID-vkCmdPipelineBarrier-pDependencies-02285"],
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        if !dependency_info.buffer_memory_barriers.is_empty() {
            return Err(Box::new(ValidationError {
                context: "buffer_memory_barriers".into(),
                problem: "is not empty, but the barrier is recorded inside a render pass".into(),
                vuids: &["VUID-vkCmdPipelineBarrier-bufferMemoryBarrierCount-01178"],
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        for (index, barrier) in dependency_info.image_memory_barriers.iter().enumerate() {
            if barrier.old_layout != barrier.new_layout {
                return Err(Box::new(ValidationError {
                    context: format!("image_memory_barriers[{}]", index).into(),
                    problem: "the barrier is recorded inside a render pass, but `old_layout` and \
                        `new_layout` differ"
                        .into(),
                    vuids: &["VUID-vkCmdPipelineBarrier-oldLayout-01181"],
                    objects: [self.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }

            if barrier.src_queue_family_index != barrier.dst_queue_family_index {
                return Err(Box::new(ValidationError {
                    context: format!("image_memory_barriers[{}]", index).into(),
                    problem: "the barrier is recorded inside a render pass, but it transfers \
                        queue family ownership"
                        .into(),
                    vuids: &["VUID-vkCmdPipelineBarrier-srcQueueFamilyIndex-01182"],
                    objects: [self.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }

            if !attachments.contains(&barrier.image) {
                return Err(Box::new(ValidationError {
                    context: format!("image_memory_barriers[{}].image", index).into(),
                    problem: "is not an attachment of the current framebuffer".into(),
                    vuids: &["VUID-vkCmdPipelineBarrier-image-04073"],
                    objects: [self.typed_handle(), TypedHandle::new(barrier.image)]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{registry::StateObject, sync::ImageMemoryBarrier};
    use ash::vk::Handle;

    fn color_attachment(format: vk::Format) -> AttachmentDescription {
        AttachmentDescription {
            format,
            initial_layout: ImageLayout::Undefined,
            final_layout: ImageLayout::ColorAttachmentOptimal,
            ..Default::default()
        }
    }

    fn two_subpasses() -> RenderPassCreateInfo {
        let subpass = SubpassDescription {
            color_attachments: vec![AttachmentReference::new(
                0,
                ImageLayout::ColorAttachmentOptimal,
            )],
            ..Default::default()
        };

        RenderPassCreateInfo {
            attachments: vec![color_attachment(vk::Format::R8G8B8A8_UNORM)],
            subpasses: vec![subpass.clone(), subpass],
            dependencies: vec![SubpassDependency {
                src_subpass: 0,
                dst_subpass: 1,
                src_stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
                dst_stages: PipelineStages::FRAGMENT_SHADER,
                src_access: AccessFlags::COLOR_ATTACHMENT_WRITE,
                dst_access: AccessFlags::SHADER_READ,
                dependency_flags: DependencyFlags::BY_REGION,
                view_offset: 0,
            }],
            correlated_view_masks: Vec::new(),
        }
    }

    #[test]
    fn dependency_graph() {
        let render_pass = RenderPassState::new(vk::RenderPass::from_raw(1), two_subpasses());

        assert!(render_pass.subpass_to_node[0].prev.is_empty());
        assert_eq!(render_pass.subpass_to_node[0].next.as_slice(), &[1]);
        assert_eq!(render_pass.subpass_to_node[1].prev.as_slice(), &[0]);
        assert!(render_pass.self_dependencies.iter().all(|deps| deps.is_empty()));
    }

    #[test]
    fn first_read() {
        let mut create_info = two_subpasses();
        create_info
            .attachments
            .push(color_attachment(vk::Format::R8G8B8A8_UNORM));
        create_info.subpasses[0]
            .input_attachments
            .push(AttachmentReference::new(1, ImageLayout::ShaderReadOnlyOptimal));

        let render_pass = RenderPassState::new(vk::RenderPass::from_raw(1), create_info);
        assert_eq!(render_pass.attachment_first_read, vec![false, true]);
    }

    #[test]
    fn dependency_rules() {
        let mut create_info = two_subpasses();
        create_info.validate(8).unwrap();

        create_info.dependencies[0].src_subpass = 1;
        create_info.dependencies[0].dst_subpass = 0;
        assert_eq!(
            create_info.validate(8).unwrap_err().vuid(),
            "VUID-VkSubpassDependency2-srcSubpass-03084",
        );

        create_info.dependencies[0].src_subpass = vk::SUBPASS_EXTERNAL;
        create_info.dependencies[0].dst_subpass = vk::SUBPASS_EXTERNAL;
        assert_eq!(
            create_info.validate(8).unwrap_err().vuid(),
            "VUID-VkSubpassDependency2-srcSubpass-03085",
        );

        create_info.dependencies[0].src_subpass = 0;
        create_info.dependencies[0].dst_subpass = 1;
        create_info.dependencies[0].dst_access = AccessFlags::COLOR_ATTACHMENT_WRITE;
        assert_eq!(
            create_info.validate(8).unwrap_err().vuid(),
            "VUID-VkSubpassDependency2-dstAccessMask-03089",
        );
    }

    #[test]
    fn self_dependency_rules() {
        let mut create_info = two_subpasses();
        create_info.dependencies[0].dst_subpass = 0;
        create_info.dependencies[0].src_stages = PipelineStages::FRAGMENT_SHADER;
        create_info.dependencies[0].dst_stages = PipelineStages::FRAGMENT_SHADER;
        create_info.dependencies[0].src_access = AccessFlags::SHADER_WRITE;
        create_info.validate(8).unwrap();

        create_info.dependencies[0].src_stages = PipelineStages::COLOR_ATTACHMENT_OUTPUT;
        create_info.dependencies[0].src_access = AccessFlags::COLOR_ATTACHMENT_WRITE;
        assert_eq!(
            create_info.validate(8).unwrap_err().vuid(),
            "VUID-VkSubpassDependency2-srcSubpass-03087",
        );

        create_info.dependencies[0].src_stages = PipelineStages::FRAGMENT_SHADER;
        create_info.dependencies[0].src_access = AccessFlags::SHADER_WRITE;
        create_info.dependencies[0].dependency_flags |= DependencyFlags::VIEW_LOCAL;
        create_info.dependencies[0].view_offset = 1;
        for subpass in &mut create_info.subpasses {
            subpass.view_mask = 0b11;
        }
        assert_eq!(
            create_info.validate(8).unwrap_err().vuid(),
            "VUID-VkSubpassDependency2-viewOffset-02530",
        );

        create_info.dependencies[0].dependency_flags = DependencyFlags::BY_REGION;
        create_info.dependencies[0].view_offset = 0;
        assert_eq!(
            create_info.validate(8).unwrap_err().vuid(),
            "VUID-VkRenderPassCreateInfo2-pDependencies-03060",
        );
    }

    #[test]
    fn compatibility() {
        let a = RenderPassState::new(vk::RenderPass::from_raw(1), two_subpasses());
        let b = RenderPassState::new(vk::RenderPass::from_raw(2), two_subpasses());
        a.validate_compatible(&b).unwrap();

        // Unused references are compatible with anything.
        let mut create_info = two_subpasses();
        create_info.subpasses[1].color_attachments[0] = AttachmentReference::unused();
        let c = RenderPassState::new(vk::RenderPass::from_raw(3), create_info);
        a.validate_compatible(&c).unwrap();

        let mut create_info = two_subpasses();
        create_info.attachments[0].format = vk::Format::B8G8R8A8_UNORM;
        let d = RenderPassState::new(vk::RenderPass::from_raw(4), create_info);
        assert!(a.validate_compatible(&d).is_err());

        let mut create_info = two_subpasses();
        create_info.subpasses.pop();
        create_info.dependencies.clear();
        let e = RenderPassState::new(vk::RenderPass::from_raw(5), create_info);
        let err = a.validate_compatible(&e).unwrap_err();
        assert_eq!(err.objects.as_slice(), &[a.typed_handle(), e.typed_handle()]);
    }

    #[test]
    fn barrier_inside_subpass() {
        let mut create_info = two_subpasses();
        create_info.dependencies.push(SubpassDependency {
            src_subpass: 0,
            dst_subpass: 0,
            src_stages: PipelineStages::FRAGMENT_SHADER,
            dst_stages: PipelineStages::FRAGMENT_SHADER,
            src_access: AccessFlags::SHADER_WRITE,
            dst_access: AccessFlags::SHADER_READ,
            dependency_flags: DependencyFlags::BY_REGION,
            view_offset: 0,
        });
        let render_pass = RenderPassState::new(vk::RenderPass::from_raw(1), create_info);
        let image = vk::Image::from_raw(7);

        let mut dependency_info = DependencyInfo {
            src_stages: PipelineStages::FRAGMENT_SHADER,
            dst_stages: PipelineStages::FRAGMENT_SHADER,
            dependency_flags: DependencyFlags::BY_REGION,
            image_memory_barriers: [ImageMemoryBarrier {
                src_access: AccessFlags::SHADER_WRITE,
                dst_access: AccessFlags::SHADER_READ,
                old_layout: ImageLayout::General,
                new_layout: ImageLayout::General,
                image,
                ..Default::default()
            }]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        render_pass
            .validate_subpass_barrier(0, &dependency_info, &[image])
            .unwrap();

        assert_eq!(
            render_pass
                .validate_subpass_barrier(1, &dependency_info, &[image])
                .unwrap_err()
                .vuid(),
            "VUID-vkCmdPipelineBarrier-pDependencies-02285",
        );

        dependency_info.image_memory_barriers[0].new_layout = ImageLayout::ShaderReadOnlyOptimal;
        assert_eq!(
            render_pass
                .validate_subpass_barrier(0, &dependency_info, &[image])
                .unwrap_err()
                .vuid(),
            "VUID-vkCmdPipelineBarrier-oldLayout-01181",
        );
    }
}
