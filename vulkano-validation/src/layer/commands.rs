//! Hooks for the `vkCmd*` entry points that bind state, draw, dispatch, copy and synchronize.
//!
//! Checks that depend only on the state of the command buffer run when the command is recorded.
//! The contents of bound descriptor sets can still change until the command buffer is submitted
//! (update-after-bind), and the layouts images will be in depend on what other command buffers
//! do before, so those checks are queued as submit-time callbacks.

use super::{
    command_buffer::{CommandInfo, RenderPassScope},
    ValidationLayer,
};
use crate::{
    buffer::{BufferState, BufferUsage},
    command_buffer::{
        BufferCopy, ClearAttachment, ClearRect, CommandBufferLevel, CommandBufferMut,
        CommandBufferState, CommandBufferStatus, CommandBufferUsage, IndexBufferBinding,
        RenderPassInstance, SubmitContext, SubpassContents, VertexBufferBinding,
    },
    descriptor_set::{
        layout::{DescriptorBindingFlags, DescriptorSetLayoutDef},
        Descriptor, DescriptorSetState, WriteDescriptorSet,
    },
    device::QueueFlags,
    format::FormatInfo,
    handle::TypedHandle,
    image::{
        layout_map::ImageSubresourceLayoutMap, ImageAspects, ImageLayout, ImageState,
        ImageUsage, ImageViewState,
    },
    memory::validate_memory_is_valid,
    pipeline::{last_bound::ValidatedSet, DynamicState, PipelineBindPoint, PipelineState},
    registry::{BindableRef, StateObject},
    report::Severity,
    shader::ShaderStages,
    sync::{
        qfo::{self, QfoTransfer, QfoTransfers},
        DependencyInfo,
    },
    DeviceSize, ErrorKind, ValidationError,
};
use ash::vk;
use foldhash::{HashMap, HashSet};
use smallvec::SmallVec;
use std::sync::Arc;

/// A command that executes a pipeline: a draw or a dispatch.
struct ActionCommand {
    info: CommandInfo,
    bind_point: PipelineBindPoint,
    indexed: bool,
    pipeline_vuids: &'static [&'static str],
    set_vuids: &'static [&'static str],
    descriptor_vuids: &'static [&'static str],
    render_pass_vuids: &'static [&'static str],
    subpass_vuids: &'static [&'static str],
}

const DRAW: ActionCommand = ActionCommand {
    info: CommandInfo {
        name: "vkCmdDraw",
        recording_vuids: &["VUID-vkCmdDraw-commandBuffer-recording"],
        render_pass: RenderPassScope::Inside(&["VUID-vkCmdDraw-renderpass"]),
        queue_flags: QueueFlags::GRAPHICS,
        queue_flags_vuids: &["VUID-vkCmdDraw-commandBuffer-cmdpool"],
        in_secondary_subpass: false,
    },
    bind_point: PipelineBindPoint::Graphics,
    indexed: false,
    pipeline_vuids: &["VUID-vkCmdDraw-None-08606"],
    set_vuids: &["VUID-vkCmdDraw-None-02697"],
    descriptor_vuids: &["VUID-vkCmdDraw-None-08114"],
    render_pass_vuids: &["VUID-vkCmdDraw-renderPass-02684"],
    subpass_vuids: &["VUID-vkCmdDraw-subpass-02685"],
};

const DRAW_INDEXED: ActionCommand = ActionCommand {
    info: CommandInfo {
        name: "vkCmdDrawIndexed",
        recording_vuids: &["VUID-vkCmdDrawIndexed-commandBuffer-recording"],
        render_pass: RenderPassScope::Inside(&["VUID-vkCmdDrawIndexed-renderpass"]),
        queue_flags: QueueFlags::GRAPHICS,
        queue_flags_vuids: &["VUID-vkCmdDrawIndexed-commandBuffer-cmdpool"],
        in_secondary_subpass: false,
    },
    bind_point: PipelineBindPoint::Graphics,
    indexed: true,
    pipeline_vuids: &["VUID-vkCmdDrawIndexed-None-08606"],
    set_vuids: &["VUID-vkCmdDrawIndexed-None-02697"],
    descriptor_vuids: &["VUID-vkCmdDrawIndexed-None-08114"],
    render_pass_vuids: &["VUID-vkCmdDrawIndexed-renderPass-02684"],
    subpass_vuids: &["VUID-vkCmdDrawIndexed-subpass-02685"],
};

const DISPATCH: ActionCommand = ActionCommand {
    info: CommandInfo {
        name: "vkCmdDispatch",
        recording_vuids: &["VUID-vkCmdDispatch-commandBuffer-recording"],
        render_pass: RenderPassScope::Outside(&["VUID-vkCmdDispatch-renderpass"]),
        queue_flags: QueueFlags::COMPUTE,
        queue_flags_vuids: &["VUID-vkCmdDispatch-commandBuffer-cmdpool"],
        in_secondary_subpass: false,
    },
    bind_point: PipelineBindPoint::Compute,
    indexed: false,
    pipeline_vuids: &["VUID-vkCmdDispatch-None-08606"],
    set_vuids: &["VUID-vkCmdDispatch-None-02697"],
    descriptor_vuids: &["VUID-vkCmdDispatch-None-08114"],
    render_pass_vuids: &[],
    subpass_vuids: &[],
};

const BIND_PIPELINE: CommandInfo = CommandInfo {
    name: "vkCmdBindPipeline",
    recording_vuids: &["VUID-vkCmdBindPipeline-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: QueueFlags::empty(),
    queue_flags_vuids: &[],
    in_secondary_subpass: false,
};

const BIND_DESCRIPTOR_SETS: CommandInfo = CommandInfo {
    name: "vkCmdBindDescriptorSets",
    recording_vuids: &["VUID-vkCmdBindDescriptorSets-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: QueueFlags::GRAPHICS.union(QueueFlags::COMPUTE),
    queue_flags_vuids: &["VUID-vkCmdBindDescriptorSets-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const PUSH_DESCRIPTOR_SET: CommandInfo = CommandInfo {
    name: "vkCmdPushDescriptorSetKHR",
    recording_vuids: &["VUID-vkCmdPushDescriptorSetKHR-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: QueueFlags::GRAPHICS.union(QueueFlags::COMPUTE),
    queue_flags_vuids: &["VUID-vkCmdPushDescriptorSetKHR-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const PUSH_CONSTANTS: CommandInfo = CommandInfo {
    name: "vkCmdPushConstants",
    recording_vuids: &["VUID-vkCmdPushConstants-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: QueueFlags::GRAPHICS.union(QueueFlags::COMPUTE),
    queue_flags_vuids: &["VUID-vkCmdPushConstants-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const BIND_VERTEX_BUFFERS: CommandInfo = CommandInfo {
    name: "vkCmdBindVertexBuffers",
    recording_vuids: &["VUID-vkCmdBindVertexBuffers-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: QueueFlags::GRAPHICS,
    queue_flags_vuids: &["VUID-vkCmdBindVertexBuffers-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const BIND_INDEX_BUFFER: CommandInfo = CommandInfo {
    name: "vkCmdBindIndexBuffer",
    recording_vuids: &["VUID-vkCmdBindIndexBuffer-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: QueueFlags::GRAPHICS,
    queue_flags_vuids: &["VUID-vkCmdBindIndexBuffer-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const SET_VIEWPORT: CommandInfo = CommandInfo {
    name: "vkCmdSetViewport",
    recording_vuids: &["VUID-vkCmdSetViewport-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: QueueFlags::GRAPHICS,
    queue_flags_vuids: &["VUID-vkCmdSetViewport-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const SET_SCISSOR: CommandInfo = CommandInfo {
    name: "vkCmdSetScissor",
    recording_vuids: &["VUID-vkCmdSetScissor-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: QueueFlags::GRAPHICS,
    queue_flags_vuids: &["VUID-vkCmdSetScissor-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const BIND_SHADING_RATE_IMAGE: CommandInfo = CommandInfo {
    name: "vkCmdBindShadingRateImageNV",
    recording_vuids: &["VUID-vkCmdBindShadingRateImageNV-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: QueueFlags::GRAPHICS,
    queue_flags_vuids: &["VUID-vkCmdBindShadingRateImageNV-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const PIPELINE_BARRIER: CommandInfo = CommandInfo {
    name: "vkCmdPipelineBarrier",
    recording_vuids: &["VUID-vkCmdPipelineBarrier-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: QueueFlags::GRAPHICS
        .union(QueueFlags::COMPUTE)
        .union(QueueFlags::TRANSFER),
    queue_flags_vuids: &["VUID-vkCmdPipelineBarrier-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const COPY_BUFFER: CommandInfo = CommandInfo {
    name: "vkCmdCopyBuffer",
    recording_vuids: &["VUID-vkCmdCopyBuffer-commandBuffer-recording"],
    render_pass: RenderPassScope::Outside(&["VUID-vkCmdCopyBuffer-renderpass"]),
    queue_flags: QueueFlags::GRAPHICS
        .union(QueueFlags::COMPUTE)
        .union(QueueFlags::TRANSFER),
    queue_flags_vuids: &["VUID-vkCmdCopyBuffer-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const CLEAR_ATTACHMENTS: CommandInfo = CommandInfo {
    name: "vkCmdClearAttachments",
    recording_vuids: &["VUID-vkCmdClearAttachments-commandBuffer-recording"],
    render_pass: RenderPassScope::Inside(&["VUID-vkCmdClearAttachments-renderpass"]),
    queue_flags: QueueFlags::GRAPHICS,
    queue_flags_vuids: &["VUID-vkCmdClearAttachments-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const BEGIN_DEBUG_LABEL: CommandInfo = CommandInfo {
    name: "vkCmdBeginDebugUtilsLabelEXT",
    recording_vuids: &["VUID-vkCmdBeginDebugUtilsLabelEXT-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: QueueFlags::empty(),
    queue_flags_vuids: &[],
    in_secondary_subpass: true,
};

const END_DEBUG_LABEL: CommandInfo = CommandInfo {
    name: "vkCmdEndDebugUtilsLabelEXT",
    recording_vuids: &["VUID-vkCmdEndDebugUtilsLabelEXT-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: QueueFlags::empty(),
    queue_flags_vuids: &[],
    in_secondary_subpass: true,
};

const EXECUTE_COMMANDS: CommandInfo = CommandInfo {
    name: "vkCmdExecuteCommands",
    recording_vuids: &["VUID-vkCmdExecuteCommands-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: QueueFlags::GRAPHICS
        .union(QueueFlags::COMPUTE)
        .union(QueueFlags::TRANSFER),
    queue_flags_vuids: &["VUID-vkCmdExecuteCommands-commandBuffer-cmdpool"],
    in_secondary_subpass: true,
};

/// Returns the bits of `count` slots starting at `first`.
fn slot_mask(first: u32, count: u32) -> u32 {
    let bits = if count >= u32::BITS {
        u32::MAX
    } else {
        (1 << count) - 1
    };

    bits.checked_shl(first).unwrap_or(0)
}

/// The layout of subresource `index` of `image` when a command recorded against `recorded`
/// executes: the command buffer's own transitions first, then what completed work left.
fn layout_at(
    ctx: &mut SubmitContext<'_>,
    recorded: Option<&ImageSubresourceLayoutMap>,
    image: &ImageState,
    index: u64,
) -> Option<ImageLayout> {
    recorded
        .and_then(|map| map.current_at(index))
        .or_else(|| ctx.image_layouts(image).get(index))
}

/// Returns a layout that some subresource of `view` is in, if it is not `expected`.
fn view_layout_mismatch(
    ctx: &mut SubmitContext<'_>,
    recorded: Option<&ImageSubresourceLayoutMap>,
    view: &ImageViewState,
    is_expected: impl Fn(ImageLayout) -> bool,
) -> Option<ImageLayout> {
    let image = &view.image;

    for indices in image.encoder().ranges(&view.normalized_range) {
        for index in indices {
            match layout_at(ctx, recorded, image, index) {
                Some(layout) if !is_expected(layout) => return Some(layout),
                _ => (),
            }
        }
    }

    None
}

// The index of the first dynamic offset that belongs to `binding`.
fn dynamic_offset_index(layout: &DescriptorSetLayoutDef, binding: u32) -> usize {
    layout
        .bindings()
        .iter()
        .filter(|def| def.binding < binding && def.descriptor_type.is_dynamic())
        .map(|def| def.descriptor_count as usize)
        .sum()
}

/// The submit-time check of one descriptor set used by a draw or dispatch.
struct SetCheck {
    set_index: u32,
    set: Arc<DescriptorSetState>,
    dynamic_offsets: SmallVec<[u32; 4]>,
    bindings: Vec<u32>,

    /// The layouts the command buffer had put the images of the set in, as of the command.
    recorded_layouts: HashMap<vk::Image, ImageSubresourceLayoutMap>,
}

impl SetCheck {
    fn error(
        &self,
        command: &'static str,
        vuids: &'static [&'static str],
        kind: ErrorKind,
        binding: u32,
        element: usize,
        problem: String,
    ) -> Box<ValidationError> {
        Box::new(ValidationError {
            context: command.into(),
            problem: format!(
                "descriptor {} of binding {} of the set bound at index {} {}",
                element, binding, self.set_index, problem,
            )
            .into(),
            vuids,
            kind,
            objects: std::iter::once(self.set.typed_handle())
                .filter(|object| !object.is_null())
                .collect(),
            ..Default::default()
        })
    }

    fn validate(
        &self,
        ctx: &mut SubmitContext<'_>,
        command: &'static str,
        vuids: &'static [&'static str],
    ) -> Vec<Box<ValidationError>> {
        let mut errors = Vec::new();
        let layout: &DescriptorSetLayoutDef = &self.set.layout_id;

        for &binding in &self.bindings {
            let Some(def) = layout.binding(binding) else {
                continue;
            };
            let Some(descriptors) = self.set.descriptors(binding) else {
                continue;
            };
            let partially_bound = def
                .binding_flags
                .intersects(DescriptorBindingFlags::PARTIALLY_BOUND);
            let destroyed = |element, object: TypedHandle| {
                self.error(
                    command,
                    vuids,
                    ErrorKind::UseAfterFree,
                    binding,
                    element,
                    format!("refers to {}, which has been destroyed", object),
                )
            };

            for (element, descriptor) in descriptors.into_iter().enumerate() {
                match descriptor {
                    Descriptor::Empty => {
                        if !partially_bound {
                            errors.push(self.error(
                                command,
                                vuids,
                                ErrorKind::MissingPrerequisite,
                                binding,
                                element,
                                "is used by the pipeline, but has never been written".into(),
                            ));
                        }
                    }
                    Descriptor::InlineUniformBlock => (),
                    Descriptor::Sampler(sampler) => {
                        if ctx.registry.samplers.get(sampler).is_none() {
                            errors.push(destroyed(element, TypedHandle::new(sampler)));
                        }
                    }
                    Descriptor::Image {
                        image_view,
                        image_layout,
                        sampler,
                    } => {
                        if sampler != vk::Sampler::null()
                            && ctx.registry.samplers.get(sampler).is_none()
                        {
                            errors.push(destroyed(element, TypedHandle::new(sampler)));
                        }

                        let Some(view) = ctx.registry.image_views.get(image_view) else {
                            errors.push(destroyed(element, TypedHandle::new(image_view)));
                            continue;
                        };
                        let recorded = self.recorded_layouts.get(&view.image.handle());

                        if let Some(actual) =
                            view_layout_mismatch(ctx, recorded, &view, |layout| layout == image_layout)
                        {
                            errors.push(
                                self.error(
                                    command,
                                    &["VUID-VkDescriptorImageInfo-imageLayout-00344"],
                                    ErrorKind::StateIncompatible,
                                    binding,
                                    element,
                                    format!(
                                        "was written with layout {:?}, but {} is in layout {:?} \
                                        when the command executes",
                                        image_layout,
                                        view.image.typed_handle(),
                                        actual,
                                    ),
                                )
                                .add_object(view.image.typed_handle()),
                            );
                        }
                    }
                    Descriptor::TexelBuffer(buffer_view) => {
                        if ctx.registry.buffer_views.get(buffer_view).is_none() {
                            errors.push(destroyed(element, TypedHandle::new(buffer_view)));
                        }
                    }
                    Descriptor::Buffer {
                        buffer,
                        offset,
                        range,
                    } => {
                        let Some(buffer_state) = ctx.registry.buffers.get(buffer) else {
                            errors.push(destroyed(element, TypedHandle::new(buffer)));
                            continue;
                        };

                        if let Err(error) = validate_memory_is_valid(
                            &BindableRef::Buffer(buffer_state.clone()),
                            command,
                            vuids,
                        ) {
                            errors.push(error);
                        }

                        if !def.descriptor_type.is_dynamic() || range == vk::WHOLE_SIZE {
                            continue;
                        }

                        let index = dynamic_offset_index(layout, binding) + element;

                        if let Some(&dynamic_offset) = self.dynamic_offsets.get(index) {
                            let end = offset + DeviceSize::from(dynamic_offset) + range;

                            if end > buffer_state.size() {
                                errors.push(self.error(
                                    command,
                                    &["VUID-vkCmdBindDescriptorSets-pDynamicOffsets-01979"],
                                    ErrorKind::ParameterOutOfRange,
                                    binding,
                                    element,
                                    format!(
                                        "with dynamic offset {} ends at {}, past the size {} of \
                                        {}",
                                        dynamic_offset,
                                        end,
                                        buffer_state.size(),
                                        buffer_state.typed_handle(),
                                    ),
                                ));
                            }
                        }
                    }
                    Descriptor::AccelerationStructure(acceleration_structure) => {
                        if ctx
                            .registry
                            .acceleration_structures
                            .get(acceleration_structure)
                            .is_none()
                        {
                            errors.push(destroyed(
                                element,
                                TypedHandle::new(acceleration_structure),
                            ));
                        }
                    }
                }
            }
        }

        errors
    }
}

/// Checks clear rectangles against the render pass instance they are recorded in.
fn validate_clear_rects(
    instance: &RenderPassInstance,
    rects: &[ClearRect],
) -> Vec<Box<ValidationError>> {
    let mut errors = Vec::new();
    let area = instance.render_area;

    for (index, clear_rect) in rects.iter().enumerate() {
        let rect = clear_rect.rect;
        let inside = rect.offset.x >= area.offset.x
            && rect.offset.y >= area.offset.y
            && i64::from(rect.offset.x) + i64::from(rect.extent.width)
                <= i64::from(area.offset.x) + i64::from(area.extent.width)
            && i64::from(rect.offset.y) + i64::from(rect.extent.height)
                <= i64::from(area.offset.y) + i64::from(area.extent.height);

        if !inside {
            errors.push(Box::new(ValidationError {
                context: format!("rects[{}].rect", index).into(),
                problem: format!(
                    "is {:?}, which is not contained in the render area {:?}",
                    rect, area,
                )
                .into(),
                vuids: &["VUID-vkCmdClearAttachments-pRects-00016"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if clear_rect.layer_count == 0 {
            errors.push(Box::new(ValidationError {
                context: format!("rects[{}].layer_count", index).into(),
                problem: "is 0".into(),
                vuids: &["VUID-vkCmdClearAttachments-layerCount-01934"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        } else if let Some(layers) = instance.layers() {
            if clear_rect.base_array_layer + clear_rect.layer_count > layers {
                errors.push(Box::new(ValidationError {
                    context: format!("rects[{}]", index).into(),
                    problem: format!(
                        "covers layers {}..{}, but the framebuffer has {} layers",
                        clear_rect.base_array_layer,
                        clear_rect.base_array_layer + clear_rect.layer_count,
                        layers,
                    )
                    .into(),
                    vuids: &["VUID-vkCmdClearAttachments-pRects-06937"],
                    kind: ErrorKind::ParameterOutOfRange,
                    ..Default::default()
                }));
            }
        }
    }

    errors
}

/// The queue capability a pipeline bind point needs.
fn bind_point_queue_flags(bind_point: PipelineBindPoint) -> QueueFlags {
    match bind_point {
        PipelineBindPoint::Graphics => QueueFlags::GRAPHICS,
        PipelineBindPoint::Compute | PipelineBindPoint::RayTracing => QueueFlags::COMPUTE,
    }
}

impl ValidationLayer {
    pub fn validate_cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, &BIND_PIPELINE);

        let queue_flags_vuids: &'static [&'static str] = match bind_point {
            PipelineBindPoint::Graphics => &["VUID-vkCmdBindPipeline-pipelineBindPoint-00778"],
            PipelineBindPoint::Compute => &["VUID-vkCmdBindPipeline-pipelineBindPoint-00777"],
            PipelineBindPoint::RayTracing => &["VUID-vkCmdBindPipeline-pipelineBindPoint-02391"],
        };
        skip |= self.validate_cmd_queue_flags(
            &cb,
            &CommandInfo {
                queue_flags: bind_point_queue_flags(bind_point),
                queue_flags_vuids,
                ..BIND_PIPELINE
            },
        );

        let Some(pipeline) = self.registry.pipelines.get(pipeline) else {
            return skip;
        };

        if pipeline.bind_point() != bind_point {
            skip |= self.emit(Box::new(ValidationError {
                context: "pipeline".into(),
                problem: format!(
                    "is a {:?} pipeline, but it is bound to the {:?} bind point",
                    pipeline.bind_point(),
                    bind_point,
                )
                .into(),
                vuids: match bind_point {
                    PipelineBindPoint::Compute => {
                        &["VUID-vkCmdBindPipeline-pipelineBindPoint-00779"]
                    }
                    _ => &["VUID-vkCmdBindPipeline-pipelineBindPoint-00780"],
                },
                kind: ErrorKind::StateIncompatible,
                objects: [cb.typed_handle(), pipeline.typed_handle()]
                    .into_iter()
                    .collect(),
                ..Default::default()
            }));
        }

        skip
    }

    pub fn record_cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };
        let Some(pipeline) = self.registry.pipelines.get(pipeline) else {
            return;
        };

        let mut state = cb.state.lock();

        if let Some(graphics) = pipeline.graphics() {
            // Whatever the previous pipeline set statically has to be set again.
            let previous = state.static_status;
            state.status.remove(previous);
            let static_status = CommandBufferStatus::static_for(&graphics.dynamic_states);
            state.static_status = static_status;
            state.status |= static_status;
        }

        cb.bind_object(&mut state, pipeline.base());
        state.last_bound_mut(bind_point).bind_pipeline(pipeline);
    }

    pub fn validate_cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, &BIND_DESCRIPTOR_SETS);
        drop(state);

        skip |= self.validate_cmd_queue_flags(
            &cb,
            &CommandInfo {
                queue_flags: bind_point_queue_flags(bind_point),
                queue_flags_vuids: &["VUID-vkCmdBindDescriptorSets-pipelineBindPoint-00361"],
                ..BIND_DESCRIPTOR_SETS
            },
        );

        let Some(layout) = self.registry.pipeline_layouts.get(layout) else {
            return skip;
        };

        if first_set as usize + descriptor_sets.len() > layout.set_count() as usize {
            return skip
                | self.emit(Box::new(ValidationError {
                    context: "first_set + descriptor_sets.len()".into(),
                    problem: format!(
                        "is {}, but the pipeline layout has only {} set layouts",
                        first_set as usize + descriptor_sets.len(),
                        layout.set_count(),
                    )
                    .into(),
                    vuids: &["VUID-vkCmdBindDescriptorSets-firstSet-00360"],
                    kind: ErrorKind::ParameterOutOfRange,
                    objects: [cb.typed_handle(), layout.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
        }

        let mut dynamic_descriptor_count = Some(0);

        for (index, &set) in descriptor_sets.iter().enumerate() {
            let slot = first_set as usize + index;

            let Some(set) = self.registry.descriptor_sets.get(set) else {
                dynamic_descriptor_count = None;
                continue;
            };

            dynamic_descriptor_count = dynamic_descriptor_count
                .map(|count: u32| count + set.dynamic_descriptor_count());

            if set.layout_id != layout.set_layouts[slot] {
                skip |= self.emit(Box::new(ValidationError {
                    context: format!("descriptor_sets[{}]", index).into(),
                    problem: format!(
                        "was allocated with a set layout that is not compatible with set {} of \
                        the pipeline layout",
                        slot,
                    )
                    .into(),
                    vuids: &["VUID-vkCmdBindDescriptorSets-pDescriptorSets-00358"],
                    kind: ErrorKind::StateIncompatible,
                    objects: [set.typed_handle(), layout.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
            }
        }

        if let Some(count) = dynamic_descriptor_count {
            if count as usize != dynamic_offsets.len() {
                skip |= self.emit(Box::new(ValidationError {
                    context: "dynamic_offsets".into(),
                    problem: format!(
                        "has {} elements, but the sets have {} dynamic descriptors",
                        dynamic_offsets.len(),
                        count,
                    )
                    .into(),
                    vuids: &["VUID-vkCmdBindDescriptorSets-dynamicOffsetCount-00359"],
                    kind: ErrorKind::ParameterOutOfRange,
                    objects: [cb.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }
        }

        skip
    }

    pub fn record_cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };
        let Some(layout) = self.registry.pipeline_layouts.get(layout) else {
            return;
        };

        let sets: Vec<_> = descriptor_sets
            .iter()
            .map(|&set| self.registry.descriptor_sets.get(set))
            .collect();

        let mut state = cb.state.lock();

        for set in sets.iter().flatten() {
            cb.bind_object(&mut state, set.base());
        }

        state.last_bound_mut(bind_point).bind_descriptor_sets(
            &layout,
            first_set,
            &sets,
            dynamic_offsets,
        );
    }

    pub fn validate_cmd_push_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: u32,
        descriptor_writes: &[WriteDescriptorSet],
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, &PUSH_DESCRIPTOR_SET);
        drop(state);

        skip |= self.validate_cmd_queue_flags(
            &cb,
            &CommandInfo {
                queue_flags: bind_point_queue_flags(bind_point),
                queue_flags_vuids: &["VUID-vkCmdPushDescriptorSetKHR-pipelineBindPoint-00363"],
                ..PUSH_DESCRIPTOR_SET
            },
        );

        let Some(layout) = self.registry.pipeline_layouts.get(layout) else {
            return skip;
        };

        let Some(set_layout) = layout.set_layouts.get(set as usize) else {
            return skip
                | self.emit(Box::new(ValidationError {
                    context: "set".into(),
                    problem: format!(
                        "is {}, but the pipeline layout has only {} set layouts",
                        set,
                        layout.set_count(),
                    )
                    .into(),
                    vuids: &["VUID-vkCmdPushDescriptorSetKHR-set-00364"],
                    kind: ErrorKind::ParameterOutOfRange,
                    objects: [layout.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
        };

        if !set_layout.is_push_descriptor() {
            return skip
                | self.emit(Box::new(ValidationError {
                    context: "set".into(),
                    problem: format!(
                        "set layout {} of the pipeline layout was not created with \
                        `PUSH_DESCRIPTOR`",
                        set,
                    )
                    .into(),
                    vuids: &["VUID-vkCmdPushDescriptorSetKHR-set-00365"],
                    kind: ErrorKind::StateIncompatible,
                    objects: [layout.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
        }

        let scratch = DescriptorSetState::new_push(set_layout.clone());

        for (index, write) in descriptor_writes.iter().enumerate() {
            if let Err(error) = scratch.validate_write(write, &self.registry) {
                skip |= self.emit(error.add_context(format!("descriptor_writes[{}]", index)));
            }
        }

        skip
    }

    pub fn record_cmd_push_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: u32,
        descriptor_writes: &[WriteDescriptorSet],
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };
        let Some(layout) = self.registry.pipeline_layouts.get(layout) else {
            return;
        };
        let Some(set_layout) = layout.set_layouts.get(set as usize).cloned() else {
            return;
        };

        let mut state = cb.state.lock();
        let push_set = state
            .last_bound(bind_point)
            .push_descriptor_set_for(&layout, set)
            .filter(|existing| existing.layout_id == set_layout)
            .unwrap_or_else(|| Arc::new(DescriptorSetState::new_push(set_layout)));

        for write in descriptor_writes {
            push_set.apply_write(write);
        }

        for object in push_set.referenced_objects() {
            if let Some(object) = self.registry.get_base(object) {
                cb.bind_object(&mut state, object.object_base());
            }
        }

        state
            .last_bound_mut(bind_point)
            .push_descriptor_set(&layout, set, push_set);
    }

    pub fn validate_cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: ShaderStages,
        offset: u32,
        size: u32,
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, &PUSH_CONSTANTS);
        drop(state);

        if self.settings.disabled.push_constant_range {
            return skip;
        }

        if let Some(layout) = self.registry.pipeline_layouts.get(layout) {
            skip |= self.emit_result(
                layout
                    .validate_push_constants(
                        stages,
                        offset,
                        size,
                        self.device_info.limits.max_push_constants_size,
                    )
                    .map_err(|error| error.add_object(layout.typed_handle())),
            );
        }

        skip
    }

    /// Checks that `buffer` was created with `usage` and is backed by memory.
    pub(super) fn validate_command_buffer_use(
        &self,
        context: String,
        buffer: &Arc<BufferState>,
        usage: BufferUsage,
        usage_vuids: &'static [&'static str],
        memory_vuids: &'static [&'static str],
        command: &'static str,
    ) -> bool {
        let mut skip = false;

        if !buffer.usage().contains(usage) {
            skip |= self.emit(Box::new(ValidationError {
                context: context.into(),
                problem: format!(
                    "{} was created with usage {:?}, which does not contain {:?}",
                    self.format_handle(buffer.typed_handle()),
                    buffer.usage(),
                    usage,
                )
                .into(),
                vuids: usage_vuids,
                kind: ErrorKind::MissingPrerequisite,
                objects: [buffer.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        skip |= self.emit_result(validate_memory_is_valid(
            &BindableRef::Buffer(buffer.clone()),
            command,
            memory_vuids,
        ));

        skip
    }

    pub fn validate_cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[DeviceSize],
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, &BIND_VERTEX_BUFFERS);
        drop(state);

        let max_bindings = self.device_info.limits.max_vertex_input_bindings;

        if first_binding >= max_bindings {
            skip |= self.emit(Box::new(ValidationError {
                context: "first_binding".into(),
                problem: format!(
                    "is {}, but the `max_vertex_input_bindings` limit is {}",
                    first_binding, max_bindings,
                )
                .into(),
                vuids: &["VUID-vkCmdBindVertexBuffers-firstBinding-00624"],
                kind: ErrorKind::ParameterOutOfRange,
                objects: [cb.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        } else if u64::from(first_binding) + buffers.len() as u64 > u64::from(max_bindings) {
            skip |= self.emit(Box::new(ValidationError {
                context: "first_binding + buffers.len()".into(),
                problem: format!(
                    "is {}, which exceeds the `max_vertex_input_bindings` limit ({})",
                    u64::from(first_binding) + buffers.len() as u64,
                    max_bindings,
                )
                .into(),
                vuids: &["VUID-vkCmdBindVertexBuffers-firstBinding-00625"],
                kind: ErrorKind::ParameterOutOfRange,
                objects: [cb.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        for (index, (&buffer, &offset)) in buffers.iter().zip(offsets).enumerate() {
            let Some(buffer) = self.registry.buffers.get(buffer) else {
                continue;
            };

            skip |= self.validate_command_buffer_use(
                format!("buffers[{}]", index),
                &buffer,
                BufferUsage::VERTEX_BUFFER,
                &["VUID-vkCmdBindVertexBuffers-pBuffers-00627"],
                &["VUID-vkCmdBindVertexBuffers-pBuffers-00628"],
                BIND_VERTEX_BUFFERS.name,
            );

            if offset >= buffer.size() {
                skip |= self.emit(Box::new(ValidationError {
                    context: format!("offsets[{}]", index).into(),
                    problem: format!(
                        "is {}, but the buffer is only {} bytes",
                        offset,
                        buffer.size(),
                    )
                    .into(),
                    vuids: &["VUID-vkCmdBindVertexBuffers-pOffsets-00626"],
                    kind: ErrorKind::ParameterOutOfRange,
                    objects: [buffer.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }
        }

        skip
    }

    pub fn record_cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[DeviceSize],
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        let mut state = cb.state.lock();

        for (index, (&buffer, &offset)) in buffers.iter().zip(offsets).enumerate() {
            if let Some(buffer) = self.registry.buffers.get(buffer) {
                cb.bind_object(&mut state, buffer.base());
            }

            state.vertex_buffers.insert(
                first_binding + index as u32,
                VertexBufferBinding { buffer, offset },
            );
        }
    }

    pub fn validate_cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: DeviceSize,
        index_type: vk::IndexType,
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, &BIND_INDEX_BUFFER);
        drop(state);

        let Some(buffer) = self.registry.buffers.get(buffer) else {
            return skip;
        };

        skip |= self.validate_command_buffer_use(
            "buffer".into(),
            &buffer,
            BufferUsage::INDEX_BUFFER,
            &["VUID-vkCmdBindIndexBuffer-buffer-08784"],
            &["VUID-vkCmdBindIndexBuffer-buffer-08785"],
            BIND_INDEX_BUFFER.name,
        );

        if offset >= buffer.size() {
            skip |= self.emit(Box::new(ValidationError {
                context: "offset".into(),
                problem: format!(
                    "is {}, but the buffer is only {} bytes",
                    offset,
                    buffer.size(),
                )
                .into(),
                vuids: &["VUID-vkCmdBindIndexBuffer-offset-08782"],
                kind: ErrorKind::ParameterOutOfRange,
                objects: [buffer.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        let index_size = index_size(index_type);

        if offset % index_size != 0 {
            skip |= self.emit(Box::new(ValidationError {
                context: "offset".into(),
                problem: format!(
                    "is {}, which is not a multiple of the size {} of {:?}",
                    offset, index_size, index_type,
                )
                .into(),
                vuids: &["VUID-vkCmdBindIndexBuffer-offset-08783"],
                kind: ErrorKind::ParameterOutOfRange,
                objects: [buffer.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        skip
    }

    pub fn record_cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: DeviceSize,
        index_type: vk::IndexType,
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        let mut state = cb.state.lock();

        if let Some(buffer) = self.registry.buffers.get(buffer) {
            cb.bind_object(&mut state, buffer.base());
        }

        state.index_buffer = Some(IndexBufferBinding {
            buffer,
            offset,
            index_type,
        });
        state.status |= CommandBufferStatus::INDEX_BUFFER_BOUND;
    }

    pub fn validate_cmd_set_viewport(
        &self,
        command_buffer: vk::CommandBuffer,
        first_viewport: u32,
        viewport_count: u32,
    ) -> bool {
        self.validate_cmd_set_viewport_slots(
            command_buffer,
            &SET_VIEWPORT,
            first_viewport,
            viewport_count,
            &["VUID-vkCmdSetViewport-firstViewport-01223"],
        )
    }

    pub fn record_cmd_set_viewport(
        &self,
        command_buffer: vk::CommandBuffer,
        first_viewport: u32,
        viewport_count: u32,
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        let mut state = cb.state.lock();
        state.status |= CommandBufferStatus::VIEWPORT;
        state.viewport_mask |= slot_mask(first_viewport, viewport_count);
    }

    pub fn validate_cmd_set_scissor(
        &self,
        command_buffer: vk::CommandBuffer,
        first_scissor: u32,
        scissor_count: u32,
    ) -> bool {
        self.validate_cmd_set_viewport_slots(
            command_buffer,
            &SET_SCISSOR,
            first_scissor,
            scissor_count,
            &["VUID-vkCmdSetScissor-firstScissor-00592"],
        )
    }

    pub fn record_cmd_set_scissor(
        &self,
        command_buffer: vk::CommandBuffer,
        first_scissor: u32,
        scissor_count: u32,
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        let mut state = cb.state.lock();
        state.status |= CommandBufferStatus::SCISSOR;
        state.scissor_mask |= slot_mask(first_scissor, scissor_count);
    }

    fn validate_cmd_set_viewport_slots(
        &self,
        command_buffer: vk::CommandBuffer,
        info: &CommandInfo,
        first: u32,
        count: u32,
        vuids: &'static [&'static str],
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, info);
        let max_viewports = self.device_info.limits.max_viewports;

        if u64::from(first) + u64::from(count) > u64::from(max_viewports) {
            skip |= self.emit(Box::new(ValidationError {
                context: info.name.into(),
                problem: format!(
                    "sets slots {}..{}, but the `max_viewports` limit is {}",
                    first,
                    u64::from(first) + u64::from(count),
                    max_viewports,
                )
                .into(),
                vuids,
                kind: ErrorKind::ParameterOutOfRange,
                objects: [cb.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        skip
    }

    /// Checks the `vkCmdSet*` command that sets `dynamic_state`, other than viewports and
    /// scissors.
    pub fn validate_cmd_set_dynamic_state(
        &self,
        command_buffer: vk::CommandBuffer,
        dynamic_state: DynamicState,
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let name = CommandBufferStatus::empty()
            .missing_commands(CommandBufferStatus::from_dynamic_state(dynamic_state))
            .first()
            .copied()
            .unwrap_or("vkCmdSet*");
        let state = cb.state.lock();

        self.validate_cmd(
            &cb,
            &state,
            &CommandInfo {
                name,
                recording_vuids: &["UNASSIGNED-CoreValidation-DrawState-NoBeginCommandBuffer"],
                render_pass: RenderPassScope::Any,
                queue_flags: QueueFlags::GRAPHICS,
                queue_flags_vuids: &["UNASSIGNED-CoreValidation-DrawState-InvalidQueueFamily"],
                in_secondary_subpass: false,
            },
        )
    }

    pub fn record_cmd_set_dynamic_state(
        &self,
        command_buffer: vk::CommandBuffer,
        dynamic_state: DynamicState,
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        cb.state.lock().status |= CommandBufferStatus::from_dynamic_state(dynamic_state);
    }

    pub fn validate_cmd_bind_shading_rate_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image_view: vk::ImageView,
        image_layout: ImageLayout,
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, &BIND_SHADING_RATE_IMAGE);
        drop(state);

        if !self.device_info.enabled_features.shading_rate_image {
            skip |= self.emit(Box::new(ValidationError {
                problem: "the `shading_rate_image` feature is not enabled".into(),
                vuids: &["VUID-vkCmdBindShadingRateImageNV-None-02058"],
                kind: ErrorKind::MissingPrerequisite,
                objects: [cb.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        if image_view == vk::ImageView::null() {
            return skip;
        }

        let Some(view) = self.registry.image_views.get(image_view) else {
            return skip
                | self.emit(Box::new(ValidationError {
                    context: "image_view".into(),
                    problem: "is not a valid image view".into(),
                    vuids: &["VUID-vkCmdBindShadingRateImageNV-imageView-02059"],
                    kind: ErrorKind::UseAfterFree,
                    objects: [TypedHandle::new(image_view)].into_iter().collect(),
                    ..Default::default()
                }));
        };

        if !view
            .usage
            .intersects(ImageUsage::FRAGMENT_SHADING_RATE_ATTACHMENT)
        {
            skip |= self.emit(Box::new(ValidationError {
                context: "image_view".into(),
                problem: "was not created with the `FRAGMENT_SHADING_RATE_ATTACHMENT` usage"
                    .into(),
                vuids: &["VUID-vkCmdBindShadingRateImageNV-imageView-02061"],
                kind: ErrorKind::MissingPrerequisite,
                objects: [view.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        if !is_shading_rate_layout(image_layout) {
            skip |= self.emit(Box::new(ValidationError {
                context: "image_layout".into(),
                problem: format!(
                    "is {:?}, but it must be `General` or `FragmentShadingRateAttachmentOptimal`",
                    image_layout,
                )
                .into(),
                vuids: &["VUID-vkCmdBindShadingRateImageNV-imageLayout-02063"],
                kind: ErrorKind::StateIncompatible,
                objects: [view.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        skip
    }

    pub fn record_cmd_bind_shading_rate_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image_view: vk::ImageView,
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        let mut state = cb.state.lock();

        if image_view == vk::ImageView::null() {
            state.shading_rate_image = None;
            return;
        }

        state.shading_rate_image = Some(image_view);

        let Some(view) = self.registry.image_views.get(image_view) else {
            return;
        };

        cb.bind_object(&mut state, view.base());
        let recorded = state.image_layouts.get(&view.image.handle()).cloned();

        state
            .queue_submit_functions
            .push(Arc::new(move |ctx: &mut SubmitContext<'_>| {
                let Some(view) = ctx.registry.image_views.get(image_view) else {
                    return vec![Box::new(ValidationError {
                        context: BIND_SHADING_RATE_IMAGE.name.into(),
                        problem: format!("{} has been destroyed", TypedHandle::new(image_view))
                            .into(),
                        vuids: &["VUID-vkCmdBindShadingRateImageNV-imageView-02059"],
                        kind: ErrorKind::UseAfterFree,
                        objects: [TypedHandle::new(image_view)].into_iter().collect(),
                        ..Default::default()
                    })];
                };

                match view_layout_mismatch(ctx, recorded.as_ref(), &view, is_shading_rate_layout)
                {
                    Some(layout) => vec![Box::new(ValidationError {
                        context: BIND_SHADING_RATE_IMAGE.name.into(),
                        problem: format!(
                            "the shading rate image {} is in layout {:?} when it is used",
                            view.typed_handle(),
                            layout,
                        )
                        .into(),
                        vuids: &["VUID-vkCmdBindShadingRateImageNV-imageLayout-02063"],
                        kind: ErrorKind::StateIncompatible,
                        objects: [view.typed_handle(), view.image.typed_handle()]
                            .into_iter()
                            .collect(),
                        ..Default::default()
                    })],
                    None => Vec::new(),
                }
            }));
    }

    pub fn validate_cmd_draw(&self, command_buffer: vk::CommandBuffer) -> bool {
        self.validate_action(command_buffer, &DRAW)
    }

    pub fn record_cmd_draw(&self, command_buffer: vk::CommandBuffer) {
        self.record_action(command_buffer, &DRAW);
    }

    pub fn validate_cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        first_index: u32,
    ) -> bool {
        let mut skip = self.validate_action(command_buffer, &DRAW_INDEXED);

        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return skip;
        };
        let Some(binding) = cb.state.lock().index_buffer else {
            return skip;
        };
        let Some(buffer) = self.registry.buffers.get(binding.buffer) else {
            return skip;
        };

        let end = binding.offset
            + (u64::from(first_index) + u64::from(index_count)) * index_size(binding.index_type);

        if end > buffer.size() {
            skip |= self.emit(Box::new(ValidationError {
                context: "first_index + index_count".into(),
                problem: format!(
                    "reads indices up to byte {}, past the size {} of the index buffer",
                    end,
                    buffer.size(),
                )
                .into(),
                vuids: &["VUID-vkCmdDrawIndexed-robustBufferAccess2-08798"],
                kind: ErrorKind::ParameterOutOfRange,
                objects: [cb.typed_handle(), buffer.typed_handle()]
                    .into_iter()
                    .collect(),
                ..Default::default()
            }));
        }

        skip
    }

    pub fn record_cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer) {
        self.record_action(command_buffer, &DRAW_INDEXED);
    }

    pub fn validate_cmd_dispatch(&self, command_buffer: vk::CommandBuffer) -> bool {
        self.validate_action(command_buffer, &DISPATCH)
    }

    pub fn record_cmd_dispatch(&self, command_buffer: vk::CommandBuffer) {
        self.record_action(command_buffer, &DISPATCH);
    }

    fn validate_action(&self, command_buffer: vk::CommandBuffer, command: &ActionCommand) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, &command.info);
        let last_bound = state.last_bound(command.bind_point);

        let Some(pipeline) = &last_bound.pipeline else {
            return skip
                | self.emit(Box::new(ValidationError {
                    context: command.info.name.into(),
                    problem: format!("no {:?} pipeline is bound", command.bind_point).into(),
                    vuids: command.pipeline_vuids,
                    kind: ErrorKind::MissingPrerequisite,
                    objects: [cb.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
        };

        for &set in &pipeline.active_slots {
            if let Ok(Some(_)) = last_bound.compatible_set(&pipeline.layout, set) {
                continue;
            }

            skip |= self.emit(Box::new(ValidationError {
                context: command.info.name.into(),
                problem: format!(
                    "the bound pipeline uses set {}, but no descriptor set compatible with its \
                    layout is bound there",
                    set,
                )
                .into(),
                vuids: command.set_vuids,
                kind: ErrorKind::StateIncompatible,
                objects: [cb.typed_handle(), pipeline.typed_handle()]
                    .into_iter()
                    .collect(),
                ..Default::default()
            }));
        }

        if command.bind_point == PipelineBindPoint::Graphics {
            skip |= self.validate_draw_state(&cb, &state, pipeline, command);
        }

        skip
    }

    fn validate_draw_state(
        &self,
        cb: &CommandBufferState,
        state: &CommandBufferMut,
        pipeline: &PipelineState,
        command: &ActionCommand,
    ) -> bool {
        let Some(graphics) = pipeline.graphics() else {
            return false;
        };

        let mut skip = false;
        let name = command.info.name;
        let objects = || -> SmallVec<[TypedHandle; 2]> {
            [cb.typed_handle(), pipeline.typed_handle()]
                .into_iter()
                .collect()
        };

        let mut required = graphics
            .dynamic_states
            .iter()
            .filter(|&&dynamic_state| {
                dynamic_state != DynamicState::BlendConstants || graphics.blend_constants_enabled
            })
            .fold(CommandBufferStatus::empty(), |required, &dynamic_state| {
                required | CommandBufferStatus::from_dynamic_state(dynamic_state)
            });

        if command.indexed {
            required |= CommandBufferStatus::INDEX_BUFFER_BOUND;
        }

        let missing = state.status.missing_commands(required);

        if !missing.is_empty() {
            skip |= self.emit(Box::new(ValidationError {
                context: name.into(),
                problem: format!(
                    "the state of the bound pipeline is not fully set: {} must be recorded first",
                    missing.join(", "),
                )
                .into(),
                vuids: &["UNASSIGNED-CoreValidation-DrawState-DynamicStateNotSet"],
                kind: ErrorKind::MissingPrerequisite,
                objects: objects(),
                ..Default::default()
            }));
        }

        for binding in &graphics.vertex_bindings {
            match state.vertex_buffers.get(&binding.binding) {
                Some(bound) if bound.buffer != vk::Buffer::null() => (),
                _ => {
                    skip |= self.emit(Box::new(ValidationError {
                        context: name.into(),
                        problem: format!(
                            "the bound pipeline reads vertex binding {}, but no vertex buffer \
                            is bound there",
                            binding.binding,
                        )
                        .into(),
                        vuids: &["UNASSIGNED-CoreValidation-DrawState-VtxIndexOutOfBounds"],
                        kind: ErrorKind::MissingPrerequisite,
                        objects: objects(),
                        ..Default::default()
                    }));
                }
            }
        }

        for attribute in &graphics.vertex_attributes {
            let Some(bound) = state.vertex_buffers.get(&attribute.binding) else {
                continue;
            };
            let Some(buffer) = self.registry.buffers.get(bound.buffer) else {
                continue;
            };
            let Some(format_info) = FormatInfo::of(attribute.format) else {
                continue;
            };

            let alignment = DeviceSize::from(format_info.vertex_alignment());

            if alignment <= 1 {
                continue;
            }

            let stride = graphics
                .vertex_bindings
                .iter()
                .find(|binding| binding.binding == attribute.binding)
                .map_or(0, |binding| DeviceSize::from(binding.stride));
            let memory_offset = buffer.bindable.binding().map_or(0, |binding| binding.offset);
            let address = memory_offset + bound.offset + DeviceSize::from(attribute.offset);

            if address % alignment != 0 || (address + stride) % alignment != 0 {
                skip |= self.emit(Box::new(ValidationError {
                    context: name.into(),
                    problem: format!(
                        "vertex attribute {} with format {:?} is read from offset {} of the \
                        memory, with stride {}, but the format needs an alignment of {}",
                        attribute.location, attribute.format, address, stride, alignment,
                    )
                    .into(),
                    vuids: &["UNASSIGNED-CoreValidation-DrawState-InvalidVtxAttributeAlignment"],
                    kind: ErrorKind::ParameterOutOfRange,
                    objects: [cb.typed_handle(), buffer.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
            }
        }

        if graphics.rasterizer_discard_enable {
            return skip;
        }

        for (dynamic_state, count, mask, what) in [
            (
                DynamicState::Viewport,
                graphics.viewport_count,
                state.viewport_mask,
                "viewports",
            ),
            (
                DynamicState::Scissor,
                graphics.scissor_count,
                state.scissor_mask,
                "scissors",
            ),
        ] {
            let required = slot_mask(0, count);

            if pipeline.is_dynamic(dynamic_state) && mask & required != required {
                skip |= self.emit(Box::new(ValidationError {
                    context: name.into(),
                    problem: format!(
                        "the bound pipeline uses {} {}, but only the slots {:#b} have been set",
                        count, what, mask,
                    )
                    .into(),
                    vuids: &["UNASSIGNED-CoreValidation-DrawState-ViewportScissorMismatch"],
                    kind: ErrorKind::MissingPrerequisite,
                    objects: objects(),
                    ..Default::default()
                }));
            }
        }

        let Some(instance) = &state.render_pass else {
            return skip;
        };

        let extensions = &self.device_info.enabled_extensions;
        let mixed_samples =
            extensions.amd_mixed_attachment_samples || extensions.nv_framebuffer_mixed_samples;

        if let Some(samples) = instance.render_pass.subpass_samples(instance.subpass) {
            if !mixed_samples && samples != graphics.rasterization_samples {
                skip |= self.emit(Box::new(ValidationError {
                    context: name.into(),
                    problem: format!(
                        "the bound pipeline rasterizes with {:?}, but the attachments of subpass \
                        {} have {:?}",
                        graphics.rasterization_samples, instance.subpass, samples,
                    )
                    .into(),
                    vuids: &["UNASSIGNED-CoreValidation-DrawState-NumSamplesMismatch"],
                    kind: ErrorKind::StateIncompatible,
                    objects: objects(),
                    ..Default::default()
                }));
            }
        }

        if let Some(render_pass) = &pipeline.render_pass {
            if let Err(error) = render_pass.validate_compatible(&instance.render_pass) {
                skip |= self.emit(
                    error
                        .set_vuids(command.render_pass_vuids)
                        .add_context(name)
                        .add_object(pipeline.typed_handle()),
                );
            }
        }

        if graphics.subpass != instance.subpass {
            skip |= self.emit(Box::new(ValidationError {
                context: name.into(),
                problem: format!(
                    "the bound pipeline was created for subpass {}, but the current subpass is {}",
                    graphics.subpass, instance.subpass,
                )
                .into(),
                vuids: command.subpass_vuids,
                kind: ErrorKind::StateIncompatible,
                objects: objects(),
                ..Default::default()
            }));
        }

        skip
    }

    /// Queues the submit-time check of the descriptor sets a draw or dispatch uses. Sets whose
    /// contents and image layouts have not changed since the last queued check are skipped.
    fn record_action(&self, command_buffer: vk::CommandBuffer, command: &ActionCommand) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        let mut state = cb.state.lock();
        let Some(pipeline) = state.last_bound(command.bind_point).pipeline.clone() else {
            return;
        };

        let image_layout_change_count = state.image_layout_change_count;
        let mut checks = Vec::new();

        for &set_index in &pipeline.active_slots {
            let Some(per_set) = state
                .last_bound(command.bind_point)
                .per_set
                .get(set_index as usize)
            else {
                continue;
            };
            let Some(set) = per_set.bound_descriptor_set.clone() else {
                continue;
            };

            let key = ValidatedSet {
                set: set.handle(),
                change_count: set.change_count(),
                image_layout_change_count,
                bindings: pipeline.bindings_used_in_set(set_index),
            };

            if per_set.validated.as_ref() == Some(&key) {
                continue;
            }

            let dynamic_offsets = per_set.dynamic_offsets.clone();
            let recorded_layouts = self.recorded_image_layouts(&state, &set, &key.bindings);

            checks.push(SetCheck {
                set_index,
                set,
                dynamic_offsets,
                bindings: key.bindings.clone(),
                recorded_layouts,
            });
            state.last_bound_mut(command.bind_point).per_set[set_index as usize].validated =
                Some(key);
        }

        if checks.is_empty() {
            return;
        }

        let name = command.info.name;
        let vuids = command.descriptor_vuids;

        state
            .queue_submit_functions
            .push(Arc::new(move |ctx: &mut SubmitContext<'_>| {
                let mut errors = Vec::new();

                for check in &checks {
                    errors.extend(check.validate(ctx, name, vuids));
                }

                errors
            }));
    }

    // Snapshots the command buffer's layouts of the images that image descriptors of `set` view.
    fn recorded_image_layouts(
        &self,
        state: &CommandBufferMut,
        set: &DescriptorSetState,
        bindings: &[u32],
    ) -> HashMap<vk::Image, ImageSubresourceLayoutMap> {
        let mut layouts = HashMap::default();

        for &binding in bindings {
            for descriptor in set.descriptors(binding).unwrap_or_default() {
                let Descriptor::Image { image_view, .. } = descriptor else {
                    continue;
                };
                let Some(view) = self.registry.image_views.get(image_view) else {
                    continue;
                };
                let image = view.image.handle();

                if let Some(map) = state.image_layouts.get(&image) {
                    layouts.entry(image).or_insert_with(|| map.clone());
                }
            }
        }

        layouts
    }

    pub fn validate_cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        dependency_info: &DependencyInfo,
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, &PIPELINE_BARRIER);

        if let Some(instance) = &state.render_pass {
            let attachments: Vec<vk::Image> = instance
                .attachments
                .iter()
                .map(|view| view.image.handle())
                .collect();

            if let Err(error) = instance.render_pass.validate_subpass_barrier(
                instance.subpass,
                dependency_info,
                &attachments,
            ) {
                skip |= self.emit(error.add_context("dependency_info"));
            }
        }

        skip | self.validate_barriers(&cb, &state, dependency_info)
    }

    /// Checks the buffer and image barriers of a pipeline barrier or event wait: layout
    /// transitions against the recorded layouts, and queue family ownership transfers.
    pub(super) fn validate_barriers(
        &self,
        cb: &CommandBufferState,
        state: &CommandBufferMut,
        dependency_info: &DependencyInfo,
    ) -> bool {
        let mut skip = false;
        let mut transfers = state.qfo_transfers.clone();

        for (index, barrier) in dependency_info.buffer_memory_barriers.iter().enumerate() {
            let Some(buffer) = self.registry.buffers.get(barrier.buffer) else {
                continue;
            };

            skip |= self.validate_qfo_barrier(
                cb,
                &mut transfers,
                QfoTransfer::from_buffer_barrier(barrier),
                buffer.create_info.sharing.is_exclusive(),
                format!("dependency_info.buffer_memory_barriers[{}]", index),
            );
        }

        for (index, barrier) in dependency_info.image_memory_barriers.iter().enumerate() {
            let Some(image) = self.registry.images.get(barrier.image) else {
                continue;
            };

            let context = || format!("dependency_info.image_memory_barriers[{}]", index);
            let range = image.normalize_range(&barrier.subresource_range);

            if image.is_layout_locked() && barrier.new_layout != ImageLayout::SharedPresent {
                skip |= self.emit(Box::new(ValidationError {
                    context: context().into(),
                    problem: format!(
                        "transitions the shared presentable image {} to {:?} after it was \
                        presented, but its layout is locked to `SharedPresent`",
                        self.format_handle(image.typed_handle()),
                        barrier.new_layout,
                    )
                    .into(),
                    vuids: &["UNASSIGNED-CoreValidation-DrawState-SharedPresentableImageLayoutLocked"],
                    kind: ErrorKind::StateIncompatible,
                    objects: [cb.typed_handle(), image.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
            }

            if !self.settings.disabled.image_layout_validation
                && barrier.old_layout != ImageLayout::Undefined
            {
                if let Some(map) = state.image_layouts.get(&image.handle()) {
                    let current = image
                        .encoder()
                        .ranges(&range)
                        .into_iter()
                        .flatten()
                        .filter_map(|index| map.current_at(index))
                        .find(|&layout| layout != barrier.old_layout);

                    if let Some(current) = current {
                        skip |= self.emit(Box::new(ValidationError {
                            context: format!("{}.old_layout", context()).into(),
                            problem: format!(
                                "is {:?}, but earlier commands leave {} in {:?}",
                                barrier.old_layout,
                                self.format_handle(image.typed_handle()),
                                current,
                            )
                            .into(),
                            vuids: &["VUID-VkImageMemoryBarrier-oldLayout-01197"],
                            kind: ErrorKind::StateIncompatible,
                            objects: [cb.typed_handle(), image.typed_handle()]
                                .into_iter()
                                .collect(),
                            ..Default::default()
                        }));
                    }
                }
            }

            skip |= self.validate_qfo_barrier(
                cb,
                &mut transfers,
                QfoTransfer::from_image_barrier(barrier, range),
                image.create_info.sharing.is_exclusive(),
                context(),
            );
        }

        skip
    }

    fn validate_qfo_barrier(
        &self,
        cb: &CommandBufferState,
        transfers: &mut QfoTransfers,
        transfer: QfoTransfer,
        exclusive: bool,
        context: String,
    ) -> bool {
        let key = transfer.key;

        match qfo::classify(
            &key.resource,
            key.src_queue_family_index,
            key.dst_queue_family_index,
            exclusive,
            cb.queue_family_index,
            self.device_info.queue_family_properties.len() as u32,
        ) {
            Ok(class) => self.emit_result(
                transfers
                    .record(class, transfer)
                    .map_err(|error| error.add_context(context).add_object(cb.typed_handle())),
            ),
            Err(error) => self.emit(error.add_context(context).add_object(cb.typed_handle())),
        }
    }

    pub fn record_cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        dependency_info: &DependencyInfo,
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        let mut state = cb.state.lock();
        self.record_barriers(&cb, &mut state, dependency_info);
    }

    /// Applies the layout transitions and ownership transfers of a pipeline barrier or event
    /// wait.
    pub(super) fn record_barriers(
        &self,
        cb: &CommandBufferState,
        state: &mut CommandBufferMut,
        dependency_info: &DependencyInfo,
    ) {
        let family_count = self.device_info.queue_family_properties.len() as u32;

        let record_transfer = |state: &mut CommandBufferMut, transfer: QfoTransfer, exclusive| {
            let key = transfer.key;

            if let Ok(class) = qfo::classify(
                &key.resource,
                key.src_queue_family_index,
                key.dst_queue_family_index,
                exclusive,
                cb.queue_family_index,
                family_count,
            ) {
                // Duplicates were reported by validation and are not recorded twice.
                let _ = state.qfo_transfers.record(class, transfer);
            }
        };

        for barrier in &dependency_info.buffer_memory_barriers {
            let Some(buffer) = self.registry.buffers.get(barrier.buffer) else {
                continue;
            };

            cb.bind_object(state, buffer.base());
            record_transfer(
                state,
                QfoTransfer::from_buffer_barrier(barrier),
                buffer.create_info.sharing.is_exclusive(),
            );
        }

        for barrier in &dependency_info.image_memory_barriers {
            let Some(image) = self.registry.images.get(barrier.image) else {
                continue;
            };

            cb.bind_object(state, image.base());

            let range = image.normalize_range(&barrier.subresource_range);
            state.set_image_layout(&image, &range, barrier.old_layout, barrier.new_layout);
            record_transfer(
                state,
                QfoTransfer::from_image_barrier(barrier, range),
                image.create_info.sharing.is_exclusive(),
            );
        }
    }

    pub fn validate_cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src_buffer: vk::Buffer,
        dst_buffer: vk::Buffer,
        regions: &[BufferCopy],
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, &COPY_BUFFER);
        drop(state);

        let (Some(src), Some(dst)) = (
            self.registry.buffers.get(src_buffer),
            self.registry.buffers.get(dst_buffer),
        ) else {
            return skip;
        };

        skip |= self.validate_command_buffer_use(
            "src_buffer".into(),
            &src,
            BufferUsage::TRANSFER_SRC,
            &["VUID-vkCmdCopyBuffer-srcBuffer-00118"],
            &["VUID-vkCmdCopyBuffer-srcBuffer-00119"],
            COPY_BUFFER.name,
        );
        skip |= self.validate_command_buffer_use(
            "dst_buffer".into(),
            &dst,
            BufferUsage::TRANSFER_DST,
            &["VUID-vkCmdCopyBuffer-dstBuffer-00120"],
            &["VUID-vkCmdCopyBuffer-dstBuffer-00121"],
            COPY_BUFFER.name,
        );

        for (index, region) in regions.iter().enumerate() {
            for (offset, buffer, offset_vuids, size_vuids) in [
                (
                    region.src_offset,
                    &src,
                    &["VUID-vkCmdCopyBuffer-srcOffset-00113"],
                    &["VUID-vkCmdCopyBuffer-size-00115"],
                ),
                (
                    region.dst_offset,
                    &dst,
                    &["VUID-vkCmdCopyBuffer-dstOffset-00114"],
                    &["VUID-vkCmdCopyBuffer-size-00116"],
                ),
            ] {
                if offset >= buffer.size() {
                    skip |= self.emit(Box::new(ValidationError {
                        context: format!("regions[{}]", index).into(),
                        problem: format!(
                            "starts at {}, but {} is only {} bytes",
                            offset,
                            self.format_handle(buffer.typed_handle()),
                            buffer.size(),
                        )
                        .into(),
                        vuids: offset_vuids,
                        kind: ErrorKind::ParameterOutOfRange,
                        objects: [buffer.typed_handle()].into_iter().collect(),
                        ..Default::default()
                    }));
                } else if region.size > buffer.size() - offset {
                    skip |= self.emit(Box::new(ValidationError {
                        context: format!("regions[{}].size", index).into(),
                        problem: format!(
                            "is {}, but only {} bytes of {} follow offset {}",
                            region.size,
                            buffer.size() - offset,
                            self.format_handle(buffer.typed_handle()),
                            offset,
                        )
                        .into(),
                        vuids: size_vuids,
                        kind: ErrorKind::ParameterOutOfRange,
                        objects: [buffer.typed_handle()].into_iter().collect(),
                        ..Default::default()
                    }));
                }
            }
        }

        skip
    }

    pub fn record_cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src_buffer: vk::Buffer,
        dst_buffer: vk::Buffer,
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        let mut state = cb.state.lock();

        for buffer in [src_buffer, dst_buffer] {
            if let Some(buffer) = self.registry.buffers.get(buffer) {
                cb.bind_object(&mut state, buffer.base());
            }
        }
    }

    pub fn validate_cmd_clear_attachments(
        &self,
        command_buffer: vk::CommandBuffer,
        attachments: &[ClearAttachment],
        rects: &[ClearRect],
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, &CLEAR_ATTACHMENTS);

        let Some(instance) = &state.render_pass else {
            return skip;
        };

        let color_count = instance
            .render_pass
            .create_info
            .subpasses
            .get(instance.subpass as usize)
            .map_or(0, |subpass| subpass.color_attachments.len() as u32);

        for (index, attachment) in attachments.iter().enumerate() {
            if attachment.aspects.intersects(ImageAspects::COLOR)
                && attachment.color_attachment >= color_count
            {
                skip |= self.emit(Box::new(ValidationError {
                    context: format!("attachments[{}].color_attachment", index).into(),
                    problem: format!(
                        "is {}, but subpass {} has {} color attachments",
                        attachment.color_attachment, instance.subpass, color_count,
                    )
                    .into(),
                    vuids: &["VUID-vkCmdClearAttachments-aspectMask-07271"],
                    kind: ErrorKind::ParameterOutOfRange,
                    objects: [cb.typed_handle(), instance.render_pass.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
            }
        }

        // The render area of a secondary command buffer is only known when it is executed.
        if cb.level == CommandBufferLevel::Primary {
            skip |= self.emit_all(validate_clear_rects(instance, rects));
        }

        skip
    }

    pub fn record_cmd_clear_attachments(&self, command_buffer: vk::CommandBuffer, rects: &[ClearRect]) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        if cb.level != CommandBufferLevel::Secondary {
            return;
        }

        let rects = rects.to_vec();
        cb.state
            .lock()
            .execute_commands_functions
            .push(Arc::new(move |instance: &RenderPassInstance| {
                validate_clear_rects(instance, &rects)
            }));
    }

    pub fn validate_cmd_begin_debug_utils_label(&self, command_buffer: vk::CommandBuffer) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();

        self.validate_cmd(&cb, &state, &BEGIN_DEBUG_LABEL)
    }

    pub fn record_cmd_begin_debug_utils_label(
        &self,
        command_buffer: vk::CommandBuffer,
        label_name: &str,
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        cb.state.lock().debug_labels.push(label_name.to_owned());
    }

    pub fn validate_cmd_end_debug_utils_label(&self, command_buffer: vk::CommandBuffer) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, &END_DEBUG_LABEL);

        if state.debug_labels.is_empty() {
            skip |= self.emit(Box::new(ValidationError {
                context: END_DEBUG_LABEL.name.into(),
                problem: "there is no debug label region open in the command buffer".into(),
                vuids: match cb.level {
                    CommandBufferLevel::Primary => {
                        &["VUID-vkCmdEndDebugUtilsLabelEXT-commandBuffer-01912"]
                    }
                    CommandBufferLevel::Secondary => {
                        &["VUID-vkCmdEndDebugUtilsLabelEXT-commandBuffer-01913"]
                    }
                },
                kind: ErrorKind::StateIncompatible,
                objects: [cb.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        skip
    }

    pub fn record_cmd_end_debug_utils_label(&self, command_buffer: vk::CommandBuffer) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        cb.state.lock().debug_labels.pop();
    }

    pub fn validate_cmd_execute_commands(
        &self,
        command_buffer: vk::CommandBuffer,
        command_buffers: &[vk::CommandBuffer],
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, &EXECUTE_COMMANDS);

        if cb.level != CommandBufferLevel::Primary {
            skip |= self.emit(Box::new(ValidationError {
                problem: "the command buffer that executes secondary command buffers is not a \
                    primary command buffer"
                    .into(),
                vuids: &["VUID-vkCmdExecuteCommands-bufferlevel"],
                kind: ErrorKind::StateIncompatible,
                objects: [cb.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        if let Some(instance) = &state.render_pass {
            if instance.contents == SubpassContents::Inline {
                skip |= self.emit(Box::new(ValidationError {
                    problem: format!(
                        "secondary command buffers are executed in subpass {}, whose contents \
                        are `Inline`",
                        instance.subpass,
                    )
                    .into(),
                    vuids: &["VUID-vkCmdExecuteCommands-contents-06018"],
                    kind: ErrorKind::StateIncompatible,
                    objects: [cb.typed_handle(), instance.render_pass.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
            }
        }

        let mut seen = HashSet::default();
        let mut current_layouts: HashMap<vk::Image, ImageSubresourceLayoutMap> =
            HashMap::default();

        for (index, &secondary) in command_buffers.iter().enumerate() {
            let context = || format!("command_buffers[{}]", index);

            let Some(secondary_cb) = self.registry.command_buffers.get(secondary) else {
                continue;
            };

            if secondary_cb.level != CommandBufferLevel::Secondary || secondary == command_buffer
            {
                skip |= self.emit(Box::new(ValidationError {
                    context: context().into(),
                    problem: "is not a secondary command buffer".into(),
                    vuids: &["VUID-vkCmdExecuteCommands-pCommandBuffers-00088"],
                    kind: ErrorKind::StateIncompatible,
                    objects: [cb.typed_handle(), secondary_cb.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
                continue;
            }

            let secondary_state = secondary_cb.state.lock();
            let objects = || -> SmallVec<[TypedHandle; 2]> {
                [cb.typed_handle(), secondary_cb.typed_handle()]
                    .into_iter()
                    .collect()
            };

            match secondary_state.record_state {
                crate::command_buffer::CommandBufferRecordState::Recorded => (),
                record_state if record_state.is_invalid() => {
                    if !self.settings.disabled.command_buffer_state {
                        skip |= self.emit(
                            self.invalid_command_buffer_error(
                                &secondary_cb,
                                &secondary_state,
                                EXECUTE_COMMANDS.name,
                            )
                            .add_object(cb.typed_handle()),
                        );
                    }

                    continue;
                }
                record_state => {
                    skip |= self.emit(Box::new(ValidationError {
                        context: context().into(),
                        problem: format!(
                            "is in the {:?} state, but it must be recorded",
                            record_state,
                        )
                        .into(),
                        vuids: &["VUID-vkCmdExecuteCommands-pCommandBuffers-00089"],
                        kind: ErrorKind::StateIncompatible,
                        objects: objects(),
                        ..Default::default()
                    }));

                    continue;
                }
            }

            let usage = secondary_state.begin_info.usage;
            let simultaneous = usage.intersects(CommandBufferUsage::SIMULTANEOUS_USE);

            if !simultaneous {
                if !seen.insert(secondary) || state.linked_command_buffers.contains(&secondary) {
                    skip |= self.emit(Box::new(ValidationError {
                        context: context().into(),
                        problem: "is executed more than once by the primary command buffer, but \
                            it was not begun with `SIMULTANEOUS_USE`"
                            .into(),
                        vuids: &["VUID-vkCmdExecuteCommands-pCommandBuffers-00093"],
                        kind: ErrorKind::StateIncompatible,
                        objects: objects(),
                        ..Default::default()
                    }));
                }

                if secondary_cb.base().in_use() && !self.settings.disabled.object_in_use {
                    skip |= self.emit(Box::new(ValidationError {
                        context: context().into(),
                        problem: "is pending on a queue, but it was not begun with \
                            `SIMULTANEOUS_USE`"
                            .into(),
                        vuids: &["VUID-vkCmdExecuteCommands-pCommandBuffers-00092"],
                        kind: ErrorKind::InUseOnDestroy,
                        objects: objects(),
                        ..Default::default()
                    }));
                }

                if state
                    .begin_info
                    .usage
                    .intersects(CommandBufferUsage::SIMULTANEOUS_USE)
                {
                    skip |= self.emit(Box::new(ValidationError {
                        context: context().into(),
                        problem: "was not begun with `SIMULTANEOUS_USE`, so the primary command \
                            buffer, which was, is treated as if it were not"
                            .into(),
                        vuids: &[
                            "UNASSIGNED-CoreValidation-DrawState-InvalidCommandBufferSimultaneousUse",
                        ],
                        kind: ErrorKind::StateIncompatible,
                        severity: Severity::Warning,
                        objects: objects(),
                        ..Default::default()
                    }));
                }
            }

            let continues_render_pass = usage.intersects(CommandBufferUsage::RENDER_PASS_CONTINUE);

            match &state.render_pass {
                Some(instance) => {
                    if !continues_render_pass {
                        skip |= self.emit(Box::new(ValidationError {
                            context: context().into(),
                            problem: "is executed inside a render pass instance, but it was not \
                                begun with `RENDER_PASS_CONTINUE`"
                                .into(),
                            vuids: &["VUID-vkCmdExecuteCommands-pCommandBuffers-00096"],
                            kind: ErrorKind::StateIncompatible,
                            objects: objects(),
                            ..Default::default()
                        }));
                    }

                    if let Some(inheritance) = &secondary_state.begin_info.inheritance_info {
                        skip |= self.validate_inheritance(
                            instance,
                            inheritance,
                            context,
                            &objects,
                        );
                    }

                    for execute_function in &secondary_state.execute_commands_functions {
                        skip |= self.emit_all(
                            execute_function(instance)
                                .into_iter()
                                .map(|error| error.add_object(secondary_cb.typed_handle())),
                        );
                    }
                }
                None => {
                    if continues_render_pass {
                        skip |= self.emit(Box::new(ValidationError {
                            context: context().into(),
                            problem: "is executed outside a render pass instance, but it was \
                                begun with `RENDER_PASS_CONTINUE`"
                                .into(),
                            vuids: &["VUID-vkCmdExecuteCommands-pCommandBuffers-00100"],
                            kind: ErrorKind::StateIncompatible,
                            objects: objects(),
                            ..Default::default()
                        }));
                    }
                }
            }

            if self.settings.disabled.image_layout_validation {
                continue;
            }

            for (&image, secondary_map) in &secondary_state.image_layouts {
                let current = current_layouts.entry(image).or_insert_with(|| {
                    state.image_layouts.get(&image).cloned().unwrap_or_else(|| {
                        ImageSubresourceLayoutMap::new(image, *secondary_map.encoder())
                    })
                });

                let mismatch = secondary_map
                    .initial_layouts()
                    .into_iter()
                    .filter(|&(_, expected)| expected != ImageLayout::Undefined)
                    .find_map(|(indices, expected)| {
                        indices.into_iter().find_map(|index| {
                            current
                                .current_at(index)
                                .filter(|&actual| actual != expected)
                                .map(|actual| (expected, actual))
                        })
                    });

                if let Some((expected, actual)) = mismatch {
                    skip |= self.emit(Box::new(ValidationError {
                        context: context().into(),
                        problem: format!(
                            "expects {} to be in {:?}, but the primary command buffer leaves it \
                            in {:?}",
                            self.format_handle(TypedHandle::new(image)),
                            expected,
                            actual,
                        )
                        .into(),
                        vuids: &["UNASSIGNED-vkCmdExecuteCommands-commandBuffer-00001"],
                        kind: ErrorKind::StateIncompatible,
                        objects: [
                            cb.typed_handle(),
                            secondary_cb.typed_handle(),
                            TypedHandle::new(image),
                        ]
                        .into_iter()
                        .collect(),
                        ..Default::default()
                    }));
                }

                current.update_from(secondary_map);
            }
        }

        skip
    }

    fn validate_inheritance(
        &self,
        instance: &RenderPassInstance,
        inheritance: &crate::command_buffer::CommandBufferInheritanceInfo,
        context: impl Fn() -> String,
        objects: &impl Fn() -> SmallVec<[TypedHandle; 2]>,
    ) -> bool {
        let mut skip = false;

        if let Some(render_pass) = self.registry.render_passes.get(inheritance.render_pass) {
            if let Err(error) = render_pass.validate_compatible(&instance.render_pass) {
                skip |= self.emit(
                    error
                        .set_vuids(&["VUID-vkCmdExecuteCommands-pBeginInfo-06020"])
                        .add_context(format!("{}.inheritance_info.render_pass", context())),
                );
            }
        }

        if inheritance.subpass != instance.subpass {
            skip |= self.emit(Box::new(ValidationError {
                context: format!("{}.inheritance_info.subpass", context()).into(),
                problem: format!(
                    "is {}, but the command buffer is executed in subpass {}",
                    inheritance.subpass, instance.subpass,
                )
                .into(),
                vuids: &["VUID-vkCmdExecuteCommands-pCommandBuffers-06019"],
                kind: ErrorKind::StateIncompatible,
                objects: objects(),
                ..Default::default()
            }));
        }

        if inheritance.framebuffer != vk::Framebuffer::null() {
            let current = instance
                .framebuffer
                .as_ref()
                .map(|framebuffer| framebuffer.handle());

            if current != Some(inheritance.framebuffer) {
                skip |= self.emit(Box::new(ValidationError {
                    context: format!("{}.inheritance_info.framebuffer", context()).into(),
                    problem: "is not the framebuffer of the current render pass instance".into(),
                    vuids: &["VUID-vkCmdExecuteCommands-pCommandBuffers-00099"],
                    kind: ErrorKind::StateIncompatible,
                    objects: objects(),
                    ..Default::default()
                }));
            }
        }

        skip
    }

    pub fn record_cmd_execute_commands(
        &self,
        command_buffer: vk::CommandBuffer,
        command_buffers: &[vk::CommandBuffer],
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        let mut state = cb.state.lock();

        for &secondary in command_buffers {
            if secondary == command_buffer {
                continue;
            }

            let Some(secondary_cb) = self.registry.command_buffers.get(secondary) else {
                continue;
            };

            {
                let mut secondary_state = secondary_cb.state.lock();
                secondary_state.linked_command_buffers.insert(command_buffer);

                if !secondary_state
                    .begin_info
                    .usage
                    .intersects(CommandBufferUsage::SIMULTANEOUS_USE)
                {
                    state.begin_info.usage =
                        state.begin_info.usage - CommandBufferUsage::SIMULTANEOUS_USE;
                }

                state.qfo_transfers.extend(&secondary_state.qfo_transfers);

                for (image, secondary_map) in &secondary_state.image_layouts {
                    let Some(image) = self.registry.images.get(*image) else {
                        continue;
                    };

                    if state.image_layout_map(&image).update_from(secondary_map) {
                        state.image_layout_change_count += 1;
                    }
                }

                state
                    .queue_submit_functions
                    .extend(secondary_state.queue_submit_functions.iter().cloned());
                state
                    .query_updates
                    .extend(secondary_state.query_updates.iter().copied());
                state
                    .event_updates
                    .extend(secondary_state.event_updates.iter().copied());
                state.events.extend(secondary_state.events.iter().copied());
                state
                    .write_events_before_wait
                    .extend(secondary_state.write_events_before_wait.iter().copied());
            }

            state.linked_command_buffers.insert(secondary);
        }

        log::trace!(
            "{} executes {} secondary command buffer(s)",
            cb.typed_handle(),
            command_buffers.len(),
        );
    }
}

fn index_size(index_type: vk::IndexType) -> DeviceSize {
    match index_type {
        vk::IndexType::UINT8_EXT => 1,
        vk::IndexType::UINT16 => 2,
        _ => 4,
    }
}

fn is_shading_rate_layout(layout: ImageLayout) -> bool {
    matches!(
        layout,
        ImageLayout::General | ImageLayout::FragmentShadingRateAttachmentOptimal
    )
}

#[cfg(test)]
mod tests {
    use crate::{
        buffer::BufferUsage,
        command_buffer::{
            CommandBufferBeginInfo, CommandBufferInheritanceInfo, CommandBufferLevel,
            CommandPoolCreateFlags, SubpassContents,
        },
        device::{DeviceInfo, QueueFamilyProperties, QueueFlags},
        image::{ImageAspects, ImageCreateInfo, ImageLayout, ImageSubresourceRange, ImageUsage},
        pipeline::{
            layout::PipelineLayoutCreateInfo, DynamicState, GraphicsPipelineCreateInfo,
            PipelineBindPoint, PipelineCreateInfo,
        },
        render_pass::RenderPassBeginInfo,
        sync::{AccessFlags, DependencyInfo, ImageMemoryBarrier, PipelineStages},
        tests::{
            allocate_command_buffer, allocate_command_buffer_on, begin_primary,
            create_bound_buffer, create_framebuffer, create_image, create_image_view,
            create_render_pass, handle, primary_and_secondary,
        },
        LayerSettings, ValidationLayer,
    };
    use ash::vk;
    use smallvec::smallvec;

    fn color_image(layer: &ValidationLayer) -> vk::Image {
        create_image(
            layer,
            ImageCreateInfo {
                extent: [64, 64, 1],
                usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_DST,
                ..Default::default()
            },
        )
    }

    fn layout_barrier(
        image: vk::Image,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) -> DependencyInfo {
        DependencyInfo {
            src_stages: PipelineStages::ALL_COMMANDS,
            dst_stages: PipelineStages::ALL_COMMANDS,
            image_memory_barriers: smallvec![ImageMemoryBarrier {
                old_layout,
                new_layout,
                image,
                subresource_range: ImageSubresourceRange {
                    aspects: ImageAspects::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn actions_need_a_bound_pipeline() {
        let (layer, reporter) = test_layer!();
        let cb = begin_primary(&layer);

        layer.validate_cmd_dispatch(cb);
        assert!(reporter.contains("VUID-vkCmdDispatch-None-08606"));

        layer.validate_cmd_draw(cb);
        assert!(reporter.contains("VUID-vkCmdDraw-renderpass"));
        assert!(reporter.contains("VUID-vkCmdDraw-None-08606"));
    }

    #[test]
    fn dynamic_viewports_cover_the_pipeline() {
        let (layer, reporter) = test_layer!();
        let render_pass = create_render_pass(&layer, 1);
        let view = create_image_view(&layer, color_image(&layer), vk::Format::R8G8B8A8_UNORM);
        let framebuffer = create_framebuffer(&layer, render_pass, &[view]);

        let layout = handle();
        layer.record_create_pipeline_layout(layout, &PipelineLayoutCreateInfo::default());
        let pipeline = handle();
        layer.record_create_pipelines(
            &[pipeline],
            &[PipelineCreateInfo::Graphics(GraphicsPipelineCreateInfo {
                viewport_count: 2,
                dynamic_states: vec![DynamicState::Viewport],
                layout,
                render_pass,
                ..Default::default()
            })],
        );

        let cb = begin_primary(&layer);
        let begin_info = RenderPassBeginInfo {
            render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: 64,
                    height: 64,
                },
            },
            ..Default::default()
        };
        layer.record_cmd_begin_render_pass(cb, &begin_info, SubpassContents::Inline);
        layer.record_cmd_bind_pipeline(cb, PipelineBindPoint::Graphics, pipeline);

        layer.validate_cmd_draw(cb);
        assert!(reporter.contains("UNASSIGNED-CoreValidation-DrawState-DynamicStateNotSet"));
        reporter.clear();

        assert!(!layer.validate_cmd_set_viewport(cb, 0, 1));
        layer.record_cmd_set_viewport(cb, 0, 1);
        layer.validate_cmd_draw(cb);
        assert!(reporter.contains("UNASSIGNED-CoreValidation-DrawState-ViewportScissorMismatch"));
        assert!(!reporter.contains("UNASSIGNED-CoreValidation-DrawState-DynamicStateNotSet"));
        reporter.clear();

        layer.record_cmd_set_viewport(cb, 1, 1);
        assert!(!layer.validate_cmd_draw(cb));

        layer.validate_cmd_set_viewport(cb, 15, 2);
        assert!(reporter.contains("VUID-vkCmdSetViewport-firstViewport-01223"));
    }

    #[test]
    fn barrier_old_layout_matches_recorded_layout() {
        let (layer, reporter) = test_layer!();
        let image = color_image(&layer);
        let cb = begin_primary(&layer);

        let to_transfer = to_transfer_of(image);
        assert!(!layer.validate_cmd_pipeline_barrier(cb, &to_transfer));
        layer.record_cmd_pipeline_barrier(cb, &to_transfer);

        let stale = layout_barrier(
            image,
            ImageLayout::ColorAttachmentOptimal,
            ImageLayout::General,
        );
        layer.validate_cmd_pipeline_barrier(cb, &stale);
        assert!(reporter.contains("VUID-VkImageMemoryBarrier-oldLayout-01197"));
        reporter.clear();

        let chained = layout_barrier(
            image,
            ImageLayout::TransferDstOptimal,
            ImageLayout::General,
        );
        assert!(!layer.validate_cmd_pipeline_barrier(cb, &chained));

        // Layout checks can be switched off.
        let mut settings = LayerSettings::default();
        settings.disabled.image_layout_validation = true;
        let (layer, reporter) = test_layer!(settings);
        let image = color_image(&layer);
        let cb = begin_primary(&layer);
        layer.record_cmd_pipeline_barrier(cb, &to_transfer_of(image));
        assert!(!layer.validate_cmd_pipeline_barrier(
            cb,
            &layout_barrier(image, ImageLayout::ColorAttachmentOptimal, ImageLayout::General),
        ));
        assert!(reporter.diagnostics().is_empty());
    }

    fn to_transfer_of(image: vk::Image) -> DependencyInfo {
        layout_barrier(image, ImageLayout::Undefined, ImageLayout::TransferDstOptimal)
    }

    #[test]
    fn duplicate_release_in_one_command_buffer() {
        let device_info = DeviceInfo {
            queue_family_properties: vec![QueueFamilyProperties::default(); 2],
            ..Default::default()
        };
        let (layer, reporter) = test_layer!(LayerSettings::default(), device_info);
        let image = color_image(&layer);
        let cb = allocate_command_buffer_on(
            &layer,
            0,
            CommandPoolCreateFlags::empty(),
            CommandBufferLevel::Primary,
        );
        layer.record_begin_command_buffer(cb, CommandBufferBeginInfo::default());

        let mut release = to_transfer_of(image);
        release.image_memory_barriers[0].src_queue_family_index = 0;
        release.image_memory_barriers[0].dst_queue_family_index = 1;
        release.image_memory_barriers[0].src_access = AccessFlags::TRANSFER_WRITE;

        assert!(!layer.validate_cmd_pipeline_barrier(cb, &release));
        layer.record_cmd_pipeline_barrier(cb, &release);
        assert!(reporter.diagnostics().is_empty());

        release.image_memory_barriers[0].old_layout = ImageLayout::TransferDstOptimal;
        layer.validate_cmd_pipeline_barrier(cb, &release);
        assert!(reporter.contains("UNASSIGNED-VkImageMemoryBarrier-image-00001"));
    }

    #[test]
    fn descriptor_bind_point_needs_queue_support() {
        let device_info = DeviceInfo {
            queue_family_properties: vec![QueueFamilyProperties {
                queue_flags: QueueFlags::COMPUTE,
                queue_count: 1,
            }],
            ..Default::default()
        };
        let (layer, reporter) = test_layer!(LayerSettings::default(), device_info);
        let cb = allocate_command_buffer_on(
            &layer,
            0,
            CommandPoolCreateFlags::empty(),
            CommandBufferLevel::Primary,
        );
        layer.record_begin_command_buffer(cb, CommandBufferBeginInfo::default());
        let layout = vk::PipelineLayout::null();

        assert!(!layer.validate_cmd_bind_descriptor_sets(
            cb,
            PipelineBindPoint::Compute,
            layout,
            0,
            &[],
            &[],
        ));
        assert!(reporter.diagnostics().is_empty());

        layer.validate_cmd_bind_descriptor_sets(cb, PipelineBindPoint::Graphics, layout, 0, &[], &[]);
        assert!(reporter.contains("VUID-vkCmdBindDescriptorSets-pipelineBindPoint-00361"));
        assert!(!reporter.contains("VUID-vkCmdBindDescriptorSets-commandBuffer-cmdpool"));
        reporter.clear();

        layer.validate_cmd_push_descriptor_set(cb, PipelineBindPoint::Graphics, layout, 0, &[]);
        assert!(reporter.contains("VUID-vkCmdPushDescriptorSetKHR-pipelineBindPoint-00363"));
    }

    #[test]
    fn vertex_bindings_within_the_limit() {
        let (layer, reporter) = test_layer!();
        let cb = begin_primary(&layer);
        let buffers = [vk::Buffer::null(); 2];

        assert!(!layer.validate_cmd_bind_vertex_buffers(cb, 14, &buffers, &[0, 0]));
        assert!(reporter.diagnostics().is_empty());

        layer.validate_cmd_bind_vertex_buffers(cb, 15, &buffers, &[0, 0]);
        assert!(reporter.contains("VUID-vkCmdBindVertexBuffers-firstBinding-00625"));
        reporter.clear();

        layer.validate_cmd_bind_vertex_buffers(cb, 16, &buffers[..1], &[0]);
        assert!(reporter.contains("VUID-vkCmdBindVertexBuffers-firstBinding-00624"));
        assert!(!reporter.contains("VUID-vkCmdBindVertexBuffers-firstBinding-00625"));
    }

    #[test]
    fn executing_a_secondary_twice() {
        let (layer, reporter) = test_layer!();
        let (_, secondary) = primary_and_secondary(&layer);
        let primary = begin_primary(&layer);

        layer.validate_cmd_execute_commands(primary, &[secondary, secondary]);
        assert!(reporter.contains("VUID-vkCmdExecuteCommands-pCommandBuffers-00093"));
        reporter.clear();

        layer.validate_cmd_execute_commands(secondary, &[primary]);
        assert!(reporter.contains("VUID-vkCmdExecuteCommands-bufferlevel"));
        assert!(reporter.contains("VUID-vkCmdExecuteCommands-pCommandBuffers-00088"));
    }

    #[test]
    fn secondary_layouts_follow_the_primary() {
        let (layer, reporter) = test_layer!();
        let image = color_image(&layer);

        let secondary = allocate_command_buffer(
            &layer,
            CommandPoolCreateFlags::empty(),
            CommandBufferLevel::Secondary,
        );
        layer.record_begin_command_buffer(
            secondary,
            CommandBufferBeginInfo {
                inheritance_info: Some(CommandBufferInheritanceInfo::default()),
                ..Default::default()
            },
        );
        layer.record_cmd_pipeline_barrier(
            secondary,
            &layout_barrier(image, ImageLayout::ColorAttachmentOptimal, ImageLayout::General),
        );
        layer.record_end_command_buffer(secondary);

        let primary = begin_primary(&layer);
        layer.record_cmd_pipeline_barrier(primary, &to_transfer_of(image));
        layer.validate_cmd_execute_commands(primary, &[secondary]);
        assert!(reporter.contains("UNASSIGNED-vkCmdExecuteCommands-commandBuffer-00001"));
        reporter.clear();

        let primary = begin_primary(&layer);
        layer.record_cmd_pipeline_barrier(
            primary,
            &layout_barrier(
                image,
                ImageLayout::Undefined,
                ImageLayout::ColorAttachmentOptimal,
            ),
        );
        assert!(!layer.validate_cmd_execute_commands(primary, &[secondary]));
    }

    #[test]
    fn debug_label_regions_balance() {
        let (layer, reporter) = test_layer!();
        let cb = begin_primary(&layer);

        layer.validate_cmd_end_debug_utils_label(cb);
        assert!(reporter.contains("VUID-vkCmdEndDebugUtilsLabelEXT-commandBuffer-01912"));
        reporter.clear();

        assert!(!layer.validate_cmd_begin_debug_utils_label(cb));
        layer.record_cmd_begin_debug_utils_label(cb, "shadows");
        assert!(!layer.validate_cmd_end_debug_utils_label(cb));
        layer.record_cmd_end_debug_utils_label(cb);
        assert!(reporter.diagnostics().is_empty());
    }

    #[test]
    fn index_buffer_binding() {
        let (layer, reporter) = test_layer!();
        let cb = begin_primary(&layer);
        let (indices, _) = create_bound_buffer(&layer, 256, BufferUsage::INDEX_BUFFER);
        let (vertices, _) = create_bound_buffer(&layer, 256, BufferUsage::VERTEX_BUFFER);

        assert!(!layer.validate_cmd_bind_index_buffer(cb, indices, 8, vk::IndexType::UINT32));

        layer.validate_cmd_bind_index_buffer(cb, indices, 2, vk::IndexType::UINT32);
        assert!(reporter.contains("VUID-vkCmdBindIndexBuffer-offset-08783"));

        layer.validate_cmd_bind_index_buffer(cb, indices, 256, vk::IndexType::UINT16);
        assert!(reporter.contains("VUID-vkCmdBindIndexBuffer-offset-08782"));

        layer.validate_cmd_bind_index_buffer(cb, vertices, 0, vk::IndexType::UINT16);
        assert!(reporter.contains("VUID-vkCmdBindIndexBuffer-buffer-08784"));
    }

    #[test]
    fn copy_regions_stay_in_bounds() {
        let (layer, reporter) = test_layer!();
        let cb = begin_primary(&layer);
        let (src, _) = create_bound_buffer(&layer, 256, BufferUsage::TRANSFER_SRC);
        let (dst, _) = create_bound_buffer(&layer, 128, BufferUsage::TRANSFER_DST);

        let region = |src_offset, dst_offset, size| crate::command_buffer::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };

        assert!(!layer.validate_cmd_copy_buffer(cb, src, dst, &[region(0, 0, 128)]));

        layer.validate_cmd_copy_buffer(cb, src, dst, &[region(128, 64, 128)]);
        assert!(reporter.contains("VUID-vkCmdCopyBuffer-size-00116"));
        assert!(!reporter.contains("VUID-vkCmdCopyBuffer-size-00115"));

        layer.validate_cmd_copy_buffer(cb, dst, src, &[region(0, 0, 4)]);
        assert!(reporter.contains("VUID-vkCmdCopyBuffer-srcBuffer-00118"));
        assert!(reporter.contains("VUID-vkCmdCopyBuffer-dstBuffer-00120"));
    }
}
