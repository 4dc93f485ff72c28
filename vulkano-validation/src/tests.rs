#![cfg(test)]

use crate::{
    buffer::{BufferCreateInfo, BufferUsage},
    command_buffer::{
        CommandBufferBeginInfo, CommandBufferInheritanceInfo, CommandBufferLevel,
        CommandPoolCreateFlags, CommandPoolCreateInfo,
    },
    descriptor_set::layout::{
        DescriptorSetLayoutBinding, DescriptorSetLayoutCreateInfo, DescriptorType,
    },
    image::{ImageCreateInfo, ImageLayout, ImageViewCreateInfo},
    memory::{BindBufferMemoryInfo, MemoryAllocateInfo, MemoryRequirements},
    pipeline::{
        layout::PipelineLayoutCreateInfo, GraphicsPipelineCreateInfo, PipelineBindPoint,
        PipelineCreateInfo,
    },
    render_pass::{
        framebuffer::FramebufferCreateInfo, AttachmentDescription, AttachmentReference,
        RenderPassCreateInfo, SubpassDependency, SubpassDescription,
    },
    shader::{
        PipelineShaderStage, ShaderModuleState, ShaderStageValidator, ShaderStages,
        ValidationCache, ValidationCacheFactory,
    },
    sync::{AccessFlags, PipelineStages},
    DeviceSize, ErrorKind, ValidationError, ValidationLayer,
};
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

/// Creates a layer that reports to a `CollectingReporter`, and returns both.
macro_rules! test_layer {
    (@create_info $create_info:expr) => {{
        let reporter = std::sync::Arc::new($crate::CollectingReporter::new());
        let layer = $crate::ValidationLayer::new($crate::LayerCreateInfo {
            reporter: Some(reporter.clone() as std::sync::Arc<dyn $crate::Reporter>),
            ..$create_info
        });

        (layer, reporter)
    }};
    () => {
        test_layer!(@create_info $crate::LayerCreateInfo::default())
    };
    ($settings:expr) => {
        test_layer!(@create_info $crate::LayerCreateInfo {
            settings: $settings,
            ..Default::default()
        })
    };
    ($settings:expr, $device_info:expr) => {
        test_layer!(@create_info $crate::LayerCreateInfo {
            settings: $settings,
            device_info: $device_info,
            ..Default::default()
        })
    };
}

/// Returns a handle that no other test object uses.
pub(crate) fn handle<H: Handle>() -> H {
    static NEXT: AtomicU64 = AtomicU64::new(0x1000);

    H::from_raw(NEXT.fetch_add(1, Ordering::Relaxed))
}

pub(crate) fn create_queue(layer: &ValidationLayer, queue_family_index: u32) -> vk::Queue {
    let queue = handle();
    layer.record_get_device_queue(queue, queue_family_index, 0);

    queue
}

pub(crate) fn allocate_command_buffer_on(
    layer: &ValidationLayer,
    queue_family_index: u32,
    flags: CommandPoolCreateFlags,
    level: CommandBufferLevel,
) -> vk::CommandBuffer {
    let pool = handle();
    layer.record_create_command_pool(
        pool,
        CommandPoolCreateInfo {
            flags,
            queue_family_index,
        },
    );

    let command_buffer = handle();
    layer.record_allocate_command_buffers(pool, level, &[command_buffer]);

    command_buffer
}

pub(crate) fn allocate_command_buffer(
    layer: &ValidationLayer,
    flags: CommandPoolCreateFlags,
    level: CommandBufferLevel,
) -> vk::CommandBuffer {
    allocate_command_buffer_on(layer, 0, flags, level)
}

/// A primary command buffer in the recording state.
pub(crate) fn begin_primary(layer: &ValidationLayer) -> vk::CommandBuffer {
    let command_buffer = allocate_command_buffer(
        layer,
        CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        CommandBufferLevel::Primary,
    );
    layer.record_begin_command_buffer(command_buffer, CommandBufferBeginInfo::default());

    command_buffer
}

/// A recorded primary command buffer that executes a recorded secondary one.
pub(crate) fn primary_and_secondary(
    layer: &ValidationLayer,
) -> (vk::CommandBuffer, vk::CommandBuffer) {
    let secondary = allocate_command_buffer(
        layer,
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
    layer.record_end_command_buffer(secondary);

    let primary = begin_primary(layer);
    layer.record_cmd_execute_commands(primary, &[secondary]);
    layer.record_end_command_buffer(primary);

    (primary, secondary)
}

pub(crate) fn allocate_memory(
    layer: &ValidationLayer,
    allocation_size: DeviceSize,
    memory_type_index: u32,
) -> vk::DeviceMemory {
    let memory = handle();
    layer.record_allocate_memory(
        memory,
        MemoryAllocateInfo {
            allocation_size,
            memory_type_index,
            ..Default::default()
        },
    );

    memory
}

/// A buffer that any memory type can back. Its requirements have not been queried.
pub(crate) fn create_buffer(
    layer: &ValidationLayer,
    size: DeviceSize,
    usage: BufferUsage,
) -> vk::Buffer {
    let buffer = handle();
    layer.record_create_buffer(
        buffer,
        BufferCreateInfo {
            size,
            usage,
            ..Default::default()
        },
        MemoryRequirements {
            size,
            alignment: 4,
            memory_type_bits: 0b111,
        },
    );

    buffer
}

pub(crate) fn create_bound_buffer(
    layer: &ValidationLayer,
    size: DeviceSize,
    usage: BufferUsage,
) -> (vk::Buffer, vk::DeviceMemory) {
    let buffer = create_buffer(layer, size, usage);
    layer.record_get_buffer_memory_requirements(buffer);

    let memory = allocate_memory(layer, size, 0);
    layer.record_bind_buffer_memory(&[BindBufferMemoryInfo {
        buffer,
        memory,
        memory_offset: 0,
    }]);

    (buffer, memory)
}

pub(crate) fn create_image(layer: &ValidationLayer, create_info: ImageCreateInfo) -> vk::Image {
    let image = handle();
    layer.record_create_image(
        image,
        create_info,
        MemoryRequirements {
            size: 4096,
            alignment: 256,
            memory_type_bits: 0b1,
        },
        Vec::new(),
    );

    image
}

/// A view of every subresource of `image`.
pub(crate) fn create_image_view(
    layer: &ValidationLayer,
    image: vk::Image,
    format: vk::Format,
) -> vk::ImageView {
    let view = handle();
    layer.record_create_image_view(
        view,
        ImageViewCreateInfo {
            image,
            format,
            ..Default::default()
        },
    );

    view
}

/// A render pass with one color attachment, written by each of `subpass_count` subpasses in
/// turn.
pub(crate) fn create_render_pass(layer: &ValidationLayer, subpass_count: u32) -> vk::RenderPass {
    let render_pass = handle();
    let subpasses = (0..subpass_count)
        .map(|_| SubpassDescription {
            color_attachments: vec![AttachmentReference::new(
                0,
                ImageLayout::ColorAttachmentOptimal,
            )],
            ..Default::default()
        })
        .collect();
    let dependencies = (1..subpass_count)
        .map(|subpass| SubpassDependency {
            src_subpass: subpass - 1,
            dst_subpass: subpass,
            src_stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            dst_stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            src_access: AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access: AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        })
        .collect();

    layer.record_create_render_pass(
        render_pass,
        RenderPassCreateInfo {
            attachments: vec![AttachmentDescription {
                format: vk::Format::R8G8B8A8_UNORM,
                ..Default::default()
            }],
            subpasses,
            dependencies,
            ..Default::default()
        },
    );

    render_pass
}

pub(crate) fn create_framebuffer(
    layer: &ValidationLayer,
    render_pass: vk::RenderPass,
    attachments: &[vk::ImageView],
) -> vk::Framebuffer {
    let framebuffer = handle();
    layer.record_create_framebuffer(
        framebuffer,
        FramebufferCreateInfo {
            render_pass,
            attachments: attachments.to_vec(),
            width: 64,
            height: 64,
            layers: 1,
            ..Default::default()
        },
    );

    framebuffer
}

/// A graphics pipeline with an empty layout and static viewport and scissor state.
pub(crate) fn create_graphics_pipeline(
    layer: &ValidationLayer,
    render_pass: vk::RenderPass,
    subpass: u32,
) -> vk::Pipeline {
    let layout = handle();
    layer.record_create_pipeline_layout(layout, &PipelineLayoutCreateInfo::default());

    let pipeline = handle();
    layer.record_create_pipelines(
        &[pipeline],
        &[PipelineCreateInfo::Graphics(GraphicsPipelineCreateInfo {
            layout,
            render_pass,
            subpass,
            ..Default::default()
        })],
    );

    pipeline
}

pub(crate) fn create_set_layout(
    layer: &ValidationLayer,
    binding: u32,
    descriptor_type: DescriptorType,
    stages: ShaderStages,
) -> vk::DescriptorSetLayout {
    let layout = handle();
    layer.record_create_descriptor_set_layout(
        layout,
        &DescriptorSetLayoutCreateInfo {
            bindings: vec![DescriptorSetLayoutBinding::new(
                binding,
                descriptor_type,
                1,
                stages,
            )],
            ..Default::default()
        },
    );

    layout
}

/// Accepts a stage only if its module's code hash is in the cache, and counts the calls.
#[derive(Debug, Default)]
pub(crate) struct RecordingValidator {
    calls: AtomicUsize,
}

impl RecordingValidator {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl ShaderStageValidator for RecordingValidator {
    fn validate_stage(
        &self,
        module: &ShaderModuleState,
        stage: &PipelineShaderStage,
        _bind_point: PipelineBindPoint,
        cache: Option<&dyn ValidationCache>,
    ) -> Vec<Box<ValidationError>> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if cache.is_some_and(|cache| cache.contains(module.create_info.code_hash)) {
            return Vec::new();
        }

        vec![Box::new(ValidationError {
            problem: format!("entry point `{}` was not validated", stage.entry_point).into(),
            vuids: &["UNASSIGNED-CoreValidation-Shader-InconsistentSpirv"],
            kind: ErrorKind::StateIncompatible,
            ..Default::default()
        })]
    }
}

/// A cache whose data is its digests as little-endian `u64`s.
#[derive(Debug, Default)]
struct DigestCache {
    digests: Mutex<BTreeSet<u64>>,
}

impl DigestCache {
    fn from_bytes(data: &[u8]) -> Self {
        let digests = data
            .chunks_exact(8)
            .map(|chunk| {
                let mut bytes = [0; 8];
                bytes.copy_from_slice(chunk);
                u64::from_le_bytes(bytes)
            })
            .collect();

        DigestCache {
            digests: Mutex::new(digests),
        }
    }
}

impl ValidationCache for DigestCache {
    fn contains(&self, digest: u64) -> bool {
        self.digests.lock().contains(&digest)
    }

    fn insert(&self, digest: u64) {
        self.digests.lock().insert(digest);
    }

    fn write(&self) -> Vec<u8> {
        self.digests
            .lock()
            .iter()
            .flat_map(|digest| digest.to_le_bytes())
            .collect()
    }

    fn merge(&self, other: &dyn ValidationCache) {
        let other = DigestCache::from_bytes(&other.write());
        self.digests.lock().extend(other.digests.into_inner());
    }
}

pub(crate) fn recording_cache_factory() -> ValidationCacheFactory {
    Arc::new(|data: &[u8]| Arc::new(DigestCache::from_bytes(data)) as Arc<dyn ValidationCache>)
}
