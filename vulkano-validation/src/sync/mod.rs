//! Synchronization primitives and the barrier vocabulary shared by the command buffer and queue
//! models.
//!
//! - [Fences](fence) and [semaphores](semaphore) order whole submissions.
//! - [Events](event) order work within a queue, and can be signalled by the host.
//! - Pipeline barriers order work within a command buffer. Barriers that move a resource
//!   between queue families are matched up by the [ownership-transfer scoreboard](qfo).

use crate::{
    image::{ImageLayout, ImageSubresourceRange},
    macros::vulkan_bitflags,
    DeviceSize,
};
use ash::vk;
use smallvec::SmallVec;

pub mod event;
pub mod fence;
pub mod qfo;
pub mod semaphore;

vulkan_bitflags! {
    /// A set of stages in a pipeline.
    PipelineStages
    impl {
        /// Replaces the `ALL_GRAPHICS` and `ALL_COMMANDS` meta-stages with the individual stages
        /// they stand for.
        pub const fn expand(self) -> Self {
            let mut result = self;

            if self.intersects(Self::ALL_COMMANDS) {
                result = result.union(Self::all().difference(Self::ALL_COMMANDS.union(Self::ALL_GRAPHICS)));
            }

            if self.intersects(Self::ALL_GRAPHICS) {
                result = result.union(GRAPHICS_STAGES);
            }

            result.difference(Self::ALL_COMMANDS.union(Self::ALL_GRAPHICS))
        }

        /// Returns whether all stages in `self` operate in framebuffer space.
        #[inline]
        pub const fn is_framebuffer_space(self) -> bool {
            !self.is_empty() && FRAMEBUFFER_SPACE_STAGES.contains(self)
        }

        /// Returns the position of the logically latest graphics stage in `self`.
        pub fn latest_graphics_stage(self) -> Option<usize> {
            let expanded = self.expand();
            GRAPHICS_ORDER.iter().rposition(|&stage| expanded.intersects(stage))
        }

        /// Returns the position of the logically earliest graphics stage in `self`.
        pub fn earliest_graphics_stage(self) -> Option<usize> {
            let expanded = self.expand();
            GRAPHICS_ORDER.iter().position(|&stage| expanded.intersects(stage))
        }
    }
    = PipelineStageFlags(u32);

    TOP_OF_PIPE = TOP_OF_PIPE,
    DRAW_INDIRECT = DRAW_INDIRECT,
    VERTEX_INPUT = VERTEX_INPUT,
    VERTEX_SHADER = VERTEX_SHADER,
    TESSELLATION_CONTROL_SHADER = TESSELLATION_CONTROL_SHADER,
    TESSELLATION_EVALUATION_SHADER = TESSELLATION_EVALUATION_SHADER,
    GEOMETRY_SHADER = GEOMETRY_SHADER,
    FRAGMENT_SHADER = FRAGMENT_SHADER,
    EARLY_FRAGMENT_TESTS = EARLY_FRAGMENT_TESTS,
    LATE_FRAGMENT_TESTS = LATE_FRAGMENT_TESTS,
    COLOR_ATTACHMENT_OUTPUT = COLOR_ATTACHMENT_OUTPUT,
    COMPUTE_SHADER = COMPUTE_SHADER,
    TRANSFER = TRANSFER,
    BOTTOM_OF_PIPE = BOTTOM_OF_PIPE,
    HOST = HOST,
    ALL_GRAPHICS = ALL_GRAPHICS,
    ALL_COMMANDS = ALL_COMMANDS,
    TRANSFORM_FEEDBACK = TRANSFORM_FEEDBACK_EXT,
    CONDITIONAL_RENDERING = CONDITIONAL_RENDERING_EXT,
    ACCELERATION_STRUCTURE_BUILD = ACCELERATION_STRUCTURE_BUILD_KHR,
    RAY_TRACING_SHADER = RAY_TRACING_SHADER_KHR,
    FRAGMENT_DENSITY_PROCESS = FRAGMENT_DENSITY_PROCESS_EXT,
    FRAGMENT_SHADING_RATE_ATTACHMENT = FRAGMENT_SHADING_RATE_ATTACHMENT_KHR,
}

const GRAPHICS_STAGES: PipelineStages = PipelineStages::DRAW_INDIRECT
    .union(PipelineStages::VERTEX_INPUT)
    .union(PipelineStages::VERTEX_SHADER)
    .union(PipelineStages::TESSELLATION_CONTROL_SHADER)
    .union(PipelineStages::TESSELLATION_EVALUATION_SHADER)
    .union(PipelineStages::GEOMETRY_SHADER)
    .union(PipelineStages::FRAGMENT_SHADER)
    .union(PipelineStages::EARLY_FRAGMENT_TESTS)
    .union(PipelineStages::LATE_FRAGMENT_TESTS)
    .union(PipelineStages::COLOR_ATTACHMENT_OUTPUT)
    .union(PipelineStages::TRANSFORM_FEEDBACK)
    .union(PipelineStages::CONDITIONAL_RENDERING)
    .union(PipelineStages::FRAGMENT_DENSITY_PROCESS)
    .union(PipelineStages::FRAGMENT_SHADING_RATE_ATTACHMENT);

const FRAMEBUFFER_SPACE_STAGES: PipelineStages = PipelineStages::FRAGMENT_SHADER
    .union(PipelineStages::EARLY_FRAGMENT_TESTS)
    .union(PipelineStages::LATE_FRAGMENT_TESTS)
    .union(PipelineStages::COLOR_ATTACHMENT_OUTPUT);

const SHADER_STAGES: PipelineStages = PipelineStages::VERTEX_SHADER
    .union(PipelineStages::TESSELLATION_CONTROL_SHADER)
    .union(PipelineStages::TESSELLATION_EVALUATION_SHADER)
    .union(PipelineStages::GEOMETRY_SHADER)
    .union(PipelineStages::FRAGMENT_SHADER)
    .union(PipelineStages::COMPUTE_SHADER)
    .union(PipelineStages::RAY_TRACING_SHADER);

// Logical order of the graphics pipeline.
const GRAPHICS_ORDER: [PipelineStages; 10] = [
    PipelineStages::DRAW_INDIRECT,
    PipelineStages::VERTEX_INPUT,
    PipelineStages::VERTEX_SHADER,
    PipelineStages::TESSELLATION_CONTROL_SHADER,
    PipelineStages::TESSELLATION_EVALUATION_SHADER,
    PipelineStages::GEOMETRY_SHADER,
    PipelineStages::EARLY_FRAGMENT_TESTS,
    PipelineStages::FRAGMENT_SHADER,
    PipelineStages::LATE_FRAGMENT_TESTS,
    PipelineStages::COLOR_ATTACHMENT_OUTPUT,
];

vulkan_bitflags! {
    /// A set of memory access types.
    AccessFlags
    impl {
        /// Returns the stages that can perform at least one of the accesses in `self`.
        pub const fn supported_stages(self) -> PipelineStages {
            let mut result = PipelineStages::empty();
            let mut index = 0;

            while index < ACCESS_STAGE_TABLE.len() {
                let (access, stages) = ACCESS_STAGE_TABLE[index];

                if self.intersects(access) {
                    result = result.union(stages);
                }

                index += 1;
            }

            result
        }

        /// Returns the accesses in `self` that none of `stages` can perform.
        pub const fn unsupported_by(self, stages: PipelineStages) -> Self {
            let stages = stages.expand();
            let mut result = Self::empty();
            let mut index = 0;

            while index < ACCESS_STAGE_TABLE.len() {
                let (access, access_stages) = ACCESS_STAGE_TABLE[index];

                if self.intersects(access) && !access_stages.intersects(stages) {
                    result = result.union(access);
                }

                index += 1;
            }

            result
        }
    }
    = AccessFlags(u32);

    INDIRECT_COMMAND_READ = INDIRECT_COMMAND_READ,
    INDEX_READ = INDEX_READ,
    VERTEX_ATTRIBUTE_READ = VERTEX_ATTRIBUTE_READ,
    UNIFORM_READ = UNIFORM_READ,
    INPUT_ATTACHMENT_READ = INPUT_ATTACHMENT_READ,
    SHADER_READ = SHADER_READ,
    SHADER_WRITE = SHADER_WRITE,
    COLOR_ATTACHMENT_READ = COLOR_ATTACHMENT_READ,
    COLOR_ATTACHMENT_WRITE = COLOR_ATTACHMENT_WRITE,
    DEPTH_STENCIL_ATTACHMENT_READ = DEPTH_STENCIL_ATTACHMENT_READ,
    DEPTH_STENCIL_ATTACHMENT_WRITE = DEPTH_STENCIL_ATTACHMENT_WRITE,
    TRANSFER_READ = TRANSFER_READ,
    TRANSFER_WRITE = TRANSFER_WRITE,
    HOST_READ = HOST_READ,
    HOST_WRITE = HOST_WRITE,
    MEMORY_READ = MEMORY_READ,
    MEMORY_WRITE = MEMORY_WRITE,
    TRANSFORM_FEEDBACK_WRITE = TRANSFORM_FEEDBACK_WRITE_EXT,
    TRANSFORM_FEEDBACK_COUNTER_READ = TRANSFORM_FEEDBACK_COUNTER_READ_EXT,
    TRANSFORM_FEEDBACK_COUNTER_WRITE = TRANSFORM_FEEDBACK_COUNTER_WRITE_EXT,
    CONDITIONAL_RENDERING_READ = CONDITIONAL_RENDERING_READ_EXT,
    ACCELERATION_STRUCTURE_READ = ACCELERATION_STRUCTURE_READ_KHR,
    ACCELERATION_STRUCTURE_WRITE = ACCELERATION_STRUCTURE_WRITE_KHR,
    FRAGMENT_SHADING_RATE_ATTACHMENT_READ = FRAGMENT_SHADING_RATE_ATTACHMENT_READ_KHR,
}

const ACCESS_STAGE_TABLE: [(AccessFlags, PipelineStages); 24] = [
    (
        AccessFlags::INDIRECT_COMMAND_READ,
        PipelineStages::DRAW_INDIRECT.union(PipelineStages::ACCELERATION_STRUCTURE_BUILD),
    ),
    (AccessFlags::INDEX_READ, PipelineStages::VERTEX_INPUT),
    (AccessFlags::VERTEX_ATTRIBUTE_READ, PipelineStages::VERTEX_INPUT),
    (AccessFlags::UNIFORM_READ, SHADER_STAGES),
    (AccessFlags::INPUT_ATTACHMENT_READ, PipelineStages::FRAGMENT_SHADER),
    (
        AccessFlags::SHADER_READ,
        SHADER_STAGES.union(PipelineStages::ACCELERATION_STRUCTURE_BUILD),
    ),
    (AccessFlags::SHADER_WRITE, SHADER_STAGES),
    (
        AccessFlags::COLOR_ATTACHMENT_READ,
        PipelineStages::COLOR_ATTACHMENT_OUTPUT,
    ),
    (
        AccessFlags::COLOR_ATTACHMENT_WRITE,
        PipelineStages::COLOR_ATTACHMENT_OUTPUT,
    ),
    (
        AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        PipelineStages::EARLY_FRAGMENT_TESTS.union(PipelineStages::LATE_FRAGMENT_TESTS),
    ),
    (
        AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        PipelineStages::EARLY_FRAGMENT_TESTS.union(PipelineStages::LATE_FRAGMENT_TESTS),
    ),
    (
        AccessFlags::TRANSFER_READ,
        PipelineStages::TRANSFER.union(PipelineStages::ACCELERATION_STRUCTURE_BUILD),
    ),
    (
        AccessFlags::TRANSFER_WRITE,
        PipelineStages::TRANSFER.union(PipelineStages::ACCELERATION_STRUCTURE_BUILD),
    ),
    (AccessFlags::HOST_READ, PipelineStages::HOST),
    (AccessFlags::HOST_WRITE, PipelineStages::HOST),
    (AccessFlags::MEMORY_READ, PipelineStages::all()),
    (AccessFlags::MEMORY_WRITE, PipelineStages::all()),
    (
        AccessFlags::TRANSFORM_FEEDBACK_WRITE,
        PipelineStages::TRANSFORM_FEEDBACK,
    ),
    (
        AccessFlags::TRANSFORM_FEEDBACK_COUNTER_READ,
        PipelineStages::TRANSFORM_FEEDBACK.union(PipelineStages::DRAW_INDIRECT),
    ),
    (
        AccessFlags::TRANSFORM_FEEDBACK_COUNTER_WRITE,
        PipelineStages::TRANSFORM_FEEDBACK,
    ),
    (
        AccessFlags::CONDITIONAL_RENDERING_READ,
        PipelineStages::CONDITIONAL_RENDERING,
    ),
    (
        AccessFlags::ACCELERATION_STRUCTURE_READ,
        SHADER_STAGES.union(PipelineStages::ACCELERATION_STRUCTURE_BUILD),
    ),
    (
        AccessFlags::ACCELERATION_STRUCTURE_WRITE,
        PipelineStages::ACCELERATION_STRUCTURE_BUILD,
    ),
    (
        AccessFlags::FRAGMENT_SHADING_RATE_ATTACHMENT_READ,
        PipelineStages::FRAGMENT_SHADING_RATE_ATTACHMENT,
    ),
];

vulkan_bitflags! {
    /// Flags that modify how a dependency is applied.
    DependencyFlags = DependencyFlags(u32);

    BY_REGION = BY_REGION,
    DEVICE_GROUP = DEVICE_GROUP,
    VIEW_LOCAL = VIEW_LOCAL,
}

/// How a resource is shared between queue families.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Sharing {
    /// Owned by one queue family at a time; ownership moves with barriers.
    #[default]
    Exclusive,

    /// Accessible from all of the listed queue families at once.
    Concurrent(SmallVec<[u32; 4]>),
}

impl Sharing {
    #[inline]
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive)
    }
}

/// Who owns the payload of a fence or semaphore.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SyncScope {
    /// The payload is tracked by the layer.
    #[default]
    Internal,

    /// An external payload was imported temporarily. The next wait or reset restores the
    /// internal payload.
    ExternalTemporary,

    /// An external payload was imported, or the payload was exported with reference
    /// transference. The layer can no longer reason about it.
    ExternalPermanent,
}

/// Returns whether `index` is one of the special queue family values.
#[inline]
pub(crate) fn is_special_queue_family(index: u32) -> bool {
    index == vk::QUEUE_FAMILY_IGNORED
        || index == vk::QUEUE_FAMILY_EXTERNAL
        || index == vk::QUEUE_FAMILY_FOREIGN_EXT
}

/// A global memory barrier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryBarrier {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

/// A memory barrier on a range of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferMemoryBarrier {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
    pub buffer: vk::Buffer,
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

impl Default for BufferMemoryBarrier {
    #[inline]
    fn default() -> Self {
        Self {
            src_access: AccessFlags::empty(),
            dst_access: AccessFlags::empty(),
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            buffer: vk::Buffer::null(),
            offset: 0,
            size: vk::WHOLE_SIZE,
        }
    }
}

/// A memory barrier on a range of an image, optionally with a layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageMemoryBarrier {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
    pub image: vk::Image,
    pub subresource_range: ImageSubresourceRange,
}

impl Default for ImageMemoryBarrier {
    #[inline]
    fn default() -> Self {
        Self {
            src_access: AccessFlags::empty(),
            dst_access: AccessFlags::empty(),
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::Undefined,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image: vk::Image::null(),
            subresource_range: ImageSubresourceRange::default(),
        }
    }
}

/// The parameters of a pipeline barrier or event wait.
#[derive(Clone, Debug, Default)]
pub struct DependencyInfo {
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub dependency_flags: DependencyFlags,
    pub memory_barriers: SmallVec<[MemoryBarrier; 1]>,
    pub buffer_memory_barriers: SmallVec<[BufferMemoryBarrier; 2]>,
    pub image_memory_barriers: SmallVec<[ImageMemoryBarrier; 2]>,
}

#[cfg(test)]
mod tests {
    use super::{AccessFlags, PipelineStages};

    #[test]
    fn expand_meta_stages() {
        let expanded = PipelineStages::ALL_GRAPHICS.expand();

        assert!(expanded.contains(PipelineStages::VERTEX_SHADER));
        assert!(!expanded.intersects(PipelineStages::COMPUTE_SHADER));
        assert!(!expanded.intersects(PipelineStages::ALL_GRAPHICS));

        let expanded = PipelineStages::ALL_COMMANDS.expand();
        assert!(expanded.contains(PipelineStages::COMPUTE_SHADER | PipelineStages::HOST));
    }

    #[test]
    fn access_support() {
        assert!(AccessFlags::COLOR_ATTACHMENT_WRITE
            .unsupported_by(PipelineStages::COLOR_ATTACHMENT_OUTPUT)
            .is_empty());
        assert_eq!(
            AccessFlags::COLOR_ATTACHMENT_WRITE.unsupported_by(PipelineStages::VERTEX_SHADER),
            AccessFlags::COLOR_ATTACHMENT_WRITE,
        );
        assert!(AccessFlags::SHADER_READ
            .unsupported_by(PipelineStages::ALL_GRAPHICS)
            .is_empty());
        assert!(AccessFlags::MEMORY_READ
            .unsupported_by(PipelineStages::TOP_OF_PIPE)
            .is_empty());
    }

    #[test]
    fn graphics_order() {
        let src = PipelineStages::COLOR_ATTACHMENT_OUTPUT;
        let dst = PipelineStages::FRAGMENT_SHADER;

        assert!(src.latest_graphics_stage() > dst.earliest_graphics_stage());
        assert!(dst.latest_graphics_stage() < src.earliest_graphics_stage());
        assert!(PipelineStages::COLOR_ATTACHMENT_OUTPUT.is_framebuffer_space());
        assert!(!(PipelineStages::COLOR_ATTACHMENT_OUTPUT | PipelineStages::TRANSFER)
            .is_framebuffer_space());
    }
}
