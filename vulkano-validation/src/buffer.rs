//! Buffer and buffer view state.

use crate::{
    handle::TypedHandle,
    macros::vulkan_bitflags,
    memory::{Bindable, ExternalMemoryHandleTypes, MemoryRequirements},
    registry::{impl_state_object, ObjectBase},
    sync::Sharing,
    DeviceSize,
};
use ash::vk;
use std::sync::Arc;

vulkan_bitflags! {
    /// Describes how a buffer is going to be used.
    BufferUsage = BufferUsageFlags(u32);

    TRANSFER_SRC = TRANSFER_SRC,
    TRANSFER_DST = TRANSFER_DST,
    UNIFORM_TEXEL_BUFFER = UNIFORM_TEXEL_BUFFER,
    STORAGE_TEXEL_BUFFER = STORAGE_TEXEL_BUFFER,
    UNIFORM_BUFFER = UNIFORM_BUFFER,
    STORAGE_BUFFER = STORAGE_BUFFER,
    INDEX_BUFFER = INDEX_BUFFER,
    VERTEX_BUFFER = VERTEX_BUFFER,
    INDIRECT_BUFFER = INDIRECT_BUFFER,
    SHADER_DEVICE_ADDRESS = SHADER_DEVICE_ADDRESS,
    TRANSFORM_FEEDBACK_BUFFER = TRANSFORM_FEEDBACK_BUFFER_EXT,
    TRANSFORM_FEEDBACK_COUNTER_BUFFER = TRANSFORM_FEEDBACK_COUNTER_BUFFER_EXT,
    CONDITIONAL_RENDERING = CONDITIONAL_RENDERING_EXT,
    ACCELERATION_STRUCTURE_STORAGE = ACCELERATION_STRUCTURE_STORAGE_KHR,
}

vulkan_bitflags! {
    /// Flags specifying additional properties of a buffer.
    BufferCreateFlags = BufferCreateFlags(u32);

    SPARSE_BINDING = SPARSE_BINDING,
    SPARSE_RESIDENCY = SPARSE_RESIDENCY,
    SPARSE_ALIASED = SPARSE_ALIASED,
    PROTECTED = PROTECTED,
    DEVICE_ADDRESS_CAPTURE_REPLAY = DEVICE_ADDRESS_CAPTURE_REPLAY,
}

impl BufferCreateFlags {
    /// The flags that make a buffer sparse.
    pub const SPARSE: Self = Self::SPARSE_BINDING
        .union(Self::SPARSE_RESIDENCY)
        .union(Self::SPARSE_ALIASED);
}

/// Parameters of a buffer.
#[derive(Clone, Debug, Default)]
pub struct BufferCreateInfo {
    pub flags: BufferCreateFlags,
    pub size: DeviceSize,
    pub usage: BufferUsage,
    pub sharing: Sharing,
    pub external_memory_handle_types: ExternalMemoryHandleTypes,
}

/// State of a `VkBuffer`.
#[derive(Debug)]
pub struct BufferState {
    base: ObjectBase,
    pub bindable: Bindable,
    pub create_info: BufferCreateInfo,
}

impl_state_object!(BufferState, vk::Buffer);

impl BufferState {
    pub(crate) fn new(
        buffer: vk::Buffer,
        create_info: BufferCreateInfo,
        requirements: MemoryRequirements,
    ) -> Self {
        BufferState {
            base: ObjectBase::new(TypedHandle::new(buffer)),
            bindable: Bindable::new(
                requirements,
                create_info.flags.intersects(BufferCreateFlags::SPARSE),
            ),
            create_info,
        }
    }

    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.create_info.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.create_info.usage
    }
}

/// Parameters of a buffer view.
#[derive(Clone, Debug)]
pub struct BufferViewCreateInfo {
    pub buffer: vk::Buffer,
    pub format: vk::Format,
    pub offset: DeviceSize,
    pub range: DeviceSize,
}

/// State of a `VkBufferView`.
#[derive(Debug)]
pub struct BufferViewState {
    base: ObjectBase,
    pub create_info: BufferViewCreateInfo,
    pub buffer: Arc<BufferState>,
}

impl_state_object!(BufferViewState, vk::BufferView);

impl BufferViewState {
    pub(crate) fn new(
        buffer_view: vk::BufferView,
        create_info: BufferViewCreateInfo,
        buffer: Arc<BufferState>,
    ) -> Self {
        BufferViewState {
            base: ObjectBase::new(TypedHandle::new(buffer_view)),
            create_info,
            buffer,
        }
    }
}
