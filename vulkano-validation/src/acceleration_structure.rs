//! Acceleration structure state.
//!
//! Acceleration structures created on top of a buffer get their storage from that buffer. Those
//! created without one are bound to memory directly, like images and buffers.

use crate::{
    handle::TypedHandle,
    macros::vulkan_enum,
    memory::{Bindable, MemoryRequirements},
    registry::{impl_state_object, ObjectBase},
    DeviceSize,
};
use ash::vk;
use std::sync::atomic::{AtomicBool, Ordering};

vulkan_enum! {
    /// The type of an acceleration structure.
    AccelerationStructureType = AccelerationStructureTypeKHR(i32);

    TopLevel = TOP_LEVEL,
    BottomLevel = BOTTOM_LEVEL,
    Generic = GENERIC,
}

/// Parameters of an acceleration structure.
#[derive(Clone, Debug)]
pub struct AccelerationStructureCreateInfo {
    pub ty: AccelerationStructureType,

    /// The buffer providing storage, or `None` if memory is bound to the structure itself.
    pub buffer: Option<vk::Buffer>,
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

/// State of a `VkAccelerationStructureKHR`.
#[derive(Debug)]
pub struct AccelerationStructureState {
    base: ObjectBase,
    pub bindable: Bindable,
    pub create_info: AccelerationStructureCreateInfo,
    built: AtomicBool,
}

impl_state_object!(AccelerationStructureState, vk::AccelerationStructureKHR);

impl AccelerationStructureState {
    pub(crate) fn new(
        acceleration_structure: vk::AccelerationStructureKHR,
        create_info: AccelerationStructureCreateInfo,
        requirements: MemoryRequirements,
    ) -> Self {
        AccelerationStructureState {
            base: ObjectBase::new(TypedHandle::new(acceleration_structure)),
            bindable: Bindable::new(requirements, false),
            create_info,
            built: AtomicBool::new(false),
        }
    }

    /// Returns whether a build command for the structure has been recorded.
    #[inline]
    pub fn is_built(&self) -> bool {
        self.built.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_built(&self) {
        self.built.store(true, Ordering::Release);
    }
}
