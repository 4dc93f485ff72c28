//! The typed object registry.
//!
//! Every live driver object has a state record in the registry, keyed by its raw handle. A handle
//! is live if and only if the registry holds a record for it.
//!
//! Records are shared through `Arc`: looking one up clones the `Arc` and releases the map lock, so
//! a record can be inspected while other threads create or destroy unrelated objects. State that
//! changes after creation is kept behind the record's own lock.

use crate::{
    acceleration_structure::AccelerationStructureState,
    buffer::{BufferState, BufferViewState},
    command_buffer::{CommandBufferState, CommandPoolState},
    descriptor_set::{
        layout::DescriptorSetLayoutState, DescriptorPoolState, DescriptorSetState,
    },
    handle::{ObjectType, TypedHandle},
    image::{ImageState, ImageViewState},
    memory::{Bindable, DeviceMemoryState},
    pipeline::{layout::PipelineLayoutState, PipelineState},
    query::QueryPoolState,
    queue::QueueState,
    render_pass::{framebuffer::FramebufferState, RenderPassState},
    sampler::{SamplerState, SamplerYcbcrConversionState},
    shader::ShaderModuleState,
    swapchain::SwapchainState,
    sync::{event::EventState, fence::FenceState, semaphore::SemaphoreState},
};
use ash::vk::{self, Handle};
use foldhash::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use std::{
    fmt::Debug,
    hash::Hash,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
};

/// The part of a state record that every object kind has.
#[derive(Debug)]
pub struct ObjectBase {
    handle: TypedHandle,
    in_use: AtomicU32,
    cb_bindings: Mutex<HashSet<vk::CommandBuffer>>,
    destroyed: AtomicBool,
}

impl ObjectBase {
    pub(crate) fn new(handle: TypedHandle) -> Self {
        ObjectBase {
            handle,
            in_use: AtomicU32::new(0),
            cb_bindings: Mutex::default(),
            destroyed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn typed_handle(&self) -> TypedHandle {
        self.handle
    }

    /// Returns the number of pending submissions that reference the object.
    #[inline]
    pub fn in_use_count(&self) -> u32 {
        self.in_use.load(Ordering::Acquire)
    }

    #[inline]
    pub fn in_use(&self) -> bool {
        self.in_use_count() != 0
    }

    #[inline]
    pub(crate) fn begin_use(&self) {
        self.in_use.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn end_use(&self) {
        let previous = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            })
            .unwrap_or(0);
        debug_assert!(previous != 0, "in-use count of {} underflowed", self.handle);
    }

    /// Records that `command_buffer` references the object. Returns `false` if it already did.
    #[inline]
    pub(crate) fn add_command_buffer_binding(&self, command_buffer: vk::CommandBuffer) -> bool {
        self.cb_bindings.lock().insert(command_buffer)
    }

    #[inline]
    pub(crate) fn remove_command_buffer_binding(&self, command_buffer: vk::CommandBuffer) {
        self.cb_bindings.lock().remove(&command_buffer);
    }

    /// Returns the command buffers that reference the object.
    pub fn command_buffer_bindings(&self) -> Vec<vk::CommandBuffer> {
        self.cb_bindings.lock().iter().copied().collect()
    }

    pub(crate) fn take_command_buffer_bindings(&self) -> Vec<vk::CommandBuffer> {
        self.cb_bindings.lock().drain().collect()
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

/// A state record stored in the registry.
pub trait StateObject: Send + Sync + 'static {
    /// The `ash` handle type of the object.
    type Handle: Handle + Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn base(&self) -> &ObjectBase;

    #[inline]
    fn handle(&self) -> Self::Handle {
        Self::Handle::from_raw(self.base().typed_handle().handle)
    }

    #[inline]
    fn typed_handle(&self) -> TypedHandle {
        self.base().typed_handle()
    }
}

macro_rules! impl_state_object {
    ($state:ty, $handle:ty) => {
        impl $crate::registry::StateObject for $state {
            type Handle = $handle;

            #[inline]
            fn base(&self) -> &$crate::registry::ObjectBase {
                &self.base
            }
        }
    };
}

pub(crate) use impl_state_object;

/// The records of one object kind.
pub struct ObjectMap<S: StateObject> {
    map: RwLock<HashMap<S::Handle, Arc<S>>>,
}

impl<S: StateObject> Default for ObjectMap<S> {
    fn default() -> Self {
        ObjectMap {
            map: RwLock::default(),
        }
    }
}

impl<S: StateObject> ObjectMap<S> {
    #[inline]
    pub fn get(&self, handle: S::Handle) -> Option<Arc<S>> {
        self.map.read().get(&handle).cloned()
    }

    #[inline]
    pub fn contains(&self, handle: S::Handle) -> bool {
        self.map.read().contains_key(&handle)
    }

    /// Inserts a new record.
    ///
    /// # Panics
    ///
    /// - Panics if a record for the same handle is already live.
    pub(crate) fn insert(&self, state: Arc<S>) {
        let handle = state.handle();
        let previous = self.map.write().insert(handle, state);
        assert!(
            previous.is_none(),
            "handle {:?} was created while a live object still had it",
            handle,
        );
        log::trace!("created {}", TypedHandle::new(handle));
    }

    /// Removes the record for `handle` and marks it destroyed.
    pub(crate) fn remove(&self, handle: S::Handle) -> Option<Arc<S>> {
        let state = self.map.write().remove(&handle)?;
        state.base().mark_destroyed();
        log::trace!("destroyed {}", state.typed_handle());

        Some(state)
    }

    /// Returns the record for `handle` if it can be removed, or an error if pending work still
    /// references it.
    pub fn check_erase(&self, handle: S::Handle) -> Result<Option<Arc<S>>, EraseError> {
        match self.get(handle) {
            Some(state) if state.base().in_use() => Err(EraseError::InUse {
                object: state.typed_handle(),
                count: state.base().in_use_count(),
            }),
            state => Ok(state),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns all live records. The order is unspecified.
    pub fn snapshot(&self) -> Vec<Arc<S>> {
        self.map.read().values().cloned().collect()
    }
}

/// Error returned when an object cannot be removed from the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EraseError {
    /// Pending work still references the object.
    InUse { object: TypedHandle, count: u32 },
}

/// A record of one of the object kinds that are bound to memory.
#[derive(Clone)]
pub enum BindableRef {
    Image(Arc<ImageState>),
    Buffer(Arc<BufferState>),
    AccelerationStructure(Arc<AccelerationStructureState>),
}

impl BindableRef {
    #[inline]
    pub fn bindable(&self) -> &Bindable {
        match self {
            BindableRef::Image(image) => &image.bindable,
            BindableRef::Buffer(buffer) => &buffer.bindable,
            BindableRef::AccelerationStructure(acceleration_structure) => {
                &acceleration_structure.bindable
            }
        }
    }

    #[inline]
    pub fn base(&self) -> &ObjectBase {
        match self {
            BindableRef::Image(image) => image.base(),
            BindableRef::Buffer(buffer) => buffer.base(),
            BindableRef::AccelerationStructure(acceleration_structure) => {
                acceleration_structure.base()
            }
        }
    }

    #[inline]
    pub fn typed_handle(&self) -> TypedHandle {
        self.base().typed_handle()
    }
}

/// All state records of a device.
#[derive(Default)]
pub struct Registry {
    pub images: ObjectMap<ImageState>,
    pub image_views: ObjectMap<ImageViewState>,
    pub buffers: ObjectMap<BufferState>,
    pub buffer_views: ObjectMap<BufferViewState>,
    pub acceleration_structures: ObjectMap<AccelerationStructureState>,
    pub device_memories: ObjectMap<DeviceMemoryState>,
    pub samplers: ObjectMap<SamplerState>,
    pub sampler_ycbcr_conversions: ObjectMap<SamplerYcbcrConversionState>,
    pub command_pools: ObjectMap<CommandPoolState>,
    pub command_buffers: ObjectMap<CommandBufferState>,
    pub descriptor_set_layouts: ObjectMap<DescriptorSetLayoutState>,
    pub descriptor_pools: ObjectMap<DescriptorPoolState>,
    pub descriptor_sets: ObjectMap<DescriptorSetState>,
    pub shader_modules: ObjectMap<ShaderModuleState>,
    pub pipeline_layouts: ObjectMap<PipelineLayoutState>,
    pub pipelines: ObjectMap<PipelineState>,
    pub render_passes: ObjectMap<RenderPassState>,
    pub framebuffers: ObjectMap<FramebufferState>,
    pub queues: ObjectMap<QueueState>,
    pub fences: ObjectMap<FenceState>,
    pub semaphores: ObjectMap<SemaphoreState>,
    pub events: ObjectMap<EventState>,
    pub query_pools: ObjectMap<QueryPoolState>,
    pub swapchains: ObjectMap<SwapchainState>,
}

impl Registry {
    /// Looks up an image, buffer or acceleration structure by typed handle.
    pub fn get_bindable(&self, handle: TypedHandle) -> Option<BindableRef> {
        match handle.object_type {
            ObjectType::Image => self
                .images
                .get(vk::Image::from_raw(handle.handle))
                .map(BindableRef::Image),
            ObjectType::Buffer => self
                .buffers
                .get(vk::Buffer::from_raw(handle.handle))
                .map(BindableRef::Buffer),
            ObjectType::AccelerationStructure => self
                .acceleration_structures
                .get(vk::AccelerationStructureKHR::from_raw(handle.handle))
                .map(BindableRef::AccelerationStructure),
            _ => None,
        }
    }

    /// Returns the common part of the record for `handle`, whatever its kind.
    pub fn get_base(&self, handle: TypedHandle) -> Option<Arc<dyn BaseRef>> {
        fn erase<S: StateObject>(state: Option<Arc<S>>) -> Option<Arc<dyn BaseRef>> {
            state.map(|state| state as Arc<dyn BaseRef>)
        }

        let raw = handle.handle;

        match handle.object_type {
            ObjectType::Image => erase(self.images.get(Handle::from_raw(raw))),
            ObjectType::ImageView => erase(self.image_views.get(Handle::from_raw(raw))),
            ObjectType::Buffer => erase(self.buffers.get(Handle::from_raw(raw))),
            ObjectType::BufferView => erase(self.buffer_views.get(Handle::from_raw(raw))),
            ObjectType::AccelerationStructure => {
                erase(self.acceleration_structures.get(Handle::from_raw(raw)))
            }
            ObjectType::DeviceMemory => erase(self.device_memories.get(Handle::from_raw(raw))),
            ObjectType::Sampler => erase(self.samplers.get(Handle::from_raw(raw))),
            ObjectType::SamplerYcbcrConversion => {
                erase(self.sampler_ycbcr_conversions.get(Handle::from_raw(raw)))
            }
            ObjectType::CommandPool => erase(self.command_pools.get(Handle::from_raw(raw))),
            ObjectType::CommandBuffer => erase(self.command_buffers.get(Handle::from_raw(raw))),
            ObjectType::DescriptorSetLayout => {
                erase(self.descriptor_set_layouts.get(Handle::from_raw(raw)))
            }
            ObjectType::DescriptorPool => erase(self.descriptor_pools.get(Handle::from_raw(raw))),
            ObjectType::DescriptorSet => erase(self.descriptor_sets.get(Handle::from_raw(raw))),
            ObjectType::ShaderModule => erase(self.shader_modules.get(Handle::from_raw(raw))),
            ObjectType::PipelineLayout => erase(self.pipeline_layouts.get(Handle::from_raw(raw))),
            ObjectType::Pipeline => erase(self.pipelines.get(Handle::from_raw(raw))),
            ObjectType::RenderPass => erase(self.render_passes.get(Handle::from_raw(raw))),
            ObjectType::Framebuffer => erase(self.framebuffers.get(Handle::from_raw(raw))),
            ObjectType::Queue => erase(self.queues.get(Handle::from_raw(raw))),
            ObjectType::Fence => erase(self.fences.get(Handle::from_raw(raw))),
            ObjectType::Semaphore => erase(self.semaphores.get(Handle::from_raw(raw))),
            ObjectType::Event => erase(self.events.get(Handle::from_raw(raw))),
            ObjectType::QueryPool => erase(self.query_pools.get(Handle::from_raw(raw))),
            ObjectType::Swapchain => erase(self.swapchains.get(Handle::from_raw(raw))),
            _ => None,
        }
    }
}

/// Object-safe access to the common part of a state record.
pub trait BaseRef: Send + Sync {
    fn object_base(&self) -> &ObjectBase;
}

impl<S: StateObject> BaseRef for S {
    #[inline]
    fn object_base(&self) -> &ObjectBase {
        self.base()
    }
}
