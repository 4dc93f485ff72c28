//! Device memory allocations and the memory-binding graph.
//!
//! A [`Bindable`] resource (image, buffer or acceleration structure) acquires its storage by
//! being bound to a [`DeviceMemoryState`]. Both directions of that edge are recorded: the resource
//! knows which memory backs it, and the memory knows every resource bound to it. Freeing a memory
//! object does not destroy the resources bound to it; their binding is replaced by
//! [`BoundMemory::Unbound`] so later use can be diagnosed.

use crate::{
    handle::TypedHandle,
    macros::vulkan_bitflags,
    registry::{impl_state_object, BindableRef, ObjectBase, Registry, StateObject},
    DeviceSize, ErrorKind, ValidationError,
};
use ash::vk;
use foldhash::HashSet;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};

vulkan_bitflags! {
    /// Properties of a memory type.
    MemoryPropertyFlags = MemoryPropertyFlags(u32);

    DEVICE_LOCAL = DEVICE_LOCAL,
    HOST_VISIBLE = HOST_VISIBLE,
    HOST_COHERENT = HOST_COHERENT,
    HOST_CACHED = HOST_CACHED,
    LAZILY_ALLOCATED = LAZILY_ALLOCATED,
    PROTECTED = PROTECTED,
}

vulkan_bitflags! {
    /// A set of external memory handle types.
    ExternalMemoryHandleTypes = ExternalMemoryHandleTypeFlags(u32);

    OPAQUE_FD = OPAQUE_FD,
    OPAQUE_WIN32 = OPAQUE_WIN32,
    OPAQUE_WIN32_KMT = OPAQUE_WIN32_KMT,
    D3D11_TEXTURE = D3D11_TEXTURE,
    D3D11_TEXTURE_KMT = D3D11_TEXTURE_KMT,
    D3D12_HEAP = D3D12_HEAP,
    D3D12_RESOURCE = D3D12_RESOURCE,
    DMA_BUF = DMA_BUF_EXT,
    HOST_ALLOCATION = HOST_ALLOCATION_EXT,
    HOST_MAPPED_FOREIGN_MEMORY = HOST_MAPPED_FOREIGN_MEMORY_EXT,
}

/// A memory type of the physical device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryType {
    pub property_flags: MemoryPropertyFlags,
    pub heap_index: u32,
}

/// The memory layout a resource needs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryRequirements {
    pub size: DeviceSize,
    pub alignment: DeviceSize,

    /// Bit `i` is set if memory type `i` can back the resource.
    pub memory_type_bits: u32,
}

/// The resource that a dedicated allocation was made for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DedicatedAllocation {
    Buffer(vk::Buffer),
    Image(vk::Image),
}

impl DedicatedAllocation {
    #[inline]
    pub fn typed_handle(self) -> TypedHandle {
        match self {
            DedicatedAllocation::Buffer(buffer) => TypedHandle::new(buffer),
            DedicatedAllocation::Image(image) => TypedHandle::new(image),
        }
    }
}

/// Parameters of a memory allocation.
#[derive(Clone, Debug, Default)]
pub struct MemoryAllocateInfo {
    pub allocation_size: DeviceSize,
    pub memory_type_index: u32,
    pub dedicated_allocation: Option<DedicatedAllocation>,

    /// The handle types the allocation can be exported as.
    pub export_handle_types: ExternalMemoryHandleTypes,
}

/// What backs a non-sparse resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundMemory {
    /// An ordinary allocation.
    Memory(vk::DeviceMemory),

    /// Memory owned by the swapchain the image came from.
    SwapchainImage,

    /// The allocation was freed while the resource stayed alive.
    Unbound,
}

/// The binding of a non-sparse resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryBinding {
    pub memory: BoundMemory,
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

impl MemoryBinding {
    /// Returns the allocation, if the binding refers to a live one.
    #[inline]
    pub fn device_memory(&self) -> Option<vk::DeviceMemory> {
        match self.memory {
            BoundMemory::Memory(memory) => Some(memory),
            BoundMemory::SwapchainImage | BoundMemory::Unbound => None,
        }
    }
}

/// One range of a sparse resource bound to memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SparseBinding {
    /// The allocation, or null if the range is being unbound.
    pub memory: vk::DeviceMemory,
    pub resource_offset: DeviceSize,
    pub size: DeviceSize,
    pub memory_offset: DeviceSize,

    /// Whether the range binds the metadata aspect of an image.
    pub metadata: bool,
}

#[derive(Debug, Default)]
struct BindingState {
    binding: Option<MemoryBinding>,
    sparse_bindings: Vec<SparseBinding>,
}

/// The memory-related state that images, buffers and acceleration structures share.
#[derive(Debug)]
pub struct Bindable {
    requirements: MemoryRequirements,
    sparse: bool,
    requirements_checked: AtomicBool,
    state: Mutex<BindingState>,
}

impl Bindable {
    pub(crate) fn new(requirements: MemoryRequirements, sparse: bool) -> Self {
        Bindable {
            requirements,
            sparse,
            requirements_checked: AtomicBool::new(false),
            state: Mutex::default(),
        }
    }

    #[inline]
    pub fn requirements(&self) -> &MemoryRequirements {
        &self.requirements
    }

    /// Returns whether the resource was created with a sparse binding flag.
    #[inline]
    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    /// Returns whether the application queried the memory requirements of the resource.
    #[inline]
    pub fn memory_requirements_checked(&self) -> bool {
        self.requirements_checked.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_memory_requirements_checked(&self) {
        self.requirements_checked.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn binding(&self) -> Option<MemoryBinding> {
        self.state.lock().binding
    }

    pub fn sparse_bindings(&self) -> Vec<SparseBinding> {
        self.state.lock().sparse_bindings.clone()
    }

    /// Returns every allocation that backs some part of the resource.
    pub fn bound_memory_set(&self) -> SmallVec<[vk::DeviceMemory; 1]> {
        let state = self.state.lock();
        let mut result = SmallVec::new();

        if let Some(memory) = state.binding.and_then(|binding| binding.device_memory()) {
            result.push(memory);
        }

        for binding in &state.sparse_bindings {
            if binding.memory != vk::DeviceMemory::null() && !result.contains(&binding.memory) {
                result.push(binding.memory);
            }
        }

        result
    }

    /// Returns whether the resource has storage it can be used with.
    pub fn has_usable_memory(&self) -> bool {
        if self.sparse {
            return true;
        }

        matches!(
            self.binding(),
            Some(MemoryBinding {
                memory: BoundMemory::Memory(_) | BoundMemory::SwapchainImage,
                ..
            }),
        )
    }

    #[inline]
    pub(crate) fn set_binding(&self, binding: MemoryBinding) {
        self.state.lock().binding = Some(binding);
    }

    fn push_sparse_binding(&self, binding: SparseBinding) {
        let mut state = self.state.lock();

        // A new range replaces whatever was bound at exactly the same place.
        state.sparse_bindings.retain(|existing| {
            existing.resource_offset != binding.resource_offset
                || existing.metadata != binding.metadata
        });

        if binding.memory != vk::DeviceMemory::null() {
            state.sparse_bindings.push(binding);
        }
    }

    fn mark_memory_freed(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.lock();

        if let Some(binding) = &mut state.binding {
            if binding.memory == BoundMemory::Memory(memory) {
                binding.memory = BoundMemory::Unbound;
            }
        }

        state.sparse_bindings.retain(|binding| binding.memory != memory);
    }

    fn clear(&self) -> SmallVec<[vk::DeviceMemory; 1]> {
        let memories = self.bound_memory_set();
        let mut state = self.state.lock();
        state.sparse_bindings.clear();

        memories
    }
}

/// A mapped range of an allocation. The size is resolved, never `WHOLE_SIZE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappedRange {
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

/// Byte that the guard bands of a shadow copy are filled with.
pub const SHADOW_FILL_VALUE: u8 = 0x0B;

/// A layer-private mirror of a mapped non-coherent range, padded with guard bands on both sides.
///
/// The application writes into [`ShadowCopy::data_mut`]. Any byte of a guard band that no longer
/// holds [`SHADOW_FILL_VALUE`] was written out of bounds.
#[derive(Clone, Debug)]
pub struct ShadowCopy {
    bytes: Vec<u8>,
    guard_size: usize,
    size: usize,
}

/// Which guard band of a shadow copy was overwritten.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShadowCorruption {
    pub underflow: bool,
    pub overflow: bool,
}

impl ShadowCopy {
    pub fn new(size: usize, guard_size: usize) -> Self {
        ShadowCopy {
            bytes: vec![SHADOW_FILL_VALUE; size + 2 * guard_size],
            guard_size,
            size,
        }
    }

    #[inline]
    pub fn guard_size(&self) -> usize {
        self.guard_size
    }

    /// The region the application sees.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[self.guard_size..self.guard_size + self.size]
    }

    /// The whole allocation including both guard bands.
    #[inline]
    pub fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn check_guards(&self) -> Result<(), ShadowCorruption> {
        let (head, rest) = self.bytes.split_at(self.guard_size);
        let tail = &rest[self.size..];
        let corruption = ShadowCorruption {
            underflow: head.iter().any(|&byte| byte != SHADOW_FILL_VALUE),
            overflow: tail.iter().any(|&byte| byte != SHADOW_FILL_VALUE),
        };

        if corruption == ShadowCorruption::default() {
            Ok(())
        } else {
            Err(corruption)
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct DeviceMemoryMut {
    bound_objects: HashSet<TypedHandle>,
    mapped: Option<MappedRange>,
    shadow: Option<ShadowCopy>,
}

/// State of a `VkDeviceMemory`.
#[derive(Debug)]
pub struct DeviceMemoryState {
    base: ObjectBase,
    pub allocate_info: MemoryAllocateInfo,
    pub memory_type: MemoryType,
    pub(crate) state: Mutex<DeviceMemoryMut>,
}

impl_state_object!(DeviceMemoryState, vk::DeviceMemory);

impl DeviceMemoryState {
    pub(crate) fn new(
        memory: vk::DeviceMemory,
        allocate_info: MemoryAllocateInfo,
        memory_type: MemoryType,
    ) -> Self {
        DeviceMemoryState {
            base: ObjectBase::new(TypedHandle::new(memory)),
            allocate_info,
            memory_type,
            state: Mutex::default(),
        }
    }

    #[inline]
    pub fn is_dedicated(&self) -> bool {
        self.allocate_info.dedicated_allocation.is_some()
    }

    #[inline]
    pub fn is_export(&self) -> bool {
        !self.allocate_info.export_handle_types.is_empty()
    }

    #[inline]
    pub fn is_coherent(&self) -> bool {
        self.memory_type
            .property_flags
            .intersects(MemoryPropertyFlags::HOST_COHERENT)
    }

    /// Returns the resources bound to the allocation.
    pub fn bound_objects(&self) -> Vec<TypedHandle> {
        self.state.lock().bound_objects.iter().copied().collect()
    }

    #[inline]
    pub fn mapped_range(&self) -> Option<MappedRange> {
        self.state.lock().mapped
    }

    /// Runs `f` on the shadow copy of the mapped range, if there is one.
    pub fn with_shadow_copy<R>(&self, f: impl FnOnce(&mut ShadowCopy) -> R) -> Option<R> {
        self.state.lock().shadow.as_mut().map(f)
    }

    pub(crate) fn map(&self, range: MappedRange, shadow: Option<ShadowCopy>) {
        let mut state = self.state.lock();
        state.mapped = Some(range);
        state.shadow = shadow;
    }

    pub(crate) fn unmap(&self) -> Option<ShadowCopy> {
        let mut state = self.state.lock();
        state.mapped = None;

        state.shadow.take()
    }

    /// Resolves `WHOLE_SIZE` against the allocation.
    #[inline]
    pub fn resolve_size(&self, offset: DeviceSize, size: DeviceSize) -> DeviceSize {
        if size == vk::WHOLE_SIZE {
            self.allocate_info.allocation_size.saturating_sub(offset)
        } else {
            size
        }
    }

    fn add_bound_object(&self, object: TypedHandle) {
        self.state.lock().bound_objects.insert(object);
    }

    fn remove_bound_object(&self, object: TypedHandle) {
        self.state.lock().bound_objects.remove(&object);
    }
}

/// A range of a mapped allocation to flush or invalidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappedMemoryRange {
    pub memory: vk::DeviceMemory,
    pub offset: DeviceSize,

    /// May be `WHOLE_SIZE`.
    pub size: DeviceSize,
}

/// Parameters of binding a buffer to memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindBufferMemoryInfo {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub memory_offset: DeviceSize,
}

/// Parameters of binding an image to memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindImageMemoryInfo {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub memory_offset: DeviceSize,
}

/// Parameters of binding an acceleration structure to memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindAccelerationStructureMemoryInfo {
    pub acceleration_structure: vk::AccelerationStructureKHR,
    pub memory: vk::DeviceMemory,
    pub memory_offset: DeviceSize,
}

/// The entry point through which memory is bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindMemoryApi {
    BindBufferMemory,
    BindBufferMemory2,
    BindImageMemory,
    BindImageMemory2,
    BindAccelerationStructureMemory,
}

struct BindVuids {
    already_bound: &'static [&'static str],
    sparse: &'static [&'static str],
    offset_range: &'static [&'static str],
    alignment: &'static [&'static str],
    memory_type: &'static [&'static str],
    size: &'static [&'static str],
    dedicated: &'static [&'static str],
}

impl BindMemoryApi {
    pub fn name(self) -> &'static str {
        match self {
            BindMemoryApi::BindBufferMemory => "vkBindBufferMemory",
            BindMemoryApi::BindBufferMemory2 => "vkBindBufferMemory2",
            BindMemoryApi::BindImageMemory => "vkBindImageMemory",
            BindMemoryApi::BindImageMemory2 => "vkBindImageMemory2",
            BindMemoryApi::BindAccelerationStructureMemory => {
                "vkBindAccelerationStructureMemoryNV"
            }
        }
    }

    fn vuids(self) -> &'static BindVuids {
        match self {
            BindMemoryApi::BindBufferMemory => &BindVuids {
                already_bound: &["VUID-vkBindBufferMemory-buffer-01029"],
                sparse: &["VUID-vkBindBufferMemory-buffer-01030"],
                offset_range: &["VUID-vkBindBufferMemory-memoryOffset-01031"],
                alignment: &["VUID-vkBindBufferMemory-memoryOffset-01036"],
                memory_type: &["VUID-vkBindBufferMemory-memory-01035"],
                size: &["VUID-vkBindBufferMemory-size-01037"],
                dedicated: &["VUID-vkBindBufferMemory-memory-01508"],
            },
            BindMemoryApi::BindBufferMemory2 => &BindVuids {
                already_bound: &["VUID-VkBindBufferMemoryInfo-buffer-01029"],
                sparse: &["VUID-VkBindBufferMemoryInfo-buffer-01030"],
                offset_range: &["VUID-VkBindBufferMemoryInfo-memoryOffset-01031"],
                alignment: &["VUID-VkBindBufferMemoryInfo-memoryOffset-01036"],
                memory_type: &["VUID-VkBindBufferMemoryInfo-memory-01035"],
                size: &["VUID-VkBindBufferMemoryInfo-size-01037"],
                dedicated: &["VUID-VkBindBufferMemoryInfo-memory-01508"],
            },
            BindMemoryApi::BindImageMemory => &BindVuids {
                already_bound: &["VUID-vkBindImageMemory-image-01044"],
                sparse: &["VUID-vkBindImageMemory-image-01045"],
                offset_range: &["VUID-vkBindImageMemory-memoryOffset-01046"],
                alignment: &["VUID-vkBindImageMemory-memoryOffset-01048"],
                memory_type: &["VUID-vkBindImageMemory-memory-01047"],
                size: &["VUID-vkBindImageMemory-size-01049"],
                dedicated: &["VUID-vkBindImageMemory-memory-01509"],
            },
            BindMemoryApi::BindImageMemory2 => &BindVuids {
                already_bound: &["VUID-VkBindImageMemoryInfo-image-01044"],
                sparse: &["VUID-VkBindImageMemoryInfo-image-01045"],
                offset_range: &["VUID-VkBindImageMemoryInfo-memoryOffset-01046"],
                alignment: &["VUID-VkBindImageMemoryInfo-memoryOffset-01048"],
                memory_type: &["VUID-VkBindImageMemoryInfo-memory-01047"],
                size: &["VUID-VkBindImageMemoryInfo-size-01049"],
                dedicated: &["VUID-VkBindImageMemoryInfo-memory-01509"],
            },
            BindMemoryApi::BindAccelerationStructureMemory => &BindVuids {
                already_bound: &[
                    "VUID-VkBindAccelerationStructureMemoryInfoNV-accelerationStructure-03620",
                ],
                sparse: &["UNASSIGNED-CoreValidation-MemTrack-SparseAccelerationStructure"],
                offset_range: &["VUID-VkBindAccelerationStructureMemoryInfoNV-memoryOffset-03621"],
                alignment: &["VUID-VkBindAccelerationStructureMemoryInfoNV-memoryOffset-03623"],
                memory_type: &["VUID-VkBindAccelerationStructureMemoryInfoNV-memory-03622"],
                size: &["VUID-VkBindAccelerationStructureMemoryInfoNV-size-03624"],
                dedicated: &["UNASSIGNED-CoreValidation-MemTrack-DedicatedAccelerationStructure"],
            },
        }
    }
}

/// Checks that `resource` may be bound to `memory` at all, given how it is bound now.
pub(crate) fn validate_set_mem_binding(
    memory: vk::DeviceMemory,
    resource: &BindableRef,
    api: BindMemoryApi,
) -> Result<(), Box<ValidationError>> {
    let vuids = api.vuids();
    let bindable = resource.bindable();
    let object = resource.typed_handle();

    if bindable.is_sparse() {
        return Err(Box::new(ValidationError {
            context: api.name().into(),
            problem: format!(
                "{} was created with a sparse binding flag, and cannot be bound with {}",
                object,
                api.name(),
            )
            .into(),
            vuids: vuids.sparse,
            kind: ErrorKind::StateIncompatible,
            objects: [object, TypedHandle::new(memory)].into_iter().collect(),
            ..Default::default()
        }));
    }

    match bindable.binding() {
        Some(MemoryBinding {
            memory: BoundMemory::Unbound,
            ..
        }) => Err(Box::new(ValidationError {
            context: api.name().into(),
            problem: format!(
                "{} was previously bound to memory that has since been freed; memory bindings \
                are immutable and cannot be redone",
                object,
            )
            .into(),
            vuids: &["UNASSIGNED-CoreValidation-MemTrack-RebindObject"],
            kind: ErrorKind::UseAfterFree,
            objects: [object, TypedHandle::new(memory)].into_iter().collect(),
            ..Default::default()
        })),
        Some(MemoryBinding {
            memory: previous, ..
        }) if previous != BoundMemory::Memory(memory) => {
            let previous = match previous {
                BoundMemory::Memory(previous) => TypedHandle::new(previous).to_string(),
                _ => "swapchain memory".to_owned(),
            };

            Err(Box::new(ValidationError {
                context: api.name().into(),
                problem: format!(
                    "{} is already bound to {}, and cannot be bound to {}",
                    object,
                    previous,
                    TypedHandle::new(memory),
                )
                .into(),
                vuids: vuids.already_bound,
                kind: ErrorKind::StateIncompatible,
                objects: [object, TypedHandle::new(memory)].into_iter().collect(),
                ..Default::default()
            }))
        }
        Some(_) => Err(Box::new(ValidationError {
            context: api.name().into(),
            problem: format!("{} is already bound to this memory", object).into(),
            vuids: vuids.already_bound,
            kind: ErrorKind::StateIncompatible,
            objects: [object, TypedHandle::new(memory)].into_iter().collect(),
            ..Default::default()
        })),
        None => Ok(()),
    }
}

/// Checks `memory_offset` and the memory type against the requirements of `resource`.
pub(crate) fn validate_memory_requirements(
    memory: &DeviceMemoryState,
    resource: &BindableRef,
    memory_offset: DeviceSize,
    api: BindMemoryApi,
) -> SmallVec<[Box<ValidationError>; 1]> {
    let vuids = api.vuids();
    let requirements = resource.bindable().requirements();
    let objects: SmallVec<[TypedHandle; 2]> =
        [resource.typed_handle(), memory.typed_handle()].into_iter().collect();
    let allocation_size = memory.allocate_info.allocation_size;
    let mut errors = SmallVec::new();

    if memory_offset >= allocation_size {
        errors.push(Box::new(ValidationError {
            context: "memory_offset".into(),
            problem: format!(
                "{} is not less than the allocation size {}",
                memory_offset, allocation_size,
            )
            .into(),
            vuids: vuids.offset_range,
            kind: ErrorKind::ParameterOutOfRange,
            objects: objects.clone(),
            ..Default::default()
        }));
    }

    if requirements.alignment != 0 && memory_offset % requirements.alignment != 0 {
        errors.push(Box::new(ValidationError {
            context: "memory_offset".into(),
            problem: format!(
                "{} is not a multiple of the required alignment {}",
                memory_offset, requirements.alignment,
            )
            .into(),
            vuids: vuids.alignment,
            kind: ErrorKind::StateIncompatible,
            objects: objects.clone(),
            ..Default::default()
        }));
    }

    let type_index = memory.allocate_info.memory_type_index;

    if type_index >= 32 || requirements.memory_type_bits & (1 << type_index) == 0 {
        errors.push(Box::new(ValidationError {
            context: "memory".into(),
            problem: format!(
                "was allocated from memory type {}, which is not allowed by the resource's \
                memory type bits {:#x}",
                type_index, requirements.memory_type_bits,
            )
            .into(),
            vuids: vuids.memory_type,
            kind: ErrorKind::StateIncompatible,
            objects: objects.clone(),
            ..Default::default()
        }));
    }

    if memory_offset < allocation_size && requirements.size > allocation_size - memory_offset {
        errors.push(Box::new(ValidationError {
            context: "memory".into(),
            problem: format!(
                "the allocation size {} minus memory_offset {} is less than the required size {}",
                allocation_size, memory_offset, requirements.size,
            )
            .into(),
            vuids: vuids.size,
            kind: ErrorKind::StateIncompatible,
            objects: objects.clone(),
            ..Default::default()
        }));
    }

    if let Some(dedicated) = memory.allocate_info.dedicated_allocation {
        if dedicated.typed_handle() != resource.typed_handle() || memory_offset != 0 {
            errors.push(Box::new(ValidationError {
                context: "memory".into(),
                problem: format!(
                    "is a dedicated allocation for {}, but is being bound to {} at offset {}",
                    dedicated.typed_handle(),
                    resource.typed_handle(),
                    memory_offset,
                )
                .into(),
                vuids: vuids.dedicated,
                kind: ErrorKind::StateIncompatible,
                objects,
                ..Default::default()
            }));
        }
    }

    errors
}

/// Binds a non-sparse resource to `memory` and records both directions of the edge.
pub(crate) fn set_mem_binding(
    memory: &DeviceMemoryState,
    resource: &BindableRef,
    memory_offset: DeviceSize,
) {
    let bindable = resource.bindable();
    debug_assert!(!bindable.is_sparse());

    bindable.set_binding(MemoryBinding {
        memory: BoundMemory::Memory(memory.handle()),
        offset: memory_offset,
        size: bindable.requirements().size,
    });
    memory.add_bound_object(resource.typed_handle());
}

/// Records one range of a sparse resource. A null memory handle unbinds the range.
pub(crate) fn set_sparse_mem_binding(
    registry: &Registry,
    resource: &BindableRef,
    binding: SparseBinding,
) {
    let bindable = resource.bindable();
    let before = bindable.bound_memory_set();
    bindable.push_sparse_binding(binding);
    let after = bindable.bound_memory_set();

    for memory in before.iter().filter(|memory| !after.contains(memory)) {
        if let Some(memory) = registry.device_memories.get(*memory) {
            memory.remove_bound_object(resource.typed_handle());
        }
    }

    for memory in after.iter().filter(|memory| !before.contains(memory)) {
        if let Some(memory) = registry.device_memories.get(*memory) {
            memory.add_bound_object(resource.typed_handle());
        }
    }
}

/// Severs every edge between `resource` and the memory backing it.
pub(crate) fn clear_memory_object_bindings(registry: &Registry, resource: &BindableRef) {
    for memory in resource.bindable().clear() {
        if let Some(memory) = registry.device_memories.get(memory) {
            memory.remove_bound_object(resource.typed_handle());
        }
    }
}

/// Replaces the binding of every resource bound to `memory` with [`BoundMemory::Unbound`].
///
/// Returns the affected resources, so the caller can invalidate the command buffers that use them.
pub(crate) fn release_bound_objects(
    registry: &Registry,
    memory: &DeviceMemoryState,
) -> Vec<BindableRef> {
    let bound: Vec<_> = memory.state.lock().bound_objects.drain().collect();

    bound
        .into_iter()
        .filter_map(|object| registry.get_bindable(object))
        .inspect(|resource| resource.bindable().mark_memory_freed(memory.handle()))
        .collect()
}

/// Checks that `resource` is backed by live memory before it is used by `api_name`.
pub(crate) fn validate_memory_is_valid(
    resource: &BindableRef,
    api_name: &'static str,
    vuids: &'static [&'static str],
) -> Result<(), Box<ValidationError>> {
    let bindable = resource.bindable();

    if bindable.is_sparse() {
        return Ok(());
    }

    match bindable.binding() {
        Some(MemoryBinding {
            memory: BoundMemory::Unbound,
            ..
        }) => Err(Box::new(ValidationError {
            context: api_name.into(),
            problem: format!(
                "{} is used, but the memory bound to it has been freed",
                resource.typed_handle(),
            )
            .into(),
            vuids,
            kind: ErrorKind::UseAfterFree,
            objects: [resource.typed_handle()].into_iter().collect(),
            ..Default::default()
        })),
        None => Err(Box::new(ValidationError {
            context: api_name.into(),
            problem: format!(
                "{} is used without any memory bound to it",
                resource.typed_handle(),
            )
            .into(),
            vuids,
            kind: ErrorKind::MissingPrerequisite,
            objects: [resource.typed_handle()].into_iter().collect(),
            ..Default::default()
        })),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::{ShadowCopy, ShadowCorruption, SHADOW_FILL_VALUE};

    #[test]
    fn shadow_copy_guards() {
        let mut shadow = ShadowCopy::new(64, 16);
        assert_eq!(shadow.raw_mut().len(), 96);
        assert!(shadow.raw_mut().iter().all(|&b| b == SHADOW_FILL_VALUE));

        shadow.data_mut().fill(0xff);
        assert_eq!(shadow.check_guards(), Ok(()));

        shadow.raw_mut()[15] = 0;
        assert_eq!(
            shadow.check_guards(),
            Err(ShadowCorruption {
                underflow: true,
                overflow: false,
            }),
        );

        shadow.raw_mut()[15] = SHADOW_FILL_VALUE;
        shadow.raw_mut()[80] = 0;
        assert_eq!(
            shadow.check_guards(),
            Err(ShadowCorruption {
                underflow: false,
                overflow: true,
            }),
        );
    }
}
