//! Descriptor pools, descriptor sets and descriptor updates.
//!
//! A descriptor set stores one [`Descriptor`] per array element of each binding of its layout.
//! Every update bumps the set's change count, which draw-time validation uses to skip sets it has
//! already checked.

use self::layout::{
    DescriptorBindingFlags, DescriptorSetLayoutDef, DescriptorSetLayoutId, DescriptorType,
};
use crate::{
    handle::TypedHandle,
    image::ImageLayout,
    macros::vulkan_bitflags,
    registry::{impl_state_object, ObjectBase, Registry, StateObject},
    report::Severity,
    DeviceSize, ErrorKind, ValidationError,
};
use ash::vk;
use foldhash::HashSet;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod layout;

vulkan_bitflags! {
    /// Flags that control how a descriptor pool is created.
    DescriptorPoolCreateFlags = DescriptorPoolCreateFlags(u32);

    FREE_DESCRIPTOR_SET = FREE_DESCRIPTOR_SET,
    UPDATE_AFTER_BIND = UPDATE_AFTER_BIND,
}

/// Parameters of a descriptor pool.
#[derive(Clone, Debug, Default)]
pub struct DescriptorPoolCreateInfo {
    pub flags: DescriptorPoolCreateFlags,
    pub max_sets: u32,
    pub pool_sizes: Vec<(DescriptorType, u32)>,
}

/// Parameters of allocating descriptor sets from a pool.
#[derive(Clone, Debug, Default)]
pub struct DescriptorSetAllocateInfo {
    pub descriptor_pool: vk::DescriptorPool,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,

    /// The variable descriptor count of each set, if the last binding of its layout has one.
    pub variable_descriptor_counts: Vec<u32>,
}

#[derive(Debug)]
struct DescriptorPoolMut {
    available_sets: u32,
    available_descriptors: Vec<(DescriptorType, u32)>,
    sets: HashSet<vk::DescriptorSet>,
}

/// State of a `VkDescriptorPool`.
#[derive(Debug)]
pub struct DescriptorPoolState {
    base: ObjectBase,
    pub create_info: DescriptorPoolCreateInfo,
    state: Mutex<DescriptorPoolMut>,
}

impl_state_object!(DescriptorPoolState, vk::DescriptorPool);

impl DescriptorPoolState {
    pub(crate) fn new(pool: vk::DescriptorPool, create_info: DescriptorPoolCreateInfo) -> Self {
        let mut available_descriptors: Vec<(DescriptorType, u32)> = Vec::new();

        for &(ty, count) in &create_info.pool_sizes {
            match available_descriptors.iter_mut().find(|(t, _)| *t == ty) {
                Some((_, total)) => *total += count,
                None => available_descriptors.push((ty, count)),
            }
        }

        DescriptorPoolState {
            base: ObjectBase::new(TypedHandle::new(pool)),
            state: Mutex::new(DescriptorPoolMut {
                available_sets: create_info.max_sets,
                available_descriptors,
                sets: HashSet::default(),
            }),
            create_info,
        }
    }

    /// Returns the sets currently allocated from the pool.
    pub fn sets(&self) -> Vec<vk::DescriptorSet> {
        self.state.lock().sets.iter().copied().collect()
    }

    #[inline]
    pub fn available_sets(&self) -> u32 {
        self.state.lock().available_sets
    }

    pub fn available_descriptors(&self, ty: DescriptorType) -> u32 {
        self.state
            .lock()
            .available_descriptors
            .iter()
            .find(|(t, _)| *t == ty)
            .map_or(0, |&(_, count)| count)
    }

    /// Checks whether the pool has room for sets with the given layouts. Running out is only a
    /// warning, because the driver reports it with an error code.
    pub(crate) fn validate_allocate(
        &self,
        layouts: &[(&DescriptorSetLayoutDef, Option<u32>)],
    ) -> Result<(), Box<ValidationError>> {
        let state = self.state.lock();

        if layouts.len() as u64 > state.available_sets as u64 {
            return Err(Box::new(ValidationError {
                context: "descriptor_set_count".into(),
                problem: format!(
                    "{} sets are requested, but the pool only has {} left",
                    layouts.len(),
                    state.available_sets,
                )
                .into(),
                vuids: &["VUID-VkDescriptorSetAllocateInfo-descriptorSetCount-00306"],
                kind: ErrorKind::MissingPrerequisite,
                severity: Severity::Warning,
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        let mut required: Vec<(DescriptorType, u32)> = Vec::new();

        for (def, variable_count) in layouts {
            for (ty, count) in def.descriptor_counts(*variable_count) {
                match required.iter_mut().find(|(t, _)| *t == ty) {
                    Some((_, total)) => *total += count,
                    None => required.push((ty, count)),
                }
            }
        }

        for (ty, count) in required {
            let available = state
                .available_descriptors
                .iter()
                .find(|(t, _)| *t == ty)
                .map_or(0, |&(_, count)| count);

            if count > available {
                return Err(Box::new(ValidationError {
                    context: "set_layouts".into(),
                    problem: format!(
                        "{} descriptors of type {:?} are required, but the pool only has {} left",
                        count, ty, available,
                    )
                    .into(),
                    vuids: &["VUID-VkDescriptorSetAllocateInfo-descriptorPool-00307"],
                    kind: ErrorKind::MissingPrerequisite,
                    severity: Severity::Warning,
                    objects: [self.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }
        }

        Ok(())
    }

    pub(crate) fn allocate(&self, set: &DescriptorSetState) {
        let mut state = self.state.lock();
        state.available_sets = state.available_sets.saturating_sub(1);

        for (ty, count) in set.descriptor_counts() {
            if let Some((_, available)) = state
                .available_descriptors
                .iter_mut()
                .find(|(t, _)| *t == ty)
            {
                *available = available.saturating_sub(count);
            }
        }

        state.sets.insert(set.handle());
    }

    pub(crate) fn free(&self, set: &DescriptorSetState) {
        let mut state = self.state.lock();

        if !state.sets.remove(&set.handle()) {
            return;
        }

        state.available_sets += 1;

        for (ty, count) in set.descriptor_counts() {
            if let Some((_, available)) = state
                .available_descriptors
                .iter_mut()
                .find(|(t, _)| *t == ty)
            {
                *available += count;
            }
        }
    }

    /// Returns every set to the pool, and returns the sets that were allocated.
    pub(crate) fn reset(&self) -> Vec<vk::DescriptorSet> {
        let mut state = self.state.lock();
        state.available_sets = self.create_info.max_sets;
        state.available_descriptors.clear();

        for &(ty, count) in &self.create_info.pool_sizes {
            match state.available_descriptors.iter_mut().find(|(t, _)| *t == ty) {
                Some((_, total)) => *total += count,
                None => state.available_descriptors.push((ty, count)),
            }
        }

        state.sets.drain().collect()
    }
}

/// The contents of one array element of a binding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Descriptor {
    /// Never written.
    #[default]
    Empty,
    Sampler(vk::Sampler),
    Image {
        image_view: vk::ImageView,
        image_layout: ImageLayout,

        /// Null unless the descriptor is a combined image sampler.
        sampler: vk::Sampler,
    },
    TexelBuffer(vk::BufferView),
    Buffer {
        buffer: vk::Buffer,
        offset: DeviceSize,
        range: DeviceSize,
    },
    InlineUniformBlock,
    AccelerationStructure(vk::AccelerationStructureKHR),
}

impl Descriptor {
    /// Returns the objects that the descriptor refers to.
    pub fn referenced_objects(&self) -> SmallVec<[TypedHandle; 2]> {
        let mut objects: SmallVec<[TypedHandle; 2]> = SmallVec::new();

        match *self {
            Descriptor::Empty | Descriptor::InlineUniformBlock => (),
            Descriptor::Sampler(sampler) => objects.push(TypedHandle::new(sampler)),
            Descriptor::Image {
                image_view,
                sampler,
                ..
            } => {
                objects.push(TypedHandle::new(image_view));

                if sampler != vk::Sampler::null() {
                    objects.push(TypedHandle::new(sampler));
                }
            }
            Descriptor::TexelBuffer(buffer_view) => objects.push(TypedHandle::new(buffer_view)),
            Descriptor::Buffer { buffer, .. } => objects.push(TypedHandle::new(buffer)),
            Descriptor::AccelerationStructure(acceleration_structure) => {
                objects.push(TypedHandle::new(acceleration_structure))
            }
        }

        objects.retain(|object| !object.is_null());

        objects
    }
}

/// A range of a buffer written to a buffer descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorBufferInfo {
    pub buffer: vk::Buffer,
    pub offset: DeviceSize,
    pub range: DeviceSize,
}

/// An image view, and optionally a sampler, written to an image descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorImageInfo {
    pub sampler: vk::Sampler,
    pub image_view: vk::ImageView,
    pub image_layout: ImageLayout,
}

/// The elements written by a [`WriteDescriptorSet`].
#[derive(Clone, Debug)]
pub enum WriteDescriptorSetElements {
    Buffer(SmallVec<[DescriptorBufferInfo; 1]>),
    BufferView(SmallVec<[vk::BufferView; 1]>),
    Image(SmallVec<[DescriptorImageInfo; 1]>),
    Sampler(SmallVec<[vk::Sampler; 1]>),

    /// The number of bytes written.
    InlineUniformBlock(u32),
    AccelerationStructure(SmallVec<[vk::AccelerationStructureKHR; 1]>),
}

impl WriteDescriptorSetElements {
    /// Returns the number of descriptors written. For inline uniform blocks this is the number
    /// of bytes.
    #[inline]
    pub fn len(&self) -> u32 {
        match self {
            Self::Buffer(elements) => elements.len() as u32,
            Self::BufferView(elements) => elements.len() as u32,
            Self::Image(elements) => elements.len() as u32,
            Self::Sampler(elements) => elements.len() as u32,
            Self::InlineUniformBlock(size) => *size,
            Self::AccelerationStructure(elements) => elements.len() as u32,
        }
    }

    fn descriptor(&self, index: usize) -> Descriptor {
        match self {
            Self::Buffer(elements) => Descriptor::Buffer {
                buffer: elements[index].buffer,
                offset: elements[index].offset,
                range: elements[index].range,
            },
            Self::BufferView(elements) => Descriptor::TexelBuffer(elements[index]),
            Self::Image(elements) => Descriptor::Image {
                image_view: elements[index].image_view,
                image_layout: elements[index].image_layout,
                sampler: elements[index].sampler,
            },
            Self::Sampler(elements) => Descriptor::Sampler(elements[index]),
            Self::InlineUniformBlock(_) => Descriptor::InlineUniformBlock,
            Self::AccelerationStructure(elements) => {
                Descriptor::AccelerationStructure(elements[index])
            }
        }
    }

    fn matches_type(&self, ty: DescriptorType) -> bool {
        match self {
            Self::Buffer(_) => ty.is_buffer(),
            Self::BufferView(_) => matches!(
                ty,
                DescriptorType::UniformTexelBuffer | DescriptorType::StorageTexelBuffer
            ),
            Self::Image(_) => ty.is_image(),
            Self::Sampler(_) => ty == DescriptorType::Sampler,
            Self::InlineUniformBlock(_) => ty == DescriptorType::InlineUniformBlock,
            Self::AccelerationStructure(_) => ty == DescriptorType::AccelerationStructure,
        }
    }
}

/// A write to one binding of a descriptor set.
#[derive(Clone, Debug)]
pub struct WriteDescriptorSet {
    /// Ignored for push descriptors.
    pub dst_set: vk::DescriptorSet,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_type: DescriptorType,
    pub elements: WriteDescriptorSetElements,
}

/// A copy between two descriptor sets.
#[derive(Clone, Copy, Debug)]
pub struct CopyDescriptorSet {
    pub src_set: vk::DescriptorSet,
    pub src_binding: u32,
    pub src_array_element: u32,
    pub dst_set: vk::DescriptorSet,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_count: u32,
}

/// State of a `VkDescriptorSet`, or of the set that push descriptors write into.
#[derive(Debug)]
pub struct DescriptorSetState {
    base: ObjectBase,

    /// Null for push descriptor sets.
    pub pool: vk::DescriptorPool,
    pub layout_id: DescriptorSetLayoutId,
    pub variable_descriptor_count: Option<u32>,
    change_count: AtomicU64,
    descriptors: RwLock<Vec<Vec<Descriptor>>>,
}

impl_state_object!(DescriptorSetState, vk::DescriptorSet);

impl DescriptorSetState {
    pub(crate) fn new(
        set: vk::DescriptorSet,
        pool: vk::DescriptorPool,
        layout_id: DescriptorSetLayoutId,
        variable_descriptor_count: Option<u32>,
    ) -> Self {
        let descriptors = layout_id
            .bindings()
            .iter()
            .map(|binding| {
                let count = match variable_descriptor_count {
                    Some(count)
                        if binding
                            .binding_flags
                            .intersects(DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT) =>
                    {
                        count
                    }
                    _ => binding.descriptor_count,
                };

                if binding.descriptor_type == DescriptorType::InlineUniformBlock {
                    vec![Descriptor::Empty; 1]
                } else {
                    vec![Descriptor::Empty; count as usize]
                }
            })
            .collect();

        DescriptorSetState {
            base: ObjectBase::new(TypedHandle::new(set)),
            pool,
            layout_id,
            variable_descriptor_count,
            change_count: AtomicU64::new(0),
            descriptors: RwLock::new(descriptors),
        }
    }

    /// Creates the set that push descriptors are written into.
    pub(crate) fn new_push(layout_id: DescriptorSetLayoutId) -> Self {
        Self::new(
            vk::DescriptorSet::null(),
            vk::DescriptorPool::null(),
            layout_id,
            None,
        )
    }

    #[inline]
    pub fn is_push_descriptor(&self) -> bool {
        self.pool == vk::DescriptorPool::null()
    }

    #[inline]
    pub fn dynamic_descriptor_count(&self) -> u32 {
        self.layout_id.dynamic_descriptor_count()
    }

    /// Returns a counter that changes on every update of the set.
    #[inline]
    pub fn change_count(&self) -> u64 {
        self.change_count.load(Ordering::Acquire)
    }

    pub(crate) fn descriptor_counts(&self) -> Vec<(DescriptorType, u32)> {
        self.layout_id
            .descriptor_counts(self.variable_descriptor_count)
    }

    /// Returns the descriptors of `binding`.
    pub fn descriptors(&self, binding: u32) -> Option<Vec<Descriptor>> {
        let index = self.layout_id.binding_index(binding)?;

        Some(self.descriptors.read()[index].clone())
    }

    /// Returns every object that some descriptor of the set refers to.
    pub fn referenced_objects(&self) -> Vec<TypedHandle> {
        let descriptors = self.descriptors.read();
        let mut objects = Vec::new();

        for descriptor in descriptors.iter().flatten() {
            for object in descriptor.referenced_objects() {
                if !objects.contains(&object) {
                    objects.push(object);
                }
            }
        }

        objects
    }

    /// Returns whether every binding in `bindings` may be updated while the set is in use.
    pub(crate) fn bindings_update_after_bind(&self, bindings: &[u32]) -> bool {
        bindings.iter().all(|&binding| {
            self.layout_id.binding(binding).is_some_and(|def| {
                def.binding_flags.intersects(
                    DescriptorBindingFlags::UPDATE_AFTER_BIND
                        | DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING,
                )
            })
        })
    }

    pub(crate) fn validate_write(
        &self,
        write: &WriteDescriptorSet,
        registry: &Registry,
    ) -> Result<(), Box<ValidationError>> {
        let objects: SmallVec<[TypedHandle; 2]> = [self.typed_handle()].into_iter().collect();

        let Some(def) = self.layout_id.binding(write.dst_binding) else {
            return Err(Box::new(ValidationError {
                context: "dst_binding".into(),
                problem: format!(
                    "binding {} does not exist in the layout of the set",
                    write.dst_binding,
                )
                .into(),
                vuids: &["VUID-VkWriteDescriptorSet-dstBinding-00315"],
                kind: ErrorKind::ParameterOutOfRange,
                objects,
                ..Default::default()
            }));
        };

        if def.descriptor_type != write.descriptor_type
            || !write.elements.matches_type(def.descriptor_type)
        {
            return Err(Box::new(ValidationError {
                context: "descriptor_type".into(),
                problem: format!(
                    "{:?} does not match the type of binding {} ({:?})",
                    write.descriptor_type, write.dst_binding, def.descriptor_type,
                )
                .into(),
                vuids: &["VUID-VkWriteDescriptorSet-descriptorType-00319"],
                kind: ErrorKind::StateIncompatible,
                objects,
                ..Default::default()
            }));
        }

        let count = write.elements.len();

        if count == 0 {
            return Err(Box::new(ValidationError {
                context: "elements".into(),
                problem: "is empty".into(),
                vuids: &["VUID-VkWriteDescriptorSet-descriptorCount-arraylength"],
                kind: ErrorKind::ParameterOutOfRange,
                objects,
                ..Default::default()
            }));
        }

        let capacity = self
            .layout_id
            .binding_index(write.dst_binding)
            .map_or(0, |index| self.descriptors.read()[index].len() as u32);
        let capacity = if def.descriptor_type == DescriptorType::InlineUniformBlock {
            def.descriptor_count
        } else {
            capacity
        };

        if write.dst_array_element as u64 + count as u64 > capacity as u64 {
            return Err(Box::new(ValidationError {
                context: "dst_array_element".into(),
                problem: format!(
                    "dst_array_element ({}) + the number of elements ({}) is greater than the \
                    descriptor count of binding {} ({})",
                    write.dst_array_element, count, write.dst_binding, capacity,
                )
                .into(),
                vuids: &["VUID-VkWriteDescriptorSet-dstArrayElement-00321"],
                kind: ErrorKind::ParameterOutOfRange,
                objects,
                ..Default::default()
            }));
        }

        if def.has_immutable_samplers && def.descriptor_type == DescriptorType::Sampler {
            if !self.is_push_descriptor() {
                return Err(Box::new(ValidationError {
                    context: "dst_binding".into(),
                    problem: "is a sampler binding with immutable samplers, and cannot be \
                        written"
                        .into(),
                    vuids: &["VUID-VkWriteDescriptorSet-descriptorType-02752"],
                    kind: ErrorKind::StateIncompatible,
                    objects,
                    ..Default::default()
                }));
            }
        }

        for index in 0..count as usize {
            if matches!(write.elements, WriteDescriptorSetElements::InlineUniformBlock(_)) {
                break;
            }

            let descriptor = write.elements.descriptor(index);

            for object in descriptor.referenced_objects() {
                if registry.get_base(object).is_none() {
                    return Err(Box::new(ValidationError {
                        context: format!("elements[{}]", index).into(),
                        problem: format!("refers to {}, which is not a live object", object)
                            .into(),
                        vuids: match object.object_type {
                            crate::handle::ObjectType::ImageView => {
                                &["VUID-VkDescriptorImageInfo-imageView-parameter"]
                            }
                            crate::handle::ObjectType::Sampler => {
                                &["VUID-VkWriteDescriptorSet-descriptorType-00325"]
                            }
                            crate::handle::ObjectType::Buffer => {
                                &["VUID-VkDescriptorBufferInfo-buffer-parameter"]
                            }
                            crate::handle::ObjectType::BufferView => {
                                &["VUID-VkWriteDescriptorSet-descriptorType-02994"]
                            }
                            _ => &["VUID-VkWriteDescriptorSetAccelerationStructureKHR-pAccelerationStructures-parameter"],
                        },
                        kind: ErrorKind::UseAfterFree,
                        objects: [self.typed_handle(), object].into_iter().collect(),
                        ..Default::default()
                    }));
                }
            }

            if let Descriptor::Buffer { buffer, offset, range } = descriptor {
                if let Some(buffer) = registry.buffers.get(buffer) {
                    let size = buffer.size();

                    if offset >= size
                        || (range != vk::WHOLE_SIZE && (range == 0 || offset + range > size))
                    {
                        return Err(Box::new(ValidationError {
                            context: format!("elements[{}]", index).into(),
                            problem: format!(
                                "the range {}..+{} is not contained in the buffer (size {})",
                                offset, range, size,
                            )
                            .into(),
                            vuids: &[
                                "VUID-VkDescriptorBufferInfo-offset-00340",
                                "VUID-VkDescriptorBufferInfo-range-00342",
                            ],
                            kind: ErrorKind::ParameterOutOfRange,
                            objects: [self.typed_handle(), buffer.typed_handle()]
                                .into_iter()
                                .collect(),
                            ..Default::default()
                        }));
                    }
                }
            }
        }

        Ok(())
    }

    /// Applies a write that passed validation. Out-of-range elements are dropped.
    pub(crate) fn apply_write(&self, write: &WriteDescriptorSet) {
        let Some(binding_index) = self.layout_id.binding_index(write.dst_binding) else {
            return;
        };

        {
            let mut descriptors = self.descriptors.write();
            let binding = &mut descriptors[binding_index];

            if let WriteDescriptorSetElements::InlineUniformBlock(_) = write.elements {
                binding[0] = Descriptor::InlineUniformBlock;
            } else {
                for index in 0..write.elements.len() as usize {
                    let element = write.dst_array_element as usize + index;

                    if let Some(slot) = binding.get_mut(element) {
                        *slot = write.elements.descriptor(index);
                    }
                }
            }
        }

        self.change_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn validate_copy(
        src: &DescriptorSetState,
        dst: &DescriptorSetState,
        copy: &CopyDescriptorSet,
    ) -> Result<(), Box<ValidationError>> {
        let objects: SmallVec<[TypedHandle; 2]> =
            [dst.typed_handle(), src.typed_handle()].into_iter().collect();

        let Some(src_def) = src.layout_id.binding(copy.src_binding) else {
            return Err(Box::new(ValidationError {
                context: "src_binding".into(),
                problem: format!("binding {} does not exist in the source set", copy.src_binding)
                    .into(),
                vuids: &["VUID-VkCopyDescriptorSet-srcBinding-00345"],
                kind: ErrorKind::ParameterOutOfRange,
                objects,
                ..Default::default()
            }));
        };

        let Some(dst_def) = dst.layout_id.binding(copy.dst_binding) else {
            return Err(Box::new(ValidationError {
                context: "dst_binding".into(),
                problem: format!(
                    "binding {} does not exist in the destination set",
                    copy.dst_binding,
                )
                .into(),
                vuids: &["VUID-VkCopyDescriptorSet-dstBinding-00347"],
                kind: ErrorKind::ParameterOutOfRange,
                objects,
                ..Default::default()
            }));
        };

        if src_def.descriptor_type != dst_def.descriptor_type {
            return Err(Box::new(ValidationError {
                problem: format!(
                    "the source binding has type {:?}, but the destination binding has type {:?}",
                    src_def.descriptor_type, dst_def.descriptor_type,
                )
                .into(),
                vuids: &["VUID-VkCopyDescriptorSet-dstBinding-02632"],
                kind: ErrorKind::StateIncompatible,
                objects,
                ..Default::default()
            }));
        }

        let src_len = src.binding_len(copy.src_binding);
        let dst_len = dst.binding_len(copy.dst_binding);

        if copy.src_array_element as u64 + copy.descriptor_count as u64 > src_len as u64 {
            return Err(Box::new(ValidationError {
                context: "src_array_element".into(),
                problem: "src_array_element + descriptor_count is greater than the descriptor \
                    count of the source binding"
                    .into(),
                vuids: &["VUID-VkCopyDescriptorSet-srcArrayElement-00346"],
                kind: ErrorKind::ParameterOutOfRange,
                objects,
                ..Default::default()
            }));
        }

        if copy.dst_array_element as u64 + copy.descriptor_count as u64 > dst_len as u64 {
            return Err(Box::new(ValidationError {
                context: "dst_array_element".into(),
                problem: "dst_array_element + descriptor_count is greater than the descriptor \
                    count of the destination binding"
                    .into(),
                vuids: &["VUID-VkCopyDescriptorSet-dstArrayElement-00348"],
                kind: ErrorKind::ParameterOutOfRange,
                objects,
                ..Default::default()
            }));
        }

        Ok(())
    }

    pub(crate) fn apply_copy(
        src: &DescriptorSetState,
        dst: &DescriptorSetState,
        copy: &CopyDescriptorSet,
    ) {
        let Some(copied) = src.descriptors(copy.src_binding) else {
            return;
        };
        let Some(dst_index) = dst.layout_id.binding_index(copy.dst_binding) else {
            return;
        };

        {
            let mut descriptors = dst.descriptors.write();

            for offset in 0..copy.descriptor_count as usize {
                let (Some(&descriptor), Some(slot)) = (
                    copied.get(copy.src_array_element as usize + offset),
                    descriptors[dst_index].get_mut(copy.dst_array_element as usize + offset),
                ) else {
                    break;
                };
                *slot = descriptor;
            }
        }

        dst.change_count.fetch_add(1, Ordering::AcqRel);
    }

    fn binding_len(&self, binding: u32) -> u32 {
        self.layout_id
            .binding_index(binding)
            .map_or(0, |index| self.descriptors.read()[index].len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        layout::{
            DescriptorSetLayoutBinding, DescriptorSetLayoutCreateInfo, DescriptorSetLayoutDef,
            DescriptorSetLayoutDict, DescriptorType,
        },
        CopyDescriptorSet, Descriptor, DescriptorBufferInfo, DescriptorPoolCreateInfo,
        DescriptorPoolState, DescriptorSetState, WriteDescriptorSet, WriteDescriptorSetElements,
    };
    use crate::{
        registry::{Registry, StateObject},
        report::Severity,
        shader::ShaderStages,
    };
    use ash::vk::{self, Handle};
    use smallvec::smallvec;

    fn layout() -> super::layout::DescriptorSetLayoutId {
        DescriptorSetLayoutDict::new().intern(DescriptorSetLayoutDef::new(
            &DescriptorSetLayoutCreateInfo {
                bindings: vec![
                    DescriptorSetLayoutBinding::new(
                        0,
                        DescriptorType::UniformBuffer,
                        2,
                        ShaderStages::VERTEX,
                    ),
                    DescriptorSetLayoutBinding::new(
                        1,
                        DescriptorType::StorageBuffer,
                        1,
                        ShaderStages::VERTEX,
                    ),
                ],
                ..Default::default()
            },
        ))
    }

    #[test]
    fn pool_accounting() {
        let pool = DescriptorPoolState::new(
            vk::DescriptorPool::from_raw(1),
            DescriptorPoolCreateInfo {
                max_sets: 1,
                pool_sizes: vec![
                    (DescriptorType::UniformBuffer, 2),
                    (DescriptorType::StorageBuffer, 1),
                ],
                ..Default::default()
            },
        );
        let layout = layout();

        assert!(pool.validate_allocate(&[(&*layout, None)]).is_ok());
        let set = DescriptorSetState::new(
            vk::DescriptorSet::from_raw(2),
            vk::DescriptorPool::from_raw(1),
            layout.clone(),
            None,
        );
        pool.allocate(&set);

        let error = pool.validate_allocate(&[(&*layout, None)]).unwrap_err();
        assert_eq!(error.severity, Severity::Warning);
        assert_eq!(pool.available_descriptors(DescriptorType::UniformBuffer), 0);

        pool.free(&set);
        assert_eq!(pool.available_sets(), 1);
        assert_eq!(pool.available_descriptors(DescriptorType::UniformBuffer), 2);
    }

    #[test]
    fn write_bumps_change_count() {
        let registry = Registry::default();
        let set = DescriptorSetState::new(
            vk::DescriptorSet::from_raw(2),
            vk::DescriptorPool::from_raw(1),
            layout(),
            None,
        );
        let write = WriteDescriptorSet {
            dst_set: set.handle(),
            dst_binding: 0,
            dst_array_element: 1,
            descriptor_type: DescriptorType::UniformBuffer,
            elements: WriteDescriptorSetElements::Buffer(smallvec![DescriptorBufferInfo {
                buffer: vk::Buffer::null(),
                offset: 0,
                range: vk::WHOLE_SIZE,
            }]),
        };

        assert!(set.validate_write(&write, &registry).is_ok());
        set.apply_write(&write);
        assert_eq!(set.change_count(), 1);
        assert_eq!(set.descriptors(0).unwrap()[0], Descriptor::Empty);

        let overflow = WriteDescriptorSet {
            dst_array_element: 2,
            ..write.clone()
        };
        assert_eq!(
            set.validate_write(&overflow, &registry).unwrap_err().vuid(),
            "VUID-VkWriteDescriptorSet-dstArrayElement-00321",
        );

        let wrong_type = WriteDescriptorSet {
            dst_binding: 1,
            ..write
        };
        assert_eq!(
            set.validate_write(&wrong_type, &registry).unwrap_err().vuid(),
            "VUID-VkWriteDescriptorSet-descriptorType-00319",
        );
    }

    #[test]
    fn copy_checks_types() {
        let layout = layout();
        let src = DescriptorSetState::new(
            vk::DescriptorSet::from_raw(2),
            vk::DescriptorPool::from_raw(1),
            layout.clone(),
            None,
        );
        let dst = DescriptorSetState::new(
            vk::DescriptorSet::from_raw(3),
            vk::DescriptorPool::from_raw(1),
            layout,
            None,
        );
        let copy = CopyDescriptorSet {
            src_set: src.handle(),
            src_binding: 0,
            src_array_element: 0,
            dst_set: dst.handle(),
            dst_binding: 1,
            dst_array_element: 0,
            descriptor_count: 1,
        };
        assert_eq!(
            DescriptorSetState::validate_copy(&src, &dst, &copy)
                .unwrap_err()
                .vuid(),
            "VUID-VkCopyDescriptorSet-dstBinding-02632",
        );

        let copy = CopyDescriptorSet {
            dst_binding: 0,
            descriptor_count: 2,
            ..copy
        };
        assert!(DescriptorSetState::validate_copy(&src, &dst, &copy).is_ok());
        DescriptorSetState::apply_copy(&src, &dst, &copy);
        assert_eq!(dst.change_count(), 1);
    }
}
