//! Descriptor set layouts, and their canonical interned form.
//!
//! Two descriptor set layouts created from structurally identical create infos are
//! interchangeable, even though they have different handles. Each layout is therefore reduced to a
//! [`DescriptorSetLayoutDef`] and interned; the resulting [`DescriptorSetLayoutId`] compares by
//! pointer.

use crate::{
    handle::TypedHandle,
    intern::{InternTable, Interned},
    macros::{vulkan_bitflags, vulkan_enum},
    registry::{impl_state_object, ObjectBase},
    shader::ShaderStages,
    ErrorKind, ValidationError,
};
use ash::vk;

vulkan_enum! {
    /// Describes what kind of resource may later be bound to a descriptor.
    DescriptorType = DescriptorType(i32);

    Sampler = SAMPLER,
    CombinedImageSampler = COMBINED_IMAGE_SAMPLER,
    SampledImage = SAMPLED_IMAGE,
    StorageImage = STORAGE_IMAGE,
    UniformTexelBuffer = UNIFORM_TEXEL_BUFFER,
    StorageTexelBuffer = STORAGE_TEXEL_BUFFER,
    UniformBuffer = UNIFORM_BUFFER,
    StorageBuffer = STORAGE_BUFFER,
    UniformBufferDynamic = UNIFORM_BUFFER_DYNAMIC,
    StorageBufferDynamic = STORAGE_BUFFER_DYNAMIC,
    InputAttachment = INPUT_ATTACHMENT,
    InlineUniformBlock = INLINE_UNIFORM_BLOCK,
    AccelerationStructure = ACCELERATION_STRUCTURE_KHR,
}

impl DescriptorType {
    /// Returns whether descriptors of this type take a dynamic offset when bound.
    #[inline]
    pub fn is_dynamic(self) -> bool {
        matches!(
            self,
            DescriptorType::UniformBufferDynamic | DescriptorType::StorageBufferDynamic
        )
    }

    /// Returns whether descriptors of this type refer to an image view.
    #[inline]
    pub fn is_image(self) -> bool {
        matches!(
            self,
            DescriptorType::CombinedImageSampler
                | DescriptorType::SampledImage
                | DescriptorType::StorageImage
                | DescriptorType::InputAttachment
        )
    }

    /// Returns whether descriptors of this type refer to a buffer range.
    #[inline]
    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            DescriptorType::UniformBuffer
                | DescriptorType::StorageBuffer
                | DescriptorType::UniformBufferDynamic
                | DescriptorType::StorageBufferDynamic
        )
    }
}

vulkan_bitflags! {
    /// Flags that control how a descriptor set layout is created.
    DescriptorSetLayoutCreateFlags = DescriptorSetLayoutCreateFlags(u32);

    UPDATE_AFTER_BIND_POOL = UPDATE_AFTER_BIND_POOL,
    PUSH_DESCRIPTOR = PUSH_DESCRIPTOR_KHR,
}

vulkan_bitflags! {
    /// Flags that control how a binding in a descriptor set layout behaves.
    DescriptorBindingFlags = DescriptorBindingFlags(u32);

    UPDATE_AFTER_BIND = UPDATE_AFTER_BIND,
    UPDATE_UNUSED_WHILE_PENDING = UPDATE_UNUSED_WHILE_PENDING,
    PARTIALLY_BOUND = PARTIALLY_BOUND,
    VARIABLE_DESCRIPTOR_COUNT = VARIABLE_DESCRIPTOR_COUNT,
}

/// One binding of a descriptor set layout, as given at creation.
#[derive(Clone, Debug)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    pub descriptor_count: u32,
    pub stages: ShaderStages,
    pub immutable_samplers: Vec<vk::Sampler>,
    pub binding_flags: DescriptorBindingFlags,
}

impl DescriptorSetLayoutBinding {
    /// Returns a binding of `descriptor_count` descriptors of `descriptor_type`.
    #[inline]
    pub fn new(
        binding: u32,
        descriptor_type: DescriptorType,
        descriptor_count: u32,
        stages: ShaderStages,
    ) -> Self {
        DescriptorSetLayoutBinding {
            binding,
            descriptor_type,
            descriptor_count,
            stages,
            immutable_samplers: Vec::new(),
            binding_flags: DescriptorBindingFlags::empty(),
        }
    }
}

/// Parameters of a descriptor set layout.
#[derive(Clone, Debug, Default)]
pub struct DescriptorSetLayoutCreateInfo {
    pub flags: DescriptorSetLayoutCreateFlags,
    pub bindings: Vec<DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutCreateInfo {
    pub(crate) fn validate(&self, max_push_descriptors: u32) -> Result<(), Box<ValidationError>> {
        let &Self { flags, ref bindings } = self;

        let highest_binding_num = bindings.iter().map(|binding| binding.binding).max();
        let mut total_descriptor_count = 0;
        let mut update_after_bind_binding = None;
        let mut buffer_dynamic_binding = None;

        for (index, binding) in bindings.iter().enumerate() {
            let &DescriptorSetLayoutBinding {
                binding: binding_num,
                descriptor_type,
                descriptor_count,
                stages: _,
                ref immutable_samplers,
                binding_flags,
            } = binding;

            if bindings[..index]
                .iter()
                .any(|other| other.binding == binding_num)
            {
                return Err(Box::new(ValidationError {
                    context: format!("bindings[{}].binding", index).into(),
                    problem: format!("binding number {} appears more than once", binding_num)
                        .into(),
                    vuids: &["VUID-VkDescriptorSetLayoutCreateInfo-binding-00279"],
                    kind: ErrorKind::ParameterOutOfRange,
                    ..Default::default()
                }));
            }

            if !immutable_samplers.is_empty()
                && immutable_samplers.len() != descriptor_count as usize
            {
                return Err(Box::new(ValidationError {
                    context: format!("bindings[{}].immutable_samplers", index).into(),
                    problem: "is not empty, and its length does not equal `descriptor_count`"
                        .into(),
                    vuids: &["VUID-VkDescriptorSetLayoutBinding-descriptorType-00282"],
                    kind: ErrorKind::ParameterOutOfRange,
                    ..Default::default()
                }));
            }

            total_descriptor_count += descriptor_count;

            if flags.intersects(DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR) {
                if matches!(
                    descriptor_type,
                    DescriptorType::UniformBufferDynamic
                        | DescriptorType::StorageBufferDynamic
                        | DescriptorType::InlineUniformBlock
                ) {
                    return Err(Box::new(ValidationError {
                        problem: format!(
                            "`flags` contains `PUSH_DESCRIPTOR`, and `bindings[{}].descriptor_type` \
                            is `UniformBufferDynamic`, `StorageBufferDynamic` or \
                            `InlineUniformBlock`",
                            index,
                        )
                        .into(),
                        vuids: &[
                            "VUID-VkDescriptorSetLayoutCreateInfo-flags-00280",
                            "VUID-VkDescriptorSetLayoutCreateInfo-flags-02208",
                        ],
                        ..Default::default()
                    }));
                }

                if binding_flags.intersects(
                    DescriptorBindingFlags::UPDATE_AFTER_BIND
                        | DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING
                        | DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT,
                ) {
                    return Err(Box::new(ValidationError {
                        problem: format!(
                            "`flags` contains `PUSH_DESCRIPTOR`, and `bindings[{}].binding_flags` \
                            contains `UPDATE_AFTER_BIND`, `UPDATE_UNUSED_WHILE_PENDING` or \
                            `VARIABLE_DESCRIPTOR_COUNT`",
                            index,
                        )
                        .into(),
                        vuids: &["VUID-VkDescriptorSetLayoutBindingFlagsCreateInfo-flags-03003"],
                        ..Default::default()
                    }));
                }
            }

            if binding_flags.intersects(DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT)
                && Some(binding_num) != highest_binding_num
            {
                return Err(Box::new(ValidationError {
                    problem: format!(
                        "`bindings[{}].binding_flags` contains `VARIABLE_DESCRIPTOR_COUNT`, but \
                        {} is not the highest binding number",
                        index, binding_num,
                    )
                    .into(),
                    vuids: &[
                        "VUID-VkDescriptorSetLayoutBindingFlagsCreateInfo-pBindingFlags-03004",
                    ],
                    ..Default::default()
                }));
            }

            if binding_flags.intersects(DescriptorBindingFlags::UPDATE_AFTER_BIND) {
                if !flags.intersects(DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL) {
                    return Err(Box::new(ValidationError {
                        problem: format!(
                            "`bindings[{}].binding_flags` contains `UPDATE_AFTER_BIND`, but \
                            `flags` does not contain `UPDATE_AFTER_BIND_POOL`",
                            index,
                        )
                        .into(),
                        vuids: &["VUID-VkDescriptorSetLayoutCreateInfo-flags-03000"],
                        ..Default::default()
                    }));
                }

                update_after_bind_binding.get_or_insert(binding_num);
            }

            if descriptor_type.is_dynamic() {
                buffer_dynamic_binding.get_or_insert(binding_num);
            }
        }

        if flags.intersects(DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR)
            && total_descriptor_count > max_push_descriptors
        {
            return Err(Box::new(ValidationError {
                problem: format!(
                    "`flags` contains `PUSH_DESCRIPTOR`, and the total number of descriptors \
                    ({}) exceeds the `max_push_descriptors` limit ({})",
                    total_descriptor_count, max_push_descriptors,
                )
                .into(),
                vuids: &["VUID-VkDescriptorSetLayoutCreateInfo-flags-00281"],
                ..Default::default()
            }));
        }

        if let (Some(update_after_bind_binding), Some(buffer_dynamic_binding)) =
            (update_after_bind_binding, buffer_dynamic_binding)
        {
            return Err(Box::new(ValidationError {
                problem: format!(
                    "binding {} has the `UPDATE_AFTER_BIND` flag, and binding {} is a dynamic \
                    buffer",
                    update_after_bind_binding, buffer_dynamic_binding,
                )
                .into(),
                vuids: &["VUID-VkDescriptorSetLayoutCreateInfo-descriptorType-03001"],
                ..Default::default()
            }));
        }

        Ok(())
    }
}

/// The canonical form of one binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutBindingDef {
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    pub descriptor_count: u32,
    pub stages: ShaderStages,
    pub has_immutable_samplers: bool,
    pub binding_flags: DescriptorBindingFlags,
}

/// The canonical form of a descriptor set layout, with bindings sorted by binding number.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutDef {
    flags: DescriptorSetLayoutCreateFlags,
    bindings: Vec<DescriptorSetLayoutBindingDef>,
}

/// The interned identity of a descriptor set layout's contents.
pub type DescriptorSetLayoutId = Interned<DescriptorSetLayoutDef>;

impl DescriptorSetLayoutDef {
    pub fn new(create_info: &DescriptorSetLayoutCreateInfo) -> Self {
        let mut bindings: Vec<_> = create_info
            .bindings
            .iter()
            .map(|binding| DescriptorSetLayoutBindingDef {
                binding: binding.binding,
                descriptor_type: binding.descriptor_type,
                descriptor_count: binding.descriptor_count,
                stages: binding.stages,
                has_immutable_samplers: !binding.immutable_samplers.is_empty(),
                binding_flags: binding.binding_flags,
            })
            .collect();
        bindings.sort_by_key(|binding| binding.binding);

        DescriptorSetLayoutDef {
            flags: create_info.flags,
            bindings,
        }
    }

    #[inline]
    pub fn flags(&self) -> DescriptorSetLayoutCreateFlags {
        self.flags
    }

    #[inline]
    pub fn bindings(&self) -> &[DescriptorSetLayoutBindingDef] {
        &self.bindings
    }

    /// Returns the position of `binding` in [`bindings`](Self::bindings).
    #[inline]
    pub fn binding_index(&self, binding: u32) -> Option<usize> {
        self.bindings
            .binary_search_by_key(&binding, |def| def.binding)
            .ok()
    }

    #[inline]
    pub fn binding(&self, binding: u32) -> Option<&DescriptorSetLayoutBindingDef> {
        self.binding_index(binding).map(|index| &self.bindings[index])
    }

    #[inline]
    pub fn is_push_descriptor(&self) -> bool {
        self.flags
            .intersects(DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR)
    }

    /// Returns the number of dynamic offsets a set with this layout takes when bound.
    pub fn dynamic_descriptor_count(&self) -> u32 {
        self.bindings
            .iter()
            .filter(|binding| binding.descriptor_type.is_dynamic())
            .map(|binding| binding.descriptor_count)
            .sum()
    }

    /// Returns the number of descriptors of each type, for pool accounting.
    pub fn descriptor_counts(&self, variable_count: Option<u32>) -> Vec<(DescriptorType, u32)> {
        let mut counts: Vec<(DescriptorType, u32)> = Vec::new();

        for binding in &self.bindings {
            let count = match variable_count {
                Some(variable_count)
                    if binding
                        .binding_flags
                        .intersects(DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT) =>
                {
                    variable_count
                }
                _ => binding.descriptor_count,
            };

            match counts
                .iter_mut()
                .find(|(ty, _)| *ty == binding.descriptor_type)
            {
                Some((_, total)) => *total += count,
                None => counts.push((binding.descriptor_type, count)),
            }
        }

        counts
    }
}

/// The interning table for descriptor set layouts.
pub(crate) type DescriptorSetLayoutDict = InternTable<DescriptorSetLayoutDef>;

/// State of a `VkDescriptorSetLayout`.
#[derive(Debug)]
pub struct DescriptorSetLayoutState {
    base: ObjectBase,
    pub layout_id: DescriptorSetLayoutId,
}

impl_state_object!(DescriptorSetLayoutState, vk::DescriptorSetLayout);

impl DescriptorSetLayoutState {
    pub(crate) fn new(layout: vk::DescriptorSetLayout, layout_id: DescriptorSetLayoutId) -> Self {
        DescriptorSetLayoutState {
            base: ObjectBase::new(TypedHandle::new(layout)),
            layout_id,
        }
    }

    #[inline]
    pub fn def(&self) -> &DescriptorSetLayoutDef {
        &self.layout_id
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DescriptorBindingFlags, DescriptorSetLayoutBinding, DescriptorSetLayoutCreateFlags,
        DescriptorSetLayoutCreateInfo, DescriptorSetLayoutDef, DescriptorSetLayoutDict,
        DescriptorType,
    };
    use crate::shader::ShaderStages;

    fn uniform(binding: u32) -> DescriptorSetLayoutBinding {
        DescriptorSetLayoutBinding::new(
            binding,
            DescriptorType::UniformBuffer,
            1,
            ShaderStages::VERTEX,
        )
    }

    #[test]
    fn order_does_not_matter() {
        let dict = DescriptorSetLayoutDict::new();
        let a = dict.intern(DescriptorSetLayoutDef::new(&DescriptorSetLayoutCreateInfo {
            bindings: vec![uniform(0), uniform(3)],
            ..Default::default()
        }));
        let b = dict.intern(DescriptorSetLayoutDef::new(&DescriptorSetLayoutCreateInfo {
            bindings: vec![uniform(3), uniform(0)],
            ..Default::default()
        }));
        let c = dict.intern(DescriptorSetLayoutDef::new(&DescriptorSetLayoutCreateInfo {
            bindings: vec![uniform(0)],
            ..Default::default()
        }));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.binding_index(3), Some(1));
        assert!(a.binding(2).is_none());
    }

    #[test]
    fn duplicate_binding() {
        let create_info = DescriptorSetLayoutCreateInfo {
            bindings: vec![uniform(1), uniform(1)],
            ..Default::default()
        };
        assert_eq!(
            create_info.validate(32).unwrap_err().vuid(),
            "VUID-VkDescriptorSetLayoutCreateInfo-binding-00279",
        );
    }

    #[test]
    fn push_descriptor_restrictions() {
        let create_info = DescriptorSetLayoutCreateInfo {
            flags: DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR,
            bindings: vec![DescriptorSetLayoutBinding::new(
                0,
                DescriptorType::UniformBufferDynamic,
                1,
                ShaderStages::VERTEX,
            )],
        };
        assert_eq!(
            create_info.validate(32).unwrap_err().vuid(),
            "VUID-VkDescriptorSetLayoutCreateInfo-flags-00280",
        );

        let create_info = DescriptorSetLayoutCreateInfo {
            flags: DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR,
            bindings: vec![uniform(0), uniform(1)],
        };
        assert!(create_info.validate(2).is_ok());
        assert_eq!(
            create_info.validate(1).unwrap_err().vuid(),
            "VUID-VkDescriptorSetLayoutCreateInfo-flags-00281",
        );
    }

    #[test]
    fn update_after_bind_needs_pool_flag() {
        let mut binding = uniform(0);
        binding.binding_flags = DescriptorBindingFlags::UPDATE_AFTER_BIND;
        let create_info = DescriptorSetLayoutCreateInfo {
            flags: DescriptorSetLayoutCreateFlags::empty(),
            bindings: vec![binding],
        };
        assert_eq!(
            create_info.validate(32).unwrap_err().vuid(),
            "VUID-VkDescriptorSetLayoutCreateInfo-flags-03000",
        );
    }

    #[test]
    fn dynamic_count() {
        let def = DescriptorSetLayoutDef::new(&DescriptorSetLayoutCreateInfo {
            bindings: vec![
                DescriptorSetLayoutBinding::new(
                    0,
                    DescriptorType::UniformBufferDynamic,
                    2,
                    ShaderStages::VERTEX,
                ),
                uniform(1),
                DescriptorSetLayoutBinding::new(
                    2,
                    DescriptorType::StorageBufferDynamic,
                    3,
                    ShaderStages::FRAGMENT,
                ),
            ],
            ..Default::default()
        });
        assert_eq!(def.dynamic_descriptor_count(), 5);
    }
}
