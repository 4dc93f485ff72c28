//! Pipeline layouts and their compatibility identities.
//!
//! Two pipeline layouts are compatible for set `N` when they were created with identically
//! defined descriptor set layouts for sets `0..=N` and with identical push constant ranges. Rather
//! than comparing those lists every time a descriptor set or pipeline is bound, each layout
//! interns the tuple `(N, push constant ranges, set layouts)` once per set index at creation. The
//! check then becomes a pointer comparison of [`PipelineLayoutCompatId`]s.

use crate::{
    descriptor_set::layout::{DescriptorSetLayoutDef, DescriptorSetLayoutDict, DescriptorSetLayoutId},
    handle::TypedHandle,
    intern::{InternTable, Interned},
    registry::{impl_state_object, ObjectBase},
    shader::ShaderStages,
    ErrorKind, ValidationError,
};
use ash::vk;

/// A range of push constants that is accessible to a set of shader stages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    /// The stages which can access this range. A stage can access at most one push constant
    /// range.
    pub stages: ShaderStages,

    /// Offset in bytes from the start of the push constants to this range. Must be a multiple of
    /// 4.
    pub offset: u32,

    /// Size in bytes of the range. Must be a multiple of 4, and not 0.
    pub size: u32,
}

impl PushConstantRange {
    pub(crate) fn validate(&self, max_push_constants_size: u32) -> Result<(), Box<ValidationError>> {
        let &Self {
            stages,
            offset,
            size,
        } = self;

        if stages.is_empty() {
            return Err(Box::new(ValidationError {
                context: "stages".into(),
                problem: "is empty".into(),
                vuids: &["VUID-VkPushConstantRange-stageFlags-requiredbitmask"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if offset >= max_push_constants_size {
            return Err(Box::new(ValidationError {
                context: "offset".into(),
                problem: "is not less than the `max_push_constants_size` limit".into(),
                vuids: &["VUID-VkPushConstantRange-offset-00294"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if offset % 4 != 0 {
            return Err(Box::new(ValidationError {
                context: "offset".into(),
                problem: "is not a multiple of 4".into(),
                vuids: &["VUID-VkPushConstantRange-offset-00295"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if size == 0 {
            return Err(Box::new(ValidationError {
                context: "size".into(),
                problem: "is zero".into(),
                vuids: &["VUID-VkPushConstantRange-size-00296"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if size % 4 != 0 {
            return Err(Box::new(ValidationError {
                context: "size".into(),
                problem: "is not a multiple of 4".into(),
                vuids: &["VUID-VkPushConstantRange-size-00297"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if size > max_push_constants_size - offset {
            return Err(Box::new(ValidationError {
                problem: "`size` is greater than `max_push_constants_size` limit minus `offset`"
                    .into(),
                vuids: &["VUID-VkPushConstantRange-size-00298"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        Ok(())
    }

    #[inline]
    fn end(&self) -> u32 {
        self.offset + self.size
    }
}

/// The interned identity of a sorted list of push constant ranges.
pub type PushConstantRangesId = Interned<Vec<PushConstantRange>>;

/// The interned identity of the ordered list of set layouts of a pipeline layout.
pub type PipelineLayoutSetLayoutsId = Interned<Vec<DescriptorSetLayoutId>>;

/// What makes a pipeline layout compatible with another for one set index: the push constant
/// ranges and the set layouts up to and including that set. Layouts of higher sets play no part.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct PipelineLayoutCompatDef {
    pub set: u32,
    pub push_constant_ranges: PushConstantRangesId,
    pub set_layouts: PipelineLayoutSetLayoutsId,
}

/// Pipeline layouts with equal `PipelineLayoutCompatId`s for set `N` are compatible for set `N`.
pub type PipelineLayoutCompatId = Interned<PipelineLayoutCompatDef>;

/// The append-only dictionaries behind layout identities. One per device.
#[derive(Default)]
pub(crate) struct LayoutInterner {
    set_layouts: DescriptorSetLayoutDict,
    set_layout_lists: InternTable<Vec<DescriptorSetLayoutId>>,
    push_constant_ranges: InternTable<Vec<PushConstantRange>>,
    compat: InternTable<PipelineLayoutCompatDef>,
}

impl LayoutInterner {
    pub(crate) fn intern_set_layout(&self, def: DescriptorSetLayoutDef) -> DescriptorSetLayoutId {
        self.set_layouts.intern(def)
    }

    pub(crate) fn intern_push_constant_ranges(
        &self,
        ranges: &[PushConstantRange],
    ) -> PushConstantRangesId {
        let mut sorted = ranges.to_vec();
        sorted.sort_by_key(|range| (range.offset, range.size, range.stages.as_raw()));

        self.push_constant_ranges.intern(sorted)
    }

    /// Interns the identities of a pipeline layout, and returns its compatibility table.
    pub(crate) fn intern_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutId],
        push_constant_ranges: &[PushConstantRange],
    ) -> (
        PipelineLayoutSetLayoutsId,
        PushConstantRangesId,
        Vec<PipelineLayoutCompatId>,
    ) {
        let set_layouts_id = self.set_layout_lists.intern(set_layouts.to_vec());
        let push_constant_ranges_id = self.intern_push_constant_ranges(push_constant_ranges);
        let compat_for_set = (0..set_layouts.len())
            .map(|set| {
                self.compat.intern(PipelineLayoutCompatDef {
                    set: set as u32,
                    push_constant_ranges: push_constant_ranges_id.clone(),
                    set_layouts: self.set_layout_lists.intern(set_layouts[..=set].to_vec()),
                })
            })
            .collect();

        (set_layouts_id, push_constant_ranges_id, compat_for_set)
    }
}

/// Parameters of a pipeline layout.
#[derive(Clone, Debug, Default)]
pub struct PipelineLayoutCreateInfo {
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<PushConstantRange>,
}

impl PipelineLayoutCreateInfo {
    /// Validates the create info, given the resolved identities of its set layouts.
    pub(crate) fn validate(
        &self,
        set_layouts: &[DescriptorSetLayoutId],
        max_bound_descriptor_sets: u32,
        max_push_constants_size: u32,
    ) -> Result<(), Box<ValidationError>> {
        if self.set_layouts.len() > max_bound_descriptor_sets as usize {
            return Err(Box::new(ValidationError {
                context: "set_layouts".into(),
                problem: format!(
                    "the length ({}) exceeds the `max_bound_descriptor_sets` limit ({})",
                    self.set_layouts.len(),
                    max_bound_descriptor_sets,
                )
                .into(),
                vuids: &["VUID-VkPipelineLayoutCreateInfo-setLayoutCount-00286"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if set_layouts
            .iter()
            .filter(|layout| layout.is_push_descriptor())
            .count()
            > 1
        {
            return Err(Box::new(ValidationError {
                context: "set_layouts".into(),
                problem: "contains more than one push descriptor set layout".into(),
                vuids: &["VUID-VkPipelineLayoutCreateInfo-pSetLayouts-00293"],
                ..Default::default()
            }));
        }

        let mut seen_stages = ShaderStages::empty();

        for (index, range) in self.push_constant_ranges.iter().enumerate() {
            range
                .validate(max_push_constants_size)
                .map_err(|err| err.add_context(format!("push_constant_ranges[{}]", index)))?;

            if seen_stages.intersects(range.stages) {
                return Err(Box::new(ValidationError {
                    context: "push_constant_ranges".into(),
                    problem: "contains more than one range with the same stage".into(),
                    vuids: &["VUID-VkPipelineLayoutCreateInfo-pPushConstantRanges-00292"],
                    ..Default::default()
                }));
            }

            seen_stages |= range.stages;
        }

        Ok(())
    }
}

/// State of a `VkPipelineLayout`.
#[derive(Debug)]
pub struct PipelineLayoutState {
    base: ObjectBase,
    pub set_layouts: Vec<DescriptorSetLayoutId>,
    pub set_layouts_id: PipelineLayoutSetLayoutsId,
    pub push_constant_ranges: PushConstantRangesId,
    pub compat_for_set: Vec<PipelineLayoutCompatId>,
}

impl_state_object!(PipelineLayoutState, vk::PipelineLayout);

impl PipelineLayoutState {
    pub(crate) fn new(
        layout: vk::PipelineLayout,
        set_layouts: Vec<DescriptorSetLayoutId>,
        interner: &LayoutInterner,
        push_constant_ranges: &[PushConstantRange],
    ) -> Self {
        let (set_layouts_id, push_constant_ranges, compat_for_set) =
            interner.intern_pipeline_layout(&set_layouts, push_constant_ranges);

        PipelineLayoutState {
            base: ObjectBase::new(TypedHandle::new(layout)),
            set_layouts,
            set_layouts_id,
            push_constant_ranges,
            compat_for_set,
        }
    }

    #[inline]
    pub fn set_count(&self) -> u32 {
        self.set_layouts.len() as u32
    }

    /// Returns whether `self` and `other` are compatible for set `set`.
    #[inline]
    pub fn is_compatible_for_set(&self, other: &PipelineLayoutState, set: u32) -> bool {
        match (
            self.compat_for_set.get(set as usize),
            other.compat_for_set.get(set as usize),
        ) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Returns the push descriptor set index, if the layout has one.
    pub fn push_descriptor_set(&self) -> Option<u32> {
        self.set_layouts
            .iter()
            .position(|layout| layout.is_push_descriptor())
            .map(|index| index as u32)
    }

    /// Checks a `vkCmdPushConstants` call against the layout.
    pub(crate) fn validate_push_constants(
        &self,
        stages: ShaderStages,
        offset: u32,
        size: u32,
        max_push_constants_size: u32,
    ) -> Result<(), Box<ValidationError>> {
        if stages.is_empty() {
            return Err(Box::new(ValidationError {
                context: "stages".into(),
                problem: "is empty".into(),
                vuids: &["VUID-vkCmdPushConstants-stageFlags-requiredbitmask"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if offset % 4 != 0 {
            return Err(Box::new(ValidationError {
                context: "offset".into(),
                problem: "is not a multiple of 4".into(),
                vuids: &["VUID-vkCmdPushConstants-offset-00368"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if size == 0 {
            return Err(Box::new(ValidationError {
                context: "size".into(),
                problem: "is zero".into(),
                vuids: &["VUID-vkCmdPushConstants-size-arraylength"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if size % 4 != 0 {
            return Err(Box::new(ValidationError {
                context: "size".into(),
                problem: "is not a multiple of 4".into(),
                vuids: &["VUID-vkCmdPushConstants-size-00369"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if offset >= max_push_constants_size {
            return Err(Box::new(ValidationError {
                context: "offset".into(),
                problem: "is not less than the `max_push_constants_size` limit".into(),
                vuids: &["VUID-vkCmdPushConstants-offset-00370"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if size > max_push_constants_size - offset {
            return Err(Box::new(ValidationError {
                problem: "`size` is greater than the `max_push_constants_size` limit minus \
                    `offset`"
                    .into(),
                vuids: &["VUID-vkCmdPushConstants-size-00371"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        let end = offset + size;

        for range in self.push_constant_ranges.iter() {
            let overlaps = offset < range.end() && range.offset < end;

            if overlaps && !stages.contains(range.stages) {
                return Err(Box::new(ValidationError {
                    context: "stages".into(),
                    problem: format!(
                        "does not contain all the stages of the overlapping push constant range \
                        {}..{}",
                        range.offset,
                        range.end(),
                    )
                    .into(),
                    vuids: &["VUID-vkCmdPushConstants-offset-01795"],
                    kind: ErrorKind::StateIncompatible,
                    objects: [self.base.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }
        }

        for stage in stages.iter() {
            let covered = self.push_constant_ranges.iter().any(|range| {
                range.stages.intersects(stage) && range.offset <= offset && end <= range.end()
            });

            if !covered {
                return Err(Box::new(ValidationError {
                    context: "stages".into(),
                    problem: format!(
                        "contains {:?}, but no push constant range of the layout with that stage \
                        contains {}..{}",
                        stage, offset, end,
                    )
                    .into(),
                    vuids: &["VUID-vkCmdPushConstants-offset-01796"],
                    kind: ErrorKind::StateIncompatible,
                    objects: [self.base.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{LayoutInterner, PipelineLayoutCreateInfo, PipelineLayoutState, PushConstantRange};
    use crate::{
        descriptor_set::layout::{
            DescriptorSetLayoutBinding, DescriptorSetLayoutCreateInfo, DescriptorSetLayoutDef,
            DescriptorType,
        },
        shader::ShaderStages,
    };
    use ash::vk::{self, Handle};

    fn uniform_layout(interner: &LayoutInterner) -> super::DescriptorSetLayoutId {
        interner.intern_set_layout(DescriptorSetLayoutDef::new(&DescriptorSetLayoutCreateInfo {
            bindings: vec![DescriptorSetLayoutBinding::new(
                0,
                DescriptorType::UniformBuffer,
                1,
                ShaderStages::VERTEX,
            )],
            ..Default::default()
        }))
    }

    fn storage_layout(interner: &LayoutInterner) -> super::DescriptorSetLayoutId {
        interner.intern_set_layout(DescriptorSetLayoutDef::new(&DescriptorSetLayoutCreateInfo {
            bindings: vec![DescriptorSetLayoutBinding::new(
                0,
                DescriptorType::StorageBuffer,
                1,
                ShaderStages::COMPUTE,
            )],
            ..Default::default()
        }))
    }

    const RANGES: [PushConstantRange; 2] = [
        PushConstantRange {
            stages: ShaderStages::FRAGMENT,
            offset: 16,
            size: 16,
        },
        PushConstantRange {
            stages: ShaderStages::VERTEX,
            offset: 0,
            size: 16,
        },
    ];

    #[test]
    fn identical_layouts_are_compatible() {
        let interner = LayoutInterner::default();
        let l1 = PipelineLayoutState::new(
            vk::PipelineLayout::from_raw(1),
            vec![uniform_layout(&interner)],
            &interner,
            &RANGES,
        );
        // Range order does not matter.
        let l2 = PipelineLayoutState::new(
            vk::PipelineLayout::from_raw(2),
            vec![uniform_layout(&interner)],
            &interner,
            &[RANGES[1], RANGES[0]],
        );

        assert_eq!(l1.compat_for_set[0], l1.compat_for_set[0]);
        assert_eq!(l1.compat_for_set[0], l2.compat_for_set[0]);
        assert!(l1.is_compatible_for_set(&l2, 0));
        assert!(!l1.is_compatible_for_set(&l2, 1));
    }

    #[test]
    fn compatibility_is_prefix_based() {
        let interner = LayoutInterner::default();
        let a = PipelineLayoutState::new(
            vk::PipelineLayout::from_raw(1),
            vec![uniform_layout(&interner), storage_layout(&interner)],
            &interner,
            &[],
        );
        let b = PipelineLayoutState::new(
            vk::PipelineLayout::from_raw(2),
            vec![uniform_layout(&interner)],
            &interner,
            &[],
        );
        let c = PipelineLayoutState::new(
            vk::PipelineLayout::from_raw(3),
            vec![uniform_layout(&interner), uniform_layout(&interner)],
            &interner,
            &[],
        );
        let d = PipelineLayoutState::new(
            vk::PipelineLayout::from_raw(4),
            vec![uniform_layout(&interner), storage_layout(&interner)],
            &interner,
            &RANGES,
        );

        assert!(a.is_compatible_for_set(&b, 0));
        assert!(!a.is_compatible_for_set(&b, 1));
        assert_eq!(a.compat_for_set[0], b.compat_for_set[0]);

        assert!(a.is_compatible_for_set(&c, 0));
        assert!(!a.is_compatible_for_set(&c, 1));
        assert!(c.is_compatible_for_set(&b, 0));

        // Push constant ranges take part at every set.
        assert!(!a.is_compatible_for_set(&d, 0));
        assert!(!a.is_compatible_for_set(&d, 1));
    }

    #[test]
    fn push_constant_range_rules() {
        let zero_stages = PushConstantRange {
            stages: ShaderStages::empty(),
            offset: 0,
            size: 4,
        };
        assert_eq!(
            zero_stages.validate(128).unwrap_err().vuid(),
            "VUID-VkPushConstantRange-stageFlags-requiredbitmask",
        );

        let misaligned = PushConstantRange {
            stages: ShaderStages::VERTEX,
            offset: 2,
            size: 4,
        };
        assert_eq!(
            misaligned.validate(128).unwrap_err().vuid(),
            "VUID-VkPushConstantRange-offset-00295",
        );

        let empty = PushConstantRange {
            stages: ShaderStages::VERTEX,
            offset: 0,
            size: 0,
        };
        assert_eq!(
            empty.validate(128).unwrap_err().vuid(),
            "VUID-VkPushConstantRange-size-00296",
        );

        let odd_size = PushConstantRange {
            stages: ShaderStages::VERTEX,
            offset: 0,
            size: 6,
        };
        assert_eq!(
            odd_size.validate(128).unwrap_err().vuid(),
            "VUID-VkPushConstantRange-size-00297",
        );

        let overlapping_stages = PipelineLayoutCreateInfo {
            set_layouts: Vec::new(),
            push_constant_ranges: vec![RANGES[1], RANGES[1]],
        };
        assert_eq!(
            overlapping_stages.validate(&[], 8, 128).unwrap_err().vuid(),
            "VUID-VkPipelineLayoutCreateInfo-pPushConstantRanges-00292",
        );
    }

    #[test]
    fn cmd_push_constants() {
        let interner = LayoutInterner::default();
        let layout =
            PipelineLayoutState::new(vk::PipelineLayout::from_raw(1), vec![], &interner, &RANGES);

        assert!(layout
            .validate_push_constants(ShaderStages::VERTEX, 0, 16, 128)
            .is_ok());
        assert_eq!(
            layout
                .validate_push_constants(ShaderStages::empty(), 0, 16, 128)
                .unwrap_err()
                .vuid(),
            "VUID-vkCmdPushConstants-stageFlags-requiredbitmask",
        );
        assert_eq!(
            layout
                .validate_push_constants(ShaderStages::VERTEX, 2, 4, 128)
                .unwrap_err()
                .vuid(),
            "VUID-vkCmdPushConstants-offset-00368",
        );
        assert_eq!(
            layout
                .validate_push_constants(ShaderStages::VERTEX, 0, 0, 128)
                .unwrap_err()
                .vuid(),
            "VUID-vkCmdPushConstants-size-arraylength",
        );
        // Overlaps the fragment range without naming the fragment stage.
        assert_eq!(
            layout
                .validate_push_constants(ShaderStages::VERTEX, 8, 16, 128)
                .unwrap_err()
                .vuid(),
            "VUID-vkCmdPushConstants-offset-01795",
        );
    }
}
