//! The pipeline and descriptor sets last bound to a bind point of a command buffer.
//!
//! Binding descriptor sets with one pipeline layout, then binding other sets or a pipeline with a
//! different layout, *disturbs* the earlier bindings of every set index for which the two layouts
//! are not compatible. A disturbed slot no longer has a descriptor set bound.

use super::{
    layout::{PipelineLayoutCompatId, PipelineLayoutState},
    PipelineState,
};
use crate::{descriptor_set::DescriptorSetState, registry::StateObject};
use ash::vk;
use smallvec::SmallVec;
use std::sync::Arc;

/// What is bound at one set index.
#[derive(Clone, Debug, Default)]
pub struct PerSet {
    pub bound_descriptor_set: Option<Arc<DescriptorSetState>>,
    pub compat_id_for_set: Option<PipelineLayoutCompatId>,
    pub dynamic_offsets: SmallVec<[u32; 4]>,

    /// The key of the last successful draw-time check of the set's contents.
    pub(crate) validated: Option<ValidatedSet>,
}

impl PerSet {
    fn disturb(&mut self, compat_id: Option<PipelineLayoutCompatId>) {
        self.bound_descriptor_set = None;
        self.dynamic_offsets.clear();
        self.compat_id_for_set = compat_id;
        self.validated = None;
    }
}

/// Everything draw-time validation of a descriptor set depends on. If all of it is unchanged,
/// the check can be skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ValidatedSet {
    pub(crate) set: vk::DescriptorSet,
    pub(crate) change_count: u64,
    pub(crate) image_layout_change_count: u64,
    pub(crate) bindings: Vec<u32>,
}

/// The state of one bind point of a command buffer.
#[derive(Clone, Debug, Default)]
pub struct LastBoundState {
    pub pipeline: Option<Arc<PipelineState>>,
    pub pipeline_layout: vk::PipelineLayout,
    pub per_set: Vec<PerSet>,

    /// The set that push descriptors were last written into. Owned by the command buffer.
    pub push_descriptor_set: Option<Arc<DescriptorSetState>>,
}

impl LastBoundState {
    pub(crate) fn reset(&mut self) {
        *self = LastBoundState::default();
    }

    /// Records the binding of `pipeline`. Slots whose compatibility identity differs from the
    /// pipeline layout's are disturbed.
    pub(crate) fn bind_pipeline(&mut self, pipeline: Arc<PipelineState>) {
        let layout = pipeline.layout.clone();

        for (index, per_set) in self.per_set.iter_mut().enumerate() {
            let new_id = layout.compat_for_set.get(index).cloned();

            if per_set.compat_id_for_set != new_id {
                per_set.disturb(new_id);
            }
        }

        self.prune_push_descriptor_set();
        self.pipeline = Some(pipeline);
    }

    // Drops the push descriptor set once no slot has it bound anymore.
    fn prune_push_descriptor_set(&mut self) {
        if let Some(push_set) = &self.push_descriptor_set {
            let still_bound = self.per_set.iter().any(|per_set| {
                per_set
                    .bound_descriptor_set
                    .as_ref()
                    .is_some_and(|set| Arc::ptr_eq(set, push_set))
            });

            if !still_bound {
                self.push_descriptor_set = None;
            }
        }
    }

    /// Records a `vkCmdBindDescriptorSets`. `dynamic_offsets` holds the offsets of all sets, in
    /// order; each set consumes as many as it has dynamic descriptors.
    pub(crate) fn bind_descriptor_sets(
        &mut self,
        layout: &PipelineLayoutState,
        first_set: u32,
        sets: &[Option<Arc<DescriptorSetState>>],
        dynamic_offsets: &[u32],
    ) {
        let required = first_set as usize + sets.len();
        self.prepare_slots(layout, first_set as usize, required);

        let mut offsets = dynamic_offsets;

        for (index, set) in sets.iter().enumerate() {
            let slot = first_set as usize + index;
            let per_set = &mut self.per_set[slot];

            per_set.bound_descriptor_set = set.clone();
            per_set.compat_id_for_set = layout.compat_for_set.get(slot).cloned();
            per_set.validated = None;
            per_set.dynamic_offsets.clear();

            if let Some(set) = set {
                let count = (set.dynamic_descriptor_count() as usize).min(offsets.len());
                per_set.dynamic_offsets.extend_from_slice(&offsets[..count]);
                offsets = &offsets[count..];
            }
        }

        self.prune_push_descriptor_set();
        self.pipeline_layout = layout.handle();
    }

    /// Records a `vkCmdPushDescriptorSetKHR` that wrote into `set`.
    pub(crate) fn push_descriptor_set(
        &mut self,
        layout: &PipelineLayoutState,
        set_index: u32,
        set: Arc<DescriptorSetState>,
    ) {
        let slot = set_index as usize;
        let new_id = layout.compat_for_set.get(slot).cloned();

        // The set pushed earlier only survives if the slot stays compatible.
        let keep_existing = self
            .per_set
            .get(slot)
            .is_some_and(|per_set| per_set.compat_id_for_set == new_id);

        if !keep_existing {
            self.push_descriptor_set = None;
        }

        self.prepare_slots(layout, slot, slot + 1);

        let per_set = &mut self.per_set[slot];
        per_set.bound_descriptor_set = Some(set.clone());
        per_set.compat_id_for_set = new_id;
        per_set.dynamic_offsets.clear();
        per_set.validated = None;

        self.push_descriptor_set = Some(set);
        self.pipeline_layout = layout.handle();
    }

    /// Returns the current push descriptor set, if it was created for the layout at `set_index`.
    pub(crate) fn push_descriptor_set_for(
        &self,
        layout: &PipelineLayoutState,
        set_index: u32,
    ) -> Option<Arc<DescriptorSetState>> {
        let per_set = self.per_set.get(set_index as usize)?;

        if per_set.compat_id_for_set.as_ref() != layout.compat_for_set.get(set_index as usize) {
            return None;
        }

        self.push_descriptor_set.clone()
    }

    // Applies the disturbance rule for a bind of `first..required` with `layout`.
    fn prepare_slots(&mut self, layout: &PipelineLayoutState, first: usize, required: usize) {
        let current = self.per_set.len();

        if required < current {
            let upper_compatible = self.per_set[current - 1].compat_id_for_set.as_ref()
                == layout.compat_for_set.get(current - 1);

            if !upper_compatible {
                for per_set in &mut self.per_set[required..] {
                    if let (Some(set), Some(push_set)) =
                        (&per_set.bound_descriptor_set, &self.push_descriptor_set)
                    {
                        if Arc::ptr_eq(set, push_set) {
                            self.push_descriptor_set = None;
                        }
                    }

                    per_set.disturb(None);
                }

                self.per_set.truncate(required);
            }
        }

        if self.per_set.len() < required {
            self.per_set.resize_with(required, PerSet::default);
        }

        for index in 0..first {
            let new_id = layout.compat_for_set.get(index).cloned();
            let per_set = &mut self.per_set[index];

            if per_set.compat_id_for_set != new_id {
                if let (Some(set), Some(push_set)) =
                    (&per_set.bound_descriptor_set, &self.push_descriptor_set)
                {
                    if Arc::ptr_eq(set, push_set) {
                        self.push_descriptor_set = None;
                    }
                }

                per_set.disturb(new_id);
            }
        }
    }

    /// Returns the descriptor set bound at `set`, if the slot is compatible with `layout`.
    pub fn compatible_set(
        &self,
        layout: &PipelineLayoutState,
        set: u32,
    ) -> Result<Option<&Arc<DescriptorSetState>>, ()> {
        let per_set = self.per_set.get(set as usize).ok_or(())?;

        if per_set.compat_id_for_set.as_ref() != layout.compat_for_set.get(set as usize) {
            return Err(());
        }

        Ok(per_set.bound_descriptor_set.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::LastBoundState;
    use crate::{
        descriptor_set::{
            layout::{
                DescriptorSetLayoutBinding, DescriptorSetLayoutCreateInfo, DescriptorSetLayoutDef,
                DescriptorType,
            },
            DescriptorSetState,
        },
        pipeline::{
            layout::{LayoutInterner, PipelineLayoutState, PushConstantRange},
            ComputePipelineCreateInfo, PipelineCreateInfo, PipelineState,
        },
        shader::{PipelineShaderStage, ShaderStages},
    };
    use ash::vk::{self, Handle};
    use std::sync::Arc;

    struct Fixture {
        interner: LayoutInterner,
    }

    impl Fixture {
        fn set_layout(&self, ty: DescriptorType) -> crate::descriptor_set::layout::DescriptorSetLayoutId {
            self.interner
                .intern_set_layout(DescriptorSetLayoutDef::new(&DescriptorSetLayoutCreateInfo {
                    bindings: vec![DescriptorSetLayoutBinding::new(
                        0,
                        ty,
                        1,
                        ShaderStages::COMPUTE,
                    )],
                    ..Default::default()
                }))
        }

        fn layout(
            &self,
            raw: u64,
            types: &[DescriptorType],
            ranges: &[PushConstantRange],
        ) -> Arc<PipelineLayoutState> {
            Arc::new(PipelineLayoutState::new(
                vk::PipelineLayout::from_raw(raw),
                types.iter().map(|&ty| self.set_layout(ty)).collect(),
                &self.interner,
                ranges,
            ))
        }

        fn set(&self, raw: u64, ty: DescriptorType) -> Arc<DescriptorSetState> {
            Arc::new(DescriptorSetState::new(
                vk::DescriptorSet::from_raw(raw),
                vk::DescriptorPool::from_raw(1),
                self.set_layout(ty),
                None,
            ))
        }

        fn pipeline(&self, layout: Arc<PipelineLayoutState>) -> Arc<PipelineState> {
            Arc::new(PipelineState::new(
                vk::Pipeline::from_raw(77),
                PipelineCreateInfo::Compute(ComputePipelineCreateInfo {
                    stage: PipelineShaderStage {
                        stage: ShaderStages::COMPUTE,
                        module: vk::ShaderModule::from_raw(5),
                        entry_point: "main".into(),
                    },
                    layout: vk::PipelineLayout::null(),
                }),
                &[None],
                layout,
                None,
            ))
        }
    }

    fn fixture() -> Fixture {
        Fixture {
            interner: LayoutInterner::default(),
        }
    }

    #[test]
    fn compatible_pipeline_keeps_set() {
        let f = fixture();
        let l = f.layout(1, &[DescriptorType::UniformBufferDynamic], &[]);
        let lp = f.layout(2, &[DescriptorType::UniformBufferDynamic], &[]);
        let s = f.set(10, DescriptorType::UniformBufferDynamic);

        let mut state = LastBoundState::default();
        state.bind_descriptor_sets(&l, 0, &[Some(s.clone())], &[256]);
        assert_eq!(state.per_set[0].dynamic_offsets.as_slice(), &[256]);

        state.bind_pipeline(f.pipeline(lp));
        let bound = state.per_set[0].bound_descriptor_set.as_ref().unwrap();
        assert!(Arc::ptr_eq(bound, &s));
        assert_eq!(state.per_set[0].dynamic_offsets.as_slice(), &[256]);
    }

    #[test]
    fn pipeline_with_extra_upper_set_keeps_set() {
        let f = fixture();
        let l = f.layout(1, &[DescriptorType::UniformBuffer], &[]);
        let lp = f.layout(
            2,
            &[DescriptorType::UniformBuffer, DescriptorType::StorageBuffer],
            &[],
        );
        let s = f.set(10, DescriptorType::UniformBuffer);

        let mut state = LastBoundState::default();
        state.bind_descriptor_sets(&l, 0, &[Some(s.clone())], &[]);
        state.bind_pipeline(f.pipeline(lp.clone()));

        let bound = state.compatible_set(&lp, 0).unwrap().unwrap();
        assert!(Arc::ptr_eq(bound, &s));
    }

    #[test]
    fn incompatible_pipeline_disturbs_set() {
        let f = fixture();
        let l = f.layout(1, &[DescriptorType::UniformBufferDynamic], &[]);
        let lp = f.layout(
            2,
            &[DescriptorType::UniformBufferDynamic],
            &[PushConstantRange {
                stages: ShaderStages::COMPUTE,
                offset: 0,
                size: 4,
            }],
        );
        let s = f.set(10, DescriptorType::UniformBufferDynamic);

        let mut state = LastBoundState::default();
        state.bind_descriptor_sets(&l, 0, &[Some(s)], &[256]);
        state.bind_pipeline(f.pipeline(lp.clone()));

        assert!(state.per_set[0].bound_descriptor_set.is_none());
        assert!(state.per_set[0].dynamic_offsets.is_empty());
        assert_eq!(
            state.per_set[0].compat_id_for_set.as_ref(),
            lp.compat_for_set.first()
        );
    }

    #[test]
    fn binding_higher_set_disturbs_incompatible_lower_sets() {
        let f = fixture();
        let l1 = f.layout(
            1,
            &[DescriptorType::UniformBuffer, DescriptorType::UniformBuffer],
            &[],
        );
        let l2 = f.layout(
            2,
            &[DescriptorType::StorageBuffer, DescriptorType::UniformBuffer],
            &[],
        );
        let a = f.set(10, DescriptorType::UniformBuffer);
        let b = f.set(11, DescriptorType::UniformBuffer);

        let mut state = LastBoundState::default();
        state.bind_descriptor_sets(&l1, 0, &[Some(a), Some(b.clone())], &[]);
        state.bind_descriptor_sets(&l2, 1, &[Some(b)], &[]);

        assert!(state.per_set[0].bound_descriptor_set.is_none());
        assert!(state.per_set[1].bound_descriptor_set.is_some());
    }

    #[test]
    fn compatible_upper_sets_survive() {
        let f = fixture();
        let l = f.layout(
            1,
            &[DescriptorType::UniformBuffer, DescriptorType::UniformBuffer],
            &[],
        );
        let a = f.set(10, DescriptorType::UniformBuffer);
        let b = f.set(11, DescriptorType::UniformBuffer);
        let c = f.set(12, DescriptorType::UniformBuffer);

        let mut state = LastBoundState::default();
        state.bind_descriptor_sets(&l, 0, &[Some(a), Some(b.clone())], &[]);
        state.bind_descriptor_sets(&l, 0, &[Some(c.clone())], &[]);

        assert_eq!(state.per_set.len(), 2);
        assert!(Arc::ptr_eq(
            state.per_set[0].bound_descriptor_set.as_ref().unwrap(),
            &c
        ));
        assert!(Arc::ptr_eq(
            state.per_set[1].bound_descriptor_set.as_ref().unwrap(),
            &b
        ));
    }

    #[test]
    fn push_descriptor_set_discarded_on_incompatible_bind() {
        let f = fixture();
        let l1 = f.layout(1, &[DescriptorType::UniformBuffer], &[]);
        let l2 = f.layout(2, &[DescriptorType::StorageBuffer], &[]);
        let pushed = Arc::new(DescriptorSetState::new_push(
            f.set_layout(DescriptorType::UniformBuffer),
        ));

        let mut state = LastBoundState::default();
        state.push_descriptor_set(&l1, 0, pushed);
        assert!(state.push_descriptor_set_for(&l1, 0).is_some());

        // A pipeline with a compatible layout keeps the pushed set.
        state.bind_pipeline(f.pipeline(f.layout(3, &[DescriptorType::UniformBuffer], &[])));
        assert!(state.push_descriptor_set.is_some());

        let l2_set = f.set(20, DescriptorType::StorageBuffer);
        state.bind_descriptor_sets(&l2, 0, &[Some(l2_set)], &[]);
        assert!(state.push_descriptor_set.is_none());
        assert!(state.push_descriptor_set_for(&l1, 0).is_none());
    }
}
