use super::ValidationLayer;
use crate::{
    command_buffer::BindingBreak,
    descriptor_set::{
        layout::{
            DescriptorSetLayoutCreateFlags, DescriptorSetLayoutCreateInfo, DescriptorSetLayoutDef,
            DescriptorSetLayoutState,
        },
        CopyDescriptorSet, DescriptorPoolCreateFlags, DescriptorPoolCreateInfo,
        DescriptorPoolState, DescriptorSetAllocateInfo, DescriptorSetState, WriteDescriptorSet,
    },
    registry::StateObject,
    ErrorKind, ValidationError,
};
use ash::vk;
use foldhash::HashMap;
use std::sync::Arc;

impl ValidationLayer {
    pub fn validate_create_descriptor_set_layout(
        &self,
        create_info: &DescriptorSetLayoutCreateInfo,
    ) -> bool {
        self.emit_result(
            create_info
                .validate(self.device_info.limits.max_push_descriptors)
                .map_err(|error| error.add_context("create_info")),
        )
    }

    /// Structurally identical layouts share one interned identity.
    pub fn record_create_descriptor_set_layout(
        &self,
        layout: vk::DescriptorSetLayout,
        create_info: &DescriptorSetLayoutCreateInfo,
    ) {
        let layout_id = self
            .interner
            .intern_set_layout(DescriptorSetLayoutDef::new(create_info));

        self.registry
            .descriptor_set_layouts
            .insert(Arc::new(DescriptorSetLayoutState::new(layout, layout_id)));
    }

    pub fn record_destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.destroy_object(
            &self.registry.descriptor_set_layouts,
            layout,
            BindingBreak::Destroyed,
        );
    }

    pub fn validate_create_descriptor_pool(&self, create_info: &DescriptorPoolCreateInfo) -> bool {
        if create_info.max_sets == 0 {
            return self.emit(Box::new(ValidationError {
                context: "create_info.max_sets".into(),
                problem: "is zero".into(),
                vuids: &["VUID-VkDescriptorPoolCreateInfo-maxSets-00301"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        false
    }

    pub fn record_create_descriptor_pool(
        &self,
        pool: vk::DescriptorPool,
        create_info: DescriptorPoolCreateInfo,
    ) {
        self.registry
            .descriptor_pools
            .insert(Arc::new(DescriptorPoolState::new(pool, create_info)));
    }

    /// Emits an error for every set of `pool` that pending work still uses.
    fn validate_pool_sets_idle(
        &self,
        pool: &DescriptorPoolState,
        vuids: &'static [&'static str],
    ) -> bool {
        let mut skip = false;

        for set in pool.sets() {
            skip |= self.validate_destroy(&self.registry.descriptor_sets, set, vuids);
        }

        skip
    }

    pub fn validate_destroy_descriptor_pool(&self, pool: vk::DescriptorPool) -> bool {
        let Some(state) = self.registry.descriptor_pools.get(pool) else {
            return false;
        };

        self.validate_destroy(
            &self.registry.descriptor_pools,
            pool,
            &["VUID-vkDestroyDescriptorPool-descriptorPool-00303"],
        ) | self.validate_pool_sets_idle(
            &state,
            &["VUID-vkDestroyDescriptorPool-descriptorPool-00303"],
        )
    }

    pub fn record_destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let Some(state) = self.registry.descriptor_pools.get(pool) else {
            return;
        };

        for set in state.reset() {
            self.destroy_object(
                &self.registry.descriptor_sets,
                set,
                BindingBreak::DestroyedOrUpdated,
            );
        }

        self.destroy_object(
            &self.registry.descriptor_pools,
            pool,
            BindingBreak::Destroyed,
        );
    }

    pub fn validate_allocate_descriptor_sets(
        &self,
        allocate_info: &DescriptorSetAllocateInfo,
    ) -> bool {
        let Some(pool) = self
            .registry
            .descriptor_pools
            .get(allocate_info.descriptor_pool)
        else {
            return false;
        };

        let mut skip = false;

        if !allocate_info.variable_descriptor_counts.is_empty()
            && allocate_info.variable_descriptor_counts.len() != allocate_info.set_layouts.len()
        {
            skip |= self.emit(Box::new(ValidationError {
                context: "allocate_info.variable_descriptor_counts".into(),
                problem: format!(
                    "has {} elements, but {} sets are allocated",
                    allocate_info.variable_descriptor_counts.len(),
                    allocate_info.set_layouts.len(),
                )
                .into(),
                vuids: &[
                    "VUID-VkDescriptorSetVariableDescriptorCountAllocateInfo-descriptorSetCount-03045",
                ],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        let mut layouts = Vec::with_capacity(allocate_info.set_layouts.len());

        for (index, &layout) in allocate_info.set_layouts.iter().enumerate() {
            let Some(layout) = self.registry.descriptor_set_layouts.get(layout) else {
                continue;
            };

            if layout.def().is_push_descriptor() {
                skip |= self.emit(Box::new(ValidationError {
                    context: format!("allocate_info.set_layouts[{}]", index).into(),
                    problem: "was created with the push descriptor flag".into(),
                    vuids: &["VUID-VkDescriptorSetAllocateInfo-pSetLayouts-00308"],
                    kind: ErrorKind::StateIncompatible,
                    objects: [layout.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
                continue;
            }

            if layout
                .def()
                .flags()
                .intersects(DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
                && !pool
                    .create_info
                    .flags
                    .intersects(DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            {
                skip |= self.emit(Box::new(ValidationError {
                    context: format!("allocate_info.set_layouts[{}]", index).into(),
                    problem: "was created for update-after-bind pools, but the pool was not \
                        created with the update-after-bind flag"
                        .into(),
                    vuids: &["VUID-VkDescriptorSetAllocateInfo-pSetLayouts-03044"],
                    kind: ErrorKind::StateIncompatible,
                    objects: [layout.typed_handle(), pool.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }

            let variable_count = allocate_info.variable_descriptor_counts.get(index).copied();
            layouts.push((layout, variable_count));
        }

        let defs: Vec<_> = layouts
            .iter()
            .map(|(layout, variable_count)| (layout.def(), *variable_count))
            .collect();

        skip | self.emit_result(pool.validate_allocate(&defs))
    }

    pub fn record_allocate_descriptor_sets(
        &self,
        allocate_info: &DescriptorSetAllocateInfo,
        sets: &[vk::DescriptorSet],
    ) {
        let Some(pool) = self
            .registry
            .descriptor_pools
            .get(allocate_info.descriptor_pool)
        else {
            return;
        };

        for (index, (&set, &layout)) in sets.iter().zip(&allocate_info.set_layouts).enumerate() {
            let Some(layout) = self.registry.descriptor_set_layouts.get(layout) else {
                continue;
            };

            let state = Arc::new(DescriptorSetState::new(
                set,
                pool.handle(),
                layout.layout_id.clone(),
                allocate_info.variable_descriptor_counts.get(index).copied(),
            ));
            pool.allocate(&state);
            self.registry.descriptor_sets.insert(state);
        }
    }

    pub fn validate_free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> bool {
        let Some(pool) = self.registry.descriptor_pools.get(pool) else {
            return false;
        };

        let mut skip = false;

        if !pool
            .create_info
            .flags
            .intersects(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        {
            skip |= self.emit(Box::new(ValidationError {
                context: "descriptor_pool".into(),
                problem: "was not created with the free descriptor set flag".into(),
                vuids: &["VUID-vkFreeDescriptorSets-descriptorPool-00312"],
                kind: ErrorKind::StateIncompatible,
                objects: [pool.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        for &set in sets {
            skip |= self.validate_destroy(
                &self.registry.descriptor_sets,
                set,
                &["VUID-vkFreeDescriptorSets-pDescriptorSets-00309"],
            );
        }

        skip
    }

    pub fn record_free_descriptor_sets(&self, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) {
        let pool = self.registry.descriptor_pools.get(pool);

        for &set in sets {
            let Some(state) = self.destroy_object(
                &self.registry.descriptor_sets,
                set,
                BindingBreak::DestroyedOrUpdated,
            ) else {
                continue;
            };

            if let Some(pool) = &pool {
                pool.free(&state);
            }
        }
    }

    pub fn validate_reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> bool {
        if self.settings.disabled.idle_descriptor_set {
            return false;
        }

        let Some(pool) = self.registry.descriptor_pools.get(pool) else {
            return false;
        };

        self.validate_pool_sets_idle(&pool, &["VUID-vkResetDescriptorPool-descriptorPool-00313"])
    }

    pub fn record_reset_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let Some(pool) = self.registry.descriptor_pools.get(pool) else {
            return;
        };

        for set in pool.reset() {
            self.destroy_object(
                &self.registry.descriptor_sets,
                set,
                BindingBreak::DestroyedOrUpdated,
            );
        }
    }

    fn validate_update_in_use(&self, set: &DescriptorSetState, binding: u32, context: String) -> bool {
        if self.settings.disabled.object_in_use
            || !set.base().in_use()
            || set.bindings_update_after_bind(&[binding])
        {
            return false;
        }

        self.emit(Box::new(ValidationError {
            context: context.into(),
            problem: format!(
                "{} is in use by a pending command buffer, and binding {} was not created with \
                the update-after-bind flag",
                self.format_handle(set.typed_handle()),
                binding,
            )
            .into(),
            vuids: &["VUID-vkUpdateDescriptorSets-None-03047"],
            kind: ErrorKind::InUseOnDestroy,
            objects: [set.typed_handle()].into_iter().collect(),
            ..Default::default()
        }))
    }

    pub fn validate_update_descriptor_sets(
        &self,
        descriptor_writes: &[WriteDescriptorSet],
        descriptor_copies: &[CopyDescriptorSet],
    ) -> bool {
        let mut skip = false;

        for (index, write) in descriptor_writes.iter().enumerate() {
            let Some(set) = self.registry.descriptor_sets.get(write.dst_set) else {
                continue;
            };
            let context = format!("descriptor_writes[{}]", index);

            if let Err(error) = set.validate_write(write, &self.registry) {
                skip |= self.emit(error.add_context(context.clone()));
            }

            skip |= self.validate_update_in_use(&set, write.dst_binding, context);
        }

        for (index, copy) in descriptor_copies.iter().enumerate() {
            let (Some(src), Some(dst)) = (
                self.registry.descriptor_sets.get(copy.src_set),
                self.registry.descriptor_sets.get(copy.dst_set),
            ) else {
                continue;
            };
            let context = format!("descriptor_copies[{}]", index);

            if let Err(error) = DescriptorSetState::validate_copy(&src, &dst, copy) {
                skip |= self.emit(error.add_context(context.clone()));
            }

            skip |= self.validate_update_in_use(&dst, copy.dst_binding, context);
        }

        skip
    }

    /// Command buffers that bound an updated set become invalid, unless every binding touched
    /// allows updates after binding.
    pub fn record_update_descriptor_sets(
        &self,
        descriptor_writes: &[WriteDescriptorSet],
        descriptor_copies: &[CopyDescriptorSet],
    ) {
        let mut touched: HashMap<vk::DescriptorSet, (Arc<DescriptorSetState>, Vec<u32>)> =
            HashMap::default();

        for write in descriptor_writes {
            let Some(set) = self.registry.descriptor_sets.get(write.dst_set) else {
                continue;
            };

            set.apply_write(write);
            touched
                .entry(write.dst_set)
                .or_insert_with(|| (set, Vec::new()))
                .1
                .push(write.dst_binding);
        }

        for copy in descriptor_copies {
            let (Some(src), Some(dst)) = (
                self.registry.descriptor_sets.get(copy.src_set),
                self.registry.descriptor_sets.get(copy.dst_set),
            ) else {
                continue;
            };

            DescriptorSetState::apply_copy(&src, &dst, copy);
            touched
                .entry(copy.dst_set)
                .or_insert_with(|| (dst, Vec::new()))
                .1
                .push(copy.dst_binding);
        }

        for (set, bindings) in touched.into_values() {
            if !set.bindings_update_after_bind(&bindings) {
                self.invalidate_command_buffers(set.base(), BindingBreak::DestroyedOrUpdated);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        buffer::BufferUsage,
        command_buffer::{BindingBreak, CommandBufferRecordState},
        descriptor_set::{
            layout::{
                DescriptorBindingFlags, DescriptorSetLayoutBinding, DescriptorSetLayoutCreateFlags,
                DescriptorSetLayoutCreateInfo, DescriptorType,
            },
            DescriptorBufferInfo, DescriptorPoolCreateFlags, DescriptorPoolCreateInfo,
            DescriptorSetAllocateInfo, WriteDescriptorSet, WriteDescriptorSetElements,
        },
        registry::StateObject,
        shader::ShaderStages,
        tests::{create_bound_buffer, handle, primary_and_secondary},
        ValidationLayer,
    };
    use ash::vk;
    use smallvec::smallvec;

    fn create_layout(
        layer: &ValidationLayer,
        flags: DescriptorSetLayoutCreateFlags,
        binding_flags: DescriptorBindingFlags,
    ) -> vk::DescriptorSetLayout {
        let layout = handle();
        let mut binding =
            DescriptorSetLayoutBinding::new(0, DescriptorType::UniformBuffer, 1, ShaderStages::VERTEX);
        binding.binding_flags = binding_flags;
        let create_info = DescriptorSetLayoutCreateInfo {
            flags,
            bindings: vec![binding],
        };

        assert!(!layer.validate_create_descriptor_set_layout(&create_info));
        layer.record_create_descriptor_set_layout(layout, &create_info);

        layout
    }

    fn allocate_set(
        layer: &ValidationLayer,
        flags: DescriptorPoolCreateFlags,
        layout: vk::DescriptorSetLayout,
    ) -> (vk::DescriptorPool, vk::DescriptorSet) {
        let pool = handle();
        layer.record_create_descriptor_pool(
            pool,
            DescriptorPoolCreateInfo {
                flags,
                max_sets: 4,
                pool_sizes: vec![(DescriptorType::UniformBuffer, 4)],
            },
        );

        let set = handle();
        let allocate_info = DescriptorSetAllocateInfo {
            descriptor_pool: pool,
            set_layouts: vec![layout],
            variable_descriptor_counts: Vec::new(),
        };
        assert!(!layer.validate_allocate_descriptor_sets(&allocate_info));
        layer.record_allocate_descriptor_sets(&allocate_info, &[set]);

        (pool, set)
    }

    fn write_buffer(set: vk::DescriptorSet, buffer: vk::Buffer) -> WriteDescriptorSet {
        WriteDescriptorSet {
            dst_set: set,
            dst_binding: 0,
            dst_array_element: 0,
            descriptor_type: DescriptorType::UniformBuffer,
            elements: WriteDescriptorSetElements::Buffer(smallvec![DescriptorBufferInfo {
                buffer,
                offset: 0,
                range: 64,
            }]),
        }
    }

    #[test]
    fn push_descriptor_layouts_cannot_be_allocated() {
        let (layer, reporter) = test_layer!();
        let layout = create_layout(
            &layer,
            DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR,
            DescriptorBindingFlags::empty(),
        );
        let pool = handle();
        layer.record_create_descriptor_pool(
            pool,
            DescriptorPoolCreateInfo {
                max_sets: 1,
                ..Default::default()
            },
        );

        layer.validate_allocate_descriptor_sets(&DescriptorSetAllocateInfo {
            descriptor_pool: pool,
            set_layouts: vec![layout],
            variable_descriptor_counts: Vec::new(),
        });
        assert!(reporter.contains("VUID-VkDescriptorSetAllocateInfo-pSetLayouts-00308"));
    }

    #[test]
    fn pool_accounting() {
        let (layer, reporter) = test_layer!();
        let layout = create_layout(
            &layer,
            DescriptorSetLayoutCreateFlags::empty(),
            DescriptorBindingFlags::empty(),
        );
        let (pool, set) = allocate_set(&layer, DescriptorPoolCreateFlags::empty(), layout);
        let state = layer.registry().descriptor_pools.get(pool).unwrap();
        assert_eq!(state.available_sets(), 3);
        assert_eq!(state.available_descriptors(DescriptorType::UniformBuffer), 3);

        // Not created with the free flag.
        layer.validate_free_descriptor_sets(pool, &[set]);
        assert!(reporter.contains("VUID-vkFreeDescriptorSets-descriptorPool-00312"));

        layer.record_reset_descriptor_pool(pool);
        assert_eq!(state.available_sets(), 4);
        assert!(layer.registry().descriptor_sets.get(set).is_none());
    }

    #[test]
    fn updating_a_set_in_use() {
        let (layer, reporter) = test_layer!();
        let (buffer, _) = create_bound_buffer(&layer, 64, BufferUsage::UNIFORM_BUFFER);
        let layout = create_layout(
            &layer,
            DescriptorSetLayoutCreateFlags::empty(),
            DescriptorBindingFlags::empty(),
        );
        let (pool, set) = allocate_set(&layer, DescriptorPoolCreateFlags::empty(), layout);
        let state = layer.registry().descriptor_sets.get(set).unwrap();

        state.base().begin_use();
        layer.validate_update_descriptor_sets(&[write_buffer(set, buffer)], &[]);
        assert!(reporter.contains("VUID-vkUpdateDescriptorSets-None-03047"));

        reporter.clear();
        layer.validate_reset_descriptor_pool(pool);
        assert!(reporter.contains("VUID-vkResetDescriptorPool-descriptorPool-00313"));
    }

    #[test]
    fn update_after_bind_keeps_command_buffers_valid() {
        let (layer, reporter) = test_layer!();
        let (buffer, _) = create_bound_buffer(&layer, 64, BufferUsage::UNIFORM_BUFFER);
        let (primary, _) = primary_and_secondary(&layer);

        let layout = create_layout(
            &layer,
            DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL,
            DescriptorBindingFlags::UPDATE_AFTER_BIND,
        );
        let (_, set) = allocate_set(&layer, DescriptorPoolCreateFlags::UPDATE_AFTER_BIND, layout);
        let state = layer.registry().descriptor_sets.get(set).unwrap();
        state.base().add_command_buffer_binding(primary);
        state.base().begin_use();

        let writes = [write_buffer(set, buffer)];
        assert!(!layer.validate_update_descriptor_sets(&writes, &[]));
        layer.record_update_descriptor_sets(&writes, &[]);
        assert!(reporter.diagnostics().is_empty());
        assert_eq!(
            layer
                .registry()
                .command_buffers
                .get(primary)
                .unwrap()
                .record_state(),
            CommandBufferRecordState::Recorded,
        );
        assert_eq!(state.change_count(), 1);
    }

    #[test]
    fn update_invalidates_command_buffers() {
        let (layer, _) = test_layer!();
        let (buffer, _) = create_bound_buffer(&layer, 64, BufferUsage::UNIFORM_BUFFER);
        let (primary, _) = primary_and_secondary(&layer);

        let layout = create_layout(
            &layer,
            DescriptorSetLayoutCreateFlags::empty(),
            DescriptorBindingFlags::empty(),
        );
        let (_, set) = allocate_set(&layer, DescriptorPoolCreateFlags::empty(), layout);
        layer
            .registry()
            .descriptor_sets
            .get(set)
            .unwrap()
            .base()
            .add_command_buffer_binding(primary);

        layer.record_update_descriptor_sets(&[write_buffer(set, buffer)], &[]);

        let primary = layer.registry().command_buffers.get(primary).unwrap();
        assert_eq!(
            primary.record_state(),
            CommandBufferRecordState::InvalidComplete,
        );
        assert_eq!(
            primary.broken_bindings()[0].cause,
            BindingBreak::DestroyedOrUpdated,
        );
    }
}
