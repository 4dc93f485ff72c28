//! Shader modules, pipeline layouts, pipelines and validation caches.

use super::ValidationLayer;
use crate::{
    command_buffer::BindingBreak,
    descriptor_set::layout::DescriptorSetLayoutId,
    pipeline::{
        layout::{PipelineLayoutCreateInfo, PipelineLayoutState},
        PipelineBindPoint, PipelineCreateInfo, PipelineState,
    },
    registry::StateObject,
    shader::{EntryPointInfo, ShaderModuleCreateInfo, ShaderModuleState, ShaderStages, ValidationCache},
    ErrorKind, ValidationError,
};
use ash::vk;
use std::sync::Arc;

impl ValidationLayer {
    pub fn record_create_shader_module(
        &self,
        module: vk::ShaderModule,
        create_info: ShaderModuleCreateInfo,
    ) {
        self.registry
            .shader_modules
            .insert(Arc::new(ShaderModuleState::new(module, create_info)));
    }

    pub fn record_destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy_object(
            &self.registry.shader_modules,
            module,
            BindingBreak::Destroyed,
        );
    }

    /// Returns the interned identities of `set_layouts`, skipping unknown handles.
    fn resolve_set_layouts(&self, set_layouts: &[vk::DescriptorSetLayout]) -> Vec<DescriptorSetLayoutId> {
        set_layouts
            .iter()
            .filter_map(|&layout| self.registry.descriptor_set_layouts.get(layout))
            .map(|layout| layout.layout_id.clone())
            .collect()
    }

    pub fn validate_create_pipeline_layout(&self, create_info: &PipelineLayoutCreateInfo) -> bool {
        let set_layouts = self.resolve_set_layouts(&create_info.set_layouts);

        self.emit_result(
            create_info
                .validate(
                    &set_layouts,
                    self.max_bound_descriptor_sets(),
                    self.device_info.limits.max_push_constants_size,
                )
                .map_err(|error| error.add_context("create_info")),
        )
    }

    pub fn record_create_pipeline_layout(
        &self,
        layout: vk::PipelineLayout,
        create_info: &PipelineLayoutCreateInfo,
    ) {
        let set_layouts = self.resolve_set_layouts(&create_info.set_layouts);

        self.registry
            .pipeline_layouts
            .insert(Arc::new(PipelineLayoutState::new(
                layout,
                set_layouts,
                &self.interner,
                &create_info.push_constant_ranges,
            )));
    }

    pub fn record_destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy_object(
            &self.registry.pipeline_layouts,
            layout,
            BindingBreak::Destroyed,
        );
    }

    pub(crate) fn validation_cache(
        &self,
        cache: vk::ValidationCacheEXT,
    ) -> Option<Arc<dyn ValidationCache>> {
        self.validation_caches.read().get(&cache).cloned()
    }

    /// Checks what an entry point needs from the pipeline layout.
    fn validate_entry_point_interface(
        &self,
        entry_point: &EntryPointInfo,
        layout: &PipelineLayoutState,
        vuids: &'static [&'static str],
    ) -> Option<Box<ValidationError>> {
        for (&(set, binding), requirements) in &entry_point.descriptor_binding_requirements {
            let def = layout
                .set_layouts
                .get(set as usize)
                .and_then(|set_layout| set_layout.binding(binding));

            let problem = match def {
                None => format!(
                    "the shader uses descriptor set {} binding {}, but the pipeline layout does \
                    not contain it",
                    set, binding,
                ),
                Some(def)
                    if !requirements.descriptor_types.is_empty()
                        && !requirements.descriptor_types.contains(&def.descriptor_type) =>
                {
                    format!(
                        "the shader expects descriptor set {} binding {} to be one of {:?}, but \
                        the pipeline layout declares {:?}",
                        set, binding, requirements.descriptor_types, def.descriptor_type,
                    )
                }
                Some(def) if def.descriptor_count < requirements.descriptor_count => format!(
                    "the shader accesses {} descriptors in set {} binding {}, but the pipeline \
                    layout only declares {}",
                    requirements.descriptor_count, set, binding, def.descriptor_count,
                ),
                Some(def) if !def.stages.contains(entry_point.stage) => format!(
                    "descriptor set {} binding {} is not accessible from the {:?} stage",
                    set, binding, entry_point.stage,
                ),
                Some(_) => continue,
            };

            return Some(Box::new(ValidationError {
                problem: problem.into(),
                vuids,
                kind: ErrorKind::StateIncompatible,
                objects: [layout.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        let (offset, size) = entry_point.push_constant_requirements?;
        let covered = layout.push_constant_ranges.iter().any(|range| {
            range.stages.contains(entry_point.stage)
                && range.offset <= offset
                && offset + size <= range.offset + range.size
        });

        (!covered).then(|| {
            Box::new(ValidationError {
                problem: format!(
                    "the shader reads push constants {}..{} from the {:?} stage, but no push \
                    constant range of the pipeline layout covers them",
                    offset,
                    offset + size,
                    entry_point.stage,
                )
                .into(),
                vuids,
                kind: ErrorKind::StateIncompatible,
                objects: [layout.typed_handle()].into_iter().collect(),
                ..Default::default()
            })
        })
    }

    fn validate_create_pipeline(&self, create_info: &PipelineCreateInfo) -> Vec<Box<ValidationError>> {
        let mut errors = Vec::new();
        let bind_point = create_info.bind_point();

        let Some(layout) = self.registry.pipeline_layouts.get(create_info.layout()) else {
            return errors;
        };

        let layout_vuids: &'static [&'static str] = match bind_point {
            PipelineBindPoint::Graphics => &["VUID-VkGraphicsPipelineCreateInfo-layout-00756"],
            PipelineBindPoint::Compute => &["VUID-VkComputePipelineCreateInfo-layout-00703"],
            PipelineBindPoint::RayTracing => {
                &["VUID-VkRayTracingPipelineCreateInfoKHR-layout-03427"]
            }
        };

        if let PipelineCreateInfo::Graphics(graphics) = create_info {
            if let Some(render_pass) = self.registry.render_passes.get(graphics.render_pass) {
                if graphics.subpass >= render_pass.subpass_count() {
                    errors.push(Box::new(ValidationError {
                        context: "subpass".into(),
                        problem: format!(
                            "{} is not less than the number of subpasses of the render pass ({})",
                            graphics.subpass,
                            render_pass.subpass_count(),
                        )
                        .into(),
                        vuids: &["VUID-VkGraphicsPipelineCreateInfo-subpass-00759"],
                        kind: ErrorKind::ParameterOutOfRange,
                        objects: [render_pass.typed_handle()].into_iter().collect(),
                        ..Default::default()
                    }));
                }
            }

            let max_viewports = self.device_info.limits.max_viewports;

            if graphics.viewport_count > max_viewports {
                errors.push(Box::new(ValidationError {
                    context: "viewport_count".into(),
                    problem: format!(
                        "{} exceeds the `max_viewports` limit ({})",
                        graphics.viewport_count, max_viewports,
                    )
                    .into(),
                    vuids: &["VUID-VkPipelineViewportStateCreateInfo-viewportCount-01218"],
                    kind: ErrorKind::ParameterOutOfRange,
                    ..Default::default()
                }));
            }

            if graphics.scissor_count != graphics.viewport_count {
                errors.push(Box::new(ValidationError {
                    context: "scissor_count".into(),
                    problem: format!(
                        "{} does not equal viewport_count ({})",
                        graphics.scissor_count, graphics.viewport_count,
                    )
                    .into(),
                    vuids: &["VUID-VkPipelineViewportStateCreateInfo-scissorCount-01220"],
                    kind: ErrorKind::ParameterOutOfRange,
                    ..Default::default()
                }));
            }
        }

        let features = &self.device_info.enabled_features;
        let mut seen = ShaderStages::empty();

        for (index, stage) in create_info.stages().iter().enumerate() {
            let context = format!("stages[{}]", index);

            if seen.intersects(stage.stage) && bind_point == PipelineBindPoint::Graphics {
                errors.push(Box::new(ValidationError {
                    context: context.clone().into(),
                    problem: format!("the {:?} stage appears more than once", stage.stage).into(),
                    vuids: &["VUID-VkGraphicsPipelineCreateInfo-stage-00726"],
                    kind: ErrorKind::ParameterOutOfRange,
                    ..Default::default()
                }));
            }

            seen |= stage.stage;

            if stage.stage.intersects(ShaderStages::GEOMETRY) && !features.geometry_shader {
                errors.push(Box::new(ValidationError {
                    context: format!("{}.stage", context).into(),
                    problem: "is `GEOMETRY`, but the `geometry_shader` feature is not enabled"
                        .into(),
                    vuids: &["VUID-VkPipelineShaderStageCreateInfo-stage-00704"],
                    kind: ErrorKind::MissingPrerequisite,
                    ..Default::default()
                }));
            }

            if stage.stage.intersects(
                ShaderStages::TESSELLATION_CONTROL | ShaderStages::TESSELLATION_EVALUATION,
            ) && !features.tessellation_shader
            {
                errors.push(Box::new(ValidationError {
                    context: format!("{}.stage", context).into(),
                    problem: "is a tessellation stage, but the `tessellation_shader` feature is \
                        not enabled"
                        .into(),
                    vuids: &["VUID-VkPipelineShaderStageCreateInfo-stage-00705"],
                    kind: ErrorKind::MissingPrerequisite,
                    ..Default::default()
                }));
            }

            let Some(module) = self.registry.shader_modules.get(stage.module) else {
                continue;
            };

            let Some(entry_point) = module.entry_point(&stage.entry_point, stage.stage) else {
                errors.push(Box::new(ValidationError {
                    context: format!("{}.entry_point", context).into(),
                    problem: format!(
                        "{} has no entry point named `{}` for the {:?} stage",
                        self.format_handle(module.typed_handle()),
                        stage.entry_point,
                        stage.stage,
                    )
                    .into(),
                    vuids: &["VUID-VkPipelineShaderStageCreateInfo-pName-00707"],
                    kind: ErrorKind::StateIncompatible,
                    objects: [module.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
                continue;
            };

            if let Some(error) = self.validate_entry_point_interface(entry_point, &layout, layout_vuids)
            {
                errors.push(error.add_context(context.clone()));
            }

            if let Some(validator) = &self.shader_validator {
                let cache = self.validation_cache(module.create_info.validation_cache);

                for error in validator.validate_stage(&module, stage, bind_point, cache.as_deref()) {
                    errors.push(error.add_context(context.clone()));
                }
            }
        }

        errors
    }

    /// `vkCreateGraphicsPipelines`, `vkCreateComputePipelines` and `vkCreateRayTracingPipelinesKHR`.
    pub fn validate_create_pipelines(&self, create_infos: &[PipelineCreateInfo]) -> bool {
        let mut skip = false;

        for (index, create_info) in create_infos.iter().enumerate() {
            let context = format!("create_infos[{}]", index);

            skip |= self.emit_all(
                self.validate_create_pipeline(create_info)
                    .into_iter()
                    .map(|error| error.add_context(context.clone())),
            );
        }

        skip
    }

    pub fn record_create_pipelines(
        &self,
        pipelines: &[vk::Pipeline],
        create_infos: &[PipelineCreateInfo],
    ) {
        for (&pipeline, create_info) in pipelines.iter().zip(create_infos) {
            if pipeline == vk::Pipeline::null() {
                continue;
            }

            let Some(layout) = self.registry.pipeline_layouts.get(create_info.layout()) else {
                continue;
            };

            let modules: Vec<_> = create_info
                .stages()
                .iter()
                .map(|stage| self.registry.shader_modules.get(stage.module))
                .collect();
            let render_pass = match create_info {
                PipelineCreateInfo::Graphics(graphics) => {
                    self.registry.render_passes.get(graphics.render_pass)
                }
                _ => None,
            };

            self.registry.pipelines.insert(Arc::new(PipelineState::new(
                pipeline,
                create_info.clone(),
                &modules,
                layout,
                render_pass,
            )));
        }
    }

    pub fn validate_destroy_pipeline(&self, pipeline: vk::Pipeline) -> bool {
        self.validate_destroy(
            &self.registry.pipelines,
            pipeline,
            &["VUID-vkDestroyPipeline-pipeline-00765"],
        )
    }

    pub fn record_destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy_object(&self.registry.pipelines, pipeline, BindingBreak::Destroyed);
    }

    /// Without a cache factory the handle behaves as an empty cache.
    pub fn record_create_validation_cache(
        &self,
        cache: vk::ValidationCacheEXT,
        initial_data: &[u8],
    ) {
        let Some(factory) = &self.validation_cache_factory else {
            return;
        };

        self.validation_caches
            .write()
            .insert(cache, factory(initial_data));
    }

    /// `vkGetValidationCacheDataEXT`.
    pub fn get_validation_cache_data(&self, cache: vk::ValidationCacheEXT) -> Vec<u8> {
        self.validation_cache(cache)
            .map(|cache| cache.write())
            .unwrap_or_default()
    }

    pub fn validate_merge_validation_caches(
        &self,
        dst_cache: vk::ValidationCacheEXT,
        src_caches: &[vk::ValidationCacheEXT],
    ) -> bool {
        let Some(index) = src_caches.iter().position(|&src| src == dst_cache) else {
            return false;
        };

        self.emit(Box::new(ValidationError {
            context: format!("src_caches[{}]", index).into(),
            problem: "is the same cache as dst_cache".into(),
            vuids: &["VUID-vkMergeValidationCachesEXT-dstCache-01536"],
            kind: ErrorKind::ParameterOutOfRange,
            objects: [crate::TypedHandle::new(dst_cache)].into_iter().collect(),
            ..Default::default()
        }))
    }

    pub fn record_merge_validation_caches(
        &self,
        dst_cache: vk::ValidationCacheEXT,
        src_caches: &[vk::ValidationCacheEXT],
    ) {
        let Some(dst) = self.validation_cache(dst_cache) else {
            return;
        };

        for &src in src_caches.iter().filter(|&&src| src != dst_cache) {
            if let Some(src) = self.validation_cache(src) {
                dst.merge(&*src);
            }
        }
    }

    pub fn record_destroy_validation_cache(&self, cache: vk::ValidationCacheEXT) {
        self.validation_caches.write().remove(&cache);
    }
}
