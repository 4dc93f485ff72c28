//! Pipelines, and the state that binding them leaves in a command buffer.
//!
//! A [`PipelineState`] is built once, when the pipeline is created. It keeps the parts of the
//! create info that draw-time validation consults, and precomputes the union of what the
//! pipeline's shaders require from descriptor sets.

use self::layout::PipelineLayoutState;
use crate::{
    handle::TypedHandle,
    image::SampleCount,
    macros::vulkan_enum,
    registry::{impl_state_object, ObjectBase},
    render_pass::RenderPassState,
    shader::{DescriptorBindingRequirements, PipelineShaderStage, ShaderModuleState, ShaderStages},
};
use ash::vk;
use foldhash::HashMap;
use std::sync::Arc;

pub mod last_bound;
pub mod layout;

vulkan_enum! {
    /// The type of a pipeline, and the bind point it is bound to.
    PipelineBindPoint = PipelineBindPoint(i32);

    Graphics = GRAPHICS,
    Compute = COMPUTE,
    RayTracing = RAY_TRACING_KHR,
}

impl PipelineBindPoint {
    /// Returns the index of the bind point in per-bind-point arrays.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            PipelineBindPoint::Graphics => 0,
            PipelineBindPoint::Compute => 1,
            PipelineBindPoint::RayTracing => 2,
        }
    }
}

vulkan_enum! {
    /// A piece of pipeline state that is set by a command instead of by the pipeline.
    DynamicState = DynamicState(i32);

    Viewport = VIEWPORT,
    Scissor = SCISSOR,
    LineWidth = LINE_WIDTH,
    DepthBias = DEPTH_BIAS,
    BlendConstants = BLEND_CONSTANTS,
    DepthBounds = DEPTH_BOUNDS,
    StencilCompareMask = STENCIL_COMPARE_MASK,
    StencilWriteMask = STENCIL_WRITE_MASK,
    StencilReference = STENCIL_REFERENCE,
    ExclusiveScissor = EXCLUSIVE_SCISSOR_NV,
    ViewportShadingRatePalette = VIEWPORT_SHADING_RATE_PALETTE_NV,
    LineStipple = LINE_STIPPLE_EXT,
}

vulkan_enum! {
    /// How the vertex input assembler reads a vertex buffer binding.
    VertexInputRate = VertexInputRate(i32);

    Vertex = VERTEX,
    Instance = INSTANCE,
}

/// A vertex buffer binding slot of a graphics pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexInputBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

/// A vertex attribute of a graphics pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexInputAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}

/// Parameters of a graphics pipeline.
#[derive(Clone, Debug)]
pub struct GraphicsPipelineCreateInfo {
    pub stages: Vec<PipelineShaderStage>,
    pub vertex_bindings: Vec<VertexInputBinding>,
    pub vertex_attributes: Vec<VertexInputAttribute>,
    pub topology: vk::PrimitiveTopology,
    pub viewport_count: u32,
    pub scissor_count: u32,
    pub rasterizer_discard_enable: bool,
    pub rasterization_samples: SampleCount,

    /// Whether any color blend attachment uses a constant blend factor.
    pub blend_constants_enabled: bool,
    pub dynamic_states: Vec<DynamicState>,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
}

impl Default for GraphicsPipelineCreateInfo {
    #[inline]
    fn default() -> Self {
        GraphicsPipelineCreateInfo {
            stages: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            viewport_count: 1,
            scissor_count: 1,
            rasterizer_discard_enable: false,
            rasterization_samples: SampleCount::Sample1,
            blend_constants_enabled: false,
            dynamic_states: Vec::new(),
            layout: vk::PipelineLayout::null(),
            render_pass: vk::RenderPass::null(),
            subpass: 0,
        }
    }
}

/// Parameters of a compute pipeline.
#[derive(Clone, Debug)]
pub struct ComputePipelineCreateInfo {
    pub stage: PipelineShaderStage,
    pub layout: vk::PipelineLayout,
}

/// Parameters of a ray tracing pipeline.
#[derive(Clone, Debug, Default)]
pub struct RayTracingPipelineCreateInfo {
    pub stages: Vec<PipelineShaderStage>,
    pub layout: vk::PipelineLayout,
}

/// Parameters of a pipeline of any type.
#[derive(Clone, Debug)]
pub enum PipelineCreateInfo {
    Graphics(GraphicsPipelineCreateInfo),
    Compute(ComputePipelineCreateInfo),
    RayTracing(RayTracingPipelineCreateInfo),
}

impl PipelineCreateInfo {
    #[inline]
    pub fn bind_point(&self) -> PipelineBindPoint {
        match self {
            PipelineCreateInfo::Graphics(_) => PipelineBindPoint::Graphics,
            PipelineCreateInfo::Compute(_) => PipelineBindPoint::Compute,
            PipelineCreateInfo::RayTracing(_) => PipelineBindPoint::RayTracing,
        }
    }

    #[inline]
    pub fn stages(&self) -> &[PipelineShaderStage] {
        match self {
            PipelineCreateInfo::Graphics(create_info) => &create_info.stages,
            PipelineCreateInfo::Compute(create_info) => std::slice::from_ref(&create_info.stage),
            PipelineCreateInfo::RayTracing(create_info) => &create_info.stages,
        }
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        match self {
            PipelineCreateInfo::Graphics(create_info) => create_info.layout,
            PipelineCreateInfo::Compute(create_info) => create_info.layout,
            PipelineCreateInfo::RayTracing(create_info) => create_info.layout,
        }
    }
}

/// State of a `VkPipeline`.
#[derive(Debug)]
pub struct PipelineState {
    base: ObjectBase,
    pub create_info: PipelineCreateInfo,
    pub active_shaders: ShaderStages,

    /// Stages that appear more than once in the create info.
    pub duplicate_shaders: ShaderStages,

    /// The merged requirements of all stages, keyed by `(set, binding)`.
    pub descriptor_requirements: HashMap<(u32, u32), DescriptorBindingRequirements>,

    /// The set indices that some stage uses, in increasing order.
    pub active_slots: Vec<u32>,

    /// The render pass the pipeline was created against.
    pub render_pass: Option<Arc<RenderPassState>>,

    /// The layout the pipeline was created with. Kept alive even if the application destroys
    /// the layout object.
    pub layout: Arc<PipelineLayoutState>,
}

impl_state_object!(PipelineState, vk::Pipeline);

impl PipelineState {
    pub(crate) fn new(
        pipeline: vk::Pipeline,
        create_info: PipelineCreateInfo,
        modules: &[Option<Arc<ShaderModuleState>>],
        layout: Arc<PipelineLayoutState>,
        render_pass: Option<Arc<RenderPassState>>,
    ) -> Self {
        let mut active_shaders = ShaderStages::empty();
        let mut duplicate_shaders = ShaderStages::empty();
        let mut descriptor_requirements: HashMap<(u32, u32), DescriptorBindingRequirements> =
            HashMap::default();

        for (stage, module) in create_info.stages().iter().zip(modules) {
            if active_shaders.intersects(stage.stage) {
                duplicate_shaders |= stage.stage;
            }

            active_shaders |= stage.stage;

            let Some(entry_point) = module
                .as_ref()
                .and_then(|module| module.entry_point(&stage.entry_point, stage.stage))
            else {
                continue;
            };

            for (&key, reqs) in &entry_point.descriptor_binding_requirements {
                let merged = descriptor_requirements.entry(key).or_default();
                merge_requirements(merged, reqs);
            }
        }

        let mut active_slots: Vec<u32> = descriptor_requirements.keys().map(|&(set, _)| set).collect();
        active_slots.sort_unstable();
        active_slots.dedup();

        PipelineState {
            base: ObjectBase::new(TypedHandle::new(pipeline)),
            create_info,
            active_shaders,
            duplicate_shaders,
            descriptor_requirements,
            active_slots,
            render_pass,
            layout,
        }
    }

    #[inline]
    pub fn bind_point(&self) -> PipelineBindPoint {
        self.create_info.bind_point()
    }

    /// Returns the graphics create info, if this is a graphics pipeline.
    #[inline]
    pub fn graphics(&self) -> Option<&GraphicsPipelineCreateInfo> {
        match &self.create_info {
            PipelineCreateInfo::Graphics(create_info) => Some(create_info),
            _ => None,
        }
    }

    /// Returns whether `state` is set by commands rather than by the pipeline.
    #[inline]
    pub fn is_dynamic(&self, state: DynamicState) -> bool {
        self.graphics()
            .is_some_and(|create_info| create_info.dynamic_states.contains(&state))
    }

    #[inline]
    pub fn is_rasterizer_discard_enabled(&self) -> bool {
        self.graphics()
            .is_some_and(|create_info| create_info.rasterizer_discard_enable)
    }

    /// Returns the `(set, binding)` pairs the pipeline uses in `set`, sorted by binding.
    pub fn bindings_used_in_set(&self, set: u32) -> Vec<u32> {
        let mut bindings: Vec<u32> = self
            .descriptor_requirements
            .keys()
            .filter(|&&(s, _)| s == set)
            .map(|&(_, binding)| binding)
            .collect();
        bindings.sort_unstable();

        bindings
    }
}

fn merge_requirements(
    merged: &mut DescriptorBindingRequirements,
    reqs: &DescriptorBindingRequirements,
) {
    if merged.descriptor_types.is_empty() {
        merged.descriptor_types = reqs.descriptor_types.clone();
    } else if !reqs.descriptor_types.is_empty() {
        merged
            .descriptor_types
            .retain(|ty| reqs.descriptor_types.contains(ty));
    }

    merged.descriptor_count = merged.descriptor_count.max(reqs.descriptor_count);
    merged.stages |= reqs.stages;
    merged.memory_write |= reqs.memory_write;
}

#[cfg(test)]
mod tests {
    use super::{
        layout::{LayoutInterner, PipelineLayoutState},
        ComputePipelineCreateInfo, GraphicsPipelineCreateInfo, PipelineBindPoint,
        PipelineCreateInfo, PipelineState,
    };
    use crate::{
        descriptor_set::layout::DescriptorType,
        shader::{
            DescriptorBindingRequirements, EntryPointInfo, PipelineShaderStage,
            ShaderModuleCreateInfo, ShaderModuleState, ShaderStages,
        },
    };
    use ash::vk::{self, Handle};
    use std::sync::Arc;

    fn module(stage: ShaderStages, set: u32, ty: DescriptorType) -> Arc<ShaderModuleState> {
        let mut entry_point = EntryPointInfo {
            name: "main".into(),
            stage,
            ..Default::default()
        };
        entry_point.descriptor_binding_requirements.insert(
            (set, 0),
            DescriptorBindingRequirements {
                descriptor_types: vec![ty],
                descriptor_count: 1,
                stages: stage,
                memory_write: false,
            },
        );

        Arc::new(ShaderModuleState::new(
            vk::ShaderModule::from_raw(stage.as_raw() as u64),
            ShaderModuleCreateInfo {
                code_hash: 0,
                entry_points: vec![entry_point],
                validation_cache: vk::ValidationCacheEXT::null(),
            },
        ))
    }

    fn stage(module: &ShaderModuleState, stage: ShaderStages) -> PipelineShaderStage {
        use crate::registry::StateObject;

        PipelineShaderStage {
            stage,
            module: module.handle(),
            entry_point: "main".into(),
        }
    }

    #[test]
    fn merges_requirements() {
        let interner = LayoutInterner::default();
        let layout = Arc::new(PipelineLayoutState::new(
            vk::PipelineLayout::from_raw(1),
            vec![],
            &interner,
            &[],
        ));
        let vs = module(ShaderStages::VERTEX, 0, DescriptorType::UniformBuffer);
        let fs = module(ShaderStages::FRAGMENT, 2, DescriptorType::SampledImage);
        let create_info = PipelineCreateInfo::Graphics(GraphicsPipelineCreateInfo {
            stages: vec![
                stage(&vs, ShaderStages::VERTEX),
                stage(&fs, ShaderStages::FRAGMENT),
                stage(&fs, ShaderStages::FRAGMENT),
            ],
            ..Default::default()
        });
        let pipeline = PipelineState::new(
            vk::Pipeline::from_raw(9),
            create_info,
            &[Some(vs.clone()), Some(fs.clone()), Some(fs)],
            layout,
            None,
        );

        assert_eq!(pipeline.bind_point(), PipelineBindPoint::Graphics);
        assert_eq!(
            pipeline.active_shaders,
            ShaderStages::VERTEX | ShaderStages::FRAGMENT
        );
        assert_eq!(pipeline.duplicate_shaders, ShaderStages::FRAGMENT);
        assert_eq!(pipeline.active_slots, vec![0, 2]);
        assert_eq!(pipeline.bindings_used_in_set(2), vec![0]);
    }

    #[test]
    fn compute_bind_point() {
        let interner = LayoutInterner::default();
        let layout = Arc::new(PipelineLayoutState::new(
            vk::PipelineLayout::from_raw(1),
            vec![],
            &interner,
            &[],
        ));
        let cs = module(ShaderStages::COMPUTE, 0, DescriptorType::StorageBuffer);
        let pipeline = PipelineState::new(
            vk::Pipeline::from_raw(3),
            PipelineCreateInfo::Compute(ComputePipelineCreateInfo {
                stage: stage(&cs, ShaderStages::COMPUTE),
                layout: vk::PipelineLayout::from_raw(1),
            }),
            &[Some(cs)],
            layout,
            None,
        );

        assert_eq!(pipeline.bind_point(), PipelineBindPoint::Compute);
        assert!(!pipeline.is_rasterizer_discard_enabled());
    }
}
