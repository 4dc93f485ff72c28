//! Shader modules, and the collaborators that look inside them.
//!
//! The layer does not parse SPIR-V. Whoever creates the layer reflects each module once and hands
//! over the surface metadata of its entry points: the descriptors each one uses and the push
//! constant range it reads. Deeper checks on the code itself are delegated to a
//! [`ShaderStageValidator`].

use crate::{
    descriptor_set::layout::DescriptorType,
    handle::TypedHandle,
    macros::vulkan_bitflags,
    pipeline::PipelineBindPoint,
    registry::{impl_state_object, ObjectBase},
    ValidationError,
};
use ash::vk;
use foldhash::HashMap;
use std::sync::Arc;

vulkan_bitflags! {
    /// A set of shader stages.
    ShaderStages
    impl {
        /// Returns the bind point that pipelines containing these stages are bound to.
        pub fn bind_point(self) -> Option<PipelineBindPoint> {
            if self.intersects(Self::COMPUTE) {
                Some(PipelineBindPoint::Compute)
            } else if self.intersects(Self::RAYGEN | Self::ANY_HIT | Self::CLOSEST_HIT | Self::MISS | Self::INTERSECTION | Self::CALLABLE) {
                Some(PipelineBindPoint::RayTracing)
            } else if self.intersects(Self::ALL_GRAPHICS) {
                Some(PipelineBindPoint::Graphics)
            } else {
                None
            }
        }
    }
    = ShaderStageFlags(u32);

    VERTEX = VERTEX,
    TESSELLATION_CONTROL = TESSELLATION_CONTROL,
    TESSELLATION_EVALUATION = TESSELLATION_EVALUATION,
    GEOMETRY = GEOMETRY,
    FRAGMENT = FRAGMENT,
    ALL_GRAPHICS = ALL_GRAPHICS,
    COMPUTE = COMPUTE,
    RAYGEN = RAYGEN_KHR,
    ANY_HIT = ANY_HIT_KHR,
    CLOSEST_HIT = CLOSEST_HIT_KHR,
    MISS = MISS_KHR,
    INTERSECTION = INTERSECTION_KHR,
    CALLABLE = CALLABLE_KHR,
    TASK = TASK_EXT,
    MESH = MESH_EXT,
}

/// What an entry point needs from the descriptor at one `(set, binding)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorBindingRequirements {
    /// The descriptor types the shader can work with. Empty means any.
    pub descriptor_types: Vec<DescriptorType>,

    /// The number of array elements the shader accesses.
    pub descriptor_count: u32,

    /// The stages that access the binding.
    pub stages: ShaderStages,

    /// Whether the shader writes through the descriptor.
    pub memory_write: bool,
}

/// Surface metadata of one entry point.
#[derive(Clone, Debug, Default)]
pub struct EntryPointInfo {
    pub name: String,
    pub stage: ShaderStages,
    pub descriptor_binding_requirements: HashMap<(u32, u32), DescriptorBindingRequirements>,

    /// The `(offset, size)` of the push constants the entry point reads.
    pub push_constant_requirements: Option<(u32, u32)>,
}

/// Parameters of a shader module.
#[derive(Clone, Debug)]
pub struct ShaderModuleCreateInfo {
    /// A digest of the code, used as the key of validation caches.
    pub code_hash: u64,
    pub entry_points: Vec<EntryPointInfo>,

    /// The cache given in a `VkShaderModuleValidationCacheCreateInfoEXT`, or null.
    pub validation_cache: vk::ValidationCacheEXT,
}

impl Default for ShaderModuleCreateInfo {
    #[inline]
    fn default() -> Self {
        ShaderModuleCreateInfo {
            code_hash: 0,
            entry_points: Vec::new(),
            validation_cache: vk::ValidationCacheEXT::null(),
        }
    }
}

/// State of a `VkShaderModule`.
#[derive(Debug)]
pub struct ShaderModuleState {
    base: ObjectBase,
    pub create_info: ShaderModuleCreateInfo,
}

impl_state_object!(ShaderModuleState, vk::ShaderModule);

impl ShaderModuleState {
    pub(crate) fn new(module: vk::ShaderModule, create_info: ShaderModuleCreateInfo) -> Self {
        ShaderModuleState {
            base: ObjectBase::new(TypedHandle::new(module)),
            create_info,
        }
    }

    /// Returns the entry point with the given name and stage.
    pub fn entry_point(&self, name: &str, stage: ShaderStages) -> Option<&EntryPointInfo> {
        self.create_info
            .entry_points
            .iter()
            .find(|entry_point| entry_point.name == name && entry_point.stage == stage)
    }
}

/// One stage of a pipeline, as given at pipeline creation.
#[derive(Clone, Debug)]
pub struct PipelineShaderStage {
    pub stage: ShaderStages,
    pub module: vk::ShaderModule,
    pub entry_point: String,
}

/// Validates the code of one pipeline stage.
///
/// Called once per stage when a pipeline is created. The layer emits every returned error.
pub trait ShaderStageValidator: Send + Sync {
    fn validate_stage(
        &self,
        module: &ShaderModuleState,
        stage: &PipelineShaderStage,
        bind_point: PipelineBindPoint,
        cache: Option<&dyn ValidationCache>,
    ) -> Vec<Box<ValidationError>>;
}

/// Stores digests of shader modules that already passed validation.
///
/// The format of the data blob belongs to the implementation; the layer only moves it around.
pub trait ValidationCache: Send + Sync {
    fn contains(&self, digest: u64) -> bool;

    fn insert(&self, digest: u64);

    /// Serializes the cache, as returned by `vkGetValidationCacheDataEXT`.
    fn write(&self) -> Vec<u8>;

    /// Adds every digest of `other`.
    fn merge(&self, other: &dyn ValidationCache);
}

/// Creates caches from the initial data given to `vkCreateValidationCacheEXT`.
pub type ValidationCacheFactory = Arc<dyn Fn(&[u8]) -> Arc<dyn ValidationCache> + Send + Sync>;
