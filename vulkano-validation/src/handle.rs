//! Typed references to driver objects.
//!
//! Vulkan handles are opaque 64-bit values. A [`TypedHandle`] pairs such a value with the kind of
//! object it refers to, which is what the registry and the diagnostics use to name objects.

use crate::macros::vulkan_enum;
use ash::vk::Handle;
use std::fmt::{Display, Error as FmtError, Formatter};

vulkan_enum! {
    /// The kind of a driver object.
    ObjectType = ObjectType(i32);

    Unknown = UNKNOWN,
    Instance = INSTANCE,
    PhysicalDevice = PHYSICAL_DEVICE,
    Device = DEVICE,
    Queue = QUEUE,
    Semaphore = SEMAPHORE,
    CommandBuffer = COMMAND_BUFFER,
    Fence = FENCE,
    DeviceMemory = DEVICE_MEMORY,
    Buffer = BUFFER,
    Image = IMAGE,
    Event = EVENT,
    QueryPool = QUERY_POOL,
    BufferView = BUFFER_VIEW,
    ImageView = IMAGE_VIEW,
    ShaderModule = SHADER_MODULE,
    PipelineCache = PIPELINE_CACHE,
    PipelineLayout = PIPELINE_LAYOUT,
    RenderPass = RENDER_PASS,
    Pipeline = PIPELINE,
    DescriptorSetLayout = DESCRIPTOR_SET_LAYOUT,
    Sampler = SAMPLER,
    DescriptorPool = DESCRIPTOR_POOL,
    DescriptorSet = DESCRIPTOR_SET,
    Framebuffer = FRAMEBUFFER,
    CommandPool = COMMAND_POOL,
    SamplerYcbcrConversion = SAMPLER_YCBCR_CONVERSION,
    Surface = SURFACE_KHR,
    Swapchain = SWAPCHAIN_KHR,
    Display = DISPLAY_KHR,
    AccelerationStructure = ACCELERATION_STRUCTURE_KHR,
    ValidationCache = VALIDATION_CACHE_EXT,
}

impl ObjectType {
    /// Returns the name of the Vulkan type, e.g. `VkImage`.
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Instance => "VkInstance",
            Self::PhysicalDevice => "VkPhysicalDevice",
            Self::Device => "VkDevice",
            Self::Queue => "VkQueue",
            Self::Semaphore => "VkSemaphore",
            Self::CommandBuffer => "VkCommandBuffer",
            Self::Fence => "VkFence",
            Self::DeviceMemory => "VkDeviceMemory",
            Self::Buffer => "VkBuffer",
            Self::Image => "VkImage",
            Self::Event => "VkEvent",
            Self::QueryPool => "VkQueryPool",
            Self::BufferView => "VkBufferView",
            Self::ImageView => "VkImageView",
            Self::ShaderModule => "VkShaderModule",
            Self::PipelineCache => "VkPipelineCache",
            Self::PipelineLayout => "VkPipelineLayout",
            Self::RenderPass => "VkRenderPass",
            Self::Pipeline => "VkPipeline",
            Self::DescriptorSetLayout => "VkDescriptorSetLayout",
            Self::Sampler => "VkSampler",
            Self::DescriptorPool => "VkDescriptorPool",
            Self::DescriptorSet => "VkDescriptorSet",
            Self::Framebuffer => "VkFramebuffer",
            Self::CommandPool => "VkCommandPool",
            Self::SamplerYcbcrConversion => "VkSamplerYcbcrConversion",
            Self::Surface => "VkSurfaceKHR",
            Self::Swapchain => "VkSwapchainKHR",
            Self::Display => "VkDisplayKHR",
            Self::AccelerationStructure => "VkAccelerationStructureKHR",
            Self::ValidationCache => "VkValidationCacheEXT",
        }
    }
}

/// A raw handle together with the kind of object it refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypedHandle {
    pub object_type: ObjectType,
    pub handle: u64,
}

impl TypedHandle {
    /// Creates a `TypedHandle` from an `ash` handle, whose type determines the object type.
    ///
    /// # Panics
    ///
    /// - Panics if `H` is a handle type that the layer does not track.
    #[inline]
    pub fn new<H: Handle>(handle: H) -> Self {
        let object_type = ObjectType::try_from(H::TYPE)
            .unwrap_or_else(|()| panic!("untracked handle type {:?}", H::TYPE));

        Self {
            object_type,
            handle: handle.as_raw(),
        }
    }

    #[inline]
    pub const fn from_raw(object_type: ObjectType, handle: u64) -> Self {
        Self {
            object_type,
            handle,
        }
    }

    /// Returns the handle as `H`, if `H` is the matching handle type.
    #[inline]
    pub fn cast<H: Handle>(self) -> Option<H> {
        (ash::vk::ObjectType::from(self.object_type) == H::TYPE).then(|| H::from_raw(self.handle))
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.handle == 0
    }
}

impl Display for TypedHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{} 0x{:x}", self.object_type.type_name(), self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::{ObjectType, TypedHandle};
    use ash::vk::{self, Handle};

    #[test]
    fn typed_from_ash() {
        let image = vk::Image::from_raw(0x1f);
        let typed = TypedHandle::new(image);

        assert_eq!(typed.object_type, ObjectType::Image);
        assert_eq!(typed.cast::<vk::Image>(), Some(image));
        assert_eq!(typed.cast::<vk::Buffer>(), None);
        assert_eq!(typed.to_string(), "VkImage 0x1f");
    }

    #[test]
    fn object_type_names() {
        assert_eq!(ObjectType::Swapchain.type_name(), "VkSwapchainKHR");
        assert_eq!(ObjectType::Swapchain.name(), "SWAPCHAIN_KHR");
    }
}
