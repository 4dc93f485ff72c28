//! What the layer knows about the device it validates.
//!
//! The layer never queries the driver itself. The dispatch code that creates the layer fills in a
//! [`DeviceInfo`] from the physical-device queries and the `VkDeviceCreateInfo`, and every check
//! that depends on a limit, a feature or an extension reads it from there.

use crate::{macros::vulkan_bitflags, memory::MemoryType, DeviceSize};

vulkan_bitflags! {
    /// Attributes of a queue family.
    QueueFlags = QueueFlags(u32);

    GRAPHICS = GRAPHICS,
    COMPUTE = COMPUTE,
    TRANSFER = TRANSFER,
    SPARSE_BINDING = SPARSE_BINDING,
    PROTECTED = PROTECTED,
}

/// Properties of a queue family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyProperties {
    pub queue_flags: QueueFlags,
    pub queue_count: u32,
}

impl Default for QueueFamilyProperties {
    #[inline]
    fn default() -> Self {
        QueueFamilyProperties {
            queue_flags: QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER,
            queue_count: 1,
        }
    }
}

/// The limits of the physical device that validation depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_bound_descriptor_sets: u32,
    pub max_push_constants_size: u32,
    pub max_push_descriptors: u32,
    pub max_viewports: u32,
    pub max_vertex_input_bindings: u32,
    pub max_color_attachments: u32,
    pub max_framebuffer_width: u32,
    pub max_framebuffer_height: u32,
    pub max_framebuffer_layers: u32,
    pub min_memory_map_alignment: usize,
    pub non_coherent_atom_size: DeviceSize,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        DeviceLimits {
            max_bound_descriptor_sets: 8,
            max_push_constants_size: 128,
            max_push_descriptors: 32,
            max_viewports: 16,
            max_vertex_input_bindings: 16,
            max_color_attachments: 8,
            max_framebuffer_width: 16384,
            max_framebuffer_height: 16384,
            max_framebuffer_layers: 2048,
            min_memory_map_alignment: 64,
            non_coherent_atom_size: 64,
        }
    }
}

/// The enabled features that validation depends on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceFeatures {
    pub geometry_shader: bool,
    pub tessellation_shader: bool,
    pub occlusion_query_precise: bool,
    pub pipeline_statistics_query: bool,
    pub inherited_queries: bool,
    pub host_query_reset: bool,
    pub imageless_framebuffer: bool,
    pub multiview: bool,
    pub shading_rate_image: bool,
}

/// The enabled extensions that validation depends on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceExtensions {
    pub khr_push_descriptor: bool,
    pub khr_swapchain: bool,
    pub khr_shared_presentable_image: bool,
    pub ext_transform_feedback: bool,
    pub amd_mixed_attachment_samples: bool,
    pub nv_framebuffer_mixed_samples: bool,
}

/// Everything the layer knows about its device.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub queue_family_properties: Vec<QueueFamilyProperties>,
    pub memory_types: Vec<MemoryType>,
    pub limits: DeviceLimits,
    pub enabled_features: DeviceFeatures,
    pub enabled_extensions: DeviceExtensions,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        use crate::memory::MemoryPropertyFlags as M;

        DeviceInfo {
            queue_family_properties: vec![QueueFamilyProperties::default()],
            memory_types: vec![
                MemoryType {
                    property_flags: M::DEVICE_LOCAL,
                    heap_index: 0,
                },
                MemoryType {
                    property_flags: M::HOST_VISIBLE | M::HOST_COHERENT,
                    heap_index: 1,
                },
                MemoryType {
                    property_flags: M::HOST_VISIBLE | M::HOST_CACHED,
                    heap_index: 1,
                },
            ],
            limits: DeviceLimits::default(),
            enabled_features: DeviceFeatures::default(),
            enabled_extensions: DeviceExtensions::default(),
        }
    }
}

impl DeviceInfo {
    #[inline]
    pub fn queue_family(&self, index: u32) -> Option<&QueueFamilyProperties> {
        self.queue_family_properties.get(index as usize)
    }

    #[inline]
    pub fn memory_type(&self, index: u32) -> Option<&MemoryType> {
        self.memory_types.get(index as usize)
    }

    /// Returns the flags of a queue family, or empty flags if the index is out of range.
    #[inline]
    pub fn queue_flags(&self, queue_family_index: u32) -> QueueFlags {
        self.queue_family(queue_family_index)
            .map_or(QueueFlags::empty(), |properties| properties.queue_flags)
    }
}
