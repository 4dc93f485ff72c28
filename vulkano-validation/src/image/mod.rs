//! Image and image view state.
//!
//! An image is a multidimensional array of texels, divided into subresources by aspect, mip level
//! and array layer. Each subresource is in one [`ImageLayout`] at a time. The layouts that
//! submitted work has left an image in are tracked per image; the layouts a command buffer will
//! expect and produce are tracked per command buffer in an [`ImageSubresourceLayoutMap`].
//!
//! [`ImageSubresourceLayoutMap`]: layout_map::ImageSubresourceLayoutMap

use self::layout_map::{GlobalImageLayouts, SubresourceEncoder};
use crate::{
    format::format_aspects,
    handle::TypedHandle,
    macros::{vulkan_bitflags, vulkan_enum},
    memory::{Bindable, ExternalMemoryHandleTypes, MemoryRequirements},
    registry::{impl_state_object, ObjectBase},
    sync::Sharing,
    DeviceSize, ErrorKind, ValidationError,
};
use ash::vk;
use parking_lot::Mutex;
use std::sync::Arc;

pub mod layout_map;

vulkan_bitflags! {
    /// An individual data type within an image.
    ImageAspects = ImageAspectFlags(u32);

    COLOR = COLOR,
    DEPTH = DEPTH,
    STENCIL = STENCIL,
    METADATA = METADATA,
    PLANE_0 = PLANE_0,
    PLANE_1 = PLANE_1,
    PLANE_2 = PLANE_2,
}

vulkan_enum! {
    /// In-memory layout of the texel data of an image subresource.
    ///
    /// Every subresource is in exactly one layout at a time. Operations on an image are only
    /// allowed with specific layouts, and moving between layouts is done with a layout transition
    /// in a barrier or a render pass.
    ImageLayout = ImageLayout(i32);

    /// The contents are undefined. Transitioning from `Undefined` discards them.
    Undefined = UNDEFINED,
    General = GENERAL,
    ColorAttachmentOptimal = COLOR_ATTACHMENT_OPTIMAL,
    DepthStencilAttachmentOptimal = DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    DepthStencilReadOnlyOptimal = DEPTH_STENCIL_READ_ONLY_OPTIMAL,
    ShaderReadOnlyOptimal = SHADER_READ_ONLY_OPTIMAL,
    TransferSrcOptimal = TRANSFER_SRC_OPTIMAL,
    TransferDstOptimal = TRANSFER_DST_OPTIMAL,

    /// The initial data was written by the host. Only valid as an initial layout.
    Preinitialized = PREINITIALIZED,
    DepthReadOnlyStencilAttachmentOptimal = DEPTH_READ_ONLY_STENCIL_ATTACHMENT_OPTIMAL,
    DepthAttachmentStencilReadOnlyOptimal = DEPTH_ATTACHMENT_STENCIL_READ_ONLY_OPTIMAL,
    DepthAttachmentOptimal = DEPTH_ATTACHMENT_OPTIMAL,
    DepthReadOnlyOptimal = DEPTH_READ_ONLY_OPTIMAL,
    StencilAttachmentOptimal = STENCIL_ATTACHMENT_OPTIMAL,
    StencilReadOnlyOptimal = STENCIL_READ_ONLY_OPTIMAL,

    /// For swapchain images that are about to be presented.
    PresentSrc = PRESENT_SRC_KHR,

    /// For shared presentable images, which can be presented and accessed at the same time.
    SharedPresent = SHARED_PRESENT_KHR,
    FragmentShadingRateAttachmentOptimal = FRAGMENT_SHADING_RATE_ATTACHMENT_OPTIMAL_KHR,
    FragmentDensityMapOptimal = FRAGMENT_DENSITY_MAP_OPTIMAL_EXT,
}

impl Default for ImageLayout {
    #[inline]
    fn default() -> Self {
        ImageLayout::Undefined
    }
}

impl ImageLayout {
    /// Returns whether the layout may be used for a depth/stencil attachment that is only read.
    #[inline]
    pub fn is_read_only_depth_stencil(self) -> bool {
        matches!(
            self,
            ImageLayout::DepthStencilReadOnlyOptimal
                | ImageLayout::DepthReadOnlyOptimal
                | ImageLayout::StencilReadOnlyOptimal
        )
    }
}

vulkan_bitflags! {
    /// Describes how an image is going to be used.
    ImageUsage = ImageUsageFlags(u32);

    TRANSFER_SRC = TRANSFER_SRC,
    TRANSFER_DST = TRANSFER_DST,
    SAMPLED = SAMPLED,
    STORAGE = STORAGE,
    COLOR_ATTACHMENT = COLOR_ATTACHMENT,
    DEPTH_STENCIL_ATTACHMENT = DEPTH_STENCIL_ATTACHMENT,
    TRANSIENT_ATTACHMENT = TRANSIENT_ATTACHMENT,
    INPUT_ATTACHMENT = INPUT_ATTACHMENT,
    FRAGMENT_SHADING_RATE_ATTACHMENT = FRAGMENT_SHADING_RATE_ATTACHMENT_KHR,
    FRAGMENT_DENSITY_MAP = FRAGMENT_DENSITY_MAP_EXT,
}

vulkan_bitflags! {
    /// Flags specifying additional properties of an image.
    ImageCreateFlags = ImageCreateFlags(u32);

    SPARSE_BINDING = SPARSE_BINDING,
    SPARSE_RESIDENCY = SPARSE_RESIDENCY,
    SPARSE_ALIASED = SPARSE_ALIASED,
    MUTABLE_FORMAT = MUTABLE_FORMAT,
    CUBE_COMPATIBLE = CUBE_COMPATIBLE,
    ALIAS = ALIAS,
    SPLIT_INSTANCE_BIND_REGIONS = SPLIT_INSTANCE_BIND_REGIONS,
    ARRAY_2D_COMPATIBLE = TYPE_2D_ARRAY_COMPATIBLE,
    BLOCK_TEXEL_VIEW_COMPATIBLE = BLOCK_TEXEL_VIEW_COMPATIBLE,
    EXTENDED_USAGE = EXTENDED_USAGE,
    PROTECTED = PROTECTED,
    DISJOINT = DISJOINT,
}

impl ImageCreateFlags {
    /// The flags that make an image sparse.
    pub const SPARSE: Self = Self::SPARSE_BINDING
        .union(Self::SPARSE_RESIDENCY)
        .union(Self::SPARSE_ALIASED);
}

vulkan_enum! {
    /// The number of samples per texel of an image.
    SampleCount = SampleCountFlags(u32);

    Sample1 = TYPE_1,
    Sample2 = TYPE_2,
    Sample4 = TYPE_4,
    Sample8 = TYPE_8,
    Sample16 = TYPE_16,
    Sample32 = TYPE_32,
    Sample64 = TYPE_64,
}

impl Default for SampleCount {
    #[inline]
    fn default() -> Self {
        SampleCount::Sample1
    }
}

vulkan_enum! {
    /// The basic dimensionality of an image.
    ImageType = ImageType(i32);

    Dim1d = TYPE_1D,
    Dim2d = TYPE_2D,
    Dim3d = TYPE_3D,
}

vulkan_enum! {
    /// The type of an image view.
    ImageViewType = ImageViewType(i32);

    Dim1d = TYPE_1D,
    Dim2d = TYPE_2D,
    Dim3d = TYPE_3D,
    Cube = CUBE,
    Dim1dArray = TYPE_1D_ARRAY,
    Dim2dArray = TYPE_2D_ARRAY,
    CubeArray = CUBE_ARRAY,
}

/// A single subresource of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageSubresource {
    /// Exactly one aspect.
    pub aspect: ImageAspects,
    pub mip_level: u32,
    pub array_layer: u32,
}

/// One or more subresources of an image.
///
/// `level_count` and `layer_count` may be `vk::REMAINING_MIP_LEVELS` and
/// `vk::REMAINING_ARRAY_LAYERS` until the range is [normalized](Self::normalize).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageSubresourceRange {
    pub aspects: ImageAspects,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl Default for ImageSubresourceRange {
    #[inline]
    fn default() -> Self {
        ImageSubresourceRange {
            aspects: ImageAspects::COLOR,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        }
    }
}

impl ImageSubresourceRange {
    /// Returns the range covering a whole image with the given parameters.
    #[inline]
    pub fn from_parameters(format: vk::Format, mip_levels: u32, array_layers: u32) -> Self {
        ImageSubresourceRange {
            aspects: format_aspects(format),
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: array_layers,
        }
    }

    /// Resolves the `REMAINING` counts against `full_range` and clamps the range to it.
    ///
    /// Asking for the color aspect of a multi-planar image selects all of its planes.
    pub fn normalize(&self, full_range: &ImageSubresourceRange) -> Self {
        let planes = ImageAspects::PLANE_0 | ImageAspects::PLANE_1 | ImageAspects::PLANE_2;
        let mut aspects = self.aspects;

        if aspects.intersects(ImageAspects::COLOR) && full_range.aspects.intersects(planes) {
            aspects = (aspects - ImageAspects::COLOR) | full_range.aspects;
        }

        let base_mip_level = self.base_mip_level.min(full_range.level_count);
        let base_array_layer = self.base_array_layer.min(full_range.layer_count);

        let level_count = if self.level_count == vk::REMAINING_MIP_LEVELS {
            full_range.level_count - base_mip_level
        } else {
            self.level_count.min(full_range.level_count - base_mip_level)
        };

        let layer_count = if self.layer_count == vk::REMAINING_ARRAY_LAYERS {
            full_range.layer_count - base_array_layer
        } else {
            self.layer_count.min(full_range.layer_count - base_array_layer)
        };

        ImageSubresourceRange {
            aspects: aspects & full_range.aspects,
            base_mip_level,
            level_count,
            base_array_layer,
            layer_count,
        }
    }

    #[inline]
    pub fn contains(&self, subresource: &ImageSubresource) -> bool {
        self.aspects.contains(subresource.aspect)
            && (self.base_mip_level..self.base_mip_level + self.level_count)
                .contains(&subresource.mip_level)
            && (self.base_array_layer..self.base_array_layer + self.layer_count)
                .contains(&subresource.array_layer)
    }

    /// Returns whether the two ranges, both normalized, share any subresource.
    pub fn overlaps(&self, other: &ImageSubresourceRange) -> bool {
        fn overlaps(a_base: u32, a_count: u32, b_base: u32, b_count: u32) -> bool {
            a_base < b_base + b_count && b_base < a_base + a_count
        }

        self.aspects.intersects(other.aspects)
            && overlaps(
                self.base_mip_level,
                self.level_count,
                other.base_mip_level,
                other.level_count,
            )
            && overlaps(
                self.base_array_layer,
                self.layer_count,
                other.base_array_layer,
                other.layer_count,
            )
    }

    /// Checks that the range lies within `full_range`.
    pub(crate) fn validate_within(
        &self,
        full_range: &ImageSubresourceRange,
    ) -> Result<(), Box<ValidationError>> {
        if self.aspects.is_empty() {
            return Err(Box::new(ValidationError {
                context: "aspects".into(),
                problem: "is empty".into(),
                vuids: &["VUID-VkImageSubresourceRange-aspectMask-requiredbitmask"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if self.base_mip_level >= full_range.level_count {
            return Err(Box::new(ValidationError {
                context: "base_mip_level".into(),
                problem: format!(
                    "{} is not less than the mip level count of the image ({})",
                    self.base_mip_level, full_range.level_count,
                )
                .into(),
                vuids: &["VUID-VkImageSubresourceRange-baseMipLevel-01486"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if self.level_count != vk::REMAINING_MIP_LEVELS
            && (self.level_count == 0
                || self.base_mip_level + self.level_count > full_range.level_count)
        {
            return Err(Box::new(ValidationError {
                context: "level_count".into(),
                problem: format!(
                    "base_mip_level + level_count ({} + {}) is greater than the mip level count \
                    of the image ({})",
                    self.base_mip_level, self.level_count, full_range.level_count,
                )
                .into(),
                vuids: &["VUID-VkImageSubresourceRange-levelCount-01724"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if self.base_array_layer >= full_range.layer_count {
            return Err(Box::new(ValidationError {
                context: "base_array_layer".into(),
                problem: format!(
                    "{} is not less than the array layer count of the image ({})",
                    self.base_array_layer, full_range.layer_count,
                )
                .into(),
                vuids: &["VUID-VkImageSubresourceRange-baseArrayLayer-01488"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if self.layer_count != vk::REMAINING_ARRAY_LAYERS
            && (self.layer_count == 0
                || self.base_array_layer + self.layer_count > full_range.layer_count)
        {
            return Err(Box::new(ValidationError {
                context: "layer_count".into(),
                problem: format!(
                    "base_array_layer + layer_count ({} + {}) is greater than the array layer \
                    count of the image ({})",
                    self.base_array_layer, self.layer_count, full_range.layer_count,
                )
                .into(),
                vuids: &["VUID-VkImageSubresourceRange-layerCount-01725"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        Ok(())
    }
}

/// Parameters of an image.
#[derive(Clone, Debug)]
pub struct ImageCreateInfo {
    pub flags: ImageCreateFlags,
    pub image_type: ImageType,
    pub format: vk::Format,
    pub extent: [u32; 3],
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: SampleCount,
    pub tiling: vk::ImageTiling,
    pub usage: ImageUsage,
    pub sharing: Sharing,
    pub initial_layout: ImageLayout,
    pub external_memory_handle_types: ExternalMemoryHandleTypes,

    /// Set if the image was created with a `VkImageSwapchainCreateInfoKHR`.
    pub swapchain: Option<vk::SwapchainKHR>,
}

impl Default for ImageCreateInfo {
    #[inline]
    fn default() -> Self {
        ImageCreateInfo {
            flags: ImageCreateFlags::empty(),
            image_type: ImageType::Dim2d,
            format: vk::Format::R8G8B8A8_UNORM,
            extent: [1, 1, 1],
            mip_levels: 1,
            array_layers: 1,
            samples: SampleCount::Sample1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: ImageUsage::empty(),
            sharing: Sharing::Exclusive,
            initial_layout: ImageLayout::Undefined,
            external_memory_handle_types: ExternalMemoryHandleTypes::empty(),
            swapchain: None,
        }
    }
}

/// Sparse memory requirements of one aspect of an image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SparseImageMemoryRequirements {
    pub aspects: ImageAspects,
    pub image_mip_tail_first_lod: u32,
    pub image_mip_tail_size: DeviceSize,
    pub image_mip_tail_offset: DeviceSize,
    pub image_mip_tail_stride: DeviceSize,
}

/// A swapchain image slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SwapchainImageIndex {
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
}

#[derive(Debug)]
pub(crate) struct ImageMut {
    pub(crate) acquired: bool,
    pub(crate) layout_locked: bool,
    pub(crate) sparse_metadata_bound: bool,
    pub(crate) bind_swapchain: Option<SwapchainImageIndex>,
    pub(crate) layouts: GlobalImageLayouts,
}

/// State of a `VkImage`.
#[derive(Debug)]
pub struct ImageState {
    base: ObjectBase,
    pub bindable: Bindable,
    pub create_info: ImageCreateInfo,
    full_range: ImageSubresourceRange,

    /// Set for images that are owned by a swapchain.
    pub swapchain_image: Option<SwapchainImageIndex>,
    pub sparse_requirements: Vec<SparseImageMemoryRequirements>,
    pub sparse_metadata_required: bool,
    encoder: SubresourceEncoder,
    pub(crate) state: Mutex<ImageMut>,
}

impl_state_object!(ImageState, vk::Image);

impl ImageState {
    pub(crate) fn new(
        image: vk::Image,
        create_info: ImageCreateInfo,
        requirements: MemoryRequirements,
        sparse_requirements: Vec<SparseImageMemoryRequirements>,
    ) -> Self {
        let full_range = ImageSubresourceRange::from_parameters(
            create_info.format,
            create_info.mip_levels,
            create_info.array_layers,
        );
        let encoder = SubresourceEncoder::new(&full_range);
        let sparse_metadata_required = sparse_requirements
            .iter()
            .any(|requirements| requirements.aspects.intersects(ImageAspects::METADATA));

        ImageState {
            base: ObjectBase::new(TypedHandle::new(image)),
            bindable: Bindable::new(
                requirements,
                create_info.flags.intersects(ImageCreateFlags::SPARSE),
            ),
            full_range,
            swapchain_image: None,
            sparse_requirements,
            sparse_metadata_required,
            state: Mutex::new(ImageMut {
                acquired: false,
                layout_locked: false,
                sparse_metadata_bound: false,
                bind_swapchain: None,
                layouts: GlobalImageLayouts::new(encoder),
            }),
            encoder,
            create_info,
        }
    }

    pub(crate) fn new_swapchain_image(
        image: vk::Image,
        create_info: ImageCreateInfo,
        swapchain_image: SwapchainImageIndex,
    ) -> Self {
        let mut state = Self::new(image, create_info, MemoryRequirements::default(), Vec::new());
        state.swapchain_image = Some(swapchain_image);
        state.bindable.set_binding(crate::memory::MemoryBinding {
            memory: crate::memory::BoundMemory::SwapchainImage,
            offset: 0,
            size: 0,
        });

        state
    }

    /// The range covering every subresource of the image.
    #[inline]
    pub fn full_range(&self) -> &ImageSubresourceRange {
        &self.full_range
    }

    #[inline]
    pub fn encoder(&self) -> &SubresourceEncoder {
        &self.encoder
    }

    #[inline]
    pub fn normalize_range(&self, range: &ImageSubresourceRange) -> ImageSubresourceRange {
        range.normalize(&self.full_range)
    }

    #[inline]
    pub fn is_swapchain_image(&self) -> bool {
        self.swapchain_image.is_some()
    }

    #[inline]
    pub fn is_acquired(&self) -> bool {
        self.state.lock().acquired
    }

    #[inline]
    pub fn is_layout_locked(&self) -> bool {
        self.state.lock().layout_locked
    }

    #[inline]
    pub fn is_sparse_metadata_bound(&self) -> bool {
        self.state.lock().sparse_metadata_bound
    }

    #[inline]
    pub fn bind_swapchain(&self) -> Option<SwapchainImageIndex> {
        self.state.lock().bind_swapchain
    }

    /// Returns the layout that completed work has left `subresource` in.
    #[inline]
    pub fn global_layout(&self, subresource: &ImageSubresource) -> Option<ImageLayout> {
        self.state.lock().layouts.get_subresource(subresource)
    }

    pub(crate) fn set_global_layout(&self, range: &ImageSubresourceRange, layout: ImageLayout) {
        let range = self.normalize_range(range);
        self.state.lock().layouts.set_range(&range, layout);
    }
}

/// Parameters of an image view.
#[derive(Clone, Debug)]
pub struct ImageViewCreateInfo {
    pub image: vk::Image,
    pub view_type: ImageViewType,
    pub format: vk::Format,
    pub subresource_range: ImageSubresourceRange,

    /// Restricts the usage of the view to a subset of the image's. Empty inherits the image's.
    pub usage: ImageUsage,
}

impl Default for ImageViewCreateInfo {
    #[inline]
    fn default() -> Self {
        ImageViewCreateInfo {
            image: vk::Image::null(),
            view_type: ImageViewType::Dim2d,
            format: vk::Format::R8G8B8A8_UNORM,
            subresource_range: ImageSubresourceRange::default(),
            usage: ImageUsage::empty(),
        }
    }
}

/// State of a `VkImageView`.
#[derive(Debug)]
pub struct ImageViewState {
    base: ObjectBase,
    pub create_info: ImageViewCreateInfo,
    pub image: Arc<ImageState>,

    /// The subresource range with all `REMAINING` values resolved.
    pub normalized_range: ImageSubresourceRange,
    pub usage: ImageUsage,
    pub samples: SampleCount,
}

impl_state_object!(ImageViewState, vk::ImageView);

impl ImageViewState {
    pub(crate) fn new(
        image_view: vk::ImageView,
        create_info: ImageViewCreateInfo,
        image: Arc<ImageState>,
    ) -> Self {
        let normalized_range = image.normalize_range(&create_info.subresource_range);
        let usage = if create_info.usage.is_empty() {
            image.create_info.usage
        } else {
            create_info.usage
        };

        ImageViewState {
            base: ObjectBase::new(TypedHandle::new(image_view)),
            normalized_range,
            usage,
            samples: image.create_info.samples,
            image,
            create_info,
        }
    }

    /// The width, height and layer count of the view's base mip level.
    pub fn extent(&self) -> [u32; 3] {
        let [width, height, _] = self.image.create_info.extent;
        let level = self.normalized_range.base_mip_level;

        [
            (width >> level).max(1),
            (height >> level).max(1),
            self.normalized_range.layer_count,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::{ImageAspects, ImageSubresource, ImageSubresourceRange};
    use ash::vk;

    fn full() -> ImageSubresourceRange {
        ImageSubresourceRange {
            aspects: ImageAspects::DEPTH | ImageAspects::STENCIL,
            base_mip_level: 0,
            level_count: 4,
            base_array_layer: 0,
            layer_count: 6,
        }
    }

    #[test]
    fn normalize_remaining() {
        let range = ImageSubresourceRange {
            aspects: ImageAspects::DEPTH,
            base_mip_level: 1,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 2,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        }
        .normalize(&full());

        assert_eq!(range.level_count, 3);
        assert_eq!(range.layer_count, 4);
        assert!(range.contains(&ImageSubresource {
            aspect: ImageAspects::DEPTH,
            mip_level: 3,
            array_layer: 5,
        }));
        assert!(!range.contains(&ImageSubresource {
            aspect: ImageAspects::STENCIL,
            mip_level: 3,
            array_layer: 5,
        }));
    }

    #[test]
    fn color_selects_planes() {
        let full = ImageSubresourceRange {
            aspects: ImageAspects::PLANE_0 | ImageAspects::PLANE_1,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let range = ImageSubresourceRange::default().normalize(&full);
        assert_eq!(range.aspects, full.aspects);
    }

    #[test]
    fn out_of_range() {
        let range = ImageSubresourceRange {
            aspects: ImageAspects::DEPTH,
            base_mip_level: 2,
            level_count: 3,
            base_array_layer: 0,
            layer_count: 1,
        };
        let error = range.validate_within(&full()).unwrap_err();
        assert_eq!(error.vuid(), "VUID-VkImageSubresourceRange-levelCount-01724");
    }

    #[test]
    fn overlap() {
        let a = ImageSubresourceRange {
            aspects: ImageAspects::DEPTH,
            base_mip_level: 0,
            level_count: 2,
            base_array_layer: 0,
            layer_count: 2,
        };
        let mut b = a;
        b.base_array_layer = 2;
        assert!(!a.overlaps(&b));
        b.base_array_layer = 1;
        assert!(a.overlaps(&b));
    }
}
