//! The properties of image and vertex formats that validation depends on.
//!
//! Formats are the raw [`vk::Format`] values. Only the formats the layer needs to reason about
//! are described; for unknown formats [`FormatInfo::of`] returns `None` and checks that depend on
//! the layout of a texel are skipped.

use crate::image::ImageAspects;
use ash::vk;

/// Layout information about a format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatInfo {
    /// The size in bytes of one texel block.
    pub block_size: u32,

    /// The number of numeric components in a texel.
    pub component_count: u32,

    /// Whether the components are packed into one larger word.
    pub packed: bool,

    /// The aspects that an image of this format has.
    pub aspects: ImageAspects,

    /// The number of planes, 1 for non-planar formats.
    pub planes: u32,
}

impl FormatInfo {
    const fn color(block_size: u32, component_count: u32) -> Self {
        FormatInfo {
            block_size,
            component_count,
            packed: false,
            aspects: ImageAspects::COLOR,
            planes: 1,
        }
    }

    const fn packed(block_size: u32, component_count: u32) -> Self {
        FormatInfo {
            block_size,
            component_count,
            packed: true,
            aspects: ImageAspects::COLOR,
            planes: 1,
        }
    }

    const fn depth_stencil(block_size: u32, aspects: ImageAspects) -> Self {
        FormatInfo {
            block_size,
            component_count: aspects.count(),
            packed: false,
            aspects,
            planes: 1,
        }
    }

    const fn planar(planes: u32) -> Self {
        FormatInfo {
            block_size: 0,
            component_count: 3,
            packed: false,
            aspects: if planes == 2 {
                ImageAspects::PLANE_0.union(ImageAspects::PLANE_1)
            } else {
                ImageAspects::PLANE_0
                    .union(ImageAspects::PLANE_1)
                    .union(ImageAspects::PLANE_2)
            },
            planes,
        }
    }

    /// Returns information about `format`, or `None` if the layer does not know the format.
    pub fn of(format: vk::Format) -> Option<Self> {
        use ImageAspects as A;

        Some(match format {
            vk::Format::R4G4_UNORM_PACK8 => Self::packed(1, 2),
            vk::Format::R5G6B5_UNORM_PACK16
            | vk::Format::B5G6R5_UNORM_PACK16
            | vk::Format::R4G4B4A4_UNORM_PACK16
            | vk::Format::B4G4R4A4_UNORM_PACK16
            | vk::Format::R5G5B5A1_UNORM_PACK16
            | vk::Format::A1R5G5B5_UNORM_PACK16 => Self::packed(2, 3),

            vk::Format::R8_UNORM
            | vk::Format::R8_SNORM
            | vk::Format::R8_UINT
            | vk::Format::R8_SINT
            | vk::Format::R8_SRGB => Self::color(1, 1),
            vk::Format::R8G8_UNORM
            | vk::Format::R8G8_SNORM
            | vk::Format::R8G8_UINT
            | vk::Format::R8G8_SINT
            | vk::Format::R8G8_SRGB => Self::color(2, 2),
            vk::Format::R8G8B8_UNORM
            | vk::Format::R8G8B8_SNORM
            | vk::Format::R8G8B8_UINT
            | vk::Format::R8G8B8_SINT
            | vk::Format::R8G8B8_SRGB
            | vk::Format::B8G8R8_UNORM
            | vk::Format::B8G8R8_SRGB => Self::color(3, 3),
            vk::Format::R8G8B8A8_UNORM
            | vk::Format::R8G8B8A8_SNORM
            | vk::Format::R8G8B8A8_USCALED
            | vk::Format::R8G8B8A8_SSCALED
            | vk::Format::R8G8B8A8_UINT
            | vk::Format::R8G8B8A8_SINT
            | vk::Format::R8G8B8A8_SRGB
            | vk::Format::B8G8R8A8_UNORM
            | vk::Format::B8G8R8A8_SNORM
            | vk::Format::B8G8R8A8_UINT
            | vk::Format::B8G8R8A8_SINT
            | vk::Format::B8G8R8A8_SRGB => Self::color(4, 4),
            vk::Format::A8B8G8R8_UNORM_PACK32
            | vk::Format::A8B8G8R8_SNORM_PACK32
            | vk::Format::A8B8G8R8_UINT_PACK32
            | vk::Format::A8B8G8R8_SINT_PACK32
            | vk::Format::A8B8G8R8_SRGB_PACK32
            | vk::Format::A2R10G10B10_UNORM_PACK32
            | vk::Format::A2R10G10B10_UINT_PACK32
            | vk::Format::A2B10G10R10_UNORM_PACK32
            | vk::Format::A2B10G10R10_UINT_PACK32 => Self::packed(4, 4),
            vk::Format::B10G11R11_UFLOAT_PACK32 | vk::Format::E5B9G9R9_UFLOAT_PACK32 => {
                Self::packed(4, 3)
            }

            vk::Format::R16_UNORM
            | vk::Format::R16_SNORM
            | vk::Format::R16_UINT
            | vk::Format::R16_SINT
            | vk::Format::R16_SFLOAT => Self::color(2, 1),
            vk::Format::R16G16_UNORM
            | vk::Format::R16G16_SNORM
            | vk::Format::R16G16_UINT
            | vk::Format::R16G16_SINT
            | vk::Format::R16G16_SFLOAT => Self::color(4, 2),
            vk::Format::R16G16B16_UNORM
            | vk::Format::R16G16B16_SNORM
            | vk::Format::R16G16B16_UINT
            | vk::Format::R16G16B16_SINT
            | vk::Format::R16G16B16_SFLOAT => Self::color(6, 3),
            vk::Format::R16G16B16A16_UNORM
            | vk::Format::R16G16B16A16_SNORM
            | vk::Format::R16G16B16A16_UINT
            | vk::Format::R16G16B16A16_SINT
            | vk::Format::R16G16B16A16_SFLOAT => Self::color(8, 4),

            vk::Format::R32_UINT | vk::Format::R32_SINT | vk::Format::R32_SFLOAT => {
                Self::color(4, 1)
            }
            vk::Format::R32G32_UINT | vk::Format::R32G32_SINT | vk::Format::R32G32_SFLOAT => {
                Self::color(8, 2)
            }
            vk::Format::R32G32B32_UINT
            | vk::Format::R32G32B32_SINT
            | vk::Format::R32G32B32_SFLOAT => Self::color(12, 3),
            vk::Format::R32G32B32A32_UINT
            | vk::Format::R32G32B32A32_SINT
            | vk::Format::R32G32B32A32_SFLOAT => Self::color(16, 4),
            vk::Format::R64_UINT | vk::Format::R64_SINT | vk::Format::R64_SFLOAT => {
                Self::color(8, 1)
            }
            vk::Format::R64G64_SFLOAT => Self::color(16, 2),
            vk::Format::R64G64B64_SFLOAT => Self::color(24, 3),
            vk::Format::R64G64B64A64_SFLOAT => Self::color(32, 4),

            vk::Format::BC1_RGB_UNORM_BLOCK
            | vk::Format::BC1_RGB_SRGB_BLOCK
            | vk::Format::BC1_RGBA_UNORM_BLOCK
            | vk::Format::BC1_RGBA_SRGB_BLOCK
            | vk::Format::BC4_UNORM_BLOCK
            | vk::Format::BC4_SNORM_BLOCK => Self::color(8, 4),
            vk::Format::BC2_UNORM_BLOCK
            | vk::Format::BC2_SRGB_BLOCK
            | vk::Format::BC3_UNORM_BLOCK
            | vk::Format::BC3_SRGB_BLOCK
            | vk::Format::BC5_UNORM_BLOCK
            | vk::Format::BC5_SNORM_BLOCK
            | vk::Format::BC6H_UFLOAT_BLOCK
            | vk::Format::BC6H_SFLOAT_BLOCK
            | vk::Format::BC7_UNORM_BLOCK
            | vk::Format::BC7_SRGB_BLOCK => Self::color(16, 4),

            vk::Format::D16_UNORM => Self::depth_stencil(2, A::DEPTH),
            vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT => {
                Self::depth_stencil(4, A::DEPTH)
            }
            vk::Format::S8_UINT => Self::depth_stencil(1, A::STENCIL),
            vk::Format::D16_UNORM_S8_UINT => Self::depth_stencil(3, A::DEPTH.union(A::STENCIL)),
            vk::Format::D24_UNORM_S8_UINT => Self::depth_stencil(4, A::DEPTH.union(A::STENCIL)),
            vk::Format::D32_SFLOAT_S8_UINT => Self::depth_stencil(5, A::DEPTH.union(A::STENCIL)),

            vk::Format::G8_B8R8_2PLANE_420_UNORM
            | vk::Format::G8_B8R8_2PLANE_422_UNORM
            | vk::Format::G16_B16R16_2PLANE_420_UNORM
            | vk::Format::G16_B16R16_2PLANE_422_UNORM => Self::planar(2),
            vk::Format::G8_B8_R8_3PLANE_420_UNORM
            | vk::Format::G8_B8_R8_3PLANE_422_UNORM
            | vk::Format::G8_B8_R8_3PLANE_444_UNORM
            | vk::Format::G16_B16_R16_3PLANE_420_UNORM
            | vk::Format::G16_B16_R16_3PLANE_422_UNORM
            | vk::Format::G16_B16_R16_3PLANE_444_UNORM => Self::planar(3),

            _ => return None,
        })
    }

    /// The alignment that a vertex attribute of this format must have in memory.
    #[inline]
    pub fn vertex_alignment(&self) -> u32 {
        if self.packed || self.component_count == 0 {
            self.block_size
        } else {
            (self.block_size / self.component_count).max(1)
        }
    }
}

/// Returns the aspects of an image with the given format. Unknown formats are treated as color.
#[inline]
pub fn format_aspects(format: vk::Format) -> ImageAspects {
    FormatInfo::of(format).map_or(ImageAspects::COLOR, |info| info.aspects)
}

/// Returns whether the format has a depth or stencil component.
#[inline]
pub fn is_depth_or_stencil(format: vk::Format) -> bool {
    format_aspects(format).intersects(ImageAspects::DEPTH | ImageAspects::STENCIL)
}

#[cfg(test)]
mod tests {
    use super::{format_aspects, FormatInfo};
    use crate::image::ImageAspects;
    use ash::vk;

    #[test]
    fn vertex_alignment() {
        let rgba32f = FormatInfo::of(vk::Format::R32G32B32A32_SFLOAT).unwrap();
        assert_eq!(rgba32f.vertex_alignment(), 4);

        let packed = FormatInfo::of(vk::Format::A2B10G10R10_UNORM_PACK32).unwrap();
        assert_eq!(packed.vertex_alignment(), 4);

        let rg8 = FormatInfo::of(vk::Format::R8G8_UNORM).unwrap();
        assert_eq!(rg8.vertex_alignment(), 1);
    }

    #[test]
    fn aspects() {
        assert_eq!(format_aspects(vk::Format::R8G8B8A8_UNORM), ImageAspects::COLOR);
        assert_eq!(
            format_aspects(vk::Format::D24_UNORM_S8_UINT),
            ImageAspects::DEPTH | ImageAspects::STENCIL,
        );
        assert_eq!(
            format_aspects(vk::Format::G8_B8_R8_3PLANE_420_UNORM),
            ImageAspects::PLANE_0 | ImageAspects::PLANE_1 | ImageAspects::PLANE_2,
        );
    }
}
