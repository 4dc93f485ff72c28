//! Sampler and sampler YCbCr conversion state.

use crate::{
    handle::TypedHandle,
    registry::{impl_state_object, ObjectBase},
};
use ash::vk;
use std::sync::Arc;

/// Parameters of a sampler that validation depends on.
#[derive(Clone, Debug, Default)]
pub struct SamplerCreateInfo {
    pub unnormalized_coordinates: bool,
    pub compare_enable: bool,
    pub sampler_ycbcr_conversion: Option<vk::SamplerYcbcrConversion>,
}

/// State of a `VkSampler`.
#[derive(Debug)]
pub struct SamplerState {
    base: ObjectBase,
    pub create_info: SamplerCreateInfo,
    pub ycbcr_conversion: Option<Arc<SamplerYcbcrConversionState>>,
}

impl_state_object!(SamplerState, vk::Sampler);

impl SamplerState {
    pub(crate) fn new(
        sampler: vk::Sampler,
        create_info: SamplerCreateInfo,
        ycbcr_conversion: Option<Arc<SamplerYcbcrConversionState>>,
    ) -> Self {
        SamplerState {
            base: ObjectBase::new(TypedHandle::new(sampler)),
            create_info,
            ycbcr_conversion,
        }
    }
}

/// State of a `VkSamplerYcbcrConversion`.
#[derive(Debug)]
pub struct SamplerYcbcrConversionState {
    base: ObjectBase,
    pub format: vk::Format,
}

impl_state_object!(SamplerYcbcrConversionState, vk::SamplerYcbcrConversion);

impl SamplerYcbcrConversionState {
    pub(crate) fn new(conversion: vk::SamplerYcbcrConversion, format: vk::Format) -> Self {
        SamplerYcbcrConversionState {
            base: ObjectBase::new(TypedHandle::new(conversion)),
            format,
        }
    }
}
