//! Swapchains and the images they own.
//!
//! Swapchain images are not bound to device memory by the application; they are registered with
//! the [`BoundMemory::SwapchainImage`](crate::memory::BoundMemory::SwapchainImage) sentinel so
//! that memory checks treat them as bound. An image must be acquired before it is used and
//! presented, and it is no longer acquired once it has been presented.
//!
//! Images of a swapchain with a shared present mode are acquired once and then shared between
//! the application and the presentation engine. Their layout is locked after the first present.

use crate::{
    handle::TypedHandle,
    image::{ImageCreateInfo, ImageUsage},
    macros::vulkan_enum,
    registry::{impl_state_object, ObjectBase},
    sync::Sharing,
};
use ash::vk;
use parking_lot::Mutex;

vulkan_enum! {
    /// How images are queued for presentation.
    PresentMode = PresentModeKHR(i32);

    Immediate = IMMEDIATE,
    Mailbox = MAILBOX,
    Fifo = FIFO,
    FifoRelaxed = FIFO_RELAXED,

    /// The single image is presented when the application asks for it.
    SharedDemandRefresh = SHARED_DEMAND_REFRESH,

    /// The single image is presented continuously by the presentation engine.
    SharedContinuousRefresh = SHARED_CONTINUOUS_REFRESH,
}

impl PresentMode {
    #[inline]
    pub fn is_shared(self) -> bool {
        matches!(
            self,
            PresentMode::SharedDemandRefresh | PresentMode::SharedContinuousRefresh
        )
    }
}

/// Parameters of a swapchain.
#[derive(Clone, Debug)]
pub struct SwapchainCreateInfo {
    pub min_image_count: u32,
    pub image_format: vk::Format,
    pub image_extent: [u32; 2],
    pub image_array_layers: u32,
    pub image_usage: ImageUsage,
    pub image_sharing: Sharing,
    pub present_mode: PresentMode,
    pub old_swapchain: vk::SwapchainKHR,
}

impl Default for SwapchainCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            min_image_count: 2,
            image_format: vk::Format::B8G8R8A8_UNORM,
            image_extent: [0, 0],
            image_array_layers: 1,
            image_usage: ImageUsage::COLOR_ATTACHMENT,
            image_sharing: Sharing::Exclusive,
            present_mode: PresentMode::Fifo,
            old_swapchain: vk::SwapchainKHR::null(),
        }
    }
}

impl SwapchainCreateInfo {
    /// The parameters of the images the swapchain owns.
    pub fn image_create_info(&self) -> ImageCreateInfo {
        ImageCreateInfo {
            format: self.image_format,
            extent: [self.image_extent[0], self.image_extent[1], 1],
            array_layers: self.image_array_layers,
            usage: self.image_usage,
            sharing: self.image_sharing.clone(),
            ..Default::default()
        }
    }
}

/// Parameters of `vkQueuePresentKHR`.
#[derive(Clone, Debug, Default)]
pub struct PresentInfo {
    pub wait_semaphores: Vec<vk::Semaphore>,

    /// Each swapchain with the index of the image to present.
    pub swapchains: Vec<(vk::SwapchainKHR, u32)>,
}

#[derive(Debug, Default)]
struct SwapchainMut {
    images: Vec<vk::Image>,
    retired: bool,
}

/// State of a `VkSwapchainKHR`.
#[derive(Debug)]
pub struct SwapchainState {
    base: ObjectBase,
    pub create_info: SwapchainCreateInfo,
    state: Mutex<SwapchainMut>,
}

impl_state_object!(SwapchainState, vk::SwapchainKHR);

impl SwapchainState {
    pub(crate) fn new(swapchain: vk::SwapchainKHR, create_info: SwapchainCreateInfo) -> Self {
        SwapchainState {
            base: ObjectBase::new(TypedHandle::new(swapchain)),
            create_info,
            state: Mutex::default(),
        }
    }

    /// Whether the images of the swapchain are shared with the presentation engine.
    #[inline]
    pub fn is_shared_presentable(&self) -> bool {
        self.create_info.present_mode.is_shared()
    }

    /// The images owned by the swapchain, as returned by `vkGetSwapchainImagesKHR`.
    pub fn images(&self) -> Vec<vk::Image> {
        self.state.lock().images.clone()
    }

    #[inline]
    pub fn image(&self, index: u32) -> Option<vk::Image> {
        self.state.lock().images.get(index as usize).copied()
    }

    /// Records images returned by `vkGetSwapchainImagesKHR`, returning the ones that were not
    /// known yet along with their index.
    pub(crate) fn add_images(&self, images: &[vk::Image]) -> Vec<(u32, vk::Image)> {
        let mut state = self.state.lock();
        let mut new_images = Vec::new();

        for (index, &image) in images.iter().enumerate() {
            if state.images.len() <= index {
                state.images.push(image);
                new_images.push((index as u32, image));
            }
        }

        new_images
    }

    /// Whether the swapchain was passed as `old_swapchain` when creating another one.
    #[inline]
    pub fn is_retired(&self) -> bool {
        self.state.lock().retired
    }

    pub(crate) fn retire(&self) {
        self.state.lock().retired = true;
    }

    /// Removes and returns the images, for destroying them with the swapchain.
    pub(crate) fn take_images(&self) -> Vec<vk::Image> {
        std::mem::take(&mut self.state.lock().images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Handle;

    #[test]
    fn images_are_added_once() {
        let swapchain = SwapchainState::new(
            vk::SwapchainKHR::from_raw(1),
            SwapchainCreateInfo {
                image_extent: [64, 64],
                ..Default::default()
            },
        );
        let images = [vk::Image::from_raw(10), vk::Image::from_raw(11)];

        assert_eq!(swapchain.add_images(&images[..1]), vec![(0, images[0])]);
        assert_eq!(swapchain.add_images(&images), vec![(1, images[1])]);
        assert!(swapchain.add_images(&images).is_empty());
        assert_eq!(swapchain.image(1), Some(images[1]));
        assert!(!swapchain.is_shared_presentable());
    }

    #[test]
    fn image_parameters() {
        let create_info = SwapchainCreateInfo {
            image_extent: [640, 480],
            present_mode: PresentMode::SharedDemandRefresh,
            ..Default::default()
        };

        let image = create_info.image_create_info();
        assert_eq!(image.extent, [640, 480, 1]);
        assert_eq!(image.format, vk::Format::B8G8R8A8_UNORM);
        assert!(create_info.present_mode.is_shared());
    }
}
