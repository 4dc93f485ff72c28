use super::{queue::SemaphoreOverlay, ValidationLayer};
use crate::{
    command_buffer::BindingBreak,
    handle::TypedHandle,
    image::{ImageLayout, ImageState, SwapchainImageIndex},
    memory::clear_memory_object_bindings,
    queue::Submission,
    registry::{BindableRef, StateObject},
    swapchain::{PresentInfo, SwapchainCreateInfo, SwapchainState},
    ErrorKind, ValidationError,
};
use ash::vk;
use std::sync::Arc;

impl ValidationLayer {
    pub fn validate_create_swapchain(&self, create_info: &SwapchainCreateInfo) -> bool {
        let mut skip = false;

        if create_info.image_extent.contains(&0) {
            skip |= self.emit(Box::new(ValidationError {
                context: "create_info.image_extent".into(),
                problem: "has a zero width or height".into(),
                vuids: &["VUID-VkSwapchainCreateInfoKHR-imageExtent-01689"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if create_info.image_array_layers == 0 {
            skip |= self.emit(Box::new(ValidationError {
                context: "create_info.image_array_layers".into(),
                problem: "is zero".into(),
                vuids: &["VUID-VkSwapchainCreateInfoKHR-imageArrayLayers-01275"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if create_info.present_mode.is_shared()
            && !self.device_info.enabled_extensions.khr_shared_presentable_image
        {
            skip |= self.emit(Box::new(ValidationError {
                context: "create_info.present_mode".into(),
                problem: format!("is {:?}", create_info.present_mode).into(),
                vuids: &["VUID-VkSwapchainCreateInfoKHR-presentMode-01281"],
                kind: ErrorKind::MissingPrerequisite,
                ..Default::default()
            }));
        }

        if let Some(old) = self.registry.swapchains.get(create_info.old_swapchain) {
            if old.is_retired() {
                skip |= self.emit(Box::new(ValidationError {
                    context: "create_info.old_swapchain".into(),
                    problem: format!(
                        "{} has already been replaced by another swapchain",
                        self.format_handle(old.typed_handle()),
                    )
                    .into(),
                    vuids: &["VUID-VkSwapchainCreateInfoKHR-oldSwapchain-01933"],
                    kind: ErrorKind::StateIncompatible,
                    objects: [old.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }
        }

        skip
    }

    pub fn record_create_swapchain(
        &self,
        swapchain: vk::SwapchainKHR,
        create_info: SwapchainCreateInfo,
    ) {
        if let Some(old) = self.registry.swapchains.get(create_info.old_swapchain) {
            old.retire();
        }

        log::trace!(
            "{} created with {:?}, extent {:?}",
            TypedHandle::new(swapchain),
            create_info.present_mode,
            create_info.image_extent,
        );
        self.registry
            .swapchains
            .insert(Arc::new(SwapchainState::new(swapchain, create_info)));
    }

    /// Registers the images returned by `vkGetSwapchainImagesKHR`.
    pub fn record_get_swapchain_images(&self, swapchain: vk::SwapchainKHR, images: &[vk::Image]) {
        let Some(state) = self.registry.swapchains.get(swapchain) else {
            return;
        };

        for (image_index, image) in state.add_images(images) {
            self.registry
                .images
                .insert(Arc::new(ImageState::new_swapchain_image(
                    image,
                    state.create_info.image_create_info(),
                    SwapchainImageIndex {
                        swapchain,
                        image_index,
                    },
                )));
        }
    }

    pub fn validate_destroy_swapchain(&self, swapchain: vk::SwapchainKHR) -> bool {
        let Some(state) = self.registry.swapchains.get(swapchain) else {
            return false;
        };

        if self.settings.disabled.object_in_use {
            return false;
        }

        let in_use = state
            .images()
            .into_iter()
            .filter_map(|image| self.registry.images.get(image))
            .find(|image| image.base().in_use());

        in_use.map_or(false, |image| {
            self.emit(Box::new(ValidationError {
                problem: format!(
                    "{} is used by a submission that has not completed",
                    self.format_handle(image.typed_handle()),
                )
                .into(),
                vuids: &["VUID-vkDestroySwapchainKHR-swapchain-01282"],
                kind: ErrorKind::InUseOnDestroy,
                objects: [state.typed_handle(), image.typed_handle()]
                    .into_iter()
                    .collect(),
                ..Default::default()
            }))
        })
    }

    /// Destroys the swapchain and the images it owns.
    pub fn record_destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let Some(state) =
            self.destroy_object(&self.registry.swapchains, swapchain, BindingBreak::Destroyed)
        else {
            return;
        };

        for image in state.take_images() {
            let Some(image) =
                self.destroy_object(&self.registry.images, image, BindingBreak::Destroyed)
            else {
                continue;
            };

            clear_memory_object_bindings(&self.registry, &BindableRef::Image(image.clone()));
            self.emit_all(self.qfo.forget_resource(image.typed_handle()));
        }

        log::trace!("{} destroyed", state.typed_handle());
    }

    pub fn validate_acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> bool {
        let mut skip = false;

        if semaphore == vk::Semaphore::null() && fence == vk::Fence::null() {
            skip |= self.emit(Box::new(ValidationError {
                problem: "`semaphore` and `fence` are both null".into(),
                vuids: &["VUID-vkAcquireNextImageKHR-semaphore-01780"],
                kind: ErrorKind::ParameterOutOfRange,
                objects: [TypedHandle::new(swapchain)].into_iter().collect(),
                ..Default::default()
            }));
        }

        if let Some(state) = self.registry.swapchains.get(swapchain) {
            if state.is_retired() {
                skip |= self.emit(Box::new(ValidationError {
                    context: "swapchain".into(),
                    problem: "has been replaced by another swapchain".into(),
                    vuids: &["VUID-vkAcquireNextImageKHR-swapchain-01675"],
                    kind: ErrorKind::StateIncompatible,
                    objects: [state.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }
        }

        if let Some(state) = self.registry.semaphores.get(semaphore) {
            skip |= self.emit_result(
                state
                    .validate_signal(&["VUID-vkAcquireNextImageKHR-semaphore-01286"])
                    .map_err(|error| error.add_context("semaphore")),
            );
        }

        if let Some(state) = self.registry.fences.get(fence) {
            skip |= self.emit_result(state.validate_for_submit(
                &["VUID-vkAcquireNextImageKHR-fence-01287"],
                &["VUID-vkAcquireNextImageKHR-fence-01287"],
            ));
        }

        skip
    }

    /// The presentation engine signals the semaphore and the fence once it releases the image,
    /// outside of any queue.
    pub fn record_acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
        image_index: u32,
    ) {
        if let Some(state) = self.registry.semaphores.get(semaphore) {
            state.signal(None);
        }

        if let Some(state) = self.registry.fences.get(fence) {
            state.submit(None);
        }

        let image = self
            .registry
            .swapchains
            .get(swapchain)
            .and_then(|state| state.image(image_index))
            .and_then(|image| self.registry.images.get(image));

        if let Some(image) = image {
            image.state.lock().acquired = true;
        }
    }

    /// Checks one image of a present request.
    fn validate_presented_image(
        &self,
        swapchain: &SwapchainState,
        image_index: u32,
        context: &str,
    ) -> Option<Box<ValidationError>> {
        let error = |problem: String, vuids: &'static [&'static str], kind: ErrorKind| {
            Box::new(ValidationError {
                context: context.to_owned().into(),
                problem: problem.into(),
                vuids,
                kind,
                objects: [swapchain.typed_handle()].into_iter().collect(),
                ..Default::default()
            })
        };

        let Some(image) = swapchain
            .image(image_index)
            .and_then(|image| self.registry.images.get(image))
        else {
            return Some(error(
                format!(
                    "is {}, but the swapchain only has {} images",
                    image_index,
                    swapchain.images().len(),
                ),
                &["VUID-VkPresentInfoKHR-pImageIndices-01430"],
                ErrorKind::ParameterOutOfRange,
            ));
        };

        if !image.is_acquired() {
            return Some(
                error(
                    format!("image {} has not been acquired", image_index),
                    &["VUID-VkPresentInfoKHR-pImageIndices-01430"],
                    ErrorKind::MissingPrerequisite,
                )
                .add_object(image.typed_handle()),
            );
        }

        if self.settings.disabled.image_layout_validation {
            return None;
        }

        let state = image.state.lock();

        (0..image.encoder().size()).find_map(|index| {
            let layout = state
                .layouts
                .get(index)
                .unwrap_or(image.create_info.initial_layout);

            if matches!(layout, ImageLayout::PresentSrc | ImageLayout::SharedPresent) {
                return None;
            }

            let subresource = image.encoder().decode(index);

            Some(
                error(
                    format!(
                        "image {} (mip level {}, array layer {}) is in layout {:?}, but it \
                        must be in `PresentSrc` or `SharedPresent` to be presented",
                        image_index, subresource.mip_level, subresource.array_layer, layout,
                    ),
                    &["VUID-VkPresentInfoKHR-pImageIndices-01296"],
                    ErrorKind::StateIncompatible,
                )
                .add_object(image.typed_handle()),
            )
        })
    }

    pub fn validate_queue_present(&self, queue: vk::Queue, present_info: &PresentInfo) -> bool {
        if !self.registry.queues.contains(queue) {
            return false;
        }

        let mut skip = self.validate_semaphore_waits(
            &present_info.wait_semaphores,
            &mut SemaphoreOverlay::default(),
            |index| format!("present_info.wait_semaphores[{}]", index),
        );

        for (index, &(swapchain, image_index)) in present_info.swapchains.iter().enumerate() {
            let Some(swapchain) = self.registry.swapchains.get(swapchain) else {
                continue;
            };

            let context = format!("present_info.image_indices[{}]", index);

            if let Some(error) = self.validate_presented_image(&swapchain, image_index, &context) {
                skip |= self.emit(error);
            }
        }

        skip
    }

    /// Presenting waits on the semaphores like a submission, and gives the images back to the
    /// presentation engine.
    pub fn record_queue_present(&self, queue: vk::Queue, present_info: &PresentInfo) {
        let Some(queue_state) = self.registry.queues.get(queue) else {
            return;
        };

        if !present_info.wait_semaphores.is_empty() {
            let mut submission = Submission::default();
            self.record_semaphore_waits(&present_info.wait_semaphores, &mut submission);
            queue_state.push(submission);
        }

        for &(swapchain, image_index) in &present_info.swapchains {
            let Some(swapchain) = self.registry.swapchains.get(swapchain) else {
                continue;
            };
            let Some(image) = swapchain
                .image(image_index)
                .and_then(|image| self.registry.images.get(image))
            else {
                continue;
            };

            let mut state = image.state.lock();
            state.acquired = false;

            if swapchain.is_shared_presentable() {
                state.layout_locked = true;
            }
        }

        log::debug!(
            "{} presented {} image(s)",
            queue_state.typed_handle(),
            present_info.swapchains.len(),
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        device::DeviceInfo,
        image::{ImageAspects, ImageLayout, ImageSubresourceRange},
        swapchain::{PresentInfo, PresentMode, SwapchainCreateInfo},
        sync::{
            semaphore::SemaphoreCreateInfo, AccessFlags, DependencyInfo, ImageMemoryBarrier,
            PipelineStages,
        },
        tests::{begin_primary, create_queue, handle},
        LayerSettings, ValidationLayer,
    };
    use ash::vk;
    use smallvec::smallvec;

    fn swapchain_with_images(
        layer: &ValidationLayer,
        present_mode: PresentMode,
    ) -> (vk::SwapchainKHR, Vec<vk::Image>) {
        let create_info = SwapchainCreateInfo {
            image_extent: [64, 64],
            present_mode,
            ..Default::default()
        };
        assert!(!layer.validate_create_swapchain(&create_info));

        let swapchain = handle();
        layer.record_create_swapchain(swapchain, create_info);

        let images = vec![handle(), handle()];
        layer.record_get_swapchain_images(swapchain, &images);

        (swapchain, images)
    }

    fn transition_to_present(layer: &ValidationLayer, queue: vk::Queue, image: vk::Image) {
        let cb = begin_primary(layer);
        let dependency_info = DependencyInfo {
            src_stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            dst_stages: PipelineStages::BOTTOM_OF_PIPE,
            image_memory_barriers: smallvec![ImageMemoryBarrier {
                src_access: AccessFlags::COLOR_ATTACHMENT_WRITE,
                old_layout: ImageLayout::Undefined,
                new_layout: ImageLayout::PresentSrc,
                image,
                subresource_range: ImageSubresourceRange {
                    aspects: ImageAspects::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            }],
            ..Default::default()
        };
        layer.record_cmd_pipeline_barrier(cb, &dependency_info);
        layer.record_end_command_buffer(cb);

        let submits = [crate::queue::SubmitInfo {
            command_buffers: vec![cb],
            ..Default::default()
        }];
        assert!(!layer.validate_queue_submit(queue, &submits, vk::Fence::null()));
        layer.record_queue_submit(queue, &submits, vk::Fence::null());
    }

    #[test]
    fn acquire_then_present() {
        let (layer, reporter) = test_layer!();
        let queue = create_queue(&layer, 0);
        let (swapchain, images) = swapchain_with_images(&layer, PresentMode::Fifo);
        let semaphore = handle();
        layer.record_create_semaphore(semaphore, SemaphoreCreateInfo::default());

        let present_info = PresentInfo {
            swapchains: vec![(swapchain, 1)],
            ..Default::default()
        };
        layer.validate_queue_present(queue, &present_info);
        assert!(reporter.contains("VUID-VkPresentInfoKHR-pImageIndices-01430"));
        reporter.clear();

        assert!(!layer.validate_acquire_next_image(swapchain, semaphore, vk::Fence::null()));
        layer.record_acquire_next_image(swapchain, semaphore, vk::Fence::null(), 1);

        // Still in its initial layout.
        layer.validate_queue_present(queue, &present_info);
        assert!(reporter.contains("VUID-VkPresentInfoKHR-pImageIndices-01296"));
        reporter.clear();

        transition_to_present(&layer, queue, images[1]);
        let present_info = PresentInfo {
            wait_semaphores: vec![semaphore],
            ..present_info
        };
        assert!(!layer.validate_queue_present(queue, &present_info));
        layer.record_queue_present(queue, &present_info);
        assert!(reporter.diagnostics().is_empty());

        let image = layer.registry().images.get(images[1]).unwrap();
        assert!(!image.is_acquired());
        assert!(!image.is_layout_locked());
        assert!(!layer.registry().semaphores.get(semaphore).unwrap().is_signaled());
    }

    #[test]
    fn shared_present_locks_the_layout() {
        let mut device_info = DeviceInfo::default();
        device_info.enabled_extensions.khr_shared_presentable_image = true;
        let (layer, reporter) = test_layer!(LayerSettings::default(), device_info);
        let queue = create_queue(&layer, 0);
        let (swapchain, images) = swapchain_with_images(&layer, PresentMode::SharedDemandRefresh);
        let fence = handle();
        layer.record_create_fence(fence, Default::default());

        layer.record_acquire_next_image(swapchain, vk::Semaphore::null(), fence, 0);
        transition_to_present(&layer, queue, images[0]);
        layer.record_queue_present(
            queue,
            &PresentInfo {
                swapchains: vec![(swapchain, 0)],
                ..Default::default()
            },
        );
        assert!(layer.registry().images.get(images[0]).unwrap().is_layout_locked());

        // The acquire fence has no queue behind it.
        layer.record_wait_for_fences(&[fence], true);
        assert_eq!(
            layer.registry().fences.get(fence).unwrap().status(),
            crate::sync::fence::FenceStatus::Retired,
        );
        assert!(reporter.diagnostics().is_empty());
    }

    #[test]
    fn replaced_swapchains_are_retired() {
        let (layer, reporter) = test_layer!();
        let (old, images) = swapchain_with_images(&layer, PresentMode::Fifo);

        let create_info = SwapchainCreateInfo {
            image_extent: [64, 64],
            old_swapchain: old,
            ..Default::default()
        };
        assert!(!layer.validate_create_swapchain(&create_info));
        layer.record_create_swapchain(handle(), create_info.clone());

        layer.validate_create_swapchain(&create_info);
        assert!(reporter.contains("VUID-VkSwapchainCreateInfoKHR-oldSwapchain-01933"));
        layer.validate_acquire_next_image(old, vk::Semaphore::null(), vk::Fence::null());
        assert!(reporter.contains("VUID-vkAcquireNextImageKHR-swapchain-01675"));
        assert!(reporter.contains("VUID-vkAcquireNextImageKHR-semaphore-01780"));

        // The application cannot destroy swapchain images itself.
        reporter.clear();
        layer.validate_destroy_image(images[0]);
        assert!(reporter.contains("VUID-vkDestroyImage-image-04882"));

        assert!(!layer.validate_destroy_swapchain(old));
        layer.record_destroy_swapchain(old);
        assert!(layer.registry().images.get(images[0]).is_none());
        assert!(layer.registry().swapchains.get(old).is_none());
    }
}
