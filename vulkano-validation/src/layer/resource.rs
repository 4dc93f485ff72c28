//! Images, buffers, their views, samplers, acceleration structures and device memory.

use super::ValidationLayer;
use crate::{
    acceleration_structure::{AccelerationStructureCreateInfo, AccelerationStructureState},
    buffer::{BufferCreateInfo, BufferState, BufferUsage, BufferViewCreateInfo, BufferViewState},
    command_buffer::BindingBreak,
    handle::TypedHandle,
    image::{
        ImageCreateInfo, ImageState, ImageViewCreateInfo, ImageViewState,
        SparseImageMemoryRequirements,
    },
    memory::{
        clear_memory_object_bindings, release_bound_objects, set_mem_binding,
        validate_memory_is_valid, validate_memory_requirements, validate_set_mem_binding,
        BindAccelerationStructureMemoryInfo, BindBufferMemoryInfo, BindImageMemoryInfo,
        BindMemoryApi, DeviceMemoryState, MappedMemoryRange, MappedRange, MemoryAllocateInfo,
        MemoryPropertyFlags, MemoryRequirements,
    },
    registry::{BindableRef, StateObject},
    sampler::{SamplerCreateInfo, SamplerState, SamplerYcbcrConversionState},
    sync::Sharing,
    DeviceSize, ErrorKind, Severity, ValidationError,
};
use ash::vk;
use std::sync::Arc;

impl ValidationLayer {
    fn validate_sharing(&self, sharing: &Sharing, vuids: &'static [&'static str]) -> bool {
        let Sharing::Concurrent(queue_family_indices) = sharing else {
            return false;
        };

        let mut skip = false;

        for (index, &family) in queue_family_indices.iter().enumerate() {
            if self.device_info.queue_family(family).is_none() {
                skip |= self.emit(Box::new(ValidationError {
                    context: format!("sharing.queue_family_indices[{}]", index).into(),
                    problem: format!(
                        "{} is not less than the number of queue families of the device ({})",
                        family,
                        self.device_info.queue_family_properties.len(),
                    )
                    .into(),
                    vuids,
                    kind: ErrorKind::ParameterOutOfRange,
                    ..Default::default()
                }));
            }
        }

        skip
    }

    /// Checks that memory may be bound to `resource`, in the way any of the bind commands does.
    fn validate_bind_memory(
        &self,
        resource: &BindableRef,
        memory: vk::DeviceMemory,
        memory_offset: DeviceSize,
        api: BindMemoryApi,
        context: Option<String>,
    ) -> bool {
        let with_context = |error: Box<ValidationError>| match &context {
            Some(context) => error.add_context(context.clone()),
            None => error,
        };
        let mut skip = false;

        if !resource.bindable().memory_requirements_checked() {
            let vuids: &'static [&'static str] = match resource {
                BindableRef::Image(_) => &["UNASSIGNED-CoreValidation-BindImageMemory-NoMemReqQuery"],
                BindableRef::Buffer(_) => {
                    &["UNASSIGNED-CoreValidation-BindBufferMemory-NoMemReqQuery"]
                }
                BindableRef::AccelerationStructure(_) => {
                    &["UNASSIGNED-CoreValidation-BindAccelerationStructureMemory-NoMemReqQuery"]
                }
            };

            skip |= self.emit(with_context(Box::new(ValidationError {
                context: api.name().into(),
                problem: format!(
                    "{} is bound to memory without its memory requirements having been queried",
                    self.format_handle(resource.typed_handle()),
                )
                .into(),
                vuids,
                kind: ErrorKind::MissingPrerequisite,
                severity: Severity::Warning,
                objects: [resource.typed_handle()].into_iter().collect(),
            })));
        }

        if let Err(error) = validate_set_mem_binding(memory, resource, api) {
            skip |= self.emit(with_context(error));
        }

        if let Some(memory) = self.registry.device_memories.get(memory) {
            for error in validate_memory_requirements(&memory, resource, memory_offset, api) {
                skip |= self.emit(with_context(error));
            }
        }

        skip
    }

    fn record_bind_memory(
        &self,
        resource: &BindableRef,
        memory: vk::DeviceMemory,
        memory_offset: DeviceSize,
    ) {
        if let Some(memory) = self.registry.device_memories.get(memory) {
            set_mem_binding(&memory, resource, memory_offset);
        }
    }

    pub fn validate_create_image(&self, create_info: &ImageCreateInfo) -> bool {
        let mut skip = false;

        if create_info.extent.contains(&0) {
            skip |= self.emit(Box::new(ValidationError {
                context: "create_info.extent".into(),
                problem: format!("{:?} contains a zero dimension", create_info.extent).into(),
                vuids: &[
                    "VUID-VkImageCreateInfo-extent-00944",
                    "VUID-VkImageCreateInfo-extent-00945",
                    "VUID-VkImageCreateInfo-extent-00946",
                ],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if create_info.mip_levels == 0 {
            skip |= self.emit(Box::new(ValidationError {
                context: "create_info.mip_levels".into(),
                problem: "is zero".into(),
                vuids: &["VUID-VkImageCreateInfo-mipLevels-00947"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if create_info.array_layers == 0 {
            skip |= self.emit(Box::new(ValidationError {
                context: "create_info.array_layers".into(),
                problem: "is zero".into(),
                vuids: &["VUID-VkImageCreateInfo-arrayLayers-00948"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        skip | self.validate_sharing(
            &create_info.sharing,
            &["VUID-VkImageCreateInfo-sharingMode-01420"],
        )
    }

    pub fn record_create_image(
        &self,
        image: vk::Image,
        create_info: ImageCreateInfo,
        requirements: MemoryRequirements,
        sparse_requirements: Vec<SparseImageMemoryRequirements>,
    ) {
        self.registry.images.insert(Arc::new(ImageState::new(
            image,
            create_info,
            requirements,
            sparse_requirements,
        )));
    }

    /// `vkGetImageMemoryRequirements` and its variants.
    pub fn record_get_image_memory_requirements(&self, image: vk::Image) {
        if let Some(image) = self.registry.images.get(image) {
            image.bindable.set_memory_requirements_checked();
        }
    }

    pub fn validate_bind_image_memory(&self, bind_info: &BindImageMemoryInfo) -> bool {
        let Some(image) = self.registry.images.get(bind_info.image) else {
            return false;
        };

        self.validate_bind_memory(
            &BindableRef::Image(image),
            bind_info.memory,
            bind_info.memory_offset,
            BindMemoryApi::BindImageMemory,
            None,
        )
    }

    pub fn validate_bind_image_memory2(&self, bind_infos: &[BindImageMemoryInfo]) -> bool {
        let mut skip = false;

        for (index, bind_info) in bind_infos.iter().enumerate() {
            let Some(image) = self.registry.images.get(bind_info.image) else {
                continue;
            };

            skip |= self.validate_bind_memory(
                &BindableRef::Image(image),
                bind_info.memory,
                bind_info.memory_offset,
                BindMemoryApi::BindImageMemory2,
                Some(format!("bind_infos[{}]", index)),
            );
        }

        skip
    }

    /// `vkBindImageMemory` and `vkBindImageMemory2`.
    pub fn record_bind_image_memory(&self, bind_infos: &[BindImageMemoryInfo]) {
        for bind_info in bind_infos {
            if let Some(image) = self.registry.images.get(bind_info.image) {
                self.record_bind_memory(
                    &BindableRef::Image(image),
                    bind_info.memory,
                    bind_info.memory_offset,
                );
            }
        }
    }

    pub fn validate_destroy_image(&self, image: vk::Image) -> bool {
        let Some(state) = self.registry.images.get(image) else {
            return false;
        };

        let mut skip = false;

        if state.is_swapchain_image() {
            skip |= self.emit(Box::new(ValidationError {
                problem: format!(
                    "{} is owned by a swapchain and cannot be destroyed by the application",
                    self.format_handle(state.typed_handle()),
                )
                .into(),
                vuids: &["VUID-vkDestroyImage-image-04882"],
                kind: ErrorKind::StateIncompatible,
                objects: [state.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        skip | self.validate_destroy(
            &self.registry.images,
            image,
            &["VUID-vkDestroyImage-image-01000"],
        )
    }

    pub fn record_destroy_image(&self, image: vk::Image) {
        let Some(state) = self.destroy_object(&self.registry.images, image, BindingBreak::Destroyed)
        else {
            return;
        };

        clear_memory_object_bindings(&self.registry, &BindableRef::Image(state.clone()));
        self.emit_all(self.qfo.forget_resource(state.typed_handle()));
    }

    pub fn validate_create_image_view(&self, create_info: &ImageViewCreateInfo) -> bool {
        let Some(image) = self.registry.images.get(create_info.image) else {
            return false;
        };

        let mut skip = false;

        if let Err(error) = create_info
            .subresource_range
            .validate_within(image.full_range())
        {
            skip |= self.emit(error.add_context("create_info.subresource_range"));
        }

        if !create_info.usage.is_empty() && !image.create_info.usage.contains(create_info.usage) {
            skip |= self.emit(Box::new(ValidationError {
                context: "create_info.usage".into(),
                problem: format!(
                    "{:?} is not a subset of the usage {:?} of the image",
                    create_info.usage, image.create_info.usage,
                )
                .into(),
                vuids: &["VUID-VkImageViewUsageCreateInfo-usage-02274"],
                kind: ErrorKind::StateIncompatible,
                objects: [image.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        skip | self.emit_result(validate_memory_is_valid(
            &BindableRef::Image(image),
            "vkCreateImageView",
            &["VUID-VkImageViewCreateInfo-image-01020"],
        ))
    }

    pub fn record_create_image_view(&self, image_view: vk::ImageView, create_info: ImageViewCreateInfo) {
        let Some(image) = self.registry.images.get(create_info.image) else {
            return;
        };

        self.registry
            .image_views
            .insert(Arc::new(ImageViewState::new(image_view, create_info, image)));
    }

    pub fn validate_destroy_image_view(&self, image_view: vk::ImageView) -> bool {
        self.validate_destroy(
            &self.registry.image_views,
            image_view,
            &["VUID-vkDestroyImageView-imageView-01026"],
        )
    }

    pub fn record_destroy_image_view(&self, image_view: vk::ImageView) {
        self.destroy_object(
            &self.registry.image_views,
            image_view,
            BindingBreak::Destroyed,
        );
    }

    pub fn validate_create_buffer(&self, create_info: &BufferCreateInfo) -> bool {
        let mut skip = false;

        if create_info.size == 0 {
            skip |= self.emit(Box::new(ValidationError {
                context: "create_info.size".into(),
                problem: "is zero".into(),
                vuids: &["VUID-VkBufferCreateInfo-size-00912"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        skip | self.validate_sharing(
            &create_info.sharing,
            &["VUID-VkBufferCreateInfo-sharingMode-01419"],
        )
    }

    pub fn record_create_buffer(
        &self,
        buffer: vk::Buffer,
        create_info: BufferCreateInfo,
        requirements: MemoryRequirements,
    ) {
        self.registry
            .buffers
            .insert(Arc::new(BufferState::new(buffer, create_info, requirements)));
    }

    /// `vkGetBufferMemoryRequirements` and its variants.
    pub fn record_get_buffer_memory_requirements(&self, buffer: vk::Buffer) {
        if let Some(buffer) = self.registry.buffers.get(buffer) {
            buffer.bindable.set_memory_requirements_checked();
        }
    }

    pub fn validate_bind_buffer_memory(&self, bind_info: &BindBufferMemoryInfo) -> bool {
        let Some(buffer) = self.registry.buffers.get(bind_info.buffer) else {
            return false;
        };

        self.validate_bind_memory(
            &BindableRef::Buffer(buffer),
            bind_info.memory,
            bind_info.memory_offset,
            BindMemoryApi::BindBufferMemory,
            None,
        )
    }

    pub fn validate_bind_buffer_memory2(&self, bind_infos: &[BindBufferMemoryInfo]) -> bool {
        let mut skip = false;

        for (index, bind_info) in bind_infos.iter().enumerate() {
            let Some(buffer) = self.registry.buffers.get(bind_info.buffer) else {
                continue;
            };

            skip |= self.validate_bind_memory(
                &BindableRef::Buffer(buffer),
                bind_info.memory,
                bind_info.memory_offset,
                BindMemoryApi::BindBufferMemory2,
                Some(format!("bind_infos[{}]", index)),
            );
        }

        skip
    }

    /// `vkBindBufferMemory` and `vkBindBufferMemory2`.
    pub fn record_bind_buffer_memory(&self, bind_infos: &[BindBufferMemoryInfo]) {
        for bind_info in bind_infos {
            if let Some(buffer) = self.registry.buffers.get(bind_info.buffer) {
                self.record_bind_memory(
                    &BindableRef::Buffer(buffer),
                    bind_info.memory,
                    bind_info.memory_offset,
                );
            }
        }
    }

    pub fn validate_destroy_buffer(&self, buffer: vk::Buffer) -> bool {
        self.validate_destroy(
            &self.registry.buffers,
            buffer,
            &["VUID-vkDestroyBuffer-buffer-00922"],
        )
    }

    pub fn record_destroy_buffer(&self, buffer: vk::Buffer) {
        let Some(state) =
            self.destroy_object(&self.registry.buffers, buffer, BindingBreak::Destroyed)
        else {
            return;
        };

        clear_memory_object_bindings(&self.registry, &BindableRef::Buffer(state.clone()));
        self.emit_all(self.qfo.forget_resource(state.typed_handle()));
    }

    pub fn validate_create_buffer_view(&self, create_info: &BufferViewCreateInfo) -> bool {
        let Some(buffer) = self.registry.buffers.get(create_info.buffer) else {
            return false;
        };

        let mut skip = false;

        if !buffer
            .usage()
            .intersects(BufferUsage::UNIFORM_TEXEL_BUFFER | BufferUsage::STORAGE_TEXEL_BUFFER)
        {
            skip |= self.emit(Box::new(ValidationError {
                context: "create_info.buffer".into(),
                problem: format!(
                    "{} was not created with a texel buffer usage",
                    self.format_handle(buffer.typed_handle()),
                )
                .into(),
                vuids: &["VUID-VkBufferViewCreateInfo-buffer-00932"],
                kind: ErrorKind::StateIncompatible,
                objects: [buffer.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        if create_info.offset >= buffer.size() {
            skip |= self.emit(Box::new(ValidationError {
                context: "create_info.offset".into(),
                problem: format!(
                    "{} is not less than the size of the buffer ({})",
                    create_info.offset,
                    buffer.size(),
                )
                .into(),
                vuids: &["VUID-VkBufferViewCreateInfo-offset-00925"],
                kind: ErrorKind::ParameterOutOfRange,
                objects: [buffer.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        skip | self.emit_result(validate_memory_is_valid(
            &BindableRef::Buffer(buffer),
            "vkCreateBufferView",
            &["VUID-VkBufferViewCreateInfo-buffer-00935"],
        ))
    }

    pub fn record_create_buffer_view(
        &self,
        buffer_view: vk::BufferView,
        create_info: BufferViewCreateInfo,
    ) {
        let Some(buffer) = self.registry.buffers.get(create_info.buffer) else {
            return;
        };

        self.registry
            .buffer_views
            .insert(Arc::new(BufferViewState::new(buffer_view, create_info, buffer)));
    }

    pub fn validate_destroy_buffer_view(&self, buffer_view: vk::BufferView) -> bool {
        self.validate_destroy(
            &self.registry.buffer_views,
            buffer_view,
            &["VUID-vkDestroyBufferView-bufferView-00936"],
        )
    }

    pub fn record_destroy_buffer_view(&self, buffer_view: vk::BufferView) {
        self.destroy_object(
            &self.registry.buffer_views,
            buffer_view,
            BindingBreak::Destroyed,
        );
    }

    pub fn record_create_sampler(&self, sampler: vk::Sampler, create_info: SamplerCreateInfo) {
        let ycbcr_conversion = create_info
            .sampler_ycbcr_conversion
            .and_then(|conversion| self.registry.sampler_ycbcr_conversions.get(conversion));

        self.registry.samplers.insert(Arc::new(SamplerState::new(
            sampler,
            create_info,
            ycbcr_conversion,
        )));
    }

    pub fn validate_destroy_sampler(&self, sampler: vk::Sampler) -> bool {
        self.validate_destroy(
            &self.registry.samplers,
            sampler,
            &["VUID-vkDestroySampler-sampler-01082"],
        )
    }

    pub fn record_destroy_sampler(&self, sampler: vk::Sampler) {
        self.destroy_object(&self.registry.samplers, sampler, BindingBreak::Destroyed);
    }

    pub fn record_create_sampler_ycbcr_conversion(
        &self,
        conversion: vk::SamplerYcbcrConversion,
        format: vk::Format,
    ) {
        self.registry
            .sampler_ycbcr_conversions
            .insert(Arc::new(SamplerYcbcrConversionState::new(conversion, format)));
    }

    pub fn record_destroy_sampler_ycbcr_conversion(&self, conversion: vk::SamplerYcbcrConversion) {
        self.destroy_object(
            &self.registry.sampler_ycbcr_conversions,
            conversion,
            BindingBreak::Destroyed,
        );
    }

    pub fn validate_create_acceleration_structure(
        &self,
        create_info: &AccelerationStructureCreateInfo,
    ) -> bool {
        let Some(buffer) = create_info
            .buffer
            .and_then(|buffer| self.registry.buffers.get(buffer))
        else {
            return false;
        };

        let mut skip = false;

        if !buffer
            .usage()
            .intersects(BufferUsage::ACCELERATION_STRUCTURE_STORAGE)
        {
            skip |= self.emit(Box::new(ValidationError {
                context: "create_info.buffer".into(),
                problem: format!(
                    "{} was not created with the acceleration structure storage usage",
                    self.format_handle(buffer.typed_handle()),
                )
                .into(),
                vuids: &["VUID-VkAccelerationStructureCreateInfoKHR-buffer-03614"],
                kind: ErrorKind::StateIncompatible,
                objects: [buffer.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        if create_info.offset.saturating_add(create_info.size) > buffer.size() {
            skip |= self.emit(Box::new(ValidationError {
                context: "create_info".into(),
                problem: format!(
                    "offset {} plus size {} exceeds the size of the buffer ({})",
                    create_info.offset,
                    create_info.size,
                    buffer.size(),
                )
                .into(),
                vuids: &["VUID-VkAccelerationStructureCreateInfoKHR-offset-03616"],
                kind: ErrorKind::ParameterOutOfRange,
                objects: [buffer.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        skip | self.emit_result(validate_memory_is_valid(
            &BindableRef::Buffer(buffer),
            "vkCreateAccelerationStructureKHR",
            &["VUID-VkAccelerationStructureCreateInfoKHR-buffer-03615"],
        ))
    }

    /// A structure created on a buffer shares the memory that backs the buffer.
    pub fn record_create_acceleration_structure(
        &self,
        acceleration_structure: vk::AccelerationStructureKHR,
        create_info: AccelerationStructureCreateInfo,
        requirements: MemoryRequirements,
    ) {
        let storage = create_info.buffer.and_then(|buffer| {
            let buffer = self.registry.buffers.get(buffer)?;
            let binding = buffer.bindable.binding()?;
            let memory = self.registry.device_memories.get(binding.device_memory()?)?;

            Some((memory, binding.offset + create_info.offset))
        });
        let state = Arc::new(AccelerationStructureState::new(
            acceleration_structure,
            create_info,
            requirements,
        ));

        if let Some((memory, offset)) = storage {
            state.bindable.set_memory_requirements_checked();
            set_mem_binding(
                &memory,
                &BindableRef::AccelerationStructure(state.clone()),
                offset,
            );
        }

        self.registry.acceleration_structures.insert(state);
    }

    pub fn record_get_acceleration_structure_memory_requirements(
        &self,
        acceleration_structure: vk::AccelerationStructureKHR,
    ) {
        if let Some(state) = self
            .registry
            .acceleration_structures
            .get(acceleration_structure)
        {
            state.bindable.set_memory_requirements_checked();
        }
    }

    pub fn validate_bind_acceleration_structure_memory(
        &self,
        bind_infos: &[BindAccelerationStructureMemoryInfo],
    ) -> bool {
        let mut skip = false;

        for (index, bind_info) in bind_infos.iter().enumerate() {
            let Some(state) = self
                .registry
                .acceleration_structures
                .get(bind_info.acceleration_structure)
            else {
                continue;
            };

            skip |= self.validate_bind_memory(
                &BindableRef::AccelerationStructure(state),
                bind_info.memory,
                bind_info.memory_offset,
                BindMemoryApi::BindAccelerationStructureMemory,
                Some(format!("bind_infos[{}]", index)),
            );
        }

        skip
    }

    pub fn record_bind_acceleration_structure_memory(
        &self,
        bind_infos: &[BindAccelerationStructureMemoryInfo],
    ) {
        for bind_info in bind_infos {
            if let Some(state) = self
                .registry
                .acceleration_structures
                .get(bind_info.acceleration_structure)
            {
                self.record_bind_memory(
                    &BindableRef::AccelerationStructure(state),
                    bind_info.memory,
                    bind_info.memory_offset,
                );
            }
        }
    }

    pub fn validate_destroy_acceleration_structure(
        &self,
        acceleration_structure: vk::AccelerationStructureKHR,
    ) -> bool {
        self.validate_destroy(
            &self.registry.acceleration_structures,
            acceleration_structure,
            &["VUID-vkDestroyAccelerationStructureKHR-accelerationStructure-02442"],
        )
    }

    pub fn record_destroy_acceleration_structure(
        &self,
        acceleration_structure: vk::AccelerationStructureKHR,
    ) {
        if let Some(state) = self.destroy_object(
            &self.registry.acceleration_structures,
            acceleration_structure,
            BindingBreak::Destroyed,
        ) {
            clear_memory_object_bindings(&self.registry, &BindableRef::AccelerationStructure(state));
        }
    }

    pub fn validate_allocate_memory(&self, allocate_info: &MemoryAllocateInfo) -> bool {
        let mut skip = false;

        if self
            .device_info
            .memory_type(allocate_info.memory_type_index)
            .is_none()
        {
            skip |= self.emit(Box::new(ValidationError {
                context: "allocate_info.memory_type_index".into(),
                problem: format!(
                    "{} is not less than the number of memory types of the device ({})",
                    allocate_info.memory_type_index,
                    self.device_info.memory_types.len(),
                )
                .into(),
                vuids: &["VUID-vkAllocateMemory-pAllocateInfo-01714"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if allocate_info.allocation_size == 0 {
            skip |= self.emit(Box::new(ValidationError {
                context: "allocate_info.allocation_size".into(),
                problem: "is zero".into(),
                vuids: &["VUID-VkMemoryAllocateInfo-allocationSize-00638"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        skip
    }

    pub fn record_allocate_memory(&self, memory: vk::DeviceMemory, allocate_info: MemoryAllocateInfo) {
        let memory_type = self
            .device_info
            .memory_type(allocate_info.memory_type_index)
            .copied()
            .unwrap_or_default();

        self.registry.device_memories.insert(Arc::new(DeviceMemoryState::new(
            memory,
            allocate_info,
            memory_type,
        )));
    }

    pub fn validate_free_memory(&self, memory: vk::DeviceMemory) -> bool {
        self.validate_destroy(
            &self.registry.device_memories,
            memory,
            &["VUID-vkFreeMemory-memory-00677"],
        )
    }

    /// Resources that were bound to the memory stay alive, but can no longer be used or rebound.
    pub fn record_free_memory(&self, memory: vk::DeviceMemory) {
        let Some(state) = self.registry.device_memories.get(memory) else {
            return;
        };

        for resource in release_bound_objects(&self.registry, &state) {
            log::trace!(
                "{} lost its memory when {} was freed",
                resource.typed_handle(),
                state.typed_handle(),
            );
            self.invalidate_command_buffers(resource.base(), BindingBreak::Destroyed);
        }

        self.destroy_object(
            &self.registry.device_memories,
            memory,
            BindingBreak::Destroyed,
        );
    }

    pub fn validate_map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: DeviceSize,
        size: DeviceSize,
    ) -> bool {
        let Some(state) = self.registry.device_memories.get(memory) else {
            return false;
        };

        let objects = [state.typed_handle()].into_iter().collect::<smallvec::SmallVec<_>>();
        let allocation_size = state.allocate_info.allocation_size;
        let mut skip = false;

        if state.mapped_range().is_some() {
            skip |= self.emit(Box::new(ValidationError {
                context: "memory".into(),
                problem: "is already mapped".into(),
                vuids: &["VUID-vkMapMemory-memory-00678"],
                kind: ErrorKind::StateIncompatible,
                objects: objects.clone(),
                ..Default::default()
            }));
        }

        if !state
            .memory_type
            .property_flags
            .intersects(MemoryPropertyFlags::HOST_VISIBLE)
        {
            skip |= self.emit(Box::new(ValidationError {
                context: "memory".into(),
                problem: "was allocated from a memory type that is not host-visible".into(),
                vuids: &["VUID-vkMapMemory-memory-00682"],
                kind: ErrorKind::StateIncompatible,
                objects: objects.clone(),
                ..Default::default()
            }));
        }

        if offset >= allocation_size {
            skip |= self.emit(Box::new(ValidationError {
                context: "offset".into(),
                problem: format!(
                    "{} is not less than the allocation size ({})",
                    offset, allocation_size,
                )
                .into(),
                vuids: &["VUID-vkMapMemory-offset-00679"],
                kind: ErrorKind::ParameterOutOfRange,
                objects: objects.clone(),
                ..Default::default()
            }));
        }

        if size == 0 {
            skip |= self.emit(Box::new(ValidationError {
                context: "size".into(),
                problem: "is zero".into(),
                vuids: &["VUID-vkMapMemory-size-00680"],
                kind: ErrorKind::ParameterOutOfRange,
                objects,
                ..Default::default()
            }));
        } else if size != vk::WHOLE_SIZE && offset.saturating_add(size) > allocation_size {
            skip |= self.emit(Box::new(ValidationError {
                context: "size".into(),
                problem: format!(
                    "offset {} plus size {} exceeds the allocation size ({})",
                    offset, size, allocation_size,
                )
                .into(),
                vuids: &["VUID-vkMapMemory-size-00681"],
                kind: ErrorKind::ParameterOutOfRange,
                objects,
                ..Default::default()
            }));
        }

        skip
    }

    /// Mappings of non-coherent memory go through a shadow copy with a guard band on each side.
    pub fn record_map_memory(&self, memory: vk::DeviceMemory, offset: DeviceSize, size: DeviceSize) {
        let Some(state) = self.registry.device_memories.get(memory) else {
            return;
        };

        let size = state.resolve_size(offset, size);
        let shadow = (!state.is_coherent()).then(|| {
            crate::memory::ShadowCopy::new(
                size as usize,
                self.device_info.limits.min_memory_map_alignment,
            )
        });

        state.map(MappedRange { offset, size }, shadow);
    }

    /// Reports writes that landed in the guard bands of the shadow copy.
    fn validate_shadow_copy(&self, memory: &DeviceMemoryState, api_name: &'static str) -> bool {
        let Some(Err(corruption)) = memory.with_shadow_copy(|shadow| shadow.check_guards()) else {
            return false;
        };

        let problem = match (corruption.underflow, corruption.overflow) {
            (true, true) => "memory was written both before and past the end of the mapped range",
            (true, false) => "memory was written before the start of the mapped range (underflow)",
            _ => "memory was written past the end of the mapped range (overflow)",
        };

        self.emit(Box::new(ValidationError {
            context: api_name.into(),
            problem: problem.into(),
            vuids: &["UNASSIGNED-CoreValidation-MemTrack-InvalidMap"],
            kind: ErrorKind::ParameterOutOfRange,
            objects: [memory.typed_handle()].into_iter().collect(),
            ..Default::default()
        }))
    }

    pub fn validate_unmap_memory(&self, memory: vk::DeviceMemory) -> bool {
        let Some(state) = self.registry.device_memories.get(memory) else {
            return false;
        };

        if state.mapped_range().is_none() {
            return self.emit(Box::new(ValidationError {
                context: "memory".into(),
                problem: "is not mapped".into(),
                vuids: &["VUID-vkUnmapMemory-memory-00689"],
                kind: ErrorKind::StateIncompatible,
                objects: [state.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        self.validate_shadow_copy(&state, "vkUnmapMemory")
    }

    pub fn record_unmap_memory(&self, memory: vk::DeviceMemory) {
        if let Some(state) = self.registry.device_memories.get(memory) {
            state.unmap();
        }
    }

    fn validate_mapped_memory_ranges(
        &self,
        memory_ranges: &[MappedMemoryRange],
        api_name: &'static str,
        check_guards: bool,
    ) -> bool {
        let atom_size = self.device_info.limits.non_coherent_atom_size.max(1);
        let mut skip = false;

        for (index, range) in memory_ranges.iter().enumerate() {
            let Some(state) = self.registry.device_memories.get(range.memory) else {
                continue;
            };

            let context = format!("memory_ranges[{}]", index);
            let objects = [state.typed_handle()].into_iter().collect::<smallvec::SmallVec<_>>();
            let allocation_size = state.allocate_info.allocation_size;

            let Some(mapped) = state.mapped_range() else {
                skip |= self.emit(Box::new(ValidationError {
                    context: format!("{}.memory", context).into(),
                    problem: "is not mapped".into(),
                    vuids: &["VUID-VkMappedMemoryRange-memory-00684"],
                    kind: ErrorKind::StateIncompatible,
                    objects,
                    ..Default::default()
                }));
                continue;
            };

            if range.size == vk::WHOLE_SIZE {
                if range.offset < mapped.offset {
                    skip |= self.emit(Box::new(ValidationError {
                        context: format!("{}.offset", context).into(),
                        problem: format!(
                            "{} is less than the start of the mapped range ({})",
                            range.offset, mapped.offset,
                        )
                        .into(),
                        vuids: &["VUID-VkMappedMemoryRange-size-00686"],
                        kind: ErrorKind::ParameterOutOfRange,
                        objects: objects.clone(),
                        ..Default::default()
                    }));
                }
            } else if range.offset < mapped.offset
                || range.offset.saturating_add(range.size) > mapped.offset + mapped.size
            {
                skip |= self.emit(Box::new(ValidationError {
                    context: context.clone().into(),
                    problem: format!(
                        "the range {}..{} is not contained in the mapped range {}..{}",
                        range.offset,
                        range.offset.saturating_add(range.size),
                        mapped.offset,
                        mapped.offset + mapped.size,
                    )
                    .into(),
                    vuids: &["VUID-VkMappedMemoryRange-size-00685"],
                    kind: ErrorKind::ParameterOutOfRange,
                    objects: objects.clone(),
                    ..Default::default()
                }));
            }

            if range.offset % atom_size != 0 {
                skip |= self.emit(Box::new(ValidationError {
                    context: format!("{}.offset", context).into(),
                    problem: format!(
                        "{} is not a multiple of non_coherent_atom_size ({})",
                        range.offset, atom_size,
                    )
                    .into(),
                    vuids: &["VUID-VkMappedMemoryRange-offset-00687"],
                    kind: ErrorKind::StateIncompatible,
                    objects: objects.clone(),
                    ..Default::default()
                }));
            }

            if range.size != vk::WHOLE_SIZE
                && range.size % atom_size != 0
                && range.offset.saturating_add(range.size) != allocation_size
            {
                skip |= self.emit(Box::new(ValidationError {
                    context: format!("{}.size", context).into(),
                    problem: format!(
                        "{} is not a multiple of non_coherent_atom_size ({}) and the range does \
                        not end at the end of the allocation",
                        range.size, atom_size,
                    )
                    .into(),
                    vuids: &["VUID-VkMappedMemoryRange-size-01390"],
                    kind: ErrorKind::StateIncompatible,
                    objects,
                    ..Default::default()
                }));
            }

            if check_guards {
                skip |= self.validate_shadow_copy(&state, api_name);
            }
        }

        skip
    }

    pub fn validate_flush_mapped_memory_ranges(&self, memory_ranges: &[MappedMemoryRange]) -> bool {
        self.validate_mapped_memory_ranges(memory_ranges, "vkFlushMappedMemoryRanges", true)
    }

    pub fn validate_invalidate_mapped_memory_ranges(
        &self,
        memory_ranges: &[MappedMemoryRange],
    ) -> bool {
        self.validate_mapped_memory_ranges(memory_ranges, "vkInvalidateMappedMemoryRanges", false)
    }

    /// Whether `object` is currently bound to live memory. Swapchain images always are.
    pub fn is_bound_to_memory(&self, object: TypedHandle) -> bool {
        self.registry
            .get_bindable(object)
            .is_some_and(|resource| resource.bindable().has_usable_memory())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        buffer::{BufferCreateInfo, BufferUsage},
        image::ImageCreateInfo,
        memory::{BindBufferMemoryInfo, MappedMemoryRange, MemoryRequirements},
        registry::StateObject,
        tests::{allocate_memory, create_bound_buffer, create_buffer, handle},
        Severity,
    };
    use ash::vk;

    #[test]
    fn rebinding_a_buffer_is_an_error() {
        let (layer, reporter) = test_layer!();
        let memory = allocate_memory(&layer, 256, 0);
        let buffer: vk::Buffer = handle();

        layer.record_create_buffer(
            buffer,
            BufferCreateInfo {
                size: 256,
                usage: BufferUsage::UNIFORM_BUFFER,
                ..Default::default()
            },
            MemoryRequirements {
                size: 256,
                alignment: 4,
                memory_type_bits: 1,
            },
        );
        layer.record_get_buffer_memory_requirements(buffer);

        let bind_info = BindBufferMemoryInfo {
            buffer,
            memory,
            memory_offset: 0,
        };
        assert!(!layer.validate_bind_buffer_memory(&bind_info));
        layer.record_bind_buffer_memory(&[bind_info]);
        assert!(reporter.diagnostics().is_empty());

        let other = allocate_memory(&layer, 256, 0);
        layer.validate_bind_buffer_memory(&BindBufferMemoryInfo {
            memory: other,
            ..bind_info
        });
        assert!(reporter.contains("VUID-vkBindBufferMemory-buffer-01029"));
        assert_eq!(reporter.diagnostics().len(), 1);
    }

    #[test]
    fn binding_without_requirements_query_warns() {
        let (layer, reporter) = test_layer!();
        let memory = allocate_memory(&layer, 256, 0);
        let buffer = create_buffer(&layer, 64, BufferUsage::VERTEX_BUFFER);

        layer.validate_bind_buffer_memory(&BindBufferMemoryInfo {
            buffer,
            memory,
            memory_offset: 0,
        });

        let diagnostics = reporter.take();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
        assert_eq!(
            diagnostics[0].vuid,
            "UNASSIGNED-CoreValidation-BindBufferMemory-NoMemReqQuery",
        );
    }

    #[test]
    fn freed_memory_cannot_be_rebound() {
        let (layer, reporter) = test_layer!();
        let (buffer, memory) = create_bound_buffer(&layer, 64, BufferUsage::VERTEX_BUFFER);

        assert!(!layer.validate_free_memory(memory));
        layer.record_free_memory(memory);
        assert!(!layer.is_bound_to_memory(crate::TypedHandle::new(buffer)));

        let other = allocate_memory(&layer, 256, 0);
        layer.validate_bind_buffer_memory(&BindBufferMemoryInfo {
            buffer,
            memory: other,
            memory_offset: 0,
        });
        assert!(reporter.contains("UNASSIGNED-CoreValidation-MemTrack-RebindObject"));

        reporter.clear();
        layer.validate_create_buffer_view(&crate::buffer::BufferViewCreateInfo {
            buffer,
            format: vk::Format::R8_UINT,
            offset: 0,
            range: 64,
        });
        assert!(reporter.contains("VUID-VkBufferViewCreateInfo-buffer-00935"));
    }

    #[test]
    fn destroying_a_buffer_in_use() {
        let (layer, reporter) = test_layer!();
        let (buffer, _) = create_bound_buffer(&layer, 64, BufferUsage::VERTEX_BUFFER);
        let state = layer.registry().buffers.get(buffer).unwrap();

        state.base().begin_use();
        assert!(!layer.validate_destroy_buffer(buffer));
        assert!(reporter.contains("VUID-vkDestroyBuffer-buffer-00922"));
        assert_eq!(reporter.take()[0].kind, crate::ErrorKind::InUseOnDestroy);

        // The destroy goes ahead anyway.
        layer.record_destroy_buffer(buffer);
        assert!(layer.registry().buffers.get(buffer).is_none());
        assert!(state.base().is_destroyed());
    }

    #[test]
    fn image_creation_parameters() {
        let (layer, reporter) = test_layer!();

        layer.validate_create_image(&ImageCreateInfo {
            extent: [16, 0, 1],
            mip_levels: 0,
            ..Default::default()
        });
        assert!(reporter.contains("VUID-VkImageCreateInfo-extent-00944"));
        assert!(reporter.contains("VUID-VkImageCreateInfo-mipLevels-00947"));
        assert_eq!(reporter.diagnostics().len(), 2);
    }

    #[test]
    fn shadow_copy_guards() {
        let (layer, reporter) = test_layer!();
        // Memory type 2 is host-visible but not coherent.
        let memory = allocate_memory(&layer, 256, 2);

        assert!(!layer.validate_map_memory(memory, 0, vk::WHOLE_SIZE));
        layer.record_map_memory(memory, 0, vk::WHOLE_SIZE);

        let state = layer.registry().device_memories.get(memory).unwrap();
        state
            .with_shadow_copy(|shadow| shadow.data_mut().fill(0xAA))
            .unwrap();

        let range = MappedMemoryRange {
            memory,
            offset: 0,
            size: vk::WHOLE_SIZE,
        };
        assert!(!layer.validate_flush_mapped_memory_ranges(&[range]));
        assert!(reporter.diagnostics().is_empty());

        // One byte past the end of the mapping.
        state
            .with_shadow_copy(|shadow| {
                let guard = shadow.guard_size();
                shadow.raw_mut()[guard + 256] = 0;
            })
            .unwrap();
        layer.validate_flush_mapped_memory_ranges(&[range]);
        let diagnostics = reporter.take();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("overflow"));

        layer.validate_unmap_memory(memory);
        assert!(reporter.contains("UNASSIGNED-CoreValidation-MemTrack-InvalidMap"));
        layer.record_unmap_memory(memory);

        reporter.clear();
        layer.validate_unmap_memory(memory);
        assert!(reporter.contains("VUID-vkUnmapMemory-memory-00689"));
    }

    #[test]
    fn flush_range_alignment() {
        let (layer, reporter) = test_layer!();
        let memory = allocate_memory(&layer, 256, 1);

        layer.validate_flush_mapped_memory_ranges(&[MappedMemoryRange {
            memory,
            offset: 0,
            size: 64,
        }]);
        assert!(reporter.contains("VUID-VkMappedMemoryRange-memory-00684"));
        reporter.clear();

        layer.record_map_memory(memory, 64, 128);
        layer.validate_flush_mapped_memory_ranges(&[MappedMemoryRange {
            memory,
            offset: 65,
            size: 32,
        }]);
        assert!(reporter.contains("VUID-VkMappedMemoryRange-offset-00687"));
        assert!(reporter.contains("VUID-VkMappedMemoryRange-size-01390"));
        assert!(!reporter.contains("VUID-VkMappedMemoryRange-size-00685"));
    }

    #[test]
    fn mapping_device_local_memory() {
        let (layer, reporter) = test_layer!();
        let memory = allocate_memory(&layer, 256, 0);

        layer.validate_map_memory(memory, 256, 0);
        assert!(reporter.contains("VUID-vkMapMemory-memory-00682"));
        assert!(reporter.contains("VUID-vkMapMemory-offset-00679"));
        assert!(reporter.contains("VUID-vkMapMemory-size-00680"));
    }
}
