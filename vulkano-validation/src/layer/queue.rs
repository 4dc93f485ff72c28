//! Queue submission, sparse binding, and the waits that prove submitted work has completed.

use super::ValidationLayer;
use crate::{
    command_buffer::{CommandBufferLevel, CommandBufferRecordState, CommandBufferState, CommandBufferUsage, SubmitContext},
    device::QueueFlags,
    handle::TypedHandle,
    image::{ImageLayout, ImageState},
    memory::{set_sparse_mem_binding, SparseBinding},
    query::{QueryState, QueryObject},
    queue::{BindSparseInfo, QueueState, SemaphoreWait, Submission, SubmitInfo},
    registry::{BindableRef, StateObject},
    sync::{qfo::PendingQfo, SyncScope},
    ErrorKind, ValidationError,
};
use ash::vk;
use foldhash::{HashMap, HashSet};
use std::{ops::Range, sync::Arc};

const FORWARD_PROGRESS: &[&str] = &["UNASSIGNED-CoreValidation-DrawState-QueueForwardProgress"];

/// Semaphore payloads as changed by the batches of the call being validated.
#[derive(Default)]
pub(super) struct SemaphoreOverlay {
    signaled: HashMap<vk::Semaphore, bool>,
}

impl ValidationLayer {
    pub fn record_get_device_queue(
        &self,
        queue: vk::Queue,
        queue_family_index: u32,
        queue_index: u32,
    ) {
        if self.registry.queues.contains(queue) {
            return;
        }

        log::trace!(
            "retrieved {} (family {}, index {})",
            TypedHandle::new(queue),
            queue_family_index,
            queue_index,
        );
        self.registry.queues.insert(Arc::new(QueueState::new(
            queue,
            queue_family_index,
            queue_index,
        )));
    }

    pub(super) fn validate_semaphore_waits(
        &self,
        semaphores: &[vk::Semaphore],
        overlay: &mut SemaphoreOverlay,
        context: impl Fn(usize) -> String,
    ) -> bool {
        let mut skip = false;

        for (index, &semaphore) in semaphores.iter().enumerate() {
            let Some(state) = self.registry.semaphores.get(semaphore) else {
                continue;
            };

            if state.scope() != SyncScope::Internal {
                continue;
            }

            let result = match overlay.signaled.get(&semaphore) {
                Some(true) => Ok(()),
                Some(false) => Err(Box::new(ValidationError {
                    problem: "the semaphore is waited on, but an earlier batch of the same call \
                        already consumed its signal"
                        .into(),
                    vuids: FORWARD_PROGRESS,
                    kind: ErrorKind::Synchronization,
                    objects: [state.typed_handle()].into_iter().collect(),
                    ..Default::default()
                })),
                None => state.validate_wait(),
            };

            if let Err(error) = result {
                skip |= self.emit(error.add_context(context(index)));
            }

            overlay.signaled.insert(semaphore, false);
        }

        skip
    }

    fn validate_semaphore_signals(
        &self,
        semaphores: &[vk::Semaphore],
        overlay: &mut SemaphoreOverlay,
        vuids: &'static [&'static str],
        context: impl Fn(usize) -> String,
    ) -> bool {
        let mut skip = false;

        for (index, &semaphore) in semaphores.iter().enumerate() {
            let Some(state) = self.registry.semaphores.get(semaphore) else {
                continue;
            };

            if state.scope() != SyncScope::Internal {
                continue;
            }

            let result = match overlay.signaled.get(&semaphore) {
                Some(false) => Ok(()),
                Some(true) => Err(Box::new(ValidationError {
                    problem: "the semaphore is signaled again, but it has not been waited on \
                        since an earlier batch of the same call signaled it"
                        .into(),
                    vuids,
                    kind: ErrorKind::Synchronization,
                    objects: [state.typed_handle()].into_iter().collect(),
                    ..Default::default()
                })),
                None => state.validate_signal(vuids),
            };

            if let Err(error) = result {
                skip |= self.emit(error.add_context(context(index)));
            }

            overlay.signaled.insert(semaphore, true);
        }

        skip
    }

    fn validate_submit_fence(
        &self,
        fence: vk::Fence,
        in_use_vuids: &'static [&'static str],
        signaled_vuids: &'static [&'static str],
    ) -> bool {
        self.registry.fences.get(fence).map_or(false, |state| {
            self.emit_result(state.validate_for_submit(in_use_vuids, signaled_vuids))
        })
    }

    /// Checks that a primary command buffer can be submitted to `queue` as it is.
    fn validate_command_buffer_for_submit(
        &self,
        cb: &CommandBufferState,
        queue: &QueueState,
        submitted: &mut HashSet<vk::CommandBuffer>,
        context: &str,
    ) -> bool {
        let state = cb.state.lock();
        let first_in_call = submitted.insert(cb.handle());
        let mut skip = false;

        let error = |problem: String, vuids: &'static [&'static str], kind: ErrorKind| {
            Box::new(ValidationError {
                context: context.to_owned().into(),
                problem: problem.into(),
                vuids,
                kind,
                objects: [cb.typed_handle(), queue.typed_handle()]
                    .into_iter()
                    .collect(),
                ..Default::default()
            })
        };

        if cb.level == CommandBufferLevel::Secondary {
            skip |= self.emit(error(
                "is a secondary command buffer".to_owned(),
                &["VUID-VkSubmitInfo-pCommandBuffers-00075"],
                ErrorKind::StateIncompatible,
            ));
        }

        if cb.queue_family_index != queue.queue_family_index {
            skip |= self.emit(error(
                format!(
                    "was allocated from a pool of queue family {}, but the queue belongs to \
                    family {}",
                    cb.queue_family_index, queue.queue_family_index,
                ),
                &["VUID-vkQueueSubmit-pCommandBuffers-00074"],
                ErrorKind::StateIncompatible,
            ));
        }

        if self.settings.disabled.command_buffer_state {
            return skip;
        }

        match state.record_state {
            CommandBufferRecordState::Recorded => (),
            record_state if record_state.is_invalid() => {
                skip |= self.emit(
                    self.invalid_command_buffer_error(cb, &state, "vkQueueSubmit")
                        .add_context(context.to_owned()),
                );
            }
            record_state => {
                skip |= self.emit(error(
                    format!(
                        "is in the {:?} state, but it must have finished recording",
                        record_state,
                    ),
                    &["VUID-vkQueueSubmit-pCommandBuffers-00070"],
                    ErrorKind::StateIncompatible,
                ));
            }
        }

        let usage = state.begin_info.usage;

        if usage.intersects(CommandBufferUsage::ONE_TIME_SUBMIT)
            && (state.submit_count > 0 || !first_in_call)
        {
            skip |= self.emit(error(
                "was begun with `ONE_TIME_SUBMIT` and has already been submitted".to_owned(),
                &["UNASSIGNED-CoreValidation-DrawState-CommandBufferSingleSubmitViolation"],
                ErrorKind::StateIncompatible,
            ));
        }

        if !usage.intersects(CommandBufferUsage::SIMULTANEOUS_USE)
            && (cb.base().in_use() || !first_in_call)
            && !self.settings.disabled.object_in_use
        {
            skip |= self.emit(error(
                "is already pending execution, but it was not begun with `SIMULTANEOUS_USE`"
                    .to_owned(),
                &["VUID-vkQueueSubmit-pCommandBuffers-00071"],
                ErrorKind::InUseOnDestroy,
            ));
        }

        for &linked in &state.linked_command_buffers {
            let Some(secondary) = self.registry.command_buffers.get(linked) else {
                continue;
            };

            if secondary.level != CommandBufferLevel::Secondary {
                continue;
            }

            let secondary_state = secondary.state.lock();

            if secondary_state.record_state.is_invalid() {
                skip |= self.emit(
                    self.invalid_command_buffer_error(&secondary, &secondary_state, "vkQueueSubmit")
                        .add_context(context.to_owned())
                        .add_object(cb.typed_handle()),
                );
            }
        }

        skip
    }

    /// Compares the layouts the command buffer expects its images to be in with the layouts left
    /// by earlier work.
    fn validate_submitted_image_layouts(
        &self,
        ctx: &mut SubmitContext<'_>,
        image: &ImageState,
        initial_layouts: &[(Range<u64>, ImageLayout)],
    ) -> Option<Box<ValidationError>> {
        let globals = ctx.image_layouts(image);

        for (indices, expected) in initial_layouts {
            if *expected == ImageLayout::Undefined {
                continue;
            }

            for index in indices.clone() {
                let (actual, reference) = match globals.get(index) {
                    Some(layout) => (layout, "current"),
                    None => (image.create_info.initial_layout, "initial"),
                };

                if actual == *expected {
                    continue;
                }

                let subresource = image.encoder().decode(index);

                return Some(Box::new(ValidationError {
                    problem: format!(
                        "{} (aspect {:?}, mip level {}, array layer {}) is expected to be in \
                        layout {:?} when the command buffer starts executing, but its {} layout \
                        is {:?}",
                        self.format_handle(image.typed_handle()),
                        subresource.aspect,
                        subresource.mip_level,
                        subresource.array_layer,
                        expected,
                        reference,
                        actual,
                    )
                    .into(),
                    vuids: &["UNASSIGNED-CoreValidation-DrawState-InvalidImageLayout"],
                    kind: ErrorKind::StateIncompatible,
                    objects: [TypedHandle::new(ctx.command_buffer), image.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
            }
        }

        None
    }

    /// Runs the submit-time checks of one command buffer against `ctx`, then applies its effects
    /// to `ctx` for the command buffers that follow.
    fn validate_submitted_commands(
        &self,
        cb: &CommandBufferState,
        ctx: &mut SubmitContext<'_>,
        pending_qfo: &mut PendingQfo,
        context: &str,
    ) -> bool {
        ctx.command_buffer = cb.handle();

        let (image_layouts, submit_functions, qfo_errors) = {
            let state = cb.state.lock();
            let image_layouts: Vec<_> = state
                .image_layouts
                .iter()
                .filter_map(|(&image, map)| {
                    let image = self.registry.images.get(image)?;
                    Some((image, map.initial_layouts(), map.current_layouts()))
                })
                .collect();
            let qfo_errors =
                self.qfo
                    .validate_command_buffer(&state.qfo_transfers, pending_qfo, cb.handle());

            (image_layouts, state.queue_submit_functions.clone(), qfo_errors)
        };

        let mut errors = Vec::new();

        if !self.settings.disabled.image_layout_validation {
            errors.extend(image_layouts.iter().filter_map(|(image, initial, _)| {
                self.validate_submitted_image_layouts(ctx, image, initial)
            }));
        }

        for function in &submit_functions {
            errors.extend(function(ctx));
        }

        for (image, _, current) in &image_layouts {
            ctx.image_layouts(image).apply_runs(current);
        }

        errors.extend(qfo_errors);

        self.emit_all(
            errors
                .into_iter()
                .map(|error| error.add_context(context.to_owned())),
        )
    }

    pub fn validate_queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[SubmitInfo],
        fence: vk::Fence,
    ) -> bool {
        let Some(queue_state) = self.registry.queues.get(queue) else {
            return false;
        };

        let mut skip = self.validate_submit_fence(
            fence,
            &["VUID-vkQueueSubmit-fence-00064"],
            &["VUID-vkQueueSubmit-fence-00063"],
        );

        let mut ctx = SubmitContext::new(&self.registry, &queue_state);
        let mut pending_qfo = PendingQfo::default();
        let mut overlay = SemaphoreOverlay::default();
        let mut submitted = HashSet::default();

        for (submit_index, submit) in submits.iter().enumerate() {
            skip |= self.validate_semaphore_waits(&submit.wait_semaphores, &mut overlay, |index| {
                format!("submits[{}].wait_semaphores[{}]", submit_index, index)
            });

            for (index, &command_buffer) in submit.command_buffers.iter().enumerate() {
                let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
                    continue;
                };

                let context = format!("submits[{}].command_buffers[{}]", submit_index, index);
                skip |=
                    self.validate_command_buffer_for_submit(&cb, &queue_state, &mut submitted, &context);
                skip |= self.validate_submitted_commands(&cb, &mut ctx, &mut pending_qfo, &context);
            }

            skip |= self.validate_semaphore_signals(
                &submit.signal_semaphores,
                &mut overlay,
                &["VUID-vkQueueSubmit-pSignalSemaphores-00067"],
                |index| format!("submits[{}].signal_semaphores[{}]", submit_index, index),
            );
        }

        skip
    }

    pub(super) fn use_object(&self, object: TypedHandle, submission: &mut Submission) {
        if let Some(state) = self.registry.get_base(object) {
            state.object_base().begin_use();
            submission.in_use.push(object);
        }
    }

    pub(super) fn record_semaphore_waits(&self, semaphores: &[vk::Semaphore], submission: &mut Submission) {
        for &semaphore in semaphores {
            let Some(state) = self.registry.semaphores.get(semaphore) else {
                continue;
            };

            let external = state.scope() != SyncScope::Internal;
            let signaler = state.wait();
            self.use_object(state.typed_handle(), submission);
            submission.waits.push(SemaphoreWait {
                semaphore,
                signaler,
                external,
            });
        }
    }

    fn record_semaphore_signals(
        &self,
        semaphores: &[vk::Semaphore],
        submission: &mut Submission,
        signaler: (vk::Queue, u64),
    ) {
        for &semaphore in semaphores {
            let Some(state) = self.registry.semaphores.get(semaphore) else {
                continue;
            };

            self.use_object(state.typed_handle(), submission);

            if state.scope() == SyncScope::Internal {
                submission.signals.push(semaphore);
            } else {
                submission.external_signals.push(semaphore);
            }

            state.signal(Some(signaler));
        }
    }

    /// Marks everything a command buffer uses as in use by `submission`, and makes its effects
    /// the new device-wide state.
    fn record_submitted_command_buffer(&self, cb: &CommandBufferState, submission: &mut Submission) {
        let mut state = cb.state.lock();
        state.submit_count += 1;

        self.use_object(cb.typed_handle(), submission);

        for &object in &state.object_bindings {
            self.use_object(object, submission);
        }

        for &linked in &state.linked_command_buffers {
            let Some(secondary) = self.registry.command_buffers.get(linked) else {
                continue;
            };

            if secondary.level != CommandBufferLevel::Secondary {
                continue;
            }

            self.use_object(secondary.typed_handle(), submission);

            for object in secondary.object_bindings() {
                self.use_object(object, submission);
            }
        }

        for &event in &state.write_events_before_wait {
            if let Some(event_state) = self.registry.events.get(event) {
                event_state.begin_write();
                submission.event_writes.push(event);
            }
        }

        submission
            .event_stages
            .extend(state.event_updates.iter().copied());
        submission
            .query_updates
            .extend(state.query_updates.iter().copied());

        for (&image, map) in &state.image_layouts {
            if let Some(image) = self.registry.images.get(image) {
                image.state.lock().layouts.apply(map);
            }
        }

        self.qfo.record_command_buffer(&state.qfo_transfers);
        submission.command_buffers.push(cb.handle());
    }

    /// Attaches `fence` to the last of the submissions just made, pushing an empty one if there
    /// were none.
    fn record_submit_fence(&self, queue: &QueueState, fence: vk::Fence, batch_count: usize) {
        let Some(state) = self.registry.fences.get(fence) else {
            return;
        };

        if batch_count == 0 {
            let mut submission = Submission::default();
            self.use_object(state.typed_handle(), &mut submission);
            submission.fence = Some(fence);
            queue.push(submission);
        }

        state.submit(Some((queue.handle(), queue.last_seq())));
    }

    pub fn record_queue_submit(&self, queue: vk::Queue, submits: &[SubmitInfo], fence: vk::Fence) {
        let Some(queue_state) = self.registry.queues.get(queue) else {
            return;
        };

        let fence_state = self.registry.fences.get(fence);

        for (submit_index, submit) in submits.iter().enumerate() {
            let seq = queue_state.last_seq() + 1;
            let mut submission = Submission::default();

            self.record_semaphore_waits(&submit.wait_semaphores, &mut submission);

            for &command_buffer in &submit.command_buffers {
                if let Some(cb) = self.registry.command_buffers.get(command_buffer) {
                    self.record_submitted_command_buffer(&cb, &mut submission);
                }
            }

            self.record_semaphore_signals(&submit.signal_semaphores, &mut submission, (queue, seq));

            if submit_index + 1 == submits.len() {
                if let Some(fence_state) = &fence_state {
                    self.use_object(fence_state.typed_handle(), &mut submission);
                    submission.fence = Some(fence);
                }
            }

            queue_state.push(submission);
        }

        self.record_submit_fence(&queue_state, fence, submits.len());

        log::debug!(
            "{} submitted {} batch(es), last sequence number {}",
            queue_state.typed_handle(),
            submits.len(),
            queue_state.last_seq(),
        );
    }

    fn validate_sparse_bindings(
        &self,
        resource: &BindableRef,
        resource_size: Option<vk::DeviceSize>,
        bindings: &[SparseBinding],
        context: impl Fn(usize) -> String,
    ) -> bool {
        let mut skip = false;

        if !resource.bindable().is_sparse() {
            skip |= self.emit(Box::new(ValidationError {
                context: context(0).into(),
                problem: format!(
                    "binds {}, but it was not created with sparse binding",
                    self.format_handle(resource.typed_handle()),
                )
                .into(),
                vuids: &["VUID-VkBindSparseInfo-pBufferBinds-parameter"],
                kind: ErrorKind::StateIncompatible,
                objects: [resource.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        for (index, binding) in bindings.iter().enumerate() {
            if binding.memory != vk::DeviceMemory::null()
                && !self.registry.device_memories.contains(binding.memory)
            {
                skip |= self.emit(Box::new(ValidationError {
                    context: format!("{}.memory", context(index)).into(),
                    problem: format!(
                        "{} has been freed",
                        self.format_handle(TypedHandle::new(binding.memory)),
                    )
                    .into(),
                    vuids: &["VUID-VkSparseMemoryBind-memory-parameter"],
                    kind: ErrorKind::UseAfterFree,
                    objects: [resource.typed_handle(), TypedHandle::new(binding.memory)]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
            }

            let Some(resource_size) = resource_size else {
                continue;
            };

            if binding.resource_offset >= resource_size {
                skip |= self.emit(Box::new(ValidationError {
                    context: format!("{}.resource_offset", context(index)).into(),
                    problem: format!(
                        "is {}, but the resource is only {} bytes",
                        binding.resource_offset, resource_size,
                    )
                    .into(),
                    vuids: &["VUID-VkSparseMemoryBind-resourceOffset-01099"],
                    kind: ErrorKind::ParameterOutOfRange,
                    objects: [resource.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            } else if binding.size > resource_size - binding.resource_offset {
                skip |= self.emit(Box::new(ValidationError {
                    context: format!("{}.size", context(index)).into(),
                    problem: format!(
                        "is {}, but only {} bytes of the resource remain after the offset",
                        binding.size,
                        resource_size - binding.resource_offset,
                    )
                    .into(),
                    vuids: &["VUID-VkSparseMemoryBind-size-01100"],
                    kind: ErrorKind::ParameterOutOfRange,
                    objects: [resource.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }
        }

        skip
    }

    pub fn validate_queue_bind_sparse(
        &self,
        queue: vk::Queue,
        bind_infos: &[BindSparseInfo],
        fence: vk::Fence,
    ) -> bool {
        let Some(queue_state) = self.registry.queues.get(queue) else {
            return false;
        };

        let mut skip = false;
        let queue_flags = self.device_info.queue_flags(queue_state.queue_family_index);

        if !queue_flags.intersects(QueueFlags::SPARSE_BINDING) {
            skip |= self.emit(Box::new(ValidationError {
                context: "queue".into(),
                problem: format!(
                    "belongs to queue family {}, which does not support sparse binding",
                    queue_state.queue_family_index,
                )
                .into(),
                vuids: &["VUID-vkQueueBindSparse-queuetype"],
                kind: ErrorKind::MissingPrerequisite,
                objects: [queue_state.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        skip |= self.validate_submit_fence(
            fence,
            &["VUID-vkQueueBindSparse-fence-01114"],
            &["VUID-vkQueueBindSparse-fence-01113"],
        );

        let mut overlay = SemaphoreOverlay::default();

        for (info_index, info) in bind_infos.iter().enumerate() {
            skip |= self.validate_semaphore_waits(&info.wait_semaphores, &mut overlay, |index| {
                format!("bind_infos[{}].wait_semaphores[{}]", info_index, index)
            });

            for (bind_index, (buffer, bindings)) in info.buffer_binds.iter().enumerate() {
                let Some(buffer) = self.registry.buffers.get(*buffer) else {
                    continue;
                };

                let size = buffer.size();
                skip |= self.validate_sparse_bindings(
                    &BindableRef::Buffer(buffer),
                    Some(size),
                    bindings,
                    |index| {
                        format!(
                            "bind_infos[{}].buffer_binds[{}].binds[{}]",
                            info_index, bind_index, index,
                        )
                    },
                );
            }

            for (bind_index, (image, bindings)) in info.image_opaque_binds.iter().enumerate() {
                let Some(image) = self.registry.get_bindable(TypedHandle::new(*image)) else {
                    continue;
                };

                skip |= self.validate_sparse_bindings(&image, None, bindings, |index| {
                    format!(
                        "bind_infos[{}].image_opaque_binds[{}].binds[{}]",
                        info_index, bind_index, index,
                    )
                });
            }

            skip |= self.validate_semaphore_signals(
                &info.signal_semaphores,
                &mut overlay,
                &["VUID-vkQueueBindSparse-pSignalSemaphores-01115"],
                |index| format!("bind_infos[{}].signal_semaphores[{}]", info_index, index),
            );
        }

        skip
    }

    pub fn record_queue_bind_sparse(
        &self,
        queue: vk::Queue,
        bind_infos: &[BindSparseInfo],
        fence: vk::Fence,
    ) {
        let Some(queue_state) = self.registry.queues.get(queue) else {
            return;
        };

        let fence_state = self.registry.fences.get(fence);

        for (info_index, info) in bind_infos.iter().enumerate() {
            let seq = queue_state.last_seq() + 1;
            let mut submission = Submission::default();

            self.record_semaphore_waits(&info.wait_semaphores, &mut submission);

            for (buffer, bindings) in &info.buffer_binds {
                let Some(buffer) = self.registry.buffers.get(*buffer) else {
                    continue;
                };

                let resource = BindableRef::Buffer(buffer);

                for binding in bindings {
                    set_sparse_mem_binding(&self.registry, &resource, *binding);
                }
            }

            for (image, bindings) in &info.image_opaque_binds {
                let Some(image_state) = self.registry.images.get(*image) else {
                    continue;
                };
                let Some(resource) = self.registry.get_bindable(TypedHandle::new(*image)) else {
                    continue;
                };

                for binding in bindings {
                    set_sparse_mem_binding(&self.registry, &resource, *binding);

                    if binding.metadata && binding.memory != vk::DeviceMemory::null() {
                        image_state.state.lock().sparse_metadata_bound = true;
                    }
                }
            }

            self.record_semaphore_signals(&info.signal_semaphores, &mut submission, (queue, seq));

            if info_index + 1 == bind_infos.len() {
                if let Some(fence_state) = &fence_state {
                    self.use_object(fence_state.typed_handle(), &mut submission);
                    submission.fence = Some(fence);
                }
            }

            queue_state.push(submission);
        }

        self.record_submit_fence(&queue_state, fence, bind_infos.len());

        log::debug!(
            "{} bound sparse memory in {} batch(es)",
            queue_state.typed_handle(),
            bind_infos.len(),
        );
    }

    /// Retires the submissions of `queue` up to `target_seq`, then the submissions on other
    /// queues that they waited on.
    ///
    /// Retiring releases the objects a submission kept in use and makes its query and event
    /// effects visible to the host. When `switch_finished_queries` is set, ended queries become
    /// available.
    pub(crate) fn retire_work_on_queue(
        &self,
        queue: &QueueState,
        target_seq: u64,
        switch_finished_queries: bool,
    ) {
        let retired = queue.pop_until(target_seq);

        if retired.is_empty() {
            return;
        }

        let mut waited: HashMap<vk::Queue, u64> = HashMap::default();

        for (seq, submission) in retired {
            for &object in &submission.in_use {
                if let Some(state) = self.registry.get_base(object) {
                    state.object_base().end_use();
                }
            }

            for &event in &submission.event_writes {
                if let Some(event) = self.registry.events.get(event) {
                    event.end_write();
                }
            }

            for &(event, stage_mask) in &submission.event_stages {
                if let Some(event) = self.registry.events.get(event) {
                    event.set_stage_mask(stage_mask);
                }
            }

            for &(query, state) in &submission.query_updates {
                let Some(pool) = self.registry.query_pools.get(query.pool) else {
                    continue;
                };

                let state = match state {
                    QueryState::Ended if switch_finished_queries => QueryState::Available,
                    state => state,
                };
                pool.set_state(query.query..query.query + 1, state);
            }

            for wait in &submission.waits {
                if let Some((other, other_seq)) = wait.signaler {
                    if other != queue.handle() {
                        let entry = waited.entry(other).or_insert(0);
                        *entry = (*entry).max(other_seq);
                    }
                }
            }

            if let Some(fence) = submission.fence.and_then(|fence| self.registry.fences.get(fence)) {
                fence.retire();
            }

            log::debug!("{} retired submission {}", queue.typed_handle(), seq);
        }

        for (other, other_seq) in waited {
            if let Some(other) = self.registry.queues.get(other) {
                self.retire_work_on_queue(&other, other_seq, switch_finished_queries);
            }
        }
    }

    /// Checks that every semaphore wait of the submissions on `queue` up to `target_seq`, and of
    /// the submissions they wait on, will be signaled.
    fn verify_queue_state_to_seq(
        &self,
        queue: &QueueState,
        target_seq: u64,
        visited: &mut HashMap<vk::Queue, u64>,
        fence: vk::Fence,
    ) -> bool {
        let start = visited.get(&queue.handle()).copied().unwrap_or(queue.seq()) + 1;

        if start > target_seq {
            return false;
        }

        visited.insert(queue.handle(), target_seq);
        let mut skip = false;

        for seq in start..=target_seq.min(queue.last_seq()) {
            let Some(submission) = queue.submission(seq) else {
                continue;
            };

            for wait in &submission.waits {
                match wait.signaler {
                    Some((other, other_seq)) => {
                        if let Some(other) = self.registry.queues.get(other) {
                            skip |= self.verify_queue_state_to_seq(&other, other_seq, visited, fence);
                        }
                    }
                    None if !wait.external => {
                        skip |= self.emit(Box::new(ValidationError {
                            context: "fences".into(),
                            problem: format!(
                                "{} is signaled by submission {} of {}, which waits on {} with \
                                no signal operation pending, so it will never complete",
                                self.format_handle(TypedHandle::new(fence)),
                                seq,
                                self.format_handle(queue.typed_handle()),
                                self.format_handle(TypedHandle::new(wait.semaphore)),
                            )
                            .into(),
                            vuids: FORWARD_PROGRESS,
                            kind: ErrorKind::Synchronization,
                            objects: [
                                TypedHandle::new(fence),
                                queue.typed_handle(),
                                TypedHandle::new(wait.semaphore),
                            ]
                            .into_iter()
                            .collect(),
                            ..Default::default()
                        }));
                    }
                    None => (),
                }
            }
        }

        skip
    }

    pub fn validate_wait_for_fences(&self, fences: &[vk::Fence]) -> bool {
        let mut visited = HashMap::default();
        let mut skip = false;

        for &fence in fences {
            let Some((queue, seq)) = self
                .registry
                .fences
                .get(fence)
                .and_then(|state| state.signaler())
            else {
                continue;
            };

            if let Some(queue) = self.registry.queues.get(queue) {
                skip |= self.verify_queue_state_to_seq(&queue, seq, &mut visited, fence);
            }
        }

        skip
    }

    fn retire_fence(&self, fence: vk::Fence) {
        let Some(state) = self.registry.fences.get(fence) else {
            return;
        };

        if let Some((queue, seq)) = state.signaler() {
            if let Some(queue) = self.registry.queues.get(queue) {
                self.retire_work_on_queue(&queue, seq, true);
            }
        }

        state.retire();
    }

    /// A successful wait proves the fences signaled. Waiting for any one of several fences
    /// proves nothing about a particular one.
    pub fn record_wait_for_fences(&self, fences: &[vk::Fence], wait_all: bool) {
        if !wait_all && fences.len() != 1 {
            return;
        }

        for &fence in fences {
            self.retire_fence(fence);
        }
    }

    /// `vkGetFenceStatus`; `signaled` is whether the driver returned `VK_SUCCESS`.
    pub fn record_get_fence_status(&self, fence: vk::Fence, signaled: bool) {
        if signaled {
            self.retire_fence(fence);
        }
    }

    pub fn record_queue_wait_idle(&self, queue: vk::Queue) {
        if let Some(queue) = self.registry.queues.get(queue) {
            self.retire_work_on_queue(&queue, queue.last_seq(), true);
        }
    }

    pub fn record_device_wait_idle(&self) {
        for queue in self.registry.queues.snapshot() {
            self.retire_work_on_queue(&queue, queue.last_seq(), true);
        }
    }

    /// Retires, on every queue, the submissions up to the last one that writes a query of
    /// `pool` in `queries`.
    pub(crate) fn retire_query_writers(&self, pool: vk::QueryPool, queries: Range<u32>) {
        for queue in self.registry.queues.snapshot() {
            let last_writer = (queue.seq() + 1..=queue.last_seq())
                .filter(|&seq| {
                    queue.submission(seq).is_some_and(|submission| {
                        submission.query_updates.iter().any(|(query, _)| {
                            query.pool == pool && queries.contains(&query.query)
                        })
                    })
                })
                .last();

            if let Some(seq) = last_writer {
                self.retire_work_on_queue(&queue, seq, true);
            }
        }
    }

    /// The state `query` is in as far as the host can tell, including pending work on every
    /// queue.
    pub fn query_state(&self, pool: vk::QueryPool, query: u32) -> Option<QueryState> {
        let query = QueryObject::new(pool, query);
        let pending = self
            .registry
            .queues
            .snapshot()
            .into_iter()
            .find_map(|queue| queue.query_state(&query));

        pending.or_else(|| {
            self.registry
                .query_pools
                .get(pool)
                .map(|pool| pool.state(query.query))
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        buffer::BufferUsage,
        command_buffer::{
            CommandBufferBeginInfo, CommandBufferLevel, CommandBufferUsage,
            CommandPoolCreateFlags,
        },
        device::{DeviceFeatures, DeviceInfo, QueueFamilyProperties},
        image::{ImageAspects, ImageCreateInfo, ImageLayout, ImageSubresourceRange, ImageUsage},
        query::{QueryControlFlags, QueryPoolCreateInfo, QueryResultFlags, QueryState, QueryType},
        queue::SubmitInfo,
        registry::StateObject,
        sync::{
            fence::{FenceCreateInfo, FenceStatus},
            semaphore::SemaphoreCreateInfo,
            AccessFlags, DependencyInfo, ImageMemoryBarrier, PipelineStages,
        },
        tests::{
            allocate_command_buffer_on, begin_primary, create_bound_buffer, create_image,
            create_queue, handle,
        },
        CollectingReporter, LayerSettings, ValidationLayer,
    };
    use ash::vk;
    use smallvec::smallvec;
    use std::sync::Arc;

    fn submit(command_buffers: &[vk::CommandBuffer]) -> Vec<SubmitInfo> {
        vec![SubmitInfo {
            command_buffers: command_buffers.to_vec(),
            ..Default::default()
        }]
    }

    fn recorded(layer: &ValidationLayer) -> vk::CommandBuffer {
        let cb = begin_primary(layer);
        layer.record_end_command_buffer(cb);
        cb
    }

    #[test]
    fn empty_submit_with_fence() {
        let (layer, reporter) = test_layer!();
        let queue = create_queue(&layer, 0);
        let fence = handle();
        layer.record_create_fence(fence, FenceCreateInfo::default());

        assert!(!layer.validate_queue_submit(queue, &[], fence));
        layer.record_queue_submit(queue, &[], fence);

        let queue_state = layer.registry().queues.get(queue).unwrap();
        let fence_state = layer.registry().fences.get(fence).unwrap();
        assert_eq!(fence_state.status(), FenceStatus::Inflight);
        assert_eq!(fence_state.signaler(), Some((queue, 1)));
        assert_eq!(queue_state.seq(), 0);

        assert!(!layer.validate_wait_for_fences(&[fence]));
        layer.record_wait_for_fences(&[fence], true);
        assert_eq!(fence_state.status(), FenceStatus::Retired);
        assert_eq!(queue_state.seq(), 1);
        assert_eq!(queue_state.pending_count(), 0);
        assert!(reporter.diagnostics().is_empty());

        // A retired fence must be reset before it is submitted again.
        layer.validate_queue_submit(queue, &[], fence);
        assert!(reporter.contains("VUID-vkQueueSubmit-fence-00063"));
    }

    #[test]
    fn retiring_releases_objects_once() {
        let (layer, reporter) = test_layer!();
        let queue = create_queue(&layer, 0);
        let (src, _) = create_bound_buffer(&layer, 256, BufferUsage::TRANSFER_SRC);
        let (dst, _) = create_bound_buffer(&layer, 256, BufferUsage::TRANSFER_DST);

        let cb = begin_primary(&layer);
        layer.record_cmd_copy_buffer(cb, src, dst);
        layer.record_end_command_buffer(cb);

        let submits = submit(&[cb]);
        assert!(!layer.validate_queue_submit(queue, &submits, vk::Fence::null()));
        layer.record_queue_submit(queue, &submits, vk::Fence::null());
        assert!(reporter.diagnostics().is_empty());

        let buffer_state = layer.registry().buffers.get(dst).unwrap();
        let cb_state = layer.registry().command_buffers.get(cb).unwrap();
        assert_eq!(buffer_state.base().in_use_count(), 1);
        assert_eq!(cb_state.submit_count(), 1);

        // The command buffer is still pending.
        layer.validate_queue_submit(queue, &submits, vk::Fence::null());
        assert!(reporter.contains("VUID-vkQueueSubmit-pCommandBuffers-00071"));
        layer.validate_destroy_buffer(dst);
        assert!(reporter.contains("VUID-vkDestroyBuffer-buffer-00922"));
        reporter.clear();

        let queue_state = layer.registry().queues.get(queue).unwrap();
        layer.retire_work_on_queue(&queue_state, 1, true);
        layer.retire_work_on_queue(&queue_state, 1, true);
        assert_eq!(buffer_state.base().in_use_count(), 0);
        assert_eq!(cb_state.base().in_use_count(), 0);
        assert_eq!(queue_state.seq(), 1);

        assert!(!layer.validate_destroy_buffer(dst));
        assert!(reporter.diagnostics().is_empty());
    }

    #[test]
    fn command_buffer_state_at_submit() {
        let (layer, reporter) = test_layer!();
        let queue = create_queue(&layer, 0);

        let cb = begin_primary(&layer);
        layer.validate_queue_submit(queue, &submit(&[cb]), vk::Fence::null());
        assert!(reporter.contains("VUID-vkQueueSubmit-pCommandBuffers-00070"));
        reporter.clear();

        let cb = allocate_command_buffer_on(
            &layer,
            0,
            CommandPoolCreateFlags::empty(),
            CommandBufferLevel::Primary,
        );
        layer.record_begin_command_buffer(
            cb,
            CommandBufferBeginInfo {
                usage: CommandBufferUsage::ONE_TIME_SUBMIT,
                ..Default::default()
            },
        );
        layer.record_end_command_buffer(cb);
        layer.record_queue_submit(queue, &submit(&[cb]), vk::Fence::null());
        layer.record_queue_wait_idle(queue);

        layer.validate_queue_submit(queue, &submit(&[cb]), vk::Fence::null());
        assert!(reporter
            .contains("UNASSIGNED-CoreValidation-DrawState-CommandBufferSingleSubmitViolation"));
    }

    #[test]
    fn semaphores_need_a_pending_signal() {
        let (layer, reporter) = test_layer!();
        let queue = create_queue(&layer, 0);
        let semaphore = handle();
        layer.record_create_semaphore(semaphore, SemaphoreCreateInfo::default());

        let wait = vec![SubmitInfo {
            wait_semaphores: vec![semaphore],
            ..Default::default()
        }];
        layer.validate_queue_submit(queue, &wait, vk::Fence::null());
        assert!(reporter.contains("UNASSIGNED-CoreValidation-DrawState-QueueForwardProgress"));
        reporter.clear();

        // Signaling in an earlier batch of the same call is enough.
        let signal_then_wait = vec![
            SubmitInfo {
                signal_semaphores: vec![semaphore],
                ..Default::default()
            },
            SubmitInfo {
                wait_semaphores: vec![semaphore],
                ..Default::default()
            },
        ];
        assert!(!layer.validate_queue_submit(queue, &signal_then_wait, vk::Fence::null()));
        assert!(reporter.diagnostics().is_empty());

        let signal_twice = vec![SubmitInfo {
            signal_semaphores: vec![semaphore, semaphore],
            ..Default::default()
        }];
        layer.validate_queue_submit(queue, &signal_twice, vk::Fence::null());
        assert!(reporter.contains("VUID-vkQueueSubmit-pSignalSemaphores-00067"));
    }

    #[test]
    fn waits_retire_the_signaling_queue() {
        let device_info = DeviceInfo {
            queue_family_properties: vec![QueueFamilyProperties {
                queue_count: 2,
                ..Default::default()
            }],
            ..Default::default()
        };
        let (layer, reporter) = test_layer!(LayerSettings::default(), device_info);
        let first = create_queue(&layer, 0);
        let second = handle();
        layer.record_get_device_queue(second, 0, 1);

        let semaphore = handle();
        layer.record_create_semaphore(semaphore, SemaphoreCreateInfo::default());
        let fence = handle();
        layer.record_create_fence(fence, FenceCreateInfo::default());

        let cb = recorded(&layer);
        layer.record_queue_submit(
            first,
            &[SubmitInfo {
                command_buffers: vec![cb],
                signal_semaphores: vec![semaphore],
                ..Default::default()
            }],
            vk::Fence::null(),
        );
        layer.record_queue_submit(
            second,
            &[SubmitInfo {
                wait_semaphores: vec![semaphore],
                ..Default::default()
            }],
            fence,
        );

        let first_state = layer.registry().queues.get(first).unwrap();
        assert_eq!(first_state.pending_count(), 1);

        layer.record_wait_for_fences(&[fence], true);
        assert_eq!(first_state.pending_count(), 0);
        assert!(!layer
            .registry()
            .command_buffers
            .get(cb)
            .unwrap()
            .base()
            .in_use());
        assert!(reporter.diagnostics().is_empty());
    }

    #[test]
    fn device_wait_idle_makes_queries_available() {
        let (layer, reporter) = test_layer!();
        let queue = create_queue(&layer, 0);
        let pool = handle();
        layer.record_create_query_pool(
            pool,
            QueryPoolCreateInfo {
                query_type: QueryType::Occlusion,
                query_count: 1,
                ..Default::default()
            },
        );

        let cb = begin_primary(&layer);
        layer.record_cmd_reset_query_pool(cb, pool, 0, 1);
        layer.record_cmd_begin_query(cb, pool, 0);
        layer.record_cmd_end_query(cb, pool, 0);
        layer.record_end_command_buffer(cb);

        let submits = submit(&[cb]);
        assert!(!layer.validate_queue_submit(queue, &submits, vk::Fence::null()));
        layer.record_queue_submit(queue, &submits, vk::Fence::null());
        assert_eq!(layer.query_state(pool, 0), Some(QueryState::Ended));

        layer.record_device_wait_idle();
        assert_eq!(layer.query_state(pool, 0), Some(QueryState::Available));
        assert!(reporter.diagnostics().is_empty());
    }

    /// Submits what `record_first` records with a fence, then an empty command buffer without
    /// one, and waits for the fence only.
    fn fence_then_pending(
        record_first: impl FnOnce(&ValidationLayer, vk::CommandBuffer),
    ) -> (ValidationLayer, Arc<CollectingReporter>, vk::Queue) {
        let device_info = DeviceInfo {
            enabled_features: DeviceFeatures {
                host_query_reset: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let (layer, reporter) = test_layer!(LayerSettings::default(), device_info);
        let queue = create_queue(&layer, 0);
        let fence = handle();
        layer.record_create_fence(fence, FenceCreateInfo::default());

        let first = begin_primary(&layer);
        record_first(&layer, first);
        layer.record_end_command_buffer(first);
        layer.record_queue_submit(queue, &submit(&[first]), fence);

        let pending = begin_primary(&layer);
        layer.record_end_command_buffer(pending);
        layer.record_queue_submit(queue, &submit(&[pending]), vk::Fence::null());

        layer.record_wait_for_fences(&[fence], true);
        assert_eq!(layer.registry().queues.get(queue).unwrap().pending_count(), 1);

        (layer, reporter, queue)
    }

    fn occlusion_pool(layer: &ValidationLayer) -> vk::QueryPool {
        let pool = handle();
        layer.record_create_query_pool(
            pool,
            QueryPoolCreateInfo {
                query_type: QueryType::Occlusion,
                query_count: 1,
                ..Default::default()
            },
        );
        pool
    }

    #[test]
    fn partial_retirement_then_host_reset() {
        let pool = handle();
        let (layer, reporter, queue) = fence_then_pending(|layer, cb| {
            layer.record_create_query_pool(
                pool,
                QueryPoolCreateInfo {
                    query_type: QueryType::Occlusion,
                    query_count: 1,
                    ..Default::default()
                },
            );
            layer.record_cmd_reset_query_pool(cb, pool, 0, 1);
            layer.record_cmd_begin_query(cb, pool, 0);
            layer.record_cmd_end_query(cb, pool, 0);
        });
        assert_eq!(layer.query_state(pool, 0), Some(QueryState::Available));

        // Results of the retired submission are readable without waiting.
        assert!(!layer.validate_get_query_pool_results(pool, 0, 1, 8, QueryResultFlags::TYPE_64));

        assert!(!layer.validate_reset_query_pool(pool, 0, 1));
        layer.record_reset_query_pool(pool, 0, 1);
        assert_eq!(layer.query_state(pool, 0), Some(QueryState::Reset));

        let cb = begin_primary(&layer);
        assert!(!layer.validate_cmd_begin_query(cb, pool, 0, QueryControlFlags::empty()));
        layer.record_cmd_begin_query(cb, pool, 0);
        layer.record_cmd_end_query(cb, pool, 0);
        layer.record_end_command_buffer(cb);

        let submits = submit(&[cb]);
        assert!(!layer.validate_queue_submit(queue, &submits, vk::Fence::null()));
        layer.record_queue_submit(queue, &submits, vk::Fence::null());
        assert!(!reporter.contains("VUID-vkCmdBeginQuery-None-00807"));
        assert!(reporter.diagnostics().is_empty());
        assert_eq!(layer.query_state(pool, 0), Some(QueryState::Ended));
    }

    #[test]
    fn partial_retirement_of_unrelated_query() {
        let (layer, reporter, queue) = fence_then_pending(|_, _| {});
        let pool = occlusion_pool(&layer);

        // A pending submission that never touched the query leaves the pool state visible.
        layer.record_reset_query_pool(pool, 0, 1);
        assert_eq!(layer.query_state(pool, 0), Some(QueryState::Reset));
        assert_eq!(layer.registry().queues.get(queue).unwrap().pending_count(), 1);
        assert!(reporter.diagnostics().is_empty());
    }

    #[test]
    fn partial_retirement_then_host_set_event() {
        let event = handle();
        let (layer, reporter, queue) = fence_then_pending(|layer, cb| {
            layer.record_create_event(event);
            layer.record_cmd_set_event(cb, event, PipelineStages::TRANSFER);
        });
        assert_eq!(layer.get_event_status(event), Some(true));

        assert!(!layer.validate_reset_event(event));
        layer.record_reset_event(event);
        assert!(!layer.validate_set_event(event));
        layer.record_set_event(event);

        let cb = begin_primary(&layer);
        let dependency_info = DependencyInfo {
            src_stages: PipelineStages::HOST,
            dst_stages: PipelineStages::TRANSFER,
            ..Default::default()
        };
        assert!(!layer.validate_cmd_wait_events(cb, &dependency_info));
        layer.record_cmd_wait_events(cb, &[event], &dependency_info);
        layer.record_end_command_buffer(cb);

        let submits = submit(&[cb]);
        assert!(!layer.validate_queue_submit(queue, &submits, vk::Fence::null()));
        assert!(!reporter.contains("VUID-vkCmdWaitEvents-srcStageMask-parameter"));
        assert!(reporter.diagnostics().is_empty());
    }

    fn transfer_barrier(image: vk::Image, src: u32, dst: u32, new_layout: ImageLayout) -> DependencyInfo {
        DependencyInfo {
            src_stages: PipelineStages::TRANSFER,
            dst_stages: PipelineStages::TRANSFER,
            image_memory_barriers: smallvec![ImageMemoryBarrier {
                src_access: AccessFlags::empty(),
                dst_access: AccessFlags::TRANSFER_READ,
                old_layout: ImageLayout::Undefined,
                new_layout,
                src_queue_family_index: src,
                dst_queue_family_index: dst,
                image,
                subresource_range: ImageSubresourceRange {
                    aspects: ImageAspects::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
            }],
            ..Default::default()
        }
    }

    fn ownership_transfer(acquire_layout: ImageLayout) -> Vec<String> {
        let device_info = DeviceInfo {
            queue_family_properties: vec![QueueFamilyProperties::default(); 2],
            ..Default::default()
        };
        let (layer, reporter) = test_layer!(LayerSettings::default(), device_info);
        let queues = [create_queue(&layer, 0), create_queue(&layer, 1)];
        let image = create_image(
            &layer,
            ImageCreateInfo {
                usage: ImageUsage::TRANSFER_SRC,
                ..Default::default()
            },
        );

        let mut command_buffers = Vec::new();

        for (family, new_layout) in [(0, ImageLayout::TransferSrcOptimal), (1, acquire_layout)] {
            let cb = allocate_command_buffer_on(
                &layer,
                family,
                CommandPoolCreateFlags::empty(),
                CommandBufferLevel::Primary,
            );
            layer.record_begin_command_buffer(cb, CommandBufferBeginInfo::default());

            let barrier = transfer_barrier(image, 0, 1, new_layout);
            assert!(!layer.validate_cmd_pipeline_barrier(cb, &barrier));
            layer.record_cmd_pipeline_barrier(cb, &barrier);
            layer.record_end_command_buffer(cb);
            command_buffers.push(cb);
        }

        for (queue, cb) in queues.into_iter().zip(command_buffers) {
            let submits = submit(&[cb]);
            layer.validate_queue_submit(queue, &submits, vk::Fence::null());
            layer.record_queue_submit(queue, &submits, vk::Fence::null());
        }

        reporter
            .diagnostics()
            .into_iter()
            .map(|diagnostic| diagnostic.vuid.to_owned())
            .collect()
    }

    #[test]
    fn queue_family_ownership_round_trip() {
        assert!(ownership_transfer(ImageLayout::TransferSrcOptimal).is_empty());

        let diagnostics = ownership_transfer(ImageLayout::ColorAttachmentOptimal);
        assert!(diagnostics
            .iter()
            .any(|vuid| vuid == "UNASSIGNED-CoreValidation-QFOAcquireReleaseMismatch"));
    }

    #[test]
    fn expected_layouts_are_checked_at_submit() {
        let (layer, reporter) = test_layer!();
        let queue = create_queue(&layer, 0);
        let image = create_image(
            &layer,
            ImageCreateInfo {
                usage: ImageUsage::TRANSFER_SRC,
                ..Default::default()
            },
        );

        // The barrier claims the image is in `TransferSrcOptimal`, but nothing put it there.
        let cb = begin_primary(&layer);
        let mut barrier = transfer_barrier(
            image,
            vk::QUEUE_FAMILY_IGNORED,
            vk::QUEUE_FAMILY_IGNORED,
            ImageLayout::General,
        );
        barrier.image_memory_barriers[0].old_layout = ImageLayout::TransferSrcOptimal;
        layer.record_cmd_pipeline_barrier(cb, &barrier);
        layer.record_end_command_buffer(cb);

        layer.validate_queue_submit(queue, &submit(&[cb]), vk::Fence::null());
        assert!(reporter.contains("UNASSIGNED-CoreValidation-DrawState-InvalidImageLayout"));
        reporter.clear();

        // A transition from `Undefined` earlier in the same submission sets it up.
        let setup = begin_primary(&layer);
        let mut barrier = transfer_barrier(
            image,
            vk::QUEUE_FAMILY_IGNORED,
            vk::QUEUE_FAMILY_IGNORED,
            ImageLayout::TransferSrcOptimal,
        );
        barrier.image_memory_barriers[0].old_layout = ImageLayout::Undefined;
        layer.record_cmd_pipeline_barrier(setup, &barrier);
        layer.record_end_command_buffer(setup);

        let submits = submit(&[setup, cb]);
        assert!(!layer.validate_queue_submit(queue, &submits, vk::Fence::null()));
        layer.record_queue_submit(queue, &submits, vk::Fence::null());
        assert!(reporter.diagnostics().is_empty());

        let image_state = layer.registry().images.get(image).unwrap();
        assert_eq!(
            image_state.global_layout(&crate::image::ImageSubresource {
                aspect: ImageAspects::COLOR,
                mip_level: 0,
                array_layer: 0,
            }),
            Some(ImageLayout::General),
        );
    }

    #[test]
    fn sparse_binding_needs_a_sparse_queue() {
        let (layer, reporter) = test_layer!();
        let queue = create_queue(&layer, 0);

        layer.validate_queue_bind_sparse(queue, &[Default::default()], vk::Fence::null());
        assert!(reporter.contains("VUID-vkQueueBindSparse-queuetype"));
    }
}
