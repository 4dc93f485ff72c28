use super::ValidationLayer;
use crate::{
    command_buffer::{
        BindingBreak, CommandBufferBeginInfo, CommandBufferLevel, CommandBufferMut,
        CommandBufferRecordState, CommandBufferState, CommandBufferUsage, CommandPoolCreateFlags,
        CommandPoolCreateInfo, CommandPoolState, RenderPassInstance, SubpassContents,
    },
    device::QueueFlags,
    handle::TypedHandle,
    query::QueryControlFlags,
    registry::StateObject,
    ErrorKind, ValidationError,
};
use ash::vk;
use std::sync::Arc;

/// Where a command may be recorded relative to a render pass instance.
#[derive(Clone, Copy, Debug)]
pub(crate) enum RenderPassScope {
    Any,
    Inside(&'static [&'static str]),
    Outside(&'static [&'static str]),
}

/// The checks shared by every `vkCmd*` entry point.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandInfo {
    pub(crate) name: &'static str,
    pub(crate) recording_vuids: &'static [&'static str],
    pub(crate) render_pass: RenderPassScope,
    pub(crate) queue_flags: QueueFlags,
    pub(crate) queue_flags_vuids: &'static [&'static str],

    /// The command may be recorded in a subpass whose contents are secondary command buffers.
    pub(crate) in_secondary_subpass: bool,
}

impl ValidationLayer {
    /// Checks that `command_buffer` can take a new command: it is recording, its pool's queue
    /// family supports the command, and the render pass instance state suits it.
    pub(crate) fn validate_cmd(
        &self,
        command_buffer: &CommandBufferState,
        state: &CommandBufferMut,
        info: &CommandInfo,
    ) -> bool {
        let mut skip = false;

        match state.record_state {
            CommandBufferRecordState::Recording => (),
            record_state if record_state.is_invalid() => {
                if !self.settings.disabled.command_buffer_state {
                    skip |= self.emit(self.invalid_command_buffer_error(
                        command_buffer,
                        state,
                        info.name,
                    ));
                }

                return skip;
            }
            record_state => {
                return self.emit(Box::new(ValidationError {
                    context: info.name.into(),
                    problem: format!(
                        "{} is in the {:?} state, but it must be recording",
                        self.format_handle(command_buffer.typed_handle()),
                        record_state,
                    )
                    .into(),
                    vuids: info.recording_vuids,
                    kind: ErrorKind::StateIncompatible,
                    objects: [command_buffer.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }
        }

        skip |= self.validate_cmd_queue_flags(command_buffer, info);

        if command_buffer.level == CommandBufferLevel::Primary && !info.in_secondary_subpass {
            if let Some(instance) = &state.render_pass {
                if instance.contents == SubpassContents::SecondaryCommandBuffers {
                    skip |= self.emit(Box::new(ValidationError {
                        context: info.name.into(),
                        problem: format!(
                            "is recorded in subpass {}, whose contents are \
                            `SecondaryCommandBuffers`",
                            instance.subpass,
                        )
                        .into(),
                        vuids: &["UNASSIGNED-CoreValidation-DrawState-InvalidSubpassContents"],
                        kind: ErrorKind::StateIncompatible,
                        objects: [command_buffer.typed_handle()].into_iter().collect(),
                        ..Default::default()
                    }));
                }
            }
        }

        match info.render_pass {
            RenderPassScope::Any => (),
            RenderPassScope::Inside(vuids) if state.render_pass.is_none() => {
                skip |= self.emit(Box::new(ValidationError {
                    context: info.name.into(),
                    problem: "is recorded outside a render pass instance, but it must be \
                        recorded inside one"
                        .into(),
                    vuids,
                    kind: ErrorKind::StateIncompatible,
                    objects: [command_buffer.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }
            RenderPassScope::Outside(vuids) if state.render_pass.is_some() => {
                skip |= self.emit(Box::new(ValidationError {
                    context: info.name.into(),
                    problem: "is recorded inside a render pass instance, but it must be \
                        recorded outside one"
                        .into(),
                    vuids,
                    kind: ErrorKind::StateIncompatible,
                    objects: [command_buffer.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }
            _ => (),
        }

        skip
    }

    /// Checks that the queue family of `command_buffer`'s pool supports the command.
    pub(crate) fn validate_cmd_queue_flags(
        &self,
        command_buffer: &CommandBufferState,
        info: &CommandInfo,
    ) -> bool {
        let flags = self
            .device_info
            .queue_flags(command_buffer.queue_family_index);

        if info.queue_flags.is_empty() || flags.intersects(info.queue_flags) {
            return false;
        }

        self.emit(Box::new(ValidationError {
            context: info.name.into(),
            problem: format!(
                "the queue family {} of the command pool has flags {:?}, but the command needs \
                one of {:?}",
                command_buffer.queue_family_index, flags, info.queue_flags,
            )
            .into(),
            vuids: info.queue_flags_vuids,
            kind: ErrorKind::MissingPrerequisite,
            objects: [
                command_buffer.typed_handle(),
                TypedHandle::new(command_buffer.pool),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        }))
    }

    pub(crate) fn invalid_command_buffer_error(
        &self,
        command_buffer: &CommandBufferState,
        state: &CommandBufferMut,
        context: &'static str,
    ) -> Box<ValidationError> {
        let causes = state
            .broken_bindings
            .iter()
            .map(|broken| {
                let verb = match broken.cause {
                    BindingBreak::Destroyed => "destroyed",
                    BindingBreak::DestroyedOrUpdated => "destroyed or updated",
                    BindingBreak::DestroyedOrRerecorded => "destroyed or rerecorded",
                };

                format!("{} was {}", self.format_handle(broken.object), verb)
            })
            .collect::<Vec<_>>()
            .join(", ");

        Box::new(ValidationError {
            context: context.into(),
            problem: format!(
                "{} is invalid because {}",
                self.format_handle(command_buffer.typed_handle()),
                if causes.is_empty() {
                    "a bound object changed"
                } else {
                    causes.as_str()
                },
            )
            .into(),
            vuids: &["UNASSIGNED-CoreValidation-DrawState-InvalidCommandBuffer"],
            kind: ErrorKind::UseAfterFree,
            objects: std::iter::once(command_buffer.typed_handle())
                .chain(state.broken_bindings.iter().map(|broken| broken.object))
                .collect(),
            ..Default::default()
        })
    }

    pub fn validate_create_command_pool(&self, create_info: &CommandPoolCreateInfo) -> bool {
        let family_count = self.device_info.queue_family_properties.len() as u32;

        if create_info.queue_family_index >= family_count {
            return self.emit(Box::new(ValidationError {
                context: "create_info.queue_family_index".into(),
                problem: format!(
                    "is {}, but the device has only {} queue families",
                    create_info.queue_family_index, family_count,
                )
                .into(),
                vuids: &["VUID-vkCreateCommandPool-queueFamilyIndex-01937"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        false
    }

    pub fn record_create_command_pool(
        &self,
        command_pool: vk::CommandPool,
        create_info: CommandPoolCreateInfo,
    ) {
        log::trace!(
            "{} created for queue family {}",
            TypedHandle::new(command_pool),
            create_info.queue_family_index,
        );

        self.registry
            .command_pools
            .insert(Arc::new(CommandPoolState::new(command_pool, create_info)));
    }

    /// Emits one error per command buffer of `pool` that pending work still uses.
    fn validate_pool_idle(&self, pool: &CommandPoolState, vuids: &'static [&'static str]) -> bool {
        if self.settings.disabled.object_in_use {
            return false;
        }

        let mut skip = false;

        for command_buffer in pool.command_buffers() {
            let Some(command_buffer) = self.registry.command_buffers.get(command_buffer) else {
                continue;
            };

            if command_buffer.base().in_use() {
                skip |= self.emit(Box::new(ValidationError {
                    problem: format!(
                        "{} of the pool is still in use by a pending submission",
                        self.format_handle(command_buffer.typed_handle()),
                    )
                    .into(),
                    vuids,
                    kind: ErrorKind::InUseOnDestroy,
                    objects: [pool.typed_handle(), command_buffer.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
            }
        }

        skip
    }

    pub fn validate_destroy_command_pool(&self, command_pool: vk::CommandPool) -> bool {
        let Some(pool) = self.registry.command_pools.get(command_pool) else {
            return false;
        };

        self.validate_pool_idle(&pool, &["VUID-vkDestroyCommandPool-commandPool-00041"])
    }

    pub fn record_destroy_command_pool(&self, command_pool: vk::CommandPool) {
        let Some(pool) = self.registry.command_pools.get(command_pool) else {
            return;
        };

        self.record_free_command_buffers(&pool.command_buffers());
        self.destroy_object(
            &self.registry.command_pools,
            command_pool,
            BindingBreak::Destroyed,
        );
    }

    pub fn validate_reset_command_pool(&self, command_pool: vk::CommandPool) -> bool {
        let Some(pool) = self.registry.command_pools.get(command_pool) else {
            return false;
        };

        self.validate_pool_idle(&pool, &["VUID-vkResetCommandPool-commandPool-00040"])
    }

    pub fn record_reset_command_pool(&self, command_pool: vk::CommandPool) {
        let Some(pool) = self.registry.command_pools.get(command_pool) else {
            return;
        };

        for command_buffer in pool.command_buffers() {
            if let Some(command_buffer) = self.registry.command_buffers.get(command_buffer) {
                self.reset_command_buffer_state(&command_buffer);
            }
        }
    }

    pub fn record_allocate_command_buffers(
        &self,
        command_pool: vk::CommandPool,
        level: CommandBufferLevel,
        command_buffers: &[vk::CommandBuffer],
    ) {
        let Some(pool) = self.registry.command_pools.get(command_pool) else {
            return;
        };

        for &command_buffer in command_buffers {
            pool.add_command_buffer(command_buffer);
            self.registry
                .command_buffers
                .insert(Arc::new(CommandBufferState::new(command_buffer, &pool, level)));
        }
    }

    pub fn validate_free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) -> bool {
        if self.settings.disabled.object_in_use {
            return false;
        }

        let mut skip = false;

        for (index, &command_buffer) in command_buffers.iter().enumerate() {
            let Some(command_buffer) = self.registry.command_buffers.get(command_buffer) else {
                continue;
            };

            if command_buffer.base().in_use() {
                skip |= self.emit(Box::new(ValidationError {
                    context: format!("command_buffers[{}]", index).into(),
                    problem: "is in use by a pending submission".into(),
                    vuids: &["VUID-vkFreeCommandBuffers-pCommandBuffers-00047"],
                    kind: ErrorKind::InUseOnDestroy,
                    objects: [command_buffer.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }
        }

        skip
    }

    pub fn record_free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        for &command_buffer in command_buffers {
            let Some(state) = self.registry.command_buffers.get(command_buffer) else {
                continue;
            };

            self.reset_command_buffer_state(&state);

            if let Some(pool) = self.registry.command_pools.get(state.pool) {
                pool.remove_command_buffer(command_buffer);
            }

            self.destroy_object(
                &self.registry.command_buffers,
                command_buffer,
                BindingBreak::Destroyed,
            );
        }
    }

    pub fn validate_begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &CommandBufferBeginInfo,
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let mut skip = false;
        let record_state = cb.record_state();
        let objects = || [cb.typed_handle()].into_iter().collect();

        if cb.base().in_use() && !self.settings.disabled.object_in_use {
            skip |= self.emit(Box::new(ValidationError {
                problem: "the command buffer is begun while a pending submission still uses it"
                    .into(),
                vuids: &["VUID-vkBeginCommandBuffer-commandBuffer-00049"],
                kind: ErrorKind::InUseOnDestroy,
                objects: objects(),
                ..Default::default()
            }));
        }

        match record_state {
            CommandBufferRecordState::Recording => {
                skip |= self.emit(Box::new(ValidationError {
                    problem: "the command buffer is begun while it is already recording".into(),
                    vuids: &["VUID-vkBeginCommandBuffer-commandBuffer-00049"],
                    kind: ErrorKind::StateIncompatible,
                    objects: objects(),
                    ..Default::default()
                }));
            }
            CommandBufferRecordState::New => (),
            _ => {
                if !cb
                    .pool_flags
                    .intersects(CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                {
                    skip |= self.emit(Box::new(ValidationError {
                        problem: format!(
                            "the command buffer is in the {:?} state and is begun again, but its \
                            pool was not created with `RESET_COMMAND_BUFFER`",
                            record_state,
                        )
                        .into(),
                        vuids: &["VUID-vkBeginCommandBuffer-commandBuffer-00050"],
                        kind: ErrorKind::StateIncompatible,
                        objects: [cb.typed_handle(), TypedHandle::new(cb.pool)]
                            .into_iter()
                            .collect(),
                        ..Default::default()
                    }));
                }
            }
        }

        if cb.level != CommandBufferLevel::Secondary {
            return skip;
        }

        let Some(inheritance) = &begin_info.inheritance_info else {
            return skip
                | self.emit(Box::new(ValidationError {
                    context: "begin_info.inheritance_info".into(),
                    problem: "is `None`, but the command buffer is a secondary command buffer"
                        .into(),
                    vuids: &["VUID-vkBeginCommandBuffer-commandBuffer-00051"],
                    kind: ErrorKind::MissingPrerequisite,
                    objects: objects(),
                    ..Default::default()
                }));
        };

        let features = &self.device_info.enabled_features;

        if inheritance.occlusion_query_enable && !features.inherited_queries {
            skip |= self.emit(Box::new(ValidationError {
                context: "begin_info.inheritance_info.occlusion_query_enable".into(),
                problem: "is `true`, but the `inherited_queries` feature is not enabled".into(),
                vuids: &["VUID-VkCommandBufferInheritanceInfo-occlusionQueryEnable-00056"],
                kind: ErrorKind::MissingPrerequisite,
                objects: objects(),
                ..Default::default()
            }));
        }

        if inheritance.query_flags.intersects(QueryControlFlags::PRECISE)
            && !features.occlusion_query_precise
        {
            skip |= self.emit(Box::new(ValidationError {
                context: "begin_info.inheritance_info.query_flags".into(),
                problem: "contains `PRECISE`, but the `occlusion_query_precise` feature is not \
                    enabled"
                    .into(),
                vuids: &["VUID-VkCommandBufferInheritanceInfo-queryFlags-00057"],
                kind: ErrorKind::MissingPrerequisite,
                objects: objects(),
                ..Default::default()
            }));
        }

        if !begin_info
            .usage
            .intersects(CommandBufferUsage::RENDER_PASS_CONTINUE)
        {
            return skip;
        }

        let Some(render_pass) = self.registry.render_passes.get(inheritance.render_pass) else {
            return skip
                | self.emit(Box::new(ValidationError {
                    context: "begin_info.inheritance_info.render_pass".into(),
                    problem: "is not a valid render pass, but `usage` contains \
                        `RENDER_PASS_CONTINUE`"
                        .into(),
                    vuids: &["VUID-VkCommandBufferBeginInfo-flags-06000"],
                    kind: ErrorKind::MissingPrerequisite,
                    objects: objects(),
                    ..Default::default()
                }));
        };

        if inheritance.subpass >= render_pass.subpass_count() {
            skip |= self.emit(Box::new(ValidationError {
                context: "begin_info.inheritance_info.subpass".into(),
                problem: format!(
                    "is {}, but the render pass has only {} subpasses",
                    inheritance.subpass,
                    render_pass.subpass_count(),
                )
                .into(),
                vuids: &["VUID-VkCommandBufferBeginInfo-flags-06002"],
                kind: ErrorKind::ParameterOutOfRange,
                objects: [cb.typed_handle(), render_pass.typed_handle()]
                    .into_iter()
                    .collect(),
                ..Default::default()
            }));
        }

        if let Some(framebuffer) = self.registry.framebuffers.get(inheritance.framebuffer) {
            if let Err(error) = framebuffer.render_pass.validate_compatible(&render_pass) {
                skip |= self.emit(
                    error
                        .set_vuids(&["VUID-VkCommandBufferBeginInfo-flags-00055"])
                        .add_context("begin_info.inheritance_info.framebuffer"),
                );
            }
        }

        skip
    }

    pub fn record_begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: CommandBufferBeginInfo,
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        // Beginning a recorded command buffer resets it implicitly.
        if cb.record_state() != CommandBufferRecordState::New {
            self.reset_command_buffer_state(&cb);
        }

        let continuation = if cb.level == CommandBufferLevel::Secondary
            && begin_info
                .usage
                .intersects(CommandBufferUsage::RENDER_PASS_CONTINUE)
        {
            begin_info.inheritance_info.and_then(|inheritance| {
                let render_pass = self.registry.render_passes.get(inheritance.render_pass)?;
                let framebuffer = self.registry.framebuffers.get(inheritance.framebuffer);
                let attachments = framebuffer
                    .as_ref()
                    .map(|framebuffer| framebuffer.attachments.clone())
                    .unwrap_or_default();

                Some(RenderPassInstance {
                    render_pass,
                    framebuffer,
                    attachments,
                    subpass: inheritance.subpass,
                    contents: SubpassContents::Inline,
                    render_area: vk::Rect2D::default(),
                })
            })
        } else {
            None
        };

        let mut state = cb.state.lock();

        if let Some(instance) = &continuation {
            cb.bind_object(&mut state, instance.render_pass.base());

            if let Some(framebuffer) = &instance.framebuffer {
                cb.bind_object(&mut state, framebuffer.base());
            }
        }

        state.record_state = CommandBufferRecordState::Recording;
        state.initial_device_mask = if begin_info.device_mask == 0 {
            1
        } else {
            begin_info.device_mask
        };
        state.begin_info = begin_info;
        state.render_pass = continuation;

        log::trace!(
            "{} begun with usage {:?}",
            cb.typed_handle(),
            state.begin_info.usage,
        );
    }

    pub fn validate_end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let objects = || [cb.typed_handle()].into_iter().collect();

        match state.record_state {
            CommandBufferRecordState::Recording => (),
            record_state if record_state.is_invalid() => {
                if self.settings.disabled.command_buffer_state {
                    return false;
                }

                return self.emit(self.invalid_command_buffer_error(
                    &cb,
                    &state,
                    "vkEndCommandBuffer",
                ));
            }
            record_state => {
                return self.emit(Box::new(ValidationError {
                    problem: format!(
                        "the command buffer is in the {:?} state, but it must be recording",
                        record_state,
                    )
                    .into(),
                    vuids: &["VUID-vkEndCommandBuffer-commandBuffer-00059"],
                    kind: ErrorKind::StateIncompatible,
                    objects: objects(),
                    ..Default::default()
                }));
            }
        }

        let mut skip = false;

        if cb.level == CommandBufferLevel::Primary && state.render_pass.is_some() {
            skip |= self.emit(Box::new(ValidationError {
                problem: "the command buffer is ended inside a render pass instance".into(),
                vuids: &["VUID-vkEndCommandBuffer-commandBuffer-00060"],
                kind: ErrorKind::StateIncompatible,
                objects: objects(),
                ..Default::default()
            }));
        }

        if !state.active_queries.is_empty() && !self.settings.disabled.query_validation {
            skip |= self.emit(Box::new(ValidationError {
                problem: format!(
                    "the command buffer is ended while {} queries are still active",
                    state.active_queries.len(),
                )
                .into(),
                vuids: &["VUID-vkEndCommandBuffer-commandBuffer-00061"],
                kind: ErrorKind::StateIncompatible,
                objects: std::iter::once(cb.typed_handle())
                    .chain(
                        state
                            .active_queries
                            .iter()
                            .map(|query| TypedHandle::new(query.pool)),
                    )
                    .collect(),
                ..Default::default()
            }));
        }

        skip
    }

    pub fn record_end_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        let mut state = cb.state.lock();
        state.record_state = match state.record_state {
            CommandBufferRecordState::Recording => CommandBufferRecordState::Recorded,
            CommandBufferRecordState::InvalidIncomplete => {
                CommandBufferRecordState::InvalidComplete
            }
            record_state => record_state,
        };

        log::trace!(
            "{} ended with {} queued submit-time check(s)",
            cb.typed_handle(),
            state.queue_submit_functions.len(),
        );
    }

    pub fn validate_reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let mut skip = false;

        if !cb
            .pool_flags
            .intersects(CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        {
            skip |= self.emit(Box::new(ValidationError {
                problem: "the command buffer is reset, but its pool was not created with \
                    `RESET_COMMAND_BUFFER`"
                    .into(),
                vuids: &["VUID-vkResetCommandBuffer-commandBuffer-00046"],
                kind: ErrorKind::StateIncompatible,
                objects: [cb.typed_handle(), TypedHandle::new(cb.pool)]
                    .into_iter()
                    .collect(),
                ..Default::default()
            }));
        }

        if cb.base().in_use() && !self.settings.disabled.object_in_use {
            skip |= self.emit(Box::new(ValidationError {
                problem: "the command buffer is reset while a pending submission still uses it"
                    .into(),
                vuids: &["VUID-vkResetCommandBuffer-commandBuffer-00045"],
                kind: ErrorKind::InUseOnDestroy,
                objects: [cb.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        skip
    }

    pub fn record_reset_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        if let Some(cb) = self.registry.command_buffers.get(command_buffer) {
            self.reset_command_buffer_state(&cb);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        command_buffer::{
            CommandBufferBeginInfo, CommandBufferInheritanceInfo, CommandBufferLevel,
            CommandBufferRecordState, CommandBufferUsage, CommandPoolCreateFlags,
            CommandPoolCreateInfo,
        },
        registry::StateObject,
        tests::{allocate_command_buffer, create_render_pass},
        LayerSettings,
    };

    #[test]
    fn begin_end_lifecycle() {
        let (layer, reporter) = test_layer!();
        let cb = allocate_command_buffer(
            &layer,
            CommandPoolCreateFlags::empty(),
            CommandBufferLevel::Primary,
        );
        let begin_info = CommandBufferBeginInfo::default();

        assert!(!layer.validate_begin_command_buffer(cb, &begin_info));
        layer.record_begin_command_buffer(cb, begin_info.clone());
        assert!(!layer.validate_end_command_buffer(cb));
        layer.record_end_command_buffer(cb);

        let state = layer.registry().command_buffers.get(cb).unwrap();
        assert_eq!(state.record_state(), CommandBufferRecordState::Recorded);
        assert!(reporter.diagnostics().is_empty());

        // Ending again is not allowed, and neither is re-beginning without the reset flag.
        layer.validate_end_command_buffer(cb);
        assert!(reporter.contains("VUID-vkEndCommandBuffer-commandBuffer-00059"));
        layer.validate_begin_command_buffer(cb, &begin_info);
        assert!(reporter.contains("VUID-vkBeginCommandBuffer-commandBuffer-00050"));
        layer.validate_reset_command_buffer(cb);
        assert!(reporter.contains("VUID-vkResetCommandBuffer-commandBuffer-00046"));
    }

    #[test]
    fn implicit_reset_on_begin() {
        let (layer, reporter) = test_layer!();
        let cb = allocate_command_buffer(
            &layer,
            CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            CommandBufferLevel::Primary,
        );

        for _ in 0..2 {
            assert!(!layer.validate_begin_command_buffer(cb, &Default::default()));
            layer.record_begin_command_buffer(cb, Default::default());
            layer.record_end_command_buffer(cb);
        }

        assert!(reporter.diagnostics().is_empty());
    }

    #[test]
    fn secondary_needs_inheritance() {
        let (layer, reporter) = test_layer!();
        let cb = allocate_command_buffer(
            &layer,
            CommandPoolCreateFlags::empty(),
            CommandBufferLevel::Secondary,
        );

        layer.validate_begin_command_buffer(cb, &CommandBufferBeginInfo::default());
        assert!(reporter.contains("VUID-vkBeginCommandBuffer-commandBuffer-00051"));
        reporter.clear();

        let render_pass = create_render_pass(&layer, 2);
        let begin_info = CommandBufferBeginInfo {
            usage: CommandBufferUsage::RENDER_PASS_CONTINUE,
            inheritance_info: Some(CommandBufferInheritanceInfo {
                render_pass,
                subpass: 2,
                ..Default::default()
            }),
            ..Default::default()
        };
        layer.validate_begin_command_buffer(cb, &begin_info);
        assert!(reporter.contains("VUID-VkCommandBufferBeginInfo-flags-06002"));

        let begin_info = CommandBufferBeginInfo {
            inheritance_info: Some(CommandBufferInheritanceInfo {
                render_pass,
                subpass: 1,
                ..Default::default()
            }),
            ..begin_info
        };
        layer.record_begin_command_buffer(cb, begin_info);
        let state = layer.registry().command_buffers.get(cb).unwrap();
        assert_eq!(state.active_subpass(), Some(1));
    }

    #[test]
    fn command_pool_queue_family() {
        let (layer, reporter) = test_layer!();

        layer.validate_create_command_pool(&CommandPoolCreateInfo {
            flags: CommandPoolCreateFlags::empty(),
            queue_family_index: 3,
        });
        assert!(reporter.contains("VUID-vkCreateCommandPool-queueFamilyIndex-01937"));
    }

    #[test]
    fn pool_in_use() {
        let (layer, reporter) = test_layer!();
        let cb = allocate_command_buffer(
            &layer,
            CommandPoolCreateFlags::empty(),
            CommandBufferLevel::Primary,
        );
        let state = layer.registry().command_buffers.get(cb).unwrap();
        let pool = state.pool;
        state.base().begin_use();

        layer.validate_destroy_command_pool(pool);
        assert!(reporter.contains("VUID-vkDestroyCommandPool-commandPool-00041"));
        layer.validate_free_command_buffers(&[cb]);
        assert!(reporter.contains("VUID-vkFreeCommandBuffers-pCommandBuffers-00047"));

        // The check can be turned off.
        let mut settings = LayerSettings::default();
        settings.disabled.object_in_use = true;
        let (layer, reporter) = test_layer!(settings);
        let cb = allocate_command_buffer(
            &layer,
            CommandPoolCreateFlags::empty(),
            CommandBufferLevel::Primary,
        );
        layer
            .registry()
            .command_buffers
            .get(cb)
            .unwrap()
            .base()
            .begin_use();
        assert!(!layer.validate_free_command_buffers(&[cb]));
        assert!(reporter.diagnostics().is_empty());

        // Destroying the pool frees its command buffers.
        let pool = layer.registry().command_buffers.get(cb).unwrap().pool;
        layer.record_destroy_command_pool(pool);
        assert!(layer.registry().command_buffers.get(cb).is_none());
        assert!(layer.registry().command_pools.get(pool).is_none());
    }
}
