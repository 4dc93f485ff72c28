//! Hooks for fences, semaphores, events and query pools, and for the commands that use events
//! and queries.
//!
//! Query and event commands change state that other command buffers observe, so the transitions
//! they make are replayed in order at submission, on top of what earlier submissions left.

use super::{
    command_buffer::{CommandInfo, RenderPassScope},
    ValidationLayer,
};
use crate::{
    buffer::BufferUsage,
    command_buffer::{BindingBreak, CommandBufferMut, CommandBufferState, SubmitContext},
    device::QueueFlags,
    handle::TypedHandle,
    query::{
        get_query_result_type, QueryControlFlags, QueryMap, QueryObject, QueryPoolCreateInfo,
        QueryPoolState, QueryResultFlags, QueryResultType, QueryState, QueryType,
    },
    registry::StateObject,
    sync::{
        event::{validate_wait_events_stage_mask, EventState},
        fence::{ExternalFenceHandleType, FenceCreateInfo, FenceImportFlags, FenceState},
        semaphore::{
            ExternalSemaphoreHandleType, SemaphoreCreateInfo, SemaphoreImportFlags,
            SemaphoreState,
        },
        DependencyInfo, PipelineStages,
    },
    DeviceSize, ErrorKind, ValidationError,
};
use ash::vk;
use smallvec::SmallVec;
use std::{ops::Range, sync::Arc};

const GRAPHICS_OR_COMPUTE: QueueFlags = QueueFlags::GRAPHICS.union(QueueFlags::COMPUTE);

const RESET_QUERY_POOL: CommandInfo = CommandInfo {
    name: "vkCmdResetQueryPool",
    recording_vuids: &["VUID-vkCmdResetQueryPool-commandBuffer-recording"],
    render_pass: RenderPassScope::Outside(&["VUID-vkCmdResetQueryPool-renderpass"]),
    queue_flags: GRAPHICS_OR_COMPUTE,
    queue_flags_vuids: &["VUID-vkCmdResetQueryPool-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const BEGIN_QUERY: CommandInfo = CommandInfo {
    name: "vkCmdBeginQuery",
    recording_vuids: &["VUID-vkCmdBeginQuery-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: GRAPHICS_OR_COMPUTE,
    queue_flags_vuids: &["VUID-vkCmdBeginQuery-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const END_QUERY: CommandInfo = CommandInfo {
    name: "vkCmdEndQuery",
    recording_vuids: &["VUID-vkCmdEndQuery-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: GRAPHICS_OR_COMPUTE,
    queue_flags_vuids: &["VUID-vkCmdEndQuery-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const WRITE_TIMESTAMP: CommandInfo = CommandInfo {
    name: "vkCmdWriteTimestamp",
    recording_vuids: &["VUID-vkCmdWriteTimestamp-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: GRAPHICS_OR_COMPUTE.union(QueueFlags::TRANSFER),
    queue_flags_vuids: &["VUID-vkCmdWriteTimestamp-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const COPY_QUERY_POOL_RESULTS: CommandInfo = CommandInfo {
    name: "vkCmdCopyQueryPoolResults",
    recording_vuids: &["VUID-vkCmdCopyQueryPoolResults-commandBuffer-recording"],
    render_pass: RenderPassScope::Outside(&["VUID-vkCmdCopyQueryPoolResults-renderpass"]),
    queue_flags: GRAPHICS_OR_COMPUTE,
    queue_flags_vuids: &["VUID-vkCmdCopyQueryPoolResults-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const SET_EVENT: CommandInfo = CommandInfo {
    name: "vkCmdSetEvent",
    recording_vuids: &["VUID-vkCmdSetEvent-commandBuffer-recording"],
    render_pass: RenderPassScope::Outside(&["VUID-vkCmdSetEvent-renderpass"]),
    queue_flags: GRAPHICS_OR_COMPUTE,
    queue_flags_vuids: &["VUID-vkCmdSetEvent-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const RESET_EVENT: CommandInfo = CommandInfo {
    name: "vkCmdResetEvent",
    recording_vuids: &["VUID-vkCmdResetEvent-commandBuffer-recording"],
    render_pass: RenderPassScope::Outside(&["VUID-vkCmdResetEvent-renderpass"]),
    queue_flags: GRAPHICS_OR_COMPUTE,
    queue_flags_vuids: &["VUID-vkCmdResetEvent-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const WAIT_EVENTS: CommandInfo = CommandInfo {
    name: "vkCmdWaitEvents",
    recording_vuids: &["VUID-vkCmdWaitEvents-commandBuffer-recording"],
    render_pass: RenderPassScope::Any,
    queue_flags: GRAPHICS_OR_COMPUTE,
    queue_flags_vuids: &["VUID-vkCmdWaitEvents-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const INVALID_QUERY: &[&str] = &["UNASSIGNED-CoreValidation-DrawState-InvalidQuery"];

/// The queries of `pool` in `first..first + count`, clamped to the pool.
fn query_range(pool: &QueryPoolState, first: u32, count: u32) -> Range<u32> {
    let end = first.saturating_add(count).min(pool.query_count());
    first.min(end)..end
}

/// The number of bytes one query writes with `flags`.
fn query_result_size(pool: &QueryPoolState, flags: QueryResultFlags) -> DeviceSize {
    let values = match pool.query_type() {
        QueryType::PipelineStatistics => pool.create_info.pipeline_statistics.as_raw().count_ones(),
        QueryType::TransformFeedbackStream => 2,
        _ => 1,
    } + flags.intersects(QueryResultFlags::WITH_AVAILABILITY) as u32;

    let value_size = if flags.intersects(QueryResultFlags::TYPE_64) {
        8
    } else {
        4
    };

    values as DeviceSize * value_size
}

/// Replays a query transition at submission. When `required` is set, the query must be in that
/// state first.
fn query_transition(
    query: QueryObject,
    required: Option<(QueryState, &'static [&'static str], &'static str)>,
    new_state: QueryState,
) -> impl Fn(&mut SubmitContext<'_>) -> Vec<Box<ValidationError>> + Send + Sync {
    move |ctx: &mut SubmitContext<'_>| {
        let mut errors = Vec::new();

        if let Some((required, vuids, command)) = required {
            let state = ctx.query_state(&query);

            if state != required {
                errors.push(Box::new(ValidationError {
                    context: command.into(),
                    problem: format!(
                        "query {} of {} is in the {:?} state when the command executes, but it \
                        must be {:?}",
                        query.query,
                        TypedHandle::new(query.pool),
                        state,
                        required,
                    )
                    .into(),
                    vuids,
                    kind: ErrorKind::Synchronization,
                    objects: [
                        TypedHandle::new(ctx.command_buffer),
                        TypedHandle::new(query.pool),
                    ]
                    .into_iter()
                    .collect(),
                    ..Default::default()
                }));
            }
        }

        ctx.set_query_state(query, new_state);

        errors
    }
}

impl ValidationLayer {
    pub fn record_create_fence(&self, fence: vk::Fence, create_info: FenceCreateInfo) {
        self.registry
            .fences
            .insert(Arc::new(FenceState::new(fence, create_info)));
    }

    pub fn validate_destroy_fence(&self, fence: vk::Fence) -> bool {
        self.validate_destroy(
            &self.registry.fences,
            fence,
            &["VUID-vkDestroyFence-fence-01120"],
        )
    }

    pub fn record_destroy_fence(&self, fence: vk::Fence) {
        self.destroy_object(&self.registry.fences, fence, BindingBreak::Destroyed);
    }

    pub fn validate_reset_fences(&self, fences: &[vk::Fence]) -> bool {
        fences
            .iter()
            .enumerate()
            .filter_map(|(index, &fence)| {
                let state = self.registry.fences.get(fence)?;
                let error = state.validate_reset().err()?;

                Some(error.add_context(format!("fences[{}]", index)))
            })
            .fold(false, |skip, error| self.emit(error) | skip)
    }

    pub fn record_reset_fences(&self, fences: &[vk::Fence]) {
        for &fence in fences {
            if let Some(state) = self.registry.fences.get(fence) {
                state.reset();
            }
        }
    }

    /// `vkImportFenceFdKHR` and `vkImportFenceWin32HandleKHR`.
    pub fn validate_import_fence(&self, fence: vk::Fence) -> bool {
        self.registry
            .fences
            .get(fence)
            .map_or(false, |state| self.emit_result(state.validate_import()))
    }

    pub fn record_import_fence(
        &self,
        fence: vk::Fence,
        handle_type: ExternalFenceHandleType,
        flags: FenceImportFlags,
    ) {
        if let Some(state) = self.registry.fences.get(fence) {
            state.import(handle_type, flags);
            log::trace!("{} imported a {:?} payload", state.typed_handle(), handle_type);
        }
    }

    /// `vkGetFenceFdKHR` and `vkGetFenceWin32HandleKHR`.
    pub fn validate_export_fence(
        &self,
        fence: vk::Fence,
        handle_type: ExternalFenceHandleType,
    ) -> bool {
        self.registry
            .fences
            .get(fence)
            .map_or(false, |state| {
                self.emit_result(state.validate_export(handle_type))
            })
    }

    pub fn record_export_fence(&self, fence: vk::Fence, handle_type: ExternalFenceHandleType) {
        if let Some(state) = self.registry.fences.get(fence) {
            state.export(handle_type);
        }
    }

    pub fn record_create_semaphore(&self, semaphore: vk::Semaphore, create_info: SemaphoreCreateInfo) {
        self.registry
            .semaphores
            .insert(Arc::new(SemaphoreState::new(semaphore, create_info)));
    }

    pub fn validate_destroy_semaphore(&self, semaphore: vk::Semaphore) -> bool {
        self.validate_destroy(
            &self.registry.semaphores,
            semaphore,
            &["VUID-vkDestroySemaphore-semaphore-01137"],
        )
    }

    pub fn record_destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.destroy_object(
            &self.registry.semaphores,
            semaphore,
            BindingBreak::Destroyed,
        );
    }

    /// `vkImportSemaphoreFdKHR` and `vkImportSemaphoreWin32HandleKHR`.
    pub fn validate_import_semaphore(&self, semaphore: vk::Semaphore) -> bool {
        let Some(state) = self.registry.semaphores.get(semaphore) else {
            return false;
        };

        if !state.base().in_use() {
            return false;
        }

        self.emit(Box::new(ValidationError {
            context: "semaphore".into(),
            problem: format!(
                "{} is used by a submission that has not completed",
                self.format_handle(state.typed_handle()),
            )
            .into(),
            vuids: &["VUID-vkImportSemaphoreFdKHR-semaphore-01142"],
            kind: ErrorKind::Synchronization,
            objects: [state.typed_handle()].into_iter().collect(),
            ..Default::default()
        }))
    }

    pub fn record_import_semaphore(
        &self,
        semaphore: vk::Semaphore,
        handle_type: ExternalSemaphoreHandleType,
        flags: SemaphoreImportFlags,
    ) {
        if let Some(state) = self.registry.semaphores.get(semaphore) {
            state.import(handle_type, flags);
            log::trace!("{} imported a {:?} payload", state.typed_handle(), handle_type);
        }
    }

    /// `vkGetSemaphoreFdKHR` and `vkGetSemaphoreWin32HandleKHR`.
    pub fn validate_export_semaphore(
        &self,
        semaphore: vk::Semaphore,
        handle_type: ExternalSemaphoreHandleType,
    ) -> bool {
        self.registry
            .semaphores
            .get(semaphore)
            .map_or(false, |state| {
                self.emit_result(state.validate_export(handle_type))
            })
    }

    pub fn record_export_semaphore(
        &self,
        semaphore: vk::Semaphore,
        handle_type: ExternalSemaphoreHandleType,
    ) {
        if let Some(state) = self.registry.semaphores.get(semaphore) {
            state.export(handle_type);
        }
    }

    pub fn record_create_event(&self, event: vk::Event) {
        self.registry.events.insert(Arc::new(EventState::new(event)));
    }

    pub fn validate_destroy_event(&self, event: vk::Event) -> bool {
        self.validate_destroy(
            &self.registry.events,
            event,
            &["VUID-vkDestroyEvent-event-01145"],
        )
    }

    pub fn record_destroy_event(&self, event: vk::Event) {
        self.destroy_object(
            &self.registry.events,
            event,
            BindingBreak::Destroyed,
        );
    }

    pub fn validate_set_event(&self, event: vk::Event) -> bool {
        self.registry.events.get(event).map_or(false, |state| {
            self.emit_result(state.validate_host_write(&["VUID-vkSetEvent-event-09543"]))
        })
    }

    /// The host stage becomes visible to every queue at once.
    pub fn record_set_event(&self, event: vk::Event) {
        if let Some(state) = self.registry.events.get(event) {
            state.set_stage_mask(PipelineStages::HOST);
        }
    }

    pub fn validate_reset_event(&self, event: vk::Event) -> bool {
        self.registry.events.get(event).map_or(false, |state| {
            self.emit_result(state.validate_host_write(&["VUID-vkResetEvent-event-03821"]))
        })
    }

    pub fn record_reset_event(&self, event: vk::Event) {
        if let Some(state) = self.registry.events.get(event) {
            state.set_stage_mask(PipelineStages::empty());
        }
    }

    /// Whether the host sees `event` as set, as far as retired work and host commands tell.
    pub fn get_event_status(&self, event: vk::Event) -> Option<bool> {
        self.registry
            .events
            .get(event)
            .map(|state| !state.stage_mask().is_empty())
    }

    pub fn validate_create_query_pool(&self, create_info: &QueryPoolCreateInfo) -> bool {
        let mut skip = self.emit_result(create_info.validate());

        if create_info.query_type == QueryType::PipelineStatistics
            && !self.device_info.enabled_features.pipeline_statistics_query
        {
            skip |= self.emit(Box::new(ValidationError {
                context: "create_info.query_type".into(),
                problem: "is `QueryType::PipelineStatistics`".into(),
                vuids: &["VUID-VkQueryPoolCreateInfo-queryType-00791"],
                kind: ErrorKind::MissingPrerequisite,
                ..Default::default()
            }));
        }

        skip
    }

    pub fn record_create_query_pool(
        &self,
        query_pool: vk::QueryPool,
        create_info: QueryPoolCreateInfo,
    ) {
        log::trace!(
            "created {} with {} {:?} queries",
            TypedHandle::new(query_pool),
            create_info.query_count,
            create_info.query_type,
        );
        self.registry
            .query_pools
            .insert(Arc::new(QueryPoolState::new(query_pool, create_info)));
    }

    pub fn validate_destroy_query_pool(&self, query_pool: vk::QueryPool) -> bool {
        self.validate_destroy(
            &self.registry.query_pools,
            query_pool,
            &["VUID-vkDestroyQueryPool-queryPool-00793"],
        )
    }

    pub fn record_destroy_query_pool(&self, query_pool: vk::QueryPool) {
        self.destroy_object(
            &self.registry.query_pools,
            query_pool,
            BindingBreak::Destroyed,
        );
    }

    /// `vkResetQueryPool`, the host-side reset.
    pub fn validate_reset_query_pool(
        &self,
        query_pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    ) -> bool {
        let Some(pool) = self.registry.query_pools.get(query_pool) else {
            return false;
        };

        self.emit_result(pool.validate_host_reset(
            first_query,
            query_count,
            self.device_info.enabled_features.host_query_reset,
        ))
    }

    pub fn record_reset_query_pool(
        &self,
        query_pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    ) {
        if let Some(pool) = self.registry.query_pools.get(query_pool) {
            pool.set_state(query_range(&pool, first_query, query_count), QueryState::Reset);
        }
    }

    pub fn validate_get_query_pool_results(
        &self,
        query_pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
        stride: DeviceSize,
        flags: QueryResultFlags,
    ) -> bool {
        let Some(pool) = self.registry.query_pools.get(query_pool) else {
            return false;
        };

        let mut skip = self.emit_result(pool.validate_query_range(
            first_query,
            query_count,
            &["VUID-vkGetQueryPoolResults-firstQuery-09436"],
            &["VUID-vkGetQueryPoolResults-firstQuery-09437"],
        ));
        skip |= self.emit_result(pool.validate_result_parameters(
            stride,
            flags,
            [
                &["VUID-vkGetQueryPoolResults-flags-02828"],
                &["VUID-vkGetQueryPoolResults-flags-00815"],
            ],
            &["VUID-vkGetQueryPoolResults-queryType-09439"],
        ));

        if skip || self.settings.disabled.query_validation {
            return skip;
        }

        // Work still pending on a queue decides what a waiting read sees.
        let range = query_range(&pool, first_query, query_count);
        let mut overlay = QueryMap::default();

        for queue in self.registry.queues.snapshot() {
            for query in range.clone() {
                let query = QueryObject::new(query_pool, query);

                if let Some(state) = queue.query_state(&query) {
                    overlay.insert(query, state);
                }
            }
        }

        skip | self.emit_result(pool.validate_results_available(
            range,
            flags,
            &overlay,
            INVALID_QUERY,
        ))
    }

    /// A successful read with `QueryResultFlags::WAIT` proves that the submissions writing the
    /// queries have completed.
    pub fn record_get_query_pool_results(
        &self,
        query_pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
        flags: QueryResultFlags,
    ) {
        if !flags.intersects(QueryResultFlags::WAIT) {
            return;
        }

        let Some(pool) = self.registry.query_pools.get(query_pool) else {
            return;
        };

        self.retire_query_writers(query_pool, query_range(&pool, first_query, query_count));
    }

    /// Looks up the command buffer and the query pool of a query command.
    fn query_command(
        &self,
        command_buffer: vk::CommandBuffer,
        query_pool: vk::QueryPool,
        info: &CommandInfo,
    ) -> Option<(Arc<CommandBufferState>, Option<Arc<QueryPoolState>>, bool)> {
        let cb = self.registry.command_buffers.get(command_buffer)?;
        let skip = self.validate_cmd(&cb, &cb.state.lock(), info);

        Some((cb, self.registry.query_pools.get(query_pool), skip))
    }

    fn validate_query_index(
        &self,
        pool: &QueryPoolState,
        query: u32,
        vuids: &'static [&'static str],
    ) -> bool {
        if query < pool.query_count() {
            return false;
        }

        self.emit(Box::new(ValidationError {
            context: "query".into(),
            problem: format!(
                "is {}, but {} has only {} queries",
                query,
                self.format_handle(pool.typed_handle()),
                pool.query_count(),
            )
            .into(),
            vuids,
            kind: ErrorKind::ParameterOutOfRange,
            objects: [pool.typed_handle()].into_iter().collect(),
            ..Default::default()
        }))
    }

    pub fn validate_cmd_reset_query_pool(
        &self,
        command_buffer: vk::CommandBuffer,
        query_pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    ) -> bool {
        let Some((cb, pool, mut skip)) =
            self.query_command(command_buffer, query_pool, &RESET_QUERY_POOL)
        else {
            return false;
        };
        let Some(pool) = pool else {
            return skip;
        };

        skip |= self.emit_result(pool.validate_query_range(
            first_query,
            query_count,
            &["VUID-vkCmdResetQueryPool-firstQuery-00796"],
            &["VUID-vkCmdResetQueryPool-firstQuery-00797"],
        ));

        let state = cb.state.lock();
        let active = query_range(&pool, first_query, query_count)
            .find(|&query| {
                state
                    .active_queries
                    .contains(&QueryObject::new(query_pool, query))
            });

        if let Some(query) = active {
            skip |= self.emit(Box::new(ValidationError {
                context: RESET_QUERY_POOL.name.into(),
                problem: format!(
                    "resets query {} of {}, which is active in the command buffer",
                    query,
                    self.format_handle(pool.typed_handle()),
                )
                .into(),
                vuids: &["VUID-vkCmdResetQueryPool-None-02841"],
                kind: ErrorKind::StateIncompatible,
                objects: [cb.typed_handle(), pool.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        skip
    }

    pub fn record_cmd_reset_query_pool(
        &self,
        command_buffer: vk::CommandBuffer,
        query_pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    ) {
        let (Some(cb), Some(pool)) = (
            self.registry.command_buffers.get(command_buffer),
            self.registry.query_pools.get(query_pool),
        ) else {
            return;
        };

        let mut state = cb.state.lock();
        cb.bind_object(&mut state, pool.base());

        for query in query_range(&pool, first_query, query_count) {
            let query = QueryObject::new(query_pool, query);
            state.query_updates.push((query, QueryState::Reset));
            state
                .queue_submit_functions
                .push(Arc::new(query_transition(query, None, QueryState::Reset)));
        }
    }

    pub fn validate_cmd_begin_query(
        &self,
        command_buffer: vk::CommandBuffer,
        query_pool: vk::QueryPool,
        query: u32,
        flags: QueryControlFlags,
    ) -> bool {
        let Some((cb, pool, mut skip)) =
            self.query_command(command_buffer, query_pool, &BEGIN_QUERY)
        else {
            return false;
        };
        let Some(pool) = pool else {
            return skip;
        };

        skip |= self.validate_query_index(&pool, query, &["VUID-vkCmdBeginQuery-query-00802"]);

        let query_type = pool.query_type();

        if !query_type.is_scoped() {
            skip |= self.emit(Box::new(ValidationError {
                context: "query_pool".into(),
                problem: format!(
                    "holds {:?} queries, which cannot be begun and ended",
                    query_type,
                )
                .into(),
                vuids: &["VUID-vkCmdBeginQuery-queryType-02804"],
                kind: ErrorKind::StateIncompatible,
                objects: [pool.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        let graphics_vuids: Option<&'static [&'static str]> = match query_type {
            QueryType::Occlusion => Some(&["VUID-vkCmdBeginQuery-queryType-00803"]),
            QueryType::PipelineStatistics => Some(&["VUID-vkCmdBeginQuery-queryType-00804"]),
            QueryType::TransformFeedbackStream => Some(&["VUID-vkCmdBeginQuery-queryType-02327"]),
            _ => None,
        };

        if let Some(vuids) = graphics_vuids {
            if !self
                .device_info
                .queue_flags(cb.queue_family_index)
                .intersects(QueueFlags::GRAPHICS)
            {
                skip |= self.emit(Box::new(ValidationError {
                    context: "query_pool".into(),
                    problem: format!(
                        "holds {:?} queries, but queue family {} of the command pool does not \
                        support graphics operations",
                        query_type, cb.queue_family_index,
                    )
                    .into(),
                    vuids,
                    kind: ErrorKind::MissingPrerequisite,
                    objects: [cb.typed_handle(), pool.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
            }
        }

        if flags.intersects(QueryControlFlags::PRECISE)
            && (query_type != QueryType::Occlusion
                || !self.device_info.enabled_features.occlusion_query_precise)
        {
            skip |= self.emit(Box::new(ValidationError {
                context: "flags".into(),
                problem: "contains `QueryControlFlags::PRECISE`, but the pool does not hold \
                    occlusion queries or the `occlusion_query_precise` feature is not enabled"
                    .into(),
                vuids: &["VUID-vkCmdBeginQuery-queryType-00800"],
                kind: ErrorKind::MissingPrerequisite,
                objects: [pool.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        let state = cb.state.lock();
        let conflicting = state.active_queries.iter().find(|active| {
            self.registry
                .query_pools
                .get(active.pool)
                .is_some_and(|active_pool| active_pool.query_type() == query_type)
        });

        if let Some(active) = conflicting {
            skip |= self.emit(Box::new(ValidationError {
                context: "query_pool".into(),
                problem: format!(
                    "query {} of {} is already active in the command buffer, and has the same \
                    query type {:?}",
                    active.query,
                    self.format_handle(TypedHandle::new(active.pool)),
                    query_type,
                )
                .into(),
                vuids: &["VUID-vkCmdBeginQuery-queryPool-01922"],
                kind: ErrorKind::StateIncompatible,
                objects: [cb.typed_handle(), TypedHandle::new(active.pool)]
                    .into_iter()
                    .collect(),
                ..Default::default()
            }));
        }

        skip
    }

    pub fn record_cmd_begin_query(
        &self,
        command_buffer: vk::CommandBuffer,
        query_pool: vk::QueryPool,
        query: u32,
    ) {
        let (Some(cb), Some(pool)) = (
            self.registry.command_buffers.get(command_buffer),
            self.registry.query_pools.get(query_pool),
        ) else {
            return;
        };

        let query = QueryObject::new(query_pool, query);
        let required = (!self.settings.disabled.query_validation).then_some((
            QueryState::Reset,
            &["VUID-vkCmdBeginQuery-None-00807"] as &'static [&'static str],
            BEGIN_QUERY.name,
        ));

        let mut state = cb.state.lock();
        cb.bind_object(&mut state, pool.base());
        state.active_queries.insert(query);
        state.started_queries.insert(query);
        state.query_updates.push((query, QueryState::Running));
        state
            .queue_submit_functions
            .push(Arc::new(query_transition(query, required, QueryState::Running)));
    }

    pub fn validate_cmd_end_query(
        &self,
        command_buffer: vk::CommandBuffer,
        query_pool: vk::QueryPool,
        query: u32,
    ) -> bool {
        let Some((cb, pool, mut skip)) = self.query_command(command_buffer, query_pool, &END_QUERY)
        else {
            return false;
        };
        let Some(pool) = pool else {
            return skip;
        };

        skip |= self.validate_query_index(&pool, query, &["VUID-vkCmdEndQuery-query-00810"]);

        if !cb
            .state
            .lock()
            .active_queries
            .contains(&QueryObject::new(query_pool, query))
        {
            skip |= self.emit(Box::new(ValidationError {
                context: END_QUERY.name.into(),
                problem: format!(
                    "ends query {} of {}, which is not active in the command buffer",
                    query,
                    self.format_handle(pool.typed_handle()),
                )
                .into(),
                vuids: &["VUID-vkCmdEndQuery-None-01923"],
                kind: ErrorKind::StateIncompatible,
                objects: [cb.typed_handle(), pool.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        skip
    }

    pub fn record_cmd_end_query(
        &self,
        command_buffer: vk::CommandBuffer,
        query_pool: vk::QueryPool,
        query: u32,
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        let query = QueryObject::new(query_pool, query);
        let mut state = cb.state.lock();
        state.active_queries.remove(&query);
        state.query_updates.push((query, QueryState::Ended));
        state
            .queue_submit_functions
            .push(Arc::new(query_transition(query, None, QueryState::Ended)));
    }

    pub fn validate_cmd_write_timestamp(
        &self,
        command_buffer: vk::CommandBuffer,
        query_pool: vk::QueryPool,
        query: u32,
    ) -> bool {
        let Some((_, pool, mut skip)) =
            self.query_command(command_buffer, query_pool, &WRITE_TIMESTAMP)
        else {
            return false;
        };
        let Some(pool) = pool else {
            return skip;
        };

        if pool.query_type() != QueryType::Timestamp {
            skip |= self.emit(Box::new(ValidationError {
                context: "query_pool".into(),
                problem: format!(
                    "holds {:?} queries, but it must hold timestamp queries",
                    pool.query_type(),
                )
                .into(),
                vuids: &["VUID-vkCmdWriteTimestamp-queryPool-01416"],
                kind: ErrorKind::StateIncompatible,
                objects: [pool.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        skip | self.validate_query_index(&pool, query, &["VUID-vkCmdWriteTimestamp-query-04904"])
    }

    pub fn record_cmd_write_timestamp(
        &self,
        command_buffer: vk::CommandBuffer,
        query_pool: vk::QueryPool,
        query: u32,
    ) {
        let (Some(cb), Some(pool)) = (
            self.registry.command_buffers.get(command_buffer),
            self.registry.query_pools.get(query_pool),
        ) else {
            return;
        };

        let query = QueryObject::new(query_pool, query);
        let required = (!self.settings.disabled.query_validation).then_some((
            QueryState::Reset,
            &["VUID-vkCmdWriteTimestamp-None-00830"] as &'static [&'static str],
            WRITE_TIMESTAMP.name,
        ));

        let mut state = cb.state.lock();
        cb.bind_object(&mut state, pool.base());
        state.query_updates.push((query, QueryState::Ended));
        state
            .queue_submit_functions
            .push(Arc::new(query_transition(query, required, QueryState::Ended)));
    }

    #[allow(clippy::too_many_arguments)]
    pub fn validate_cmd_copy_query_pool_results(
        &self,
        command_buffer: vk::CommandBuffer,
        query_pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
        dst_buffer: vk::Buffer,
        dst_offset: DeviceSize,
        stride: DeviceSize,
        flags: QueryResultFlags,
    ) -> bool {
        let Some((_, pool, mut skip)) =
            self.query_command(command_buffer, query_pool, &COPY_QUERY_POOL_RESULTS)
        else {
            return false;
        };
        let Some(pool) = pool else {
            return skip;
        };

        skip |= self.emit_result(pool.validate_query_range(
            first_query,
            query_count,
            &["VUID-vkCmdCopyQueryPoolResults-firstQuery-09436"],
            &["VUID-vkCmdCopyQueryPoolResults-firstQuery-09437"],
        ));
        skip |= self.emit_result(pool.validate_result_parameters(
            stride,
            flags,
            [
                &["VUID-vkCmdCopyQueryPoolResults-flags-00822"],
                &["VUID-vkCmdCopyQueryPoolResults-flags-00823"],
            ],
            &["VUID-vkCmdCopyQueryPoolResults-queryType-09439"],
        ));

        let Some(buffer) = self.registry.buffers.get(dst_buffer) else {
            return skip;
        };

        skip |= self.validate_command_buffer_use(
            "dst_buffer".into(),
            &buffer,
            BufferUsage::TRANSFER_DST,
            &["VUID-vkCmdCopyQueryPoolResults-dstBuffer-00825"],
            &["VUID-vkCmdCopyQueryPoolResults-dstBuffer-00826"],
            COPY_QUERY_POOL_RESULTS.name,
        );

        if dst_offset >= buffer.size() {
            skip |= self.emit(Box::new(ValidationError {
                context: "dst_offset".into(),
                problem: format!(
                    "is {}, but {} is only {} bytes",
                    dst_offset,
                    self.format_handle(buffer.typed_handle()),
                    buffer.size(),
                )
                .into(),
                vuids: &["VUID-vkCmdCopyQueryPoolResults-dstOffset-00819"],
                kind: ErrorKind::ParameterOutOfRange,
                objects: [buffer.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        } else if query_count > 0 {
            let required = stride
                .saturating_mul(query_count as DeviceSize - 1)
                .saturating_add(query_result_size(&pool, flags));

            if required > buffer.size() - dst_offset {
                skip |= self.emit(Box::new(ValidationError {
                    context: "dst_buffer".into(),
                    problem: format!(
                        "has {} bytes after `dst_offset`, but the results of {} queries need {}",
                        buffer.size() - dst_offset,
                        query_count,
                        required,
                    )
                    .into(),
                    vuids: &["VUID-vkCmdCopyQueryPoolResults-dstBuffer-00824"],
                    kind: ErrorKind::ParameterOutOfRange,
                    objects: [buffer.typed_handle(), pool.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
            }
        }

        skip
    }

    pub fn record_cmd_copy_query_pool_results(
        &self,
        command_buffer: vk::CommandBuffer,
        query_pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
        dst_buffer: vk::Buffer,
        flags: QueryResultFlags,
    ) {
        let (Some(cb), Some(pool)) = (
            self.registry.command_buffers.get(command_buffer),
            self.registry.query_pools.get(query_pool),
        ) else {
            return;
        };

        let mut state = cb.state.lock();
        cb.bind_object(&mut state, pool.base());

        if let Some(buffer) = self.registry.buffers.get(dst_buffer) {
            cb.bind_object(&mut state, buffer.base());
        }

        if self.settings.disabled.query_validation {
            return;
        }

        let queries = query_range(&pool, first_query, query_count);

        state
            .queue_submit_functions
            .push(Arc::new(move |ctx: &mut SubmitContext<'_>| {
                queries
                    .clone()
                    .map(|query| {
                        let state = ctx.query_state(&QueryObject::new(query_pool, query));
                        (query, get_query_result_type(state, flags))
                    })
                    .find(|&(_, result_type)| result_type != QueryResultType::SomeData)
                    .map(|(query, result_type)| {
                        Box::new(ValidationError {
                            context: COPY_QUERY_POOL_RESULTS.name.into(),
                            problem: format!(
                                "copies the results of query {} of {} with flags {:?}, but {}",
                                query,
                                TypedHandle::new(query_pool),
                                flags,
                                result_type.message(),
                            )
                            .into(),
                            vuids: INVALID_QUERY,
                            kind: ErrorKind::Synchronization,
                            objects: [
                                TypedHandle::new(ctx.command_buffer),
                                TypedHandle::new(query_pool),
                            ]
                            .into_iter()
                            .collect(),
                            ..Default::default()
                        })
                    })
                    .into_iter()
                    .collect()
            }));
    }

    fn validate_event_write(
        &self,
        command_buffer: vk::CommandBuffer,
        stage_mask: PipelineStages,
        info: &CommandInfo,
        host_vuids: &'static [&'static str],
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let mut skip = self.validate_cmd(&cb, &cb.state.lock(), info);

        if stage_mask.intersects(PipelineStages::HOST) {
            skip |= self.emit(Box::new(ValidationError {
                context: "stage_mask".into(),
                problem: "contains `PipelineStages::HOST`".into(),
                vuids: host_vuids,
                kind: ErrorKind::ParameterOutOfRange,
                objects: [cb.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        skip
    }

    fn record_event_write(
        &self,
        command_buffer: vk::CommandBuffer,
        event: vk::Event,
        stage_mask: PipelineStages,
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        let mut state = cb.state.lock();

        if let Some(event_state) = self.registry.events.get(event) {
            cb.bind_object(&mut state, event_state.base());
        }

        record_event_write(&mut state, event, stage_mask);
    }

    pub fn validate_cmd_set_event(
        &self,
        command_buffer: vk::CommandBuffer,
        stage_mask: PipelineStages,
    ) -> bool {
        self.validate_event_write(
            command_buffer,
            stage_mask,
            &SET_EVENT,
            &["VUID-vkCmdSetEvent-stageMask-01149"],
        )
    }

    pub fn record_cmd_set_event(
        &self,
        command_buffer: vk::CommandBuffer,
        event: vk::Event,
        stage_mask: PipelineStages,
    ) {
        self.record_event_write(command_buffer, event, stage_mask);
    }

    pub fn validate_cmd_reset_event(
        &self,
        command_buffer: vk::CommandBuffer,
        stage_mask: PipelineStages,
    ) -> bool {
        self.validate_event_write(
            command_buffer,
            stage_mask,
            &RESET_EVENT,
            &["VUID-vkCmdResetEvent-stageMask-01153"],
        )
    }

    pub fn record_cmd_reset_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event) {
        self.record_event_write(command_buffer, event, PipelineStages::empty());
    }

    pub fn validate_cmd_wait_events(
        &self,
        command_buffer: vk::CommandBuffer,
        dependency_info: &DependencyInfo,
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();

        self.validate_cmd(&cb, &state, &WAIT_EVENTS)
            | self.validate_barriers(&cb, &state, dependency_info)
    }

    /// The stage mask is checked at submission, once the signal operations that precede the
    /// wait are known.
    pub fn record_cmd_wait_events(
        &self,
        command_buffer: vk::CommandBuffer,
        events: &[vk::Event],
        dependency_info: &DependencyInfo,
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        let mut state = cb.state.lock();

        for &event in events {
            if let Some(event_state) = self.registry.events.get(event) {
                cb.bind_object(&mut state, event_state.base());
            }

            if !state.events.contains(&event) {
                state.events.push(event);
            }
        }

        self.record_barriers(&cb, &mut state, dependency_info);

        let events: SmallVec<[vk::Event; 4]> = events.iter().copied().collect();
        let src_stages = dependency_info.src_stages;

        state
            .queue_submit_functions
            .push(Arc::new(move |ctx: &mut SubmitContext<'_>| {
                let mut signaled_stages = PipelineStages::empty();

                for &event in &events {
                    match ctx.event_stage_mask(event) {
                        Some(stages) => signaled_stages |= stages,
                        None => {
                            return vec![Box::new(ValidationError {
                                context: WAIT_EVENTS.name.into(),
                                problem: format!(
                                    "waits on {}, which has been destroyed",
                                    TypedHandle::new(event),
                                )
                                .into(),
                                vuids: &["UNASSIGNED-CoreValidation-DrawState-InvalidEvent"],
                                kind: ErrorKind::UseAfterFree,
                                objects: [TypedHandle::new(ctx.command_buffer), TypedHandle::new(event)]
                                    .into_iter()
                                    .collect(),
                                ..Default::default()
                            })];
                        }
                    }
                }

                validate_wait_events_stage_mask(signaled_stages, src_stages, events.iter().copied())
                    .err()
                    .into_iter()
                    .map(|error| error.add_object(TypedHandle::new(ctx.command_buffer)))
                    .collect()
            }));
    }
}

/// Queues a set or reset of `event` in a command buffer. Events the command buffer has not
/// waited on yet keep their write count raised while the submission is pending.
fn record_event_write(state: &mut CommandBufferMut, event: vk::Event, stage_mask: PipelineStages) {
    if !state.events.contains(&event) && !state.write_events_before_wait.contains(&event) {
        state.write_events_before_wait.push(event);
    }

    state.event_updates.push((event, stage_mask));
    state
        .queue_submit_functions
        .push(Arc::new(move |ctx: &mut SubmitContext<'_>| {
            ctx.set_event_stage_mask(event, stage_mask);
            Vec::new()
        }));
}

#[cfg(test)]
mod tests {
    use crate::{
        buffer::BufferUsage,
        device::{DeviceFeatures, DeviceInfo},
        query::{QueryControlFlags, QueryPoolCreateInfo, QueryResultFlags, QueryState, QueryType},
        queue::SubmitInfo,
        sync::{
            fence::{ExternalFenceHandleType, FenceCreateInfo, FenceImportFlags, FenceStatus},
            DependencyInfo, PipelineStages, SyncScope,
        },
        tests::{begin_primary, create_bound_buffer, create_queue, handle},
        LayerSettings,
    };
    use ash::vk;

    fn query_pool(layer: &crate::ValidationLayer, query_type: QueryType, count: u32) -> vk::QueryPool {
        let pool = handle();
        layer.record_create_query_pool(
            pool,
            QueryPoolCreateInfo {
                query_type,
                query_count: count,
                ..Default::default()
            },
        );
        pool
    }

    #[test]
    fn reset_range_boundary() {
        let (layer, reporter) = test_layer!();
        let pool = query_pool(&layer, QueryType::Occlusion, 8);
        let cb = begin_primary(&layer);

        assert!(!layer.validate_cmd_reset_query_pool(cb, pool, 4, 4));
        assert!(reporter.diagnostics().is_empty());

        layer.validate_cmd_reset_query_pool(cb, pool, 4, 5);
        assert!(reporter.contains("VUID-vkCmdResetQueryPool-firstQuery-00797"));
        assert_eq!(reporter.take().len(), 1);

        // The host-side reset needs its feature.
        layer.validate_reset_query_pool(pool, 0, 8);
        assert!(reporter.contains("VUID-vkResetQueryPool-None-02665"));
    }

    #[test]
    fn host_reset_with_feature() {
        let device_info = DeviceInfo {
            enabled_features: DeviceFeatures {
                host_query_reset: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let (layer, reporter) = test_layer!(LayerSettings::default(), device_info);
        let pool = query_pool(&layer, QueryType::Timestamp, 4);

        assert!(!layer.validate_reset_query_pool(pool, 0, 4));
        layer.record_reset_query_pool(pool, 0, 4);
        assert!(reporter.diagnostics().is_empty());

        let state = layer.registry().query_pools.get(pool).unwrap();
        assert_eq!(state.state(3), QueryState::Reset);

        // Reset but never written: a plain read may return nothing.
        layer.validate_get_query_pool_results(pool, 0, 4, 8, QueryResultFlags::TYPE_64);
        assert!(reporter.contains("UNASSIGNED-CoreValidation-DrawState-InvalidQuery"));
        reporter.clear();

        layer.validate_get_query_pool_results(pool, 0, 4, 4, QueryResultFlags::TYPE_64);
        assert!(reporter.contains("VUID-vkGetQueryPoolResults-flags-00815"));
    }

    #[test]
    fn begin_and_end_queries() {
        let (layer, reporter) = test_layer!();
        let pool = query_pool(&layer, QueryType::Occlusion, 4);
        let other = query_pool(&layer, QueryType::Occlusion, 4);
        let timestamps = query_pool(&layer, QueryType::Timestamp, 4);
        let cb = begin_primary(&layer);

        layer.validate_cmd_end_query(cb, pool, 0);
        assert!(reporter.contains("VUID-vkCmdEndQuery-None-01923"));
        reporter.clear();

        assert!(!layer.validate_cmd_begin_query(cb, pool, 0, QueryControlFlags::empty()));
        layer.record_cmd_begin_query(cb, pool, 0);

        layer.validate_cmd_begin_query(cb, other, 0, QueryControlFlags::empty());
        assert!(reporter.contains("VUID-vkCmdBeginQuery-queryPool-01922"));
        reporter.clear();

        layer.validate_cmd_begin_query(cb, timestamps, 0, QueryControlFlags::empty());
        assert!(reporter.contains("VUID-vkCmdBeginQuery-queryType-02804"));
        reporter.clear();

        layer.validate_cmd_reset_query_pool(cb, pool, 0, 1);
        assert!(reporter.contains("VUID-vkCmdResetQueryPool-None-02841"));
        reporter.clear();

        assert!(!layer.validate_cmd_end_query(cb, pool, 0));
        layer.record_cmd_end_query(cb, pool, 0);
        assert!(!layer.validate_end_command_buffer(cb));
        assert!(reporter.diagnostics().is_empty());
    }

    #[test]
    fn precise_occlusion_needs_the_feature() {
        let (layer, reporter) = test_layer!();
        let pool = query_pool(&layer, QueryType::Occlusion, 1);
        let cb = begin_primary(&layer);

        layer.validate_cmd_begin_query(cb, pool, 0, QueryControlFlags::PRECISE);
        assert!(reporter.contains("VUID-vkCmdBeginQuery-queryType-00800"));
    }

    #[test]
    fn queries_must_be_reset_before_use() {
        let (layer, reporter) = test_layer!();
        let queue = create_queue(&layer, 0);
        let pool = query_pool(&layer, QueryType::Timestamp, 2);

        let cb = begin_primary(&layer);
        layer.record_cmd_write_timestamp(cb, pool, 0);
        layer.record_end_command_buffer(cb);

        let submit = [SubmitInfo {
            command_buffers: vec![cb],
            ..Default::default()
        }];
        layer.validate_queue_submit(queue, &submit, vk::Fence::null());
        assert!(reporter.contains("VUID-vkCmdWriteTimestamp-None-00830"));
        reporter.clear();

        // Resetting earlier in the same command buffer is enough.
        let cb = begin_primary(&layer);
        layer.record_cmd_reset_query_pool(cb, pool, 0, 2);
        layer.record_cmd_write_timestamp(cb, pool, 0);
        layer.record_end_command_buffer(cb);

        let submit = [SubmitInfo {
            command_buffers: vec![cb],
            ..Default::default()
        }];
        assert!(!layer.validate_queue_submit(queue, &submit, vk::Fence::null()));
        layer.record_queue_submit(queue, &submit, vk::Fence::null());
        assert!(reporter.diagnostics().is_empty());

        // The pending write satisfies a waiting read; retiring makes it available.
        assert!(!layer.validate_get_query_pool_results(pool, 0, 1, 8, QueryResultFlags::TYPE_64 | QueryResultFlags::WAIT));
        layer.record_get_query_pool_results(pool, 0, 1, QueryResultFlags::WAIT);
        let state = layer.registry().query_pools.get(pool).unwrap();
        assert_eq!(state.state(0), QueryState::Available);
        assert_eq!(state.state(1), QueryState::Reset);
    }

    #[test]
    fn copy_query_results_destination() {
        let (layer, reporter) = test_layer!();
        let pool = query_pool(&layer, QueryType::Occlusion, 4);
        let (buffer, _) = create_bound_buffer(&layer, 16, BufferUsage::TRANSFER_DST);
        let cb = begin_primary(&layer);

        assert!(!layer.validate_cmd_copy_query_pool_results(
            cb,
            pool,
            0,
            4,
            buffer,
            0,
            4,
            QueryResultFlags::empty(),
        ));

        layer.validate_cmd_copy_query_pool_results(
            cb,
            pool,
            0,
            4,
            buffer,
            0,
            8,
            QueryResultFlags::TYPE_64,
        );
        assert!(reporter.contains("VUID-vkCmdCopyQueryPoolResults-dstBuffer-00824"));
        reporter.clear();

        layer.validate_cmd_copy_query_pool_results(
            cb,
            pool,
            0,
            1,
            buffer,
            0,
            6,
            QueryResultFlags::empty(),
        );
        assert!(reporter.contains("VUID-vkCmdCopyQueryPoolResults-flags-00822"));
    }

    #[test]
    fn wait_events_stage_mask_at_submit() {
        let (layer, reporter) = test_layer!();
        let queue = create_queue(&layer, 0);
        let event = handle();
        layer.record_create_event(event);

        let cb = begin_primary(&layer);
        assert!(!layer.validate_cmd_set_event(cb, PipelineStages::TRANSFER));
        layer.record_cmd_set_event(cb, event, PipelineStages::TRANSFER);

        let wait = DependencyInfo {
            src_stages: PipelineStages::COMPUTE_SHADER,
            dst_stages: PipelineStages::COMPUTE_SHADER,
            ..Default::default()
        };
        assert!(!layer.validate_cmd_wait_events(cb, &wait));
        layer.record_cmd_wait_events(cb, &[event], &wait);
        layer.record_end_command_buffer(cb);

        let submit = [SubmitInfo {
            command_buffers: vec![cb],
            ..Default::default()
        }];
        layer.validate_queue_submit(queue, &submit, vk::Fence::null());
        assert!(reporter.contains("VUID-vkCmdWaitEvents-srcStageMask-parameter"));

        layer.validate_cmd_set_event(cb, PipelineStages::HOST);
        assert!(reporter.contains("VUID-vkCmdSetEvent-stageMask-01149"));
    }

    #[test]
    fn host_event_writes_conflict_with_pending_ones() {
        let (layer, reporter) = test_layer!();
        let queue = create_queue(&layer, 0);
        let event = handle();
        layer.record_create_event(event);

        let cb = begin_primary(&layer);
        layer.record_cmd_set_event(cb, event, PipelineStages::TRANSFER);
        layer.record_end_command_buffer(cb);
        layer.record_queue_submit(
            queue,
            &[SubmitInfo {
                command_buffers: vec![cb],
                ..Default::default()
            }],
            vk::Fence::null(),
        );

        layer.validate_set_event(event);
        assert!(reporter.contains("VUID-vkSetEvent-event-09543"));
        assert_eq!(layer.get_event_status(event), Some(false));

        layer.record_queue_wait_idle(queue);
        assert_eq!(layer.get_event_status(event), Some(true));
        reporter.clear();

        assert!(!layer.validate_reset_event(event));
        layer.record_reset_event(event);
        assert_eq!(layer.get_event_status(event), Some(false));
        layer.record_set_event(event);
        assert_eq!(layer.get_event_status(event), Some(true));
    }

    #[test]
    fn fence_import_and_export() {
        let (layer, reporter) = test_layer!();
        let fence = handle();
        layer.record_create_fence(
            fence,
            FenceCreateInfo {
                signaled: true,
                export_handle_types:
                    crate::sync::fence::ExternalFenceHandleTypes::SYNC_FD,
            },
        );

        assert!(!layer.validate_reset_fences(&[fence]));
        layer.record_reset_fences(&[fence]);
        let state = layer.registry().fences.get(fence).unwrap();
        assert_eq!(state.status(), FenceStatus::Unsignaled);

        layer.validate_export_fence(fence, ExternalFenceHandleType::OpaqueFd);
        assert!(reporter.contains("VUID-VkFenceGetFdInfoKHR-handleType-01453"));

        assert!(!layer.validate_import_fence(fence));
        layer.record_import_fence(
            fence,
            ExternalFenceHandleType::OpaqueFd,
            FenceImportFlags::empty(),
        );
        assert_eq!(state.scope(), SyncScope::ExternalPermanent);
    }
}
