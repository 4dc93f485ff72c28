//! Command pools and command buffers.
//!
//! A [`CommandBufferState`] is a transcript of what the commands recorded so far will do when the
//! command buffer executes: what is bound, which render pass instance is active, which queries
//! and events are touched, and which image layouts are expected and produced. Checks that can
//! only be decided once the command buffer is submitted are queued on it as callbacks, and run
//! against a [`SubmitContext`] in record order.
//!
//! # State machine
//!
//! ```text
//!            begin              end
//!   New ────────────► Recording ───────► Recorded
//!    ▲                   │                  │
//!    │ reset             │ binding broken   │ binding broken
//!    │                   ▼                  ▼
//!    └───────── InvalidIncomplete    InvalidComplete
//! ```
//!
//! A reset, explicit or through the pool, returns a command buffer to `New` from any state.

use crate::{
    handle::TypedHandle,
    image::{
        layout_map::{GlobalImageLayouts, ImageSubresourceLayoutMap},
        ImageAspects, ImageLayout, ImageState, ImageViewState,
    },
    macros::{vulkan_bitflags, vulkan_enum},
    pipeline::{last_bound::LastBoundState, DynamicState, PipelineBindPoint},
    query::{QueryObject, QueryState},
    queue::QueueState,
    registry::{impl_state_object, ObjectBase, Registry, StateObject},
    render_pass::{framebuffer::FramebufferState, RenderPassState},
    sync::{qfo::QfoTransfers, PipelineStages},
    DeviceSize, ValidationError,
};
use ash::vk;
use foldhash::{HashMap, HashSet};
use parking_lot::Mutex;
use std::{
    fmt::{Debug, Formatter},
    ops::{BitOr, BitOrAssign},
    sync::Arc,
};

vulkan_enum! {
    /// The level of a command buffer.
    CommandBufferLevel = CommandBufferLevel(i32);

    /// Submitted directly to a queue.
    Primary = PRIMARY,

    /// Executed from a primary command buffer.
    Secondary = SECONDARY,
}

vulkan_bitflags! {
    /// How a command buffer is going to be used.
    CommandBufferUsage = CommandBufferUsageFlags(u32);

    /// The command buffer is submitted once, then reset or freed.
    ONE_TIME_SUBMIT = ONE_TIME_SUBMIT,

    /// A secondary command buffer that executes entirely inside a render pass instance.
    RENDER_PASS_CONTINUE = RENDER_PASS_CONTINUE,

    /// The command buffer may be pending on a queue while it is submitted again.
    SIMULTANEOUS_USE = SIMULTANEOUS_USE,
}

vulkan_bitflags! {
    /// Flags that control how a command pool is created.
    CommandPoolCreateFlags = CommandPoolCreateFlags(u32);

    TRANSIENT = TRANSIENT,

    /// Command buffers allocated from the pool can be reset individually. Without it, beginning
    /// an already recorded command buffer is an error.
    RESET_COMMAND_BUFFER = RESET_COMMAND_BUFFER,
    PROTECTED = PROTECTED,
}

vulkan_enum! {
    /// How the commands of a subpass are provided.
    SubpassContents = SubpassContents(i32);

    /// Recorded directly into the primary command buffer.
    Inline = INLINE,

    /// Executed from secondary command buffers.
    SecondaryCommandBuffers = SECONDARY_COMMAND_BUFFERS,
}

/// The recording state of a command buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CommandBufferRecordState {
    #[default]
    New,
    Recording,
    Recorded,

    /// An object used by the command buffer was destroyed or changed while it was recording.
    InvalidIncomplete,

    /// An object used by the command buffer was destroyed or changed after it was recorded.
    InvalidComplete,
}

impl CommandBufferRecordState {
    #[inline]
    pub fn is_invalid(self) -> bool {
        matches!(self, Self::InvalidIncomplete | Self::InvalidComplete)
    }
}

/// Parameters of a command pool.
#[derive(Clone, Debug, Default)]
pub struct CommandPoolCreateInfo {
    pub flags: CommandPoolCreateFlags,
    pub queue_family_index: u32,
}

/// State of a `VkCommandPool`.
#[derive(Debug)]
pub struct CommandPoolState {
    base: ObjectBase,
    pub create_info: CommandPoolCreateInfo,
    command_buffers: Mutex<HashSet<vk::CommandBuffer>>,
}

impl_state_object!(CommandPoolState, vk::CommandPool);

impl CommandPoolState {
    pub(crate) fn new(pool: vk::CommandPool, create_info: CommandPoolCreateInfo) -> Self {
        CommandPoolState {
            base: ObjectBase::new(TypedHandle::new(pool)),
            create_info,
            command_buffers: Mutex::default(),
        }
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.create_info.queue_family_index
    }

    /// The command buffers currently allocated from the pool.
    pub fn command_buffers(&self) -> Vec<vk::CommandBuffer> {
        self.command_buffers.lock().iter().copied().collect()
    }

    pub(crate) fn add_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        self.command_buffers.lock().insert(command_buffer);
    }

    pub(crate) fn remove_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        self.command_buffers.lock().remove(&command_buffer);
    }
}

/// The render pass instance a secondary command buffer continues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandBufferInheritanceInfo {
    pub render_pass: vk::RenderPass,
    pub subpass: u32,

    /// May be null if the framebuffer is not known when recording.
    pub framebuffer: vk::Framebuffer,
    pub occlusion_query_enable: bool,
    pub query_flags: crate::query::QueryControlFlags,
}

impl Default for CommandBufferInheritanceInfo {
    #[inline]
    fn default() -> Self {
        Self {
            render_pass: vk::RenderPass::null(),
            subpass: 0,
            framebuffer: vk::Framebuffer::null(),
            occlusion_query_enable: false,
            query_flags: crate::query::QueryControlFlags::empty(),
        }
    }
}

/// Parameters of `vkBeginCommandBuffer`.
#[derive(Clone, Debug, Default)]
pub struct CommandBufferBeginInfo {
    pub usage: CommandBufferUsage,

    /// Required for secondary command buffers.
    pub inheritance_info: Option<CommandBufferInheritanceInfo>,

    /// The device mask of a `VkDeviceGroupCommandBufferBeginInfo`. Zero if absent.
    pub device_mask: u32,
}

/// Why a command buffer lost one of its bindings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingBreak {
    Destroyed,

    /// A descriptor set was freed, or updated without the update-after-bind flag.
    DestroyedOrUpdated,

    /// A secondary command buffer was freed, reset or recorded again.
    DestroyedOrRerecorded,
}

/// A binding that was broken, leaving a command buffer invalid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BrokenBinding {
    pub object: TypedHandle,
    pub cause: BindingBreak,
}

/// Pieces of command buffer state that must be set before drawing.
///
/// Most bits correspond to a [`DynamicState`]; binding a pipeline sets the bits of the states it
/// does not declare dynamic, and the matching `vkCmdSet*` command sets the others.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CommandBufferStatus(u32);

impl CommandBufferStatus {
    pub const VIEWPORT: Self = Self(1 << 0);
    pub const SCISSOR: Self = Self(1 << 1);
    pub const LINE_WIDTH: Self = Self(1 << 2);
    pub const DEPTH_BIAS: Self = Self(1 << 3);
    pub const BLEND_CONSTANTS: Self = Self(1 << 4);
    pub const DEPTH_BOUNDS: Self = Self(1 << 5);
    pub const STENCIL_COMPARE_MASK: Self = Self(1 << 6);
    pub const STENCIL_WRITE_MASK: Self = Self(1 << 7);
    pub const STENCIL_REFERENCE: Self = Self(1 << 8);
    pub const EXCLUSIVE_SCISSOR: Self = Self(1 << 9);
    pub const SHADING_RATE_PALETTE: Self = Self(1 << 10);
    pub const LINE_STIPPLE: Self = Self(1 << 11);
    pub const INDEX_BUFFER_BOUND: Self = Self(1 << 12);

    const ALL_DYNAMIC: Self = Self((1 << 12) - 1);

    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every bit that corresponds to a dynamic state.
    #[inline]
    pub const fn all_dynamic() -> Self {
        Self::ALL_DYNAMIC
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn from_dynamic_state(state: DynamicState) -> Self {
        match state {
            DynamicState::Viewport => Self::VIEWPORT,
            DynamicState::Scissor => Self::SCISSOR,
            DynamicState::LineWidth => Self::LINE_WIDTH,
            DynamicState::DepthBias => Self::DEPTH_BIAS,
            DynamicState::BlendConstants => Self::BLEND_CONSTANTS,
            DynamicState::DepthBounds => Self::DEPTH_BOUNDS,
            DynamicState::StencilCompareMask => Self::STENCIL_COMPARE_MASK,
            DynamicState::StencilWriteMask => Self::STENCIL_WRITE_MASK,
            DynamicState::StencilReference => Self::STENCIL_REFERENCE,
            DynamicState::ExclusiveScissor => Self::EXCLUSIVE_SCISSOR,
            DynamicState::ViewportShadingRatePalette => Self::SHADING_RATE_PALETTE,
            DynamicState::LineStipple => Self::LINE_STIPPLE,
        }
    }

    /// Returns the status bits that a pipeline declaring `dynamic_states` sets when bound.
    pub fn static_for(dynamic_states: &[DynamicState]) -> Self {
        dynamic_states
            .iter()
            .fold(Self::ALL_DYNAMIC, |status, &state| {
                status.difference(Self::from_dynamic_state(state))
            })
    }

    /// Returns the name of the command that sets each missing bit.
    pub fn missing_commands(self, required: Self) -> Vec<&'static str> {
        const NAMES: [(CommandBufferStatus, &str); 13] = [
            (CommandBufferStatus::VIEWPORT, "vkCmdSetViewport"),
            (CommandBufferStatus::SCISSOR, "vkCmdSetScissor"),
            (CommandBufferStatus::LINE_WIDTH, "vkCmdSetLineWidth"),
            (CommandBufferStatus::DEPTH_BIAS, "vkCmdSetDepthBias"),
            (CommandBufferStatus::BLEND_CONSTANTS, "vkCmdSetBlendConstants"),
            (CommandBufferStatus::DEPTH_BOUNDS, "vkCmdSetDepthBounds"),
            (CommandBufferStatus::STENCIL_COMPARE_MASK, "vkCmdSetStencilCompareMask"),
            (CommandBufferStatus::STENCIL_WRITE_MASK, "vkCmdSetStencilWriteMask"),
            (CommandBufferStatus::STENCIL_REFERENCE, "vkCmdSetStencilReference"),
            (CommandBufferStatus::EXCLUSIVE_SCISSOR, "vkCmdSetExclusiveScissorNV"),
            (CommandBufferStatus::SHADING_RATE_PALETTE, "vkCmdSetViewportShadingRatePaletteNV"),
            (CommandBufferStatus::LINE_STIPPLE, "vkCmdSetLineStippleEXT"),
            (CommandBufferStatus::INDEX_BUFFER_BOUND, "vkCmdBindIndexBuffer"),
        ];

        NAMES
            .into_iter()
            .filter(|&(bit, _)| required.contains(bit) && !self.contains(bit))
            .map(|(_, name)| name)
            .collect()
    }
}

impl BitOr for CommandBufferStatus {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CommandBufferStatus {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Debug for CommandBufferStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CommandBufferStatus({:#x})", self.0)
    }
}

/// The render pass instance that is active in a command buffer.
#[derive(Clone, Debug)]
pub struct RenderPassInstance {
    pub render_pass: Arc<RenderPassState>,

    /// `None` in a secondary command buffer whose inheritance info has no framebuffer.
    pub framebuffer: Option<Arc<FramebufferState>>,

    /// The image views of the framebuffer, or those given at begin for imageless framebuffers.
    pub attachments: Vec<Arc<ImageViewState>>,
    pub subpass: u32,
    pub contents: SubpassContents,
    pub render_area: vk::Rect2D,
}

impl RenderPassInstance {
    /// The number of layers of the framebuffer, if it is known.
    #[inline]
    pub fn layers(&self) -> Option<u32> {
        self.framebuffer
            .as_ref()
            .map(|framebuffer| framebuffer.create_info.layers)
    }
}

/// A buffer bound with `vkCmdBindVertexBuffers`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexBufferBinding {
    pub buffer: vk::Buffer,
    pub offset: DeviceSize,
}

/// A buffer bound with `vkCmdBindIndexBuffer`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexBufferBinding {
    pub buffer: vk::Buffer,
    pub offset: DeviceSize,
    pub index_type: vk::IndexType,
}

/// One attachment cleared by `vkCmdClearAttachments`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClearAttachment {
    pub aspects: ImageAspects,

    /// The index into the color attachments of the subpass. Ignored for depth/stencil.
    pub color_attachment: u32,
}

/// A region cleared by `vkCmdClearAttachments`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClearRect {
    pub rect: vk::Rect2D,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

/// A region copied by `vkCmdCopyBuffer`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferCopy {
    pub src_offset: DeviceSize,
    pub dst_offset: DeviceSize,
    pub size: DeviceSize,
}

/// What submitted work looks like to checks that run at submission: the device-wide state plus
/// the effects of the command buffers submitted before, in the same call.
pub struct SubmitContext<'a> {
    pub registry: &'a Registry,
    pub queue: &'a QueueState,
    pub command_buffer: vk::CommandBuffer,
    image_layouts: HashMap<vk::Image, GlobalImageLayouts>,
    event_stages: HashMap<vk::Event, PipelineStages>,
    query_states: HashMap<QueryObject, QueryState>,
}

impl<'a> SubmitContext<'a> {
    pub(crate) fn new(registry: &'a Registry, queue: &'a QueueState) -> Self {
        SubmitContext {
            registry,
            queue,
            command_buffer: vk::CommandBuffer::null(),
            image_layouts: HashMap::default(),
            event_stages: HashMap::default(),
            query_states: HashMap::default(),
        }
    }

    /// The layouts of `image` as left by completed work and by the command buffers already
    /// validated in this submission.
    pub(crate) fn image_layouts(&mut self, image: &ImageState) -> &mut GlobalImageLayouts {
        self.image_layouts
            .entry(image.handle())
            .or_insert_with(|| image.state.lock().layouts.clone())
    }

    /// The stage mask `event` will have been signaled with when the current command buffer
    /// executes.
    pub fn event_stage_mask(&self, event: vk::Event) -> Option<PipelineStages> {
        self.event_stages
            .get(&event)
            .copied()
            .or_else(|| self.queue.event_stage_mask(event))
            .or_else(|| {
                self.registry
                    .events
                    .get(event)
                    .map(|state| state.stage_mask())
            })
    }

    pub(crate) fn set_event_stage_mask(&mut self, event: vk::Event, stages: PipelineStages) {
        self.event_stages.insert(event, stages);
    }

    /// The state `query` will be in when the current command buffer executes.
    pub fn query_state(&self, query: &QueryObject) -> QueryState {
        self.query_states
            .get(query)
            .copied()
            .or_else(|| self.queue.query_state(query))
            .or_else(|| {
                self.registry
                    .query_pools
                    .get(query.pool)
                    .map(|pool| pool.state(query.query))
            })
            .unwrap_or_default()
    }

    pub(crate) fn set_query_state(&mut self, query: QueryObject, state: QueryState) {
        self.query_states.insert(query, state);
    }
}

/// A check queued while recording, run when the command buffer is submitted.
pub type QueueSubmitFn =
    Arc<dyn Fn(&mut SubmitContext<'_>) -> Vec<Box<ValidationError>> + Send + Sync>;

/// A check queued in a secondary command buffer that needs the render pass instance of the
/// primary command buffer it is executed from.
pub type ExecuteCommandsFn =
    Arc<dyn Fn(&RenderPassInstance) -> Vec<Box<ValidationError>> + Send + Sync>;

/// Everything that recording commands changes.
#[derive(Default)]
pub(crate) struct CommandBufferMut {
    pub(crate) record_state: CommandBufferRecordState,
    pub(crate) begin_info: CommandBufferBeginInfo,

    pub(crate) status: CommandBufferStatus,
    pub(crate) static_status: CommandBufferStatus,
    pub(crate) viewport_mask: u32,
    pub(crate) scissor_mask: u32,

    pub(crate) render_pass: Option<RenderPassInstance>,
    pub(crate) initial_device_mask: u32,
    pub(crate) active_render_pass_device_mask: u32,

    pub(crate) vertex_buffers: HashMap<u32, VertexBufferBinding>,
    pub(crate) index_buffer: Option<IndexBufferBinding>,
    pub(crate) last_bound: [LastBoundState; 3],
    pub(crate) shading_rate_image: Option<vk::ImageView>,

    pub(crate) image_layouts: HashMap<vk::Image, ImageSubresourceLayoutMap>,
    pub(crate) image_layout_change_count: u64,

    /// Events set or reset by this command buffer that it has not waited on itself.
    pub(crate) write_events_before_wait: Vec<vk::Event>,
    pub(crate) events: Vec<vk::Event>,
    pub(crate) event_updates: Vec<(vk::Event, PipelineStages)>,

    pub(crate) active_queries: HashSet<QueryObject>,
    pub(crate) started_queries: HashSet<QueryObject>,
    pub(crate) query_updates: Vec<(QueryObject, QueryState)>,

    pub(crate) object_bindings: HashSet<TypedHandle>,
    pub(crate) linked_command_buffers: HashSet<vk::CommandBuffer>,
    pub(crate) queue_submit_functions: Vec<QueueSubmitFn>,
    pub(crate) execute_commands_functions: Vec<ExecuteCommandsFn>,
    pub(crate) qfo_transfers: QfoTransfers,
    pub(crate) debug_labels: Vec<String>,

    pub(crate) submit_count: u32,
    pub(crate) broken_bindings: Vec<BrokenBinding>,
}

impl CommandBufferMut {
    /// Clears everything that recording accumulated. Returns the objects and linked command
    /// buffers that were bound, so that their back-references can be removed.
    pub(crate) fn reset(&mut self) -> (HashSet<TypedHandle>, HashSet<vk::CommandBuffer>) {
        let objects = std::mem::take(&mut self.object_bindings);
        let linked = std::mem::take(&mut self.linked_command_buffers);
        *self = CommandBufferMut::default();

        (objects, linked)
    }

    #[inline]
    pub(crate) fn last_bound(&self, bind_point: PipelineBindPoint) -> &LastBoundState {
        &self.last_bound[bind_point.index()]
    }

    #[inline]
    pub(crate) fn last_bound_mut(&mut self, bind_point: PipelineBindPoint) -> &mut LastBoundState {
        &mut self.last_bound[bind_point.index()]
    }

    /// Returns the layout map of `image`, creating it if the command buffer has not touched the
    /// image yet.
    pub(crate) fn image_layout_map(&mut self, image: &ImageState) -> &mut ImageSubresourceLayoutMap {
        self.image_layouts
            .entry(image.handle())
            .or_insert_with(|| ImageSubresourceLayoutMap::new(image.handle(), *image.encoder()))
    }

    /// Records a transition of `range` of `image`, and bumps the layout change count if anything
    /// changed.
    pub(crate) fn set_image_layout(
        &mut self,
        image: &ImageState,
        range: &crate::image::ImageSubresourceRange,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) {
        let range = image.normalize_range(range);

        if self
            .image_layout_map(image)
            .set_transition(&range, old_layout, new_layout)
        {
            self.image_layout_change_count += 1;
        }
    }

    pub(crate) fn is_secondary_continuing_render_pass(&self) -> bool {
        self.begin_info
            .usage
            .intersects(CommandBufferUsage::RENDER_PASS_CONTINUE)
    }
}

/// State of a `VkCommandBuffer`.
pub struct CommandBufferState {
    base: ObjectBase,
    pub pool: vk::CommandPool,
    pub level: CommandBufferLevel,
    pub queue_family_index: u32,
    pub pool_flags: CommandPoolCreateFlags,
    pub(crate) state: Mutex<CommandBufferMut>,
}

impl_state_object!(CommandBufferState, vk::CommandBuffer);

impl Debug for CommandBufferState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBufferState")
            .field("handle", &self.base.typed_handle())
            .field("pool", &self.pool)
            .field("level", &self.level)
            .field("record_state", &self.record_state())
            .finish_non_exhaustive()
    }
}

impl CommandBufferState {
    pub(crate) fn new(
        command_buffer: vk::CommandBuffer,
        pool: &CommandPoolState,
        level: CommandBufferLevel,
    ) -> Self {
        CommandBufferState {
            base: ObjectBase::new(TypedHandle::new(command_buffer)),
            pool: pool.handle(),
            level,
            queue_family_index: pool.queue_family_index(),
            pool_flags: pool.create_info.flags,
            state: Mutex::default(),
        }
    }

    #[inline]
    pub fn record_state(&self) -> CommandBufferRecordState {
        self.state.lock().record_state
    }

    #[inline]
    pub fn usage(&self) -> CommandBufferUsage {
        self.state.lock().begin_info.usage
    }

    /// The number of times the command buffer was submitted since it was last begun.
    #[inline]
    pub fn submit_count(&self) -> u32 {
        self.state.lock().submit_count
    }

    /// The bindings whose loss made the command buffer invalid.
    pub fn broken_bindings(&self) -> Vec<BrokenBinding> {
        self.state.lock().broken_bindings.clone()
    }

    /// The command buffers linked to this one by `vkCmdExecuteCommands`, in either direction.
    pub fn linked_command_buffers(&self) -> Vec<vk::CommandBuffer> {
        self.state
            .lock()
            .linked_command_buffers
            .iter()
            .copied()
            .collect()
    }

    /// The objects the recorded commands use.
    pub fn object_bindings(&self) -> Vec<TypedHandle> {
        self.state.lock().object_bindings.iter().copied().collect()
    }

    /// The current subpass index, if a render pass instance is active.
    pub fn active_subpass(&self) -> Option<u32> {
        self.state
            .lock()
            .render_pass
            .as_ref()
            .map(|instance| instance.subpass)
    }

    /// The layout that the recorded commands leave `subresource` of `image` in, if they touch it.
    pub fn image_layout(
        &self,
        image: vk::Image,
        subresource: &crate::image::ImageSubresource,
    ) -> Option<ImageLayout> {
        self.state
            .lock()
            .image_layouts
            .get(&image)
            .and_then(|map| map.subresource_layout(subresource))
    }

    /// The layout that the recorded commands expect `subresource` of `image` to be in when the
    /// command buffer starts executing.
    pub fn expected_initial_layout(
        &self,
        image: vk::Image,
        subresource: &crate::image::ImageSubresource,
    ) -> Option<ImageLayout> {
        self.state
            .lock()
            .image_layouts
            .get(&image)
            .and_then(|map| map.subresource_initial_layout(subresource))
    }

    /// The depth of the debug label stack.
    #[inline]
    pub fn debug_label_depth(&self) -> usize {
        self.state.lock().debug_labels.len()
    }

    /// Marks the command buffer invalid because of `broken`. Returns whether the state changed.
    pub(crate) fn invalidate(&self, broken: BrokenBinding) -> bool {
        let mut state = self.state.lock();
        let new_state = match state.record_state {
            CommandBufferRecordState::Recording => CommandBufferRecordState::InvalidIncomplete,
            CommandBufferRecordState::Recorded => CommandBufferRecordState::InvalidComplete,
            _ => return false,
        };

        log::debug!(
            "{} invalidated: {} was {:?}",
            self.typed_handle(),
            broken.object,
            broken.cause,
        );
        state.record_state = new_state;
        state.broken_bindings.push(broken);

        true
    }

    /// Adds `object` to the objects the command buffer uses, and the command buffer to the
    /// object's back-references.
    pub(crate) fn bind_object(&self, state: &mut CommandBufferMut, object: &ObjectBase) {
        if state.object_bindings.insert(object.typed_handle()) {
            object.add_command_buffer_binding(self.handle());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Handle;

    fn command_buffer() -> CommandBufferState {
        let pool = CommandPoolState::new(
            vk::CommandPool::from_raw(1),
            CommandPoolCreateInfo {
                flags: CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                queue_family_index: 0,
            },
        );

        CommandBufferState::new(
            vk::CommandBuffer::from_raw(2),
            &pool,
            CommandBufferLevel::Primary,
        )
    }

    #[test]
    fn static_status() {
        let status = CommandBufferStatus::static_for(&[DynamicState::Viewport]);
        assert!(!status.contains(CommandBufferStatus::VIEWPORT));
        assert!(status.contains(CommandBufferStatus::SCISSOR));
        assert!(!status.contains(CommandBufferStatus::INDEX_BUFFER_BOUND));

        let required = CommandBufferStatus::VIEWPORT | CommandBufferStatus::SCISSOR;
        assert_eq!(status.missing_commands(required), vec!["vkCmdSetViewport"]);
    }

    #[test]
    fn invalidation_follows_record_state() {
        let cb = command_buffer();
        let broken = BrokenBinding {
            object: TypedHandle::new(vk::Buffer::from_raw(5)),
            cause: BindingBreak::Destroyed,
        };

        // A new command buffer has nothing to lose.
        assert!(!cb.invalidate(broken));
        assert_eq!(cb.record_state(), CommandBufferRecordState::New);

        cb.state.lock().record_state = CommandBufferRecordState::Recording;
        assert!(cb.invalidate(broken));
        assert_eq!(cb.record_state(), CommandBufferRecordState::InvalidIncomplete);

        cb.state.lock().record_state = CommandBufferRecordState::Recorded;
        assert!(cb.invalidate(broken));
        assert_eq!(cb.record_state(), CommandBufferRecordState::InvalidComplete);
        assert_eq!(cb.broken_bindings(), vec![broken, broken]);
    }

    #[test]
    fn reset_returns_bindings() {
        let cb = command_buffer();
        let object = ObjectBase::new(TypedHandle::new(vk::Buffer::from_raw(5)));

        let mut state = cb.state.lock();
        cb.bind_object(&mut state, &object);
        cb.bind_object(&mut state, &object);
        assert_eq!(object.command_buffer_bindings(), vec![cb.handle()]);

        let (objects, linked) = state.reset();
        assert_eq!(objects.len(), 1);
        assert!(linked.is_empty());
        assert!(state.object_bindings.is_empty());
        assert_eq!(state.record_state, CommandBufferRecordState::New);
    }
}
