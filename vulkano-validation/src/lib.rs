//! State-tracking core of a Vulkan validation layer.
//!
//! The layer sits between an application and the Vulkan driver. Every API call is first shown to
//! the [`ValidationLayer`], which keeps a shadow model of every live driver object and every
//! command buffer under construction, and reports misuse through a [`Reporter`].
//!
//! # Brief summary of the model
//!
//! - The [object registry](crate::registry) maps raw handles to state records. Each record knows
//!   which command buffers reference it, so destroying the object can invalidate them.
//!
//! - [Buffers](crate::buffer), [images](crate::image) and
//!   [acceleration structures](crate::acceleration_structure) are *bindable*: they acquire storage
//!   by being bound to [device memory](crate::memory). The memory-binding graph records both
//!   directions of that relationship.
//!
//! - Each [command buffer](crate::command_buffer) keeps a transcript of what its recorded commands
//!   will do: bound pipelines and descriptor sets, dynamic state, the active render pass, queries,
//!   events, and the [image layouts](crate::image::layout_map) it expects and produces. Checks
//!   that depend on the state of other command buffers are queued and run at submission.
//!
//! - [Descriptor set layouts](crate::descriptor_set::layout) and
//!   [pipeline layouts](crate::pipeline::layout) are interned, so that "compatible for set N"
//!   is answered by comparing two pointers.
//!
//! - The [queue model](crate::queue) orders submissions against fences and semaphores, and
//!   decides when resources become idle again.
//!
//! # Hooks
//!
//! For each Vulkan entry point the layer exposes up to two methods. `validate_*` methods only read
//! state and emit diagnostics; they return `true` if the reporter asked for the call to be
//! skipped. `record_*` methods update the shadow model and must only be called once the driver
//! has accepted the call.

pub use crate::{
    handle::{ObjectType, TypedHandle},
    layer::{LayerCreateInfo, ValidationLayer},
    report::{CollectingReporter, Diagnostic, LogReporter, Reporter, Severity},
    settings::{DisabledChecks, GpuValidation, LayerSettings, SettingsError},
};
pub use crate::intern::Interned;
pub use ash::vk::{self, Handle};
use smallvec::SmallVec;
use std::{
    borrow::Cow,
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
};

#[macro_use]
mod tests;
mod macros;

pub mod acceleration_structure;
pub mod buffer;
pub mod command_buffer;
pub mod descriptor_set;
pub mod device;
pub mod format;
pub mod handle;
pub mod image;
mod intern;
pub mod layer;
pub mod memory;
pub mod pipeline;
pub mod query;
pub mod queue;
pub mod registry;
pub mod render_pass;
pub mod report;
pub mod sampler;
pub mod settings;
pub mod shader;
pub mod swapchain;
pub mod sync;

/// Represents memory size and offset values on a Vulkan device.
/// Analogous to the Rust `usize` type on the host.
pub use ash::vk::DeviceSize;

/// The category of a validation failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A parameter was outside the range of values that the implementation knows about.
    ParameterOutOfRange,

    /// An object was used after it, or something it depends on, was destroyed.
    UseAfterFree,

    /// An object was destroyed while pending work still referenced it.
    InUseOnDestroy,

    /// Two pieces of state that must agree with each other did not.
    #[default]
    StateIncompatible,

    /// Something that must happen first did not happen.
    MissingPrerequisite,

    /// Work was not correctly ordered against other work.
    Synchronization,
}

/// The arguments or other context of a call did not satisfy the valid usage rules of Vulkan.
#[derive(Clone, Debug, Default)]
pub struct ValidationError {
    /// The context in which the problem exists (e.g. a specific parameter).
    pub context: Cow<'static, str>,

    /// A description of the problem.
    pub problem: Cow<'static, str>,

    /// *Valid Usage IDs* (VUIDs) in the Vulkan specification that relate to the error.
    pub vuids: &'static [&'static str],

    /// The category of the problem.
    pub kind: ErrorKind,

    /// How serious the problem is.
    pub severity: Severity,

    /// The objects involved, the primary object first.
    pub objects: SmallVec<[TypedHandle; 2]>,
}

impl ValidationError {
    pub(crate) fn from_error<E: Error>(error: E) -> Self {
        Self {
            context: "".into(),
            problem: error.to_string().into(),
            vuids: &[],
            ..Default::default()
        }
    }

    pub(crate) fn add_context(mut self: Box<Self>, context: impl Into<Cow<'static, str>>) -> Box<Self> {
        if self.context.is_empty() {
            self.context = context.into();
        } else {
            self.context = format!("{}.{}", context.into(), self.context).into();
        }

        self
    }

    pub(crate) fn set_vuids(mut self: Box<Self>, vuids: &'static [&'static str]) -> Box<Self> {
        self.vuids = vuids;
        self
    }

    pub(crate) fn add_object(mut self: Box<Self>, object: TypedHandle) -> Box<Self> {
        if !self.objects.contains(&object) {
            self.objects.push(object);
        }

        self
    }

    /// Returns the first VUID, or `"UNASSIGNED"` if there is none.
    #[inline]
    pub fn vuid(&self) -> &'static str {
        self.vuids.first().copied().unwrap_or("UNASSIGNED")
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        if self.context.is_empty() {
            write!(f, "{}", self.problem)?;
        } else {
            write!(f, "{}: {}", self.context, self.problem)?;
        }

        if !self.vuids.is_empty() {
            write!(f, "\n\nVulkan VUIDs:")?;

            for vuid in self.vuids {
                write!(f, "\n    {}", vuid)?;
            }
        }

        Ok(())
    }
}

impl Error for ValidationError {}
