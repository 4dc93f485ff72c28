//! The entry points of the layer.
//!
//! [`ValidationLayer`] owns the state of one device. Each Vulkan entry point maps to a pair of
//! hooks: `validate_*` inspects the arguments against the current state and emits diagnostics,
//! returning `true` if the reporter asked for the call to be skipped. `record_*` applies the
//! effects of the call, and is only called after the driver accepted it.
//!
//! The hooks are spread over submodules by object kind, but they all live on the same type.

use crate::{
    command_buffer::{BindingBreak, BrokenBinding, CommandBufferLevel, CommandBufferState},
    device::DeviceInfo,
    handle::TypedHandle,
    pipeline::layout::LayoutInterner,
    registry::{EraseError, ObjectBase, ObjectMap, Registry, StateObject},
    report::{DebugReport, LogReporter, Reporter},
    settings::LayerSettings,
    shader::{ShaderStageValidator, ValidationCache, ValidationCacheFactory},
    sync::qfo::QfoScoreboard,
    ErrorKind, ValidationError,
};
use ash::vk;
use foldhash::HashMap;
use parking_lot::RwLock;
use std::{
    fmt::{Debug, Error as FmtError, Formatter},
    sync::Arc,
};

mod command_buffer;
mod commands;
mod descriptor;
mod pipeline;
mod queue;
mod render_pass;
mod resource;
mod swapchain;
mod sync;

/// Parameters to create a [`ValidationLayer`].
#[derive(Clone, Default)]
pub struct LayerCreateInfo {
    pub settings: LayerSettings,
    pub device_info: DeviceInfo,

    /// Where diagnostics go. `None` forwards them to the `log` crate.
    pub reporter: Option<Arc<dyn Reporter>>,

    /// Validates shader code when pipelines are created. `None` skips those checks.
    pub shader_validator: Option<Arc<dyn ShaderStageValidator>>,

    /// Creates the caches behind `vkCreateValidationCacheEXT`. `None` makes every cache handle
    /// behave as an empty cache.
    pub validation_cache_factory: Option<ValidationCacheFactory>,
}

impl Debug for LayerCreateInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.debug_struct("LayerCreateInfo")
            .field("settings", &self.settings)
            .field("device_info", &self.device_info)
            .field("reporter", &self.reporter.is_some())
            .field("shader_validator", &self.shader_validator.is_some())
            .finish_non_exhaustive()
    }
}

/// The validation state of one device.
pub struct ValidationLayer {
    settings: LayerSettings,
    device_info: DeviceInfo,
    registry: Registry,
    report: DebugReport,
    interner: LayoutInterner,
    qfo: QfoScoreboard,
    shader_validator: Option<Arc<dyn ShaderStageValidator>>,
    validation_cache_factory: Option<ValidationCacheFactory>,
    validation_caches: RwLock<HashMap<vk::ValidationCacheEXT, Arc<dyn ValidationCache>>>,
}

impl Debug for ValidationLayer {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.debug_struct("ValidationLayer")
            .field("settings", &self.settings)
            .field("device_info", &self.device_info)
            .finish_non_exhaustive()
    }
}

impl ValidationLayer {
    /// Creates the state of a new device.
    pub fn new(create_info: LayerCreateInfo) -> Self {
        let LayerCreateInfo {
            settings,
            device_info,
            reporter,
            shader_validator,
            validation_cache_factory,
        } = create_info;

        let reporter = reporter.unwrap_or_else(|| Arc::new(LogReporter));

        log::debug!(
            "creating validation layer: gpu validation {:?}, {} queue families, {} memory types",
            settings.gpu_validation,
            device_info.queue_family_properties.len(),
            device_info.memory_types.len(),
        );

        ValidationLayer {
            report: DebugReport::new(reporter, settings.duplicate_message_limit),
            settings,
            device_info,
            registry: Registry::default(),
            interner: LayoutInterner::default(),
            qfo: QfoScoreboard::default(),
            shader_validator,
            validation_cache_factory,
            validation_caches: RwLock::default(),
        }
    }

    /// The state records of every live object.
    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[inline]
    pub fn settings(&self) -> &LayerSettings {
        &self.settings
    }

    #[inline]
    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// The queue family ownership transfers released but not acquired yet.
    #[inline]
    pub fn qfo_scoreboard(&self) -> &QfoScoreboard {
        &self.qfo
    }

    /// The `max_bound_descriptor_sets` limit as the application sees it, with one set reserved
    /// when GPU-assisted validation needs it.
    #[inline]
    pub fn max_bound_descriptor_sets(&self) -> u32 {
        self.settings
            .max_bound_descriptor_sets(self.device_info.limits.max_bound_descriptor_sets)
    }

    /// `vkSetDebugUtilsObjectNameEXT`. An empty or absent name removes the name.
    pub fn set_debug_utils_object_name(&self, object: TypedHandle, name: Option<&str>) {
        self.report
            .set_object_name(object, name.map(ToOwned::to_owned));
    }

    /// Formats a handle the way diagnostics show it, with its debug name if it has one.
    pub fn format_handle(&self, object: TypedHandle) -> String {
        self.report.format_handle(object)
    }

    pub(crate) fn emit(&self, error: Box<ValidationError>) -> bool {
        self.report.emit(error)
    }

    pub(crate) fn emit_all(&self, errors: impl IntoIterator<Item = Box<ValidationError>>) -> bool {
        errors
            .into_iter()
            .fold(false, |skip, error| self.emit(error) | skip)
    }

    pub(crate) fn emit_result(&self, result: Result<(), Box<ValidationError>>) -> bool {
        match result {
            Ok(()) => false,
            Err(error) => self.emit(error),
        }
    }

    /// Emits an error if `handle` is still used by pending work.
    fn validate_destroy<S: StateObject>(
        &self,
        map: &ObjectMap<S>,
        handle: S::Handle,
        vuids: &'static [&'static str],
    ) -> bool {
        if self.settings.disabled.object_in_use {
            return false;
        }

        match map.check_erase(handle) {
            Ok(_) => false,
            Err(EraseError::InUse { object, count }) => self.emit(Box::new(ValidationError {
                problem: format!(
                    "the object is destroyed while {} pending submission(s) still use it",
                    count,
                )
                .into(),
                vuids,
                kind: ErrorKind::InUseOnDestroy,
                objects: [object].into_iter().collect(),
                ..Default::default()
            })),
        }
    }

    /// Removes a destroyed object's record and invalidates every command buffer that used it.
    fn destroy_object<S: StateObject>(
        &self,
        map: &ObjectMap<S>,
        handle: S::Handle,
        cause: BindingBreak,
    ) -> Option<Arc<S>> {
        let state = map.remove(handle)?;
        self.invalidate_command_buffers(state.base(), cause);
        self.report.forget_object(state.typed_handle());

        Some(state)
    }

    /// Invalidates every command buffer bound to `object`.
    pub(crate) fn invalidate_command_buffers(&self, object: &ObjectBase, cause: BindingBreak) {
        let broken = BrokenBinding {
            object: object.typed_handle(),
            cause,
        };

        for command_buffer in object.take_command_buffer_bindings() {
            if let Some(command_buffer) = self.registry.command_buffers.get(command_buffer) {
                self.invalidate_command_buffer(&command_buffer, broken);
            }
        }
    }

    /// Invalidates `command_buffer`, and if it is a secondary command buffer, the primary
    /// command buffers that execute it.
    fn invalidate_command_buffer(&self, command_buffer: &CommandBufferState, broken: BrokenBinding) {
        if !command_buffer.invalidate(broken) || command_buffer.level != CommandBufferLevel::Secondary
        {
            return;
        }

        let broken = BrokenBinding {
            object: command_buffer.typed_handle(),
            cause: BindingBreak::DestroyedOrRerecorded,
        };

        for linked in command_buffer.linked_command_buffers() {
            if let Some(primary) = self.registry.command_buffers.get(linked) {
                if primary.level == CommandBufferLevel::Primary {
                    self.invalidate_command_buffer(&primary, broken);
                }
            }
        }
    }

    /// Returns `command_buffer` to the initial state, removing every back-reference that
    /// recording created.
    pub(crate) fn reset_command_buffer_state(&self, command_buffer: &CommandBufferState) {
        let (objects, linked) = command_buffer.state.lock().reset();
        let handle = command_buffer.handle();

        for object in objects {
            if let Some(object) = self.registry.get_base(object) {
                object.object_base().remove_command_buffer_binding(handle);
            }
        }

        let broken = BrokenBinding {
            object: command_buffer.typed_handle(),
            cause: BindingBreak::DestroyedOrRerecorded,
        };

        for other in linked {
            let Some(other) = self.registry.command_buffers.get(other) else {
                continue;
            };

            other.state.lock().linked_command_buffers.remove(&handle);

            if command_buffer.level == CommandBufferLevel::Secondary
                && other.level == CommandBufferLevel::Primary
            {
                self.invalidate_command_buffer(&other, broken);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        buffer::BufferUsage, command_buffer::CommandBufferRecordState, Handle, LayerSettings,
        TypedHandle,
    };
    use ash::vk;

    #[test]
    fn object_names_appear_in_messages() {
        let (layer, reporter) = test_layer!();
        let buffer = crate::tests::create_buffer(&layer, 64, BufferUsage::UNIFORM_TEXEL_BUFFER);

        layer.set_debug_utils_object_name(TypedHandle::new(buffer), Some("staging"));
        assert_eq!(
            layer.format_handle(TypedHandle::new(buffer)),
            format!("VkBuffer {:#x}[staging]", buffer.as_raw()),
        );

        // A view over a buffer with no memory names the buffer.
        layer.validate_create_buffer_view(&crate::buffer::BufferViewCreateInfo {
            buffer,
            format: vk::Format::R8_UINT,
            offset: 0,
            range: 64,
        });
        let diagnostics = reporter.take();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("[staging]"));

        layer.set_debug_utils_object_name(TypedHandle::new(buffer), None);
        assert!(!layer
            .format_handle(TypedHandle::new(buffer))
            .contains("staging"));
    }

    #[test]
    fn duplicate_message_limit() {
        let settings = LayerSettings {
            duplicate_message_limit: Some(2),
            ..Default::default()
        };
        let (layer, reporter) = test_layer!(settings);

        for _ in 0..5 {
            layer.validate_create_buffer(&crate::buffer::BufferCreateInfo::default());
        }

        assert_eq!(reporter.diagnostics().len(), 2);
        assert!(reporter.contains("VUID-VkBufferCreateInfo-size-00912"));
    }

    #[test]
    fn reserved_descriptor_set_slot() {
        let settings = LayerSettings::parse(
            "gpu_validation = true\ngpu_validation_reserve_binding_slot = true\n",
        )
        .unwrap();
        let (layer, _) = test_layer!(settings);
        assert_eq!(
            layer.max_bound_descriptor_sets(),
            layer.device_info().limits.max_bound_descriptor_sets - 1,
        );

        let (layer, _) = test_layer!();
        assert_eq!(
            layer.max_bound_descriptor_sets(),
            layer.device_info().limits.max_bound_descriptor_sets,
        );
    }

    #[test]
    fn destroying_a_secondary_invalidates_its_primary() {
        let (layer, reporter) = test_layer!();
        let (primary, secondary) = crate::tests::primary_and_secondary(&layer);

        layer.record_free_command_buffers(&[secondary]);

        let primary = layer.registry().command_buffers.get(primary).unwrap();
        assert_eq!(
            primary.record_state(),
            CommandBufferRecordState::InvalidComplete,
        );
        assert_eq!(
            primary.broken_bindings()[0].object,
            TypedHandle::new(secondary),
        );
        assert!(reporter.diagnostics().is_empty());
    }
}
