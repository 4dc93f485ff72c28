//! A fence is used to know when a submission has finished executing on the device.

use super::SyncScope;
use crate::{
    handle::TypedHandle,
    macros::{vulkan_bitflags, vulkan_enum},
    registry::{impl_state_object, ObjectBase, StateObject},
    ErrorKind, ValidationError,
};
use ash::vk;
use parking_lot::Mutex;

vulkan_enum! {
    /// The handle type used to import or export a fence payload.
    ExternalFenceHandleType = ExternalFenceHandleTypeFlags(u32);

    OpaqueFd = OPAQUE_FD,
    OpaqueWin32 = OPAQUE_WIN32,
    OpaqueWin32Kmt = OPAQUE_WIN32_KMT,

    /// Has copy transference: exporting resets the fence.
    SyncFd = SYNC_FD,
}

vulkan_bitflags! {
    /// A mask of multiple external fence handle types.
    ExternalFenceHandleTypes = ExternalFenceHandleTypeFlags(u32);

    OPAQUE_FD = OPAQUE_FD,
    OPAQUE_WIN32 = OPAQUE_WIN32,
    OPAQUE_WIN32_KMT = OPAQUE_WIN32_KMT,
    SYNC_FD = SYNC_FD,
}

impl From<ExternalFenceHandleType> for ExternalFenceHandleTypes {
    #[inline]
    fn from(val: ExternalFenceHandleType) -> Self {
        Self(val as u32)
    }
}

vulkan_bitflags! {
    /// Additional parameters for a fence payload import.
    FenceImportFlags = FenceImportFlags(u32);

    /// The payload is imported only temporarily, regardless of the permanence of the handle
    /// type.
    TEMPORARY = TEMPORARY,
}

/// Parameters of a fence.
#[derive(Clone, Debug, Default)]
pub struct FenceCreateInfo {
    /// Whether the fence is created in the signaled state.
    pub signaled: bool,
    pub export_handle_types: ExternalFenceHandleTypes,
}

/// Where a fence is in its life cycle, as far as the layer knows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceStatus {
    Unsignaled,

    /// Submitted, and will be signaled when the signaling submission retires.
    Inflight,

    /// Signaled.
    Retired,
}

#[derive(Debug)]
struct FenceInner {
    scope: SyncScope,
    status: FenceStatus,
    signaler: Option<(vk::Queue, u64)>,
}

/// State of a `VkFence`.
#[derive(Debug)]
pub struct FenceState {
    base: ObjectBase,
    pub create_info: FenceCreateInfo,
    inner: Mutex<FenceInner>,
}

impl_state_object!(FenceState, vk::Fence);

impl FenceState {
    pub(crate) fn new(fence: vk::Fence, create_info: FenceCreateInfo) -> Self {
        FenceState {
            base: ObjectBase::new(TypedHandle::new(fence)),
            inner: Mutex::new(FenceInner {
                scope: SyncScope::Internal,
                status: if create_info.signaled {
                    FenceStatus::Retired
                } else {
                    FenceStatus::Unsignaled
                },
                signaler: None,
            }),
            create_info,
        }
    }

    #[inline]
    pub fn scope(&self) -> SyncScope {
        self.inner.lock().scope
    }

    #[inline]
    pub fn status(&self) -> FenceStatus {
        self.inner.lock().status
    }

    /// The queue and sequence number of the submission that will signal the fence.
    #[inline]
    pub fn signaler(&self) -> Option<(vk::Queue, u64)> {
        self.inner.lock().signaler
    }

    /// Checks that the fence can be handed to an operation that will signal it.
    pub(crate) fn validate_for_submit(
        &self,
        in_use_vuids: &'static [&'static str],
        signaled_vuids: &'static [&'static str],
    ) -> Result<(), Box<ValidationError>> {
        let inner = self.inner.lock();

        if inner.scope != SyncScope::Internal {
            return Ok(());
        }

        match inner.status {
            FenceStatus::Inflight => Err(Box::new(ValidationError {
                context: "fence".into(),
                problem: "is already in use by another submission".into(),
                vuids: in_use_vuids,
                kind: ErrorKind::Synchronization,
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            })),
            FenceStatus::Retired => Err(Box::new(ValidationError {
                context: "fence".into(),
                problem: "is signaled; it must be reset before it is submitted again".into(),
                vuids: signaled_vuids,
                kind: ErrorKind::Synchronization,
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            })),
            FenceStatus::Unsignaled => Ok(()),
        }
    }

    /// Marks the fence as pending on `queue`, to be signaled when `seq` retires.
    pub(crate) fn submit(&self, signaler: Option<(vk::Queue, u64)>) {
        let mut inner = self.inner.lock();

        if inner.scope == SyncScope::Internal {
            inner.status = FenceStatus::Inflight;
            inner.signaler = signaler;
        }
    }

    /// Marks the fence as signaled.
    pub(crate) fn retire(&self) {
        let mut inner = self.inner.lock();

        if inner.scope == SyncScope::Internal && inner.status == FenceStatus::Inflight {
            inner.status = FenceStatus::Retired;
            inner.signaler = None;
        }
    }

    pub(crate) fn validate_reset(&self) -> Result<(), Box<ValidationError>> {
        let inner = self.inner.lock();

        if inner.scope == SyncScope::Internal && inner.status == FenceStatus::Inflight {
            return Err(Box::new(ValidationError {
                problem: "the fence is in use by a submission that has not completed".into(),
                vuids: &["VUID-vkResetFences-pFences-01123"],
                kind: ErrorKind::InUseOnDestroy,
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        Ok(())
    }

    pub(crate) fn reset(&self) {
        let mut inner = self.inner.lock();

        // A reset restores the internal payload after a temporary import.
        if inner.scope == SyncScope::ExternalTemporary {
            inner.scope = SyncScope::Internal;
        }

        if inner.scope == SyncScope::Internal {
            inner.status = FenceStatus::Unsignaled;
            inner.signaler = None;
        }
    }

    pub(crate) fn validate_import(&self) -> Result<(), Box<ValidationError>> {
        let inner = self.inner.lock();

        if inner.scope == SyncScope::Internal && inner.status == FenceStatus::Inflight {
            return Err(Box::new(ValidationError {
                context: "fence".into(),
                problem: "is in use by a submission that has not completed".into(),
                vuids: &["VUID-vkImportFenceFdKHR-fence-01463"],
                kind: ErrorKind::Synchronization,
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        Ok(())
    }

    pub(crate) fn import(&self, handle_type: ExternalFenceHandleType, flags: FenceImportFlags) {
        let mut inner = self.inner.lock();

        if inner.scope == SyncScope::ExternalPermanent {
            return;
        }

        inner.scope = if handle_type == ExternalFenceHandleType::SyncFd
            || flags.intersects(FenceImportFlags::TEMPORARY)
        {
            SyncScope::ExternalTemporary
        } else {
            SyncScope::ExternalPermanent
        };
        inner.signaler = None;
    }

    pub(crate) fn validate_export(
        &self,
        handle_type: ExternalFenceHandleType,
    ) -> Result<(), Box<ValidationError>> {
        if !self
            .create_info
            .export_handle_types
            .contains(handle_type.into())
        {
            return Err(Box::new(ValidationError {
                context: "handle_type".into(),
                problem: format!(
                    "{:?} was not one of the export handle types the fence was created with",
                    handle_type,
                )
                .into(),
                vuids: &["VUID-VkFenceGetFdInfoKHR-handleType-01453"],
                kind: ErrorKind::MissingPrerequisite,
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        Ok(())
    }

    pub(crate) fn export(&self, handle_type: ExternalFenceHandleType) {
        let mut inner = self.inner.lock();

        if handle_type == ExternalFenceHandleType::SyncFd {
            // Copy transference: exporting resets the payload.
            inner.status = FenceStatus::Unsignaled;
            inner.signaler = None;
        } else {
            inner.scope = SyncScope::ExternalPermanent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Handle;

    fn fence(signaled: bool) -> FenceState {
        FenceState::new(
            vk::Fence::from_raw(1),
            FenceCreateInfo {
                signaled,
                export_handle_types: ExternalFenceHandleTypes::OPAQUE_FD
                    | ExternalFenceHandleTypes::SYNC_FD,
            },
        )
    }

    const IN_USE: &[&str] = &["VUID-vkQueueSubmit-fence-00064"];
    const SIGNALED: &[&str] = &["VUID-vkQueueSubmit-fence-00063"];

    #[test]
    fn submit_lifecycle() {
        let fence = fence(false);
        fence.validate_for_submit(IN_USE, SIGNALED).unwrap();

        fence.submit(Some((vk::Queue::from_raw(1), 1)));
        assert_eq!(fence.status(), FenceStatus::Inflight);
        assert_eq!(
            fence
                .validate_for_submit(IN_USE, SIGNALED)
                .unwrap_err()
                .vuid(),
            "VUID-vkQueueSubmit-fence-00064",
        );
        assert!(fence.validate_reset().is_err());

        fence.retire();
        assert_eq!(fence.status(), FenceStatus::Retired);
        assert_eq!(
            fence
                .validate_for_submit(IN_USE, SIGNALED)
                .unwrap_err()
                .vuid(),
            "VUID-vkQueueSubmit-fence-00063",
        );

        fence.reset();
        assert_eq!(fence.status(), FenceStatus::Unsignaled);
    }

    #[test]
    fn created_signaled() {
        assert_eq!(fence(true).status(), FenceStatus::Retired);
    }

    #[test]
    fn external_scopes() {
        let fence = fence(false);
        fence.import(ExternalFenceHandleType::OpaqueFd, FenceImportFlags::TEMPORARY);
        assert_eq!(fence.scope(), SyncScope::ExternalTemporary);

        // External payloads are not tracked.
        fence.submit(Some((vk::Queue::from_raw(1), 1)));
        assert_eq!(fence.status(), FenceStatus::Unsignaled);

        fence.reset();
        assert_eq!(fence.scope(), SyncScope::Internal);

        fence.submit(Some((vk::Queue::from_raw(1), 2)));
        fence.export(ExternalFenceHandleType::SyncFd);
        assert_eq!(fence.scope(), SyncScope::Internal);
        assert_eq!(fence.status(), FenceStatus::Unsignaled);

        fence.export(ExternalFenceHandleType::OpaqueFd);
        assert_eq!(fence.scope(), SyncScope::ExternalPermanent);
    }
}
