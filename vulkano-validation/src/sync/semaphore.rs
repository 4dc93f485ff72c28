//! A semaphore orders one submission after another, possibly across queues.

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
    /// The handle type used to import or export a semaphore payload.
    ExternalSemaphoreHandleType = ExternalSemaphoreHandleTypeFlags(u32);

    OpaqueFd = OPAQUE_FD,
    OpaqueWin32 = OPAQUE_WIN32,
    OpaqueWin32Kmt = OPAQUE_WIN32_KMT,
    D3D12Fence = D3D12_FENCE,

    /// Has copy transference: exporting unsignals the semaphore.
    SyncFd = SYNC_FD,
}

vulkan_bitflags! {
    /// A mask of multiple external semaphore handle types.
    ExternalSemaphoreHandleTypes = ExternalSemaphoreHandleTypeFlags(u32);

    OPAQUE_FD = OPAQUE_FD,
    OPAQUE_WIN32 = OPAQUE_WIN32,
    OPAQUE_WIN32_KMT = OPAQUE_WIN32_KMT,
    D3D12_FENCE = D3D12_FENCE,
    SYNC_FD = SYNC_FD,
}

impl From<ExternalSemaphoreHandleType> for ExternalSemaphoreHandleTypes {
    #[inline]
    fn from(val: ExternalSemaphoreHandleType) -> Self {
        Self(val as u32)
    }
}

vulkan_bitflags! {
    /// Additional parameters for a semaphore payload import.
    SemaphoreImportFlags = SemaphoreImportFlags(u32);

    TEMPORARY = TEMPORARY,
}

/// Parameters of a semaphore.
#[derive(Clone, Debug, Default)]
pub struct SemaphoreCreateInfo {
    pub export_handle_types: ExternalSemaphoreHandleTypes,
}

#[derive(Debug, Default)]
struct SemaphoreInner {
    scope: SyncScope,
    signaled: bool,
    signaler: Option<(vk::Queue, u64)>,
}

/// State of a `VkSemaphore`.
#[derive(Debug)]
pub struct SemaphoreState {
    base: ObjectBase,
    pub create_info: SemaphoreCreateInfo,
    inner: Mutex<SemaphoreInner>,
}

impl_state_object!(SemaphoreState, vk::Semaphore);

impl SemaphoreState {
    pub(crate) fn new(semaphore: vk::Semaphore, create_info: SemaphoreCreateInfo) -> Self {
        SemaphoreState {
            base: ObjectBase::new(TypedHandle::new(semaphore)),
            create_info,
            inner: Mutex::default(),
        }
    }

    #[inline]
    pub fn scope(&self) -> SyncScope {
        self.inner.lock().scope
    }

    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.inner.lock().signaled
    }

    /// The queue and sequence number of the submission that signals the semaphore, if it is
    /// signaled by a queue.
    #[inline]
    pub fn signaler(&self) -> Option<(vk::Queue, u64)> {
        self.inner.lock().signaler
    }

    /// Checks that a pending signal operation will not signal an already signaled semaphore.
    pub(crate) fn validate_signal(
        &self,
        vuids: &'static [&'static str],
    ) -> Result<(), Box<ValidationError>> {
        let inner = self.inner.lock();

        if inner.scope == SyncScope::Internal && inner.signaled {
            return Err(Box::new(ValidationError {
                problem: "the semaphore is signaled again, but it has not been waited on since \
                    it was last signaled"
                    .into(),
                vuids,
                kind: ErrorKind::Synchronization,
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        Ok(())
    }

    /// Checks that a wait operation has a signal operation to wait for.
    pub(crate) fn validate_wait(&self) -> Result<(), Box<ValidationError>> {
        let inner = self.inner.lock();

        if inner.scope == SyncScope::Internal && !inner.signaled {
            return Err(Box::new(ValidationError {
                problem: "the semaphore is waited on, but it has no way to be signaled".into(),
                vuids: &["UNASSIGNED-CoreValidation-DrawState-QueueForwardProgress"],
                kind: ErrorKind::Synchronization,
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        Ok(())
    }

    pub(crate) fn signal(&self, signaler: Option<(vk::Queue, u64)>) {
        let mut inner = self.inner.lock();

        if inner.scope == SyncScope::Internal {
            inner.signaled = true;
            inner.signaler = signaler;
        }
    }

    /// Consumes the pending signal. Returns the submission that signaled it, so that the waiter
    /// can retire it later.
    pub(crate) fn wait(&self) -> Option<(vk::Queue, u64)> {
        let mut inner = self.inner.lock();

        match inner.scope {
            SyncScope::Internal => {
                inner.signaled = false;
                inner.signaler.take()
            }
            SyncScope::ExternalTemporary => {
                inner.scope = SyncScope::Internal;
                inner.signaled = false;
                inner.signaler = None;
                None
            }
            SyncScope::ExternalPermanent => None,
        }
    }

    pub(crate) fn import(
        &self,
        handle_type: ExternalSemaphoreHandleType,
        flags: SemaphoreImportFlags,
    ) {
        let mut inner = self.inner.lock();

        if inner.scope == SyncScope::ExternalPermanent {
            return;
        }

        inner.scope = if handle_type == ExternalSemaphoreHandleType::SyncFd
            || flags.intersects(SemaphoreImportFlags::TEMPORARY)
        {
            SyncScope::ExternalTemporary
        } else {
            SyncScope::ExternalPermanent
        };
        inner.signaler = None;
    }

    pub(crate) fn validate_export(
        &self,
        handle_type: ExternalSemaphoreHandleType,
    ) -> Result<(), Box<ValidationError>> {
        if !self
            .create_info
            .export_handle_types
            .contains(handle_type.into())
        {
            return Err(Box::new(ValidationError {
                context: "handle_type".into(),
                problem: format!(
                    "{:?} was not one of the export handle types the semaphore was created with",
                    handle_type,
                )
                .into(),
                vuids: &["VUID-VkSemaphoreGetFdInfoKHR-handleType-01132"],
                kind: ErrorKind::MissingPrerequisite,
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        if handle_type == ExternalSemaphoreHandleType::SyncFd {
            let inner = self.inner.lock();

            if inner.scope == SyncScope::Internal && !inner.signaled {
                return Err(Box::new(ValidationError {
                    context: "handle_type".into(),
                    problem: "is `SyncFd`, but the semaphore is neither signaled nor has a \
                        pending signal operation"
                        .into(),
                    vuids: &["VUID-VkSemaphoreGetFdInfoKHR-handleType-03254"],
                    kind: ErrorKind::Synchronization,
                    objects: [self.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }
        }

        Ok(())
    }

    pub(crate) fn export(&self, handle_type: ExternalSemaphoreHandleType) {
        let mut inner = self.inner.lock();

        if handle_type == ExternalSemaphoreHandleType::SyncFd {
            // Copy transference has the side effect of a wait.
            inner.signaled = false;
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

    fn semaphore() -> SemaphoreState {
        SemaphoreState::new(
            vk::Semaphore::from_raw(1),
            SemaphoreCreateInfo {
                export_handle_types: ExternalSemaphoreHandleTypes::SYNC_FD,
            },
        )
    }

    #[test]
    fn signal_then_wait() {
        let semaphore = semaphore();
        assert!(semaphore.validate_wait().is_err());

        let signaler = (vk::Queue::from_raw(3), 7);
        semaphore.signal(Some(signaler));
        assert!(semaphore
            .validate_signal(&["VUID-vkQueueSubmit-pSignalSemaphores-00067"])
            .is_err());
        semaphore.validate_wait().unwrap();

        assert_eq!(semaphore.wait(), Some(signaler));
        assert!(!semaphore.is_signaled());
    }

    #[test]
    fn temporary_import_reverts_on_wait() {
        let semaphore = semaphore();
        semaphore.import(
            ExternalSemaphoreHandleType::OpaqueFd,
            SemaphoreImportFlags::TEMPORARY,
        );
        assert_eq!(semaphore.scope(), SyncScope::ExternalTemporary);
        semaphore.validate_wait().unwrap();

        assert_eq!(semaphore.wait(), None);
        assert_eq!(semaphore.scope(), SyncScope::Internal);
    }

    #[test]
    fn export() {
        let semaphore = semaphore();
        assert!(semaphore
            .validate_export(ExternalSemaphoreHandleType::OpaqueFd)
            .is_err());
        assert!(semaphore
            .validate_export(ExternalSemaphoreHandleType::SyncFd)
            .is_err());

        semaphore.signal(None);
        semaphore
            .validate_export(ExternalSemaphoreHandleType::SyncFd)
            .unwrap();
        semaphore.export(ExternalSemaphoreHandleType::SyncFd);
        assert!(!semaphore.is_signaled());
    }
}
