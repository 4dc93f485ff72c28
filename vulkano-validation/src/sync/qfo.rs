//! Queue family ownership transfers.
//!
//! A resource with exclusive sharing moves from one queue family to another with a pair of
//! barriers: a *release* recorded on the source family and an *acquire* recorded on the
//! destination family. Both barriers must describe the same transfer. Releases are posted to a
//! device-wide scoreboard when their command buffer is submitted, and each acquire must find its
//! release there when its own command buffer is submitted.

use super::{is_special_queue_family, AccessFlags, BufferMemoryBarrier, ImageMemoryBarrier};
use crate::{
    handle::TypedHandle,
    image::{ImageLayout, ImageSubresourceRange},
    report::Severity,
    DeviceSize, ErrorKind, ValidationError,
};
use ash::vk;
use foldhash::{HashMap, HashSet};
use parking_lot::Mutex;

/// The resource a transfer applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QfoResource {
    Image {
        image: vk::Image,
        subresource_range: ImageSubresourceRange,
    },
    Buffer {
        buffer: vk::Buffer,
        offset: DeviceSize,
        size: DeviceSize,
    },
}

impl QfoResource {
    #[inline]
    pub fn typed_handle(&self) -> TypedHandle {
        match *self {
            QfoResource::Image { image, .. } => TypedHandle::new(image),
            QfoResource::Buffer { buffer, .. } => TypedHandle::new(buffer),
        }
    }

    fn vuids(&self) -> &'static QfoVuids {
        match self {
            QfoResource::Image { .. } => &IMAGE_VUIDS,
            QfoResource::Buffer { .. } => &BUFFER_VUIDS,
        }
    }
}

struct QfoVuids {
    duplicate_in_command_buffer: &'static [&'static str],
    duplicate_release: &'static [&'static str],
    duplicate_acquire: &'static [&'static str],
    missing_release: &'static [&'static str],
    wrong_queue_family: &'static [&'static str],
    queue_family_out_of_range: &'static [&'static str],
}

static IMAGE_VUIDS: QfoVuids = QfoVuids {
    duplicate_in_command_buffer: &["UNASSIGNED-VkImageMemoryBarrier-image-00001"],
    duplicate_release: &["UNASSIGNED-VkImageMemoryBarrier-image-00002"],
    duplicate_acquire: &["UNASSIGNED-VkImageMemoryBarrier-image-00003"],
    missing_release: &["UNASSIGNED-VkImageMemoryBarrier-image-00004"],
    wrong_queue_family: &["VUID-VkImageMemoryBarrier-image-04071"],
    queue_family_out_of_range: &["VUID-VkImageMemoryBarrier-image-04069"],
};

static BUFFER_VUIDS: QfoVuids = QfoVuids {
    duplicate_in_command_buffer: &["UNASSIGNED-VkBufferMemoryBarrier-buffer-00001"],
    duplicate_release: &["UNASSIGNED-VkBufferMemoryBarrier-buffer-00002"],
    duplicate_acquire: &["UNASSIGNED-VkBufferMemoryBarrier-buffer-00003"],
    missing_release: &["UNASSIGNED-VkBufferMemoryBarrier-buffer-00004"],
    wrong_queue_family: &["VUID-VkBufferMemoryBarrier-buffer-04088"],
    queue_family_out_of_range: &["VUID-VkBufferMemoryBarrier-buffer-04089"],
};

const MISMATCH_VUIDS: &[&str] = &["UNASSIGNED-CoreValidation-QFOAcquireReleaseMismatch"];
const NEVER_ACQUIRED_VUIDS: &[&str] = &["UNASSIGNED-CoreValidation-QFOReleaseNeverAcquired"];

/// Identifies a transfer: the resource and the two queue families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QfoKey {
    pub resource: QfoResource,
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
}

/// One half of an ownership transfer, as recorded in a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QfoTransfer {
    pub key: QfoKey,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,

    /// Always `Undefined` for buffers.
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
}

impl QfoTransfer {
    pub fn from_image_barrier(barrier: &ImageMemoryBarrier, range: ImageSubresourceRange) -> Self {
        QfoTransfer {
            key: QfoKey {
                resource: QfoResource::Image {
                    image: barrier.image,
                    subresource_range: range,
                },
                src_queue_family_index: barrier.src_queue_family_index,
                dst_queue_family_index: barrier.dst_queue_family_index,
            },
            src_access: barrier.src_access,
            dst_access: barrier.dst_access,
            old_layout: barrier.old_layout,
            new_layout: barrier.new_layout,
        }
    }

    pub fn from_buffer_barrier(barrier: &BufferMemoryBarrier) -> Self {
        QfoTransfer {
            key: QfoKey {
                resource: QfoResource::Buffer {
                    buffer: barrier.buffer,
                    offset: barrier.offset,
                    size: barrier.size,
                },
                src_queue_family_index: barrier.src_queue_family_index,
                dst_queue_family_index: barrier.dst_queue_family_index,
            },
            src_access: barrier.src_access,
            dst_access: barrier.dst_access,
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::Undefined,
        }
    }

    /// Returns a description of the first field where `self` and `other` disagree.
    fn mismatch(&self, other: &QfoTransfer) -> Option<String> {
        if self.src_access != other.src_access {
            Some(format!(
                "src_access {:?} != {:?}",
                self.src_access, other.src_access
            ))
        } else if self.dst_access != other.dst_access {
            Some(format!(
                "dst_access {:?} != {:?}",
                self.dst_access, other.dst_access
            ))
        } else if self.old_layout != other.old_layout {
            Some(format!(
                "old_layout {:?} != {:?}",
                self.old_layout, other.old_layout
            ))
        } else if self.new_layout != other.new_layout {
            Some(format!(
                "new_layout {:?} != {:?}",
                self.new_layout, other.new_layout
            ))
        } else {
            None
        }
    }
}

/// What a barrier does with queue family ownership.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QfoClass {
    NotTransfer,
    Release,
    Acquire,
}

/// Classifies a barrier recorded in a command buffer whose pool belongs to `pool_family`.
pub(crate) fn classify(
    resource: &QfoResource,
    src_queue_family_index: u32,
    dst_queue_family_index: u32,
    exclusive: bool,
    pool_family: u32,
    queue_family_count: u32,
) -> Result<QfoClass, Box<ValidationError>> {
    let vuids = resource.vuids();

    if src_queue_family_index == dst_queue_family_index {
        return Ok(QfoClass::NotTransfer);
    }

    let is_external = |index| {
        index == vk::QUEUE_FAMILY_EXTERNAL || index == vk::QUEUE_FAMILY_FOREIGN_EXT
    };

    // Concurrent resources only transfer to and from outside the device.
    if !exclusive && !is_external(src_queue_family_index) && !is_external(dst_queue_family_index)
    {
        return Ok(QfoClass::NotTransfer);
    }

    if src_queue_family_index == vk::QUEUE_FAMILY_IGNORED
        || dst_queue_family_index == vk::QUEUE_FAMILY_IGNORED
    {
        return Ok(QfoClass::NotTransfer);
    }

    for index in [src_queue_family_index, dst_queue_family_index] {
        if !is_special_queue_family(index) && index >= queue_family_count {
            return Err(Box::new(ValidationError {
                problem: format!(
                    "the barrier uses queue family index {}, but the device has only {} queue \
                    families",
                    index, queue_family_count,
                )
                .into(),
                vuids: vuids.queue_family_out_of_range,
                kind: ErrorKind::ParameterOutOfRange,
                objects: [resource.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }
    }

    if src_queue_family_index == pool_family {
        Ok(QfoClass::Release)
    } else if dst_queue_family_index == pool_family {
        Ok(QfoClass::Acquire)
    } else {
        Err(Box::new(ValidationError {
            problem: format!(
                "the barrier transfers ownership from queue family {} to {}, but the command \
                buffer is recorded for queue family {}",
                src_queue_family_index, dst_queue_family_index, pool_family,
            )
            .into(),
            vuids: vuids.wrong_queue_family,
            objects: [resource.typed_handle()].into_iter().collect(),
            ..Default::default()
        }))
    }
}

/// The transfers recorded in one command buffer.
#[derive(Clone, Debug, Default)]
pub struct QfoTransfers {
    pub releases: Vec<QfoTransfer>,
    pub acquires: Vec<QfoTransfer>,
}

impl QfoTransfers {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.releases.is_empty() && self.acquires.is_empty()
    }

    pub fn clear(&mut self) {
        self.releases.clear();
        self.acquires.clear();
    }

    /// Records a transfer. A transfer that repeats one already recorded in this command buffer
    /// is reported, and not recorded twice.
    pub(crate) fn record(
        &mut self,
        class: QfoClass,
        transfer: QfoTransfer,
    ) -> Result<(), Box<ValidationError>> {
        let list = match class {
            QfoClass::Release => &mut self.releases,
            QfoClass::Acquire => &mut self.acquires,
            QfoClass::NotTransfer => return Ok(()),
        };

        if list.iter().any(|existing| existing.key == transfer.key) {
            return Err(Box::new(ValidationError {
                problem: format!(
                    "the {} of {} from queue family {} to {} is recorded twice in the same \
                    command buffer",
                    if class == QfoClass::Release {
                        "release"
                    } else {
                        "acquire"
                    },
                    transfer.key.resource.typed_handle(),
                    transfer.key.src_queue_family_index,
                    transfer.key.dst_queue_family_index,
                )
                .into(),
                vuids: transfer.key.resource.vuids().duplicate_in_command_buffer,
                kind: ErrorKind::Synchronization,
                severity: Severity::Warning,
                objects: [transfer.key.resource.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        list.push(transfer);

        Ok(())
    }

    /// Appends the transfers of a secondary command buffer.
    pub(crate) fn extend(&mut self, other: &QfoTransfers) {
        for transfer in &other.releases {
            if !self.releases.iter().any(|r| r.key == transfer.key) {
                self.releases.push(*transfer);
            }
        }

        for transfer in &other.acquires {
            if !self.acquires.iter().any(|a| a.key == transfer.key) {
                self.acquires.push(*transfer);
            }
        }
    }
}

/// Transfers made visible by earlier command buffers of the submission being validated.
#[derive(Debug, Default)]
pub(crate) struct PendingQfo {
    releases: HashMap<QfoKey, QfoTransfer>,
    acquired: HashSet<QfoKey>,
}

/// The device-wide record of releases that have been submitted but not yet acquired.
#[derive(Debug, Default)]
pub struct QfoScoreboard {
    releases: Mutex<HashMap<QfoKey, QfoTransfer>>,
}

impl QfoScoreboard {
    /// Returns the number of releases waiting for their acquire.
    pub fn pending_release_count(&self) -> usize {
        self.releases.lock().len()
    }

    /// Checks the transfers of one command buffer being submitted. Command buffers of the same
    /// submission must be validated in order with the same `pending`.
    pub(crate) fn validate_command_buffer(
        &self,
        transfers: &QfoTransfers,
        pending: &mut PendingQfo,
        command_buffer: vk::CommandBuffer,
    ) -> Vec<Box<ValidationError>> {
        let releases = self.releases.lock();
        let mut errors = Vec::new();

        for release in &transfers.releases {
            let key = release.key;

            if (releases.contains_key(&key) && !pending.acquired.contains(&key))
                || pending.releases.contains_key(&key)
            {
                errors.push(Box::new(ValidationError {
                    problem: format!(
                        "{} is released from queue family {} to {}, but an earlier release of \
                        the same transfer has not been acquired yet",
                        key.resource.typed_handle(),
                        key.src_queue_family_index,
                        key.dst_queue_family_index,
                    )
                    .into(),
                    vuids: key.resource.vuids().duplicate_release,
                    kind: ErrorKind::Synchronization,
                    severity: Severity::Warning,
                    objects: [TypedHandle::new(command_buffer), key.resource.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
            }

            pending.releases.insert(key, *release);
        }

        for acquire in &transfers.acquires {
            let key = acquire.key;

            if pending.acquired.contains(&key) {
                errors.push(Box::new(ValidationError {
                    problem: format!(
                        "{} is acquired from queue family {} to {} a second time in the same \
                        submission",
                        key.resource.typed_handle(),
                        key.src_queue_family_index,
                        key.dst_queue_family_index,
                    )
                    .into(),
                    vuids: key.resource.vuids().duplicate_acquire,
                    kind: ErrorKind::Synchronization,
                    severity: Severity::Warning,
                    objects: [TypedHandle::new(command_buffer), key.resource.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
                continue;
            }

            let release = pending
                .releases
                .remove(&key)
                .or_else(|| releases.get(&key).copied());

            match release {
                None => errors.push(Box::new(ValidationError {
                    problem: format!(
                        "{} is acquired from queue family {} to {}, but no matching release has \
                        been submitted",
                        key.resource.typed_handle(),
                        key.src_queue_family_index,
                        key.dst_queue_family_index,
                    )
                    .into(),
                    vuids: key.resource.vuids().missing_release,
                    kind: ErrorKind::Synchronization,
                    objects: [TypedHandle::new(command_buffer), key.resource.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                })),
                Some(release) => {
                    if let Some(mismatch) = release.mismatch(acquire) {
                        errors.push(Box::new(ValidationError {
                            problem: format!(
                                "the acquire of {} from queue family {} to {} does not match \
                                its release ({})",
                                key.resource.typed_handle(),
                                key.src_queue_family_index,
                                key.dst_queue_family_index,
                                mismatch,
                            )
                            .into(),
                            vuids: MISMATCH_VUIDS,
                            kind: ErrorKind::Synchronization,
                            objects: [
                                TypedHandle::new(command_buffer),
                                key.resource.typed_handle(),
                            ]
                            .into_iter()
                            .collect(),
                            ..Default::default()
                        }));
                    }
                }
            }

            pending.acquired.insert(key);
        }

        errors
    }

    /// Posts the releases and retires the acquires of a submitted command buffer.
    pub(crate) fn record_command_buffer(&self, transfers: &QfoTransfers) {
        let mut releases = self.releases.lock();

        for release in &transfers.releases {
            releases.insert(release.key, *release);
        }

        for acquire in &transfers.acquires {
            releases.remove(&acquire.key);
        }
    }

    /// Removes every release of `resource`, and reports the ones that were never acquired.
    pub(crate) fn forget_resource(&self, resource: TypedHandle) -> Vec<Box<ValidationError>> {
        let mut releases = self.releases.lock();
        let mut errors = Vec::new();

        releases.retain(|key, _| {
            if key.resource.typed_handle() != resource {
                return true;
            }

            errors.push(Box::new(ValidationError {
                problem: format!(
                    "{} is destroyed, but its release from queue family {} to {} was never \
                    acquired",
                    resource, key.src_queue_family_index, key.dst_queue_family_index,
                )
                .into(),
                vuids: NEVER_ACQUIRED_VUIDS,
                kind: ErrorKind::Synchronization,
                severity: Severity::Warning,
                objects: [resource].into_iter().collect(),
                ..Default::default()
            }));

            false
        });

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{image::ImageAspects, Handle};

    fn range() -> ImageSubresourceRange {
        ImageSubresourceRange {
            aspects: ImageAspects::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    fn barrier() -> ImageMemoryBarrier {
        ImageMemoryBarrier {
            src_access: AccessFlags::empty(),
            dst_access: AccessFlags::TRANSFER_READ,
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::TransferSrcOptimal,
            src_queue_family_index: 0,
            dst_queue_family_index: 1,
            image: vk::Image::from_raw(5),
            subresource_range: range(),
        }
    }

    #[test]
    fn classification() {
        let b = barrier();
        let resource = QfoTransfer::from_image_barrier(&b, range()).key.resource;

        assert_eq!(classify(&resource, 0, 1, true, 0, 2).unwrap(), QfoClass::Release);
        assert_eq!(classify(&resource, 0, 1, true, 1, 2).unwrap(), QfoClass::Acquire);
        assert_eq!(classify(&resource, 0, 0, true, 0, 2).unwrap(), QfoClass::NotTransfer);
        assert_eq!(classify(&resource, 0, 1, false, 0, 2).unwrap(), QfoClass::NotTransfer);
        assert_eq!(
            classify(&resource, 0, 1, true, 2, 3).unwrap_err().vuid(),
            "VUID-VkImageMemoryBarrier-image-04071",
        );
        assert_eq!(
            classify(&resource, 0, 7, true, 0, 2).unwrap_err().vuid(),
            "VUID-VkImageMemoryBarrier-image-04069",
        );
        assert_eq!(
            classify(&resource, 0, vk::QUEUE_FAMILY_EXTERNAL, false, 0, 2).unwrap(),
            QfoClass::Release,
        );
    }

    #[test]
    fn duplicate_in_command_buffer() {
        let transfer = QfoTransfer::from_image_barrier(&barrier(), range());
        let mut transfers = QfoTransfers::default();

        transfers.record(QfoClass::Release, transfer).unwrap();
        assert_eq!(
            transfers
                .record(QfoClass::Release, transfer)
                .unwrap_err()
                .vuid(),
            "UNASSIGNED-VkImageMemoryBarrier-image-00001",
        );
        assert_eq!(transfers.releases.len(), 1);
    }

    #[test]
    fn release_then_acquire() {
        let scoreboard = QfoScoreboard::default();
        let release = QfoTransfer::from_image_barrier(&barrier(), range());
        let cb_r = vk::CommandBuffer::from_raw(1);
        let cb_a = vk::CommandBuffer::from_raw(2);

        let mut released = QfoTransfers::default();
        released.record(QfoClass::Release, release).unwrap();
        assert!(scoreboard
            .validate_command_buffer(&released, &mut PendingQfo::default(), cb_r)
            .is_empty());
        scoreboard.record_command_buffer(&released);
        assert_eq!(scoreboard.pending_release_count(), 1);

        // Every field of the transfer takes part in the match.
        let mut mutated = release;
        mutated.new_layout = ImageLayout::ColorAttachmentOptimal;
        let mut acquired = QfoTransfers::default();
        acquired.record(QfoClass::Acquire, mutated).unwrap();
        let errors = scoreboard.validate_command_buffer(&acquired, &mut PendingQfo::default(), cb_a);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].vuid(), MISMATCH_VUIDS[0]);

        let mut mutated = release;
        mutated.key.dst_queue_family_index = 2;
        let mut acquired = QfoTransfers::default();
        acquired.record(QfoClass::Acquire, mutated).unwrap();
        let errors = scoreboard.validate_command_buffer(&acquired, &mut PendingQfo::default(), cb_a);
        assert_eq!(errors[0].vuid(), "UNASSIGNED-VkImageMemoryBarrier-image-00004");

        let mut acquired = QfoTransfers::default();
        acquired.record(QfoClass::Acquire, release).unwrap();
        assert!(scoreboard
            .validate_command_buffer(&acquired, &mut PendingQfo::default(), cb_a)
            .is_empty());
        scoreboard.record_command_buffer(&acquired);
        assert_eq!(scoreboard.pending_release_count(), 0);
    }

    #[test]
    fn release_and_acquire_in_one_submission() {
        let scoreboard = QfoScoreboard::default();
        let transfer = QfoTransfer::from_buffer_barrier(&BufferMemoryBarrier {
            src_queue_family_index: 0,
            dst_queue_family_index: 1,
            buffer: vk::Buffer::from_raw(9),
            ..Default::default()
        });

        let mut released = QfoTransfers::default();
        released.record(QfoClass::Release, transfer).unwrap();
        let mut acquired = QfoTransfers::default();
        acquired.record(QfoClass::Acquire, transfer).unwrap();

        let mut pending = PendingQfo::default();
        let cb = vk::CommandBuffer::from_raw(1);
        assert!(scoreboard
            .validate_command_buffer(&released, &mut pending, cb)
            .is_empty());
        assert!(scoreboard
            .validate_command_buffer(&acquired, &mut pending, cb)
            .is_empty());
    }

    #[test]
    fn unmatched_release_on_destroy() {
        let scoreboard = QfoScoreboard::default();
        let transfer = QfoTransfer::from_image_barrier(&barrier(), range());
        let mut released = QfoTransfers::default();
        released.record(QfoClass::Release, transfer).unwrap();
        scoreboard.record_command_buffer(&released);

        let errors = scoreboard.forget_resource(TypedHandle::new(vk::Image::from_raw(5)));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, Severity::Warning);
        assert_eq!(scoreboard.pending_release_count(), 0);
    }
}
