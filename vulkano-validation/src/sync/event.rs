//! An event can be signaled by the host or by a queue, and waited on by a queue.

use super::PipelineStages;
use crate::{
    handle::TypedHandle,
    registry::{impl_state_object, ObjectBase, StateObject},
    ErrorKind, ValidationError,
};
use ash::vk;
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct EventInner {
    write_in_use: u32,
    stage_mask: PipelineStages,
}

/// State of a `VkEvent`.
#[derive(Debug)]
pub struct EventState {
    base: ObjectBase,
    inner: Mutex<EventInner>,
}

impl_state_object!(EventState, vk::Event);

impl EventState {
    pub(crate) fn new(event: vk::Event) -> Self {
        EventState {
            base: ObjectBase::new(TypedHandle::new(event)),
            inner: Mutex::default(),
        }
    }

    /// The number of pending submissions that set or reset the event.
    #[inline]
    pub fn write_in_use(&self) -> u32 {
        self.inner.lock().write_in_use
    }

    /// The stages that last signaled the event, or `HOST` if the host did.
    #[inline]
    pub fn stage_mask(&self) -> PipelineStages {
        self.inner.lock().stage_mask
    }

    pub(crate) fn set_stage_mask(&self, stage_mask: PipelineStages) {
        self.inner.lock().stage_mask = stage_mask;
    }

    pub(crate) fn begin_write(&self) {
        self.inner.lock().write_in_use += 1;
    }

    pub(crate) fn end_write(&self) {
        let mut inner = self.inner.lock();
        inner.write_in_use = inner.write_in_use.saturating_sub(1);
    }

    /// Checks that the host may set or reset the event.
    pub(crate) fn validate_host_write(
        &self,
        vuids: &'static [&'static str],
    ) -> Result<(), Box<ValidationError>> {
        if self.write_in_use() != 0 {
            return Err(Box::new(ValidationError {
                problem: "the host writes the event, but it is also written by a pending \
                    submission"
                    .into(),
                vuids,
                kind: ErrorKind::Synchronization,
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        Ok(())
    }
}

/// Checks the source stage mask of a wait on events against the stages that signaled them.
///
/// `signaled_stages` is the union of the stage masks of all waited events. The wait is valid if
/// its stage mask equals that union, optionally with the host stage added.
pub(crate) fn validate_wait_events_stage_mask(
    signaled_stages: PipelineStages,
    src_stages: PipelineStages,
    events: impl IntoIterator<Item = vk::Event>,
) -> Result<(), Box<ValidationError>> {
    if src_stages != signaled_stages && src_stages != (signaled_stages | PipelineStages::HOST) {
        return Err(Box::new(ValidationError {
            context: "src_stages".into(),
            problem: format!(
                "is {:?}, but the waited events were signaled with {:?}; it must equal that mask, \
                optionally with `HOST` added",
                src_stages, signaled_stages,
            )
            .into(),
            vuids: &["VUID-vkCmdWaitEvents-srcStageMask-parameter"],
            kind: ErrorKind::Synchronization,
            objects: events.into_iter().map(TypedHandle::new).collect(),
            ..Default::default()
        }));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Handle;

    #[test]
    fn host_write_conflicts_with_pending_write() {
        let event = EventState::new(vk::Event::from_raw(1));
        event.validate_host_write(&[]).unwrap();

        event.begin_write();
        assert!(event.validate_host_write(&[]).is_err());

        event.end_write();
        event.validate_host_write(&[]).unwrap();
    }

    #[test]
    fn wait_stage_mask() {
        let events = [vk::Event::from_raw(1)];
        let signaled = PipelineStages::TRANSFER | PipelineStages::COMPUTE_SHADER;

        validate_wait_events_stage_mask(signaled, signaled, events).unwrap();
        validate_wait_events_stage_mask(signaled, signaled | PipelineStages::HOST, events)
            .unwrap();

        let err =
            validate_wait_events_stage_mask(signaled, PipelineStages::TRANSFER, events).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Synchronization);
        assert_eq!(err.objects.len(), 1);
    }
}
