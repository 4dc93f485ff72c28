//! Queues and the submissions pending on them.
//!
//! Every submission to a queue gets the next sequence number of that queue. A submission stays
//! pending until the layer can prove it has completed: a fence it signals was waited on, a
//! later submission on another queue waited on one of its semaphores and was itself proven
//! complete, or the queue or device was waited idle. Proving completion *retires* the
//! submission, which releases everything it kept in use.

use crate::{
    handle::TypedHandle,
    memory::SparseBinding,
    query::{QueryMap, QueryObject, QueryState},
    registry::{impl_state_object, ObjectBase},
    sync::PipelineStages,
};
use ash::vk;
use foldhash::HashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A wait on a semaphore, together with the submission that will signal it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemaphoreWait {
    pub semaphore: vk::Semaphore,

    /// The queue and sequence number of the signaling submission, if it is known.
    pub signaler: Option<(vk::Queue, u64)>,

    /// The payload was imported, so its signal operation is outside the device.
    pub external: bool,
}

/// One batch of `vkQueueSubmit`.
#[derive(Clone, Debug, Default)]
pub struct SubmitInfo {
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub signal_semaphores: Vec<vk::Semaphore>,
}

/// One batch of `vkQueueBindSparse`.
#[derive(Clone, Debug, Default)]
pub struct BindSparseInfo {
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub buffer_binds: Vec<(vk::Buffer, Vec<SparseBinding>)>,
    pub image_opaque_binds: Vec<(vk::Image, Vec<SparseBinding>)>,
    pub signal_semaphores: Vec<vk::Semaphore>,
}

/// One batch of work submitted to a queue.
#[derive(Clone, Debug, Default)]
pub struct Submission {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub waits: Vec<SemaphoreWait>,
    pub signals: Vec<vk::Semaphore>,

    /// Semaphores signaled by this submission whose payload is external.
    pub external_signals: Vec<vk::Semaphore>,
    pub fence: Option<vk::Fence>,

    /// Objects whose use count was incremented for this submission.
    pub(crate) in_use: Vec<TypedHandle>,

    /// Events set or reset by this submission.
    pub(crate) event_writes: Vec<vk::Event>,

    /// Event stage masks as left by this submission, in order.
    pub(crate) event_stages: Vec<(vk::Event, PipelineStages)>,

    /// Query states as left by this submission, in order.
    pub(crate) query_updates: Vec<(QueryObject, QueryState)>,
}

#[derive(Debug, Default)]
struct QueueInner {
    /// The sequence number of the last retired submission.
    seq: u64,
    submissions: VecDeque<Submission>,

    /// Event stage masks as seen by work submitted to this queue.
    event_stages: HashMap<vk::Event, PipelineStages>,

    /// Query states as seen by work submitted to this queue.
    query_states: QueryMap,
}

/// State of a `VkQueue`.
#[derive(Debug)]
pub struct QueueState {
    base: ObjectBase,
    pub queue_family_index: u32,
    pub queue_index: u32,
    inner: Mutex<QueueInner>,
}

impl_state_object!(QueueState, vk::Queue);

impl QueueInner {
    fn apply_overlays(&mut self, submission: &Submission) {
        for &(event, stages) in &submission.event_stages {
            self.event_stages.insert(event, stages);
        }

        for &(query, state) in &submission.query_updates {
            self.query_states.insert(query, state);
        }
    }

    /// Rebuilds the overlays from the submissions that are still pending.
    fn rebuild_overlays(&mut self) {
        let mut overlays = QueueInner::default();

        for submission in &self.submissions {
            overlays.apply_overlays(submission);
        }

        self.event_stages = overlays.event_stages;
        self.query_states = overlays.query_states;
    }
}

impl QueueState {
    pub(crate) fn new(queue: vk::Queue, queue_family_index: u32, queue_index: u32) -> Self {
        QueueState {
            base: ObjectBase::new(TypedHandle::new(queue)),
            queue_family_index,
            queue_index,
            inner: Mutex::default(),
        }
    }

    /// The sequence number of the last retired submission.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.inner.lock().seq
    }

    /// The number of submissions that have not been retired.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.inner.lock().submissions.len()
    }

    /// The sequence number of the last submission, retired or not.
    #[inline]
    pub fn last_seq(&self) -> u64 {
        let inner = self.inner.lock();
        inner.seq + inner.submissions.len() as u64
    }

    /// Returns a copy of the submission with sequence number `seq`, if it is pending.
    pub fn submission(&self, seq: u64) -> Option<Submission> {
        let inner = self.inner.lock();
        let index = seq.checked_sub(inner.seq + 1)?;
        inner.submissions.get(index as usize).cloned()
    }

    /// Appends a submission and returns its sequence number.
    pub(crate) fn push(&self, submission: Submission) -> u64 {
        let mut inner = self.inner.lock();
        inner.apply_overlays(&submission);
        inner.submissions.push_back(submission);

        inner.seq + inner.submissions.len() as u64
    }

    /// Removes and returns the pending submissions up to and including `target_seq`, each with
    /// its sequence number. Returns nothing if they have already been retired.
    pub(crate) fn pop_until(&self, target_seq: u64) -> Vec<(u64, Submission)> {
        let mut inner = self.inner.lock();
        let mut result = Vec::new();

        while inner.seq < target_seq {
            let Some(submission) = inner.submissions.pop_front() else {
                break;
            };
            inner.seq += 1;
            result.push((inner.seq, submission));
        }

        if !result.is_empty() {
            inner.rebuild_overlays();
        }

        result
    }

    /// The stage mask of `event` as seen by work submitted to this queue, if a pending
    /// submission sets it.
    pub fn event_stage_mask(&self, event: vk::Event) -> Option<PipelineStages> {
        self.inner.lock().event_stages.get(&event).copied()
    }

    /// The state of `query` as seen by work submitted to this queue, if a pending submission
    /// changes it.
    pub fn query_state(&self, query: &QueryObject) -> Option<QueryState> {
        self.inner.lock().query_states.get(query).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Handle;

    #[test]
    fn sequence_numbers() {
        let queue = QueueState::new(vk::Queue::from_raw(1), 0, 0);
        assert_eq!(queue.push(Submission::default()), 1);
        assert_eq!(queue.push(Submission::default()), 2);
        assert_eq!(queue.push(Submission::default()), 3);
        assert_eq!(queue.last_seq(), 3);

        let retired = queue.pop_until(2);
        assert_eq!(
            retired.iter().map(|&(seq, _)| seq).collect::<Vec<_>>(),
            vec![1, 2],
        );
        assert_eq!(queue.seq(), 2);
        assert_eq!(queue.pending_count(), 1);
        assert!(queue.submission(2).is_none());
        assert!(queue.submission(3).is_some());
    }

    #[test]
    fn retiring_twice_is_harmless() {
        let queue = QueueState::new(vk::Queue::from_raw(1), 0, 0);
        queue.push(Submission::default());
        queue.push(Submission::default());

        assert_eq!(queue.pop_until(1).len(), 1);
        assert!(queue.pop_until(1).is_empty());
        assert_eq!(queue.seq(), 1);

        // Retiring past the end stops at the last submission.
        assert_eq!(queue.pop_until(10).len(), 1);
        assert_eq!(queue.seq(), 2);
    }

    #[test]
    fn overlays() {
        let queue = QueueState::new(vk::Queue::from_raw(1), 0, 0);
        let event = vk::Event::from_raw(4);
        let query = QueryObject::new(vk::QueryPool::from_raw(2), 0);

        queue.push(Submission {
            event_stages: vec![(event, PipelineStages::TRANSFER)],
            query_updates: vec![(query, QueryState::Ended)],
            ..Default::default()
        });
        assert_eq!(queue.event_stage_mask(event), Some(PipelineStages::TRANSFER));
        assert_eq!(queue.query_state(&query), Some(QueryState::Ended));

        queue.pop_until(1);
        assert_eq!(queue.event_stage_mask(event), None);
        assert_eq!(queue.query_state(&query), None);
    }

    #[test]
    fn partial_retirement_keeps_pending_overlays_only() {
        let queue = QueueState::new(vk::Queue::from_raw(1), 0, 0);
        let event = vk::Event::from_raw(4);
        let first = QueryObject::new(vk::QueryPool::from_raw(2), 0);
        let second = QueryObject::new(vk::QueryPool::from_raw(2), 1);

        queue.push(Submission {
            event_stages: vec![(event, PipelineStages::TRANSFER)],
            query_updates: vec![(first, QueryState::Ended), (second, QueryState::Reset)],
            ..Default::default()
        });
        queue.push(Submission {
            query_updates: vec![(second, QueryState::Running)],
            ..Default::default()
        });
        assert_eq!(queue.query_state(&second), Some(QueryState::Running));

        assert_eq!(queue.pop_until(1).len(), 1);
        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.event_stage_mask(event), None);
        assert_eq!(queue.query_state(&first), None);
        assert_eq!(queue.query_state(&second), Some(QueryState::Running));

        queue.pop_until(2);
        assert_eq!(queue.query_state(&second), None);
    }
}
