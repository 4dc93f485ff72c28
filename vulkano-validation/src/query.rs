//! Query pools and the state of individual queries.
//!
//! Every query moves through `Unknown → Reset → Running → Ended → Available`. The state recorded
//! in a [`QueryPoolState`] is the one observed by the host, which only changes when submitted work
//! retires. Queues and command buffers keep overlays of pending transitions on top of it.

use crate::{
    handle::TypedHandle,
    macros::{vulkan_bitflags, vulkan_enum},
    registry::{impl_state_object, ObjectBase, StateObject},
    DeviceSize, ErrorKind, ValidationError,
};
use ash::vk;
use foldhash::HashMap;
use parking_lot::Mutex;
use std::{
    hash::{Hash, Hasher},
    ops::Range,
};

vulkan_enum! {
    /// The type of queries in a query pool.
    QueryType = QueryType(i32);

    Occlusion = OCCLUSION,
    PipelineStatistics = PIPELINE_STATISTICS,
    Timestamp = TIMESTAMP,
    TransformFeedbackStream = TRANSFORM_FEEDBACK_STREAM_EXT,
    AccelerationStructureCompactedSize = ACCELERATION_STRUCTURE_COMPACTED_SIZE_KHR,
}

impl QueryType {
    /// Returns whether queries of this type are begun and ended, rather than written once.
    #[inline]
    pub fn is_scoped(self) -> bool {
        matches!(
            self,
            Self::Occlusion | Self::PipelineStatistics | Self::TransformFeedbackStream
        )
    }
}

vulkan_bitflags! {
    /// Flags that control how query results are returned.
    QueryResultFlags = QueryResultFlags(u32);

    /// Results are written as 64-bit values.
    TYPE_64 = TYPE_64,

    /// Wait for results to become available.
    WAIT = WAIT,
    WITH_AVAILABILITY = WITH_AVAILABILITY,
    PARTIAL = PARTIAL,
}

vulkan_bitflags! {
    /// Flags that control how a query is executed.
    QueryControlFlags = QueryControlFlags(u32);

    /// Occlusion queries return exact sample counts.
    PRECISE = PRECISE,
}

/// The state of a single query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum QueryState {
    #[default]
    Unknown,
    Reset,
    Running,
    Ended,
    Available,
}

/// What reading a query would produce, given its state and the result flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryResultType {
    Unknown,
    NoData,
    MaybeNoData,
    SomeData,
    WaitOnReset,
    WaitOnRunning,
}

impl QueryResultType {
    pub fn message(self) -> &'static str {
        match self {
            Self::Unknown => "query may be in an unknown state",
            Self::NoData => "query may return no data",
            Self::MaybeNoData => "query will return no data",
            Self::SomeData => "query will return some data or availability bit",
            Self::WaitOnReset => "waiting on a query that has been reset and not issued yet",
            Self::WaitOnRunning => "waiting on a query that has not ended yet",
        }
    }
}

/// Returns what reading a query in `state` with `flags` would produce.
///
/// Only [`QueryResultType::SomeData`] is a valid outcome.
pub fn get_query_result_type(state: QueryState, flags: QueryResultFlags) -> QueryResultType {
    let partial_or_availability =
        flags.intersects(QueryResultFlags::PARTIAL | QueryResultFlags::WITH_AVAILABILITY);

    match state {
        QueryState::Unknown => QueryResultType::Unknown,
        QueryState::Reset | QueryState::Running => {
            if flags.intersects(QueryResultFlags::WAIT) {
                if state == QueryState::Reset {
                    QueryResultType::WaitOnReset
                } else {
                    QueryResultType::WaitOnRunning
                }
            } else if partial_or_availability {
                QueryResultType::SomeData
            } else {
                QueryResultType::NoData
            }
        }
        QueryState::Ended => {
            if flags.intersects(QueryResultFlags::WAIT) || partial_or_availability {
                QueryResultType::SomeData
            } else {
                QueryResultType::MaybeNoData
            }
        }
        QueryState::Available => QueryResultType::SomeData,
    }
}

/// Identifies one query of a pool. `index` is the stream index of indexed queries and does not
/// take part in equality.
#[derive(Clone, Copy, Debug)]
pub struct QueryObject {
    pub pool: vk::QueryPool,
    pub query: u32,
    pub index: u32,
}

impl QueryObject {
    #[inline]
    pub fn new(pool: vk::QueryPool, query: u32) -> Self {
        Self {
            pool,
            query,
            index: 0,
        }
    }
}

impl PartialEq for QueryObject {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.pool == other.pool && self.query == other.query
    }
}

impl Eq for QueryObject {}

impl Hash for QueryObject {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pool.hash(state);
        self.query.hash(state);
    }
}

/// Pending query states, applied in order on top of the states of the pools.
pub type QueryMap = HashMap<QueryObject, QueryState>;

/// Parameters of a query pool.
#[derive(Clone, Debug)]
pub struct QueryPoolCreateInfo {
    pub query_type: QueryType,
    pub query_count: u32,
    pub pipeline_statistics: vk::QueryPipelineStatisticFlags,
}

impl Default for QueryPoolCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            query_type: QueryType::Occlusion,
            query_count: 0,
            pipeline_statistics: vk::QueryPipelineStatisticFlags::empty(),
        }
    }
}

impl QueryPoolCreateInfo {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.query_count == 0 {
            return Err(Box::new(ValidationError {
                context: "query_count".into(),
                problem: "is zero".into(),
                vuids: &["VUID-VkQueryPoolCreateInfo-queryCount-02763"],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if self.query_type == QueryType::PipelineStatistics && self.pipeline_statistics.is_empty()
        {
            return Err(Box::new(ValidationError {
                context: "pipeline_statistics".into(),
                problem: "is empty, but `query_type` is `QueryType::PipelineStatistics`".into(),
                vuids: &["VUID-VkQueryPoolCreateInfo-queryType-09534"],
                ..Default::default()
            }));
        }

        Ok(())
    }
}

/// State of a `VkQueryPool`.
#[derive(Debug)]
pub struct QueryPoolState {
    base: ObjectBase,
    pub create_info: QueryPoolCreateInfo,
    states: Mutex<Vec<QueryState>>,
}

impl_state_object!(QueryPoolState, vk::QueryPool);

impl QueryPoolState {
    pub(crate) fn new(query_pool: vk::QueryPool, create_info: QueryPoolCreateInfo) -> Self {
        QueryPoolState {
            base: ObjectBase::new(TypedHandle::new(query_pool)),
            states: Mutex::new(vec![QueryState::Unknown; create_info.query_count as usize]),
            create_info,
        }
    }

    #[inline]
    pub fn query_type(&self) -> QueryType {
        self.create_info.query_type
    }

    #[inline]
    pub fn query_count(&self) -> u32 {
        self.create_info.query_count
    }

    /// Returns the host-observed state of `query`.
    pub fn state(&self, query: u32) -> QueryState {
        self.states
            .lock()
            .get(query as usize)
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn set_state(&self, queries: Range<u32>, state: QueryState) {
        let mut states = self.states.lock();
        let end = (queries.end as usize).min(states.len());

        for entry in &mut states[(queries.start as usize).min(end)..end] {
            *entry = state;
        }
    }

    /// Returns the state of `query`, looking at `overlay` first.
    pub fn state_with_overlay(&self, query: u32, overlay: &QueryMap) -> QueryState {
        overlay
            .get(&QueryObject::new(self.handle(), query))
            .copied()
            .unwrap_or_else(|| self.state(query))
    }

    /// Checks that `first_query..first_query + query_count` lies within the pool.
    pub(crate) fn validate_query_range(
        &self,
        first_query: u32,
        query_count: u32,
        first_query_vuids: &'static [&'static str],
        range_vuids: &'static [&'static str],
    ) -> Result<(), Box<ValidationError>> {
        if first_query >= self.query_count() {
            return Err(Box::new(ValidationError {
                context: "first_query".into(),
                problem: format!(
                    "is {}, but the pool has only {} queries",
                    first_query,
                    self.query_count(),
                )
                .into(),
                vuids: first_query_vuids,
                kind: ErrorKind::ParameterOutOfRange,
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        if first_query as u64 + query_count as u64 > self.query_count() as u64 {
            return Err(Box::new(ValidationError {
                context: "first_query + query_count".into(),
                problem: format!(
                    "is {}, which is greater than the number of queries in the pool ({})",
                    first_query as u64 + query_count as u64,
                    self.query_count(),
                )
                .into(),
                vuids: range_vuids,
                kind: ErrorKind::ParameterOutOfRange,
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        Ok(())
    }

    /// Checks a host-side reset of the pool.
    pub(crate) fn validate_host_reset(
        &self,
        first_query: u32,
        query_count: u32,
        host_query_reset: bool,
    ) -> Result<(), Box<ValidationError>> {
        if !host_query_reset {
            return Err(Box::new(ValidationError {
                problem: "the `host_query_reset` feature is not enabled".into(),
                vuids: &["VUID-vkResetQueryPool-None-02665"],
                kind: ErrorKind::MissingPrerequisite,
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        self.validate_query_range(
            first_query,
            query_count,
            &["VUID-vkResetQueryPool-firstQuery-09436"],
            &["VUID-vkResetQueryPool-firstQuery-09437"],
        )
    }

    /// Checks the parameters of a result copy or read. `stride` is the distance between the
    /// results of consecutive queries.
    pub(crate) fn validate_result_parameters(
        &self,
        stride: DeviceSize,
        flags: QueryResultFlags,
        stride_vuids: [&'static [&'static str]; 2],
        partial_vuids: &'static [&'static str],
    ) -> Result<(), Box<ValidationError>> {
        let alignment = if flags.intersects(QueryResultFlags::TYPE_64) {
            8
        } else {
            4
        };

        if stride % alignment != 0 {
            return Err(Box::new(ValidationError {
                context: "stride".into(),
                problem: format!("is not a multiple of {}", alignment).into(),
                vuids: stride_vuids[(alignment == 8) as usize],
                kind: ErrorKind::ParameterOutOfRange,
                ..Default::default()
            }));
        }

        if self.query_type() == QueryType::Timestamp
            && flags.intersects(QueryResultFlags::PARTIAL)
        {
            return Err(Box::new(ValidationError {
                context: "flags".into(),
                problem: "contains `QueryResultFlags::PARTIAL`, but the pool holds timestamp \
                    queries"
                    .into(),
                vuids: partial_vuids,
                objects: [self.typed_handle()].into_iter().collect(),
                ..Default::default()
            }));
        }

        Ok(())
    }

    /// Checks that reading `queries` in their current states with `flags` returns data.
    pub(crate) fn validate_results_available(
        &self,
        queries: Range<u32>,
        flags: QueryResultFlags,
        overlay: &QueryMap,
        vuids: &'static [&'static str],
    ) -> Result<(), Box<ValidationError>> {
        for query in queries {
            let state = self.state_with_overlay(query, overlay);
            let result_type = get_query_result_type(state, flags);

            if result_type != QueryResultType::SomeData {
                return Err(Box::new(ValidationError {
                    problem: format!(
                        "requesting the results of query {} with flags {:?}, but {}",
                        query,
                        flags,
                        result_type.message(),
                    )
                    .into(),
                    vuids,
                    kind: ErrorKind::Synchronization,
                    objects: [self.typed_handle()].into_iter().collect(),
                    ..Default::default()
                }));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Handle;

    #[test]
    fn result_types() {
        let none = QueryResultFlags::empty();
        let wait = QueryResultFlags::WAIT;
        let partial = QueryResultFlags::PARTIAL;
        let availability = QueryResultFlags::WITH_AVAILABILITY;

        assert_eq!(
            get_query_result_type(QueryState::Unknown, wait),
            QueryResultType::Unknown,
        );
        assert_eq!(
            get_query_result_type(QueryState::Reset, wait),
            QueryResultType::WaitOnReset,
        );
        assert_eq!(
            get_query_result_type(QueryState::Running, wait | partial),
            QueryResultType::WaitOnRunning,
        );
        assert_eq!(
            get_query_result_type(QueryState::Reset, availability),
            QueryResultType::SomeData,
        );
        assert_eq!(
            get_query_result_type(QueryState::Running, none),
            QueryResultType::NoData,
        );
        assert_eq!(
            get_query_result_type(QueryState::Ended, none),
            QueryResultType::MaybeNoData,
        );
        assert_eq!(
            get_query_result_type(QueryState::Ended, wait),
            QueryResultType::SomeData,
        );
        assert_eq!(
            get_query_result_type(QueryState::Available, none),
            QueryResultType::SomeData,
        );
    }

    #[test]
    fn query_range_boundary() {
        let pool = QueryPoolState::new(
            vk::QueryPool::from_raw(1),
            QueryPoolCreateInfo {
                query_count: 8,
                ..Default::default()
            },
        );
        let first = &["VUID-vkCmdResetQueryPool-firstQuery-00796"];
        let range = &["VUID-vkCmdResetQueryPool-firstQuery-00797"];

        pool.validate_query_range(4, 4, first, range).unwrap();
        assert_eq!(
            pool.validate_query_range(4, 5, first, range)
                .unwrap_err()
                .vuid(),
            "VUID-vkCmdResetQueryPool-firstQuery-00797",
        );
        assert_eq!(
            pool.validate_query_range(8, 0, first, range)
                .unwrap_err()
                .vuid(),
            "VUID-vkCmdResetQueryPool-firstQuery-00796",
        );
    }

    #[test]
    fn overlay_shadows_pool_state() {
        let pool = QueryPoolState::new(
            vk::QueryPool::from_raw(1),
            QueryPoolCreateInfo {
                query_count: 4,
                ..Default::default()
            },
        );
        pool.set_state(0..4, QueryState::Available);

        let mut overlay = QueryMap::default();
        overlay.insert(QueryObject::new(pool.handle(), 2), QueryState::Reset);

        assert_eq!(pool.state_with_overlay(1, &overlay), QueryState::Available);
        assert_eq!(pool.state_with_overlay(2, &overlay), QueryState::Reset);
        assert!(pool
            .validate_results_available(0..4, QueryResultFlags::empty(), &overlay, &[])
            .is_err());
        pool.validate_results_available(0..2, QueryResultFlags::empty(), &overlay, &[])
            .unwrap();
    }
}
