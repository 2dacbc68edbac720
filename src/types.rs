//! Identifier and report types shared by the frame and all detectors.

/// Identifier of a thread of the analyzed program.
pub type ThreadId = i64;
/// Identifier of a shared resource: a memory location, a lock or a
/// condition variable, depending on the event kind it appears in.
pub type ResourceId = i64;
/// 1-based index of an event in the trace. Deadlock reports use 0 since
/// a cycle has no single position.
pub type TracePosition = usize;
/// A single vector clock component.
pub type ClockValue = u32;

/// One thread's step counter at some moment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Epoch {
    pub thread_id: ThreadId,
    pub value: ClockValue,
}

/// A reported finding: either a data race on `resource` at `position`, or
/// a deadlock chain (position 0) between the first and last thread of the
/// cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataRace {
    pub resource: ResourceId,
    pub position: TracePosition,
    pub thread_1: ThreadId,
    pub thread_2: ThreadId,
}

/// A counter a detector reports after the analysis finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statistic {
    pub key: &'static str,
    pub value: u64,
}
