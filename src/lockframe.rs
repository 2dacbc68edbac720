use crate::types::{DataRace, ResourceId, Statistic, ThreadId, TracePosition};
use log::debug;

/// Sink the active detector writes its findings into while the trace is
/// replayed. Owned by the frame and handed into every event handler.
#[derive(Debug, Default)]
pub struct ReportBuffer {
    races: Vec<DataRace>,
    statistics: Vec<Statistic>,
}

impl ReportBuffer {
    pub fn report_race(&mut self, race: DataRace) {
        debug!(
            "potential race on resource {} at line {}: T{} <--> T{}",
            race.resource, race.position, race.thread_1, race.thread_2
        );
        self.races.push(race);
    }

    pub fn report_statistic(&mut self, key: &'static str, value: u64) {
        self.statistics.push(Statistic { key, value });
    }

    pub fn races(&self) -> &[DataRace] {
        &self.races
    }

    pub fn statistics(&self) -> &[Statistic] {
        &self.statistics
    }
}

/// Event surface of a detector. Handlers default to no-ops so a detector
/// only implements the events it derives facts from.
pub trait Detector {
    fn read_event(
        &mut self,
        _reports: &mut ReportBuffer,
        _thread_id: ThreadId,
        _position: TracePosition,
        _resource: ResourceId,
    ) {
    }

    fn write_event(
        &mut self,
        _reports: &mut ReportBuffer,
        _thread_id: ThreadId,
        _position: TracePosition,
        _resource: ResourceId,
    ) {
    }

    fn acquire_event(
        &mut self,
        _reports: &mut ReportBuffer,
        _thread_id: ThreadId,
        _position: TracePosition,
        _lock: ResourceId,
    ) {
    }

    fn release_event(
        &mut self,
        _reports: &mut ReportBuffer,
        _thread_id: ThreadId,
        _position: TracePosition,
        _lock: ResourceId,
    ) {
    }

    fn fork_event(
        &mut self,
        _reports: &mut ReportBuffer,
        _thread_id: ThreadId,
        _position: TracePosition,
        _target: ThreadId,
    ) {
    }

    fn join_event(
        &mut self,
        _reports: &mut ReportBuffer,
        _thread_id: ThreadId,
        _position: TracePosition,
        _target: ThreadId,
    ) {
    }

    fn notify_event(
        &mut self,
        _reports: &mut ReportBuffer,
        _thread_id: ThreadId,
        _position: TracePosition,
        _condition: ResourceId,
    ) {
    }

    fn wait_event(
        &mut self,
        _reports: &mut ReportBuffer,
        _thread_id: ThreadId,
        _position: TracePosition,
        _condition: ResourceId,
    ) {
    }

    /// Deferred end-of-trace analysis, e.g. a cycle search over the
    /// collected dependencies. Also the place to report statistics.
    fn finish(&mut self, _reports: &mut ReportBuffer) {}
}

/// Owns the active detector and the report buffer and forwards trace
/// events to the detector in stream order.
pub struct LockFrame {
    detector: Box<dyn Detector>,
    reports: ReportBuffer,
    finished: bool,
}

impl LockFrame {
    pub fn new(detector: Box<dyn Detector>) -> Self {
        Self {
            detector,
            reports: ReportBuffer::default(),
            finished: false,
        }
    }

    pub fn read_event(&mut self, thread_id: ThreadId, position: TracePosition, resource: ResourceId) {
        self.detector
            .read_event(&mut self.reports, thread_id, position, resource);
    }

    pub fn write_event(&mut self, thread_id: ThreadId, position: TracePosition, resource: ResourceId) {
        self.detector
            .write_event(&mut self.reports, thread_id, position, resource);
    }

    pub fn acquire_event(&mut self, thread_id: ThreadId, position: TracePosition, lock: ResourceId) {
        self.detector
            .acquire_event(&mut self.reports, thread_id, position, lock);
    }

    pub fn release_event(&mut self, thread_id: ThreadId, position: TracePosition, lock: ResourceId) {
        self.detector
            .release_event(&mut self.reports, thread_id, position, lock);
    }

    pub fn fork_event(&mut self, thread_id: ThreadId, position: TracePosition, target: ThreadId) {
        self.detector
            .fork_event(&mut self.reports, thread_id, position, target);
    }

    pub fn join_event(&mut self, thread_id: ThreadId, position: TracePosition, target: ThreadId) {
        self.detector
            .join_event(&mut self.reports, thread_id, position, target);
    }

    pub fn notify_event(&mut self, thread_id: ThreadId, position: TracePosition, condition: ResourceId) {
        self.detector
            .notify_event(&mut self.reports, thread_id, position, condition);
    }

    pub fn wait_event(&mut self, thread_id: ThreadId, position: TracePosition, condition: ResourceId) {
        self.detector
            .wait_event(&mut self.reports, thread_id, position, condition);
    }

    /// Runs the detector's deferred analysis once, then returns everything
    /// reported so far in report order.
    pub fn get_races(&mut self) -> &[DataRace] {
        if !self.finished {
            self.finished = true;
            self.detector.finish(&mut self.reports);
        }

        self.reports.races()
    }

    pub fn statistics(&self) -> &[Statistic] {
        self.reports.statistics()
    }
}
