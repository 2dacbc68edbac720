//! PWR race detection.
//!
//! Implements the algorithm from <https://arxiv.org/pdf/2004.06969.pdf>:
//! happens-before tracking through vector clocks, refined with a bounded
//! per-lock history of critical sections that lets a thread synchronize
//! retroactively with releases it only learns about later.

use crate::lockframe::{Detector, ReportBuffer};
use crate::types::{DataRace, Epoch, ResourceId, ThreadId, TracePosition};
use crate::vectorclock::VectorClock;
use log::trace;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Tuning knobs. Shrinking the history bound saves memory but can lose
/// synchronization, which may drop reports; it never invents new ones.
#[derive(Clone, Copy, Debug)]
pub struct PwrOptions {
    /// Capacity of every per-lock critical-section deque, thread-local and
    /// global alike.
    pub history_limit: usize,
    /// Keep the latest record of critical sections that never wrote.
    /// Plain race detection has no use for them; the integrated deadlock
    /// detector inspects them when synthesizing extra dependencies.
    pub record_read_only_sections: bool,
}

impl Default for PwrOptions {
    fn default() -> Self {
        Self {
            history_limit: 5,
            record_read_only_sections: false,
        }
    }
}

/// One finished critical section: the owner's epoch and clock at the
/// acquire, and its clock at the release. Created once per release and
/// shared between every observer deque; never mutated afterwards.
#[derive(Debug)]
pub(crate) struct SectionRecord {
    pub(crate) acquire: Epoch,
    pub(crate) acquire_clock: VectorClock,
    pub(crate) release_clock: VectorClock,
}

type LockHistory = HashMap<ResourceId, VecDeque<Rc<SectionRecord>>>;
type ReadOnlySections = HashMap<ResourceId, Rc<SectionRecord>>;

#[derive(Debug)]
pub(crate) struct PwrThread {
    /// Locks currently held, in acquisition order.
    pub(crate) lockset: Vec<ResourceId>,
    /// H(y): recent critical sections on y, newest first.
    pub(crate) history: LockHistory,
    pub(crate) read_only_sections: ReadOnlySections,
    /// Th(i).
    pub(crate) vector_clock: VectorClock,
    /// Write position this thread last merged for a location, to skip the
    /// merge on every read after the first.
    last_read_merges: HashMap<ResourceId, TracePosition>,
    /// Position of the outstanding acquire per held lock.
    lock_acquired_at: HashMap<ResourceId, TracePosition>,
    last_write_at: Option<TracePosition>,
}

impl PwrThread {
    /// Threads appear lazily; a fresh thread inherits every release that
    /// happened before it was first observed.
    fn new(thread_id: ThreadId, global_history: &LockHistory, global_read_only: &ReadOnlySections) -> Self {
        Self {
            lockset: Vec::new(),
            history: global_history
                .iter()
                .map(|(&lock, records)| (lock, records.clone()))
                .collect(),
            read_only_sections: global_read_only.clone(),
            vector_clock: VectorClock::of_thread(thread_id),
            last_read_merges: HashMap::new(),
            lock_acquired_at: HashMap::new(),
            last_write_at: None,
        }
    }
}

/// One access in the frontier RW(x).
#[derive(Debug)]
struct AccessRecord {
    epoch: Epoch,
    lockset: Vec<ResourceId>,
    is_write: bool,
}

#[derive(Debug, Default)]
pub(crate) struct PwrResource {
    /// RW(x): accesses not yet dominated by every observer.
    accesses: Vec<AccessRecord>,
    /// Acq(y).
    last_acquire: Epoch,
    pub(crate) last_acquire_clock: VectorClock,
    /// L_w(x), L_wt(x), L_wl(x) and the position of the last write.
    last_write_clock: VectorClock,
    last_write_thread: ThreadId,
    last_write_lockset: Vec<ResourceId>,
    last_write_at: Option<TracePosition>,
}

#[derive(Debug, Default)]
struct EventCounters {
    reads: u64,
    writes: u64,
    acquires: u64,
    releases: u64,
    forks: u64,
    joins: u64,
    notifies: u64,
    waits: u64,
}

pub struct PwrDetector {
    options: PwrOptions,
    threads: HashMap<ThreadId, PwrThread>,
    resources: HashMap<ResourceId, PwrResource>,
    notifies: HashMap<ResourceId, VectorClock>,
    global_history: LockHistory,
    global_read_only: ReadOnlySections,
    counters: EventCounters,
}

impl PwrDetector {
    pub fn new(options: PwrOptions) -> Self {
        Self {
            options,
            threads: HashMap::new(),
            resources: HashMap::new(),
            notifies: HashMap::new(),
            global_history: LockHistory::new(),
            global_read_only: ReadOnlySections::new(),
            counters: EventCounters::default(),
        }
    }

    pub(crate) fn thread(&self, thread_id: ThreadId) -> Option<&PwrThread> {
        self.threads.get(&thread_id)
    }

    pub(crate) fn resource(&self, resource_id: ResourceId) -> Option<&PwrResource> {
        self.resources.get(&resource_id)
    }

    pub(crate) fn report_statistics(&self, reports: &mut ReportBuffer) {
        reports.report_statistic("reads", self.counters.reads);
        reports.report_statistic("writes", self.counters.writes);
        reports.report_statistic("acquires", self.counters.acquires);
        reports.report_statistic("releases", self.counters.releases);
        reports.report_statistic("forks", self.counters.forks);
        reports.report_statistic("joins", self.counters.joins);
        reports.report_statistic("notifies", self.counters.notifies);
        reports.report_statistic("waits", self.counters.waits);
        reports.report_statistic("threads", self.threads.len() as u64);
        reports.report_statistic("resources", self.resources.len() as u64);
    }
}

fn thread_entry<'a>(
    threads: &'a mut HashMap<ThreadId, PwrThread>,
    global_history: &LockHistory,
    global_read_only: &ReadOnlySections,
    thread_id: ThreadId,
) -> &'a mut PwrThread {
    threads
        .entry(thread_id)
        .or_insert_with(|| PwrThread::new(thread_id, global_history, global_read_only))
}

/// W3 in the paper (the algorithm was still called WCP-w3po back then):
/// walk the history of every held lock and absorb releases the thread has
/// already looked into.
fn history_sync(thread: &mut PwrThread) {
    let PwrThread {
        lockset,
        history,
        vector_clock,
        ..
    } = thread;

    for lock in lockset.iter() {
        let Some(records) = history.get_mut(lock) else {
            continue;
        };

        let mut index = 0;
        while index < records.len() {
            let record = &records[index];
            let releaser = record.acquire.thread_id;
            let observed = vector_clock.get(releaser);

            if record.release_clock.get(releaser) <= observed {
                // Dominated, nothing left to learn from it.
                records.remove(index);
            } else if record.acquire.value < observed {
                // The thread saw into the critical section, so the whole
                // release ordering transfers.
                vector_clock.merge_into(&record.release_clock);
                records.remove(index);
            } else {
                index += 1;
            }
        }
    }
}

fn locksets_overlap(lockset_1: &[ResourceId], lockset_2: &[ResourceId]) -> bool {
    lockset_1.iter().any(|lock| lockset_2.contains(lock))
}

/// Race check against the frontier: the stored epoch must still be
/// unobserved, at least one of the two accesses must be a write, and no
/// common lock may protect the pair.
fn report_conflicts(
    reports: &mut ReportBuffer,
    thread_id: ThreadId,
    position: TracePosition,
    resource_id: ResourceId,
    resource: &PwrResource,
    clock: &VectorClock,
    lockset: &[ResourceId],
    is_write: bool,
) {
    for access in &resource.accesses {
        if access.epoch.value > clock.get(access.epoch.thread_id)
            && (is_write || access.is_write)
            && !locksets_overlap(lockset, &access.lockset)
        {
            reports.report_race(DataRace {
                resource: resource_id,
                position,
                thread_1: thread_id,
                thread_2: access.epoch.thread_id,
            });
        }
    }
}

/// RW(x) = { (i#Th(i)[i], LS(i)) } u { (j#k, L) in RW(x) | k > Th(i)[j] }.
/// Dominated write records survive a read so that a later read still gets
/// checked against them.
fn update_access_frontier(
    thread: &PwrThread,
    thread_id: ThreadId,
    resource: &mut PwrResource,
    is_write: bool,
) {
    let clock = &thread.vector_clock;

    resource.accesses.retain(|access| {
        access.epoch.value > clock.get(access.epoch.thread_id) || (!is_write && access.is_write)
    });

    resource.accesses.push(AccessRecord {
        epoch: Epoch {
            thread_id,
            value: clock.get(thread_id),
        },
        lockset: thread.lockset.clone(),
        is_write,
    });
}

fn bounded_push_front(records: &mut VecDeque<Rc<SectionRecord>>, record: Rc<SectionRecord>, limit: usize) {
    if records.len() >= limit {
        records.pop_back();
    }
    records.push_front(record);
}

impl Detector for PwrDetector {
    fn read_event(
        &mut self,
        reports: &mut ReportBuffer,
        thread_id: ThreadId,
        position: TracePosition,
        resource_id: ResourceId,
    ) {
        self.counters.reads += 1;
        let thread = thread_entry(
            &mut self.threads,
            &self.global_history,
            &self.global_read_only,
            thread_id,
        );
        let resource = self.resources.entry(resource_id).or_default();

        if let Some(write_at) = resource.last_write_at {
            let first_read_since_write = thread
                .last_read_merges
                .get(&resource_id)
                .map_or(true, |&merged_at| merged_at < write_at);

            if first_read_since_write {
                thread.last_read_merges.insert(resource_id, write_at);

                // L_w and Th appear swapped in the paper; this is the
                // order that actually finds the write-read pair.
                if resource.last_write_clock.get(resource.last_write_thread)
                    > thread.vector_clock.get(resource.last_write_thread)
                    && !locksets_overlap(&resource.last_write_lockset, &thread.lockset)
                {
                    reports.report_race(DataRace {
                        resource: resource_id,
                        position,
                        thread_1: thread_id,
                        thread_2: resource.last_write_thread,
                    });
                }

                // Th(i) = Th(i) |_| L_w(x)
                thread.vector_clock.merge_into(&resource.last_write_clock);

                history_sync(thread);
            }
        }

        report_conflicts(
            reports,
            thread_id,
            position,
            resource_id,
            resource,
            &thread.vector_clock,
            &thread.lockset,
            false,
        );

        update_access_frontier(thread, thread_id, resource, false);

        thread.vector_clock.increment(thread_id);
        trace!("read T{thread_id} R{resource_id}: {}", thread.vector_clock);
    }

    fn write_event(
        &mut self,
        reports: &mut ReportBuffer,
        thread_id: ThreadId,
        position: TracePosition,
        resource_id: ResourceId,
    ) {
        self.counters.writes += 1;
        let thread = thread_entry(
            &mut self.threads,
            &self.global_history,
            &self.global_read_only,
            thread_id,
        );
        let resource = self.resources.entry(resource_id).or_default();

        history_sync(thread);

        report_conflicts(
            reports,
            thread_id,
            position,
            resource_id,
            resource,
            &thread.vector_clock,
            &thread.lockset,
            true,
        );

        update_access_frontier(thread, thread_id, resource, true);

        resource.last_write_clock = thread.vector_clock.clone();
        resource.last_write_thread = thread_id;
        resource.last_write_lockset = thread.lockset.clone();
        resource.last_write_at = Some(position);
        thread.last_write_at = Some(position);

        thread.vector_clock.increment(thread_id);
        trace!("write T{thread_id} R{resource_id}: {}", thread.vector_clock);
    }

    fn acquire_event(
        &mut self,
        _reports: &mut ReportBuffer,
        thread_id: ThreadId,
        position: TracePosition,
        lock: ResourceId,
    ) {
        self.counters.acquires += 1;
        let thread = thread_entry(
            &mut self.threads,
            &self.global_history,
            &self.global_read_only,
            thread_id,
        );
        let resource = self.resources.entry(lock).or_default();

        history_sync(thread);

        if !thread.lockset.contains(&lock) {
            thread.lockset.push(lock);
        }

        // Acq(y), refreshed even on a re-entrant acquire.
        resource.last_acquire = Epoch {
            thread_id,
            value: thread.vector_clock.get(thread_id),
        };
        resource.last_acquire_clock = thread.vector_clock.clone();
        thread.lock_acquired_at.insert(lock, position);

        thread.vector_clock.increment(thread_id);
        trace!("acquire T{thread_id} R{lock}: {}", thread.vector_clock);
    }

    fn release_event(
        &mut self,
        _reports: &mut ReportBuffer,
        thread_id: ThreadId,
        _position: TracePosition,
        lock: ResourceId,
    ) {
        self.counters.releases += 1;
        let thread = thread_entry(
            &mut self.threads,
            &self.global_history,
            &self.global_read_only,
            thread_id,
        );

        history_sync(thread);

        thread.lockset.retain(|&held| held != lock);

        // A critical section that never wrote creates no ordering any
        // later reader or writer has to respect.
        let wrote_in_section = match (thread.lock_acquired_at.get(&lock), thread.last_write_at) {
            (Some(&acquired_at), Some(wrote_at)) => acquired_at < wrote_at,
            _ => false,
        };

        let release_clock = thread.vector_clock.clone();
        thread.vector_clock.increment(thread_id);
        trace!("release T{thread_id} R{lock}: {}", thread.vector_clock);

        if !wrote_in_section && !self.options.record_read_only_sections {
            return;
        }

        let resource = self.resources.entry(lock).or_default();
        let record = Rc::new(SectionRecord {
            acquire: resource.last_acquire,
            acquire_clock: resource.last_acquire_clock.clone(),
            release_clock,
        });

        // The record goes to every other thread plus the global seed for
        // threads that have not appeared yet. The releasing thread itself
        // never has to synchronize with its own section.
        if wrote_in_section {
            for (&other_id, other) in &mut self.threads {
                if other_id == thread_id {
                    continue;
                }
                bounded_push_front(
                    other.history.entry(lock).or_default(),
                    Rc::clone(&record),
                    self.options.history_limit,
                );
            }
            bounded_push_front(
                self.global_history.entry(lock).or_default(),
                record,
                self.options.history_limit,
            );
        } else {
            for (&other_id, other) in &mut self.threads {
                if other_id == thread_id {
                    continue;
                }
                other.read_only_sections.insert(lock, Rc::clone(&record));
            }
            self.global_read_only.insert(lock, record);
        }
    }

    fn fork_event(
        &mut self,
        _reports: &mut ReportBuffer,
        thread_id: ThreadId,
        _position: TracePosition,
        target: ThreadId,
    ) {
        self.counters.forks += 1;
        let parent = thread_entry(
            &mut self.threads,
            &self.global_history,
            &self.global_read_only,
            thread_id,
        );

        let mut child_clock = parent.vector_clock.clone();
        parent.vector_clock.increment(thread_id);
        child_clock.increment(target);

        let child = thread_entry(
            &mut self.threads,
            &self.global_history,
            &self.global_read_only,
            target,
        );
        // The child restarts from the parent's clock even if some earlier
        // event already materialized it.
        child.vector_clock = child_clock;
    }

    fn join_event(
        &mut self,
        _reports: &mut ReportBuffer,
        thread_id: ThreadId,
        _position: TracePosition,
        target: ThreadId,
    ) {
        self.counters.joins += 1;
        let target_clock = thread_entry(
            &mut self.threads,
            &self.global_history,
            &self.global_read_only,
            target,
        )
        .vector_clock
        .clone();

        let thread = thread_entry(
            &mut self.threads,
            &self.global_history,
            &self.global_read_only,
            thread_id,
        );
        thread.vector_clock.merge_into(&target_clock);
        thread.vector_clock.increment(thread_id);
    }

    fn notify_event(
        &mut self,
        _reports: &mut ReportBuffer,
        thread_id: ThreadId,
        _position: TracePosition,
        condition: ResourceId,
    ) {
        self.counters.notifies += 1;
        let thread = thread_entry(
            &mut self.threads,
            &self.global_history,
            &self.global_read_only,
            thread_id,
        );

        // Publish into the condition clock and absorb prior notifications.
        let condition_clock = self.notifies.entry(condition).or_default();
        condition_clock.merge_into(&thread.vector_clock);
        thread.vector_clock.merge_into(condition_clock);

        thread.vector_clock.increment(thread_id);
    }

    fn wait_event(
        &mut self,
        _reports: &mut ReportBuffer,
        thread_id: ThreadId,
        _position: TracePosition,
        condition: ResourceId,
    ) {
        self.counters.waits += 1;

        // A wait nobody signaled yet synchronizes with nothing.
        let Some(condition_clock) = self.notifies.get_mut(&condition) else {
            return;
        };

        let thread = thread_entry(
            &mut self.threads,
            &self.global_history,
            &self.global_read_only,
            thread_id,
        );
        thread.vector_clock.merge_into(condition_clock);
        thread.vector_clock.increment(thread_id);
        *condition_clock = thread.vector_clock.clone();
    }

    fn finish(&mut self, reports: &mut ReportBuffer) {
        self.report_statistics(reports);
    }
}
