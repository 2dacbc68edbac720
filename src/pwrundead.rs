//! Integrated race and deadlock detection.
//!
//! Wraps a full PWR instance, so data races are reported exactly as the
//! standalone detector would, and tags every recorded lock dependency
//! with the acquiring thread's vector clock. The offline cycle search
//! then discards chains whose links are happens-before ordered: a cycle
//! of ordered acquires cannot block under any interleaving.

use crate::lockframe::{Detector, ReportBuffer};
use crate::pwr::{PwrDetector, PwrOptions};
use crate::types::{DataRace, ResourceId, ThreadId, TracePosition};
use crate::undead::LockSet;
use crate::vectorclock::VectorClock;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::ops::Bound::{Excluded, Unbounded};

#[derive(Clone, Copy, Debug)]
pub struct PwrUndeadOptions {
    /// Capacity of the clock deque kept per (context, lock) dependency.
    pub clock_limit: usize,
    /// Synthesize dependencies from release history after synchronizing
    /// events, catching cycles mediated by a lock not currently held.
    pub extra_edges: bool,
    /// Knobs of the embedded race detector.
    pub history_limit: usize,
}

impl Default for PwrUndeadOptions {
    fn default() -> Self {
        Self {
            clock_limit: 5,
            extra_edges: false,
            history_limit: 5,
        }
    }
}

type DependencyClocks = BTreeMap<LockSet, BTreeMap<ResourceId, VecDeque<VectorClock>>>;

/// A dependency with one of its collected acquire clocks.
struct ClockedDependency<'a> {
    thread_id: ThreadId,
    lock: ResourceId,
    clock: &'a VectorClock,
    held: &'a LockSet,
}

#[derive(Debug, Default)]
struct IntegratedThread {
    lockset: LockSet,
    /// Held locks in acquisition order, each with the clock its lock's
    /// latest acquire was stamped with. Drives the extra-edges scan.
    lockset_acquires: Vec<(ResourceId, VectorClock)>,
    /// (context, lock) -> bounded deque of acquire clocks.
    collected: DependencyClocks,
}

pub struct PwrUndeadDetector {
    options: PwrUndeadOptions,
    pwr: PwrDetector,
    threads: BTreeMap<ThreadId, IntegratedThread>,
}

impl PwrUndeadDetector {
    pub fn new(options: PwrUndeadOptions) -> Self {
        Self {
            options,
            pwr: PwrDetector::new(PwrOptions {
                history_limit: options.history_limit,
                record_read_only_sections: options.extra_edges,
            }),
            threads: BTreeMap::new(),
        }
    }

    /// Scan the PWR history for releases the thread has synchronized past
    /// and turn each into a dependency on that lock. The context is every
    /// currently held lock whose own acquire does not postdate the
    /// record's acquire; since the synchronization could have happened
    /// under any earlier part of that context, each prefix of the
    /// acquisition order is inserted as well.
    fn add_extra_edges(&mut self, thread_id: ThreadId) {
        let Some(pwr_thread) = self.pwr.thread(thread_id) else {
            return;
        };
        let thread = self.threads.entry(thread_id).or_default();
        let current = &pwr_thread.vector_clock;

        for (&lock, records) in &pwr_thread.history {
            for record in records {
                insert_extra_edge(
                    thread,
                    lock,
                    current,
                    &record.acquire_clock,
                    &record.release_clock,
                    self.options.clock_limit,
                );
            }
        }

        for (&lock, record) in &pwr_thread.read_only_sections {
            insert_extra_edge(
                thread,
                lock,
                current,
                &record.acquire_clock,
                &record.release_clock,
                self.options.clock_limit,
            );
        }
    }

    fn find_cycles(&self, reports: &mut ReportBuffer) {
        let mut traversed = HashSet::new();
        let mut chain = Vec::new();

        for (&start_id, thread) in &self.threads {
            if thread.collected.is_empty() {
                continue;
            }

            traversed.insert(start_id);
            for (held, locks) in &thread.collected {
                for (&lock, clocks) in locks {
                    for clock in clocks {
                        chain.push(ClockedDependency {
                            thread_id: start_id,
                            lock,
                            clock,
                            held,
                        });
                        self.depth_first(&mut chain, start_id, &mut traversed, reports);
                        chain.pop();
                    }
                }
            }
        }
    }

    fn depth_first<'a>(
        &'a self,
        chain: &mut Vec<ClockedDependency<'a>>,
        start_id: ThreadId,
        traversed: &mut HashSet<ThreadId>,
        reports: &mut ReportBuffer,
    ) {
        for (&thread_id, thread) in self.threads.range((Excluded(start_id), Unbounded)) {
            if thread.collected.is_empty() || traversed.contains(&thread_id) {
                continue;
            }

            for (held, locks) in &thread.collected {
                for (&lock, clocks) in locks {
                    // The chain conditions do not depend on the clock, so
                    // they are decided once per dependency.
                    let mut cycle_check = None;

                    for clock in clocks {
                        let candidate = ClockedDependency {
                            thread_id,
                            lock,
                            clock,
                            held,
                        };

                        let closes = match cycle_check {
                            Some(closes) => closes,
                            None => {
                                if !extends_chain(chain, &candidate) {
                                    break;
                                }
                                let closes = closes_cycle(chain, &candidate);
                                cycle_check = Some(closes);
                                closes
                            }
                        };

                        if !clocks_unordered(chain, &candidate) {
                            continue;
                        }

                        if closes {
                            reports.report_race(DataRace {
                                resource: candidate.lock,
                                position: 0,
                                thread_1: chain[0].thread_id,
                                thread_2: candidate.thread_id,
                            });
                        } else {
                            traversed.insert(thread_id);
                            chain.push(candidate);
                            self.depth_first(chain, start_id, traversed, reports);
                            chain.pop();
                            traversed.remove(&thread_id);
                        }
                    }
                }
            }
        }
    }
}

fn insert_dependency_clock(
    collected: &mut DependencyClocks,
    context: &LockSet,
    lock: ResourceId,
    clock: VectorClock,
    limit: usize,
) {
    let clocks = collected
        .entry(context.clone())
        .or_default()
        .entry(lock)
        .or_default();

    if clocks.len() >= limit {
        clocks.pop_front();
    }
    clocks.push_back(clock);
}

fn insert_extra_edge(
    thread: &mut IntegratedThread,
    lock: ResourceId,
    current: &VectorClock,
    acquire_clock: &VectorClock,
    release_clock: &VectorClock,
    limit: usize,
) {
    if !release_clock.less_than(current) {
        return;
    }

    let mediators: Vec<ResourceId> = thread
        .lockset_acquires
        .iter()
        .filter(|(held, held_acquire)| *held != lock && !acquire_clock.less_than(held_acquire))
        .map(|(held, _)| *held)
        .collect();

    if mediators.is_empty() {
        return;
    }

    let mut context: LockSet = mediators.iter().copied().collect();
    for index in (0..mediators.len()).rev() {
        insert_dependency_clock(&mut thread.collected, &context, lock, current.clone(), limit);
        context.remove(&mediators[index]);
    }
}

/// LD-1, LD-2 and the distinct-locks rule, exactly as in the plain
/// deadlock detector.
fn extends_chain(chain: &[ClockedDependency], candidate: &ClockedDependency) -> bool {
    for link in chain {
        if link.lock == candidate.lock {
            return false;
        }
        if !link.held.is_disjoint(candidate.held) {
            return false;
        }
    }

    match chain.last() {
        Some(last) => candidate.held.contains(&last.lock),
        None => false,
    }
}

fn closes_cycle(chain: &[ClockedDependency], candidate: &ClockedDependency) -> bool {
    chain[0].held.contains(&candidate.lock)
}

/// LD-4: the candidate's clock must be incomparable with every clock on
/// the chain; an ordered pair means the two acquires cannot block each
/// other.
fn clocks_unordered(chain: &[ClockedDependency], candidate: &ClockedDependency) -> bool {
    chain.iter().all(|link| {
        !link.clock.less_than(candidate.clock) && !candidate.clock.less_than(link.clock)
    })
}

impl Detector for PwrUndeadDetector {
    fn read_event(
        &mut self,
        reports: &mut ReportBuffer,
        thread_id: ThreadId,
        position: TracePosition,
        resource: ResourceId,
    ) {
        self.pwr.read_event(reports, thread_id, position, resource);

        if self.options.extra_edges {
            self.add_extra_edges(thread_id);
        }
    }

    fn write_event(
        &mut self,
        reports: &mut ReportBuffer,
        thread_id: ThreadId,
        position: TracePosition,
        resource: ResourceId,
    ) {
        self.pwr.write_event(reports, thread_id, position, resource);
    }

    fn acquire_event(
        &mut self,
        reports: &mut ReportBuffer,
        thread_id: ThreadId,
        position: TracePosition,
        lock: ResourceId,
    ) {
        self.pwr.acquire_event(reports, thread_id, position, lock);

        let (current_clock, acquire_clock) = match (self.pwr.thread(thread_id), self.pwr.resource(lock)) {
            (Some(pwr_thread), Some(pwr_resource)) => (
                pwr_thread.vector_clock.clone(),
                pwr_resource.last_acquire_clock.clone(),
            ),
            _ => unreachable!("acquire materializes its thread and resource"),
        };

        let thread = self.threads.entry(thread_id).or_default();
        insert_dependency_clock(
            &mut thread.collected,
            &thread.lockset,
            lock,
            current_clock,
            self.options.clock_limit,
        );

        if thread.lockset.insert(lock) {
            thread.lockset_acquires.push((lock, acquire_clock));
        }
    }

    fn release_event(
        &mut self,
        reports: &mut ReportBuffer,
        thread_id: ThreadId,
        position: TracePosition,
        lock: ResourceId,
    ) {
        self.pwr.release_event(reports, thread_id, position, lock);

        let thread = self.threads.entry(thread_id).or_default();
        thread.lockset.remove(&lock);
        if let Some(index) = thread
            .lockset_acquires
            .iter()
            .rposition(|(held, _)| *held == lock)
        {
            thread.lockset_acquires.remove(index);
        }
    }

    fn fork_event(
        &mut self,
        reports: &mut ReportBuffer,
        thread_id: ThreadId,
        position: TracePosition,
        target: ThreadId,
    ) {
        self.pwr.fork_event(reports, thread_id, position, target);
    }

    fn join_event(
        &mut self,
        reports: &mut ReportBuffer,
        thread_id: ThreadId,
        position: TracePosition,
        target: ThreadId,
    ) {
        self.pwr.join_event(reports, thread_id, position, target);

        if self.options.extra_edges {
            self.add_extra_edges(thread_id);
        }
    }

    fn notify_event(
        &mut self,
        reports: &mut ReportBuffer,
        thread_id: ThreadId,
        position: TracePosition,
        condition: ResourceId,
    ) {
        self.pwr.notify_event(reports, thread_id, position, condition);
    }

    fn wait_event(
        &mut self,
        reports: &mut ReportBuffer,
        thread_id: ThreadId,
        position: TracePosition,
        condition: ResourceId,
    ) {
        self.pwr.wait_event(reports, thread_id, position, condition);
    }

    fn finish(&mut self, reports: &mut ReportBuffer) {
        self.pwr.report_statistics(reports);

        let mut dependencies = 0;
        let mut dependency_clocks = 0;
        for thread in self.threads.values() {
            for locks in thread.collected.values() {
                dependencies += locks.len() as u64;
                dependency_clocks += locks.values().map(|clocks| clocks.len() as u64).sum::<u64>();
            }
        }
        reports.report_statistic("dependencies", dependencies);
        reports.report_statistic("dependency clocks", dependency_clocks);

        self.find_cycles(reports);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockframe::LockFrame;

    fn integrated_frame() -> LockFrame {
        LockFrame::new(Box::new(PwrUndeadDetector::new(PwrUndeadOptions::default())))
    }

    fn deadlock(resource: ResourceId, thread_1: ThreadId, thread_2: ThreadId) -> DataRace {
        DataRace {
            resource,
            position: 0,
            thread_1,
            thread_2,
        }
    }

    #[test]
    fn report_inversion_of_concurrent_threads() {
        // arrange
        let mut frame = integrated_frame();

        // act
        frame.acquire_event(1, 1, 1);
        frame.acquire_event(1, 2, 2);
        frame.release_event(1, 3, 2);
        frame.release_event(1, 4, 1);
        frame.acquire_event(2, 5, 2);
        frame.acquire_event(2, 6, 1);
        frame.release_event(2, 7, 1);
        frame.release_event(2, 8, 2);

        // assert
        assert_eq!(frame.get_races(), &[deadlock(1, 1, 2)]);
    }

    #[test]
    fn suppress_inversion_ordered_by_fork() {
        // arrange
        let mut frame = integrated_frame();

        // act: the same inversion, but T2 only exists after T1 is done
        frame.acquire_event(1, 1, 1);
        frame.acquire_event(1, 2, 2);
        frame.release_event(1, 3, 2);
        frame.release_event(1, 4, 1);
        frame.fork_event(1, 5, 2);
        frame.acquire_event(2, 6, 2);
        frame.acquire_event(2, 7, 1);
        frame.release_event(2, 8, 1);
        frame.release_event(2, 9, 2);

        // assert
        assert!(frame.get_races().is_empty());
    }

    #[test]
    fn report_races_like_the_standalone_race_detector() {
        // arrange
        let mut frame = integrated_frame();

        // act
        frame.write_event(1, 1, 1);
        frame.acquire_event(1, 2, 2);
        frame.release_event(1, 3, 2);
        frame.acquire_event(2, 4, 2);
        frame.write_event(2, 5, 1);
        frame.release_event(2, 6, 2);

        // assert
        assert_eq!(
            frame.get_races(),
            &[DataRace {
                resource: 1,
                position: 5,
                thread_1: 2,
                thread_2: 1
            }]
        );
    }

    #[test]
    fn report_race_and_deadlock_of_the_same_trace() {
        // arrange
        let mut frame = integrated_frame();

        // act: unprotected writes to 9 plus a lock-order inversion
        frame.write_event(1, 1, 9);
        frame.acquire_event(1, 2, 1);
        frame.acquire_event(1, 3, 2);
        frame.release_event(1, 4, 2);
        frame.release_event(1, 5, 1);
        frame.write_event(2, 6, 9);
        frame.acquire_event(2, 7, 2);
        frame.acquire_event(2, 8, 1);
        frame.release_event(2, 9, 1);
        frame.release_event(2, 10, 2);

        // assert: the race mid-stream, the cycle at the end
        assert_eq!(
            frame.get_races(),
            &[
                DataRace {
                    resource: 9,
                    position: 6,
                    thread_1: 2,
                    thread_2: 1
                },
                deadlock(1, 1, 2)
            ]
        );
    }

    #[test]
    fn synthesize_dependency_through_joined_history() {
        // arrange: T1 holds lock 1 while joining T2, whose writing
        // critical section on lock 2 it thereby synchronizes past; T3
        // inverts the two locks independently
        let options = PwrUndeadOptions {
            extra_edges: true,
            ..PwrUndeadOptions::default()
        };
        let mut frame = LockFrame::new(Box::new(PwrUndeadDetector::new(options)));

        // act
        frame.acquire_event(1, 1, 1);
        frame.acquire_event(2, 2, 2);
        frame.write_event(2, 3, 9);
        frame.release_event(2, 4, 2);
        frame.join_event(1, 5, 2);
        frame.release_event(1, 6, 1);
        frame.acquire_event(3, 7, 2);
        frame.acquire_event(3, 8, 1);
        frame.release_event(3, 9, 1);
        frame.release_event(3, 10, 2);

        // assert
        assert_eq!(frame.get_races(), &[deadlock(1, 1, 3)]);
    }

    #[test]
    fn keep_quiet_for_joined_history_without_extra_edges() {
        // arrange
        let mut frame = integrated_frame();

        // act: same trace as above
        frame.acquire_event(1, 1, 1);
        frame.acquire_event(2, 2, 2);
        frame.write_event(2, 3, 9);
        frame.release_event(2, 4, 2);
        frame.join_event(1, 5, 2);
        frame.release_event(1, 6, 1);
        frame.acquire_event(3, 7, 2);
        frame.acquire_event(3, 8, 1);
        frame.release_event(3, 9, 1);
        frame.release_event(3, 10, 2);

        // assert
        assert!(frame.get_races().is_empty());
    }

    #[test]
    fn bound_clocks_collected_per_dependency() {
        // arrange
        let mut detector = PwrUndeadDetector::new(PwrUndeadOptions::default());
        let mut reports = ReportBuffer::default();

        // act: the same dependency eight times
        let mut position = 1;
        for _ in 0..8 {
            detector.acquire_event(&mut reports, 1, position, 1);
            detector.release_event(&mut reports, 1, position + 1, 1);
            position += 2;
        }

        // assert
        let clocks = &detector.threads[&1].collected[&LockSet::new()][&1];
        assert_eq!(clocks.len(), 5);
    }
}
