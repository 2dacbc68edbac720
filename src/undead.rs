//! Lock-dependency deadlock detection.
//!
//! The online phase only records, per thread, which lock was acquired
//! under which set of already-held locks. The offline phase searches for
//! chains of such dependencies across distinct threads that close into a
//! cycle: each thread holds a lock the next one wants.

use crate::lockframe::{Detector, ReportBuffer};
use crate::types::{DataRace, ResourceId, ThreadId, TracePosition};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Bound::{Excluded, Unbounded};

pub(crate) type LockSet = BTreeSet<ResourceId>;

/// One recorded acquisition: some thread took `lock` while holding `held`.
struct LockDependency<'a> {
    thread_id: ThreadId,
    lock: ResourceId,
    held: &'a LockSet,
}

#[derive(Debug, Default)]
struct UndeadThread {
    lockset: LockSet,
    /// Held-locks context at acquire time, mapped to every lock that was
    /// acquired under it. Re-acquiring under the same context is
    /// absorbed by the set.
    dependencies: BTreeMap<LockSet, BTreeSet<ResourceId>>,
}

#[derive(Default)]
pub struct UndeadDetector {
    // Ordered so the cycle search visits threads in ascending id order.
    threads: BTreeMap<ThreadId, UndeadThread>,
}

impl UndeadDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_cycles(&self, reports: &mut ReportBuffer) {
        let mut traversed = HashSet::new();
        let mut chain = Vec::new();

        for (&start_id, thread) in &self.threads {
            if thread.dependencies.is_empty() {
                continue;
            }

            traversed.insert(start_id);
            for (held, locks) in &thread.dependencies {
                for &lock in locks {
                    chain.push(LockDependency {
                        thread_id: start_id,
                        lock,
                        held,
                    });
                    self.depth_first(&mut chain, start_id, &mut traversed, reports);
                    chain.pop();
                }
            }
        }
    }

    /// Extends the chain with dependencies of threads above the starting
    /// id, reporting instead of descending once a candidate closes the
    /// cycle. Each chain visits a thread at most once.
    fn depth_first<'a>(
        &'a self,
        chain: &mut Vec<LockDependency<'a>>,
        start_id: ThreadId,
        traversed: &mut HashSet<ThreadId>,
        reports: &mut ReportBuffer,
    ) {
        for (&thread_id, thread) in self.threads.range((Excluded(start_id), Unbounded)) {
            if thread.dependencies.is_empty() || traversed.contains(&thread_id) {
                continue;
            }

            for (held, locks) in &thread.dependencies {
                for &lock in locks {
                    let candidate = LockDependency {
                        thread_id,
                        lock,
                        held,
                    };

                    if !extends_chain(chain, &candidate) {
                        continue;
                    }

                    if closes_cycle(chain, &candidate) {
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

/// LD-1 (all contexts pairwise disjoint), LD-2 (the last link's lock is
/// held by the candidate), and no lock appearing twice in the chain.
fn extends_chain(chain: &[LockDependency], candidate: &LockDependency) -> bool {
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

/// LD-3: the candidate wants a lock the chain's first thread holds.
fn closes_cycle(chain: &[LockDependency], candidate: &LockDependency) -> bool {
    chain[0].held.contains(&candidate.lock)
}

impl Detector for UndeadDetector {
    fn acquire_event(
        &mut self,
        _reports: &mut ReportBuffer,
        thread_id: ThreadId,
        _position: TracePosition,
        lock: ResourceId,
    ) {
        let thread = self.threads.entry(thread_id).or_default();

        thread
            .dependencies
            .entry(thread.lockset.clone())
            .or_default()
            .insert(lock);

        thread.lockset.insert(lock);
    }

    fn release_event(
        &mut self,
        _reports: &mut ReportBuffer,
        thread_id: ThreadId,
        _position: TracePosition,
        lock: ResourceId,
    ) {
        let thread = self.threads.entry(thread_id).or_default();
        thread.lockset.remove(&lock);
    }

    fn finish(&mut self, reports: &mut ReportBuffer) {
        let dependencies = self
            .threads
            .values()
            .flat_map(|thread| thread.dependencies.values())
            .map(|locks| locks.len() as u64)
            .sum();
        reports.report_statistic("threads", self.threads.len() as u64);
        reports.report_statistic("dependencies", dependencies);

        self.find_cycles(reports);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockframe::LockFrame;

    fn undead_frame() -> LockFrame {
        LockFrame::new(Box::new(UndeadDetector::new()))
    }

    #[test]
    fn report_two_thread_lock_order_inversion() {
        // arrange
        let mut frame = undead_frame();

        // act: T1 takes 1 then 2, T2 takes 2 then 1
        frame.acquire_event(1, 1, 1);
        frame.acquire_event(1, 2, 2);
        frame.release_event(1, 3, 2);
        frame.release_event(1, 4, 1);
        frame.acquire_event(2, 5, 2);
        frame.acquire_event(2, 6, 1);
        frame.release_event(2, 7, 1);
        frame.release_event(2, 8, 2);

        // assert
        assert_eq!(
            frame.get_races(),
            &[DataRace {
                resource: 1,
                position: 0,
                thread_1: 1,
                thread_2: 2
            }]
        );
    }

    #[test]
    fn keep_quiet_for_consistent_lock_order() {
        // arrange
        let mut frame = undead_frame();

        // act
        for thread_id in [1, 2] {
            frame.acquire_event(thread_id, 1, 1);
            frame.acquire_event(thread_id, 2, 2);
            frame.release_event(thread_id, 3, 2);
            frame.release_event(thread_id, 4, 1);
        }

        // assert
        assert!(frame.get_races().is_empty());
    }

    #[test]
    fn keep_quiet_when_a_guard_lock_is_held() {
        // arrange
        let mut frame = undead_frame();

        // act: the inversion of 1 and 2 is protected by guard lock 9
        frame.acquire_event(1, 1, 9);
        frame.acquire_event(1, 2, 1);
        frame.acquire_event(1, 3, 2);
        frame.release_event(1, 4, 2);
        frame.release_event(1, 5, 1);
        frame.release_event(1, 6, 9);
        frame.acquire_event(2, 7, 9);
        frame.acquire_event(2, 8, 2);
        frame.acquire_event(2, 9, 1);
        frame.release_event(2, 10, 1);
        frame.release_event(2, 11, 2);
        frame.release_event(2, 12, 9);

        // assert
        assert!(frame.get_races().is_empty());
    }

    #[test]
    fn report_three_thread_cycle() {
        // arrange
        let mut frame = undead_frame();

        // act: 1 -> 2 -> 3 -> 1 across three threads
        frame.acquire_event(1, 1, 1);
        frame.acquire_event(1, 2, 2);
        frame.release_event(1, 3, 2);
        frame.release_event(1, 4, 1);
        frame.acquire_event(2, 5, 2);
        frame.acquire_event(2, 6, 3);
        frame.release_event(2, 7, 3);
        frame.release_event(2, 8, 2);
        frame.acquire_event(3, 9, 3);
        frame.acquire_event(3, 10, 1);
        frame.release_event(3, 11, 1);
        frame.release_event(3, 12, 3);

        // assert
        assert_eq!(
            frame.get_races(),
            &[DataRace {
                resource: 1,
                position: 0,
                thread_1: 1,
                thread_2: 3
            }]
        );
    }

    #[test]
    fn record_repeated_acquisition_context_once() {
        // arrange
        let mut detector = UndeadDetector::new();
        let mut reports = ReportBuffer::default();

        // act: the same dependency twice
        for position in [1, 3] {
            detector.acquire_event(&mut reports, 1, position, 1);
            detector.release_event(&mut reports, 1, position + 1, 1);
        }

        // assert
        let thread = &detector.threads[&1];
        assert_eq!(thread.dependencies.len(), 1);
        assert_eq!(thread.dependencies[&LockSet::new()].len(), 1);
        assert!(thread.lockset.is_empty());
    }
}
