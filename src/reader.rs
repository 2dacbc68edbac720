use crate::arguments::Arguments;
use crate::error::AnalyzerError;
use crate::lexer::tokenize_line;
use crate::lockframe::LockFrame;
use crate::parser::{parse_comma_event, parse_std_event, Event, Operation, StdEvent};
use crate::types::{ResourceId, ThreadId, TracePosition};
use log::{debug, info};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};

const PROGRESS_INTERVAL: usize = 1_000_000;

/// Maps the string identifiers of the std layout to dense integers.
/// Threads and resources live in separate namespaces, both 1-based in
/// order of first appearance.
#[derive(Debug, Default)]
struct Interner {
    threads: HashMap<String, ThreadId>,
    resources: HashMap<String, ResourceId>,
}

impl Interner {
    fn thread(&mut self, name: &str) -> ThreadId {
        let next = self.threads.len() as ThreadId + 1;
        *self.threads.entry(name.to_owned()).or_insert(next)
    }

    fn resource(&mut self, name: &str) -> ResourceId {
        let next = self.resources.len() as ResourceId + 1;
        *self.resources.entry(name.to_owned()).or_insert(next)
    }
}

/// Replays a trace file into the frame, event by event in file order.
///
/// # Arguments
///
/// * `arguments`: the command line arguments selecting file and layout
/// * `frame`: the frame holding the detector under analysis
///
/// returns: Result<usize, AnalyzerError> the number of replayed lines, or the first format error
///
pub fn replay_trace(arguments: &Arguments, frame: &mut LockFrame) -> Result<usize, AnalyzerError> {
    let file_handle = File::open(&arguments.input)?;

    // stream content of file to avoid OOM
    let trace_reader = BufReader::new(file_handle);

    let mut interner = Interner::default();
    // signaling thread per barrier, for speedygo traces
    let mut signals: HashMap<ThreadId, ThreadId> = HashMap::new();
    let mut position: TracePosition = 0;

    for line in trace_reader.lines() {
        let line = line?;
        position += 1;

        let tokens = tokenize_line(&line).map_err(|error| AnalyzerError::Lexer {
            line: position,
            error,
        })?;

        let event = if arguments.std_format {
            let std_event = parse_std_event(&tokens).map_err(|error| AnalyzerError::Parser {
                line: position,
                error,
            })?;
            intern_std_event(std_event, &mut interner)
        } else {
            parse_comma_event(&tokens).map_err(|error| AnalyzerError::Parser {
                line: position,
                error,
            })?
        };

        dispatch_event(frame, &mut signals, arguments.speedygo, position, event);

        if arguments.verbose && position % PROGRESS_INTERVAL == 0 {
            info!("parsed line {position}");
        }
    }

    Ok(position)
}

fn intern_std_event(event: StdEvent, interner: &mut Interner) -> Event {
    let thread = interner.thread(event.thread);
    let target = match event.operation {
        Operation::Fork | Operation::Join => interner.thread(event.target),
        _ => interner.resource(event.target),
    };

    debug!(
        "T{thread} {} {} (location {})",
        event.operation, event.target, event.location
    );

    Event {
        thread,
        operation: event.operation,
        target,
    }
}

/// Hands one event to the frame. In speedygo traces the fork/join pair
/// encodes a barrier: the signal is only recorded, and the wait forks the
/// waiting thread from the recorded signaler at the wait's position.
fn dispatch_event(
    frame: &mut LockFrame,
    signals: &mut HashMap<ThreadId, ThreadId>,
    speedygo: bool,
    position: TracePosition,
    event: Event,
) {
    match event.operation {
        Operation::Read => frame.read_event(event.thread, position, event.target),
        Operation::Write => frame.write_event(event.thread, position, event.target),
        Operation::Acquire => frame.acquire_event(event.thread, position, event.target),
        Operation::Release => frame.release_event(event.thread, position, event.target),
        Operation::Fork => {
            if speedygo {
                signals.insert(event.target, event.thread);
            } else {
                frame.fork_event(event.thread, position, event.target);
            }
        }
        Operation::Join => {
            if speedygo {
                if let Some(&signaler) = signals.get(&event.target) {
                    frame.fork_event(signaler, position, event.thread);
                }
            } else {
                frame.join_event(event.thread, position, event.target);
            }
        }
        Operation::Notify => frame.notify_event(event.thread, position, event.target),
        Operation::Wait => frame.wait_event(event.thread, position, event.target),
        // lock requests and atomic accesses carry no ordering here
        Operation::Request | Operation::AtomicRead | Operation::AtomicWrite => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pwr::{PwrDetector, PwrOptions};
    use crate::types::DataRace;
    use crate::undead::UndeadDetector;

    fn pwr_frame() -> LockFrame {
        LockFrame::new(Box::new(PwrDetector::new(PwrOptions::default())))
    }

    #[test]
    fn report_race_from_comma_trace() -> Result<(), AnalyzerError> {
        // arrange
        let arguments = Arguments::new("test/race_unlocked_writes.trace", false, false);
        let mut frame = pwr_frame();

        // act
        let lines = replay_trace(&arguments, &mut frame)?;

        // assert
        assert_eq!(lines, 6);
        assert_eq!(
            frame.get_races(),
            &[DataRace {
                resource: 1,
                position: 5,
                thread_1: 2,
                thread_2: 1
            }]
        );

        Ok(())
    }

    #[test]
    fn report_race_from_std_trace_with_interned_names() -> Result<(), AnalyzerError> {
        // arrange
        let arguments = Arguments::new("test/race_unlocked_writes.std", true, false);
        let mut frame = pwr_frame();

        // act
        replay_trace(&arguments, &mut frame)?;

        // assert: T1/T2 intern to 1/2, V1 is the first interned resource
        assert_eq!(
            frame.get_races(),
            &[DataRace {
                resource: 1,
                position: 5,
                thread_1: 2,
                thread_2: 1
            }]
        );

        Ok(())
    }

    #[test]
    fn report_deadlock_from_inverse_order_trace() -> Result<(), AnalyzerError> {
        // arrange
        let arguments = Arguments::new("test/deadlock_inverse_order.trace", false, false);
        let mut frame = LockFrame::new(Box::new(UndeadDetector::new()));

        // act
        replay_trace(&arguments, &mut frame)?;

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

        Ok(())
    }

    #[test]
    fn rewrite_barrier_pairs_in_speedygo_traces() -> Result<(), AnalyzerError> {
        // arrange
        let arguments = Arguments::new("test/speedygo_barrier.trace", false, true);
        let mut frame = pwr_frame();

        // act: the WT forks the waiting thread from the signaler, with the
        // signaler's clock as of the wait, so the write is ordered
        replay_trace(&arguments, &mut frame)?;

        // assert
        assert!(frame.get_races().is_empty());

        Ok(())
    }

    #[test]
    fn report_race_for_barrier_trace_without_speedygo() -> Result<(), AnalyzerError> {
        // arrange
        let arguments = Arguments::new("test/speedygo_barrier.trace", false, false);
        let mut frame = pwr_frame();

        // act: SIG/WT now mean fork/join of thread 9, whose clock predates
        // the signaler's write
        replay_trace(&arguments, &mut frame)?;

        // assert
        assert_eq!(
            frame.get_races(),
            &[DataRace {
                resource: 1,
                position: 4,
                thread_1: 1,
                thread_2: 2
            }]
        );

        Ok(())
    }

    #[test]
    fn fail_when_a_line_is_truncated() {
        // arrange
        let arguments = Arguments::new("test/malformed_line.trace", false, false);
        let mut frame = pwr_frame();

        // act
        let error = replay_trace(&arguments, &mut frame).unwrap_err();

        // assert
        assert!(matches!(error, AnalyzerError::Parser { line: 2, .. }));
    }

    #[test]
    fn fail_when_the_trace_file_is_missing() {
        // arrange
        let arguments = Arguments::new("test/does_not_exist.trace", false, false);
        let mut frame = pwr_frame();

        // act
        let error = replay_trace(&arguments, &mut frame).unwrap_err();

        // assert
        assert!(matches!(error, AnalyzerError::IOError(_)));
    }
}
