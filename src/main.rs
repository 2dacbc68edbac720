use arguments::{Arguments, DetectorKind};
use clap::Parser;
use lockframe::{Detector, LockFrame};
use log::{error, info, LevelFilter};
use pwr::{PwrDetector, PwrOptions};
use pwrundead::{PwrUndeadDetector, PwrUndeadOptions};
use simple_logger::SimpleLogger;
use std::time::Instant;
use undead::UndeadDetector;

mod arguments;
mod error;
mod lexer;
mod lockframe;
mod parser;
mod pwr;
mod pwrundead;
mod reader;
mod report;
mod types;
mod undead;
mod vectorclock;

fn main() {
    let arguments = Arguments::parse();

    let level = if arguments.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    SimpleLogger::new().with_level(level).init().unwrap();

    for &detector_kind in &arguments.detectors {
        info!(
            "beginning analysis of '{}' using {}",
            arguments.input,
            detector_kind.name()
        );

        let mut frame = LockFrame::new(build_detector(detector_kind, &arguments));
        let start = Instant::now();

        let lines = match reader::replay_trace(&arguments, &mut frame) {
            Ok(lines) => lines,
            Err(analyzer_error) => {
                error!("{analyzer_error}");
                std::process::exit(1);
            }
        };
        let parse_time = start.elapsed();

        let races = frame.get_races().to_vec();

        if let Err(analyzer_error) =
            report::write_reports(&arguments, detector_kind.name(), &races, frame.statistics())
        {
            error!("{analyzer_error}");
            std::process::exit(1);
        }

        info!("parsed {} lines in {}ms", lines, parse_time.as_millis());
        info!("found {} races", races.len());
    }
}

fn build_detector(kind: DetectorKind, arguments: &Arguments) -> Box<dyn Detector> {
    match kind {
        DetectorKind::Pwr => Box::new(PwrDetector::new(PwrOptions {
            history_limit: arguments.history_limit,
            ..PwrOptions::default()
        })),
        DetectorKind::Undead => Box::new(UndeadDetector::new()),
        DetectorKind::PwrUndead => Box::new(PwrUndeadDetector::new(PwrUndeadOptions {
            clock_limit: arguments.clock_limit,
            extra_edges: arguments.extra_edges,
            history_limit: arguments.history_limit,
        })),
    }
}
