use crate::arguments::Arguments;
use crate::error::AnalyzerError;
use crate::types::{DataRace, Statistic};
use chrono::Local;
use log::info;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Renders one finding. Deadlock chains come through the same channel
/// with line 0.
pub fn format_race(race: &DataRace, csv: bool) -> String {
    if csv {
        format!(
            "{},{},{},{}",
            race.thread_1, race.thread_2, race.resource, race.position
        )
    } else {
        format!(
            "T{} <--> T{}, Resource: [{}], Line: {}",
            race.thread_1, race.thread_2, race.resource, race.position
        )
    }
}

pub fn format_statistic(statistic: &Statistic, csv: bool) -> String {
    if csv {
        format!("{},{}", statistic.key, statistic.value)
    } else {
        format!("{}: {}", statistic.key, statistic.value)
    }
}

/// Emits the findings of one detector pass to the console and, when an
/// output directory was given, to a result file plus a statistics file.
///
/// # Arguments
///
/// * `arguments`: the command line arguments controlling format and targets
/// * `detector_name`: name of the detector the findings belong to
/// * `races`: the reported races and deadlock chains, in report order
/// * `statistics`: the detector's counters
///
/// returns: Result<(), AnalyzerError> unit, or the first I/O failure
///
pub fn write_reports(
    arguments: &Arguments,
    detector_name: &str,
    races: &[DataRace],
    statistics: &[Statistic],
) -> Result<(), AnalyzerError> {
    if !arguments.no_console {
        for race in races {
            println!("{}", format_race(race, arguments.csv));
        }
    }

    if arguments.verbose {
        for statistic in statistics {
            info!("{}", format_statistic(statistic, false));
        }
    }

    let Some(directory) = &arguments.output else {
        return Ok(());
    };

    if !directory.is_dir() {
        return Err(AnalyzerError::OutputNotADirectory {
            path: directory.clone(),
        });
    }

    let race_path = output_path(directory, detector_name, "", arguments);
    let mut race_file = File::create(race_path)?;
    for race in races {
        writeln!(race_file, "{}", format_race(race, arguments.csv))?;
    }

    let statistic_path = output_path(directory, detector_name, "STATS_", arguments);
    let mut statistic_file = File::create(statistic_path)?;
    for statistic in statistics {
        writeln!(statistic_file, "{}", format_statistic(statistic, arguments.csv))?;
    }

    Ok(())
}

fn output_path(directory: &Path, detector_name: &str, infix: &str, arguments: &Arguments) -> PathBuf {
    let trace_name = Path::new(&arguments.input)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("trace");

    let mut file_name = format!("{detector_name}_{infix}{trace_name}");
    if arguments.timestamp {
        file_name.push('_');
        file_name.push_str(&Local::now().format("%d-%m-%Y_%H-%M-%S").to_string());
    }
    file_name.push_str(if arguments.csv { ".csv" } else { ".txt" });

    directory.join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn race() -> DataRace {
        DataRace {
            resource: 4,
            position: 17,
            thread_1: 2,
            thread_2: 1,
        }
    }

    #[test]
    fn format_race_for_the_console() {
        // arrange / act / assert
        assert_eq!(format_race(&race(), false), "T2 <--> T1, Resource: [4], Line: 17");
    }

    #[test]
    fn format_race_as_csv() {
        // arrange / act / assert
        assert_eq!(format_race(&race(), true), "2,1,4,17");
    }

    #[test]
    fn format_statistic_in_both_layouts() {
        // arrange
        let statistic = Statistic {
            key: "reads",
            value: 12,
        };

        // act / assert
        assert_eq!(format_statistic(&statistic, false), "reads: 12");
        assert_eq!(format_statistic(&statistic, true), "reads,12");
    }

    #[test]
    fn name_output_files_after_detector_and_trace() {
        // arrange
        let arguments = Arguments::new("traces/app.trace", false, false);

        // act
        let race_path = output_path(Path::new("out"), "PWR", "", &arguments);
        let statistic_path = output_path(Path::new("out"), "PWR", "STATS_", &arguments);

        // assert
        assert_eq!(race_path, PathBuf::from("out/PWR_app.trace.txt"));
        assert_eq!(statistic_path, PathBuf::from("out/PWR_STATS_app.trace.txt"));
    }
}
