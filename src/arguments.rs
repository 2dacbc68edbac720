use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Which analysis runs over the trace.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    /// Data races through vector clocks with per-lock release histories
    Pwr,
    /// Deadlock potential through lock-dependency cycles
    Undead,
    /// Races plus the clock-filtered lock-dependency cycle search
    PwrUndead,
}

impl DetectorKind {
    /// Name used in log output and result file names.
    pub fn name(self) -> &'static str {
        match self {
            DetectorKind::Pwr => "PWR",
            DetectorKind::Undead => "UNDEAD",
            DetectorKind::PwrUndead => "PWRUNDEAD",
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Arguments {
    /// The filepath to the trace file
    pub input: String,
    /// The detectors to run over the trace, each in its own pass
    #[arg(short, long, value_enum, required = true, num_args = 1..)]
    pub detectors: Vec<DetectorKind>,
    /// Parse the pipe separated std layout instead of the comma layout
    #[arg(long = "std")]
    pub std_format: bool,
    /// Treat fork/join events as barrier signal/wait pairs
    #[arg(long)]
    pub speedygo: bool,
    /// Report parsing progress and statistics
    #[arg(short, long)]
    pub verbose: bool,
    /// Emit results as comma separated values
    #[arg(long)]
    pub csv: bool,
    /// Directory the result files are written to
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Do not print results to the console
    #[arg(long)]
    pub no_console: bool,
    /// Append a timestamp to the result file names
    #[arg(long)]
    pub timestamp: bool,
    /// How many critical sections each per-lock history keeps
    #[arg(long, default_value_t = 5)]
    pub history_limit: usize,
    /// How many vector clocks are kept per lock dependency
    #[arg(long, default_value_t = 5)]
    pub clock_limit: usize,
    /// Derive additional lock dependencies from release histories
    #[arg(long)]
    pub extra_edges: bool,
}

impl Arguments {
    #[allow(dead_code)] // used when running tests
    pub fn new<S: Into<String>>(input: S, std_format: bool, speedygo: bool) -> Self {
        Self {
            input: input.into(),
            detectors: Vec::new(),
            std_format,
            speedygo,
            verbose: false,
            csv: false,
            output: None,
            no_console: true,
            timestamp: false,
            history_limit: 5,
            clock_limit: 5,
            extra_edges: false,
        }
    }
}
