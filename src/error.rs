use peg::error::ParseError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Error as IOError;
use std::path::PathBuf;

#[derive(Debug)]
pub enum AnalyzerError {
    Lexer {
        line: usize,
        error: LexerError,
    },
    Parser {
        line: usize,
        error: ParseError<usize>,
    },
    OutputNotADirectory {
        path: PathBuf,
    },
    // wrapped errors
    IOError(IOError),
}

impl Error for AnalyzerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AnalyzerError::Lexer { error, .. } => Some(error),
            AnalyzerError::Parser { error, .. } => Some(error),
            AnalyzerError::IOError(error) => Some(error),
            _ => None,
        }
    }
}

impl Display for AnalyzerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let description = match self {
            AnalyzerError::Lexer { line, error } => {
                format!("Analyzer could not tokenize trace line {line}: {error}")
            }
            AnalyzerError::Parser { line, error } => {
                format!(
                    "Analyzer could not parse trace line {line}: expected {} at token {}",
                    error.expected, error.location
                )
            }
            AnalyzerError::OutputNotADirectory { path } => {
                format!("The given output path '{}' is not a directory", path.display())
            }
            AnalyzerError::IOError(error) => {
                format!(
                    "Analyzer encountered an error while performing I/O operations: {}",
                    error
                )
            }
        };

        write!(f, "{}", description)
    }
}

impl From<IOError> for AnalyzerError {
    fn from(error: IOError) -> Self {
        AnalyzerError::IOError(error)
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
pub enum LexerError {
    #[default]
    UnsupportedCharacter,
}

impl Display for LexerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LexerError::UnsupportedCharacter => {
                write!(f, "Logos encountered an unsupported character")
            }
        }
    }
}

impl Error for LexerError {}
