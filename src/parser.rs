use crate::lexer::Token;
use crate::types::ThreadId;
use peg::error::ParseError;
use peg::parser;
use std::fmt::{Display, Formatter};

parser!(
    pub grammar trace_grammar<'a>() for [Token<'a>] {
        use crate::lexer::Token::*;

        // thread,EVENT,target with numeric identifiers
        pub rule comma_event() -> Event
            = [Number(thread)] [Comma] operation:operation() [Comma] [Number(target)] {
                Event { thread, operation, target }
            }

        // Tid|op(target)|location with string identifiers
        pub rule std_event() -> StdEvent<'a>
            = [Identifier(thread)] [Pipe] operation:operation() [LeftParenthesis] [Identifier(target)] [RightParenthesis] [Pipe] [Number(location)] {
                StdEvent { thread, operation, target, location }
            }

        rule operation() -> Operation
            = [Read] { Operation::Read }
            / [Write] { Operation::Write }
            / [Acquire] { Operation::Acquire }
            / [Request] { Operation::Request }
            / [Release] { Operation::Release }
            / [Fork] { Operation::Fork }
            / [Join] { Operation::Join }
            / [Notify] { Operation::Notify }
            / [CondWait] { Operation::Wait }
            / [AtomicRead] { Operation::AtomicRead }
            / [AtomicWrite] { Operation::AtomicWrite }
    }
);

pub fn parse_comma_event(tokens: &[Token]) -> Result<Event, ParseError<usize>> {
    trace_grammar::comma_event(tokens)
}

pub fn parse_std_event<'a>(tokens: &[Token<'a>]) -> Result<StdEvent<'a>, ParseError<usize>> {
    trace_grammar::std_event(tokens)
}

/// An event with resolved integer identifiers, ready for the frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Event {
    pub thread: ThreadId,
    pub operation: Operation,
    pub target: i64,
}

/// An event of the std layout before its identifiers are interned.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StdEvent<'a> {
    pub thread: &'a str,
    pub operation: Operation,
    pub target: &'a str,
    /// Program location recorded by the instrumentation; only logged.
    pub location: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Acquire,
    Request,
    Release,
    Fork,
    Join,
    Notify,
    Wait,
    AtomicRead,
    AtomicWrite,
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Read => write!(f, "Read"),
            Operation::Write => write!(f, "Write"),
            Operation::Acquire => write!(f, "Acquire"),
            Operation::Request => write!(f, "Request"),
            Operation::Release => write!(f, "Release"),
            Operation::Fork => write!(f, "Fork"),
            Operation::Join => write!(f, "Join"),
            Operation::Notify => write!(f, "Notify"),
            Operation::Wait => write!(f, "Wait"),
            Operation::AtomicRead => write!(f, "AtomicRead"),
            Operation::AtomicWrite => write!(f, "AtomicWrite"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize_line;

    #[test]
    fn succeed_when_parsing_comma_event() {
        // arrange
        let tokens = tokenize_line("2,LK,7").unwrap();

        // act
        let actual_event = parse_comma_event(&tokens).unwrap();
        let expected_event = Event {
            thread: 2,
            operation: Operation::Acquire,
            target: 7,
        };

        // assert
        assert_eq!(actual_event, expected_event);
    }

    #[test]
    fn succeed_when_parsing_std_event() {
        // arrange
        let tokens = tokenize_line("T6|w(V4294967298)|59").unwrap();

        // act
        let actual_event = parse_std_event(&tokens).unwrap();
        let expected_event = StdEvent {
            thread: "T6",
            operation: Operation::Write,
            target: "V4294967298",
            location: 59,
        };

        // assert
        assert_eq!(actual_event, expected_event);
    }

    #[test]
    fn fail_when_parsing_truncated_line() {
        // arrange
        let tokens = tokenize_line("1,RD").unwrap();

        // act
        let error = parse_comma_event(&tokens).unwrap_err();

        // assert
        assert_eq!(error.location, 3);
    }

    #[test]
    fn fail_when_layouts_are_mixed() {
        // arrange: a std line handed to the comma rule
        let tokens = tokenize_line("T1|acq(L1)|10").unwrap();

        // act / assert
        assert!(parse_comma_event(&tokens).is_err());
    }
}
