use crate::error::LexerError;
use logos::Logos;

/// One token set for both trace layouts: the comma layout uses the upper
/// case event words with numeric operands, the std layout uses the lower
/// case keywords with prefixed string identifiers.
#[derive(Logos, Debug, Copy, Clone, PartialEq)]
#[logos(skip r"[ \r\t\n\f]+")]
#[logos(error = LexerError)]
pub enum Token<'a> {
    // separators
    #[token("|")]
    Pipe,
    #[token(",")]
    Comma,
    #[token("(")]
    LeftParenthesis,
    #[token(")")]
    RightParenthesis,
    // event keywords
    #[token("RD")]
    #[token("r")]
    Read,
    #[token("WR")]
    #[token("w")]
    Write,
    #[token("LK")]
    #[token("acq")]
    Acquire,
    #[token("UK")]
    #[token("rel")]
    Release,
    #[token("req")]
    Request,
    #[token("SIG")]
    #[token("fork")]
    Fork,
    #[token("WT")]
    #[token("join")]
    Join,
    #[token("NT")]
    Notify,
    #[token("NTWT")]
    CondWait,
    #[token("ARD")]
    AtomicRead,
    #[token("AWR")]
    AtomicWrite,
    // multi char tokens
    #[regex(r"[A-Za-z_][A-Za-z0-9_.\[\]]*", |lex| lex.slice(), priority = 1)]
    Identifier(&'a str),
    #[regex("[0-9]+", |lex| lex.slice().parse().ok())]
    Number(i64),
}

pub fn tokenize_line(line: &str) -> Result<Vec<Token<'_>>, LexerError> {
    Token::lexer(line).collect::<Result<Vec<_>, LexerError>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::read_to_string;

    #[test]
    fn succeed_when_lexing_std_layout() -> Result<(), LexerError> {
        // arrange
        let input = read_to_string("test/valid_trace.std").unwrap();

        // act
        let tokens = tokenize_line(input.trim_end())?;

        // assert: IDENTIFIER PIPE WRITE LEFT_PAREN IDENTIFIER RIGHT_PAREN PIPE NUMBER
        assert_eq!(tokens.len(), 8);
        assert_eq!(tokens[0], Token::Identifier("T6"));
        assert_eq!(tokens[2], Token::Write);
        assert_eq!(tokens[4], Token::Identifier("V4294967298"));
        assert_eq!(tokens[7], Token::Number(59));

        Ok(())
    }

    #[test]
    fn succeed_when_lexing_comma_layout() -> Result<(), LexerError> {
        // arrange
        let input = "1,RD,2";

        // act
        let tokens = tokenize_line(input)?;

        // assert
        assert_eq!(
            tokens,
            vec![
                Token::Number(1),
                Token::Comma,
                Token::Read,
                Token::Comma,
                Token::Number(2)
            ]
        );

        Ok(())
    }

    #[test]
    fn distinguish_notify_from_condition_wait() -> Result<(), LexerError> {
        // arrange / act
        let tokens = tokenize_line("3,NTWT,4")?;

        // assert
        assert_eq!(tokens[2], Token::CondWait);

        Ok(())
    }

    #[test]
    fn fail_when_lexing_invalid_chars() {
        // arrange
        let input = read_to_string("test/unsupported_character.std").unwrap();

        // act
        let error = tokenize_line(input.trim_end()).unwrap_err();

        // assert
        assert_eq!(error, LexerError::UnsupportedCharacter);
    }
}
