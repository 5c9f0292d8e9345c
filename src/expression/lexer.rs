/// Expression lexer
///
/// Tokenizes the restricted expression grammar used by conditions and variables.

use crate::expression::ExpressionError;
use std::fmt;

/// Token types for workflow expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Null,
    True,
    False,
    Number(f64),
    String(String),

    // Identifiers
    Identifier(String),

    // Operators
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /
    Percent,  // %
    Eq,       // ==
    Ne,       // !=
    Lt,       // <
    Le,       // <=
    Gt,       // >
    Ge,       // >=
    And,      // &&
    Or,       // ||
    Not,      // !
    Dot,      // .
    Comma,    // ,
    Colon,    // :
    Question, // ?

    // Delimiters
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Null => write!(f, "null"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Number(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "'{}'", s),
            Token::Identifier(s) => write!(f, "{}", s),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Not => write!(f, "!"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Question => write!(f, "?"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Eof => write!(f, "EOF"),
        }
    }
}

/// Lexer over a single expression string
pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
        }
    }

    /// Tokenize the entire input; the last token is always `Eof`
    pub fn tokenize(&mut self) -> Result<Vec<Token>, ExpressionError> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, ExpressionError> {
        self.skip_whitespace();

        let Some((pos, ch)) = self.advance() else {
            return Ok(Token::Eof);
        };

        let token = match ch {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '.' => Token::Dot,
            ',' => Token::Comma,
            ':' => Token::Colon,
            '?' => Token::Question,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '=' if self.eat('=') => Token::Eq,
            '!' if self.eat('=') => Token::Ne,
            '!' => Token::Not,
            '<' if self.eat('=') => Token::Le,
            '<' => Token::Lt,
            '>' if self.eat('=') => Token::Ge,
            '>' => Token::Gt,
            '&' if self.eat('&') => Token::And,
            '|' if self.eat('|') => Token::Or,
            '\'' | '"' => self.read_string(ch, pos)?,
            c if c.is_ascii_digit() => self.read_number(c, pos)?,
            c if c.is_alphabetic() || c == '_' || c == '$' => self.read_identifier(c),
            other => {
                return Err(ExpressionError::Lex {
                    position: pos,
                    message: format!("unexpected character '{}'", other),
                })
            }
        };

        Ok(token)
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        self.chars.next()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    /// Consume the next char if it equals `expected`
    fn eat(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek_char(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    fn read_string(&mut self, quote: char, start: usize) -> Result<Token, ExpressionError> {
        let mut value = String::new();

        loop {
            match self.advance() {
                Some((_, c)) if c == quote => return Ok(Token::String(value)),
                Some((_, '\\')) => match self.advance() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, escaped)) => value.push(escaped),
                    None => break,
                },
                Some((_, c)) => value.push(c),
                None => break,
            }
        }

        Err(ExpressionError::Lex {
            position: start,
            message: "unterminated string literal".to_string(),
        })
    }

    fn read_number(&mut self, first: char, start: usize) -> Result<Token, ExpressionError> {
        let mut text = String::from(first);

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }

        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ExpressionError::Lex {
                position: start,
                message: format!("invalid number '{}'", text),
            })
    }

    fn read_identifier(&mut self, first: char) -> Token {
        let mut name = String::from(first);

        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }

        match name.as_str() {
            "null" => Token::Null,
            "true" => Token::True,
            "false" => Token::False,
            _ => Token::Identifier(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        Lexer::new(input).tokenize().unwrap()
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            lex("a >= 1 && !b"),
            vec![
                Token::Identifier("a".into()),
                Token::Ge,
                Token::Number(1.0),
                Token::And,
                Token::Not,
                Token::Identifier("b".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_with_both_quotes() {
        assert_eq!(lex("'it\\'s'")[0], Token::String("it's".into()));
        assert_eq!(lex("\"ok\"")[0], Token::String("ok".into()));
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("'open").tokenize().unwrap_err();
        assert!(matches!(err, ExpressionError::Lex { position: 0, .. }));
    }

    #[test]
    fn test_single_equals_is_rejected() {
        assert!(Lexer::new("a = 1").tokenize().is_err());
    }
}
