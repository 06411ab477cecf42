use std::collections::HashMap;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use lazy_static::lazy_static;

/// Line and column of a token's first character, 1-based on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub const START: SourceLocation = SourceLocation { line: 1, column: 1 };
}

impl Default for SourceLocation {
    fn default() -> Self {
        SourceLocation::START
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Eof,
    /// Text the lexer consumed but could not turn into a token, kept so
    /// the parser can report it instead of silently resynchronizing.
    Invalid(String),
    Def,
    Extern,
    If,
    Then,
    Else,
    For,
    In,
    Unary,
    Binary,
    Let,
    Identifier(String),
    Number(f64),
    Op(char),
}

lazy_static! {
    static ref KEYWORDS: HashMap<&'static str, Token> = {
        let mut map = HashMap::new();
        map.insert("def", Token::Def);
        map.insert("extern", Token::Extern);
        map.insert("if", Token::If);
        map.insert("then", Token::Then);
        map.insert("else", Token::Else);
        map.insert("for", Token::For);
        map.insert("in", Token::In);
        map.insert("unary", Token::Unary);
        map.insert("binary", Token::Binary);
        map.insert("let", Token::Let);
        map
    };
}

// How a token reads in a diagnostic, e.g. "expected ')' but found 'then'".
impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Eof => write!(f, "end of input"),
            Token::Invalid(text) => write!(f, "invalid token '{text}'"),
            Token::Def => write!(f, "'def'"),
            Token::Extern => write!(f, "'extern'"),
            Token::If => write!(f, "'if'"),
            Token::Then => write!(f, "'then'"),
            Token::Else => write!(f, "'else'"),
            Token::For => write!(f, "'for'"),
            Token::In => write!(f, "'in'"),
            Token::Unary => write!(f, "'unary'"),
            Token::Binary => write!(f, "'binary'"),
            Token::Let => write!(f, "'let'"),
            Token::Identifier(name) => write!(f, "identifier '{name}'"),
            Token::Number(value) => write!(f, "number {value}"),
            Token::Op(op) => write!(f, "'{op}'"),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Character-level scanner over a source string. `next_token` never fails;
/// malformed input comes back as `Token::Invalid` and end of input as
/// `Token::Eof`, which repeats on every call after the first.
#[derive(Debug, Clone)]
pub struct Lexer<'src> {
    chars: Peekable<Chars<'src>>,
    loc: SourceLocation,
}

pub trait Lex {
    fn lex(&self) -> Lexer;
}

impl Lex for str {
    fn lex(&self) -> Lexer {
        Lexer::new(self)
    }
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            chars: source.chars().peekable(),
            loc: SourceLocation::START,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.loc.line += 1;
            self.loc.column = 1;
        } else {
            self.loc.column += 1;
        }
        Some(c)
    }

    pub fn next_token(&mut self) -> (Token, SourceLocation) {
        loop {
            while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
                self.bump();
            }

            let loc = self.loc;
            let Some(&c) = self.chars.peek() else {
                return (Token::Eof, loc);
            };

            if c == '#' {
                // comment runs to end of line; the newline itself is
                // ordinary whitespace on the next pass
                while self.chars.peek().is_some_and(|&c| c != '\n') {
                    self.bump();
                }
                continue;
            }

            let token = if is_ident_start(c) {
                self.identifier()
            } else if c.is_ascii_digit() || c == '.' {
                self.number()
            } else {
                self.bump();
                Token::Op(c)
            };

            return (token, loc);
        }
    }

    fn identifier(&mut self) -> Token {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if !is_ident_continue(c) {
                break;
            }
            text.push(c);
            self.bump();
        }

        match KEYWORDS.get(text.as_str()) {
            Some(keyword) => keyword.clone(),
            None => Token::Identifier(text),
        }
    }

    fn number(&mut self) -> Token {
        let mut text = String::new();
        let mut seen_dot = false;
        while let Some(&c) = self.chars.peek() {
            if c == '.' {
                if seen_dot {
                    // a second dot cannot extend the literal; report what
                    // was consumed and leave the dot for the next token
                    return Token::Invalid(text);
                }
                seen_dot = true;
            } else if !c.is_ascii_digit() {
                break;
            }
            text.push(c);
            self.bump();
        }

        // a letter glued onto a number is not two tokens
        if self.chars.peek().is_some_and(|c| c.is_alphabetic()) {
            return Token::Invalid(text);
        }

        match text.parse::<f64>() {
            Ok(value) => Token::Number(value),
            Err(_) => Token::Invalid(text),
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = (Token, SourceLocation);

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            (Token::Eof, _) => None,
            item => Some(item),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Token::*;

    fn tokens(input: &str) -> Vec<Token> {
        input.lex().map(|(token, _)| token).collect()
    }

    #[test]
    fn lexing_nums() {
        assert_eq!(
            tokens(" 2.3  4.654345   700   0.23423  "),
            vec![
                Number(2.3),
                Number(4.654345),
                Number(700.0),
                Number(0.23423),
            ]
        );

        // a leading dot is a valid literal
        assert_eq!(tokens(".5"), vec![Number(0.5)]);
    }

    #[test]
    fn lexing_identifiers() {
        assert_eq!(
            tokens(" var1   xyz   GLBAL   some_count  $tmp _x"),
            vec![
                Identifier("var1".into()),
                Identifier("xyz".into()),
                Identifier("GLBAL".into()),
                Identifier("some_count".into()),
                Identifier("$tmp".into()),
                Identifier("_x".into()),
            ]
        );
    }

    #[test]
    fn lexing_keywords() {
        assert_eq!(
            tokens("def extern if then else for in unary binary let"),
            vec![Def, Extern, If, Then, Else, For, In, Unary, Binary, Let]
        );

        // keywords embedded in longer identifiers stay identifiers
        assert_eq!(tokens("define"), vec![Identifier("define".into())]);
    }

    #[test]
    fn lexing_operators() {
        assert_eq!(
            tokens("a+b*c < (d, e);"),
            vec![
                Identifier("a".into()),
                Op('+'),
                Identifier("b".into()),
                Op('*'),
                Identifier("c".into()),
                Op('<'),
                Op('('),
                Identifier("d".into()),
                Op(','),
                Identifier("e".into()),
                Op(')'),
                Op(';'),
            ]
        );

        // anything unclassified is an operator char, resolved by the parser
        assert_eq!(tokens("!|:"), vec![Op('!'), Op('|'), Op(':')]);
    }

    #[test]
    fn lexing_broken_numbers() {
        // the second dot ends the literal; ".3" then reads as its own
        assert_eq!(
            tokens("1.2.3"),
            vec![Invalid("1.2".into()), Number(0.3)]
        );
        assert_eq!(
            tokens("7ab"),
            vec![Invalid("7".into()), Identifier("ab".into())]
        );
        // a bare dot parses as neither number nor operator
        assert_eq!(tokens("."), vec![Invalid(".".into())]);
    }

    #[test]
    fn lexing_comments() {
        assert_eq!(
            tokens("# a comment line\n42 # trailing\n# last line"),
            vec![Number(42.0)]
        );
    }

    #[test]
    fn locations_track_lines_and_columns() {
        let mut lexer = "def\n  foo 4".lex();

        let (token, loc) = lexer.next_token();
        assert_eq!(token, Def);
        assert_eq!(loc, SourceLocation { line: 1, column: 1 });

        let (token, loc) = lexer.next_token();
        assert_eq!(token, Identifier("foo".into()));
        assert_eq!(loc, SourceLocation { line: 2, column: 3 });

        let (token, loc) = lexer.next_token();
        assert_eq!(token, Number(4.0));
        assert_eq!(loc, SourceLocation { line: 2, column: 7 });
    }

    #[test]
    fn end_of_input_repeats() {
        let mut lexer = "x".lex();
        assert!(matches!(lexer.next_token(), (Identifier(_), _)));
        assert_eq!(lexer.next_token().0, Eof);
        assert_eq!(lexer.next_token().0, Eof);
    }
}
