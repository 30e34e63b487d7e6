//! Tokenizer for the expression language.

use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Null,
    Let,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Colon,
    Semicolon,
    Dot,
    Pipe,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqualEqual,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    Not,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character.
    pub offset: usize,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    /// Tokenize the whole input. The result always ends with [`TokenKind::Eof`].
    pub fn tokenize(mut self) -> Result<Vec<Token>, ExprError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let Some(&(offset, c)) = self.chars.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    offset: self.source.len(),
                });
                return Ok(tokens);
            };

            let kind = match c {
                '0'..='9' => self.number()?,
                '"' | '\'' => self.string(c)?,
                c if c.is_alphabetic() || c == '_' => self.word(),
                _ => self.punctuation(offset, c)?,
            };
            tokens.push(Token { kind, offset });
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
            } else if c == '#' {
                // Line comment.
                while let Some((_, c)) = self.chars.next() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn next_is(&mut self, expected: char) -> bool {
        if matches!(self.chars.peek(), Some(&(_, c)) if c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn punctuation(&mut self, offset: usize, c: char) -> Result<TokenKind, ExprError> {
        self.chars.next();
        let kind = match c {
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            '.' => TokenKind::Dot,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '|' if self.next_is('|') => TokenKind::Or,
            '|' => TokenKind::Pipe,
            '&' if self.next_is('&') => TokenKind::And,
            '=' if self.next_is('=') => TokenKind::EqualEqual,
            '=' => TokenKind::Assign,
            '!' if self.next_is('=') => TokenKind::NotEqual,
            '!' => TokenKind::Not,
            '<' if self.next_is('=') => TokenKind::LessEqual,
            '<' => TokenKind::Less,
            '>' if self.next_is('=') => TokenKind::GreaterEqual,
            '>' => TokenKind::Greater,
            other => {
                return Err(ExprError::Syntax {
                    offset,
                    message: format!("unexpected character '{other}'"),
                })
            }
        };
        Ok(kind)
    }

    fn number(&mut self) -> Result<TokenKind, ExprError> {
        let start = self.chars.peek().map(|&(i, _)| i).unwrap_or(self.source.len());
        let mut end = start;
        let mut is_float = false;

        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() || c == '_' {
                end = i + 1;
                self.chars.next();
            } else if c == '.' && !is_float && self.digit_follows(i) {
                is_float = true;
                end = i + 1;
                self.chars.next();
            } else {
                break;
            }
        }

        let text: String = self.source[start..end].chars().filter(|c| *c != '_').collect();
        let parsed = if is_float {
            text.parse().map(TokenKind::Float).ok()
        } else {
            text.parse().map(TokenKind::Int).ok()
        };
        parsed.ok_or_else(|| ExprError::Syntax {
            offset: start,
            message: format!("invalid number '{text}'"),
        })
    }

    /// Whether the character after the `.` at `dot` is a digit (`1.5` vs `1.foo`).
    fn digit_follows(&self, dot: usize) -> bool {
        self.source[dot + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    }

    fn string(&mut self, quote: char) -> Result<TokenKind, ExprError> {
        let start = self.chars.next().map(|(i, _)| i).unwrap_or(self.source.len());
        let mut value = String::new();

        while let Some((_, c)) = self.chars.next() {
            match c {
                c if c == quote => return Ok(TokenKind::Str(value)),
                '\\' => match self.chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, other)) => value.push(other),
                    None => break,
                },
                c => value.push(c),
            }
        }

        Err(ExprError::Syntax {
            offset: start,
            message: "unterminated string".to_string(),
        })
    }

    fn word(&mut self) -> TokenKind {
        let mut word = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }

        match word.as_str() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "let" => TokenKind::Let,
            _ => TokenKind::Identifier(word),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
