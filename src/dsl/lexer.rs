// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use super::DslError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    String(String),
    Int(i64),
    Float(f64),
    Ident(String),
    // punctuation / operators
    LParen,
    RParen,
    Comma,
    Question,
    Colon,
    Not,
    Minus,
    Plus,
    Star,
    Slash,
    Percent,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

pub(crate) struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn err(&self, message: impl Into<String>) -> DslError {
        DslError::Syntax {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn string(&mut self, quote: u8) -> Result<Token, DslError> {
        let mut out = Vec::new();
        loop {
            match self.bump() {
                None => return Err(self.err("unterminated string literal")),
                Some(c) if c == quote => break,
                Some(b'\\') => match self.bump() {
                    Some(b'n') => out.push(b'\n'),
                    Some(b't') => out.push(b'\t'),
                    Some(b'r') => out.push(b'\r'),
                    Some(c) => out.push(c),
                    None => return Err(self.err("unterminated escape")),
                },
                Some(c) => out.push(c),
            }
        }
        Ok(Token::String(String::from_utf8_lossy(&out).into_owned()))
    }

    fn number(&mut self, first: u8) -> Result<Token, DslError> {
        let mut text = String::new();
        text.push(first as char);
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c as char);
                self.pos += 1;
            } else if c == b'.' && !is_float {
                // only consume the dot when a digit follows
                if self
                    .input
                    .get(self.pos + 1)
                    .map(|d| d.is_ascii_digit())
                    .unwrap_or(false)
                {
                    is_float = true;
                    text.push('.');
                    self.pos += 1;
                } else {
                    break;
                }
            } else {
                break;
            }
        }
        if is_float {
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| self.err(format!("invalid number {text}")))
        } else {
            text.parse::<i64>()
                .map(Token::Int)
                .map_err(|_| self.err(format!("invalid number {text}")))
        }
    }

    fn ident(&mut self, first: u8) -> Token {
        let mut text = String::new();
        text.push(first as char);
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                text.push(c as char);
                self.pos += 1;
            } else {
                break;
            }
        }
        Token::Ident(text)
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, DslError> {
        let mut tokens = Vec::new();
        while let Some(c) = self.bump() {
            let token = match c {
                b' ' | b'\t' | b'\n' | b'\r' => continue,
                b'\'' | b'"' => self.string(c)?,
                b'0'..=b'9' => self.number(c)?,
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.ident(c),
                b'(' => Token::LParen,
                b')' => Token::RParen,
                b',' => Token::Comma,
                b'?' => Token::Question,
                b':' => Token::Colon,
                b'+' => Token::Plus,
                b'-' => Token::Minus,
                b'*' => Token::Star,
                b'/' => Token::Slash,
                b'%' => Token::Percent,
                b'!' => {
                    if self.peek() == Some(b'=') {
                        self.pos += 1;
                        Token::NotEq
                    } else {
                        Token::Not
                    }
                }
                b'=' => {
                    if self.peek() == Some(b'=') {
                        self.pos += 1;
                        Token::EqEq
                    } else {
                        return Err(self.err("expected =="));
                    }
                }
                b'<' => {
                    if self.peek() == Some(b'=') {
                        self.pos += 1;
                        Token::Le
                    } else {
                        Token::Lt
                    }
                }
                b'>' => {
                    if self.peek() == Some(b'=') {
                        self.pos += 1;
                        Token::Ge
                    } else {
                        Token::Gt
                    }
                }
                b'&' => {
                    if self.peek() == Some(b'&') {
                        self.pos += 1;
                        Token::AndAnd
                    } else {
                        return Err(self.err("expected &&"));
                    }
                }
                b'|' => {
                    if self.peek() == Some(b'|') {
                        self.pos += 1;
                        Token::OrOr
                    } else {
                        return Err(self.err("expected ||"));
                    }
                }
                other => return Err(self.err(format!("unexpected character {:?}", other as char))),
            };
            tokens.push(token);
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_expression() {
        let tokens = Lexer::new("status_code == 200 && contains(body, 'x')")
            .tokenize()
            .unwrap();
        assert_eq!(tokens[0], Token::Ident("status_code".into()));
        assert_eq!(tokens[1], Token::EqEq);
        assert_eq!(tokens[2], Token::Int(200));
        assert_eq!(tokens[3], Token::AndAnd);
        assert!(matches!(tokens[4], Token::Ident(_)));
    }

    #[test]
    fn test_tokenize_floats_and_strings() {
        let tokens = Lexer::new("1.5 \"a\\nb\"").tokenize().unwrap();
        assert_eq!(tokens[0], Token::Float(1.5));
        assert_eq!(tokens[1], Token::String("a\nb".into()));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(Lexer::new("'abc").tokenize().is_err());
    }

    #[test]
    fn test_single_ampersand_rejected() {
        assert!(Lexer::new("a & b").tokenize().is_err());
    }
}
