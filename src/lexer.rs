//! Byte-stream lexer: source bytes → one token at a time, pulled by the parser.

use std::str;

use crate::diagnostics::{LexError, PosixWarning, Position};
use crate::token::{Payload, Token, TokenKind};

type LResult<T> = Result<T, LexError>;

/// Result of lexing one token: the token itself, plus a POSIX warning if
/// the token is an accepted-but-non-portable extension.
pub struct Lexed {
    pub token: Token,
    pub warning: Option<PosixWarning>,
}

pub struct Lexer {
    src: String,
    idx: usize,
    line: usize,
    /// Deferred line-increment flag: set when the previous token was a
    /// newline or EOF, so the *next* call bumps `line` rather than this
    /// one — keeps diagnostics on the last line of a construct pointed
    /// at that line, not the one after it.
    newline: bool,
    file: String,
    at_eof: bool,
}

impl Lexer {
    pub fn new(src: impl Into<String>, file: impl Into<String>) -> Self {
        Lexer {
            src: src.into(),
            idx: 0,
            line: 1,
            newline: false,
            file: file.into(),
            at_eof: false,
        }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    fn pos(&self) -> Position {
        Position::new(self.line, self.file.clone())
    }

    /// Get the next byte, advancing the cursor unless `peek` is set.
    fn next_byte(&mut self, peek: bool) -> Option<u8> {
        let b = self.src.as_bytes().get(self.idx).copied();
        if b.is_some() && !peek {
            self.idx += 1;
        }
        b
    }

    fn peek_byte(&self) -> Option<u8> {
        self.src.as_bytes().get(self.idx).copied()
    }

    /// Advance past whitespace/comments/newline-bookkeeping and return
    /// the next non-whitespace token.
    pub fn next(&mut self) -> LResult<Lexed> {
        if self.at_eof {
            return Ok(Lexed { token: Token::new(TokenKind::Eof, Payload::None, self.pos()), warning: None });
        }

        if self.idx >= self.src.len() {
            self.newline = true;
            self.at_eof = true;
            return Ok(Lexed { token: Token::new(TokenKind::Eof, Payload::None, self.pos()), warning: None });
        }

        if self.newline {
            self.line += 1;
            self.newline = false;
        }

        loop {
            let lexed = self.token()?;
            if lexed.token.kind != TokenKind::Whitespace {
                return Ok(lexed);
            }
        }
    }

    fn token(&mut self) -> LResult<Lexed> {
        let pos = self.pos();
        let c = match self.next_byte(false) {
            Some(c) => c,
            None => {
                self.newline = true;
                self.at_eof = true;
                return Ok(Lexed { token: Token::new(TokenKind::Eof, Payload::None, pos), warning: None });
            }
        };

        let make = |kind: TokenKind| Lexed { token: Token::new(kind, Payload::None, pos.clone()), warning: None };
        let warn = |kind: TokenKind, w: PosixWarning| Lexed {
            token: Token::new(kind, Payload::None, pos.clone()),
            warning: Some(w),
        };

        match c {
            b'\0' => {
                self.newline = true;
                self.at_eof = true;
                Ok(make(TokenKind::Eof))
            }
            b'\n' => {
                self.newline = true;
                Ok(make(TokenKind::Nline))
            }
            b'\t' | b'\x0B' | b'\x0C' | b'\r' | b' ' => {
                while let Some(ch) = self.peek_byte() {
                    if ch == b'\n' || !(ch as char).is_whitespace() {
                        break;
                    }
                    self.idx += 1;
                }
                Ok(make(TokenKind::Whitespace))
            }
            b'\\' => {
                if self.peek_byte() == Some(b'\n') {
                    self.idx += 1;
                    Ok(make(TokenKind::Whitespace))
                } else {
                    Err(LexError::BadCharacter(pos, '\\'))
                }
            }
            b'#' => {
                while let Some(ch) = self.peek_byte() {
                    if ch == b'\n' {
                        break;
                    }
                    self.idx += 1;
                }
                Ok(warn(TokenKind::Whitespace, PosixWarning::ScriptComment(pos)))
            }
            b'/' => {
                if self.peek_byte() == Some(b'*') {
                    self.idx += 1;
                    self.read_comment(pos)
                } else {
                    Ok(make(self.assign(TokenKind::OpAssignDivide, TokenKind::OpDivide)))
                }
            }
            b'"' => self.read_string(pos),
            b'!' => {
                let kind = self.assign(TokenKind::OpRelNe, TokenKind::OpBoolNot);
                if kind == TokenKind::OpBoolNot {
                    Ok(warn(kind, PosixWarning::BooleanOperator(pos, "!")))
                } else {
                    Ok(make(kind))
                }
            }
            b'&' => {
                if self.peek_byte() == Some(b'&') {
                    self.idx += 1;
                    Ok(warn(TokenKind::OpBoolAnd, PosixWarning::BooleanOperator(pos, "&&")))
                } else {
                    Err(LexError::BadCharacter(pos, '&'))
                }
            }
            b'|' => {
                if self.peek_byte() == Some(b'|') {
                    self.idx += 1;
                    Ok(warn(TokenKind::OpBoolOr, PosixWarning::BooleanOperator(pos, "||")))
                } else {
                    Err(LexError::BadCharacter(pos, '|'))
                }
            }
            b'(' => Ok(make(TokenKind::LParen)),
            b')' => Ok(make(TokenKind::RParen)),
            b'[' => Ok(make(TokenKind::LBracket)),
            b']' => Ok(make(TokenKind::RBracket)),
            b'{' => Ok(make(TokenKind::LBrace)),
            b'}' => Ok(make(TokenKind::RBrace)),
            b',' => Ok(make(TokenKind::Comma)),
            b';' => Ok(make(TokenKind::Semicolon)),
            b'+' => {
                if self.peek_byte() == Some(b'+') {
                    self.idx += 1;
                    Ok(make(TokenKind::OpInc))
                } else {
                    Ok(make(self.assign(TokenKind::OpAssignPlus, TokenKind::OpPlus)))
                }
            }
            b'-' => {
                if self.peek_byte() == Some(b'-') {
                    self.idx += 1;
                    Ok(make(TokenKind::OpDec))
                } else {
                    Ok(make(self.assign(TokenKind::OpAssignMinus, TokenKind::OpMinus)))
                }
            }
            b'*' => Ok(make(self.assign(TokenKind::OpAssignMultiply, TokenKind::OpMultiply))),
            b'%' => Ok(make(self.assign(TokenKind::OpAssignModulus, TokenKind::OpModulus))),
            b'^' => Ok(make(self.assign(TokenKind::OpAssignPower, TokenKind::OpPower))),
            b'<' => Ok(make(self.assign(TokenKind::OpRelLe, TokenKind::OpRelLt))),
            b'>' => Ok(make(self.assign(TokenKind::OpRelGe, TokenKind::OpRelGt))),
            b'=' => Ok(make(self.assign(TokenKind::OpRelEq, TokenKind::OpAssign))),
            b'.' => {
                if self.peek_byte().map(is_digit_char).unwrap_or(false) {
                    self.read_number(pos, true)
                } else {
                    Ok(warn(TokenKind::Last, PosixWarning::DotAsLast(pos)))
                }
            }
            c if c.is_ascii_digit() => self.read_number(pos, false),
            c if c.is_ascii_lowercase() => {
                self.idx -= 1;
                self.read_identifier(pos)
            }
            c => Err(LexError::BadCharacter(pos, c as char)),
        }
    }

    /// If the next byte is `=`, consume it and return `with`; else `without`.
    fn assign(&mut self, with: TokenKind, without: TokenKind) -> TokenKind {
        if self.peek_byte() == Some(b'=') {
            self.idx += 1;
            with
        } else {
            without
        }
    }

    fn read_comment(&mut self, pos: Position) -> LResult<Lexed> {
        let mut nls = 0usize;
        loop {
            match self.next_byte(false) {
                None => return Err(LexError::UnterminatedComment(pos)),
                Some(b'\n') => nls += 1,
                Some(b'*') => {
                    if self.peek_byte() == Some(b'/') {
                        self.idx += 1;
                        break;
                    }
                }
                Some(_) => {}
            }
        }
        self.line += nls;
        Ok(Lexed { token: Token::new(TokenKind::Whitespace, Payload::None, pos), warning: None })
    }

    fn read_string(&mut self, pos: Position) -> LResult<Lexed> {
        let start = self.idx;
        let mut nls = 0usize;
        loop {
            match self.next_byte(false) {
                None => return Err(LexError::UnterminatedString(pos)),
                Some(b'"') => break,
                Some(b'\n') => nls += 1,
                Some(_) => {}
            }
        }
        let text = str::from_utf8(&self.src.as_bytes()[start..self.idx - 1])
            .expect("string literal bytes are valid utf8 since only ASCII delimiters are special")
            .to_string();
        self.line += nls;
        Ok(Lexed { token: Token::new(TokenKind::String, Payload::Text(text), pos), warning: None })
    }

    fn read_number(&mut self, pos: Position, leading_dot: bool) -> LResult<Lexed> {
        let start = self.idx - 1;
        let mut seen_dot = leading_dot;
        loop {
            match self.peek_byte() {
                Some(c) if is_digit_char(c) => {
                    self.idx += 1;
                }
                Some(b'.') if !seen_dot => {
                    seen_dot = true;
                    self.idx += 1;
                }
                _ => break,
            }
        }
        let text = str::from_utf8(&self.src.as_bytes()[start..self.idx])
            .expect("numeric literal bytes are ASCII")
            .to_string();
        Ok(Lexed { token: Token::new(TokenKind::Number, Payload::Text(text), pos), warning: None })
    }

    fn read_identifier(&mut self, pos: Position) -> LResult<Lexed> {
        let start = self.idx;
        loop {
            match self.peek_byte() {
                Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() || c == b'_' => {
                    self.idx += 1;
                }
                _ => break,
            }
        }
        let text = str::from_utf8(&self.src.as_bytes()[start..self.idx])
            .expect("identifier bytes are ASCII")
            .to_string();

        if let Some(kind) = Token::lookup_keyword(&text) {
            Ok(Lexed { token: Token::new(kind, Payload::None, pos), warning: None })
        } else {
            Ok(Lexed { token: Token::new(TokenKind::Name, Payload::Text(text), pos), warning: None })
        }
    }
}

fn is_digit_char(c: u8) -> bool {
    c.is_ascii_digit() || (b'A'..=b'F').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src, "test.bc");
        let mut kinds = Vec::new();
        loop {
            let lexed = lexer.next().unwrap();
            let done = lexed.token.kind == TokenKind::Eof;
            kinds.push(lexed.token.kind);
            if done {
                break;
            }
        }
        kinds
    }

    #[test]
    fn numbers_and_identifiers() {
        let mut lexer = Lexer::new("12.5 x1_2 .5", "t");
        let n1 = lexer.next().unwrap().token;
        assert_eq!(n1.kind, TokenKind::Number);
        assert_eq!(n1.text(), "12.5");

        let n2 = lexer.next().unwrap().token;
        assert_eq!(n2.kind, TokenKind::Name);
        assert_eq!(n2.text(), "x1_2");

        let n3 = lexer.next().unwrap().token;
        assert_eq!(n3.kind, TokenKind::Number);
        assert_eq!(n3.text(), ".5");
    }

    #[test]
    fn keywords_are_not_names() {
        let mut lexer = Lexer::new("while define auto", "t");
        assert_eq!(lexer.next().unwrap().token.kind, TokenKind::While);
        assert_eq!(lexer.next().unwrap().token.kind, TokenKind::Define);
        assert_eq!(lexer.next().unwrap().token.kind, TokenKind::Auto);
    }

    #[test]
    fn assignment_folding() {
        let kinds = lex_all("+ += - -= * *= / /= % %= ^ ^= < <= > >= = ==");
        assert_eq!(
            kinds,
            vec![
                TokenKind::OpPlus,
                TokenKind::OpAssignPlus,
                TokenKind::OpMinus,
                TokenKind::OpAssignMinus,
                TokenKind::OpMultiply,
                TokenKind::OpAssignMultiply,
                TokenKind::OpDivide,
                TokenKind::OpAssignDivide,
                TokenKind::OpModulus,
                TokenKind::OpAssignModulus,
                TokenKind::OpPower,
                TokenKind::OpAssignPower,
                TokenKind::OpRelLt,
                TokenKind::OpRelLe,
                TokenKind::OpRelGt,
                TokenKind::OpRelGe,
                TokenKind::OpAssign,
                TokenKind::OpRelEq,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn inc_dec_vs_minus() {
        let kinds = lex_all("a++b a--b a- -b");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Name,
                TokenKind::OpInc,
                TokenKind::Name,
                TokenKind::Name,
                TokenKind::OpDec,
                TokenKind::Name,
                TokenKind::Name,
                TokenKind::OpMinus,
                TokenKind::OpMinus,
                TokenKind::Name,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_literal_with_embedded_newline() {
        let mut lexer = Lexer::new("\"hi\nthere\"", "t");
        let tok = lexer.next().unwrap().token;
        assert_eq!(tok.kind, TokenKind::String);
        assert_eq!(tok.text(), "hi\nthere");
        assert_eq!(lexer.line(), 1);
        // line only advances once the *next* token is requested, matching
        // the deferred line-increment behavior of the original lexer.
        let _ = lexer.next();
        assert_eq!(lexer.line(), 2);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let mut lexer = Lexer::new("\"hi", "t");
        assert!(matches!(lexer.next(), Err(LexError::UnterminatedString(_))));
    }

    #[test]
    fn unterminated_comment_is_an_error() {
        let mut lexer = Lexer::new("/* hi", "t");
        assert!(matches!(lexer.next(), Err(LexError::UnterminatedComment(_))));
    }

    #[test]
    fn lone_ampersand_and_pipe_are_errors() {
        let mut lexer = Lexer::new("&", "t");
        assert!(matches!(lexer.next(), Err(LexError::BadCharacter(_, '&'))));
        let mut lexer = Lexer::new("|", "t");
        assert!(matches!(lexer.next(), Err(LexError::BadCharacter(_, '|'))));
    }

    #[test]
    fn script_comment_warns() {
        let mut lexer = Lexer::new("# comment\n1", "t");
        let lexed = lexer.next().unwrap();
        assert!(matches!(lexed.warning, Some(PosixWarning::ScriptComment(_))));
    }
}
