//! The lexer.
//!
//! A pull-based token producer with single-token pushback, which is all the
//! parser ever needs. Identifier classification (`ID` vs `TYPE_ID`) is the
//! one context-sensitive spot: it goes through a
//! [`TypeNameOracle`](crate::symtab::TypeNameOracle) callback into the
//! symbol-table layer, so the classification stays monotone over a file and
//! the parser never touches scope data directly.

mod cursor;
mod lexer_error;
#[cfg(test)]
mod lexer_tests;
mod token;

use crate::internal_error;
use crate::symtab::TypeNameOracle;
use cursor::Cursor;
pub use lexer_error::{LexError, LexErrorKind};
pub use token::{keyword, Token, TokenKind};

pub type Result<T> = std::result::Result<T, LexError>;

pub struct Lexer<'a> {
    cursor: Cursor<'a>,
    pushback: Option<Token>,
    /// whether the previously returned token can end an operand; decides if
    /// `+`/`-` before a digit is a sign or an operator
    prev_ends_operand: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            cursor: Cursor::new(source),
            pushback: None,
            prev_ends_operand: false,
        }
    }

    /// Pushes one token back; the next [`lex`](Lexer::lex) returns it.
    pub fn unlex(&mut self, token: Token) {
        if self.pushback.is_some() {
            internal_error!("unlexed two tokens without a lex in between");
        }
        self.pushback = Some(token);
    }

    pub fn lex(&mut self, types: &dyn TypeNameOracle) -> Result<Token> {
        if let Some(token) = self.pushback.take() {
            self.prev_ends_operand = token.kind.ends_operand();
            return Ok(token);
        }

        skip_trivia(&mut self.cursor)?;
        let loc = self.cursor.loc();
        let Some(peek) = self.cursor.peek() else {
            return Ok(Token::new(TokenKind::Eof, loc));
        };

        let kind = match peek {
            c if c.is_ascii_alphabetic() || c == '_' => lex_word(&mut self.cursor, types)?,
            '0'..='9' => lex_number(&mut self.cursor, false)?,
            '+' | '-'
                if !self.prev_ends_operand
                    && self
                        .cursor
                        .peek_2nd()
                        .is_some_and(|c| c.is_ascii_digit()) =>
            {
                self.cursor.take();
                lex_number(&mut self.cursor, peek == '-')?
            }
            '"' => lex_string(&mut self.cursor)?,
            '\'' => lex_char(&mut self.cursor)?,
            _ => lex_operator(&mut self.cursor)?,
        };

        let token = Token::new(kind, loc);
        self.prev_ends_operand = token.kind.ends_operand();
        Ok(token)
    }
}

/// Skips whitespace and both comment forms; block comments do not nest.
fn skip_trivia(cursor: &mut Cursor) -> Result<()> {
    loop {
        if cursor.skip_if(char::is_whitespace) {
            continue;
        }
        if cursor.peek() == Some('/') && cursor.peek_2nd() == Some('/') {
            while cursor.peek().is_some_and(|c| c != '\n') {
                cursor.take();
            }
            continue;
        }
        if cursor.peek() == Some('/') && cursor.peek_2nd() == Some('*') {
            let start = cursor.loc();
            cursor.take();
            cursor.take();
            loop {
                if cursor.peek().is_none() {
                    return Err(LexErrorKind::UnterminatedComment.at(start));
                }
                if cursor.peek() == Some('*') && cursor.peek_2nd() == Some('/') {
                    cursor.take();
                    cursor.take();
                    break;
                }
                cursor.take();
            }
            continue;
        }
        return Ok(());
    }
}

fn lex_segment(cursor: &mut Cursor) -> String {
    let start = cursor.as_str();
    let mut len = 0;
    while cursor.skip_if(|c| c.is_ascii_alphanumeric() || c == '_') {
        len += 1;
    }
    start[..len].to_owned()
}

/// Lexes a keyword, identifier or scoped identifier, classifying identifier
/// forms through the symbol-table oracle.
fn lex_word(cursor: &mut Cursor, types: &dyn TypeNameOracle) -> Result<TokenKind> {
    let segment = lex_segment(cursor);
    if let Some(kw) = keyword(&segment) {
        return Ok(kw);
    }

    let mut name = segment;
    let mut scoped = false;
    while cursor.peek() == Some(':') && cursor.peek_2nd() == Some(':') {
        cursor.take();
        cursor.take();
        let loc = cursor.loc();
        if !cursor.peek().is_some_and(|c| c.is_ascii_alphabetic() || c == '_') {
            return Err(LexErrorKind::BadScopedName.at(loc));
        }
        let next = lex_segment(cursor);
        if keyword(&next).is_some() {
            return Err(LexErrorKind::BadScopedName.at(loc));
        }
        name.push_str("::");
        name.push_str(&next);
        scoped = true;
    }

    let is_type = types.is_type_name(&name);
    Ok(match (scoped, is_type) {
        (false, false) => TokenKind::Id(name),
        (false, true) => TokenKind::TypeId(name),
        (true, false) => TokenKind::ScopedId(name),
        (true, true) => TokenKind::ScopedTypeId(name),
    })
}

fn lex_digits(cursor: &mut Cursor, radix: u32) -> Result<u64> {
    let loc = cursor.loc();
    let mut value: u64 = 0;
    let mut any = false;
    while let Some(d) = cursor.peek().and_then(|c| c.to_digit(radix)) {
        cursor.take();
        any = true;
        value = value
            .checked_mul(u64::from(radix))
            .and_then(|v| v.checked_add(u64::from(d)))
            .ok_or_else(|| LexErrorKind::IntOutOfRange.at(loc))?;
    }
    if !any {
        return Err(LexErrorKind::BadInt.at(loc));
    }
    Ok(value)
}

fn check_suffix(cursor: &mut Cursor) -> Result<()> {
    let loc = cursor.loc();
    if let Some(bad) = cursor.peek().filter(|c| c.is_ascii_alphanumeric() || *c == '_') {
        return Err(LexErrorKind::BadConstantSuffix(bad).at(loc));
    }
    Ok(())
}

/// Lexes an integer (decimal, `0x`, leading-zero octal, `0b`) or a `d.d`
/// floating-point literal, with the sign already consumed.
fn lex_number(cursor: &mut Cursor, negative: bool) -> Result<TokenKind> {
    let loc = cursor.loc();

    if cursor.peek() == Some('0') {
        match cursor.peek_2nd() {
            Some('x' | 'X') => {
                cursor.take();
                cursor.take();
                let value = lex_digits(cursor, 16)?;
                check_suffix(cursor)?;
                return finish_int(value, negative, loc);
            }
            Some('b' | 'B') => {
                cursor.take();
                cursor.take();
                let value = lex_digits(cursor, 2)?;
                check_suffix(cursor)?;
                return finish_int(value, negative, loc);
            }
            Some(c) if c.is_ascii_digit() => {
                cursor.take();
                let value = lex_digits(cursor, 8)?;
                check_suffix(cursor)?;
                return finish_int(value, negative, loc);
            }
            _ => {}
        }
    }

    let start = cursor.as_str();
    let mut len = 0;
    while cursor.skip_if(|c| c.is_ascii_digit()) {
        len += 1;
    }

    let is_float = cursor.peek() == Some('.') && cursor.peek_2nd().is_some_and(|c| c.is_ascii_digit());
    if is_float {
        cursor.take();
        len += 1;
        while cursor.skip_if(|c| c.is_ascii_digit()) {
            len += 1;
        }
        check_suffix(cursor)?;
        let parsed = start[..len]
            .parse::<f64>()
            .map_err(|_| LexErrorKind::BadFloat.at(loc))?;
        return Ok(TokenKind::FloatLit(if negative { -parsed } else { parsed }));
    }

    check_suffix(cursor)?;
    let value = start[..len]
        .parse::<u64>()
        .map_err(|_| LexErrorKind::IntOutOfRange.at(loc))?;
    finish_int(value, negative, loc)
}

fn finish_int(magnitude: u64, negative: bool, loc: crate::files::Loc) -> Result<TokenKind> {
    if negative {
        if magnitude > i64::MAX as u64 + 1 {
            return Err(LexErrorKind::IntOutOfRange.at(loc));
        }
        if magnitude == i64::MAX as u64 + 1 {
            return Ok(TokenKind::IntLit(i64::MIN));
        }
        return Ok(TokenKind::IntLit(-(magnitude as i64)));
    }
    if magnitude <= i64::MAX as u64 {
        Ok(TokenKind::IntLit(magnitude as i64))
    } else {
        Ok(TokenKind::UintLit(magnitude))
    }
}

/// One character or escape inside a string or character literal.
fn lex_literal_char(cursor: &mut Cursor, c: char) -> Result<u32> {
    if c != '\\' {
        return Ok(c as u32);
    }
    let loc = cursor.loc();
    let Some(escape) = cursor.take() else {
        return Err(LexErrorKind::UnterminatedString.at(loc));
    };
    match escape {
        'n' => Ok(u32::from(b'\n')),
        'r' => Ok(u32::from(b'\r')),
        't' => Ok(u32::from(b'\t')),
        '0' => Ok(0),
        '"' => Ok(u32::from(b'"')),
        '\'' => Ok(u32::from(b'\'')),
        '\\' => Ok(u32::from(b'\\')),
        'x' => lex_escape_digits(cursor, 2),
        'u' => lex_escape_digits(cursor, 8),
        other => Err(LexErrorKind::BadEscape(other).at(loc)),
    }
}

fn lex_escape_digits(cursor: &mut Cursor, count: u32) -> Result<u32> {
    let mut value = 0u32;
    for _ in 0..count {
        let loc = cursor.loc();
        let d = cursor
            .take()
            .and_then(|c| c.to_digit(16))
            .ok_or_else(|| LexErrorKind::BadEscapeDigit.at(loc))?;
        value = value.wrapping_mul(16).wrapping_add(d);
    }
    Ok(value)
}

fn narrow(points: Vec<u32>, loc: crate::files::Loc) -> Result<Vec<u8>> {
    points
        .into_iter()
        .map(|p| u8::try_from(p).map_err(|_| LexErrorKind::WideCharInNarrow.at(loc)))
        .collect()
}

/// Lexes a string literal; a trailing `w` makes it wide.
fn lex_string(cursor: &mut Cursor) -> Result<TokenKind> {
    let start = cursor.loc();
    cursor.take();

    let mut points = Vec::new();
    loop {
        let Some(c) = cursor.take() else {
            return Err(LexErrorKind::UnterminatedString.at(start));
        };
        match c {
            '"' => break,
            '\n' => return Err(LexErrorKind::UnterminatedString.at(start)),
            other => points.push(lex_literal_char(cursor, other)?),
        }
    }

    if cursor.bump_if('w') {
        Ok(TokenKind::WStringLit(points))
    } else {
        Ok(TokenKind::StringLit(narrow(points, start)?))
    }
}

/// Lexes a character literal; a trailing `w` makes it wide.
fn lex_char(cursor: &mut Cursor) -> Result<TokenKind> {
    let start = cursor.loc();
    cursor.take();

    let Some(c) = cursor.take() else {
        return Err(LexErrorKind::UnterminatedChar.at(start));
    };
    if c == '\'' {
        return Err(LexErrorKind::EmptyChar.at(start));
    }
    let point = lex_literal_char(cursor, c)?;

    match cursor.take() {
        Some('\'') => {}
        Some(_) => return Err(LexErrorKind::LongChar.at(start)),
        None => return Err(LexErrorKind::UnterminatedChar.at(start)),
    }

    if cursor.bump_if('w') {
        Ok(TokenKind::WCharLit(point))
    } else {
        let byte = u8::try_from(point).map_err(|_| LexErrorKind::WideCharInNarrow.at(start))?;
        Ok(TokenKind::CharLit(byte))
    }
}

/// Longest-match punctuation lexing, up to the four characters of `>>>=`.
fn lex_operator(cursor: &mut Cursor) -> Result<TokenKind> {
    use TokenKind as T;
    let loc = cursor.loc();
    let first = cursor.take().expect("caller saw a character");
    let kind = match first {
        ';' => T::Semicolon,
        ',' => T::Comma,
        '(' => T::LParen,
        ')' => T::RParen,
        '[' => T::LSquare,
        ']' => T::RSquare,
        '{' => T::LBrace,
        '}' => T::RBrace,
        '.' => T::Dot,
        '?' => T::Question,
        ':' => T::Colon,
        '~' => T::Tilde,
        '*' => {
            if cursor.bump_if('=') {
                T::MulAssign
            } else {
                T::Star
            }
        }
        '/' => {
            if cursor.bump_if('=') {
                T::DivAssign
            } else {
                T::Slash
            }
        }
        '%' => {
            if cursor.bump_if('=') {
                T::ModAssign
            } else {
                T::Percent
            }
        }
        '^' => {
            if cursor.bump_if('=') {
                T::CaretAssign
            } else {
                T::Caret
            }
        }
        '!' => {
            if cursor.bump_if('=') {
                T::NotEq
            } else {
                T::Bang
            }
        }
        '=' => {
            if cursor.bump_if('=') {
                T::EqEq
            } else {
                T::Assign
            }
        }
        '+' => {
            if cursor.bump_if('+') {
                T::Increment
            } else if cursor.bump_if('=') {
                T::AddAssign
            } else {
                T::Plus
            }
        }
        '-' => {
            if cursor.bump_if('-') {
                T::Decrement
            } else if cursor.bump_if('=') {
                T::SubAssign
            } else if cursor.bump_if('>') {
                T::Arrow
            } else {
                T::Minus
            }
        }
        '&' => {
            if cursor.bump_if('&') {
                if cursor.bump_if('=') {
                    T::LAndAssign
                } else {
                    T::AmpAmp
                }
            } else if cursor.bump_if('=') {
                T::AmpAssign
            } else {
                T::Amp
            }
        }
        '|' => {
            if cursor.bump_if('|') {
                if cursor.bump_if('=') {
                    T::LOrAssign
                } else {
                    T::PipePipe
                }
            } else if cursor.bump_if('=') {
                T::PipeAssign
            } else {
                T::Pipe
            }
        }
        '<' => {
            if cursor.peek() == Some('=') && cursor.peek_2nd() == Some('>') {
                cursor.take();
                cursor.take();
                T::Spaceship
            } else if cursor.bump_if('<') {
                if cursor.bump_if('=') {
                    T::LShiftAssign
                } else {
                    T::LShift
                }
            } else if cursor.bump_if('=') {
                T::LessEq
            } else {
                T::LAngle
            }
        }
        '>' => {
            if cursor.bump_if('>') {
                if cursor.bump_if('>') {
                    if cursor.bump_if('=') {
                        T::ARShiftAssign
                    } else {
                        T::ARShift
                    }
                } else if cursor.bump_if('=') {
                    T::LRShiftAssign
                } else {
                    T::LRShift
                }
            } else if cursor.bump_if('=') {
                T::GreaterEq
            } else {
                T::RAngle
            }
        }
        other => return Err(LexErrorKind::UnexpectedChar(other).at(loc)),
    };
    Ok(kind)
}
