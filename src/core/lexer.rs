use super::error::{ErrorCode, RasterError, RasterResult};
use super::source::ByteSource;
use super::window::{END_OF_SOURCE, Window};
use smallvec::SmallVec;

/// Longest name, keyword or number the scanner accepts.
pub const MAX_TOKEN_LEN: usize = 127;

/// A raw token or decoded name. Almost every token in this profile fits inline.
pub type Token = SmallVec<[u8; 32]>;

/// Lexical scanner over a [`Window`].
///
/// The scanner holds no cursor of its own. Every method takes the caller's
/// offset by `&mut u64` and only advances it on success, so a failed attempt
/// can be followed by another attempt at the same position. A successful match
/// always leaves the cursor on the first byte of the following token.
pub struct Lexer {
    window: Window,
}

impl Lexer {
    pub fn new(window: Window) -> Self {
        Lexer { window }
    }

    pub fn window(&mut self) -> &mut Window {
        &mut self.window
    }

    pub fn source(&self) -> &dyn ByteSource {
        self.window.source()
    }

    pub fn into_window(self) -> Window {
        self.window
    }

    /// Returns the byte at `offset`, or -1 at end of source.
    pub fn peek(&mut self, offset: u64) -> RasterResult<i32> {
        self.window.peek(offset)
    }

    /// Checks if a character is whitespace.
    ///
    /// Every control character counts, not just the six PDF whitespace bytes.
    pub fn is_whitespace(ch: i32) -> bool {
        (0x00..=0x20).contains(&ch)
    }

    /// Checks if a character is a delimiter: ( ) < > [ ] { } / %
    pub fn is_delimiter(ch: i32) -> bool {
        matches!(
            ch,
            0x28 | 0x29 | 0x3C | 0x3E | 0x5B | 0x5D | 0x7B | 0x7D | 0x2F | 0x25
        )
    }

    /// Checks if a character can continue a keyword, number or name.
    pub fn is_regular(ch: i32) -> bool {
        ch != END_OF_SOURCE && !Self::is_whitespace(ch) && !Self::is_delimiter(ch)
    }

    fn is_digit(ch: i32) -> bool {
        (0x30..=0x39).contains(&ch)
    }

    fn to_hex_digit(ch: i32) -> Option<u8> {
        match ch {
            0x30..=0x39 => Some((ch - 0x30) as u8),
            0x41..=0x46 => Some((ch - 0x41 + 10) as u8),
            0x61..=0x66 => Some((ch - 0x61 + 10) as u8),
            _ => None,
        }
    }

    /// Advances past whitespace.
    ///
    /// Returns false only when the end of the source is reached.
    pub fn skip_whitespace(&mut self, pos: &mut u64) -> RasterResult<bool> {
        loop {
            let ch = self.window.peek(*pos)?;
            if ch == END_OF_SOURCE {
                return Ok(false);
            }
            if !Self::is_whitespace(ch) {
                return Ok(true);
            }
            *pos += 1;
        }
    }

    /// Finds where the token starting at `start` ends.
    ///
    /// A name, `<<`, `>>` or a single delimiter is a token by itself; anything
    /// else runs until the next delimiter or whitespace.
    fn token_end(&mut self, start: u64) -> RasterResult<Option<u64>> {
        let ch = self.window.peek(start)?;
        if ch == END_OF_SOURCE {
            return Ok(None);
        }

        let mut end = start;
        if ch == 0x2F {
            // '/' starts a name
            end += 1;
        } else if Self::is_delimiter(ch) {
            end += 1;
            if (ch == 0x3C || ch == 0x3E) && self.window.peek(end)? == ch {
                // << or >>
                end += 1;
            }
            return Ok(Some(end));
        }

        while Self::is_regular(self.window.peek(end)?) {
            end += 1;
            if end - start > MAX_TOKEN_LEN as u64 {
                return Err(RasterError::new(ErrorCode::TokenTooLong, start));
            }
        }
        Ok(Some(end))
    }

    /// Reads the raw bytes of the next token.
    ///
    /// Returns `None` at end of source.
    pub fn next_token(&mut self, pos: &mut u64) -> RasterResult<Option<Token>> {
        let Some(end) = self.token_end(*pos)? else {
            return Ok(None);
        };

        let mut token = Token::new();
        for offset in *pos..end {
            token.push(self.window.peek(offset)? as u8);
        }
        *pos = end;
        self.skip_whitespace(pos)?;
        Ok(Some(token))
    }

    /// Consumes the next token if it is exactly `literal`.
    pub fn expect_token(&mut self, pos: &mut u64, literal: &[u8]) -> RasterResult<bool> {
        let Some(end) = self.token_end(*pos)? else {
            return Ok(false);
        };
        if end - *pos != literal.len() as u64 || !self.window.matches(*pos, literal)? {
            return Ok(false);
        }
        *pos = end;
        self.skip_whitespace(pos)?;
        Ok(true)
    }

    /// Parses a number: optional sign, digits, at most one decimal point.
    ///
    /// Exponents are not PDF syntax and are rejected. Returns `None` without
    /// moving the cursor if no number starts here.
    pub fn parse_number(&mut self, pos: &mut u64) -> RasterResult<Option<f64>> {
        let mut text: SmallVec<[u8; 32]> = SmallVec::new();
        let mut end = *pos;
        let mut digits = 0;
        let mut seen_point = false;

        let ch = self.window.peek(end)?;
        if ch == 0x2B || ch == 0x2D {
            // '+' or '-'
            text.push(ch as u8);
            end += 1;
        }

        loop {
            let ch = self.window.peek(end)?;
            if Self::is_digit(ch) {
                digits += 1;
            } else if ch == 0x2E && !seen_point {
                // '.'
                seen_point = true;
            } else {
                break;
            }
            if text.len() >= MAX_TOKEN_LEN {
                return Err(RasterError::new(ErrorCode::TokenTooLong, *pos));
            }
            text.push(ch as u8);
            end += 1;
        }

        if digits == 0 || Self::is_regular(self.window.peek(end)?) {
            return Ok(None);
        }

        let value = std::str::from_utf8(&text)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| RasterError::new(ErrorCode::NumberSyntax, *pos))?;

        *pos = end;
        self.skip_whitespace(pos)?;
        Ok(Some(value))
    }

    /// Parses an unsigned decimal integer.
    pub fn parse_uint(&mut self, pos: &mut u64) -> RasterResult<Option<u64>> {
        let mut end = *pos;
        let mut value: u64 = 0;

        loop {
            let ch = self.window.peek(end)?;
            if !Self::is_digit(ch) {
                break;
            }
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add((ch - 0x30) as u64))
                .ok_or_else(|| RasterError::new(ErrorCode::NumericOverflow, *pos))?;
            end += 1;
        }

        if end == *pos || Self::is_regular(self.window.peek(end)?) {
            return Ok(None);
        }

        *pos = end;
        self.skip_whitespace(pos)?;
        Ok(Some(value))
    }

    /// Reads a name, decoding `#xx` escapes. The leading `/` is not returned.
    ///
    /// Returns `None` without moving the cursor if the next byte is not `/`.
    pub fn read_name(&mut self, pos: &mut u64) -> RasterResult<Option<Token>> {
        if self.window.peek(*pos)? != 0x2F {
            return Ok(None);
        }

        let mut name = Token::new();
        let mut end = *pos + 1;
        loop {
            let ch = self.window.peek(end)?;
            if !Self::is_regular(ch) {
                break;
            }
            if name.len() >= MAX_TOKEN_LEN {
                return Err(RasterError::new(ErrorCode::TokenTooLong, *pos));
            }

            if ch == 0x23 {
                // '#' must be followed by two hex digits
                let high = Self::to_hex_digit(self.window.peek(end + 1)?);
                let low = Self::to_hex_digit(self.window.peek(end + 2)?);
                match (high, low) {
                    (Some(high), Some(low)) => name.push((high << 4) | low),
                    _ => return Err(RasterError::new(ErrorCode::NameSyntax, end)),
                }
                end += 3;
            } else {
                name.push(ch as u8);
                end += 1;
            }
        }

        *pos = end;
        self.skip_whitespace(pos)?;
        Ok(Some(name))
    }

    /// Validates and skips a literal string starting at `(`.
    ///
    /// Parentheses must balance unless escaped. On failure the cursor is
    /// left where it was.
    pub fn parse_literal_string(&mut self, pos: &mut u64) -> RasterResult<()> {
        if self.window.peek(*pos)? != 0x28 {
            return Err(RasterError::new(ErrorCode::StringSyntax, *pos));
        }

        let mut depth = 1u32;
        let mut end = *pos + 1;
        while depth > 0 {
            let ch = self.window.next(&mut end)?;
            match ch {
                END_OF_SOURCE => return Err(RasterError::new(ErrorCode::StringSyntax, *pos)),
                0x28 => depth += 1,
                0x29 => depth -= 1,
                0x5C => {
                    // '\' escape
                    let escaped = self.window.next(&mut end)?;
                    match escaped {
                        END_OF_SOURCE => {
                            return Err(RasterError::new(ErrorCode::StringSyntax, *pos));
                        }
                        0x30..=0x37 => {
                            // up to three octal digits
                            for _ in 0..2 {
                                if !(0x30..=0x37).contains(&self.window.peek(end)?) {
                                    break;
                                }
                                end += 1;
                            }
                        }
                        0x0D => {
                            // line continuation, CRLF counts once
                            if self.window.peek(end)? == 0x0A {
                                end += 1;
                            }
                        }
                        // n r t b f ( ) \ LF, and a lone backslash before
                        // anything else is ignored
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        *pos = end;
        self.skip_whitespace(pos)?;
        Ok(())
    }

    /// Validates and skips a hex string starting at `<`.
    ///
    /// Only hex digits and whitespace may appear before the closing `>`.
    pub fn parse_hex_string(&mut self, pos: &mut u64) -> RasterResult<()> {
        if self.window.peek(*pos)? != 0x3C {
            return Err(RasterError::new(ErrorCode::HexStringSyntax, *pos));
        }

        let mut end = *pos + 1;
        loop {
            let ch = self.window.next(&mut end)?;
            if ch == 0x3E {
                break;
            }
            if ch == END_OF_SOURCE
                || (Self::to_hex_digit(ch).is_none() && !Self::is_whitespace(ch))
            {
                return Err(RasterError::new(ErrorCode::HexStringSyntax, *pos));
            }
        }

        *pos = end;
        self.skip_whitespace(pos)?;
        Ok(())
    }
}
