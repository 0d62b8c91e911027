use super::error::{Dispatcher, ErrorCode, RasterError, RasterResult};
use super::lexer::{Lexer, Token};
use super::window::END_OF_SOURCE;
use super::xref::XrefTable;

/// Deepest array/dictionary nesting the parser will follow.
pub const MAX_NESTING: usize = 32;

/// Where a stream object lives in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpan {
    /// Offset of the stream dictionary's `<<`
    pub dict: u64,
    /// Offset of the first payload byte
    pub data: u64,
    /// Payload length from `/Length`
    pub length: u64,
}

/// Grammar parser that validates and skips values.
///
/// Nothing is materialized: every query rescans the bytes it needs and hands
/// back offsets. Dictionary lookup is a linear scan from the opening `<<`.
/// Dictionaries in this profile are small, so no index is kept.
pub struct Parser<'a> {
    lexer: &'a mut Lexer,
    /// `None` until the xref table is loaded; indirect references cannot be
    /// followed before that.
    xref: Option<&'a XrefTable>,
    dispatcher: &'a Dispatcher,
}

impl<'a> Parser<'a> {
    pub fn new(
        lexer: &'a mut Lexer,
        xref: Option<&'a XrefTable>,
        dispatcher: &'a Dispatcher,
    ) -> Self {
        Parser {
            lexer,
            xref,
            dispatcher,
        }
    }

    pub fn lexer(&mut self) -> &mut Lexer {
        &mut *self.lexer
    }

    pub fn dispatcher(&self) -> &'a Dispatcher {
        self.dispatcher
    }

    /// Validates and skips one value of any kind.
    pub fn skip_value(&mut self, pos: &mut u64) -> RasterResult<()> {
        self.skip_nested(pos, 0)
    }

    fn skip_nested(&mut self, pos: &mut u64, depth: usize) -> RasterResult<()> {
        if depth > MAX_NESTING {
            return Err(RasterError::new(ErrorCode::NestingTooDeep, *pos));
        }

        match self.lexer.peek(*pos)? {
            END_OF_SOURCE => Err(RasterError::new(ErrorCode::UnexpectedEnd, *pos)),

            // '/'
            0x2F => self.lexer.read_name(pos).map(|_| ()),

            // '('
            0x28 => self.lexer.parse_literal_string(pos),

            // '<' starts a hex string, '<<' a dictionary
            0x3C => {
                if self.lexer.peek(*pos + 1)? != 0x3C {
                    self.lexer.parse_hex_string(pos)
                } else if depth == 0 {
                    self.parse_dictionary_or_stream(pos).map(|_| ())
                } else {
                    self.parse_dictionary_nested(pos, depth)
                }
            }

            // '['
            0x5B => self.parse_array_nested(pos, depth),

            // + - . and digits: a number or "num gen R"
            0x2B | 0x2D | 0x2E | 0x30..=0x39 => {
                if self.parse_reference(pos)?.is_some() {
                    return Ok(());
                }
                match self.lexer.parse_number(pos)? {
                    Some(_) => Ok(()),
                    None => Err(RasterError::new(ErrorCode::NumberSyntax, *pos)),
                }
            }

            _ => {
                for keyword in [&b"true"[..], b"false", b"null"] {
                    if self.lexer.expect_token(pos, keyword)? {
                        return Ok(());
                    }
                }
                Err(RasterError::new(ErrorCode::ValueSyntax, *pos))
            }
        }
    }

    /// Parses "num gen R" if it appears at `pos`.
    ///
    /// Returns the object number and generation; the cursor only moves when
    /// all three tokens match.
    pub fn parse_reference(&mut self, pos: &mut u64) -> RasterResult<Option<(u64, u64)>> {
        let mut cursor = *pos;
        let Some(num) = self.lexer.parse_uint(&mut cursor)? else {
            return Ok(None);
        };
        let Some(generation) = self.lexer.parse_uint(&mut cursor)? else {
            return Ok(None);
        };
        if !self.lexer.expect_token(&mut cursor, b"R")? {
            return Ok(None);
        }
        *pos = cursor;
        Ok(Some((num, generation)))
    }

    fn parse_array_nested(&mut self, pos: &mut u64, depth: usize) -> RasterResult<()> {
        let mut cursor = *pos;
        if !self.lexer.expect_token(&mut cursor, b"[")? {
            return Err(RasterError::new(ErrorCode::ArraySyntax, *pos));
        }

        loop {
            if self.lexer.expect_token(&mut cursor, b"]")? {
                break;
            }
            if self.lexer.peek(cursor)? == END_OF_SOURCE {
                return Err(RasterError::new(ErrorCode::ArraySyntax, *pos));
            }
            self.skip_nested(&mut cursor, depth + 1)?;
        }

        *pos = cursor;
        Ok(())
    }

    /// Validates and skips a dictionary.
    ///
    /// A `/Type /ObjStm` entry fails: object streams are not part of the
    /// profile.
    pub fn parse_dictionary(&mut self, pos: &mut u64) -> RasterResult<()> {
        self.parse_dictionary_nested(pos, 0)
    }

    fn parse_dictionary_nested(&mut self, pos: &mut u64, depth: usize) -> RasterResult<()> {
        let mut cursor = *pos;
        self.open_dictionary(&mut cursor)?;

        while let Some((key, value)) = self.next_entry_nested(&mut cursor, depth)? {
            if key.as_slice() == b"Type" {
                let mut name_at = self.resolve_value(value)?;
                if let Some(name) = self.lexer.read_name(&mut name_at)? {
                    if name.as_slice() == b"ObjStm" {
                        return Err(RasterError::new(ErrorCode::ObjectStream, value));
                    }
                }
            }
        }

        *pos = cursor;
        Ok(())
    }

    /// Parses a dictionary and, if `stream` follows it, the stream payload.
    ///
    /// `stream` must be followed by CRLF or LF. The payload length comes from
    /// `/Length` (direct or indirect) and `endstream` must appear exactly
    /// there, after an optional end-of-line. Returns `None` for a plain
    /// dictionary.
    pub fn parse_dictionary_or_stream(&mut self, pos: &mut u64) -> RasterResult<Option<StreamSpan>> {
        let dict = *pos;
        let mut cursor = *pos;
        self.parse_dictionary_nested(&mut cursor, 0)?;

        let Some(data) = self.stream_data_start(cursor)? else {
            *pos = cursor;
            return Ok(None);
        };

        let length = self.stream_length(dict)?;
        let mut end = data
            .checked_add(length)
            .ok_or_else(|| RasterError::new(ErrorCode::NumericOverflow, dict))?;

        if self.lexer.peek(end)? == 0x0D {
            end += 1;
        }
        if self.lexer.peek(end)? == 0x0A {
            end += 1;
        }
        let window = self.lexer.window();
        if !window.matches(end, b"endstream")? || Lexer::is_regular(window.peek(end + 9)?) {
            return Err(RasterError::new(ErrorCode::NoEndstream, data + length));
        }

        cursor = end + 9;
        self.lexer.skip_whitespace(&mut cursor)?;
        *pos = cursor;
        Ok(Some(StreamSpan { dict, data, length }))
    }

    /// Returns the payload offset if the `stream` keyword starts at `at`.
    fn stream_data_start(&mut self, at: u64) -> RasterResult<Option<u64>> {
        let window = self.lexer.window();
        if !window.matches(at, b"stream")? {
            return Ok(None);
        }

        let after = at + 6;
        let first = window.peek(after)?;
        let second = window.peek(after + 1)?;
        match (first, second) {
            (0x0D, 0x0A) => Ok(Some(after + 2)),
            (0x0A, _) => Ok(Some(after + 1)),
            (ch, _) if Lexer::is_regular(ch) => Ok(None),
            // CR alone, or anything else
            _ => Err(RasterError::new(ErrorCode::StreamKeyword, at)),
        }
    }

    fn stream_length(&mut self, dict: u64) -> RasterResult<u64> {
        let Some(value) = self.dictionary_lookup(dict, b"Length")? else {
            return Err(RasterError::new(ErrorCode::StreamLength, dict));
        };
        let mut cursor = value;
        self.lexer
            .parse_uint(&mut cursor)?
            .ok_or_else(|| RasterError::new(ErrorCode::StreamLength, value))
    }

    /// Consumes the `<<` that opens a dictionary.
    pub fn open_dictionary(&mut self, pos: &mut u64) -> RasterResult<()> {
        if !self.lexer.expect_token(pos, b"<<")? {
            return Err(RasterError::new(ErrorCode::DictionarySyntax, *pos));
        }
        Ok(())
    }

    /// Reads the next key of an opened dictionary and skips its value.
    ///
    /// Returns the key and the offset of its (unresolved) value, or `None`
    /// once `>>` is consumed.
    pub fn next_entry(&mut self, pos: &mut u64) -> RasterResult<Option<(Token, u64)>> {
        self.next_entry_nested(pos, 0)
    }

    fn next_entry_nested(&mut self, pos: &mut u64, depth: usize) -> RasterResult<Option<(Token, u64)>> {
        if self.lexer.expect_token(pos, b">>")? {
            return Ok(None);
        }

        let key_at = *pos;
        let Some(key) = self.lexer.read_name(pos)? else {
            let code = if self.lexer.peek(key_at)? == END_OF_SOURCE {
                ErrorCode::DictionarySyntax
            } else {
                ErrorCode::DictionaryKey
            };
            return Err(RasterError::new(code, key_at));
        };

        let value = *pos;
        self.skip_nested(pos, depth + 1)?;
        Ok(Some((key, value)))
    }

    /// Finds `key` in the dictionary at `dict` without following references.
    pub fn dictionary_lookup_direct(&mut self, dict: u64, key: &[u8]) -> RasterResult<Option<u64>> {
        let mut cursor = dict;
        self.open_dictionary(&mut cursor)?;
        while let Some((name, value)) = self.next_entry(&mut cursor)? {
            if name.as_slice() == key {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Finds `key` in the dictionary at `dict`.
    ///
    /// An indirect reference is resolved, so the returned offset is always
    /// where the value itself starts.
    pub fn dictionary_lookup(&mut self, dict: u64, key: &[u8]) -> RasterResult<Option<u64>> {
        match self.dictionary_lookup_direct(dict, key)? {
            Some(value) => {
                log::trace!(
                    "/{} found at {} in dictionary {}",
                    String::from_utf8_lossy(key),
                    value,
                    dict
                );
                self.resolve_value(value).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Follows the value at `pos` if it is an indirect reference.
    pub fn resolve_value(&mut self, pos: u64) -> RasterResult<u64> {
        let mut cursor = pos;
        match self.parse_reference(&mut cursor)? {
            Some((num, generation)) => self.resolve_indirect_reference(num, generation, pos),
            None => Ok(pos),
        }
    }

    /// Returns the offset of the body of object `num`.
    ///
    /// A non-zero generation is reported as a warning before the xref lookup
    /// rejects it.
    pub fn resolve_indirect_reference(&mut self, num: u64, generation: u64, at: u64) -> RasterResult<u64> {
        if generation != 0 {
            self.dispatcher.warn(ErrorCode::GenerationNotZero, at);
        }
        let xref = self
            .xref
            .ok_or_else(|| RasterError::new(ErrorCode::InternalState, at))?;
        xref.lookup(self.lexer, num, generation, at)
    }

    // ========== Typed value readers ==========

    pub fn read_number(&mut self, pos: u64) -> RasterResult<Option<f64>> {
        let mut cursor = pos;
        self.lexer.parse_number(&mut cursor)
    }

    pub fn read_uint(&mut self, pos: u64) -> RasterResult<Option<u64>> {
        let mut cursor = pos;
        self.lexer.parse_uint(&mut cursor)
    }

    pub fn read_name(&mut self, pos: u64) -> RasterResult<Option<Token>> {
        let mut cursor = pos;
        self.lexer.read_name(&mut cursor)
    }

    /// Reads an array of exactly `out.len()` numbers.
    ///
    /// Returns false if the value is not such an array.
    pub fn read_number_array(&mut self, pos: u64, out: &mut [f64]) -> RasterResult<bool> {
        let mut cursor = pos;
        if !self.lexer.expect_token(&mut cursor, b"[")? {
            return Ok(false);
        }
        for slot in out.iter_mut() {
            match self.lexer.parse_number(&mut cursor)? {
                Some(value) => *slot = value,
                None => return Ok(false),
            }
        }
        self.lexer.expect_token(&mut cursor, b"]")
    }

    pub fn lookup_number(&mut self, dict: u64, key: &[u8]) -> RasterResult<Option<f64>> {
        match self.dictionary_lookup(dict, key)? {
            Some(value) => self.read_number(value),
            None => Ok(None),
        }
    }

    pub fn lookup_uint(&mut self, dict: u64, key: &[u8]) -> RasterResult<Option<u64>> {
        match self.dictionary_lookup(dict, key)? {
            Some(value) => self.read_uint(value),
            None => Ok(None),
        }
    }

    pub fn lookup_name(&mut self, dict: u64, key: &[u8]) -> RasterResult<Option<Token>> {
        match self.dictionary_lookup(dict, key)? {
            Some(value) => self.read_name(value),
            None => Ok(None),
        }
    }
}
