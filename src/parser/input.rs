//! Positional character source shared by every grammar in the parser.
//!
//! [`CharSource`] wraps decoded text with line/column tracking, bounded
//! lookahead, delimiter-bounded reads and expected-literal assertions. Entity
//! replacement text is parsed through a [`sub_source`](CharSource::sub_source)
//! whose positions start at the entity's declaration, so errors inside an
//! expansion point at the text the author actually wrote.
//!
//! Consuming reads that may legitimately run into the end of input return a
//! [`Scan`] instead of failing; the caller decides whether end of input is
//! an error at that point.

use std::sync::Arc;

use crate::error::{ErrorKind, ParseError, SourceLocation};

// -------------------------------------------------------------------------
// Security defaults
// -------------------------------------------------------------------------

/// Default maximum element nesting depth.
pub(crate) const DEFAULT_MAX_DEPTH: u32 = 256;

/// Default maximum length (in characters) of a name.
pub(crate) const DEFAULT_MAX_NAME_LENGTH: usize = 50_000;

/// Default maximum number of entity expansions per document.
pub(crate) const DEFAULT_MAX_ENTITY_EXPANSIONS: u32 = 10_000;

/// Default maximum number of entities expanded inside one another.
pub(crate) const DEFAULT_MAX_ENTITY_DEPTH: usize = 40;

/// Default maximum ratio of expanded text to input text. libxml2 uses a
/// factor of 5.
pub(crate) const DEFAULT_MAX_AMPLIFICATION: usize = 5;

// -------------------------------------------------------------------------
// Character classes (XML 1.0 §2.2, §2.3)
// -------------------------------------------------------------------------

/// The `S` production: space, tab, carriage return, line feed.
pub(crate) const WHITESPACE: &[char] = &[' ', '\t', '\r', '\n'];

/// Returns `true` if `c` is a valid `Char` per XML 1.0 §2.2 `[2]`.
///
/// `#x9 | #xA | #xD | [#x20-#xD7FF] | [#xE000-#xFFFD] | [#x10000-#x10FFFF]`
pub(crate) fn is_xml_char(c: char) -> bool {
    matches!(c as u32,
        0x09 | 0x0A | 0x0D | 0x20..=0xD7FF | 0xE000..=0xFFFD | 0x0001_0000..=0x0010_FFFF
    )
}

/// Returns `true` if `c` is a valid `NameStartChar` per XML 1.0 §2.3 `[4]`.
pub(crate) fn is_name_start_char(c: char) -> bool {
    matches!(c,
        ':' | 'A'..='Z' | '_' | 'a'..='z' |
        '\u{C0}'..='\u{D6}' | '\u{D8}'..='\u{F6}' | '\u{F8}'..='\u{2FF}' |
        '\u{370}'..='\u{37D}' | '\u{37F}'..='\u{1FFF}' |
        '\u{200C}'..='\u{200D}' | '\u{2070}'..='\u{218F}' |
        '\u{2C00}'..='\u{2FEF}' | '\u{3001}'..='\u{D7FF}' |
        '\u{F900}'..='\u{FDCF}' | '\u{FDF0}'..='\u{FFFD}' |
        '\u{10000}'..='\u{EFFFF}'
    )
}

/// Returns `true` if `c` is a valid `NameChar` per XML 1.0 §2.3 `[4a]`.
pub(crate) fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9' | '\u{B7}' |
            '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}'
        )
}

/// Returns `true` if `s` matches the `Name` production.
pub(crate) fn is_valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(is_name_start_char) && chars.all(is_name_char)
}

/// Returns `true` if `c` is a valid `PubidChar` per XML 1.0 §2.3 `[13]`.
pub(crate) fn is_pubid_char(c: char) -> bool {
    matches!(c,
        ' ' | '\r' | '\n' |
        'a'..='z' | 'A'..='Z' | '0'..='9' |
        '-' | '\'' | '(' | ')' | '+' | ',' | '.' | '/' | ':' |
        '=' | '?' | ';' | '!' | '*' | '#' | '@' | '$' | '_' | '%'
    )
}

// -------------------------------------------------------------------------
// Scan results and checkpoints
// -------------------------------------------------------------------------

/// Result of a read that tolerates end of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Scan {
    /// Characters read before the stop character or the end of input.
    pub text: String,
    /// `true` when the read ended because the input ran out.
    pub hit_eof: bool,
}

/// A snapshot of the read position, restored with
/// [`CharSource::restore_position`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct SavedPosition {
    pos: usize,
    line: u32,
    column: u32,
}

// -------------------------------------------------------------------------
// CharSource
// -------------------------------------------------------------------------

/// A decoded character stream with position tracking.
#[derive(Debug, Clone)]
pub(crate) struct CharSource {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    source: Arc<str>,
    max_name_length: usize,
}

impl CharSource {
    /// Creates a source over physical input. Line ends are normalized to
    /// `\n` (XML 1.0 §2.11).
    pub fn new(text: &str, source: impl Into<Arc<str>>) -> Self {
        let mut chars = Vec::with_capacity(text.len());
        let mut iter = text.chars().peekable();
        while let Some(c) = iter.next() {
            if c == '\r' {
                if iter.peek() == Some(&'\n') {
                    iter.next();
                }
                chars.push('\n');
            } else {
                chars.push(c);
            }
        }
        Self {
            chars,
            pos: 0,
            line: 1,
            column: 1,
            source: source.into(),
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
        }
    }

    /// Creates a bounded source over entity replacement text whose
    /// positions start at `origin`. The text is taken as-is.
    pub fn sub_source(&self, text: &str, origin: &SourceLocation) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            line: origin.line,
            column: origin.column,
            source: Arc::clone(&origin.source),
            max_name_length: self.max_name_length,
        }
    }

    /// Sets the maximum name length accepted by [`parse_name`](Self::parse_name).
    pub fn set_max_name_length(&mut self, max: usize) {
        self.max_name_length = max;
    }

    // -- Position queries --

    /// Returns the current source location.
    pub fn location(&self) -> SourceLocation {
        SourceLocation {
            source: Arc::clone(&self.source),
            line: self.line,
            column: self.column,
        }
    }

    /// Returns the name of the source.
    pub fn source_name(&self) -> &Arc<str> {
        &self.source
    }

    /// Returns `true` if all input has been consumed.
    pub fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    /// Returns the current character offset.
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Returns the text between two character offsets.
    pub fn slice(&self, start: usize, end: usize) -> String {
        self.chars[start.min(self.chars.len())..end.min(self.chars.len())]
            .iter()
            .collect()
    }

    /// Saves the current position so a speculative read can be undone.
    pub fn save_position(&self) -> SavedPosition {
        SavedPosition {
            pos: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    /// Restores a previously saved position.
    pub fn restore_position(&mut self, saved: SavedPosition) {
        self.pos = saved.pos;
        self.line = saved.line;
        self.column = saved.column;
    }

    // -- Lookahead --

    /// Returns the next character without consuming it.
    pub fn peek_char(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    /// Returns the character `offset` places ahead without consuming.
    pub fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    /// Returns up to `n` upcoming characters without consuming them.
    pub fn peek(&self, n: usize) -> String {
        let end = (self.pos + n).min(self.chars.len());
        self.chars[self.pos..end].iter().collect()
    }

    /// Returns `true` if the remaining input starts with `s`.
    pub fn looking_at(&self, s: &str) -> bool {
        let mut i = self.pos;
        for expected in s.chars() {
            if self.chars.get(i) != Some(&expected) {
                return false;
            }
            i += 1;
        }
        true
    }

    /// ASCII case-insensitive variant of [`looking_at`](Self::looking_at).
    pub fn looking_at_ci(&self, s: &str) -> bool {
        let mut i = self.pos;
        for expected in s.chars() {
            match self.chars.get(i) {
                Some(c) if c.eq_ignore_ascii_case(&expected) => i += 1,
                _ => return false,
            }
        }
        true
    }

    // -- Consuming reads --

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Consumes `n` characters.
    pub fn skip(&mut self, n: usize) {
        for _ in 0..n {
            if self.advance().is_none() {
                break;
            }
        }
    }

    /// Consumes one character.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::UnexpectedEof`] at the end of input.
    pub fn read(&mut self) -> Result<char, ParseError> {
        self.advance()
            .ok_or_else(|| self.error(ErrorKind::UnexpectedEof, "unexpected end of input"))
    }

    /// Consumes one character if it is a member of `allowed`.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::UnexpectedData`] naming the offending
    /// character, or [`ErrorKind::UnexpectedEof`] at the end of input.
    pub fn read_expected_char(&mut self, allowed: &[char]) -> Result<char, ParseError> {
        match self.peek_char() {
            Some(c) if allowed.contains(&c) => {
                self.advance();
                Ok(c)
            }
            Some(c) => Err(self.error(
                ErrorKind::UnexpectedData,
                format!("expected one of {}, found {}", describe_set(allowed), quote_char(c)),
            )),
            None => Err(self.error(
                ErrorKind::UnexpectedEof,
                format!("expected one of {}, found end of input", describe_set(allowed)),
            )),
        }
    }

    /// Consumes the literal `expected`.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::UnexpectedData`] if the input does not match.
    pub fn read_expected_string(&mut self, expected: &str) -> Result<(), ParseError> {
        if self.looking_at(expected) {
            self.skip(expected.chars().count());
            Ok(())
        } else {
            Err(self.expected_error(expected))
        }
    }

    /// ASCII case-insensitive variant of
    /// [`read_expected_string`](Self::read_expected_string).
    pub fn read_expected_string_ci(&mut self, expected: &str) -> Result<(), ParseError> {
        if self.looking_at_ci(expected) {
            self.skip(expected.chars().count());
            Ok(())
        } else {
            Err(self.expected_error(expected))
        }
    }

    fn expected_error(&self, expected: &str) -> ParseError {
        if self.at_end() {
            self.error(
                ErrorKind::UnexpectedEof,
                format!("expected '{expected}', found end of input"),
            )
        } else {
            self.error(
                ErrorKind::UnexpectedData,
                format!("expected '{expected}', found '{}'", self.peek(expected.chars().count())),
            )
        }
    }

    /// Reads up to (not including) the first character in `stop`.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::UnexpectedEof`] if no stop character occurs.
    pub fn read_string_until_char(&mut self, stop: &[char]) -> Result<String, ParseError> {
        let scan = self.read_string_until_char_eof(stop);
        if scan.hit_eof {
            return Err(self.error(
                ErrorKind::UnexpectedEof,
                format!("unexpected end of input while looking for {}", describe_set(stop)),
            ));
        }
        Ok(scan.text)
    }

    /// Reads up to the first character in `stop` or the end of input.
    pub fn read_string_until_char_eof(&mut self, stop: &[char]) -> Scan {
        let mut text = String::new();
        while let Some(c) = self.peek_char() {
            if stop.contains(&c) {
                return Scan {
                    text,
                    hit_eof: false,
                };
            }
            text.push(c);
            self.advance();
        }
        Scan {
            text,
            hit_eof: true,
        }
    }

    /// Reads up to the literal `end`, which is consumed but not returned.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::UnexpectedEof`] if `end` never occurs.
    pub fn read_string_until(&mut self, end: &str) -> Result<String, ParseError> {
        let mut text = String::new();
        loop {
            if self.looking_at(end) {
                self.skip(end.chars().count());
                return Ok(text);
            }
            match self.advance() {
                Some(c) => text.push(c),
                None => {
                    return Err(self.error(
                        ErrorKind::UnexpectedEof,
                        format!("unexpected end of input while looking for '{end}'"),
                    ))
                }
            }
        }
    }

    /// Consumes `start`, then returns the text up to `end` (consumed).
    ///
    /// # Errors
    ///
    /// Fails if `start` is not next or `end` never occurs.
    pub fn read_delimited_string(&mut self, start: &str, end: &str) -> Result<String, ParseError> {
        self.read_expected_string(start)?;
        self.read_string_until(end)
    }

    /// Skips a run of characters in `set`, returning how many were skipped.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::UnexpectedEof`] if the run reaches the end
    /// of input; use [`skip_chars_eof`](Self::skip_chars_eof) where that is
    /// acceptable.
    pub fn skip_chars(&mut self, set: &[char]) -> Result<usize, ParseError> {
        let count = self.skip_chars_eof(set);
        if self.at_end() {
            return Err(self.error(ErrorKind::UnexpectedEof, "unexpected end of input"));
        }
        Ok(count)
    }

    /// Skips a run of characters in `set`, stopping quietly at end of input.
    pub fn skip_chars_eof(&mut self, set: &[char]) -> usize {
        let mut count = 0;
        while self.peek_char().is_some_and(|c| set.contains(&c)) {
            self.advance();
            count += 1;
        }
        count
    }

    /// Skips whitespace. Returns `true` if any was consumed.
    pub fn skip_whitespace(&mut self) -> bool {
        self.skip_chars_eof(WHITESPACE) > 0
    }

    /// Skips whitespace, failing if there is none.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::UnexpectedData`] if no whitespace is next.
    pub fn skip_whitespace_required(&mut self) -> Result<(), ParseError> {
        if self.skip_whitespace() {
            Ok(())
        } else if self.at_end() {
            Err(self.error(ErrorKind::UnexpectedEof, "whitespace required"))
        } else {
            Err(self.error(
                ErrorKind::UnexpectedData,
                format!("whitespace required, found {}", quote_char(self.chars[self.pos])),
            ))
        }
    }

    // -- Names (XML 1.0 §2.3) --

    /// Returns `true` if a `Name` starts at the current position.
    pub fn at_name_start(&self) -> bool {
        self.peek_char().is_some_and(is_name_start_char)
    }

    /// Parses an XML `Name` per production `[5]`.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::WellFormedness`] if no valid name starts here
    /// or the name exceeds the configured length limit.
    pub fn parse_name(&mut self) -> Result<String, ParseError> {
        match self.peek_char() {
            None => {
                return Err(self.error(ErrorKind::UnexpectedEof, "expected name, found end of input"))
            }
            Some(c) if !is_name_start_char(c) => {
                return Err(self.fatal(format!("invalid name start character {}", quote_char(c))))
            }
            Some(_) => {}
        }
        let mut name = String::new();
        while let Some(c) = self.peek_char().filter(|c| is_name_char(*c)) {
            name.push(c);
            self.advance();
        }
        let len = name.chars().count();
        if len > self.max_name_length {
            return Err(self.fatal(format!(
                "name length ({len}) exceeds maximum ({})",
                self.max_name_length
            )));
        }
        Ok(name)
    }

    /// Parses a quoted literal, returning its content and the location of
    /// its first character.
    ///
    /// # Errors
    ///
    /// Fails if no quote is next or the literal is unterminated.
    pub fn parse_quoted(&mut self) -> Result<(String, SourceLocation), ParseError> {
        let quote = self.read_expected_char(&['"', '\''])?;
        let start = self.location();
        let value = self.read_string_until_char(&[quote])?;
        self.advance();
        Ok((value, start))
    }

    // -- Error helpers --

    /// Creates an error of `kind` at the current location.
    pub fn error(&self, kind: ErrorKind, message: impl Into<String>) -> ParseError {
        ParseError::new(kind, message, self.location())
    }

    /// Creates a well-formedness error at the current location.
    pub fn fatal(&self, message: impl Into<String>) -> ParseError {
        self.error(ErrorKind::WellFormedness, message)
    }
}

fn quote_char(c: char) -> String {
    if c.is_control() || c.is_whitespace() {
        format!("U+{:04X}", c as u32)
    } else {
        format!("'{c}'")
    }
}

fn describe_set(set: &[char]) -> String {
    let parts: Vec<String> = set.iter().map(|c| quote_char(*c)).collect();
    format!("[{}]", parts.join(", "))
}
