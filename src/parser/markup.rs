//! Markup constructs: the XML declaration, comments, CDATA sections,
//! processing instructions, tags, attribute values and references.
//!
//! [`XmlParser::read_markup`] parses exactly one construct starting at `<`
//! and hands it back as a [`Markup`] value; the content assembler and the
//! document loop decide where it goes. Document type declarations are
//! recognized by the callers before dispatching here.

use crate::dtd::EntityValue;
use crate::error::{ErrorKind, ParseError, SourceLocation};

use super::input::{is_name_char, is_xml_char, CharSource, WHITESPACE};
use super::registry::Resolved;
use super::xml::XmlParser;

/// One parsed markup construct.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Markup {
    Comment(String),
    CData(String),
    Pi { target: String, data: Option<String> },
    Tag(Tag),
    /// Tidy mode: a `<` that does not start markup, kept as text.
    Text(String),
    /// Tidy mode: a malformed construct that was skipped.
    Skipped,
}

/// Whether a tag opens, closes or is self-contained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagKind {
    Start,
    End,
    Empty,
}

/// A start, end or empty-element tag with expanded attribute values.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Tag {
    pub name: String,
    pub kind: TagKind,
    pub attributes: Vec<(String, String)>,
    pub location: SourceLocation,
}

/// The pseudo-attributes of an XML or text declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct XmlDecl {
    pub version: Option<String>,
    pub encoding: Option<String>,
    pub standalone: Option<bool>,
}

/// A reference after `&` has been read.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Reference {
    /// `&#...;`
    Char(char),
    /// `&name;`
    Named(String),
    /// Tidy mode: an `&` that does not start a reference, kept as text.
    Literal(String),
}

/// Returns `true` if an XML or text declaration starts here.
pub(crate) fn at_xml_decl(src: &CharSource) -> bool {
    src.looking_at("<?xml") && src.peek_at(5).is_some_and(|c| WHITESPACE.contains(&c))
}

impl XmlParser<'_> {
    // -----------------------------------------------------------------
    // XML declaration (XML 1.0 §2.8 [23], text declaration §4.3.1 [77])
    // -----------------------------------------------------------------

    /// Parses `<?xml ... ?>`. A text declaration (`text_decl`) at the start
    /// of an external entity requires `encoding` and forbids `standalone`.
    pub(crate) fn parse_xml_decl(
        &mut self,
        src: &mut CharSource,
        text_decl: bool,
    ) -> Result<XmlDecl, ParseError> {
        const ORDER: [&str; 3] = ["version", "encoding", "standalone"];

        let start = src.location();
        src.read_expected_string("<?xml")?;
        let mut decl = XmlDecl::default();
        let mut last: Option<usize> = None;
        loop {
            let had_ws = src.skip_whitespace();
            if src.looking_at("?>") {
                src.skip(2);
                break;
            }
            if !had_ws {
                src.skip_whitespace_required()?;
            }
            let loc = src.location();
            let name = src.parse_name()?;
            src.skip_whitespace();
            src.read_expected_char(&['='])?;
            src.skip_whitespace();
            let (value, _) = src.parse_quoted()?;

            let rank = ORDER
                .iter()
                .position(|&n| n == name)
                .filter(|&r| !(text_decl && r == 2))
                .ok_or_else(|| {
                    ParseError::new(
                        ErrorKind::Syntax,
                        format!("unexpected '{name}' in XML declaration"),
                        loc.clone(),
                    )
                })?;
            if let Some(prev) = last {
                if rank == prev {
                    return Err(ParseError::new(
                        ErrorKind::Syntax,
                        format!("duplicate '{name}' in XML declaration"),
                        loc,
                    ));
                }
                if rank < prev {
                    return Err(ParseError::new(
                        ErrorKind::Syntax,
                        format!("'{name}' must come before '{}' in XML declaration", ORDER[prev]),
                        loc,
                    ));
                }
            }
            last = Some(rank);

            match rank {
                0 => {
                    if !is_version_num(&value) {
                        return Err(ParseError::new(
                            ErrorKind::Syntax,
                            format!("unsupported XML version '{value}'"),
                            loc,
                        ));
                    }
                    decl.version = Some(value);
                }
                1 => {
                    if !is_enc_name(&value) {
                        return Err(ParseError::new(
                            ErrorKind::Syntax,
                            format!("invalid encoding name '{value}'"),
                            loc,
                        ));
                    }
                    decl.encoding = Some(value);
                }
                _ => {
                    decl.standalone = Some(match value.as_str() {
                        "yes" => true,
                        "no" => false,
                        _ => {
                            return Err(ParseError::new(
                                ErrorKind::Syntax,
                                format!("standalone must be 'yes' or 'no', found '{value}'"),
                                loc,
                            ))
                        }
                    });
                }
            }
        }

        if text_decl && decl.encoding.is_none() {
            return Err(ParseError::new(
                ErrorKind::Syntax,
                "text declaration requires an encoding",
                start,
            ));
        }
        if !text_decl && decl.version.is_none() {
            return Err(ParseError::new(
                ErrorKind::Syntax,
                "XML declaration requires a version",
                start,
            ));
        }
        Ok(decl)
    }

    /// Skips the text declaration at the start of an external entity.
    pub(crate) fn skip_text_decl(&mut self, src: &mut CharSource) -> Result<(), ParseError> {
        if at_xml_decl(src) {
            self.parse_xml_decl(src, true)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------

    /// Parses one construct starting at `<`.
    pub(crate) fn read_markup(&mut self, src: &mut CharSource) -> Result<Markup, ParseError> {
        if src.looking_at("<!--") {
            return Ok(Markup::Comment(self.read_comment(src)?));
        }
        if src.looking_at("<![CDATA[") {
            let content = src.read_delimited_string("<![CDATA[", "]]>")?;
            self.check_chars(src, &content, "CDATA section")?;
            return Ok(Markup::CData(content));
        }
        if src.looking_at("<?") {
            return self.read_pi(src);
        }
        if src.looking_at("<!") {
            let loc = src.location();
            if self.options.tidy {
                self.skip_past(src, '>')?;
                self.recover(loc, "skipped unknown markup declaration");
                return Ok(Markup::Skipped);
            }
            return Err(src.fatal("unexpected markup declaration"));
        }
        self.read_tag(src)
    }

    /// Consumes input through the next `stop` character.
    pub(crate) fn skip_past(&mut self, src: &mut CharSource, stop: char) -> Result<(), ParseError> {
        src.read_string_until_char(&[stop])?;
        src.skip(1);
        Ok(())
    }

    /// Characters outside `Char` (XML 1.0 §2.2) are a well-formedness
    /// error in strict mode.
    pub(crate) fn check_chars(&self, src: &CharSource, text: &str, what: &str) -> Result<(), ParseError> {
        if self.options.tidy {
            return Ok(());
        }
        match text.chars().find(|c| !is_xml_char(*c)) {
            Some(c) => Err(src.fatal(format!("invalid character U+{:04X} in {what}", c as u32))),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------
    // Comments, PIs
    // -----------------------------------------------------------------

    /// Parses `<!-- ... -->`. The closer is matched in two steps: `--`,
    /// then `>`.
    pub(crate) fn read_comment(&mut self, src: &mut CharSource) -> Result<String, ParseError> {
        src.read_expected_string("<!--")?;
        let mut content = String::new();
        loop {
            content.push_str(&src.read_string_until("--")?);
            if src.looking_at(">") {
                src.skip(1);
                self.check_chars(src, &content, "comment")?;
                return Ok(content);
            }
            if !self.options.tidy {
                return Err(src.fatal("'--' is not allowed inside a comment"));
            }
            let loc = src.location();
            self.recover(loc, "kept '--' inside comment");
            if src.looking_at("->") {
                content.push('-');
                src.skip(2);
                return Ok(content);
            }
            content.push_str("--");
        }
    }

    /// Parses `<?target data?>` (XML 1.0 §2.6).
    pub(crate) fn read_pi(&mut self, src: &mut CharSource) -> Result<Markup, ParseError> {
        let loc = src.location();
        if at_xml_decl(src) {
            if self.options.tidy {
                src.read_string_until("?>")?;
                self.recover(loc, "skipped misplaced XML declaration");
                return Ok(Markup::Skipped);
            }
            return Err(ParseError::new(
                ErrorKind::WellFormedness,
                "XML declaration is only allowed at the start of the document",
                loc,
            ));
        }
        src.read_expected_string("<?")?;
        if self.options.tidy && !src.at_name_start() {
            src.read_string_until("?>")?;
            self.recover(loc, "skipped processing instruction with invalid target");
            return Ok(Markup::Skipped);
        }
        let target = src.parse_name()?;
        if target.eq_ignore_ascii_case("xml") {
            if self.options.tidy {
                src.read_string_until("?>")?;
                self.recover(loc, "skipped processing instruction with reserved target");
                return Ok(Markup::Skipped);
            }
            return Err(ParseError::new(
                ErrorKind::WellFormedness,
                format!("processing instruction target '{target}' is reserved"),
                loc,
            ));
        }
        if src.looking_at("?>") {
            src.skip(2);
            return Ok(Markup::Pi { target, data: None });
        }
        src.skip_whitespace_required()?;
        let data = src.read_string_until("?>")?;
        self.check_chars(src, &data, "processing instruction")?;
        Ok(Markup::Pi {
            target,
            data: Some(data),
        })
    }

    // -----------------------------------------------------------------
    // Tags (XML 1.0 §3.1)
    // -----------------------------------------------------------------

    fn read_tag(&mut self, src: &mut CharSource) -> Result<Markup, ParseError> {
        let location = src.location();
        let tidy = self.options.tidy;
        src.read_expected_char(&['<'])?;

        if src.peek_char() == Some('/') {
            src.skip(1);
            if tidy && !src.at_name_start() {
                self.skip_past(src, '>')?;
                self.recover(location, "skipped end tag with invalid name");
                return Ok(Markup::Skipped);
            }
            let name = self.tag_name(src)?;
            src.skip_whitespace();
            if tidy && src.peek_char() != Some('>') {
                self.skip_past(src, '>')?;
                self.recover(location.clone(), format!("ignored junk in end tag </{name}>"));
            } else {
                src.read_expected_char(&['>'])?;
            }
            return Ok(Markup::Tag(Tag {
                name,
                kind: TagKind::End,
                attributes: Vec::new(),
                location,
            }));
        }

        if tidy && !src.at_name_start() {
            if src.peek_char().map_or(true, |c| WHITESPACE.contains(&c)) {
                return Ok(Markup::Text("<".to_string()));
            }
            self.skip_past(src, '>')?;
            self.recover(location, "skipped tag with invalid name");
            return Ok(Markup::Skipped);
        }
        let name = self.tag_name(src)?;
        let mut attributes: Vec<(String, String)> = Vec::new();

        let kind = loop {
            let had_ws = src.skip_whitespace();
            match src.peek_char() {
                Some('>') => {
                    src.skip(1);
                    break TagKind::Start;
                }
                Some('/') if src.peek_at(1) == Some('>') => {
                    src.skip(2);
                    break TagKind::Empty;
                }
                None => {
                    return Err(src.error(
                        ErrorKind::UnexpectedEof,
                        format!("unexpected end of input in tag <{name}>"),
                    ))
                }
                Some(_) => {}
            }
            if !had_ws && !tidy {
                src.skip_whitespace_required()?;
            }
            if tidy && !src.at_name_start() {
                let loc = src.location();
                src.skip(1);
                self.recover(loc, format!("skipped stray character in tag <{name}>"));
                continue;
            }

            let attr_loc = src.location();
            let attr_name = self.tag_name(src)?;
            src.skip_whitespace();
            let value = if src.peek_char() == Some('=') {
                src.skip(1);
                src.skip_whitespace();
                self.attribute_value(src)?
            } else if tidy {
                self.recover(
                    attr_loc.clone(),
                    format!("attribute '{attr_name}' has no value"),
                );
                attr_name.clone()
            } else {
                return Err(src.fatal(format!(
                    "expected '=' after attribute name '{attr_name}'"
                )));
            };

            if attributes.iter().any(|(n, _)| *n == attr_name) {
                if tidy {
                    self.recover(attr_loc, format!("dropped duplicate attribute '{attr_name}'"));
                    continue;
                }
                return Err(ParseError::new(
                    ErrorKind::WellFormedness,
                    format!("duplicate attribute '{attr_name}' on <{name}>"),
                    attr_loc,
                ));
            }
            attributes.push((attr_name, value));
        };

        let kind = if tidy
            && kind == TagKind::Start
            && self.options.void_elements.iter().any(|v| *v == name)
        {
            TagKind::Empty
        } else {
            kind
        };

        Ok(Markup::Tag(Tag {
            name,
            kind,
            attributes,
            location,
        }))
    }

    /// Parses an element or attribute name, lowercased in tidy mode.
    fn tag_name(&mut self, src: &mut CharSource) -> Result<String, ParseError> {
        let name = src.parse_name()?;
        Ok(if self.options.tidy {
            name.to_ascii_lowercase()
        } else {
            name
        })
    }

    /// Parses an attribute value after `=`: a quoted literal, or in tidy
    /// mode an unquoted run ending at whitespace, `>` or `/>`. The
    /// terminator of an unquoted value is left for the tag loop.
    fn attribute_value(&mut self, src: &mut CharSource) -> Result<String, ParseError> {
        if matches!(src.peek_char(), Some('"' | '\'')) || !self.options.tidy {
            let (raw, start) = src.parse_quoted()?;
            return self.expand_attribute_value(src, &raw, &start);
        }
        let start = src.location();
        let mut raw = String::new();
        while let Some(c) = src.peek_char() {
            if WHITESPACE.contains(&c) || c == '>' || (c == '/' && src.peek_at(1) == Some('>')) {
                break;
            }
            raw.push(c);
            src.skip(1);
        }
        self.recover(start.clone(), "attribute value is not quoted");
        self.expand_attribute_value(src, &raw, &start)
    }

    // -----------------------------------------------------------------
    // Attribute-value normalization (XML 1.0 §3.3.3)
    // -----------------------------------------------------------------

    /// Expands references in a raw attribute literal and normalizes
    /// whitespace to spaces. `origin` is the position of the literal's
    /// first character.
    pub(crate) fn expand_attribute_value(
        &mut self,
        src: &CharSource,
        raw: &str,
        origin: &SourceLocation,
    ) -> Result<String, ParseError> {
        let mut sub = src.sub_source(raw, origin);
        let mut out = String::with_capacity(raw.len());
        self.expand_attribute_text(&mut sub, &mut out)?;
        Ok(out)
    }

    fn expand_attribute_text(
        &mut self,
        src: &mut CharSource,
        out: &mut String,
    ) -> Result<(), ParseError> {
        loop {
            let scan = src.read_string_until_char_eof(&['&', '<', '\t', '\n', '\r']);
            self.check_chars(src, &scan.text, "attribute value")?;
            out.push_str(&scan.text);
            if scan.hit_eof {
                return Ok(());
            }
            match src.peek_char() {
                Some('<') => {
                    if !self.options.tidy {
                        return Err(src.fatal("'<' is not allowed in attribute values"));
                    }
                    let loc = src.location();
                    src.skip(1);
                    out.push('<');
                    self.recover(loc, "kept '<' in attribute value");
                }
                Some('&') => self.attribute_reference(src, out)?,
                _ => {
                    src.read()?;
                    out.push(' ');
                }
            }
        }
    }

    fn attribute_reference(
        &mut self,
        src: &mut CharSource,
        out: &mut String,
    ) -> Result<(), ParseError> {
        let loc = src.location();
        let name = match self.parse_reference(src)? {
            Reference::Char(c) => {
                out.push(c);
                return Ok(());
            }
            Reference::Literal(text) => {
                out.push_str(&text);
                return Ok(());
            }
            Reference::Named(name) => name,
        };
        let decl = match self.resolve_general(&name, &loc)? {
            Resolved::Builtin(c) => {
                out.push(c);
                return Ok(());
            }
            Resolved::Unresolved => {
                out.push('&');
                out.push_str(&name);
                out.push(';');
                return Ok(());
            }
            Resolved::Entity(decl) => decl,
        };
        let text = match &decl.value {
            EntityValue::External(_) => {
                return Err(ParseError::new(
                    ErrorKind::WellFormedness,
                    format!("external entity '{name}' is not allowed in attribute values"),
                    loc,
                ))
            }
            EntityValue::Internal(text) => text.clone(),
        };
        let mut sub = src.sub_source(&text, &decl.origin);
        self.expanding(&decl, &loc, |p| p.expand_attribute_text(&mut sub, out))
            .map_err(|e| e.with_context(format!("in entity '{name}' referenced at {loc}")))
    }

    /// Looks up a general entity. Tidy mode passes undeclared references
    /// through as text instead of failing.
    pub(crate) fn resolve_general(
        &mut self,
        name: &str,
        loc: &SourceLocation,
    ) -> Result<Resolved, ParseError> {
        match self.registry.resolve_general(name, loc) {
            Err(err) if self.options.tidy && err.kind == ErrorKind::UndefinedReference => {
                self.recover(loc.clone(), format!("kept undefined entity reference '&{name};'"));
                Ok(Resolved::Unresolved)
            }
            other => other,
        }
    }

    // -----------------------------------------------------------------
    // References (XML 1.0 §4.1)
    // -----------------------------------------------------------------

    /// Parses a character or entity reference starting at `&`.
    pub(crate) fn parse_reference(
        &mut self,
        src: &mut CharSource,
    ) -> Result<Reference, ParseError> {
        let loc = src.location();
        src.read_expected_char(&['&'])?;

        if src.peek_char() == Some('#') {
            src.skip(1);
            let hex = src.peek_char() == Some('x');
            if hex {
                src.skip(1);
            }
            let scan = src.read_string_until_char_eof(&[';', '<', '&', ' ', '\n', '\t']);
            let terminated = !scan.hit_eof && src.peek_char() == Some(';');
            let digits_ok = if hex {
                scan.text.bytes().all(|b| b.is_ascii_hexdigit())
            } else {
                scan.text.bytes().all(|b| b.is_ascii_digit())
            };
            let value = if !digits_ok {
                None
            } else if hex {
                u32::from_str_radix(&scan.text, 16).ok()
            } else {
                scan.text.parse::<u32>().ok()
            };
            match value.and_then(char::from_u32).filter(|c| is_xml_char(*c)) {
                Some(c) if terminated => {
                    src.skip(1);
                    return Ok(Reference::Char(c));
                }
                _ if self.options.tidy => {
                    self.recover(loc, "kept malformed character reference");
                    let mut text = String::from(if hex { "&#x" } else { "&#" });
                    text.push_str(&scan.text);
                    return Ok(Reference::Literal(text));
                }
                Some(_) => return Err(src.fatal("character reference must end with ';'")),
                None => {
                    return Err(ParseError::new(
                        ErrorKind::WellFormedness,
                        format!("invalid character reference '&#{}{};'", if hex { "x" } else { "" }, scan.text),
                        loc,
                    ))
                }
            }
        }

        if self.options.tidy && !src.at_name_start() {
            self.recover(loc, "kept bare '&' as text");
            return Ok(Reference::Literal("&".to_string()));
        }
        let name = src.parse_name()?;
        if src.peek_char() == Some(';') {
            src.skip(1);
            return Ok(Reference::Named(name));
        }
        if self.options.tidy {
            self.recover(loc, format!("kept unterminated reference '&{name}'"));
            return Ok(Reference::Literal(format!("&{name}")));
        }
        Err(src.fatal(format!("entity reference '&{name}' must end with ';'")))
    }
}

/// `VersionNum ::= '1.' [0-9]+`
fn is_version_num(value: &str) -> bool {
    value
        .strip_prefix("1.")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// `EncName ::= [A-Za-z] ([A-Za-z0-9._] | '-')*`
fn is_enc_name(value: &str) -> bool {
    let mut chars = value.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Reads a `Nmtoken` (XML 1.0 §2.3 `[7]`).
pub(crate) fn parse_nmtoken(src: &mut CharSource) -> Result<String, ParseError> {
    let mut token = String::new();
    while let Some(c) = src.peek_char().filter(|c| is_name_char(*c)) {
        token.push(c);
        src.skip(1);
    }
    if token.is_empty() {
        return Err(src.fatal("expected a name token"));
    }
    Ok(token)
}
