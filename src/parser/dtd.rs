//! Document type declarations and DTD subsets.
//!
//! See XML 1.0 §2.8 `[28]`–`[31]` for the overall grammar, §3.2–§3.3 for
//! element and attribute-list declarations, §4.2 for entity declarations
//! and §4.7 for notations.
//!
//! Every markup declaration is first read up to its closing `>` (quoted
//! literals may contain `>`), then parsed from a sub-source positioned at
//! the declaration. Where parameter entity references are allowed inside
//! declarations (the external subset, and tidy mode) they are expanded into
//! that text first, padded with one space on each side (§4.4.8).

use std::path::Path;

use crate::dtd::{
    AttributeDecl, AttributeDefault, AttributeType, ContentModel, ContentSpec, ContentSpecKind,
    ElementDecl, EntityDecl, EntityValue, ExternalId, ExternalSubset, NotationDecl, Occurrence,
};
use crate::error::{ErrorKind, ParseError, SourceLocation};
use crate::tree::{DocumentType, NodeKind};

use super::input::{is_name_start_char, is_pubid_char, CharSource, WHITESPACE};
use super::markup::{parse_nmtoken, Reference};
use super::xml::{DefaultAttribute, XmlParser};

/// Which subset a declaration came from. Parameter entity references
/// inside declarations and conditional sections are only allowed in the
/// external subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subset {
    Internal,
    External,
}

/// What terminates a run of declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubsetEnd {
    /// `]` closing the internal subset (not consumed).
    Bracket,
    /// `]]>` closing an `INCLUDE` section (consumed).
    Conditional,
    /// End of the source: an external subset or parameter entity.
    Eof,
}

impl XmlParser<'_> {
    // -----------------------------------------------------------------
    // DOCTYPE
    // -----------------------------------------------------------------

    /// Parses `<!DOCTYPE ...>`, loads the external subset when allowed and
    /// appends the document type node.
    pub(super) fn parse_doctype(&mut self, src: &mut CharSource) -> Result<(), ParseError> {
        let tidy = self.options.tidy;
        let location = src.location();
        if tidy {
            src.read_expected_string_ci("<!DOCTYPE")?;
        } else {
            src.read_expected_string("<!DOCTYPE")?;
        }
        src.skip_whitespace_required()?;
        let mut name = src.parse_name()?;
        if tidy {
            name = name.to_ascii_lowercase();
        }

        let had_ws = src.skip_whitespace();
        let external_id =
            if had_ws && (self.at_keyword(src, "SYSTEM") || self.at_keyword(src, "PUBLIC")) {
                let id = self.parse_external_id(src, tidy)?;
                src.skip_whitespace();
                id
            } else {
                ExternalId::default()
            };
        self.doctype_name = Some(name.clone());
        self.registry.has_dtd = true;

        let mut declared = ExternalSubset::default();
        let mut internal_subset = None;
        if src.peek_char() == Some('[') {
            src.skip(1);
            let start = src.offset();
            self.parse_subset(src, Subset::Internal, SubsetEnd::Bracket, &mut declared)?;
            internal_subset = Some(src.slice(start, src.offset()));
            src.read_expected_char(&[']'])?;
            src.skip_chars(WHITESPACE)?;
        }
        src.read_expected_char(&['>'])?;

        if !external_id.is_empty() && !self.registry.standalone && self.options.load_external_dtd {
            if let Some(external) = self.load_external_subset(src, &external_id, &location)? {
                declared.elements.extend(external.elements);
                declared.attributes.extend(external.attributes);
                declared.notations.extend(external.notations);
            }
        }

        let mut doctype = DocumentType::new(name);
        doctype.external_id = external_id;
        doctype.internal_subset = internal_subset;
        for decl in self.registry.general_entities() {
            doctype.entities.insert(decl.name.clone(), decl.clone());
        }
        for decl in self.registry.parameter_entities() {
            doctype.parameter_entities.insert(decl.name.clone(), decl.clone());
        }
        for decl in declared.elements {
            doctype.elements.entry(decl.name.clone()).or_insert(decl);
        }
        for decl in declared.attributes {
            let list = doctype.attributes.entry(decl.element_name.clone()).or_default();
            if !list.iter().any(|a| a.attribute_name == decl.attribute_name) {
                list.push(decl);
            }
        }
        for decl in declared.notations {
            doctype.notations.entry(decl.name.clone()).or_insert(decl);
        }

        let root = self.doc.root();
        self.append(root, NodeKind::DocumentType(Box::new(doctype)));
        Ok(())
    }

    /// Skips a document type declaration without processing it.
    pub(super) fn skip_doctype(&mut self, src: &mut CharSource) -> Result<(), ParseError> {
        let mut depth = 0u32;
        let mut quote: Option<char> = None;
        loop {
            let Some(c) = src.peek_char() else {
                return Err(src.error(
                    ErrorKind::UnexpectedEof,
                    "unexpected end of input in document type declaration",
                ));
            };
            src.skip(1);
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None => match c {
                    '"' | '\'' => quote = Some(c),
                    '[' => depth += 1,
                    ']' => depth = depth.saturating_sub(1),
                    '>' if depth == 0 => return Ok(()),
                    _ => {}
                },
            }
        }
    }

    fn at_keyword(&self, src: &CharSource, keyword: &str) -> bool {
        if self.options.tidy {
            src.looking_at_ci(keyword)
        } else {
            src.looking_at(keyword)
        }
    }

    /// Parses `SYSTEM "uri"` or `PUBLIC "id" "uri"` (§4.2.2 `[75]`). With
    /// `public_only`, the system literal after a public identifier may be
    /// omitted (notations, and document types in tidy mode).
    fn parse_external_id(
        &mut self,
        src: &mut CharSource,
        public_only: bool,
    ) -> Result<ExternalId, ParseError> {
        if self.at_keyword(src, "SYSTEM") {
            src.skip(6);
            src.skip_whitespace_required()?;
            let (system, _) = src.parse_quoted()?;
            return Ok(ExternalId::system(system));
        }
        if !self.at_keyword(src, "PUBLIC") {
            return Err(src.fatal("expected SYSTEM or PUBLIC"));
        }
        src.skip(6);
        src.skip_whitespace_required()?;
        let (public, loc) = src.parse_quoted()?;
        if let Some(bad) = public.chars().find(|c| !is_pubid_char(*c)) {
            return Err(ParseError::new(
                ErrorKind::WellFormedness,
                format!("invalid character {bad:?} in public identifier"),
                loc,
            ));
        }
        let public = public.split_ascii_whitespace().collect::<Vec<_>>().join(" ");

        let saved = src.save_position();
        let had_ws = src.skip_whitespace();
        let system = if had_ws && matches!(src.peek_char(), Some('"' | '\'')) {
            Some(src.parse_quoted()?.0)
        } else {
            src.restore_position(saved);
            if !public_only {
                return Err(src.fatal("PUBLIC identifier requires a system literal"));
            }
            None
        };
        Ok(ExternalId {
            public_id: Some(public),
            system_id: system,
        })
    }

    // -----------------------------------------------------------------
    // External resources
    // -----------------------------------------------------------------

    /// Loads the external subset for `id`, from the shared cache when
    /// possible. An unreadable subset is a warning, not an error.
    fn load_external_subset(
        &mut self,
        src: &CharSource,
        id: &ExternalId,
        location: &SourceLocation,
    ) -> Result<Option<ExternalSubset>, ParseError> {
        let options = self.options;
        if let Some(subset) = options.dtd_cache.as_ref().and_then(|cache| cache.get(id)) {
            tracing::debug!(%id, "external subset cache hit");
            let declared: usize = subset
                .general_entities
                .iter()
                .chain(&subset.parameter_entities)
                .filter_map(EntityDecl::replacement_text)
                .map(str::len)
                .sum();
            self.registry.add_input(declared);
            self.registry.merge(&subset);
            for decl in &subset.attributes {
                if let Some(raw) = decl.default.value() {
                    let value = self.expand_attribute_value(src, raw, location)?;
                    self.register_default(&decl.element_name, &decl.attribute_name, value);
                }
            }
            return Ok(Some(subset));
        }

        let mut sub = match self.open_external(id, location) {
            Ok(sub) => sub,
            Err(err) if err.kind == ErrorKind::Io => {
                tracing::warn!(%id, error = %err.message, "external subset not loaded");
                self.warn(
                    location.clone(),
                    format!("external subset {id} not loaded: {}", err.message),
                );
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        tracing::debug!(%id, source = %sub.source_name(), "parsing external subset");

        let mut subset = ExternalSubset::default();
        self.parse_subset(&mut sub, Subset::External, SubsetEnd::Eof, &mut subset)
            .map_err(|e| e.with_context(format!("in external subset {id} referenced at {location}")))?;
        if let Some(cache) = &options.dtd_cache {
            cache.put(id, &subset);
        }
        Ok(Some(subset))
    }

    /// Opens and decodes an external entity or subset, skipping its text
    /// declaration. `origin` is where it was declared; relative system
    /// identifiers resolve against that source.
    ///
    /// Resolver failures are [`ErrorKind::Io`] errors.
    pub(super) fn open_external(
        &mut self,
        id: &ExternalId,
        origin: &SourceLocation,
    ) -> Result<CharSource, ParseError> {
        let base = self.resolve_base(&origin.source);
        let resource = self
            .options
            .resolver
            .open(id, base.as_deref())
            .map_err(|e| ParseError::io(&e, origin.clone()))?;
        let start = SourceLocation::new(resource.location.as_str(), 1, 1);
        let decoded = crate::encoding::decode(&resource.bytes, self.options.tidy)
            .map_err(|e| super::encoding_error(&e, start.clone()))?;
        for warning in decoded.warnings {
            self.warn(start.clone(), warning);
        }
        self.registry.add_input(decoded.text.len());
        let mut sub = CharSource::new(&decoded.text, resource.location.as_str());
        sub.set_max_name_length(self.options.max_name_length);
        self.skip_text_decl(&mut sub)?;
        Ok(sub)
    }

    /// The base for resolving identifiers declared in `source`: the source
    /// itself when it is a file, else the configured base path.
    fn resolve_base(&self, source: &str) -> Option<String> {
        if Path::new(source).is_file() {
            return Some(source.to_string());
        }
        self.options
            .base_path
            .as_ref()
            .map(|p| p.display().to_string())
    }

    /// Opens the replacement text of a parameter entity. An external
    /// parameter entity that cannot be read is skipped with a warning.
    fn open_parameter_entity(
        &mut self,
        src: &CharSource,
        decl: &EntityDecl,
        location: &SourceLocation,
    ) -> Result<Option<CharSource>, ParseError> {
        match &decl.value {
            EntityValue::Internal(text) => Ok(Some(src.sub_source(text, &decl.origin))),
            EntityValue::External(id) => match self.open_external(id, &decl.origin) {
                Ok(sub) => Ok(Some(sub)),
                Err(err) if err.kind == ErrorKind::Io => {
                    tracing::warn!(entity = %decl.name, error = %err.message, "parameter entity not loaded");
                    self.warn(
                        location.clone(),
                        format!("parameter entity '%{};' not loaded: {}", decl.name, err.message),
                    );
                    Ok(None)
                }
                Err(err) => Err(err),
            },
        }
    }

    /// Reads `%name;` and returns the declaration.
    fn parameter_reference(
        &mut self,
        src: &mut CharSource,
    ) -> Result<(EntityDecl, SourceLocation), ParseError> {
        let location = src.location();
        src.read_expected_char(&['%'])?;
        let name = src.parse_name()?;
        src.read_expected_char(&[';'])?;
        let decl = self.registry.resolve_parameter(&name, &location)?;
        Ok((decl, location))
    }

    /// Returns the full replacement text of a parameter entity, or `None`
    /// if an external one could not be read.
    fn parameter_entity_text(
        &mut self,
        src: &CharSource,
        decl: &EntityDecl,
        location: &SourceLocation,
    ) -> Result<Option<String>, ParseError> {
        let Some(mut sub) = self.open_parameter_entity(src, decl, location)? else {
            return Ok(None);
        };
        Ok(Some(sub.read_string_until_char_eof(&[]).text))
    }

    // -----------------------------------------------------------------
    // Subsets (§2.8 [28b], [31])
    // -----------------------------------------------------------------

    fn parse_subset(
        &mut self,
        src: &mut CharSource,
        kind: Subset,
        end: SubsetEnd,
        out: &mut ExternalSubset,
    ) -> Result<(), ParseError> {
        loop {
            src.skip_whitespace();
            match src.peek_char() {
                None if end == SubsetEnd::Eof => return Ok(()),
                None => {
                    let what = if end == SubsetEnd::Bracket {
                        "internal subset"
                    } else {
                        "conditional section"
                    };
                    return Err(src.error(
                        ErrorKind::UnexpectedEof,
                        format!("unexpected end of input in {what}"),
                    ));
                }
                Some(']') if end == SubsetEnd::Bracket => return Ok(()),
                Some(']') if end == SubsetEnd::Conditional && src.looking_at("]]>") => {
                    src.skip(3);
                    return Ok(());
                }
                Some('%') => self.subset_reference(src, kind, out)?,
                Some('<') => self.markup_decl(src, kind, out)?,
                Some(c) => {
                    if !self.options.tidy {
                        return Err(src.fatal(format!(
                            "unexpected character {c:?} in document type declaration"
                        )));
                    }
                    let loc = src.location();
                    src.skip(1);
                    src.read_string_until_char_eof(&['<', ']', '%']);
                    self.recover(loc, "skipped stray text in document type declaration");
                }
            }
        }
    }

    /// A parameter entity reference between declarations: its replacement
    /// text is parsed as declarations in place.
    fn subset_reference(
        &mut self,
        src: &mut CharSource,
        kind: Subset,
        out: &mut ExternalSubset,
    ) -> Result<(), ParseError> {
        let (decl, location) = self.parameter_reference(src)?;
        let Some(mut sub) = self.open_parameter_entity(src, &decl, &location)? else {
            return Ok(());
        };
        let sub_kind = if decl.is_external() {
            Subset::External
        } else {
            kind
        };
        self.expanding(&decl, &location, |p| {
            p.parse_subset(&mut sub, sub_kind, SubsetEnd::Eof, out)
        })
        .map_err(|e| {
            e.with_context(format!(
                "in parameter entity '%{};' referenced at {location}",
                decl.name
            ))
        })
    }

    fn markup_decl(
        &mut self,
        src: &mut CharSource,
        kind: Subset,
        out: &mut ExternalSubset,
    ) -> Result<(), ParseError> {
        let tidy = self.options.tidy;
        if src.looking_at("<!--") {
            self.read_comment(src)?;
            return Ok(());
        }
        if src.looking_at("<?") {
            self.read_pi(src)?;
            return Ok(());
        }

        let location = src.location();
        if src.looking_at("<![") {
            if kind == Subset::External {
                return self.conditional_section(src, out);
            }
            if !tidy {
                return Err(src.fatal("conditional sections are only allowed in the external subset"));
            }
            self.skip_doctype(src)?;
            self.recover(location, "skipped conditional section in internal subset");
            return Ok(());
        }

        let keyword = ["<!ENTITY", "<!ELEMENT", "<!ATTLIST", "<!NOTATION"]
            .into_iter()
            .find(|k| src.looking_at(k));
        let Some(keyword) = keyword else {
            if !tidy {
                return Err(src.fatal("unexpected markup in document type declaration"));
            }
            declaration_text(src)?;
            self.recover(location, "skipped unknown declaration in document type declaration");
            return Ok(());
        };

        let mut text = declaration_text(src)?;
        if has_parameter_reference(&text) {
            if kind == Subset::Internal && !tidy {
                return Err(ParseError::new(
                    ErrorKind::WellFormedness,
                    "parameter entity references are not allowed inside markup declarations in the internal subset",
                    location,
                ));
            }
            text = self.expand_declaration(src, &text, &location)?;
        }

        let mut decl_src = src.sub_source(&text, &location);
        let result = match keyword {
            "<!ENTITY" => self.entity_decl(&mut decl_src, kind, out),
            "<!ELEMENT" => element_decl(&mut decl_src, out),
            "<!ATTLIST" => self.attlist_decl(&mut decl_src, out),
            _ => self.notation_decl(&mut decl_src, out),
        };
        match result {
            Err(err) if tidy && !matches!(err.kind, ErrorKind::Io | ErrorKind::Encoding) => {
                self.recover(err.location, format!("skipped malformed declaration: {}", err.message));
                Ok(())
            }
            other => other,
        }
    }

    /// Replaces parameter entity references outside quoted literals with
    /// their replacement text, recursively.
    fn expand_declaration(
        &mut self,
        src: &CharSource,
        text: &str,
        location: &SourceLocation,
    ) -> Result<String, ParseError> {
        let mut sub = src.sub_source(text, location);
        let mut out = String::with_capacity(text.len());
        let mut quote: Option<char> = None;
        while let Some(c) = sub.peek_char() {
            if quote.is_none() && c == '%' && sub.peek_at(1).is_some_and(is_name_start_char) {
                let (decl, loc) = self.parameter_reference(&mut sub)?;
                let expanded = self.expanding(&decl, &loc, |p| {
                    match p.parameter_entity_text(&sub, &decl, &loc)? {
                        Some(replacement) => p.expand_declaration(&sub, &replacement, &decl.origin).map(Some),
                        None => Ok(None),
                    }
                })?;
                if let Some(expanded) = expanded {
                    out.push(' ');
                    out.push_str(&expanded);
                    out.push(' ');
                }
                continue;
            }
            match quote {
                Some(q) if c == q => quote = None,
                None if c == '"' || c == '\'' => quote = Some(c),
                _ => {}
            }
            out.push(c);
            sub.skip(1);
        }
        Ok(out)
    }

    /// `<![INCLUDE[ ... ]]>` or `<![IGNORE[ ... ]]>` (§3.4).
    fn conditional_section(
        &mut self,
        src: &mut CharSource,
        out: &mut ExternalSubset,
    ) -> Result<(), ParseError> {
        let location = src.location();
        src.read_expected_string("<![")?;
        src.skip_whitespace();
        let keyword = if src.peek_char() == Some('%') {
            let (decl, loc) = self.parameter_reference(src)?;
            self.parameter_entity_text(src, &decl, &loc)?
                .unwrap_or_default()
                .trim()
                .to_string()
        } else {
            src.parse_name()?
        };
        src.skip_whitespace();
        src.read_expected_char(&['['])?;
        match keyword.as_str() {
            "INCLUDE" => self.parse_subset(src, Subset::External, SubsetEnd::Conditional, out),
            "IGNORE" => skip_ignored_section(src),
            other => Err(ParseError::new(
                ErrorKind::WellFormedness,
                format!("conditional section keyword must be INCLUDE or IGNORE, found '{other}'"),
                location,
            )),
        }
    }

    // -----------------------------------------------------------------
    // Declarations
    // -----------------------------------------------------------------

    /// `<!ENTITY [%] name (EntityValue | ExternalID [NDATA name])>`
    fn entity_decl(
        &mut self,
        src: &mut CharSource,
        kind: Subset,
        out: &mut ExternalSubset,
    ) -> Result<(), ParseError> {
        src.read_expected_string("<!ENTITY")?;
        src.skip_whitespace_required()?;
        let parameter = src.peek_char() == Some('%');
        if parameter {
            src.skip(1);
            src.skip_whitespace_required()?;
        }
        let name = src.parse_name()?;
        src.skip_whitespace_required()?;

        let decl_location = src.location();
        let (value, origin) = if matches!(src.peek_char(), Some('"' | '\'')) {
            let (raw, start) = src.parse_quoted()?;
            let text = self.entity_value(src, &raw, &start, kind)?;
            (EntityValue::Internal(text), start)
        } else {
            (
                EntityValue::External(self.parse_external_id(src, false)?),
                decl_location,
            )
        };

        let had_ws = src.skip_whitespace();
        let mut notation = None;
        if src.looking_at("NDATA") {
            if parameter || !matches!(value, EntityValue::External(_)) {
                return Err(src.fatal("NDATA is only allowed on external general entities"));
            }
            if !had_ws {
                src.skip_whitespace_required()?;
            }
            src.skip(5);
            src.skip_whitespace_required()?;
            notation = Some(src.parse_name()?);
            src.skip_whitespace();
        }
        src.read_expected_char(&['>'])?;

        let decl = EntityDecl {
            name,
            value,
            parameter,
            notation,
            origin,
        };
        if parameter {
            out.parameter_entities.push(decl.clone());
        } else {
            out.general_entities.push(decl.clone());
        }
        self.registry.declare(decl);
        Ok(())
    }

    /// Computes the replacement text of an entity value literal (§4.5):
    /// character references and parameter entity references are
    /// expanded, general entity references are kept as written.
    fn entity_value(
        &mut self,
        src: &CharSource,
        raw: &str,
        start: &SourceLocation,
        kind: Subset,
    ) -> Result<String, ParseError> {
        let mut sub = src.sub_source(raw, start);
        let mut out = String::with_capacity(raw.len());
        loop {
            let scan = sub.read_string_until_char_eof(&['&', '%']);
            out.push_str(&scan.text);
            if scan.hit_eof {
                return Ok(out);
            }
            if sub.peek_char() == Some('%') {
                if kind == Subset::Internal && !self.options.tidy {
                    return Err(sub.fatal(
                        "parameter entity references are not allowed in entity values in the internal subset",
                    ));
                }
                let (decl, loc) = self.parameter_reference(&mut sub)?;
                let text = self.expanding(&decl, &loc, |p| p.parameter_entity_text(&sub, &decl, &loc))?;
                if let Some(text) = text {
                    out.push_str(&text);
                }
                continue;
            }
            match self.parse_reference(&mut sub)? {
                Reference::Char(c) => out.push(c),
                Reference::Named(name) => {
                    out.push('&');
                    out.push_str(&name);
                    out.push(';');
                }
                Reference::Literal(text) => out.push_str(&text),
            }
        }
    }

    /// `<!ATTLIST element (name type default)*>`
    fn attlist_decl(&mut self, src: &mut CharSource, out: &mut ExternalSubset) -> Result<(), ParseError> {
        src.read_expected_string("<!ATTLIST")?;
        src.skip_whitespace_required()?;
        let element_name = src.parse_name()?;
        loop {
            let had_ws = src.skip_whitespace();
            if src.peek_char() == Some('>') {
                src.skip(1);
                return Ok(());
            }
            if !had_ws {
                src.skip_whitespace_required()?;
            }
            let attribute_name = src.parse_name()?;
            src.skip_whitespace_required()?;
            let attribute_type = parse_attribute_type(src)?;
            src.skip_whitespace_required()?;

            let default = if src.looking_at("#REQUIRED") {
                src.skip(9);
                AttributeDefault::Required
            } else if src.looking_at("#IMPLIED") {
                src.skip(8);
                AttributeDefault::Implied
            } else {
                let fixed = src.looking_at("#FIXED");
                if fixed {
                    src.skip(6);
                    src.skip_whitespace_required()?;
                }
                let (raw, start) = src.parse_quoted()?;
                let value = self.expand_attribute_value(src, &raw, &start)?;
                self.register_default(&element_name, &attribute_name, value);
                if fixed {
                    AttributeDefault::Fixed(raw)
                } else {
                    AttributeDefault::Default(raw)
                }
            };

            out.attributes.push(AttributeDecl {
                element_name: element_name.clone(),
                attribute_name,
                attribute_type,
                default,
            });
        }
    }

    /// Remembers the expanded default for `element`/`name`; the first
    /// definition of an attribute is binding.
    fn register_default(&mut self, element: &str, name: &str, value: String) {
        let defaults = self.attr_defaults.entry(element.to_string()).or_default();
        if !defaults.iter().any(|d| d.name == name) {
            defaults.push(DefaultAttribute {
                name: name.to_string(),
                value,
            });
        }
    }

    /// `<!NOTATION name (ExternalID | PublicID)>`
    fn notation_decl(&mut self, src: &mut CharSource, out: &mut ExternalSubset) -> Result<(), ParseError> {
        src.read_expected_string("<!NOTATION")?;
        src.skip_whitespace_required()?;
        let name = src.parse_name()?;
        src.skip_whitespace_required()?;
        let external_id = self.parse_external_id(src, true)?;
        src.skip_whitespace();
        src.read_expected_char(&['>'])?;
        out.notations.push(NotationDecl { name, external_id });
        Ok(())
    }
}

/// Reads a whole markup declaration, from `<!` through the `>` that is not
/// inside a quoted literal.
fn declaration_text(src: &mut CharSource) -> Result<String, ParseError> {
    let start = src.offset();
    let mut quote: Option<char> = None;
    loop {
        let Some(c) = src.peek_char() else {
            return Err(src.error(
                ErrorKind::UnexpectedEof,
                "unexpected end of input in markup declaration",
            ));
        };
        src.skip(1);
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '>' => return Ok(src.slice(start, src.offset())),
            None => {}
        }
    }
}

/// Returns `true` if `text` holds a `%name;` reference outside quoted
/// literals.
fn has_parameter_reference(text: &str) -> bool {
    let mut quote: Option<char> = None;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '%' && chars.peek().copied().is_some_and(is_name_start_char) => {
                return true
            }
            None => {}
        }
    }
    false
}

/// Skips the body of an `IGNORE` section, honoring nested sections.
fn skip_ignored_section(src: &mut CharSource) -> Result<(), ParseError> {
    let mut depth = 1u32;
    loop {
        if src.looking_at("<![") {
            depth += 1;
            src.skip(3);
        } else if src.looking_at("]]>") {
            depth -= 1;
            src.skip(3);
            if depth == 0 {
                return Ok(());
            }
        } else if src.at_end() {
            return Err(src.error(
                ErrorKind::UnexpectedEof,
                "unexpected end of input in ignored section",
            ));
        } else {
            src.skip(1);
        }
    }
}

/// `<!ELEMENT name contentspec>` (§3.2 `[45]`)
fn element_decl(src: &mut CharSource, out: &mut ExternalSubset) -> Result<(), ParseError> {
    src.read_expected_string("<!ELEMENT")?;
    src.skip_whitespace_required()?;
    let name = src.parse_name()?;
    src.skip_whitespace_required()?;
    let content_model = if src.looking_at("EMPTY") {
        src.skip(5);
        ContentModel::Empty
    } else if src.looking_at("ANY") {
        src.skip(3);
        ContentModel::Any
    } else if src.peek_char() == Some('(') {
        parse_content_model(src)?
    } else {
        return Err(src.fatal(format!(
            "expected EMPTY, ANY or a content model for element '{name}'"
        )));
    };
    src.skip_whitespace();
    src.read_expected_char(&['>'])?;
    out.elements.push(ElementDecl {
        name,
        content_model,
    });
    Ok(())
}

/// Mixed content (§3.2.2 `[51]`) or element content (§3.2.1 `[47]`).
fn parse_content_model(src: &mut CharSource) -> Result<ContentModel, ParseError> {
    src.read_expected_char(&['('])?;
    src.skip_whitespace();
    if !src.looking_at("#PCDATA") {
        return Ok(ContentModel::Children(parse_group(src)?));
    }

    src.skip(7);
    let mut names = Vec::new();
    loop {
        src.skip_whitespace();
        match src.peek_char() {
            Some(')') => {
                src.skip(1);
                break;
            }
            Some('|') => {
                src.skip(1);
                src.skip_whitespace();
                names.push(src.parse_name()?);
            }
            _ => return Err(src.fatal("expected '|' or ')' in mixed content model")),
        }
    }
    if src.peek_char() == Some('*') {
        src.skip(1);
    } else if !names.is_empty() {
        return Err(src.fatal("mixed content model with element names must end with ')*'"));
    }
    Ok(ContentModel::Mixed(names))
}

/// The rest of a group after its `(`: particles joined by `,` or `|`.
fn parse_group(src: &mut CharSource) -> Result<ContentSpec, ParseError> {
    let mut items = vec![parse_particle(src)?];
    let mut separator: Option<char> = None;
    loop {
        src.skip_whitespace();
        match src.peek_char() {
            Some(')') => {
                src.skip(1);
                break;
            }
            Some(c @ (',' | '|')) => {
                if separator.is_some_and(|s| s != c) {
                    return Err(src.fatal("cannot mix ',' and '|' in one content model group"));
                }
                separator = Some(c);
                src.skip(1);
                items.push(parse_particle(src)?);
            }
            _ => return Err(src.fatal("expected ',', '|' or ')' in content model")),
        }
    }
    let kind = if separator == Some('|') {
        ContentSpecKind::Choice(items)
    } else {
        ContentSpecKind::Seq(items)
    };
    Ok(ContentSpec {
        kind,
        occurrence: parse_occurrence(src),
    })
}

fn parse_particle(src: &mut CharSource) -> Result<ContentSpec, ParseError> {
    src.skip_whitespace();
    if src.peek_char() == Some('(') {
        src.skip(1);
        src.skip_whitespace();
        return parse_group(src);
    }
    let name = src.parse_name()?;
    Ok(ContentSpec {
        kind: ContentSpecKind::Name(name),
        occurrence: parse_occurrence(src),
    })
}

fn parse_occurrence(src: &mut CharSource) -> Occurrence {
    let occurrence = match src.peek_char() {
        Some('?') => Occurrence::Optional,
        Some('*') => Occurrence::ZeroOrMore,
        Some('+') => Occurrence::OneOrMore,
        _ => return Occurrence::Once,
    };
    src.skip(1);
    occurrence
}

/// §3.3.1 `[54]`–`[59]`. Longer keywords are tried first so `IDREFS` is not
/// read as `ID`.
fn parse_attribute_type(src: &mut CharSource) -> Result<AttributeType, ParseError> {
    if src.looking_at("NOTATION") {
        src.skip(8);
        src.skip_whitespace_required()?;
        return Ok(AttributeType::Notation(parse_enumeration(src, true)?));
    }
    if src.peek_char() == Some('(') {
        return Ok(AttributeType::Enumeration(parse_enumeration(src, false)?));
    }
    let keywords = [
        ("CDATA", AttributeType::CData),
        ("IDREFS", AttributeType::IdRefs),
        ("IDREF", AttributeType::IdRef),
        ("ID", AttributeType::Id),
        ("ENTITIES", AttributeType::Entities),
        ("ENTITY", AttributeType::Entity),
        ("NMTOKENS", AttributeType::NmTokens),
        ("NMTOKEN", AttributeType::NmToken),
    ];
    for (keyword, attribute_type) in keywords {
        if src.looking_at(keyword) {
            src.skip(keyword.len());
            return Ok(attribute_type);
        }
    }
    Err(src.fatal("expected an attribute type"))
}

/// `'(' S? token (S? '|' S? token)* S? ')'` where tokens are names for
/// notation types and name tokens for enumerations.
fn parse_enumeration(src: &mut CharSource, names: bool) -> Result<Vec<String>, ParseError> {
    src.read_expected_char(&['('])?;
    let mut values = Vec::new();
    loop {
        src.skip_whitespace();
        values.push(if names {
            src.parse_name()?
        } else {
            parse_nmtoken(src)?
        });
        src.skip_whitespace();
        if src.read_expected_char(&['|', ')'])? == ')' {
            return Ok(values);
        }
    }
}
