//! Parser state and the document-level loop.
//!
//! Implements a hand-rolled recursive descent parser for XML 1.0 (Fifth
//! Edition). See <https://www.w3.org/TR/xml/> for the grammar. This module
//! owns the prolog, the document element and trailing misc; markup
//! constructs, DTD subsets and element content live in the sibling
//! `markup`, `dtd` and `content` modules as further `impl` blocks on
//! [`XmlParser`].

use std::collections::HashMap;

use crate::dtd::EntityDecl;
use crate::error::{ErrorKind, ErrorSeverity, ParseDiagnostic, ParseError, SourceLocation};
use crate::tree::{Document, NodeId, NodeKind, StyleSheet};

use super::input::{CharSource, WHITESPACE};
use super::markup::{at_xml_decl, Markup, TagKind};
use super::registry::{EntityRegistry, ExpansionLimits};
use super::ParseOptions;

/// A declared attribute default with references already expanded.
#[derive(Debug, Clone)]
pub(crate) struct DefaultAttribute {
    pub name: String,
    pub value: String,
}

/// The core XML parser.
pub(crate) struct XmlParser<'a> {
    /// Parser options.
    pub(super) options: &'a ParseOptions,
    /// The document being built.
    pub(super) doc: Document,
    /// Declared entities and expansion guards.
    pub(super) registry: EntityRegistry,
    /// Problems repaired in tidy mode, and warnings.
    pub(super) diagnostics: Vec<ParseDiagnostic>,
    /// Names of the currently open elements, outermost first.
    pub(super) open: Vec<String>,
    /// Number of entity sub-sources currently being parsed as content.
    pub(super) entity_depth: u32,
    /// Attribute defaults from ATTLIST declarations, keyed by element name.
    pub(super) attr_defaults: HashMap<String, Vec<DefaultAttribute>>,
    /// The name declared by the document type declaration.
    pub(super) doctype_name: Option<String>,
}

impl<'a> XmlParser<'a> {
    pub fn new(options: &'a ParseOptions) -> Self {
        Self {
            options,
            doc: Document::new(),
            registry: EntityRegistry::new(ExpansionLimits::from(options)),
            diagnostics: Vec::new(),
            open: Vec::new(),
            entity_depth: 0,
            attr_defaults: HashMap::new(),
            doctype_name: None,
        }
    }

    /// Seeds the diagnostics list, e.g. with decoder warnings.
    pub fn with_diagnostics(mut self, diagnostics: Vec<ParseDiagnostic>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Main parse entry point. Parses the entire document.
    pub fn parse(mut self, text: &str) -> Result<Document, ParseError> {
        let source = self
            .options
            .source_name
            .as_deref()
            .unwrap_or(SourceLocation::UNKNOWN);
        let mut src = CharSource::new(text, source);
        src.set_max_name_length(self.options.max_name_length);
        self.registry.add_input(text.len());

        match self.parse_document(&mut src) {
            Ok(()) => {
                self.doc.diagnostics = std::mem::take(&mut self.diagnostics);
                Ok(self.doc)
            }
            Err(mut err) => {
                err.diagnostics = std::mem::take(&mut self.diagnostics);
                Err(err)
            }
        }
    }

    // --- Diagnostics ---

    /// Records a problem that tidy mode repaired.
    pub(super) fn recover(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.push_diagnostic(ErrorSeverity::Error, location, message.into());
    }

    /// Records a non-fatal warning.
    pub(super) fn warn(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.push_diagnostic(ErrorSeverity::Warning, location, message.into());
    }

    fn push_diagnostic(&mut self, severity: ErrorSeverity, location: SourceLocation, message: String) {
        tracing::debug!(%location, %severity, "{message}");
        self.diagnostics.push(ParseDiagnostic {
            severity,
            message,
            location,
        });
    }

    /// Runs `f` with `decl` marked as being expanded. The mark is cleared
    /// whether `f` succeeds or not, so a repaired error in tidy mode does
    /// not leave the entity looking recursive.
    pub(super) fn expanding<T>(
        &mut self,
        decl: &EntityDecl,
        location: &SourceLocation,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        self.registry.begin_expansion(decl, location)?;
        let result = f(self);
        self.registry.end_expansion(decl);
        result
    }

    /// Creates a node and appends it to `parent` without hierarchy checks.
    pub(super) fn append(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = self.doc.create_node(kind);
        self.doc.link_before(parent, id, None);
        id
    }

    // --- Document (XML 1.0 §2.1 [1]) ---

    fn parse_document(&mut self, src: &mut CharSource) -> Result<(), ParseError> {
        if at_xml_decl(src) {
            let decl = self.parse_xml_decl(src, false)?;
            self.registry.standalone = decl.standalone == Some(true);
            self.doc.version = decl.version;
            self.doc.encoding = decl.encoding;
            self.doc.standalone = decl.standalone;
        }

        let root = self.doc.root();
        loop {
            let scan = src.read_string_until_char_eof(&['<', '&']);
            if !scan.text.trim_matches(WHITESPACE).is_empty() {
                self.stray_text(src)?;
            }
            if scan.hit_eof {
                break;
            }

            if src.peek_char() == Some('&') {
                let loc = src.location();
                if !self.options.tidy {
                    return Err(src.fatal("reference outside the document element"));
                }
                self.parse_reference(src)?;
                self.recover(loc, "dropped reference outside the document element");
                continue;
            }

            if self.at_doctype(src) {
                let loc = src.location();
                if self.doctype_name.is_none() && self.doc.root_element().is_none() {
                    self.parse_doctype(src)?;
                } else if self.options.tidy {
                    self.skip_doctype(src)?;
                    self.recover(loc, "discarded misplaced document type declaration");
                } else {
                    return Err(src.fatal("document type declaration must precede the document element"));
                }
                continue;
            }

            let loc = src.location();
            match self.read_markup(src)? {
                Markup::Tag(tag) if tag.kind == TagKind::End => {
                    if !self.options.tidy {
                        return Err(ParseError::new(
                            ErrorKind::WellFormedness,
                            format!("unexpected end tag </{}>", tag.name),
                            tag.location,
                        ));
                    }
                    self.recover(tag.location, format!("dropped unmatched end tag </{}>", tag.name));
                }
                Markup::Tag(tag) => match self.doc.root_element() {
                    None => {
                        let name = tag.name.clone();
                        let location = tag.location.clone();
                        self.parse_element(src, root, tag)?;
                        self.check_root_name(&name, location)?;
                    }
                    Some(existing) => {
                        if !self.options.tidy {
                            return Err(ParseError::new(
                                ErrorKind::WellFormedness,
                                "extra content after the document element",
                                tag.location,
                            ));
                        }
                        self.recover(
                            tag.location.clone(),
                            format!("moved second top-level element <{}> into the document element", tag.name),
                        );
                        self.open.push(self.doc.node_name(existing).unwrap_or_default().to_string());
                        self.parse_element(src, existing, tag)?;
                        self.open.pop();
                    }
                },
                Markup::Comment(content) => {
                    self.append(root, NodeKind::Comment { content });
                }
                Markup::Pi { target, data } => {
                    let sheet = (target == "xml-stylesheet" && self.doc.root_element().is_none())
                        .then(|| data.clone().unwrap_or_default());
                    let node = self.append(root, NodeKind::ProcessingInstruction { target, data });
                    if let Some(data) = sheet {
                        self.add_style_sheet(&data, node, loc);
                    }
                }
                Markup::CData(_) => {
                    if !self.options.tidy {
                        return Err(ParseError::new(
                            ErrorKind::WellFormedness,
                            "CDATA section outside the document element",
                            loc,
                        ));
                    }
                    self.recover(loc, "dropped CDATA section outside the document element");
                }
                Markup::Text(_) => self.stray_text(src)?,
                Markup::Skipped => {}
            }
        }

        if self.doc.root_element().is_none() {
            if !self.options.tidy {
                return Err(src.fatal("missing document element"));
            }
            let loc = src.location();
            self.recover(loc, "missing document element");
        }
        Ok(())
    }

    /// Non-whitespace text outside the document element.
    fn stray_text(&mut self, src: &CharSource) -> Result<(), ParseError> {
        if !self.options.tidy {
            return Err(src.fatal("text is not allowed outside the document element"));
        }
        let loc = src.location();
        self.recover(loc, "dropped text outside the document element");
        Ok(())
    }

    /// Returns `true` if a document type declaration starts here. The
    /// keyword is case-insensitive in tidy mode.
    pub(super) fn at_doctype(&self, src: &CharSource) -> bool {
        if self.options.tidy {
            src.looking_at_ci("<!DOCTYPE")
        } else {
            src.looking_at("<!DOCTYPE")
        }
    }

    /// The document element must carry the name the DOCTYPE declared.
    fn check_root_name(&self, name: &str, location: SourceLocation) -> Result<(), ParseError> {
        match &self.doctype_name {
            Some(declared) if declared != name && !self.options.tidy => Err(ParseError::new(
                ErrorKind::Validity,
                format!("document element <{name}> does not match document type '{declared}'"),
                location,
            )),
            _ => Ok(()),
        }
    }

    // --- Style sheets ---

    /// Records an `<?xml-stylesheet ...?>` association. A PI without an
    /// `href` is kept as a plain PI.
    fn add_style_sheet(&mut self, data: &str, node: NodeId, location: SourceLocation) {
        let pseudo = parse_pseudo_attributes(data);
        let get = |key: &str| {
            pseudo
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        let Some(href) = get("href") else {
            self.warn(location, "xml-stylesheet without href ignored");
            return;
        };
        self.doc.style_sheets.push(StyleSheet {
            href,
            media_type: get("type"),
            title: get("title"),
            media: get("media"),
            charset: get("charset"),
            alternate: get("alternate").is_some_and(|v| v == "yes"),
            node,
        });
    }
}

/// Splits `name="value"` pairs out of PI data. Malformed trailing input is
/// ignored.
fn parse_pseudo_attributes(data: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = data.trim_start();
    while let Some(eq) = rest.find('=') {
        let name = rest[..eq].trim().to_string();
        let after = rest[eq + 1..].trim_start();
        let Some(quote) = after.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            break;
        };
        let Some(end) = after[1..].find(quote) else {
            break;
        };
        pairs.push((name, after[1..=end].to_string()));
        rest = after[end + 2..].trim_start();
    }
    pairs
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::parser::{parse_str, parse_str_with_options};
    use crate::tree::NodeType;
    use pretty_assertions::assert_eq;

    fn tidy() -> ParseOptions {
        ParseOptions::default().tidy(true)
    }

    #[test]
    fn test_parse_nested_elements() {
        let doc = parse_str("<a><b>text</b></a>").unwrap();
        let a = doc.root_element().unwrap();
        assert_eq!(doc.node_name(a), Some("a"));
        let b = doc.first_child(a).unwrap();
        assert_eq!(doc.node_name(b), Some("b"));
        assert_eq!(doc.next_sibling(b), None);
        let text = doc.first_child(b).unwrap();
        assert_eq!(doc.node_type(text), NodeType::Text);
        assert_eq!(doc.node_value(text), Some("text"));
    }

    #[test]
    fn test_prolog_and_trailing_misc() {
        let doc = parse_str("<!-- c --><?pi x?>\n<r/>\n<!-- after -->").unwrap();
        let kinds: Vec<_> = doc.children(doc.root()).map(|id| doc.node_type(id)).collect();
        assert_eq!(
            kinds,
            vec![
                NodeType::Comment,
                NodeType::ProcessingInstruction,
                NodeType::Element,
                NodeType::Comment
            ]
        );
    }

    #[test]
    fn test_missing_document_element() {
        let err = parse_str("<!-- only -->").unwrap_err();
        assert_eq!(err.kind, ErrorKind::WellFormedness);
        assert!(err.message.contains("missing document element"));

        let doc = parse_str_with_options("<!-- only -->", &tidy()).unwrap();
        assert!(doc.root_element().is_none());
        assert_eq!(doc.diagnostics.len(), 1);
    }

    #[test]
    fn test_second_root_element() {
        let err = parse_str("<a/><b/>").unwrap_err();
        assert!(err.message.contains("extra content"));

        let doc = parse_str_with_options("<a/><b/>", &tidy()).unwrap();
        let a = doc.root_element().unwrap();
        let b = doc.first_child(a).unwrap();
        assert_eq!(doc.node_name(b), Some("b"));
    }

    #[test]
    fn test_text_outside_root() {
        assert!(parse_str("junk<r/>").is_err());
        let doc = parse_str_with_options("junk<r/>tail", &tidy()).unwrap();
        assert!(doc.root_element().is_some());
        assert_eq!(doc.diagnostics.len(), 2);
    }

    #[test]
    fn test_root_name_must_match_doctype() {
        let err = parse_str("<!DOCTYPE a><b/>").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validity);
        assert!(parse_str_with_options("<!DOCTYPE a><b/>", &tidy()).is_ok());
    }

    #[test]
    fn test_style_sheets() {
        let doc = parse_str(
            r#"<?xml-stylesheet href="a.css" type="text/css" alternate="yes" title='Alt'?><r/>"#,
        )
        .unwrap();
        assert_eq!(doc.style_sheets.len(), 1);
        let sheet = &doc.style_sheets[0];
        assert_eq!(sheet.href, "a.css");
        assert_eq!(sheet.media_type.as_deref(), Some("text/css"));
        assert_eq!(sheet.title.as_deref(), Some("Alt"));
        assert!(sheet.alternate);
        assert_eq!(Some(sheet.node), doc.first_child(doc.root()));
    }

    #[test]
    fn test_style_sheet_after_root_is_plain_pi() {
        let doc = parse_str(r#"<r/><?xml-stylesheet href="a.css"?>"#).unwrap();
        assert!(doc.style_sheets.is_empty());
    }

    #[test]
    fn test_pseudo_attributes() {
        assert_eq!(
            parse_pseudo_attributes(r#" href="a b.css"  media='print' bad"#),
            vec![
                ("href".to_string(), "a b.css".to_string()),
                ("media".to_string(), "print".to_string())
            ]
        );
    }

    #[test]
    fn test_error_carries_diagnostics() {
        let err = parse_str_with_options("<r a=1><x></r", &tidy()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnexpectedEof);
        assert!(!err.diagnostics.is_empty());
    }
}
