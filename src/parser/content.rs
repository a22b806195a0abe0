//! Element content assembly (XML 1.0 §3.1 `[43]`).
//!
//! [`XmlParser::parse_content`] reads character data up to the next `<` or
//! `&` and dispatches: references are expanded in place, markup becomes
//! child nodes, and start tags recurse through
//! [`XmlParser::parse_element`]. Entity replacement text is assembled by the
//! same function over a sub-source, sharing the pending-text buffer, so text
//! on either side of a reference ends up in one text node.
//!
//! Running out of input is reported as [`ContentEnd::Eof`]; only the
//! element that owns the physical top-level source treats it as an error.

use crate::dtd::EntityValue;
use crate::error::{ErrorKind, ParseError};
use crate::tree::{AttributeMap, NodeId, NodeKind};

use super::input::CharSource;
use super::markup::{Markup, Reference, Tag, TagKind};
use super::registry::Resolved;
use super::xml::XmlParser;

/// Why a run of content stopped.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ContentEnd {
    /// An end tag, not yet matched against any open element.
    EndTag(Tag),
    /// The source ran out: the end of the document, or of an entity's
    /// replacement text.
    Eof,
}

impl XmlParser<'_> {
    /// Creates the element for `tag` under `parent` and, for a start tag,
    /// parses its content through the matching end tag.
    ///
    /// Returns an end tag that belongs to an ancestor: in tidy mode an
    /// unmatched end tag closes the current element implicitly and is
    /// handed back for the ancestor's loop to match.
    pub(super) fn parse_element(
        &mut self,
        src: &mut CharSource,
        parent: NodeId,
        tag: Tag,
    ) -> Result<Option<Tag>, ParseError> {
        let max_depth = self.options.max_depth;
        if self.open.len() >= max_depth as usize {
            return Err(ParseError::new(
                ErrorKind::WellFormedness,
                format!("maximum element depth ({max_depth}) exceeded"),
                tag.location,
            ));
        }
        let element = self.start_element(parent, &tag)?;
        if tag.kind == TagKind::Empty {
            return Ok(None);
        }

        self.open.push(tag.name.clone());
        let mut text = String::new();
        let pending = loop {
            match self.parse_content(src, element, &mut text)? {
                ContentEnd::EndTag(end) if end.name == tag.name => break None,
                ContentEnd::EndTag(end) => {
                    if !self.options.tidy {
                        return Err(ParseError::new(
                            ErrorKind::WellFormedness,
                            format!(
                                "mismatched end tag: expected </{}>, found </{}>",
                                tag.name, end.name
                            ),
                            end.location,
                        ));
                    }
                    let ancestors = &self.open[..self.open.len() - 1];
                    if ancestors.contains(&end.name) {
                        self.recover(
                            end.location.clone(),
                            format!("implicitly closed <{}> before </{}>", tag.name, end.name),
                        );
                        break Some(end);
                    }
                    self.recover(end.location, format!("dropped unmatched end tag </{}>", end.name));
                }
                ContentEnd::Eof => {
                    if !self.options.tidy {
                        return Err(if self.entity_depth == 0 {
                            src.error(
                                ErrorKind::UnexpectedEof,
                                format!("unexpected end of input: element <{}> is not closed", tag.name),
                            )
                        } else {
                            src.fatal(format!(
                                "element <{}> is not closed within the entity that opened it",
                                tag.name
                            ))
                        });
                    }
                    let loc = src.location();
                    self.recover(loc, format!("implicitly closed <{}> at end of input", tag.name));
                    break None;
                }
            }
        };
        self.flush_text(element, &mut text);
        self.open.pop();
        Ok(pending)
    }

    /// Appends the element with its attributes, then any declared defaults
    /// the tag omitted.
    fn start_element(&mut self, parent: NodeId, tag: &Tag) -> Result<NodeId, ParseError> {
        let element = self.append(
            parent,
            NodeKind::Element {
                name: tag.name.clone(),
                namespace: None,
                local_name: None,
                attributes: AttributeMap::default(),
            },
        );
        for (name, value) in &tag.attributes {
            self.add_attribute(element, name, value);
        }

        let defaults: Vec<_> = self
            .attr_defaults
            .get(&tag.name)
            .into_iter()
            .flatten()
            .filter(|d| !tag.attributes.iter().any(|(n, _)| *n == d.name))
            .cloned()
            .collect();
        for default in defaults {
            self.registry
                .add_output(default.name.len() + default.value.len(), &tag.location)?;
            self.add_attribute(element, &default.name, &default.value);
        }
        Ok(element)
    }

    fn add_attribute(&mut self, element: NodeId, name: &str, value: &str) {
        let attr = self.doc.create_node(NodeKind::Attribute {
            name: name.to_string(),
            value: value.to_string(),
            namespace: None,
            local_name: None,
            owner: Some(element),
        });
        if let NodeKind::Element { attributes, .. } = &mut self.doc.node_mut(element).kind {
            attributes.push(attr);
        }
    }

    /// Parses content into `parent` until an end tag or the end of `src`.
    /// Character data accumulates in `text` and is flushed as one text node
    /// before any other child.
    pub(super) fn parse_content(
        &mut self,
        src: &mut CharSource,
        parent: NodeId,
        text: &mut String,
    ) -> Result<ContentEnd, ParseError> {
        loop {
            let scan = src.read_string_until_char_eof(&['<', '&']);
            self.check_char_data(src, &scan.text)?;
            text.push_str(&scan.text);
            if scan.hit_eof {
                return Ok(ContentEnd::Eof);
            }

            if src.peek_char() == Some('&') {
                self.content_reference(src, parent, text)?;
                continue;
            }

            if self.at_doctype(src) {
                if !self.options.tidy {
                    return Err(src.fatal("document type declaration is not allowed in element content"));
                }
                let loc = src.location();
                self.skip_doctype(src)?;
                self.recover(loc, "discarded document type declaration in element content");
                continue;
            }

            match self.read_markup(src)? {
                Markup::Text(literal) => text.push_str(&literal),
                Markup::Skipped => {}
                Markup::Tag(tag) if tag.kind == TagKind::End => return Ok(ContentEnd::EndTag(tag)),
                Markup::Tag(tag) => {
                    self.flush_text(parent, text);
                    if let Some(pending) = self.parse_element(src, parent, tag)? {
                        return Ok(ContentEnd::EndTag(pending));
                    }
                }
                Markup::Comment(content) => {
                    self.flush_text(parent, text);
                    self.append(parent, NodeKind::Comment { content });
                }
                Markup::CData(content) => {
                    self.flush_text(parent, text);
                    self.append(parent, NodeKind::CData { content });
                }
                Markup::Pi { target, data } => {
                    self.flush_text(parent, text);
                    self.append(parent, NodeKind::ProcessingInstruction { target, data });
                }
            }
        }
    }

    fn flush_text(&mut self, parent: NodeId, text: &mut String) {
        if !text.is_empty() {
            let content = std::mem::take(text);
            self.append(parent, NodeKind::Text { content });
        }
    }

    /// `]]>` and characters outside `Char` may not appear in character
    /// data (§2.4, §2.2).
    fn check_char_data(&self, src: &CharSource, data: &str) -> Result<(), ParseError> {
        if self.options.tidy {
            return Ok(());
        }
        if data.contains("]]>") {
            return Err(src.fatal("']]>' is not allowed in character data"));
        }
        self.check_chars(src, data, "content")
    }

    /// Expands a reference in content (§4.4.2): characters and predefined
    /// entities become text, parsed entities are assembled in place.
    fn content_reference(
        &mut self,
        src: &mut CharSource,
        parent: NodeId,
        text: &mut String,
    ) -> Result<(), ParseError> {
        let loc = src.location();
        let name = match self.parse_reference(src)? {
            Reference::Char(c) => {
                text.push(c);
                return Ok(());
            }
            Reference::Literal(literal) => {
                text.push_str(&literal);
                return Ok(());
            }
            Reference::Named(name) => name,
        };
        let decl = match self.resolve_general(&name, &loc)? {
            Resolved::Builtin(c) => {
                text.push(c);
                return Ok(());
            }
            Resolved::Unresolved => {
                text.push('&');
                text.push_str(&name);
                text.push(';');
                return Ok(());
            }
            Resolved::Entity(decl) => decl,
        };
        if !decl.is_parsed() {
            return Err(ParseError::new(
                ErrorKind::WellFormedness,
                format!("reference to unparsed entity '{name}'"),
                loc,
            ));
        }

        let frame = format!("in entity '{name}' referenced at {loc}");
        let mut sub = match &decl.value {
            EntityValue::Internal(replacement) => src.sub_source(replacement, &decl.origin),
            EntityValue::External(id) => match self.open_external(id, &decl.origin) {
                Ok(sub) => sub,
                Err(err) if self.options.tidy && err.kind == ErrorKind::Io => {
                    self.recover(loc, format!("skipped external entity '{name}': {}", err.message));
                    return Ok(());
                }
                Err(err) => return Err(err.with_context(frame)),
            },
        };

        self.entity_depth += 1;
        let result = self.expanding(&decl, &loc, |p| p.entity_content(&mut sub, parent, text, &name));
        self.entity_depth -= 1;
        result.map_err(|e| e.with_context(frame))
    }

    /// Assembles an entity's replacement text. Its markup must be balanced:
    /// an end tag for an element opened outside the entity is an error.
    fn entity_content(
        &mut self,
        sub: &mut CharSource,
        parent: NodeId,
        text: &mut String,
        name: &str,
    ) -> Result<(), ParseError> {
        loop {
            match self.parse_content(sub, parent, text)? {
                ContentEnd::Eof => return Ok(()),
                ContentEnd::EndTag(end) => {
                    if !self.options.tidy {
                        return Err(ParseError::new(
                            ErrorKind::WellFormedness,
                            format!("end tag </{}> in entity '{name}' has no matching start tag", end.name),
                            end.location,
                        ));
                    }
                    self.recover(
                        end.location,
                        format!("dropped end tag </{}> from entity '{name}'", end.name),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::error::ErrorKind;
    use crate::parser::{parse_str, parse_str_with_options, ParseOptions};
    use crate::tree::NodeType;
    use pretty_assertions::assert_eq;

    fn tidy() -> ParseOptions {
        ParseOptions::default().tidy(true)
    }

    #[test]
    fn test_mixed_content() {
        let doc = parse_str("<p>a<b>bold</b>c<!--x--><![CDATA[<raw>]]><?pi d?></p>").unwrap();
        let p = doc.root_element().unwrap();
        let kinds: Vec<_> = doc.children(p).map(|id| doc.node_type(id)).collect();
        assert_eq!(
            kinds,
            vec![
                NodeType::Text,
                NodeType::Element,
                NodeType::Text,
                NodeType::Comment,
                NodeType::CData,
                NodeType::ProcessingInstruction
            ]
        );
        assert_eq!(doc.text_content(p), "aboldc<raw>");
    }

    #[test]
    fn test_entity_text_merges_with_surrounding_text() {
        let doc = parse_str(r#"<!DOCTYPE r [<!ENTITY e "middle">]><r>before &e; after &amp; end</r>"#)
            .unwrap();
        let root = doc.root_element().unwrap();
        assert_eq!(doc.children(root).count(), 1);
        assert_eq!(doc.text_content(root), "before middle after & end");
    }

    #[test]
    fn test_entity_with_markup() {
        let doc = parse_str(
            r#"<!DOCTYPE r [<!ENTITY e "<b>x</b>&#38;amp;"><!ENTITY f "[&e;]">]><r>&f;</r>"#,
        )
        .unwrap();
        let root = doc.root_element().unwrap();
        let b = doc.elements_by_tag_name(root, "b");
        assert_eq!(b.len(), 1);
        assert_eq!(doc.text_content(root), "[x&]");
    }

    #[test]
    fn test_self_referential_entity() {
        let err = parse_str(r#"<!DOCTYPE r [<!ENTITY a "&a;">]><r>&a;</r>"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::WellFormedness);
        assert!(err.message.contains("references itself"));
    }

    #[test]
    fn test_mutually_recursive_entities() {
        let err = parse_str(r#"<!DOCTYPE r [<!ENTITY a "&b;"><!ENTITY b "&a;">]><r>&a;</r>"#)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::WellFormedness);
        assert_eq!(err.context.len(), 2);
        assert!(err.context[1].starts_with("in entity 'a'"));
    }

    #[test]
    fn test_recursive_entity_in_attribute() {
        let err = parse_str(r#"<!DOCTYPE r [<!ENTITY a "x&a;">]><r v="&a;"/>"#).unwrap_err();
        assert!(err.message.contains("references itself"));
    }

    #[test]
    fn test_entity_error_location_points_into_declaration() {
        let err = parse_str("<!DOCTYPE r [\n<!ENTITY e \"<a>\">]>\n<r>&e;</r>").unwrap_err();
        assert_eq!(err.kind, ErrorKind::WellFormedness);
        assert_eq!(err.location.line, 2);
        assert!(err.context[0].contains("unknown:3:4"));
    }

    #[test]
    fn test_unbalanced_entity_end_tag() {
        let err = parse_str(r#"<!DOCTYPE r [<!ENTITY e "</r>">]><r>&e;</r>"#).unwrap_err();
        assert!(err.message.contains("no matching start tag"));
    }

    #[test]
    fn test_undefined_entity_without_dtd() {
        let err = parse_str("<root>&undefined;</root>").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedReference);
        assert!(err.is_well_formedness());
    }

    #[test]
    fn test_undefined_entity_with_external_dtd() {
        let doc = parse_str(r#"<!DOCTYPE root SYSTEM "x.dtd"><root>&undefined;</root>"#).unwrap();
        assert_eq!(doc.text_content(doc.root_element().unwrap()), "&undefined;");
    }

    #[test]
    fn test_unparsed_entity_in_content() {
        let err = parse_str(
            r#"<!DOCTYPE r [<!NOTATION n SYSTEM "n"><!ENTITY u SYSTEM "u.bin" NDATA n>]><r>&u;</r>"#,
        )
        .unwrap_err();
        assert!(err.message.contains("unparsed entity 'u'"));
    }

    #[test]
    fn test_external_entity_in_attribute() {
        let err = parse_str(r#"<!DOCTYPE r [<!ENTITY x SYSTEM "x.xml">]><r a="&x;"/>"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::WellFormedness);
        assert!(err.message.contains("external entity 'x'"));
    }

    #[test]
    fn test_external_entity_in_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("chapter.xml"),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><title>Intro</title>",
        )
        .unwrap();
        let path = dir.path().join("book.xml");
        std::fs::write(
            &path,
            r#"<!DOCTYPE book [<!ENTITY ch SYSTEM "chapter.xml">]><book>&ch;</book>"#,
        )
        .unwrap();
        let doc = crate::parser::parse_file(&path, &ParseOptions::default()).unwrap();
        let book = doc.root_element().unwrap();
        assert_eq!(doc.elements_by_tag_name(book, "title").len(), 1);
        assert_eq!(doc.text_content(book), "Intro");
    }

    #[test]
    fn test_missing_external_entity() {
        let input = r#"<!DOCTYPE r [<!ENTITY x SYSTEM "does-not-exist.xml">]><r>&x;</r>"#;
        let err = parse_str(input).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
        assert!(err.context[0].starts_with("in entity 'x'"));
        assert!(parse_str_with_options(input, &tidy()).is_ok());
    }

    #[test]
    fn test_entity_expansion_limit() {
        let input = r#"<!DOCTYPE r [
<!ENTITY a "aaaaaaaaaa">
<!ENTITY b "&a;&a;&a;&a;&a;&a;&a;&a;&a;&a;">
<!ENTITY c "&b;&b;&b;&b;&b;&b;&b;&b;&b;&b;">
]><r>&c;</r>"#;
        let options = ParseOptions::default().max_entity_expansions(50);
        let err = parse_str_with_options(input, &options).unwrap_err();
        assert!(err.message.contains("limit"));
        assert!(parse_str(input).is_ok());
    }

    #[test]
    fn test_mismatched_end_tag() {
        let err = parse_str("<a><b></a></b>").unwrap_err();
        assert_eq!(err.kind, ErrorKind::WellFormedness);
        assert!(err.message.contains("expected </b>, found </a>"));
    }

    #[test]
    fn test_tidy_implicit_close() {
        let doc = parse_str_with_options("<ul><li>one<li>two</ul>", &tidy()).unwrap();
        let ul = doc.root_element().unwrap();
        let first = doc.first_child(ul).unwrap();
        assert_eq!(doc.node_name(first), Some("li"));
        // The second <li> nests inside the first; both close at </ul>.
        assert_eq!(doc.elements_by_tag_name(ul, "li").len(), 2);
        assert_eq!(doc.text_content(ul), "onetwo");
    }

    #[test]
    fn test_tidy_drops_unmatched_end_tag() {
        let doc = parse_str_with_options("<p>a</span>b</p>", &tidy()).unwrap();
        let p = doc.root_element().unwrap();
        assert_eq!(doc.text_content(p), "ab");
        assert_eq!(doc.diagnostics.len(), 1);
    }

    #[test]
    fn test_unclosed_element_at_eof() {
        let err = parse_str("<a><b>text").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnexpectedEof);
        assert!(err.message.contains("<b>"));

        let doc = parse_str_with_options("<a><b>text", &tidy()).unwrap();
        assert_eq!(doc.text_content(doc.root_element().unwrap()), "text");
    }

    #[test]
    fn test_void_elements() {
        let input = "<p>line<br>next<hr></p>";
        let doc = parse_str_with_options(input, &tidy()).unwrap();
        let p = doc.root_element().unwrap();
        let br = doc.elements_by_tag_name(p, "br")[0];
        assert_eq!(doc.first_child(br), None);
        assert_eq!(doc.text_content(p), "linenext");

        let err = parse_str(input).unwrap_err();
        assert!(err.message.contains("expected </hr>, found </p>"));
    }

    #[test]
    fn test_doctype_in_content() {
        let input = "<r><!DOCTYPE x [<!ENTITY a 'b'>]>text</r>";
        assert!(parse_str(input).is_err());
        let doc = parse_str_with_options(input, &tidy()).unwrap();
        assert_eq!(doc.text_content(doc.root_element().unwrap()), "text");
    }

    #[test]
    fn test_cdata_close_in_text() {
        assert!(parse_str("<r>a]]>b</r>").is_err());
        assert!(parse_str("<r>a]]b</r>").is_ok());
    }

    #[test]
    fn test_max_depth() {
        let deep = format!("{}{}", "<a>".repeat(10), "</a>".repeat(10));
        let options = ParseOptions::default().max_depth(5);
        let err = parse_str_with_options(&deep, &options).unwrap_err();
        assert!(err.message.contains("maximum element depth"));
        assert!(parse_str(&deep).is_ok());
    }
}
