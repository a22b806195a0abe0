//! End-to-end parsing tests: well-formedness rules, entities, encodings and
//! tidy-mode repairs, checked through the public API.

#![allow(clippy::unwrap_used)]

use std::fmt::Write;

use pretty_assertions::assert_eq;
use tidyxml::error::ErrorSeverity;
use tidyxml::parser::{parse_bytes_with_options, parse_str_with_options, ParseOptions};
use tidyxml::{parse_bytes, parse_str, Document, ErrorKind, NodeId, NodeKind, NodeType};

fn tidy() -> ParseOptions {
    ParseOptions::default().tidy(true)
}

/// Minimal serializer used to check that parsed trees survive a round trip.
fn to_xml(doc: &Document, id: NodeId, out: &mut String) {
    fn escape(s: &str) -> String {
        s.replace('&', "&amp;").replace('<', "&lt;").replace('"', "&quot;")
    }
    match &doc.node(id).kind {
        NodeKind::Element { name, .. } => {
            let _ = write!(out, "<{name}");
            for (attr, value) in doc.attributes(id) {
                let _ = write!(out, " {attr}=\"{}\"", escape(value));
            }
            out.push('>');
            for child in doc.children(id) {
                to_xml(doc, child, out);
            }
            let _ = write!(out, "</{name}>");
        }
        NodeKind::Text { content } => out.push_str(&escape(content)),
        NodeKind::CData { content } => {
            let _ = write!(out, "<![CDATA[{content}]]>");
        }
        NodeKind::Comment { content } => {
            let _ = write!(out, "<!--{content}-->");
        }
        NodeKind::ProcessingInstruction { target, data } => {
            let _ = write!(out, "<?{target} {}?>", data.as_deref().unwrap_or(""));
        }
        _ => {
            for child in doc.children(id) {
                to_xml(doc, child, out);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tree shape
// ---------------------------------------------------------------------------

#[test]
fn test_nested_elements() {
    let doc = parse_str("<a><b>text</b></a>").unwrap();
    let a = doc.root_element().unwrap();
    assert_eq!(doc.node_name(a), Some("a"));
    let children: Vec<_> = doc.children(a).collect();
    assert_eq!(children.len(), 1);
    let b = children[0];
    assert_eq!(doc.node_name(b), Some("b"));
    let text = doc.first_child(b).unwrap();
    assert_eq!(doc.node_type(text), NodeType::Text);
    assert_eq!(doc.node_value(text), Some("text"));
}

#[test]
fn test_second_root_element_rejected_by_append() {
    let mut doc = parse_str("<a><b>text</b></a>").unwrap();
    let second = doc.create_element("second").unwrap();
    let root = doc.root();
    assert!(doc.append_child(root, second).is_err());
}

#[test]
fn test_round_trip() {
    let inputs = [
        "<a><b>text</b></a>",
        r#"<doc x="1" y="a &amp; b"><!--note--><p>one<br/>two</p><![CDATA[<raw>]]><?pi data?></doc>"#,
        "<r>\n  <item id=\"1\">&lt;tag&gt;</item>\n  <item id=\"2\"/>\n</r>",
    ];
    for input in inputs {
        let doc = parse_str(input).unwrap();
        let mut xml = String::new();
        to_xml(&doc, doc.root(), &mut xml);
        let again = parse_str(&xml).unwrap();
        assert!(
            doc.is_equal_node(doc.root(), &again, again.root()),
            "round trip changed the tree of {input}"
        );
    }
}

#[test]
fn test_elements_by_tag_name_wildcard_preorder() {
    let doc = parse_str("<r><a/><x><a/></x><b/></r>").unwrap();
    let root = doc.root();
    let names: Vec<_> = doc
        .elements_by_tag_name(root, "*")
        .into_iter()
        .map(|id| doc.node_name(id).unwrap())
        .collect();
    assert_eq!(names, vec!["r", "a", "x", "a", "b"]);
    assert_eq!(doc.elements_by_tag_name(root, "a").len(), 2);
}

#[test]
fn test_line_endings_normalized() {
    let doc = parse_str("<r a=\"x\r\ny\">1\r\n2\r3</r>").unwrap();
    let root = doc.root_element().unwrap();
    assert_eq!(doc.text_content(root), "1\n2\n3");
    assert_eq!(doc.attribute(root, "a"), Some("x y"));
}

#[test]
fn test_xml_declaration_fields() {
    let doc = parse_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?><r/>"#).unwrap();
    assert_eq!(doc.version.as_deref(), Some("1.0"));
    assert_eq!(doc.encoding.as_deref(), Some("UTF-8"));
    assert_eq!(doc.standalone, Some(false));
}

#[test]
fn test_xml_declaration_order_enforced() {
    let err = parse_str(r#"<?xml encoding="UTF-8" version="1.0"?><r/>"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Syntax);
}

#[test]
fn test_style_sheets_collected() {
    let doc = parse_str(
        r#"<?xml-stylesheet href="a.css" type="text/css"?><?xml-stylesheet href="b.xsl" alternate="yes" title="Alt"?><r/>"#,
    )
    .unwrap();
    assert_eq!(doc.style_sheets.len(), 2);
    assert_eq!(doc.style_sheets[0].href, "a.css");
    assert_eq!(doc.style_sheets[0].media_type.as_deref(), Some("text/css"));
    assert!(doc.style_sheets[1].alternate);
    assert_eq!(doc.style_sheets[1].title.as_deref(), Some("Alt"));
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[test]
fn test_first_entity_declaration_wins() {
    let doc = parse_str(r#"<!DOCTYPE r [<!ENTITY x "A"><!ENTITY x "B">]><r>&x;</r>"#).unwrap();
    assert_eq!(doc.text_content(doc.root_element().unwrap()), "A");
    let doctype = doc.document_type().unwrap();
    assert_eq!(doctype.entities["x"].replacement_text(), Some("A"));
}

#[test]
fn test_recursive_entities_rejected() {
    for input in [
        r#"<!DOCTYPE r [<!ENTITY a "&a;">]><r>&a;</r>"#,
        r#"<!DOCTYPE r [<!ENTITY a "&b;"><!ENTITY b "&a;">]><r>&a;</r>"#,
    ] {
        let err = parse_str(input).unwrap_err();
        assert_eq!(err.kind, ErrorKind::WellFormedness, "{input}");
        // Tidy mode does not relax recursion checks.
        assert!(parse_str_with_options(input, &tidy()).is_err());
    }
}

#[test]
fn test_undefined_entity_depends_on_dtd() {
    let err = parse_str("<root>&undefined;</root>").unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedReference);

    let doc = parse_str(r#"<!DOCTYPE root SYSTEM "x.dtd"><root>&undefined;</root>"#).unwrap();
    assert_eq!(doc.text_content(doc.root_element().unwrap()), "&undefined;");

    let standalone =
        r#"<?xml version="1.0" standalone="yes"?><!DOCTYPE root SYSTEM "x.dtd"><root>&undefined;</root>"#;
    assert_eq!(parse_str(standalone).unwrap_err().kind, ErrorKind::UndefinedReference);
}

#[test]
fn test_parameter_entities_in_internal_subset() {
    let doc = parse_str(
        r#"<!DOCTYPE r [
<!ENTITY % decls "<!ENTITY greeting 'hi'>">
%decls;
]><r>&greeting;</r>"#,
    )
    .unwrap();
    assert_eq!(doc.text_content(doc.root_element().unwrap()), "hi");
}

#[test]
fn test_undefined_parameter_entity_always_an_error() {
    let err = parse_str(r#"<!DOCTYPE r [%missing;]><r/>"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedReference);
}

#[test]
fn test_character_references() {
    let doc = parse_str("<r>&#65;&#x42;&#x1F600;</r>").unwrap();
    assert_eq!(doc.text_content(doc.root_element().unwrap()), "AB\u{1F600}");
    assert!(parse_str("<r>&#0;</r>").is_err());
    assert!(parse_str("<r>&#xD800;</r>").is_err());
}

#[test]
fn test_attribute_entities_and_normalization() {
    let doc = parse_str(
        "<!DOCTYPE r [<!ENTITY e \"x&#9;y\">]><r a=\"&e;\tz&lt;\" b='&#9;'/>",
    )
    .unwrap();
    let r = doc.root_element().unwrap();
    // Whitespace in replacement text is normalized too; a character
    // reference written directly in the literal is not.
    assert_eq!(doc.attribute(r, "a"), Some("x y z<"));
    assert_eq!(doc.attribute(r, "b"), Some("\t"));
}

#[test]
fn test_lt_in_attribute_rejected() {
    let err = parse_str(r#"<r a="<"/>"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::WellFormedness);
}

// ---------------------------------------------------------------------------
// Well-formedness errors
// ---------------------------------------------------------------------------

#[test]
fn test_well_formedness_errors() {
    let cases = [
        "<a></b>",
        "<a x='1' x='2'/>",
        "<1a/>",
        "<a/><b/>",
        "text<a/>",
        "<a>]]></a>",
        "<?xml version='1.0'?><?xml version='1.0'?><a/>",
    ];
    for input in cases {
        let err = parse_str(input).unwrap_err();
        assert!(err.is_well_formedness(), "{input}: {err}");
    }
}

#[test]
fn test_unexpected_eof_names_element() {
    let err = parse_str("<doc><section><p>unfinished").unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnexpectedEof);
    assert!(err.message.contains("<p>"), "{}", err.message);
}

#[test]
fn test_error_display_includes_location_and_context() {
    let err = parse_str("<!DOCTYPE r [<!ENTITY e \"<x>\">]>\n<r>&e;</r>").unwrap_err();
    let text = err.to_string();
    assert!(text.starts_with("unknown:1:"), "{text}");
    assert!(text.contains("in entity 'e' referenced at unknown:2:4"), "{text}");
}

#[test]
fn test_root_must_match_doctype_name() {
    let err = parse_str("<!DOCTYPE a [<!ELEMENT a ANY>]><b/>").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validity);
    assert!(parse_str_with_options("<!DOCTYPE a><b/>", &tidy()).is_ok());
}

// ---------------------------------------------------------------------------
// Encodings
// ---------------------------------------------------------------------------

#[test]
fn test_utf16_declared_without_bom() {
    let err = parse_bytes(b"<?xml version=\"1.0\" encoding=\"UTF-16\"?><root/>").unwrap_err();
    assert_eq!(err.kind, ErrorKind::WellFormedness);
    assert!(err.message.contains("byte order mark"), "{}", err.message);
}

#[test]
fn test_utf16_signature_without_bom() {
    let bytes: Vec<u8> = "<?xml version=\"1.0\"?><r/>"
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect();
    assert_eq!(parse_bytes(&bytes).unwrap_err().kind, ErrorKind::WellFormedness);
}

#[test]
fn test_latin1_document() {
    let doc = parse_bytes(b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><r a=\"\xE9\">\xFC</r>").unwrap();
    let r = doc.root_element().unwrap();
    assert_eq!(doc.attribute(r, "a"), Some("\u{e9}"));
    assert_eq!(doc.text_content(r), "\u{fc}");
}

#[test]
fn test_utf8_bom() {
    let doc = parse_bytes(b"\xEF\xBB\xBF<r>ok</r>").unwrap();
    assert_eq!(doc.encoding.as_deref(), Some("UTF-8"));
}

#[test]
fn test_invalid_utf8() {
    assert_eq!(parse_bytes(b"<r>\xFF\xFE\xFD</r>").unwrap_err().kind, ErrorKind::Encoding);
    let doc = parse_bytes_with_options(b"<r>\xFF</r>", &tidy()).unwrap();
    assert_eq!(doc.text_content(doc.root_element().unwrap()), "\u{fffd}");
}

// ---------------------------------------------------------------------------
// Tidy mode
// ---------------------------------------------------------------------------

#[test]
fn test_tidy_void_element() {
    let doc = parse_str_with_options("<div><hr>after</div>", &tidy()).unwrap();
    let div = doc.root_element().unwrap();
    let hr = doc.first_child(div).unwrap();
    assert_eq!(doc.node_name(hr), Some("hr"));
    assert_eq!(doc.first_child(hr), None);
    assert_eq!(doc.node_value(doc.next_sibling(hr).unwrap()), Some("after"));

    let err = parse_str("<div><hr>after</div>").unwrap_err();
    assert_eq!(err.kind, ErrorKind::WellFormedness);
}

#[test]
fn test_tidy_custom_void_elements() {
    let opts = tidy().void_elements(["spacer"]);
    let doc = parse_str_with_options("<p><spacer>x<br>y</br></p>", &opts).unwrap();
    let p = doc.root_element().unwrap();
    let spacer = doc.first_child(p).unwrap();
    assert_eq!(doc.first_child(spacer), None);
    let br = doc.elements_by_tag_name(p, "br")[0];
    assert_eq!(doc.text_content(br), "y");
}

#[test]
fn test_tidy_unquoted_and_valueless_attributes() {
    let doc = parse_str_with_options("<INPUT TYPE=checkbox CHECKED VALUE=a/b>", &tidy()).unwrap();
    let input = doc.root_element().unwrap();
    assert_eq!(doc.node_name(input), Some("input"));
    assert_eq!(doc.attribute(input, "type"), Some("checkbox"));
    assert_eq!(doc.attribute(input, "checked"), Some("checked"));
    assert_eq!(doc.attribute(input, "value"), Some("a/b"));
}

#[test]
fn test_tidy_unquoted_value_stops_before_tag_end() {
    let doc = parse_str_with_options("<a href=x.html>link</a>", &tidy()).unwrap();
    let a = doc.root_element().unwrap();
    assert_eq!(doc.attribute(a, "href"), Some("x.html"));
    assert_eq!(doc.text_content(a), "link");

    let doc = parse_str_with_options("<r><img src=pic.png/>after</r>", &tidy()).unwrap();
    let r = doc.root_element().unwrap();
    let img = doc.first_child(r).unwrap();
    assert_eq!(doc.attribute(img, "src"), Some("pic.png"));
    assert_eq!(doc.first_child(img), None);
}

#[test]
fn test_tidy_keywords_case_insensitive() {
    let input = "<!doctype html><html><body>hi</body></html>";
    assert!(parse_str(input).is_err());
    let doc = parse_str_with_options(input, &tidy()).unwrap();
    assert_eq!(doc.document_type().unwrap().name, "html");
}

#[test]
fn test_tidy_public_id_without_system_literal() {
    let input = r#"<!DOCTYPE html PUBLIC "-//W3C//DTD HTML 4.01//EN"><html/>"#;
    assert!(parse_str(input).is_err());
    let doc = parse_str_with_options(input, &tidy()).unwrap();
    let doctype = doc.document_type().unwrap();
    assert_eq!(doctype.external_id.public_id.as_deref(), Some("-//W3C//DTD HTML 4.01//EN"));
    assert_eq!(doctype.external_id.system_id, None);
}

#[test]
fn test_tidy_repairs_are_diagnostics() {
    let doc = parse_str_with_options("stray<r>a &nbsp b < c</r><extra/>", &tidy()).unwrap();
    let r = doc.root_element().unwrap();
    assert!(doc.text_content(r).contains("a &nbsp b < c"));
    // The second top-level element is kept under the document element.
    assert_eq!(doc.elements_by_tag_name(r, "extra").len(), 1);
    assert!(doc.diagnostics.len() >= 3);
    assert!(doc
        .diagnostics
        .iter()
        .all(|d| d.severity == ErrorSeverity::Error));
}

#[test]
fn test_tidy_skips_invalid_markup() {
    let doc = parse_str_with_options("<r><1bad>ok<?xml-bad?></r>", &tidy()).unwrap();
    let r = doc.root_element().unwrap();
    assert_eq!(doc.text_content(r), "ok");
}

#[test]
fn test_tidy_missing_root() {
    assert!(parse_str("<!-- only a comment -->").is_err());
    let doc = parse_str_with_options("<!-- only a comment -->", &tidy()).unwrap();
    assert!(doc.root_element().is_none());
    assert_eq!(doc.diagnostics.len(), 1);
}

#[test]
fn test_error_keeps_tidy_diagnostics() {
    let err = parse_str_with_options("<r a=1><x></r", &tidy()).unwrap_err();
    assert!(!err.diagnostics.is_empty());
}
