//! Security-focused tests for tidyxml.
//!
//! These tests verify that the parser rejects malicious or pathological
//! inputs that could cause denial of service (`DoS`) via excessive resource
//! consumption, and that external resources are only opened through the
//! configured resolver.

#![allow(clippy::unwrap_used)]

use std::io;
use std::sync::{Arc, Mutex};

use tidyxml::parser::{parse_str_with_options, ParseOptions, Resource, ResourceResolver};
use tidyxml::{Document, ErrorKind};

// ---------------------------------------------------------------------------
// Depth limit tests
// ---------------------------------------------------------------------------

#[test]
fn test_deeply_nested_elements_rejected() {
    // Run in a thread with a larger stack to avoid stack overflow in debug mode.
    let result = std::thread::Builder::new()
        .stack_size(8 * 1024 * 1024)
        .spawn(|| {
            let open_tags: String = (0..300).map(|_| "<a>").collect();
            let close_tags: String = (0..300).map(|_| "</a>").collect();
            Document::parse_str(&format!("{open_tags}{close_tags}"))
        })
        .unwrap()
        .join()
        .unwrap();
    let err = result.unwrap_err();
    assert!(
        err.message.contains("depth"),
        "error should mention depth: {}",
        err.message
    );
}

#[test]
fn test_depth_limit_exact_boundary() {
    let open: String = (0..3).map(|_| "<a>").collect();
    let close: String = (0..3).map(|_| "</a>").collect();
    let xml = format!("{open}{close}");

    let opts = ParseOptions::default().max_depth(3);
    assert!(parse_str_with_options(&xml, &opts).is_ok());

    let opts = ParseOptions::default().max_depth(2);
    assert!(parse_str_with_options(&xml, &opts).is_err());
}

#[test]
fn test_depth_limit_applies_in_tidy_mode() {
    let xml: String = (0..20).map(|_| "<div>").collect();
    let opts = ParseOptions::default().tidy(true).max_depth(10);
    let err = parse_str_with_options(&xml, &opts).unwrap_err();
    assert!(err.message.contains("depth"));
}

// ---------------------------------------------------------------------------
// Entity expansion tests
// ---------------------------------------------------------------------------

/// The classic "billion laughs" document.
fn billion_laughs() -> String {
    let mut xml = String::from("<!DOCTYPE lolz [\n<!ENTITY lol \"lol\">\n");
    let mut prev = "lol".to_string();
    for i in 1..=9 {
        let name = format!("lol{i}");
        let refs: String = (0..10).map(|_| format!("&{prev};")).collect();
        xml.push_str(&format!("<!ENTITY {name} \"{refs}\">\n"));
        prev = name;
    }
    xml.push_str("]>\n<lolz>&lol9;</lolz>");
    xml
}

#[test]
fn test_billion_laughs_rejected() {
    let err = Document::parse_str(&billion_laughs()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::WellFormedness);
    assert!(err.message.contains("expansion limit"), "{}", err.message);
}

#[test]
fn test_billion_laughs_in_attribute_rejected() {
    let xml = billion_laughs().replace("<lolz>&lol9;</lolz>", "<lolz a=\"&lol9;\"/>");
    let err = Document::parse_str(&xml).unwrap_err();
    assert!(err.message.contains("expansion limit"), "{}", err.message);
}

#[test]
fn test_billion_laughs_rejected_in_tidy_mode() {
    let opts = ParseOptions::default().tidy(true);
    assert!(parse_str_with_options(&billion_laughs(), &opts).is_err());
}

#[test]
fn test_parameter_entity_recursion_rejected() {
    let xml = "<!DOCTYPE r [<!ENTITY % a \"&#37;b;\"><!ENTITY % b \"&#37;a;\"> %a;]><r/>";
    let err = Document::parse_str(xml).unwrap_err();
    assert_eq!(err.kind, ErrorKind::WellFormedness);
    assert!(err.message.contains("references itself"));
}

/// `e0` is text; each `e{i}` references `e{i-1}`.
fn entity_chain(depth: usize) -> String {
    let mut subset = String::from("<!ENTITY e0 \"x\">");
    for i in 1..=depth {
        subset.push_str(&format!("<!ENTITY e{i} \"&e{};\">", i - 1));
    }
    subset
}

#[test]
fn test_deep_entity_nesting_rejected_in_content() {
    let xml = format!("<!DOCTYPE r [{}]><r>&e3000;</r>", entity_chain(3000));
    let err = Document::parse_str(&xml).unwrap_err();
    assert_eq!(err.kind, ErrorKind::WellFormedness);
    assert!(err.message.contains("nesting depth"), "{}", err.message);
}

#[test]
fn test_deep_entity_nesting_rejected_in_attribute() {
    let xml = format!("<!DOCTYPE r [{}]><r a=\"&e500;\"/>", entity_chain(500));
    let err = Document::parse_str(&xml).unwrap_err();
    assert!(err.message.contains("nesting depth"), "{}", err.message);
}

#[test]
fn test_entity_nesting_within_limit() {
    let xml = format!("<!DOCTYPE r [{}]><r>&e30;</r>", entity_chain(30));
    let doc = Document::parse_str(&xml).unwrap();
    assert_eq!(doc.text_content(doc.root_element().unwrap()), "x");

    let opts = ParseOptions::default().max_entity_depth(10);
    let err = parse_str_with_options(&xml, &opts).unwrap_err();
    assert!(err.message.contains("nesting depth limit exceeded (10)"), "{}", err.message);
}

#[test]
fn test_deep_parameter_entity_nesting_rejected() {
    let mut subset = String::from("<!ENTITY % p0 \"<!ENTITY x 'y'>\">");
    for i in 1..=500 {
        subset.push_str(&format!("<!ENTITY % p{i} \"&#37;p{};\">", i - 1));
    }
    let xml = format!("<!DOCTYPE r [{subset} %p500;]><r/>");
    let err = Document::parse_str(&xml).unwrap_err();
    assert!(err.message.contains("nesting depth"), "{}", err.message);
}

// ---------------------------------------------------------------------------
// Amplification tests
// ---------------------------------------------------------------------------

#[test]
fn test_entity_amplification_rejected() {
    let a = "x".repeat(10_000);
    let b = "&a;".repeat(5_000);
    let xml = format!("<!DOCTYPE r [<!ENTITY a \"{a}\"><!ENTITY b \"{b}\">]><r>&b;</r>");
    let err = Document::parse_str(&xml).unwrap_err();
    assert_eq!(err.kind, ErrorKind::WellFormedness);
    assert!(err.message.contains("amplification"), "{}", err.message);
}

#[test]
fn test_moderate_expansion_allowed() {
    let a = "x".repeat(1_000);
    let b = "&a;".repeat(100);
    let xml = format!("<!DOCTYPE r [<!ENTITY a \"{a}\"><!ENTITY b \"{b}\">]><r>&b;</r>");
    let doc = Document::parse_str(&xml).unwrap();
    assert_eq!(doc.text_content(doc.root_element().unwrap()).len(), 100_000);
}

#[test]
fn test_attribute_default_amplification_rejected() {
    let value = "x".repeat(10_000);
    let items = "<r/>".repeat(200);
    let xml = format!("<!DOCTYPE d [<!ATTLIST r a CDATA \"{value}\">]><d>{items}</d>");
    let err = Document::parse_str(&xml).unwrap_err();
    assert!(err.message.contains("amplification"), "{}", err.message);
}

// ---------------------------------------------------------------------------
// Recovery inside an expansion
// ---------------------------------------------------------------------------

/// Serves the same bytes for every system identifier.
struct Fixed(&'static str);

impl ResourceResolver for Fixed {
    fn open_system(&self, system_id: &str, _base: Option<&str>) -> io::Result<Resource> {
        Ok(Resource {
            bytes: self.0.as_bytes().to_vec(),
            location: system_id.to_string(),
        })
    }
}

#[test]
fn test_failed_expansion_does_not_poison_later_references() {
    let opts = ParseOptions::default()
        .tidy(true)
        .resolver(Arc::new(Fixed("<?xml version=\"1.0\"?>text")));
    let xml = r#"<!DOCTYPE r [
<!ENTITY % p SYSTEM "p.ent">
<!ENTITY e "%p;">
<!ENTITY f "%p;">
]><r/>"#;
    let doc = parse_str_with_options(xml, &opts).unwrap();
    let messages: Vec<_> = doc.diagnostics.iter().map(|d| d.message.as_str()).collect();
    assert_eq!(
        messages
            .iter()
            .filter(|m| m.contains("text declaration requires an encoding"))
            .count(),
        2,
        "{messages:?}"
    );
    assert!(!messages.iter().any(|m| m.contains("references itself")), "{messages:?}");
}

// ---------------------------------------------------------------------------
// Name length tests
// ---------------------------------------------------------------------------

#[test]
fn test_long_name_rejected() {
    let name = "a".repeat(200);
    let xml = format!("<{name}/>");
    let opts = ParseOptions::default().max_name_length(100);
    let err = parse_str_with_options(&xml, &opts).unwrap_err();
    assert!(err.message.contains("name"), "{}", err.message);
    assert!(Document::parse_str(&xml).is_ok());
}

// ---------------------------------------------------------------------------
// External resource access
// ---------------------------------------------------------------------------

/// A resolver that records every request and serves nothing.
#[derive(Default)]
struct Recording {
    requests: Mutex<Vec<String>>,
}

impl ResourceResolver for Recording {
    fn open_system(&self, system_id: &str, _base: Option<&str>) -> io::Result<Resource> {
        self.requests.lock().unwrap().push(system_id.to_string());
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
    }
}

#[test]
fn test_external_entity_goes_through_resolver() {
    let recording = Arc::new(Recording::default());
    let opts = ParseOptions::default().resolver(recording.clone());
    let xml = r#"<!DOCTYPE r [<!ENTITY xxe SYSTEM "file:///etc/passwd">]><r>&xxe;</r>"#;

    let err = parse_str_with_options(xml, &opts).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Io);
    assert_eq!(*recording.requests.lock().unwrap(), vec!["file:///etc/passwd"]);
}

#[test]
fn test_unreferenced_external_entity_is_not_opened() {
    let recording = Arc::new(Recording::default());
    let opts = ParseOptions::default().resolver(recording.clone());
    let xml = r#"<!DOCTYPE r [<!ENTITY xxe SYSTEM "secret.txt">]><r>safe</r>"#;

    assert!(parse_str_with_options(xml, &opts).is_ok());
    assert!(recording.requests.lock().unwrap().is_empty());
}

#[test]
fn test_external_dtd_loading_can_be_disabled() {
    let recording = Arc::new(Recording::default());
    let opts = ParseOptions::default()
        .resolver(recording.clone())
        .load_external_dtd(false);
    let doc = parse_str_with_options(r#"<!DOCTYPE r SYSTEM "r.dtd"><r/>"#, &opts).unwrap();

    assert!(recording.requests.lock().unwrap().is_empty());
    assert!(doc.diagnostics.is_empty());
}

#[test]
fn test_standalone_document_skips_external_subset() {
    let recording = Arc::new(Recording::default());
    let opts = ParseOptions::default().resolver(recording.clone());
    let xml = r#"<?xml version="1.0" standalone="yes"?><!DOCTYPE r SYSTEM "r.dtd"><r/>"#;

    assert!(parse_str_with_options(xml, &opts).is_ok());
    assert!(recording.requests.lock().unwrap().is_empty());
}
