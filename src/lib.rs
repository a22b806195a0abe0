//! # tidyxml
//!
//! An XML 1.0 parsing engine that turns raw bytes into a mutable, navigable
//! document tree. It detects the character encoding, expands character,
//! general and parameter entities (internal and external, with recursion
//! detection), parses internal and external DTD subsets, and offers a tidy
//! mode that repairs common real-world malformations.
//!
//! ## Quick Start
//!
//! ```
//! use tidyxml::Document;
//!
//! let doc = Document::parse_str("<root><child>Hello</child></root>").unwrap();
//! let root = doc.root_element().unwrap();
//! assert_eq!(doc.node_name(root), Some("root"));
//! ```
//!
//! ## Tidy mode
//!
//! ```
//! use tidyxml::parser::{parse_str_with_options, ParseOptions};
//!
//! let opts = ParseOptions::default().tidy(true);
//! let doc = parse_str_with_options("<P CLASS=intro>Hello<BR>world", &opts).unwrap();
//! let p = doc.root_element().unwrap();
//! assert_eq!(doc.attribute(p, "class"), Some("intro"));
//! assert_eq!(doc.text_content(p), "Helloworld");
//! assert!(!doc.diagnostics.is_empty());
//! ```

pub mod dtd;
pub mod encoding;
pub mod error;
pub mod parser;
pub mod tree;

// Re-export primary types at the crate root for convenience.
pub use error::{ErrorKind, ParseError};
pub use parser::{parse_bytes, parse_file, parse_str, ParseOptions};
pub use tree::{Document, NodeId, NodeKind, NodeType};
