//! Error types and diagnostics for XML parsing and tree mutation.
//!
//! Every parse failure is a [`ParseError`] tagged with an [`ErrorKind`] and a
//! [`SourceLocation`] naming the source (file, URI or `"unknown"`), the
//! 1-based line and the 1-based column. When an error surfaces through an
//! entity or an external subset it collects context frames describing where
//! that text was referenced, so the innermost position is never reported on
//! its own.
//!
//! Tidy mode records the problems it repairs as [`ParseDiagnostic`]s instead
//! of failing. Tree mutations that would break the node hierarchy fail with
//! [`DomError`].

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Severity level for a parse diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSeverity {
    /// A non-fatal issue that doesn't prevent parsing.
    Warning,
    /// A recoverable error: tidy mode repaired the input and carried on.
    Error,
    /// An unrecoverable error: parsing must stop.
    Fatal,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal error"),
        }
    }
}

/// Category of a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed low-level structure, e.g. XML declaration pseudo-attributes
    /// out of order.
    Syntax,
    /// A violation of the XML 1.0 well-formedness constraints.
    WellFormedness,
    /// A DTD-relative problem such as a root element that does not match the
    /// declared document type. Only raised outside tidy mode.
    Validity,
    /// An entity that is referenced but never declared.
    UndefinedReference,
    /// A required literal or character class was not found.
    UnexpectedData,
    /// The input ended while a construct was still open. This is a
    /// well-formedness error reported under its own kind.
    UnexpectedEof,
    /// The underlying stream could not be opened or read.
    Io,
    /// The byte stream could not be decoded.
    Encoding,
}

impl ErrorKind {
    /// Returns `true` for the kinds that XML 1.0 classifies as
    /// well-formedness errors.
    #[must_use]
    pub fn is_well_formedness(self) -> bool {
        matches!(
            self,
            Self::WellFormedness | Self::UndefinedReference | Self::UnexpectedEof
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Syntax => "syntax error",
            Self::WellFormedness => "well-formedness error",
            Self::Validity => "validity error",
            Self::UndefinedReference => "undefined reference",
            Self::UnexpectedData => "unexpected data",
            Self::UnexpectedEof => "unexpected end of input",
            Self::Io => "I/O error",
            Self::Encoding => "encoding error",
        };
        f.write_str(label)
    }
}

/// Source location within an XML document or one of its entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Name of the source: a file name, a URI, or `"unknown"`.
    pub source: Arc<str>,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number (in characters, not bytes).
    pub column: u32,
}

impl SourceLocation {
    /// Source name used when the caller did not provide one.
    pub const UNKNOWN: &'static str = "unknown";

    /// Creates a location in the named source.
    pub fn new(source: impl Into<Arc<str>>, line: u32, column: u32) -> Self {
        Self {
            source: source.into(),
            line,
            column,
        }
    }
}

impl Default for SourceLocation {
    fn default() -> Self {
        Self::new(Self::UNKNOWN, 1, 1)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source, self.line, self.column)
    }
}

/// A single diagnostic emitted during parsing.
#[derive(Debug, Clone)]
pub struct ParseDiagnostic {
    /// The severity of this diagnostic.
    pub severity: ErrorSeverity,
    /// Human-readable message.
    pub message: String,
    /// Where in the source this happened.
    pub location: SourceLocation,
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.location, self.severity, self.message)
    }
}

/// The error type returned when XML parsing fails.
#[derive(Debug, Clone, Error)]
#[error("{location}: {kind}: {message}{}", render_context(.context))]
pub struct ParseError {
    /// The category of the failure.
    pub kind: ErrorKind,
    /// The primary error message.
    pub message: String,
    /// Where in the source the error occurred.
    pub location: SourceLocation,
    /// Context frames, innermost first, added as the error crossed entity
    /// and external subset boundaries.
    pub context: Vec<String>,
    /// Diagnostics collected before the failure.
    pub diagnostics: Vec<ParseDiagnostic>,
}

fn render_context(context: &[String]) -> String {
    context.iter().map(|frame| format!("\n  {frame}")).collect()
}

impl ParseError {
    /// Creates an error without context frames or diagnostics.
    pub fn new(kind: ErrorKind, message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            kind,
            message: message.into(),
            location,
            context: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Wraps an I/O failure that happened while reading `location`'s source.
    pub fn io(err: &std::io::Error, location: SourceLocation) -> Self {
        Self::new(ErrorKind::Io, err.to_string(), location)
    }

    /// Appends a context frame describing an enclosing construct.
    #[must_use]
    pub fn with_context(mut self, frame: impl Into<String>) -> Self {
        self.context.push(frame.into());
        self
    }

    /// Returns `true` if this is a well-formedness error in the XML 1.0
    /// sense (including undefined references and unexpected end of input).
    #[must_use]
    pub fn is_well_formedness(&self) -> bool {
        self.kind.is_well_formedness()
    }
}

/// Errors raised by hierarchy-checked tree mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    /// The node may not be inserted where requested: the parent does not
    /// admit that kind of child, a single-occurrence constraint would be
    /// violated, or the node is an ancestor of the parent.
    #[error("hierarchy request error: {0}")]
    HierarchyRequest(String),
    /// The reference node is not a child of the given parent.
    #[error("node not found: {0}")]
    NotFound(String),
    /// The attribute node already belongs to another element.
    #[error("attribute '{0}' is already in use by another element")]
    InUseAttribute(String),
    /// A name contains a character that is not allowed.
    #[error("invalid character in name '{0}'")]
    InvalidCharacter(String),
    /// The operation is not supported for this kind of node.
    #[error("operation not supported: {0}")]
    NotSupported(String),
    /// A qualified name is malformed or inconsistent with its namespace.
    #[error("namespace error: {0}")]
    Namespace(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_location_display() {
        let loc = SourceLocation::new("doc.xml", 10, 5);
        assert_eq!(loc.to_string(), "doc.xml:10:5");
    }

    #[test]
    fn test_default_location_is_unknown() {
        let loc = SourceLocation::default();
        assert_eq!(loc.to_string(), "unknown:1:1");
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new(
            ErrorKind::WellFormedness,
            "mismatched end tag",
            SourceLocation::new("a.xml", 1, 15),
        );
        assert_eq!(
            err.to_string(),
            "a.xml:1:15: well-formedness error: mismatched end tag"
        );
    }

    #[test]
    fn test_parse_error_display_with_context() {
        let err = ParseError::new(
            ErrorKind::UndefinedReference,
            "undefined entity 'x'",
            SourceLocation::new("a.xml", 2, 3),
        )
        .with_context("in entity 'outer' referenced at a.xml:5:7");
        assert_eq!(
            err.to_string(),
            "a.xml:2:3: undefined reference: undefined entity 'x'\n  in entity 'outer' referenced at a.xml:5:7"
        );
    }

    #[test]
    fn test_parse_diagnostic_display() {
        let diag = ParseDiagnostic {
            severity: ErrorSeverity::Warning,
            message: "attribute value not quoted".to_string(),
            location: SourceLocation::new("page.html", 3, 10),
        };
        assert_eq!(
            diag.to_string(),
            "page.html:3:10: warning: attribute value not quoted"
        );
    }

    #[test]
    fn test_well_formedness_kinds() {
        assert!(ErrorKind::UnexpectedEof.is_well_formedness());
        assert!(ErrorKind::UndefinedReference.is_well_formedness());
        assert!(!ErrorKind::Validity.is_well_formedness());
        assert!(!ErrorKind::Syntax.is_well_formedness());
    }

    #[test]
    fn test_dom_error_display() {
        let err = DomError::HierarchyRequest("document already has an element".into());
        assert_eq!(
            err.to_string(),
            "hierarchy request error: document already has an element"
        );
    }
}
