//! XML 1.0 parser.
//!
//! A hand-rolled recursive descent parser for the W3C XML 1.0 (Fifth
//! Edition) grammar that builds a [`Document`] tree. Entity replacement text
//! and external subsets are parsed by the same grammar functions over a
//! bounded sub-source, so positions inside an entity report where its text
//! was declared.
//!
//! Tidy mode accepts common real-world malformations (unquoted attribute
//! values, missing end tags, case-insensitive keywords, unclosed void
//! elements) and records each repair as a diagnostic on the document.

pub(crate) mod input;
mod content;
mod dtd;
mod markup;
mod registry;
mod resolver;
mod xml;

pub use registry::DtdCache;
pub use resolver::{local_resource_name, FileResolver, Resource, ResourceResolver};

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::encoding::EncodingError;
use crate::error::{ErrorKind, ErrorSeverity, ParseDiagnostic, ParseError, SourceLocation};
use crate::tree::Document;

use input::{
    DEFAULT_MAX_AMPLIFICATION, DEFAULT_MAX_DEPTH, DEFAULT_MAX_ENTITY_DEPTH,
    DEFAULT_MAX_ENTITY_EXPANSIONS, DEFAULT_MAX_NAME_LENGTH,
};

/// HTML elements that never have content. In tidy mode a start tag with one
/// of these names is treated as an empty-element tag.
const DEFAULT_VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Parse options controlling parser behavior and security limits.
///
/// Use the builder pattern to configure options:
///
/// ```
/// use tidyxml::parser::ParseOptions;
///
/// let opts = ParseOptions::default()
///     .tidy(true)
///     .source_name("page.html")
///     .max_depth(128);
/// ```
pub struct ParseOptions {
    /// If true, repair common malformations instead of failing, recording
    /// each repair in [`Document::diagnostics`].
    pub tidy: bool,
    /// Name reported in error locations (default: `unknown`).
    pub source_name: Option<String>,
    /// Base for resolving relative system identifiers when the source name
    /// is not a file path.
    pub base_path: Option<PathBuf>,
    /// If true, fetch and parse the external DTD subset of non-standalone
    /// documents (default: true).
    pub load_external_dtd: bool,
    /// Element names treated as empty in tidy mode.
    pub void_elements: Vec<String>,

    // -- Security limits --
    /// Maximum element nesting depth (default: 256).
    pub max_depth: u32,
    /// Maximum length in bytes of an element or attribute name (default: 50,000).
    pub max_name_length: usize,
    /// Maximum number of entity reference expansions per document (default: 10,000).
    pub max_entity_expansions: u32,
    /// Maximum number of entities expanded inside one another (default: 40).
    pub max_entity_depth: usize,
    /// Maximum ratio of entity-expanded text to input text once the
    /// expansion passes 1 MB (default: 5).
    pub max_amplification: usize,

    // -- External resources --
    /// Opens external entities and DTD subsets.
    pub resolver: Arc<dyn ResourceResolver>,
    /// Shared cache of parsed external subsets.
    pub dtd_cache: Option<Arc<DtdCache>>,
}

impl Clone for ParseOptions {
    fn clone(&self) -> Self {
        Self {
            tidy: self.tidy,
            source_name: self.source_name.clone(),
            base_path: self.base_path.clone(),
            load_external_dtd: self.load_external_dtd,
            void_elements: self.void_elements.clone(),
            max_depth: self.max_depth,
            max_name_length: self.max_name_length,
            max_entity_expansions: self.max_entity_expansions,
            max_entity_depth: self.max_entity_depth,
            max_amplification: self.max_amplification,
            resolver: Arc::clone(&self.resolver),
            dtd_cache: self.dtd_cache.clone(),
        }
    }
}

impl fmt::Debug for ParseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseOptions")
            .field("tidy", &self.tidy)
            .field("source_name", &self.source_name)
            .field("base_path", &self.base_path)
            .field("load_external_dtd", &self.load_external_dtd)
            .field("void_elements", &self.void_elements)
            .field("max_depth", &self.max_depth)
            .field("max_name_length", &self.max_name_length)
            .field("max_entity_expansions", &self.max_entity_expansions)
            .field("max_entity_depth", &self.max_entity_depth)
            .field("max_amplification", &self.max_amplification)
            .field("resolver", &"...")
            .field("dtd_cache", &self.dtd_cache.as_ref().map(|c| c.len()))
            .finish()
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            tidy: false,
            source_name: None,
            base_path: None,
            load_external_dtd: true,
            void_elements: DEFAULT_VOID_ELEMENTS.iter().map(|s| (*s).to_string()).collect(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
            max_entity_expansions: DEFAULT_MAX_ENTITY_EXPANSIONS,
            max_entity_depth: DEFAULT_MAX_ENTITY_DEPTH,
            max_amplification: DEFAULT_MAX_AMPLIFICATION,
            resolver: Arc::new(FileResolver::new()),
            dtd_cache: None,
        }
    }
}

impl ParseOptions {
    /// Enables or disables tidy (recovery) mode.
    #[must_use]
    pub fn tidy(mut self, yes: bool) -> Self {
        self.tidy = yes;
        self
    }

    /// Sets the source name reported in error locations.
    #[must_use]
    pub fn source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }

    /// Sets the base for resolving relative system identifiers.
    #[must_use]
    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Enables or disables loading of external DTD subsets.
    #[must_use]
    pub fn load_external_dtd(mut self, yes: bool) -> Self {
        self.load_external_dtd = yes;
        self
    }

    /// Replaces the list of void element names used in tidy mode.
    #[must_use]
    pub fn void_elements<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.void_elements = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the maximum element nesting depth.
    #[must_use]
    pub fn max_depth(mut self, max: u32) -> Self {
        self.max_depth = max;
        self
    }

    /// Sets the maximum element/attribute name length in bytes.
    #[must_use]
    pub fn max_name_length(mut self, max: usize) -> Self {
        self.max_name_length = max;
        self
    }

    /// Sets the maximum number of entity reference expansions.
    #[must_use]
    pub fn max_entity_expansions(mut self, max: u32) -> Self {
        self.max_entity_expansions = max;
        self
    }

    /// Sets how deeply entity references may nest.
    #[must_use]
    pub fn max_entity_depth(mut self, max: usize) -> Self {
        self.max_entity_depth = max;
        self
    }

    /// Sets the maximum ratio of expanded entity text to input text.
    #[must_use]
    pub fn max_amplification(mut self, factor: usize) -> Self {
        self.max_amplification = factor;
        self
    }

    /// Sets the resolver used to open external entities and DTD subsets.
    ///
    /// # Security
    ///
    /// External resources are read for every external entity reference and
    /// DTD subset the document names. Supply a restrictive resolver when
    /// parsing untrusted input.
    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn ResourceResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Shares a cache of parsed external subsets with this parse.
    #[must_use]
    pub fn dtd_cache(mut self, cache: Arc<DtdCache>) -> Self {
        self.dtd_cache = Some(cache);
        self
    }
}

/// Converts a decoder failure into a parse error. A UTF-16 stream without a
/// byte order mark is a well-formedness error (XML 1.0 §4.3.3).
pub(crate) fn encoding_error(err: &EncodingError, location: SourceLocation) -> ParseError {
    let kind = match err {
        EncodingError::MissingByteOrderMark { .. } => ErrorKind::WellFormedness,
        EncodingError::Unsupported(_) | EncodingError::Malformed(_) => ErrorKind::Encoding,
    };
    ParseError::new(kind, err.to_string(), location)
}

/// Parses an XML string with default options.
///
/// # Errors
///
/// Returns `ParseError` if the input is not well-formed XML.
pub fn parse_str(input: &str) -> Result<Document, ParseError> {
    parse_str_with_options(input, &ParseOptions::default())
}

/// Parses an XML string with the given options.
///
/// # Errors
///
/// Returns `ParseError` if the input is not well-formed XML and tidy mode
/// cannot repair it.
pub fn parse_str_with_options(input: &str, options: &ParseOptions) -> Result<Document, ParseError> {
    xml::XmlParser::new(options).parse(input)
}

/// Parses raw bytes with default options, detecting the encoding from the
/// byte order mark and the XML declaration.
///
/// # Errors
///
/// Returns `ParseError` if the bytes cannot be decoded or the document is
/// not well-formed.
pub fn parse_bytes(input: &[u8]) -> Result<Document, ParseError> {
    parse_bytes_with_options(input, &ParseOptions::default())
}

/// Parses raw bytes with the given options.
///
/// The document's `encoding` keeps the declared name; `input_encoding` is
/// the encoding actually used to decode the input. Decoder warnings (e.g. a declaration that contradicts the byte
/// order mark) become warning diagnostics.
///
/// # Errors
///
/// Returns `ParseError` if the bytes cannot be decoded or the document is
/// not well-formed.
pub fn parse_bytes_with_options(input: &[u8], options: &ParseOptions) -> Result<Document, ParseError> {
    let source = options.source_name.as_deref().unwrap_or(SourceLocation::UNKNOWN);
    let start = SourceLocation::new(source, 1, 1);
    let decoded = crate::encoding::decode(input, options.tidy)
        .map_err(|e| encoding_error(&e, start.clone()))?;

    let warnings = decoded
        .warnings
        .into_iter()
        .map(|message| {
            tracing::warn!(location = %start, "{message}");
            ParseDiagnostic {
                severity: ErrorSeverity::Warning,
                message,
                location: start.clone(),
            }
        })
        .collect();

    let mut doc = xml::XmlParser::new(options)
        .with_diagnostics(warnings)
        .parse(&decoded.text)?;
    if doc.encoding.is_none() {
        doc.encoding = Some(decoded.encoding.clone());
    }
    doc.input_encoding = Some(decoded.encoding);
    Ok(doc)
}

/// Reads a stream to the end and parses it as bytes.
///
/// # Errors
///
/// Returns an [`ErrorKind::Io`] error if reading fails, otherwise as
/// [`parse_bytes_with_options`].
pub fn parse_reader(mut reader: impl Read, options: &ParseOptions) -> Result<Document, ParseError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).map_err(|e| {
        let source = options.source_name.as_deref().unwrap_or(SourceLocation::UNKNOWN);
        ParseError::io(&e, SourceLocation::new(source, 1, 1))
    })?;
    parse_bytes_with_options(&bytes, options)
}

/// Parses the file at `path`.
///
/// Unless set in `options`, the source name becomes the path and relative
/// system identifiers resolve against the file's directory.
///
/// # Errors
///
/// Returns an [`ErrorKind::Io`] error if the file cannot be read, otherwise
/// as [`parse_bytes_with_options`].
pub fn parse_file(path: impl AsRef<Path>, options: &ParseOptions) -> Result<Document, ParseError> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let bytes = fs::read(path).map_err(|e| {
        ParseError::io(&e, SourceLocation::new(name.as_str(), 1, 1)).with_context(format!("reading {name}"))
    })?;

    let mut options = options.clone();
    if options.source_name.is_none() {
        options.source_name = Some(name);
    }
    if options.base_path.is_none() {
        options.base_path = path.parent().map(Path::to_path_buf);
    }
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "parsing file");
    parse_bytes_with_options(&bytes, &options)
}
