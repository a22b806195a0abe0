//! Entity registry and external DTD subset cache.
//!
//! [`EntityRegistry`] is per-parse state: declared general and parameter
//! entities (first declaration wins), the stack of entities currently being
//! expanded, and the counters behind the expansion limits in
//! [`ExpansionLimits`].
//!
//! [`DtdCache`] is shared across parses. It keeps every external subset that
//! was fetched and parsed successfully, keyed by public and system
//! identifier, so documents that reference the same DTD skip the fetch.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use crate::dtd::{EntityDecl, ExternalId, ExternalSubset};
use crate::error::{ErrorKind, ParseError, SourceLocation};

use super::input::{
    DEFAULT_MAX_AMPLIFICATION, DEFAULT_MAX_ENTITY_DEPTH, DEFAULT_MAX_ENTITY_EXPANSIONS,
};
use super::ParseOptions;

/// Expanded output below this many bytes is never rejected for
/// amplification, matching libxml2's allowance for small documents with
/// legitimately repetitive entities.
const ALLOWED_EXPANSION: usize = 1_000_000;

/// Limits on entity expansion for one parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExpansionLimits {
    /// Total number of entity expansions.
    pub max_expansions: u32,
    /// Entities being expanded inside one another.
    pub max_depth: usize,
    /// Ratio of expanded bytes to input bytes.
    pub max_amplification: usize,
}

impl Default for ExpansionLimits {
    fn default() -> Self {
        Self {
            max_expansions: DEFAULT_MAX_ENTITY_EXPANSIONS,
            max_depth: DEFAULT_MAX_ENTITY_DEPTH,
            max_amplification: DEFAULT_MAX_AMPLIFICATION,
        }
    }
}

impl From<&ParseOptions> for ExpansionLimits {
    fn from(options: &ParseOptions) -> Self {
        Self {
            max_expansions: options.max_entity_expansions,
            max_depth: options.max_entity_depth,
            max_amplification: options.max_amplification,
        }
    }
}

/// Outcome of looking up a general entity reference.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Resolved {
    /// One of the five predefined entities (`lt`, `gt`, `amp`, `apos`,
    /// `quot`).
    Builtin(char),
    /// A declared entity.
    Entity(EntityDecl),
    /// Undeclared, but a non-standalone DTD may declare it externally. The
    /// caller passes the reference through as literal text.
    Unresolved,
}

fn builtin(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => None,
    }
}

/// Declared entities and expansion bookkeeping for one parse.
#[derive(Debug)]
pub(crate) struct EntityRegistry {
    general: HashMap<String, EntityDecl>,
    parameter: HashMap<String, EntityDecl>,
    expanding: HashSet<String>,
    expansions: u32,
    limits: ExpansionLimits,
    /// Bytes of document and external entity text read so far.
    input_size: usize,
    /// Bytes produced by entity replacement text and attribute defaults.
    expanded_size: usize,
    /// A document type declaration was seen.
    pub has_dtd: bool,
    /// The XML declaration said `standalone="yes"`.
    pub standalone: bool,
}

impl EntityRegistry {
    pub fn new(limits: ExpansionLimits) -> Self {
        Self {
            general: HashMap::new(),
            parameter: HashMap::new(),
            expanding: HashSet::new(),
            expansions: 0,
            limits,
            input_size: 0,
            expanded_size: 0,
            has_dtd: false,
            standalone: false,
        }
    }

    /// Registers an entity. Returns `false` if the name was already
    /// declared; the earlier declaration is kept.
    pub fn declare(&mut self, decl: EntityDecl) -> bool {
        let table = if decl.parameter {
            &mut self.parameter
        } else {
            &mut self.general
        };
        if table.contains_key(&decl.name) {
            tracing::debug!(
                entity = %decl.name,
                parameter = decl.parameter,
                "ignoring duplicate entity declaration"
            );
            return false;
        }
        table.insert(decl.name.clone(), decl);
        true
    }

    /// Merges every entity of a parsed external subset.
    pub fn merge(&mut self, subset: &ExternalSubset) {
        for decl in subset
            .parameter_entities
            .iter()
            .chain(&subset.general_entities)
        {
            self.declare(decl.clone());
        }
    }

    /// Looks up a general entity.
    ///
    /// # Errors
    ///
    /// An undeclared name is an [`ErrorKind::UndefinedReference`] error when
    /// there is no DTD or the document is standalone.
    pub fn resolve_general(
        &self,
        name: &str,
        location: &SourceLocation,
    ) -> Result<Resolved, ParseError> {
        if let Some(c) = builtin(name) {
            return Ok(Resolved::Builtin(c));
        }
        if let Some(decl) = self.general.get(name) {
            return Ok(Resolved::Entity(decl.clone()));
        }
        if self.has_dtd && !self.standalone {
            tracing::debug!(entity = name, "passing through undeclared entity reference");
            return Ok(Resolved::Unresolved);
        }
        Err(ParseError::new(
            ErrorKind::UndefinedReference,
            format!("undefined entity '{name}'"),
            location.clone(),
        ))
    }

    /// Looks up a parameter entity.
    ///
    /// # Errors
    ///
    /// An undeclared name is always an [`ErrorKind::UndefinedReference`]
    /// error.
    pub fn resolve_parameter(
        &self,
        name: &str,
        location: &SourceLocation,
    ) -> Result<EntityDecl, ParseError> {
        self.parameter.get(name).cloned().ok_or_else(|| {
            ParseError::new(
                ErrorKind::UndefinedReference,
                format!("undefined parameter entity '%{name};'"),
                location.clone(),
            )
        })
    }

    /// Marks `decl` as being expanded and charges its replacement text to
    /// the amplification budget.
    ///
    /// # Errors
    ///
    /// Fails with a well-formedness error if the entity is already being
    /// expanded (direct or indirect self-reference) or any limit in
    /// [`ExpansionLimits`] is exceeded.
    pub fn begin_expansion(
        &mut self,
        decl: &EntityDecl,
        location: &SourceLocation,
    ) -> Result<(), ParseError> {
        let key = expansion_key(decl);
        if self.expanding.contains(&key) {
            return Err(ParseError::new(
                ErrorKind::WellFormedness,
                format!("entity '{key}' references itself"),
                location.clone(),
            ));
        }
        if self.expanding.len() >= self.limits.max_depth {
            return Err(ParseError::new(
                ErrorKind::WellFormedness,
                format!(
                    "entity nesting depth limit exceeded ({})",
                    self.limits.max_depth
                ),
                location.clone(),
            ));
        }
        self.expansions += 1;
        if self.expansions > self.limits.max_expansions {
            return Err(ParseError::new(
                ErrorKind::WellFormedness,
                format!(
                    "entity expansion limit exceeded ({})",
                    self.limits.max_expansions
                ),
                location.clone(),
            ));
        }
        self.add_output(decl.replacement_text().map_or(0, str::len), location)?;
        tracing::trace!(entity = %key, depth = self.expanding.len(), "expanding entity");
        self.expanding.insert(key);
        Ok(())
    }

    /// Counts `len` bytes of source text: the document itself, an external
    /// entity or an external subset.
    pub fn add_input(&mut self, len: usize) {
        self.input_size = self.input_size.saturating_add(len);
    }

    /// Counts `len` bytes of text produced by expansion rather than read
    /// from a source.
    ///
    /// # Errors
    ///
    /// Fails once the expanded text exceeds `max_amplification` times the
    /// input read so far.
    pub fn add_output(&mut self, len: usize, location: &SourceLocation) -> Result<(), ParseError> {
        self.expanded_size = self.expanded_size.saturating_add(len);
        if self.expanded_size > ALLOWED_EXPANSION
            && self.expanded_size
                > self
                    .input_size
                    .saturating_mul(self.limits.max_amplification)
        {
            return Err(ParseError::new(
                ErrorKind::WellFormedness,
                "maximum entity amplification factor exceeded",
                location.clone(),
            ));
        }
        Ok(())
    }

    /// Clears the in-expansion mark set by [`begin_expansion`](Self::begin_expansion).
    pub fn end_expansion(&mut self, decl: &EntityDecl) {
        self.expanding.remove(&expansion_key(decl));
    }

    /// Returns the declared general entities.
    pub fn general_entities(&self) -> impl Iterator<Item = &EntityDecl> {
        self.general.values()
    }

    /// Returns the declared parameter entities.
    pub fn parameter_entities(&self) -> impl Iterator<Item = &EntityDecl> {
        self.parameter.values()
    }
}

fn expansion_key(decl: &EntityDecl) -> String {
    if decl.parameter {
        format!("%{}", decl.name)
    } else {
        decl.name.clone()
    }
}

/// A thread-safe cache of parsed external DTD subsets.
///
/// Share one instance between parses through
/// [`ParseOptions::dtd_cache`](crate::parser::ParseOptions::dtd_cache).
/// Entries are stored under every identifier that is present and looked up
/// by public identifier first, then system identifier.
///
/// ```
/// use std::sync::Arc;
/// use tidyxml::parser::DtdCache;
///
/// let cache = Arc::new(DtdCache::new());
/// assert!(cache.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct DtdCache {
    entries: Mutex<HashMap<String, ExternalSubset>>,
}

impl DtdCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a detached copy of the subset cached for `id`.
    #[must_use]
    pub fn get(&self, id: &ExternalId) -> Option<ExternalSubset> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let by_public = id
            .public_id
            .as_deref()
            .and_then(|p| entries.get(&public_key(p)));
        by_public
            .or_else(|| {
                id.system_id
                    .as_deref()
                    .and_then(|s| entries.get(&system_key(s)))
            })
            .cloned()
    }

    /// Stores `subset` under each identifier in `id`.
    pub fn put(&self, id: &ExternalId, subset: &ExternalSubset) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(public) = id.public_id.as_deref() {
            entries.insert(public_key(public), subset.clone());
        }
        if let Some(system) = id.system_id.as_deref() {
            entries.insert(system_key(system), subset.clone());
        }
    }

    /// Returns the number of cache keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached subset.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn public_key(id: &str) -> String {
    format!("PUBLIC {id}")
}

fn system_key(id: &str) -> String {
    format!("SYSTEM {id}")
}
