//! DTD declaration data model.
//!
//! Declarations collected from the internal and external subsets
//! (XML 1.0 sections 2.8, 3.2, 3.3, 4.2 and 4.7). The parser records them
//! for entity expansion and attribute defaulting; content models are kept
//! for bookkeeping and are not enforced.

use std::fmt;

use crate::error::SourceLocation;

// ---------------------------------------------------------------------------
// External identifiers
// ---------------------------------------------------------------------------

/// A `SYSTEM` or `PUBLIC` external identifier (XML 1.0 §4.2.2 `[75]`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ExternalId {
    /// The public identifier, if any.
    pub public_id: Option<String>,
    /// The system identifier (URI). Tidy mode allows a `PUBLIC` identifier
    /// without one.
    pub system_id: Option<String>,
}

impl ExternalId {
    /// Creates a `SYSTEM` identifier.
    pub fn system(system_id: impl Into<String>) -> Self {
        Self {
            public_id: None,
            system_id: Some(system_id.into()),
        }
    }

    /// Returns `true` if neither identifier is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.public_id.is_none() && self.system_id.is_none()
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.public_id, &self.system_id) {
            (Some(p), Some(s)) => write!(f, "PUBLIC \"{p}\" \"{s}\""),
            (Some(p), None) => write!(f, "PUBLIC \"{p}\""),
            (None, Some(s)) => write!(f, "SYSTEM \"{s}\""),
            (None, None) => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// The value of an entity declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityValue {
    /// Replacement text of an internal entity, with character references
    /// and parameter entity references already expanded.
    Internal(String),
    /// An external entity, fetched when it is first referenced.
    External(ExternalId),
}

/// An entity declaration (XML 1.0 §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDecl {
    /// The entity name.
    pub name: String,
    /// Replacement text or external identifier.
    pub value: EntityValue,
    /// `true` for parameter entities (`<!ENTITY % name ...>`).
    pub parameter: bool,
    /// The `NDATA` notation of an unparsed entity.
    pub notation: Option<String>,
    /// Where the replacement text starts: the first character inside the
    /// literal for internal entities, the declaration for external ones.
    /// External system identifiers resolve relative to this source.
    pub origin: SourceLocation,
}

impl EntityDecl {
    /// Creates an internal general entity.
    pub fn internal(name: impl Into<String>, text: impl Into<String>, origin: SourceLocation) -> Self {
        Self {
            name: name.into(),
            value: EntityValue::Internal(text.into()),
            parameter: false,
            notation: None,
            origin,
        }
    }

    /// Returns `true` for parsed entities (no `NDATA` notation).
    #[must_use]
    pub fn is_parsed(&self) -> bool {
        self.notation.is_none()
    }

    /// Returns `true` if the entity lives in a separate resource.
    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(self.value, EntityValue::External(_))
    }

    /// Returns the replacement text of an internal entity.
    #[must_use]
    pub fn replacement_text(&self) -> Option<&str> {
        match &self.value {
            EntityValue::Internal(text) => Some(text),
            EntityValue::External(_) => None,
        }
    }
}

/// A notation declaration (XML 1.0 §4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotationDecl {
    /// The notation name.
    pub name: String,
    /// Its external identifier.
    pub external_id: ExternalId,
}

// ---------------------------------------------------------------------------
// Element declarations
// ---------------------------------------------------------------------------

/// An element type declaration (`<!ELEMENT name contentspec>`).
#[derive(Debug, Clone, PartialEq)]
pub struct ElementDecl {
    /// The element name.
    pub name: String,
    /// The declared content model.
    pub content_model: ContentModel,
}

/// The content model of an element declaration (XML 1.0 §3.2).
#[derive(Debug, Clone, PartialEq)]
pub enum ContentModel {
    /// `EMPTY`.
    Empty,
    /// `ANY`.
    Any,
    /// `(#PCDATA)` or `(#PCDATA|a|b)*`; holds the element names.
    Mixed(Vec<String>),
    /// Element content such as `(a,(b|c)*)`.
    Children(ContentSpec),
}

/// A content particle with its occurrence indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentSpec {
    /// The particle.
    pub kind: ContentSpecKind,
    /// How many times it may occur.
    pub occurrence: Occurrence,
}

/// The kind of a content particle.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentSpecKind {
    /// A single element name.
    Name(String),
    /// A sequence `(a, b, c)`.
    Seq(Vec<ContentSpec>),
    /// A choice `(a | b | c)`.
    Choice(Vec<ContentSpec>),
}

/// Occurrence indicator (XML 1.0 §3.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    /// Exactly once.
    Once,
    /// `?`
    Optional,
    /// `*`
    ZeroOrMore,
    /// `+`
    OneOrMore,
}

impl fmt::Display for ContentModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "EMPTY"),
            Self::Any => write!(f, "ANY"),
            Self::Mixed(names) if names.is_empty() => write!(f, "(#PCDATA)"),
            Self::Mixed(names) => write!(f, "(#PCDATA|{})*", names.join("|")),
            Self::Children(spec) => write!(f, "{spec}"),
        }
    }
}

impl fmt::Display for ContentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ContentSpecKind::Name(name) => write!(f, "{name}")?,
            ContentSpecKind::Seq(items) => write_group(f, items, ",")?,
            ContentSpecKind::Choice(items) => write_group(f, items, "|")?,
        }
        match self.occurrence {
            Occurrence::Once => Ok(()),
            Occurrence::Optional => write!(f, "?"),
            Occurrence::ZeroOrMore => write!(f, "*"),
            Occurrence::OneOrMore => write!(f, "+"),
        }
    }
}

fn write_group(f: &mut fmt::Formatter<'_>, items: &[ContentSpec], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{item}")?;
    }
    write!(f, ")")
}

// ---------------------------------------------------------------------------
// Attribute-list declarations
// ---------------------------------------------------------------------------

/// One attribute definition from `<!ATTLIST element ...>`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDecl {
    /// The element this attribute belongs to.
    pub element_name: String,
    /// The attribute name.
    pub attribute_name: String,
    /// The declared type.
    pub attribute_type: AttributeType,
    /// The default value specification.
    pub default: AttributeDefault,
}

/// Attribute types (XML 1.0 §3.3.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeType {
    /// `CDATA`
    CData,
    /// `ID`
    Id,
    /// `IDREF`
    IdRef,
    /// `IDREFS`
    IdRefs,
    /// `ENTITY`
    Entity,
    /// `ENTITIES`
    Entities,
    /// `NMTOKEN`
    NmToken,
    /// `NMTOKENS`
    NmTokens,
    /// `NOTATION (a|b)`
    Notation(Vec<String>),
    /// `(a|b|c)`
    Enumeration(Vec<String>),
}

/// Default value specification (XML 1.0 §3.3.2). Literal values are kept
/// unexpanded; references in them are expanded when the default is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeDefault {
    /// `#REQUIRED`
    Required,
    /// `#IMPLIED`
    Implied,
    /// `#FIXED "value"`
    Fixed(String),
    /// `"value"`
    Default(String),
}

impl AttributeDefault {
    /// Returns the literal that is applied when the attribute is omitted.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Fixed(v) | Self::Default(v) => Some(v),
            Self::Required | Self::Implied => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Collected subsets
// ---------------------------------------------------------------------------

/// Every declaration read from one external DTD subset, in document order.
///
/// This is the unit stored in [`DtdCache`](crate::parser::DtdCache). It owns
/// plain data only, so a clone is fully detached from the document it was
/// read for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalSubset {
    /// General entity declarations, including later duplicates.
    pub general_entities: Vec<EntityDecl>,
    /// Parameter entity declarations, including later duplicates.
    pub parameter_entities: Vec<EntityDecl>,
    /// Element declarations.
    pub elements: Vec<ElementDecl>,
    /// Attribute definitions.
    pub attributes: Vec<AttributeDecl>,
    /// Notation declarations.
    pub notations: Vec<NotationDecl>,
}

impl ExternalSubset {
    /// Returns `true` if the subset declared nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.general_entities.is_empty()
            && self.parameter_entities.is_empty()
            && self.elements.is_empty()
            && self.attributes.is_empty()
            && self.notations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str, occurrence: Occurrence) -> ContentSpec {
        ContentSpec {
            kind: ContentSpecKind::Name(n.to_string()),
            occurrence,
        }
    }

    #[test]
    fn test_content_model_display() {
        assert_eq!(ContentModel::Empty.to_string(), "EMPTY");
        assert_eq!(ContentModel::Mixed(vec![]).to_string(), "(#PCDATA)");
        assert_eq!(
            ContentModel::Mixed(vec!["b".into(), "i".into()]).to_string(),
            "(#PCDATA|b|i)*"
        );
        let spec = ContentSpec {
            kind: ContentSpecKind::Seq(vec![
                name("head", Occurrence::Once),
                ContentSpec {
                    kind: ContentSpecKind::Choice(vec![
                        name("p", Occurrence::Once),
                        name("div", Occurrence::Once),
                    ]),
                    occurrence: Occurrence::ZeroOrMore,
                },
                name("foot", Occurrence::Optional),
            ]),
            occurrence: Occurrence::Once,
        };
        assert_eq!(
            ContentModel::Children(spec).to_string(),
            "(head,(p|div)*,foot?)"
        );
    }

    #[test]
    fn test_external_id_display() {
        assert_eq!(ExternalId::system("a.dtd").to_string(), "SYSTEM \"a.dtd\"");
        let id = ExternalId {
            public_id: Some("-//X//EN".into()),
            system_id: None,
        };
        assert_eq!(id.to_string(), "PUBLIC \"-//X//EN\"");
        assert!(ExternalId::default().is_empty());
    }

    #[test]
    fn test_entity_decl_helpers() {
        let e = EntityDecl::internal("x", "A", SourceLocation::default());
        assert!(e.is_parsed());
        assert!(!e.is_external());
        assert_eq!(e.replacement_text(), Some("A"));
    }

    #[test]
    fn test_attribute_default_value() {
        assert_eq!(AttributeDefault::Fixed("1".into()).value(), Some("1"));
        assert_eq!(AttributeDefault::Implied.value(), None);
    }
}
