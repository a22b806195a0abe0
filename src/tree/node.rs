//! Node type definitions.
//!
//! [`NodeKind`] is the closed set of node kinds in a document tree. Each
//! variant carries the kind-specific payload; navigation links live in
//! `NodeData`. [`NodeType`] is the payload-free tag used by the hierarchy
//! checks in [`NodeType::allows_child`].

use std::collections::HashMap;
use std::fmt;

use super::attributes::AttributeMap;
use super::NodeId;
use crate::dtd::{AttributeDecl, ElementDecl, EntityDecl, ExternalId, NotationDecl};

/// The kind of a node and its associated data.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// The document node. There is exactly one per `Document`.
    Document,

    /// An element, e.g. `<div class="x">`.
    Element {
        /// The qualified name as written (`svg:rect`).
        name: String,
        /// Namespace URI, set only by namespace-aware construction.
        namespace: Option<String>,
        /// Local part of the name, set only by namespace-aware construction.
        local_name: Option<String>,
        /// Attribute nodes in insertion order.
        attributes: AttributeMap,
    },

    /// An attribute. Attributes are not children of their element; they are
    /// reachable through the element's [`AttributeMap`].
    Attribute {
        /// The qualified name.
        name: String,
        /// The value, with references expanded.
        value: String,
        /// Namespace URI, set only by namespace-aware construction.
        namespace: Option<String>,
        /// Local part of the name, set only by namespace-aware construction.
        local_name: Option<String>,
        /// The element this attribute is attached to.
        owner: Option<NodeId>,
    },

    /// Character data.
    Text {
        /// The text, with references expanded.
        content: String,
    },

    /// A CDATA section, e.g. `<![CDATA[...]]>`.
    CData {
        /// The verbatim content.
        content: String,
    },

    /// A comment, e.g. `<!-- ... -->`.
    Comment {
        /// The comment text without delimiters.
        content: String,
    },

    /// A processing instruction, e.g. `<?target data?>`.
    ProcessingInstruction {
        /// The PI target.
        target: String,
        /// The PI data, if any.
        data: Option<String>,
    },

    /// A document type declaration with the declarations it collected.
    DocumentType(Box<DocumentType>),

    /// A lightweight container whose children are spliced into the target
    /// when it is inserted.
    DocumentFragment,

    /// An entity, built from its declaration.
    Entity(Box<EntityDecl>),

    /// An unexpanded entity reference.
    EntityRef {
        /// The entity name (without `&` and `;`).
        name: String,
    },
}

impl NodeKind {
    /// Returns the payload-free tag of this kind.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Document => NodeType::Document,
            Self::Element { .. } => NodeType::Element,
            Self::Attribute { .. } => NodeType::Attribute,
            Self::Text { .. } => NodeType::Text,
            Self::CData { .. } => NodeType::CData,
            Self::Comment { .. } => NodeType::Comment,
            Self::ProcessingInstruction { .. } => NodeType::ProcessingInstruction,
            Self::DocumentType(_) => NodeType::DocumentType,
            Self::DocumentFragment => NodeType::DocumentFragment,
            Self::Entity(_) => NodeType::Entity,
            Self::EntityRef { .. } => NodeType::EntityRef,
        }
    }
}

/// The tag of a [`NodeKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// See [`NodeKind::Document`].
    Document,
    /// See [`NodeKind::Element`].
    Element,
    /// See [`NodeKind::Attribute`].
    Attribute,
    /// See [`NodeKind::Text`].
    Text,
    /// See [`NodeKind::CData`].
    CData,
    /// See [`NodeKind::Comment`].
    Comment,
    /// See [`NodeKind::ProcessingInstruction`].
    ProcessingInstruction,
    /// See [`NodeKind::DocumentType`].
    DocumentType,
    /// See [`NodeKind::DocumentFragment`].
    DocumentFragment,
    /// See [`NodeKind::Entity`].
    Entity,
    /// See [`NodeKind::EntityRef`].
    EntityRef,
}

impl NodeType {
    /// Returns `true` if a node of this type may have a `child` child.
    ///
    /// Single-occurrence rules (one element and one document type under a
    /// document) are checked by the mutation operations, not here.
    #[must_use]
    pub fn allows_child(self, child: NodeType) -> bool {
        use NodeType as T;
        match self {
            T::Document => matches!(
                child,
                T::Element | T::DocumentType | T::Comment | T::ProcessingInstruction
            ),
            T::Element | T::DocumentFragment | T::Entity | T::EntityRef => matches!(
                child,
                T::Element
                    | T::Text
                    | T::Comment
                    | T::ProcessingInstruction
                    | T::CData
                    | T::EntityRef
            ),
            T::Attribute => matches!(child, T::Text | T::EntityRef),
            T::Text | T::CData | T::Comment | T::ProcessingInstruction | T::DocumentType => false,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Document => "document",
            Self::Element => "element",
            Self::Attribute => "attribute",
            Self::Text => "text",
            Self::CData => "CDATA section",
            Self::Comment => "comment",
            Self::ProcessingInstruction => "processing instruction",
            Self::DocumentType => "document type",
            Self::DocumentFragment => "document fragment",
            Self::Entity => "entity",
            Self::EntityRef => "entity reference",
        };
        f.write_str(label)
    }
}

/// A document type declaration and everything declared in its subsets.
///
/// See XML 1.0 §2.8: `[28]` doctypedecl.
#[derive(Debug, Clone, Default)]
pub struct DocumentType {
    /// The declared root element name.
    pub name: String,
    /// The external subset identifier, if any.
    pub external_id: ExternalId,
    /// The raw text of the internal subset, without brackets.
    pub internal_subset: Option<String>,
    /// General entities, internal subset first.
    pub entities: HashMap<String, EntityDecl>,
    /// Parameter entities.
    pub parameter_entities: HashMap<String, EntityDecl>,
    /// Element declarations.
    pub elements: HashMap<String, ElementDecl>,
    /// Attribute definitions, keyed by element name.
    pub attributes: HashMap<String, Vec<AttributeDecl>>,
    /// Notation declarations.
    pub notations: HashMap<String, NotationDecl>,
}

impl DocumentType {
    /// Creates a declaration with no identifiers or subsets.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns the attribute definitions declared for `element`.
    #[must_use]
    pub fn attribute_decls(&self, element: &str) -> &[AttributeDecl] {
        self.attributes.get(element).map_or(&[], Vec::as_slice)
    }
}
