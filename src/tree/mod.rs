//! Arena-based XML document tree.
//!
//! All nodes live in a contiguous `Vec<NodeData>` owned by the `Document`
//! and are referenced by `NodeId`, a newtype over `NonZeroU32`. Parent,
//! child and sibling links are arena indices, so the tree has no reference
//! cycles and dropping the `Document` frees everything at once.
//!
//! Structural changes go through the hierarchy-checked operations in
//! [`mutation`]: `append_child`, `insert_before`, `replace_child` and
//! `remove_child`. Attribute collections, cloning, import and lookups are
//! in [`attributes`] and [`traversal`].

pub mod attributes;
pub mod mutation;
mod node;
pub mod traversal;

pub use attributes::AttributeMap;
pub use mutation::MutationObserver;
pub use node::{DocumentType, NodeKind, NodeType};

use std::fmt;
use std::num::NonZeroU32;

use crate::dtd::{EntityDecl, ExternalId};
use crate::error::{DomError, ParseDiagnostic, ParseError};
use crate::parser::input::is_valid_name;

/// A typed index into the document's node arena.
///
/// `Option<NodeId>` has the same size as `NodeId` (niche optimization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeId(NonZeroU32);

impl NodeId {
    /// Creates a `NodeId` from an arena index. Index 0 is the unused
    /// placeholder slot, so indices start at 1.
    #[allow(clippy::cast_possible_truncation)]
    fn from_index(index: usize) -> Self {
        Self(NonZeroU32::MIN.saturating_add((index as u32).saturating_sub(1)))
    }

    fn as_index(self) -> usize {
        self.0.get() as usize
    }
}

/// Storage for a single node in the document arena.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// What kind of node this is and its payload.
    pub kind: NodeKind,
    /// Parent node, if attached.
    pub parent: Option<NodeId>,
    /// First child node.
    pub first_child: Option<NodeId>,
    /// Last child node (for O(1) append).
    pub last_child: Option<NodeId>,
    /// Next sibling.
    pub next_sibling: Option<NodeId>,
    /// Previous sibling.
    pub prev_sibling: Option<NodeId>,
}

impl NodeData {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            first_child: None,
            last_child: None,
            next_sibling: None,
            prev_sibling: None,
        }
    }
}

/// A style sheet associated with the document through an
/// `<?xml-stylesheet ...?>` processing instruction in the prolog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSheet {
    /// The `href` pseudo-attribute.
    pub href: String,
    /// The `type` pseudo-attribute, e.g. `text/xsl`.
    pub media_type: Option<String>,
    /// The `title` pseudo-attribute.
    pub title: Option<String>,
    /// The `media` pseudo-attribute.
    pub media: Option<String>,
    /// The `charset` pseudo-attribute.
    pub charset: Option<String>,
    /// `alternate="yes"`.
    pub alternate: bool,
    /// The processing instruction that declared it.
    pub node: NodeId,
}

/// An XML document.
///
/// The `Document` owns all nodes in an arena. Navigation goes through
/// `&Document`, mutation through `&mut Document`.
///
/// # Examples
///
/// ```
/// use tidyxml::Document;
///
/// let doc = Document::parse_str("<root><child>Hello</child></root>").unwrap();
/// let root = doc.root_element().unwrap();
/// assert_eq!(doc.node_name(root), Some("root"));
/// assert_eq!(doc.text_content(root), "Hello");
/// ```
pub struct Document {
    /// The node arena. Index 0 is unused (placeholder for `NonZeroU32`).
    nodes: Vec<NodeData>,
    /// The Document node (not the root element).
    root: NodeId,
    /// XML version from the XML declaration (e.g. "1.0").
    pub version: Option<String>,
    /// Encoding from the XML declaration, or the detected encoding when the
    /// document was parsed from bytes without declaring one.
    pub encoding: Option<String>,
    /// The encoding the input bytes were actually decoded with. `None` for
    /// documents parsed from a string.
    pub input_encoding: Option<String>,
    /// Standalone flag from the XML declaration.
    pub standalone: Option<bool>,
    /// Style sheets declared in the prolog, in document order.
    pub style_sheets: Vec<StyleSheet>,
    /// Diagnostics collected during parsing (warnings and tidy repairs).
    pub diagnostics: Vec<ParseDiagnostic>,
    observer: Option<Box<dyn MutationObserver>>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.nodes.len().saturating_sub(1))
            .field("version", &self.version)
            .field("encoding", &self.encoding)
            .field("input_encoding", &self.input_encoding)
            .field("standalone", &self.standalone)
            .field("style_sheets", &self.style_sheets)
            .field("diagnostics", &self.diagnostics.len())
            .field("observer", &self.observer.as_ref().map(|_| "..."))
            .finish()
    }
}

impl Document {
    /// Creates a new empty document containing only the Document node.
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = Vec::with_capacity(64);
        nodes.push(NodeData::new(NodeKind::Document));
        nodes.push(NodeData::new(NodeKind::Document));
        Self {
            nodes,
            root: NodeId::from_index(1),
            version: None,
            encoding: None,
            input_encoding: None,
            standalone: None,
            style_sheets: Vec::new(),
            diagnostics: Vec::new(),
            observer: None,
        }
    }

    /// Parses an XML string with default options.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the input is not well-formed XML.
    pub fn parse_str(input: &str) -> Result<Self, ParseError> {
        crate::parser::parse_str(input)
    }

    /// Parses raw bytes, detecting the encoding first.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the bytes cannot be decoded or the document
    /// is not well-formed.
    ///
    /// # Examples
    ///
    /// ```
    /// use tidyxml::Document;
    ///
    /// let doc = Document::parse_bytes(b"\xEF\xBB\xBF<root/>").unwrap();
    /// assert_eq!(doc.encoding.as_deref(), Some("UTF-8"));
    /// ```
    pub fn parse_bytes(input: &[u8]) -> Result<Self, ParseError> {
        crate::parser::parse_bytes(input)
    }

    /// Returns the Document node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Returns the document element, if there is one.
    #[must_use]
    pub fn root_element(&self) -> Option<NodeId> {
        self.children(self.root)
            .find(|&id| matches!(self.node(id).kind, NodeKind::Element { .. }))
    }

    /// Returns the Document-Type child, if there is one.
    #[must_use]
    pub fn doctype(&self) -> Option<NodeId> {
        self.children(self.root)
            .find(|&id| matches!(self.node(id).kind, NodeKind::DocumentType(_)))
    }

    /// Returns the document type declaration, if there is one.
    #[must_use]
    pub fn document_type(&self) -> Option<&DocumentType> {
        self.doctype().and_then(|id| match &self.node(id).kind {
            NodeKind::DocumentType(dt) => Some(dt.as_ref()),
            _ => None,
        })
    }

    /// Returns the `NodeData` for the given node.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this document.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.as_index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.as_index()]
    }

    /// Returns the node's type tag.
    #[must_use]
    pub fn node_type(&self, id: NodeId) -> NodeType {
        self.node(id).kind.node_type()
    }

    /// Returns the name of a node, if it has one.
    ///
    /// Elements and attributes return their qualified name, PIs their
    /// target, document types, entities and entity references their name.
    #[must_use]
    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { name, .. }
            | NodeKind::Attribute { name, .. }
            | NodeKind::EntityRef { name }
            | NodeKind::ProcessingInstruction { target: name, .. } => Some(name),
            NodeKind::DocumentType(dt) => Some(&dt.name),
            NodeKind::Entity(decl) => Some(&decl.name),
            _ => None,
        }
    }

    /// Returns the namespace URI of an element or attribute, if any.
    #[must_use]
    pub fn node_namespace(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { namespace, .. } | NodeKind::Attribute { namespace, .. } => {
                namespace.as_deref()
            }
            _ => None,
        }
    }

    /// Returns the local name of a node created namespace-aware.
    #[must_use]
    pub fn local_name(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { local_name, .. } | NodeKind::Attribute { local_name, .. } => {
                local_name.as_deref()
            }
            _ => None,
        }
    }

    /// Returns the value of a text, CDATA, comment, PI or attribute node.
    #[must_use]
    pub fn node_value(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Text { content }
            | NodeKind::Comment { content }
            | NodeKind::CData { content }
            | NodeKind::Attribute { value: content, .. } => Some(content),
            NodeKind::ProcessingInstruction { data, .. } => data.as_deref(),
            _ => None,
        }
    }

    /// Replaces the value of a text, CDATA, comment, PI or attribute node.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::NotSupported`] for other node kinds.
    pub fn set_node_value(&mut self, id: NodeId, new_value: &str) -> Result<(), DomError> {
        match &mut self.node_mut(id).kind {
            NodeKind::Text { content }
            | NodeKind::Comment { content }
            | NodeKind::CData { content }
            | NodeKind::Attribute { value: content, .. } => {
                new_value.clone_into(content);
                Ok(())
            }
            NodeKind::ProcessingInstruction { data, .. } => {
                *data = Some(new_value.to_string());
                Ok(())
            }
            other => Err(DomError::NotSupported(format!(
                "{} nodes have no value",
                other.node_type()
            ))),
        }
    }

    /// Returns the concatenated text of a node and its descendants.
    ///
    /// Comments and PIs contribute only when asked for directly.
    #[must_use]
    pub fn text_content(&self, id: NodeId) -> String {
        match &self.node(id).kind {
            NodeKind::Comment { content } | NodeKind::Attribute { value: content, .. } => {
                content.clone()
            }
            NodeKind::ProcessingInstruction { data, .. } => data.clone().unwrap_or_default(),
            _ => {
                let mut result = String::new();
                self.collect_text(id, &mut result);
                result
            }
        }
    }

    fn collect_text(&self, id: NodeId, buf: &mut String) {
        match &self.node(id).kind {
            NodeKind::Text { content } | NodeKind::CData { content } => buf.push_str(content),
            NodeKind::Comment { .. } | NodeKind::ProcessingInstruction { .. } => {}
            _ => {
                for child in self.children(id) {
                    self.collect_text(child, buf);
                }
            }
        }
    }

    // --- Navigation ---

    /// Returns the parent of a node.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Returns the first child of a node.
    #[must_use]
    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).first_child
    }

    /// Returns the last child of a node.
    #[must_use]
    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).last_child
    }

    /// Returns the next sibling of a node.
    #[must_use]
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next_sibling
    }

    /// Returns the previous sibling of a node.
    #[must_use]
    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).prev_sibling
    }

    /// Returns an iterator over the children of a node.
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            doc: self,
            next: self.node(id).first_child,
        }
    }

    /// Returns an iterator over a node and its ancestors.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            doc: self,
            next: Some(id),
        }
    }

    /// Returns an iterator over all descendants of a node in document
    /// (preorder) order, excluding the node itself.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            doc: self,
            root: id,
            next: self.first_child(id),
        }
    }

    // --- Creation ---

    /// Allocates a new, unattached node in the arena.
    pub fn create_node(&mut self, kind: NodeKind) -> NodeId {
        let index = self.nodes.len();
        self.nodes.push(NodeData::new(kind));
        NodeId::from_index(index)
    }

    /// Creates an element without namespace information.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::InvalidCharacter`] if `name` is not a valid XML
    /// name.
    pub fn create_element(&mut self, name: &str) -> Result<NodeId, DomError> {
        check_name(name)?;
        Ok(self.create_node(NodeKind::Element {
            name: name.to_string(),
            namespace: None,
            local_name: None,
            attributes: AttributeMap::default(),
        }))
    }

    /// Creates an element in `namespace` with a possibly prefixed
    /// `qualified_name`.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::InvalidCharacter`] for an invalid name and
    /// [`DomError::Namespace`] for a malformed qualified name or a prefix
    /// without a namespace.
    pub fn create_element_ns(
        &mut self,
        namespace: Option<&str>,
        qualified_name: &str,
    ) -> Result<NodeId, DomError> {
        let (namespace, local) = validate_qualified_name(namespace, qualified_name)?;
        Ok(self.create_node(NodeKind::Element {
            name: qualified_name.to_string(),
            namespace,
            local_name: Some(local),
            attributes: AttributeMap::default(),
        }))
    }

    /// Creates a text node.
    pub fn create_text_node(&mut self, content: &str) -> NodeId {
        self.create_node(NodeKind::Text {
            content: content.to_string(),
        })
    }

    /// Creates a comment node.
    pub fn create_comment(&mut self, content: &str) -> NodeId {
        self.create_node(NodeKind::Comment {
            content: content.to_string(),
        })
    }

    /// Creates a CDATA section.
    pub fn create_cdata_section(&mut self, content: &str) -> NodeId {
        self.create_node(NodeKind::CData {
            content: content.to_string(),
        })
    }

    /// Creates a processing instruction.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::InvalidCharacter`] if `target` is not a valid
    /// name.
    pub fn create_processing_instruction(
        &mut self,
        target: &str,
        data: Option<&str>,
    ) -> Result<NodeId, DomError> {
        check_name(target)?;
        Ok(self.create_node(NodeKind::ProcessingInstruction {
            target: target.to_string(),
            data: data.map(str::to_string),
        }))
    }

    /// Creates an empty document fragment.
    pub fn create_document_fragment(&mut self) -> NodeId {
        self.create_node(NodeKind::DocumentFragment)
    }

    /// Creates an unexpanded entity reference.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::InvalidCharacter`] if `name` is not a valid name.
    pub fn create_entity_reference(&mut self, name: &str) -> Result<NodeId, DomError> {
        check_name(name)?;
        Ok(self.create_node(NodeKind::EntityRef {
            name: name.to_string(),
        }))
    }

    /// Creates a document type node with no subsets.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::InvalidCharacter`] if `name` is not a valid name.
    pub fn create_document_type(
        &mut self,
        name: &str,
        external_id: ExternalId,
    ) -> Result<NodeId, DomError> {
        check_name(name)?;
        let mut dt = DocumentType::new(name);
        dt.external_id = external_id;
        Ok(self.create_node(NodeKind::DocumentType(Box::new(dt))))
    }

    /// Creates an entity node from its declaration.
    pub fn create_entity(&mut self, decl: EntityDecl) -> NodeId {
        self.create_node(NodeKind::Entity(Box::new(decl)))
    }

    /// Returns the total number of nodes in the arena, attached or not.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len() - 1
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

fn check_name(name: &str) -> Result<(), DomError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(DomError::InvalidCharacter(name.to_string()))
    }
}

/// Validates a qualified name against its namespace and returns the
/// normalized namespace and the local name.
pub(crate) fn validate_qualified_name(
    namespace: Option<&str>,
    qualified_name: &str,
) -> Result<(Option<String>, String), DomError> {
    check_name(qualified_name)?;
    let namespace = namespace.filter(|ns| !ns.is_empty());
    let (prefix, local) = match qualified_name.split_once(':') {
        Some((prefix, local)) => {
            if prefix.is_empty() || local.is_empty() || local.contains(':') {
                return Err(DomError::Namespace(format!(
                    "malformed qualified name '{qualified_name}'"
                )));
            }
            (Some(prefix), local)
        }
        None => (None, qualified_name),
    };
    if prefix.is_some() && namespace.is_none() {
        return Err(DomError::Namespace(format!(
            "prefixed name '{qualified_name}' requires a namespace"
        )));
    }
    Ok((namespace.map(str::to_string), local.to_string()))
}

// --- Iterators ---

/// Iterator over the children of a node.
pub struct Children<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.doc.node(current).next_sibling;
        Some(current)
    }
}

/// Iterator over a node and its ancestors.
pub struct Ancestors<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.doc.node(current).parent;
        Some(current)
    }
}

/// Preorder iterator over the descendants of a node.
pub struct Descendants<'a> {
    doc: &'a Document,
    root: NodeId,
    next: Option<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;

        if let Some(child) = self.doc.first_child(current) {
            self.next = Some(child);
            return Some(current);
        }
        if let Some(sibling) = self.doc.next_sibling(current) {
            self.next = Some(sibling);
            return Some(current);
        }

        let mut ancestor = self.doc.parent(current);
        while let Some(anc) = ancestor {
            if anc == self.root {
                break;
            }
            if let Some(sibling) = self.doc.next_sibling(anc) {
                self.next = Some(sibling);
                return Some(current);
            }
            ancestor = self.doc.parent(anc);
        }

        self.next = None;
        Some(current)
    }
}
