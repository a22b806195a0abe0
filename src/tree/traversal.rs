//! Cloning, import, normalization and lookups over the tree.

use super::{AttributeMap, Document, NodeId, NodeKind, NodeType};
use crate::error::DomError;

/// A node's payload detached from any arena: the kind with an empty
/// attribute map, plus the kinds of its attribute nodes.
struct Snapshot {
    kind: NodeKind,
    attributes: Vec<NodeKind>,
}

fn snapshot(doc: &Document, id: NodeId) -> Snapshot {
    let mut kind = doc.node(id).kind.clone();
    let mut attributes = Vec::new();
    match &mut kind {
        NodeKind::Element {
            attributes: map, ..
        } => {
            attributes = map
                .iter()
                .map(|attr| {
                    let mut attr_kind = doc.node(attr).kind.clone();
                    if let NodeKind::Attribute { owner, .. } = &mut attr_kind {
                        *owner = None;
                    }
                    attr_kind
                })
                .collect();
            *map = AttributeMap::default();
        }
        NodeKind::Attribute { owner, .. } => *owner = None,
        _ => {}
    }
    Snapshot { kind, attributes }
}

impl Document {
    /// Copies a node, and with `deep` its whole subtree, into a new
    /// unattached node. Attributes are always copied and the copies belong
    /// to the new element.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::NotSupported`] for the document node.
    pub fn clone_node(&mut self, id: NodeId, deep: bool) -> Result<NodeId, DomError> {
        if self.node_type(id) == NodeType::Document {
            return Err(DomError::NotSupported("cannot clone the document node".into()));
        }
        Ok(self.copy_from(None, id, deep))
    }

    /// Copies a node from another document into this one. The copy is
    /// unattached; insert it with [`append_child`](Self::append_child).
    ///
    /// # Errors
    ///
    /// Returns [`DomError::NotSupported`] for document and document type
    /// nodes.
    pub fn import_node(
        &mut self,
        source: &Document,
        id: NodeId,
        deep: bool,
    ) -> Result<NodeId, DomError> {
        match source.node_type(id) {
            kind @ (NodeType::Document | NodeType::DocumentType) => {
                Err(DomError::NotSupported(format!("cannot import a {kind} node")))
            }
            _ => Ok(self.copy_from(Some(source), id, deep)),
        }
    }

    /// Copies `id` out of `source`, or out of `self` when `source` is
    /// `None`.
    fn copy_from(&mut self, source: Option<&Document>, id: NodeId, deep: bool) -> NodeId {
        let (snap, children) = {
            let from: &Document = source.unwrap_or(&*self);
            let children: Vec<NodeId> = if deep {
                from.children(id).collect()
            } else {
                Vec::new()
            };
            (snapshot(from, id), children)
        };

        let copy = self.create_node(snap.kind);
        for attr_kind in snap.attributes {
            let attr = self.create_node(attr_kind);
            if let NodeKind::Attribute { owner, .. } = &mut self.node_mut(attr).kind {
                *owner = Some(copy);
            }
            if let NodeKind::Element { attributes, .. } = &mut self.node_mut(copy).kind {
                attributes.push(attr);
            }
        }
        for child in children {
            let child_copy = self.copy_from(source, child, true);
            self.link_before(copy, child_copy, None);
        }
        copy
    }

    /// Merges adjacent text nodes and drops empty ones throughout the
    /// subtree rooted at `id`.
    pub fn normalize(&mut self, id: NodeId) {
        let mut current = self.first_child(id);
        while let Some(node) = current {
            if self.node_type(node) != NodeType::Text {
                self.normalize(node);
                current = self.next_sibling(node);
                continue;
            }

            while let Some(next) = self.next_sibling(node) {
                let NodeKind::Text { content: extra } = &self.node(next).kind else {
                    break;
                };
                let extra = extra.clone();
                if let NodeKind::Text { content } = &mut self.node_mut(node).kind {
                    content.push_str(&extra);
                }
                self.detach_notify(next);
            }

            current = self.next_sibling(node);
            if self.node_value(node).is_some_and(str::is_empty) {
                self.detach_notify(node);
            }
        }
    }

    /// Returns the descendant elements of `root` named `name`, in document
    /// order. `"*"` matches every element.
    #[must_use]
    pub fn elements_by_tag_name(&self, root: NodeId, name: &str) -> Vec<NodeId> {
        self.descendants(root)
            .filter(|&id| match &self.node(id).kind {
                NodeKind::Element { name: el_name, .. } => name == "*" || el_name == name,
                _ => false,
            })
            .collect()
    }

    /// Returns the descendant elements of `root` with the given namespace
    /// and local name, in document order. Either may be `"*"`.
    #[must_use]
    pub fn elements_by_tag_name_ns(
        &self,
        root: NodeId,
        namespace: Option<&str>,
        local_name: &str,
    ) -> Vec<NodeId> {
        let namespace = namespace.filter(|ns| !ns.is_empty());
        self.descendants(root)
            .filter(|&id| match &self.node(id).kind {
                NodeKind::Element {
                    name,
                    namespace: el_ns,
                    local_name: el_local,
                    ..
                } => {
                    let ns_matches = namespace == Some("*") || el_ns.as_deref() == namespace;
                    let local = el_local.as_deref().unwrap_or(name);
                    ns_matches && (local_name == "*" || local == local_name)
                }
                _ => false,
            })
            .collect()
    }

    /// Returns `true` if `id` and `other_id` in `other` are structurally
    /// equal: same kind, names, values and attributes (in any order), and
    /// pairwise equal children.
    #[must_use]
    pub fn is_equal_node(&self, id: NodeId, other: &Document, other_id: NodeId) -> bool {
        if self.node_type(id) != other.node_type(other_id)
            || self.node_name(id) != other.node_name(other_id)
            || self.local_name(id) != other.local_name(other_id)
            || self.node_namespace(id) != other.node_namespace(other_id)
            || self.node_value(id) != other.node_value(other_id)
        {
            return false;
        }

        if let (NodeKind::DocumentType(a), NodeKind::DocumentType(b)) =
            (&self.node(id).kind, &other.node(other_id).kind)
        {
            if a.external_id != b.external_id || a.internal_subset != b.internal_subset {
                return false;
            }
        }

        if !self.attributes_equal(id, other, other_id) {
            return false;
        }

        let mut ours = self.children(id);
        let mut theirs = other.children(other_id);
        loop {
            match (ours.next(), theirs.next()) {
                (None, None) => return true,
                (Some(a), Some(b)) if self.is_equal_node(a, other, b) => {}
                _ => return false,
            }
        }
    }

    fn attributes_equal(&self, id: NodeId, other: &Document, other_id: NodeId) -> bool {
        let (Some(ours), Some(theirs)) = (self.attribute_map(id), other.attribute_map(other_id))
        else {
            return self.attribute_map(id).is_none() && other.attribute_map(other_id).is_none();
        };
        ours.len() == theirs.len()
            && ours.iter().all(|a| {
                theirs.iter().any(|b| {
                    self.node_name(a) == other.node_name(b)
                        && self.node_namespace(a) == other.node_namespace(b)
                        && self.node_value(a) == other.node_value(b)
                })
            })
    }
}
