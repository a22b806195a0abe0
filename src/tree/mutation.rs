//! Hierarchy-checked tree mutation.
//!
//! Every public operation validates the request before touching any link:
//! the parent must admit the child's kind ([`NodeType::allows_child`]), a
//! node may not be inserted under itself or one of its descendants, and a
//! document keeps at most one element and one document type. Inserting a
//! document fragment moves the fragment's children instead of the fragment.
//!
//! A [`MutationObserver`] installed with [`Document::set_observer`] is told
//! about every insertion and removal that goes through these operations.

use super::{Document, NodeId, NodeType};
use crate::error::DomError;

/// Receives structural change notifications.
///
/// Both methods default to doing nothing, so an observer only implements
/// what it cares about.
pub trait MutationObserver: Send {
    /// `child` was linked under `parent`. `doc` already reflects the
    /// change.
    fn node_inserted(&mut self, doc: &Document, parent: NodeId, child: NodeId) {
        let _ = (doc, parent, child);
    }

    /// `child` was unlinked from `parent`.
    fn node_removed(&mut self, doc: &Document, parent: NodeId, child: NodeId) {
        let _ = (doc, parent, child);
    }
}

impl Document {
    /// Installs a mutation observer, returning the previous one.
    pub fn set_observer(
        &mut self,
        observer: Box<dyn MutationObserver>,
    ) -> Option<Box<dyn MutationObserver>> {
        self.observer.replace(observer)
    }

    /// Removes and returns the mutation observer.
    pub fn take_observer(&mut self) -> Option<Box<dyn MutationObserver>> {
        self.observer.take()
    }

    /// Appends `child` as the last child of `parent`, detaching it from its
    /// current parent first. Returns the inserted node.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::HierarchyRequest`] if the insertion would break
    /// the node hierarchy.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<NodeId, DomError> {
        self.insert_before(parent, child, None)
    }

    /// Inserts `new_child` before `reference` under `parent`, or at the end
    /// when `reference` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::NotFound`] if `reference` is not a child of
    /// `parent` and [`DomError::HierarchyRequest`] if the insertion would
    /// break the node hierarchy.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        new_child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<NodeId, DomError> {
        if let Some(reference) = reference {
            if self.parent(reference) != Some(parent) {
                return Err(DomError::NotFound(
                    "reference node is not a child of the parent".into(),
                ));
            }
        }
        self.check_insertion(parent, new_child, None)?;

        // Inserting a node before itself leaves it where it is.
        if reference == Some(new_child) {
            return Ok(new_child);
        }

        for node in self.insertion_nodes(new_child) {
            self.detach_notify(node);
            self.link_before(parent, node, reference);
            self.notify_inserted(parent, node);
        }
        Ok(new_child)
    }

    /// Replaces `old_child` of `parent` with `new_child` and returns
    /// `old_child`, now detached.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::NotFound`] if `old_child` is not a child of
    /// `parent` and [`DomError::HierarchyRequest`] if the replacement would
    /// break the node hierarchy.
    pub fn replace_child(
        &mut self,
        parent: NodeId,
        new_child: NodeId,
        old_child: NodeId,
    ) -> Result<NodeId, DomError> {
        if self.parent(old_child) != Some(parent) {
            return Err(DomError::NotFound(
                "node to replace is not a child of the parent".into(),
            ));
        }
        if self.node_type(parent) == NodeType::Document {
            let old_is_element = self.node_type(old_child) == NodeType::Element;
            let new_is_element = self.node_type(new_child) == NodeType::Element;
            if old_is_element != new_is_element {
                return Err(DomError::HierarchyRequest(
                    "the document element can only be replaced by an element".into(),
                ));
            }
        }
        self.check_insertion(parent, new_child, Some(old_child))?;
        if new_child == old_child {
            return Ok(old_child);
        }

        let mut reference = self.next_sibling(old_child);
        if reference == Some(new_child) {
            reference = self.next_sibling(new_child);
        }
        self.detach_notify(old_child);
        for node in self.insertion_nodes(new_child) {
            self.detach_notify(node);
            self.link_before(parent, node, reference);
            self.notify_inserted(parent, node);
        }
        Ok(old_child)
    }

    /// Removes `child` from `parent` and returns it. The node stays in the
    /// arena and can be reinserted.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::NotFound`] if `child` is not a child of `parent`
    /// and [`DomError::HierarchyRequest`] for the document element.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<NodeId, DomError> {
        if self.parent(child) != Some(parent) {
            return Err(DomError::NotFound("node is not a child of the parent".into()));
        }
        if self.node_type(parent) == NodeType::Document
            && self.node_type(child) == NodeType::Element
        {
            return Err(DomError::HierarchyRequest(
                "the document element cannot be removed".into(),
            ));
        }
        self.detach_notify(child);
        Ok(child)
    }

    /// Validates that `new_child` may become a child of `parent`. When
    /// `replacing` is set, that child is not counted against the
    /// single-occurrence limits.
    fn check_insertion(
        &self,
        parent: NodeId,
        new_child: NodeId,
        replacing: Option<NodeId>,
    ) -> Result<(), DomError> {
        if self.ancestors(parent).any(|id| id == new_child) {
            return Err(DomError::HierarchyRequest(
                "a node cannot be inserted under itself or one of its descendants".into(),
            ));
        }

        let parent_type = self.node_type(parent);
        let candidates = self.insertion_nodes(new_child);
        for &node in &candidates {
            let child_type = self.node_type(node);
            if !parent_type.allows_child(child_type) {
                return Err(DomError::HierarchyRequest(format!(
                    "a {parent_type} node cannot contain a {child_type} node"
                )));
            }
        }

        if parent_type == NodeType::Document {
            for kind in [NodeType::Element, NodeType::DocumentType] {
                let incoming = candidates
                    .iter()
                    .filter(|&&id| self.node_type(id) == kind)
                    .count();
                if incoming == 0 {
                    continue;
                }
                let existing = self
                    .children(parent)
                    .filter(|&id| {
                        self.node_type(id) == kind && Some(id) != replacing && id != new_child
                    })
                    .count();
                if existing + incoming > 1 {
                    return Err(DomError::HierarchyRequest(format!(
                        "a document cannot have more than one {kind} child"
                    )));
                }
            }
        }
        Ok(())
    }

    /// The nodes actually linked when `node` is inserted: the children of a
    /// fragment, or the node itself.
    fn insertion_nodes(&self, node: NodeId) -> Vec<NodeId> {
        if self.node_type(node) == NodeType::DocumentFragment {
            self.children(node).collect()
        } else {
            vec![node]
        }
    }

    pub(super) fn detach_notify(&mut self, id: NodeId) {
        if let Some(parent) = self.parent(id) {
            self.detach(id);
            if let Some(mut observer) = self.observer.take() {
                observer.node_removed(self, parent, id);
                self.observer = Some(observer);
            }
        }
    }

    fn notify_inserted(&mut self, parent: NodeId, child: NodeId) {
        if let Some(mut observer) = self.observer.take() {
            observer.node_inserted(self, parent, child);
            self.observer = Some(observer);
        }
    }

    /// Unlinks a node from its parent without any checks.
    pub(crate) fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.node(id).parent else {
            return;
        };

        let prev = self.node(id).prev_sibling;
        let next = self.node(id).next_sibling;

        match prev {
            Some(p) => self.node_mut(p).next_sibling = next,
            None => self.node_mut(parent).first_child = next,
        }

        match next {
            Some(n) => self.node_mut(n).prev_sibling = prev,
            None => self.node_mut(parent).last_child = prev,
        }

        let node = self.node_mut(id);
        node.parent = None;
        node.prev_sibling = None;
        node.next_sibling = None;
    }

    /// Links an unattached node under `parent` before `reference` (or at
    /// the end) without any checks. The parser builds trees through this.
    pub(crate) fn link_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        self.node_mut(child).parent = Some(parent);

        let prev = match reference {
            Some(r) => self.node(r).prev_sibling,
            None => self.node(parent).last_child,
        };
        match prev {
            Some(p) => self.node_mut(p).next_sibling = Some(child),
            None => self.node_mut(parent).first_child = Some(child),
        }
        match reference {
            Some(r) => self.node_mut(r).prev_sibling = Some(child),
            None => self.node_mut(parent).last_child = Some(child),
        }
        self.node_mut(child).prev_sibling = prev;
        self.node_mut(child).next_sibling = reference;
    }
}
