//! Element attribute maps.
//!
//! Attributes are ordinary arena nodes of kind [`NodeKind::Attribute`]. An
//! element holds them in an [`AttributeMap`] in insertion order and each
//! attached attribute records its owner, so the same attribute node cannot
//! be attached to two elements at once.

use super::{validate_qualified_name, Document, NodeId, NodeKind};
use crate::error::DomError;

/// The ordered attribute nodes of one element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap {
    nodes: Vec<NodeId>,
}

impl AttributeMap {
    /// Returns the number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if there are no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over the attribute nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    /// Returns the attribute node at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.nodes.get(index).copied()
    }

    /// Returns `true` if `attr` is in this map.
    #[must_use]
    pub fn contains(&self, attr: NodeId) -> bool {
        self.nodes.contains(&attr)
    }

    pub(crate) fn push(&mut self, attr: NodeId) {
        self.nodes.push(attr);
    }

    fn position(&self, attr: NodeId) -> Option<usize> {
        self.nodes.iter().position(|&id| id == attr)
    }
}

impl Document {
    /// Creates an unattached attribute with an empty value.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::InvalidCharacter`] if `name` is not a valid name.
    pub fn create_attribute(&mut self, name: &str) -> Result<NodeId, DomError> {
        super::check_name(name)?;
        Ok(self.create_node(NodeKind::Attribute {
            name: name.to_string(),
            value: String::new(),
            namespace: None,
            local_name: None,
            owner: None,
        }))
    }

    /// Creates an unattached attribute in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::InvalidCharacter`] or [`DomError::Namespace`] for
    /// a bad qualified name.
    pub fn create_attribute_ns(
        &mut self,
        namespace: Option<&str>,
        qualified_name: &str,
    ) -> Result<NodeId, DomError> {
        let (namespace, local) = validate_qualified_name(namespace, qualified_name)?;
        Ok(self.create_node(NodeKind::Attribute {
            name: qualified_name.to_string(),
            value: String::new(),
            namespace,
            local_name: Some(local),
            owner: None,
        }))
    }

    /// Returns the attribute map of an element.
    #[must_use]
    pub fn attribute_map(&self, element: NodeId) -> Option<&AttributeMap> {
        match &self.node(element).kind {
            NodeKind::Element { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    fn attribute_map_mut(&mut self, element: NodeId) -> Result<&mut AttributeMap, DomError> {
        match &mut self.node_mut(element).kind {
            NodeKind::Element { attributes, .. } => Ok(attributes),
            other => Err(DomError::NotSupported(format!(
                "{} nodes have no attributes",
                other.node_type()
            ))),
        }
    }

    /// Iterates over an element's attributes as `(name, value)` pairs.
    pub fn attributes(&self, element: NodeId) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.attribute_map(element)
            .into_iter()
            .flat_map(AttributeMap::iter)
            .filter_map(|id| match &self.node(id).kind {
                NodeKind::Attribute { name, value, .. } => Some((name.as_str(), value.as_str())),
                _ => None,
            })
    }

    /// Returns the attribute node named `name`.
    #[must_use]
    pub fn attribute_node(&self, element: NodeId, name: &str) -> Option<NodeId> {
        self.attribute_map(element)?
            .iter()
            .find(|&id| self.node_name(id) == Some(name))
    }

    /// Returns the attribute node with the given namespace and local name.
    #[must_use]
    pub fn attribute_node_ns(
        &self,
        element: NodeId,
        namespace: Option<&str>,
        local_name: &str,
    ) -> Option<NodeId> {
        self.attribute_map(element)?
            .iter()
            .find(|&id| self.matches_ns(id, namespace, local_name))
    }

    fn matches_ns(&self, attr: NodeId, namespace: Option<&str>, local: &str) -> bool {
        match &self.node(attr).kind {
            NodeKind::Attribute {
                name,
                namespace: ns,
                local_name,
                ..
            } => {
                ns.as_deref() == namespace.filter(|n| !n.is_empty())
                    && local_name.as_deref().unwrap_or(name) == local
            }
            _ => false,
        }
    }

    /// Returns the value of the attribute named `name`.
    #[must_use]
    pub fn attribute(&self, element: NodeId, name: &str) -> Option<&str> {
        self.attribute_node(element, name)
            .and_then(|id| self.node_value(id))
    }

    /// Returns the value of the attribute with the given namespace and
    /// local name.
    #[must_use]
    pub fn attribute_ns(
        &self,
        element: NodeId,
        namespace: Option<&str>,
        local_name: &str,
    ) -> Option<&str> {
        self.attribute_node_ns(element, namespace, local_name)
            .and_then(|id| self.node_value(id))
    }

    /// Returns the element an attribute is attached to.
    #[must_use]
    pub fn owner_element(&self, attr: NodeId) -> Option<NodeId> {
        match &self.node(attr).kind {
            NodeKind::Attribute { owner, .. } => *owner,
            _ => None,
        }
    }

    /// Sets an attribute value, creating the attribute if needed.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::NotSupported`] if `element` is not an element and
    /// [`DomError::InvalidCharacter`] for an invalid name.
    pub fn set_attribute(
        &mut self,
        element: NodeId,
        name: &str,
        value: &str,
    ) -> Result<(), DomError> {
        self.attribute_map_mut(element)?;
        if let Some(existing) = self.attribute_node(element, name) {
            return self.set_node_value(existing, value);
        }
        let attr = self.create_attribute(name)?;
        self.set_node_value(attr, value)?;
        self.set_attribute_node(element, attr)?;
        Ok(())
    }

    /// Attaches an attribute node, replacing any attribute of the same name
    /// in place. Returns the replaced node.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::InUseAttribute`] if `attr` belongs to another
    /// element and [`DomError::NotSupported`] if `element` is not an element
    /// or `attr` is not an attribute.
    pub fn set_attribute_node(
        &mut self,
        element: NodeId,
        attr: NodeId,
    ) -> Result<Option<NodeId>, DomError> {
        let name = self.check_attachable(element, attr)?;
        let existing = self.attribute_node(element, &name);
        self.attach_attribute(element, attr, existing)
    }

    /// Namespace-aware variant of
    /// [`set_attribute_node`](Self::set_attribute_node): the attribute
    /// replaced is the one with the same namespace and local name.
    ///
    /// # Errors
    ///
    /// Same as [`set_attribute_node`](Self::set_attribute_node).
    pub fn set_attribute_node_ns(
        &mut self,
        element: NodeId,
        attr: NodeId,
    ) -> Result<Option<NodeId>, DomError> {
        let name = self.check_attachable(element, attr)?;
        let namespace = self.node_namespace(attr).map(str::to_string);
        let local = self.local_name(attr).map_or(name, str::to_string);
        let existing = self.attribute_node_ns(element, namespace.as_deref(), &local);
        self.attach_attribute(element, attr, existing)
    }

    fn check_attachable(&self, element: NodeId, attr: NodeId) -> Result<String, DomError> {
        if self.attribute_map(element).is_none() {
            return Err(DomError::NotSupported(format!(
                "{} nodes have no attributes",
                self.node_type(element)
            )));
        }
        match &self.node(attr).kind {
            NodeKind::Attribute { name, owner, .. } => match owner {
                Some(owner) if *owner != element => Err(DomError::InUseAttribute(name.clone())),
                _ => Ok(name.clone()),
            },
            other => Err(DomError::NotSupported(format!(
                "cannot attach a {} node as an attribute",
                other.node_type()
            ))),
        }
    }

    fn attach_attribute(
        &mut self,
        element: NodeId,
        attr: NodeId,
        existing: Option<NodeId>,
    ) -> Result<Option<NodeId>, DomError> {
        if existing == Some(attr) {
            return Ok(None);
        }
        let map = self.attribute_map_mut(element)?;
        match existing.and_then(|old| map.position(old)) {
            Some(index) => map.nodes[index] = attr,
            None => map.nodes.push(attr),
        }
        self.set_owner(attr, Some(element));
        if let Some(old) = existing {
            self.set_owner(old, None);
        }
        Ok(existing)
    }

    fn set_owner(&mut self, attr: NodeId, element: Option<NodeId>) {
        if let NodeKind::Attribute { owner, .. } = &mut self.node_mut(attr).kind {
            *owner = element;
        }
    }

    /// Removes the attribute named `name`, returning its detached node.
    pub fn remove_attribute(&mut self, element: NodeId, name: &str) -> Option<NodeId> {
        let attr = self.attribute_node(element, name)?;
        self.remove_attribute_node(element, attr).ok()
    }

    /// Removes the attribute with the given namespace and local name.
    pub fn remove_attribute_ns(
        &mut self,
        element: NodeId,
        namespace: Option<&str>,
        local_name: &str,
    ) -> Option<NodeId> {
        let attr = self.attribute_node_ns(element, namespace, local_name)?;
        self.remove_attribute_node(element, attr).ok()
    }

    /// Detaches `attr` from `element`.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::NotFound`] if `attr` is not attached to `element`
    /// and [`DomError::NotSupported`] if `element` is not an element.
    pub fn remove_attribute_node(
        &mut self,
        element: NodeId,
        attr: NodeId,
    ) -> Result<NodeId, DomError> {
        let label = self.node_name(attr).unwrap_or("?").to_string();
        let map = self.attribute_map_mut(element)?;
        let index = map
            .position(attr)
            .ok_or_else(|| DomError::NotFound(format!("attribute '{label}'")))?;
        map.nodes.remove(index);
        self.set_owner(attr, None);
        Ok(attr)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc_with_element() -> (Document, NodeId) {
        let mut doc = Document::new();
        let el = doc.create_element("e").unwrap();
        (doc, el)
    }

    #[test]
    fn test_set_and_get_attribute() {
        let (mut doc, el) = doc_with_element();
        doc.set_attribute(el, "a", "1").unwrap();
        doc.set_attribute(el, "b", "2").unwrap();
        doc.set_attribute(el, "a", "3").unwrap();
        assert_eq!(doc.attribute(el, "a"), Some("3"));
        let pairs: Vec<_> = doc.attributes(el).collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_set_attribute_node_replaces_in_place() {
        let (mut doc, el) = doc_with_element();
        doc.set_attribute(el, "a", "1").unwrap();
        doc.set_attribute(el, "b", "2").unwrap();
        let old = doc.attribute_node(el, "a").unwrap();

        let attr = doc.create_attribute("a").unwrap();
        doc.set_node_value(attr, "new").unwrap();
        let replaced = doc.set_attribute_node(el, attr).unwrap();

        assert_eq!(replaced, Some(old));
        assert_eq!(doc.owner_element(old), None);
        assert_eq!(doc.owner_element(attr), Some(el));
        let pairs: Vec<_> = doc.attributes(el).collect();
        assert_eq!(pairs, vec![("a", "new"), ("b", "2")]);
    }

    #[test]
    fn test_attribute_in_use_elsewhere() {
        let (mut doc, el) = doc_with_element();
        let other = doc.create_element("f").unwrap();
        let attr = doc.create_attribute("a").unwrap();
        doc.set_attribute_node(el, attr).unwrap();
        assert_eq!(
            doc.set_attribute_node(other, attr),
            Err(DomError::InUseAttribute("a".into()))
        );
        // Re-attaching to the same owner is a no-op.
        assert_eq!(doc.set_attribute_node(el, attr), Ok(None));
    }

    #[test]
    fn test_attributes_on_non_element() {
        let mut doc = Document::new();
        let text = doc.create_text_node("t");
        assert!(matches!(
            doc.set_attribute(text, "a", "1"),
            Err(DomError::NotSupported(_))
        ));
        assert_eq!(doc.attributes(text).count(), 0);
    }

    #[test]
    fn test_namespaced_attributes() {
        let (mut doc, el) = doc_with_element();
        let xlink = "http://www.w3.org/1999/xlink";
        let a = doc.create_attribute_ns(Some(xlink), "xlink:href").unwrap();
        doc.set_node_value(a, "#x").unwrap();
        doc.set_attribute_node_ns(el, a).unwrap();

        assert_eq!(doc.attribute_ns(el, Some(xlink), "href"), Some("#x"));
        assert_eq!(doc.attribute_ns(el, None, "href"), None);
        assert_eq!(doc.attribute(el, "xlink:href"), Some("#x"));

        let b = doc.create_attribute_ns(Some(xlink), "xl:href").unwrap();
        let replaced = doc.set_attribute_node_ns(el, b).unwrap();
        assert_eq!(replaced, Some(a));
        assert_eq!(doc.attribute_map(el).unwrap().len(), 1);

        assert_eq!(doc.remove_attribute_ns(el, Some(xlink), "href"), Some(b));
        assert!(doc.attribute_map(el).unwrap().is_empty());
    }

    #[test]
    fn test_remove_attribute_node_not_found() {
        let (mut doc, el) = doc_with_element();
        let attr = doc.create_attribute("a").unwrap();
        assert!(matches!(
            doc.remove_attribute_node(el, attr),
            Err(DomError::NotFound(_))
        ));
        doc.set_attribute_node(el, attr).unwrap();
        assert_eq!(doc.remove_attribute(el, "a"), Some(attr));
        assert_eq!(doc.owner_element(attr), None);
        assert_eq!(doc.remove_attribute(el, "a"), None);
    }
}
