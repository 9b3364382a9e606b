//! Arena-backed DOM tree.
//!
//! Nodes are only ever appended after their parent, so a node's index is
//! always greater than its parent's and arena order is document order.

use serde::{Deserialize, Serialize};

/// Tags whose content never reaches the condensed output.
pub(crate) const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "meta", "link", "base",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementData {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
}

impl ElementData {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|(key, _)| key == name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_whitespace()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeData {
    Document,
    Element(ElementData),
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomNode {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub data: NodeData,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomTree {
    nodes: Vec<DomNode>,
}

impl Default for DomTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DomTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![DomNode {
                parent: None,
                children: Vec::new(),
                data: NodeData::Document,
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn node(&self, id: NodeId) -> &DomNode {
        &self.nodes[id.0]
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.nodes.get(id.0)?.data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|element| element.tag.as_str())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id).and_then(|element| element.attr(name))
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Nearest ancestor that is an element.
    pub fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        self.ancestors(id).next()
    }

    /// Element ancestors, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut cursor = self.parent(id);
        std::iter::from_fn(move || {
            while let Some(current) = cursor {
                cursor = self.parent(current);
                if self.element(current).is_some() {
                    return Some(current);
                }
            }
            None
        })
    }

    /// All element ids in document order.
    pub fn elements(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| matches!(node.data, NodeData::Element(_)))
            .map(|(idx, _)| NodeId(idx))
    }

    /// Element children, in order.
    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(move |child| self.element(*child).is_some())
    }

    /// 1-based position among element siblings sharing the same tag.
    pub fn nth_of_type(&self, id: NodeId) -> usize {
        let Some(tag) = self.tag(id) else {
            return 0;
        };
        let Some(parent) = self.parent(id) else {
            return 1;
        };
        let mut position = 0;
        for sibling in self.children(parent) {
            if self.tag(*sibling) == Some(tag) {
                position += 1;
            }
            if *sibling == id {
                break;
            }
        }
        position
    }

    /// Whitespace-collapsed text of the node and its descendants, skipping
    /// script-like content.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut raw = String::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            match &self.nodes[current.0].data {
                NodeData::Text(text) => {
                    raw.push_str(text);
                    raw.push(' ');
                }
                NodeData::Element(element) if SKIPPED_TAGS.contains(&element.tag.as_str()) => {}
                _ => stack.extend(self.nodes[current.0].children.iter().rev().copied()),
            }
        }
        collapse_whitespace(&raw)
    }

    /// Whitespace-collapsed text of direct text children only.
    pub fn own_text(&self, id: NodeId) -> String {
        let mut raw = String::new();
        for child in self.children(id) {
            if let NodeData::Text(text) = &self.nodes[child.0].data {
                raw.push_str(text);
                raw.push(' ');
            }
        }
        collapse_whitespace(&raw)
    }

    pub fn append_element(
        &mut self,
        parent: NodeId,
        tag: impl Into<String>,
        attrs: Vec<(String, String)>,
    ) -> NodeId {
        self.push(
            parent,
            NodeData::Element(ElementData {
                tag: tag.into().to_ascii_lowercase(),
                attrs,
            }),
        )
    }

    /// Appends text, merging with a directly preceding text sibling.
    pub fn append_text(&mut self, parent: NodeId, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(last) = self.nodes[parent.0].children.last().copied() {
            if let NodeData::Text(existing) = &mut self.nodes[last.0].data {
                existing.push_str(text);
                return;
            }
        }
        self.push(parent, NodeData::Text(text.to_string()));
    }

    fn push(&mut self, parent: NodeId, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(DomNode {
            parent: Some(parent),
            children: Vec::new(),
            data,
        });
        self.nodes[parent.0].children.push(id);
        id
    }
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
