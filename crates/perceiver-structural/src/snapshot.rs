//! Ingestion of nested JSON DOM snapshots.
//!
//! Accepted node shape: `{ "nodeName", "attributes", "children",
//! "textContent" | "nodeValue" }`. `attributes` may be an object or a flat
//! `[name, value, ...]` array. Text nodes use `#text` (or `nodeType: 3`).

use serde_json::Value;
use tracing::debug;

use crate::dom::{DomTree, NodeId};
use crate::errors::PerceiverError;

impl DomTree {
    pub fn from_snapshot(snapshot: &Value) -> Result<DomTree, PerceiverError> {
        let mut tree = DomTree::new();
        let root = tree.root();
        let mut stack: Vec<(&Value, NodeId)> = match snapshot {
            Value::Object(_) => vec![(snapshot, root)],
            Value::Array(nodes) => nodes.iter().rev().map(|node| (node, root)).collect(),
            other => {
                return Err(PerceiverError::Snapshot(format!(
                    "expected a node object or array, found {}",
                    type_name(other)
                )))
            }
        };

        while let Some((value, parent)) = stack.pop() {
            let Some(node) = value.as_object() else {
                debug!(kind = type_name(value), "skipping non-object snapshot node");
                continue;
            };
            let name = node
                .get("nodeName")
                .and_then(Value::as_str)
                .unwrap_or("#document");
            let node_type = node.get("nodeType").and_then(Value::as_u64);
            let children = node.get("children").and_then(Value::as_array);

            match (name, node_type) {
                ("#text", _) | (_, Some(3)) => {
                    let text = node
                        .get("nodeValue")
                        .or_else(|| node.get("textContent"))
                        .and_then(Value::as_str)
                        .unwrap_or("");
                    tree.append_text(parent, text);
                }
                ("#comment", _) | (_, Some(8)) => {}
                ("#document", _) | ("#document-fragment", _) | (_, Some(9)) => {
                    if let Some(children) = children {
                        stack.extend(children.iter().rev().map(|child| (child, parent)));
                    }
                }
                (tag, _) => {
                    let attrs = read_attributes(node.get("attributes"));
                    let element = tree.append_element(parent, tag, attrs);
                    match children {
                        Some(children) if !children.is_empty() => {
                            stack.extend(children.iter().rev().map(|child| (child, element)));
                        }
                        _ => {
                            if let Some(text) = node.get("textContent").and_then(Value::as_str) {
                                tree.append_text(element, text);
                            }
                        }
                    }
                }
            }
        }
        Ok(tree)
    }
}

fn read_attributes(value: Option<&Value>) -> Vec<(String, String)> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(key, value)| {
                scalar_to_string(value).map(|value| (key.to_ascii_lowercase(), value))
            })
            .collect(),
        Some(Value::Array(flat)) => flat
            .chunks(2)
            .filter_map(|pair| match pair {
                [key, value] => Some((
                    key.as_str()?.to_ascii_lowercase(),
                    scalar_to_string(value).unwrap_or_default(),
                )),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(num) => Some(num.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
