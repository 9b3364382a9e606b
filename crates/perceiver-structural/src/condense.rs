//! DOM condensation: page markup in, bounded structural summary out.
//!
//! Survivors are serialized one per line as `indent[eN]<tag attrs>text`.
//! Interactive controls and test-id carriers are never dropped; when the
//! summary is over budget, plain text goes first (from the end of the
//! document), then text matching pending assertions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::classify::{self, DEFAULT_TEST_ID_ATTRIBUTES};
use crate::dom::{collapse_whitespace, DomTree, ElementData, NodeData, NodeId, SKIPPED_TAGS};
use crate::errors::PerceiverError;
use crate::judges;
use crate::selector;

/// Inputs above this size get the proportional output cap.
pub const LARGE_INPUT_BYTES: usize = 10 * 1024;

/// Attributes worth carrying into the summary.
const KEY_ATTRIBUTES: &[&str] = &[
    "id",
    "name",
    "type",
    "role",
    "aria-label",
    "placeholder",
    "href",
    "title",
    "alt",
    "value",
    "for",
];

const FLAG_ATTRIBUTES: &[&str] = &["disabled", "checked", "selected", "required", "readonly"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CondenseOptions {
    /// Estimated-token ceiling for `text_content`.
    pub token_budget: usize,
    /// Text to keep while any other text can still be dropped.
    pub assertion_terms: Vec<String>,
    /// Per-element text limit (characters).
    pub max_text_len: usize,
    pub test_id_attributes: Vec<String>,
    /// Output cap for large inputs, as a fraction of input bytes.
    pub large_input_ratio: f64,
}

impl Default for CondenseOptions {
    fn default() -> Self {
        Self {
            token_budget: 2_000,
            assertion_terms: Vec::new(),
            max_text_len: 100,
            test_id_attributes: DEFAULT_TEST_ID_ATTRIBUTES
                .iter()
                .map(|attr| attr.to_string())
                .collect(),
            large_input_ratio: 0.2,
        }
    }
}

impl CondenseOptions {
    pub fn with_budget(mut self, token_budget: usize) -> Self {
        self.token_budget = token_budget;
        self
    }

    pub fn with_assertions<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assertion_terms = terms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_text_len(mut self, max_text_len: usize) -> Self {
        self.max_text_len = max_text_len;
        self
    }
}

/// One preserved control.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    /// Stable id (`e<N>`) used in `text_content`.
    pub id: String,
    pub node: NodeId,
    pub tag: String,
    pub role: Option<String>,
    pub test_id: Option<String>,
    pub test_id_attribute: Option<String>,
    pub aria_label: Option<String>,
    pub text: String,
    pub attributes: BTreeMap<String, String>,
    pub css: String,
    pub path: String,
    pub depth: usize,
    pub visible: bool,
    pub interactable: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CondensedDOM {
    pub interactive_elements: Vec<ElementDescriptor>,
    pub text_content: String,
    /// `1 - output_bytes / input_bytes`, clamped to `[0, 1]`.
    pub size_reduction_ratio: f64,
    pub truncated: bool,
    pub input_bytes: usize,
    pub output_bytes: usize,
    pub estimated_tokens: usize,
}

impl CondensedDOM {
    pub fn element(&self, id: &str) -> Option<&ElementDescriptor> {
        self.interactive_elements.iter().find(|el| el.id == id)
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

pub fn condense(raw: &str, token_budget: usize) -> CondensedDOM {
    condense_with(raw, &CondenseOptions::default().with_budget(token_budget))
}

pub fn condense_with(raw: &str, options: &CondenseOptions) -> CondensedDOM {
    let tree = DomTree::parse_html(raw);
    condense_tree(&tree, raw, options)
}

pub fn condense_snapshot(
    snapshot: &Value,
    options: &CondenseOptions,
) -> Result<CondensedDOM, PerceiverError> {
    let tree = DomTree::from_snapshot(snapshot)?;
    let raw = serde_json::to_string(snapshot)
        .map_err(|err| PerceiverError::internal(format!("snapshot encode: {err}")))?;
    Ok(condense_tree(&tree, &raw, options))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum LineClass {
    Plain,
    Assertion,
    Control,
}

struct Line {
    text: String,
    class: LineClass,
    dropped: bool,
}

/// Condenses an already-parsed tree; `raw` is the text it came from and
/// sets `input_bytes`.
pub fn condense_tree(tree: &DomTree, raw: &str, options: &CondenseOptions) -> CondensedDOM {
    let input_bytes = raw.len();
    let terms: Vec<String> = options
        .assertion_terms
        .iter()
        .map(|term| term.trim().to_lowercase())
        .filter(|term| !term.is_empty())
        .collect();

    let signals = Signals::compute(tree, options);
    let (mut lines, interactive_elements) = serialize(tree, &signals, &terms, options);

    let max_tokens = options.token_budget;
    let max_bytes = if input_bytes > LARGE_INPUT_BYTES {
        ((input_bytes as f64) * options.large_input_ratio).floor() as usize
    } else {
        input_bytes
    };

    let mut bytes = joined_len(&lines, |line| line.text.len());
    let mut chars = joined_len(&lines, |line| line.text.chars().count());
    let mut truncated = false;
    let over = |bytes: usize, chars: usize| bytes > max_bytes || chars.div_ceil(4) > max_tokens;

    if over(bytes, chars) {
        let mut order: Vec<usize> = (0..lines.len())
            .filter(|idx| lines[*idx].class != LineClass::Control)
            .collect();
        // Plain before assertion text; later lines before earlier ones.
        order.sort_by(|a, b| lines[*a].class.cmp(&lines[*b].class).then(b.cmp(a)));
        for idx in order {
            if !over(bytes, chars) {
                break;
            }
            let line = &mut lines[idx];
            line.dropped = true;
            bytes -= line.text.len() + 1;
            chars -= line.text.chars().count() + 1;
            truncated = true;
        }
        if over(bytes, chars) {
            truncated = true;
        }
    }

    let mut text_content = lines
        .iter()
        .filter(|line| !line.dropped)
        .map(|line| line.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let mut ratio = reduction_ratio(input_bytes, text_content.len());
    if text_content.len() > input_bytes {
        text_content = collapse_whitespace(raw);
        ratio = 0.0;
    }

    let output_bytes = text_content.len();
    let estimated_tokens = estimate_tokens(&text_content);
    debug!(
        input_bytes,
        output_bytes,
        estimated_tokens,
        controls = interactive_elements.len(),
        truncated,
        "dom condensed"
    );

    CondensedDOM {
        interactive_elements,
        text_content,
        size_reduction_ratio: ratio,
        truncated,
        input_bytes,
        output_bytes,
        estimated_tokens,
    }
}

fn joined_len(lines: &[Line], measure: impl Fn(&Line) -> usize) -> usize {
    let total: usize = lines.iter().map(|line| measure(line) + 1).sum();
    total.saturating_sub(1)
}

fn reduction_ratio(input: usize, output: usize) -> f64 {
    if input == 0 {
        return 0.0;
    }
    (1.0 - output as f64 / input as f64).clamp(0.0, 1.0)
}

/// Per-node facts computed in one pass over the arena.
struct Signals {
    skipped: Vec<bool>,
    control: Vec<bool>,
    keep: Vec<bool>,
}

impl Signals {
    fn compute(tree: &DomTree, options: &CondenseOptions) -> Self {
        let len = tree.len();
        let mut skipped = vec![false; len];
        let mut control = vec![false; len];
        let mut keep = vec![false; len];

        // Parents precede children in the arena: top-down forwards...
        for idx in 1..len {
            let id = NodeId(idx);
            let inherited = tree.parent(id).map(|p| skipped[p.0]).unwrap_or(false);
            let parent_is_svg = tree.parent(id).and_then(|p| tree.tag(p)) == Some("svg");
            skipped[idx] = inherited
                || parent_is_svg
                || tree
                    .tag(id)
                    .is_some_and(|tag| SKIPPED_TAGS.contains(&tag));
            if let Some(element) = tree.element(id) {
                control[idx] = !skipped[idx]
                    && (classify::is_interactive(element)
                        || classify::test_id(element, &options.test_id_attributes).is_some());
            }
        }

        // ...and bottom-up backwards.
        for idx in (1..len).rev() {
            if skipped[idx] {
                continue;
            }
            let id = NodeId(idx);
            let node = tree.node(id);
            let own = match &node.data {
                NodeData::Text(text) => !text.trim().is_empty(),
                NodeData::Element(_) => control[idx],
                NodeData::Document => false,
            };
            if own || keep[idx] {
                keep[idx] = true;
                if let Some(parent) = node.parent {
                    keep[parent.0] = true;
                }
            }
        }

        Self {
            skipped,
            control,
            keep,
        }
    }
}

fn serialize(
    tree: &DomTree,
    signals: &Signals,
    terms: &[String],
    options: &CondenseOptions,
) -> (Vec<Line>, Vec<ElementDescriptor>) {
    let mut lines = Vec::new();
    let mut descriptors = Vec::new();
    let mut next_id = 0usize;

    // (node, depth, inside a control whose text already covers this node)
    let mut stack: Vec<(NodeId, usize, bool)> = tree
        .children(tree.root())
        .iter()
        .rev()
        .map(|child| (*child, 0, false))
        .collect();

    while let Some((id, depth, covered)) = stack.pop() {
        if signals.skipped[id.0] || !signals.keep[id.0] {
            continue;
        }
        let Some(element) = tree.element(id) else {
            continue;
        };

        let is_control = signals.control[id.0];
        let attrs = key_attributes(element, options);
        let mut child_depth = depth;

        if is_control {
            let text = truncate(&tree.text_content(id), options.max_text_len);
            let label = format!("e{next_id}");
            next_id += 1;
            lines.push(Line {
                text: render(depth, &label, &element.tag, &attrs, &text),
                class: LineClass::Control,
                dropped: false,
            });
            descriptors.push(describe(tree, id, label, text, attrs, depth, options));
            child_depth = depth + 1;
        } else if !covered {
            let own = tree.own_text(id);
            let lowered = own.to_lowercase();
            let relevant = terms.iter().any(|term| lowered.contains(term.as_str()));
            if !own.is_empty() || !attrs.is_empty() {
                let text = if relevant {
                    own
                } else {
                    truncate(&own, options.max_text_len)
                };
                let label = format!("e{next_id}");
                next_id += 1;
                lines.push(Line {
                    text: render(depth, &label, &element.tag, &attrs, &text),
                    class: if relevant {
                        LineClass::Assertion
                    } else {
                        LineClass::Plain
                    },
                    dropped: false,
                });
                child_depth = depth + 1;
            }
        }

        let covered = covered || is_control;
        stack.extend(
            tree.children(id)
                .iter()
                .rev()
                .map(|child| (*child, child_depth, covered)),
        );
    }
    (lines, descriptors)
}

fn key_attributes(
    element: &ElementData,
    options: &CondenseOptions,
) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    for (key, value) in &element.attrs {
        let wanted = KEY_ATTRIBUTES.contains(&key.as_str())
            || options.test_id_attributes.iter().any(|attr| attr == key);
        if wanted && !value.trim().is_empty() {
            attrs.push((key.clone(), truncate(value, options.max_text_len)));
        } else if FLAG_ATTRIBUTES.contains(&key.as_str()) {
            attrs.push((key.clone(), String::new()));
        }
    }
    attrs
}

fn render(depth: usize, label: &str, tag: &str, attrs: &[(String, String)], text: &str) -> String {
    let mut line = String::with_capacity(depth * 2 + tag.len() + text.len() + 16);
    for _ in 0..depth {
        line.push_str("  ");
    }
    line.push('[');
    line.push_str(label);
    line.push_str("]<");
    line.push_str(tag);
    for (key, value) in attrs {
        line.push(' ');
        line.push_str(key);
        if !value.is_empty() {
            line.push_str("=\"");
            line.push_str(&value.replace('"', "&quot;"));
            line.push('"');
        }
    }
    line.push('>');
    line.push_str(text);
    line
}

fn describe(
    tree: &DomTree,
    node: NodeId,
    id: String,
    text: String,
    attrs: Vec<(String, String)>,
    depth: usize,
    options: &CondenseOptions,
) -> ElementDescriptor {
    let element = tree.element(node);
    let tag = element.map(|el| el.tag.clone()).unwrap_or_default();
    let test_id = element.and_then(|el| classify::test_id(el, &options.test_id_attributes));
    ElementDescriptor {
        id,
        node,
        role: element.and_then(classify::role),
        test_id: test_id.map(|(_, value)| value.to_string()),
        test_id_attribute: test_id.map(|(attr, _)| attr.to_string()),
        aria_label: element
            .and_then(|el| el.attr("aria-label"))
            .map(str::to_string),
        text,
        attributes: attrs.into_iter().collect(),
        css: selector::css_for(tree, node).unwrap_or_else(|| tag.clone()),
        path: selector::path_for(tree, node).unwrap_or_default(),
        depth,
        visible: judges::visible(tree, node).ok,
        interactable: judges::interactable(tree, node).ok,
        tag,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LOGIN: &str = r#"<!DOCTYPE html>
<html>
  <head><title>Login</title><style>.x { color: red }</style><script>track()</script></head>
  <body>
    <div class="layout"><div class="inner">
      <h1>Welcome back</h1>
      <form action="/login">
        <input name="user" placeholder="User name">
        <input name="pass" type="password">
        <button type="submit" data-testid="submit">Sign <b>in</b></button>
      </form>
      <div class="decor"><span></span></div>
    </div></div>
  </body>
</html>"#;

    #[test]
    fn keeps_controls_and_drops_noise() {
        let condensed = condense(LOGIN, 500);
        let text = &condensed.text_content;
        assert!(!text.contains("track()"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("decor"));
        assert!(text.contains("<h1>Welcome back"));
        assert!(text.contains(r#"<button type="submit" data-testid="submit">Sign in"#));
        assert!(!condensed.truncated);

        let ids: Vec<&str> = condensed
            .interactive_elements
            .iter()
            .map(|el| el.id.as_str())
            .collect();
        assert_eq!(ids.len(), 3);
        let button = condensed.interactive_elements.last().unwrap();
        assert_eq!(button.test_id.as_deref(), Some("submit"));
        assert_eq!(button.role.as_deref(), Some("button"));
        assert!(button.visible && button.interactable);
        assert!(text.contains(&format!("[{}]<button", button.id)));
        assert!(condensed.output_bytes <= condensed.input_bytes);
    }

    #[test]
    fn wrappers_collapse_and_nesting_indents() {
        let condensed = condense(
            "<div><div><section><p>Intro <a href=\"/more\">more</a></p></section></div></div>",
            500,
        );
        let lines: Vec<&str> = condensed.text_content.lines().collect();
        assert_eq!(lines, vec!["[e0]<p>Intro", "  [e1]<a href=\"/more\">more"]);
    }

    #[test]
    fn large_pages_meet_the_reduction_target() {
        let mut page = String::from("<html><body><nav><a href=\"/home\">Home</a></nav><main>");
        for idx in 0..400 {
            page.push_str(&format!(
                "<div class=\"card\" style=\"padding: 4px\"><div class=\"body\"><p>Paragraph {idx} of filler text.</p></div></div>"
            ));
        }
        page.push_str("<button data-testid=\"checkout\">Checkout</button></main></body></html>");
        assert!(page.len() > LARGE_INPUT_BYTES);

        let condensed = condense(&page, 100_000);
        assert!(condensed.size_reduction_ratio >= 0.8 || condensed.truncated);
        assert!(condensed.output_bytes * 5 <= condensed.input_bytes);
        assert!(condensed.text_content.contains("Checkout"));
        assert!(condensed.text_content.contains("Home"));
    }

    #[test]
    fn budget_drops_plain_text_before_assertions_and_never_controls() {
        let mut page = String::from("<main>");
        for idx in 0..30 {
            page.push_str(&format!("<p>Filler line number {idx}</p>"));
        }
        page.push_str("<p>Order confirmed</p><button>Continue</button></main>");

        let options = CondenseOptions::default()
            .with_budget(30)
            .with_assertions(["order CONFIRMED"]);
        let condensed = condense_with(&page, &options);
        assert!(condensed.truncated);
        assert!(condensed.text_content.contains("Order confirmed"));
        assert!(condensed.text_content.contains("Continue"));
        assert!(!condensed.text_content.contains("Filler line number 29"));

        let tight = condense_with(&page, &options.clone().with_budget(1));
        assert!(tight.truncated);
        assert!(tight.text_content.contains("Continue"));
        assert!(!tight.text_content.contains("Order confirmed"));
    }

    #[test]
    fn output_never_exceeds_input() {
        for raw in ["", "x", "<b>hi</b>", "<button>  </button>", "<input>"] {
            let condensed = condense(raw, 10);
            assert!(condensed.output_bytes <= condensed.input_bytes, "{raw:?}");
            assert!((0.0..=1.0).contains(&condensed.size_reduction_ratio));
        }
    }

    #[test]
    fn snapshot_json_is_condensed() {
        let snapshot = json!({
            "nodeName": "BODY",
            "children": [
                { "nodeName": "DIV", "children": [
                    { "nodeName": "BUTTON", "attributes": { "aria-label": "Close dialog" } }
                ]},
                { "nodeName": "P", "textContent": "Saved" }
            ]
        });
        let condensed = condense_snapshot(&snapshot, &CondenseOptions::default()).unwrap();
        assert_eq!(condensed.interactive_elements.len(), 1);
        assert_eq!(
            condensed.interactive_elements[0].aria_label.as_deref(),
            Some("Close dialog")
        );
        assert!(condensed.text_content.contains("<p>Saved"));
    }
}
