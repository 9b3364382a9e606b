use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value};

use crate::classify;
use crate::dom::{DomTree, ElementData, NodeId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JudgeReport {
    pub ok: bool,
    pub reason: String,
    pub facts: Value,
}

/// Visible unless the element or an ancestor is hidden by attribute or
/// inline style, or the element is a hidden input.
pub fn visible(tree: &DomTree, node: NodeId) -> JudgeReport {
    let mut facts = JsonMap::new();
    let mut issues: Vec<String> = Vec::new();

    let Some(element) = tree.element(node) else {
        return JudgeReport {
            ok: false,
            reason: "not_visible(not_element)".into(),
            facts: Value::Object(facts),
        };
    };

    if element.tag == "input"
        && element
            .attr("type")
            .is_some_and(|ty| ty.eq_ignore_ascii_case("hidden"))
    {
        issues.push("hidden_input".into());
    }

    let mut style_flags = Vec::new();
    for (depth, current) in std::iter::once(node).chain(tree.ancestors(node)).enumerate() {
        let Some(el) = tree.element(current) else {
            continue;
        };
        let scope = if depth == 0 { "" } else { "ancestor_" };
        if attr_flag_true(el, "hidden") {
            issues.push(format!("{scope}hidden_attribute"));
        }
        if el
            .attr("aria-hidden")
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
        {
            issues.push(format!("{scope}aria_hidden"));
        }
        if let Some(style) = el.attr("style") {
            let hints = inspect_inline_style(style);
            if hints.hides {
                issues.push(format!("{scope}style_hidden"));
            }
            style_flags.extend(hints.flags);
        }
    }

    if !style_flags.is_empty() {
        style_flags.sort();
        style_flags.dedup();
        facts.insert("style_flags".into(), json!(style_flags));
    }
    facts.insert("tag".into(), json!(element.tag));
    issues.dedup();
    let ok = issues.is_empty();
    if !ok {
        facts.insert("issues".into(), json!(issues.clone()));
    }

    JudgeReport {
        ok,
        reason: format_reason(if ok { "visible" } else { "not_visible" }, &issues),
        facts: Value::Object(facts),
    }
}

/// Visible, enabled, not pointer-blocked and carrying an interactive signal.
pub fn interactable(tree: &DomTree, node: NodeId) -> JudgeReport {
    let visibility = visible(tree, node);
    let mut facts = JsonMap::new();
    facts.insert("visibility".into(), visibility.facts.clone());

    let mut issues: Vec<String> = Vec::new();
    if !visibility.ok {
        issues.push("not_visible".into());
    }

    let Some(element) = tree.element(node) else {
        return JudgeReport {
            ok: false,
            reason: "not_interactable(not_element)".into(),
            facts: Value::Object(facts),
        };
    };

    let actionable = classify::is_interactive(element);
    if !actionable {
        issues.push("no_interaction_signal".into());
    }
    if is_disabled(element) {
        issues.push("disabled".into());
    }
    let inside_disabled_fieldset = tree.ancestors(node).any(|ancestor| {
        tree.element(ancestor)
            .is_some_and(|el| el.tag == "fieldset" && attr_flag_true(el, "disabled"))
    });
    if inside_disabled_fieldset {
        issues.push("fieldset_disabled".into());
    }
    let pointer_blocked = element
        .attr("style")
        .is_some_and(|style| inspect_inline_style(style).pointer_blocked);
    if pointer_blocked {
        issues.push("pointer_events_none".into());
    }

    facts.insert(
        "signals".into(),
        json!({
            "actionable": actionable,
            "role": classify::role(element),
            "pointer_blocked": pointer_blocked,
        }),
    );
    let ok = issues.is_empty();
    if !ok {
        facts.insert("issues".into(), json!(issues.clone()));
    }

    JudgeReport {
        ok,
        reason: format_reason(if ok { "interactable" } else { "not_interactable" }, &issues),
        facts: Value::Object(facts),
    }
}

fn attr_flag_true(element: &ElementData, key: &str) -> bool {
    element.attr(key).is_some_and(|value| {
        let normalized = value.trim().to_ascii_lowercase();
        normalized.is_empty() || !matches!(normalized.as_str(), "false" | "0" | "no" | "off")
    })
}

fn is_disabled(element: &ElementData) -> bool {
    attr_flag_true(element, "disabled")
        || element
            .attr("aria-disabled")
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}

fn format_reason(base: &str, issues: &[String]) -> String {
    if issues.is_empty() {
        base.to_string()
    } else {
        format!("{}({})", base, issues.join(","))
    }
}

#[derive(Default)]
struct StyleHints {
    flags: Vec<String>,
    hides: bool,
    pointer_blocked: bool,
}

fn inspect_inline_style(style: &str) -> StyleHints {
    let mut hints = StyleHints::default();
    for chunk in style.to_ascii_lowercase().split(';') {
        let Some((property, value)) = chunk.split_once(':') else {
            continue;
        };
        let (property, value) = (property.trim(), value.trim());
        match (property, value) {
            ("display", "none") => {
                hints.hides = true;
                hints.flags.push("display:none".into());
            }
            ("visibility", "hidden") | ("visibility", "collapse") => {
                hints.hides = true;
                hints.flags.push(format!("visibility:{value}"));
            }
            ("pointer-events", "none") => {
                hints.pointer_blocked = true;
                hints.flags.push("pointer-events:none".into());
            }
            _ => {}
        }
    }
    hints
}
