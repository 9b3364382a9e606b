//! Candidate generation and ranking.
//!
//! Every control in the condensed page that shares at least one token with
//! the failed locator (or with the action's `target_text` / `description`)
//! yields up to one selector per [`CandidateKind`]. Candidates sort by kind
//! first, then by similarity, then by document order.

use std::collections::BTreeSet;

use perceiver_structural::{quote, CondensedDOM, DomTree, ElementDescriptor};
use soulbrowser_core_types::Action;
use tracing::debug;

use crate::types::{Candidate, CandidateKind};

/// Action arguments that describe the intended target in prose.
const HINT_ARGS: &[&str] = &["target_text", "description"];

/// Longest visible text turned into a `:has-text` candidate.
const MAX_TEXT_SELECTOR_CHARS: usize = 60;

pub fn generate_candidates(
    condensed: &CondensedDOM,
    tree: &DomTree,
    action: &Action,
    original_selector: &str,
    max_candidates: usize,
) -> Vec<Candidate> {
    let mut query = tokens(original_selector);
    for key in HINT_ARGS {
        if let Some(hint) = action.arg_str(key) {
            query.extend(tokens(hint));
        }
    }
    if query.is_empty() {
        debug!(selector = original_selector, "failed selector carries no usable tokens");
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for element in &condensed.interactive_elements {
        let score = similarity(&query, element, tree);
        if score <= 0.0 {
            continue;
        }
        for (kind, selector) in selectors_for(element) {
            if selector == original_selector {
                continue;
            }
            candidates.push(Candidate {
                selector,
                kind,
                score,
                element_id: element.id.clone(),
                node: element.node,
            });
        }
    }

    candidates.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then(b.score.total_cmp(&a.score))
            .then(a.node.cmp(&b.node))
    });
    let mut seen = BTreeSet::new();
    candidates.retain(|candidate| seen.insert(candidate.selector.clone()));
    candidates.truncate(max_candidates);

    debug!(
        selector = original_selector,
        candidates = candidates.len(),
        best = candidates.first().map(|c| c.selector.as_str()).unwrap_or("-"),
        "candidates ranked"
    );
    candidates
}

fn selectors_for(element: &ElementDescriptor) -> Vec<(CandidateKind, String)> {
    let mut out = Vec::new();
    if let (Some(attr), Some(value)) = (&element.test_id_attribute, &element.test_id) {
        out.push((
            CandidateKind::TestId,
            format!("{}[{attr}={}]", element.tag, quote(value)),
        ));
    }
    if let Some(label) = element.aria_label.as_deref().filter(|l| !l.trim().is_empty()) {
        out.push((
            CandidateKind::AriaLabel,
            format!("{}[aria-label={}]", element.tag, quote(label)),
        ));
    }
    let text = element.text.trim();
    if !text.is_empty()
        && text.chars().count() <= MAX_TEXT_SELECTOR_CHARS
        && !text.ends_with("...")
    {
        out.push((
            CandidateKind::Text,
            format!("{}:has-text({})", element.tag, quote(text)),
        ));
    }
    if !element.css.is_empty() {
        out.push((CandidateKind::Css, element.css.clone()));
    }
    if !element.path.is_empty() {
        out.push((CandidateKind::Path, element.path.clone()));
    }
    out
}

/// Share of query tokens found on the element.
fn similarity(query: &BTreeSet<String>, element: &ElementDescriptor, tree: &DomTree) -> f64 {
    let mut own = BTreeSet::new();
    own.insert(element.tag.clone());
    if let Some(role) = &element.role {
        own.insert(role.clone());
    }
    for value in element
        .test_id
        .iter()
        .chain(element.aria_label.iter())
        .chain(std::iter::once(&element.text))
        .chain(element.attributes.values())
    {
        own.extend(tokens(value));
    }
    if let Some(data) = tree.element(element.node) {
        for class in data.classes() {
            own.extend(tokens(class));
        }
    }

    let matched = query
        .iter()
        .filter(|token| own.iter().any(|candidate| token_matches(token, candidate)))
        .count();
    matched as f64 / query.len() as f64
}

fn token_matches(query: &str, candidate: &str) -> bool {
    if query == candidate {
        return true;
    }
    // Compound identifiers such as `loginbutton` or `submission`.
    let (short, long) = if query.len() <= candidate.len() {
        (query, candidate)
    } else {
        (candidate, query)
    };
    short.len() >= 4 && long.contains(short)
}

/// Lower-cased alphanumeric tokens, camelCase split, common abbreviations
/// expanded.
pub fn tokens(text: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if ch.is_uppercase() && prev_lower && !current.is_empty() {
                push_token(&mut out, &mut current);
            }
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            current.extend(ch.to_lowercase());
        } else {
            push_token(&mut out, &mut current);
            prev_lower = false;
        }
    }
    push_token(&mut out, &mut current);
    out
}

fn push_token(out: &mut BTreeSet<String>, current: &mut String) {
    if current.is_empty() {
        return;
    }
    let token = std::mem::take(current);
    if token.len() < 2 || token.chars().all(|ch| ch.is_ascii_digit()) {
        return;
    }
    let expanded = match token.as_str() {
        "btn" => "button",
        "lnk" => "link",
        "txt" => "text",
        "img" => "image",
        "nav" => "navigation",
        "cb" | "chk" => "checkbox",
        "dd" | "dropdown" => "select",
        _ => token.as_str(),
    };
    out.insert(expanded.to_string());
}
