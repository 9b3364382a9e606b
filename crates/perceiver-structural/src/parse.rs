//! Tolerant HTML tokenizer feeding a [`DomTree`].
//!
//! Handles the markup found in page captures: void elements, implied end
//! tags, comments, doctype, raw-text elements and common entities. Malformed
//! input never fails; unmatched end tags are ignored.

use crate::dom::{DomTree, NodeId};

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_TAGS: &[&str] = &["script", "style", "textarea", "title"];

/// Block-level tags that close an open `<p>`.
const CLOSES_P: &[&str] = &[
    "address", "article", "aside", "blockquote", "div", "dl", "fieldset", "footer", "form", "h1",
    "h2", "h3", "h4", "h5", "h6", "header", "hr", "main", "nav", "ol", "p", "pre", "section",
    "table", "ul",
];

impl DomTree {
    pub fn parse_html(raw: &str) -> DomTree {
        let mut tree = DomTree::new();
        let mut stack: Vec<NodeId> = vec![tree.root()];
        let bytes = raw.as_bytes();
        let mut pos = 0;

        while pos < raw.len() {
            let Some(offset) = raw[pos..].find('<') else {
                append_text(&mut tree, &stack, &raw[pos..]);
                break;
            };
            if offset > 0 {
                append_text(&mut tree, &stack, &raw[pos..pos + offset]);
                pos += offset;
            }

            let rest = &raw[pos..];
            if rest.starts_with("<!--") {
                pos = match rest[4..].find("-->") {
                    Some(end) => pos + 4 + end + 3,
                    None => raw.len(),
                };
            } else if rest.starts_with("<!") || rest.starts_with("<?") {
                pos = skip_past_gt(raw, pos);
            } else if rest.starts_with("</") {
                let (name, next) = read_name(raw, pos + 2);
                pos = skip_past_gt(raw, next);
                if !name.is_empty() {
                    close_element(&tree, &mut stack, &name);
                }
            } else if bytes.get(pos + 1).is_some_and(|b| b.is_ascii_alphabetic()) {
                let (name, next) = read_name(raw, pos + 1);
                let (attrs, self_closing, next) = read_attributes(raw, next);
                pos = next;

                apply_implied_end(&tree, &mut stack, &name);
                let parent = *stack.last().unwrap_or(&tree.root());
                let element = tree.append_element(parent, name.clone(), attrs);

                if RAW_TEXT_TAGS.contains(&name.as_str()) && !self_closing {
                    let (content, next) = read_raw_text(raw, pos, &name);
                    let text = if matches!(name.as_str(), "textarea" | "title") {
                        decode_entities(content)
                    } else {
                        content.to_string()
                    };
                    tree.append_text(element, &text);
                    pos = next;
                } else if !self_closing && !VOID_TAGS.contains(&name.as_str()) {
                    stack.push(element);
                }
            } else {
                // A bare '<' is literal text.
                append_text(&mut tree, &stack, "<");
                pos += 1;
            }
        }
        tree
    }
}

fn append_text(tree: &mut DomTree, stack: &[NodeId], text: &str) {
    let parent = stack.last().copied().unwrap_or_else(|| tree.root());
    tree.append_text(parent, &decode_entities(text));
}

fn read_name(raw: &str, start: usize) -> (String, usize) {
    let bytes = raw.as_bytes();
    let mut end = start;
    while end < bytes.len()
        && (bytes[end].is_ascii_alphanumeric() || matches!(bytes[end], b'-' | b'_' | b':'))
    {
        end += 1;
    }
    (raw[start..end].to_ascii_lowercase(), end)
}

fn skip_past_gt(raw: &str, from: usize) -> usize {
    match raw[from..].find('>') {
        Some(offset) => from + offset + 1,
        None => raw.len(),
    }
}

fn read_attributes(raw: &str, start: usize) -> (Vec<(String, String)>, bool, usize) {
    let bytes = raw.as_bytes();
    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut pos = start;

    loop {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= bytes.len() {
            return (attrs, false, pos);
        }
        match bytes[pos] {
            b'>' => return (attrs, false, pos + 1),
            b'/' => {
                if bytes.get(pos + 1) == Some(&b'>') {
                    return (attrs, true, pos + 2);
                }
                pos += 1;
                continue;
            }
            _ => {}
        }

        let name_start = pos;
        while pos < bytes.len()
            && !bytes[pos].is_ascii_whitespace()
            && !matches!(bytes[pos], b'=' | b'>' | b'/')
        {
            pos += 1;
        }
        let name = raw[name_start..pos].to_ascii_lowercase();
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }

        let mut value = String::new();
        if bytes.get(pos) == Some(&b'=') {
            pos += 1;
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            match bytes.get(pos) {
                Some(&quote) if quote == b'"' || quote == b'\'' => {
                    let value_start = pos + 1;
                    let end = raw[value_start..]
                        .find(quote as char)
                        .map(|offset| value_start + offset)
                        .unwrap_or(raw.len());
                    value = decode_entities(&raw[value_start..end]);
                    pos = (end + 1).min(raw.len());
                }
                Some(_) => {
                    let value_start = pos;
                    while pos < bytes.len()
                        && !bytes[pos].is_ascii_whitespace()
                        && bytes[pos] != b'>'
                    {
                        pos += 1;
                    }
                    value = decode_entities(&raw[value_start..pos]);
                }
                None => {}
            }
        }

        if !name.is_empty() && !attrs.iter().any(|(existing, _)| existing == &name) {
            attrs.push((name, value));
        }
    }
}

fn read_raw_text<'a>(raw: &'a str, start: usize, tag: &str) -> (&'a str, usize) {
    let closing = format!("</{tag}");
    let lower = raw[start..].to_ascii_lowercase();
    match lower.find(&closing) {
        Some(offset) => {
            let content = &raw[start..start + offset];
            (content, skip_past_gt(raw, start + offset))
        }
        None => (&raw[start..], raw.len()),
    }
}

fn close_element(tree: &DomTree, stack: &mut Vec<NodeId>, name: &str) {
    let Some(depth) = stack
        .iter()
        .rposition(|node| tree.tag(*node) == Some(name))
    else {
        return;
    };
    stack.truncate(depth);
}

fn apply_implied_end(tree: &DomTree, stack: &mut Vec<NodeId>, opening: &str) {
    let open_tag = |stack: &Vec<NodeId>| stack.last().and_then(|node| tree.tag(*node)).map(str::to_string);

    if CLOSES_P.contains(&opening) && open_tag(stack).as_deref() == Some("p") {
        stack.pop();
    }
    match opening {
        "li" => close_within(tree, stack, "li", &["ul", "ol"]),
        "option" => close_within(tree, stack, "option", &["select", "datalist"]),
        "tr" => close_within(tree, stack, "tr", &["table", "tbody", "thead", "tfoot"]),
        "td" | "th" => {
            close_within(tree, stack, "td", &["tr", "table"]);
            close_within(tree, stack, "th", &["tr", "table"]);
        }
        "dt" | "dd" => {
            close_within(tree, stack, "dt", &["dl"]);
            close_within(tree, stack, "dd", &["dl"]);
        }
        _ => {}
    }
}

/// Closes an open `tag` unless one of `scopes` is nearer on the stack.
fn close_within(tree: &DomTree, stack: &mut Vec<NodeId>, tag: &str, scopes: &[&str]) {
    for (depth, node) in stack.iter().enumerate().rev() {
        match tree.tag(*node) {
            Some(current) if current == tag => {
                stack.truncate(depth);
                return;
            }
            Some(current) if scopes.contains(&current) => return,
            _ => {}
        }
    }
}

pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &rest[1..end];
            decode_entity(entity).map(|ch| (ch, end + 1))
        });
        match decoded {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        "copy" => Some('\u{a9}'),
        "hellip" => Some('\u{2026}'),
        _ => {
            let code = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                entity.strip_prefix('#')?.parse::<u32>().ok()?
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_markup_with_void_elements() {
        let tree = DomTree::parse_html(
            "<!DOCTYPE html><html><body><form id=login><input name=user><br>\
             <button type=\"submit\" disabled>Sign &amp; go</button></form></body></html>",
        );
        let tags: Vec<&str> = tree.elements().filter_map(|id| tree.tag(id)).collect();
        assert_eq!(tags, vec!["html", "body", "form", "input", "br", "button"]);

        let button = tree.elements().last().unwrap();
        assert_eq!(tree.attr(button, "type"), Some("submit"));
        assert_eq!(tree.attr(button, "disabled"), Some(""));
        assert_eq!(tree.text_content(button), "Sign & go");
        let form = tree.parent_element(button).unwrap();
        assert_eq!(tree.attr(form, "id"), Some("login"));
    }

    #[test]
    fn implied_end_tags() {
        let tree = DomTree::parse_html("<ul><li>one<li>two</ul><p>a<div>b</div>");
        let items: Vec<_> = tree
            .elements()
            .filter(|id| tree.tag(*id) == Some("li"))
            .collect();
        assert_eq!(items.len(), 2);
        assert_eq!(tree.parent_element(items[1]), tree.parent_element(items[0]));

        let div = tree.elements().find(|id| tree.tag(*id) == Some("div")).unwrap();
        assert_eq!(tree.parent_element(div), None);
    }

    #[test]
    fn script_content_is_raw_and_comments_dropped() {
        let tree = DomTree::parse_html(
            "<div><!-- <button>no</button> --><script>if (a < b) { x('</div>') }</script>ok</div>",
        );
        assert!(tree.elements().all(|id| tree.tag(id) != Some("button")));
        let div = tree.elements().next().unwrap();
        assert_eq!(tree.text_content(div), "ok");
    }

    #[test]
    fn stray_markup_is_tolerated() {
        let tree = DomTree::parse_html("a < b </span> <p>c &#x41;&#66;&bogus; d");
        let p = tree.elements().next().unwrap();
        assert_eq!(tree.text_content(tree.root()), "a < b c AB&bogus; d");
        assert_eq!(tree.tag(p), Some("p"));
    }
}
