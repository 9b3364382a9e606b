//! Small CSS selector engine.
//!
//! Supported: type and `*`, `#id`, `.class`, `[attr]`, `[attr=v]` (quoted or
//! bare), `:nth-of-type(n)`, `:has-text('t')` (case-insensitive substring
//! of the element's text), and the descendant and child combinators.

use std::fmt;
use std::str::FromStr;

use crate::dom::{DomTree, NodeId};
use crate::errors::PerceiverError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    source: String,
    /// Compounds left to right; each carries the combinator joining it to
    /// the previous compound.
    steps: Vec<(Combinator, Compound)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
    nth_of_type: Option<usize>,
    has_text: Vec<String>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        self == &Compound::default()
    }

    fn matches(&self, tree: &DomTree, node: NodeId) -> bool {
        let Some(element) = tree.element(node) else {
            return false;
        };
        if let Some(tag) = &self.tag {
            if &element.tag != tag {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if element.attr("id") != Some(id.as_str()) {
                return false;
            }
        }
        if !self
            .classes
            .iter()
            .all(|class| element.classes().any(|have| have == class))
        {
            return false;
        }
        for (name, expected) in &self.attrs {
            match (element.attr(name), expected) {
                (None, _) => return false,
                (Some(actual), Some(expected)) if actual != expected => return false,
                _ => {}
            }
        }
        if let Some(nth) = self.nth_of_type {
            if tree.nth_of_type(node) != nth {
                return false;
            }
        }
        if !self.has_text.is_empty() {
            let text = tree.text_content(node).to_lowercase();
            if !self
                .has_text
                .iter()
                .all(|needle| text.contains(&needle.to_lowercase()))
            {
                return false;
            }
        }
        true
    }
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, PerceiverError> {
        Parser::new(source).parse()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Every matching element, in document order.
    pub fn select(&self, tree: &DomTree) -> Vec<NodeId> {
        tree.elements()
            .filter(|node| self.matches(tree, *node))
            .collect()
    }

    pub fn matches(&self, tree: &DomTree, node: NodeId) -> bool {
        self.matches_from(tree, node, self.steps.len() - 1)
    }

    fn matches_from(&self, tree: &DomTree, node: NodeId, step: usize) -> bool {
        let (combinator, compound) = &self.steps[step];
        if !compound.matches(tree, node) {
            return false;
        }
        if step == 0 {
            return true;
        }
        match combinator {
            Combinator::Child => tree
                .parent_element(node)
                .is_some_and(|parent| self.matches_from(tree, parent, step - 1)),
            Combinator::Descendant => tree
                .ancestors(node)
                .any(|ancestor| self.matches_from(tree, ancestor, step - 1)),
        }
    }
}

impl FromStr for Selector {
    type Err = PerceiverError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        Selector::parse(source)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parses and evaluates in one go.
pub fn query(tree: &DomTree, selector: &str) -> Result<Vec<NodeId>, PerceiverError> {
    Ok(Selector::parse(selector)?.select(tree))
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.trim().chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> PerceiverError {
        PerceiverError::selector(self.source, reason)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn parse(mut self) -> Result<Selector, PerceiverError> {
        if self.chars.is_empty() {
            return Err(self.error("empty selector"));
        }
        let mut steps = Vec::new();
        let mut combinator = Combinator::Descendant;
        loop {
            let compound = self.compound()?;
            if compound.is_empty() {
                return Err(self.error(format!("expected a selector at offset {}", self.pos)));
            }
            steps.push((combinator, compound));

            let had_space = self.skip_whitespace();
            match self.peek() {
                None => break,
                Some('>') => {
                    self.pos += 1;
                    self.skip_whitespace();
                    combinator = Combinator::Child;
                }
                Some(',') => return Err(self.error("selector lists are not supported")),
                Some(_) if had_space => combinator = Combinator::Descendant,
                Some(other) => {
                    return Err(self.error(format!("unexpected `{other}` at offset {}", self.pos)))
                }
            }
        }
        Ok(Selector {
            source: self.source.trim().to_string(),
            steps,
        })
    }

    fn compound(&mut self) -> Result<Compound, PerceiverError> {
        let mut compound = Compound::default();
        if self.peek() == Some('*') {
            self.pos += 1;
        } else if self.peek().is_some_and(is_ident_char) {
            compound.tag = Some(self.ident()?.to_ascii_lowercase());
        }
        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.id = Some(self.ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    compound.attrs.push(self.attribute()?);
                }
                Some(':') => {
                    self.pos += 1;
                    self.pseudo(&mut compound)?;
                }
                _ => return Ok(compound),
            }
        }
    }

    fn ident(&mut self) -> Result<String, PerceiverError> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error(format!("expected identifier at offset {start}")));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn attribute(&mut self) -> Result<(String, Option<String>), PerceiverError> {
        self.skip_whitespace();
        let name = self.ident()?.to_ascii_lowercase();
        self.skip_whitespace();
        let value = match self.peek() {
            Some(']') => None,
            Some('=') => {
                self.pos += 1;
                self.skip_whitespace();
                let value = self.value()?;
                self.skip_whitespace();
                Some(value)
            }
            _ => return Err(self.error("only [attr] and [attr=value] are supported")),
        };
        if self.peek() != Some(']') {
            return Err(self.error("unterminated attribute selector"));
        }
        self.pos += 1;
        Ok((name, value))
    }

    fn value(&mut self) -> Result<String, PerceiverError> {
        match self.peek() {
            Some(quote @ ('\'' | '"')) => {
                self.pos += 1;
                let mut value = String::new();
                loop {
                    match self.peek() {
                        None => return Err(self.error("unterminated string")),
                        Some(ch) if ch == quote => break,
                        Some('\\') => {
                            self.pos += 1;
                            let escaped = self
                                .peek()
                                .ok_or_else(|| self.error("unterminated string"))?;
                            value.push(escaped);
                        }
                        Some(ch) => value.push(ch),
                    }
                    self.pos += 1;
                }
                self.pos += 1;
                Ok(value)
            }
            _ => self.ident(),
        }
    }

    fn pseudo(&mut self, compound: &mut Compound) -> Result<(), PerceiverError> {
        let name = self.ident()?.to_ascii_lowercase();
        if self.peek() != Some('(') {
            return Err(self.error(format!("pseudo-class :{name} needs an argument")));
        }
        self.pos += 1;
        self.skip_whitespace();
        match name.as_str() {
            "nth-of-type" => {
                let digits = self.ident()?;
                let nth = digits
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| self.error(format!("bad :nth-of-type index `{digits}`")))?;
                compound.nth_of_type = Some(nth);
            }
            "has-text" | "contains" => {
                let text = self.value()?;
                compound.has_text.push(text);
            }
            other => return Err(self.error(format!("unsupported pseudo-class :{other}"))),
        }
        self.skip_whitespace();
        if self.peek() != Some(')') {
            return Err(self.error("unterminated pseudo-class"));
        }
        self.pos += 1;
        Ok(())
    }
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '-' | '_')
}

/// Quotes a value for use inside `[attr=...]` or `:has-text(...)`.
/// Single quotes unless only double quotes avoid escaping; the delimiter and
/// backslashes inside the value are backslash-escaped.
pub fn quote(value: &str) -> String {
    let delimiter = if value.contains('\'') && !value.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push(delimiter);
    for ch in value.chars() {
        if ch == delimiter || ch == '\\' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push(delimiter);
    quoted
}

/// Short structural selector: id when usable, otherwise name, class and type.
pub fn css_for(tree: &DomTree, node: NodeId) -> Option<String> {
    let element = tree.element(node)?;
    let mut css = element.tag.clone();
    if let Some(id) = element.attr("id").filter(|id| is_plain_ident(id)) {
        css.push('#');
        css.push_str(id);
        return Some(css);
    }
    if let Some(name) = element.attr("name").filter(|name| !name.is_empty()) {
        css.push_str(&format!("[name={}]", quote(name)));
    } else if let Some(class) = element.classes().find(|class| is_plain_ident(class)) {
        css.push('.');
        css.push_str(class);
    }
    if let Some(ty) = element.attr("type").filter(|ty| !ty.is_empty()) {
        css.push_str(&format!("[type={}]", quote(ty)));
    }
    Some(css)
}

/// Positional path from the top of the document.
pub fn path_for(tree: &DomTree, node: NodeId) -> Option<String> {
    tree.element(node)?;
    let mut segments: Vec<String> = std::iter::once(node)
        .chain(tree.ancestors(node))
        .filter_map(|current| {
            let tag = tree.tag(current)?;
            Some(format!("{tag}:nth-of-type({})", tree.nth_of_type(current)))
        })
        .collect();
    segments.reverse();
    Some(segments.join(" > "))
}

fn is_plain_ident(value: &str) -> bool {
    !value.is_empty()
        && value.chars().all(is_ident_char)
        && !value.starts_with(|ch: char| ch.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> DomTree {
        DomTree::parse_html(
            r#"<form id="login">
                 <div class="row"><input name="user" type="text"></div>
                 <div class="row actions">
                   <button type="submit" data-testid="submit">Sign in</button>
                   <button type="button" class="link">Forgot password</button>
                 </div>
               </form>"#,
        )
    }

    #[test]
    fn compound_and_combinators() {
        let tree = page();
        assert_eq!(query(&tree, "button[data-testid='submit']").unwrap().len(), 1);
        assert_eq!(query(&tree, "form button").unwrap().len(), 2);
        assert_eq!(query(&tree, "form > button").unwrap().len(), 0);
        assert_eq!(query(&tree, "div.row.actions > button.link").unwrap().len(), 1);
        assert_eq!(query(&tree, "#login input[name=user]").unwrap().len(), 1);
        assert_eq!(query(&tree, "div:nth-of-type(2) button:nth-of-type(1)").unwrap().len(), 1);
        assert_eq!(query(&tree, "button:has-text('sign IN')").unwrap().len(), 1);
        assert_eq!(query(&tree, "*[type]").unwrap().len(), 3);
        assert!(query(&tree, "#submit-btn-old").unwrap().is_empty());
    }

    #[test]
    fn invalid_selectors_are_errors() {
        for bad in ["", "div[", "a:hover", "a, b", "button:nth-of-type(0)", "[x~=y]"] {
            assert!(Selector::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn generated_selectors_round_trip() {
        let tree = page();
        for node in tree.elements() {
            let path = path_for(&tree, node).unwrap();
            assert_eq!(query(&tree, &path).unwrap(), vec![node], "{path}");
        }
        let input = query(&tree, "input").unwrap()[0];
        assert_eq!(css_for(&tree, input).unwrap(), "input[name='user'][type='text']");
        let form = query(&tree, "form").unwrap()[0];
        assert_eq!(css_for(&tree, form).unwrap(), "form#login");
    }

    #[test]
    fn quoted_values_with_both_quote_kinds_still_match() {
        let tree = DomTree::parse_html(
            r#"<div>
                 <button aria-label="Say &quot;hi&quot; to O'Brien">Greet</button>
                 <button aria-label="Say hi to OBrien">Other</button>
                 <a title="C:\temp">Path</a>
               </div>"#,
        );
        let label = "Say \"hi\" to O'Brien";
        assert_eq!(quote(label), r#"'Say "hi" to O\'Brien'"#);
        let matched = query(&tree, &format!("button[aria-label={}]", quote(label))).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(tree.element(matched[0]).unwrap().attr("aria-label"), Some(label));

        assert_eq!(quote("O'Brien"), r#""O'Brien""#);
        assert_eq!(query(&tree, &format!("a[title={}]", quote("C:\\temp"))).unwrap().len(), 1);
        assert!(Selector::parse("a[title='dangling\\").is_err());
    }
}
