//! Element classification shared by the condenser, judges and locator.

use crate::dom::ElementData;

/// Tags that are controls on their own.
const INTERACTIVE_TAGS: &[&str] = &[
    "a", "button", "input", "select", "textarea", "option", "summary",
];

/// Attributes that make any element interactive.
const HANDLER_ATTRIBUTES: &[&str] = &[
    "onclick",
    "onmousedown",
    "onmouseup",
    "ontouchstart",
    "onkeydown",
    "contenteditable",
];

/// ARIA roles that indicate interactivity.
const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "checkbox",
    "radio",
    "textbox",
    "combobox",
    "listbox",
    "option",
    "menuitem",
    "tab",
    "switch",
    "slider",
    "spinbutton",
    "searchbox",
    "gridcell",
    "treeitem",
];

pub const DEFAULT_TEST_ID_ATTRIBUTES: &[&str] =
    &["data-testid", "data-test-id", "data-test", "data-qa", "data-cy"];

pub fn is_interactive(element: &ElementData) -> bool {
    if INTERACTIVE_TAGS.contains(&element.tag.as_str()) {
        return true;
    }
    if HANDLER_ATTRIBUTES
        .iter()
        .any(|attr| element.has_attr(attr))
    {
        return true;
    }
    if element
        .attr("tabindex")
        .and_then(|value| value.trim().parse::<i32>().ok())
        .is_some_and(|index| index >= 0)
    {
        return true;
    }
    element.attr("role").is_some_and(|role| {
        role.split_whitespace()
            .any(|token| INTERACTIVE_ROLES.contains(&token.to_ascii_lowercase().as_str()))
    })
}

/// First test-id attribute present on the element, as `(attribute, value)`.
pub fn test_id<'a, S: AsRef<str>>(
    element: &'a ElementData,
    attributes: &[S],
) -> Option<(&'a str, &'a str)> {
    attributes.iter().find_map(|wanted| {
        element
            .attrs
            .iter()
            .find(|(key, value)| key == wanted.as_ref() && !value.trim().is_empty())
            .map(|(key, value)| (key.as_str(), value.as_str()))
    })
}

/// Explicit `role`, falling back to the implicit role of common controls.
pub fn role(element: &ElementData) -> Option<String> {
    if let Some(explicit) = element.attr("role") {
        if let Some(first) = explicit.split_whitespace().next() {
            return Some(first.to_ascii_lowercase());
        }
    }
    let implicit = match element.tag.as_str() {
        "button" | "summary" => "button",
        "a" if element.has_attr("href") => "link",
        "select" => "combobox",
        "textarea" => "textbox",
        "option" => "option",
        "input" => match element.attr("type").unwrap_or("text").to_ascii_lowercase().as_str() {
            "checkbox" => "checkbox",
            "radio" => "radio",
            "submit" | "button" | "reset" | "image" => "button",
            "range" => "slider",
            "number" => "spinbutton",
            "search" => "searchbox",
            "hidden" => return None,
            _ => "textbox",
        },
        _ => return None,
    };
    Some(implicit.to_string())
}
