//! HTML cleaner: normalizes raw fetched HTML into a compact, stable form
//! suitable for XPath extraction and rule authoring.
//!
//! The cleaner is pure and idempotent. Stage ordering matters: framework
//! stripping runs before the attribute whitelist, hidden-content removal
//! runs after pruning (class survives the whitelist), and whitespace
//! normalization runs before redundancy removal so the empty-check sees
//! trimmed text.

use scraper::{Html, Node};

use crate::utils::html::html_escape;

/// Attributes retained by the whitelist stage.
const KEPT_ATTRIBUTES: &[&str] = &[
    "id", "class", "href", "src", "alt", "type", "name", "value", "itemprop", "itemtype",
    "itemscope",
];

/// Attribute name prefixes injected by frontend frameworks and test tooling.
const FRAMEWORK_PREFIXES: &[&str] = &[
    "data-react",
    "data-reactid",
    "data-reactroot",
    "data-vue",
    "data-v-",
    "ng-",
    "data-ng-",
    "data-testid",
    "data-test",
    "data-qa",
    "data-gtm",
    "data-analytics",
    "data-tracking",
];

/// Class tokens that indicate visually hidden content.
const HIDDEN_CLASSES: &[&str] = &["hidden", "invisible", "d-none", "hide", "sr-only"];

/// Elements serialized without a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// A detached, mutable DOM node lifted out of the parsed document.
enum CleanNode {
    Element {
        name: String,
        attrs: Vec<(String, String)>,
        children: Vec<CleanNode>,
    },
    Text(String),
}

/// Clean raw HTML. Output is an indented document whose shape is stable
/// under repeated cleaning.
pub fn clean(raw_html: &str) -> String {
    let doc = Html::parse_document(raw_html);
    let mut nodes = lift_children(doc.tree.root());

    remove_framework_bloat(&mut nodes);
    prune_attributes(&mut nodes);
    remove_hidden_content(&mut nodes);
    normalize_whitespace(&mut nodes);
    remove_redundant_elements(&mut nodes);
    remove_svg_content(&mut nodes);

    let mut out = String::new();
    serialize(&nodes, 0, false, &mut out);
    out
}

fn lift_children(node: ego_tree::NodeRef<'_, Node>) -> Vec<CleanNode> {
    let mut out = Vec::new();
    for child in node.children() {
        match child.value() {
            Node::Element(el) => out.push(CleanNode::Element {
                name: el.name().to_ascii_lowercase(),
                attrs: el
                    .attrs()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                children: lift_children(child),
            }),
            Node::Text(t) => out.push(CleanNode::Text(t.to_string())),
            // Comments, doctypes, and processing instructions are dropped.
            _ => {}
        }
    }
    out
}

fn get_attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

fn remove_framework_bloat(nodes: &mut Vec<CleanNode>) {
    nodes.retain_mut(|node| {
        if let CleanNode::Element {
            name,
            attrs,
            children,
        } = node
        {
            match name.as_str() {
                "style" | "link" | "meta" | "noscript" => return false,
                "script" => {
                    let script_type = get_attr(attrs, "type").unwrap_or("");
                    if script_type != "application/ld+json" && script_type != "application/json" {
                        return false;
                    }
                }
                _ => {}
            }

            attrs.retain(|(key, _)| {
                let lower = key.to_ascii_lowercase();
                !FRAMEWORK_PREFIXES.iter().any(|p| lower.starts_with(p))
            });

            remove_framework_bloat(children);
        }
        true
    });
}

fn prune_attributes(nodes: &mut [CleanNode]) {
    for node in nodes {
        if let CleanNode::Element {
            attrs, children, ..
        } = node
        {
            attrs.retain(|(key, _)| {
                KEPT_ATTRIBUTES.contains(&key.to_ascii_lowercase().as_str())
            });
            prune_attributes(children);
        }
    }
}

fn remove_hidden_content(nodes: &mut Vec<CleanNode>) {
    nodes.retain_mut(|node| {
        if let CleanNode::Element {
            name,
            attrs,
            children,
        } = node
        {
            if name == "template" {
                return false;
            }
            if get_attr(attrs, "hidden").is_some() {
                return false;
            }

            let class = get_attr(attrs, "class").unwrap_or("").to_ascii_lowercase();
            if HIDDEN_CLASSES.iter().any(|hc| class.contains(hc)) {
                return false;
            }

            let style = get_attr(attrs, "style").unwrap_or("").to_ascii_lowercase();
            if style.contains("display:none")
                || style.contains("display: none")
                || style.contains("visibility:hidden")
                || style.contains("visibility: hidden")
            {
                return false;
            }

            remove_hidden_content(children);
        }
        true
    });
}

fn normalize_whitespace(nodes: &mut [CleanNode]) {
    for node in nodes {
        match node {
            CleanNode::Text(text) => {
                *text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            }
            CleanNode::Element { children, .. } => normalize_whitespace(children),
        }
    }
}

/// Remove attribute-less `<div>`/`<span>` with no content. Children are
/// processed first so nested empty wrappers collapse in a single pass,
/// which keeps the cleaner idempotent.
fn remove_redundant_elements(nodes: &mut Vec<CleanNode>) {
    nodes.retain_mut(|node| {
        if let CleanNode::Element {
            name,
            attrs,
            children,
        } = node
        {
            remove_redundant_elements(children);
            if (name == "div" || name == "span") && attrs.is_empty() && is_empty(children) {
                return false;
            }
        }
        true
    });
}

fn is_empty(children: &[CleanNode]) -> bool {
    children.iter().all(|child| match child {
        CleanNode::Element { .. } => false,
        CleanNode::Text(text) => text.trim().is_empty(),
    })
}

fn remove_svg_content(nodes: &mut Vec<CleanNode>) {
    nodes.retain_mut(|node| {
        if let CleanNode::Element { name, children, .. } = node {
            if name == "svg" {
                return false;
            }
            remove_svg_content(children);
        }
        true
    });
}

fn serialize(nodes: &[CleanNode], depth: usize, raw_text: bool, out: &mut String) {
    for node in nodes {
        match node {
            CleanNode::Text(text) => {
                if text.trim().is_empty() {
                    continue;
                }
                push_indent(depth, out);
                // Script contents are raw text; escaping them would corrupt
                // embedded JSON on the next parse.
                if raw_text {
                    out.push_str(text);
                } else {
                    out.push_str(&html_escape(text));
                }
                out.push('\n');
            }
            CleanNode::Element {
                name,
                attrs,
                children,
            } => {
                push_indent(depth, out);
                out.push('<');
                out.push_str(name);
                for (key, value) in attrs {
                    out.push(' ');
                    out.push_str(key);
                    out.push_str("=\"");
                    out.push_str(&html_escape(value));
                    out.push('"');
                }

                if VOID_ELEMENTS.contains(&name.as_str()) {
                    out.push_str("/>\n");
                } else if children.is_empty() {
                    out.push_str("></");
                    out.push_str(name);
                    out.push_str(">\n");
                } else {
                    out.push_str(">\n");
                    serialize(children, depth + 1, name == "script", out);
                    push_indent(depth, out);
                    out.push_str("</");
                    out.push_str(name);
                    out.push_str(">\n");
                }
            }
        }
    }
}

fn push_indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}
