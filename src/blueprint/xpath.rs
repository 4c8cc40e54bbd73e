//! A small XPath engine over parsed HTML, covering the location-path subset
//! that extraction rules use: `/` and `//` steps, `*` and name tests, the
//! `following-sibling::` axis, attribute predicates (`[@a='v']`, `[@a]`,
//! `[contains(@a, 'v')]`), and 1-based positional predicates (`[n]`).
//!
//! Evaluation is always relative to the nodes it is given: a field path with
//! a leading `//` is scoped to its container node, and container paths are
//! evaluated from the document root.

use std::collections::HashSet;

use ego_tree::NodeRef;
use scraper::{Html, Node};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid xpath {expr:?}: {message}")]
pub struct XPathError {
    pub expr: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    FollowingSibling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    Name(String),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    AttrEq(String, String),
    AttrContains(String, String),
    HasAttr(String),
    Index(usize),
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

/// A compiled location path.
#[derive(Debug, Clone)]
pub struct XPath {
    steps: Vec<Step>,
}

impl XPath {
    /// Parse a location path. Compile once and evaluate per node set.
    pub fn compile(expr: &str) -> Result<Self, XPathError> {
        Parser::new(expr).parse()
    }

    /// All matches starting from the document root, in document order.
    pub fn select_all<'a>(&self, doc: &'a Html) -> Vec<NodeRef<'a, Node>> {
        self.select_from(doc.tree.root())
    }

    /// All matches relative to a context node, in document order.
    pub fn select_from<'a>(&self, context: NodeRef<'a, Node>) -> Vec<NodeRef<'a, Node>> {
        let mut current = vec![context];
        for step in &self.steps {
            let mut next = Vec::new();
            let mut seen = HashSet::new();
            for node in &current {
                for matched in eval_step(*node, step) {
                    if seen.insert(matched.id()) {
                        next.push(matched);
                    }
                }
            }
            current = next;
        }
        current
    }

    /// The first match relative to a context node, if any.
    pub fn select_first_from<'a>(
        &self,
        context: NodeRef<'a, Node>,
    ) -> Option<NodeRef<'a, Node>> {
        // Steps short-circuit poorly in the general case; the node sets
        // involved are small enough that full evaluation is fine.
        self.select_from(context).into_iter().next()
    }
}

fn eval_step<'a>(node: NodeRef<'a, Node>, step: &Step) -> Vec<NodeRef<'a, Node>> {
    let mut candidates = Vec::new();
    match step.axis {
        Axis::Child => {
            for child in node.children() {
                if element_matches(child, &step.test) {
                    candidates.push(child);
                }
            }
        }
        Axis::Descendant => collect_descendants(node, &step.test, &mut candidates),
        Axis::FollowingSibling => {
            let mut sibling = node.next_sibling();
            while let Some(s) = sibling {
                if element_matches(s, &step.test) {
                    candidates.push(s);
                }
                sibling = s.next_sibling();
            }
        }
    }

    for predicate in &step.predicates {
        candidates = apply_predicate(candidates, predicate);
    }
    candidates
}

fn collect_descendants<'a>(
    node: NodeRef<'a, Node>,
    test: &NodeTest,
    out: &mut Vec<NodeRef<'a, Node>>,
) {
    for child in node.children() {
        if element_matches(child, test) {
            out.push(child);
        }
        collect_descendants(child, test, out);
    }
}

fn element_matches(node: NodeRef<'_, Node>, test: &NodeTest) -> bool {
    match node.value() {
        Node::Element(el) => match test {
            NodeTest::Wildcard => true,
            NodeTest::Name(name) => el.name().eq_ignore_ascii_case(name),
        },
        _ => false,
    }
}

fn apply_predicate<'a>(
    candidates: Vec<NodeRef<'a, Node>>,
    predicate: &Predicate,
) -> Vec<NodeRef<'a, Node>> {
    match predicate {
        Predicate::Index(n) => {
            // Positions are 1-based.
            candidates.into_iter().nth(n.saturating_sub(1)).into_iter().collect()
        }
        Predicate::HasAttr(name) => candidates
            .into_iter()
            .filter(|c| attr_value(*c, name).is_some())
            .collect(),
        Predicate::AttrEq(name, value) => candidates
            .into_iter()
            .filter(|c| attr_value(*c, name) == Some(value.as_str()))
            .collect(),
        Predicate::AttrContains(name, value) => candidates
            .into_iter()
            .filter(|c| attr_value(*c, name).is_some_and(|v| v.contains(value.as_str())))
            .collect(),
    }
}

fn attr_value<'a>(node: NodeRef<'a, Node>, name: &str) -> Option<&'a str> {
    match node.value() {
        Node::Element(el) => el.attr(name),
        _ => None,
    }
}

struct Parser<'a> {
    expr: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(expr: &'a str) -> Self {
        Self {
            expr,
            chars: expr.trim().chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> XPathError {
        XPathError {
            expr: self.expr.to_string(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn parse(mut self) -> Result<XPath, XPathError> {
        if self.chars.is_empty() {
            return Err(self.error("empty expression"));
        }

        // Leading `.` marks a relative path; `.` alone selects the context.
        if self.peek() == Some('.') && self.chars.get(self.pos + 1) != Some(&'.') {
            self.pos += 1;
            if self.pos == self.chars.len() {
                return Ok(XPath { steps: Vec::new() });
            }
        }

        let mut steps = Vec::new();
        while self.pos < self.chars.len() {
            let axis = if self.eat('/') {
                if self.eat('/') {
                    Axis::Descendant
                } else {
                    Axis::Child
                }
            } else if steps.is_empty() {
                // Bare `span[...]` is a child step.
                Axis::Child
            } else {
                return Err(self.error(format!("expected '/' at position {}", self.pos)));
            };
            steps.push(self.parse_step(axis)?);
        }

        if steps.is_empty() {
            return Err(self.error("no location steps"));
        }
        Ok(XPath { steps })
    }

    fn parse_step(&mut self, mut axis: Axis) -> Result<Step, XPathError> {
        let test = if self.eat('*') {
            NodeTest::Wildcard
        } else {
            let name = self.parse_name()?;
            if self.peek() == Some(':') && self.chars.get(self.pos + 1) == Some(&':') {
                self.pos += 2;
                axis = match name.as_str() {
                    "following-sibling" => Axis::FollowingSibling,
                    "child" => axis,
                    "descendant" => Axis::Descendant,
                    other => return Err(self.error(format!("unsupported axis {other:?}"))),
                };
                if self.eat('*') {
                    NodeTest::Wildcard
                } else {
                    NodeTest::Name(self.parse_name()?.to_ascii_lowercase())
                }
            } else {
                NodeTest::Name(name.to_ascii_lowercase())
            }
        };

        let mut predicates = Vec::new();
        while self.eat('[') {
            predicates.push(self.parse_predicate()?);
            if !self.eat(']') {
                return Err(self.error("unterminated predicate, expected ']'"));
            }
        }

        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_name(&mut self) -> Result<String, XPathError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error(format!("expected a name at position {}", self.pos)));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_predicate(&mut self) -> Result<Predicate, XPathError> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c.is_ascii_digit() => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
                let digits: String = self.chars[start..self.pos].iter().collect();
                let n = digits
                    .parse::<usize>()
                    .map_err(|_| self.error("position predicate out of range"))?;
                self.skip_ws();
                Ok(Predicate::Index(n))
            }
            Some('@') => {
                self.pos += 1;
                let name = self.parse_name()?.to_ascii_lowercase();
                self.skip_ws();
                if self.eat('=') {
                    self.skip_ws();
                    let value = self.parse_string()?;
                    self.skip_ws();
                    Ok(Predicate::AttrEq(name, value))
                } else {
                    Ok(Predicate::HasAttr(name))
                }
            }
            _ => {
                let func = self.parse_name()?;
                if func != "contains" {
                    return Err(self.error(format!("unsupported predicate function {func:?}")));
                }
                self.skip_ws();
                if !self.eat('(') {
                    return Err(self.error("expected '(' after contains"));
                }
                self.skip_ws();
                if !self.eat('@') {
                    return Err(self.error("contains() expects an attribute argument"));
                }
                let name = self.parse_name()?.to_ascii_lowercase();
                self.skip_ws();
                if !self.eat(',') {
                    return Err(self.error("expected ',' in contains()"));
                }
                self.skip_ws();
                let value = self.parse_string()?;
                self.skip_ws();
                if !self.eat(')') {
                    return Err(self.error("expected ')' to close contains()"));
                }
                self.skip_ws();
                Ok(Predicate::AttrContains(name, value))
            }
        }
    }

    fn parse_string(&mut self) -> Result<String, XPathError> {
        let quote = match self.bump() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("expected a quoted string")),
        };
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == quote {
                let value: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                return Ok(value);
            }
            self.pos += 1;
        }
        Err(self.error("unterminated string literal"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::ElementRef;

    fn text_of(node: NodeRef<'_, Node>) -> String {
        ElementRef::wrap(node)
            .map(|el| el.text().collect::<String>())
            .unwrap_or_default()
    }

    const DOC: &str = r#"<html><body>
        <div class="product featured"><span class="price">$10</span><a href="/p/1">one</a></div>
        <div class="product"><span class="price">$20</span><a href="/p/2">two</a></div>
        <div class="other"><span class="price">$99</span></div>
        <table>
          <tr><td class="label">SKU</td><td>A-1</td><td>A-2</td></tr>
        </table>
        </body></html>"#;

    #[test]
    fn selects_by_exact_class() {
        let doc = Html::parse_document(DOC);
        let xpath = XPath::compile("//div[@class='product']").unwrap();
        let nodes = xpath.select_all(&doc);
        assert_eq!(nodes.len(), 1);
        assert!(text_of(nodes[0]).contains("$20"));
    }

    #[test]
    fn selects_by_class_contains() {
        let doc = Html::parse_document(DOC);
        let xpath = XPath::compile("//div[contains(@class, 'product')]").unwrap();
        assert_eq!(xpath.select_all(&doc).len(), 2);
    }

    #[test]
    fn relative_paths_are_scoped_to_context() {
        let doc = Html::parse_document(DOC);
        let containers = XPath::compile("//div[contains(@class, 'product')]")
            .unwrap()
            .select_all(&doc);
        let price = XPath::compile(".//span[@class='price']").unwrap();

        let texts: Vec<String> = containers
            .iter()
            .map(|c| text_of(price.select_first_from(*c).unwrap()))
            .collect();
        assert_eq!(texts, vec!["$10", "$20"]);
    }

    #[test]
    fn leading_double_slash_is_still_relative() {
        let doc = Html::parse_document(DOC);
        let container = XPath::compile("//div[@class='other']")
            .unwrap()
            .select_all(&doc)[0];
        let span = XPath::compile("//span").unwrap();
        let found = span.select_from(container);
        assert_eq!(found.len(), 1);
        assert_eq!(text_of(found[0]), "$99");
    }

    #[test]
    fn positional_predicate_is_one_based() {
        let doc = Html::parse_document(DOC);
        let xpath = XPath::compile("//div[contains(@class, 'product')][2]").unwrap();
        let nodes = xpath.select_all(&doc);
        assert_eq!(nodes.len(), 1);
        assert!(text_of(nodes[0]).contains("two"));
    }

    #[test]
    fn following_sibling_axis() {
        let doc = Html::parse_document(DOC);
        let label = XPath::compile("//td[@class='label']")
            .unwrap()
            .select_all(&doc)[0];
        let next = XPath::compile("./following-sibling::td[1]").unwrap();
        assert_eq!(text_of(next.select_first_from(label).unwrap()), "A-1");
    }

    #[test]
    fn wildcard_and_attribute_presence() {
        let doc = Html::parse_document(DOC);
        let xpath = XPath::compile("//*[@href]").unwrap();
        assert_eq!(xpath.select_all(&doc).len(), 2);
    }

    #[test]
    fn dot_selects_context_itself() {
        let doc = Html::parse_document(DOC);
        let container = XPath::compile("//div[@class='other']")
            .unwrap()
            .select_all(&doc)[0];
        let this = XPath::compile(".").unwrap();
        let found = this.select_from(container);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), container.id());
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(XPath::compile("").is_err());
        assert!(XPath::compile("//div[@class='x'").is_err());
        assert!(XPath::compile("//div[starts-with(@class, 'x')]").is_err());
        assert!(XPath::compile("//ancestor::div").is_err());
    }
}
