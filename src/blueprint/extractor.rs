//! Applies extraction rules to cleaned HTML, producing typed entity records.

use std::collections::HashMap;

use ego_tree::NodeRef;
use scraper::{ElementRef, Html, Node};
use serde_json::{Map, Number, Value};
use thiserror::Error;

use super::expr::{self, extract_integer_string, extract_numeric_string, Program};
use super::xpath::{XPath, XPathError};
use super::{ExtractionRules, FieldMapping, FieldType};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid container xpath: {0}")]
    Container(#[source] XPathError),
    #[error("compiling expression for field {field:?}: {source}")]
    Expression {
        field: String,
        #[source]
        source: expr::ExprError,
    },
}

/// Extract entities from HTML. Containers are visited in document order; a
/// container that yields no fields is dropped. Field-level problems (no
/// match, bad field XPath, failed coercion) skip that field only.
///
/// Expressions are compiled once here and reused across every container;
/// a malformed expression fails the whole extraction.
pub fn extract(
    html: &str,
    rules: &ExtractionRules,
) -> Result<Vec<Map<String, Value>>, ExtractError> {
    let container = XPath::compile(&rules.container).map_err(ExtractError::Container)?;

    let mut programs: HashMap<&str, Program> = HashMap::new();
    for (name, mapping) in &rules.fields {
        if let Some(src) = &mapping.expression {
            let program = Program::compile(src).map_err(|source| ExtractError::Expression {
                field: name.clone(),
                source,
            })?;
            programs.insert(name.as_str(), program);
        }
    }

    let mut field_paths: HashMap<&str, XPath> = HashMap::new();
    for (name, mapping) in &rules.fields {
        match XPath::compile(&mapping.xpath) {
            Ok(xp) => {
                field_paths.insert(name.as_str(), xp);
            }
            Err(err) => {
                tracing::warn!(field = %name, error = %err, "skipping field with invalid xpath");
            }
        }
    }

    let doc = Html::parse_document(html);
    let mut entities = Vec::new();

    for node in container.select_all(&doc) {
        let mut entity = Map::new();
        for (name, mapping) in &rules.fields {
            let Some(xp) = field_paths.get(name.as_str()) else {
                continue;
            };
            match extract_field(node, mapping, xp, programs.get(name.as_str())) {
                Ok(value) => {
                    entity.insert(name.clone(), value);
                }
                Err(reason) => {
                    tracing::debug!(field = %name, %reason, "field skipped");
                }
            }
        }
        if !entity.is_empty() {
            entities.push(entity);
        }
    }

    Ok(entities)
}

fn extract_field(
    container: NodeRef<'_, Node>,
    mapping: &FieldMapping,
    xpath: &XPath,
    program: Option<&Program>,
) -> Result<Value, String> {
    let raw = extract_raw_value(container, mapping, xpath)?;

    if let Some(program) = program {
        let result = program.eval(&raw).map_err(|e| e.to_string())?;
        return coerce_result(result, mapping.field_type);
    }

    match mapping.field_type {
        FieldType::Integer => {
            let digits = extract_integer_string(&raw);
            if digits.is_empty() {
                return Ok(Value::from(0i64));
            }
            digits
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| format!("parsing integer from {raw:?}: {e}"))
        }
        FieldType::Number => {
            let digits = extract_numeric_string(&raw);
            if digits.is_empty() {
                return Ok(float_value(0.0)?);
            }
            let parsed = digits
                .parse::<f64>()
                .map_err(|e| format!("parsing number from {raw:?}: {e}"))?;
            float_value(parsed)
        }
        FieldType::String => Ok(Value::from(raw.trim())),
    }
}

/// Pull the raw string from the first node the field XPath matches within
/// the container. Missing attribute values yield an empty string.
fn extract_raw_value(
    container: NodeRef<'_, Node>,
    mapping: &FieldMapping,
    xpath: &XPath,
) -> Result<String, String> {
    let node = xpath
        .select_first_from(container)
        .ok_or_else(|| format!("xpath {:?} matched nothing", mapping.xpath))?;

    match mapping.attribute.as_str() {
        "" | "text" => Ok(inner_text(node)),
        "html" => Ok(ElementRef::wrap(node)
            .map(|el| el.inner_html())
            .unwrap_or_default()),
        attr => Ok(attr_string(node, attr)),
    }
}

fn inner_text(node: NodeRef<'_, Node>) -> String {
    ElementRef::wrap(node)
        .map(|el| el.text().collect::<String>())
        .unwrap_or_default()
}

fn attr_string(node: NodeRef<'_, Node>, name: &str) -> String {
    match node.value() {
        Node::Element(el) => el.attr(name).unwrap_or_default().to_string(),
        _ => String::new(),
    }
}

/// Coerce an expression result to the declared field type.
fn coerce_result(result: expr::Value, target: FieldType) -> Result<Value, String> {
    match target {
        FieldType::Integer => match result {
            expr::Value::Int(i) => Ok(Value::from(i)),
            expr::Value::Float(f) => Ok(Value::from(f.trunc() as i64)),
            expr::Value::Str(s) => s
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| format!("coercing {s:?} to integer: {e}")),
            expr::Value::Bool(_) => Err("cannot coerce bool to integer".to_string()),
        },
        FieldType::Number => match result {
            expr::Value::Float(f) => float_value(f),
            expr::Value::Int(i) => float_value(i as f64),
            expr::Value::Str(s) => {
                let parsed = s
                    .parse::<f64>()
                    .map_err(|e| format!("coercing {s:?} to number: {e}"))?;
                float_value(parsed)
            }
            expr::Value::Bool(_) => Err("cannot coerce bool to number".to_string()),
        },
        FieldType::String => Ok(Value::from(result.canonical_string())),
    }
}

fn float_value(f: f64) -> Result<Value, String> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| format!("non-finite number {f}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::FieldMapping;

    fn rules(container: &str, fields: Vec<(&str, FieldMapping)>) -> ExtractionRules {
        ExtractionRules {
            container: container.to_string(),
            fields: fields
                .into_iter()
                .map(|(name, mapping)| (name.to_string(), mapping))
                .collect(),
        }
    }

    fn mapping(xpath: &str, field_type: FieldType) -> FieldMapping {
        FieldMapping {
            xpath: xpath.to_string(),
            field_type,
            attribute: "text".to_string(),
            expression: None,
        }
    }

    #[test]
    fn default_numeric_extraction() {
        let html = "<div class='product'><span class='price'>$29.99</span></div>";
        let rules = rules(
            "//div[@class='product']",
            vec![("price", mapping(".//span[@class='price']", FieldType::Number))],
        );

        let entities = extract(html, &rules).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0]["price"], serde_json::json!(29.99));
    }

    #[test]
    fn european_decimal_via_expression() {
        let html = "<div class='product'><span class='price'>29,99</span></div>";
        let mut price = mapping(".//span[@class='price']", FieldType::Integer);
        price.expression =
            Some("int(extractNumber(replace(value, ',', '.')) * 100)".to_string());
        let rules = rules("//div[@class='product']", vec![("price", price)]);

        let entities = extract(html, &rules).unwrap();
        assert_eq!(entities[0]["price"], serde_json::json!(2999));
    }

    #[test]
    fn conditional_availability_expression() {
        let html = "<div class='product'><span class='stock'>In Stock</span></div>";
        let mut stock = mapping(".//span[@class='stock']", FieldType::String);
        stock.expression =
            Some("value contains 'In Stock' ? 'in_stock' : 'out_of_stock'".to_string());
        let rules = rules("//div[@class='product']", vec![("availability", stock)]);

        let entities = extract(html, &rules).unwrap();
        assert_eq!(entities[0]["availability"], serde_json::json!("in_stock"));
    }

    #[test]
    fn attribute_selector_and_missing_attribute() {
        let html = "<div class='product'><img src='/w.png'/><a>link</a></div>";
        let mut image = mapping(".//img", FieldType::String);
        image.attribute = "src".to_string();
        let mut href = mapping(".//a", FieldType::String);
        href.attribute = "href".to_string();
        let rules = rules(
            "//div[@class='product']",
            vec![("image_url", image), ("url", href)],
        );

        let entities = extract(html, &rules).unwrap();
        assert_eq!(entities[0]["image_url"], serde_json::json!("/w.png"));
        // Absent attribute extracts as an empty string, not a skip.
        assert_eq!(entities[0]["url"], serde_json::json!(""));
    }

    #[test]
    fn missing_field_is_skipped_not_null() {
        let html = "<div class='product'><span class='name'>Widget</span></div>";
        let rules = rules(
            "//div[@class='product']",
            vec![
                ("name", mapping(".//span[@class='name']", FieldType::String)),
                ("price", mapping(".//span[@class='price']", FieldType::Number)),
            ],
        );

        let entities = extract(html, &rules).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0]["name"], serde_json::json!("Widget"));
        assert!(!entities[0].contains_key("price"));
    }

    #[test]
    fn containers_with_no_fields_are_dropped() {
        let html = "<div class='product'><span class='name'>A</span></div><div class='product'></div>";
        let rules = rules(
            "//div[@class='product']",
            vec![("name", mapping(".//span[@class='name']", FieldType::String))],
        );

        let entities = extract(html, &rules).unwrap();
        assert_eq!(entities.len(), 1);
    }

    #[test]
    fn empty_numeric_text_defaults_to_zero() {
        let html = "<div class='product'><span class='price'>TBD</span><span class='count'>n/a</span></div>";
        let rules = rules(
            "//div[@class='product']",
            vec![
                ("price", mapping(".//span[@class='price']", FieldType::Number)),
                (
                    "review_count",
                    mapping(".//span[@class='count']", FieldType::Integer),
                ),
            ],
        );

        let entities = extract(html, &rules).unwrap();
        assert_eq!(entities[0]["price"], serde_json::json!(0.0));
        assert_eq!(entities[0]["review_count"], serde_json::json!(0));
    }

    #[test]
    fn malformed_expression_fails_extraction() {
        let html = "<div class='product'><span>1</span></div>";
        let mut field = mapping(".//span", FieldType::Integer);
        field.expression = Some("frobnicate(value)".to_string());
        let rules = rules("//div[@class='product']", vec![("x", field)]);

        assert!(matches!(
            extract(html, &rules),
            Err(ExtractError::Expression { .. })
        ));
    }

    #[test]
    fn malformed_container_fails_extraction() {
        let rules = rules("//div[@class='x'", vec![]);
        assert!(matches!(
            extract("<div></div>", &rules),
            Err(ExtractError::Container(_))
        ));
    }

    #[test]
    fn multiple_containers_in_document_order() {
        let html = "<ul>\
            <li class='row'><span class='name'>A</span></li>\
            <li class='row'><span class='name'>B</span></li>\
            <li class='row'><span class='name'>C</span></li>\
            </ul>";
        let rules = rules(
            "//li[@class='row']",
            vec![("name", mapping(".//span[@class='name']", FieldType::String))],
        );

        let names: Vec<String> = extract(html, &rules)
            .unwrap()
            .into_iter()
            .map(|e| e["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }
}
