//! Subscription filter evaluation: decides which events reach which
//! subscriptions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::differ::canonical_string;
use crate::models::EventType;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("parsing filters: {0}")]
    ParseFilters(#[source] serde_json::Error),
    #[error("parsing event payload: {0}")]
    ParsePayload(#[source] serde_json::Error),
}

/// A single filter condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Condition operator. Unrecognized operators never match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Changed,
    Increased,
    Decreased,
    Eq,
    #[serde(other)]
    Unknown,
}

/// AND-composed filter conditions. No conditions means match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Parse a subscription's filters column.
pub fn parse_filters(raw: &str) -> Result<Filters, FilterError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "{}" || trimmed == "null" {
        return Ok(Filters::default());
    }
    serde_json::from_str(trimmed).map_err(FilterError::ParseFilters)
}

#[derive(Debug, Deserialize)]
struct PayloadChange {
    field: String,
    #[serde(default)]
    old: Value,
    #[serde(default)]
    new: Value,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    changes: Vec<PayloadChange>,
    #[serde(default)]
    entity: serde_json::Map<String, Value>,
}

/// Evaluate whether an event matches the filters. All conditions must hold;
/// `entity_disappeared` events match unconditionally.
pub fn matches(
    event_type: EventType,
    payload: &str,
    filters: &Filters,
) -> Result<bool, FilterError> {
    if filters.conditions.is_empty() {
        return Ok(true);
    }
    if event_type == EventType::EntityDisappeared {
        return Ok(true);
    }

    let payload: Payload = serde_json::from_str(payload).map_err(FilterError::ParsePayload)?;

    for condition in &filters.conditions {
        let ok = match event_type {
            EventType::EntityChanged => changed_condition_matches(&payload, condition),
            EventType::EntityAppeared => appeared_condition_matches(&payload, condition),
            EventType::EntityDisappeared => true,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Match a condition against `payload.changes[]`: the first entry for the
/// condition's field decides; a field absent from the changes fails.
fn changed_condition_matches(payload: &Payload, condition: &Condition) -> bool {
    for change in &payload.changes {
        if change.field != condition.field {
            continue;
        }
        return match condition.operator {
            Operator::Changed => true,
            Operator::Increased => numeric_cmp(&change.old, &change.new, |old, new| new > old),
            Operator::Decreased => numeric_cmp(&change.old, &change.new, |old, new| new < old),
            Operator::Eq => value_equals(&change.new, condition.value.as_ref()),
            Operator::Unknown => false,
        };
    }
    false
}

/// Match a condition against a new entity. Direction operators pass
/// vacuously (there is no prior value); `eq` checks the entity field.
fn appeared_condition_matches(payload: &Payload, condition: &Condition) -> bool {
    match condition.operator {
        Operator::Changed | Operator::Increased | Operator::Decreased => true,
        Operator::Eq => match payload.entity.get(&condition.field) {
            Some(field_val) => value_equals(field_val, condition.value.as_ref()),
            None => false,
        },
        Operator::Unknown => false,
    }
}

fn numeric_cmp(old: &Value, new: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (to_f64(old), to_f64(new)) {
        (Some(old), Some(new)) => cmp(old, new),
        _ => false,
    }
}

/// Numeric coercion for filter comparisons: JSON numbers plus strings that
/// parse as decimals.
fn to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn value_equals(a: &Value, b: Option<&Value>) -> bool {
    let b = b.unwrap_or(&Value::Null);
    canonical_string(a) == canonical_string(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn condition(field: &str, operator: Operator, value: Option<Value>) -> Condition {
        Condition {
            field: field.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn empty_conditions_always_match() {
        let filters = Filters::default();
        assert!(matches(EventType::EntityChanged, "{}", &filters).unwrap());
    }

    #[test]
    fn disappeared_ignores_conditions() {
        let filters = Filters {
            conditions: vec![condition("price", Operator::Increased, None)],
        };
        let payload = r#"{"entity":{"external_id":"abc"}}"#;
        assert!(matches(EventType::EntityDisappeared, payload, &filters).unwrap());
    }

    #[test]
    fn decreased_matches_price_drop() {
        let filters = Filters {
            conditions: vec![condition("price", Operator::Decreased, None)],
        };
        let payload = r#"{"changes":[{"field":"price","old":100,"new":90}],"entity":{}}"#;
        assert!(matches(EventType::EntityChanged, payload, &filters).unwrap());

        let up = r#"{"changes":[{"field":"price","old":90,"new":100}],"entity":{}}"#;
        assert!(!matches(EventType::EntityChanged, up, &filters).unwrap());
    }

    #[test]
    fn and_semantics_fail_on_absent_field() {
        // Second condition's field is absent from changes, so the whole
        // filter set fails even though the first condition matches.
        let filters = Filters {
            conditions: vec![
                condition("price", Operator::Decreased, None),
                condition("availability", Operator::Eq, Some(json!("in_stock"))),
            ],
        };
        let payload = r#"{"changes":[{"field":"price","old":100,"new":90}],"entity":{}}"#;
        assert!(!matches(EventType::EntityChanged, payload, &filters).unwrap());
    }

    #[test]
    fn eq_compares_canonical_strings() {
        let filters = Filters {
            conditions: vec![condition("price", Operator::Eq, Some(json!("90")))],
        };
        let payload = r#"{"changes":[{"field":"price","old":100,"new":90}],"entity":{}}"#;
        assert!(matches(EventType::EntityChanged, payload, &filters).unwrap());
    }

    #[test]
    fn numeric_coercion_accepts_strings() {
        let filters = Filters {
            conditions: vec![condition("price", Operator::Increased, None)],
        };
        let payload = r#"{"changes":[{"field":"price","old":"99.5","new":"100"}],"entity":{}}"#;
        assert!(matches(EventType::EntityChanged, payload, &filters).unwrap());

        let garbage = r#"{"changes":[{"field":"price","old":"n/a","new":"100"}],"entity":{}}"#;
        assert!(!matches(EventType::EntityChanged, garbage, &filters).unwrap());
    }

    #[test]
    fn appeared_direction_operators_pass_vacuously() {
        let filters = Filters {
            conditions: vec![
                condition("price", Operator::Increased, None),
                condition("price", Operator::Changed, None),
            ],
        };
        let payload = r#"{"entity":{"name":"Widget","price":100}}"#;
        assert!(matches(EventType::EntityAppeared, payload, &filters).unwrap());
    }

    #[test]
    fn appeared_eq_checks_entity_field() {
        let filters = Filters {
            conditions: vec![condition("availability", Operator::Eq, Some(json!("in_stock")))],
        };
        let matching = r#"{"entity":{"availability":"in_stock"}}"#;
        assert!(matches(EventType::EntityAppeared, matching, &filters).unwrap());

        let other = r#"{"entity":{"availability":"out_of_stock"}}"#;
        assert!(!matches(EventType::EntityAppeared, other, &filters).unwrap());

        let absent = r#"{"entity":{"name":"Widget"}}"#;
        assert!(!matches(EventType::EntityAppeared, absent, &filters).unwrap());
    }

    #[test]
    fn unknown_operator_never_matches() {
        let filters: Filters =
            serde_json::from_str(r#"{"conditions":[{"field":"price","operator":"between"}]}"#)
                .unwrap();
        let payload = r#"{"changes":[{"field":"price","old":1,"new":2}],"entity":{}}"#;
        assert!(!matches(EventType::EntityChanged, payload, &filters).unwrap());
    }

    #[test]
    fn parse_filters_tolerates_empty_shapes() {
        assert!(parse_filters("").unwrap().conditions.is_empty());
        assert!(parse_filters("{}").unwrap().conditions.is_empty());
        assert!(parse_filters("null").unwrap().conditions.is_empty());
        assert!(parse_filters("not json").is_err());

        let parsed = parse_filters(
            r#"{"conditions":[{"field":"price","operator":"decreased"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.conditions.len(), 1);
        assert_eq!(parsed.conditions[0].operator, Operator::Decreased);
    }
}
