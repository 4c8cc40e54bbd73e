//! Compares extracted entities against stored entities, keyed by external id.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

/// Entity content as a JSON object of field values.
pub type EntityContent = Map<String, Value>;

/// A change to a single field. A field present on only one side carries
/// `null` for the other.
#[derive(Debug, Clone, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Value,
    pub new: Value,
}

/// One entity's diff outcome.
#[derive(Debug, Clone)]
pub struct EntityDiff {
    pub external_id: String,
    pub changes: Vec<FieldChange>,
    /// Full content for appeared entities, new content for changed ones;
    /// empty for disappeared.
    pub content: EntityContent,
}

/// The complete result of one diff.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub appeared: Vec<EntityDiff>,
    pub changed: Vec<EntityDiff>,
    pub disappeared: Vec<EntityDiff>,
    pub unchanged: usize,
}

/// Partition external ids into appeared / changed / disappeared / unchanged.
pub fn diff(
    extracted: &BTreeMap<String, EntityContent>,
    stored: &BTreeMap<String, EntityContent>,
) -> DiffResult {
    let mut result = DiffResult::default();

    for (eid, extracted_content) in extracted {
        match stored.get(eid) {
            None => result.appeared.push(EntityDiff {
                external_id: eid.clone(),
                changes: Vec::new(),
                content: extracted_content.clone(),
            }),
            Some(stored_content) => {
                let changes = diff_fields(stored_content, extracted_content);
                if changes.is_empty() {
                    result.unchanged += 1;
                } else {
                    result.changed.push(EntityDiff {
                        external_id: eid.clone(),
                        changes,
                        content: extracted_content.clone(),
                    });
                }
            }
        }
    }

    for eid in stored.keys() {
        if !extracted.contains_key(eid) {
            result.disappeared.push(EntityDiff {
                external_id: eid.clone(),
                changes: Vec::new(),
                content: EntityContent::new(),
            });
        }
    }

    result
}

/// Field-by-field comparison of two entity contents.
fn diff_fields(old: &EntityContent, new: &EntityContent) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    for (field, new_val) in new {
        match old.get(field) {
            None => changes.push(FieldChange {
                field: field.clone(),
                old: Value::Null,
                new: new_val.clone(),
            }),
            Some(old_val) => {
                if !values_equal(old_val, new_val) {
                    changes.push(FieldChange {
                        field: field.clone(),
                        old: old_val.clone(),
                        new: new_val.clone(),
                    });
                }
            }
        }
    }

    for (field, old_val) in old {
        if !new.contains_key(field) {
            changes.push(FieldChange {
                field: field.clone(),
                old: old_val.clone(),
                new: Value::Null,
            });
        }
    }

    changes
}

/// Compare two field values.
///
/// Nulls are equal only to each other; strings compare trimmed and
/// case-sensitive; numbers compare exactly as f64; everything else falls
/// back to canonical-string comparison. This is the single place variant
/// values are compared.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(a), Value::String(b)) => a.trim() == b.trim(),
        _ => match (as_number(a), as_number(b)) {
            (Some(a), Some(b)) => a == b,
            _ => canonical_string(a) == canonical_string(b),
        },
    }
}

/// A value's numeric reading, if it has one. Strings are not numbers here;
/// the filter evaluator has its own, looser coercion.
pub fn as_number(v: &Value) -> Option<f64> {
    v.as_f64()
}

/// Canonical string form of a value: bare text for strings, shortest
/// round-trip formatting for numbers, JSON text otherwise.
pub fn canonical_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
