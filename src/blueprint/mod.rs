//! Blueprint: the extraction rule set that turns a page into entities.
//!
//! A blueprint pairs a container XPath (selecting the repeating nodes that
//! represent entities) with per-field mappings (relative XPath, target type,
//! attribute selector, optional post-processing expression). The cleaner
//! normalizes raw HTML into a stable form first; the extractor applies the
//! rules to the cleaned document.

pub mod authoring;
pub mod catalog;
pub mod cleaner;
pub mod expr;
pub mod extractor;
pub mod xpath;

pub use catalog::{get_schema, EntitySchema, FieldDef};
pub use cleaner::clean;
pub use extractor::{extract, ExtractError};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Target type a field value is coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
}

/// How to extract a single field value from a container node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    /// XPath relative to the container node (a leading `//` is still scoped
    /// to the container).
    pub xpath: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// `text`, `html`, or an attribute name. Defaults to `text`.
    #[serde(default = "default_attribute")]
    pub attribute: String,
    /// Optional post-processing expression; the raw extracted string is
    /// bound to `value`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

fn default_attribute() -> String {
    "text".to_string()
}

/// How to extract entities from a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRules {
    /// Absolute XPath matching every entity container on the page.
    pub container: String,
    pub fields: HashMap<String, FieldMapping>,
}
