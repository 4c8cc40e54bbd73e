//! Built-in entity schemas that rule authoring can target.

use serde::{Deserialize, Serialize};

/// Expected shape of extracted entities for one schema type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub fields: Vec<FieldDef>,
}

/// A single field in an entity schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub description: String,
}

fn field(name: &str, field_type: &str, description: &str) -> FieldDef {
    FieldDef {
        name: name.to_string(),
        field_type: field_type.to_string(),
        description: description.to_string(),
    }
}

/// Look up a built-in schema by its type tag.
pub fn get_schema(schema_type: &str) -> Option<EntitySchema> {
    match schema_type {
        "ecommerce_product" => Some(EntitySchema {
            schema_type: "ecommerce_product".to_string(),
            fields: vec![
                field("name", "string", "Product name/title"),
                field("price", "integer", "Price in cents"),
                field("currency", "string", "ISO currency code (e.g. EUR)"),
                field("seller", "string", "Seller/merchant name"),
                field("image_url", "string", "Product image URL"),
                field("rating", "number", "Average rating (0-5)"),
                field("review_count", "integer", "Number of reviews"),
                field(
                    "availability",
                    "string",
                    "Stock status (in_stock, out_of_stock, etc.)",
                ),
            ],
        }),
        _ => None,
    }
}
