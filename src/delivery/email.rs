//! Builds notification email content from event payloads.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::differ::canonical_string;
use crate::models::EventType;
use crate::utils::html::html_escape;

#[derive(Debug, Error)]
#[error("parsing event payload: {0}")]
pub struct EmailError(#[from] serde_json::Error);

const BODY_STYLE: &str = "font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;";
const CELL_STYLE: &str = "padding: 8px; border: 1px solid #ddd;";
const HEADER_CELL_STYLE: &str = "text-align: left; padding: 8px; border: 1px solid #ddd;";

#[derive(Deserialize, Default)]
struct Payload {
    #[serde(default)]
    changes: Vec<PayloadChange>,
    #[serde(default)]
    entity: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct PayloadChange {
    field: String,
    #[serde(default)]
    old: Value,
    #[serde(default)]
    new: Value,
}

/// Build the subject and HTML body for a delivery.
pub fn build_email_content(
    event_type: &str,
    payload: &str,
    subscription_name: &str,
) -> Result<(String, String), EmailError> {
    let parsed: Payload = serde_json::from_str(payload)?;
    let entity_name = entity_name(&parsed);

    let Some(event_type) = EventType::from_str(event_type) else {
        return Ok((
            format!("[Blueprinter] Event: {event_type}"),
            "<p>Unknown event type</p>".to_string(),
        ));
    };

    Ok(match event_type {
        EventType::EntityChanged => build_changed_email(&parsed, &entity_name, subscription_name),
        EventType::EntityAppeared => build_appeared_email(&parsed, &entity_name, subscription_name),
        EventType::EntityDisappeared => {
            build_disappeared_email(&parsed, &entity_name, subscription_name)
        }
    })
}

/// A display name for the entity: its `name` field when present, otherwise
/// its external id.
fn entity_name(payload: &Payload) -> String {
    if let Some(Value::String(name)) = payload.entity.get("name") {
        return name.clone();
    }
    if let Some(Value::String(eid)) = payload.entity.get("external_id") {
        return eid.clone();
    }
    String::new()
}

fn build_changed_email(
    payload: &Payload,
    entity_name: &str,
    subscription_name: &str,
) -> (String, String) {
    let mut subject = if entity_name.is_empty() {
        "[Blueprinter] Entity changed".to_string()
    } else {
        format!("[Blueprinter] {entity_name} changed")
    };
    if !payload.changes.is_empty() {
        let fields: Vec<&str> = payload.changes.iter().map(|c| c.field.as_str()).collect();
        subject.push_str(&format!(" ({})", fields.join(", ")));
    }

    let mut rows = String::new();
    for change in &payload.changes {
        rows.push_str(&format!(
            "<tr>\
             <td style=\"{CELL_STYLE}\">{}</td>\
             <td style=\"{CELL_STYLE} color: #999;\">{}</td>\
             <td style=\"{CELL_STYLE} font-weight: 600;\">{}</td>\
             </tr>",
            html_escape(&change.field),
            html_escape(&canonical_string(&change.old)),
            html_escape(&canonical_string(&change.new)),
        ));
    }

    let body = format!(
        "<!DOCTYPE html>\
         <html><head><meta charset=\"utf-8\"></head>\
         <body style=\"{BODY_STYLE}\">\
         <h2 style=\"color: #1a1a1a; margin-bottom: 4px;\">Entity Changed</h2>\
         <p style=\"color: #666; margin-top: 0;\">Subscription: {}</p>\
         {}\
         <table style=\"width: 100%; border-collapse: collapse; margin: 16px 0;\">\
         <thead><tr style=\"background: #f5f5f5;\">\
         <th style=\"{HEADER_CELL_STYLE}\">Field</th>\
         <th style=\"{HEADER_CELL_STYLE}\">Old</th>\
         <th style=\"{HEADER_CELL_STYLE}\">New</th>\
         </tr></thead>\
         <tbody>{rows}</tbody>\
         </table>\
         <p style=\"color: #999; font-size: 12px;\">Sent by Blueprinter</p>\
         </body></html>",
        html_escape(subscription_name),
        name_line(entity_name),
    );

    (subject, body)
}

fn build_appeared_email(
    payload: &Payload,
    entity_name: &str,
    subscription_name: &str,
) -> (String, String) {
    let subject = if entity_name.is_empty() {
        "[Blueprinter] New entity appeared".to_string()
    } else {
        format!("[Blueprinter] New entity: {entity_name}")
    };

    let mut rows = String::new();
    for (key, value) in &payload.entity {
        rows.push_str(&format!(
            "<tr>\
             <td style=\"{CELL_STYLE}\">{}</td>\
             <td style=\"{CELL_STYLE}\">{}</td>\
             </tr>",
            html_escape(key),
            html_escape(&canonical_string(value)),
        ));
    }

    let body = format!(
        "<!DOCTYPE html>\
         <html><head><meta charset=\"utf-8\"></head>\
         <body style=\"{BODY_STYLE}\">\
         <h2 style=\"color: #1a1a1a; margin-bottom: 4px;\">New Entity Appeared</h2>\
         <p style=\"color: #666; margin-top: 0;\">Subscription: {}</p>\
         {}\
         <table style=\"width: 100%; border-collapse: collapse; margin: 16px 0;\">\
         <thead><tr style=\"background: #f5f5f5;\">\
         <th style=\"{HEADER_CELL_STYLE}\">Field</th>\
         <th style=\"{HEADER_CELL_STYLE}\">Value</th>\
         </tr></thead>\
         <tbody>{rows}</tbody>\
         </table>\
         <p style=\"color: #999; font-size: 12px;\">Sent by Blueprinter</p>\
         </body></html>",
        html_escape(subscription_name),
        name_line(entity_name),
    );

    (subject, body)
}

fn build_disappeared_email(
    payload: &Payload,
    entity_name: &str,
    subscription_name: &str,
) -> (String, String) {
    let entity_id = if entity_name.is_empty() {
        payload
            .entity
            .get("external_id")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    } else {
        entity_name.to_string()
    };

    let subject = if entity_id.is_empty() {
        "[Blueprinter] Entity disappeared".to_string()
    } else {
        format!("[Blueprinter] {entity_id} disappeared")
    };

    let body = format!(
        "<!DOCTYPE html>\
         <html><head><meta charset=\"utf-8\"></head>\
         <body style=\"{BODY_STYLE}\">\
         <h2 style=\"color: #1a1a1a; margin-bottom: 4px;\">Entity Disappeared</h2>\
         <p style=\"color: #666; margin-top: 0;\">Subscription: {}</p>\
         <p style=\"color: #333;\">The entity <strong>{}</strong> is no longer present on the monitored page.</p>\
         <p style=\"color: #999; font-size: 12px;\">Sent by Blueprinter</p>\
         </body></html>",
        html_escape(subscription_name),
        html_escape(&entity_id),
    );

    (subject, body)
}

fn name_line(entity_name: &str) -> String {
    if entity_name.is_empty() {
        String::new()
    } else {
        format!(
            "<p style=\"color: #333;\"><strong>{}</strong></p>",
            html_escape(entity_name)
        )
    }
}
