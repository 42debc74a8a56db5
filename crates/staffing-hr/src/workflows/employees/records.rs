//! Shaping of raw form payloads before they reach the persistence gateway.

use chrono::{DateTime, NaiveDate};
use serde_json::Value;

use super::domain::{ChildCollection, EmployeeField, FieldMap};

/// Keys the form keeps for its own bookkeeping and the backend must never see.
const CLIENT_ONLY_KEYS: [&str; 3] = ["id", "source", "employeeId"];

/// Normalize a date-ish value to `YYYY-MM-DD`; unrecognized text is returned unchanged.
pub fn normalize_date(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.format("%Y-%m-%d").to_string();
    }
    if let Ok(stamp) = DateTime::parse_from_rfc3339(trimmed) {
        return stamp.date_naive().format("%Y-%m-%d").to_string();
    }
    // Timestamps without an offset, e.g. "2024-03-05T00:00:00".
    if let Some((date, _time)) = trimmed.split_once('T') {
        if let Ok(date) = NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%m/%d/%Y") {
        return date.format("%Y-%m-%d").to_string();
    }
    trimmed.to_string()
}

fn normalize_date_value(value: &mut Value) {
    if let Value::String(text) = value {
        if !text.trim().is_empty() {
            *text = normalize_date(text);
        }
    }
}

/// Strip client-only keys and normalize the collection's declared date fields.
/// Fields absent from the item stay absent.
pub fn prepare_child(collection: ChildCollection, item: &FieldMap) -> FieldMap {
    let mut record: FieldMap = item
        .iter()
        .filter(|(key, _)| !CLIENT_ONLY_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    for field in collection.date_fields() {
        if let Some(value) = record.get_mut(*field) {
            normalize_date_value(value);
        }
    }
    record
}

/// True when every value is null or blank text, i.e. an untouched form row.
pub fn is_blank(item: &FieldMap) -> bool {
    item.iter()
        .filter(|(key, _)| !CLIENT_ONLY_KEYS.contains(&key.as_str()))
        .all(|(_, value)| is_empty_value(value))
}

pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

/// Remove null and empty-string values so partial drafts never blank out stored data.
pub fn compact(fields: FieldMap) -> FieldMap {
    fields
        .into_iter()
        .filter(|(_, value)| !is_empty_value(value))
        .collect()
}

/// Fields split into the declared employee columns and the keys that were dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredFields {
    pub accepted: FieldMap,
    pub dropped: Vec<String>,
}

/// Keep only declared employee columns, normalizing the date-typed ones.
pub fn filter_updatable(fields: FieldMap) -> FilteredFields {
    let mut filtered = FilteredFields::default();
    for (key, mut value) in fields {
        match EmployeeField::from_column(&key) {
            Some(field) => {
                if field.is_date() {
                    normalize_date_value(&mut value);
                }
                filtered.accepted.insert(key, value);
            }
            None => filtered.dropped.push(key),
        }
    }
    filtered
}
