//! Values placed into a template's fields before the employee opens it.
//!
//! Matching is on the literal field name the template declares; a value is only
//! sent when the template has a field with exactly that name.

use chrono::NaiveDate;
use serde_json::Value;

use crate::integrations::cipher::SecretCodec;
use crate::workflows::employees::{Employee, FieldMap};

const US_DATE: &str = "%m/%d/%Y";

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Split a decrypted SSN into its three masked segments.
fn ssn_segments(plain: &str) -> Option<(String, String, String)> {
    let digits: String = plain.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != 9 {
        return None;
    }
    Some((
        digits[..3].to_string(),
        digits[3..5].to_string(),
        digits[5..].to_string(),
    ))
}

fn candidates(employee: &Employee, codec: &dyn SecretCodec, today: NaiveDate) -> Vec<(&'static str, String)> {
    let mut values = Vec::new();
    let mut push = |field: &'static str, value: Option<String>| {
        if let Some(value) = value {
            values.push((field, value));
        }
    };

    push("First Name", non_empty(&employee.first_name));
    push("Last Name", non_empty(&employee.last_name));
    push("Middle Name", non_empty(&employee.middle_name));
    push("Full Name", non_empty(&Some(employee.full_name())));
    push("Name", non_empty(&Some(employee.full_name())));

    let street = [non_empty(&employee.address_line1), non_empty(&employee.address_line2)]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ");
    push("Address", non_empty(&Some(street)));
    push("City", non_empty(&employee.city));
    push("State", non_empty(&employee.state));
    push("Zip", non_empty(&employee.zip_code));
    push("Zip Code", non_empty(&employee.zip_code));

    if let Some(token) = non_empty(&employee.ssn) {
        if let Some((area, group, serial)) = ssn_segments(&codec.decrypt(&token)) {
            push("SSN", Some(format!("{area}-{group}-{serial}")));
            push("SSN 1", Some(area));
            push("SSN 2", Some(group));
            push("SSN 3", Some(serial));
        }
    }

    push("NPI", non_empty(&employee.npi));
    push("Medicaid ID", non_empty(&employee.medicaid_id));
    push("Email", non_empty(&employee.work_email));
    push("Phone", non_empty(&employee.mobile_phone).or_else(|| non_empty(&employee.work_phone)));
    push(
        "Date of Birth",
        employee.date_of_birth.map(|date| date.format(US_DATE).to_string()),
    );
    push("Job Title", non_empty(&employee.job_title));

    let signed_on = today.format(US_DATE).to_string();
    push("Date", Some(signed_on.clone()));
    push("Sign Date", Some(signed_on));
    values
}

/// Build the pre-fill map for the employee submitter.
pub fn employee_values(
    employee: &Employee,
    field_names: &[String],
    codec: &dyn SecretCodec,
    today: NaiveDate,
) -> FieldMap {
    candidates(employee, codec, today)
        .into_iter()
        .filter(|(field, _)| field_names.iter().any(|declared| declared == field))
        .map(|(field, value)| (field.to_string(), Value::String(value)))
        .collect()
}

/// Whether a field carries a decrypted secret that must not be persisted.
fn is_sensitive(field: &str) -> bool {
    field
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("ssn"))
}

/// Drop secret-bearing fields from values kept outside the provider.
pub fn redact_sensitive(values: &mut FieldMap) {
    values.retain(|field, _| !is_sensitive(field));
}
