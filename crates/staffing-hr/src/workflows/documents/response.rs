//! Reduction of the provider's submission payloads to [`CanonicalSubmission`].
//!
//! Depending on API version and endpoint the provider answers with an array of
//! per-submitter rows, a flat submission object, or the same object nested
//! under `submission` or `data.submission`. Only this module knows that.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::domain::SubmissionStatus;
use super::provider::{CanonicalSubmission, CanonicalSubmitter, ProviderError};
use crate::workflows::employees::FieldMap;

/// Provider ids arrive as numbers or strings depending on the endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawId {
    Number(i64),
    Text(String),
}

impl RawId {
    pub(crate) fn into_string(self) -> String {
        match self {
            RawId::Number(value) => value.to_string(),
            RawId::Text(value) => value,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawFieldValue {
    field: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawValues {
    List(Vec<RawFieldValue>),
    Map(FieldMap),
}

impl Default for RawValues {
    fn default() -> Self {
        RawValues::Map(FieldMap::new())
    }
}

impl RawValues {
    fn into_map(self) -> FieldMap {
        match self {
            RawValues::Map(map) => map,
            RawValues::List(items) => items
                .into_iter()
                .map(|item| (item.field, item.value))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawSubmitter {
    id: RawId,
    #[serde(default)]
    submission_id: Option<RawId>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    embed_src: Option<String>,
    #[serde(default)]
    sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    opened_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    values: RawValues,
}

impl RawSubmitter {
    fn canonical(self) -> CanonicalSubmitter {
        CanonicalSubmitter {
            id: self.id.into_string(),
            slug: self.slug.filter(|slug| !slug.is_empty()),
            email: self.email.unwrap_or_default(),
            name: self.name,
            role: self.role,
            status: self.status.as_deref().and_then(SubmissionStatus::from_provider),
            embed_src: self.embed_src.filter(|src| !src.is_empty()),
            sent_at: self.sent_at,
            opened_at: self.opened_at,
            completed_at: self.completed_at,
            values: self.values.into_map(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawSubmission {
    #[serde(default)]
    id: Option<RawId>,
    #[serde(default)]
    submission_id: Option<RawId>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    submitters: Vec<RawSubmitter>,
    #[serde(default)]
    combined_document_url: Option<String>,
    #[serde(default)]
    documents_url: Option<String>,
    #[serde(default)]
    audit_log_url: Option<String>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DataPayload {
    Nested { submission: RawSubmission },
    Flat(RawSubmission),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Envelope {
    Rows(Vec<RawSubmitter>),
    Data {
        data: DataPayload,
    },
    Nested {
        submission: RawSubmission,
        #[serde(default)]
        submitters: Vec<RawSubmitter>,
    },
    Flat(RawSubmission),
}

/// Parse any accepted submission payload.
pub fn normalize_submission(body: Value) -> Result<CanonicalSubmission, ProviderError> {
    let envelope: Envelope =
        serde_json::from_value(body).map_err(|err| ProviderError::Decode(err.to_string()))?;

    let raw = match envelope {
        Envelope::Rows(rows) => {
            let id = rows
                .iter()
                .find_map(|row| row.submission_id.clone())
                .ok_or_else(|| ProviderError::Decode("submitter rows carry no submission id".to_string()))?;
            RawSubmission {
                id: Some(id),
                submission_id: None,
                status: None,
                submitters: rows,
                combined_document_url: None,
                documents_url: None,
                audit_log_url: None,
                completed_at: None,
            }
        }
        Envelope::Data {
            data: DataPayload::Nested { submission },
        }
        | Envelope::Data {
            data: DataPayload::Flat(submission),
        } => submission,
        Envelope::Nested {
            mut submission,
            submitters,
        } => {
            if submission.submitters.is_empty() {
                submission.submitters = submitters;
            }
            submission
        }
        Envelope::Flat(submission) => submission,
    };

    let id = raw
        .id
        .or(raw.submission_id)
        .map(RawId::into_string)
        .ok_or_else(|| ProviderError::Decode("submission id missing".to_string()))?;

    Ok(CanonicalSubmission {
        id,
        status: raw.status.as_deref().and_then(SubmissionStatus::from_provider),
        submitters: raw.submitters.into_iter().map(RawSubmitter::canonical).collect(),
        documents_url: raw
            .combined_document_url
            .or(raw.documents_url)
            .or(raw.audit_log_url),
        completed_at: raw.completed_at,
    })
}
