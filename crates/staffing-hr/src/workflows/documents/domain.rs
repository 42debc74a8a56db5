use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflows::employees::{EmployeeId, FieldMap};
use crate::workflows::onboarding::InvitationId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub String);

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Local primary key of a form submission row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormSubmissionId(pub String);

impl FormSubmissionId {
    pub fn generate() -> Self {
        FormSubmissionId(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for FormSubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signing progress of a submission or of one signer within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Sent,
    Opened,
    Completed,
    Expired,
}

impl SubmissionStatus {
    /// Map the provider's vocabulary; `awaiting` is the provider's name for not yet sent.
    pub fn from_provider(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "awaiting" => Some(SubmissionStatus::Pending),
            "sent" => Some(SubmissionStatus::Sent),
            "opened" => Some(SubmissionStatus::Opened),
            "completed" => Some(SubmissionStatus::Completed),
            "expired" => Some(SubmissionStatus::Expired),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Sent => "sent",
            SubmissionStatus::Opened => "opened",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Expired => "expired",
        }
    }

    fn rank(self) -> u8 {
        match self {
            SubmissionStatus::Pending => 0,
            SubmissionStatus::Sent => 1,
            SubmissionStatus::Opened => 2,
            SubmissionStatus::Completed => 3,
            SubmissionStatus::Expired => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionStatus::Completed | SubmissionStatus::Expired)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic:
    /// forward along pending < sent < opened < completed, or to expired from
    /// any non-terminal state.
    pub fn can_become(self, next: SubmissionStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next == SubmissionStatus::Expired || next.rank() > self.rank()
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Cached definition of a signable document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocusealTemplate {
    pub id: TemplateId,
    pub name: String,
    pub category: Option<String>,
    pub field_names: Vec<String>,
    pub signer_roles: Vec<String>,
    pub required_for_onboarding: bool,
    /// Operator override; wins over the category and name heuristic when set.
    pub requires_hr_signature: Option<bool>,
    pub synced_at: Option<DateTime<Utc>>,
}

/// Locally managed template settings preserved across syncs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSettings {
    pub required_for_onboarding: Option<bool>,
    #[serde(default, deserialize_with = "double_option::deserialize")]
    pub requires_hr_signature: Option<Option<bool>>,
    #[serde(default, deserialize_with = "double_option::deserialize")]
    pub category: Option<Option<String>>,
}

/// Distinguishes an absent key (leave unchanged) from an explicit `null` (clear).
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerRole {
    Employee,
    Hr,
}

/// One signer as last reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerSnapshot {
    pub role: SignerRole,
    pub provider_role: String,
    pub submitter_id: String,
    pub email: String,
    pub name: Option<String>,
    pub status: SubmissionStatus,
    pub signing_url: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Multi-signer metadata stored with each submission row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionData {
    pub signers: Vec<SignerSnapshot>,
    pub employee_signing_url: Option<String>,
    pub hr_signing_url: Option<String>,
    pub employee_signed: bool,
    pub hr_signed: bool,
    pub requires_hr_signature: bool,
    #[serde(default)]
    pub values: FieldMap,
}

impl SubmissionData {
    pub fn signer(&self, role: SignerRole) -> Option<&SignerSnapshot> {
        self.signers.iter().find(|signer| signer.role == role)
    }

    pub fn signer_by_email(&self, email: &str) -> Option<&SignerSnapshot> {
        let wanted = email.trim();
        self.signers
            .iter()
            .find(|signer| signer.email.eq_ignore_ascii_case(wanted))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedDocument {
    pub name: String,
    pub key: String,
    pub etag: String,
    pub archived_at: DateTime<Utc>,
}

/// One document routed for signature, tied to an employee and a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSubmission {
    pub id: FormSubmissionId,
    /// Provider-side submission id.
    pub submission_id: String,
    pub employee_id: EmployeeId,
    pub template_id: TemplateId,
    pub template_name: String,
    pub invitation_id: Option<InvitationId>,
    pub is_onboarding: bool,
    pub required: bool,
    pub recipient_email: String,
    pub recipient_name: String,
    pub status: SubmissionStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub documents_url: Option<String>,
    pub submission_data: SubmissionData,
    pub reminder_count: u32,
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub next_reminder_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub archived_documents: Vec<ArchivedDocument>,
}
