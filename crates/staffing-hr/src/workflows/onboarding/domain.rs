use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflows::documents::TemplateId;
use crate::workflows::employees::EmployeeId;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvitationId(pub String);

impl InvitationId {
    pub fn generate() -> Self {
        InvitationId(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for InvitationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Random URL-safe secret embedded in the onboarding link.
pub fn new_invitation_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Registered,
    Approved,
    Rejected,
    Expired,
}

impl InvitationStatus {
    pub fn label(self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Registered => "registered",
            InvitationStatus::Approved => "approved",
            InvitationStatus::Rejected => "rejected",
            InvitationStatus::Expired => "expired",
        }
    }

    /// States from which the validity window still applies.
    pub fn is_open(self) -> bool {
        matches!(self, InvitationStatus::Pending | InvitationStatus::Registered)
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Invitation sent to a prospective employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeInvitation {
    pub id: InvitationId,
    #[serde(skip_serializing, default)]
    pub token: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub position: Option<String>,
    /// Explicit onboarding forms; empty means every template flagged as required.
    #[serde(default)]
    pub template_ids: Vec<TemplateId>,
    pub status: InvitationStatus,
    pub invited_by: String,
    pub invited_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reminder_count: u32,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub employee_id: Option<EmployeeId>,
    pub registered_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl EmployeeInvitation {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }

    /// Apply the validity window as of `now`. Returns true when this call moved
    /// the invitation to `expired`.
    pub fn observe_expiry(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_open() && now > self.expires_at {
            self.status = InvitationStatus::Expired;
            return true;
        }
        false
    }
}
