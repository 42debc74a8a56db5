use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Loosely typed record exchanged with the persistence backend.
pub type FieldMap = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeId(pub String);

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentStatus {
    #[default]
    Active,
    Inactive,
    OnLeave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStatus {
    Draft,
    Submitted,
    Completed,
}

impl OnboardingStatus {
    pub fn label(self) -> &'static str {
        match self {
            OnboardingStatus::Draft => "draft",
            OnboardingStatus::Submitted => "submitted",
            OnboardingStatus::Completed => "completed",
        }
    }
}

/// Aggregate root for an HR record. `ssn` holds the codec token, never the
/// plain number.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Employee {
    pub id: EmployeeId,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub preferred_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub work_email: Option<String>,
    pub personal_email: Option<String>,
    pub work_phone: Option<String>,
    pub mobile_phone: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub hire_date: Option<NaiveDate>,
    pub npi: Option<String>,
    pub ssn: Option<String>,
    pub qualifications: Option<String>,
    pub medical_license_number: Option<String>,
    pub substance_use_license_number: Option<String>,
    pub mental_health_license_number: Option<String>,
    pub medicaid_id: Option<String>,
    pub medicare_id: Option<String>,
    pub caqh_id: Option<String>,
    pub caqh_last_attested_at: Option<NaiveDate>,
    pub caqh_next_attestation_due: Option<NaiveDate>,
    pub status: EmploymentStatus,
    pub onboarding_status: Option<OnboardingStatus>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl Employee {
    pub fn full_name(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Work email if one is on file and non-blank.
    pub fn deliverable_email(&self) -> Option<&str> {
        self.work_email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }
}

macro_rules! updatable_fields {
    ($($variant:ident => $column:literal,)+) => {
        /// Employee columns HR users may write through the scalar update path.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EmployeeField {
            $($variant,)+
        }

        impl EmployeeField {
            pub const ALL: &'static [EmployeeField] = &[$(EmployeeField::$variant,)+];

            pub fn column(self) -> &'static str {
                match self {
                    $(EmployeeField::$variant => $column,)+
                }
            }

            pub fn from_column(column: &str) -> Option<Self> {
                match column {
                    $($column => Some(EmployeeField::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

updatable_fields! {
    FirstName => "firstName",
    MiddleName => "middleName",
    LastName => "lastName",
    PreferredName => "preferredName",
    DateOfBirth => "dateOfBirth",
    WorkEmail => "workEmail",
    PersonalEmail => "personalEmail",
    WorkPhone => "workPhone",
    MobilePhone => "mobilePhone",
    AddressLine1 => "addressLine1",
    AddressLine2 => "addressLine2",
    City => "city",
    State => "state",
    ZipCode => "zipCode",
    JobTitle => "jobTitle",
    Department => "department",
    HireDate => "hireDate",
    Npi => "npi",
    Ssn => "ssn",
    Qualifications => "qualifications",
    MedicalLicenseNumber => "medicalLicenseNumber",
    SubstanceUseLicenseNumber => "substanceUseLicenseNumber",
    MentalHealthLicenseNumber => "mentalHealthLicenseNumber",
    MedicaidId => "medicaidId",
    MedicareId => "medicareId",
    CaqhId => "caqhId",
    CaqhLastAttestedAt => "caqhLastAttestedAt",
    CaqhNextAttestationDue => "caqhNextAttestationDue",
    Status => "status",
}

impl EmployeeField {
    pub fn is_date(self) -> bool {
        matches!(
            self,
            EmployeeField::DateOfBirth
                | EmployeeField::HireDate
                | EmployeeField::CaqhLastAttestedAt
                | EmployeeField::CaqhNextAttestationDue
        )
    }
}

/// Dependent collections owned by an employee through `employeeId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildCollection {
    Education,
    Employment,
    StateLicense,
    DeaLicense,
    BoardCertification,
    PeerReference,
    EmergencyContact,
    TaxForm,
    Training,
    PayerEnrollment,
    IncidentLog,
}

impl ChildCollection {
    pub const ALL: [ChildCollection; 11] = [
        ChildCollection::Education,
        ChildCollection::Employment,
        ChildCollection::StateLicense,
        ChildCollection::DeaLicense,
        ChildCollection::BoardCertification,
        ChildCollection::PeerReference,
        ChildCollection::EmergencyContact,
        ChildCollection::TaxForm,
        ChildCollection::Training,
        ChildCollection::PayerEnrollment,
        ChildCollection::IncidentLog,
    ];

    /// Resource path segment on the persistence backend.
    pub fn endpoint(self) -> &'static str {
        match self {
            ChildCollection::Education => "educations",
            ChildCollection::Employment => "employments",
            ChildCollection::StateLicense => "state_licenses",
            ChildCollection::DeaLicense => "dea_licenses",
            ChildCollection::BoardCertification => "board_certifications",
            ChildCollection::PeerReference => "peer_references",
            ChildCollection::EmergencyContact => "emergency_contacts",
            ChildCollection::TaxForm => "tax_forms",
            ChildCollection::Training => "trainings",
            ChildCollection::PayerEnrollment => "payer_enrollments",
            ChildCollection::IncidentLog => "incident_logs",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ChildCollection::Education => "education",
            ChildCollection::Employment => "employment",
            ChildCollection::StateLicense => "state_license",
            ChildCollection::DeaLicense => "dea_license",
            ChildCollection::BoardCertification => "board_certification",
            ChildCollection::PeerReference => "peer_reference",
            ChildCollection::EmergencyContact => "emergency_contact",
            ChildCollection::TaxForm => "tax_form",
            ChildCollection::Training => "training",
            ChildCollection::PayerEnrollment => "payer_enrollment",
            ChildCollection::IncidentLog => "incident_log",
        }
    }

    /// Fields normalized to `YYYY-MM-DD` before transmission.
    pub fn date_fields(self) -> &'static [&'static str] {
        match self {
            ChildCollection::Education => &["startDate", "endDate", "graduationDate"],
            ChildCollection::Employment => &["startDate", "endDate"],
            ChildCollection::StateLicense | ChildCollection::DeaLicense => {
                &["issueDate", "expirationDate"]
            }
            ChildCollection::BoardCertification => &["certificationDate", "expirationDate"],
            ChildCollection::PeerReference | ChildCollection::EmergencyContact => &[],
            ChildCollection::TaxForm => &["signedDate", "effectiveDate"],
            ChildCollection::Training => &["completionDate", "expirationDate"],
            ChildCollection::PayerEnrollment => &["submittedDate", "effectiveDate"],
            ChildCollection::IncidentLog => &["incidentDate", "reportedDate", "resolvedDate"],
        }
    }
}

impl fmt::Display for ChildCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Child row as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildRecord {
    pub id: String,
    pub employee_id: EmployeeId,
    #[serde(flatten)]
    pub fields: FieldMap,
}
