//! Dual-signer resolution: who signs a template, under which provider role,
//! and how the per-signer state folds into one submission status.

use super::domain::{DocusealTemplate, SignerRole, SignerSnapshot, SubmissionData, SubmissionStatus};
use super::prefill::redact_sensitive;
use super::provider::{CanonicalSubmission, CanonicalSubmitter};

const DEFAULT_EMPLOYEE_ROLE: &str = "Employee";
const DEFAULT_HR_ROLE: &str = "Company";
const HR_ROLE_MARKERS: [&str; 3] = ["company", "hr", "employer"];
const HR_CATEGORY: &str = "employment_agreement";
const HR_NAME_MARKERS: [&str; 2] = ["agreement", "contract"];

/// Provider role names used for the two logical signers of one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerRoles {
    pub employee: String,
    pub hr: String,
}

/// Whether the template needs a second, HR signature. An explicit per-template
/// flag wins; otherwise the category and then the name decide. The name match is
/// a best-effort classifier.
pub fn requires_hr_signature(template: &DocusealTemplate) -> bool {
    if let Some(explicit) = template.requires_hr_signature {
        return explicit;
    }
    if template
        .category
        .as_deref()
        .is_some_and(|category| category.eq_ignore_ascii_case(HR_CATEGORY))
    {
        return true;
    }
    let name = template.name.to_ascii_lowercase();
    HR_NAME_MARKERS.iter().any(|marker| name.contains(marker))
}

fn is_hr_role(role: &str) -> bool {
    let lowered = role.to_ascii_lowercase();
    lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| HR_ROLE_MARKERS.contains(&word))
}

/// Pick the employee and HR roles out of the template's declared role list.
pub fn resolve_roles(declared: &[String]) -> SignerRoles {
    let employee = declared
        .iter()
        .find(|role| !is_hr_role(role))
        .cloned()
        .unwrap_or_else(|| DEFAULT_EMPLOYEE_ROLE.to_string());
    let hr = declared
        .iter()
        .find(|role| is_hr_role(role))
        .or_else(|| declared.iter().find(|role| **role != employee))
        .cloned()
        .unwrap_or_else(|| DEFAULT_HR_ROLE.to_string());
    SignerRoles { employee, hr }
}

/// Link a signer opens to sign. A provider slug beats the embed URL, which beats
/// the bare submitter id.
pub fn signing_url(app_url: &str, submitter: &CanonicalSubmitter) -> Option<String> {
    let base = app_url.trim_end_matches('/');
    if let Some(slug) = &submitter.slug {
        return Some(format!("{base}/s/{slug}"));
    }
    if let Some(embed) = &submitter.embed_src {
        return Some(embed.clone());
    }
    if submitter.id.is_empty() {
        return None;
    }
    Some(format!("{base}/s/{}", submitter.id))
}

fn classify(roles: &SignerRoles, position: usize, submitter: &CanonicalSubmitter) -> SignerRole {
    match submitter.role.as_deref() {
        Some(role) if role.eq_ignore_ascii_case(&roles.hr) => SignerRole::Hr,
        Some(role) if role.eq_ignore_ascii_case(&roles.employee) => SignerRole::Employee,
        Some(role) if is_hr_role(role) => SignerRole::Hr,
        Some(_) => SignerRole::Employee,
        None if position == 0 => SignerRole::Employee,
        None => SignerRole::Hr,
    }
}

/// Snapshot per-signer state, carrying the previous snapshot's values forward
/// when the provider omits them. SSN fields never survive into the snapshot.
pub fn snapshot(
    submission: &CanonicalSubmission,
    roles: &SignerRoles,
    app_url: &str,
    requires_hr_signature: bool,
    previous: &SubmissionData,
) -> SubmissionData {
    let signers: Vec<SignerSnapshot> = submission
        .submitters
        .iter()
        .enumerate()
        .map(|(position, submitter)| {
            let role = classify(roles, position, submitter);
            let status = submitter.status.unwrap_or(if submitter.completed_at.is_some() {
                SubmissionStatus::Completed
            } else if submitter.opened_at.is_some() {
                SubmissionStatus::Opened
            } else if submitter.sent_at.is_some() {
                SubmissionStatus::Sent
            } else {
                SubmissionStatus::Pending
            });
            SignerSnapshot {
                role,
                provider_role: submitter.role.clone().unwrap_or_else(|| match role {
                    SignerRole::Employee => roles.employee.clone(),
                    SignerRole::Hr => roles.hr.clone(),
                }),
                submitter_id: submitter.id.clone(),
                email: submitter.email.clone(),
                name: submitter.name.clone(),
                status,
                signing_url: signing_url(app_url, submitter),
                completed_at: submitter.completed_at,
            }
        })
        .collect();

    let signed = |role: SignerRole| {
        signers
            .iter()
            .any(|signer| signer.role == role && signer.status == SubmissionStatus::Completed)
    };
    let url = |role: SignerRole| {
        signers
            .iter()
            .find(|signer| signer.role == role)
            .and_then(|signer| signer.signing_url.clone())
    };

    let mut values = previous.values.clone();
    for submitter in &submission.submitters {
        values.extend(submitter.values.clone());
    }
    redact_sensitive(&mut values);

    SubmissionData {
        employee_signing_url: url(SignerRole::Employee).or_else(|| previous.employee_signing_url.clone()),
        hr_signing_url: url(SignerRole::Hr).or_else(|| previous.hr_signing_url.clone()),
        employee_signed: signed(SignerRole::Employee) || previous.employee_signed,
        hr_signed: signed(SignerRole::Hr) || previous.hr_signed,
        requires_hr_signature,
        values,
        signers,
    }
}

/// Fold provider state into one submission status. A terminal submission-level
/// status wins; otherwise the employee signer drives it, and a document still
/// waiting on HR never reads as completed.
pub fn overall_status(submission: &CanonicalSubmission, data: &SubmissionData) -> SubmissionStatus {
    if let Some(status) = submission.status.filter(|status| status.is_terminal()) {
        return status;
    }
    let employee = data
        .signer(SignerRole::Employee)
        .map(|signer| signer.status)
        .or(submission.status)
        .unwrap_or(SubmissionStatus::Pending);

    if data.requires_hr_signature && employee == SubmissionStatus::Completed && !data.hr_signed {
        return SubmissionStatus::Opened;
    }
    employee
}

#[cfg(test)]
mod tests {
    use super::super::domain::TemplateId;
    use super::*;

    fn template(name: &str, category: Option<&str>, explicit: Option<bool>) -> DocusealTemplate {
        DocusealTemplate {
            id: TemplateId("t-1".to_string()),
            name: name.to_string(),
            category: category.map(str::to_string),
            field_names: Vec::new(),
            signer_roles: Vec::new(),
            required_for_onboarding: false,
            requires_hr_signature: explicit,
            synced_at: None,
        }
    }

    fn roles(list: &[&str]) -> Vec<String> {
        list.iter().map(|role| role.to_string()).collect()
    }

    #[test]
    fn agreement_in_name_requires_hr() {
        assert!(requires_hr_signature(&template("Annual Compliance Agreement", None, None)));
        assert!(requires_hr_signature(&template("Independent CONTRACT", None, None)));
        assert!(!requires_hr_signature(&template("W-4 Withholding", None, None)));
    }

    #[test]
    fn category_flag_requires_hr() {
        assert!(requires_hr_signature(&template(
            "Offer",
            Some("employment_agreement"),
            None
        )));
    }

    #[test]
    fn explicit_override_beats_heuristic() {
        assert!(!requires_hr_signature(&template("Service Agreement", None, Some(false))));
        assert!(requires_hr_signature(&template("W-4", None, Some(true))));
    }

    #[test]
    fn roles_resolve_from_declared_list() {
        assert_eq!(
            resolve_roles(&roles(&["Company", "Employee"])),
            SignerRoles {
                employee: "Employee".to_string(),
                hr: "Company".to_string()
            }
        );
        assert_eq!(
            resolve_roles(&roles(&["Signer", "Witness"])),
            SignerRoles {
                employee: "Signer".to_string(),
                hr: "Witness".to_string()
            }
        );
        assert_eq!(
            resolve_roles(&roles(&["Contractor", "HR Manager"])).hr,
            "HR Manager"
        );
        assert_eq!(
            resolve_roles(&[]),
            SignerRoles {
                employee: "Employee".to_string(),
                hr: "Company".to_string()
            }
        );
    }

    #[test]
    fn slug_preferred_for_signing_urls() {
        let mut submitter = CanonicalSubmitter {
            id: "501".to_string(),
            slug: Some("AbC".to_string()),
            embed_src: Some("https://embed/x".to_string()),
            ..CanonicalSubmitter::default()
        };
        assert_eq!(
            signing_url("https://sign.example.com/", &submitter).as_deref(),
            Some("https://sign.example.com/s/AbC")
        );
        submitter.slug = None;
        assert_eq!(signing_url("https://sign.example.com", &submitter).as_deref(), Some("https://embed/x"));
        submitter.embed_src = None;
        assert_eq!(
            signing_url("https://sign.example.com", &submitter).as_deref(),
            Some("https://sign.example.com/s/501")
        );
    }

    fn two_signers(employee: SubmissionStatus, hr: SubmissionStatus) -> CanonicalSubmission {
        CanonicalSubmission {
            id: "77".to_string(),
            status: None,
            submitters: vec![
                CanonicalSubmitter {
                    id: "1".to_string(),
                    email: "jane@x.com".to_string(),
                    role: Some("Employee".to_string()),
                    status: Some(employee),
                    ..CanonicalSubmitter::default()
                },
                CanonicalSubmitter {
                    id: "2".to_string(),
                    email: "hr@x.com".to_string(),
                    role: Some("Company".to_string()),
                    status: Some(hr),
                    ..CanonicalSubmitter::default()
                },
            ],
            ..CanonicalSubmission::default()
        }
    }

    #[test]
    fn waits_for_hr_before_completing() {
        let roles = resolve_roles(&roles(&["Employee", "Company"]));
        let submission = two_signers(SubmissionStatus::Completed, SubmissionStatus::Sent);
        let data = snapshot(&submission, &roles, "https://s", true, &SubmissionData::default());
        assert!(data.employee_signed);
        assert!(!data.hr_signed);
        assert_eq!(overall_status(&submission, &data), SubmissionStatus::Opened);

        let submission = two_signers(SubmissionStatus::Completed, SubmissionStatus::Completed);
        let data = snapshot(&submission, &roles, "https://s", true, &SubmissionData::default());
        assert_eq!(overall_status(&submission, &data), SubmissionStatus::Completed);
    }

    #[test]
    fn submission_level_terminal_status_wins() {
        let roles = resolve_roles(&[]);
        let mut submission = two_signers(SubmissionStatus::Sent, SubmissionStatus::Pending);
        submission.status = Some(SubmissionStatus::Expired);
        let data = snapshot(&submission, &roles, "https://s", true, &SubmissionData::default());
        assert_eq!(overall_status(&submission, &data), SubmissionStatus::Expired);
    }
}
