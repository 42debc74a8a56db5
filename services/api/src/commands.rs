use crate::infra::build_services;
use clap::Args;
use staffing_hr::config::AppConfig;
use staffing_hr::error::AppError;
use staffing_hr::telemetry;
use staffing_hr::workflows::deadline::bounded;
use staffing_hr::workflows::documents::{CanonicalSubmission, DocumentError, ProviderError};
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug, Default)]
pub(crate) struct PollArgs {
    /// Provider submission ids to query
    #[arg(required = true)]
    pub(crate) ids: Vec<String>,
}

pub(crate) async fn sync_templates() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry, config.environment)?;
    let services = build_services(&config).await?;

    let templates = services
        .documents
        .sync_templates(&CancellationToken::new())
        .await?;

    println!("Synced {} template(s)", templates.len());
    for template in templates {
        let onboarding = if template.required_for_onboarding {
            "onboarding"
        } else {
            "-"
        };
        println!(
            "  {:<12} {:<40} {:<10} roles: {}",
            template.id.0,
            template.name,
            onboarding,
            template.signer_roles.join(", ")
        );
    }
    Ok(())
}

pub(crate) async fn poll_submissions(args: PollArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry, config.environment)?;
    let services = build_services(&config).await?;
    let provider = services.provider.ok_or_else(|| {
        DocumentError::from(ProviderError::Unavailable(
            "DOCUSEAL_API_URL and an API key are required".to_string(),
        ))
    })?;

    let cancel = CancellationToken::new();
    for id in &args.ids {
        let lookup = bounded(&cancel, config.workflow.call_timeout, provider.get_submission(id))
            .await
            .map_err(ProviderError::from)
            .and_then(|outcome| outcome);
        match lookup {
            Ok(submission) => println!("{}", render_submission(&submission)),
            Err(ProviderError::NotFound(_)) => println!("{id}: not found"),
            Err(err) => println!("{id}: error: {err}"),
        }
    }
    Ok(())
}

fn render_submission(submission: &CanonicalSubmission) -> String {
    let mut lines = vec![format!(
        "{}: {}",
        submission.id,
        submission
            .status
            .map_or("unknown", |status| status.label())
    )];
    for submitter in &submission.submitters {
        lines.push(format!(
            "  {:<24} {:<10} {}",
            submitter.role.as_deref().unwrap_or("-"),
            submitter.status.map_or("unknown", |status| status.label()),
            submitter.email
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use staffing_hr::workflows::documents::{CanonicalSubmitter, SubmissionStatus};

    #[test]
    fn renders_each_signer_under_the_submission() {
        let submission = CanonicalSubmission {
            id: "101".to_string(),
            status: Some(SubmissionStatus::Opened),
            submitters: vec![CanonicalSubmitter {
                id: "11".to_string(),
                email: "jane@x.com".to_string(),
                role: Some("Employee".to_string()),
                status: Some(SubmissionStatus::Completed),
                ..CanonicalSubmitter::default()
            }],
            ..CanonicalSubmission::default()
        };

        let rendered = render_submission(&submission);

        assert!(rendered.starts_with("101: opened"));
        assert!(rendered.contains("Employee"));
        assert!(rendered.contains("completed"));
        assert!(rendered.contains("jane@x.com"));
    }
}
