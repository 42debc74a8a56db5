use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::integrations::email::{
    DeliveryReceipt, NotificationError, NotificationSender, OutboundEmail,
};
use crate::workflows::documents::tests::common::{harness, Harness, HarnessOptions};
use crate::workflows::employees::tests::common::submitter;
use crate::workflows::onboarding::{
    NewInvitation, OnboardingCollaborators, OnboardingLifecycleController, OnboardingSettings,
};

pub(crate) const PORTAL_URL: &str = "https://hr.example.com/onboarding";

#[derive(Default)]
struct NotifierState {
    sent: Vec<OutboundEmail>,
    failing: bool,
}

/// Captures every email; can be switched into a failing transport.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    state: Mutex<NotifierState>,
}

impl RecordingNotifier {
    pub(crate) fn fail_deliveries(&self) {
        self.state.lock().expect("notifier mutex poisoned").failing = true;
    }

    pub(crate) fn sent(&self) -> Vec<OutboundEmail> {
        self.state.lock().expect("notifier mutex poisoned").sent.clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(&self, email: &OutboundEmail) -> Result<DeliveryReceipt, NotificationError> {
        let mut state = self.state.lock().expect("notifier mutex poisoned");
        if state.failing {
            return Err(NotificationError::Transport("connection refused".to_string()));
        }
        state.sent.push(email.clone());
        Ok(DeliveryReceipt {
            message_id: format!("msg-{}@x.com", state.sent.len()),
        })
    }
}

pub(crate) struct OnboardingHarness {
    pub(crate) controller: Arc<OnboardingLifecycleController>,
    pub(crate) notifier: Arc<RecordingNotifier>,
    pub(crate) docs: Harness,
}

/// Controller over the document harness, with templates already synced.
pub(crate) async fn onboarding_harness() -> OnboardingHarness {
    let docs = harness(HarnessOptions::default()).await;
    docs.orchestrator
        .sync_templates(&tokio_util::sync::CancellationToken::new())
        .await
        .expect("templates sync");
    let notifier = Arc::new(RecordingNotifier::default());
    let controller = OnboardingLifecycleController::new(
        OnboardingCollaborators {
            invitations: docs.invitations.clone(),
            employees: Arc::new(submitter(docs.gateway.clone())),
            documents: docs.orchestrator.clone(),
            notifier: Some(notifier.clone()),
            clock: docs.clock.clone(),
        },
        OnboardingSettings {
            call_timeout: Duration::from_secs(5),
            validity_days: 7,
            portal_url: PORTAL_URL.to_string(),
        },
    );
    OnboardingHarness {
        controller: Arc::new(controller),
        notifier,
        docs,
    }
}

pub(crate) fn sam_lee(template_ids: &[&str]) -> NewInvitation {
    NewInvitation {
        email: "Sam.Lee@x.com".to_string(),
        first_name: "Sam".to_string(),
        last_name: "Lee".to_string(),
        position: Some("Care Coordinator".to_string()),
        template_ids: template_ids
            .iter()
            .map(|id| crate::workflows::documents::TemplateId(id.to_string()))
            .collect(),
        invited_by: "hr@x.com".to_string(),
    }
}
