//! Step navigation for the multi-step employee and onboarding forms.
//!
//! Each step registers at most one validator while it is active; navigation
//! forward only happens when that validator resolves to `true` and no content
//! gate (outstanding uploads, pending lookups) is closed. Validators that fail
//! or panic block the transition instead of surfacing an error.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;

/// The three form flows the HR application drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardFlow {
    NewEmployee,
    EmployeeEdit,
    Onboarding,
}

const NEW_EMPLOYEE_STEPS: [&str; 13] = [
    "Personal Information",
    "Contact Details",
    "Position & Credentials",
    "Education",
    "Employment History",
    "State Licenses",
    "DEA Licenses",
    "Board Certifications",
    "Peer References",
    "Emergency Contacts",
    "Tax Forms",
    "Trainings",
    "Review",
];

const EMPLOYEE_EDIT_STEPS: [&str; 11] = [
    "Personal Information",
    "Contact Details",
    "Position & Credentials",
    "CAQH Attestation",
    "Education",
    "Employment History",
    "Licenses",
    "Board Certifications",
    "Payer Enrollments",
    "Incident Logs",
    "Review",
];

const ONBOARDING_STEPS: [&str; 12] = [
    "Welcome",
    "Personal Information",
    "Contact Details",
    "Position & Credentials",
    "Education",
    "Employment History",
    "Licenses",
    "Board Certifications",
    "Peer References",
    "Emergency Contacts",
    "Tax Forms",
    "Documents & Signatures",
];

impl WizardFlow {
    pub fn step_titles(self) -> &'static [&'static str] {
        match self {
            WizardFlow::NewEmployee => &NEW_EMPLOYEE_STEPS,
            WizardFlow::EmployeeEdit => &EMPLOYEE_EDIT_STEPS,
            WizardFlow::Onboarding => &ONBOARDING_STEPS,
        }
    }

    pub fn step_count(self) -> usize {
        self.step_titles().len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidatorError(pub String);

/// Validation hook registered by the active step.
#[async_trait]
pub trait StepValidator: Send + Sync {
    async fn validate(&self) -> Result<bool, ValidatorError>;
}

#[async_trait]
impl<F, Fut> StepValidator for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, ValidatorError>> + Send,
{
    async fn validate(&self) -> Result<bool, ValidatorError> {
        (self)().await
    }
}

/// Content-level block that is independent of field validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepGate {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StepGate {
    fn open() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }
}

/// Result of a navigation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepChange {
    Moved { from: usize, to: usize },
    Blocked { step: usize, reason: Option<String> },
    OutOfRange { step: usize },
}

pub struct WizardState {
    flow: WizardFlow,
    step: usize,
    validators: HashMap<usize, Arc<dyn StepValidator>>,
    gate: StepGate,
}

impl std::fmt::Debug for WizardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WizardState")
            .field("flow", &self.flow)
            .field("step", &self.step)
            .field("registered", &self.validators.len())
            .field("gate", &self.gate)
            .finish()
    }
}

impl WizardState {
    pub fn new(flow: WizardFlow) -> Self {
        Self {
            flow,
            step: 1,
            validators: HashMap::new(),
            gate: StepGate::open(),
        }
    }

    pub fn flow(&self) -> WizardFlow {
        self.flow
    }

    /// One-based index of the active step.
    pub fn current_step(&self) -> usize {
        self.step
    }

    pub fn current_title(&self) -> &'static str {
        self.flow.step_titles()[self.step - 1]
    }

    pub fn is_last_step(&self) -> bool {
        self.step == self.flow.step_count()
    }

    pub fn gate(&self) -> &StepGate {
        &self.gate
    }

    /// Install `validator` for the active step, replacing any earlier registration.
    pub fn register_validator(&mut self, validator: impl StepValidator + 'static) {
        self.validators.insert(self.step, Arc::new(validator));
    }

    pub fn clear_validator(&mut self) {
        self.validators.remove(&self.step);
    }

    pub fn set_gate(&mut self, allowed: bool, reason: Option<String>) {
        self.gate = StepGate { allowed, reason };
    }

    /// Resolve the active step's validator; errors and panics count as `false`.
    pub async fn can_advance(&self) -> bool {
        if !self.gate.allowed {
            return false;
        }
        let Some(validator) = self.validators.get(&self.step).cloned() else {
            return true;
        };

        match std::panic::AssertUnwindSafe(validator.validate())
            .catch_unwind()
            .await
        {
            Ok(Ok(valid)) => valid,
            Ok(Err(err)) => {
                tracing::debug!(step = self.step, error = %err, "step validator rejected");
                false
            }
            Err(_) => {
                tracing::warn!(step = self.step, "step validator panicked; blocking navigation");
                false
            }
        }
    }

    pub async fn advance(&mut self) -> StepChange {
        if self.step >= self.flow.step_count() {
            return StepChange::OutOfRange {
                step: self.step + 1,
            };
        }
        if !self.gate.allowed {
            return StepChange::Blocked {
                step: self.step,
                reason: self.gate.reason.clone(),
            };
        }
        if !self.can_advance().await {
            return StepChange::Blocked {
                step: self.step,
                reason: None,
            };
        }
        self.move_to(self.step + 1)
    }

    /// Step back without validation.
    pub fn retreat(&mut self) -> StepChange {
        if self.step <= 1 {
            return StepChange::OutOfRange { step: 0 };
        }
        self.move_to(self.step - 1)
    }

    fn move_to(&mut self, to: usize) -> StepChange {
        let from = self.step;
        self.step = to;
        self.gate = StepGate::open();
        StepChange::Moved { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn always(valid: bool) -> impl StepValidator {
        move || async move { Ok::<_, ValidatorError>(valid) }
    }

    #[test]
    fn flows_have_expected_step_counts() {
        assert_eq!(WizardFlow::NewEmployee.step_count(), 13);
        assert_eq!(WizardFlow::EmployeeEdit.step_count(), 11);
        assert_eq!(WizardFlow::Onboarding.step_count(), 12);
    }

    #[tokio::test]
    async fn advances_without_validator() {
        let mut wizard = WizardState::new(WizardFlow::Onboarding);
        assert!(wizard.can_advance().await);
        assert_eq!(wizard.advance().await, StepChange::Moved { from: 1, to: 2 });
        assert_eq!(wizard.current_title(), "Personal Information");
    }

    #[tokio::test]
    async fn failing_validator_keeps_step() {
        let mut wizard = WizardState::new(WizardFlow::NewEmployee);
        wizard.register_validator(always(false));
        assert_eq!(
            wizard.advance().await,
            StepChange::Blocked {
                step: 1,
                reason: None
            }
        );
        assert_eq!(wizard.current_step(), 1);
    }

    #[tokio::test]
    async fn erroring_and_panicking_validators_block_without_raising() {
        let mut wizard = WizardState::new(WizardFlow::NewEmployee);
        wizard.register_validator(|| async {
            Err::<bool, _>(ValidatorError("ssn malformed".to_string()))
        });
        assert!(!wizard.can_advance().await);

        wizard.register_validator(|| async {
            if true {
                panic!("validator bug");
            }
            Ok::<_, ValidatorError>(true)
        });
        assert!(!wizard.can_advance().await);
        assert!(matches!(wizard.advance().await, StepChange::Blocked { .. }));
        assert_eq!(wizard.current_step(), 1);
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut wizard = WizardState::new(WizardFlow::EmployeeEdit);
        wizard.register_validator(always(false));
        let counter = calls.clone();
        wizard.register_validator(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ValidatorError>(true)
            }
        });

        assert_eq!(wizard.advance().await, StepChange::Moved { from: 1, to: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gate_blocks_until_step_changes() {
        let mut wizard = WizardState::new(WizardFlow::Onboarding);
        wizard.advance().await;
        wizard.set_gate(false, Some("upload in progress".to_string()));
        assert_eq!(
            wizard.advance().await,
            StepChange::Blocked {
                step: 2,
                reason: Some("upload in progress".to_string())
            }
        );

        assert_eq!(wizard.retreat(), StepChange::Moved { from: 2, to: 1 });
        assert!(wizard.gate().allowed);
        assert_eq!(wizard.advance().await, StepChange::Moved { from: 1, to: 2 });
    }

    #[tokio::test]
    async fn boundaries_are_no_ops() {
        let mut wizard = WizardState::new(WizardFlow::EmployeeEdit);
        assert_eq!(wizard.retreat(), StepChange::OutOfRange { step: 0 });
        assert_eq!(wizard.current_step(), 1);

        for _ in 1..wizard.flow().step_count() {
            wizard.advance().await;
        }
        assert!(wizard.is_last_step());
        assert_eq!(wizard.advance().await, StepChange::OutOfRange { step: 12 });
        assert_eq!(wizard.current_step(), 11);
    }
}
