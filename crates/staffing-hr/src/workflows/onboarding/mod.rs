//! Invitation lifecycle for prospective employees: invite, register, submit,
//! and HR approval or rejection.

pub mod controller;
pub mod domain;
pub mod repository;
pub mod router;

#[cfg(test)]
pub(crate) mod tests;

pub use controller::{
    Approval, InvitationDispatch, NewInvitation, NotificationOutcome, OnboardingCollaborators,
    OnboardingError, OnboardingLifecycleController, OnboardingSettings, OnboardingSubmitted,
    Registration,
};
pub use domain::{new_invitation_token, EmployeeInvitation, InvitationId, InvitationStatus};
pub use repository::InvitationRepository;
pub use router::onboarding_router;
