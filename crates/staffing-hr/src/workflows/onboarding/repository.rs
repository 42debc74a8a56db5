use super::domain::{EmployeeInvitation, InvitationId};
use crate::workflows::documents::RepositoryError;

/// Storage abstraction for invitations so the controller can run against memory.
pub trait InvitationRepository: Send + Sync {
    fn insert(&self, invitation: EmployeeInvitation) -> Result<EmployeeInvitation, RepositoryError>;
    fn update(&self, invitation: EmployeeInvitation) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &InvitationId) -> Result<Option<EmployeeInvitation>, RepositoryError>;
    fn fetch_by_token(&self, token: &str) -> Result<Option<EmployeeInvitation>, RepositoryError>;
    fn list(&self) -> Result<Vec<EmployeeInvitation>, RepositoryError>;
}
