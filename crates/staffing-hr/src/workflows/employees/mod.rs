//! Employee records and their dependent credential, history, and compliance
//! collections.

pub mod domain;
pub mod gateway;
pub mod records;
pub mod router;
pub mod submitter;

#[cfg(test)]
pub(crate) mod tests;

pub use domain::{
    ChildCollection, ChildRecord, Employee, EmployeeField, EmployeeId, EmploymentStatus, FieldMap,
    OnboardingStatus,
};
pub use gateway::{EntityPersistenceGateway, GatewayError, HttpEntityGateway};
pub use router::employee_router;
pub use submitter::{
    AggregateCreated, ChildBatch, ChildFailure, CreatedChild, DraftSaved, DraftSession,
    EmployeeAggregateSubmitter, ScalarUpdate, SubmitError,
};
