//! Employee records, onboarding, and e-signature workflow orchestration for a
//! healthcare staffing organization.

pub mod config;
pub mod error;
pub mod integrations;
pub mod telemetry;
pub mod workflows;
