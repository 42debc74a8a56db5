pub mod clock;
pub mod deadline;
pub mod documents;
pub mod employees;
pub mod onboarding;
pub mod wizard;
