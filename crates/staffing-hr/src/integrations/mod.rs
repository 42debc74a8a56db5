//! Adapters for the collaborators the workflows talk to: secret codec, object
//! store, and outbound email.

pub mod cipher;
pub mod email;
pub mod storage;
