pub mod conclave;

pub use conclave::config::AppConfig;
pub use conclave::credential::{CredentialOutcome, CredentialSpec, CredentialValidator, Probe};
pub use conclave::data::{AgentDescriptor, AgentName};
pub use conclave::error::ConclaveError;
pub use conclave::supervisor::Supervisor;
