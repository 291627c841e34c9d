use conclave::{CredentialOutcome, CredentialSpec, CredentialValidator, Probe};
use conclave::ConclaveError;

#[tokio::test]
async fn missing_required_credential_is_a_hard_failure() {
    std::env::remove_var("CONCLAVE_TEST_MISSING_KEY");
    let validator = CredentialValidator::new();
    let spec = CredentialSpec { name: "CONCLAVE_TEST_MISSING_KEY", required: true, probe: Probe::None };

    let result = validator.validate(&spec).await;
    assert!(matches!(result, Err(ConclaveError::Credential { .. })));
}

#[tokio::test]
async fn optional_missing_credential_is_fine() {
    std::env::remove_var("CONCLAVE_TEST_OPTIONAL_KEY");
    let validator = CredentialValidator::new();
    let spec = CredentialSpec { name: "CONCLAVE_TEST_OPTIONAL_KEY", required: false, probe: Probe::None };

    let result = validator.validate(&spec).await.unwrap();
    assert!(matches!(result, CredentialOutcome::Ok));
}

#[tokio::test]
async fn present_credential_with_no_probe_passes() {
    std::env::set_var("CONCLAVE_TEST_PRESENT_KEY", "sk-fake-value");
    let validator = CredentialValidator::new();
    let spec = CredentialSpec { name: "CONCLAVE_TEST_PRESENT_KEY", required: true, probe: Probe::None };

    let result = validator.validate(&spec).await.unwrap();
    assert!(matches!(result, CredentialOutcome::Ok));
    std::env::remove_var("CONCLAVE_TEST_PRESENT_KEY");
}
