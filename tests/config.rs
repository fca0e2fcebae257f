use std::time::Duration;

use cellsmith::backend::BackendKind;
use cellsmith::{EngineConfig, EngineError};

#[test]
fn load_reads_explicit_file_and_builds_job_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cellsmith.toml");
    std::fs::write(
        &path,
        r#"
backend = "local"
endpoint = "http://10.0.0.5:11434"
model = "mistral"
max_concurrency = 2
rate_limit = 30
rate_window_secs = 10
max_attempts = 4
backoff_base_ms = 500
per_call_timeout_secs = 5
temperature = 0.0
"#,
    )
    .unwrap();

    let config = EngineConfig::load(Some(&path)).unwrap();

    let descriptor = config.descriptor();
    assert_eq!(descriptor.kind, BackendKind::Local);
    assert_eq!(descriptor.endpoint, "http://10.0.0.5:11434");
    assert_eq!(descriptor.model, "mistral");
    assert_eq!(descriptor.max_concurrency, 2);
    let rate = descriptor.rate_limit.unwrap();
    assert_eq!(rate.requests, 30);
    assert_eq!(rate.window, Duration::from_secs(10));

    let retry = config.retry_policy();
    assert_eq!(retry.max_attempts, 4);
    assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(1000));
    assert_eq!(config.per_call_timeout(), Duration::from_secs(5));
    assert_eq!(config.generation_params().temperature, 0.0);
}

#[test]
fn load_rejects_invalid_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "max_concurrency = 0\n").unwrap();

    let err = EngineConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)), "{err}");
}

#[test]
fn load_reports_malformed_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "backend = [\n").unwrap();

    let err = EngineConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(err, EngineError::Toml(_)), "{err}");
}

#[test]
fn unknown_backend_kind_is_rejected() {
    let err = toml::from_str::<EngineConfig>("backend = \"cloud\"").unwrap_err();
    assert!(err.to_string().contains("cloud"));
}

#[test]
fn environment_key_overrides_file_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cellsmith.toml");
    std::fs::write(&path, "api_key = \"from-file\"\n").unwrap();

    let config = EngineConfig::load_with_key(Some(&path), Some("from-env".into())).unwrap();
    assert_eq!(config.api_key, "from-env");
    assert_eq!(config.descriptor().credential.expose(), "from-env");

    let config = EngineConfig::load_with_key(Some(&path), Some("  ".into())).unwrap();
    assert_eq!(config.api_key, "from-file");

    let config = EngineConfig::load_with_key(Some(&path), None).unwrap();
    assert_eq!(config.api_key, "from-file");
}

#[test]
fn load_reads_key_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cellsmith.toml");
    std::fs::write(&path, "api_key = \"from-file\"\n").unwrap();

    // Other tests in this binary never assert on the key.
    unsafe { std::env::set_var(cellsmith::config::API_KEY_ENV, "sk-env") };
    let config = EngineConfig::load(Some(&path)).unwrap();
    unsafe { std::env::remove_var(cellsmith::config::API_KEY_ENV) };

    assert_eq!(config.api_key, "sk-env");
}
