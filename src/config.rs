//! Engine configuration loaded from `cellsmith.toml`.
//!
//! Missing keys fall back to defaults. `CELLSMITH_API_KEY` takes precedence
//! over the file's `api_key`. Nothing here is global: the config is turned
//! into explicit descriptors and policies handed to each job.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::backend::hosted::{HOSTED_API_URL, HOSTED_DEFAULT_MODEL};
use crate::backend::local::{LOCAL_DEFAULT_ENDPOINT, LOCAL_DEFAULT_MODEL};
use crate::backend::{
    BackendDescriptor, BackendKind, CredentialRef, DEFAULT_SYSTEM_PROMPT, GenerationParams,
    RateLimit,
};
use crate::error::EngineError;
use crate::governor::Governor;
use crate::retry::RetryPolicy;

pub const CONFIG_FILE: &str = "cellsmith.toml";
pub const API_KEY_ENV: &str = "CELLSMITH_API_KEY";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: BackendKind,
    /// Defaults per backend kind when unset.
    pub endpoint: Option<String>,
    pub api_key: String,
    pub model: Option<String>,
    /// Workers requested per job.
    pub concurrency: usize,
    /// Simultaneous requests the backend tolerates.
    pub max_concurrency: usize,
    /// Requests allowed per rate window; 0 disables the budget.
    pub rate_limit: u32,
    pub rate_window_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub per_call_timeout_secs: u64,
    /// Longest a worker waits for a governor slot.
    pub governor_wait_secs: u64,
    /// Slots the governor grants any one backend.
    pub governor_capacity: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Hosted,
            endpoint: None,
            api_key: String::new(),
            model: None,
            concurrency: 4,
            max_concurrency: 4,
            rate_limit: 60,
            rate_window_secs: 60,
            max_attempts: 3,
            backoff_base_ms: 1000,
            backoff_cap_ms: 30_000,
            per_call_timeout_secs: 30,
            governor_wait_secs: 60,
            governor_capacity: crate::governor::DEFAULT_CAPACITY,
            temperature: 0.3,
            max_tokens: 150,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads `path`, or `cellsmith.toml` in the working directory when `None`.
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        Self::load_with_key(path, std::env::var(API_KEY_ENV).ok())
    }

    /// [`load`](Self::load) with the environment's key passed in explicitly.
    pub fn load_with_key(path: Option<&Path>, env_key: Option<String>) -> Result<Self, EngineError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };

        if let Some(key) = env_key.filter(|k| !k.trim().is_empty()) {
            config.api_key = key;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<EngineConfig>(&contents)?)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let fail = |msg: &str| Err(EngineError::Config(msg.to_string()));
        if self.concurrency == 0 {
            return fail("concurrency must be at least 1");
        }
        if self.max_concurrency == 0 {
            return fail("max_concurrency must be at least 1");
        }
        if self.max_attempts == 0 {
            return fail("max_attempts must be at least 1");
        }
        if self.rate_limit > 0 && self.rate_window_secs == 0 {
            return fail("rate_window_secs must be positive when rate_limit is set");
        }
        if self.per_call_timeout_secs == 0 {
            return fail("per_call_timeout_secs must be positive");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return fail("temperature must be between 0.0 and 2.0");
        }
        Ok(())
    }

    pub fn endpoint(&self) -> String {
        self.endpoint.clone().unwrap_or_else(|| match self.backend {
            BackendKind::Hosted => HOSTED_API_URL.to_string(),
            BackendKind::Local => LOCAL_DEFAULT_ENDPOINT.to_string(),
        })
    }

    pub fn model(&self) -> String {
        self.model.clone().unwrap_or_else(|| match self.backend {
            BackendKind::Hosted => HOSTED_DEFAULT_MODEL.to_string(),
            BackendKind::Local => LOCAL_DEFAULT_MODEL.to_string(),
        })
    }

    pub fn descriptor(&self) -> BackendDescriptor {
        BackendDescriptor {
            kind: self.backend,
            endpoint: self.endpoint(),
            credential: match self.backend {
                BackendKind::Hosted => CredentialRef::new(self.api_key.clone()),
                BackendKind::Local => CredentialRef::default(),
            },
            model: self.model(),
            max_concurrency: self.max_concurrency,
            rate_limit: (self.rate_limit > 0).then(|| RateLimit {
                requests: self.rate_limit,
                window: Duration::from_secs(self.rate_window_secs),
            }),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base: Duration::from_millis(self.backoff_base_ms),
            cap: Duration::from_millis(self.backoff_cap_ms),
        }
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            system_prompt: Some(self.system_prompt.clone()).filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_secs(self.per_call_timeout_secs)
    }

    pub fn governor(&self) -> Governor {
        Governor::new(
            self.governor_capacity,
            Duration::from_secs(self.governor_wait_secs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = EngineConfig::default();
        assert_eq!(config.backend, BackendKind::Hosted);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_base_ms, 1000);
        assert_eq!(config.backoff_cap_ms, 30_000);
        assert_eq!(config.per_call_timeout_secs, 30);
        assert!(config.api_key.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            backend = "local"
            max_attempts = 5
            rate_limit = 0
        "#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.endpoint(), LOCAL_DEFAULT_ENDPOINT);
        assert_eq!(config.model(), LOCAL_DEFAULT_MODEL);
        assert!(config.descriptor().rate_limit.is_none());
    }

    #[test]
    fn descriptor_for_hosted_carries_credential() {
        let config = EngineConfig {
            api_key: "sk-test".into(),
            model: Some("custom".into()),
            ..EngineConfig::default()
        };
        let d = config.descriptor();
        assert_eq!(d.kind, BackendKind::Hosted);
        assert_eq!(d.endpoint, HOSTED_API_URL);
        assert_eq!(d.model, "custom");
        assert_eq!(d.credential.expose(), "sk-test");
        assert_eq!(d.rate_limit, Some(RateLimit::per_minute(60)));
    }

    #[test]
    fn local_descriptor_drops_credential() {
        let config = EngineConfig {
            backend: BackendKind::Local,
            api_key: "sk-test".into(),
            ..EngineConfig::default()
        };
        assert!(config.descriptor().credential.is_empty());
    }

    #[test]
    fn retry_policy_from_config() {
        let config = EngineConfig {
            max_attempts: 4,
            backoff_base_ms: 250,
            backoff_cap_ms: 2000,
            ..EngineConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base, Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(2000));
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let config = EngineConfig {
            concurrency: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        let config = EngineConfig {
            max_attempts: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            temperature: 3.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn blank_system_prompt_is_omitted() {
        let config = EngineConfig {
            system_prompt: "  ".into(),
            ..EngineConfig::default()
        };
        assert!(config.generation_params().system_prompt.is_none());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cellsmith.toml");
        std::fs::write(&path, "concurrency = 2\nmodel = \"m\"\n").unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.model(), "m");
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            EngineConfig::load(Some(&missing)),
            Err(EngineError::Io(_))
        ));
    }
}
