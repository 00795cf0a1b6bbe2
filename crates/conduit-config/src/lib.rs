// SPDX-License-Identifier: MIT
//! Process-environment configuration (spec §6.5). No files are persisted by
//! the core: the vendor API key, backend selector, model name, and timeouts
//! come entirely from the environment.

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Which session kind the supervisor should start for a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Mediate an ACP subprocess session (the default).
    Acp,
    /// Stream directly against a vendor LLM API.
    Anthropic,
}

impl Backend {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw {
            "acp" => Ok(Backend::Acp),
            "anthropic" => Ok(Backend::Anthropic),
            other => Err(ConfigError::InvalidBackend(other.to_string())),
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Acp
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("CONDUIT_VENDOR_API_KEY is required when CONDUIT_BACKEND=anthropic")]
    MissingApiKey,
    #[error("invalid CONDUIT_BACKEND value: {0:?} (expected \"acp\" or \"anthropic\")")]
    InvalidBackend(String),
}

/// The process's resolved configuration. Constructed once at startup via
/// [`Config::from_env`]; nothing here is re-read or persisted afterward.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    /// Required when `backend == Anthropic`; optional (and typically unused)
    /// for `Acp`, where the subprocess manages its own credentials.
    pub vendor_api_key: Option<String>,
    pub model_name: String,
    pub request_timeout: Duration,
    /// Overrides the shell used to launch a PTY, where applicable. Not part
    /// of the core session-mediation logic.
    pub shell_override: Option<String>,
    /// Argv used to launch the ACP agent subprocess (§6.1 transport), when
    /// `backend == Acp`. First element is the executable.
    pub agent_command: Vec<String>,
}

const DEFAULT_MODEL_NAME: &str = "claude-sonnet-4-5";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_AGENT_COMMAND: &str = "claude-code-acp";

impl Config {
    /// Reads `CONDUIT_BACKEND`, `CONDUIT_VENDOR_API_KEY`, `CONDUIT_MODEL`,
    /// `CONDUIT_REQUEST_TIMEOUT_SECS`, and `SHELL` from the process
    /// environment. Fails only if `anthropic` is selected without an API key,
    /// or the backend selector is unrecognized.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match env::var("CONDUIT_BACKEND") {
            Ok(raw) => Backend::parse(&raw)?,
            Err(_) => Backend::default(),
        };

        let vendor_api_key = env::var("CONDUIT_VENDOR_API_KEY").ok().filter(|s| !s.is_empty());
        if backend == Backend::Anthropic && vendor_api_key.is_none() {
            return Err(ConfigError::MissingApiKey);
        }

        let model_name = env::var("CONDUIT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL_NAME.to_string());

        let request_timeout = env::var("CONDUIT_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));

        let shell_override = env::var("SHELL").ok();

        let agent_command = env::var("CONDUIT_ACP_COMMAND")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| vec![DEFAULT_AGENT_COMMAND.to_string()]);

        Ok(Config { backend, vendor_api_key, model_name, request_timeout, shell_override, agent_command })
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for var in [
            "CONDUIT_BACKEND",
            "CONDUIT_VENDOR_API_KEY",
            "CONDUIT_MODEL",
            "CONDUIT_REQUEST_TIMEOUT_SECS",
            "CONDUIT_ACP_COMMAND",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn defaults_to_acp_backend_with_no_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.backend, Backend::Acp);
        assert_eq!(cfg.model_name, DEFAULT_MODEL_NAME);
        assert_eq!(cfg.request_timeout, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));
    }

    #[test]
    fn anthropic_backend_without_key_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("CONDUIT_BACKEND", "anthropic");
        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::MissingApiKey)));
        clear_all();
    }

    #[test]
    fn anthropic_backend_with_key_succeeds() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("CONDUIT_BACKEND", "anthropic");
        env::set_var("CONDUIT_VENDOR_API_KEY", "sk-test-123");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.backend, Backend::Anthropic);
        assert_eq!(cfg.vendor_api_key.as_deref(), Some("sk-test-123"));
        clear_all();
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("CONDUIT_BACKEND", "bogus");
        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::InvalidBackend(_))));
        clear_all();
    }

    #[test]
    fn request_timeout_is_overridable() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("CONDUIT_REQUEST_TIMEOUT_SECS", "30");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        clear_all();
    }

    #[test]
    fn agent_command_defaults_to_a_single_argv_entry() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.agent_command, vec![DEFAULT_AGENT_COMMAND.to_string()]);
        clear_all();
    }

    #[test]
    fn agent_command_is_whitespace_split() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("CONDUIT_ACP_COMMAND", "my-agent --flag value");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.agent_command, vec!["my-agent", "--flag", "value"]);
        clear_all();
    }
}
