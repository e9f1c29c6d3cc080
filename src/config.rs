//! Configuration types.
//!
//! Everything is read once at startup by [`RelayConfig::from_env`] and shared
//! read-only (behind an `Arc`) with every component.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Complete process configuration.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    pub store: StoreConfig,
    pub dispatch: DispatchConfig,
    pub retry: RetryConfig,
    pub flow: FlowConfig,
    pub evolution: EvolutionConfig,
    pub workflow: WorkflowConfig,
    pub intake: IntakeConfig,
    pub log: LogConfig,
}

impl RelayConfig {
    /// Build the configuration from environment variables.
    ///
    /// `EVOLUTION_API_URL`, `EVOLUTION_API_KEY`, `EVOLUTION_INSTANCE_NAME` and
    /// `N8N_WEBHOOK_URL` are required; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            store: StoreConfig::from_env(),
            dispatch: DispatchConfig::from_env()?,
            retry: RetryConfig::from_env()?,
            flow: FlowConfig::from_env()?,
            evolution: EvolutionConfig::from_env()?,
            workflow: WorkflowConfig::from_env()?,
            intake: IntakeConfig::from_env()?,
            log: LogConfig::from_env(),
        })
    }
}

// ── Store ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
}

impl StoreConfig {
    fn from_env() -> Self {
        let db_path = std::env::var("RELAY_DB_PATH")
            .unwrap_or_else(|_| "./data/whatsapp-relay.db".to_string());
        Self {
            db_path: PathBuf::from(db_path),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/whatsapp-relay.db"),
        }
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// Dispatcher (agent manager) tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Sleep between polls when nothing was claimed.
    pub poll_interval: Duration,
    /// Sleep after a store error.
    pub error_backoff: Duration,
    /// Upper bound on items claimed per cycle.
    pub claim_batch: usize,
    /// Items per agent when computing `required_agents` (reported only).
    pub group_size: usize,
    /// Ceiling on items processed concurrently.
    pub max_concurrent: usize,
}

impl DispatchConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            poll_interval: env_secs("DISPATCH_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            error_backoff: env_secs("DISPATCH_ERROR_BACKOFF_SECS", defaults.error_backoff)?,
            claim_batch: env_parse("DISPATCH_CLAIM_BATCH", defaults.claim_batch)?.max(1),
            group_size: env_parse("DISPATCH_GROUP_SIZE", defaults.group_size)?.max(1),
            max_concurrent: env_parse("DISPATCH_MAX_CONCURRENT", defaults.max_concurrent)?.max(1),
        })
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(10),
            claim_batch: 50,
            group_size: 3,
            max_concurrent: 32,
        }
    }
}

// ── Retry agent ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Sleep between retry sweeps.
    pub interval: Duration,
    /// Sleep after a store error.
    pub error_backoff: Duration,
    /// Items whose `attempts` reached this value stay failed for good.
    pub max_attempts: u32,
}

impl RetryConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            interval: env_secs("RETRY_INTERVAL_SECS", defaults.interval)?,
            error_backoff: env_secs("RETRY_ERROR_BACKOFF_SECS", defaults.error_backoff)?,
            max_attempts: env_parse("RETRY_MAX_ATTEMPTS", defaults.max_attempts)?,
        })
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            error_backoff: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

// ── Flow rules ──────────────────────────────────────────────────────

/// Eligibility and context parameters consulted by the item processor.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Bot replies a lead (non-client) may receive.
    pub lead_reply_limit: u32,
    /// Trailing window of chat history handed to the workflow.
    pub context_window: Duration,
    pub notices: Notices,
}

impl FlowConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let window_minutes: u64 = env_parse(
            "FLOW_CONTEXT_WINDOW_MINUTES",
            defaults.context_window.as_secs() / 60,
        )?;
        Ok(Self {
            lead_reply_limit: env_parse("FLOW_LEAD_REPLY_LIMIT", defaults.lead_reply_limit)?,
            context_window: Duration::from_secs(window_minutes * 60),
            notices: Notices::from_env(),
        })
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            lead_reply_limit: 3,
            context_window: Duration::from_secs(30 * 60),
            notices: Notices::default(),
        }
    }
}

/// Fixed user-facing notices sent when the pipeline stops early.
#[derive(Debug, Clone)]
pub struct Notices {
    pub unsupported_type: String,
    pub lead_limit: String,
    pub canceled: String,
    pub blocked: String,
    pub non_compliant: String,
}

impl Notices {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            unsupported_type: env_or("NOTICE_UNSUPPORTED_TYPE", defaults.unsupported_type),
            lead_limit: env_or("NOTICE_LEAD_LIMIT", defaults.lead_limit),
            canceled: env_or("NOTICE_CANCELED", defaults.canceled),
            blocked: env_or("NOTICE_BLOCKED", defaults.blocked),
            non_compliant: env_or("NOTICE_NON_COMPLIANT", defaults.non_compliant),
        }
    }
}

impl Default for Notices {
    fn default() -> Self {
        Self {
            unsupported_type:
                "Desculpe, no momento só consigo processar mensagens de texto e áudio.".into(),
            lead_limit:
                "Você atingiu o limite de interações gratuitas. Por favor aguarde um atendente."
                    .into(),
            canceled: "Sua assinatura foi cancelada. Renove sua assinatura no seu painel para \
                       voltar a ser atendido."
                .into(),
            blocked: "Atendimento indisponível temporariamente. (Bloqueio)".into(),
            non_compliant: "Identificamos uma pendência. Entre em contato com o financeiro."
                .into(),
        }
    }
}

// ── Evolution API (messaging transport) ─────────────────────────────

#[derive(Debug, Clone)]
pub struct EvolutionConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub instance: String,
    pub timeout: Duration,
}

impl EvolutionConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: env_required("EVOLUTION_API_URL")?
                .trim_end_matches('/')
                .to_string(),
            api_key: SecretString::from(env_required("EVOLUTION_API_KEY")?),
            instance: env_required("EVOLUTION_INSTANCE_NAME")?,
            timeout: env_secs("EVOLUTION_TIMEOUT_SECS", Duration::from_secs(10))?,
        })
    }
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            api_key: SecretString::from(String::new()),
            instance: "default".into(),
            timeout: Duration::from_secs(10),
        }
    }
}

// ── AI workflow ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub webhook_url: String,
    /// Hard bound on a single workflow call.
    pub timeout: Duration,
}

impl WorkflowConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            webhook_url: env_required("N8N_WEBHOOK_URL")?,
            timeout: env_secs("N8N_TIMEOUT_SECS", Duration::from_secs(60))?,
        })
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            webhook_url: "http://localhost:5678/webhook/whatsapp".into(),
            timeout: Duration::from_secs(60),
        }
    }
}

// ── Intake ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub host: String,
    pub port: u16,
}

impl IntakeConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: env_or("INTAKE_HOST", defaults.host),
            port: env_parse("INTAKE_PORT", defaults.port)?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

// ── Logging ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// When set, logs are also written to a daily rolling file here.
    pub dir: Option<PathBuf>,
}

impl LogConfig {
    fn from_env() -> Self {
        Self {
            dir: std::env::var("LOG_DIR").ok().map(PathBuf::from),
        }
    }
}

// ── Env helpers ─────────────────────────────────────────────────────

fn env_required(key: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::MissingEnvVar(key.to_string())),
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    env_parse(key, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_defaults() {
        let cfg = DispatchConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.claim_batch, 50);
        assert_eq!(cfg.group_size, 3);
    }

    #[test]
    fn flow_defaults() {
        let cfg = FlowConfig::default();
        assert_eq!(cfg.lead_reply_limit, 3);
        assert_eq!(cfg.context_window, Duration::from_secs(1800));
    }

    #[test]
    fn retry_defaults() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.interval, Duration::from_secs(120));
        assert_eq!(cfg.max_attempts, 3);
    }

    #[test]
    fn env_parse_rejects_garbage() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("RELAY_TEST_GARBAGE_NUMBER", "twelve") };
        let result: Result<u32, _> = env_parse("RELAY_TEST_GARBAGE_NUMBER", 3);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        unsafe { std::env::remove_var("RELAY_TEST_GARBAGE_NUMBER") };
    }

    #[test]
    fn env_parse_falls_back_when_unset() {
        let value: u32 = env_parse("RELAY_TEST_UNSET_NUMBER", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn missing_required_var_is_reported() {
        let err = env_required("RELAY_TEST_DEFINITELY_MISSING").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "RELAY_TEST_DEFINITELY_MISSING"));
    }

    #[test]
    fn intake_bind_addr() {
        let cfg = IntakeConfig::default();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8000");
    }
}
