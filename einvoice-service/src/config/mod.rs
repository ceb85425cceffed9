use anyhow::Result;
use secrecy::Secret;
use service_core::config::{env_list, env_opt, env_or, env_parse, env_secret, load_dotenv};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub environment: String,
    pub api_keys: Vec<Secret<String>>,
    pub storage: StorageConfig,
    pub ap: ApConfig,
    pub delivery: DeliveryConfig,
    pub guards: GuardConfig,
    pub webhooks: WebhookConfig,
    pub rate_limit_per_minute: u32,
    pub service_name: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// File locations. Unset paths are derived from `data_dir`.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub history_dir: PathBuf,
    pub status_path: PathBuf,
    pub dlq_path: PathBuf,
    pub submissions_path: PathBuf,
}

impl StorageConfig {
    pub fn under(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            history_dir: data_dir.join("history"),
            status_path: data_dir.join("status.jsonl"),
            dlq_path: data_dir.join("dlq.jsonl"),
            submissions_path: data_dir.join("submissions.jsonl"),
            data_dir,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ApConfig {
    /// One of `mock`, `mock_error`, `billit`, `scrada`.
    pub adapter: String,
    pub billit: BillitConfig,
    pub scrada: ScradaConfig,
}

#[derive(Clone, Debug)]
pub struct BillitConfig {
    pub base_url: String,
    pub api_key: Option<Secret<String>>,
    pub client_id: Option<String>,
    pub client_secret: Option<Secret<String>>,
    pub registration_id: Option<String>,
    pub party_id: Option<String>,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct ScradaConfig {
    pub base_url: String,
    pub company_id: Option<String>,
    pub api_key: Option<Secret<String>>,
    pub password: Option<Secret<String>>,
    pub language: String,
    pub timeout: Duration,
    pub http_retry: HttpRetryConfig,
}

/// Provider-level HTTP retry for transient responses.
#[derive(Clone, Copy, Debug)]
pub struct HttpRetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for HttpRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DeliveryConfig {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GuardConfig {
    pub idempotency_ttl: Duration,
    pub replay_ttl: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
            replay_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub ap_secret: Option<Secret<String>>,
    pub scrada_secret: Option<Secret<String>>,
    pub max_age: Duration,
}

pub const DEFAULT_SCRADA_BASE_URL: &str = "https://apitest.scrada.be/v1/";
pub const DEFAULT_BILLIT_BASE_URL: &str = "https://api.sandbox.billit.be/";

impl Config {
    pub fn from_env() -> Result<Self> {
        load_dotenv();

        let host = env_or("EINVOICE_HOST", "0.0.0.0");
        let port = env_parse("EINVOICE_PORT", 3001u16)?;

        let data_dir = PathBuf::from(env_or("EINVOICE_DATA_DIR", "./data"));
        let mut storage = StorageConfig::under(&data_dir);
        if let Some(dir) = env_opt("EINVOICE_HISTORY_DIR") {
            storage.history_dir = dir.into();
        }
        if let Some(path) = env_opt("EINVOICE_STATUS_PATH") {
            storage.status_path = path.into();
        }
        if let Some(path) = env_opt("EINVOICE_DLQ_PATH") {
            storage.dlq_path = path.into();
        }
        if let Some(path) = env_opt("EINVOICE_SUBMISSIONS_PATH") {
            storage.submissions_path = path.into();
        }

        let delivery_defaults = DeliveryConfig::default();
        let delivery = DeliveryConfig {
            max_attempts: env_parse("EINVOICE_SEND_MAX_ATTEMPTS", delivery_defaults.max_attempts)?
                .max(1),
            base_backoff: Duration::from_millis(env_parse(
                "EINVOICE_SEND_BASE_BACKOFF_MS",
                delivery_defaults.base_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(env_parse(
                "EINVOICE_SEND_MAX_BACKOFF_MS",
                delivery_defaults.max_backoff.as_millis() as u64,
            )?),
        };

        let guards = GuardConfig {
            idempotency_ttl: Duration::from_secs(env_parse(
                "EINVOICE_IDEMPOTENCY_TTL_SECS",
                24 * 60 * 60u64,
            )?),
            replay_ttl: Duration::from_secs(env_parse(
                "EINVOICE_REPLAY_TTL_SECS",
                24 * 60 * 60u64,
            )?),
        };

        let webhooks = WebhookConfig {
            ap_secret: env_secret("AP_WEBHOOK_SECRET"),
            scrada_secret: env_secret("SCRADA_WEBHOOK_SECRET"),
            max_age: Duration::from_secs(env_parse("EINVOICE_WEBHOOK_MAX_AGE_SECS", 300u64)?),
        };

        let ap = ApConfig {
            adapter: env_or("EINVOICE_AP_ADAPTER", "mock").to_ascii_lowercase(),
            billit: BillitConfig {
                base_url: env_or("BILLIT_BASE_URL", DEFAULT_BILLIT_BASE_URL),
                api_key: env_secret("BILLIT_API_KEY"),
                client_id: env_opt("BILLIT_CLIENT_ID"),
                client_secret: env_secret("BILLIT_CLIENT_SECRET"),
                registration_id: env_opt("BILLIT_REGISTRATION_ID"),
                party_id: env_opt("BILLIT_PARTY_ID"),
                timeout: Duration::from_secs(30),
            },
            scrada: ScradaConfig {
                base_url: env_or("SCRADA_BASE_URL", DEFAULT_SCRADA_BASE_URL),
                company_id: env_opt("SCRADA_COMPANY_ID"),
                api_key: env_secret("SCRADA_API_KEY"),
                password: env_secret("SCRADA_PASSWORD"),
                language: env_or("SCRADA_LANGUAGE", "EN"),
                timeout: Duration::from_secs(30),
                http_retry: HttpRetryConfig::default(),
            },
        };

        Ok(Self {
            server: ServerConfig { host, port },
            environment: env_or("APP_ENV", "development"),
            api_keys: env_list("EINVOICE_API_KEYS")
                .into_iter()
                .map(Secret::new)
                .collect(),
            storage,
            ap,
            delivery,
            guards,
            webhooks,
            rate_limit_per_minute: env_parse("EINVOICE_RATE_LIMIT_PER_MINUTE", 120u32)?,
            service_name: "einvoice-service".to_string(),
        })
    }
}
