//! Access-point adapters. One is chosen by configuration at startup.

pub mod billit;
pub mod http;
pub mod mock;
pub mod scrada;
pub mod status;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config::ApConfig;
use crate::models::{ComputedInvoice, DeliveryStatus};

pub use billit::BillitAdapter;
pub use mock::{MockAdapter, MockErrorAdapter};
pub use scrada::ScradaAdapter;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{adapter}: transport error: {message}")]
    Transport {
        adapter: &'static str,
        message: String,
    },

    #[error("{adapter}: HTTP {status}: {message}")]
    Http {
        adapter: &'static str,
        status: u16,
        message: String,
    },

    #[error("{adapter}: configuration error: {message}")]
    Config {
        adapter: &'static str,
        message: String,
    },

    #[error("{adapter}: authentication failed: {message}")]
    Auth {
        adapter: &'static str,
        message: String,
    },

    #[error("{adapter}: unexpected response: {message}")]
    InvalidResponse {
        adapter: &'static str,
        message: String,
    },
}

impl AdapterError {
    /// Transient failures are worth another attempt; 4xx (other than 429),
    /// configuration and credential problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::Transport { .. } | AdapterError::InvalidResponse { .. } => true,
            AdapterError::Http { status, .. } => *status == 429 || *status >= 500,
            AdapterError::Config { .. } | AdapterError::Auth { .. } => false,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            AdapterError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Submission channel used for one provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Json,
    Xml,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Json => "json",
            Channel::Xml => "xml",
        }
    }
}

/// Record of one channel attempt inside a single send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAttempt {
    pub channel: Channel,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackInfo {
    pub triggered: bool,
    /// HTTP status of the channel that failed over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub provider_id: String,
    /// One of queued, sent or error.
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<ChannelAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackInfo>,
}

impl SendOutcome {
    pub fn new(provider_id: impl Into<String>, status: DeliveryStatus) -> Self {
        Self {
            provider_id: provider_id.into(),
            status,
            message: None,
            channel: None,
            attempts: Vec::new(),
            fallback: None,
        }
    }
}

/// Everything an adapter needs to transmit one invoice.
#[derive(Debug, Clone, Copy)]
pub struct SendRequest<'a> {
    pub tenant: &'a str,
    pub invoice_id: &'a str,
    pub external_reference: &'a str,
    pub invoice: &'a ComputedInvoice,
    pub ubl_xml: &'a str,
    /// Deterministic token sent as `Idempotency-Key`.
    pub idempotency_token: &'a str,
}

#[async_trait]
pub trait ApAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome, AdapterError>;

    async fn get_status(&self, provider_id: &str) -> Result<DeliveryStatus, AdapterError>;
}

/// Build the adapter named in configuration.
pub fn build_adapter(config: &ApConfig) -> Result<Arc<dyn ApAdapter>, AdapterError> {
    let adapter: Arc<dyn ApAdapter> = match config.adapter.as_str() {
        "mock" => Arc::new(MockAdapter::new()),
        "mock_error" => Arc::new(MockErrorAdapter),
        "billit" => Arc::new(BillitAdapter::new(config.billit.clone())?),
        "scrada" => Arc::new(ScradaAdapter::new(config.scrada.clone())?),
        other => {
            return Err(AdapterError::Config {
                adapter: "registry",
                message: format!("unknown access point adapter '{other}'"),
            })
        }
    };
    tracing::info!(adapter = adapter.name(), "Access point adapter selected");
    Ok(adapter)
}
