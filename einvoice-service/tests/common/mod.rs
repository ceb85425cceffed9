#![allow(dead_code)]

use async_trait::async_trait;
use einvoice_service::adapters::{AdapterError, ApAdapter, MockAdapter, SendOutcome, SendRequest};
use einvoice_service::config::{
    ApConfig, BillitConfig, Config, DeliveryConfig, GuardConfig, HttpRetryConfig, ScradaConfig,
    ServerConfig, StorageConfig, WebhookConfig,
};
use einvoice_service::models::DeliveryStatus;
use einvoice_service::startup::{AppState, Application};
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::utils::signature::sign_hex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const TEST_API_KEY: &str = "test-key";
pub const OTHER_API_KEY: &str = "other-key";
pub const AP_WEBHOOK_SECRET: &str = "ap-webhook-secret";
pub const SCRADA_WEBHOOK_SECRET: &str = "scrada-webhook-secret";

/// Wraps an adapter and counts `send` calls.
pub struct CountingAdapter {
    inner: Arc<dyn ApAdapter>,
    sends: AtomicUsize,
}

impl CountingAdapter {
    pub fn new(inner: Arc<dyn ApAdapter>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            sends: AtomicUsize::new(0),
        })
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApAdapter for CountingAdapter {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome, AdapterError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.inner.send(request).await
    }

    async fn get_status(&self, provider_id: &str) -> Result<DeliveryStatus, AdapterError> {
        self.inner.get_status(provider_id).await
    }
}

/// Holds every send for `delay` before handing it to the inner adapter.
pub struct SlowAdapter {
    inner: MockAdapter,
    delay: Duration,
}

impl SlowAdapter {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MockAdapter::new(),
            delay,
        })
    }
}

#[async_trait]
impl ApAdapter for SlowAdapter {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome, AdapterError> {
        tokio::time::sleep(self.delay).await;
        self.inner.send(request).await
    }

    async fn get_status(&self, provider_id: &str) -> Result<DeliveryStatus, AdapterError> {
        self.inner.get_status(provider_id).await
    }
}

pub fn test_config(data_dir: &std::path::Path) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Random port
        },
        environment: "test".to_string(),
        api_keys: vec![
            Secret::new(TEST_API_KEY.to_string()),
            Secret::new(OTHER_API_KEY.to_string()),
        ],
        storage: StorageConfig::under(data_dir),
        ap: ApConfig {
            adapter: "mock".to_string(),
            billit: BillitConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                api_key: None,
                client_id: None,
                client_secret: None,
                registration_id: None,
                party_id: None,
                timeout: Duration::from_secs(5),
            },
            scrada: ScradaConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                company_id: None,
                api_key: None,
                password: None,
                language: "EN".to_string(),
                timeout: Duration::from_secs(5),
                http_retry: HttpRetryConfig::default(),
            },
        },
        delivery: DeliveryConfig {
            max_attempts: 5,
            base_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        },
        guards: GuardConfig::default(),
        webhooks: WebhookConfig {
            ap_secret: Some(Secret::new(AP_WEBHOOK_SECRET.to_string())),
            scrada_secret: Some(Secret::new(SCRADA_WEBHOOK_SECRET.to_string())),
            max_age: Duration::from_secs(300),
        },
        rate_limit_per_minute: 1000,
        service_name: "einvoice-service-test".to_string(),
    }
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub state: AppState,
    pub adapter: Arc<CountingAdapter>,
    pub client: reqwest::Client,
    pub data_dir: TempDir,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_adapter(Arc::new(MockAdapter::new())).await
    }

    pub async fn spawn_with_adapter(inner: Arc<dyn ApAdapter>) -> Self {
        Self::spawn_with(inner, |_| {}).await
    }

    /// Spawn with a config adjusted from the test defaults.
    pub async fn spawn_with(inner: Arc<dyn ApAdapter>, adjust: impl FnOnce(&mut Config)) -> Self {
        let data_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let adapter = CountingAdapter::new(inner);
        let mut config = test_config(data_dir.path());
        adjust(&mut config);
        let app = Application::build_with_adapter(config, adapter.clone())
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let state = app.state();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            state,
            adapter,
            client,
            data_dir,
        }
    }

    pub async fn submit(&self, idempotency_key: &str, body: &Value) -> reqwest::Response {
        self.submit_as(TEST_API_KEY, idempotency_key, body).await
    }

    pub async fn submit_as(
        &self,
        api_key: &str,
        idempotency_key: &str,
        body: &Value,
    ) -> reqwest::Response {
        self.client
            .post(format!("{}/v0/invoices", self.address))
            .header("x-api-key", api_key)
            .header("Idempotency-Key", idempotency_key)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_invoice(&self, invoice_id: &str) -> reqwest::Response {
        self.client
            .get(format!("{}/v0/invoices/{}", self.address, invoice_id))
            .header("x-api-key", TEST_API_KEY)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// POST a signed AP status event. `timestamp` is sent as-is when given.
    pub async fn post_ap_event(
        &self,
        event_id: &str,
        body: &Value,
        timestamp: Option<String>,
        secret: &str,
    ) -> reqwest::Response {
        let raw = serde_json::to_vec(body).expect("serialize body");
        let signature = sign_hex(secret, &raw).expect("sign body");
        let mut request = self
            .client
            .post(format!("{}/ap/status-webhook", self.address))
            .header("x-api-key", TEST_API_KEY)
            .header("content-type", "application/json")
            .header("x-event-id", event_id)
            .header("x-ap-signature", signature);
        if let Some(ts) = timestamp {
            request = request.header("x-event-timestamp", ts);
        }
        request.body(raw).send().await.expect("Failed to execute request")
    }

    pub async fn post_scrada_event(&self, body: &Value, timestamp: String) -> reqwest::Response {
        let raw = serde_json::to_vec(body).expect("serialize body");
        let signature = sign_hex(SCRADA_WEBHOOK_SECRET, &raw).expect("sign body");
        self.client
            .post(format!("{}/webhooks/scrada", self.address))
            .header("content-type", "application/json")
            .header("x-scrada-signature", signature)
            .header("x-scrada-timestamp", timestamp)
            .body(raw)
            .send()
            .await
            .expect("Failed to execute request")
    }
}

pub fn now_secs() -> String {
    chrono::Utc::now().timestamp().to_string()
}

pub fn order_json() -> Value {
    json!({
        "orderNumber": "INV-2024-001",
        "currency": "EUR",
        "issueDate": "2024-05-01",
        "dueDate": "2024-05-31",
        "buyerReference": "PO-77",
        "supplier": {
            "name": "Fish & Chips BV",
            "vatId": "BE0123456789",
            "endpoint": { "scheme": "0208", "id": "0123456789" },
            "address": { "streetName": "Main 1", "cityName": "Gent", "postalZone": "9000", "countryCode": "BE" }
        },
        "buyer": {
            "name": "Buyer NV",
            "endpoint": { "scheme": "9925", "id": "BE0749521473" },
            "address": { "cityName": "Antwerpen", "countryCode": "BE" }
        },
        "lines": [
            { "description": "Consulting", "quantity": 3, "unitPriceMinor": 10000, "vatRate": 21 },
            { "description": "Books", "quantity": 2, "unitPriceMinor": 1500, "vatRate": 6 }
        ]
    })
}
