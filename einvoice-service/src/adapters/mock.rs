use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{AdapterError, ApAdapter, SendOutcome, SendRequest};
use crate::models::DeliveryStatus;

/// How long a mock submission stays queued before it reads as delivered.
const MOCK_DELIVERY_DELAY: Duration = Duration::from_millis(250);

/// In-process adapter that accepts everything.
#[derive(Clone, Default)]
pub struct MockAdapter {
    sent_at: Arc<DashMap<String, Instant>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome, AdapterError> {
        let provider_id = format!("mock-{}", request.invoice_id);
        self.sent_at
            .entry(provider_id.clone())
            .or_insert_with(Instant::now);
        tracing::debug!(provider_id = %provider_id, "Mock access point accepted invoice");
        Ok(SendOutcome::new(provider_id, DeliveryStatus::Queued))
    }

    async fn get_status(&self, provider_id: &str) -> Result<DeliveryStatus, AdapterError> {
        let status = match self.sent_at.get(provider_id) {
            Some(sent) if sent.elapsed() >= MOCK_DELIVERY_DELAY => DeliveryStatus::Delivered,
            _ => DeliveryStatus::Queued,
        };
        Ok(status)
    }
}

/// Adapter whose sends always fail with a transient error.
#[derive(Clone, Copy, Default)]
pub struct MockErrorAdapter;

#[async_trait]
impl ApAdapter for MockErrorAdapter {
    fn name(&self) -> &'static str {
        "mock_error"
    }

    async fn send(&self, _request: SendRequest<'_>) -> Result<SendOutcome, AdapterError> {
        Err(AdapterError::Transport {
            adapter: "mock_error",
            message: "simulated access point failure".to_string(),
        })
    }

    async fn get_status(&self, _provider_id: &str) -> Result<DeliveryStatus, AdapterError> {
        Ok(DeliveryStatus::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ubl::tests::sample_order;
    use crate::services::tax::compute_invoice;

    #[tokio::test]
    async fn mock_delivers_after_delay() {
        let invoice = compute_invoice(&sample_order()).unwrap();
        let adapter = MockAdapter::new();
        let outcome = adapter
            .send(SendRequest {
                tenant: "t1",
                invoice_id: "inv-1",
                external_reference: "inv-1",
                invoice: &invoice,
                ubl_xml: "<Invoice/>",
                idempotency_token: "tok",
            })
            .await
            .unwrap();

        assert_eq!(outcome.provider_id, "mock-inv-1");
        assert_eq!(outcome.status, DeliveryStatus::Queued);
        assert_eq!(
            adapter.get_status("mock-inv-1").await.unwrap(),
            DeliveryStatus::Queued
        );

        tokio::time::sleep(MOCK_DELIVERY_DELAY + Duration::from_millis(20)).await;
        assert_eq!(
            adapter.get_status("mock-inv-1").await.unwrap(),
            DeliveryStatus::Delivered
        );
    }
}
