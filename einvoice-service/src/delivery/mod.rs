//! Delivery orchestration: one provider send per attempt, capped jittered
//! backoff between attempts, status recorded after each attempt and a DLQ
//! entry when delivery fails terminally.

pub mod backoff;

use chrono::Utc;
use service_core::utils::signature::sha256_hex;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use backoff::RetryPolicy;

use crate::adapters::{AdapterError, ApAdapter, SendOutcome, SendRequest};
use crate::models::{ComputedInvoice, DeliveryStatus, DlqItem, DlqPayload, Order};
use crate::services::metrics;
use crate::stores::{DlqStore, StatusStore, StatusUpdate};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery failed after {attempts} attempt(s): {message}")]
    Failed {
        attempts: u32,
        /// True when the last failure was not worth retrying.
        permanent: bool,
        message: String,
        dlq_id: Option<String>,
    },

    #[error("delivery interrupted by shutdown after {attempts} attempt(s)")]
    Cancelled { attempts: u32, dlq_id: Option<String> },
}

impl DeliveryError {
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryError::Failed { attempts, .. } | DeliveryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn dlq_id(&self) -> Option<&str> {
        match self {
            DeliveryError::Failed { dlq_id, .. } | DeliveryError::Cancelled { dlq_id, .. } => {
                dlq_id.as_deref()
            }
        }
    }
}

/// One invoice to deliver.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryJob<'a> {
    pub tenant: &'a str,
    pub invoice_id: &'a str,
    pub external_reference: &'a str,
    pub order: &'a Order,
    pub invoice: &'a ComputedInvoice,
    pub ubl_xml: &'a str,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryOptions {
    /// Do not write a DLQ entry on terminal failure (operator retries).
    pub skip_dlq: bool,
}

#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub outcome: SendOutcome,
    pub attempts: u32,
}

/// Failure of a single attempt.
struct AttemptFailure {
    retryable: bool,
    message: String,
    channel: Option<String>,
}

impl From<AdapterError> for AttemptFailure {
    fn from(err: AdapterError) -> Self {
        Self {
            retryable: err.is_retryable(),
            message: err.to_string(),
            channel: None,
        }
    }
}

/// Deterministic provider idempotency token for one invoice.
pub fn idempotency_token(environment: &str, tenant: &str, invoice_id: &str) -> String {
    sha256_hex(&format!("{environment}|{tenant}|{invoice_id}"))
}

#[derive(Clone)]
pub struct DeliveryOrchestrator {
    adapter: Arc<dyn ApAdapter>,
    status: Arc<StatusStore>,
    dlq: Arc<DlqStore>,
    policy: RetryPolicy,
    environment: String,
    shutdown: CancellationToken,
}

impl DeliveryOrchestrator {
    pub fn new(
        adapter: Arc<dyn ApAdapter>,
        status: Arc<StatusStore>,
        dlq: Arc<DlqStore>,
        policy: RetryPolicy,
        environment: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            adapter,
            status,
            dlq,
            policy,
            environment: environment.into(),
            shutdown,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn ApAdapter> {
        &self.adapter
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn send_with_retry(
        &self,
        job: DeliveryJob<'_>,
        options: DeliveryOptions,
    ) -> Result<DeliveryReport, DeliveryError> {
        let adapter = self.adapter.name();
        let token = idempotency_token(&self.environment, job.tenant, job.invoice_id);
        let request = SendRequest {
            tenant: job.tenant,
            invoice_id: job.invoice_id,
            external_reference: job.external_reference,
            invoice: job.invoice,
            ubl_xml: job.ubl_xml,
            idempotency_token: &token,
        };

        self.record(StatusUpdate::new(job.tenant, job.invoice_id, DeliveryStatus::Queued))
            .await;

        let mut attempt = 0u32;
        let failure = loop {
            attempt += 1;
            metrics::record_send_attempt(adapter);
            tracing::debug!(
                adapter,
                tenant = %job.tenant,
                invoice_id = %job.invoice_id,
                attempt,
                "Sending invoice to access point"
            );

            let failure = match self.adapter.send(request).await {
                Ok(outcome) if outcome.status != DeliveryStatus::Error => {
                    metrics::record_send_success(adapter);
                    self.record(
                        StatusUpdate::new(job.tenant, job.invoice_id, outcome.status)
                            .provider_id(outcome.provider_id.clone())
                            .attempts(attempt),
                    )
                    .await;
                    tracing::info!(
                        adapter,
                        tenant = %job.tenant,
                        invoice_id = %job.invoice_id,
                        provider_id = %outcome.provider_id,
                        status = %outcome.status,
                        attempt,
                        "Invoice accepted by access point"
                    );
                    return Ok(DeliveryReport {
                        outcome,
                        attempts: attempt,
                    });
                }
                Ok(outcome) => AttemptFailure {
                    retryable: true,
                    message: outcome
                        .message
                        .clone()
                        .unwrap_or_else(|| format!("{adapter}: provider reported error")),
                    channel: outcome.channel.map(|c| c.as_str().to_string()),
                },
                Err(err) => AttemptFailure::from(err),
            };

            metrics::record_send_failure(adapter, failure.retryable);
            self.record(
                StatusUpdate::new(job.tenant, job.invoice_id, DeliveryStatus::Error)
                    .attempts(attempt)
                    .last_error(failure.message.clone()),
            )
            .await;

            if !failure.retryable || attempt >= self.policy.max_attempts {
                break failure;
            }

            let delay = self.policy.delay_after(attempt);
            tracing::warn!(
                adapter,
                tenant = %job.tenant,
                invoice_id = %job.invoice_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure.message,
                "Delivery attempt failed, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => {
                    let dlq_id = self
                        .dead_letter(&job, "delivery interrupted by shutdown", None, options)
                        .await;
                    return Err(DeliveryError::Cancelled { attempts: attempt, dlq_id });
                }
            }
        };

        tracing::error!(
            adapter,
            tenant = %job.tenant,
            invoice_id = %job.invoice_id,
            attempts = attempt,
            permanent = !failure.retryable,
            error = %failure.message,
            "Delivery failed"
        );
        let dlq_id = self
            .dead_letter(&job, &failure.message, failure.channel.clone(), options)
            .await;
        Err(DeliveryError::Failed {
            attempts: attempt,
            permanent: !failure.retryable,
            message: failure.message,
            dlq_id,
        })
    }

    async fn record(&self, update: StatusUpdate) {
        let (tenant, invoice_id) = (update.tenant.clone(), update.invoice_id.clone());
        if let Err(e) = self.status.upsert(update).await {
            tracing::error!(%tenant, %invoice_id, error = %e, "Failed to record delivery status");
        }
    }

    /// Append a DLQ entry. A write failure is logged and never replaces the
    /// delivery error.
    async fn dead_letter(
        &self,
        job: &DeliveryJob<'_>,
        error: &str,
        channel: Option<String>,
        options: DeliveryOptions,
    ) -> Option<String> {
        if options.skip_dlq {
            return None;
        }
        let item = DlqItem {
            id: uuid::Uuid::now_v7().to_string(),
            tenant: job.tenant.to_string(),
            invoice_id: job.invoice_id.to_string(),
            error: error.to_string(),
            payload: DlqPayload {
                order: job.order.clone(),
                channel,
                adapter: self.adapter.name().to_string(),
                ubl_xml: job.ubl_xml.to_string(),
            },
            ts: Utc::now(),
        };
        match self.dlq.append(&item).await {
            Ok(()) => {
                metrics::record_dlq_append(job.tenant);
                Some(item.id)
            }
            Err(e) => {
                tracing::error!(
                    tenant = %job.tenant,
                    invoice_id = %job.invoice_id,
                    error = %e,
                    "Failed to write DLQ entry"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockAdapter, MockErrorAdapter};
    use crate::codec::render_ubl;
    use crate::codec::ubl::tests::sample_order;
    use crate::services::tax::compute_invoice;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        status: Arc<StatusStore>,
        dlq: Arc<DlqStore>,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let status = Arc::new(StatusStore::open(dir.path().join("status.jsonl")).await.unwrap());
        let dlq = Arc::new(DlqStore::new(dir.path().join("dlq.jsonl")));
        Fixture {
            _dir: dir,
            status,
            dlq,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(5),
            jitter: 0.15,
        }
    }

    /// Fails with the given error until `succeed_on`, counting calls.
    struct Flaky {
        calls: AtomicU32,
        succeed_on: u32,
        status: u16,
    }

    #[async_trait]
    impl ApAdapter for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome, AdapterError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                assert_eq!(request.idempotency_token.len(), 64);
                Ok(SendOutcome::new("p-1", DeliveryStatus::Sent))
            } else {
                Err(AdapterError::Http {
                    adapter: "flaky",
                    status: self.status,
                    message: "nope".into(),
                })
            }
        }

        async fn get_status(&self, _provider_id: &str) -> Result<DeliveryStatus, AdapterError> {
            Ok(DeliveryStatus::Sent)
        }
    }

    fn orchestrator(adapter: Arc<dyn ApAdapter>, f: &Fixture) -> DeliveryOrchestrator {
        DeliveryOrchestrator::new(
            adapter,
            f.status.clone(),
            f.dlq.clone(),
            fast_policy(),
            "test",
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let f = fixture().await;
        let adapter = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 3,
            status: 503,
        });
        let order = sample_order();
        let invoice = compute_invoice(&order).unwrap();
        let xml = render_ubl(&invoice);
        let job = DeliveryJob {
            tenant: "t1",
            invoice_id: "inv-1",
            external_reference: "INV-2024-001",
            order: &order,
            invoice: &invoice,
            ubl_xml: &xml,
        };

        let report = orchestrator(adapter.clone(), &f)
            .send_with_retry(job, DeliveryOptions::default())
            .await
            .unwrap();
        assert_eq!(report.attempts, 3);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);

        let status = f.status.get("t1", "inv-1").unwrap();
        assert_eq!(status.status, DeliveryStatus::Sent);
        assert_eq!(status.attempts, 3);
        assert!(f.dlq.list(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter_once() {
        let f = fixture().await;
        let order = sample_order();
        let invoice = compute_invoice(&order).unwrap();
        let xml = render_ubl(&invoice);
        let job = DeliveryJob {
            tenant: "t1",
            invoice_id: "inv-2",
            external_reference: "INV-2024-001",
            order: &order,
            invoice: &invoice,
            ubl_xml: &xml,
        };

        let err = orchestrator(Arc::new(MockErrorAdapter), &f)
            .send_with_retry(job, DeliveryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.attempts(), 5);
        assert!(err.dlq_id().is_some());

        let items = f.dlq.list(None, None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].invoice_id, "inv-2");
        assert_eq!(items[0].payload.adapter, "mock_error");
        assert_eq!(f.status.get("t1", "inv-2").unwrap().status, DeliveryStatus::Error);
    }

    #[tokio::test]
    async fn permanent_errors_stop_immediately() {
        let f = fixture().await;
        let adapter = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: u32::MAX,
            status: 422,
        });
        let order = sample_order();
        let invoice = compute_invoice(&order).unwrap();
        let xml = render_ubl(&invoice);
        let job = DeliveryJob {
            tenant: "t1",
            invoice_id: "inv-3",
            external_reference: "INV-2024-001",
            order: &order,
            invoice: &invoice,
            ubl_xml: &xml,
        };

        let err = orchestrator(adapter.clone(), &f)
            .send_with_retry(job, DeliveryOptions { skip_dlq: true })
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Failed { permanent: true, attempts: 1, .. }));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
        assert!(f.dlq.list(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff() {
        let f = fixture().await;
        let token = CancellationToken::new();
        let orchestrator = DeliveryOrchestrator::new(
            Arc::new(MockErrorAdapter),
            f.status.clone(),
            f.dlq.clone(),
            RetryPolicy {
                base: Duration::from_secs(30),
                cap: Duration::from_secs(30),
                ..fast_policy()
            },
            "test",
            token.clone(),
        );
        let order = sample_order();
        let invoice = compute_invoice(&order).unwrap();
        let xml = render_ubl(&invoice);
        let job = DeliveryJob {
            tenant: "t1",
            invoice_id: "inv-4",
            external_reference: "INV-2024-001",
            order: &order,
            invoice: &invoice,
            ubl_xml: &xml,
        };

        token.cancel();
        let err = orchestrator
            .send_with_retry(job, DeliveryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Cancelled { attempts: 1, .. }));
        assert_eq!(f.dlq.list(None, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mock_adapter_queues() {
        let f = fixture().await;
        let order = sample_order();
        let invoice = compute_invoice(&order).unwrap();
        let xml = render_ubl(&invoice);
        let job = DeliveryJob {
            tenant: "t1",
            invoice_id: "inv-5",
            external_reference: "INV-2024-001",
            order: &order,
            invoice: &invoice,
            ubl_xml: &xml,
        };
        let report = orchestrator(Arc::new(MockAdapter::new()), &f)
            .send_with_retry(job, DeliveryOptions::default())
            .await
            .unwrap();
        assert_eq!(report.outcome.provider_id, "mock-inv-5");
        assert_eq!(idempotency_token("test", "t1", "inv-5").len(), 64);
    }
}
