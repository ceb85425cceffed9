//! Scrada access point: JSON sales-invoice channel with a UBL fallback.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::ExposeSecret;
use serde_json::Value;

use super::http::{build_client, error_from_response, send_with_http_retry};
use super::status::map_scrada_status;
use super::{AdapterError, ApAdapter, Channel, ChannelAttempt, FallbackInfo, SendOutcome, SendRequest};
use crate::codec::build_sales_invoice;
use crate::config::ScradaConfig;
use crate::models::DeliveryStatus;
use crate::services::metrics;

const ADAPTER: &str = "scrada";
const PEPPOL_ID_SCHEME: &str = "iso6523-actorid-upis";
const DOCUMENT_TYPE_SCHEME: &str = "busdox-docid-qns";
const DOCUMENT_TYPE_VALUE: &str = "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2::Invoice##urn:cen.eu:en16931:2017#compliant#urn:fdc:peppol.eu:2017:poacc:billing:3.0::2.1";
const PROCESS_SCHEME: &str = "cenbii-procid-ubl";
const PROCESS_VALUE: &str = "urn:fdc:peppol.eu:2017:poacc:billing:01:1.0";

#[derive(Clone)]
pub struct ScradaAdapter {
    client: Client,
    config: ScradaConfig,
}

/// Credentials resolved at first use.
struct Credentials<'a> {
    company_id: &'a str,
    api_key: &'a str,
    password: &'a str,
}

impl ScradaAdapter {
    pub fn new(config: ScradaConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            client: build_client(ADAPTER, config.timeout)?,
            config,
        })
    }

    fn credentials(&self) -> Result<Credentials<'_>, AdapterError> {
        let missing = |name: &str| AdapterError::Config {
            adapter: ADAPTER,
            message: format!("{name} is not set"),
        };
        Ok(Credentials {
            company_id: self
                .config
                .company_id
                .as_deref()
                .ok_or_else(|| missing("SCRADA_COMPANY_ID"))?,
            api_key: self
                .config
                .api_key
                .as_ref()
                .map(|s| s.expose_secret().as_str())
                .ok_or_else(|| missing("SCRADA_API_KEY"))?,
            password: self
                .config
                .password
                .as_ref()
                .map(|s| s.expose_secret().as_str())
                .ok_or_else(|| missing("SCRADA_PASSWORD"))?,
        })
    }

    fn company_url(&self, creds: &Credentials<'_>, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/company/{}/{}", creds.company_id, path.trim_start_matches('/'))
    }

    fn authed(&self, creds: &Credentials<'_>, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("X-API-KEY", creds.api_key)
            .header("X-PASSWORD", creds.password)
            .header("Language", self.config.language.as_str())
    }

    async fn document_id(response: Response) -> Result<String, AdapterError> {
        let body = response.text().await.map_err(|e| AdapterError::InvalidResponse {
            adapter: ADAPTER,
            message: e.to_string(),
        })?;
        extract_document_id(&body).ok_or_else(|| AdapterError::InvalidResponse {
            adapter: ADAPTER,
            message: "response did not include a documentId".to_string(),
        })
    }

    async fn send_json(
        &self,
        creds: &Credentials<'_>,
        request: &SendRequest<'_>,
    ) -> Result<String, AdapterError> {
        let payload = build_sales_invoice(request.invoice, Some(request.external_reference));
        let url = self.company_url(creds, "peppol/outbound/salesInvoice");
        let response = send_with_http_retry(ADAPTER, &self.config.http_retry, || {
            self.authed(creds, self.client.post(&url))
                .header("Idempotency-Key", request.idempotency_token)
                .json(&payload)
        })
        .await?;

        if !response.status().is_success() {
            return Err(error_from_response(ADAPTER, response, &[creds.api_key, creds.password]).await);
        }
        Self::document_id(response).await
    }

    async fn send_xml(
        &self,
        creds: &Credentials<'_>,
        request: &SendRequest<'_>,
    ) -> Result<String, AdapterError> {
        let order = &request.invoice.order;
        let url = self.company_url(creds, "peppol/outbound/document");
        let sender = order.supplier.endpoint.as_ref().and_then(|e| e.participant_id());
        let receiver = order.buyer.endpoint.as_ref().and_then(|e| e.participant_id());
        let country = order
            .supplier
            .address
            .as_ref()
            .and_then(|a| a.country_code.clone())
            .unwrap_or_else(|| "BE".to_string());

        let response = send_with_http_retry(ADAPTER, &self.config.http_retry, || {
            let mut builder = self
                .authed(creds, self.client.post(&url))
                .query(&[("externalReference", request.external_reference)])
                .header("Content-Type", "application/xml")
                .header("Idempotency-Key", request.idempotency_token)
                .header("x-scrada-peppol-c1-country-code", country.as_str())
                .header("x-scrada-peppol-document-type-scheme", DOCUMENT_TYPE_SCHEME)
                .header("x-scrada-peppol-document-type-value", DOCUMENT_TYPE_VALUE)
                .header("x-scrada-peppol-process-scheme", PROCESS_SCHEME)
                .header("x-scrada-peppol-process-value", PROCESS_VALUE);
            if let Some(sender) = &sender {
                builder = builder
                    .header("x-scrada-peppol-sender-scheme", PEPPOL_ID_SCHEME)
                    .header("x-scrada-peppol-sender-id", sender.as_str());
            }
            if let Some(receiver) = &receiver {
                builder = builder
                    .header("x-scrada-peppol-receiver-scheme", PEPPOL_ID_SCHEME)
                    .header("x-scrada-peppol-receiver-id", receiver.as_str());
            }
            builder.body(request.ubl_xml.to_string())
        })
        .await?;

        if !response.status().is_success() {
            return Err(error_from_response(ADAPTER, response, &[creds.api_key, creds.password]).await);
        }
        Self::document_id(response).await
    }
}

/// Scrada answers with a JSON object, a JSON string or a bare id.
fn extract_document_id(body: &str) -> Option<String> {
    let trimmed = body.trim();
    let candidate = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::String(id)) => id,
        Ok(Value::Object(map)) => ["documentId", "documentID", "id"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string)?,
        Ok(_) => return None,
        Err(_) => trimmed.trim_matches('"').to_string(),
    };
    let candidate = candidate.trim();
    (!candidate.is_empty()).then(|| candidate.to_string())
}

/// JSON rejections that the UBL channel may accept.
fn should_fall_back(err: &AdapterError) -> bool {
    matches!(err, AdapterError::Http { status, .. } if (400..500).contains(status) && *status != 429)
}

#[async_trait]
impl ApAdapter for ScradaAdapter {
    fn name(&self) -> &'static str {
        ADAPTER
    }

    async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome, AdapterError> {
        let creds = self.credentials()?;
        let mut attempts = Vec::with_capacity(2);

        let json_error = match self.send_json(&creds, &request).await {
            Ok(document_id) => {
                attempts.push(ChannelAttempt {
                    channel: Channel::Json,
                    ok: true,
                    http_status: None,
                    document_id: Some(document_id.clone()),
                    message: None,
                });
                let mut outcome = SendOutcome::new(document_id, DeliveryStatus::Queued);
                outcome.channel = Some(Channel::Json);
                outcome.attempts = attempts;
                outcome.fallback = Some(FallbackInfo {
                    triggered: false,
                    status: None,
                    message: None,
                });
                return Ok(outcome);
            }
            Err(err) if should_fall_back(&err) => err,
            Err(err) => return Err(err),
        };

        let json_status = json_error.http_status();
        let json_message = json_error.to_string();
        attempts.push(ChannelAttempt {
            channel: Channel::Json,
            ok: false,
            http_status: json_status,
            document_id: None,
            message: Some(json_message.clone()),
        });
        metrics::record_fallback(ADAPTER);
        tracing::warn!(
            invoice_id = %request.invoice_id,
            status = json_status,
            "JSON channel rejected invoice, falling back to UBL"
        );

        match self.send_xml(&creds, &request).await {
            Ok(document_id) => {
                attempts.push(ChannelAttempt {
                    channel: Channel::Xml,
                    ok: true,
                    http_status: None,
                    document_id: Some(document_id.clone()),
                    message: None,
                });
                let mut outcome = SendOutcome::new(document_id, DeliveryStatus::Queued);
                outcome.channel = Some(Channel::Xml);
                outcome.attempts = attempts;
                outcome.fallback = Some(FallbackInfo {
                    triggered: true,
                    status: json_status,
                    message: Some(json_message),
                });
                Ok(outcome)
            }
            Err(xml_error) => {
                tracing::error!(
                    invoice_id = %request.invoice_id,
                    json_status,
                    xml_status = xml_error.http_status(),
                    error = %xml_error,
                    "Both Scrada channels rejected invoice"
                );
                Err(xml_error)
            }
        }
    }

    async fn get_status(&self, provider_id: &str) -> Result<DeliveryStatus, AdapterError> {
        let creds = self.credentials()?;
        let id = provider_id.trim();
        if id.is_empty() {
            return Err(AdapterError::InvalidResponse {
                adapter: ADAPTER,
                message: "documentId is required".to_string(),
            });
        }
        let url = self.company_url(&creds, &format!("peppol/outbound/document/{id}/info"));
        let response = send_with_http_retry(ADAPTER, &self.config.http_retry, || {
            self.authed(&creds, self.client.get(&url))
        })
        .await?;

        if !response.status().is_success() {
            return Err(error_from_response(ADAPTER, response, &[creds.api_key, creds.password]).await);
        }

        let info: Value = response.json().await.map_err(|e| AdapterError::InvalidResponse {
            adapter: ADAPTER,
            message: e.to_string(),
        })?;
        let status = info
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::InvalidResponse {
                adapter: ADAPTER,
                message: "status missing from document info".to_string(),
            })?;
        Ok(map_scrada_status(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_shapes() {
        assert_eq!(extract_document_id(r#"{"documentId":"d-1"}"#).as_deref(), Some("d-1"));
        assert_eq!(extract_document_id(r#""d-2""#).as_deref(), Some("d-2"));
        assert_eq!(extract_document_id("d-3\n").as_deref(), Some("d-3"));
        assert_eq!(extract_document_id("{}"), None);
        assert_eq!(extract_document_id("  "), None);
    }

    #[test]
    fn only_client_errors_fall_back() {
        let http = |status| AdapterError::Http {
            adapter: ADAPTER,
            status,
            message: String::new(),
        };
        assert!(should_fall_back(&http(400)));
        assert!(should_fall_back(&http(422)));
        assert!(!should_fall_back(&http(429)));
        assert!(!should_fall_back(&http(500)));
    }
}
