//! Billit access point.
//!
//! Auth is either a static `ApiKey` header or an OAuth client-credentials
//! token. Invoices go to a registration-scoped send command that carries the
//! UBL document base64-encoded alongside a structured summary.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::http::{build_client, error_from_response, transport_error};
use super::status::{map_delivery_status, map_send_status};
use super::{AdapterError, ApAdapter, SendOutcome, SendRequest};
use crate::codec::format::format_amount;
use crate::config::BillitConfig;
use crate::models::{ComputedInvoice, DeliveryStatus, Party};

const ADAPTER: &str = "billit";
const TOKEN_SAFETY_WINDOW: Duration = Duration::from_secs(30);
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);
const REGISTRATION_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Clone, Debug)]
struct CachedToken {
    header_value: String,
    expires_at: Instant,
}

#[derive(Clone, Debug)]
struct CachedRegistration {
    id: String,
    fetched_at: Instant,
}

pub struct BillitAdapter {
    client: Client,
    config: BillitConfig,
    token: RwLock<Option<CachedToken>>,
    registration: RwLock<Option<CachedRegistration>>,
}

impl BillitAdapter {
    pub fn new(config: BillitConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            client: build_client(ADAPTER, config.timeout)?,
            config,
            token: RwLock::new(None),
            registration: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn secrets(&self) -> Vec<&str> {
        [
            self.config.api_key.as_ref(),
            self.config.client_secret.as_ref(),
        ]
        .into_iter()
        .flatten()
        .map(|s| s.expose_secret().as_str())
        .collect()
    }

    /// Forget the cached token and registration.
    pub async fn reset_auth_cache(&self) {
        *self.token.write().await = None;
        *self.registration.write().await = None;
    }

    async fn oauth_header(&self) -> Result<String, AdapterError> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.expires_at.saturating_duration_since(Instant::now()) > TOKEN_SAFETY_WINDOW {
                return Ok(token.header_value.clone());
            }
        }

        let (client_id, client_secret) = match (&self.config.client_id, &self.config.client_secret) {
            (Some(id), Some(secret)) => (id.as_str(), secret.expose_secret().as_str()),
            _ => {
                return Err(AdapterError::Config {
                    adapter: ADAPTER,
                    message: "BILLIT_API_KEY or BILLIT_CLIENT_ID/BILLIT_CLIENT_SECRET must be set"
                        .to_string(),
                })
            }
        };

        let response = self
            .client
            .post(self.url("oauth/token"))
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await
            .map_err(|e| transport_error(ADAPTER, e))?;

        if !response.status().is_success() {
            let err = error_from_response(ADAPTER, response, &self.secrets()).await;
            return Err(match err {
                AdapterError::Http { status, message, .. } if status < 500 && status != 429 => {
                    AdapterError::Auth {
                        adapter: ADAPTER,
                        message: format!("token request rejected ({status}): {message}"),
                    }
                }
                other => other,
            });
        }

        let body: Value = response.json().await.map_err(|e| AdapterError::InvalidResponse {
            adapter: ADAPTER,
            message: e.to_string(),
        })?;
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AdapterError::Auth {
                adapter: ADAPTER,
                message: "token response missing access_token".to_string(),
            })?;
        let token_type = body
            .get("token_type")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("Bearer");
        let ttl = body
            .get("expires_in")
            .and_then(parse_expires_in)
            .unwrap_or(DEFAULT_TOKEN_TTL);

        let header_value = format!("{token_type} {access_token}");
        *self.token.write().await = Some(CachedToken {
            header_value: header_value.clone(),
            expires_at: token_expiry(Instant::now(), ttl),
        });
        tracing::debug!(ttl_secs = ttl.as_secs(), "Billit OAuth token refreshed");
        Ok(header_value)
    }

    async fn authed(&self, builder: RequestBuilder) -> Result<RequestBuilder, AdapterError> {
        let mut builder = builder.header("Accept", "application/json");
        builder = match &self.config.api_key {
            Some(key) => builder.header("ApiKey", key.expose_secret().as_str()),
            None => builder.header("Authorization", self.oauth_header().await?),
        };
        if let Some(party) = &self.config.party_id {
            builder = builder.header("PartyID", party.as_str());
        }
        Ok(builder)
    }

    async fn registration_id(&self) -> Result<String, AdapterError> {
        if let Some(id) = self.config.registration_id.as_deref() {
            return Ok(id.to_string());
        }
        if let Some(cached) = self.registration.read().await.as_ref() {
            if cached.fetched_at.elapsed() < REGISTRATION_TTL {
                return Ok(cached.id.clone());
            }
        }

        let response = self
            .authed(self.client.get(self.url("v1/einvoices/registrations")))
            .await?
            .send()
            .await
            .map_err(|e| transport_error(ADAPTER, e))?;
        if !response.status().is_success() {
            return Err(error_from_response(ADAPTER, response, &self.secrets()).await);
        }
        let body: Value = response.json().await.map_err(|e| AdapterError::InvalidResponse {
            adapter: ADAPTER,
            message: e.to_string(),
        })?;

        let id = extract_registration_id(&body).ok_or_else(|| AdapterError::Config {
            adapter: ADAPTER,
            message: "no active registration found; set BILLIT_REGISTRATION_ID".to_string(),
        })?;
        *self.registration.write().await = Some(CachedRegistration {
            id: id.clone(),
            fetched_at: Instant::now(),
        });
        tracing::info!(registration_id = %id, "Billit registration discovered");
        Ok(id)
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }
}

fn parse_expires_in(value: &Value) -> Option<Duration> {
    let secs = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|ttl| !ttl.is_zero())
}

/// `now + ttl`, falling back to the default lifetime when that overflows.
fn token_expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(DEFAULT_TOKEN_TTL))
        .unwrap_or(now)
}

fn string_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find_map(|v| v.as_str().map(str::trim).filter(|s| !s.is_empty()))
}

fn id_field(value: &Value, keys: &[&str]) -> Option<String> {
    string_field(value, keys).map(str::to_string).or_else(|| {
        keys.iter()
            .filter_map(|key| value.get(*key))
            .find_map(|v| v.as_i64().map(|n| n.to_string()))
    })
}

fn extract_registration_id(body: &Value) -> Option<String> {
    const ID_KEYS: [&str; 5] = ["RegistrationID", "RegistrationId", "registrationId", "id", "ID"];
    let entries = match body {
        Value::Array(items) => items.as_slice(),
        Value::Object(_) => ["Registrations", "registrations", "items", "data"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_array))
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };
    entries.iter().find_map(|entry| id_field(entry, &ID_KEYS))
}

/// Provider id from a send response, looking into common envelopes.
fn extract_provider_id(body: &Value) -> Option<String> {
    const ID_KEYS: [&str; 4] = ["OrderID", "providerId", "id", "invoiceId"];
    id_field(body, &ID_KEYS).or_else(|| {
        ["data", "payload", "invoice"]
            .iter()
            .filter_map(|key| body.get(*key))
            .find_map(|nested| id_field(nested, &ID_KEYS))
    })
}

fn party_json(party: &Party) -> Value {
    let address = party.address.as_ref();
    json!({
        "name": party.registration_name.as_deref().unwrap_or(party.name.as_str()),
        "vatNumber": party.vat_id,
        "companyId": party.company_id,
        "street": address.and_then(|a| a.street_name.clone()),
        "city": address.and_then(|a| a.city_name.clone()),
        "zipcode": address.and_then(|a| a.postal_zone.clone()),
        "countryCode": address.and_then(|a| a.country_code.clone()),
        "email": party.contact.as_ref().and_then(|c| c.electronic_mail.clone()),
    })
}

fn build_payload(invoice: &ComputedInvoice, registration_id: &str, ubl_xml: &str) -> Value {
    let order = &invoice.order;
    let unit = invoice.minor_unit;
    let lines: Vec<Value> = invoice
        .lines
        .iter()
        .map(|line| {
            json!({
                "description": line.description,
                "itemName": line.item_name,
                "quantity": line.quantity,
                "unitCode": line.unit_code,
                "unitPrice": format_amount(line.unit_price_minor, unit),
                "discount": format_amount(line.discount_minor, unit),
                "lineTotal": format_amount(line.net_minor, unit),
                "vatRate": line.vat_rate,
                "vatAmount": format_amount(line.tax_minor, unit),
                "vatCategory": line.vat_category.as_str(),
                "vatExemptionReason": line.exemption_reason,
            })
        })
        .collect();

    let mut document = json!({
        "invoiceNumber": order.order_number,
        "currency": order.currency,
        "issueDate": invoice.issue_date.format("%Y-%m-%d").to_string(),
        "dueDate": order.due_date.map(|d| d.format("%Y-%m-%d").to_string()),
        "buyer": party_json(&order.buyer),
        "seller": party_json(&order.supplier),
        "totals": {
            "lineExtensionAmount": format_amount(invoice.totals.line_extension_minor, unit),
            "taxExclusiveAmount": format_amount(invoice.totals.tax_exclusive_minor, unit),
            "taxAmount": format_amount(invoice.totals.tax_total_minor, unit),
            "payableAmount": format_amount(invoice.totals.payable_minor, unit),
        },
        "lines": lines,
        "ubl": BASE64.encode(ubl_xml.as_bytes()),
    });
    if let Some(endpoint) = &order.buyer.endpoint {
        if let (Some(scheme), Some(id)) = (&endpoint.scheme, &endpoint.id) {
            document["receiver"] = json!({ "scheme": scheme, "value": id });
        }
    }

    json!({
        "registrationId": registration_id,
        "transportType": "Peppol",
        "documents": [document],
    })
}

#[async_trait]
impl ApAdapter for BillitAdapter {
    fn name(&self) -> &'static str {
        ADAPTER
    }

    async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome, AdapterError> {
        let registration_id = self.registration_id().await?;
        let payload = build_payload(request.invoice, &registration_id, request.ubl_xml);
        let url = self.url(&format!(
            "v1/einvoices/registrations/{registration_id}/commands/send"
        ));

        let response = self
            .authed(self.client.post(&url))
            .await?
            .header("Idempotency-Key", request.idempotency_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(ADAPTER, e))?;

        if response.status() == StatusCode::UNAUTHORIZED && self.config.api_key.is_none() {
            self.invalidate_token().await;
        }
        if !response.status().is_success() {
            return Err(error_from_response(ADAPTER, response, &self.secrets()).await);
        }

        let body: Value = response.json().await.map_err(|e| AdapterError::InvalidResponse {
            adapter: ADAPTER,
            message: e.to_string(),
        })?;
        let provider_id = extract_provider_id(&body).ok_or_else(|| AdapterError::InvalidResponse {
            adapter: ADAPTER,
            message: "send response did not include an order id".to_string(),
        })?;
        let status = string_field(&body, &["status", "Status"])
            .map(map_send_status)
            .unwrap_or(DeliveryStatus::Queued);

        let mut outcome = SendOutcome::new(provider_id, status);
        outcome.message = string_field(&body, &["message", "Message"]).map(str::to_string);
        Ok(outcome)
    }

    async fn get_status(&self, provider_id: &str) -> Result<DeliveryStatus, AdapterError> {
        let response = self
            .authed(self.client.get(self.url(&format!("v1/orders/{provider_id}"))))
            .await?
            .send()
            .await
            .map_err(|e| transport_error(ADAPTER, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(DeliveryStatus::Error);
        }
        if !response.status().is_success() {
            return Err(error_from_response(ADAPTER, response, &self.secrets()).await);
        }

        let body: Value = response.json().await.map_err(|e| AdapterError::InvalidResponse {
            adapter: ADAPTER,
            message: e.to_string(),
        })?;
        Ok(string_field(&body, &["status", "Status", "OrderStatus"])
            .map(map_delivery_status)
            .unwrap_or(DeliveryStatus::Sent))
    }
}
