//! Canonical order accepted by the submission API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::{Validate, ValidationError};

use super::invoice::VatCategory;

/// VAT rates accepted on lines and as the order default.
pub const SUPPORTED_VAT_RATES: [u32; 4] = [0, 6, 12, 21];

fn default_minor_unit() -> u32 {
    2
}

fn default_unit_code() -> String {
    "EA".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(default)]
    #[validate(custom(function = "not_blank", message = "required"))]
    pub order_number: String,
    #[serde(default)]
    #[validate(custom(function = "iso_currency", message = "currency must be ISO 4217 (3 letters)"))]
    pub currency: String,
    #[serde(default = "default_minor_unit")]
    #[validate(range(max = 4, message = "must be between 0 and 4"))]
    pub currency_minor_unit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_reference: Option<String>,
    #[validate(nested)]
    pub supplier: Party,
    #[validate(nested)]
    pub buyer: Party,
    #[serde(default)]
    #[validate(length(min = 1, message = "at least one line"), nested)]
    pub lines: Vec<OrderLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "supported_vat_rate", message = "vatRate must be one of: 0, 6, 12, 21"))]
    pub default_vat_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[validate(nested)]
    pub allowances: Vec<Allowance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totals: Option<TotalsOverride>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    #[serde(default)]
    #[validate(custom(function = "not_blank", message = "required"))]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<Contact>,
}

/// Electronic address, e.g. scheme `0208` with a company number.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Validate)]
#[validate(schema(function = "endpoint_scheme_present"))]
pub struct Endpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Endpoint {
    /// `scheme:id` when both parts are present.
    pub fn participant_id(&self) -> Option<String> {
        match (non_blank(&self.scheme), non_blank(&self.id)) {
            (Some(scheme), Some(id)) => Some(format!("{scheme}:{id}")),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_street_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub building_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "iso_country", message = "countryCode must be ISO 3166-1 alpha-2"))]
    pub country_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telephone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub electronic_mail: Option<String>,
}

impl Contact {
    pub fn is_empty(&self) -> bool {
        non_blank(&self.name).is_none()
            && non_blank(&self.telephone).is_none()
            && non_blank(&self.electronic_mail).is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    #[validate(custom(function = "not_blank", message = "required"))]
    pub description: String,
    #[validate(range(exclusive_min = 0.0, message = "must be greater than 0"))]
    pub quantity: f64,
    #[serde(default = "default_unit_code")]
    pub unit_code: String,
    #[validate(range(min = 0, message = "must be >= 0"))]
    pub unit_price_minor: i64,
    #[serde(default)]
    #[validate(range(min = 0, message = "must be >= 0"))]
    pub discount_minor: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "supported_vat_rate", message = "vatRate must be one of: 0, 6, 12, 21"))]
    pub vat_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vat_category: Option<VatCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vat_exemption_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
}

/// Document-level allowance (discount).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Allowance {
    #[validate(range(min = 0, message = "must be >= 0"))]
    pub amount_minor: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_amount_minor: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TotalsOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payable_amount_minor: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rounding_minor: Option<i64>,
}

pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("required"));
    }
    Ok(())
}

fn ascii_letters(value: &str, len: usize, code: &'static str) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.len() != len || !value.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ValidationError::new(code));
    }
    Ok(())
}

fn iso_currency(value: &str) -> Result<(), ValidationError> {
    ascii_letters(value, 3, "currency")
}

fn iso_country(value: &str) -> Result<(), ValidationError> {
    ascii_letters(value, 2, "country_code")
}

fn supported_vat_rate(rate: f64) -> Result<(), ValidationError> {
    if SUPPORTED_VAT_RATES.iter().any(|r| f64::from(*r) == rate) {
        Ok(())
    } else {
        Err(ValidationError::new("vat_rate"))
    }
}

fn endpoint_scheme_present(endpoint: &Endpoint) -> Result<(), ValidationError> {
    if non_blank(&endpoint.id).is_some() && non_blank(&endpoint.scheme).is_none() {
        let mut err = ValidationError::new("endpoint_scheme");
        err.message = Some("endpoint.scheme required when endpoint.id is present".into());
        return Err(err);
    }
    Ok(())
}

impl Order {
    /// Trim identifiers and upper-case currency and country codes.
    pub fn normalized(mut self) -> Self {
        self.order_number = self.order_number.trim().to_string();
        self.currency = self.currency.trim().to_ascii_uppercase();
        for party in [&mut self.supplier, &mut self.buyer] {
            party.name = party.name.trim().to_string();
            if let Some(address) = party.address.as_mut() {
                address.country_code = address
                    .country_code
                    .take()
                    .map(|c| c.trim().to_ascii_uppercase());
            }
        }
        for line in &mut self.lines {
            line.description = line.description.trim().to_string();
            let unit = line.unit_code.trim();
            line.unit_code = if unit.is_empty() {
                default_unit_code()
            } else {
                unit.to_string()
            };
        }
        self
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn external_reference(&self) -> Option<&str> {
        self.meta_str("externalReference")
    }

    pub fn tax_exemption_reason(&self) -> Option<&str> {
        self.meta_str("taxExemptionReason")
    }

    pub fn payment_terms(&self) -> Option<&str> {
        self.meta_str("paymentTerms")
    }

    /// Non-blank notes; `meta.notes` may be a string or an array of strings.
    pub fn notes(&self) -> Vec<String> {
        let notes: Vec<String> = match self.meta.get("notes") {
            Some(Value::String(note)) => vec![note.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        notes
            .into_iter()
            .filter(|note| !note.trim().is_empty())
            .collect()
    }
}
