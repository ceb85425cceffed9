//! Result of running an order through the tax engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::order::Order;

/// UNCL5305 VAT category codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VatCategory {
    S,
    Z,
    E,
    AE,
    O,
    L,
    AA,
}

impl VatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            VatCategory::S => "S",
            VatCategory::Z => "Z",
            VatCategory::E => "E",
            VatCategory::AE => "AE",
            VatCategory::O => "O",
            VatCategory::L => "L",
            VatCategory::AA => "AA",
        }
    }

    /// Category implied by a rate when the line does not carry one.
    pub fn derive(rate: u32, has_exemption_reason: bool) -> Self {
        match rate {
            0 if has_exemption_reason => VatCategory::E,
            0 => VatCategory::Z,
            6 => VatCategory::AA,
            12 => VatCategory::AE,
            _ => VatCategory::S,
        }
    }
}

impl std::fmt::Display for VatCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedLine {
    /// 1-based position in the order.
    pub line_number: usize,
    /// Line id from the order, or the line number.
    pub id: String,
    pub description: String,
    pub item_name: Option<String>,
    pub quantity: f64,
    pub unit_code: String,
    pub unit_price_minor: i64,
    pub discount_minor: i64,
    pub gross_minor: i64,
    /// Line extension amount after the line discount.
    pub net_minor: i64,
    pub vat_rate: u32,
    pub vat_category: VatCategory,
    pub exemption_reason: Option<String>,
    pub tax_minor: i64,
}

impl ComputedLine {
    /// Net unit price, `round(net / quantity)`.
    pub fn unit_net_minor(&self) -> i64 {
        if self.quantity == 0.0 {
            0
        } else {
            (self.net_minor as f64 / self.quantity).round() as i64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxGroup {
    pub rate: u32,
    pub category: VatCategory,
    pub exemption_reason: Option<String>,
    /// Taxable amount after document allowances.
    pub taxable_minor: i64,
    pub tax_minor: i64,
    /// Share of the document allowances taken by this group.
    pub allowance_minor: i64,
}

impl TaxGroup {
    pub fn matches(&self, rate: u32, category: VatCategory, reason: Option<&str>) -> bool {
        self.rate == rate && self.category == category && self.exemption_reason.as_deref() == reason
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceTotals {
    pub line_extension_minor: i64,
    pub allowance_total_minor: i64,
    pub tax_exclusive_minor: i64,
    pub tax_total_minor: i64,
    pub tax_inclusive_minor: i64,
    pub rounding_minor: i64,
    pub payable_minor: i64,
}

/// Order plus every derived amount. Codecs render from this only.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedInvoice {
    pub order: Order,
    pub issue_date: NaiveDate,
    pub minor_unit: u32,
    pub lines: Vec<ComputedLine>,
    pub tax_groups: Vec<TaxGroup>,
    pub totals: InvoiceTotals,
}

impl ComputedInvoice {
    pub fn currency(&self) -> &str {
        &self.order.currency
    }
}
