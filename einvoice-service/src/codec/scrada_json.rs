//! Scrada sales-invoice JSON, built from the same computed invoice as the UBL.

use serde::{Deserialize, Serialize};

use super::format::amount_value;
use crate::models::order::non_blank;
use crate::models::{ComputedInvoice, Party};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScradaAmount {
    pub currency: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScradaAddress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub building_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_street_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScradaContact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telephone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScradaParty {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vat_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_registration_number: Option<String>,
    /// `scheme:id` participant identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peppol_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<ScradaAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<ScradaContact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScradaVat {
    pub rate: u32,
    pub tax_category_code: String,
    pub taxable_amount: ScradaAmount,
    pub tax_amount: ScradaAmount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exemption_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScradaAllowance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub amount: ScradaAmount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_amount: Option<ScradaAmount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScradaLine {
    pub id: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    pub quantity: f64,
    pub unit_code: String,
    pub unit_price: ScradaAmount,
    pub line_extension_amount: ScradaAmount,
    pub vat: ScradaVat,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowances: Vec<ScradaAllowance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScradaTotals {
    pub line_extension_amount: ScradaAmount,
    pub tax_exclusive_amount: ScradaAmount,
    pub tax_inclusive_amount: ScradaAmount,
    pub allowance_total_amount: ScradaAmount,
    pub payable_rounding_amount: ScradaAmount,
    pub payable_amount: ScradaAmount,
    pub tax_totals: Vec<ScradaVat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScradaPaymentTerms {
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScradaSalesInvoice {
    pub profile_id: String,
    pub customization_id: String,
    pub id: String,
    pub issue_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_terms: Option<ScradaPaymentTerms>,
    pub seller: ScradaParty,
    pub buyer: ScradaParty,
    pub lines: Vec<ScradaLine>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowances: Vec<ScradaAllowance>,
    pub totals: ScradaTotals,
}

fn party(party: &Party) -> ScradaParty {
    let endpoint = party.endpoint.as_ref();
    ScradaParty {
        name: non_blank(&party.registration_name)
            .unwrap_or(party.name.as_str())
            .to_string(),
        vat_number: non_blank(&party.vat_id).map(str::to_string),
        company_registration_number: non_blank(&party.company_id).map(str::to_string),
        peppol_id: endpoint.and_then(|e| e.participant_id()),
        scheme_id: endpoint
            .and_then(|e| non_blank(&e.scheme))
            .map(str::to_string),
        address: party.address.as_ref().map(|a| ScradaAddress {
            street_name: a.street_name.clone(),
            building_number: a.building_number.clone(),
            additional_street_name: a.additional_street_name.clone(),
            postal_zone: a.postal_zone.clone(),
            city_name: a.city_name.clone(),
            country_code: a.country_code.clone(),
        }),
        contact: party
            .contact
            .as_ref()
            .filter(|c| !c.is_empty())
            .map(|c| ScradaContact {
                name: c.name.clone(),
                email: c.electronic_mail.clone(),
                telephone: c.telephone.clone(),
            }),
    }
}

/// Build the sales-invoice payload. `external_reference` is echoed back in
/// provider webhooks and used to map documents to submissions.
pub fn build_sales_invoice(
    invoice: &ComputedInvoice,
    external_reference: Option<&str>,
) -> ScradaSalesInvoice {
    let order = &invoice.order;
    let currency = invoice.currency().to_string();
    let unit = invoice.minor_unit;
    let amount = |minor: i64| ScradaAmount {
        currency: currency.clone(),
        value: amount_value(minor, unit),
    };

    let lines = invoice
        .lines
        .iter()
        .map(|line| ScradaLine {
            id: line.id.clone(),
            description: line.description.clone(),
            item_name: line.item_name.clone(),
            quantity: line.quantity,
            unit_code: line.unit_code.clone(),
            unit_price: amount(line.unit_net_minor()),
            line_extension_amount: amount(line.net_minor),
            vat: ScradaVat {
                rate: line.vat_rate,
                tax_category_code: line.vat_category.to_string(),
                taxable_amount: amount(line.net_minor),
                tax_amount: amount(line.tax_minor),
                exemption_reason: line
                    .exemption_reason
                    .clone()
                    .filter(|_| line.vat_rate == 0),
            },
            allowances: if line.discount_minor > 0 {
                vec![ScradaAllowance {
                    reason: None,
                    amount: amount(line.discount_minor),
                    base_amount: Some(amount(line.gross_minor)),
                }]
            } else {
                Vec::new()
            },
        })
        .collect();

    let tax_totals = invoice
        .tax_groups
        .iter()
        .map(|group| ScradaVat {
            rate: group.rate,
            tax_category_code: group.category.to_string(),
            taxable_amount: amount(group.taxable_minor),
            tax_amount: amount(group.tax_minor),
            exemption_reason: group.exemption_reason.clone().filter(|_| group.rate == 0),
        })
        .collect();

    let notes = order.notes();
    let totals = &invoice.totals;

    ScradaSalesInvoice {
        profile_id: "urn:fdc:peppol.eu:poacc:billing:3.0".to_string(),
        customization_id: "urn:cen.eu:en16931:2017".to_string(),
        id: order.order_number.clone(),
        issue_date: invoice.issue_date.format("%Y-%m-%d").to_string(),
        due_date: order.due_date.map(|d| d.format("%Y-%m-%d").to_string()),
        currency: currency.clone(),
        external_reference: external_reference.map(str::to_string),
        buyer_reference: non_blank(&order.buyer_reference).map(str::to_string),
        order_reference: non_blank(&order.order_reference).map(str::to_string),
        note: (!notes.is_empty()).then(|| notes.join("\n")),
        payment_terms: order.payment_terms().map(|note| ScradaPaymentTerms {
            note: note.to_string(),
        }),
        seller: party(&order.supplier),
        buyer: party(&order.buyer),
        lines,
        allowances: order
            .allowances
            .iter()
            .map(|a| ScradaAllowance {
                reason: a.reason.clone(),
                amount: amount(a.amount_minor),
                base_amount: a.base_amount_minor.map(amount),
            })
            .collect(),
        totals: ScradaTotals {
            line_extension_amount: amount(totals.line_extension_minor),
            tax_exclusive_amount: amount(totals.tax_exclusive_minor),
            tax_inclusive_amount: amount(totals.tax_inclusive_minor),
            allowance_total_amount: amount(totals.allowance_total_minor),
            payable_rounding_amount: amount(totals.rounding_minor),
            payable_amount: amount(totals.payable_minor),
            tax_totals,
        },
    }
}
