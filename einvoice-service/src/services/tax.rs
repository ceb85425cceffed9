//! VAT and allowance computation. All money is integer minor units.

use chrono::Utc;
use service_core::error::FieldError;
use thiserror::Error;
use validator::Validate;

use crate::models::{
    ComputedInvoice, ComputedLine, InvoiceTotals, Order, TaxGroup, VatCategory,
};

#[derive(Debug, Error)]
pub enum TaxError {
    #[error("invalid order: {}", summarize(.0))]
    Validation(Vec<FieldError>),
}

fn summarize(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{} {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// `round(numerator / denominator)` with halves rounded up, for non-negative inputs.
fn div_round_half_up(numerator: i128, denominator: i128) -> i64 {
    ((2 * numerator + denominator) / (2 * denominator)) as i64
}

/// `round(amount × rate / 100)`, zero for zero-rated amounts.
pub fn tax_for(amount_minor: i64, rate: u32) -> i64 {
    if rate == 0 || amount_minor <= 0 {
        return 0;
    }
    div_round_half_up(amount_minor as i128 * rate as i128, 100)
}

fn compute_line(order: &Order, index: usize) -> ComputedLine {
    let line = &order.lines[index];
    let gross_minor = (line.quantity * line.unit_price_minor as f64).round() as i64;
    let net_minor = (gross_minor - line.discount_minor).max(0);
    let vat_rate = line.vat_rate.or(order.default_vat_rate).unwrap_or(0.0) as u32;
    let exemption_reason = line
        .vat_exemption_reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .or(order.tax_exemption_reason())
        .map(str::to_string);
    let vat_category = line
        .vat_category
        .unwrap_or_else(|| VatCategory::derive(vat_rate, exemption_reason.is_some()));

    ComputedLine {
        line_number: index + 1,
        id: line
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| (index + 1).to_string()),
        description: line.description.clone(),
        item_name: line.item_name.clone(),
        quantity: line.quantity,
        unit_code: line.unit_code.clone(),
        unit_price_minor: line.unit_price_minor,
        discount_minor: line.discount_minor,
        gross_minor,
        net_minor,
        vat_rate,
        vat_category,
        exemption_reason,
        tax_minor: tax_for(net_minor, vat_rate),
    }
}

/// Group lines by (rate, category, exemption reason) in first-seen order.
pub fn group_lines(lines: &[ComputedLine]) -> Vec<TaxGroup> {
    let mut groups: Vec<TaxGroup> = Vec::new();
    for line in lines {
        let reason = line.exemption_reason.as_deref();
        match groups
            .iter_mut()
            .find(|g| g.matches(line.vat_rate, line.vat_category, reason))
        {
            Some(group) => {
                group.taxable_minor += line.net_minor;
                group.tax_minor += line.tax_minor;
            }
            None => groups.push(TaxGroup {
                rate: line.vat_rate,
                category: line.vat_category,
                exemption_reason: line.exemption_reason.clone(),
                taxable_minor: line.net_minor,
                tax_minor: line.tax_minor,
                allowance_minor: 0,
            }),
        }
    }
    groups
}

/// Split `allowance_total` over the groups' taxable amounts.
///
/// Returns one allocation per group. The allocations sum to
/// `min(allowance_total, Σ taxable)` and each lies in `[0, taxable]`.
pub fn distribute_allowance(taxable: &[i64], allowance_total: i64) -> Vec<i64> {
    let mut allocations = vec![0i64; taxable.len()];
    if allowance_total <= 0 {
        return allocations;
    }

    let eligible: Vec<usize> = (0..taxable.len()).filter(|&i| taxable[i] > 0).collect();
    let total_taxable: i64 = eligible.iter().map(|&i| taxable[i]).sum();
    if total_taxable <= 0 {
        return allocations;
    }

    let mut remaining = allowance_total;
    let last = eligible.len() - 1;
    for (pos, &idx) in eligible.iter().enumerate() {
        let capacity = taxable[idx];
        let share = if pos == last {
            remaining
        } else {
            div_round_half_up(
                capacity as i128 * allowance_total as i128,
                total_taxable as i128,
            )
            .min(capacity)
            .min(remaining)
        };
        let allocated = share.clamp(0, capacity);
        allocations[idx] = allocated;
        remaining -= allocated;
    }

    // The last group's clamp can leave a remainder; earlier groups absorb it.
    for &idx in eligible.iter().rev() {
        if remaining <= 0 {
            break;
        }
        let spare = taxable[idx] - allocations[idx];
        let take = spare.min(remaining);
        allocations[idx] += take;
        remaining -= take;
    }

    allocations
}

/// Validate the order and derive lines, tax groups and totals.
pub fn compute_invoice(order: &Order) -> Result<ComputedInvoice, TaxError> {
    let order = order.clone().normalized();
    order
        .validate()
        .map_err(|errors| TaxError::Validation(FieldError::from_validation(&errors)))?;

    let lines: Vec<ComputedLine> = (0..order.lines.len())
        .map(|idx| compute_line(&order, idx))
        .collect();
    let mut tax_groups = group_lines(&lines);

    let line_extension_minor: i64 = lines.iter().map(|l| l.net_minor).sum();
    let allowance_total_minor: i64 = order.allowances.iter().map(|a| a.amount_minor).sum();

    let taxable: Vec<i64> = tax_groups.iter().map(|g| g.taxable_minor).collect();
    let allocations = distribute_allowance(&taxable, allowance_total_minor);
    for (group, allocated) in tax_groups.iter_mut().zip(allocations) {
        group.allowance_minor = allocated;
        group.taxable_minor -= allocated;
        group.tax_minor = tax_for(group.taxable_minor, group.rate);
    }

    let tax_exclusive_minor: i64 = tax_groups.iter().map(|g| g.taxable_minor).sum();
    let tax_total_minor: i64 = tax_groups.iter().map(|g| g.tax_minor).sum();
    let overrides = order.totals.clone().unwrap_or_default();
    let rounding_minor = overrides.rounding_minor.unwrap_or(0);
    let payable_minor = overrides
        .payable_amount_minor
        .unwrap_or(tax_exclusive_minor + tax_total_minor + rounding_minor)
        .max(0);

    let totals = InvoiceTotals {
        line_extension_minor,
        allowance_total_minor,
        tax_exclusive_minor,
        tax_total_minor,
        tax_inclusive_minor: tax_exclusive_minor + tax_total_minor,
        rounding_minor,
        payable_minor,
    };

    tracing::debug!(
        order_number = %order.order_number,
        lines = lines.len(),
        groups = tax_groups.len(),
        payable_minor,
        "Invoice computed"
    );

    Ok(ComputedInvoice {
        issue_date: order.issue_date.unwrap_or_else(|| Utc::now().date_naive()),
        minor_unit: order.currency_minor_unit,
        lines,
        tax_groups,
        totals,
        order,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Allowance, OrderLine, Party};
    use proptest::prelude::*;

    fn line(price: i64, qty: f64, rate: Option<f64>) -> OrderLine {
        OrderLine {
            id: None,
            description: "Item".into(),
            quantity: qty,
            unit_code: "EA".into(),
            unit_price_minor: price,
            discount_minor: 0,
            vat_rate: rate,
            vat_category: None,
            vat_exemption_reason: None,
            item_name: None,
        }
    }

    fn order(lines: Vec<OrderLine>) -> Order {
        Order {
            order_number: "SO-1".into(),
            currency: "EUR".into(),
            currency_minor_unit: 2,
            issue_date: None,
            due_date: None,
            buyer_reference: None,
            order_reference: None,
            supplier: Party {
                name: "Seller".into(),
                ..Default::default()
            },
            buyer: Party {
                name: "Buyer".into(),
                ..Default::default()
            },
            lines,
            default_vat_rate: None,
            allowances: Vec::new(),
            totals: None,
            meta: Default::default(),
        }
    }

    #[test]
    fn line_amounts_round_half_up() {
        let mut o = order(vec![line(333, 1.5, Some(21.0))]);
        o.lines[0].discount_minor = 100;
        let inv = compute_invoice(&o).unwrap();
        let l = &inv.lines[0];
        // 1.5 × 333 = 499.5 → 500
        assert_eq!(l.gross_minor, 500);
        assert_eq!(l.net_minor, 400);
        assert_eq!(l.tax_minor, 84);
        assert_eq!(inv.totals.payable_minor, 484);
    }

    #[test]
    fn discount_never_makes_net_negative() {
        let mut o = order(vec![line(100, 1.0, Some(21.0))]);
        o.lines[0].discount_minor = 500;
        let inv = compute_invoice(&o).unwrap();
        assert_eq!(inv.lines[0].net_minor, 0);
        assert_eq!(inv.totals.tax_total_minor, 0);
    }

    #[test]
    fn categories_follow_rate_and_reason() {
        let mut o = order(vec![
            line(100, 1.0, Some(0.0)),
            line(100, 1.0, Some(6.0)),
            line(100, 1.0, Some(12.0)),
            line(100, 1.0, Some(21.0)),
            line(100, 1.0, Some(0.0)),
        ]);
        o.lines[4].vat_exemption_reason = Some("Intra-community supply".into());
        let inv = compute_invoice(&o).unwrap();
        let cats: Vec<VatCategory> = inv.lines.iter().map(|l| l.vat_category).collect();
        assert_eq!(
            cats,
            vec![
                VatCategory::Z,
                VatCategory::AA,
                VatCategory::AE,
                VatCategory::S,
                VatCategory::E
            ]
        );
        assert_eq!(inv.tax_groups.len(), 5);
    }

    #[test]
    fn explicit_category_overrides_derivation() {
        let mut o = order(vec![line(100, 1.0, Some(21.0))]);
        o.lines[0].vat_category = Some(VatCategory::L);
        let inv = compute_invoice(&o).unwrap();
        assert_eq!(inv.lines[0].vat_category, VatCategory::L);
    }

    #[test]
    fn meta_exemption_reason_applies_to_zero_rated_lines() {
        let mut o = order(vec![line(100, 1.0, None)]);
        o.meta.insert(
            "taxExemptionReason".into(),
            serde_json::Value::String("Export".into()),
        );
        let inv = compute_invoice(&o).unwrap();
        assert_eq!(inv.lines[0].vat_category, VatCategory::E);
        assert_eq!(inv.lines[0].exemption_reason.as_deref(), Some("Export"));
    }

    #[test]
    fn default_rate_applies_when_line_has_none() {
        let mut o = order(vec![line(1000, 1.0, None)]);
        o.default_vat_rate = Some(21.0);
        let inv = compute_invoice(&o).unwrap();
        assert_eq!(inv.lines[0].vat_rate, 21);
        assert_eq!(inv.totals.tax_total_minor, 210);
    }

    #[test]
    fn groups_keep_first_seen_order() {
        let o = order(vec![
            line(100, 1.0, Some(21.0)),
            line(100, 1.0, Some(6.0)),
            line(200, 1.0, Some(21.0)),
        ]);
        let inv = compute_invoice(&o).unwrap();
        assert_eq!(inv.tax_groups[0].rate, 21);
        assert_eq!(inv.tax_groups[0].taxable_minor, 300);
        assert_eq!(inv.tax_groups[1].rate, 6);
    }

    #[test]
    fn allowance_reduces_groups_and_recomputes_tax() {
        let mut o = order(vec![line(10000, 1.0, Some(21.0)), line(5000, 1.0, Some(6.0))]);
        o.allowances.push(Allowance {
            amount_minor: 1500,
            base_amount_minor: None,
            reason: Some("Loyalty".into()),
        });
        let inv = compute_invoice(&o).unwrap();
        assert_eq!(inv.tax_groups[0].allowance_minor, 1000);
        assert_eq!(inv.tax_groups[1].allowance_minor, 500);
        assert_eq!(inv.tax_groups[0].tax_minor, 1890);
        assert_eq!(inv.tax_groups[1].tax_minor, 270);
        assert_eq!(inv.totals.tax_exclusive_minor, 13500);
        assert_eq!(inv.totals.line_extension_minor, 15000);
        assert_eq!(inv.totals.payable_minor, 13500 + 2160);
    }

    #[test]
    fn allowance_larger_than_taxable_caps_at_taxable() {
        assert_eq!(distribute_allowance(&[100, 50], 1000), vec![100, 50]);
    }

    #[test]
    fn remainder_is_absorbed_by_earlier_groups() {
        // Proportional shares are 1, 1, 1; the last group can only take 1 of the 2 left.
        assert_eq!(distribute_allowance(&[2, 2, 2, 1], 5), vec![1, 1, 2, 1]);
    }

    #[test]
    fn zero_taxable_groups_take_nothing() {
        assert_eq!(distribute_allowance(&[100, 0], 30), vec![30, 0]);
        assert_eq!(distribute_allowance(&[0, 0], 30), vec![0, 0]);
    }

    #[test]
    fn totals_override_and_floor() {
        let mut o = order(vec![line(100, 1.0, Some(0.0))]);
        o.totals = Some(crate::models::TotalsOverride {
            payable_amount_minor: None,
            rounding_minor: Some(-500),
        });
        let inv = compute_invoice(&o).unwrap();
        assert_eq!(inv.totals.rounding_minor, -500);
        assert_eq!(inv.totals.payable_minor, 0);

        o.totals = Some(crate::models::TotalsOverride {
            payable_amount_minor: Some(42),
            rounding_minor: None,
        });
        assert_eq!(compute_invoice(&o).unwrap().totals.payable_minor, 42);
    }

    #[test]
    fn validation_errors_name_fields() {
        let o = order(vec![line(100, -1.0, Some(21.0))]);
        match compute_invoice(&o) {
            Err(TaxError::Validation(fields)) => {
                assert_eq!(fields[0].field, "lines[0].quantity");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn allowance_is_conserved(
            taxable in proptest::collection::vec(0i64..1_000_000, 1..8),
            allowance in 0i64..3_000_000,
        ) {
            let allocations = distribute_allowance(&taxable, allowance);
            let total: i64 = taxable.iter().sum();
            prop_assert_eq!(allocations.iter().sum::<i64>(), allowance.min(total));
            for (a, t) in allocations.iter().zip(&taxable) {
                prop_assert!(*a >= 0 && a <= t);
            }
        }
    }
}
