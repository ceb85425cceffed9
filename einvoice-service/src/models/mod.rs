pub mod dlq;
pub mod invoice;
pub mod order;
pub mod status;
pub mod submission;

pub use dlq::{DlqItem, DlqPayload};
pub use invoice::{ComputedInvoice, ComputedLine, InvoiceTotals, TaxGroup, VatCategory};
pub use order::{Address, Allowance, Contact, Endpoint, Order, OrderLine, Party, TotalsOverride};
pub use status::{DeliveryStatus, InvoiceStatusValue};
pub use submission::{SubmissionArtifacts, SubmissionRecord};

/// Tenant used when a request does not name one.
pub const DEFAULT_TENANT: &str = "__default__";

/// Resolve an optional tenant header or field to a tenant id.
pub fn resolve_tenant(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TENANT)
        .to_string()
}
