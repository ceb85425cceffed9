pub mod metrics;
pub mod reconciliation;
pub mod submission;
pub mod tax;

pub use reconciliation::{ReconcileOutcome, Reconciler};
pub use submission::{SubmissionError, SubmissionService, SubmitOutcome};
pub use tax::{compute_invoice, TaxError};
