//! Rendering of computed invoices into provider document formats.

pub mod format;
pub mod scrada_json;
pub mod ubl;

pub use scrada_json::{build_sales_invoice, ScradaSalesInvoice};
pub use ubl::render_ubl;
