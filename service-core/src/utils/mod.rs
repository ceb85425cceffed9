pub mod redact;
pub mod signature;
