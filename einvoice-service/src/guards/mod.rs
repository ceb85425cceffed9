//! In-process TTL guards for submission idempotency and webhook replay.
//!
//! Both are owned values held in application state. They are exact within a
//! single process; the submissions store covers idempotency across restarts.

pub mod idempotency;
pub mod replay;
pub mod ttl;

pub use idempotency::{IdempotencyGuard, Reservation, ReservationHandle};
pub use replay::{ap_event_key, scrada_event_key, ReplayGuard};
pub use ttl::TtlCache;
