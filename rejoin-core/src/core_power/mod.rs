//! Power resolution and the request-path-only escalation bypass

pub mod escalation;
pub mod resolver;

pub use escalation::{EscalationLog, EscalationRecord, RequestToken};
pub use resolver::PowerResolver;
