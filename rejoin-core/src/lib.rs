//! Membership recovery pipeline for federated group rooms
//!
//! When every invite-capable member has left a restricted room, nobody can
//! let former members back in. This crate implements the recovery path:
//! a user knocks (with an access code or on proof of prior membership), the
//! resolver picks an inviter or escalates the requester's own authority as
//! a last resort, an invite is issued, and the auto-accept machine retries
//! the join until it commits.

pub mod config;
pub mod core_accept;
pub mod core_access;
pub mod core_invite;
pub mod core_knock;
pub mod core_power;
pub mod core_room;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod ratelimit;
pub mod service;
pub mod test_utils;

#[cfg(test)]
mod tests;

pub use error::{RejoinError, RejoinResult};
pub use logging::{init_logging, LogLevel};
pub use service::{AutoJoinResponse, KnockWithCodeResponse, RejoinService};
