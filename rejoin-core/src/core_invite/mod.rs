//! Invite issuance and open-invite bookkeeping

pub mod issuer;

pub use issuer::{InviteIssuer, InviteRecord, IssueOutcome, OpenInvites};
