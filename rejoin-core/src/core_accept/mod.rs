//! Auto-accept: retrying state machine plus passive invite watcher

pub mod machine;
pub mod watcher;

pub use machine::{
    AcceptOutcome, AcceptState, AttemptOutcome, AutoAccept, RetryAttempt, RetryPolicy,
};
pub use watcher::{InviteWatcher, MembershipEvent};
