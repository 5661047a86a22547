//! Knock validation and knock-record lifecycle

pub mod record;
pub mod validator;

pub use record::{IllegalTransition, KnockRecord, KnockStatus, KnockTable};
pub use validator::KnockValidator;
