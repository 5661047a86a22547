//! Access code issuance and validation

pub mod code;
pub mod registry;

pub use code::{generate_code, is_well_formed, AccessCode, CODE_LEN};
pub use registry::CodeRegistry;
