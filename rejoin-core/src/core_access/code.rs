//! Access code format and generation

use crate::core_room::{RoomId, Timestamp};
use serde::{Deserialize, Serialize};

/// Characters an access code may contain
const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const DIGITS: &[u8] = b"0123456789";

/// Access codes are exactly this long
pub const CODE_LEN: usize = 7;

/// A short-lived secret code bound to one room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessCode {
    /// The 7-character code itself
    pub code: String,

    /// Room the code admits into
    pub room: RoomId,

    /// When the code was issued
    pub created_at: Timestamp,

    /// Optional expiry; `None` means valid until superseded
    pub expires_at: Option<Timestamp>,
}

impl AccessCode {
    pub fn new(code: String, room: RoomId, expires_at: Option<Timestamp>) -> Self {
        debug_assert!(is_well_formed(&code));
        AccessCode {
            code,
            room,
            created_at: Timestamp::now(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        match self.expires_at {
            Some(expires_at) => now > expires_at,
            None => false,
        }
    }
}

/// Generate a random code: 7 alphanumeric characters, at least one digit.
/// One position is forced to a digit so the format invariant holds without
/// resampling.
pub fn generate_code() -> String {
    use rand::Rng;
    let mut rng = rand::rng();

    let mut chars: Vec<u8> = (0..CODE_LEN)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())])
        .collect();
    let digit_pos = rng.random_range(0..CODE_LEN);
    chars[digit_pos] = DIGITS[rng.random_range(0..DIGITS.len())];

    chars.into_iter().map(|c| c as char).collect()
}

/// Whether a string satisfies the code format invariant
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LEN
        && code.chars().all(|c| c.is_ascii_alphanumeric())
        && code.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_are_well_formed() {
        for _ in 0..1000 {
            let code = generate_code();
            assert!(is_well_formed(&code), "bad code: {code}");
        }
    }

    #[test]
    fn test_format_rejects() {
        assert!(!is_well_formed("ABCDEFG")); // no digit
        assert!(!is_well_formed("A1B2C3")); // too short
        assert!(!is_well_formed("A1B2C3D4")); // too long
        assert!(!is_well_formed("A1B2C3!")); // non-alphanumeric
        assert!(is_well_formed("A1B2C3D"));
        assert!(is_well_formed("vldcde1"));
    }

    #[test]
    fn test_expiry() {
        let code = AccessCode::new(
            "A1B2C3D".into(),
            RoomId::new("!r:test"),
            Some(Timestamp::from_millis(1000)),
        );
        assert!(!code.is_expired(Timestamp::from_millis(999)));
        assert!(!code.is_expired(Timestamp::from_millis(1000)));
        assert!(code.is_expired(Timestamp::from_millis(1001)));

        let open_ended = AccessCode::new("A1B2C3D".into(), RoomId::new("!r:test"), None);
        assert!(!open_ended.is_expired(Timestamp::from_millis(u64::MAX)));
    }
}
