//! Card-code validation.
//!
//! A card code is exactly 13 ASCII digits and starts with `2001`. The same
//! rules apply whether the code was typed by the user or read off a barcode.

use crate::error::ValidationError;

/// Expected code length in digits.
pub const CODE_LENGTH: usize = 13;

/// Required code prefix.
pub const CODE_PREFIX: &str = "2001";

/// Validate a candidate card code. Rules are checked in order; the first
/// failure wins. Pure — no trimming, no state, no I/O.
pub fn validate_card_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != CODE_LENGTH || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::NotThirteenDigits);
    }
    if !code.starts_with(CODE_PREFIX) {
        return Err(ValidationError::WrongPrefix);
    }
    Ok(())
}
