//! Phone number normalisation for outbound dialing

use crate::ServerError;

/// E.164-style number: separators stripped, country code added when absent.
///
/// `(11) 99999-0000` with country code `55` becomes `+5511999990000`.
pub fn normalize_phone(raw: &str, country_code: &str) -> Result<String, ServerError> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, '+' | '-' | ' ' | '(' | ')'))
        .collect();

    if digits.is_empty() {
        return Err(ServerError::InvalidRequest("phone is empty".into()));
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ServerError::InvalidRequest(format!(
            "phone '{}' contains invalid characters",
            raw
        )));
    }

    if digits.starts_with(country_code) {
        Ok(format!("+{}", digits))
    } else {
        Ok(format!("+{}{}", country_code, digits))
    }
}
