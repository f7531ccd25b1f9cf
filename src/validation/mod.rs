use bigdecimal::BigDecimal;
use std::fmt;

pub const CURRENCY_CODE_LEN: usize = 3;
pub const DESCRIPTION_MAX_LEN: usize = 500;
pub const DOCUMENT_REF_MAX_LEN: usize = 255;
pub const REASON_MAX_LEN: usize = 1000;
/// Monetary columns are NUMERIC(20,2).
pub const AMOUNT_SCALE: i64 = 2;
pub const AMOUNT_INTEGER_DIGITS: u64 = 18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .map(|ch| if ch.is_whitespace() { ' ' } else { ch })
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.chars().count() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_currency(currency: &str) -> ValidationResult {
    validate_required("currency", currency)?;

    if currency.len() != CURRENCY_CODE_LEN || !currency.chars().all(|ch| ch.is_ascii_uppercase())
    {
        return Err(ValidationError::new(
            "currency",
            format!("must be {} uppercase letters", CURRENCY_CODE_LEN),
        ));
    }

    Ok(())
}

pub fn validate_positive_amount(amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    // Equality is numeric, so trailing zeros beyond the scale are accepted.
    if &amount.with_scale(AMOUNT_SCALE) != amount {
        return Err(ValidationError::new(
            "amount",
            format!("must have at most {} fractional digits", AMOUNT_SCALE),
        ));
    }

    if amount.with_scale(0).digits() > AMOUNT_INTEGER_DIGITS {
        return Err(ValidationError::new(
            "amount",
            format!("must have at most {} integer digits", AMOUNT_INTEGER_DIGITS),
        ));
    }

    Ok(())
}

pub fn validate_reason(reason: &str) -> ValidationResult {
    validate_required("reason", reason)?;
    validate_max_len("reason", reason, REASON_MAX_LEN)
}

pub fn validate_anomaly_score(score: f64) -> ValidationResult {
    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        return Err(ValidationError::new(
            "anomaly_score",
            "must be a number between 0 and 1",
        ));
    }

    Ok(())
}
