/**
 * Input Validation Module
 *
 * Centralized validation for configuration values and caller-supplied
 * identifiers. Everything that reaches the orchestrator from a config file
 * or the CLI passes through here first.
 */
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Value too long: max {max}, got {actual}")]
    ValueTooLong { max: usize, actual: usize },
}

/// Validate per-request deadline in milliseconds (100ms to 10 minutes)
pub fn validate_timeout_ms(timeout_ms: u64) -> Result<u64, ValidationError> {
    if !(100..=600_000).contains(&timeout_ms) {
        return Err(ValidationError::InvalidRange(format!(
            "Timeout must be between 100ms and 600000ms, got {}ms",
            timeout_ms
        )));
    }
    Ok(timeout_ms)
}

/// Validate duplicate-event debounce window (0ms to 2000ms)
pub fn validate_debounce_ms(debounce_ms: u64) -> Result<u64, ValidationError> {
    if debounce_ms > 2_000 {
        return Err(ValidationError::InvalidRange(format!(
            "Debounce window must be between 0ms and 2000ms, got {}ms",
            debounce_ms
        )));
    }
    Ok(debounce_ms)
}

/// Validate restart cooldown (0ms to 10000ms)
pub fn validate_retry_delay_ms(delay_ms: u64) -> Result<u64, ValidationError> {
    if delay_ms > 10_000 {
        return Err(ValidationError::InvalidRange(format!(
            "Retry delay must be between 0ms and 10000ms, got {}ms",
            delay_ms
        )));
    }
    Ok(delay_ms)
}

/// Validate simulated sensor step latency (0ms to 60000ms)
pub fn validate_step_delay_ms(delay_ms: u64) -> Result<u64, ValidationError> {
    if delay_ms > 60_000 {
        return Err(ValidationError::InvalidRange(format!(
            "Step delay must be between 0ms and 60000ms, got {}ms",
            delay_ms
        )));
    }
    Ok(delay_ms)
}

/// Validate temporary lockout duration (1s to 24h)
pub fn validate_lockout_duration_ms(duration_ms: u64) -> Result<u64, ValidationError> {
    if !(1_000..=86_400_000).contains(&duration_ms) {
        return Err(ValidationError::InvalidRange(format!(
            "Lockout duration must be between 1000ms and 86400000ms, got {}ms",
            duration_ms
        )));
    }
    Ok(duration_ms)
}

/// Validate a bounded attempt/restart count (0 to 20)
pub fn validate_attempt_count(field: &str, count: u32) -> Result<u32, ValidationError> {
    if count > 20 {
        return Err(ValidationError::InvalidRange(format!(
            "{} must be between 0 and 20, got {}",
            field, count
        )));
    }
    Ok(count)
}

/// Validate vendor module name (alphanumeric, '-', '_', '.', max 64 chars)
pub fn validate_vendor_name(name: &str) -> Result<String, ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::InvalidFormat(
            "Vendor name cannot be empty".to_string(),
        ));
    }

    if name.len() > 64 {
        return Err(ValidationError::ValueTooLong {
            max: 64,
            actual: name.len(),
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(ValidationError::InvalidFormat(
            "Vendor name can only contain letters, numbers, '.', '_' and '-'".to_string(),
        ));
    }

    Ok(name.to_string())
}

/// Validate a help/guidance message forwarded to the presenter (max 256 chars, no control characters)
pub fn validate_help_text(text: &str) -> Result<String, ValidationError> {
    if text.len() > 256 {
        return Err(ValidationError::ValueTooLong {
            max: 256,
            actual: text.len(),
        });
    }

    if text.chars().any(|c| c.is_control()) {
        return Err(ValidationError::InvalidFormat(
            "Help text contains invalid control characters".to_string(),
        ));
    }

    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_valid() {
        assert!(validate_timeout_ms(100).is_ok());
        assert!(validate_timeout_ms(30_000).is_ok());
        assert!(validate_timeout_ms(600_000).is_ok());
    }

    #[test]
    fn test_timeout_invalid() {
        assert!(validate_timeout_ms(0).is_err());
        assert!(validate_timeout_ms(99).is_err());
        assert!(validate_timeout_ms(600_001).is_err());
    }

    #[test]
    fn test_debounce_bounds() {
        assert!(validate_debounce_ms(0).is_ok());
        assert!(validate_debounce_ms(2_000).is_ok());
        assert!(validate_debounce_ms(2_001).is_err());
    }

    #[test]
    fn test_step_delay_bounds() {
        assert!(validate_step_delay_ms(0).is_ok());
        assert!(validate_step_delay_ms(60_000).is_ok());
        assert!(validate_step_delay_ms(60_001).is_err());
    }

    #[test]
    fn test_lockout_duration_bounds() {
        assert!(validate_lockout_duration_ms(30_000).is_ok());
        assert!(validate_lockout_duration_ms(999).is_err());
        assert!(validate_lockout_duration_ms(86_400_001).is_err());
    }

    #[test]
    fn test_attempt_count_error_names_field() {
        let err = validate_attempt_count("max_failed_attempts", 21).unwrap_err();
        assert!(err.to_string().contains("max_failed_attempts"));
    }

    #[test]
    fn test_vendor_name_valid() {
        assert!(validate_vendor_name("acme").is_ok());
        assert!(validate_vendor_name("acme-iris_v2.1").is_ok());
    }

    #[test]
    fn test_vendor_name_invalid() {
        assert!(validate_vendor_name("").is_err()); // Empty
        assert!(validate_vendor_name(&"a".repeat(65)).is_err()); // Too long
        assert!(validate_vendor_name("acme iris").is_err()); // Space
        assert!(validate_vendor_name("acme:iris").is_err()); // Separator
        assert!(validate_vendor_name("acme/iris").is_err()); // Slash
    }

    #[test]
    fn test_help_text() {
        assert!(validate_help_text("Move finger slightly").is_ok());
        assert!(validate_help_text("").is_ok());
        assert!(validate_help_text("line\nbreak").is_err());
        assert!(validate_help_text(&"x".repeat(257)).is_err());
    }
}
