use crate::error::{AppError, AppResult};

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum length for an email address (RFC 5321 path limit).
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Minimum password length in characters.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum password length in characters.
///
/// The byte limit of the password hash is tighter; registration enforces it
/// when hashing (see `accounts::BCRYPT_MAX_INPUT_BYTES`).
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Maximum length for a display name.
pub const MAX_NAME_LENGTH: usize = 100;

/// Validate an email address.
///
/// Rules:
/// - Must be between 3 and 254 characters
/// - Exactly one `@` with a non-empty local part
/// - Domain must contain a dot that is neither first nor last
/// - No whitespace or control characters
///
/// Deliverability is not checked.
pub fn validate_email(email: &str) -> AppResult<()> {
    if email.is_empty() {
        return Err(AppError::BadRequest("Email cannot be empty".to_string()));
    }

    if email.len() > MAX_EMAIL_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Email cannot exceed {MAX_EMAIL_LENGTH} characters"
        )));
    }

    if let Some(pos) = email
        .chars()
        .position(|c| c.is_whitespace() || c.is_control())
    {
        return Err(AppError::BadRequest(format!(
            "Email contains invalid character at position {pos}"
        )));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(AppError::BadRequest("Email must contain '@'".to_string()));
    };

    if local.is_empty() || domain.contains('@') {
        return Err(AppError::BadRequest("Email address is malformed".to_string()));
    }

    let domain_ok = domain
        .find('.')
        .is_some_and(|dot| dot > 0 && !domain.ends_with('.'));
    if !domain_ok {
        return Err(AppError::BadRequest(
            "Email domain is malformed".to_string(),
        ));
    }

    Ok(())
}

/// Validate a password.
///
/// Length is counted in characters, not bytes.
pub fn validate_password(password: &str) -> AppResult<()> {
    let len = password.chars().count();

    if len < MIN_PASSWORD_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    if len > MAX_PASSWORD_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Password cannot exceed {MAX_PASSWORD_LENGTH} characters"
        )));
    }

    Ok(())
}

/// Validate a display name.
///
/// Rules:
/// - 1 to 100 characters after trimming
/// - No control characters
pub fn validate_display_name(name: &str) -> AppResult<()> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(AppError::BadRequest("Name cannot be empty".to_string()));
    }

    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Name cannot exceed {MAX_NAME_LENGTH} characters"
        )));
    }

    if let Some(pos) = trimmed.chars().position(|c| c.is_control()) {
        return Err(AppError::BadRequest(format!(
            "Name contains invalid control character at position {pos}"
        )));
    }

    Ok(())
}

/// Canonical form used as the account key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert!(validate_email("a@b.co").is_ok());
        assert!(validate_email("traveller@example.com").is_ok());
        assert!(validate_email("first.last+tag@sub.example.org").is_ok());
    }

    #[test]
    fn test_empty_email() {
        let result = validate_email("");
        assert!(result.unwrap_err().to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_email_without_at() {
        let result = validate_email("example.com");
        assert!(result.unwrap_err().to_string().contains("must contain '@'"));
    }

    #[test]
    fn test_email_malformed_parts() {
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a@@example.com").is_err());
        assert!(validate_email("a@example").is_err());
        assert!(validate_email("a@.com").is_err());
        assert!(validate_email("a@example.").is_err());
    }

    #[test]
    fn test_email_with_whitespace() {
        let result = validate_email("a b@example.com");
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("invalid character")
        );
    }

    #[test]
    fn test_email_too_long() {
        let email = format!("{}@example.com", "a".repeat(250));
        assert!(validate_email(&email).unwrap_err().to_string().contains("cannot exceed"));
    }

    #[test]
    fn test_password_bounds() {
        assert!(validate_password("1234567").is_err());
        assert!(validate_password("12345678").is_ok());
        assert!(validate_password(&"x".repeat(128)).is_ok());
        assert!(validate_password(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_password_counts_characters() {
        // 8 characters, 16 bytes
        assert!(validate_password("éééééééé").is_ok());
    }

    #[test]
    fn test_display_name() {
        assert!(validate_display_name("Ada Lovelace").is_ok());
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name(&"n".repeat(101)).is_err());
        assert!(
            validate_display_name("bad\nname")
                .unwrap_err()
                .to_string()
                .contains("control character")
        );
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }
}
