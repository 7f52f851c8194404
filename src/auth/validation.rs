use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{AuthError, FieldErrors};

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Accumulates field errors so a request reports every problem at once.
#[derive(Debug, Default)]
pub(crate) struct Checks {
    errors: FieldErrors,
}

impl Checks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&mut self, field: &str, message: &str) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    pub fn require(&mut self, field: &str, value: &str, message: &str) {
        if value.trim().is_empty() {
            self.fail(field, message);
        }
    }

    pub fn email(&mut self, field: &str, value: &str) {
        if !is_valid_email(value) {
            self.fail(field, "Invalid email address");
        }
    }

    pub fn min_len(&mut self, field: &str, value: &str) {
        if value.chars().count() < MIN_PASSWORD_LEN {
            self.fail(field, "Password must be at least 8 characters long");
        }
    }

    /// Length plus upper, lower, digit and symbol classes.
    pub fn strong_password(&mut self, field: &str, value: &str) {
        self.min_len(field, value);
        if !value.chars().any(|c| c.is_ascii_uppercase()) {
            self.fail(field, "Password must contain at least one uppercase letter");
        }
        if !value.chars().any(|c| c.is_ascii_lowercase()) {
            self.fail(field, "Password must contain at least one lowercase letter");
        }
        if !value.chars().any(|c| c.is_ascii_digit()) {
            self.fail(field, "Password must contain at least one number");
        }
        if !value.chars().any(|c| !c.is_ascii_alphanumeric()) {
            self.fail(field, "Password must contain at least one symbol");
        }
    }

    pub fn matches(&mut self, field: &str, value: &str, other: &str) {
        if value != other {
            self.fail(field, "Passwords do not match");
        }
    }

    pub fn finish(self) -> Result<(), AuthError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Validation {
                details: self.errors,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.de"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn weak_password_reports_every_missing_class() {
        let mut checks = Checks::new();
        checks.strong_password("password", "short");
        let Err(AuthError::Validation { details }) = checks.finish() else {
            panic!("expected validation error");
        };
        // length, upper, digit, symbol
        assert_eq!(details["password"].len(), 4);
    }

    #[test]
    fn strong_password_passes() {
        let mut checks = Checks::new();
        checks.strong_password("password", "Str0ng!pass");
        checks.matches("confirm_password", "Str0ng!pass", "Str0ng!pass");
        assert!(checks.finish().is_ok());
    }
}
