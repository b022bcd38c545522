//! Pre-flight form checks
//!
//! Run before any request leaves the device. Fields that are empty or only
//! whitespace count as missing.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ValidationError;

/// Minimum password length accepted at registration
pub const MIN_PASSWORD_LEN: usize = 6;

/// Registration screen input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationForm {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub agree_to_terms: bool,
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| match Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$") {
        Ok(re) => re,
        Err(_) => unreachable!("static regex pattern"),
    });

/// `local@domain.tld`: one `@`, no whitespace, a dot inside the domain
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn validate_login(email: &str, password: &str) -> Result<(), ValidationError> {
    if is_blank(email) || is_blank(password) {
        return Err(ValidationError::MissingFields);
    }
    Ok(())
}

/// Checks run in the order the registration screen reports them
pub fn validate_registration(form: &RegistrationForm) -> Result<(), ValidationError> {
    if [
        &form.full_name,
        &form.email,
        &form.password,
        &form.confirm_password,
    ]
    .iter()
    .any(|field| is_blank(field))
    {
        return Err(ValidationError::MissingFields);
    }

    if form.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort {
            min: MIN_PASSWORD_LEN,
        });
    }

    if form.password != form.confirm_password {
        return Err(ValidationError::PasswordMismatch);
    }

    if !is_valid_email(form.email.trim()) {
        return Err(ValidationError::InvalidEmail);
    }

    if !form.agree_to_terms {
        return Err(ValidationError::TermsNotAccepted);
    }

    Ok(())
}

/// Trimmed item text, or an error when nothing is left
pub fn validate_item_text(text: &str) -> Result<String, ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyItemText);
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> RegistrationForm {
        RegistrationForm {
            full_name: "Ada Gardener".to_string(),
            email: "ada@example.com".to_string(),
            password: "secret1".to_string(),
            confirm_password: "secret1".to_string(),
            agree_to_terms: true,
        }
    }

    #[test]
    fn test_email_shape() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last@mail.example.org"));
        assert!(!is_valid_email("no-at.example.com"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a@.com"));
        assert!(!is_valid_email("a@com."));
        assert!(!is_valid_email("a b@c.com"));
        assert!(!is_valid_email("a@b@c.com"));
        assert!(!is_valid_email("@b.com"));
        assert!(!is_valid_email("a@b.\tcom"));
        assert!(is_valid_email("a@b.c.d"));
    }

    #[test]
    fn test_login_requires_both_fields() {
        assert_eq!(validate_login("", "pw"), Err(ValidationError::MissingFields));
        assert_eq!(validate_login("a@b.co", "  "), Err(ValidationError::MissingFields));
        assert!(validate_login("a@b.co", "pw").is_ok());
    }

    #[test]
    fn test_registration_accepts_valid_form() {
        assert!(validate_registration(&form()).is_ok());
    }

    #[test]
    fn test_registration_check_order() {
        let mut f = form();
        f.full_name.clear();
        f.password = "abc".to_string();
        assert_eq!(validate_registration(&f), Err(ValidationError::MissingFields));

        let mut f = form();
        f.password = "abc".to_string();
        f.confirm_password = "xyz".to_string();
        assert_eq!(
            validate_registration(&f),
            Err(ValidationError::PasswordTooShort { min: 6 })
        );

        let mut f = form();
        f.confirm_password = "secret2".to_string();
        f.email = "broken".to_string();
        assert_eq!(validate_registration(&f), Err(ValidationError::PasswordMismatch));

        let mut f = form();
        f.email = "broken".to_string();
        f.agree_to_terms = false;
        assert_eq!(validate_registration(&f), Err(ValidationError::InvalidEmail));

        let mut f = form();
        f.agree_to_terms = false;
        assert_eq!(validate_registration(&f), Err(ValidationError::TermsNotAccepted));
    }

    #[test]
    fn test_item_text_is_trimmed() {
        assert_eq!(validate_item_text("  Buy soil \n").unwrap(), "Buy soil");
        assert_eq!(validate_item_text("   "), Err(ValidationError::EmptyItemText));
    }
}
