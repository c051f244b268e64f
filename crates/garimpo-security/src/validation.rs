use garimpo_common::{Error, Result};

pub const MAX_MESSAGE_CHARS: usize = 4_000;
pub const MAX_PREFERENCE_CHARS: usize = 200;
pub const MAX_IDENTIFIER_CHARS: usize = 128;

/// Checks applied to inbound request data before it reaches storage or the model.
pub struct InputValidator;

impl InputValidator {
    /// Trimmed chat message with control characters removed (newlines and tabs kept).
    pub fn chat_message(raw: &str) -> Result<String> {
        let cleaned: String = raw
            .chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect();
        let cleaned = cleaned.trim();

        if cleaned.is_empty() {
            return Err(Error::Validation("message must not be empty".into()));
        }
        if cleaned.chars().count() > MAX_MESSAGE_CHARS {
            return Err(Error::Validation(format!(
                "message exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }
        Ok(cleaned.to_string())
    }

    /// Single-line preference value.
    pub fn preference_value(raw: &str) -> Result<String> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(Error::Validation("preference value must not be empty".into()));
        }
        if value.chars().any(char::is_control) {
            return Err(Error::Validation(
                "preference value must be a single line".into(),
            ));
        }
        if value.chars().count() > MAX_PREFERENCE_CHARS {
            return Err(Error::Validation(format!(
                "preference value exceeds {MAX_PREFERENCE_CHARS} characters"
            )));
        }
        Ok(value.to_string())
    }

    /// Opaque identifier such as a user or conversation id.
    pub fn identifier(raw: &str, what: &str) -> Result<String> {
        let value = raw.trim();
        let valid = !value.is_empty()
            && value.len() <= MAX_IDENTIFIER_CHARS
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
        if !valid {
            return Err(Error::Validation(format!("invalid {what}")));
        }
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_is_trimmed_and_cleaned() {
        let msg = InputValidator::chat_message("  what's on\u{0007} tonight?\n ").unwrap();
        assert_eq!(msg, "what's on tonight?");
    }

    #[test]
    fn chat_message_rejects_blank_and_oversized() {
        assert!(InputValidator::chat_message(" \n\t ").is_err());
        let long = "a".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(InputValidator::chat_message(&long).is_err());
    }

    #[test]
    fn preference_value_must_be_single_line() {
        assert_eq!(
            InputValidator::preference_value(" Sci-Fi ").unwrap(),
            "Sci-Fi"
        );
        assert!(InputValidator::preference_value("Drama\nHorror").is_err());
    }

    #[test]
    fn identifier_allows_uuid_and_email_shapes() {
        assert!(InputValidator::identifier("3f2b9c1e-8a4d-4c0b-9d7e-1a2b3c4d5e6f", "id").is_ok());
        assert!(InputValidator::identifier("ana@example.com", "user id").is_ok());
        assert!(InputValidator::identifier("../etc/passwd", "id").is_err());
        assert!(InputValidator::identifier("", "id").is_err());
    }
}
