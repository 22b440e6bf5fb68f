//! Input validation utilities.

use validator::Validate;

use crate::error::HuddleError;
use crate::models::MessageDraft;

/// Validate a request body, returning a HuddleError::Validation on failure.
pub fn validate_request<T: Validate>(body: &T) -> Result<(), HuddleError> {
    body.validate().map_err(|e| HuddleError::Validation {
        message: format_validation_errors(e),
    })
}

/// Format validation errors into a human-readable string.
fn format_validation_errors(errors: validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for '{field}'"))
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Emoji reactions are short grapheme clusters, not free text.
#[derive(Debug, Validate)]
pub struct ReactionInput {
    #[validate(length(min = 1, max = 32, message = "Emoji must be 1-32 characters"))]
    pub emoji: String,
}

/// Check a chat message draft against the configured length limit.
///
/// Text may be empty only when a file is attached.
pub fn validate_draft(draft: &MessageDraft, max_len: usize) -> Result<(), HuddleError> {
    if draft.text.trim().is_empty() && draft.file.is_none() {
        return Err(HuddleError::validation("Message cannot be empty"));
    }
    if draft.text.chars().count() > max_len {
        return Err(HuddleError::validation(format!(
            "Message exceeds {max_len} characters"
        )));
    }
    Ok(())
}
