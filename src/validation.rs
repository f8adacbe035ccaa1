use crate::error::ValidationError;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_TITLE_LEN: usize = 200;

/// Board and category names: trimmed, non-empty, at most 100 characters.
pub fn validate_name(field: &'static str, raw: &str) -> Result<String, ValidationError> {
    validate_text(field, raw, MAX_NAME_LEN)
}

pub fn validate_title(raw: &str) -> Result<String, ValidationError> {
    validate_text("title", raw, MAX_TITLE_LEN)
}

fn validate_text(field: &'static str, raw: &str, max: usize) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    let len = trimmed.chars().count();
    if len > max {
        return Err(ValidationError::TooLong { field, max, len });
    }
    Ok(trimmed.to_string())
}
