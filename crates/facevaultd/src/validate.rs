//! Input checks applied before any image work is done.

use thiserror::Error;

pub const MAX_NAME_CHARS: usize = 100;

/// Names that would collide with fixed routes under `/faces/` or be
/// collapsed as dot segments when placed in a URL path.
const RESERVED_NAMES: [&str; 4] = [".", "..", "recognize", "refresh"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("name must be at most {max} characters")]
    NameTooLong { max: usize },
    #[error("name must not contain control characters or path separators")]
    InvalidNameChars,
    #[error("name '{0}' is reserved")]
    ReservedName(String),
    #[error("tolerance must be a finite, non-negative number (got '{0}')")]
    InvalidTolerance(String),
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("uploaded file is not an image (content type {0})")]
    NotAnImage(String),
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("upload too large: {0}")]
    PayloadTooLarge(String),
}

/// Trim and check a face name supplied by a client.
pub fn validate_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(ValidationError::NameTooLong {
            max: MAX_NAME_CHARS,
        });
    }
    if name.chars().any(|c| c.is_control() || c == '/' || c == '\\') {
        return Err(ValidationError::InvalidNameChars);
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(ValidationError::ReservedName(name.to_string()));
    }
    Ok(name.to_string())
}

/// Parse a per-request tolerance override.
pub fn validate_tolerance(raw: &str) -> Result<f32, ValidationError> {
    let invalid = || ValidationError::InvalidTolerance(raw.to_string());
    let value: f32 = raw.trim().parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    Ok(value)
}

/// Accept `image/*`, generic binary, or no declared type at all; decoding
/// decides the rest.
pub fn check_content_type(content_type: Option<&str>) -> Result<(), ValidationError> {
    match content_type {
        None => Ok(()),
        Some(ct) if ct.starts_with("image/") || ct == "application/octet-stream" => Ok(()),
        Some(ct) => Err(ValidationError::NotAnImage(ct.to_string())),
    }
}
