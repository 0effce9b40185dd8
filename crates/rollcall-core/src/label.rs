//! Registration-number extraction from enrollment labels.
//!
//! Enrollment labels carry the registration number as a fixed-width decimal
//! suffix with possible leading zeros: `"jane0007"` → `7`. The width is
//! configurable because label schemes vary between deployments.

use thiserror::Error;

/// Default registration-suffix width in characters.
pub const DEFAULT_SUFFIX_WIDTH: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    #[error("label '{label}' is shorter than the {width}-character registration suffix")]
    TooShort { label: String, width: usize },
    #[error("label '{label}' suffix '{suffix}' is not a decimal registration number")]
    NotNumeric { label: String, suffix: String },
}

/// Parse the trailing `width` characters of `label` as a registration
/// number, stripping leading zeros.
///
/// Never panics on malformed input — a bad label is a per-face condition,
/// not a reason to abort a frame.
pub fn parse_registration_no(label: &str, width: usize) -> Result<i64, LabelError> {
    let char_count = label.chars().count();
    if char_count < width {
        return Err(LabelError::TooShort {
            label: label.to_string(),
            width,
        });
    }

    let suffix: String = label.chars().skip(char_count - width).collect();
    if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
        return Err(LabelError::NotNumeric {
            label: label.to_string(),
            suffix,
        });
    }

    // is_ascii_digit above rejects sign characters, so parse can only fail
    // on overflow for absurd widths.
    suffix.parse::<i64>().map_err(|_| LabelError::NotNumeric {
        label: label.to_string(),
        suffix,
    })
}
