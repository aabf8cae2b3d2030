//! Errors raised while decoding raw source events

use thiserror::Error;

/// A raw event carried a field that could not be decoded
///
/// Any of these aborts the whole aggregation call; nothing is skipped silently.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// A field expected to hold a number did not parse as one
    #[error("invalid numeric field {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    /// A field expected to hold a date/time did not parse
    #[error("invalid date field {field}: {value:?} ({reason})")]
    InvalidDate {
        field: &'static str,
        value: String,
        reason: String,
    },
}

impl DecodeError {
    pub fn number(field: &'static str, value: impl Into<String>) -> Self {
        DecodeError::InvalidNumber {
            field,
            value: value.into(),
        }
    }

    pub fn date(field: &'static str, value: impl Into<String>, reason: impl ToString) -> Self {
        DecodeError::InvalidDate {
            field,
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DecodeError::number("value", "12x");
        assert_eq!(err.to_string(), "invalid numeric field value: \"12x\"");

        let err = DecodeError::date("dateTime", "2018-13-01", "input is out of range");
        assert_eq!(
            err.to_string(),
            "invalid date field dateTime: \"2018-13-01\" (input is out of range)"
        );
    }
}
