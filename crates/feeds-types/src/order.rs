//! The `order_by` request grammar: `[+|-]field`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sort direction for an ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

impl SortDirection {
    /// SQL keyword for this direction.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// A parsed `order_by` value.
///
/// An unsigned or `+`-prefixed field sorts ascending, a `-` prefix sorts
/// descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Field name without the sign.
    pub field: String,
    /// Requested direction.
    pub direction: SortDirection,
}

/// Errors produced while parsing an `order_by` value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseOrderByError {
    /// Nothing but an optional sign was supplied.
    #[error("order_by requires a field name")]
    MissingField,

    /// The field contains characters other than ASCII letters, digits and `_`.
    #[error("invalid order_by field: {0}")]
    InvalidField(String),

    /// The field is well formed but not sortable on this listing.
    #[error("unsupported order_by field: {0}")]
    UnsupportedField(String),
}

impl OrderBy {
    /// Builds an ascending ordering on `field`.
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    /// Builds a descending ordering on `field`.
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }

    /// Parses `value` and checks the field against `allowed`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseOrderByError::UnsupportedField`] when the field is not
    /// in `allowed`, or any error [`OrderBy::from_str`] reports.
    pub fn parse_allowed(value: &str, allowed: &[&str]) -> Result<Self, ParseOrderByError> {
        let order: Self = value.parse()?;
        if !allowed.contains(&order.field.as_str()) {
            return Err(ParseOrderByError::UnsupportedField(order.field));
        }
        Ok(order)
    }
}

impl FromStr for OrderBy {
    type Err = ParseOrderByError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // A bare `+` in a query string decodes to a space, so leading
        // whitespace reads as the ascending sign.
        let s = s.trim();
        let (direction, field) = match s.as_bytes().first() {
            Some(b'-') => (SortDirection::Descending, &s[1..]),
            Some(b'+') => (SortDirection::Ascending, &s[1..]),
            _ => (SortDirection::Ascending, s),
        };

        if field.is_empty() {
            return Err(ParseOrderByError::MissingField);
        }
        if !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ParseOrderByError::InvalidField(field.to_string()));
        }

        Ok(Self {
            field: field.to_string(),
            direction,
        })
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            SortDirection::Ascending => write!(f, "+{}", self.field),
            SortDirection::Descending => write!(f, "-{}", self.field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_field_sorts_ascending() {
        let order: OrderBy = "country_code".parse().expect("should parse");
        assert_eq!(order, OrderBy::ascending("country_code"));
    }

    #[test]
    fn plus_prefix_sorts_ascending() {
        let order: OrderBy = "+external_id".parse().expect("should parse");
        assert_eq!(order, OrderBy::ascending("external_id"));
    }

    #[test]
    fn minus_prefix_sorts_descending() {
        let order: OrderBy = "-country_code".parse().expect("should parse");
        assert_eq!(order, OrderBy::descending("country_code"));
    }

    #[test]
    fn decoded_plus_sign_sorts_ascending() {
        let order: OrderBy = " external_id".parse().expect("should parse");
        assert_eq!(order.direction, SortDirection::Ascending);
        assert_eq!(order.field, "external_id");
    }

    #[test]
    fn sign_without_field_is_rejected() {
        assert_eq!("-".parse::<OrderBy>(), Err(ParseOrderByError::MissingField));
        assert_eq!("".parse::<OrderBy>(), Err(ParseOrderByError::MissingField));
    }

    #[test]
    fn non_identifier_field_is_rejected() {
        let err = "-name; DROP TABLE feed".parse::<OrderBy>().expect_err("should fail");
        assert!(matches!(err, ParseOrderByError::InvalidField(_)));
    }

    #[test]
    fn field_outside_allow_list_is_rejected() {
        let err = OrderBy::parse_allowed("+note", &["country_code", "external_id"])
            .expect_err("note is not sortable");
        assert_eq!(err, ParseOrderByError::UnsupportedField("note".to_string()));
    }

    #[test]
    fn display_keeps_explicit_sign() {
        assert_eq!(OrderBy::descending("id").to_string(), "-id");
        assert_eq!(OrderBy::ascending("id").to_string(), "+id");
    }
}
