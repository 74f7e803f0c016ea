//! SQL hardening for identifiers and literals spliced into stage queries.
//!
//! Every stage builds its query text from configured column names and
//! user-supplied values (region synonyms, thresholds). Configured identifiers are
//! validated and quoted; identifiers discovered from file headers are only quoted,
//! since their spelling is dictated by the data.

use crate::error::{EtlError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// SQL identifier validation and escaping utilities.
pub struct SqlSecurity;

impl SqlSecurity {
    /// Validates and escapes a configured SQL identifier (table or column name).
    ///
    /// # Examples
    /// ```rust
    /// use supply_etl::security::SqlSecurity;
    ///
    /// assert_eq!(SqlSecurity::escape_identifier("Order_ID").unwrap(), "\"Order_ID\"");
    /// assert!(SqlSecurity::escape_identifier("id; DROP TABLE sales--").is_err());
    /// assert!(SqlSecurity::escape_identifier(&"very_long_name_".repeat(100)).is_err());
    /// ```
    pub fn escape_identifier(identifier: &str) -> Result<String> {
        Self::validate_identifier(identifier)?;
        Ok(Self::quote_identifier(identifier))
    }

    /// Quotes an identifier taken verbatim from a data source header.
    ///
    /// No format validation is applied; embedded double quotes are doubled so the
    /// result is always a single delimited identifier.
    pub fn quote_identifier(identifier: &str) -> String {
        let escaped = identifier.replace('"', "\"\"");
        format!("\"{escaped}\"")
    }

    /// Quotes a string literal, doubling embedded single quotes.
    pub fn quote_literal(value: &str) -> String {
        let escaped = value.replace('\'', "''");
        format!("'{escaped}'")
    }

    /// Validates a SQL identifier without escaping it.
    pub fn validate_identifier(identifier: &str) -> Result<()> {
        if identifier.is_empty() || identifier.trim().is_empty() {
            return Err(EtlError::SecurityError(
                "SQL identifier cannot be empty or whitespace-only".to_string(),
            ));
        }

        if identifier.len() > 128 {
            return Err(EtlError::SecurityError(
                "SQL identifier too long (max 128 characters)".to_string(),
            ));
        }

        if identifier.contains('\0') {
            return Err(EtlError::SecurityError(
                "SQL identifier cannot contain null bytes".to_string(),
            ));
        }

        static IDENTIFIER_REGEX: Lazy<Regex> = Lazy::new(|| {
            #[allow(clippy::expect_used)]
            Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("Hard-coded regex pattern should be valid")
        });

        if !IDENTIFIER_REGEX.is_match(identifier) {
            return Err(EtlError::SecurityError(format!(
                "Invalid SQL identifier format: '{identifier}'. Identifiers must start with a letter or underscore and contain only letters, numbers and underscores"
            )));
        }

        Ok(())
    }

    /// Renders a float so the engine always parses it as a floating point literal.
    pub fn float_literal(value: f64) -> Result<String> {
        if !value.is_finite() {
            return Err(EtlError::SecurityError(format!(
                "Non-finite numeric literal: {value}"
            )));
        }
        Ok(format!("{value:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert_eq!(SqlSecurity::escape_identifier("region").unwrap(), "\"region\"");
        assert_eq!(
            SqlSecurity::escape_identifier("Total_Sales").unwrap(),
            "\"Total_Sales\""
        );
        assert!(SqlSecurity::validate_identifier("_private").is_ok());
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(SqlSecurity::escape_identifier("").is_err());
        assert!(SqlSecurity::escape_identifier("   ").is_err());
        assert!(SqlSecurity::escape_identifier("1column").is_err());
        assert!(SqlSecurity::escape_identifier("col\"umn").is_err());
        assert!(SqlSecurity::escape_identifier("a.b").is_err());
        assert!(SqlSecurity::escape_identifier("x\0").is_err());
    }

    #[test]
    fn test_quote_identifier_from_header() {
        assert_eq!(
            SqlSecurity::quote_identifier("Warehouse Location"),
            "\"Warehouse Location\""
        );
        assert_eq!(SqlSecurity::quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(SqlSecurity::quote_literal("NORTH"), "'NORTH'");
        assert_eq!(SqlSecurity::quote_literal("O'HARE"), "'O''HARE'");
    }

    #[test]
    fn test_float_literal() {
        assert_eq!(SqlSecurity::float_literal(0.95).unwrap(), "0.95");
        assert_eq!(SqlSecurity::float_literal(1.0).unwrap(), "1.0");
        assert!(SqlSecurity::float_literal(f64::NAN).is_err());
    }
}
