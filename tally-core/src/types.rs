//! Domain types shared by every tally crate.
//!
//! Counts are carried as exact decimal digit sequences (`serde_json::Number`
//! under `arbitrary_precision`), never as floating point.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable unique key of a catalog record (`uuid` field).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque revision identifier returned by the remote with a document's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionToken(pub String);

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for VersionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VersionToken {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A non-negative integer download count of unbounded size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DownloadCount(Number);

/// Raised when a value cannot be read as a [`DownloadCount`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{0}' is not a non-negative integer count")]
pub struct InvalidCount(pub String);

/// Largest decimal exponent accepted by [`DownloadCount::parse_integral`].
const MAX_EXPONENT: i64 = 1_000;

impl DownloadCount {
    pub fn zero() -> Self {
        Self(Number::from(0u64))
    }

    /// Parse a plain decimal digit string. Leading zeros are normalised away.
    pub fn parse(digits: &str) -> Result<Self, InvalidCount> {
        let trimmed = digits.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidCount(digits.to_string()));
        }
        let normalised = trimmed.trim_start_matches('0');
        let normalised = if normalised.is_empty() { "0" } else { normalised };
        Number::from_str(normalised)
            .map(Self)
            .map_err(|_| InvalidCount(digits.to_string()))
    }

    /// Parse a decimal literal whose value is a non-negative integer, in any
    /// notation a double may be printed in: `500`, `500.0`, `5e2`, `5.0E+2`.
    ///
    /// A non-zero fractional part or a sign is rejected.
    pub fn parse_integral(literal: &str) -> Result<Self, InvalidCount> {
        let invalid = || InvalidCount(literal.to_string());
        let trimmed = literal.trim();
        let (mantissa, exponent) = match trimmed.split_once(['e', 'E']) {
            Some((m, e)) => (m, e.strip_prefix('+').unwrap_or(e).parse::<i64>().map_err(|_| invalid())?),
            None => (trimmed, 0),
        };
        if !(-MAX_EXPONENT..=MAX_EXPONENT).contains(&exponent) {
            return Err(invalid());
        }
        let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let mut digits = format!("{whole}{fraction}");
        let shift = exponent - fraction.len() as i64;
        if shift >= 0 {
            digits.extend(std::iter::repeat('0').take(shift as usize));
        } else {
            let keep = digits.len().saturating_sub(shift.unsigned_abs() as usize);
            if digits[keep..].bytes().any(|b| b != b'0') {
                return Err(invalid());
            }
            digits.truncate(keep);
        }
        if digits.is_empty() {
            digits.push('0');
        }
        Self::parse(&digits).map_err(|_| invalid())
    }

    /// Accept a JSON number, or a decimal string, holding a non-negative integer.
    pub fn from_value(value: &Value) -> Result<Self, InvalidCount> {
        match value {
            Value::Number(n) => Self::parse(&n.to_string()),
            Value::String(s) => Self::parse(s),
            other => Err(InvalidCount(other.to_string())),
        }
    }

    pub fn as_number(&self) -> &Number {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.to_string() == "0"
    }
}

impl From<u64> for DownloadCount {
    fn from(n: u64) -> Self {
        Self(Number::from(n))
    }
}

impl FromStr for DownloadCount {
    type Err = InvalidCount;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DownloadCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<'de> Deserialize<'de> for DownloadCount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// Authoritative counts keyed by record id, rebuilt on every run.
pub type CountIndex = HashMap<RecordId, DownloadCount>;

// ---------------------------------------------------------------------------
// Dataset kinds
// ---------------------------------------------------------------------------

/// The catalogs whose counts are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Applications,
    Themes,
}

impl DatasetKind {
    pub fn all() -> &'static [DatasetKind] {
        &[DatasetKind::Applications, DatasetKind::Themes]
    }

    /// Document path inside the remote repository.
    pub fn default_path(self) -> &'static str {
        match self {
            DatasetKind::Applications => "data/community_apps/community_apps.json",
            DatasetKind::Themes => "data/community_themes/community_themes.json",
        }
    }

    pub fn default_layout(self) -> DocumentLayout {
        match self {
            DatasetKind::Applications => DocumentLayout::new("apps", "app"),
            DatasetKind::Themes => DocumentLayout::new("themes", "theme"),
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetKind::Applications => write!(f, "applications"),
            DatasetKind::Themes => write!(f, "themes"),
        }
    }
}

impl FromStr for DatasetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "applications" | "apps" | "app" => Ok(DatasetKind::Applications),
            "themes" | "theme" => Ok(DatasetKind::Themes),
            other => Err(format!(
                "unknown dataset kind '{other}'; expected: applications, themes"
            )),
        }
    }
}

/// Where a catalog keeps its records: `root[collection_field][i][record_field]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLayout {
    pub collection_field: String,
    pub record_field: String,
}

impl DocumentLayout {
    pub fn new(collection_field: impl Into<String>, record_field: impl Into<String>) -> Self {
        Self {
            collection_field: collection_field.into(),
            record_field: record_field.into(),
        }
    }
}

/// A remote document exactly as fetched, with the token needed to overwrite it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedDocument {
    pub path: String,
    pub raw: Vec<u8>,
    pub version: VersionToken,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(RecordId::from("a1").to_string(), "a1");
        assert_eq!(VersionToken::from("abc123").to_string(), "abc123");
    }

    #[test]
    fn count_keeps_digits_beyond_u64() {
        let count = DownloadCount::parse("123456789012345678901234567890").unwrap();
        assert_eq!(count.to_string(), "123456789012345678901234567890");
        let json = serde_json::to_string(&count).unwrap();
        assert_eq!(json, "123456789012345678901234567890");
    }

    #[test]
    fn count_rejects_negative_and_fractional_values() {
        assert!(DownloadCount::parse("-1").is_err());
        assert!(DownloadCount::from_value(&serde_json::json!(1.5)).is_err());
        assert!(DownloadCount::from_value(&serde_json::json!(true)).is_err());
        assert!(DownloadCount::parse("").is_err());
        assert_eq!(
            DownloadCount::parse("-1").unwrap_err().to_string(),
            "'-1' is not a non-negative integer count"
        );
    }

    #[test]
    fn integral_literals_in_float_notation_are_accepted() {
        for (literal, digits) in [
            ("500", "500"),
            ("500.0", "500"),
            ("500.000", "500"),
            ("5e2", "500"),
            ("5.0E+2", "500"),
            ("1.5e1", "15"),
            ("1e21", "1000000000000000000000"),
            ("2500e-2", "25"),
            ("0.0", "0"),
            (".0", "0"),
        ] {
            assert_eq!(
                DownloadCount::parse_integral(literal).map(|c| c.to_string()),
                Ok(digits.to_string()),
                "literal {literal}"
            );
        }
    }

    #[test]
    fn fractional_or_signed_literals_are_rejected() {
        for literal in ["500.5", "1e-1", "-1", "-0.0", "NaN", "Infinity", "", ".", "1e", "1e99999"] {
            assert!(
                DownloadCount::parse_integral(literal).is_err(),
                "expected rejection of {literal:?}"
            );
        }
    }

    #[test]
    fn count_normalises_leading_zeros() {
        assert_eq!(DownloadCount::parse("007").unwrap().to_string(), "7");
        assert!(DownloadCount::parse("000").unwrap().is_zero());
    }

    #[test]
    fn kind_parses_aliases() {
        assert_eq!("apps".parse::<DatasetKind>(), Ok(DatasetKind::Applications));
        assert_eq!("Themes".parse::<DatasetKind>(), Ok(DatasetKind::Themes));
        assert!("plugins".parse::<DatasetKind>().is_err());
    }

    #[test]
    fn kind_default_layouts_match_catalog_shape() {
        assert_eq!(
            DatasetKind::Applications.default_layout(),
            DocumentLayout::new("apps", "app")
        );
        assert_eq!(
            DatasetKind::Themes.default_layout(),
            DocumentLayout::new("themes", "theme")
        );
    }
}
