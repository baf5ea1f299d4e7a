//! Brazilian individual tax id (CPF) value object.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of digits in a tax id once formatting is stripped.
pub const TAX_ID_LENGTH: usize = 11;

/// Sentinel sent to the provider when no payer identification is available.
pub const SENTINEL_TAX_ID: &str = "00000000000";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaxIdError {
    #[error("tax id must have exactly 11 digits")]
    InvalidLength,
    #[error("tax id cannot repeat a single digit")]
    RepeatedDigits,
    #[error("tax id check digits do not match")]
    ChecksumMismatch,
}

/// A checksum-validated, digits-only tax id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxId(String);

impl TaxId {
    /// Parse a tax id, accepting the usual `123.456.789-09` punctuation.
    pub fn parse(raw: &str) -> Result<Self, TaxIdError> {
        let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();
        let stray = raw
            .chars()
            .any(|c| !c.is_ascii_digit() && !matches!(c, '.' | '-' | ' '));

        if stray || digits.len() != TAX_ID_LENGTH {
            return Err(TaxIdError::InvalidLength);
        }

        if digits.iter().all(|d| *d == digits[0]) {
            return Err(TaxIdError::RepeatedDigits);
        }

        if check_digit(&digits[..9]) != digits[9] || check_digit(&digits[..10]) != digits[10] {
            return Err(TaxIdError::ChecksumMismatch);
        }

        Ok(Self(digits.iter().map(|d| char::from_digit(*d, 10).unwrap_or('0')).collect()))
    }

    pub fn is_valid(raw: &str) -> bool {
        Self::parse(raw).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Weighted-sum check digit over `prefix`: weights run from `len + 1` down to 2.
fn check_digit(prefix: &[u32]) -> u32 {
    let weight_start = prefix.len() as u32 + 1;
    let sum: u32 = prefix
        .iter()
        .enumerate()
        .map(|(i, d)| d * (weight_start - i as u32))
        .sum();
    let remainder = (sum * 10) % 11;
    if remainder == 10 {
        0
    } else {
        remainder
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaxId {
    type Err = TaxIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for TaxId {
    type Error = TaxIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TaxId> for String {
    fn from(value: TaxId) -> Self {
        value.0
    }
}
