//! Driver document number (11 digits, two mod-11 check digits).

use serde::{Deserialize, Serialize};

use bulkyard_core::{DomainError, DomainResult, ValueObject};

const DOCUMENT_LEN: usize = 11;

/// Strip everything but ASCII digits and keep at most 11 of them.
pub fn normalize_document(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_digit)
        .take(DOCUMENT_LEN)
        .collect()
}

/// Validate the digit count, reject repeated-digit sequences, then verify both
/// check digits.
pub fn is_valid_document(raw: &str) -> bool {
    let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != DOCUMENT_LEN {
        return false;
    }
    if digits.iter().all(|d| *d == digits[0]) {
        return false;
    }

    check_digit(&digits[..9]) == digits[9] && check_digit(&digits[..10]) == digits[10]
}

/// Weighted sum with weights `len+1` down to 2; remainders 0 and 1 map to 0.
fn check_digit(body: &[u32]) -> u32 {
    let top = body.len() as u32 + 1;
    let sum: u32 = body
        .iter()
        .enumerate()
        .map(|(i, d)| d * (top - i as u32))
        .sum();
    match sum % 11 {
        0 | 1 => 0,
        r => 11 - r,
    }
}

/// A validated, digits-only driver document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DriverDocument(String);

impl DriverDocument {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        if !is_valid_document(raw) {
            return Err(DomainError::InvalidDocument);
        }
        Ok(Self(normalize_document(raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for DriverDocument {}

impl TryFrom<String> for DriverDocument {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DriverDocument> for String {
    fn from(value: DriverDocument) -> Self {
        value.0
    }
}

impl core::fmt::Display for DriverDocument {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
