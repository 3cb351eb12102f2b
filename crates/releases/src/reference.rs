use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use bulkyard_core::{DomainError, DomainResult, ValueObject};

static ORDER_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^PED-\d{4}-\d{4}$").expect("static pattern compiles"));

/// External order reference, `PED-YYYY-NNNN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderReference(String);

impl OrderReference {
    /// Trims and uppercases before matching.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let candidate = raw.trim().to_ascii_uppercase();
        if !ORDER_REFERENCE.is_match(&candidate) {
            return Err(DomainError::InvalidReference(raw.trim().to_string()));
        }
        Ok(Self(candidate))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for OrderReference {}

impl TryFrom<String> for OrderReference {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrderReference> for String {
    fn from(value: OrderReference) -> Self {
        value.0
    }
}

impl core::fmt::Display for OrderReference {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
