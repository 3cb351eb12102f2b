//! Vehicle plates: legacy `LLL-NNNN` and regional `LLLNLNN`.

use serde::{Deserialize, Serialize};

use bulkyard_core::{DomainError, DomainResult, ValueObject};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateFormat {
    /// Three letters, four digits; written with a hyphen.
    Legacy,
    /// Three letters, digit, letter, two digits; written without separator.
    Regional,
}

fn stripped(raw: &str) -> Vec<char> {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Detect the plate format after stripping separators and case.
pub fn plate_format(raw: &str) -> Option<PlateFormat> {
    let c = stripped(raw);
    if c.len() != 7 || !c[..3].iter().all(char::is_ascii_alphabetic) {
        return None;
    }
    let digit = |i: usize| c[i].is_ascii_digit();
    if digit(3) && digit(4) && digit(5) && digit(6) {
        Some(PlateFormat::Legacy)
    } else if digit(3) && c[4].is_ascii_alphabetic() && digit(5) && digit(6) {
        Some(PlateFormat::Regional)
    } else {
        None
    }
}

pub fn is_valid_plate(raw: &str) -> bool {
    plate_format(raw).is_some()
}

/// Canonical form: `ABC-1234` for legacy plates, `ABC1D23` for regional ones.
/// Unrecognised input comes back uppercased and alphanumeric, cut to 7 chars.
pub fn normalize_plate(raw: &str) -> String {
    let c = stripped(raw);
    match plate_format(raw) {
        Some(PlateFormat::Legacy) => {
            let letters: String = c[..3].iter().collect();
            let digits: String = c[3..].iter().collect();
            format!("{letters}-{digits}")
        }
        Some(PlateFormat::Regional) => c.iter().collect(),
        None => c.iter().take(7).collect(),
    }
}

/// A validated plate in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VehiclePlate(String);

impl VehiclePlate {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        if !is_valid_plate(raw) {
            return Err(DomainError::InvalidPlate(raw.trim().to_string()));
        }
        Ok(Self(normalize_plate(raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn format(&self) -> PlateFormat {
        if self.0.contains('-') {
            PlateFormat::Legacy
        } else {
            PlateFormat::Regional
        }
    }
}

impl ValueObject for VehiclePlate {}

impl TryFrom<String> for VehiclePlate {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VehiclePlate> for String {
    fn from(value: VehiclePlate) -> Self {
        value.0
    }
}

impl core::fmt::Display for VehiclePlate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn legacy_plate_gets_hyphen() {
        assert_eq!(normalize_plate("ABC1234"), "ABC-1234");
        assert!(is_valid_plate("ABC1234"));
        assert_eq!(normalize_plate("abc-1234"), "ABC-1234");
    }

    #[test]
    fn regional_plate_has_no_hyphen() {
        assert!(is_valid_plate("ABC1D23"));
        assert_eq!(normalize_plate("abc 1d23"), "ABC1D23");
        assert_eq!(VehiclePlate::parse("ABC1D23").unwrap().format(), PlateFormat::Regional);
    }

    #[test]
    fn short_or_malformed_plates_are_rejected() {
        assert!(!is_valid_plate("ABC12"));
        assert!(!is_valid_plate("1BC1234"));
        assert!(!is_valid_plate("ABCD123"));
        assert!(!is_valid_plate(""));
        assert_eq!(
            VehiclePlate::parse("ABC12"),
            Err(DomainError::InvalidPlate("ABC12".to_string()))
        );
    }

    #[test]
    fn best_effort_normalization_for_garbage() {
        assert_eq!(normalize_plate("ab-c12"), "ABC12");
        assert_eq!(normalize_plate("toolongplate99"), "TOOLONG");
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent_for_valid_plates(
            letters in "[A-Z]{3}",
            d in 0u32..10,
            mid in "[A-Z0-9]",
            tail in 0u32..100,
        ) {
            let raw = format!("{letters}{d}{mid}{tail:02}");
            prop_assume!(is_valid_plate(&raw));
            let once = normalize_plate(&raw);
            prop_assert_eq!(normalize_plate(&once), once.clone());
            prop_assert!(is_valid_plate(&once));
        }
    }
}
