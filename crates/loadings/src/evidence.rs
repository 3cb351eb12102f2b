//! Photo evidence kinds and the file formats accepted for each.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use bulkyard_core::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    Before,
    During,
    After,
    Invoice,
    Seal,
}

impl EvidenceType {
    pub const ALL: [EvidenceType; 5] = [
        EvidenceType::Before,
        EvidenceType::During,
        EvidenceType::After,
        EvidenceType::Invoice,
        EvidenceType::Seal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceType::Before => "before",
            EvidenceType::During => "during",
            EvidenceType::After => "after",
            EvidenceType::Invoice => "invoice",
            EvidenceType::Seal => "seal",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let wanted = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or(DomainError::MissingField("evidence_type"))
    }
}

impl core::fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence that must be present before a loading may complete.
pub const REQUIRED_EVIDENCE: [EvidenceType; 3] =
    [EvidenceType::Before, EvidenceType::After, EvidenceType::Invoice];

pub const IMAGE_FORMATS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Accepted in addition to images for `invoice` evidence.
pub const DOCUMENT_FORMATS: [&str; 1] = ["pdf"];

/// Checks the file extension against the allow-list for `evidence_type` and
/// returns it lowercased.
pub fn ensure_format(evidence_type: EvidenceType, file_name: &str) -> Result<String, DomainError> {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let allowed = IMAGE_FORMATS.contains(&ext.as_str())
        || (evidence_type == EvidenceType::Invoice && DOCUMENT_FORMATS.contains(&ext.as_str()));
    if !allowed {
        return Err(DomainError::UnsupportedFormat(if ext.is_empty() {
            file_name.to_string()
        } else {
            ext
        }));
    }
    Ok(ext)
}

/// Number of evidence items per type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoCounts(BTreeMap<EvidenceType, u32>);

impl PhotoCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, evidence_type: EvidenceType) -> u32 {
        self.0.get(&evidence_type).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, evidence_type: EvidenceType) {
        *self.0.entry(evidence_type).or_insert(0) += 1;
    }

    pub fn total(&self) -> u32 {
        self.0.values().sum()
    }

    /// Required types with no evidence yet, in canonical order.
    pub fn missing_required(&self) -> Vec<EvidenceType> {
        REQUIRED_EVIDENCE
            .into_iter()
            .filter(|t| self.get(*t) == 0)
            .collect()
    }
}

impl FromIterator<EvidenceType> for PhotoCounts {
    fn from_iter<I: IntoIterator<Item = EvidenceType>>(iter: I) -> Self {
        let mut counts = PhotoCounts::new();
        for t in iter {
            counts.increment(t);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_accepted_for_every_type() {
        for t in EvidenceType::ALL {
            assert_eq!(ensure_format(t, "dock.JPG").unwrap(), "jpg");
            assert_eq!(ensure_format(t, "seal.webp").unwrap(), "webp");
        }
    }

    #[test]
    fn pdf_only_for_invoice() {
        assert_eq!(ensure_format(EvidenceType::Invoice, "nf-123.pdf").unwrap(), "pdf");
        assert_eq!(
            ensure_format(EvidenceType::Before, "nf-123.pdf").unwrap_err(),
            DomainError::UnsupportedFormat("pdf".to_string())
        );
    }

    #[test]
    fn missing_extension_is_unsupported() {
        assert!(matches!(
            ensure_format(EvidenceType::After, "photo").unwrap_err(),
            DomainError::UnsupportedFormat(_)
        ));
        assert!(ensure_format(EvidenceType::After, "clip.mp4").is_err());
    }

    #[test]
    fn missing_required_lists_gaps_in_order() {
        let counts: PhotoCounts = [EvidenceType::Before, EvidenceType::During, EvidenceType::Before]
            .into_iter()
            .collect();
        assert_eq!(counts.get(EvidenceType::Before), 2);
        assert_eq!(counts.total(), 3);
        assert_eq!(
            counts.missing_required(),
            vec![EvidenceType::After, EvidenceType::Invoice]
        );
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(EvidenceType::parse(" Seal ").unwrap(), EvidenceType::Seal);
        assert!(EvidenceType::parse("selfie").is_err());
    }
}
