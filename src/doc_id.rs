use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Identifier of a stored document.
///
/// Allocated from the record store's sequence counter, so ids are dense
/// and never reused. Displayed as `#` followed by at least six hex digits.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

impl DocumentId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:06x}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = Error;

    /// Accepts the display form (`#00002a`) or a bare hex string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if hex.is_empty() {
            return Err(Error::InvalidInput("empty document id".into()));
        }
        u64::from_str_radix(hex, 16).map(DocumentId).map_err(|_| {
            Error::InvalidInput(format!("not a document id: {s}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_hash_prefix() {
        let id = DocumentId(42);
        assert_eq!(id.to_string(), "#00002a");
    }

    #[test]
    fn display_grows_past_six_digits() {
        let id = DocumentId(0x1234_5678);
        assert_eq!(id.to_string(), "#12345678");
    }

    #[test]
    fn parse_accepts_display_form() {
        let id: DocumentId = "#00002a".parse().unwrap();
        assert_eq!(id, DocumentId(42));
        let bare: DocumentId = "2a".parse().unwrap();
        assert_eq!(bare, DocumentId(42));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("#".parse::<DocumentId>().is_err());
        assert!("#xyz".parse::<DocumentId>().is_err());
    }
}
