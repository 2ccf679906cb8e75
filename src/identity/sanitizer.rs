//! ID-Sanitizer
//!
//! Das Verbindungs-Backend akzeptiert nur alphanumerische IDs. Rohe
//! Teilnehmer-IDs aus dem Raum-Dienst enthalten aber Sonderzeichen,
//! daher werden alle ungültigen Zeichen durch ein festes Füllzeichen
//! ersetzt.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Füllzeichen für ungültige Zeichen in rohen IDs
const FILLER: char = 'G';

/// Bereinigte Teilnehmer-ID, gültig für das Verbindungs-Backend
///
/// Die Ableitung ist deterministisch und total, aber nicht injektiv:
/// zwei verschiedene rohe IDs können auf dieselbe ConnectionId
/// abgebildet werden ("a!" und "a?" werden beide zu "aG"). Das
/// Registry-`try_insert` macht Kollisionen harmlos - der zweite
/// Versuch wird verworfen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Bereinigt eine rohe Teilnehmer-ID
    pub fn from_raw(raw: &str) -> Self {
        let sanitized = raw
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { FILLER })
            .collect();
        Self(sanitized)
    }

    /// Erstellt eine ConnectionId aus einer bereits bereinigten ID
    ///
    /// Für IDs, die vom Verbindungs-Backend selbst kommen (eingehende
    /// Anrufe) - die Gegenseite hat dort schon bereinigt. Zur
    /// Sicherheit wird trotzdem nochmal bereinigt; für gültige IDs ist
    /// das ein No-op.
    pub fn from_remote(id: &str) -> Self {
        Self::from_raw(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_chars_pass_through() {
        let id = ConnectionId::from_raw("abcXYZ019");
        assert_eq!(id.as_str(), "abcXYZ019");
    }

    #[test]
    fn test_invalid_chars_replaced_with_filler() {
        // Colyseus-artige IDs enthalten Bindestriche und Sonderzeichen
        let id = ConnectionId::from_raw("a-b_c!d");
        assert_eq!(id.as_str(), "aGbGcGd");
    }

    #[test]
    fn test_deterministic() {
        let raw = "x9!?-Q";
        assert_eq!(ConnectionId::from_raw(raw), ConnectionId::from_raw(raw));
    }

    #[test]
    fn test_output_always_alphanumeric() {
        let samples = ["", "!!!", "ä ö ü", "abc", "a/b\\c", "🙂x"];
        for raw in samples {
            let id = ConnectionId::from_raw(raw);
            assert!(
                id.as_str().chars().all(|c| c.is_ascii_alphanumeric()),
                "non-alphanumeric output for {:?}: {:?}",
                raw,
                id
            );
        }
    }

    #[test]
    fn test_collision_is_possible() {
        // Nicht injektiv - bewusst akzeptierte Einschränkung
        assert_eq!(
            ConnectionId::from_raw("X!"),
            ConnectionId::from_raw("X?")
        );
    }

    #[test]
    fn test_empty_id() {
        assert_eq!(ConnectionId::from_raw("").as_str(), "");
    }
}
