//! Identity Module - Teilnehmer-IDs
//!
//! Der Signaling-Dienst vergibt rohe Teilnehmer-IDs, die Zeichen
//! enthalten können, die das Verbindungs-Backend nicht akzeptiert.
//! Dieses Modul normalisiert sie zu gültigen ConnectionIds.

mod sanitizer;

pub use sanitizer::ConnectionId;
