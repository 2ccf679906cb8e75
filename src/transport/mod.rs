//! Transport Module - Naht zum Verbindungs-Backend
//!
//! Der Mesh-Controller spricht nur gegen das `PeerTransport`-Trait;
//! NAT-Traversal und Aushandlung sind komplett Sache des Backends.
//! Die Produktiv-Implementierung sitzt in [`webrtc`], Tests stecken
//! hier einen skriptbaren Fake hinein.

mod webrtc;

pub use self::webrtc::{SignalCommand, WebRtcTransport};

use crate::identity::ConnectionId;
use crate::media::{LocalStream, RemoteStream};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Signaling channel closed")]
    SignalingClosed,
}

// ============================================================================
// CONNECTION HANDLE
// ============================================================================

/// Handle auf eine aktive Medien-Verbindung
///
/// `close` ist idempotent; nach dem Schließen darf das Handle nicht
/// weiterverwendet werden.
pub trait MediaConnection: Send + Sync {
    fn close(&self);
}

/// Ergebnis eines platzierten oder angenommenen Anrufs
///
/// `remote_media` löst genau einmal aus, sobald der Stream der
/// Gegenseite eintrifft (Analogon zum `stream`-Event des Backends).
/// Wird die Verbindung vorher geschlossen, wird der Sender verworfen
/// und der Receiver endet mit einem Fehler.
pub struct PeerCall {
    pub connection: std::sync::Arc<dyn MediaConnection>,
    pub remote_media: oneshot::Receiver<RemoteStream>,
}

// ============================================================================
// TRANSPORT EVENTS
// ============================================================================

/// Eingehender Anruf, vom Backend gemeldet
///
/// Die Peer-ID ist bereits von der Gegenseite bereinigt; der Anruf
/// trägt außer der ID keine Teilnehmer-Metadaten.
#[derive(Debug, Clone)]
pub struct IncomingOffer {
    pub peer: ConnectionId,
    pub sdp: String,
}

/// Events die vom Transport ausgelöst werden
#[derive(Debug, Clone)]
pub enum TransportEvent {
    IncomingCall(IncomingOffer),
    /// Verbindungsfehler des Backends; die betroffene Verbindung wird
    /// nicht automatisch neu aufgebaut, Aufräumen passiert über den
    /// normalen Proximity-Exit-Pfad
    ConnectionFailed { peer: ConnectionId, reason: String },
}

// ============================================================================
// PEER TRANSPORT TRAIT
// ============================================================================

/// Naht zum Verbindungs-Backend
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Ruft einen Peer an und sendet dabei den lokalen Stream
    async fn call(
        &self,
        peer: &ConnectionId,
        local: Option<LocalStream>,
    ) -> Result<PeerCall, TransportError>;

    /// Nimmt einen eingehenden Anruf an
    ///
    /// `local = None` ist gültig: es werden keine eigenen Medien
    /// gesendet, der Remote-Stream kommt trotzdem an.
    async fn answer(
        &self,
        offer: IncomingOffer,
        local: Option<LocalStream>,
    ) -> Result<PeerCall, TransportError>;

    /// Gibt einen Event-Receiver zurück
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}
