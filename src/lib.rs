//! Huddle - P2P Call Mesh für einen virtuellen Büro-Client
//!
//! Verbindet Teilnehmer, deren Avatare sich in Reichweite kommen, zu
//! einem paarweisen Audio/Video-Mesh:
//! - Proximity-Events vom Raum-Dienst treiben Auf- und Abbau
//! - WebRTC für die P2P-Medienverbindungen
//! - RenderSink als Naht zur UI (Video-Kacheln)
//!
//! Signaling-Server, NAT-Traversal und Gruppen-Topologien (SFU) sind
//! bewusst außen vor: pro Teilnehmer-Paar genau eine Verbindung je
//! Richtung.

pub mod config;
pub mod identity;
pub mod media;
pub mod mesh;
pub mod render;
pub mod transport;

pub use config::{IceServer, MeshConfig};
pub use identity::ConnectionId;
pub use media::{
    LocalMediaController, LocalStream, MediaDevices, MediaError, MediaEvent, MediaState,
    PermissionState, RemoteStream, RosterNotifier, SystemMediaDevices,
};
pub use mesh::{CallLifecycleController, Direction};
pub use render::RenderSink;
pub use transport::{
    IncomingOffer, MediaConnection, PeerTransport, SignalCommand, TransportError, TransportEvent,
    WebRtcTransport,
};

use std::sync::Arc;
use tokio::sync::broadcast;

// ============================================================================
// LOGGING
// ============================================================================

/// Initialisiert das Logging
///
/// Einmal pro Prozess aufrufen, bevor eine Session entsteht.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("huddle=debug".parse().unwrap())
                .add_directive("webrtc=warn".parse().unwrap()),
        )
        .init();
}

// ============================================================================
// CALL SESSION
// ============================================================================

/// Kontext-Objekt einer Session
///
/// Wird einmal pro Raum-Beitritt gebaut und verdrahtet Medien,
/// Transport und Mesh-Controller; es gibt keinen prozessweiten
/// Singleton-Zustand. Die Host-Anwendung reicht die Proximity-Events
/// ihres Raum-Dienstes an die `participant_*`-Methoden durch.
pub struct CallSession {
    media: Arc<LocalMediaController>,
    calls: Arc<CallLifecycleController>,
}

impl CallSession {
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        devices: Arc<dyn MediaDevices>,
        sink: Arc<dyn RenderSink>,
        roster: Arc<dyn RosterNotifier>,
    ) -> Self {
        let media = LocalMediaController::new(devices, roster);
        let calls =
            CallLifecycleController::new(Arc::clone(&transport), Arc::clone(&media), sink);

        // Transport-Events an den Controller koppeln
        tokio::spawn(Arc::clone(&calls).run(transport.subscribe()));

        tracing::info!("Call session initialized");
        Self { media, calls }
    }

    // ========================================================================
    // ROSTER EVENTS
    // ========================================================================

    /// Teilnehmer in Reichweite gekommen: ausgehenden Anruf aufbauen
    pub async fn participant_entered(&self, raw_id: &str, display_name: Option<String>) {
        self.calls.connect_to_peer(raw_id, display_name).await;
    }

    /// Teilnehmer außer Reichweite: von uns gestarteten Anruf abbauen
    pub fn participant_left(&self, raw_id: &str) {
        self.calls.drop_outgoing(raw_id);
    }

    /// Anrufer außer Reichweite: von uns angenommenen Anruf abbauen
    pub fn caller_left(&self, raw_id: &str) {
        self.calls.drop_incoming(raw_id);
    }

    // ========================================================================
    // LOCAL MEDIA
    // ========================================================================

    /// Stille Probe beim Session-Start: acquire nur wenn die
    /// Berechtigung schon erteilt war
    pub async fn probe_prior_permission(&self) {
        self.media.probe_prior_permission().await;
    }

    /// Nutzer-initiierte Medien-Anforderung (mit Fehler-Alert)
    pub async fn acquire_media(&self) {
        self.media.acquire(true).await;
    }

    pub fn toggle_audio(&self) {
        self.media.toggle_audio();
    }

    pub fn toggle_video(&self) {
        self.media.toggle_video();
    }

    pub fn media_state(&self) -> MediaState {
        self.media.state()
    }

    pub fn subscribe_media(&self) -> broadcast::Receiver<MediaEvent> {
        self.media.subscribe()
    }

    /// Medien freigeben (Session-Ende)
    pub fn release_media(&self) {
        self.media.release();
    }

    /// Zugriff auf den Mesh-Controller, z.B. für Debug-Anzeigen
    pub fn calls(&self) -> &Arc<CallLifecycleController> {
        &self.calls
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("media", &self.media)
            .field("calls", &self.calls)
            .finish()
    }
}
