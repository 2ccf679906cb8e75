//! WebRTC-Transport
//!
//! Konkrete `PeerTransport`-Implementierung auf Basis der webrtc-Crate.
//! Pro Peer und Richtung entsteht eine eigene RTCPeerConnection; SDP
//! und ICE-Kandidaten laufen über einen `SignalCommand`-Kanal, den die
//! Host-Anwendung an ihren Signaling-Dienst anbindet.

use super::{IncomingOffer, MediaConnection, PeerCall, PeerTransport, TransportError, TransportEvent};
use crate::config::MeshConfig;
use crate::identity::ConnectionId;
use crate::media::{LocalStream, RemoteStream};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, oneshot};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

// ============================================================================
// SIGNAL COMMANDS
// ============================================================================

/// Ausgehende Signalisierung an den (externen) Signaling-Dienst
#[derive(Debug, Clone)]
pub enum SignalCommand {
    Offer { to: ConnectionId, sdp: String },
    Answer { to: ConnectionId, sdp: String },
    IceCandidate { to: ConnectionId, candidate: String },
}

/// Rolle einer Verbindung aus Sicht dieses Endpunkts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Dialer,
    Answerer,
}

// ============================================================================
// WEBRTC TRANSPORT
// ============================================================================

pub struct WebRtcTransport {
    self_weak: Weak<WebRtcTransport>,
    ice_servers: Vec<RTCIceServer>,
    signal_tx: mpsc::Sender<SignalCommand>,
    event_tx: broadcast::Sender<TransportEvent>,
    /// Verbindungen, die wir gewählt haben (für Answer/ICE-Routing)
    dialed: Mutex<HashMap<ConnectionId, Arc<RTCPeerConnection>>>,
    /// Verbindungen, die wir angenommen haben
    answered: Mutex<HashMap<ConnectionId, Arc<RTCPeerConnection>>>,
}

impl WebRtcTransport {
    /// Erstellt den Transport
    ///
    /// Der Receiver trägt die ausgehende Signalisierung; die Host-
    /// Anwendung muss ihn an ihren Signaling-Dienst durchreichen.
    pub fn new(config: &MeshConfig) -> (Arc<Self>, mpsc::Receiver<SignalCommand>) {
        let (signal_tx, signal_rx) = mpsc::channel(100);
        let (event_tx, _) = broadcast::channel(100);

        let transport = Arc::new_cyclic(|weak| Self {
            self_weak: weak.clone(),
            ice_servers: config.rtc_ice_servers(),
            signal_tx,
            event_tx,
            dialed: Mutex::new(HashMap::new()),
            answered: Mutex::new(HashMap::new()),
        });

        (transport, signal_rx)
    }

    // ========================================================================
    // INBOUND SIGNALING
    // ========================================================================

    /// Meldet ein eingehendes SDP Offer
    ///
    /// `from` kommt vom Backend der Gegenseite und ist dort schon
    /// bereinigt worden.
    pub fn deliver_offer(&self, from: &str, sdp: String) {
        let offer = IncomingOffer {
            peer: ConnectionId::from_remote(from),
            sdp,
        };
        tracing::debug!("Incoming call from {}", offer.peer);
        let _ = self.event_tx.send(TransportEvent::IncomingCall(offer));
    }

    /// Verarbeitet das SDP Answer eines angerufenen Peers
    pub async fn deliver_answer(
        &self,
        from: &ConnectionId,
        sdp: String,
    ) -> Result<(), TransportError> {
        let pc = self.dialed.lock().get(from).cloned();
        let Some(pc) = pc else {
            tracing::debug!("Answer from {} without matching call, dropped", from);
            return Ok(());
        };

        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| TransportError::InvalidSdp(e.to_string()))?;

        pc.set_remote_description(answer)
            .await
            .map_err(|e| TransportError::WebRtc(e.to_string()))
    }

    /// Fügt einen entfernten ICE Candidate hinzu
    ///
    /// Bei einer beidseitigen Anruf-Race existieren zwei Verbindungen
    /// zum selben Peer; der Kandidat wird an beide gereicht, die
    /// falsche Session lehnt ihn ab (nur geloggt).
    pub async fn deliver_ice_candidate(
        &self,
        from: &ConnectionId,
        candidate_json: &str,
    ) -> Result<(), TransportError> {
        let candidate: RTCIceCandidateInit = serde_json::from_str(candidate_json)
            .map_err(|e| TransportError::WebRtc(e.to_string()))?;

        let targets: Vec<Arc<RTCPeerConnection>> = {
            let dialed = self.dialed.lock().get(from).cloned();
            let answered = self.answered.lock().get(from).cloned();
            dialed.into_iter().chain(answered).collect()
        };

        if targets.is_empty() {
            tracing::debug!("ICE candidate from {} without connection, dropped", from);
        }

        for pc in targets {
            if let Err(e) = pc.add_ice_candidate(candidate.clone()).await {
                tracing::warn!("Failed to add ICE candidate from {}: {}", from, e);
            }
        }

        Ok(())
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    /// Erstellt eine neue Peer Connection
    async fn create_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::WebRtc(e.to_string()))?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| TransportError::WebRtc(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| TransportError::WebRtc(e.to_string()))?,
        );

        Ok(pc)
    }

    /// Registriert Event Handler und gibt den Remote-Media-Receiver zurück
    fn wire_handlers(
        &self,
        pc: &Arc<RTCPeerConnection>,
        peer: &ConnectionId,
    ) -> oneshot::Receiver<RemoteStream> {
        let (media_tx, media_rx) = oneshot::channel();

        // Track Handler: erster Track löst den Oneshot aus, weitere
        // Tracks landen im selben RemoteStream
        let stream_slot: Arc<Mutex<Option<RemoteStream>>> = Arc::new(Mutex::new(None));
        let sender_slot = Arc::new(Mutex::new(Some(media_tx)));
        let peer_id = peer.clone();

        pc.on_track(Box::new(move |track, _, _| {
            let stream_slot = Arc::clone(&stream_slot);
            let sender_slot = Arc::clone(&sender_slot);
            let peer_id = peer_id.clone();

            Box::pin(async move {
                tracing::info!("Received remote track from {}", peer_id);

                let stream = {
                    let mut slot = stream_slot.lock();
                    slot.get_or_insert_with(|| RemoteStream::new(peer_id.clone()))
                        .clone()
                };
                stream.add_track(track);

                if let Some(tx) = sender_slot.lock().take() {
                    let _ = tx.send(stream);
                }
            })
        }));

        // Connection State Handler: Fehler nur melden, kein Retry
        let event_tx = self.event_tx.clone();
        let peer_id = peer.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::debug!("Peer connection state for {}: {:?}", peer_id, s);

            if s == RTCPeerConnectionState::Failed {
                let _ = event_tx.send(TransportEvent::ConnectionFailed {
                    peer: peer_id.clone(),
                    reason: "peer connection failed".to_string(),
                });
            }

            Box::pin(async {})
        }));

        // ICE Candidate Handler: Kandidaten an den Signaling-Dienst
        let signal_tx = self.signal_tx.clone();
        let peer_id = peer.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let signal_tx = signal_tx.clone();
            let peer_id = peer_id.clone();

            Box::pin(async move {
                let Some(c) = candidate else { return };
                if let Ok(json) = c.to_json() {
                    if let Ok(candidate_str) = serde_json::to_string(&json) {
                        let cmd = SignalCommand::IceCandidate {
                            to: peer_id,
                            candidate: candidate_str,
                        };
                        if signal_tx.send(cmd).await.is_err() {
                            tracing::warn!("Signaling channel closed, ICE candidate dropped");
                        }
                    }
                }
            })
        }));

        media_rx
    }

    /// Hängt die lokalen Tracks an die Verbindung
    async fn add_local_tracks(
        pc: &Arc<RTCPeerConnection>,
        stream: &LocalStream,
    ) -> Result<(), TransportError> {
        for track in [stream.audio().rtc(), stream.video().rtc()] {
            pc.add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| TransportError::WebRtc(e.to_string()))?;
        }
        Ok(())
    }

    /// Entfernt eine Verbindung aus der Routing-Tabelle
    ///
    /// Nur wenn der Eintrag noch auf dieselbe Connection zeigt - für
    /// denselben Peer kann inzwischen eine neue platziert worden sein.
    fn forget(&self, role: Role, peer: &ConnectionId, pc: &Arc<RTCPeerConnection>) {
        let map = match role {
            Role::Dialer => &self.dialed,
            Role::Answerer => &self.answered,
        };
        let mut map = map.lock();
        if map.get(peer).is_some_and(|current| Arc::ptr_eq(current, pc)) {
            map.remove(peer);
        }
    }

    fn make_connection(&self, role: Role, peer: &ConnectionId, pc: Arc<RTCPeerConnection>) -> Arc<WebRtcConnection> {
        Arc::new(WebRtcConnection {
            transport: self.self_weak.clone(),
            role,
            peer: peer.clone(),
            pc,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn call(
        &self,
        peer: &ConnectionId,
        local: Option<LocalStream>,
    ) -> Result<PeerCall, TransportError> {
        let pc = self.create_peer_connection().await?;
        let remote_media = self.wire_handlers(&pc, peer);

        if let Some(stream) = &local {
            Self::add_local_tracks(&pc, stream).await?;
        }

        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| TransportError::WebRtc(e.to_string()))?;

        pc.set_local_description(offer.clone())
            .await
            .map_err(|e| TransportError::WebRtc(e.to_string()))?;

        self.signal_tx
            .send(SignalCommand::Offer {
                to: peer.clone(),
                sdp: offer.sdp,
            })
            .await
            .map_err(|_| TransportError::SignalingClosed)?;

        self.dialed.lock().insert(peer.clone(), Arc::clone(&pc));

        Ok(PeerCall {
            connection: self.make_connection(Role::Dialer, peer, pc),
            remote_media,
        })
    }

    async fn answer(
        &self,
        offer: IncomingOffer,
        local: Option<LocalStream>,
    ) -> Result<PeerCall, TransportError> {
        let peer = offer.peer;

        let pc = self.create_peer_connection().await?;
        let remote_media = self.wire_handlers(&pc, &peer);

        let remote_offer = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| TransportError::InvalidSdp(e.to_string()))?;

        pc.set_remote_description(remote_offer)
            .await
            .map_err(|e| TransportError::WebRtc(e.to_string()))?;

        if let Some(stream) = &local {
            Self::add_local_tracks(&pc, stream).await?;
        }

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::WebRtc(e.to_string()))?;

        pc.set_local_description(answer.clone())
            .await
            .map_err(|e| TransportError::WebRtc(e.to_string()))?;

        self.signal_tx
            .send(SignalCommand::Answer {
                to: peer.clone(),
                sdp: answer.sdp,
            })
            .await
            .map_err(|_| TransportError::SignalingClosed)?;

        self.answered.lock().insert(peer.clone(), Arc::clone(&pc));

        Ok(PeerCall {
            connection: self.make_connection(Role::Answerer, &peer, pc),
            remote_media,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.event_tx.subscribe()
    }
}

impl std::fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("dialed", &self.dialed.lock().len())
            .field("answered", &self.answered.lock().len())
            .finish()
    }
}

// ============================================================================
// CONNECTION HANDLE
// ============================================================================

struct WebRtcConnection {
    transport: Weak<WebRtcTransport>,
    role: Role,
    peer: ConnectionId,
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

impl MediaConnection for WebRtcConnection {
    fn close(&self) {
        // Idempotent: nur der erste Aufruf schließt
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(transport) = self.transport.upgrade() {
            transport.forget(self.role, &self.peer, &self.pc);
        }

        let pc = Arc::clone(&self.pc);
        tokio::spawn(async move {
            let _ = pc.close().await;
        });
    }
}

// ============================================================================
// TESTS
// ============================================================================
