//! Call Lifecycle Controller
//!
//! Der Orchestrator des Mesh: baut auf Proximity-Events ausgehende
//! Anrufe auf, nimmt eingehende an, bindet eintreffende Remote-Streams
//! an die RenderSink und reißt Verbindungen deterministisch wieder ab.
//!
//! Alle Operationen laufen auf dem Tokio-Event-Loop; zwischen den
//! Await-Punkten einer Operation können andere Events dazwischenkommen,
//! daher wird der Registry-Zustand nach jedem Await neu validiert.

use super::registry::{ConnectionRegistry, Direction, Generation, LinkState};
use crate::identity::ConnectionId;
use crate::media::LocalMediaController;
use crate::render::RenderSink;
use crate::transport::{IncomingOffer, PeerCall, PeerTransport, TransportEvent};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;

// ============================================================================
// CALL LIFECYCLE CONTROLLER
// ============================================================================

pub struct CallLifecycleController {
    // Für die gespawnten Stream-Watcher; via new_cyclic gesetzt
    self_weak: Weak<CallLifecycleController>,
    registry: ConnectionRegistry,
    transport: Arc<dyn PeerTransport>,
    media: Arc<LocalMediaController>,
    sink: Arc<dyn RenderSink>,
}

impl CallLifecycleController {
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        media: Arc<LocalMediaController>,
        sink: Arc<dyn RenderSink>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_weak: weak.clone(),
            registry: ConnectionRegistry::new(),
            transport,
            media,
            sink,
        })
    }

    /// Anzahl aktiver bzw. wartender Verbindungen einer Richtung
    pub fn connection_count(&self, direction: Direction) -> usize {
        self.registry.len(direction)
    }

    // ========================================================================
    // OUTGOING
    // ========================================================================

    /// Ruft einen Teilnehmer an, der in Reichweite gekommen ist
    ///
    /// Ohne lokalen Stream ein stiller No-op: das Join-Event wird nicht
    /// gemerkt, der Raum-Dienst muss es nach erfolgreicher Acquisition
    /// erneut liefern.
    pub async fn connect_to_peer(&self, raw_id: &str, display_name: Option<String>) {
        let Some(stream) = self.media.local_stream() else {
            tracing::debug!("No local stream, ignoring join for {}", raw_id);
            return;
        };

        let id = ConnectionId::from_raw(raw_id);
        let Some(generation) =
            self.registry
                .try_insert(Direction::Outgoing, id.clone(), display_name.clone())
        else {
            // Zu dieser ID läuft schon ein ausgehender Anruf
            return;
        };

        tracing::info!("Calling {}", id);
        match self.transport.call(&id, Some(stream)).await {
            Ok(call) => self.adopt_call(Direction::Outgoing, id, generation, call, display_name),
            Err(e) => {
                tracing::error!("Failed to call {}: {}", id, e);
                self.registry
                    .remove_if_current(Direction::Outgoing, &id, generation);
            }
        }
    }

    // ========================================================================
    // INCOMING
    // ========================================================================

    /// Nimmt einen eingehenden Anruf an
    ///
    /// Duplikate (auch Kollisionen zweier roher IDs auf dieselbe
    /// bereinigte ID) werden verworfen; der bestehende Anruf bleibt
    /// unangetastet.
    pub async fn handle_incoming_call(&self, offer: IncomingOffer) {
        let id = offer.peer.clone();
        let Some(generation) = self.registry.try_insert(Direction::Incoming, id.clone(), None)
        else {
            tracing::debug!("Dropping duplicate incoming call from {}", id);
            return;
        };

        tracing::info!("Answering call from {}", id);
        // Antworten ohne lokalen Stream ist gültig: wir senden nichts,
        // empfangen den Remote-Stream aber trotzdem
        let local = self.media.local_stream();
        match self.transport.answer(offer, local).await {
            Ok(call) => self.adopt_call(Direction::Incoming, id, generation, call, None),
            Err(e) => {
                tracing::error!("Failed to answer {}: {}", id, e);
                self.registry
                    .remove_if_current(Direction::Incoming, &id, generation);
            }
        }
    }

    // ========================================================================
    // TEARDOWN
    // ========================================================================

    /// Baut den ausgehenden Anruf zu einem Teilnehmer ab (wir waren
    /// Anrufer). Idempotent; unbekannte IDs sind ein No-op.
    pub fn drop_outgoing(&self, raw_id: &str) {
        self.teardown(Direction::Outgoing, raw_id);
    }

    /// Baut den angenommenen Anruf eines Teilnehmers ab (wir waren
    /// Angerufener). Idempotent; unbekannte IDs sind ein No-op.
    pub fn drop_incoming(&self, raw_id: &str) {
        self.teardown(Direction::Incoming, raw_id);
    }

    fn teardown(&self, direction: Direction, raw_id: &str) {
        let id = ConnectionId::from_raw(raw_id);
        let Some(link) = self.registry.remove(direction, &id) else {
            // Leave vor (oder doppelt zu) Join - kein Fehler
            return;
        };

        tracing::info!("Closing {:?} connection to {}", direction, id);
        if let Some(connection) = link.connection() {
            connection.close();
        }
        // detach nur, wenn je ein attach passiert ist
        if link.state() == LinkState::Active {
            self.sink.detach(&id);
        }
    }

    // ========================================================================
    // EVENT LOOP
    // ========================================================================

    /// Verarbeitet Transport-Events bis der Sender wegfällt
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<TransportEvent>) {
        loop {
            match events.recv().await {
                Ok(TransportEvent::IncomingCall(offer)) => {
                    self.handle_incoming_call(offer).await;
                }
                Ok(TransportEvent::ConnectionFailed { peer, reason }) => {
                    self.handle_connection_failed(&peer, &reason);
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("Transport event loop lagged, {} events dropped", n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Verbindungsfehler des Backends
    ///
    /// Kein automatischer Reconnect: der Proximity-Exit-Pfad räumt die
    /// Verbindung ab, ein erneutes Join-Event baut sie neu auf.
    pub fn handle_connection_failed(&self, peer: &ConnectionId, reason: &str) {
        tracing::error!("Connection to {} failed: {}", peer, reason);
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    /// Übernimmt eine aufgebaute Verbindung in die Registry
    ///
    /// Zwischen Reservierung und Aufbau kann ein Leave-Event den
    /// Eintrag entfernt (und ein erneutes Join ihn neu angelegt) haben;
    /// das Generations-Token erkennt beides, die frische Verbindung
    /// wird dann sofort wieder geschlossen.
    fn adopt_call(
        &self,
        direction: Direction,
        id: ConnectionId,
        generation: Generation,
        call: PeerCall,
        display_name: Option<String>,
    ) {
        if !self.registry.attach_connection(
            direction,
            &id,
            generation,
            Arc::clone(&call.connection),
        ) {
            tracing::debug!("{} torn down while connecting, closing", id);
            call.connection.close();
            return;
        }

        self.spawn_media_watcher(direction, id, generation, call.remote_media, display_name);
    }

    /// Wartet auf den Remote-Stream und bindet ihn an die RenderSink
    fn spawn_media_watcher(
        &self,
        direction: Direction,
        id: ConnectionId,
        generation: Generation,
        remote_media: oneshot::Receiver<crate::media::RemoteStream>,
        display_name: Option<String>,
    ) {
        let Some(controller) = self.self_weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            match remote_media.await {
                Ok(stream) => {
                    // Nach dem Await neu validieren: der Eintrag kann
                    // inzwischen abgebaut oder neu reserviert worden sein
                    if controller.registry.set_active(direction, &id, generation) {
                        controller.sink.attach(&id, stream, display_name.as_deref());
                    } else {
                        tracing::debug!("Remote stream from {} after teardown, ignored", id);
                    }
                }
                Err(_) => {
                    tracing::debug!("Connection to {} closed before remote media", id);
                }
            }
        });
    }
}

impl std::fmt::Debug for CallLifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallLifecycleController")
            .field("outgoing", &self.connection_count(Direction::Outgoing))
            .field("incoming", &self.connection_count(Direction::Incoming))
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
