//! Render Sink - Naht zur UI
//!
//! Der Kern besitzt keine Anzeigefläche. Er meldet der UI nur, wann
//! ein Remote-Stream angezeigt bzw. wieder entfernt werden soll; die
//! Video-Kacheln selbst (inkl. Spiegelung der Selbstansicht) gehören
//! der UI-Schicht.

use crate::identity::ConnectionId;
use crate::media::RemoteStream;

/// UI-seitiger Konsument von Remote-Streams
pub trait RenderSink: Send + Sync {
    /// Wird höchstens einmal pro Verbindung aufgerufen, beim Übergang
    /// Pending -> Active. Eingehende Anrufe tragen keinen Anzeigenamen.
    fn attach(&self, id: &ConnectionId, stream: RemoteStream, display_name: Option<&str>);

    /// Wird genau einmal beim Teardown einer Active-Verbindung
    /// aufgerufen; Verbindungen, die nie Active wurden, lösen kein
    /// `detach` aus.
    fn detach(&self, id: &ConnectionId);
}
