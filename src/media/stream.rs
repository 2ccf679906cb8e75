//! Stream- und Track-Typen
//!
//! Der lokale Stream bündelt genau einen Audio- und einen Video-Track.
//! Das Enabled-Flag (Mute bzw. Kamera aus) lebt direkt am Track und
//! ist damit der beobachtbare Zustand - es gibt kein separates
//! State-Feld dafür.

use crate::identity::ConnectionId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate für Audio (48kHz, Opus-Standard)
pub const SAMPLE_RATE: u32 = 48000;

/// Clock Rate für Video (RTP-Standard für VP8)
const VIDEO_CLOCK_RATE: u32 = 90000;

/// Stream-ID unter der alle lokalen Tracks laufen
const STREAM_ID: &str = "huddle";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum MediaError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("Media permission denied")]
    PermissionDenied,

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}

// ============================================================================
// LOCAL TRACKS
// ============================================================================

/// Art eines lokalen Tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Lokaler Track mit Enabled-Flag
///
/// Der Track selbst wird vom Verbindungs-Backend an jede Peer
/// Connection gehängt; das Enabled-Flag steuert nur, ob die Capture-
/// Pumpe Samples hineinschreibt.
#[derive(Clone)]
pub struct LocalTrack {
    kind: TrackKind,
    rtc: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
}

impl LocalTrack {
    /// Erstellt einen neuen lokalen Track (startet enabled)
    pub fn new(kind: TrackKind) -> Self {
        let capability = match kind {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: SAMPLE_RATE,
                channels: 1,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: VIDEO_CLOCK_RATE,
                ..Default::default()
            },
        };

        let track_id = match kind {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        };

        Self {
            kind,
            rtc: Arc::new(TrackLocalStaticSample::new(
                capability,
                track_id.to_string(),
                STREAM_ID.to_string(),
            )),
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Gibt den darunterliegenden WebRTC-Track zurück
    pub fn rtc(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtc)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Kippt das Enabled-Flag und gibt den neuen Wert zurück
    pub fn toggle(&self) -> bool {
        // fetch_xor kippt atomar, Rückgabe ist der alte Wert
        !self.enabled.fetch_xor(true, Ordering::SeqCst)
    }

    /// Geteiltes Enabled-Flag für die Capture-Pumpe
    pub(crate) fn enabled_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.enabled)
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

// ============================================================================
// LOCAL STREAM
// ============================================================================

/// Der lokale Stream: ein Audio- und ein Video-Track
///
/// Es existiert höchstens eine logische Instanz pro Session; eine
/// erneute Acquisition ersetzt den alten Stream. Alle Komponenten
/// außer dem [`LocalMediaController`](super::LocalMediaController)
/// greifen nur lesend zu.
#[derive(Clone, Debug)]
pub struct LocalStream {
    audio: LocalTrack,
    video: LocalTrack,
}

impl LocalStream {
    pub fn new(audio: LocalTrack, video: LocalTrack) -> Self {
        debug_assert_eq!(audio.kind(), TrackKind::Audio);
        debug_assert_eq!(video.kind(), TrackKind::Video);
        Self { audio, video }
    }

    pub fn audio(&self) -> &LocalTrack {
        &self.audio
    }

    pub fn video(&self) -> &LocalTrack {
        &self.video
    }
}

// ============================================================================
// REMOTE STREAM
// ============================================================================

/// Eingehender Stream eines entfernten Teilnehmers
///
/// Wird vom Transport befüllt sobald Tracks eintreffen und dann an die
/// RenderSink durchgereicht. Tracks können nach dem ersten auch noch
/// später dazukommen (Audio und Video kommen als getrennte Events).
#[derive(Clone)]
pub struct RemoteStream {
    peer: ConnectionId,
    tracks: Arc<Mutex<Vec<Arc<TrackRemote>>>>,
}

impl RemoteStream {
    pub fn new(peer: ConnectionId) -> Self {
        Self {
            peer,
            tracks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn peer(&self) -> &ConnectionId {
        &self.peer
    }

    pub fn add_track(&self, track: Arc<TrackRemote>) {
        self.tracks.lock().push(track);
    }

    pub fn tracks(&self) -> Vec<Arc<TrackRemote>> {
        self.tracks.lock().clone()
    }
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("peer", &self.peer)
            .field("tracks", &self.tracks.lock().len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_starts_enabled() {
        let track = LocalTrack::new(TrackKind::Audio);
        assert!(track.is_enabled());
    }

    #[test]
    fn test_toggle_flips_and_returns_new_value() {
        let track = LocalTrack::new(TrackKind::Video);
        assert!(!track.toggle());
        assert!(!track.is_enabled());
        assert!(track.toggle());
        assert!(track.is_enabled());
    }

    #[test]
    fn test_enabled_flag_shared_between_clones() {
        let track = LocalTrack::new(TrackKind::Audio);
        let clone = track.clone();
        track.set_enabled(false);
        assert!(!clone.is_enabled());
    }
}
