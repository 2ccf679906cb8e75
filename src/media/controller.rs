//! Local Media Controller
//!
//! Besitzt den lokalen Stream exklusiv: Acquisition, Mute/Kamera-Flags
//! und Freigabe laufen nur hier durch. Alle anderen Komponenten lesen
//! den Stream höchstens über [`local_stream`](LocalMediaController::local_stream).

use super::devices::{MediaDevices, PermissionState};
use super::stream::LocalStream;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

// ============================================================================
// ROSTER NOTIFIER
// ============================================================================

/// Rückkanal zum Raum-Dienst
///
/// Wird genau einmal nach der ersten erfolgreichen Acquisition
/// aufgerufen, damit die Gegenseiten wissen, dass dieser Teilnehmer
/// jetzt angerufen werden kann.
pub trait RosterNotifier: Send + Sync {
    fn local_media_ready(&self);
}

// ============================================================================
// MEDIA EVENTS / STATE
// ============================================================================

/// Events für die Mute/Kamera-UI
#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// Lokale Medien verfügbar; trägt den Stream für die (gespiegelte,
    /// stummgeschaltete) Selbstansicht
    VideoConnected(LocalStream),
    /// Acquisition fehlgeschlagen; `alert` nur bei nutzer-initiierter
    /// Anforderung, stille Permission-Probes alarmieren nicht
    AcquireFailed { alert: bool },
    AudioEnabled(bool),
    VideoEnabled(bool),
    Released,
}

/// Momentaufnahme des lokalen Medien-Zustands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaState {
    pub video_connected: bool,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

// ============================================================================
// LOCAL MEDIA CONTROLLER
// ============================================================================

pub struct LocalMediaController {
    devices: Arc<dyn MediaDevices>,
    roster: Arc<dyn RosterNotifier>,
    stream: Mutex<Option<LocalStream>>,
    video_connected: AtomicBool,
    notified_ready: AtomicBool,
    event_tx: broadcast::Sender<MediaEvent>,
}

impl LocalMediaController {
    pub fn new(devices: Arc<dyn MediaDevices>, roster: Arc<dyn RosterNotifier>) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(100);

        Arc::new(Self {
            devices,
            roster,
            stream: Mutex::new(None),
            video_connected: AtomicBool::new(false),
            notified_ready: AtomicBool::new(false),
            event_tx,
        })
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.event_tx.subscribe()
    }

    /// Lesender Zugriff auf den lokalen Stream
    pub fn local_stream(&self) -> Option<LocalStream> {
        self.stream.lock().clone()
    }

    /// Momentaufnahme für die UI
    pub fn state(&self) -> MediaState {
        let stream = self.stream.lock();
        MediaState {
            video_connected: self.video_connected.load(Ordering::SeqCst),
            audio_enabled: stream.as_ref().map(|s| s.audio().is_enabled()).unwrap_or(false),
            video_enabled: stream.as_ref().map(|s| s.video().is_enabled()).unwrap_or(false),
        }
    }

    /// Stille Probe: acquire nur wenn die Berechtigung schon erteilt war
    pub async fn probe_prior_permission(&self) {
        if self.devices.microphone_permission().await == PermissionState::Granted {
            self.acquire(false).await;
        }
    }

    /// Fordert Audio+Video-Capture an
    ///
    /// Bei Erfolg ersetzt der neue Stream einen eventuell vorhandenen
    /// alten. Bei Fehlschlag bleibt der Zustand unverändert; es gibt
    /// keinen automatischen Retry.
    pub async fn acquire(&self, alert_on_failure: bool) {
        match self.devices.get_user_media().await {
            Ok(stream) => {
                *self.stream.lock() = Some(stream.clone());
                self.video_connected.store(true, Ordering::SeqCst);
                let _ = self.event_tx.send(MediaEvent::VideoConnected(stream));

                // Raum-Dienst nur nach dem ersten Erfolg informieren
                if !self.notified_ready.swap(true, Ordering::SeqCst) {
                    self.roster.local_media_ready();
                }
            }
            Err(e) => {
                tracing::warn!("Media acquisition failed: {}", e);
                let _ = self.event_tx.send(MediaEvent::AcquireFailed {
                    alert: alert_on_failure,
                });
            }
        }
    }

    /// Kippt das Mute-Flag des Audio-Tracks (No-op ohne Stream)
    pub fn toggle_audio(&self) {
        if let Some(stream) = self.stream.lock().as_ref() {
            let enabled = stream.audio().toggle();
            tracing::debug!("Audio enabled: {}", enabled);
            let _ = self.event_tx.send(MediaEvent::AudioEnabled(enabled));
        }
    }

    /// Kippt das Kamera-Flag des Video-Tracks (No-op ohne Stream)
    pub fn toggle_video(&self) {
        if let Some(stream) = self.stream.lock().as_ref() {
            let enabled = stream.video().toggle();
            tracing::debug!("Video enabled: {}", enabled);
            let _ = self.event_tx.send(MediaEvent::VideoEnabled(enabled));
        }
    }

    /// Stoppt Capture und verwirft den lokalen Stream
    pub fn release(&self) {
        self.devices.stop_capture();
        if self.stream.lock().take().is_some() {
            self.video_connected.store(false, Ordering::SeqCst);
            let _ = self.event_tx.send(MediaEvent::Released);
            tracing::info!("Local media released");
        }
    }
}

impl std::fmt::Debug for LocalMediaController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMediaController")
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::stream::{LocalTrack, MediaError, TrackKind};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct FakeDevices {
        permission: PermissionState,
        fail: bool,
    }

    #[async_trait]
    impl MediaDevices for FakeDevices {
        async fn microphone_permission(&self) -> PermissionState {
            self.permission
        }

        async fn get_user_media(&self) -> Result<LocalStream, MediaError> {
            if self.fail {
                Err(MediaError::PermissionDenied)
            } else {
                Ok(LocalStream::new(
                    LocalTrack::new(TrackKind::Audio),
                    LocalTrack::new(TrackKind::Video),
                ))
            }
        }

        fn stop_capture(&self) {}
    }

    #[derive(Default)]
    struct CountingRoster {
        notified: AtomicUsize,
    }

    impl RosterNotifier for CountingRoster {
        fn local_media_ready(&self) {
            self.notified.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn controller(
        permission: PermissionState,
        fail: bool,
    ) -> (Arc<LocalMediaController>, Arc<CountingRoster>) {
        let roster = Arc::new(CountingRoster::default());
        let devices = Arc::new(FakeDevices { permission, fail });
        (
            LocalMediaController::new(devices, Arc::clone(&roster) as Arc<dyn RosterNotifier>),
            roster,
        )
    }

    #[tokio::test]
    async fn test_acquire_success_sets_state_and_notifies_roster_once() {
        let (media, roster) = controller(PermissionState::Granted, false);

        media.acquire(true).await;
        assert!(media.state().video_connected);
        assert!(media.local_stream().is_some());
        assert_eq!(roster.notified.load(Ordering::SeqCst), 1);

        // Erneute Acquisition ersetzt den Stream, meldet aber nicht nochmal
        media.acquire(true).await;
        assert_eq!(roster.notified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquire_failure_emits_alert_event_and_leaves_state() {
        let (media, roster) = controller(PermissionState::Denied, true);
        let mut events = media.subscribe();

        media.acquire(true).await;

        assert!(!media.state().video_connected);
        assert!(media.local_stream().is_none());
        assert_eq!(roster.notified.load(Ordering::SeqCst), 0);
        match events.try_recv() {
            Ok(MediaEvent::AcquireFailed { alert }) => assert!(alert),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_silent_probe_never_alerts() {
        let (media, _) = controller(PermissionState::Granted, true);
        let mut events = media.subscribe();

        media.probe_prior_permission().await;

        match events.try_recv() {
            Ok(MediaEvent::AcquireFailed { alert }) => assert!(!alert),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_without_permission_does_nothing() {
        let (media, roster) = controller(PermissionState::Prompt, false);

        media.probe_prior_permission().await;

        assert!(media.local_stream().is_none());
        assert_eq!(roster.notified.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_toggle_without_stream_is_noop() {
        let (media, _) = controller(PermissionState::Prompt, false);
        let mut events = media.subscribe();

        media.toggle_audio();
        media.toggle_video();

        assert!(events.try_recv().is_err());
        assert_eq!(
            media.state(),
            MediaState {
                video_connected: false,
                audio_enabled: false,
                video_enabled: false,
            }
        );
    }

    #[tokio::test]
    async fn test_toggle_flips_track_flags() {
        let (media, _) = controller(PermissionState::Granted, false);
        media.acquire(false).await;

        media.toggle_audio();
        assert!(!media.state().audio_enabled);
        assert!(media.state().video_enabled);

        media.toggle_audio();
        assert!(media.state().audio_enabled);
    }

    #[tokio::test]
    async fn test_release_is_safe_without_stream() {
        let (media, _) = controller(PermissionState::Prompt, false);
        media.release();
        assert!(media.local_stream().is_none());
    }

    #[tokio::test]
    async fn test_release_clears_stream() {
        let (media, _) = controller(PermissionState::Granted, false);
        media.acquire(false).await;

        media.release();

        assert!(media.local_stream().is_none());
        assert!(!media.state().video_connected);
    }
}
