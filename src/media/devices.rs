//! Geräte-Zugriff - Berechtigungs-Probe und Mikrofon-Capture
//!
//! Das `MediaDevices`-Trait ist die Naht zum Betriebssystem: die
//! Produktiv-Implementierung nutzt cpal, Tests stecken hier eine
//! Fake-Implementierung hinein. Berechtigungs-Abfragen laufen ohne
//! Nutzer-Prompt (stille Probe).

use super::stream::{LocalStream, LocalTrack, MediaError, TrackKind, SAMPLE_RATE};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Frame Size in Samples (20ms @ 48kHz = 960 Samples)
pub const FRAME_SIZE: usize = 960;

/// Buffer Size für den Audio-Ring-Buffer
const RING_BUFFER_SIZE: usize = FRAME_SIZE * 10;

// ============================================================================
// PERMISSION STATE
// ============================================================================

/// Zustand der Mikrofon-Berechtigung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    /// Berechtigung wurde bereits erteilt
    Granted,
    /// Noch nicht entschieden - Acquisition würde einen Prompt auslösen
    Prompt,
    /// Berechtigung wurde verweigert
    Denied,
}

// ============================================================================
// MEDIA DEVICES TRAIT
// ============================================================================

/// Naht zum Geräte-Layer des Betriebssystems
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Prüft die Mikrofon-Berechtigung ohne Nutzer-Prompt
    async fn microphone_permission(&self) -> PermissionState;

    /// Fordert Audio- und Video-Capture gleichzeitig an
    async fn get_user_media(&self) -> Result<LocalStream, MediaError>;

    /// Stoppt laufendes Capture (No-op wenn keins läuft)
    fn stop_capture(&self);
}

// ============================================================================
// CAPTURE PUMP
// ============================================================================

/// Laufendes Mikrofon-Capture
///
/// Note: cpal::Stream ist nicht Send, daher wrappen wir in einen
/// Send-fähigen Container
struct CapturePump {
    _input: Stream,
    capture_buffer: Arc<Mutex<HeapRb<f32>>>,
    input_level: Arc<Mutex<f32>>,
}

// CapturePump ist nicht automatisch Send wegen Stream
unsafe impl Send for CapturePump {}

impl CapturePump {
    /// Liest einen Frame von aufgenommenem Audio
    ///
    /// TODO: An einen Opus-Encoder anbinden, der die Frames in den
    /// lokalen Audio-Track schreibt (blockiert auf opus-sys/vcpkg).
    #[allow(dead_code)]
    fn read_frame(&self) -> Option<Vec<f32>> {
        let mut buffer = self.capture_buffer.lock();
        if buffer.occupied_len() >= FRAME_SIZE {
            let mut frame = Vec::with_capacity(FRAME_SIZE);
            for _ in 0..FRAME_SIZE {
                if let Some(sample) = buffer.try_pop() {
                    frame.push(sample);
                }
            }
            Some(frame)
        } else {
            None
        }
    }
}

// ============================================================================
// SYSTEM MEDIA DEVICES
// ============================================================================

/// cpal-basierte Geräte-Implementierung
pub struct SystemMediaDevices {
    pump: Mutex<Option<CapturePump>>,
}

impl SystemMediaDevices {
    pub fn new() -> Self {
        Self {
            pump: Mutex::new(None),
        }
    }

    /// Aktueller Eingangs-Pegel (0.0 - 1.0) für Visualisierung
    pub fn input_level(&self) -> f32 {
        self.pump
            .lock()
            .as_ref()
            .map(|p| *p.input_level.lock())
            .unwrap_or(0.0)
    }

    /// Startet das Mikrofon-Capture, gated über das Enabled-Flag des Tracks
    fn start_capture(
        device: &Device,
        enabled: Arc<AtomicBool>,
    ) -> Result<CapturePump, MediaError> {
        let config = Self::find_best_input_config(device)?;

        tracing::info!(
            "Starting audio capture: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        let capture_buffer = Arc::new(Mutex::new(HeapRb::new(RING_BUFFER_SIZE)));
        let input_level = Arc::new(Mutex::new(0.0f32));

        let buffer_clone = Arc::clone(&capture_buffer);
        let level_clone = Arc::clone(&input_level);
        let target_sample_rate = SAMPLE_RATE;
        let source_sample_rate = config.sample_rate.0;

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Audio Level berechnen (RMS)
                    let rms: f32 =
                        (data.iter().map(|s| s * s).sum::<f32>() / data.len() as f32).sqrt();
                    *level_clone.lock() = rms.min(1.0);

                    // Track deaktiviert (Mute) - keine Samples weiterreichen
                    if !enabled.load(Ordering::SeqCst) {
                        return;
                    }

                    // Resampling falls nötig (zu 48kHz)
                    let samples: Vec<f32> = if source_sample_rate != target_sample_rate {
                        let ratio = target_sample_rate as f32 / source_sample_rate as f32;
                        let new_len = (data.len() as f32 * ratio) as usize;
                        (0..new_len)
                            .map(|i| {
                                let src_idx = i as f32 / ratio;
                                let idx = src_idx as usize;
                                let frac = src_idx - idx as f32;
                                let s1 = data.get(idx).copied().unwrap_or(0.0);
                                let s2 = data.get(idx + 1).copied().unwrap_or(s1);
                                s1 + (s2 - s1) * frac
                            })
                            .collect()
                    } else {
                        data.to_vec()
                    };

                    let mut buffer = buffer_clone.lock();
                    for sample in samples {
                        let _ = buffer.try_push(sample);
                    }
                },
                |err| {
                    tracing::error!("Audio capture error: {}", err);
                },
                None,
            )
            .map_err(|e| MediaError::StreamBuildError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| MediaError::StreamPlayError(e.to_string()))?;

        Ok(CapturePump {
            _input: stream,
            capture_buffer,
            input_level,
        })
    }

    /// Findet die beste Input-Konfiguration
    fn find_best_input_config(device: &Device) -> Result<StreamConfig, MediaError> {
        let configs = device
            .supported_input_configs()
            .map_err(|e| MediaError::StreamBuildError(e.to_string()))?;

        Self::select_best_config(configs.collect())
    }

    /// Wählt die beste Konfiguration aus einer Liste
    ///
    /// Priorität: 48kHz > andere, F32 > andere
    fn select_best_config(
        configs: Vec<SupportedStreamConfigRange>,
    ) -> Result<StreamConfig, MediaError> {
        let target_rate = cpal::SampleRate(SAMPLE_RATE);

        for config in &configs {
            if config.min_sample_rate() <= target_rate
                && config.max_sample_rate() >= target_rate
                && config.sample_format() == SampleFormat::F32
            {
                return Ok(config.with_sample_rate(target_rate).into());
            }
        }

        for config in &configs {
            if config.sample_format() == SampleFormat::F32 {
                return Ok(config.with_max_sample_rate().into());
            }
        }

        if let Some(config) = configs.first() {
            return Ok(config.with_max_sample_rate().into());
        }

        Err(MediaError::StreamBuildError(
            "No suitable audio configuration found".to_string(),
        ))
    }
}

impl Default for SystemMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SystemMediaDevices {
    async fn microphone_permission(&self) -> PermissionState {
        // Desktop-Heuristik: ohne Permissions-API gilt ein sichtbares
        // Eingabegerät als erteilte Berechtigung. Auf macOS schlägt
        // der Stream-Aufbau trotzdem fehl wenn die Berechtigung fehlt,
        // das fängt get_user_media ab.
        let host = cpal::default_host();
        if host.default_input_device().is_some() {
            PermissionState::Granted
        } else {
            PermissionState::Prompt
        }
    }

    async fn get_user_media(&self) -> Result<LocalStream, MediaError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(MediaError::NoInputDevice)?;

        let audio = LocalTrack::new(TrackKind::Audio);
        let video = LocalTrack::new(TrackKind::Video);

        let pump = Self::start_capture(&device, audio.enabled_flag())?;

        // Altes Capture ersetzen, nicht stapeln
        *self.pump.lock() = Some(pump);

        Ok(LocalStream::new(audio, video))
    }

    fn stop_capture(&self) {
        if self.pump.lock().take().is_some() {
            tracing::info!("Audio capture stopped");
        }
    }
}
