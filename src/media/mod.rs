//! Media Module - Lokale Aufnahme und Remote-Streams
//!
//! Dieses Modul verwaltet:
//! - Lokale Audio/Video-Tracks inkl. Enabled-Flags (Mute/Kamera)
//! - Geräte-Zugriff und Berechtigungs-Abfrage
//! - Den Lebenszyklus des lokalen Streams (acquire/release)

mod controller;
mod devices;
mod stream;

pub use controller::{LocalMediaController, MediaEvent, MediaState, RosterNotifier};
pub use devices::{MediaDevices, PermissionState, SystemMediaDevices, FRAME_SIZE};
pub use stream::{LocalStream, LocalTrack, MediaError, RemoteStream, TrackKind, SAMPLE_RATE};
