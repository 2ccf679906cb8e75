//! Mesh Module - Anruf-Lebenszyklus
//!
//! Dieses Modul verwaltet:
//! - Die Registry aktiver Verbindungen (getrennt nach Richtung)
//! - Den Auf- und Abbau von Anrufen auf Proximity-Events
//! - Die Anbindung eintreffender Remote-Streams an die RenderSink

mod controller;
mod registry;

pub use controller::CallLifecycleController;
pub use registry::{ConnectionRegistry, Direction, Generation, LinkState, PeerLink};
