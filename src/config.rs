//! Konfiguration des Call-Mesh
//!
//! Im Wesentlichen die STUN/TURN-Server für das Verbindungs-Backend.
//! Serialisierbar, damit die Host-Anwendung sie aus ihrer eigenen
//! Konfiguration laden kann.

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Ein STUN- oder TURN-Server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

/// Konfiguration für das Call-Mesh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            // Google STUN Server (kostenlos, für ~90% der Verbindungen)
            ice_servers: vec![IceServer {
                urls: vec![
                    "stun:stun.l.google.com:19302".to_string(),
                    "stun:stun1.l.google.com:19302".to_string(),
                    "stun:stun2.l.google.com:19302".to_string(),
                ],
                username: String::new(),
                credential: String::new(),
            }],
        }
    }
}

impl MeshConfig {
    /// Fügt optionale TURN-Server Credentials hinzu
    pub fn add_turn_server(&mut self, url: String, username: String, credential: String) {
        self.ice_servers.push(IceServer {
            urls: vec![url],
            username,
            credential,
        });
    }

    /// Übersetzt in die Backend-Darstellung
    pub(crate) fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        self.ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone(),
                credential: s.credential.clone(),
                ..Default::default()
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_stun_servers() {
        let config = MeshConfig::default();
        assert!(!config.ice_servers.is_empty());
        assert!(config.ice_servers[0].urls[0].starts_with("stun:"));
    }

    #[test]
    fn test_add_turn_server() {
        let mut config = MeshConfig::default();
        config.add_turn_server(
            "turn:turn.example.com:3478".to_string(),
            "user".to_string(),
            "secret".to_string(),
        );

        let servers = config.rtc_ice_servers();
        let turn = servers.last().unwrap();
        assert_eq!(turn.username, "user");
    }

    #[test]
    fn test_roundtrips_through_json() {
        let config = MeshConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: MeshConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.ice_servers.len(), config.ice_servers.len());
    }
}
