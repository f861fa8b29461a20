//! Crate network - Canal de transport pour la conversation temps réel
//!
//! Ce crate fournit un canal full-duplex de frames texte et binaires vers
//! le backend conversationnel, via WebSocket, ainsi que le protocole JSON
//! transporté dans les frames texte.
//!
//! # Architecture
//!
//! Le crate est organisé en plusieurs modules :
//!
//! - `error` : Gestion d'erreurs du transport
//! - `types` : Frames, états, adresse, configuration, statistiques
//! - `protocol` : Messages JSON échangés avec le backend
//! - `traits` : Trait `Connector` (fabrique de connexions)
//! - `transport` : Canal à états et implémentation WebSocket
//! - `simulated` : Transport en mémoire pour les tests
//!
//! # Examples
//!
//! ## Client basique
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use network::{ChannelConfig, ClientMessage, TransportChannel, WsConnector, DEFAULT_ENDPOINT};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = TransportChannel::new(Arc::new(WsConnector), ChannelConfig::default())?;
//! channel.connect(DEFAULT_ENDPOINT).await?;
//!
//! let mut inbound = channel.receive()?;
//! channel.send(ClientMessage::user_message("Bonjour").to_frame()?).await?;
//!
//! while let Some(frame) = inbound.next().await {
//!     println!("{:?}", frame?);
//! }
//!
//! channel.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Tests et simulation
//!
//! ```rust
//! use std::sync::Arc;
//! use network::{ChannelConfig, Frame, SimulatedConnector, TransportChannel};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = Arc::new(SimulatedConnector::new());
//! let channel = TransportChannel::new(connector.clone(), ChannelConfig::test_config())?;
//! channel.connect("ws://localhost/realtime").await?;
//!
//! // Le pair simulé joue le rôle du backend
//! let peer = connector.take_peer().unwrap();
//! peer.push(Frame::text(r#"{"type":"control","action":"connected"}"#)).await;
//! # Ok(())
//! # }
//! ```

// Modules internes
mod error;
mod protocol;
mod simulated;
mod traits;
mod transport;
mod types;

// Re-exports publics
pub use error::{NetworkError, NetworkResult};

pub use types::{ChannelConfig, ChannelState, ChannelStats, Endpoint, Frame, FrameKind, DEFAULT_ENDPOINT};

pub use protocol::{ClientMessage, ControlAction, ServerMessage};

pub use traits::Connector;

pub use transport::{Connection, FrameReceiver, FrameSender, TransportChannel, WsConnector};

pub use simulated::{SimulatedConnector, SimulatedPeer};

/// Mise en forme des statistiques de connexion pour l'affichage
pub mod utils {
    use std::time::Duration;

    use crate::ChannelStats;

    /// Durée d'une connexion, à la seconde près
    ///
    /// # Example
    /// ```rust
    /// use network::utils;
    /// use std::time::Duration;
    ///
    /// assert_eq!(utils::format_duration(Duration::from_secs(42)), "42s");
    /// assert_eq!(utils::format_duration(Duration::from_secs(185)), "3m05s");
    /// assert_eq!(utils::format_duration(Duration::from_secs(3720)), "1h02m");
    /// ```
    pub fn format_duration(duration: Duration) -> String {
        let secs = duration.as_secs();
        match secs {
            0..60 => format!("{}s", secs),
            60..3600 => format!("{}m{:02}s", secs / 60, secs % 60),
            _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
        }
    }

    /// Volume échangé, en unités binaires
    ///
    /// # Example
    /// ```rust
    /// use network::utils;
    ///
    /// assert_eq!(utils::format_bytes(960), "960 o");
    /// assert_eq!(utils::format_bytes(48_000), "46.9 Kio");
    /// ```
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: [&str; 3] = ["Kio", "Mio", "Gio"];

        if bytes < 1024 {
            return format!("{} o", bytes);
        }
        let exponent = (bytes.ilog2() / 10).min(UNITS.len() as u32);
        let value = bytes as f64 / 1024f64.powi(exponent as i32);
        format!("{:.1} {}", value, UNITS[exponent as usize - 1])
    }

    /// Résumé d'une ligne pour `/stats`
    pub fn summarize(stats: &ChannelStats) -> String {
        format!(
            "{} frames envoyées ({}), {} reçues ({}) en {}",
            stats.frames_sent,
            format_bytes(stats.bytes_sent),
            stats.frames_received,
            format_bytes(stats.bytes_received),
            format_duration(stats.uptime)
        )
    }
}

/// Tests d'intégration du crate complet
#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_stats_summary() {
        assert_eq!(utils::format_duration(Duration::from_millis(59_999)), "59s");
        assert_eq!(utils::format_bytes(2048), "2.0 Kio");
        assert_eq!(utils::format_bytes(3 * 1024 * 1024), "3.0 Mio");
        assert_eq!(utils::format_bytes(5 * 1024 * 1024 * 1024 * 1024), "5120.0 Gio");

        let stats = ChannelStats {
            frames_sent: 3,
            frames_received: 2,
            bytes_sent: 2880,
            bytes_received: 40,
            uptime: Duration::from_secs(61),
        };
        assert_eq!(
            utils::summarize(&stats),
            "3 frames envoyées (2.8 Kio), 2 reçues (40 o) en 1m01s"
        );
    }

    #[tokio::test]
    async fn test_protocol_over_simulated_channel() {
        let connector = Arc::new(SimulatedConnector::new());
        let channel = TransportChannel::new(connector.clone(), ChannelConfig::test_config()).unwrap();
        channel.connect(DEFAULT_ENDPOINT).await.unwrap();
        let mut peer = connector.take_peer().unwrap();
        let mut inbound = channel.receive().unwrap();

        peer.push_message(&ServerMessage::TextDelta {
            id: "a".to_string(),
            delta: "Hi".to_string(),
        })
        .await;

        let Frame::Text(text) = inbound.next().await.unwrap().unwrap() else {
            panic!("frame texte attendue");
        };
        assert!(matches!(ServerMessage::parse(&text).unwrap(), ServerMessage::TextDelta { .. }));

        channel.send(ClientMessage::end_of_audio().to_frame().unwrap()).await.unwrap();
        let Some(Frame::Text(text)) = peer.recv().await else {
            panic!("frame texte attendue");
        };
        assert_eq!(ClientMessage::parse(&text).unwrap(), ClientMessage::end_of_audio());
    }

    #[tokio::test]
    async fn test_websocket_connect_refused() {
        // Port 1 : rien n'écoute
        let channel = TransportChannel::new(Arc::new(WsConnector), ChannelConfig::test_config()).unwrap();
        let result = channel.connect("ws://127.0.0.1:1/realtime").await;

        assert!(matches!(result, Err(NetworkError::ConnectError { .. })));
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }
}
