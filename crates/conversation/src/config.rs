//! Configuration de la session conversationnelle

use serde::{Deserialize, Serialize};

use audio::AudioConfig;
use network::ChannelConfig;

use crate::ConversationResult;

/// Textes des messages de statut affichés à l'utilisateur
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTexts {
    pub connecting: String,

    /// Utilisé quand `connected` arrive sans message d'accueil
    pub connected: String,
    pub connection_failed: String,
    pub invalid_address: String,
    pub send_failed: String,
    pub recording_failed: String,
    pub connection_lost: String,
}

impl Default for StatusTexts {
    fn default() -> Self {
        Self {
            connecting: "Connecting…".to_string(),
            connected: "Connected".to_string(),
            connection_failed: "Connection failed. Please check the endpoint and try again.".to_string(),
            invalid_address: "Invalid WebSocket URL".to_string(),
            send_failed: "Failed to send message. Please try again.".to_string(),
            recording_failed: "Failed to toggle recording. Please check your microphone permissions.".to_string(),
            connection_lost: "Connection lost. Please reconnect.".to_string(),
        }
    }
}

/// Configuration complète de l'orchestrateur
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub audio: AudioConfig,
    pub channel: ChannelConfig,
    pub status: StatusTexts,
}

impl ConversationConfig {
    pub fn validate(&self) -> ConversationResult<()> {
        self.audio.validate()?;
        self.channel.validate()?;
        Ok(())
    }

    /// Configuration pour les tests : petites frames, petites files,
    /// marqueur de fin de flux actif
    pub fn test_config() -> Self {
        Self {
            audio: AudioConfig {
                end_of_stream_marker: true,
                ..AudioConfig::test_config()
            },
            channel: ChannelConfig::test_config(),
            status: StatusTexts::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConversationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.sample_rate, 24_000);
        assert_eq!(config.status.connecting, "Connecting…");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = ConversationConfig::test_config();
        assert!(config.validate().is_ok());

        config.channel.inbound_capacity = 0;
        assert!(config.validate().is_err());
    }
}
