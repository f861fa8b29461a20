//! Configuration audio de la session temps réel
//!
//! Le format est fixe pour toute la session : PCM16 mono à 24 kHz.
//! Il n'y a pas de négociation de codec avec le backend.

use serde::{Deserialize, Serialize};

use crate::{AudioError, AudioResult};

/// Fréquence d'échantillonnage utilisée par le backend conversationnel
pub const SESSION_SAMPLE_RATE: u32 = 24_000;

/// Configuration principale des pipelines de capture et de lecture
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Fréquence d'échantillonnage en Hz, identique en capture et en lecture
    pub sample_rate: u32,

    /// Nombre de canaux des frames échangées (toujours mono sur le fil)
    pub channels: u16,

    /// Durée de chaque frame capturée en millisecondes
    ///
    /// 20ms à 24 kHz = 480 échantillons = 960 octets sur le fil
    pub frame_duration_ms: u16,

    /// Capacité du channel borné entre le callback micro et le consommateur
    ///
    /// Quand il est plein, la frame la plus récente est perdue (et comptée).
    pub capture_queue_frames: usize,

    /// Demande l'annulation d'écho au périphérique de capture
    pub echo_cancellation: bool,

    /// Envoie un marqueur de fin de flux quand l'enregistrement s'arrête normalement
    pub end_of_stream_marker: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SESSION_SAMPLE_RATE,
            channels: 1,
            frame_duration_ms: 20,
            capture_queue_frames: 32,
            echo_cancellation: true,
            end_of_stream_marker: true,
        }
    }
}

impl AudioConfig {
    /// Nombre d'échantillons par frame
    ///
    /// Exemple : (24000 * 20) / 1000 = 480 échantillons
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as usize * self.frame_duration_ms as usize) / 1000
    }

    /// Taille en octets d'une frame PCM16 sur le fil
    pub fn frame_size_bytes(&self) -> usize {
        self.samples_per_frame() * self.channels as usize * 2
    }

    /// Latence ajoutée par la file de capture quand elle est pleine
    pub fn max_capture_backlog_ms(&self) -> u32 {
        self.frame_duration_ms as u32 * self.capture_queue_frames as u32
    }

    /// Valide que la configuration est cohérente
    pub fn validate(&self) -> AudioResult<()> {
        if self.sample_rate < 8000 || self.sample_rate > 48000 {
            return Err(AudioError::ConfigError(format!(
                "Sample rate invalide: {} (doit être entre 8000 et 48000)",
                self.sample_rate
            )));
        }

        if self.channels != 1 {
            return Err(AudioError::ConfigError(format!(
                "Nombre de canaux invalide: {} (seul le mono est supporté)",
                self.channels
            )));
        }

        if self.frame_duration_ms < 10 || self.frame_duration_ms > 100 {
            return Err(AudioError::ConfigError(format!(
                "Durée de frame invalide: {}ms (doit être entre 10 et 100)",
                self.frame_duration_ms
            )));
        }

        if self.capture_queue_frames == 0 {
            return Err(AudioError::ConfigError(
                "La file de capture doit contenir au moins une frame".to_string(),
            ));
        }

        Ok(())
    }

    /// Configuration à faible latence : frames plus petites, file plus courte
    pub fn low_latency() -> Self {
        Self {
            frame_duration_ms: 10,
            capture_queue_frames: 16,
            ..Default::default()
        }
    }

    /// Configuration pour les tests : frames minuscules, pas de marqueur de fin
    pub fn test_config() -> Self {
        Self {
            sample_rate: 8000,
            frame_duration_ms: 10,
            capture_queue_frames: 8,
            end_of_stream_marker: false,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AudioConfig::default();

        assert_eq!(config.samples_per_frame(), 480);
        assert_eq!(config.frame_size_bytes(), 960);
        assert_eq!(config.max_capture_backlog_ms(), 640);
        assert!(config.echo_cancellation);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = AudioConfig::default();

        config.sample_rate = 1000;
        assert!(config.validate().is_err());

        config.sample_rate = SESSION_SAMPLE_RATE;
        config.channels = 2;
        assert!(config.validate().is_err());

        config.channels = 1;
        config.capture_queue_frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_preset_configs() {
        let low_lat = AudioConfig::low_latency();
        assert_eq!(low_lat.samples_per_frame(), 240);
        assert!(low_lat.validate().is_ok());

        let test = AudioConfig::test_config();
        assert_eq!(test.samples_per_frame(), 80);
        assert!(!test.end_of_stream_marker);
        assert!(test.validate().is_ok());
    }
}
