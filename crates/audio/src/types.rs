//! Types de données pour le système audio
//!
//! - `Sample` : un échantillon PCM16 signé
//! - `AudioFrame` : un bloc d'échantillons mono à fréquence fixe
//! - `CaptureStats` / `PlaybackStats` : compteurs exposés par les pipelines

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::{codec, AudioResult};

/// Type pour un échantillon audio
///
/// Le fil transporte du PCM16 signé little-endian : on garde ce format
/// de bout en bout, la conversion vers f32 n'a lieu qu'au bord du périphérique.
pub type Sample = i16;

/// Frame d'audio PCM16 mono
///
/// Produite par la capture, consommée soit par le chemin d'envoi,
/// soit par la file de lecture. Elle n'est jamais conservée au-delà
/// d'une étape de traitement, sauf dans la file de lecture.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    /// Les échantillons mono
    pub samples: Vec<Sample>,

    /// Fréquence d'échantillonnage en Hz
    pub sample_rate: u32,

    /// Numéro de séquence attribué par le producteur
    pub sequence_number: u64,

    /// Instant de création de la frame
    pub timestamp: Instant,
}

impl AudioFrame {
    /// Crée une nouvelle frame audio
    ///
    /// # Example
    /// ```rust
    /// use audio::AudioFrame;
    ///
    /// let frame = AudioFrame::new(vec![0, 120, -120, 0], 24_000, 7);
    /// assert_eq!(frame.samples.len(), 4);
    /// ```
    pub fn new(samples: Vec<Sample>, sample_rate: u32, sequence_number: u64) -> Self {
        Self {
            samples,
            sample_rate,
            sequence_number,
            timestamp: Instant::now(),
        }
    }

    /// Crée une frame de silence
    pub fn silence(sample_count: usize, sample_rate: u32, sequence_number: u64) -> Self {
        Self::new(vec![0; sample_count], sample_rate, sequence_number)
    }

    /// Décode une charge binaire reçue du réseau (PCM16 little-endian)
    ///
    /// # Erreurs
    /// - `AudioError::InvalidPcm` si le nombre d'octets est impair
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32, sequence_number: u64) -> AudioResult<Self> {
        let samples = codec::decode_pcm16_le(bytes)?;
        Ok(Self::new(samples, sample_rate, sequence_number))
    }

    /// Encode la frame pour l'envoi (PCM16 little-endian)
    pub fn to_le_bytes(&self) -> Vec<u8> {
        codec::encode_pcm16_le(&self.samples)
    }

    /// Durée de la frame en millisecondes
    pub fn duration_ms(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        (self.samples.len() as f32 / self.sample_rate as f32) * 1000.0
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Niveau RMS normalisé entre 0.0 et 1.0
    pub fn rms_level(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let sum_squares: f32 = self
            .samples
            .iter()
            .map(|&s| codec::i16_to_f32(s))
            .map(|s| s * s)
            .sum();

        (sum_squares / self.samples.len() as f32).sqrt()
    }

    /// Vérifie si la frame est essentiellement silencieuse
    pub fn is_silence(&self, threshold: f32) -> bool {
        self.rms_level() < threshold
    }
}

/// Statistiques du pipeline de capture
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureStats {
    /// Frames remises au consommateur
    pub frames_forwarded: u64,

    /// Frames perdues car la file de capture était pleine
    pub frames_dropped: u64,

    /// Frames refusées par le consommateur
    pub sink_errors: u64,
}

/// Statistiques du pipeline de lecture
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStats {
    /// Échantillons mis en file par `play()`
    pub samples_queued: u64,

    /// Échantillons effectivement rendus par le périphérique
    pub samples_rendered: u64,

    /// Échantillons jetés par `clear()`
    pub samples_discarded: u64,

    /// Échantillons refusés parce que la file était pleine
    pub samples_overflowed: u64,

    /// Callbacks du périphérique où la file s'est vidée en cours de buffer
    pub underruns: u64,

    /// Nombre d'appels à `clear()`
    pub clears: u64,
}

impl PlaybackStats {
    /// Échantillons encore en attente de rendu
    pub fn pending(&self) -> u64 {
        self.samples_queued
            .saturating_sub(self.samples_rendered)
            .saturating_sub(self.samples_discarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AudioError;

    #[test]
    fn test_frame_creation() {
        let frame = AudioFrame::new(vec![1, 2, 3], 24_000, 42);
        assert_eq!(frame.samples, vec![1, 2, 3]);
        assert_eq!(frame.sequence_number, 42);
        assert!(!frame.is_empty());
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::silence(480, 24_000, 0);
        assert!((frame.duration_ms() - 20.0).abs() < 0.001);

        let frame = AudioFrame::silence(480, 0, 0);
        assert_eq!(frame.duration_ms(), 0.0);
    }

    #[test]
    fn test_le_bytes_layout() {
        let frame = AudioFrame::new(vec![1, -2, 0x1234], 24_000, 0);
        assert_eq!(frame.to_le_bytes(), vec![0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);

        let decoded = AudioFrame::from_le_bytes(&[0x01, 0x00, 0xFE, 0xFF], 24_000, 3).unwrap();
        assert_eq!(decoded.samples, vec![1, -2]);
        assert_eq!(decoded.sequence_number, 3);
    }

    #[test]
    fn test_odd_payload_rejected() {
        let result = AudioFrame::from_le_bytes(&[0x01, 0x00, 0x02], 24_000, 0);
        assert!(matches!(result, Err(AudioError::InvalidPcm(_))));
    }

    #[test]
    fn test_rms_level() {
        let silence = AudioFrame::silence(100, 24_000, 0);
        assert_eq!(silence.rms_level(), 0.0);
        assert!(silence.is_silence(0.01));

        let loud = AudioFrame::new(vec![i16::MAX; 100], 24_000, 0);
        assert!(loud.rms_level() > 0.99);
        assert!(!loud.is_silence(0.5));
    }

    #[test]
    fn test_playback_stats_pending() {
        let stats = PlaybackStats {
            samples_queued: 1000,
            samples_rendered: 300,
            samples_discarded: 200,
            ..Default::default()
        };
        assert_eq!(stats.pending(), 500);
    }
}
