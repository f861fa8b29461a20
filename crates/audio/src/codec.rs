//! Conversions PCM16
//!
//! Le format de session est fixe (PCM16 mono little-endian) : ce module
//! contient uniquement les conversions entre ce format, les formats natifs
//! des périphériques cpal (f32, i16, u16) et la représentation en octets.

use crate::{AudioError, AudioResult, Sample};

/// Convertit un échantillon f32 [-1.0, 1.0] vers i16, avec écrêtage
#[inline]
pub fn f32_to_i16(sample: f32) -> Sample {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

/// Convertit un échantillon i16 vers f32 [-1.0, 1.0]
#[inline]
pub fn i16_to_f32(sample: Sample) -> f32 {
    sample as f32 / i16::MAX as f32
}

/// Convertit un échantillon u16 (centré sur 32768) vers i16
#[inline]
pub fn u16_to_i16(sample: u16) -> Sample {
    (sample as i32 - 32_768) as i16
}

/// Convertit un échantillon i16 vers u16 (centré sur 32768)
#[inline]
pub fn i16_to_u16(sample: Sample) -> u16 {
    (sample as i32 + 32_768) as u16
}

/// Encode des échantillons en PCM16 little-endian
pub fn encode_pcm16_le(samples: &[Sample]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Décode du PCM16 little-endian
///
/// # Erreurs
/// - `AudioError::InvalidPcm` si le nombre d'octets est impair
pub fn decode_pcm16_le(bytes: &[u8]) -> AudioResult<Vec<Sample>> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::InvalidPcm(format!(
            "{} octets ne forment pas un nombre entier d'échantillons",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Réduit un signal entrelacé à un seul canal en moyennant chaque groupe
///
/// Les échantillons sont ajoutés à `out` (qui n'est pas vidé) pour permettre
/// la réutilisation du buffer depuis le callback temps réel.
pub fn downmix_to_mono(interleaved: &[Sample], channels: usize, out: &mut Vec<Sample>) {
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }

    for group in interleaved.chunks_exact(channels) {
        let sum: i32 = group.iter().map(|&s| s as i32).sum();
        out.push((sum / channels as i32) as i16);
    }
}
