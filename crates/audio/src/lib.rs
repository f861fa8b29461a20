//! Crate audio - pipelines PCM16 de la session conversationnelle
//!
//! Ce crate gère toute la chaîne audio :
//! - Capture microphone avec cpal, découpée en frames PCM16 mono fixes
//! - Lecture continue avec vidage immédiat (barge-in)
//! - Conversions PCM16 <-> formats natifs des périphériques
//! - Périphériques simulés pour les tests

pub mod config;      // Configuration audio
pub mod types;       // Types de données (AudioFrame, statistiques)
pub mod traits;      // Traits abstraits (micro, sortie, sink)
pub mod capture;     // Découpage en frames + microphone cpal
pub mod playback;    // File de lecture + sortie cpal
pub mod codec;       // Conversions PCM16
pub mod pipeline;    // Pipelines de capture et de lecture
pub mod mock;        // Périphériques simulés
pub mod error;       // Gestion d'erreurs
mod device;          // Thread propriétaire des streams cpal

// Réexports pour faciliter l'utilisation
pub use config::*;
pub use types::*;
pub use traits::*;
pub use error::*;

// Réexports des implémentations principales
pub use capture::{CpalMicrophone, FrameChunker};
pub use playback::{CpalSpeaker, PlaybackQueue, DEFAULT_PLAYBACK_CAPACITY};
pub use pipeline::{CapturePipeline, PlaybackPipeline};
