//! Traits abstraits pour le système audio
//!
//! Les pipelines ne parlent jamais directement à cpal : ils passent par
//! ces interfaces, ce qui permet de les tester avec les périphériques
//! simulés du module `mock`.

use async_trait::async_trait;

use crate::{AudioConfig, AudioFrame, AudioResult, FrameChunker, PlaybackQueue};

/// Source de capture (microphone)
///
/// Implémentations :
/// - `CpalMicrophone` : microphone par défaut du système via cpal
/// - `MockMicrophone` : microphone simulé, alimenté par les tests
/// - `DisabledDevice` : refuse toute acquisition (mode sans audio)
#[async_trait]
pub trait MicSource: Send + Sync {
    /// Acquiert le microphone de façon exclusive et commence à pousser
    /// les échantillons dans `chunker`
    ///
    /// Le microphone reste acquis tant que le handle retourné n'est pas fermé.
    ///
    /// # Erreurs
    /// - `AudioError::MediaAcquisition` : périphérique occupé ou permission refusée
    /// - `AudioError::NoDeviceFound` : aucun microphone
    /// - `AudioError::ConfigError` : format demandé non supporté
    async fn acquire(
        &self,
        config: &AudioConfig,
        chunker: FrameChunker,
    ) -> AudioResult<Box<dyn DeviceHandle>>;

    /// Nom lisible du périphérique
    fn name(&self) -> String {
        "Périphérique inconnu".to_string()
    }
}

/// Sortie audio (haut-parleurs)
///
/// Le périphérique ouvert consomme `queue` à son propre rythme et joue
/// du silence quand la file est vide.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Ouvre le périphérique de sortie à la fréquence donnée
    async fn open(&self, sample_rate: u32, queue: PlaybackQueue) -> AudioResult<Box<dyn DeviceHandle>>;

    fn name(&self) -> String {
        "Périphérique inconnu".to_string()
    }
}

/// Handle sur un périphérique acquis
///
/// La fermeture libère le périphérique : après `close()`, un nouvel
/// `acquire()`/`open()` peut réussir.
#[async_trait]
pub trait DeviceHandle: Send {
    /// Libère le périphérique
    async fn close(self: Box<Self>);
}

/// Consommateur des frames capturées
///
/// Le pipeline de capture appelle `accept()` une fois par frame, dans l'ordre
/// de capture, depuis une seule tâche. `finish()` est appelé au plus une fois,
/// après la dernière frame, quand l'arrêt est normal.
#[async_trait]
pub trait FrameSink: Send {
    async fn accept(&mut self, frame: AudioFrame) -> AudioResult<()>;

    /// Signale la fin de l'énoncé au consommateur
    async fn finish(&mut self) -> AudioResult<()> {
        Ok(())
    }
}
