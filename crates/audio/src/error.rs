//! Gestion d'erreurs pour le système audio
//!
//! Toutes les opérations audio retournent un `AudioResult<T>`. Les erreurs cpal
//! sont converties ici pour pouvoir utiliser l'opérateur `?` partout.

use thiserror::Error;

/// Énumération de toutes les erreurs possibles dans le système audio
#[derive(Error, Debug)]
pub enum AudioError {
    /// Aucun périphérique audio (microphone ou haut-parleurs) n'a été trouvé
    #[error("Aucun périphérique audio trouvé")]
    NoDeviceFound,

    /// Paramètres audio incohérents ou non supportés par le périphérique
    #[error("Erreur de configuration audio: {0}")]
    ConfigError(String),

    /// Le microphone n'a pas pu être acquis (permission refusée, périphérique occupé...)
    ///
    /// La capture reste inactive quand cette erreur est retournée.
    #[error("Impossible d'acquérir le microphone: {0}")]
    MediaAcquisition(String),

    /// Données PCM16 mal formées (nombre d'octets impair par exemple)
    #[error("Données PCM invalides: {0}")]
    InvalidPcm(String),

    /// Le pipeline de lecture n'a pas encore été initialisé
    #[error("Pipeline audio non initialisé")]
    NotInitialized,

    /// Erreur remontée par le stream cpal (lecture ou pause)
    #[error("Erreur du stream audio: {0}")]
    StreamError(String),

    /// Le consommateur des frames capturées a refusé une frame
    #[error("Le consommateur de frames est fermé: {0}")]
    SinkClosed(String),
}

impl AudioError {
    /// Convertit n'importe quelle erreur d'acquisition en `MediaAcquisition`
    ///
    /// Le pipeline de capture ne remonte qu'un seul type d'erreur au démarrage,
    /// quelle que soit la cause côté périphérique.
    pub fn into_acquisition(self) -> Self {
        match self {
            AudioError::MediaAcquisition(_) => self,
            other => AudioError::MediaAcquisition(other.to_string()),
        }
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        AudioError::ConfigError(format!("Erreur construction stream: {}", err))
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        AudioError::StreamError(err.to_string())
    }
}

/// Type Result personnalisé pour le crate audio
pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AudioError::NoDeviceFound;
        assert_eq!(error.to_string(), "Aucun périphérique audio trouvé");

        let error = AudioError::MediaAcquisition("occupé".to_string());
        assert_eq!(error.to_string(), "Impossible d'acquérir le microphone: occupé");
    }

    #[test]
    fn test_into_acquisition() {
        let error = AudioError::NoDeviceFound.into_acquisition();
        assert!(matches!(error, AudioError::MediaAcquisition(ref msg) if msg == "Aucun périphérique audio trouvé"));

        // Une erreur déjà du bon type n'est pas ré-emballée
        let error = AudioError::MediaAcquisition("refusé".to_string()).into_acquisition();
        assert_eq!(error.to_string(), "Impossible d'acquérir le microphone: refusé");
    }
}
