//! Gestion d'erreurs de l'orchestrateur
//!
//! Les erreurs des couches audio et réseau remontent telles quelles ;
//! l'orchestrateur n'ajoute que les refus liés à l'état de la session.

use thiserror::Error;

use audio::AudioError;
use network::NetworkError;

#[derive(Error, Debug)]
pub enum ConversationError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Opération qui exige une session connectée
    #[error("Session non connectée")]
    NotConnected,
}

/// Type Result personnalisé pour le crate conversation
pub type ConversationResult<T> = Result<T, ConversationError>;

impl ConversationError {
    /// Adresse rejetée avant toute tentative
    pub fn is_invalid_address(&self) -> bool {
        matches!(self, ConversationError::Network(NetworkError::InvalidAddress { .. }))
    }

    pub fn is_media_acquisition(&self) -> bool {
        matches!(self, ConversationError::Audio(AudioError::MediaAcquisition(_)))
    }
}
