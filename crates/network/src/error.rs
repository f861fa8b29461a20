//! Gestion d'erreurs pour le canal de transport
//!
//! Ce module suit les mêmes patterns que le module audio : un enum
//! `thiserror` et un alias `NetworkResult<T>`.

use thiserror::Error;

/// Énumération de toutes les erreurs possibles du canal de transport
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Adresse mal formée, rejetée avant toute tentative de connexion
    #[error("Adresse invalide '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// Échec de l'établissement de la connexion (handshake)
    #[error("Connexion impossible vers {addr}: {reason}")]
    ConnectError { addr: String, reason: String },

    /// Le transport a échoué en pleine session
    #[error("Connexion perdue: {0}")]
    ConnectionLost(String),

    /// La frame n'a pas pu être transmise
    #[error("Envoi impossible: {0}")]
    SendError(String),

    /// Frame entrante mal formée ou variante inconnue (jamais fatale)
    #[error("Message de protocole invalide: {0}")]
    ProtocolError(String),

    /// Opération tentée alors que le canal n'est pas dans le bon état
    #[error("Opération {operation} invalide dans l'état {current_state}")]
    InvalidState {
        operation: String,
        current_state: String,
    },

    /// Configuration du canal invalide
    #[error("Configuration réseau invalide: {0}")]
    ConfigError(String),
}

/// Type Result personnalisé pour le crate network
pub type NetworkResult<T> = Result<T, NetworkError>;

impl NetworkError {
    /// Crée une erreur d'adresse avec contexte
    pub fn invalid_address(addr: &str, reason: impl ToString) -> Self {
        Self::InvalidAddress {
            addr: addr.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Crée une erreur d'état avec contexte
    pub fn invalid_state(operation: &str, current_state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation: operation.to_string(),
            current_state: current_state.to_string(),
        }
    }

    /// L'erreur met-elle fin à la session ?
    ///
    /// Seule la perte de connexion est fatale : elle déclenche une déconnexion
    /// complète, sans nouvelle tentative.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NetworkError::ConnectionLost(_))
    }

    /// L'erreur concerne-t-elle une seule frame entrante ?
    pub fn is_protocol(&self) -> bool {
        matches!(self, NetworkError::ProtocolError(_))
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        NetworkError::ProtocolError(err.to_string())
    }
}
