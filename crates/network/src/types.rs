//! Types de données du canal de transport
//!
//! - `Frame` : unité de transport, texte ou binaire
//! - `ChannelState` : cycle de vie du canal
//! - `Endpoint` : adresse validée du backend
//! - `ChannelConfig` / `ChannelStats` : configuration et compteurs

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{NetworkError, NetworkResult};

/// Adresse par défaut du backend conversationnel
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/realtime";

/// Frame étiquetée échangée sur le canal
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Charge texte (JSON du protocole)
    Text(String),

    /// Charge binaire (PCM16 little-endian)
    Binary(Bytes),
}

/// Nature d'une frame, sans sa charge
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Text,
    Binary,
}

impl Frame {
    pub fn text(payload: impl Into<String>) -> Self {
        Frame::Text(payload.into())
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Frame::Binary(payload.into())
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Text(_) => FrameKind::Text,
            Frame::Binary(_) => FrameKind::Binary,
        }
    }

    /// Taille de la charge en octets
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// États du canal de transport
///
/// `Disconnected → Connecting → Open → Disconnected`. Il n'existe pas d'état
/// de reconnexion : une connexion perdue revient toujours à `Disconnected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
}

impl ChannelState {
    pub fn is_open(&self) -> bool {
        matches!(self, ChannelState::Open)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChannelState::Disconnected => "Déconnecté",
            ChannelState::Connecting => "Connexion",
            ChannelState::Open => "Ouvert",
        };
        f.write_str(label)
    }
}

/// Adresse WebSocket validée
///
/// # Example
/// ```rust
/// use network::Endpoint;
///
/// let endpoint = Endpoint::parse("ws://localhost:8080/realtime").unwrap();
/// assert_eq!(endpoint.host(), "localhost");
/// assert!(Endpoint::parse("http://localhost").is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Valide une adresse : URL bien formée, schéma `ws` ou `wss`, hôte présent
    ///
    /// # Erreurs
    /// - `NetworkError::InvalidAddress` dans tous les autres cas
    pub fn parse(addr: &str) -> NetworkResult<Self> {
        let trimmed = addr.trim();
        let url = Url::parse(trimmed).map_err(|e| NetworkError::invalid_address(trimmed, e))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(NetworkError::invalid_address(
                trimmed,
                format!("schéma '{}' non supporté (ws ou wss attendu)", url.scheme()),
            ));
        }

        match url.host_str() {
            Some(host) if !host.is_empty() => {}
            _ => return Err(NetworkError::invalid_address(trimmed, "hôte manquant")),
        }

        Ok(Self { url })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Endpoint {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Configuration du canal de transport
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Capacité de la file des frames sortantes
    ///
    /// `send()` attend quand elle est pleine : c'est la seule contre-pression.
    pub outbound_capacity: usize,

    /// Capacité de la file des frames entrantes non encore consommées
    pub inbound_capacity: usize,

    /// Délai accordé à la fermeture pour écrire les frames déjà acceptées
    ///
    /// Au-delà, un pair qui ne lit plus est abandonné.
    pub close_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            inbound_capacity: 256,
            close_timeout_ms: 2000,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> NetworkResult<()> {
        if self.outbound_capacity == 0 || self.inbound_capacity == 0 {
            return Err(NetworkError::ConfigError(
                "Les files du canal doivent avoir une capacité non nulle".to_string(),
            ));
        }
        if self.close_timeout_ms == 0 {
            return Err(NetworkError::ConfigError(
                "Le délai de fermeture doit être non nul".to_string(),
            ));
        }
        Ok(())
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Configuration pour les tests : petites files
    pub fn test_config() -> Self {
        Self {
            outbound_capacity: 16,
            inbound_capacity: 16,
            close_timeout_ms: 200,
        }
    }
}

/// Statistiques d'une connexion
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,

    /// Durée depuis l'ouverture de la connexion
    #[serde(skip)]
    pub uptime: Duration,
}

/// Compteurs partagés entre les deux moitiés d'une connexion
#[derive(Debug)]
pub(crate) struct StatsCounters {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    opened_at: Instant,
}

impl StatsCounters {
    pub(crate) fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            opened_at: Instant::now(),
        }
    }

    pub(crate) fn record_sent(&self, frame_len: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(frame_len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, frame_len: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(frame_len as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            uptime: self.opened_at.elapsed(),
        }
    }
}
