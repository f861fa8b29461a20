//! Traits abstraits pour le transport
//!
//! `TransportChannel` ne connaît que `Connector` : le même canal fonctionne
//! sur une vraie WebSocket (`WsConnector`) ou sur un pair simulé
//! (`SimulatedConnector`) pour les tests.

use async_trait::async_trait;

use crate::{ChannelConfig, Connection, Endpoint, NetworkResult};

/// Fabrique de connexions
///
/// # Example
/// ```rust,no_run
/// use network::{ChannelConfig, Connector, Endpoint, WsConnector};
///
/// # async fn example() -> network::NetworkResult<()> {
/// let endpoint = Endpoint::parse("ws://localhost:8080/realtime")?;
/// let mut connection = WsConnector.connect(&endpoint, &ChannelConfig::default()).await?;
/// let mut inbound = connection.take_receiver().expect("receiver disponible");
/// while let Some(frame) = inbound.next().await {
///     println!("reçu {:?}", frame?.kind());
/// }
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Connector: Send + Sync {
    /// Établit une connexion vers `endpoint`
    ///
    /// Aucun timeout n'est imposé : un handshake bloqué bloque l'appel.
    ///
    /// # Erreurs
    /// - `NetworkError::ConnectError` : échec du handshake
    async fn connect(&self, endpoint: &Endpoint, config: &ChannelConfig) -> NetworkResult<Connection>;

    /// Nom du transport pour les logs
    fn name(&self) -> &'static str {
        "inconnu"
    }
}
