//! Transport simulé en mémoire
//!
//! Sert aux tests des couches supérieures : chaque `connect()` réussi crée
//! un `SimulatedPeer` qui joue le rôle du backend (frames entrantes,
//! fermeture propre, panne du transport) et observe les frames sortantes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::transport::Inbound;
use crate::{
    ChannelConfig, Connection, Connector, Endpoint, Frame, NetworkError, NetworkResult, ServerMessage,
};

/// Connecteur en mémoire
#[derive(Default)]
pub struct SimulatedConnector {
    refusal: Mutex<Option<String>>,
    peers: Mutex<VecDeque<SimulatedPeer>>,
    attempts: AtomicU32,
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Le prochain `connect()` échouera avec `reason`
    pub fn refuse_next(&self, reason: &str) {
        *self.refusal.lock() = Some(reason.to_string());
    }

    /// Nombre de tentatives de connexion reçues
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Côté backend de la plus ancienne connexion non encore réclamée
    pub fn take_peer(&self) -> Option<SimulatedPeer> {
        self.peers.lock().pop_front()
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn connect(&self, endpoint: &Endpoint, config: &ChannelConfig) -> NetworkResult<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = self.refusal.lock().take() {
            return Err(NetworkError::ConnectError {
                addr: endpoint.to_string(),
                reason,
            });
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);
        let closed = CancellationToken::new();
        let ended = CancellationToken::new();

        self.peers.lock().push_back(SimulatedPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
            closed: closed.clone(),
            ended: ended.clone(),
        });
        debug!(endpoint = %endpoint, "connexion simulée ouverte");

        Ok(Connection::from_parts(
            endpoint.clone(),
            outbound_tx,
            inbound_rx,
            closed,
            ended,
        ))
    }

    fn name(&self) -> &'static str {
        "simulé"
    }
}

/// Côté backend d'une connexion simulée
///
/// Tant que le test n'appelle pas `recv()`, le pair ne lit pas : la file
/// sortante se remplit jusqu'à `ChannelConfig::outbound_capacity`, puis
/// `send()` attend côté client, comme face à un backend qui ne suit plus.
/// Après une fermeture locale, les frames déjà acceptées restent lisibles.
pub struct SimulatedPeer {
    inbound: mpsc::Sender<Inbound>,
    outbound: mpsc::Receiver<Frame>,
    closed: CancellationToken,
    ended: CancellationToken,
}

impl SimulatedPeer {
    /// Émet une frame vers le client
    pub async fn push(&self, frame: Frame) {
        let _ = self.inbound.send(Ok(frame)).await;
    }

    /// Émet un message de protocole vers le client
    pub async fn push_message(&self, message: &ServerMessage) {
        if let Ok(frame) = message.to_frame() {
            self.push(frame).await;
        }
    }

    /// Fermeture propre : les frames déjà émises restent délivrées,
    /// puis le flux se termine sans erreur
    pub fn hang_up(self) {
        self.ended.cancel();
    }

    /// Panne du transport : le client reçoit `ConnectionLost`
    pub async fn fail(self, reason: &str) {
        let _ = self
            .inbound
            .send(Err(NetworkError::ConnectionLost(reason.to_string())))
            .await;
        self.ended.cancel();
    }

    /// Prochaine frame envoyée par le client
    ///
    /// Retourne `None` quand le client a fermé et que plus rien n'est en file.
    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::select! {
            biased;
            frame = self.outbound.recv() => frame,
            _ = self.closed.cancelled() => self.outbound.try_recv().ok(),
        }
    }

    /// Frame déjà envoyée par le client, sans attendre
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.outbound.try_recv().ok()
    }

    /// Frames envoyées par le client et pas encore lues
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    /// Le client a-t-il fermé la connexion ?
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ControlAction;

    #[tokio::test]
    async fn test_peer_sees_client_close() {
        let connector = SimulatedConnector::new();
        let endpoint = Endpoint::parse("ws://localhost/realtime").unwrap();
        let mut connection = connector.connect(&endpoint, &ChannelConfig::test_config()).await.unwrap();
        let mut peer = connector.take_peer().unwrap();
        let mut inbound = connection.take_receiver().unwrap();

        peer.push_message(&ServerMessage::Control {
            action: ControlAction::Connected,
            greeting: None,
            id: None,
        })
        .await;
        let frame = inbound.next().await.unwrap().unwrap();
        assert!(matches!(
            ServerMessage::parse(match &frame {
                Frame::Text(text) => text,
                Frame::Binary(_) => panic!("frame texte attendue"),
            }),
            Ok(ServerMessage::Control { action: ControlAction::Connected, .. })
        ));

        connection.sender().send(Frame::text("dernier")).await.unwrap();
        connection.close();

        assert!(peer.is_closed());
        assert_eq!(peer.recv().await, Some(Frame::text("dernier")));
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn test_refusal_applies_once() {
        let connector = SimulatedConnector::new();
        let endpoint = Endpoint::parse("ws://localhost/realtime").unwrap();
        connector.refuse_next("refusé");

        assert!(connector.connect(&endpoint, &ChannelConfig::test_config()).await.is_err());
        assert!(connector.connect(&endpoint, &ChannelConfig::test_config()).await.is_ok());
        assert_eq!(connector.attempts(), 2);
        assert!(connector.take_peer().is_some());
        assert!(connector.take_peer().is_none());
    }
}
