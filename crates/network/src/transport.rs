//! Canal de transport
//!
//! - `Connection` : une connexion ouverte, séparée en deux moitiés
//!   indépendantes (`FrameSender` clonable, `FrameReceiver` unique)
//! - `TransportChannel` : machine à états au-dessus d'un `Connector`
//! - `WsConnector` : implémentation WebSocket (tokio-tungstenite)
//!
//! # Architecture
//!
//! ```text
//!  FrameSender ──mpsc──> [tâche d'écriture] ──> socket
//!  FrameReceiver <─mpsc── [tâche de lecture] <── socket
//! ```
//!
//! Les deux chemins ne partagent aucun curseur : `send()` peut être appelé
//! pendant qu'une réception est en attente.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::types::StatsCounters;
use crate::{
    ChannelConfig, ChannelState, ChannelStats, Connector, Endpoint, Frame, NetworkError, NetworkResult,
};

/// Élément de la file entrante : une frame, ou l'erreur qui termine le flux
pub(crate) type Inbound = NetworkResult<Frame>;

/// Moitié émettrice d'une connexion
///
/// Clonable : les frames de tous les clones sont transmises dans l'ordre
/// des appels à `send()`.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Frame>,
    closed: CancellationToken,
    stats: Arc<StatsCounters>,
}

impl FrameSender {
    /// Remet une frame au transport
    ///
    /// N'attend que si la file sortante est pleine, jamais l'écriture réseau.
    /// Une frame acceptée est écrite même si la connexion est fermée juste
    /// après, dans la limite de `ChannelConfig::close_timeout_ms`.
    ///
    /// # Erreurs
    /// - `NetworkError::SendError` si la connexion n'est plus ouverte, y compris
    ///   quand elle est fermée pendant l'attente d'une place dans la file
    pub async fn send(&self, frame: Frame) -> NetworkResult<()> {
        let closed = || NetworkError::SendError("connexion fermée".to_string());
        if self.closed.is_cancelled() {
            return Err(closed());
        }

        let len = frame.len();
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(closed()),
            result = self.tx.send(frame) => {
                result.map_err(|_| NetworkError::SendError("transport arrêté".to_string()))?
            }
        }
        self.stats.record_sent(len);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

/// Moitié réceptrice d'une connexion
///
/// Séquence paresseuse des frames entrantes, dans l'ordre d'arrivée.
pub struct FrameReceiver {
    rx: mpsc::Receiver<Inbound>,
    closed: CancellationToken,
    stats: Arc<StatsCounters>,
}

impl FrameReceiver {
    /// Prochaine frame entrante
    ///
    /// - `Some(Ok(frame))` : frame suivante
    /// - `Some(Err(NetworkError::ConnectionLost))` : le transport a échoué, fin du flux
    /// - `None` : le pair a fermé proprement, ou `close()` a été appelé
    ///
    /// Après `close()`, plus aucune frame n'est délivrée, même déjà reçue.
    pub async fn next(&mut self) -> Option<NetworkResult<Frame>> {
        if self.closed.is_cancelled() {
            return None;
        }

        let item = tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            item = self.rx.recv() => item,
        }?;

        if let Ok(frame) = &item {
            self.stats.record_received(frame.len());
        }
        Some(item)
    }
}

/// Connexion ouverte
///
/// Créée par un `Connector`. La fermeture (explicite ou par `Drop`) arrête
/// les deux moitiés.
pub struct Connection {
    endpoint: Endpoint,
    sender: FrameSender,
    receiver: Option<FrameReceiver>,
    closed: CancellationToken,
    /// Annulé par le transport quand le flux entrant est terminé
    ended: CancellationToken,
    stats: Arc<StatsCounters>,
}

impl Connection {
    /// Assemble une connexion à partir des files d'un transport
    ///
    /// `ended` doit être annulé par le transport quand le pair s'en va.
    pub(crate) fn from_parts(
        endpoint: Endpoint,
        outbound: mpsc::Sender<Frame>,
        inbound: mpsc::Receiver<Inbound>,
        closed: CancellationToken,
        ended: CancellationToken,
    ) -> Self {
        let stats = Arc::new(StatsCounters::new());
        Self {
            endpoint,
            sender: FrameSender {
                tx: outbound,
                closed: closed.clone(),
                stats: Arc::clone(&stats),
            },
            receiver: Some(FrameReceiver {
                rx: inbound,
                closed: closed.clone(),
                stats: Arc::clone(&stats),
            }),
            closed,
            ended,
            stats,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Clone de la moitié émettrice
    pub fn sender(&self) -> FrameSender {
        self.sender.clone()
    }

    /// Prend la moitié réceptrice (une seule fois par connexion)
    pub fn take_receiver(&mut self) -> Option<FrameReceiver> {
        self.receiver.take()
    }

    /// Ferme la connexion ; sans effet si elle est déjà fermée
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!(endpoint = %self.endpoint, "fermeture de la connexion");
            self.closed.cancel();
        }
    }

    /// Fermée localement, ou terminée par le pair
    pub fn is_terminated(&self) -> bool {
        self.closed.is_cancelled() || self.ended.is_cancelled()
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats.snapshot()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

enum Slot {
    Idle,
    Connecting(u64),
    Open(Connection),
}

struct ChannelInner {
    slot: Slot,
    attempt: u64,
}

/// Canal de transport : une connexion à la fois
///
/// Machine à états `Disconnected → Connecting → Open → Disconnected`.
/// Une connexion perdue ramène à `Disconnected` ; il faut un nouveau
/// `connect()` explicite.
pub struct TransportChannel {
    connector: Arc<dyn Connector>,
    config: ChannelConfig,
    inner: Mutex<ChannelInner>,
}

impl TransportChannel {
    pub fn new(connector: Arc<dyn Connector>, config: ChannelConfig) -> NetworkResult<Self> {
        config.validate()?;
        Ok(Self {
            connector,
            config,
            inner: Mutex::new(ChannelInner {
                slot: Slot::Idle,
                attempt: 0,
            }),
        })
    }

    /// Ouvre le canal vers `address`
    ///
    /// # Erreurs
    /// - `NetworkError::InvalidAddress` : adresse mal formée, aucune tentative n'est faite
    /// - `NetworkError::InvalidState` : le canal n'est pas `Disconnected`
    /// - `NetworkError::ConnectError` : échec du handshake ; le canal reste `Disconnected`
    pub async fn connect(&self, address: &str) -> NetworkResult<Endpoint> {
        let endpoint = Endpoint::parse(address)?;

        let attempt = {
            let mut inner = self.inner.lock();
            let state = Self::state_of(&inner.slot);
            if state != ChannelState::Disconnected {
                return Err(NetworkError::invalid_state("connect", state));
            }
            inner.attempt += 1;
            inner.slot = Slot::Connecting(inner.attempt);
            inner.attempt
        };

        info!(endpoint = %endpoint, transport = self.connector.name(), "connexion");
        let result = self.connector.connect(&endpoint, &self.config).await;

        let mut inner = self.inner.lock();
        let still_wanted = matches!(inner.slot, Slot::Connecting(current) if current == attempt);

        match result {
            Ok(connection) if still_wanted => {
                inner.slot = Slot::Open(connection);
                info!(endpoint = %endpoint, "canal ouvert");
                Ok(endpoint)
            }
            Ok(connection) => {
                // close() appelé pendant le handshake
                connection.close();
                Err(NetworkError::ConnectError {
                    addr: endpoint.to_string(),
                    reason: "canal fermé pendant la connexion".to_string(),
                })
            }
            Err(e) => {
                if still_wanted {
                    inner.slot = Slot::Idle;
                }
                warn!(endpoint = %endpoint, error = %e, "échec de connexion");
                Err(e)
            }
        }
    }

    /// Moitié émettrice de la connexion ouverte
    pub fn sender(&self) -> NetworkResult<FrameSender> {
        let inner = self.inner.lock();
        match &inner.slot {
            Slot::Open(connection) if !connection.is_terminated() => Ok(connection.sender()),
            other => Err(NetworkError::SendError(format!(
                "canal {}",
                Self::state_of(other).to_string().to_lowercase()
            ))),
        }
    }

    /// Envoie une frame sur la connexion ouverte
    ///
    /// # Erreurs
    /// - `NetworkError::SendError` si le canal n'est pas ouvert
    pub async fn send(&self, frame: Frame) -> NetworkResult<()> {
        let sender = self.sender()?;
        sender.send(frame).await
    }

    /// Séquence des frames entrantes de la connexion courante
    ///
    /// Disponible une fois par connexion : chaque `connect()` réussi
    /// en fournit une nouvelle.
    pub fn receive(&self) -> NetworkResult<FrameReceiver> {
        let mut inner = self.inner.lock();
        let state = Self::state_of(&inner.slot);
        match &mut inner.slot {
            Slot::Open(connection) => connection
                .take_receiver()
                .ok_or_else(|| NetworkError::invalid_state("receive (déjà pris)", state)),
            _ => Err(NetworkError::invalid_state("receive", state)),
        }
    }

    /// Ferme le canal
    ///
    /// Sans effet si le canal est déjà fermé ou n'a jamais été ouvert.
    /// Aucune frame entrante n'est délivrée après le retour de cette fonction.
    /// Les frames sortantes déjà acceptées par `send()` partent encore, dans
    /// l'ordre, avant la fermeture côté pair ; aucune attente ici.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut self.inner.lock().slot, Slot::Idle);
        if let Slot::Open(connection) = previous {
            connection.close();
        }
    }

    pub fn state(&self) -> ChannelState {
        Self::state_of(&self.inner.lock().slot)
    }

    /// Statistiques de la connexion courante
    pub fn stats(&self) -> Option<ChannelStats> {
        match &self.inner.lock().slot {
            Slot::Open(connection) => Some(connection.stats()),
            _ => None,
        }
    }

    fn state_of(slot: &Slot) -> ChannelState {
        match slot {
            Slot::Idle => ChannelState::Disconnected,
            Slot::Connecting(_) => ChannelState::Connecting,
            Slot::Open(connection) if connection.is_terminated() => ChannelState::Disconnected,
            Slot::Open(_) => ChannelState::Open,
        }
    }
}

/// Transport WebSocket (ws:// et wss://)
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint, config: &ChannelConfig) -> NetworkResult<Connection> {
        let (ws_stream, _response) =
            connect_async(endpoint.as_str())
                .await
                .map_err(|e| NetworkError::ConnectError {
                    addr: endpoint.to_string(),
                    reason: e.to_string(),
                })?;

        let (write, mut read) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<Frame>(config.outbound_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(config.inbound_capacity);
        let closed = CancellationToken::new();
        let ended = CancellationToken::new();

        // Écriture : file sortante -> socket, dans l'ordre de remise
        tokio::spawn(run_writer(
            write,
            outbound_rx,
            closed.clone(),
            ended.clone(),
            config.close_timeout(),
        ));

        // Lecture : socket -> file entrante, dans l'ordre d'arrivée
        let reader_closed = closed.clone();
        let reader_ended = ended.clone();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    biased;
                    _ = reader_closed.cancelled() => break,
                    message = read.next() => message,
                };

                let inbound = match message {
                    Some(Ok(Message::Text(text))) => Ok(Frame::Text(text.as_str().to_string())),
                    Some(Ok(Message::Binary(bytes))) => Ok(Frame::Binary(bytes)),
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "fermeture propre par le pair");
                        break;
                    }
                    None => {
                        debug!("flux WebSocket terminé");
                        break;
                    }
                    // Ping/Pong gérés par tungstenite
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "connexion WebSocket perdue");
                        let _ = inbound_tx.send(Err(NetworkError::ConnectionLost(e.to_string()))).await;
                        break;
                    }
                };

                if inbound_tx.send(inbound).await.is_err() {
                    break;
                }
            }
            reader_ended.cancel();
            trace!("tâche de lecture terminée");
        });

        Ok(Connection::from_parts(
            endpoint.clone(),
            outbound_tx,
            inbound_rx,
            closed,
            ended,
        ))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes),
    }
}

/// Tâche d'écriture d'une connexion WebSocket
///
/// Après `close()`, la file sortante est vidée puis le `Close` est envoyé.
/// Un pair qui ne lit plus est abandonné après `close_timeout`, y compris
/// pendant une écriture déjà commencée.
async fn run_writer<S>(
    mut write: S,
    mut outbound: mpsc::Receiver<Frame>,
    closed: CancellationToken,
    ended: CancellationToken,
    close_timeout: Duration,
) where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let stalled = async {
        closed.cancelled().await;
        tokio::time::sleep(close_timeout).await;
    };

    let result = tokio::select! {
        result = write_frames(&mut write, &mut outbound, &closed) => Some(result),
        _ = stalled => None,
    };

    match result {
        Some(Ok(())) => match timeout(close_timeout, flush_and_close(&mut write, &mut outbound)).await {
            Ok(Ok(())) => debug!("file sortante vidée, fermeture envoyée"),
            Ok(Err(e)) => debug!(error = %e, "fermeture WebSocket incomplète"),
            Err(_) => warn!("le pair ne lit plus, frames sortantes abandonnées"),
        },
        Some(Err(e)) => {
            warn!(error = %e, "écriture WebSocket impossible");
            ended.cancel();
        }
        None => warn!("le pair ne lit plus, frames sortantes abandonnées"),
    }
    trace!("tâche d'écriture terminée");
}

/// Écrit les frames jusqu'à la fermeture locale
async fn write_frames<S>(
    write: &mut S,
    outbound: &mut mpsc::Receiver<Frame>,
    closed: &CancellationToken,
) -> Result<(), WsError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = closed.cancelled() => return Ok(()),
            frame = outbound.recv() => frame,
        };
        let Some(frame) = frame else { return Ok(()) };
        write.send(into_message(frame)).await?;
    }
}

/// Écrit ce qui reste en file puis envoie le `Close`
async fn flush_and_close<S>(write: &mut S, outbound: &mut mpsc::Receiver<Frame>) -> Result<(), WsError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    outbound.close();
    let mut flushed = 0usize;
    while let Some(frame) = outbound.recv().await {
        write.send(into_message(frame)).await?;
        flushed += 1;
    }
    if flushed > 0 {
        debug!(flushed, "frames écrites après la fermeture");
    }
    write.send(Message::Close(None)).await
}
