//! Orchestrateur de conversation
//!
//! Relie le canal de transport et les deux pipelines audio, et reste le seul
//! à modifier la liste des messages.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────── Orchestrator ────────────────┐
//! UI ── connect ───> │ SessionState ──watch──> SessionSnapshot ──> UI│
//!    ── send_text ─> │                                              │
//!    ── toggle ────> │ CapturePipeline ── ChannelSink ──┐           │
//!                    │                                  v           │
//!                    │ boucle de réception <── TransportChannel ────┼──> backend
//!                    │       │ binaire                              │
//!                    │       └──> PlaybackPipeline                  │
//!                    └──────────────────────────────────────────────┘
//! ```
//!
//! Chaque connexion reçoit un numéro d'époque. `disconnect()` change d'époque
//! sous le verrou de l'état : la boucle de réception d'une ancienne connexion
//! ne peut plus rien modifier, même si une frame est déjà en cours de
//! traitement. `disconnect()` n'attend jamais la boucle, elle peut donc
//! l'appeler elle-même.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use audio::{
    AudioFrame, AudioOutput, CaptureStats, CapturePipeline, CpalMicrophone, CpalSpeaker, MicSource,
    PlaybackPipeline, PlaybackStats,
};
use network::{
    ChannelState, ChannelStats, ClientMessage, Connector, ControlAction, Frame, FrameReceiver, NetworkError,
    ServerMessage, TransportChannel, WsConnector,
};

use crate::sink::ChannelSink;
use crate::{
    ConnectionStatus, ConversationConfig, ConversationError, ConversationResult, Message, SessionMetrics,
    SessionSnapshot, SessionState,
};

/// Orchestrateur d'une session conversationnelle
///
/// Clonable : tous les clones pilotent la même session.
///
/// # Example
/// ```rust,no_run
/// use conversation::{ConversationConfig, Orchestrator};
///
/// # async fn example() -> conversation::ConversationResult<()> {
/// let orchestrator = Orchestrator::with_system_devices(ConversationConfig::default())?;
/// let mut updates = orchestrator.subscribe();
///
/// orchestrator.connect("ws://localhost:8080/realtime").await?;
/// orchestrator.send_text("Bonjour").await?;
///
/// while updates.changed().await.is_ok() {
///     let snapshot = updates.borrow_and_update().clone();
///     println!("{} messages", snapshot.messages.len());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConversationConfig,
    channel: TransportChannel,
    capture: AsyncMutex<CapturePipeline>,
    playback: PlaybackPipeline,
    state: Mutex<SessionState>,
    snapshots: watch::Sender<SessionSnapshot>,
    /// Incrémenté à chaque connexion et déconnexion, sous le verrou de `state`
    epoch: AtomicU64,
    /// Sérialise connect / disconnect / toggle_recording
    lifecycle: AsyncMutex<()>,
}

impl Orchestrator {
    /// Crée un orchestrateur à partir de ses trois collaborateurs
    ///
    /// # Erreurs
    /// - configuration audio ou réseau invalide
    pub fn new(
        config: ConversationConfig,
        connector: Arc<dyn Connector>,
        microphone: Arc<dyn MicSource>,
        output: Arc<dyn AudioOutput>,
    ) -> ConversationResult<Self> {
        config.validate()?;

        let channel = TransportChannel::new(connector, config.channel.clone())?;
        let capture = CapturePipeline::new(config.audio.clone(), microphone)?;
        let playback = PlaybackPipeline::new(output);
        let (snapshots, _) = watch::channel(SessionSnapshot::default());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                channel,
                capture: AsyncMutex::new(capture),
                playback,
                state: Mutex::new(SessionState::new()),
                snapshots,
                epoch: AtomicU64::new(0),
                lifecycle: AsyncMutex::new(()),
            }),
        })
    }

    /// Orchestrateur sur WebSocket et périphériques audio par défaut
    pub fn with_system_devices(config: ConversationConfig) -> ConversationResult<Self> {
        Self::new(
            config,
            Arc::new(WsConnector),
            Arc::new(CpalMicrophone::new()),
            Arc::new(CpalSpeaker::new()),
        )
    }

    /// Ouvre une session vers `address`
    ///
    /// Une session déjà ouverte est d'abord déconnectée. La liste des
    /// messages est vidée et ne contient que le statut "Connecting…"
    /// jusqu'à la réponse du backend.
    ///
    /// # Erreurs
    /// - `NetworkError::InvalidAddress` : adresse rejetée, aucune tentative
    /// - `NetworkError::ConnectError` : handshake en échec
    ///
    /// Dans les deux cas un message de statut décrit l'échec et la session
    /// reste `Disconnected`.
    pub async fn connect(&self, address: &str) -> ConversationResult<()> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;

        if inner.state.lock().status() != ConnectionStatus::Disconnected
            || inner.channel.state() != ChannelState::Disconnected
        {
            inner.disconnect_locked().await;
        }

        inner.update(|state| {
            state.begin_connect(&inner.config.status.connecting);
        });

        let endpoint = match inner.channel.connect(address).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                let text = match &e {
                    NetworkError::InvalidAddress { .. } => &inner.config.status.invalid_address,
                    _ => &inner.config.status.connection_failed,
                };
                inner.update(|state| state.connect_failed(text));
                return Err(e.into());
            }
        };

        let inbound = match inner.channel.receive() {
            Ok(inbound) => inbound,
            Err(e) => {
                inner.channel.close();
                inner.update(|state| state.connect_failed(&inner.config.status.connection_failed));
                return Err(e.into());
            }
        };

        if let Err(e) = inner.playback.init(inner.config.audio.sample_rate).await {
            warn!(error = %e, "lecture audio indisponible, l'audio de l'assistant sera ignoré");
        }

        let epoch = {
            let mut state = inner.state.lock();
            let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            state.connection_opened();
            inner.publish(&state);
            epoch
        };

        tokio::spawn(receive_loop(Arc::downgrade(inner), inbound, epoch));

        info!(endpoint = %endpoint, epoch, "session connectée");
        Ok(())
    }

    /// Ferme la session
    ///
    /// Arrête l'enregistrement, vide et ferme la lecture, ferme le canal et
    /// vide la liste des messages. Sans effet sur une session déjà fermée.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.disconnect_locked().await;
    }

    /// Envoie un message texte
    ///
    /// Sans effet si le texte est vide après `trim()` ou si la session n'est
    /// pas connectée. Le message apparaît localement avant l'envoi et n'est
    /// pas retiré si l'envoi échoue.
    ///
    /// # Erreurs
    /// - `NetworkError::SendError` : un statut d'erreur est ajouté, la session reste ouverte
    pub async fn send_text(&self, text: &str) -> ConversationResult<()> {
        let inner = &self.inner;
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        {
            let mut state = inner.state.lock();
            if !state.status().is_connected() {
                debug!("envoi ignoré : session non connectée");
                return Ok(());
            }
            state.add_user_text(text);
            inner.publish(&state);
        }

        let result = match ClientMessage::user_message(text).to_frame() {
            Ok(frame) => inner.channel.send(frame).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(error = %e, "envoi du message impossible");
            inner.update(|state| {
                // Une déconnexion pendant l'envoi a déjà vidé la session
                if state.status().is_connected() {
                    state.report_error(&inner.config.status.send_failed);
                }
            });
            return Err(e.into());
        }
        Ok(())
    }

    /// Démarre ou arrête l'enregistrement
    ///
    /// Retourne le nouvel état (`true` = enregistrement en cours).
    ///
    /// # Erreurs
    /// - `ConversationError::NotConnected` : refusé hors session
    /// - `AudioError::MediaAcquisition` : microphone indisponible ; l'enregistrement
    ///   reste arrêté et la connexion n'est pas touchée
    pub async fn toggle_recording(&self) -> ConversationResult<bool> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;

        if !inner.state.lock().status().is_connected() {
            return Err(ConversationError::NotConnected);
        }

        let mut capture = inner.capture.lock().await;

        if capture.is_active() {
            let stalled = inner.stop_capture(&mut capture).await;
            inner.update(|state| {
                state.set_recording(false);
                if stalled {
                    state.set_last_error(&inner.config.status.connection_lost);
                }
            });
            info!("enregistrement arrêté");
            return Ok(false);
        }

        let started = match inner.channel.sender() {
            Ok(sender) => capture
                .start(Box::new(ChannelSink::new(sender)))
                .await
                .map_err(ConversationError::from),
            Err(e) => Err(e.into()),
        };

        match started {
            Ok(()) => {
                inner.update(|state| state.set_recording(true));
                info!("enregistrement démarré");
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "impossible de démarrer l'enregistrement");
                inner.update(|state| {
                    state.set_recording(false);
                    state.report_error(&inner.config.status.recording_failed);
                });
                Err(e)
            }
        }
    }

    /// Abonnement aux changements de la session
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.lock().snapshot()
    }

    /// Messages dans l'ordre d'affichage
    pub fn messages(&self) -> Vec<Message> {
        self.inner.state.lock().messages().to_vec()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status()
    }

    pub fn is_recording(&self) -> bool {
        self.inner.state.lock().is_recording()
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.inner.state.lock().metrics()
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.inner.config
    }

    /// Échantillons de l'assistant en attente de rendu
    pub fn playback_buffered(&self) -> usize {
        self.inner.playback.buffered()
    }

    pub fn playback_stats(&self) -> PlaybackStats {
        self.inner.playback.stats()
    }

    pub async fn capture_stats(&self) -> CaptureStats {
        self.inner.capture.lock().await.stats()
    }

    /// Statistiques de la connexion courante
    pub fn channel_stats(&self) -> Option<ChannelStats> {
        self.inner.channel.stats()
    }
}

impl Inner {
    /// Applique une mutation puis publie le nouvel état
    fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut SessionState),
    {
        let mut state = self.state.lock();
        mutate(&mut state);
        self.publish(&state);
    }

    fn publish(&self, state: &SessionState) {
        self.snapshots.send_replace(state.snapshot());
    }

    /// Déconnexion, verrou `lifecycle` déjà pris par l'appelant
    async fn disconnect_locked(&self) {
        {
            let _state = self.state.lock();
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }

        // Le marqueur de fin d'énoncé est remis au canal avant sa fermeture
        {
            let mut capture = self.capture.lock().await;
            self.stop_capture(&mut capture).await;
        }

        self.playback.clear();
        self.playback.stop().await;
        self.channel.close();

        let was_active = {
            let mut state = self.state.lock();
            let was_active = state.status() != ConnectionStatus::Disconnected;
            state.reset();
            self.publish(&state);
            was_active
        };

        if was_active {
            info!("session déconnectée");
        }
    }

    /// Arrête la capture sans dépendre d'un backend qui ne lit plus
    ///
    /// Si le transfert des dernières frames reste bloqué au-delà du délai de
    /// fermeture du canal, le canal est fermé : les envois en attente
    /// échouent et l'arrêt se termine. Retourne `true` dans ce cas.
    async fn stop_capture(&self, capture: &mut CapturePipeline) -> bool {
        let stop = capture.stop();
        tokio::pin!(stop);

        if timeout(self.config.channel.close_timeout(), &mut stop).await.is_ok() {
            return false;
        }

        warn!("le backend ne lit plus, fermeture du canal pour arrêter la capture");
        self.channel.close();
        stop.await;
        true
    }

    /// Déconnexion demandée par la boucle de réception
    async fn disconnect_if_current(&self, epoch: u64) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.epoch.load(Ordering::SeqCst) == epoch {
            self.disconnect_locked().await;
        }
    }

    /// Traite un message du backend ; `false` si la connexion n'est plus courante
    fn dispatch(&self, message: ServerMessage, epoch: u64) -> bool {
        let mut state = self.state.lock();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }

        match message {
            ServerMessage::TextDelta { id, delta } => {
                trace!(id = %id, len = delta.len(), "text_delta");
                state.apply_text_delta(&id, &delta);
            }
            ServerMessage::Transcription { id, text } => {
                trace!(id = %id, "transcription");
                state.apply_transcription(&id, &text);
            }
            ServerMessage::Control { action, greeting, id } => match action {
                ControlAction::Connected => {
                    let greeting = greeting
                        .filter(|g| !g.is_empty())
                        .unwrap_or_else(|| self.config.status.connected.clone());
                    state.apply_connected(&greeting);
                    info!("session prête");
                }
                ControlAction::SpeechStarted => {
                    // Barge-in : plus rien de l'assistant ne doit être entendu
                    self.playback.clear();
                    let id = state.begin_user_speech();
                    debug!(id = %id, "début d'énoncé");
                }
                ControlAction::TextDone | ControlAction::AudioDone => {
                    debug!(?action, id = ?id, "fin de tour");
                    state.end_turn();
                }
            },
        }

        self.publish(&state);
        true
    }

    /// Met l'audio de l'assistant en lecture ; `false` si la connexion n'est plus courante
    fn play_audio(&self, bytes: &[u8], sequence: u64, epoch: u64) -> bool {
        let _state = self.state.lock();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }

        match AudioFrame::from_le_bytes(bytes, self.config.audio.sample_rate, sequence) {
            Ok(frame) => {
                if let Err(e) = self.playback.play(&frame) {
                    trace!(error = %e, "audio de l'assistant ignoré");
                }
            }
            Err(e) => warn!(error = %e, "frame audio invalide ignorée"),
        }
        true
    }
}

/// Boucle de réception d'une connexion
///
/// Ne garde qu'une référence faible : abandonner l'orchestrateur ferme le
/// canal, ce qui termine la boucle.
async fn receive_loop(inner: Weak<Inner>, mut inbound: FrameReceiver, epoch: u64) {
    let mut sequence = 0u64;

    while let Some(item) = inbound.next().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };

        let current = match item {
            Ok(Frame::Text(text)) => match ServerMessage::parse(&text) {
                Ok(message) => inner.dispatch(message, epoch),
                Err(e) => {
                    warn!(error = %e, "frame de protocole ignorée");
                    true
                }
            },
            Ok(Frame::Binary(bytes)) => {
                sequence += 1;
                inner.play_audio(&bytes, sequence, epoch)
            }
            Err(e) => {
                warn!(error = %e, "connexion perdue");
                {
                    let mut state = inner.state.lock();
                    if inner.epoch.load(Ordering::SeqCst) == epoch {
                        state.set_last_error(&inner.config.status.connection_lost);
                        inner.publish(&state);
                    }
                }
                inner.disconnect_if_current(epoch).await;
                return;
            }
        };

        if !current {
            debug!(epoch, "boucle de réception d'une connexion fermée");
            return;
        }
    }

    // Fermeture propre par le pair, ou fermeture locale
    if let Some(inner) = inner.upgrade() {
        inner.disconnect_if_current(epoch).await;
    }
    debug!(epoch, "boucle de réception terminée");
}
