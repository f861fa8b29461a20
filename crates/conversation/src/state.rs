//! État de session
//!
//! Objet explicite possédé par l'orchestrateur : tous les handlers du
//! protocole le reçoivent en paramètre, rien n'est global. Les méthodes sont
//! synchrones et sans effet de bord hors de l'état lui-même, ce qui permet
//! de les tester sans transport ni audio.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{Message, MessageSet, Role, SessionMetrics};

/// Contenu provisoire du message utilisateur en cours de dictée
pub const SPEECH_PLACEHOLDER: &str = "...";

/// État de la connexion vu par l'interface
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Disconnected => "Déconnecté",
            ConnectionStatus::Connecting => "Connexion",
            ConnectionStatus::Connected => "Connecté",
        };
        f.write_str(label)
    }
}

/// Vue publiée à l'interface après chaque mutation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    /// `connected` reçu du backend
    pub ready: bool,
    pub recording: bool,
    pub messages: Vec<Message>,
    pub last_error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            ready: false,
            recording: false,
            messages: Vec::new(),
            last_error: None,
        }
    }
}

/// État mutable d'une session
#[derive(Debug)]
pub struct SessionState {
    messages: MessageSet,
    status: ConnectionStatus,
    ready: bool,
    recording: bool,
    /// Message de statut "Connecting…" en attente de `connected`
    pending_status: Option<String>,
    /// Message utilisateur ciblé par les transcriptions
    active_user_message: Option<String>,
    last_error: Option<String>,
    started_at: Instant,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            messages: MessageSet::new(),
            status: ConnectionStatus::Disconnected,
            ready: false,
            recording: false,
            pending_status: None,
            active_user_message: None,
            last_error: None,
            started_at: Instant::now(),
        }
    }

    /// Début de connexion : liste vidée, un seul message de statut
    pub fn begin_connect(&mut self, connecting_text: &str) -> String {
        self.reset();
        self.last_error = None;
        self.status = ConnectionStatus::Connecting;

        let id = self.add_status(connecting_text);
        self.pending_status = Some(id.clone());
        id
    }

    /// Le canal est ouvert ; `ready` attend le `connected` du backend
    pub fn connection_opened(&mut self) {
        self.status = ConnectionStatus::Connected;
        self.started_at = Instant::now();
    }

    /// Échec de connexion : le statut en attente est remplacé sur place
    pub fn connect_failed(&mut self, text: &str) {
        match self.pending_status.take() {
            Some(id) if self.messages.replace(&id, text) => {}
            _ => {
                self.add_status(text);
            }
        }
        self.status = ConnectionStatus::Disconnected;
        self.ready = false;
        self.last_error = Some(text.to_string());
    }

    /// `text_delta` : concaténation, ou nouveau message assistant
    pub fn apply_text_delta(&mut self, id: &str, delta: &str) {
        if !self.messages.append(id, delta) {
            self.messages.insert(Message::new(id, Role::Assistant, delta));
        }
    }

    /// `transcription` : remplace le contenu du message utilisateur actif
    ///
    /// L'id transmis par le backend n'est pas celui du message local : seul
    /// le message actif est visé. Sans message actif, rien n'est modifié.
    pub fn apply_transcription(&mut self, id: &str, text: &str) -> bool {
        let Some(active) = self.active_user_message.as_deref() else {
            debug!(id, "transcription hors énoncé ignorée");
            return false;
        };
        if active != id {
            debug!(backend_id = id, local_id = active, "transcription appliquée au message actif");
        }
        self.messages.replace(active, text)
    }

    /// `connected` : le statut "Connecting…" devient le message d'accueil
    pub fn apply_connected(&mut self, greeting: &str) {
        match self.pending_status.take() {
            Some(id) if self.messages.replace(&id, greeting) => {}
            _ => {
                self.add_status(greeting);
            }
        }
        self.ready = true;
    }

    /// `speech_started` : nouveau message utilisateur provisoire
    ///
    /// L'appelant doit avoir vidé la lecture avant.
    pub fn begin_user_speech(&mut self) -> String {
        let id = format!("user-{}", Uuid::new_v4());
        self.messages.insert(Message::new(id.clone(), Role::User, SPEECH_PLACEHOLDER));
        self.active_user_message = Some(id.clone());
        id
    }

    /// `text_done` / `audio_done` : fin du tour
    pub fn end_turn(&mut self) {
        self.active_user_message = None;
    }

    /// Message saisi par l'utilisateur (ajout optimiste)
    pub fn add_user_text(&mut self, text: &str) -> String {
        let id = format!("user-{}", Uuid::new_v4());
        self.messages.insert(Message::new(id.clone(), Role::User, text));
        id
    }

    pub fn add_status(&mut self, text: &str) -> String {
        let id = format!("status-{}", Uuid::new_v4());
        self.messages.insert(Message::new(id.clone(), Role::Status, text));
        id
    }

    /// Erreur visible : message de statut et `last_error`
    pub fn report_error(&mut self, text: &str) {
        self.add_status(text);
        self.last_error = Some(text.to_string());
    }

    pub fn set_last_error(&mut self, text: &str) {
        self.last_error = Some(text.to_string());
    }

    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    /// Retour à `Disconnected`, liste vidée ; `last_error` est conservé
    pub fn reset(&mut self) {
        self.messages.clear();
        self.status = ConnectionStatus::Disconnected;
        self.ready = false;
        self.recording = false;
        self.pending_status = None;
        self.active_user_message = None;
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn active_user_message(&self) -> Option<&str> {
        self.active_user_message.as_deref()
    }

    pub fn messages(&self) -> &MessageSet {
        &self.messages
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn metrics(&self) -> SessionMetrics {
        SessionMetrics::compute(&self.messages, self.started_at)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            ready: self.ready,
            recording: self.recording,
            messages: self.messages.to_vec(),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(state: &SessionState) -> Vec<String> {
        state.messages().iter().map(|m| m.content.clone()).collect()
    }

    #[test]
    fn test_deltas_concatenate_without_separator() {
        let mut state = SessionState::new();
        state.apply_text_delta("item_1", "Hi");
        state.apply_text_delta("item_1", "there");
        state.apply_text_delta("item_2", "!");

        assert_eq!(contents(&state), vec!["Hithere", "!"]);
        assert_eq!(state.messages().get("item_1").unwrap().role, Role::Assistant);
    }

    #[test]
    fn test_greeting_replaces_connecting_status_in_place() {
        let mut state = SessionState::new();
        let id = state.begin_connect("Connecting…");
        state.connection_opened();
        state.apply_connected("Hello!");

        assert_eq!(state.messages().len(), 1);
        let message = state.messages().get(&id).unwrap();
        assert_eq!(message.content, "Hello!");
        assert_eq!(message.role, Role::Status);
        assert_eq!(state.messages().position(&id), Some(0));
        assert!(state.is_ready());
    }

    #[test]
    fn test_transcription_replaces_active_message_only() {
        let mut state = SessionState::new();

        // Aucun énoncé actif
        assert!(!state.apply_transcription("x", "perdu"));
        assert!(state.messages().is_empty());

        let id = state.begin_user_speech();
        assert_eq!(state.messages().get(&id).unwrap().content, SPEECH_PLACEHOLDER);

        assert!(state.apply_transcription("backend-id", "what is"));
        assert!(state.apply_transcription("backend-id", "what is fizzbuzz"));
        assert_eq!(state.messages().get(&id).unwrap().content, "what is fizzbuzz");

        state.end_turn();
        assert!(!state.apply_transcription("backend-id", "trop tard"));
        assert_eq!(state.messages().get(&id).unwrap().content, "what is fizzbuzz");
    }

    #[test]
    fn test_connect_failure_replaces_pending_status() {
        let mut state = SessionState::new();
        let id = state.begin_connect("Connecting…");
        state.connect_failed("Connection failed. Please check the endpoint and try again.");

        assert_eq!(state.messages().len(), 1);
        assert!(state.messages().get(&id).unwrap().content.starts_with("Connection failed"));
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
        assert!(state.last_error().is_some());
    }

    #[test]
    fn test_reset_keeps_last_error() {
        let mut state = SessionState::new();
        state.begin_connect("Connecting…");
        state.connection_opened();
        state.set_recording(true);
        state.set_last_error("Connection lost. Please reconnect.");

        state.reset();
        let snapshot = state.snapshot();
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
        assert!(!snapshot.recording);
        assert_eq!(snapshot.last_error.as_deref(), Some("Connection lost. Please reconnect."));

        // Un nouveau connect efface l'erreur
        state.begin_connect("Connecting…");
        assert!(state.last_error().is_none());
    }
}
