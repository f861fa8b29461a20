//! Protocole JSON transporté dans les frames texte
//!
//! Chaque message est un objet avec un champ `type`. Les variantes sont
//! fermées : un `type` ou une `action` inconnus donnent une
//! `NetworkError::ProtocolError`, jamais un message ignoré silencieusement.
//!
//! ```text
//! backend → client : text_delta | transcription | control
//! client → backend : user_message | control (fin d'énoncé)
//! ```

use serde::{Deserialize, Serialize};

use crate::{Frame, NetworkError, NetworkResult};

/// Actions de contrôle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    /// La session est prête (accompagnée d'un message d'accueil optionnel)
    Connected,
    /// L'utilisateur commence à parler : l'audio de l'assistant doit être coupé
    SpeechStarted,
    TextDone,
    AudioDone,
}

/// Messages reçus du backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Fragment de texte de l'assistant, à concaténer
    TextDelta { id: String, delta: String },

    /// Transcription complète (jusqu'ici) de ce que dit l'utilisateur
    Transcription { id: String, text: String },

    Control {
        action: ControlAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        greeting: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl ServerMessage {
    /// Parse une frame texte entrante
    ///
    /// # Erreurs
    /// - `NetworkError::ProtocolError` : JSON invalide, champ manquant, variante inconnue
    pub fn parse(text: &str) -> NetworkResult<Self> {
        serde_json::from_str(text).map_err(NetworkError::from)
    }

    /// Sérialise le message (utilisé par les backends de test)
    pub fn to_frame(&self) -> NetworkResult<Frame> {
        Ok(Frame::Text(serde_json::to_string(self)?))
    }
}

/// Messages envoyés au backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Texte saisi par l'utilisateur
    UserMessage { text: String },

    /// Contrôle émis par le client (marqueur de fin d'énoncé)
    Control { action: ControlAction },
}

impl ClientMessage {
    pub fn user_message(text: impl Into<String>) -> Self {
        ClientMessage::UserMessage { text: text.into() }
    }

    /// Marqueur de fin de flux audio
    pub fn end_of_audio() -> Self {
        ClientMessage::Control {
            action: ControlAction::AudioDone,
        }
    }

    /// Encode le message dans une frame texte
    pub fn to_frame(&self) -> NetworkResult<Frame> {
        Ok(Frame::Text(serde_json::to_string(self)?))
    }

    /// Parse une frame texte sortante (utilisé par les backends de test)
    pub fn parse(text: &str) -> NetworkResult<Self> {
        serde_json::from_str(text).map_err(NetworkError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_text_delta() {
        let msg = ServerMessage::parse(r#"{"type":"text_delta","id":"item_1-0","delta":"Hi"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::TextDelta {
                id: "item_1-0".to_string(),
                delta: "Hi".to_string()
            }
        );
    }

    #[test]
    fn test_parse_control_variants() {
        let msg = ServerMessage::parse(r#"{"type":"control","action":"connected","greeting":"Hello!"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Control {
                action: ControlAction::Connected,
                greeting: Some("Hello!".to_string()),
                id: None
            }
        );

        let msg = ServerMessage::parse(r#"{"type":"control","action":"speech_started"}"#).unwrap();
        assert!(matches!(
            msg,
            ServerMessage::Control {
                action: ControlAction::SpeechStarted,
                greeting: None,
                ..
            }
        ));

        // Le backend joint parfois l'id de l'élément terminé
        let msg = ServerMessage::parse(r#"{"type":"control","action":"text_done","id":"item_1"}"#).unwrap();
        assert!(matches!(
            msg,
            ServerMessage::Control { action: ControlAction::TextDone, id: Some(ref id), .. } if id == "item_1"
        ));
    }

    #[test]
    fn test_unknown_variants_are_protocol_errors() {
        for raw in [
            r#"{"type":"mystery","id":"1"}"#,
            r#"{"type":"control","action":"dance"}"#,
            r#"{"type":"text_delta","id":"1"}"#,
            r#"{"id":"1","delta":"x"}"#,
            "not json",
        ] {
            let err = ServerMessage::parse(raw).unwrap_err();
            assert!(err.is_protocol(), "{} -> {:?}", raw, err);
        }
    }

    #[test]
    fn test_client_message_wire_format() {
        let Frame::Text(text) = ClientMessage::user_message("bonjour").to_frame().unwrap() else {
            panic!("frame texte attendue");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "user_message", "text": "bonjour"}));

        let Frame::Text(text) = ClientMessage::end_of_audio().to_frame().unwrap() else {
            panic!("frame texte attendue");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "control", "action": "audio_done"}));
    }

    #[test]
    fn test_server_message_serialization_omits_empty_fields() {
        let msg = ServerMessage::Control {
            action: ControlAction::AudioDone,
            greeting: None,
            id: None,
        };
        let Frame::Text(text) = msg.to_frame().unwrap() else {
            panic!("frame texte attendue");
        };
        assert_eq!(text, r#"{"type":"control","action":"audio_done"}"#);
    }
}
