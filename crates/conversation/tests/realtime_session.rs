//! Session complète contre un vrai serveur WebSocket local

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_test::assert_ok;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use audio::mock::{MockMicrophone, MockSpeaker};
use audio::AudioConfig;
use conversation::{ConnectionStatus, ConversationConfig, Orchestrator, Role, SessionSnapshot};
use network::{ClientMessage, WsConnector};

const WAIT: Duration = Duration::from_secs(5);

fn orchestrator(mic: Arc<MockMicrophone>) -> Orchestrator {
    orchestrator_with(ConversationConfig::test_config(), mic)
}

fn orchestrator_with(config: ConversationConfig, mic: Arc<MockMicrophone>) -> Orchestrator {
    Orchestrator::new(config, Arc::new(WsConnector), mic, Arc::new(MockSpeaker::new())).unwrap()
}

async fn wait_for<F>(orchestrator: &Orchestrator, mut predicate: F) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    let mut updates = orchestrator.subscribe();
    let snapshot = timeout(WAIT, updates.wait_for(|s| predicate(s)))
        .await
        .expect("délai dépassé")
        .expect("orchestrateur fermé");
    snapshot.clone()
}

async fn local_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Prochain message texte reçu par le serveur, en sautant l'audio
async fn next_client_text<S>(ws: &mut S) -> ClientMessage
where
    S: StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => return ClientMessage::parse(text.as_str()).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("message texte attendu, obtenu {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_full_session_over_websocket() {
    let (listener, addr) = local_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        ws.send(WsMessage::text(
            json!({"type": "control", "action": "connected", "greeting": "Hello!"}).to_string(),
        ))
        .await
        .unwrap();

        // Message texte de l'utilisateur
        assert_eq!(next_client_text(&mut ws).await, ClientMessage::user_message("hello"));

        for delta in ["Hi", "there"] {
            ws.send(WsMessage::text(
                json!({"type": "text_delta", "id": "item_1", "delta": delta}).to_string(),
            ))
            .await
            .unwrap();
        }
        ws.send(WsMessage::binary(vec![0u8; 320])).await.unwrap();

        // Énoncé vocal : audio binaire puis marqueur de fin
        let mut audio_bytes = 0;
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Binary(bytes))) => audio_bytes += bytes.len(),
                Some(Ok(WsMessage::Text(text))) => {
                    assert_eq!(ClientMessage::parse(text.as_str()).unwrap(), ClientMessage::end_of_audio());
                    break;
                }
                other => panic!("audio attendu, obtenu {:?}", other),
            }
        }

        ws.close(None).await.unwrap();
        audio_bytes
    });

    let mic = Arc::new(MockMicrophone::new());
    let orchestrator = orchestrator(mic.clone());
    assert_ok!(orchestrator.connect(&format!("ws://{}/realtime", addr)).await);

    let snapshot = wait_for(&orchestrator, |s| s.ready).await;
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].content, "Hello!");

    assert_ok!(orchestrator.send_text("hello").await);
    let snapshot = wait_for(&orchestrator, |s| {
        s.messages.iter().any(|m| m.role == Role::Assistant && m.content == "Hithere")
    })
    .await;
    assert_eq!(snapshot.messages.len(), 3);

    assert!(orchestrator.toggle_recording().await.unwrap());
    let samples_per_frame = orchestrator.config().audio.samples_per_frame();
    mic.feed(&vec![100i16; samples_per_frame * 3]);
    timeout(WAIT, async {
        while orchestrator.capture_stats().await.frames_forwarded < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("frames micro non transmises");
    assert!(!orchestrator.toggle_recording().await.unwrap());

    let audio_bytes = timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(audio_bytes, samples_per_frame * 3 * 2);

    // Le serveur ferme proprement : déconnexion sans erreur
    let snapshot = wait_for(&orchestrator, |s| s.status == ConnectionStatus::Disconnected).await;
    assert!(snapshot.messages.is_empty());
    assert!(snapshot.last_error.is_none());
}

#[tokio::test]
async fn test_abrupt_server_loss_surfaces_error() {
    let (listener, addr) = local_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(WsMessage::text(
            json!({"type": "control", "action": "connected"}).to_string(),
        ))
        .await
        .unwrap();
        // Fermeture TCP sans handshake de fermeture
        drop(ws);
    });

    let orchestrator = orchestrator(Arc::new(MockMicrophone::new()));
    assert_ok!(orchestrator.connect(&format!("ws://{}/realtime", addr)).await);
    server.await.unwrap();

    let snapshot = wait_for(&orchestrator, |s| {
        s.status == ConnectionStatus::Disconnected && s.last_error.is_some()
    })
    .await;
    assert_eq!(snapshot.last_error.as_deref(), Some("Connection lost. Please reconnect."));
    assert!(snapshot.messages.is_empty());
}

#[tokio::test]
async fn test_connect_refused_reports_failure() {
    // Port libéré aussitôt : plus rien n'y écoute
    let (listener, addr) = local_listener().await;
    drop(listener);

    let orchestrator = orchestrator(Arc::new(MockMicrophone::new()));
    let result = orchestrator.connect(&format!("ws://{}/realtime", addr)).await;
    assert!(result.is_err());

    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(
        snapshot.messages[0].content,
        "Connection failed. Please check the endpoint and try again."
    );
}

#[tokio::test]
async fn test_disconnect_flushes_frames_sent_before_it() {
    let (listener, addr) = local_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(WsMessage::text(
            json!({"type": "control", "action": "connected"}).to_string(),
        ))
        .await
        .unwrap();

        let mut texts = Vec::new();
        let mut audio_bytes = 0;
        while let Some(Ok(message)) = ws.next().await {
            match message {
                WsMessage::Text(text) => texts.push(ClientMessage::parse(text.as_str()).unwrap()),
                WsMessage::Binary(bytes) => audio_bytes += bytes.len(),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
        (texts, audio_bytes)
    });

    let mic = Arc::new(MockMicrophone::new());
    let orchestrator = orchestrator(mic.clone());
    assert_ok!(orchestrator.connect(&format!("ws://{}/realtime", addr)).await);
    wait_for(&orchestrator, |s| s.ready).await;

    assert!(orchestrator.toggle_recording().await.unwrap());
    let samples_per_frame = orchestrator.config().audio.samples_per_frame();
    mic.feed(&vec![100i16; samples_per_frame * 2]);
    timeout(WAIT, async {
        while orchestrator.capture_stats().await.frames_forwarded < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("frames micro non transmises");
    assert_ok!(orchestrator.send_text("à plus").await);

    // Déconnexion immédiate, enregistrement encore actif
    orchestrator.disconnect().await;

    let (texts, audio_bytes) = timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(audio_bytes, samples_per_frame * 2 * 2);
    assert_eq!(
        texts,
        vec![ClientMessage::user_message("à plus"), ClientMessage::end_of_audio()]
    );
}

#[tokio::test]
async fn test_disconnect_returns_while_backend_stops_reading() {
    let (listener, addr) = local_listener().await;

    // Le backend répond au handshake puis ne lit plus jamais
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(WsMessage::text(
            json!({"type": "control", "action": "connected"}).to_string(),
        ))
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    // Grandes frames pour saturer rapidement les tampons TCP
    let config = ConversationConfig {
        audio: AudioConfig {
            sample_rate: 48_000,
            frame_duration_ms: 100,
            ..ConversationConfig::test_config().audio
        },
        ..ConversationConfig::test_config()
    };
    let mic = Arc::new(MockMicrophone::new());
    let orchestrator = orchestrator_with(config, mic.clone());
    assert_ok!(orchestrator.connect(&format!("ws://{}/realtime", addr)).await);
    wait_for(&orchestrator, |s| s.ready).await;
    assert!(orchestrator.toggle_recording().await.unwrap());

    let frame = vec![100i16; orchestrator.config().audio.samples_per_frame()];
    timeout(WAIT, async {
        let mut last = u64::MAX;
        loop {
            for _ in 0..20 {
                mic.feed(&frame);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            let forwarded = orchestrator.capture_stats().await.frames_forwarded;
            if forwarded == last {
                break;
            }
            last = forwarded;
        }
    })
    .await
    .expect("le backend aurait dû saturer");

    timeout(WAIT, orchestrator.disconnect())
        .await
        .expect("disconnect() bloqué par un backend qui ne lit plus");

    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
    assert!(!snapshot.recording);
    assert!(!mic.is_acquired());

    server.abort();
}
