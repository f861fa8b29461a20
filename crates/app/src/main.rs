// Client terminal pour le backend conversationnel temps réel
//
// Se connecte au backend, affiche la conversation au fil de l'eau et lit
// des commandes sur l'entrée standard :
// - texte libre : envoyé comme message utilisateur
// - /rec : démarre ou arrête l'enregistrement
// - /stats : métriques de la session
// - /connect : nouvelle connexion après une déconnexion
// - /quit : déconnexion et sortie

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, warn};
use tracing_subscriber::filter::LevelFilter;

use audio::mock::DisabledDevice;
use conversation::{ConnectionStatus, ConversationConfig, Orchestrator, Role, SessionSnapshot};
use network::{utils, WsConnector, DEFAULT_ENDPOINT};

#[derive(Parser)]
#[command(author, version, about = "Client terminal pour la conversation temps réel")]
struct Cli {
    /// Adresse WebSocket du backend
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Logs détaillés sur stderr
    #[arg(short, long)]
    verbose: bool,

    /// Sans micro ni haut-parleurs (texte seulement)
    #[arg(long)]
    no_audio: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = ConversationConfig::default();
    let orchestrator = if cli.no_audio {
        Orchestrator::new(
            config,
            Arc::new(WsConnector),
            Arc::new(DisabledDevice),
            Arc::new(DisabledDevice),
        )?
    } else {
        Orchestrator::with_system_devices(config)?
    };

    println!("🎙️  Client conversation temps réel");
    println!("==================================");
    println!("📋 Commandes : /rec, /stats, /connect, /quit (Ctrl+C pour quitter)");

    let printer = tokio::spawn(print_updates(orchestrator.subscribe()));

    connect(&orchestrator, &cli.endpoint).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                println!("\n🛑 Arrêt demandé");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/quit" => break,
                    "/rec" => toggle_recording(&orchestrator).await,
                    "/stats" => print_stats(&orchestrator).await,
                    "/connect" => connect(&orchestrator, &cli.endpoint).await,
                    text => {
                        if let Err(e) = orchestrator.send_text(text).await {
                            debug!(error = %e, "envoi en échec");
                        }
                    }
                }
            }
        }
    }

    println!("🔌 Déconnexion...");
    orchestrator.disconnect().await;
    printer.abort();
    println!("👋 Au revoir !");

    Ok(())
}

/// Logs sur stderr pour ne pas mélanger avec la conversation
fn init_logging(verbose: bool) {
    let level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn connect(orchestrator: &Orchestrator, endpoint: &str) {
    println!("📡 Connexion à {}...", endpoint);
    if let Err(e) = orchestrator.connect(endpoint).await {
        // Le message de statut est déjà affiché par le printer
        warn!(error = %e, "connexion impossible");
    }
}

async fn toggle_recording(orchestrator: &Orchestrator) {
    match orchestrator.toggle_recording().await {
        Ok(true) => println!("🔴 Enregistrement... (/rec pour arrêter)"),
        Ok(false) => println!("⏹️  Enregistrement arrêté"),
        Err(e) => println!("❌ {}", e),
    }
}

async fn print_stats(orchestrator: &Orchestrator) {
    let metrics = orchestrator.metrics();
    println!("\n📊 Session");
    println!("   Temps passé : {}", metrics.time_spent());
    println!("   Messages : {}", metrics.total_messages);
    println!("   Utilisateur : {}", metrics.user_messages);
    println!("   Assistant : {}", metrics.assistant_messages);

    if let Some(stats) = orchestrator.channel_stats() {
        println!("📡 Connexion : {}", utils::summarize(&stats));
    }

    let capture = orchestrator.capture_stats().await;
    let playback = orchestrator.playback_stats();
    println!("🎤 Capture : {} frames envoyées, {} perdues", capture.frames_forwarded, capture.frames_dropped);
    println!(
        "🔊 Lecture : {} échantillons joués, {} coupés, {} sous-alimentations",
        playback.samples_rendered, playback.samples_discarded, playback.underruns
    );
}

/// Affiche la conversation à partir des snapshots publiés
async fn print_updates(mut updates: watch::Receiver<SessionSnapshot>) {
    let mut transcript = Transcript::default();
    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();
        transcript.render(&snapshot);
    }
}

/// Ce qui a déjà été affiché, pour n'imprimer que les nouveautés
#[derive(Default)]
struct Transcript {
    printed: HashMap<String, String>,
    /// Dernier message affiché, dont la ligne est encore ouverte
    open_line: Option<String>,
    status: Option<ConnectionStatus>,
    last_error: Option<String>,
}

impl Transcript {
    fn render(&mut self, snapshot: &SessionSnapshot) {
        if snapshot.messages.is_empty() {
            self.printed.clear();
        }

        for message in &snapshot.messages {
            let previous = self.printed.get(&message.id).cloned();
            match previous {
                Some(previous) if previous == message.content => continue,
                // Delta sur la ligne en cours : on complète la ligne
                Some(previous)
                    if self.open_line.as_deref() == Some(message.id.as_str())
                        && message.content.starts_with(&previous) =>
                {
                    print!("{}", &message.content[previous.len()..]);
                }
                Some(_) => {
                    self.close_line();
                    print!("   ↳ {}", message.content);
                }
                None => {
                    self.close_line();
                    print!("{} {}", icon(message.role), message.content);
                }
            }
            let _ = io::stdout().flush();
            self.open_line = Some(message.id.clone());
            self.printed.insert(message.id.clone(), message.content.clone());
        }

        if snapshot.last_error != self.last_error {
            if let Some(error) = &snapshot.last_error {
                self.close_line();
                println!("⚠️  {}", error);
            }
            self.last_error = snapshot.last_error.clone();
        }

        if self.status != Some(snapshot.status) {
            if snapshot.status == ConnectionStatus::Disconnected && self.status.is_some() {
                self.close_line();
                println!("🔌 Déconnecté (/connect pour se reconnecter)");
            }
            self.status = Some(snapshot.status);
        }
    }

    fn close_line(&mut self) {
        if self.open_line.take().is_some() {
            println!();
        }
    }
}

fn icon(role: Role) -> &'static str {
    match role {
        Role::User => "🧑",
        Role::Assistant => "🤖",
        Role::Status => "ℹ️ ",
    }
}
