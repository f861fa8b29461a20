// Vérification des périphériques audio
//
// Capture le microphone par le pipeline de capture et renvoie chaque frame
// vers le pipeline de lecture pendant quelques secondes.
// Attention au larsen : éloignez le micro des haut-parleurs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;

use audio::{
    AudioConfig, AudioFrame, AudioResult, CapturePipeline, CpalMicrophone, CpalSpeaker, FrameSink,
    PlaybackPipeline,
};

#[derive(Parser)]
#[command(author, version, about = "Test loopback micro → haut-parleurs")]
struct Cli {
    /// Durée du test en secondes
    #[arg(short, long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..=60))]
    seconds: u64,

    /// Frames de 10ms au lieu de 20ms
    #[arg(long)]
    low_latency: bool,

    #[arg(short, long)]
    verbose: bool,
}

/// Renvoie les frames capturées vers la lecture
struct LoopbackSink {
    playback: Arc<PlaybackPipeline>,
    voiced_frames: Arc<AtomicU64>,
}

#[async_trait]
impl FrameSink for LoopbackSink {
    async fn accept(&mut self, frame: AudioFrame) -> AudioResult<()> {
        if !frame.is_silence(0.01) {
            self.voiced_frames.fetch_add(1, Ordering::Relaxed);
        }
        self.playback.play(&frame)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = if cli.low_latency {
        AudioConfig::low_latency()
    } else {
        AudioConfig::default()
    };

    println!("🎤 Vérification audio");
    println!("=====================");
    println!(
        "   Entrée : {}",
        CpalMicrophone::default_device_name().unwrap_or_else(|| "aucune".to_string())
    );
    println!(
        "   Sortie : {}",
        CpalSpeaker::default_device_name().unwrap_or_else(|| "aucune".to_string())
    );
    println!(
        "   Format : PCM16 mono {} Hz, frames de {}ms ({} octets)",
        config.sample_rate,
        config.frame_duration_ms,
        config.frame_size_bytes()
    );

    let playback = Arc::new(PlaybackPipeline::new(Arc::new(CpalSpeaker::new())));
    playback
        .init(config.sample_rate)
        .await
        .context("ouverture des haut-parleurs")?;

    let mut capture = CapturePipeline::new(config, Arc::new(CpalMicrophone::new()))?;
    let voiced_frames = Arc::new(AtomicU64::new(0));
    capture
        .start(Box::new(LoopbackSink {
            playback: Arc::clone(&playback),
            voiced_frames: Arc::clone(&voiced_frames),
        }))
        .await
        .context("ouverture du microphone")?;

    println!("\n🚀 Loopback pendant {}s, parlez dans le microphone !", cli.seconds);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(cli.seconds)) => {}
        _ = signal::ctrl_c() => println!("\n🛑 Interrompu"),
    }

    capture.stop().await;
    // Laisse la file de lecture se vider
    tokio::time::sleep(Duration::from_millis(300)).await;
    playback.stop().await;

    let capture_stats = capture.stats();
    let playback_stats = playback.stats();
    info!(?capture_stats, ?playback_stats, "loopback terminé");

    println!("\n📊 Résultats :");
    println!("   📈 Frames capturées : {}", capture_stats.frames_forwarded);
    println!("   🗣️  Frames avec de la voix : {}", voiced_frames.load(Ordering::Relaxed));
    println!("   🔊 Échantillons joués : {}", playback_stats.samples_rendered);
    if capture_stats.frames_dropped > 0 {
        println!("   ⚠️  Frames perdues : {}", capture_stats.frames_dropped);
    }
    if playback_stats.underruns > 0 {
        println!("   ⚠️  Sous-alimentations : {}", playback_stats.underruns);
    }

    Ok(())
}
