//! Pipelines audio de la session
//!
//! - `CapturePipeline` : micro → channel borné → `FrameSink`
//! - `PlaybackPipeline` : `play()` → file de lecture → haut-parleurs
//!
//! ```text
//! Microphone → [FrameChunker] ══ mpsc borné ══> [tâche de transfert] → FrameSink
//!
//! play(frame) → [PlaybackQueue] ← callback du périphérique → Haut-parleurs
//! ```
//!
//! Le producteur (callback du micro) et le consommateur (sink) sont découplés
//! par le channel : le sink peut attendre le réseau sans bloquer le micro.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::{
    AudioConfig, AudioError, AudioFrame, AudioOutput, AudioResult, CaptureStats, DeviceHandle, FrameChunker,
    FrameSink, MicSource, PlaybackQueue, PlaybackStats,
};

/// Capture active : le périphérique acquis et la tâche qui alimente le sink
struct ActiveCapture {
    device: Box<dyn DeviceHandle>,
    stop_tx: oneshot::Sender<()>,
    forwarder: JoinHandle<()>,
}

/// Pipeline de capture
///
/// Invoque `FrameSink::accept` une fois par frame capturée, dans l'ordre de
/// capture, entre `start()` et `stop()`.
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use audio::{AudioConfig, CapturePipeline, CpalMicrophone};
///
/// # async fn example(sink: Box<dyn audio::FrameSink>) -> audio::AudioResult<()> {
/// let mut capture = CapturePipeline::new(AudioConfig::default(), Arc::new(CpalMicrophone::new()))?;
/// capture.start(sink).await?;
/// // ...
/// capture.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct CapturePipeline {
    config: AudioConfig,
    source: Arc<dyn MicSource>,
    active: Option<ActiveCapture>,
    dropped: Arc<AtomicU64>,
    forwarded: Arc<AtomicU64>,
    sink_errors: Arc<AtomicU64>,
}

impl CapturePipeline {
    /// Crée un pipeline inactif
    ///
    /// # Erreurs
    /// - `AudioError::ConfigError` si la configuration est invalide
    pub fn new(config: AudioConfig, source: Arc<dyn MicSource>) -> AudioResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            active: None,
            dropped: Arc::new(AtomicU64::new(0)),
            forwarded: Arc::new(AtomicU64::new(0)),
            sink_errors: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Acquiert le microphone et commence à alimenter `sink`
    ///
    /// Sans effet si la capture est déjà active : le microphone n'est jamais
    /// acquis deux fois et le nouveau sink est ignoré.
    ///
    /// # Erreurs
    /// - `AudioError::MediaAcquisition` : microphone indisponible ; la capture reste inactive
    pub async fn start(&mut self, sink: Box<dyn FrameSink>) -> AudioResult<()> {
        if self.active.is_some() {
            debug!("capture déjà active");
            return Ok(());
        }

        let (frame_tx, frame_rx) = mpsc::channel(self.config.capture_queue_frames);
        let chunker = FrameChunker::new(&self.config, frame_tx, Arc::clone(&self.dropped));

        let device = self
            .source
            .acquire(&self.config, chunker)
            .await
            .map_err(AudioError::into_acquisition)?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let forwarder = tokio::spawn(forward_frames(
            frame_rx,
            stop_rx,
            sink,
            self.config.end_of_stream_marker,
            Arc::clone(&self.forwarded),
            Arc::clone(&self.sink_errors),
        ));

        self.active = Some(ActiveCapture {
            device,
            stop_tx,
            forwarder,
        });

        info!(device = %self.source.name(), "capture démarrée");
        Ok(())
    }

    /// Libère le microphone
    ///
    /// Quand cette fonction retourne, le sink ne sera plus jamais appelé.
    /// Les frames déjà capturées sont encore transmises avant l'arrêt.
    /// Sans effet si la capture n'est pas active.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        // Plus aucun échantillon après la fermeture du périphérique
        active.device.close().await;

        let _ = active.stop_tx.send(());
        if let Err(e) = active.forwarder.await {
            warn!(error = %e, "la tâche de capture s'est terminée anormalement");
        }

        info!(frames = self.forwarded.load(Ordering::Relaxed), "capture arrêtée");
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_forwarded: self.forwarded.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
        }
    }
}

/// Tâche de transfert channel → sink
async fn forward_frames(
    mut frames: mpsc::Receiver<AudioFrame>,
    mut stop_rx: oneshot::Receiver<()>,
    mut sink: Box<dyn FrameSink>,
    end_of_stream_marker: bool,
    forwarded: Arc<AtomicU64>,
    sink_errors: Arc<AtomicU64>,
) {
    let deliver = |result: AudioResult<()>, sequence: u64| match result {
        Ok(()) => {
            forwarded.fetch_add(1, Ordering::Relaxed);
            trace!(sequence, "frame transmise");
        }
        Err(e) => {
            // Seul le premier échec est journalisé
            if sink_errors.fetch_add(1, Ordering::Relaxed) == 0 {
                warn!(error = %e, "le consommateur refuse les frames capturées");
            }
        }
    };

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            frame = frames.recv() => match frame {
                Some(frame) => {
                    let sequence = frame.sequence_number;
                    deliver(sink.accept(frame).await, sequence);
                }
                // Le périphérique a disparu : on attend quand même l'ordre d'arrêt
                None => {
                    let _ = (&mut stop_rx).await;
                    break;
                }
            },
        }
    }

    frames.close();
    while let Some(frame) = frames.recv().await {
        let sequence = frame.sequence_number;
        deliver(sink.accept(frame).await, sequence);
    }

    if end_of_stream_marker {
        if let Err(e) = sink.finish().await {
            warn!(error = %e, "impossible d'envoyer le marqueur de fin de flux");
        }
    }
}

/// Sortie ouverte par le pipeline de lecture
struct ActiveOutput {
    sample_rate: u32,
    device: Box<dyn DeviceHandle>,
}

/// Pipeline de lecture
///
/// `play()` ne bloque jamais sur le périphérique : les échantillons sont
/// ajoutés à la file et rendus en continu, dans l'ordre d'arrivée.
/// `clear()` est le mécanisme de barge-in.
pub struct PlaybackPipeline {
    output: Arc<dyn AudioOutput>,
    queue: PlaybackQueue,
    active: Mutex<Option<ActiveOutput>>,
    /// Fréquence de la sortie ouverte, 0 tant que `init()` n'a pas réussi
    sample_rate: AtomicU32,
}

impl PlaybackPipeline {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            output,
            queue: PlaybackQueue::new(),
            active: Mutex::new(None),
            sample_rate: AtomicU32::new(0),
        }
    }

    /// Ouvre la sortie à la fréquence donnée
    ///
    /// Sans effet si la sortie est déjà ouverte à cette fréquence ; une autre
    /// fréquence ferme la sortie courante et en ouvre une nouvelle.
    pub async fn init(&self, sample_rate: u32) -> AudioResult<()> {
        if sample_rate == 0 {
            return Err(AudioError::ConfigError("Sample rate nul".to_string()));
        }

        let mut active = self.active.lock().await;

        if let Some(current) = active.as_ref() {
            if current.sample_rate == sample_rate {
                return Ok(());
            }
        }

        if let Some(previous) = active.take() {
            self.sample_rate.store(0, Ordering::Release);
            previous.device.close().await;
        }

        let device = self.output.open(sample_rate, self.queue.clone()).await?;
        *active = Some(ActiveOutput { sample_rate, device });
        self.sample_rate.store(sample_rate, Ordering::Release);

        info!(sample_rate, device = %self.output.name(), "lecture initialisée");
        Ok(())
    }

    /// Met une frame en file de lecture
    ///
    /// # Erreurs
    /// - `AudioError::NotInitialized` si `init()` n'a pas réussi ; la frame est perdue
    pub fn play(&self, frame: &AudioFrame) -> AudioResult<()> {
        let sample_rate = self.sample_rate.load(Ordering::Acquire);
        if sample_rate == 0 {
            return Err(AudioError::NotInitialized);
        }

        if frame.sample_rate != sample_rate {
            debug!(
                frame_rate = frame.sample_rate,
                output_rate = sample_rate,
                "fréquence de frame différente de la sortie"
            );
        }

        let accepted = self.queue.push(&frame.samples);
        if accepted < frame.samples.len() {
            warn!(
                refused = frame.samples.len() - accepted,
                "file de lecture pleine, fin de frame perdue"
            );
        }
        Ok(())
    }

    /// Jette tout l'audio en attente
    ///
    /// Le prochain callback du périphérique ne joue que du silence,
    /// jusqu'au prochain `play()`.
    pub fn clear(&self) {
        let discarded = self.queue.clear();
        if discarded > 0 {
            debug!(discarded, "file de lecture vidée");
        }
    }

    /// Vide la file et ferme la sortie
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        self.sample_rate.store(0, Ordering::Release);
        self.queue.clear();

        if let Some(current) = active.take() {
            current.device.close().await;
            info!("lecture arrêtée");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.sample_rate.load(Ordering::Acquire) != 0
    }

    /// Nombre d'échantillons en attente de rendu
    pub fn buffered(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.queue.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockMicrophone, MockSpeaker, RecordingSink};
    use std::time::Duration;
    use tokio::time::timeout;

    fn capture_with(mic: &Arc<MockMicrophone>, config: AudioConfig) -> CapturePipeline {
        CapturePipeline::new(config, mic.clone() as Arc<dyn MicSource>).unwrap()
    }

    #[tokio::test]
    async fn test_capture_forwards_frames_in_order() {
        let mic = Arc::new(MockMicrophone::new());
        let mut capture = capture_with(&mic, AudioConfig::test_config());
        let (sink, log) = RecordingSink::new();

        capture.start(Box::new(sink)).await.unwrap();
        assert!(capture.is_active());

        mic.feed(&(0..240).collect::<Vec<i16>>());

        timeout(Duration::from_secs(2), log.wait_for_frames(3)).await.unwrap();
        capture.stop().await;

        let sequences: Vec<u64> = log.frames().iter().map(|f| f.sequence_number).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(log.frames()[2].samples[0], 160);
        assert_eq!(capture.stats().frames_forwarded, 3);
    }

    #[tokio::test]
    async fn test_start_twice_acquires_once() {
        let mic = Arc::new(MockMicrophone::new());
        let mut capture = capture_with(&mic, AudioConfig::test_config());

        capture.start(Box::new(RecordingSink::new().0)).await.unwrap();
        capture.start(Box::new(RecordingSink::new().0)).await.unwrap();
        assert_eq!(mic.acquisitions(), 1);

        capture.stop().await;
        capture.stop().await;
        assert_eq!(mic.releases(), 1);
        assert!(!capture.is_active());
    }

    #[tokio::test]
    async fn test_no_sink_calls_after_stop() {
        let mic = Arc::new(MockMicrophone::new());
        let mut capture = capture_with(&mic, AudioConfig::test_config());
        let (sink, log) = RecordingSink::new();

        capture.start(Box::new(sink)).await.unwrap();
        mic.feed(&[1; 80]);
        capture.stop().await;

        let delivered = log.frames().len();
        assert_eq!(delivered, 1); // la frame déjà capturée est transmise avant l'arrêt

        mic.feed(&[1; 800]);
        tokio::task::yield_now().await;
        assert_eq!(log.frames().len(), delivered);
    }

    #[tokio::test]
    async fn test_end_of_stream_marker() {
        let mic = Arc::new(MockMicrophone::new());
        let config = AudioConfig {
            end_of_stream_marker: true,
            ..AudioConfig::test_config()
        };
        let mut capture = capture_with(&mic, config);
        let (sink, log) = RecordingSink::new();

        capture.start(Box::new(sink)).await.unwrap();
        capture.stop().await;
        assert_eq!(log.finished(), 1);

        // Sans marqueur configuré
        let mut capture = capture_with(&mic, AudioConfig::test_config());
        let (sink, log) = RecordingSink::new();
        capture.start(Box::new(sink)).await.unwrap();
        capture.stop().await;
        assert_eq!(log.finished(), 0);
    }

    #[tokio::test]
    async fn test_acquisition_failure_leaves_capture_inactive() {
        let mic = Arc::new(MockMicrophone::new());
        mic.fail_next_acquire("permission refusée");
        let mut capture = capture_with(&mic, AudioConfig::test_config());

        let result = capture.start(Box::new(RecordingSink::new().0)).await;
        assert!(matches!(result, Err(AudioError::MediaAcquisition(_))));
        assert!(!capture.is_active());

        // L'échec n'est pas collant
        capture.start(Box::new(RecordingSink::new().0)).await.unwrap();
        assert!(capture.is_active());
        capture.stop().await;
    }

    #[tokio::test]
    async fn test_busy_microphone_is_rejected() {
        let mic = Arc::new(MockMicrophone::new());
        let mut first = capture_with(&mic, AudioConfig::test_config());
        let mut second = capture_with(&mic, AudioConfig::test_config());

        first.start(Box::new(RecordingSink::new().0)).await.unwrap();
        let result = second.start(Box::new(RecordingSink::new().0)).await;
        assert!(matches!(result, Err(AudioError::MediaAcquisition(_))));

        first.stop().await;
        second.start(Box::new(RecordingSink::new().0)).await.unwrap();
        second.stop().await;
    }

    #[tokio::test]
    async fn test_playback_requires_init() {
        let speaker = Arc::new(MockSpeaker::new());
        let playback = PlaybackPipeline::new(speaker.clone());

        let frame = AudioFrame::new(vec![1, 2, 3], 24_000, 0);
        assert!(matches!(playback.play(&frame), Err(AudioError::NotInitialized)));
        assert_eq!(playback.buffered(), 0);

        playback.init(24_000).await.unwrap();
        playback.play(&frame).unwrap();
        assert_eq!(playback.buffered(), 3);
    }

    #[tokio::test]
    async fn test_playback_init_is_idempotent() {
        let speaker = Arc::new(MockSpeaker::new());
        let playback = PlaybackPipeline::new(speaker.clone());

        playback.init(24_000).await.unwrap();
        playback.init(24_000).await.unwrap();
        assert_eq!(speaker.opens(), 1);

        // Une autre fréquence rouvre la sortie
        playback.init(16_000).await.unwrap();
        assert_eq!(speaker.opens(), 2);
        assert_eq!(speaker.closes(), 1);
    }

    #[tokio::test]
    async fn test_playback_order_and_clear() {
        let speaker = Arc::new(MockSpeaker::new());
        let playback = PlaybackPipeline::new(speaker.clone());
        playback.init(24_000).await.unwrap();

        playback.play(&AudioFrame::new(vec![1, 2], 24_000, 0)).unwrap();
        playback.play(&AudioFrame::new(vec![3, 4], 24_000, 1)).unwrap();
        assert_eq!(speaker.drain(3), vec![1, 2, 3]);

        playback.play(&AudioFrame::new(vec![5, 6, 7], 24_000, 2)).unwrap();
        playback.clear();
        assert_eq!(playback.buffered(), 0);
        assert_eq!(speaker.drain(2), vec![0, 0]); // silence après barge-in

        playback.play(&AudioFrame::new(vec![9], 24_000, 3)).unwrap();
        assert_eq!(speaker.drain(1), vec![9]);
    }

    #[tokio::test]
    async fn test_playback_stop_releases_output() {
        let speaker = Arc::new(MockSpeaker::new());
        let playback = PlaybackPipeline::new(speaker.clone());
        playback.init(24_000).await.unwrap();
        playback.play(&AudioFrame::new(vec![1; 10], 24_000, 0)).unwrap();

        playback.stop().await;
        playback.stop().await;
        assert!(!playback.is_initialized());
        assert_eq!(playback.buffered(), 0);
        assert_eq!(speaker.closes(), 1);
    }
}
