//! Capture microphone
//!
//! - `FrameChunker` : découpe le flux d'échantillons du périphérique en
//!   frames de taille fixe et les pousse dans un channel borné
//! - `CpalMicrophone` : microphone par défaut du système via cpal
//!
//! # Architecture thread
//!
//! cpal appelle notre callback depuis un thread temps réel. Le callback ne
//! doit jamais bloquer : les frames sont envoyées avec `try_send`, et une
//! frame est perdue (et comptée) si le consommateur a pris trop de retard.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, SupportedStreamConfig, SupportedStreamConfigRange};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, info, trace};

use crate::codec;
use crate::device::{try_reserve, StreamThread};
use crate::{AudioConfig, AudioError, AudioFrame, AudioResult, DeviceHandle, MicSource, Sample};

/// Découpeur de frames côté producteur
///
/// Appartient au callback du périphérique. Accumule des échantillons mono
/// et émet une `AudioFrame` dès que `samples_per_frame` est atteint.
pub struct FrameChunker {
    buffer: Vec<Sample>,
    scratch: Vec<Sample>,
    mono: Vec<Sample>,
    samples_per_frame: usize,
    sample_rate: u32,
    next_sequence: u64,
    sender: mpsc::Sender<AudioFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameChunker {
    /// Crée un découpeur pour la configuration donnée
    ///
    /// # Arguments
    /// * `config` - fixe la taille des frames et leur fréquence
    /// * `sender` - extrémité productrice du channel borné de capture
    /// * `dropped` - compteur partagé des frames perdues
    pub fn new(config: &AudioConfig, sender: mpsc::Sender<AudioFrame>, dropped: Arc<AtomicU64>) -> Self {
        let samples_per_frame = config.samples_per_frame().max(1);
        Self {
            buffer: Vec::with_capacity(samples_per_frame),
            scratch: Vec::new(),
            mono: Vec::new(),
            samples_per_frame,
            sample_rate: config.sample_rate,
            next_sequence: 0,
            sender,
            dropped,
        }
    }

    /// Ajoute des échantillons mono
    pub fn push(&mut self, mut samples: &[Sample]) {
        while !samples.is_empty() {
            let room = self.samples_per_frame - self.buffer.len();
            let take = room.min(samples.len());
            self.buffer.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.buffer.len() == self.samples_per_frame {
                self.emit();
            }
        }
    }

    /// Ajoute des échantillons entrelacés d'un format natif quelconque
    ///
    /// Chaque échantillon passe par `convert`, puis le signal est réduit à un canal.
    pub fn push_converted<T: Copy>(&mut self, data: &[T], channels: usize, convert: impl Fn(T) -> Sample) {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        scratch.extend(data.iter().map(|&s| convert(s)));

        let mut mono = std::mem::take(&mut self.mono);
        mono.clear();
        codec::downmix_to_mono(&scratch, channels, &mut mono);
        self.push(&mono);

        self.scratch = scratch;
        self.mono = mono;
    }

    /// Le consommateur a-t-il fermé le channel ?
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Nombre de frames perdues faute de place dans le channel
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn emit(&mut self) {
        let samples = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.samples_per_frame));
        let frame = AudioFrame::new(samples, self.sample_rate, self.next_sequence);
        self.next_sequence += 1;

        match self.sender.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(sequence = frame.sequence_number, "file de capture pleine, frame perdue");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Microphone par défaut du système, via cpal
///
/// Un seul `acquire()` peut être actif à la fois : un second appel échoue
/// avec `AudioError::MediaAcquisition` au lieu d'attendre.
pub struct CpalMicrophone {
    in_use: Arc<AtomicBool>,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self {
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Nom du microphone par défaut, s'il existe
    pub fn default_device_name() -> Option<String> {
        cpal::default_host()
            .default_input_device()
            .and_then(|device| device.description().ok())
            .map(|desc| desc.name().to_string())
    }

    /// Construit le stream d'entrée (appelé depuis le thread du stream)
    fn build_stream(config: &AudioConfig, mut chunker: FrameChunker) -> AudioResult<cpal::Stream> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(AudioError::NoDeviceFound)?;

        let ranges = device
            .supported_input_configs()
            .map_err(|e| AudioError::ConfigError(format!("Impossible d'obtenir configs supportées: {}", e)))?;
        let supported = select_stream_config(ranges, config.sample_rate)?;

        let channels = supported.channels() as usize;
        let stream_config = supported.config();

        info!(
            sample_rate = config.sample_rate,
            channels,
            format = ?supported.sample_format(),
            samples_per_frame = config.samples_per_frame(),
            "démarrage de la capture"
        );

        let on_error = |err: cpal::StreamError| error!(%err, "erreur du stream de capture");

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    chunker.push_converted(data, channels, codec::f32_to_i16);
                },
                on_error,
                None,
            )?,
            SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    chunker.push_converted(data, channels, |s| s);
                },
                on_error,
                None,
            )?,
            SampleFormat::U16 => device.build_input_stream(
                &stream_config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    chunker.push_converted(data, channels, codec::u16_to_i16);
                },
                on_error,
                None,
            )?,
            other => {
                return Err(AudioError::ConfigError(format!(
                    "Format d'échantillon non supporté : {:?}",
                    other
                )))
            }
        };

        Ok(stream)
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MicSource for CpalMicrophone {
    async fn acquire(&self, config: &AudioConfig, chunker: FrameChunker) -> AudioResult<Box<dyn DeviceHandle>> {
        if !try_reserve(&self.in_use) {
            return Err(AudioError::MediaAcquisition("microphone déjà utilisé".to_string()));
        }

        if config.echo_cancellation {
            // cpal n'expose pas d'annulation d'écho : elle reste celle du système
            info!("annulation d'écho demandée, déléguée au périphérique");
        }

        let config = config.clone();
        let handle = StreamThread::spawn("capture", Arc::clone(&self.in_use), move || {
            Self::build_stream(&config, chunker)
        })
        .await?;

        Ok(Box::new(handle))
    }

    fn name(&self) -> String {
        Self::default_device_name().unwrap_or_else(|| "Périphérique inconnu".to_string())
    }
}

/// Choisit une configuration cpal qui accepte exactement `sample_rate`
///
/// Préfère le moins de canaux possible, puis i16 (aucune conversion), f32, u16.
pub(crate) fn select_stream_config<I>(ranges: I, sample_rate: u32) -> AudioResult<SupportedStreamConfig>
where
    I: Iterator<Item = SupportedStreamConfigRange>,
{
    let format_rank = |format: SampleFormat| match format {
        SampleFormat::I16 => 0,
        SampleFormat::F32 => 1,
        SampleFormat::U16 => 2,
        _ => 3,
    };

    ranges
        .filter(|range| range.min_sample_rate() <= sample_rate && sample_rate <= range.max_sample_rate())
        .filter(|range| format_rank(range.sample_format()) < 3)
        .min_by_key(|range| (range.channels(), format_rank(range.sample_format())))
        .map(|range| range.with_sample_rate(sample_rate))
        .ok_or_else(|| {
            AudioError::ConfigError(format!(
                "Sample rate {} Hz non supporté par le périphérique",
                sample_rate
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(config: &AudioConfig, capacity: usize) -> (FrameChunker, mpsc::Receiver<AudioFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (FrameChunker::new(config, tx, Arc::new(AtomicU64::new(0))), rx)
    }

    #[test]
    fn test_chunker_emits_fixed_frames_in_order() {
        let config = AudioConfig::test_config(); // 80 échantillons par frame
        let (mut chunker, mut rx) = chunker(&config, 8);

        let samples: Vec<i16> = (0..200).collect();
        chunker.push(&samples[..50]);
        assert!(rx.try_recv().is_err());

        chunker.push(&samples[50..]);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err()); // 40 échantillons restent en attente

        assert_eq!(first.samples.len(), 80);
        assert_eq!(first.sequence_number, 0);
        assert_eq!(first.samples[0], 0);
        assert_eq!(second.sequence_number, 1);
        assert_eq!(second.samples[0], 80);
        assert_eq!(second.sample_rate, 8000);
    }

    #[test]
    fn test_chunker_drops_when_full() {
        let config = AudioConfig::test_config();
        let (mut chunker, mut rx) = chunker(&config, 1);

        chunker.push(&vec![1; 80 * 3]);

        assert_eq!(chunker.dropped(), 2);
        assert_eq!(rx.try_recv().unwrap().sequence_number, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_chunker_downmixes_native_formats() {
        let config = AudioConfig::test_config();
        let (mut chunker, mut rx) = chunker(&config, 4);

        // 80 paires stéréo f32 -> 80 échantillons mono
        let stereo: Vec<f32> = std::iter::repeat([1.0f32, 0.0f32]).take(80).flatten().collect();
        chunker.push_converted(&stereo, 2, codec::f32_to_i16);

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.samples.len(), 80);
        assert_eq!(frame.samples[0], i16::MAX / 2);
    }

    #[test]
    fn test_chunker_reports_closed_consumer() {
        let config = AudioConfig::test_config();
        let (mut chunker, rx) = chunker(&config, 4);
        drop(rx);

        assert!(chunker.is_closed());
        chunker.push(&vec![0; 160]); // ne panique pas
        assert_eq!(chunker.dropped(), 0);
    }

    #[tokio::test]
    #[ignore] // Nécessite un vrai microphone
    async fn test_cpal_microphone_frames() {
        let config = AudioConfig::default();
        let (tx, mut rx) = mpsc::channel(16);
        let mic = CpalMicrophone::new();

        let handle = mic
            .acquire(&config, FrameChunker::new(&config, tx, Arc::new(AtomicU64::new(0))))
            .await
            .expect("microphone");

        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("timeout")
            .expect("frame");
        assert_eq!(frame.samples.len(), 480);

        handle.close().await;
    }

    #[tokio::test]
    async fn test_cpal_microphone_is_exclusive() {
        let config = AudioConfig::default();
        let mic = CpalMicrophone::new();
        let (tx, _rx) = mpsc::channel(16);

        // Peut échouer sans microphone : seul le cas où la première acquisition réussit est vérifié
        if let Ok(handle) = mic
            .acquire(&config, FrameChunker::new(&config, tx.clone(), Arc::new(AtomicU64::new(0))))
            .await
        {
            let second = mic
                .acquire(&config, FrameChunker::new(&config, tx, Arc::new(AtomicU64::new(0))))
                .await;
            assert!(matches!(second, Err(AudioError::MediaAcquisition(_))));
            handle.close().await;
        }
    }
}
