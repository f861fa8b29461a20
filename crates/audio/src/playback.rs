//! Lecture audio
//!
//! - `PlaybackQueue` : file d'échantillons partagée entre le pipeline
//!   (producteur) et le callback du périphérique (consommateur)
//! - `CpalSpeaker` : sortie audio par défaut du système via cpal
//!
//! # Architecture thread
//!
//! `play()` ajoute des échantillons en fin de ring buffer sans jamais attendre
//! le périphérique. Le callback cpal retire les échantillons au rythme du
//! matériel et complète avec du silence quand la file est vide. `clear()`
//! marque tout l'existant comme jeté : le callback suivant le saute.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::SampleFormat;
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{error, info};

use crate::capture::select_stream_config;
use crate::codec;
use crate::config::SESSION_SAMPLE_RATE;
use crate::device::{try_reserve, StreamThread};
use crate::{AudioError, AudioOutput, AudioResult, DeviceHandle, PlaybackStats, Sample};

/// Capacité par défaut de la file : une minute d'audio de session
pub const DEFAULT_PLAYBACK_CAPACITY: usize = SESSION_SAMPLE_RATE as usize * 60;

struct Shared {
    /// Côté `push()` et `clear()`, jamais pris par le callback
    producer: Mutex<Producer<Sample>>,
    /// Côté callback : un seul consommateur, verrou jamais disputé
    consumer: Mutex<Consumer<Sample>>,
    /// Échantillons acceptés depuis la création
    pushed: AtomicU64,
    /// Échantillons retirés du ring, rendus ou sautés
    read: AtomicU64,
    /// Les échantillons d'indice inférieur ont été jetés par `clear()`
    discard_mark: AtomicU64,
    rendered: AtomicU64,
    discarded: AtomicU64,
    overflowed: AtomicU64,
    underruns: AtomicU64,
    clears: AtomicU64,
}

/// File de lecture partagée
///
/// Ring buffer sans verrou entre le pipeline (producteur) et le callback du
/// périphérique (consommateur) : `push()` et `clear()` ne bloquent jamais le
/// rendu. `clear()` ne touche pas au ring, il pose une marque que le
/// callback saute au rendu suivant.
///
/// Clonable : toutes les copies pointent vers la même file.
#[derive(Clone)]
pub struct PlaybackQueue {
    shared: Arc<Shared>,
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_PLAYBACK_CAPACITY)
    }
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// File pouvant contenir `capacity` échantillons en attente
    pub fn with_capacity(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                producer: Mutex::new(producer),
                consumer: Mutex::new(consumer),
                pushed: AtomicU64::new(0),
                read: AtomicU64::new(0),
                discard_mark: AtomicU64::new(0),
                rendered: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
                overflowed: AtomicU64::new(0),
                underruns: AtomicU64::new(0),
                clears: AtomicU64::new(0),
            }),
        }
    }

    /// Ajoute des échantillons en fin de file, dans l'ordre
    ///
    /// Retourne le nombre d'échantillons acceptés. Au-delà de la capacité,
    /// la fin du bloc est refusée et comptée dans `samples_overflowed`.
    pub fn push(&self, samples: &[Sample]) -> usize {
        let shared = &self.shared;
        let mut producer = shared.producer.lock();

        let accepted = samples.len().min(producer.slots());
        for &sample in &samples[..accepted] {
            // Place garantie par slots()
            let _ = producer.push(sample);
        }
        shared.pushed.fetch_add(accepted as u64, Ordering::Release);

        let refused = samples.len() - accepted;
        if refused > 0 {
            shared.overflowed.fetch_add(refused as u64, Ordering::Relaxed);
        }
        accepted
    }

    /// Jette tout ce qui est en attente
    ///
    /// Les échantillons poussés ensuite sont joués normalement.
    /// Retourne le nombre d'échantillons jetés.
    pub fn clear(&self) -> usize {
        let shared = &self.shared;
        // Aucun push entre la lecture de `pushed` et la pose de la marque
        let _producer = shared.producer.lock();

        let pushed = shared.pushed.load(Ordering::Acquire);
        let previous = shared.discard_mark.swap(pushed, Ordering::AcqRel);
        let read = shared.read.load(Ordering::Acquire);
        let discarded = pushed.saturating_sub(read.max(previous));

        shared.discarded.fetch_add(discarded, Ordering::Relaxed);
        shared.clears.fetch_add(1, Ordering::Relaxed);
        discarded as usize
    }

    /// Nombre d'échantillons en attente de rendu
    pub fn len(&self) -> usize {
        let shared = &self.shared;
        let consumed = shared
            .read
            .load(Ordering::Acquire)
            .max(shared.discard_mark.load(Ordering::Acquire));
        shared.pushed.load(Ordering::Acquire).saturating_sub(consumed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PlaybackStats {
        let shared = &self.shared;
        PlaybackStats {
            samples_queued: shared.pushed.load(Ordering::Relaxed),
            samples_rendered: shared.rendered.load(Ordering::Relaxed),
            samples_discarded: shared.discarded.load(Ordering::Relaxed),
            samples_overflowed: shared.overflowed.load(Ordering::Relaxed),
            underruns: shared.underruns.load(Ordering::Relaxed),
            clears: shared.clears.load(Ordering::Relaxed),
        }
    }

    /// Remplit un buffer de sortie entrelacé
    ///
    /// Chaque échantillon mono est recopié sur les `channels` canaux.
    /// Ne prend aucun verrou partagé avec `push()` ou `clear()`.
    /// Retourne le nombre d'échantillons mono rendus.
    pub fn render<T: Copy>(&self, out: &mut [T], channels: usize, convert: impl Fn(Sample) -> T) -> usize {
        let shared = &self.shared;
        let channels = channels.max(1);
        let silence = convert(0);

        let Some(mut consumer) = shared.consumer.try_lock() else {
            // Deux rendus simultanés : impossible avec un seul périphérique
            out.fill(silence);
            return 0;
        };

        let mut read = shared.read.load(Ordering::Relaxed);
        let mark = shared.discard_mark.load(Ordering::Acquire);
        while read < mark && consumer.pop().is_ok() {
            read += 1;
        }

        let mut rendered = 0;
        let mut starved = false;
        for slot in out.chunks_mut(channels) {
            let value = match consumer.pop() {
                Ok(sample) => {
                    rendered += 1;
                    convert(sample)
                }
                Err(_) => {
                    starved = true;
                    silence
                }
            };
            slot.fill(value);
        }

        shared.read.store(read + rendered as u64, Ordering::Release);
        shared.rendered.fetch_add(rendered as u64, Ordering::Relaxed);
        if starved && rendered > 0 {
            shared.underruns.fetch_add(1, Ordering::Relaxed);
        }
        rendered
    }
}

/// Sortie audio par défaut du système, via cpal
pub struct CpalSpeaker {
    in_use: Arc<AtomicBool>,
}

impl CpalSpeaker {
    pub fn new() -> Self {
        Self {
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Nom de la sortie par défaut, si elle existe
    pub fn default_device_name() -> Option<String> {
        cpal::default_host()
            .default_output_device()
            .and_then(|device| device.description().ok())
            .map(|desc| desc.name().to_string())
    }

    /// Construit le stream de sortie (appelé depuis le thread du stream)
    fn build_stream(sample_rate: u32, queue: PlaybackQueue) -> AudioResult<cpal::Stream> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDeviceFound)?;

        let ranges = device
            .supported_output_configs()
            .map_err(|e| AudioError::ConfigError(format!("Impossible d'obtenir configs supportées: {}", e)))?;
        let supported = select_stream_config(ranges, sample_rate)?;

        let channels = supported.channels() as usize;
        let stream_config = supported.config();

        info!(sample_rate, channels, format = ?supported.sample_format(), "démarrage de la lecture");

        let on_error = |err: cpal::StreamError| error!(%err, "erreur du stream de lecture");

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    queue.render(data, channels, codec::i16_to_f32);
                },
                on_error,
                None,
            )?,
            SampleFormat::I16 => device.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    queue.render(data, channels, |s| s);
                },
                on_error,
                None,
            )?,
            SampleFormat::U16 => device.build_output_stream(
                &stream_config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    queue.render(data, channels, codec::i16_to_u16);
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

impl Default for CpalSpeaker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioOutput for CpalSpeaker {
    async fn open(&self, sample_rate: u32, queue: PlaybackQueue) -> AudioResult<Box<dyn DeviceHandle>> {
        if !try_reserve(&self.in_use) {
            return Err(AudioError::ConfigError("sortie audio déjà utilisée".to_string()));
        }

        let handle = StreamThread::spawn("lecture", Arc::clone(&self.in_use), move || {
            Self::build_stream(sample_rate, queue)
        })
        .await?;

        Ok(Box::new(handle))
    }

    fn name(&self) -> String {
        Self::default_device_name().unwrap_or_else(|| "Périphérique inconnu".to_string())
    }
}
