//! Périphériques simulés
//!
//! Permettent de faire tourner les pipelines (et tout ce qui est construit
//! dessus) sans carte son : les tests poussent eux-mêmes les échantillons
//! du micro et consomment la file de lecture à la place du matériel.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::device::try_reserve;
use crate::{
    AudioConfig, AudioError, AudioFrame, AudioOutput, AudioResult, DeviceHandle, FrameChunker, FrameSink,
    MicSource, PlaybackQueue, Sample,
};

/// Microphone simulé
///
/// Compte les acquisitions et libérations, peut refuser la prochaine
/// acquisition, et injecte les échantillons fournis par `feed()`.
#[derive(Default)]
pub struct MockMicrophone {
    chunker: Arc<Mutex<Option<FrameChunker>>>,
    in_use: Arc<AtomicBool>,
    acquisitions: AtomicUsize,
    releases: Arc<AtomicUsize>,
    fail_next: Mutex<Option<String>>,
}

impl MockMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    /// La prochaine acquisition échouera avec cette raison
    pub fn fail_next_acquire(&self, reason: &str) {
        *self.fail_next.lock() = Some(reason.to_string());
    }

    /// Simule des échantillons capturés (sans effet si le micro n'est pas acquis)
    pub fn feed(&self, samples: &[Sample]) {
        if let Some(chunker) = self.chunker.lock().as_mut() {
            chunker.push(samples);
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::Acquire)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::Acquire)
    }
}

struct MockMicHandle {
    chunker: Arc<Mutex<Option<FrameChunker>>>,
    in_use: Arc<AtomicBool>,
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl DeviceHandle for MockMicHandle {
    async fn close(self: Box<Self>) {
        self.chunker.lock().take();
        self.releases.fetch_add(1, Ordering::AcqRel);
        self.in_use.store(false, Ordering::Release);
    }
}

#[async_trait]
impl MicSource for MockMicrophone {
    async fn acquire(&self, _config: &AudioConfig, chunker: FrameChunker) -> AudioResult<Box<dyn DeviceHandle>> {
        if let Some(reason) = self.fail_next.lock().take() {
            return Err(AudioError::MediaAcquisition(reason));
        }

        if !try_reserve(&self.in_use) {
            return Err(AudioError::MediaAcquisition("microphone déjà utilisé".to_string()));
        }

        self.acquisitions.fetch_add(1, Ordering::AcqRel);
        *self.chunker.lock() = Some(chunker);

        Ok(Box::new(MockMicHandle {
            chunker: Arc::clone(&self.chunker),
            in_use: Arc::clone(&self.in_use),
            releases: Arc::clone(&self.releases),
        }))
    }

    fn name(&self) -> String {
        "Microphone simulé".to_string()
    }
}

/// Sortie audio simulée
///
/// Garde la file de la sortie ouverte ; `drain()` joue le rôle du callback matériel.
#[derive(Default)]
pub struct MockSpeaker {
    queue: Arc<Mutex<Option<PlaybackQueue>>>,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl MockSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consomme `count` échantillons comme le ferait le périphérique
    ///
    /// Retourne du silence si la sortie n'est pas ouverte.
    pub fn drain(&self, count: usize) -> Vec<Sample> {
        let mut out = vec![0; count];
        if let Some(queue) = self.queue.lock().as_ref() {
            queue.render(&mut out, 1, |s| s);
        }
        out
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }
}

struct MockSpeakerHandle {
    queue: Arc<Mutex<Option<PlaybackQueue>>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl DeviceHandle for MockSpeakerHandle {
    async fn close(self: Box<Self>) {
        self.queue.lock().take();
        self.closes.fetch_add(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl AudioOutput for MockSpeaker {
    async fn open(&self, _sample_rate: u32, queue: PlaybackQueue) -> AudioResult<Box<dyn DeviceHandle>> {
        self.opens.fetch_add(1, Ordering::AcqRel);
        *self.queue.lock() = Some(queue);

        Ok(Box::new(MockSpeakerHandle {
            queue: Arc::clone(&self.queue),
            closes: Arc::clone(&self.closes),
        }))
    }

    fn name(&self) -> String {
        "Sortie simulée".to_string()
    }
}

/// Périphérique absent (mode sans audio)
///
/// Refuse toute acquisition et toute ouverture.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledDevice;

#[async_trait]
impl MicSource for DisabledDevice {
    async fn acquire(&self, _config: &AudioConfig, _chunker: FrameChunker) -> AudioResult<Box<dyn DeviceHandle>> {
        Err(AudioError::MediaAcquisition("audio désactivé".to_string()))
    }

    fn name(&self) -> String {
        "Aucun".to_string()
    }
}

#[async_trait]
impl AudioOutput for DisabledDevice {
    async fn open(&self, _sample_rate: u32, _queue: PlaybackQueue) -> AudioResult<Box<dyn DeviceHandle>> {
        Err(AudioError::NoDeviceFound)
    }

    fn name(&self) -> String {
        "Aucun".to_string()
    }
}

#[derive(Default)]
struct SinkState {
    frames: Mutex<Vec<AudioFrame>>,
    finished: AtomicUsize,
    notify: Notify,
}

/// Consommateur qui enregistre toutes les frames reçues
pub struct RecordingSink {
    state: Arc<SinkState>,
}

/// Vue côté test sur ce qu'a reçu un `RecordingSink`
#[derive(Clone)]
pub struct SinkLog {
    state: Arc<SinkState>,
}

impl RecordingSink {
    pub fn new() -> (Self, SinkLog) {
        let state = Arc::new(SinkState::default());
        (
            Self {
                state: Arc::clone(&state),
            },
            SinkLog { state },
        )
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn accept(&mut self, frame: AudioFrame) -> AudioResult<()> {
        self.state.frames.lock().push(frame);
        self.state.notify.notify_waiters();
        Ok(())
    }

    async fn finish(&mut self) -> AudioResult<()> {
        self.state.finished.fetch_add(1, Ordering::AcqRel);
        self.state.notify.notify_waiters();
        Ok(())
    }
}

impl SinkLog {
    pub fn frames(&self) -> Vec<AudioFrame> {
        self.state.frames.lock().clone()
    }

    /// Nombre d'appels à `finish()`
    pub fn finished(&self) -> usize {
        self.state.finished.load(Ordering::Acquire)
    }

    /// Attend qu'au moins `count` frames aient été reçues
    pub async fn wait_for_frames(&self, count: usize) {
        loop {
            let notified = self.state.notify.notified();
            if self.state.frames.lock().len() >= count {
                return;
            }
            notified.await;
        }
    }
}
