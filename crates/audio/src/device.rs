//! Thread propriétaire d'un stream cpal
//!
//! `cpal::Stream` n'est pas `Send` sur toutes les plateformes : il ne peut pas
//! vivre dans une tâche tokio. Chaque périphérique acquis possède donc un
//! thread dédié qui construit le stream, le démarre, puis attend l'ordre
//! d'arrêt pour le détruire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::StreamTrait;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{AudioError, AudioResult, DeviceHandle};

/// Marque un périphérique comme occupé tant qu'un handle existe
///
/// Retourne `false` si le périphérique était déjà pris.
pub(crate) fn try_reserve(in_use: &AtomicBool) -> bool {
    in_use
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

/// Handle sur un stream cpal vivant dans son propre thread
pub(crate) struct StreamThread {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    label: &'static str,
}

impl StreamThread {
    /// Démarre le thread et attend que le stream soit en lecture
    ///
    /// `in_use` doit déjà être réservé par l'appelant ; il est relâché par
    /// le thread dès que le stream est détruit (ou n'a pas pu être créé).
    pub(crate) async fn spawn<F>(label: &'static str, in_use: Arc<AtomicBool>, build: F) -> AudioResult<Self>
    where
        F: FnOnce() -> AudioResult<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel::<AudioResult<()>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread_in_use = Arc::clone(&in_use);

        let spawned = std::thread::Builder::new()
            .name(format!("{}-stream", label))
            .spawn(move || {
                let stream = match build().and_then(|stream| {
                    stream.play()?;
                    Ok(stream)
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        thread_in_use.store(false, Ordering::Release);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = ready_tx.send(Ok(()));

                // Err aussi quand le handle est détruit sans close()
                let _ = stop_rx.recv();
                drop(stream);
                thread_in_use.store(false, Ordering::Release);
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                in_use.store(false, Ordering::Release);
                return Err(AudioError::StreamError(format!("Impossible de lancer le thread {}: {}", label, e)));
            }
        };

        match ready_rx.await {
            Ok(Ok(())) => {
                debug!(label, "stream cpal démarré");
                Ok(Self {
                    stop_tx: Some(stop_tx),
                    thread: Some(thread),
                    label,
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                in_use.store(false, Ordering::Release);
                Err(AudioError::StreamError(format!("Le thread {} s'est arrêté pendant l'initialisation", label)))
            }
        }
    }
}

#[async_trait]
impl DeviceHandle for StreamThread {
    async fn close(mut self: Box<Self>) {
        self.stop_tx.take();

        if let Some(thread) = self.thread.take() {
            let label = self.label;
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => debug!(label, "stream cpal libéré"),
                _ => warn!(label, "le thread du stream ne s'est pas terminé proprement"),
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        // Sans close(), le thread se termine quand même à la fermeture du channel
        self.stop_tx.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_is_exclusive() {
        let in_use = AtomicBool::new(false);
        assert!(try_reserve(&in_use));
        assert!(!try_reserve(&in_use));

        in_use.store(false, Ordering::Release);
        assert!(try_reserve(&in_use));
    }
}
