//! Pont capture → transport
//!
//! Chaque frame capturée part en frame binaire PCM16 little-endian ; l'arrêt
//! normal de la capture envoie le marqueur de fin d'énoncé.

use async_trait::async_trait;
use tracing::trace;

use audio::{AudioError, AudioFrame, AudioResult, FrameSink};
use network::{ClientMessage, Frame, FrameSender, NetworkError};

pub(crate) struct ChannelSink {
    sender: FrameSender,
}

impl ChannelSink {
    pub(crate) fn new(sender: FrameSender) -> Self {
        Self { sender }
    }
}

fn sink_closed(err: NetworkError) -> AudioError {
    AudioError::SinkClosed(err.to_string())
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn accept(&mut self, frame: AudioFrame) -> AudioResult<()> {
        trace!(sequence = frame.sequence_number, "envoi d'une frame micro");
        self.sender
            .send(Frame::binary(frame.to_le_bytes()))
            .await
            .map_err(sink_closed)
    }

    async fn finish(&mut self) -> AudioResult<()> {
        let marker = ClientMessage::end_of_audio().to_frame().map_err(sink_closed)?;
        self.sender.send(marker).await.map_err(sink_closed)
    }
}
