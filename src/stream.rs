//! Double-buffered streaming decode.
//!
//! A [`SoundStream`] owns a decoder cursor and two backend buffers. While the
//! voice plays, the backend consumes one buffer while the other waits in the
//! queue; every voice update refills whatever the backend reports processed.

use crate::backend::{AudioBackend, BufferHandle, PcmFormat, SourceHandle};
use crate::decoder::{AudioDecoder, DecoderHandle};
use crate::error::Result;
use crate::sound::{AssetId, SoundAsset};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// What one [`SoundStream::update`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatus {
    /// Buffers decoded and put back in the queue.
    pub refilled: usize,
    /// A looping stream restarted and still produced nothing.
    pub exhausted: bool,
}

pub struct SoundStream {
    asset: Arc<SoundAsset>,
    handle: Box<dyn DecoderHandle>,
    format: PcmFormat,
    buffers: [BufferHandle; 2],
    scratch: Vec<f32>,
}

impl SoundStream {
    /// Opens the decoder and primes both buffers.
    ///
    /// Running out of data while priming is fine: the stream then holds only
    /// what was decoded, possibly nothing.
    pub fn open(
        asset: Arc<SoundAsset>,
        decoder: &dyn AudioDecoder,
        backend: &mut dyn AudioBackend,
        chunk_duration: Duration,
    ) -> Result<Self> {
        let mut handle = decoder.open(&asset)?;
        let format = handle.format();
        let mut scratch = vec![0.0f32; format.samples_for(chunk_duration.as_secs_f32())];

        let n = handle.fill(&mut scratch)?;
        let first = backend.create_buffer(&scratch[..n], format)?;
        let second = match prime_buffer(handle.as_mut(), &mut scratch, format, backend) {
            Ok(buffer) => buffer,
            Err(e) => {
                backend.destroy_buffer(first);
                return Err(e);
            }
        };

        log::debug!(
            "Primed stream for {} ({} samples per buffer)",
            asset.id(),
            scratch.len()
        );

        Ok(Self {
            asset,
            handle,
            format,
            buffers: [first, second],
            scratch,
        })
    }

    pub fn asset_id(&self) -> AssetId {
        self.asset.id()
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Queues both primed buffers on `source`, replacing whatever it held.
    pub fn attach(&self, source: SourceHandle, backend: &mut dyn AudioBackend) {
        backend.set_buffer(source, None);
        for buffer in self.buffers {
            backend.enqueue_buffer(source, buffer);
        }
    }

    /// Refills every buffer the backend has finished with.
    ///
    /// When the decoder runs dry on a looping stream it is reopened once and
    /// read again. A second empty read marks the stream exhausted. On a
    /// non-looping stream the buffer is simply left out of the queue so the
    /// source stops after the last queued buffer.
    pub fn update(
        &mut self,
        source: SourceHandle,
        looping: bool,
        decoder: &dyn AudioDecoder,
        backend: &mut dyn AudioBackend,
    ) -> Result<StreamStatus> {
        let mut status = StreamStatus::default();
        let processed = backend.processed_buffer_count(source);

        for _ in 0..processed {
            let Some(buffer) = backend.dequeue_buffer(source) else {
                break;
            };

            let mut n = self.handle.fill(&mut self.scratch)?;
            if n == 0 && looping {
                self.restart(decoder)?;
                n = self.handle.fill(&mut self.scratch)?;
                if n == 0 {
                    status.exhausted = true;
                    break;
                }
            }
            if n == 0 {
                continue;
            }

            backend.set_buffer_data(buffer, &self.scratch[..n], self.format);
            backend.enqueue_buffer(source, buffer);
            status.refilled += 1;
        }

        Ok(status)
    }

    fn restart(&mut self, decoder: &dyn AudioDecoder) -> Result<()> {
        log::trace!("Restarting decoder for looping {}", self.asset.id());
        self.handle = decoder.open(&self.asset)?;
        self.format = self.handle.format();
        Ok(())
    }

    /// Destroys both buffers. The source must no longer reference them.
    pub fn release(self, backend: &mut dyn AudioBackend) {
        for buffer in self.buffers {
            backend.destroy_buffer(buffer);
        }
    }
}

fn prime_buffer(
    handle: &mut dyn DecoderHandle,
    scratch: &mut [f32],
    format: PcmFormat,
    backend: &mut dyn AudioBackend,
) -> Result<BufferHandle> {
    let n = handle.fill(scratch)?;
    backend.create_buffer(&scratch[..n], format)
}

/// Streams opened ahead of time by precache, waiting to be claimed by a voice.
#[derive(Default)]
pub struct PrimedStreams {
    streams: HashMap<AssetId, SoundStream>,
}

impl PrimedStreams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, asset: AssetId) -> bool {
        self.streams.contains_key(&asset)
    }

    /// Stores a primed stream, returning the one it displaced, if any.
    pub fn insert(&mut self, stream: SoundStream) -> Option<SoundStream> {
        self.streams.insert(stream.asset_id(), stream)
    }

    pub fn claim(&mut self, asset: AssetId) -> Option<SoundStream> {
        self.streams.remove(&asset)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn drain(&mut self) -> Vec<SoundStream> {
        self.streams.drain().map(|(_, stream)| stream).collect()
    }
}
