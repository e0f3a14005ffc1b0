//! Decoding assets into interleaved `f32` PCM.

mod memory;
mod symphonia_stream;

pub use memory::MemoryDecoder;
pub use symphonia_stream::SymphoniaDecoder;

use crate::backend::PcmFormat;
use crate::error::DecodeError;
use crate::sound::SoundAsset;

/// Opens decoders for assets. Shared between the processing thread and
/// whoever registers content, hence `Sync`.
pub trait AudioDecoder: Send + Sync {
    fn open(&self, asset: &SoundAsset) -> Result<Box<dyn DecoderHandle>, DecodeError>;
}

/// An open decode cursor. Dropping it closes the underlying source.
pub trait DecoderHandle: Send {
    fn format(&self) -> PcmFormat;

    /// Fills `out` with up to `out.len()` interleaved samples and returns how
    /// many were written. `0` means the end of the data.
    fn decode_into(&mut self, out: &mut [f32]) -> Result<usize, DecodeError>;

    /// Fills as much of `out` as the data allows, calling [`decode_into`](Self::decode_into)
    /// until it is full or the data ends.
    fn fill(&mut self, out: &mut [f32]) -> Result<usize, DecodeError> {
        let mut written = 0;
        while written < out.len() {
            let n = self.decode_into(&mut out[written..])?;
            if n == 0 {
                break;
            }
            written += n;
        }
        Ok(written)
    }
}

const DECODE_ALL_CHUNK: usize = 16 * 1024;

/// Decodes the rest of `handle` into one vector.
pub fn decode_all(handle: &mut dyn DecoderHandle) -> Result<Vec<f32>, DecodeError> {
    let mut samples = Vec::new();
    let mut chunk = vec![0.0f32; DECODE_ALL_CHUNK];
    loop {
        let n = handle.decode_into(&mut chunk)?;
        if n == 0 {
            break;
        }
        samples.extend_from_slice(&chunk[..n]);
    }
    Ok(samples)
}
