use super::{AudioDecoder, DecoderHandle};
use crate::backend::PcmFormat;
use crate::error::DecodeError;
use crate::sound::SoundAsset;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use symphonia::{
    core::{
        audio::SampleBuffer,
        codecs::{Decoder, DecoderOptions},
        errors::Error,
        formats::{FormatOptions, FormatReader},
        io::MediaSourceStream,
        meta::MetadataOptions,
        probe::Hint,
    },
    default::{get_codecs, get_probe},
};

/// Streaming decoder for files on disk, backed by Symphonia.
///
/// Supports the formats enabled in Symphonia's default feature set (WAV, FLAC,
/// OGG Vorbis and others). Asset paths are resolved against an optional root
/// directory.
///
/// # Examples
///
/// ```ignore
/// use sonority::decoder::SymphoniaDecoder;
///
/// let decoder = SymphoniaDecoder::with_root("assets/audio");
/// ```
#[derive(Debug, Clone, Default)]
pub struct SymphoniaDecoder {
    root: Option<PathBuf>,
}

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, asset: &SoundAsset) -> PathBuf {
        match &self.root {
            Some(root) => root.join(asset.path()),
            None => asset.path().to_path_buf(),
        }
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn open(&self, asset: &SoundAsset) -> Result<Box<dyn DecoderHandle>, DecodeError> {
        let path = self.resolve(asset);
        let file = File::open(&path)?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| map_error(e, "Failed to probe audio format"))?;

        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| DecodeError::Unsupported("No default audio track found".into()))?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| DecodeError::Unsupported("Sample rate not found".into()))?;

        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| DecodeError::Unsupported("Channel count not found".into()))?
            .count() as u16;

        let track_id = track.id;

        let decoder = get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| map_error(e, "Failed to create decoder"))?;

        log::debug!(
            "Opened {} ({} Hz, {} channels)",
            path.display(),
            sample_rate,
            channels
        );

        Ok(Box::new(SymphoniaHandle {
            format,
            decoder,
            track_id,
            pcm_format: PcmFormat::new(sample_rate, channels),
            pending: Vec::new(),
            pending_pos: 0,
            finished: false,
        }))
    }
}

fn map_error(error: Error, context: &str) -> DecodeError {
    match error {
        Error::IoError(e) => DecodeError::Io(e),
        other => DecodeError::Unsupported(format!("{}: {}", context, other)),
    }
}

struct SymphoniaHandle {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    pcm_format: PcmFormat,
    /// Decoded samples not yet handed out.
    pending: Vec<f32>,
    pending_pos: usize,
    finished: bool,
}

impl SymphoniaHandle {
    /// Decodes the next packet of our track into `pending`. Returns `false` at end of stream.
    fn decode_packet(&mut self) -> Result<bool, DecodeError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(Error::ResetRequired) => return Ok(false),
                Err(e) => return Err(map_error(e, "Error reading packet")),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(Error::DecodeError(err)) => {
                    log::warn!("Skipping corrupt packet: {}", err);
                    continue;
                }
                Err(e) => return Err(map_error(e, "Error decoding packet")),
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity();

            let mut tmp = SampleBuffer::<f32>::new(capacity as u64, spec);
            tmp.copy_interleaved_ref(decoded);

            self.pending.clear();
            self.pending.extend_from_slice(tmp.samples());
            self.pending_pos = 0;
            return Ok(true);
        }
    }
}

impl DecoderHandle for SymphoniaHandle {
    fn format(&self) -> PcmFormat {
        self.pcm_format
    }

    fn decode_into(&mut self, out: &mut [f32]) -> Result<usize, DecodeError> {
        let mut written = 0;
        while written < out.len() {
            if self.pending_pos >= self.pending.len() {
                if self.finished || !self.decode_packet()? {
                    self.finished = true;
                    break;
                }
                continue;
            }
            let n = (self.pending.len() - self.pending_pos).min(out.len() - written);
            out[written..written + n]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            written += n;
        }
        Ok(written)
    }
}
