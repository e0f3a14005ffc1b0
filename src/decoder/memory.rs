use super::{AudioDecoder, DecoderHandle};
use crate::backend::PcmFormat;
use crate::error::DecodeError;
use crate::sound::SoundAsset;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone)]
enum Entry {
    Pcm { samples: Arc<[f32]>, format: PcmFormat },
    Unsupported(String),
    /// Opens fine, then fails with an I/O error after `after` samples.
    Broken { format: PcmFormat, after: usize },
}

#[derive(Default)]
struct Registry {
    entries: HashMap<PathBuf, Entry>,
    opens: HashMap<PathBuf, usize>,
}

/// Decoder over PCM registered in memory, keyed by asset path.
///
/// Used for generated sounds and tests. Unknown paths fail with an I/O
/// `NotFound` error.
#[derive(Clone, Default)]
pub struct MemoryDecoder {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: impl AsRef<Path>, samples: Vec<f32>, format: PcmFormat) {
        self.insert(
            path,
            Entry::Pcm {
                samples: samples.into(),
                format,
            },
        );
    }

    /// Registers a path whose data cannot be decoded at all.
    pub fn register_unsupported(&self, path: impl AsRef<Path>, message: impl Into<String>) {
        self.insert(path, Entry::Unsupported(message.into()));
    }

    /// Registers a path that yields `after` samples of silence and then an I/O error.
    pub fn register_broken(&self, path: impl AsRef<Path>, format: PcmFormat, after: usize) {
        self.insert(path, Entry::Broken { format, after });
    }

    /// How many times `path` has been opened.
    pub fn open_count(&self, path: impl AsRef<Path>) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .opens
            .get(path.as_ref())
            .copied()
            .unwrap_or(0)
    }

    fn insert(&self, path: impl AsRef<Path>, entry: Entry) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .insert(path.as_ref().to_path_buf(), entry);
    }
}

impl AudioDecoder for MemoryDecoder {
    fn open(&self, asset: &SoundAsset) -> Result<Box<dyn DecoderHandle>, DecodeError> {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        *registry.opens.entry(asset.path().to_path_buf()).or_default() += 1;
        let entry = registry.entries.get(asset.path()).cloned().ok_or_else(|| {
            DecodeError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not registered", asset.path().display()),
            ))
        })?;

        match entry {
            Entry::Pcm { samples, format } => Ok(Box::new(MemoryHandle {
                samples,
                format,
                cursor: 0,
                fail_at: None,
            })),
            Entry::Unsupported(message) => Err(DecodeError::Unsupported(message)),
            Entry::Broken { format, after } => Ok(Box::new(MemoryHandle {
                samples: vec![0.0; after].into(),
                format,
                cursor: 0,
                fail_at: Some(after),
            })),
        }
    }
}

struct MemoryHandle {
    samples: Arc<[f32]>,
    format: PcmFormat,
    cursor: usize,
    fail_at: Option<usize>,
}

impl DecoderHandle for MemoryHandle {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn decode_into(&mut self, out: &mut [f32]) -> Result<usize, DecodeError> {
        let remaining = self.samples.len() - self.cursor;
        if remaining == 0 {
            if let Some(at) = self.fail_at {
                return Err(DecodeError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("data truncated at sample {}", at),
                )));
            }
        }
        let n = remaining.min(out.len());
        out[..n].copy_from_slice(&self.samples[self.cursor..self.cursor + n]);
        self.cursor += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_and_unsupported_paths() {
        let decoder = MemoryDecoder::new();
        let missing = SoundAsset::new("missing.wav");
        assert!(matches!(decoder.open(&missing), Err(DecodeError::Io(_))));

        let odd = SoundAsset::new("odd.xyz");
        decoder.register_unsupported(odd.path(), "unknown container");
        let err = decoder.open(&odd).err().unwrap();
        assert!(err.is_permanent());
        assert_eq!(decoder.open_count(odd.path()), 1);
    }

    #[test]
    fn test_broken_entry_fails_after_data() {
        let decoder = MemoryDecoder::new();
        let asset = SoundAsset::new("cut.ogg");
        decoder.register_broken(asset.path(), PcmFormat::new(8000, 1), 10);

        let mut handle = decoder.open(&asset).unwrap();
        let mut out = [0.0; 16];
        assert_eq!(handle.decode_into(&mut out).unwrap(), 10);
        assert!(matches!(
            handle.decode_into(&mut out),
            Err(DecodeError::Io(_))
        ));
    }
}
