use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ASSET_ID: AtomicU64 = AtomicU64::new(1);

/// Largest pitch offset an asset may ask for.
pub const MAX_PITCH_VARIANCE: f32 = 1.0;

/// Identity of a [`SoundAsset`]. Cache entries, primed streams and the
/// per-asset concurrency index are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(u64);

impl AssetId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "asset#{}", self.0)
    }
}

/// How an asset reaches the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Decoded once in full and kept in the sound cache.
    Cached,
    /// Decoded incrementally into two rotating buffers per voice.
    Stream,
}

/// An immutable playable sound: a source path plus the policy that governs
/// how many instances of it may play.
#[derive(Debug, Clone)]
pub struct SoundAsset {
    id: AssetId,
    path: PathBuf,
    mode: DecodeMode,
    replaces_old: bool,
    must_play: bool,
    limit: usize,
    pitch_variance: f32,
    gain: f32,
}

impl SoundAsset {
    /// Creates a cached asset with no concurrency limit.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            id: AssetId(NEXT_ASSET_ID.fetch_add(1, Ordering::Relaxed)),
            path: path.into(),
            mode: DecodeMode::Cached,
            replaces_old: true,
            must_play: false,
            limit: 0,
            pitch_variance: 0.0,
            gain: 1.0,
        }
    }

    /// Creates a streaming asset.
    pub fn streamed(path: impl Into<PathBuf>) -> Self {
        Self::new(path).mode(DecodeMode::Stream)
    }

    pub fn mode(mut self, mode: DecodeMode) -> Self {
        self.mode = mode;
        self
    }

    /// When the concurrency limit is reached, steal the oldest instance (`true`)
    /// or reject the new request (`false`).
    pub fn replaces_old(mut self, replaces_old: bool) -> Self {
        self.replaces_old = replaces_old;
        self
    }

    /// Requests that cannot get a voice are retried on the next tick instead of dropped.
    pub fn must_play(mut self, must_play: bool) -> Self {
        self.must_play = must_play;
        self
    }

    /// Maximum concurrent instances, `0` for unlimited.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Each play picks a pitch offset uniformly in `[-variance, variance]`.
    /// The variance is clamped to `[0, 1]` so pitch never goes negative; NaN means none.
    pub fn pitch_variance(mut self, variance: f32) -> Self {
        self.pitch_variance = if variance.is_nan() {
            0.0
        } else {
            variance.abs().min(MAX_PITCH_VARIANCE)
        };
        self
    }

    pub fn gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn decode_mode(&self) -> DecodeMode {
        self.mode
    }

    pub fn is_stream(&self) -> bool {
        self.mode == DecodeMode::Stream
    }

    pub fn is_replacing_old(&self) -> bool {
        self.replaces_old
    }

    pub fn is_must_play(&self) -> bool {
        self.must_play
    }

    pub fn concurrency_limit(&self) -> usize {
        self.limit
    }

    pub fn variance(&self) -> f32 {
        self.pitch_variance
    }

    pub fn base_gain(&self) -> f32 {
        self.gain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_defaults() {
        let asset = SoundAsset::new("sfx/step.ogg");
        assert_eq!(asset.decode_mode(), DecodeMode::Cached);
        assert!(asset.is_replacing_old());
        assert!(!asset.is_must_play());
        assert_eq!(asset.concurrency_limit(), 0);
        assert_eq!(asset.base_gain(), 1.0);
    }

    #[test]
    fn test_asset_ids_are_unique() {
        let a = SoundAsset::new("a.wav");
        let b = SoundAsset::streamed("b.ogg").pitch_variance(-0.1);
        assert_ne!(a.id(), b.id());
        assert!(b.is_stream());
        assert_eq!(b.variance(), 0.1);
    }

    #[test]
    fn test_pitch_variance_is_clamped() {
        let wild = SoundAsset::new("a.wav").pitch_variance(f32::INFINITY);
        assert_eq!(wild.variance(), MAX_PITCH_VARIANCE);
        let broken = SoundAsset::new("a.wav").pitch_variance(f32::NAN);
        assert_eq!(broken.variance(), 0.0);
        let negative = SoundAsset::new("a.wav").pitch_variance(-3.0);
        assert_eq!(negative.variance(), MAX_PITCH_VARIANCE);
    }
}
