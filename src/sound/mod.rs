//! Content definitions: assets, groups, categories, locations and soundscapes.

mod asset;
mod category;
mod group;
mod location;
mod soundscape;

pub use asset::{AssetId, DecodeMode, MAX_PITCH_VARIANCE, SoundAsset};
pub use category::{Falloff, Rolloff, SoundCategory};
pub use group::{GroupId, SoundGroup};
pub use location::{LocationId, SoundLocation};
pub use soundscape::{EchoParams, OcclusionParams, ReverbParams, SoundScape};

use std::sync::atomic::{AtomicU32, Ordering};

/// `f32` stored in an `AtomicU32`, for values written by game threads and read every tick.
#[derive(Debug)]
pub(crate) struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub(crate) fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub(crate) fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}
