//! Configuration for Sonority

use crate::error::{Result, SonorityError};
use std::time::Duration;

/// Startup configuration of a [`SoundSystem`](crate::SoundSystem).
///
/// Categories, groups and soundscapes are built in code; this only covers the
/// engine-wide knobs.
#[derive(Debug, Clone)]
pub struct SoundSystemDesc {
    /// Number of backend voices created at startup. Fixed for the lifetime of the system.
    pub voices: usize,
    /// Byte budget of the decoded clip cache. `0` disables eviction entirely.
    pub cache_budget: usize,
    /// Sleep between two ticks of the processing thread.
    pub tick_interval: Duration,
    /// Voices are spatialized and refilled once every this many ticks.
    pub voice_update_interval: u32,
    /// Amount of PCM decoded into each of the two stream buffers.
    pub stream_chunk_duration: Duration,
    /// Effect send gain at distance zero, used when a soundscape leaves it unset.
    pub min_effect_gain: f32,
    /// Distance at which effect sends reach full gain, used when a soundscape leaves it unset.
    pub max_effect_distance: f32,
    /// Seed for pitch variance sampling. `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl Default for SoundSystemDesc {
    fn default() -> Self {
        Self {
            voices: 48,
            cache_budget: 16 * 1024 * 1024,
            tick_interval: Duration::from_millis(16),
            voice_update_interval: 2,
            stream_chunk_duration: Duration::from_secs(1),
            min_effect_gain: 1.0,
            max_effect_distance: 0.0,
            rng_seed: None,
        }
    }
}

impl SoundSystemDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn voices(mut self, voices: usize) -> Self {
        self.voices = voices;
        self
    }

    pub fn cache_budget(mut self, bytes: usize) -> Self {
        self.cache_budget = bytes;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn voice_update_interval(mut self, ticks: u32) -> Self {
        self.voice_update_interval = ticks;
        self
    }

    pub fn stream_chunk_duration(mut self, duration: Duration) -> Self {
        self.stream_chunk_duration = duration;
        self
    }

    pub fn min_effect_gain(mut self, gain: f32) -> Self {
        self.min_effect_gain = gain;
        self
    }

    pub fn max_effect_distance(mut self, distance: f32) -> Self {
        self.max_effect_distance = distance;
        self
    }

    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Checks the values that would make the engine loop meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.voices == 0 {
            return Err(SonorityError::Configuration(
                "voice pool must hold at least one voice".into(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(SonorityError::Configuration(
                "tick interval must be non-zero".into(),
            ));
        }
        if self.voice_update_interval == 0 {
            return Err(SonorityError::Configuration(
                "voice update interval must be at least one tick".into(),
            ));
        }
        if self.stream_chunk_duration.is_zero() {
            return Err(SonorityError::Configuration(
                "stream chunk duration must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let desc = SoundSystemDesc::default();
        assert_eq!(desc.voices, 48);
        assert_eq!(desc.cache_budget, 16 * 1024 * 1024);
        assert_eq!(desc.voice_update_interval, 2);
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_builder_and_validation() {
        let desc = SoundSystemDesc::new().voices(0);
        assert!(matches!(
            desc.validate(),
            Err(SonorityError::Configuration(_))
        ));

        let desc = SoundSystemDesc::new()
            .voices(4)
            .voice_update_interval(0)
            .rng_seed(7);
        assert_eq!(desc.rng_seed, Some(7));
        assert!(desc.validate().is_err());
    }
}
