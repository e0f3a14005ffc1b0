/// Echo parameters forwarded verbatim to the backend effect slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EchoParams {
    pub damping: f32,
    pub delay: f32,
    pub feedback: f32,
    pub lr_delay: f32,
    pub spread: f32,
}

impl Default for EchoParams {
    fn default() -> Self {
        Self {
            damping: 0.5,
            delay: 0.1,
            feedback: 0.5,
            lr_delay: 0.1,
            spread: -1.0,
        }
    }
}

/// Reverb parameters forwarded verbatim to the backend effect slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbParams {
    pub density: f32,
    pub diffusion: f32,
    pub gain: f32,
    pub hf_gain: f32,
    pub decay_time: f32,
    pub decay_hf_ratio: f32,
    pub reflections_gain: f32,
    pub reflections_delay: f32,
    pub late_gain: f32,
    pub late_delay: f32,
    pub air_absorption_hf_gain: f32,
    pub room_rolloff_factor: f32,
    pub decay_hf_limit: bool,
}

impl ReverbParams {
    #[allow(clippy::too_many_arguments)]
    const fn preset(
        density: f32,
        hf_gain: f32,
        decay_time: f32,
        decay_hf_ratio: f32,
        reflections_gain: f32,
        reflections_delay: f32,
        late_gain: f32,
        late_delay: f32,
        decay_hf_limit: bool,
    ) -> Self {
        Self {
            density,
            diffusion: 1.0,
            gain: 0.3162,
            hf_gain,
            decay_time,
            decay_hf_ratio,
            reflections_gain,
            reflections_delay,
            late_gain,
            late_delay,
            air_absorption_hf_gain: 0.9943,
            room_rolloff_factor: 0.0,
            decay_hf_limit,
        }
    }

    pub const GENERIC: Self =
        Self::preset(1.0, 0.8913, 1.49, 0.83, 0.05, 0.007, 1.2589, 0.011, true);
    pub const PADDED_CELL: Self =
        Self::preset(0.1715, 0.001, 0.17, 0.1, 0.25, 0.001, 1.2691, 0.002, true);
    pub const ROOM: Self =
        Self::preset(0.4287, 0.5929, 0.4, 0.83, 0.1503, 0.002, 1.0629, 0.003, true);
    pub const LIVING_ROOM: Self =
        Self::preset(0.9766, 0.001, 0.5, 0.1, 0.2051, 0.003, 0.2805, 0.004, true);
    pub const STONE_ROOM: Self =
        Self::preset(1.0, 0.7079, 2.31, 0.64, 0.4411, 0.012, 1.1003, 0.017, true);
    pub const AUDITORIUM: Self =
        Self::preset(1.0, 0.5781, 4.32, 0.59, 0.4032, 0.02, 0.717, 0.03, true);
    pub const CONCERT_HALL: Self =
        Self::preset(1.0, 0.5623, 3.92, 0.7, 0.2427, 0.02, 0.9977, 0.029, true);
    pub const CAVE: Self = Self::preset(1.0, 1.0, 2.91, 1.3, 0.5, 0.015, 0.7063, 0.022, false);
    pub const ARENA: Self = Self::preset(1.0, 0.4477, 7.24, 0.33, 0.2612, 0.02, 1.0186, 0.03, true);
    pub const HANGAR: Self = Self::preset(1.0, 0.3162, 10.05, 0.23, 0.5, 0.02, 1.256, 0.03, true);
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self::GENERIC
    }
}

/// How strongly a fully occluded voice is muffled. Each value is the residual
/// multiplier at occlusion 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcclusionParams {
    pub gain: f32,
    pub lowpass_gain: f32,
    pub highpass_gain: f32,
}

impl Default for OcclusionParams {
    fn default() -> Self {
        Self {
            gain: 1.0,
            lowpass_gain: 1.0,
            highpass_gain: 1.0,
        }
    }
}

/// The acoustic environment currently applied to every voice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoundScape {
    pub name: String,
    pub echo: Option<EchoParams>,
    pub reverb: Option<ReverbParams>,
    pub occlusion: Option<OcclusionParams>,
    /// Effect send gain at distance zero. Falls back to the system default when unset.
    pub min_effect_gain: Option<f32>,
    /// Distance at which the effect sends reach full gain. Falls back to the
    /// system default when unset.
    pub max_effect_distance: Option<f32>,
}

impl SoundScape {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn echo(mut self, echo: EchoParams) -> Self {
        self.echo = Some(echo);
        self
    }

    pub fn reverb(mut self, reverb: ReverbParams) -> Self {
        self.reverb = Some(reverb);
        self
    }

    pub fn occlusion(mut self, occlusion: OcclusionParams) -> Self {
        self.occlusion = Some(occlusion);
        self
    }

    pub fn effect_ramp(mut self, min_effect_gain: f32, max_effect_distance: f32) -> Self {
        self.min_effect_gain = Some(min_effect_gain);
        self.max_effect_distance = Some(max_effect_distance);
        self
    }
}
