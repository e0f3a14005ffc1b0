use std::f32::consts::PI;

/// Shape of the attenuation curve between the near and far distance of a [`Rolloff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Falloff {
    #[default]
    None,
    Linear,
    Cosine,
    Squared,
}

impl Falloff {
    /// Attenuation at normalized distance `t` in `[0, 1]`.
    pub fn attenuation(&self, t: f32) -> f32 {
        match self {
            Falloff::None => 1.0,
            Falloff::Linear => 1.0 - t,
            Falloff::Cosine => (t * PI).cos() / 2.0 + 0.5,
            Falloff::Squared => 1.0 - t * t,
        }
    }
}

/// Distance attenuation profile: full value up to `min`, silent from `max`,
/// shaped by `falloff` in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rolloff {
    pub min: f32,
    pub max: f32,
    pub falloff: Falloff,
}

impl Rolloff {
    /// Leaves every distance at full value.
    pub const NONE: Rolloff = Rolloff {
        min: 0.0,
        max: 0.0,
        falloff: Falloff::None,
    };

    pub fn new(min: f32, max: f32, falloff: Falloff) -> Self {
        Self { min, max, falloff }
    }

    pub fn gain_factor(&self, distance: f32) -> f32 {
        if self.min == self.max || distance <= self.min {
            return 1.0;
        }
        if distance >= self.max {
            return 0.0;
        }
        let t = (distance - self.min) / (self.max - self.min);
        self.falloff.attenuation(t)
    }
}

impl Default for Rolloff {
    fn default() -> Self {
        Self::NONE
    }
}

/// A family of sounds sharing rolloff behavior. Missing profiles behave as [`Rolloff::NONE`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoundCategory {
    pub name: String,
    pub rolloff: Option<Rolloff>,
    pub lowpass_rolloff: Option<Rolloff>,
    pub highpass_rolloff: Option<Rolloff>,
    pub conic_rolloff: Option<Rolloff>,
}

impl SoundCategory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn rolloff(mut self, rolloff: Rolloff) -> Self {
        self.rolloff = Some(rolloff);
        self
    }

    pub fn lowpass_rolloff(mut self, rolloff: Rolloff) -> Self {
        self.lowpass_rolloff = Some(rolloff);
        self
    }

    pub fn highpass_rolloff(mut self, rolloff: Rolloff) -> Self {
        self.highpass_rolloff = Some(rolloff);
        self
    }

    /// Cone attenuation, evaluated against the angle between the source facing
    /// and the direction to the observer.
    pub fn conic_rolloff(mut self, rolloff: Rolloff) -> Self {
        self.conic_rolloff = Some(rolloff);
        self
    }

    pub fn base(&self) -> Rolloff {
        self.rolloff.unwrap_or(Rolloff::NONE)
    }

    pub fn lowpass(&self) -> Rolloff {
        self.lowpass_rolloff.unwrap_or(Rolloff::NONE)
    }

    pub fn highpass(&self) -> Rolloff {
        self.highpass_rolloff.unwrap_or(Rolloff::NONE)
    }

    pub fn conic(&self) -> Rolloff {
        self.conic_rolloff.unwrap_or(Rolloff::NONE)
    }
}
