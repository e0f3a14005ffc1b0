//! Per-voice spatialization.
//!
//! Each voice update runs in two steps. [`Spatializer::reference_frame`]
//! measures where the sound is relative to the observer. The result then
//! combines with the rolloff profiles, group modifiers and the active
//! soundscape into the [`VoiceMix`] pushed to the backend.

use crate::math::{Vec3, lerp, relative_angle_degrees, vector_angle_degrees};
use crate::sound::{Rolloff, SoundCategory, SoundGroup, SoundLocation, SoundScape};
use crate::voice::Assignment;

/// Estimates how much geometry lies between a sound and the observer.
///
/// Returns a value in `[0, 1]` where `0` is a clear line of sight and `1` is
/// fully blocked. Called once per occludable voice per voice update, on the
/// processing thread, so implementations should be cheap.
///
/// Closures implement this trait:
///
/// ```ignore
/// system.set_occlusion(|sound: Vec3, observer: Vec3| {
///     if sound.z > observer.z { 1.0 } else { 0.0 }
/// })?;
/// ```
pub trait OcclusionFunction: Send + Sync {
    fn occlusion(&self, sound: Vec3, observer: Vec3) -> f32;
}

impl<F> OcclusionFunction for F
where
    F: Fn(Vec3, Vec3) -> f32 + Send + Sync,
{
    fn occlusion(&self, sound: Vec3, observer: Vec3) -> f32 {
        self(sound, observer)
    }
}

/// Geometry of one voice relative to the observer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReferenceFrame {
    pub distance: f32,
    /// Direction of the sound as seen by the observer, in `(-180, 180]`, positive to the left.
    pub observer_angle: f32,
    /// Angle between the sound's facing and the direction to the observer, in `[0, 180]`.
    pub cone_angle: f32,
    pub occlusion: f32,
}

/// Values pushed to a voice's source, filter and effect slots.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoiceMix {
    pub position: Vec3,
    pub gain: f32,
    pub pitch: f32,
    pub filter_lf: f32,
    pub filter_hf: f32,
    pub echo_send: f32,
    pub reverb_send: f32,
}

impl VoiceMix {
    pub fn is_audible(&self) -> bool {
        self.gain > 0.0
    }
}

/// World state shared by every voice in one update.
pub struct SpatialContext<'a> {
    pub observer: &'a SoundLocation,
    pub soundscape: Option<&'a SoundScape>,
    pub occlusion: Option<&'a dyn OcclusionFunction>,
    /// Effect send gain at distance zero.
    pub min_effect_gain: f32,
    /// Distance at which effect sends reach full gain. `0` disables the ramp.
    pub max_effect_distance: f32,
}

/// Computes voice mixes, reusing one reference frame as scratch.
#[derive(Debug, Default)]
pub struct Spatializer {
    frame: ReferenceFrame,
}

impl Spatializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The frame computed by the last call to [`spatialize`](Self::spatialize).
    pub fn frame(&self) -> &ReferenceFrame {
        &self.frame
    }

    pub fn spatialize(&mut self, ctx: &SpatialContext<'_>, assignment: &Assignment) -> VoiceMix {
        Self::reference_frame(
            ctx,
            assignment.location.as_deref(),
            assignment.group.as_deref(),
            assignment.pan,
            &mut self.frame,
        );
        Self::mix(ctx, &self.frame, assignment)
    }

    pub fn reference_frame(
        ctx: &SpatialContext<'_>,
        location: Option<&SoundLocation>,
        group: Option<&SoundGroup>,
        pan: f32,
        frame: &mut ReferenceFrame,
    ) {
        *frame = ReferenceFrame::default();

        let two_dimensional = group.is_some_and(SoundGroup::is_two_dimensional);
        let zero_position = group.is_some_and(SoundGroup::is_zero_position);
        let occludable = group.is_some_and(SoundGroup::is_occludable);

        match location {
            Some(location) if !zero_position && location.id() != ctx.observer.id() => {
                let sound = location.position();
                let observer = ctx.observer.position();
                let relative = sound - observer;

                let observer_to_sound = vector_angle_degrees(relative.x, relative.y);
                let sound_to_observer = vector_angle_degrees(-relative.x, -relative.y);

                frame.distance = relative.length();
                frame.observer_angle =
                    relative_angle_degrees(ctx.observer.angle(), observer_to_sound);
                frame.cone_angle =
                    relative_angle_degrees(location.angle(), sound_to_observer).abs();
                if occludable {
                    frame.occlusion = ctx
                        .occlusion
                        .map_or(0.0, |f| f.occlusion(sound, observer).clamp(0.0, 1.0));
                }
            }
            Some(_) => frame.observer_angle = pan_angle(pan),
            None if two_dimensional => frame.observer_angle = pan_angle(pan),
            None => {}
        }
    }

    pub fn mix(
        ctx: &SpatialContext<'_>,
        frame: &ReferenceFrame,
        assignment: &Assignment,
    ) -> VoiceMix {
        let category = assignment.category.as_deref();
        let profile = |select: fn(&SoundCategory) -> Rolloff| {
            category.map_or(Rolloff::NONE, select)
        };

        let distance = frame.distance;
        let rolloff = profile(|c| c.base()).gain_factor(distance);
        let rolloff_lf = profile(|c| c.lowpass()).gain_factor(distance);
        let rolloff_hf = profile(|c| c.highpass()).gain_factor(distance);
        let conic = profile(|c| c.conic()).gain_factor(frame.cone_angle);

        let group = assignment.group.as_deref();
        let group_gain = group.map_or(1.0, SoundGroup::calculated_gain);
        let group_pitch = group.map_or(1.0, SoundGroup::calculated_pitch);
        let group_lf = group.map_or(1.0, SoundGroup::calculated_lowpass_gain);
        let group_hf = group.map_or(1.0, SoundGroup::calculated_highpass_gain);
        let group_effect = group.map_or(1.0, SoundGroup::calculated_effect_gain);

        let (occlusion_gain, occlusion_lf, occlusion_hf) =
            match ctx.soundscape.and_then(|s| s.occlusion) {
                Some(params) => (
                    1.0 - frame.occlusion * (1.0 - params.gain),
                    1.0 - frame.occlusion * (1.0 - params.lowpass_gain),
                    1.0 - frame.occlusion * (1.0 - params.highpass_gain),
                ),
                None => (1.0, 1.0, 1.0),
            };

        let ramp = effect_ramp(distance, ctx.min_effect_gain, ctx.max_effect_distance);
        let presence = |present: bool| if present { 1.0 } else { 0.0 };
        let echo_presence = presence(ctx.soundscape.is_some_and(|s| s.echo.is_some()));
        let reverb_presence = presence(ctx.soundscape.is_some_and(|s| s.reverb.is_some()));

        let angle = frame.observer_angle.to_radians();

        VoiceMix {
            // Listener faces -Z with +X to its right.
            position: Vec3::new(-angle.sin(), 0.0, -angle.cos()),
            gain: assignment.gain
                * group_gain
                * assignment.asset.base_gain()
                * rolloff
                * conic
                * occlusion_gain,
            // TODO: doppler shift from location velocity once locations carry one
            pitch: assignment.pitch * group_pitch * (1.0 + assignment.pitch_offset),
            filter_lf: rolloff_lf * occlusion_lf * group_lf,
            filter_hf: rolloff_hf * occlusion_hf * group_hf,
            echo_send: group_effect * ramp * echo_presence,
            reverb_send: group_effect * ramp * reverb_presence,
        }
    }
}

/// Observer angle for a non-positional voice panned to `pan` in `[-1, 1]`.
fn pan_angle(pan: f32) -> f32 {
    -lerp((pan.clamp(-1.0, 1.0) + 1.0) / 2.0, -90.0, 90.0)
}

/// Effect send scale: `min_gain` at the observer, rising linearly to 1 at `max_distance`.
pub fn effect_ramp(distance: f32, min_gain: f32, max_distance: f32) -> f32 {
    if max_distance <= 0.0 || distance >= max_distance {
        return 1.0;
    }
    lerp(distance / max_distance, min_gain, 1.0)
}
