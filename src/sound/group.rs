use super::AtomicF32;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

/// A node in the mixing hierarchy.
///
/// Modifiers are stored atomically so the application can fade a whole group
/// from any thread; the engine reads the composed (`calculated_*`) values every
/// voice update.
#[derive(Debug)]
pub struct SoundGroup {
    id: GroupId,
    name: String,
    parent: Option<Arc<SoundGroup>>,
    gain: AtomicF32,
    pitch: AtomicF32,
    lowpass_gain: AtomicF32,
    highpass_gain: AtomicF32,
    effect_gain: AtomicF32,
    occludable: bool,
    two_dimensional: bool,
    zero_position: bool,
    max_voices: usize,
}

impl SoundGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: GroupId(NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            parent: None,
            gain: AtomicF32::new(1.0),
            pitch: AtomicF32::new(1.0),
            lowpass_gain: AtomicF32::new(1.0),
            highpass_gain: AtomicF32::new(1.0),
            effect_gain: AtomicF32::new(1.0),
            occludable: false,
            two_dimensional: false,
            zero_position: false,
            max_voices: 0,
        }
    }

    pub fn parent(mut self, parent: Arc<SoundGroup>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn occludable(mut self, occludable: bool) -> Self {
        self.occludable = occludable;
        self
    }

    /// Voices without a location pan by request instead of playing centered.
    pub fn two_dimensional(mut self, two_dimensional: bool) -> Self {
        self.two_dimensional = two_dimensional;
        self
    }

    /// Voices always play from the observer's position, ignoring their location.
    pub fn zero_position(mut self, zero_position: bool) -> Self {
        self.zero_position = zero_position;
        self
    }

    /// Maximum concurrent voices in this group, `0` for unlimited.
    pub fn max_voices(mut self, max_voices: usize) -> Self {
        self.max_voices = max_voices;
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_occludable(&self) -> bool {
        self.occludable
    }

    pub fn is_two_dimensional(&self) -> bool {
        self.two_dimensional
    }

    pub fn is_zero_position(&self) -> bool {
        self.zero_position
    }

    pub fn voice_limit(&self) -> usize {
        self.max_voices
    }

    pub fn gain(&self) -> f32 {
        self.gain.load()
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain);
    }

    pub fn pitch(&self) -> f32 {
        self.pitch.load()
    }

    pub fn set_pitch(&self, pitch: f32) {
        self.pitch.store(pitch);
    }

    pub fn lowpass_gain(&self) -> f32 {
        self.lowpass_gain.load()
    }

    pub fn set_lowpass_gain(&self, gain: f32) {
        self.lowpass_gain.store(gain);
    }

    pub fn highpass_gain(&self) -> f32 {
        self.highpass_gain.load()
    }

    pub fn set_highpass_gain(&self, gain: f32) {
        self.highpass_gain.store(gain);
    }

    pub fn effect_gain(&self) -> f32 {
        self.effect_gain.load()
    }

    pub fn set_effect_gain(&self, gain: f32) {
        self.effect_gain.store(gain);
    }

    fn compose(&self, own: f32, of_parent: impl Fn(&SoundGroup) -> f32) -> f32 {
        match &self.parent {
            Some(parent) => of_parent(parent.as_ref()) * own,
            None => own,
        }
    }

    pub fn calculated_gain(&self) -> f32 {
        self.compose(self.gain(), SoundGroup::calculated_gain)
    }

    pub fn calculated_pitch(&self) -> f32 {
        self.compose(self.pitch(), SoundGroup::calculated_pitch)
    }

    pub fn calculated_lowpass_gain(&self) -> f32 {
        self.compose(self.lowpass_gain(), SoundGroup::calculated_lowpass_gain)
    }

    pub fn calculated_highpass_gain(&self) -> f32 {
        self.compose(self.highpass_gain(), SoundGroup::calculated_highpass_gain)
    }

    pub fn calculated_effect_gain(&self) -> f32 {
        self.compose(self.effect_gain(), SoundGroup::calculated_effect_gain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifiers_compose_through_parents() {
        let master = SoundGroup::new("master").into_shared();
        let music = SoundGroup::new("music").parent(master.clone()).into_shared();
        let combat = SoundGroup::new("combat").parent(music.clone());

        master.set_gain(0.5);
        music.set_gain(0.5);
        combat.set_gain(0.8);
        assert!((combat.calculated_gain() - 0.2).abs() < 1e-6);

        music.set_pitch(2.0);
        assert!((combat.calculated_pitch() - 2.0).abs() < 1e-6);
        assert_eq!(master.calculated_effect_gain(), 1.0);
    }

    #[test]
    fn test_flags() {
        let ui = SoundGroup::new("ui")
            .two_dimensional(true)
            .zero_position(true)
            .max_voices(3);
        assert!(ui.is_two_dimensional());
        assert!(ui.is_zero_position());
        assert!(!ui.is_occludable());
        assert_eq!(ui.voice_limit(), 3);
    }
}
