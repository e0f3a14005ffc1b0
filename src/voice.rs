//! A leased backend playback unit.

use crate::backend::{
    AudioBackend, BufferHandle, EffectSend, EffectSlotHandle, FilterHandle, SourceHandle,
};
use crate::error::Result;
use crate::sound::{SoundAsset, SoundCategory, SoundGroup, SoundLocation, SoundScape};
use crate::spatial::VoiceMix;
use crate::stream::SoundStream;
use std::fmt;
use std::sync::Arc;

/// Stable index of a voice within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(usize);

impl VoiceId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice#{}", self.0)
    }
}

/// Audio data bound to a voice.
pub enum VoiceAudio {
    None,
    /// A static clip. `owned` clips belong to the voice and die with it;
    /// the rest belong to the sound cache.
    Clip { clip: BufferHandle, owned: bool },
    Stream(SoundStream),
}

impl VoiceAudio {
    pub fn is_stream(&self) -> bool {
        matches!(self, VoiceAudio::Stream(_))
    }

    /// The cache-owned clip this voice plays, if any.
    pub fn shared_clip(&self) -> Option<BufferHandle> {
        match self {
            VoiceAudio::Clip { clip, owned: false } => Some(*clip),
            _ => None,
        }
    }
}

/// What a voice is currently playing and how.
pub struct Assignment {
    pub asset: Arc<SoundAsset>,
    pub category: Option<Arc<SoundCategory>>,
    pub group: Option<Arc<SoundGroup>>,
    pub location: Option<Arc<SoundLocation>>,
    pub channel: Option<u32>,
    pub gain: f32,
    pub pitch: f32,
    /// Pitch variance sample, fixed for the lifetime of the play.
    pub pitch_offset: f32,
    pub pan: f32,
    pub looping: bool,
    pub audio: VoiceAudio,
    /// Soundscape generation whose effect parameters the slots currently hold.
    pub soundscape_generation: Option<u64>,
}

pub struct Voice {
    id: VoiceId,
    source: SourceHandle,
    filter: FilterHandle,
    echo_slot: EffectSlotHandle,
    reverb_slot: EffectSlotHandle,
    pub(crate) assignment: Option<Assignment>,
}

impl Voice {
    /// Creates the backend objects of one voice and wires filter and sends to the source.
    pub fn create(id: VoiceId, backend: &mut dyn AudioBackend) -> Result<Self> {
        let source = backend.create_source()?;
        let filter = match backend.create_filter() {
            Ok(filter) => filter,
            Err(e) => {
                backend.destroy_source(source);
                return Err(e);
            }
        };
        let echo_slot = match backend.create_effect_slot() {
            Ok(slot) => slot,
            Err(e) => {
                backend.destroy_filter(filter);
                backend.destroy_source(source);
                return Err(e);
            }
        };
        let reverb_slot = match backend.create_effect_slot() {
            Ok(slot) => slot,
            Err(e) => {
                backend.destroy_effect_slot(echo_slot);
                backend.destroy_filter(filter);
                backend.destroy_source(source);
                return Err(e);
            }
        };

        backend.set_filter(source, Some(filter));
        backend.set_effect_send(source, EffectSend::Echo, Some(echo_slot));
        backend.set_effect_send(source, EffectSend::Reverb, Some(reverb_slot));
        backend.set_slot_gain(echo_slot, 0.0);
        backend.set_slot_gain(reverb_slot, 0.0);

        Ok(Self {
            id,
            source,
            filter,
            echo_slot,
            reverb_slot,
            assignment: None,
        })
    }

    pub fn id(&self) -> VoiceId {
        self.id
    }

    pub fn source(&self) -> SourceHandle {
        self.source
    }

    pub fn filter(&self) -> FilterHandle {
        self.filter
    }

    pub fn echo_slot(&self) -> EffectSlotHandle {
        self.echo_slot
    }

    pub fn reverb_slot(&self) -> EffectSlotHandle {
        self.reverb_slot
    }

    pub fn assignment(&self) -> Option<&Assignment> {
        self.assignment.as_ref()
    }

    pub fn push_mix(&self, backend: &mut dyn AudioBackend, mix: &VoiceMix) {
        backend.set_position(self.source, mix.position);
        backend.set_gain(self.source, mix.gain);
        backend.set_pitch(self.source, mix.pitch);
        backend.set_filter_gains(self.filter, 1.0, mix.filter_lf, mix.filter_hf);
        backend.set_slot_gain(self.echo_slot, mix.echo_send);
        backend.set_slot_gain(self.reverb_slot, mix.reverb_send);
    }

    pub fn push_soundscape(&self, backend: &mut dyn AudioBackend, soundscape: Option<&SoundScape>) {
        let Some(soundscape) = soundscape else {
            return;
        };
        if let Some(echo) = &soundscape.echo {
            backend.set_slot_echo(self.echo_slot, echo);
        }
        if let Some(reverb) = &soundscape.reverb {
            backend.set_slot_reverb(self.reverb_slot, reverb);
        }
    }

    pub fn destroy(self, backend: &mut dyn AudioBackend) {
        backend.stop(self.source);
        backend.set_buffer(self.source, None);
        backend.destroy_source(self.source);
        backend.destroy_filter(self.filter);
        backend.destroy_effect_slot(self.echo_slot);
        backend.destroy_effect_slot(self.reverb_slot);
    }
}
