//! The positional audio backend the engine drives.
//!
//! [`AudioBackend`] mirrors the OpenAL object model: sources play either one
//! static buffer or a queue of buffers, each source routes through one filter
//! and up to two auxiliary effect slots. Handles are opaque integers owned by
//! the backend.

#[cfg(feature = "device")]
mod device;
mod software;

#[cfg(feature = "device")]
pub use device::DeviceOutput;
pub use software::{ObjectCounts, SlotSnapshot, SoftwareBackend, SourceSnapshot};

use crate::error::Result;
use crate::math::Vec3;
use crate::sound::{EchoParams, ReverbParams};

macro_rules! backend_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(u32);

        impl $name {
            pub fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            pub fn raw(&self) -> u32 {
                self.0
            }
        }
    };
}

backend_handle!(
    /// A playback unit: position, gain, pitch and a buffer queue.
    SourceHandle
);
backend_handle!(
    /// A block of PCM data resident in the backend.
    BufferHandle
);
backend_handle!(
    /// A band filter applied to one source's direct path.
    FilterHandle
);
backend_handle!(
    /// An auxiliary effect slot hosting echo or reverb.
    EffectSlotHandle
);

/// Layout of the interleaved `f32` samples handed to [`AudioBackend::create_buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Number of interleaved samples covering `duration` seconds.
    pub fn samples_for(&self, seconds: f32) -> usize {
        let frames = (self.sample_rate as f32 * seconds).round() as usize;
        frames.max(1) * self.channels.max(1) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// The two auxiliary sends every voice owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectSend {
    Echo,
    Reverb,
}

impl EffectSend {
    pub fn index(&self) -> usize {
        match self {
            EffectSend::Echo => 0,
            EffectSend::Reverb => 1,
        }
    }
}

/// OpenAL-style backend.
///
/// Creation calls are fallible and only happen at startup or when loading
/// audio. Parameter setters are infallible; unknown handles are ignored.
///
/// Queue semantics follow OpenAL: a buffer counts as processed once playback
/// has moved past it, a source with an exhausted queue reports
/// [`PlaybackState::Stopped`], and `play` on a stopped source restarts from
/// the head of the queue.
pub trait AudioBackend: Send {
    fn create_source(&mut self) -> Result<SourceHandle>;
    fn destroy_source(&mut self, source: SourceHandle);

    fn create_filter(&mut self) -> Result<FilterHandle>;
    fn destroy_filter(&mut self, filter: FilterHandle);
    fn set_filter_gains(&mut self, filter: FilterHandle, gain: f32, lowpass: f32, highpass: f32);

    fn create_effect_slot(&mut self) -> Result<EffectSlotHandle>;
    fn destroy_effect_slot(&mut self, slot: EffectSlotHandle);
    fn set_slot_gain(&mut self, slot: EffectSlotHandle, gain: f32);
    fn set_slot_echo(&mut self, slot: EffectSlotHandle, echo: &EchoParams);
    fn set_slot_reverb(&mut self, slot: EffectSlotHandle, reverb: &ReverbParams);

    fn create_buffer(&mut self, pcm: &[f32], format: PcmFormat) -> Result<BufferHandle>;
    fn set_buffer_data(&mut self, buffer: BufferHandle, pcm: &[f32], format: PcmFormat);
    fn buffer_size_bytes(&self, buffer: BufferHandle) -> usize;
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Attach one static buffer, or detach everything with `None`.
    fn set_buffer(&mut self, source: SourceHandle, buffer: Option<BufferHandle>);
    fn enqueue_buffer(&mut self, source: SourceHandle, buffer: BufferHandle);
    /// Remove the oldest processed buffer from the queue.
    fn dequeue_buffer(&mut self, source: SourceHandle) -> Option<BufferHandle>;
    fn processed_buffer_count(&self, source: SourceHandle) -> usize;

    fn set_position(&mut self, source: SourceHandle, position: Vec3);
    fn set_gain(&mut self, source: SourceHandle, gain: f32);
    fn set_pitch(&mut self, source: SourceHandle, pitch: f32);
    fn set_looping(&mut self, source: SourceHandle, looping: bool);
    fn set_filter(&mut self, source: SourceHandle, filter: Option<FilterHandle>);
    fn set_effect_send(
        &mut self,
        source: SourceHandle,
        send: EffectSend,
        slot: Option<EffectSlotHandle>,
    );

    fn play(&mut self, source: SourceHandle);
    fn pause(&mut self, source: SourceHandle);
    fn stop(&mut self, source: SourceHandle);
    fn playback_state(&self, source: SourceHandle) -> PlaybackState;
}
