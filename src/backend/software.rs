use super::{
    AudioBackend, BufferHandle, EffectSend, EffectSlotHandle, FilterHandle, PcmFormat,
    PlaybackState, SourceHandle,
};
use crate::error::{Result, SonorityError};
use crate::math::Vec3;
use crate::sound::{EchoParams, ReverbParams};
use std::collections::{HashMap, VecDeque};
use std::f32::consts::FRAC_PI_4;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One-pole coefficient splitting the direct path into low and high bands.
const CROSSOVER_COEFF: f32 = 0.1;

struct BufferData {
    samples: Vec<f32>,
    format: PcmFormat,
}

impl BufferData {
    fn frames(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }
}

#[derive(Clone, Copy)]
struct FilterState {
    gain: f32,
    lowpass: f32,
    highpass: f32,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            gain: 1.0,
            lowpass: 1.0,
            highpass: 1.0,
        }
    }
}

struct SlotState {
    gain: f32,
    echo: Option<EchoParams>,
    reverb: Option<ReverbParams>,
}

struct SourceState {
    queue: VecDeque<u32>,
    current: usize,
    frame_pos: f64,
    state: PlaybackState,
    looping: bool,
    gain: f32,
    pitch: f32,
    position: Vec3,
    filter: Option<u32>,
    sends: [Option<u32>; 2],
    lowpass_memory: [f32; 2],
}

impl SourceState {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            current: 0,
            frame_pos: 0.0,
            state: PlaybackState::Initial,
            looping: false,
            gain: 1.0,
            pitch: 1.0,
            position: Vec3::ZERO,
            filter: None,
            sends: [None, None],
            lowpass_memory: [0.0; 2],
        }
    }

    fn rewind(&mut self) {
        self.current = 0;
        self.frame_pos = 0.0;
        self.lowpass_memory = [0.0; 2];
    }

    fn halt(&mut self) {
        self.state = PlaybackState::Stopped;
        self.current = self.queue.len();
        self.frame_pos = 0.0;
    }

    /// Moves past finished or empty buffers and returns the one under the
    /// cursor, stopping the source when the queue runs out.
    fn settle<'a>(&mut self, buffers: &'a HashMap<u32, BufferData>) -> Option<&'a BufferData> {
        let mut wrapped = false;
        loop {
            if self.current >= self.queue.len() {
                if self.looping && !self.queue.is_empty() && !wrapped {
                    self.current = 0;
                    wrapped = true;
                } else {
                    self.halt();
                    return None;
                }
            }
            match buffers.get(&self.queue[self.current]) {
                Some(buffer) if (self.frame_pos as usize) < buffer.frames() => return Some(buffer),
                Some(buffer) => {
                    self.frame_pos = (self.frame_pos - buffer.frames() as f64).max(0.0);
                    self.current += 1;
                }
                None => {
                    self.frame_pos = 0.0;
                    self.current += 1;
                }
            }
        }
    }

    fn mix_into(
        &mut self,
        buffers: &HashMap<u32, BufferData>,
        filter: FilterState,
        out: &mut [f32],
        channels: usize,
        output_rate: u32,
    ) {
        if self.state != PlaybackState::Playing {
            return;
        }
        let pan = (self.position.x.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
        let (pan_left, pan_right) = (pan.cos(), pan.sin());

        for frame in out.chunks_exact_mut(channels) {
            let Some(buffer) = self.settle(buffers) else {
                return;
            };
            let index = self.frame_pos as usize;
            let buffer_channels = buffer.format.channels.max(1) as usize;
            let base = index * buffer_channels;
            let (left, right) = if buffer_channels == 1 {
                let sample = buffer.samples[base];
                (sample * pan_left, sample * pan_right)
            } else {
                (buffer.samples[base], buffer.samples[base + 1])
            };

            let mut filtered = [left, right];
            for (sample, memory) in filtered.iter_mut().zip(self.lowpass_memory.iter_mut()) {
                *memory += CROSSOVER_COEFF * (*sample - *memory);
                let high = *sample - *memory;
                *sample = (*memory * filter.lowpass + high * filter.highpass)
                    * filter.gain
                    * self.gain;
            }

            if channels == 1 {
                frame[0] += (filtered[0] + filtered[1]) * 0.5;
            } else {
                frame[0] += filtered[0];
                frame[1] += filtered[1];
            }

            let step =
                self.pitch.max(0.0) as f64 * buffer.format.sample_rate as f64 / output_rate as f64;
            self.frame_pos += step;
        }
    }
}

struct MixerState {
    output_rate: u32,
    next_handle: u32,
    source_limit: Option<usize>,
    sources: HashMap<u32, SourceState>,
    buffers: HashMap<u32, BufferData>,
    filters: HashMap<u32, FilterState>,
    slots: HashMap<u32, SlotState>,
}

impl MixerState {
    fn allocate_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    fn mix(&mut self, out: &mut [f32], channels: usize) {
        let MixerState {
            output_rate,
            sources,
            buffers,
            filters,
            ..
        } = self;
        for source in sources.values_mut() {
            let filter = source
                .filter
                .and_then(|id| filters.get(&id).copied())
                .unwrap_or_default();
            source.mix_into(buffers, filter, out, channels, *output_rate);
        }
    }
}

/// Observable state of a source, for tests and diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSnapshot {
    pub state: PlaybackState,
    pub gain: f32,
    pub pitch: f32,
    pub position: Vec3,
    pub looping: bool,
    pub queued: usize,
    pub processed: usize,
    pub filter: Option<FilterHandle>,
    pub echo_slot: Option<EffectSlotHandle>,
    pub reverb_slot: Option<EffectSlotHandle>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotSnapshot {
    pub gain: f32,
    pub echo: Option<EchoParams>,
    pub reverb: Option<ReverbParams>,
}

/// Number of live backend objects of each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectCounts {
    pub sources: usize,
    pub buffers: usize,
    pub filters: usize,
    pub slots: usize,
}

/// In-process mixing backend.
///
/// Clones share state, so one clone can be handed to the engine while another
/// feeds an output device through [`render`](Self::render). Effect slots store
/// their parameters but are not rendered.
#[derive(Clone)]
pub struct SoftwareBackend {
    state: Arc<Mutex<MixerState>>,
}

impl SoftwareBackend {
    pub fn new(output_rate: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MixerState {
                output_rate,
                next_handle: 0,
                source_limit: None,
                sources: HashMap::new(),
                buffers: HashMap::new(),
                filters: HashMap::new(),
                slots: HashMap::new(),
            })),
        }
    }

    /// Makes `create_source` fail once `limit` sources exist.
    pub fn with_source_limit(self, limit: usize) -> Self {
        self.lock().source_limit = Some(limit);
        self
    }

    pub fn output_rate(&self) -> u32 {
        self.lock().output_rate
    }

    fn lock(&self) -> MutexGuard<'_, MixerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mixes every playing source into `out` (interleaved, `channels` wide).
    ///
    /// Intended for a real-time callback: if the engine holds the lock the
    /// block is rendered as silence instead of waiting.
    pub fn render(&self, out: &mut [f32], channels: u16) {
        out.fill(0.0);
        let channels = channels.max(1) as usize;
        match self.state.try_lock() {
            Ok(mut state) => state.mix(out, channels),
            Err(_) => log::warn!("Mixer busy, rendering {} samples of silence", out.len()),
        }
    }

    /// Plays `frames` output frames into a scratch buffer, blocking on the lock.
    pub fn advance(&self, frames: usize) {
        let mut scratch = vec![0.0f32; frames * 2];
        self.lock().mix(&mut scratch, 2);
    }

    pub fn source_snapshot(&self, source: SourceHandle) -> Option<SourceSnapshot> {
        let state = self.lock();
        let src = state.sources.get(&source.raw())?;
        Some(SourceSnapshot {
            state: src.state,
            gain: src.gain,
            pitch: src.pitch,
            position: src.position,
            looping: src.looping,
            queued: src.queue.len(),
            processed: src.current.min(src.queue.len()),
            filter: src.filter.map(FilterHandle::from_raw),
            echo_slot: src.sends[0].map(EffectSlotHandle::from_raw),
            reverb_slot: src.sends[1].map(EffectSlotHandle::from_raw),
        })
    }

    pub fn filter_gains(&self, filter: FilterHandle) -> Option<(f32, f32, f32)> {
        let state = self.lock();
        state
            .filters
            .get(&filter.raw())
            .map(|f| (f.gain, f.lowpass, f.highpass))
    }

    pub fn slot_snapshot(&self, slot: EffectSlotHandle) -> Option<SlotSnapshot> {
        let state = self.lock();
        state.slots.get(&slot.raw()).map(|s| SlotSnapshot {
            gain: s.gain,
            echo: s.echo,
            reverb: s.reverb,
        })
    }

    pub fn object_counts(&self) -> ObjectCounts {
        let state = self.lock();
        ObjectCounts {
            sources: state.sources.len(),
            buffers: state.buffers.len(),
            filters: state.filters.len(),
            slots: state.slots.len(),
        }
    }

    fn with_source(&mut self, source: SourceHandle, f: impl FnOnce(&mut SourceState)) {
        if let Some(src) = self.lock().sources.get_mut(&source.raw()) {
            f(src);
        }
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new(48000)
    }
}

impl AudioBackend for SoftwareBackend {
    fn create_source(&mut self) -> Result<SourceHandle> {
        let mut state = self.lock();
        if let Some(limit) = state.source_limit {
            if state.sources.len() >= limit {
                return Err(SonorityError::Backend(format!(
                    "Source limit of {} reached",
                    limit
                )));
            }
        }
        let id = state.allocate_handle();
        state.sources.insert(id, SourceState::new());
        Ok(SourceHandle::from_raw(id))
    }

    fn destroy_source(&mut self, source: SourceHandle) {
        self.lock().sources.remove(&source.raw());
    }

    fn create_filter(&mut self) -> Result<FilterHandle> {
        let mut state = self.lock();
        let id = state.allocate_handle();
        state.filters.insert(id, FilterState::default());
        Ok(FilterHandle::from_raw(id))
    }

    fn destroy_filter(&mut self, filter: FilterHandle) {
        self.lock().filters.remove(&filter.raw());
    }

    fn set_filter_gains(&mut self, filter: FilterHandle, gain: f32, lowpass: f32, highpass: f32) {
        if let Some(f) = self.lock().filters.get_mut(&filter.raw()) {
            *f = FilterState {
                gain,
                lowpass,
                highpass,
            };
        }
    }

    fn create_effect_slot(&mut self) -> Result<EffectSlotHandle> {
        let mut state = self.lock();
        let id = state.allocate_handle();
        state.slots.insert(
            id,
            SlotState {
                gain: 0.0,
                echo: None,
                reverb: None,
            },
        );
        Ok(EffectSlotHandle::from_raw(id))
    }

    fn destroy_effect_slot(&mut self, slot: EffectSlotHandle) {
        self.lock().slots.remove(&slot.raw());
    }

    fn set_slot_gain(&mut self, slot: EffectSlotHandle, gain: f32) {
        if let Some(s) = self.lock().slots.get_mut(&slot.raw()) {
            s.gain = gain;
        }
    }

    fn set_slot_echo(&mut self, slot: EffectSlotHandle, echo: &EchoParams) {
        if let Some(s) = self.lock().slots.get_mut(&slot.raw()) {
            s.echo = Some(*echo);
        }
    }

    fn set_slot_reverb(&mut self, slot: EffectSlotHandle, reverb: &ReverbParams) {
        if let Some(s) = self.lock().slots.get_mut(&slot.raw()) {
            s.reverb = Some(*reverb);
        }
    }

    fn create_buffer(&mut self, pcm: &[f32], format: PcmFormat) -> Result<BufferHandle> {
        if format.channels == 0 || format.sample_rate == 0 {
            return Err(SonorityError::Backend(format!(
                "Invalid buffer format {:?}",
                format
            )));
        }
        let mut state = self.lock();
        let id = state.allocate_handle();
        state.buffers.insert(
            id,
            BufferData {
                samples: pcm.to_vec(),
                format,
            },
        );
        Ok(BufferHandle::from_raw(id))
    }

    fn set_buffer_data(&mut self, buffer: BufferHandle, pcm: &[f32], format: PcmFormat) {
        if let Some(data) = self.lock().buffers.get_mut(&buffer.raw()) {
            data.samples.clear();
            data.samples.extend_from_slice(pcm);
            data.format = format;
        }
    }

    fn buffer_size_bytes(&self, buffer: BufferHandle) -> usize {
        self.lock()
            .buffers
            .get(&buffer.raw())
            .map(|data| data.samples.len() * std::mem::size_of::<f32>())
            .unwrap_or(0)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.lock().buffers.remove(&buffer.raw());
    }

    fn set_buffer(&mut self, source: SourceHandle, buffer: Option<BufferHandle>) {
        self.with_source(source, |src| {
            src.queue.clear();
            if let Some(buffer) = buffer {
                src.queue.push_back(buffer.raw());
            }
            src.rewind();
        });
    }

    fn enqueue_buffer(&mut self, source: SourceHandle, buffer: BufferHandle) {
        self.with_source(source, |src| src.queue.push_back(buffer.raw()));
    }

    fn dequeue_buffer(&mut self, source: SourceHandle) -> Option<BufferHandle> {
        let mut state = self.lock();
        let src = state.sources.get_mut(&source.raw())?;
        if src.current == 0 || src.queue.is_empty() {
            return None;
        }
        src.current -= 1;
        src.queue.pop_front().map(BufferHandle::from_raw)
    }

    fn processed_buffer_count(&self, source: SourceHandle) -> usize {
        self.lock()
            .sources
            .get(&source.raw())
            .map(|src| src.current.min(src.queue.len()))
            .unwrap_or(0)
    }

    fn set_position(&mut self, source: SourceHandle, position: Vec3) {
        self.with_source(source, |src| src.position = position);
    }

    fn set_gain(&mut self, source: SourceHandle, gain: f32) {
        self.with_source(source, |src| src.gain = gain);
    }

    fn set_pitch(&mut self, source: SourceHandle, pitch: f32) {
        self.with_source(source, |src| src.pitch = pitch);
    }

    fn set_looping(&mut self, source: SourceHandle, looping: bool) {
        self.with_source(source, |src| src.looping = looping);
    }

    fn set_filter(&mut self, source: SourceHandle, filter: Option<FilterHandle>) {
        self.with_source(source, |src| src.filter = filter.map(|f| f.raw()));
    }

    fn set_effect_send(
        &mut self,
        source: SourceHandle,
        send: EffectSend,
        slot: Option<EffectSlotHandle>,
    ) {
        self.with_source(source, |src| src.sends[send.index()] = slot.map(|s| s.raw()));
    }

    fn play(&mut self, source: SourceHandle) {
        let mut state = self.lock();
        let MixerState {
            sources, buffers, ..
        } = &mut *state;
        if let Some(src) = sources.get_mut(&source.raw()) {
            if src.state != PlaybackState::Paused {
                src.rewind();
            }
            src.state = PlaybackState::Playing;
            // An empty or fully zero-length queue stops right away.
            src.settle(buffers);
        }
    }

    fn pause(&mut self, source: SourceHandle) {
        self.with_source(source, |src| {
            if src.state == PlaybackState::Playing {
                src.state = PlaybackState::Paused;
            }
        });
    }

    fn stop(&mut self, source: SourceHandle) {
        self.with_source(source, SourceState::halt);
    }

    fn playback_state(&self, source: SourceHandle) -> PlaybackState {
        self.lock()
            .sources
            .get(&source.raw())
            .map(|src| src.state)
            .unwrap_or(PlaybackState::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MONO: PcmFormat = PcmFormat {
        sample_rate: 48000,
        channels: 1,
    };

    #[test]
    fn test_queue_processing_and_dequeue() {
        let mut backend = SoftwareBackend::new(48000);
        let source = backend.create_source().unwrap();
        let a = backend.create_buffer(&[0.5; 100], MONO).unwrap();
        let b = backend.create_buffer(&[0.5; 100], MONO).unwrap();
        backend.enqueue_buffer(source, a);
        backend.enqueue_buffer(source, b);
        backend.play(source);

        backend.advance(150);
        assert_eq!(backend.processed_buffer_count(source), 1);
        assert_eq!(backend.dequeue_buffer(source), Some(a));
        assert_eq!(backend.dequeue_buffer(source), None);
        assert_eq!(backend.playback_state(source), PlaybackState::Playing);

        backend.advance(100);
        assert_eq!(backend.playback_state(source), PlaybackState::Stopped);
        assert_eq!(backend.processed_buffer_count(source), 1);
    }

    #[test]
    fn test_empty_queue_stops_on_play() {
        let mut backend = SoftwareBackend::default();
        let source = backend.create_source().unwrap();
        let empty = backend.create_buffer(&[], MONO).unwrap();
        backend.enqueue_buffer(source, empty);
        backend.play(source);
        assert_eq!(backend.playback_state(source), PlaybackState::Stopped);
        assert_eq!(backend.processed_buffer_count(source), 1);
    }

    #[test]
    fn test_static_looping_never_stops() {
        let mut backend = SoftwareBackend::default();
        let source = backend.create_source().unwrap();
        let clip = backend.create_buffer(&[0.25; 64], MONO).unwrap();
        backend.set_buffer(source, Some(clip));
        backend.set_looping(source, true);
        backend.play(source);
        backend.advance(1000);
        assert_eq!(backend.playback_state(source), PlaybackState::Playing);

        backend.pause(source);
        assert_eq!(backend.playback_state(source), PlaybackState::Paused);
        backend.play(source);
        assert_eq!(backend.playback_state(source), PlaybackState::Playing);
        backend.stop(source);
        assert_eq!(backend.playback_state(source), PlaybackState::Stopped);
    }

    #[test]
    fn test_render_pans_mono_sources() {
        let mut backend = SoftwareBackend::default();
        let source = backend.create_source().unwrap();
        let clip = backend.create_buffer(&[1.0; 16], MONO).unwrap();
        backend.set_buffer(source, Some(clip));
        backend.set_position(source, Vec3::new(1.0, 0.0, 0.0));
        backend.play(source);

        let mut out = vec![0.0f32; 8];
        backend.render(&mut out, 2);
        assert!(out[0].abs() < 1e-4);
        assert!(out[1] > 0.0);
    }

    #[test]
    fn test_source_limit() {
        let mut backend = SoftwareBackend::default().with_source_limit(1);
        assert!(backend.create_source().is_ok());
        assert!(matches!(
            backend.create_source(),
            Err(SonorityError::Backend(_))
        ));
    }
}
