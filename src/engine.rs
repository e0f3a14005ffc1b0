//! The single-threaded core: command processing, voice allocation and the
//! per-tick voice update.
//!
//! A [`SoundEngine`] owns the backend, the voice pool, the sound cache and the
//! primed streams. It never blocks on producers: commands arrive on a channel
//! and are drained at the start of each tick. [`SoundSystem`](crate::SoundSystem)
//! runs it on a dedicated thread; tests drive it directly with [`SoundEngine::tick`].

use crate::backend::{AudioBackend, BufferHandle, PlaybackState, SourceHandle};
use crate::cache::{PutOutcome, SoundCache};
use crate::config::SoundSystemDesc;
use crate::decoder::{AudioDecoder, decode_all};
use crate::error::{DecodeError, Result, SonorityError};
use crate::events::{EventHandler, EventHub, RejectReason, SoundEvent};
use crate::pool::VoicePool;
use crate::sound::{AssetId, SoundAsset, SoundCategory, SoundGroup, SoundLocation, SoundScape};
use crate::spatial::{OcclusionFunction, SpatialContext, Spatializer, VoiceMix};
use crate::stream::{PrimedStreams, SoundStream};
use crate::voice::{Assignment, VoiceAudio, VoiceId};
use crossbeam_channel::{Receiver, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Play,
    PlayLoop,
    Stop,
    StopAll,
    Pause,
    Resume,
    Precache,
}

/// One action against the voice pool.
///
/// Stop, Pause and Resume select voices by location (narrowed by channel when
/// one is set), otherwise by group, otherwise by asset.
#[derive(Clone)]
pub struct SoundRequest {
    pub kind: RequestKind,
    pub asset: Option<Arc<SoundAsset>>,
    pub group: Option<Arc<SoundGroup>>,
    pub category: Option<Arc<SoundCategory>>,
    pub location: Option<Arc<SoundLocation>>,
    pub channel: Option<u32>,
    pub gain: f32,
    pub pitch: f32,
    /// Stereo placement in `[-1, 1]` for voices without a location in two-dimensional groups.
    pub pan: f32,
}

impl SoundRequest {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            asset: None,
            group: None,
            category: None,
            location: None,
            channel: None,
            gain: 1.0,
            pitch: 1.0,
            pan: 0.0,
        }
    }

    pub fn play(asset: Arc<SoundAsset>) -> Self {
        Self::new(RequestKind::Play).asset(asset)
    }

    pub fn play_looping(asset: Arc<SoundAsset>) -> Self {
        Self::new(RequestKind::PlayLoop).asset(asset)
    }

    pub fn precache(asset: Arc<SoundAsset>) -> Self {
        Self::new(RequestKind::Precache).asset(asset)
    }

    pub fn stop() -> Self {
        Self::new(RequestKind::Stop)
    }

    pub fn stop_all() -> Self {
        Self::new(RequestKind::StopAll)
    }

    pub fn pause() -> Self {
        Self::new(RequestKind::Pause)
    }

    pub fn resume() -> Self {
        Self::new(RequestKind::Resume)
    }

    pub fn kind(mut self, kind: RequestKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn asset(mut self, asset: Arc<SoundAsset>) -> Self {
        self.asset = Some(asset);
        self
    }

    pub fn group(mut self, group: Arc<SoundGroup>) -> Self {
        self.group = Some(group);
        self
    }

    pub fn category(mut self, category: Arc<SoundCategory>) -> Self {
        self.category = Some(category);
        self
    }

    pub fn location(mut self, location: Arc<SoundLocation>) -> Self {
        self.location = Some(location);
        self
    }

    pub fn channel(mut self, channel: u32) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn pan(mut self, pan: f32) -> Self {
        self.pan = pan;
        self
    }
}

pub enum Command {
    Sound(SoundRequest),
    SetObserver(Arc<SoundLocation>),
    SetSoundScape(Option<Arc<SoundScape>>),
    SetOcclusion(Option<Arc<dyn OcclusionFunction>>),
    AddHandler(EventHandler),
    Subscribe(Sender<SoundEvent>),
}

/// Counters published by the processing thread.
#[derive(Debug, Default)]
pub struct EngineStats {
    free_voices: AtomicUsize,
    active_voices: AtomicUsize,
    event_nanos: AtomicU64,
    voice_nanos: AtomicU64,
    ticks: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub free_voices: usize,
    pub active_voices: usize,
    /// Duration of the last event phase.
    pub event_nanos: u64,
    /// Duration of the last voice update phase.
    pub voice_nanos: u64,
    pub ticks: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            free_voices: self.free_voices.load(Ordering::Relaxed),
            active_voices: self.active_voices.load(Ordering::Relaxed),
            event_nanos: self.event_nanos.load(Ordering::Relaxed),
            voice_nanos: self.voice_nanos.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
        }
    }
}

pub struct SoundEngine {
    desc: SoundSystemDesc,
    backend: Box<dyn AudioBackend>,
    decoder: Arc<dyn AudioDecoder>,
    pool: VoicePool,
    cache: SoundCache,
    primed: PrimedStreams,
    /// Clips evicted from the cache while voices still played them.
    retired: Vec<BufferHandle>,
    unsupported: HashSet<AssetId>,
    commands: Receiver<Command>,
    retry: VecDeque<SoundRequest>,
    events: EventHub,
    observer: Arc<SoundLocation>,
    soundscape: Option<Arc<SoundScape>>,
    soundscape_generation: u64,
    occlusion: Option<Arc<dyn OcclusionFunction>>,
    spatializer: Spatializer,
    rng: StdRng,
    stats: Arc<EngineStats>,
    tick_count: u64,
    dead: Vec<VoiceId>,
    shut_down: bool,
}

impl SoundEngine {
    /// Creates every voice up front. Backend failures here are fatal.
    pub fn new(
        desc: SoundSystemDesc,
        mut backend: Box<dyn AudioBackend>,
        decoder: Arc<dyn AudioDecoder>,
        commands: Receiver<Command>,
    ) -> Result<Self> {
        desc.validate()?;
        let pool = VoicePool::new(desc.voices, backend.as_mut())?;
        let rng = match desc.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let stats = Arc::new(EngineStats::default());
        stats.free_voices.store(pool.free_count(), Ordering::Relaxed);

        log::info!(
            "Sound engine ready: {} voices, cache budget {} bytes",
            desc.voices,
            desc.cache_budget
        );

        Ok(Self {
            cache: SoundCache::new(desc.cache_budget),
            desc,
            backend,
            decoder,
            pool,
            primed: PrimedStreams::new(),
            retired: Vec::new(),
            unsupported: HashSet::new(),
            commands,
            retry: VecDeque::new(),
            events: EventHub::new(),
            observer: Arc::new(SoundLocation::default()),
            soundscape: None,
            soundscape_generation: 0,
            occlusion: None,
            spatializer: Spatializer::new(),
            rng,
            stats,
            tick_count: 0,
            dead: Vec::new(),
            shut_down: false,
        })
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        self.stats.clone()
    }

    pub fn pool(&self) -> &VoicePool {
        &self.pool
    }

    pub fn cache(&self) -> &SoundCache {
        &self.cache
    }

    pub fn primed_streams(&self) -> &PrimedStreams {
        &self.primed
    }

    pub fn pending_retries(&self) -> usize {
        self.retry.len()
    }

    pub fn add_handler(&mut self, handler: EventHandler) {
        self.events.add_handler(handler);
    }

    pub fn subscribe(&mut self) -> Receiver<SoundEvent> {
        self.events.subscribe()
    }

    /// Runs one scheduler step: the event phase every tick, the voice phase
    /// every `voice_update_interval` ticks.
    pub fn tick(&mut self) {
        if self.shut_down {
            return;
        }
        self.tick_count += 1;

        let start = Instant::now();
        self.process_events();
        self.stats
            .event_nanos
            .store(start.elapsed().as_nanos() as u64, Ordering::Relaxed);

        if self.tick_count % u64::from(self.desc.voice_update_interval) == 0 {
            let start = Instant::now();
            self.update_voices();
            self.stats
                .voice_nanos
                .store(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        }

        self.publish_counts();
        self.stats.ticks.store(self.tick_count, Ordering::Relaxed);
    }

    fn publish_counts(&self) {
        self.stats
            .free_voices
            .store(self.pool.free_count(), Ordering::Relaxed);
        self.stats
            .active_voices
            .store(self.pool.active_count(), Ordering::Relaxed);
    }

    /// Replays deferred requests, then drains every queued command.
    pub fn process_events(&mut self) {
        let deferred = std::mem::take(&mut self.retry);
        for request in deferred {
            self.handle_request(request);
        }
        while let Ok(command) = self.commands.try_recv() {
            self.handle_command(command);
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Sound(request) => self.handle_request(request),
            Command::SetObserver(observer) => self.observer = observer,
            Command::SetSoundScape(soundscape) => {
                log::info!(
                    "Soundscape changed to {}",
                    soundscape.as_ref().map_or("none", |s| s.name.as_str())
                );
                self.soundscape = soundscape;
                self.soundscape_generation += 1;
            }
            Command::SetOcclusion(occlusion) => self.occlusion = occlusion,
            Command::AddHandler(handler) => self.events.add_handler(handler),
            Command::Subscribe(sender) => self.events.add_subscriber(sender),
        }
    }

    fn handle_request(&mut self, request: SoundRequest) {
        match request.kind {
            RequestKind::Play | RequestKind::PlayLoop => self.handle_play(request),
            RequestKind::Stop => {
                for id in self.select(&request) {
                    self.deallocate(id);
                }
            }
            RequestKind::StopAll => self.stop_all(),
            RequestKind::Pause => {
                for id in self.select(&request) {
                    let source = self.pool.voice(id).source();
                    if self.backend.playback_state(source) == PlaybackState::Playing {
                        self.backend.pause(source);
                    }
                }
            }
            RequestKind::Resume => {
                for id in self.select(&request) {
                    let source = self.pool.voice(id).source();
                    if self.backend.playback_state(source) == PlaybackState::Paused {
                        self.backend.play(source);
                    }
                }
            }
            RequestKind::Precache => match request.asset {
                Some(asset) => self.precache(&asset),
                None => log::warn!("Precache request without an asset"),
            },
        }
    }

    fn select(&self, request: &SoundRequest) -> Vec<VoiceId> {
        if let Some(location) = &request.location {
            let mut voices = self.pool.at_location(location.id());
            if let Some(channel) = request.channel {
                voices.retain(|id| {
                    self.pool
                        .voice(*id)
                        .assignment()
                        .is_some_and(|a| a.channel == Some(channel))
                });
            }
            voices
        } else if let Some(group) = &request.group {
            self.pool.in_group(group.id())
        } else if let Some(asset) = &request.asset {
            self.pool.of_asset(asset.id())
        } else {
            Vec::new()
        }
    }

    fn stop_all(&mut self) {
        for id in self.pool.active().to_vec() {
            self.deallocate(id);
        }
    }

    fn handle_play(&mut self, request: SoundRequest) {
        let Some(asset) = request.asset.clone() else {
            log::warn!("Play request without an asset");
            self.events.emit(SoundEvent::VoiceRejected {
                asset: None,
                reason: RejectReason::MissingAsset,
            });
            return;
        };

        if self.unsupported.contains(&asset.id()) {
            self.events.emit(SoundEvent::VoiceRejected {
                asset: Some(asset.id()),
                reason: RejectReason::UnsupportedAsset,
            });
            return;
        }

        match self.allocate(&request, &asset) {
            Ok(id) => {
                let voice = self.pool.voice(id);
                let looping = voice.assignment().is_some_and(|a| a.looping);
                self.backend.play(voice.source());
                log::debug!("Playing {} on {}", asset.id(), id);
                self.events.emit(SoundEvent::VoicePlayed {
                    voice: id,
                    asset: asset.id(),
                    looping,
                });
            }
            Err(reason) => {
                let retryable =
                    matches!(reason, RejectReason::NoFreeVoice | RejectReason::Inaudible);
                if asset.is_must_play() && retryable {
                    log::debug!("Deferring must-play {}: {:?}", asset.id(), reason);
                    self.retry.push_back(request);
                    self.events.emit(SoundEvent::RequestDeferred {
                        asset: asset.id(),
                        reason,
                    });
                } else {
                    log::warn!("Rejected {}: {:?}", asset.id(), reason);
                    self.events.emit(SoundEvent::VoiceRejected {
                        asset: Some(asset.id()),
                        reason,
                    });
                }
            }
        }
    }

    /// Finds, binds and prepares a voice for `request`. On success the voice
    /// is registered and its parameters pushed, but it is not yet playing.
    fn allocate(
        &mut self,
        request: &SoundRequest,
        asset: &Arc<SoundAsset>,
    ) -> std::result::Result<VoiceId, RejectReason> {
        let variance = asset.variance();
        let pitch_offset = if variance > 0.0 {
            self.rng.gen_range(-variance..=variance)
        } else {
            0.0
        };
        let assignment = Assignment {
            asset: asset.clone(),
            category: request.category.clone(),
            group: request.group.clone(),
            location: request.location.clone(),
            channel: request.channel,
            gain: request.gain,
            pitch: request.pitch,
            pitch_offset,
            pan: request.pan,
            looping: request.kind == RequestKind::PlayLoop,
            audio: VoiceAudio::None,
            soundscape_generation: None,
        };

        // Nothing is stolen for a request that would not be heard.
        let mix = self.mix_for(&assignment);
        if !mix.is_audible() {
            return Err(RejectReason::Inaudible);
        }

        if let (Some(location), Some(channel)) = (&request.location, request.channel) {
            if let Some(id) = self.pool.find_channel(location.id(), channel) {
                log::debug!("Channel {} at {} replaced", channel, location.id());
                self.deallocate(id);
            }
        }

        if let Some(group) = &request.group {
            let cap = group.voice_limit();
            while cap > 0 && self.pool.group_count(group.id()) >= cap {
                let Some(oldest) = self.pool.oldest_in_group(group.id()) else {
                    break;
                };
                self.deallocate(oldest);
            }
        }

        let limit = asset.concurrency_limit();
        if limit > 0 && self.pool.asset_count(asset.id()) >= limit {
            if !asset.is_replacing_old() {
                return Err(RejectReason::LimitReached);
            }
            while self.pool.asset_count(asset.id()) >= limit {
                let Some(oldest) = self.pool.oldest_of_asset(asset.id()) else {
                    break;
                };
                self.deallocate(oldest);
            }
        }

        let id = self.pool.take_free().ok_or(RejectReason::NoFreeVoice)?;
        self.pool.voice_mut(id).assignment = Some(assignment);
        self.events.emit(SoundEvent::VoiceAllocated {
            voice: id,
            asset: asset.id(),
        });

        if let Err(e) = self.prepare_audio(id, asset) {
            self.report_decode_error(asset, &e);
            self.release_unregistered(id);
            return Err(match e {
                SonorityError::Decode(DecodeError::Unsupported(_)) => {
                    RejectReason::UnsupportedAsset
                }
                _ => RejectReason::DecodeFailed,
            });
        }
        self.events.emit(SoundEvent::VoicePrepared {
            voice: id,
            asset: asset.id(),
        });

        self.apply(id, &mix);
        self.pool.register(id);
        Ok(id)
    }

    /// Undoes a partial allocation of a voice that never got registered.
    fn release_unregistered(&mut self, id: VoiceId) {
        let voice = self.pool.voice_mut(id);
        let source = voice.source();
        if let Some(assignment) = voice.assignment.take() {
            self.backend.set_buffer(source, None);
            self.release_audio(assignment.audio);
        }
        self.pool.return_free(id);
    }

    fn prepare_audio(&mut self, id: VoiceId, asset: &Arc<SoundAsset>) -> Result<()> {
        let source = self.pool.voice(id).source();
        let audio = if asset.is_stream() {
            let stream = match self.primed.claim(asset.id()) {
                Some(stream) => stream,
                None => SoundStream::open(
                    asset.clone(),
                    self.decoder.as_ref(),
                    self.backend.as_mut(),
                    self.desc.stream_chunk_duration,
                )?,
            };
            stream.attach(source, self.backend.as_mut());
            self.events.emit(SoundEvent::StreamStarted {
                voice: Some(id),
                asset: asset.id(),
            });
            VoiceAudio::Stream(stream)
        } else {
            let (clip, owned) = self.load_clip(asset)?;
            self.backend.set_buffer(source, Some(clip));
            VoiceAudio::Clip { clip, owned }
        };

        if let Some(assignment) = self.pool.voice_mut(id).assignment.as_mut() {
            assignment.audio = audio;
        }
        Ok(())
    }

    /// Returns the cached clip for `asset`, decoding and caching it on a miss.
    /// The flag is `true` when the clip could not be cached and belongs to the caller.
    fn load_clip(&mut self, asset: &SoundAsset) -> Result<(BufferHandle, bool)> {
        if let Some(clip) = self.cache.get(asset.id()) {
            return Ok((clip, false));
        }

        let mut handle = self.decoder.open(asset)?;
        let format = handle.format();
        let pcm = decode_all(handle.as_mut())?;
        let clip = self.backend.create_buffer(&pcm, format)?;
        let bytes = self.backend.buffer_size_bytes(clip);

        match self.cache.put(asset.id(), clip, bytes) {
            PutOutcome::Cached { evicted } => {
                for (_, old) in evicted {
                    self.release_cached_clip(old);
                }
                log::debug!("Cached {} ({} bytes)", asset.id(), bytes);
                self.events.emit(SoundEvent::SoundCached {
                    asset: asset.id(),
                    bytes,
                });
                Ok((clip, false))
            }
            PutOutcome::AlreadyPresent => Ok((clip, true)),
            PutOutcome::TooLarge => {
                log::warn!(
                    "{} ({} bytes) exceeds the cache budget of {} bytes, playing uncached",
                    asset.id(),
                    bytes,
                    self.cache.budget()
                );
                Ok((clip, true))
            }
        }
    }

    fn clip_in_use(&self, clip: BufferHandle) -> bool {
        self.pool.active().iter().any(|id| {
            self.pool
                .voice(*id)
                .assignment()
                .and_then(|a| a.audio.shared_clip())
                == Some(clip)
        })
    }

    /// Destroys a clip the cache gave up, or retires it while voices still play it.
    fn release_cached_clip(&mut self, clip: BufferHandle) {
        if self.clip_in_use(clip) {
            self.retired.push(clip);
        } else {
            self.backend.destroy_buffer(clip);
        }
    }

    fn release_audio(&mut self, audio: VoiceAudio) {
        match audio {
            VoiceAudio::None => {}
            VoiceAudio::Stream(stream) => stream.release(self.backend.as_mut()),
            VoiceAudio::Clip { clip, owned: true } => self.backend.destroy_buffer(clip),
            VoiceAudio::Clip { clip, owned: false } => {
                if let Some(position) = self.retired.iter().position(|c| *c == clip) {
                    if !self.clip_in_use(clip) {
                        self.retired.swap_remove(position);
                        self.backend.destroy_buffer(clip);
                    }
                }
            }
        }
    }

    fn report_decode_error(&mut self, asset: &SoundAsset, error: &SonorityError) {
        match error {
            SonorityError::Decode(DecodeError::Unsupported(message)) => {
                log::error!(
                    "{} ({}) is unsupported: {}",
                    asset.id(),
                    asset.path().display(),
                    message
                );
                self.unsupported.insert(asset.id());
                self.events.emit(SoundEvent::DecodeUnsupported {
                    asset: asset.id(),
                    message: message.clone(),
                });
            }
            SonorityError::Decode(DecodeError::Io(e)) | SonorityError::Io(e) => {
                log::error!(
                    "I/O error decoding {} ({}): {}",
                    asset.id(),
                    asset.path().display(),
                    e
                );
                self.events.emit(SoundEvent::DecodeIo {
                    asset: asset.id(),
                    message: e.to_string(),
                });
            }
            other => log::error!("Failed to prepare {}: {}", asset.id(), other),
        }
    }

    fn precache(&mut self, asset: &Arc<SoundAsset>) {
        if self.unsupported.contains(&asset.id()) {
            return;
        }

        if asset.is_stream() {
            if self.primed.contains(asset.id()) {
                return;
            }
            match SoundStream::open(
                asset.clone(),
                self.decoder.as_ref(),
                self.backend.as_mut(),
                self.desc.stream_chunk_duration,
            ) {
                Ok(stream) => {
                    if let Some(old) = self.primed.insert(stream) {
                        old.release(self.backend.as_mut());
                    }
                    self.events.emit(SoundEvent::StreamStarted {
                        voice: None,
                        asset: asset.id(),
                    });
                }
                Err(e) => self.report_decode_error(asset, &e),
            }
        } else {
            if self.cache.contains(asset.id()) {
                return;
            }
            match self.load_clip(asset) {
                Ok((clip, true)) => self.backend.destroy_buffer(clip),
                Ok(_) => {}
                Err(e) => self.report_decode_error(asset, &e),
            }
        }
    }

    fn spatial_context<'a>(
        desc: &SoundSystemDesc,
        observer: &'a SoundLocation,
        soundscape: Option<&'a SoundScape>,
        occlusion: Option<&'a dyn OcclusionFunction>,
    ) -> SpatialContext<'a> {
        SpatialContext {
            observer,
            soundscape,
            occlusion,
            min_effect_gain: soundscape
                .and_then(|s| s.min_effect_gain)
                .unwrap_or(desc.min_effect_gain),
            max_effect_distance: soundscape
                .and_then(|s| s.max_effect_distance)
                .unwrap_or(desc.max_effect_distance),
        }
    }

    fn mix_for(&mut self, assignment: &Assignment) -> VoiceMix {
        let ctx = Self::spatial_context(
            &self.desc,
            &self.observer,
            self.soundscape.as_deref(),
            self.occlusion.as_deref(),
        );
        self.spatializer.spatialize(&ctx, assignment)
    }

    fn compute_mix(&mut self, id: VoiceId) -> VoiceMix {
        let ctx = Self::spatial_context(
            &self.desc,
            &self.observer,
            self.soundscape.as_deref(),
            self.occlusion.as_deref(),
        );
        match self.pool.voice(id).assignment() {
            Some(assignment) => self.spatializer.spatialize(&ctx, assignment),
            None => VoiceMix::default(),
        }
    }

    /// Pushes `mix` and, when the soundscape changed since the voice last saw
    /// it, the soundscape's effect parameters.
    fn apply(&mut self, id: VoiceId, mix: &VoiceMix) {
        let generation = self.soundscape_generation;
        let voice = self.pool.voice_mut(id);
        let looping = voice
            .assignment()
            .is_some_and(|a| a.looping && !a.audio.is_stream());
        voice.push_mix(self.backend.as_mut(), mix);
        self.backend.set_looping(voice.source(), looping);

        let stale = voice
            .assignment()
            .is_some_and(|a| a.soundscape_generation != Some(generation));
        if stale {
            voice.push_soundscape(self.backend.as_mut(), self.soundscape.as_deref());
            if let Some(assignment) = voice.assignment.as_mut() {
                assignment.soundscape_generation = Some(generation);
            }
        }
    }

    /// Spatializes every active voice, refills streams and reaps voices that
    /// stopped playing.
    pub fn update_voices(&mut self) {
        for id in self.pool.active().to_vec() {
            if !self.update_voice(id) {
                let source = self.pool.voice(id).source();
                self.backend.stop(source);
            }
        }

        self.dead.clear();
        for id in self.pool.active() {
            let state = self.backend.playback_state(self.pool.voice(*id).source());
            if !matches!(state, PlaybackState::Playing | PlaybackState::Paused) {
                self.dead.push(*id);
            }
        }

        let dead = std::mem::take(&mut self.dead);
        for id in &dead {
            self.deallocate(*id);
        }
        self.dead = dead;
    }

    /// Returns `false` when the voice should stop.
    fn update_voice(&mut self, id: VoiceId) -> bool {
        let mix = self.compute_mix(id);
        if !mix.is_audible() {
            return false;
        }
        self.apply(id, &mix);

        let source = self.pool.voice(id).source();
        let Some(assignment) = self.pool.voice_mut(id).assignment.as_mut() else {
            return false;
        };
        let asset = assignment.asset.clone();
        let looping = assignment.looping;
        let VoiceAudio::Stream(stream) = &mut assignment.audio else {
            return true;
        };

        match stream.update(source, looping, self.decoder.as_ref(), self.backend.as_mut()) {
            Ok(status) if status.exhausted => {
                log::warn!("Looping stream {} produced no data", asset.id());
                false
            }
            Ok(status) => {
                if status.refilled > 0 {
                    if self.backend.playback_state(source) == PlaybackState::Stopped {
                        log::warn!("Stream underrun on {}, restarting playback", id);
                        self.backend.play(source);
                    }
                    self.events.emit(SoundEvent::StreamStepped {
                        voice: id,
                        asset: asset.id(),
                        buffers_refilled: status.refilled,
                    });
                }
                true
            }
            Err(e) => {
                self.report_decode_error(&asset, &e);
                false
            }
        }
    }

    /// Stops a voice, releases its audio and returns it to the free list.
    /// Voices that are not active are ignored.
    pub fn deallocate(&mut self, id: VoiceId) {
        if !self.pool.deregister(id) {
            return;
        }
        let voice = self.pool.voice_mut(id);
        let source: SourceHandle = voice.source();
        let assignment = voice.assignment.take();

        self.backend.stop(source);
        self.backend.set_buffer(source, None);
        self.backend.set_looping(source, false);
        self.pool.return_free(id);

        if let Some(assignment) = assignment {
            let asset = assignment.asset.id();
            self.release_audio(assignment.audio);
            log::debug!("Deallocated {} ({})", id, asset);
            self.events.emit(SoundEvent::VoiceStopped { voice: id, asset });
            self.events.emit(SoundEvent::VoiceDeallocated { voice: id, asset });
        }
    }

    /// Releases every voice, primed stream and clip, then destroys the voices.
    /// The engine ignores further ticks.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        log::info!("Sound engine shutting down");

        self.stop_all();
        self.retry.clear();
        for stream in self.primed.drain() {
            stream.release(self.backend.as_mut());
        }
        for (_, clip) in self.cache.evict_all() {
            self.backend.destroy_buffer(clip);
        }
        for clip in self.retired.drain(..) {
            self.backend.destroy_buffer(clip);
        }
        self.pool.destroy(self.backend.as_mut());

        self.shut_down = true;
        self.publish_counts();
    }
}

impl Drop for SoundEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ObjectCounts, PcmFormat, SoftwareBackend};
    use crate::decoder::MemoryDecoder;
    use crate::sound::{Falloff, ReverbParams, Rolloff};
    use crossbeam_channel::unbounded;

    const RATE: u32 = 1000;

    struct Harness {
        engine: SoundEngine,
        backend: SoftwareBackend,
        decoder: MemoryDecoder,
        commands: Sender<Command>,
        events: Receiver<SoundEvent>,
    }

    impl Harness {
        fn new(voices: usize) -> Self {
            Self::with_desc(SoundSystemDesc::new().voices(voices))
        }

        fn with_desc(desc: SoundSystemDesc) -> Self {
            let backend = SoftwareBackend::new(RATE);
            let decoder = MemoryDecoder::new();
            let (commands, receiver) = unbounded();
            let desc = desc.voice_update_interval(1).rng_seed(7);
            let mut engine = SoundEngine::new(
                desc,
                Box::new(backend.clone()),
                Arc::new(decoder.clone()),
                receiver,
            )
            .unwrap();
            let events = engine.subscribe();
            Self {
                engine,
                backend,
                decoder,
                commands,
                events,
            }
        }

        fn clip(&self, name: &str, samples: usize) -> SoundAsset {
            let asset = SoundAsset::new(name);
            self.decoder
                .register(asset.path(), vec![0.25; samples], PcmFormat::new(RATE, 1));
            asset
        }

        fn stream(&self, name: &str, samples: usize) -> Arc<SoundAsset> {
            let asset = SoundAsset::streamed(name).into_shared();
            self.decoder
                .register(asset.path(), vec![0.25; samples], PcmFormat::new(RATE, 1));
            asset
        }

        fn send(&self, request: SoundRequest) {
            self.commands.send(Command::Sound(request)).unwrap();
        }

        fn step(&mut self) -> Vec<SoundEvent> {
            self.engine.tick();
            self.events.try_iter().collect()
        }

        fn playing_assets(&self) -> Vec<AssetId> {
            let pool = self.engine.pool();
            pool.active()
                .iter()
                .filter_map(|id| pool.voice(*id).assignment().map(|a| a.asset.id()))
                .collect()
        }

        fn assert_conserved(&self) {
            let pool = self.engine.pool();
            assert_eq!(pool.free_count() + pool.active_count(), pool.capacity());
        }
    }

    fn rejected(events: &[SoundEvent], reason: RejectReason) -> bool {
        events
            .iter()
            .any(|e| matches!(e, SoundEvent::VoiceRejected { reason: r, .. } if *r == reason))
    }

    #[test]
    fn test_play_and_reap_finished_clips() {
        let mut h = Harness::new(2);
        let asset = h.clip("hit.wav", 500).into_shared();
        for _ in 0..3 {
            h.send(SoundRequest::play(asset.clone()));
        }

        let events = h.step();
        assert_eq!(h.engine.pool().active_count(), 2);
        assert!(rejected(&events, RejectReason::NoFreeVoice));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SoundEvent::VoicePlayed { .. }))
                .count(),
            2
        );
        h.assert_conserved();

        h.backend.advance(600);
        let events = h.step();
        assert_eq!(h.engine.pool().active_count(), 0);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SoundEvent::VoiceDeallocated { .. }))
                .count(),
            2
        );
        h.assert_conserved();
        assert_eq!(h.decoder.open_count(asset.path()), 1);
    }

    #[test]
    fn test_group_cap_replaces_oldest_member() {
        let mut h = Harness::new(2);
        let group = SoundGroup::new("ui").max_voices(1).into_shared();
        let first = h.clip("first.wav", 5000).into_shared();
        let second = h.clip("second.wav", 5000).into_shared();

        h.send(SoundRequest::play(first.clone()).group(group.clone()));
        h.step();
        h.send(SoundRequest::play(second.clone()).group(group.clone()));
        let events = h.step();

        assert_eq!(h.playing_assets(), vec![second.id()]);
        assert!(events.iter().any(
            |e| matches!(e, SoundEvent::VoiceStopped { asset, .. } if *asset == first.id())
        ));
        h.assert_conserved();
    }

    #[test]
    fn test_channel_is_exclusive_per_location() {
        let mut h = Harness::new(4);
        let location = Arc::new(SoundLocation::default());
        let a = h.clip("a.wav", 5000).into_shared();
        let b = h.clip("b.wav", 5000).into_shared();
        let c = h.clip("c.wav", 5000).into_shared();

        h.send(SoundRequest::play(a).location(location.clone()).channel(1));
        h.send(SoundRequest::play(b.clone()).location(location.clone()).channel(1));
        h.send(SoundRequest::play(c.clone()).location(location.clone()).channel(2));
        h.step();
        assert_eq!(h.playing_assets(), vec![b.id(), c.id()]);

        h.send(SoundRequest::stop().location(location.clone()).channel(1));
        h.step();
        assert_eq!(h.playing_assets(), vec![c.id()]);

        h.send(SoundRequest::stop().location(location));
        h.step();
        assert!(h.playing_assets().is_empty());
        h.assert_conserved();
    }

    #[test]
    fn test_asset_limit_without_replacement_rejects() {
        let mut h = Harness::new(4);
        let asset = h.clip("step.wav", 5000).limit(1).replaces_old(false);
        let asset = asset.into_shared();

        h.send(SoundRequest::play(asset.clone()));
        h.send(SoundRequest::play(asset.clone()));
        let events = h.step();

        assert_eq!(h.engine.pool().asset_count(asset.id()), 1);
        assert!(rejected(&events, RejectReason::LimitReached));
    }

    #[test]
    fn test_asset_limit_replaces_oldest() {
        let mut h = Harness::new(4);
        let asset = h.clip("step.wav", 5000).limit(2).into_shared();
        for _ in 0..3 {
            h.send(SoundRequest::play(asset.clone()));
        }
        let events = h.step();

        assert_eq!(h.engine.pool().asset_count(asset.id()), 2);
        assert!(!rejected(&events, RejectReason::LimitReached));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SoundEvent::VoiceDeallocated { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn test_must_play_request_is_retried() {
        let mut h = Harness::new(1);
        let ambience = h.clip("wind.wav", 2000).into_shared();
        let alarm = h.clip("alarm.wav", 2000).must_play(true).into_shared();

        h.send(SoundRequest::play(ambience));
        h.send(SoundRequest::play(alarm.clone()));
        let events = h.step();
        assert!(events.iter().any(|e| matches!(
            e,
            SoundEvent::RequestDeferred {
                reason: RejectReason::NoFreeVoice,
                ..
            }
        )));
        assert_eq!(h.engine.pending_retries(), 1);

        h.backend.advance(2100);
        // The finished voice is reaped after the retry ran, so the second tick plays it.
        h.step();
        let events = h.step();
        assert!(events.iter().any(
            |e| matches!(e, SoundEvent::VoicePlayed { asset, .. } if *asset == alarm.id())
        ));
        assert_eq!(h.engine.pending_retries(), 0);
        assert_eq!(h.playing_assets(), vec![alarm.id()]);
    }

    #[test]
    fn test_inaudible_request_is_rejected() {
        let mut h = Harness::new(2);
        let category = Arc::new(
            SoundCategory::new("footsteps").rolloff(Rolloff::new(1.0, 10.0, Falloff::Linear)),
        );
        let asset = h.clip("step.wav", 500).into_shared();
        let far = Arc::new(SoundLocation::at(20.0, 0.0, 0.0));

        h.send(SoundRequest::play(asset).category(category).location(far));
        let events = h.step();

        assert!(rejected(&events, RejectReason::Inaudible));
        assert_eq!(h.engine.pool().free_count(), 2);
    }

    #[test]
    fn test_inaudible_must_play_does_not_steal() {
        let mut h = Harness::new(3);
        let group = SoundGroup::new("alerts").max_voices(1).into_shared();
        let category = Arc::new(
            SoundCategory::new("alerts").rolloff(Rolloff::new(1.0, 10.0, Falloff::Linear)),
        );
        let chime = h.clip("chime.wav", 500).into_shared();
        let siren = h.clip("siren.wav", 500).must_play(true).into_shared();
        let far = Arc::new(SoundLocation::at(50.0, 0.0, 0.0));

        h.send(SoundRequest::play_looping(chime.clone()).group(group.clone()));
        h.step();
        h.send(
            SoundRequest::play(siren)
                .group(group.clone())
                .category(category)
                .location(far),
        );

        for _ in 0..5 {
            let events = h.step();
            assert!(events.iter().any(|e| matches!(
                e,
                SoundEvent::RequestDeferred {
                    reason: RejectReason::Inaudible,
                    ..
                }
            )));
            assert!(!events.iter().any(|e| matches!(
                e,
                SoundEvent::VoiceStopped { .. } | SoundEvent::VoiceDeallocated { .. }
            )));
            assert_eq!(h.playing_assets(), vec![chime.id()]);
            assert_eq!(h.engine.pending_retries(), 1);
        }
        h.assert_conserved();
    }

    #[test]
    fn test_unbounded_pitch_variance_still_plays() {
        let mut h = Harness::new(1);
        let asset = h
            .clip("wobble.wav", 500)
            .pitch_variance(f32::INFINITY)
            .into_shared();

        h.send(SoundRequest::play_looping(asset.clone()));
        h.step();
        assert_eq!(h.playing_assets(), vec![asset.id()]);

        let source = h.engine.pool().voice(h.engine.pool().active()[0]).source();
        let pitch = h.backend.source_snapshot(source).unwrap().pitch;
        assert!(pitch.is_finite());
        assert!((0.0..=2.0).contains(&pitch));
    }

    #[test]
    fn test_unsupported_asset_is_remembered() {
        let mut h = Harness::new(2);
        let asset = SoundAsset::new("broken.xyz").into_shared();
        h.decoder.register_unsupported(asset.path(), "no codec");

        h.send(SoundRequest::play(asset.clone()));
        let events = h.step();
        assert!(rejected(&events, RejectReason::UnsupportedAsset));
        assert!(events
            .iter()
            .any(|e| matches!(e, SoundEvent::DecodeUnsupported { .. })));
        assert_eq!(h.engine.pool().free_count(), 2);

        h.send(SoundRequest::play(asset.clone()));
        let events = h.step();
        assert!(rejected(&events, RejectReason::UnsupportedAsset));
        assert_eq!(h.decoder.open_count(asset.path()), 1);
    }

    #[test]
    fn test_io_failure_is_not_remembered() {
        let mut h = Harness::new(2);
        let asset = SoundAsset::new("flaky.wav").into_shared();
        h.decoder
            .register_broken(asset.path(), PcmFormat::new(RATE, 1), 10);

        h.send(SoundRequest::play(asset.clone()));
        let events = h.step();
        assert!(rejected(&events, RejectReason::DecodeFailed));
        assert!(events.iter().any(|e| matches!(e, SoundEvent::DecodeIo { .. })));

        h.send(SoundRequest::play(asset.clone()));
        h.step();
        assert_eq!(h.decoder.open_count(asset.path()), 2);
        assert_eq!(h.backend.object_counts().buffers, 0);
    }

    #[test]
    fn test_pause_and_resume_by_group() {
        let mut h = Harness::new(2);
        let group = SoundGroup::new("music").into_shared();
        let asset = h.clip("loop.wav", 500).into_shared();

        h.send(SoundRequest::play_looping(asset).group(group.clone()));
        h.step();
        let source = h.engine.pool().voice(h.engine.pool().active()[0]).source();

        h.send(SoundRequest::pause().group(group.clone()));
        h.step();
        assert_eq!(h.backend.playback_state(source), PlaybackState::Paused);
        h.backend.advance(2000);
        h.step();
        assert_eq!(h.engine.pool().active_count(), 1);

        h.send(SoundRequest::resume().group(group));
        h.step();
        assert_eq!(h.backend.playback_state(source), PlaybackState::Playing);
    }

    #[test]
    fn test_soundscape_change_reaches_playing_voices() {
        let mut h = Harness::new(1);
        let asset = h.clip("loop.wav", 500).into_shared();
        h.send(SoundRequest::play_looping(asset));
        h.step();

        let hall = SoundScape::new("hall").reverb(ReverbParams::CONCERT_HALL);
        h.commands
            .send(Command::SetSoundScape(Some(Arc::new(hall))))
            .unwrap();
        h.step();

        let pool = h.engine.pool();
        let voice = pool.voice(pool.active()[0]);
        let reverb = h.backend.slot_snapshot(voice.reverb_slot()).unwrap();
        assert_eq!(reverb.reverb, Some(ReverbParams::CONCERT_HALL));
        assert_eq!(reverb.gain, 1.0);
        assert_eq!(h.backend.slot_snapshot(voice.echo_slot()).unwrap().gain, 0.0);
    }

    #[test]
    fn test_precached_stream_is_claimed() {
        let mut h = Harness::new(1);
        let music = h.stream("music.ogg", 3000);

        h.send(SoundRequest::precache(music.clone()));
        let events = h.step();
        assert!(h.engine.primed_streams().contains(music.id()));
        assert!(events
            .iter()
            .any(|e| matches!(e, SoundEvent::StreamStarted { voice: None, .. })));

        h.send(SoundRequest::play_looping(music.clone()));
        h.step();
        assert!(h.engine.primed_streams().is_empty());
        assert_eq!(h.decoder.open_count(music.path()), 1);
        assert_eq!(h.playing_assets(), vec![music.id()]);
    }

    #[test]
    fn test_stream_refills_and_finishes() {
        let mut h = Harness::new(1);
        let music = h.stream("music.ogg", 3500);
        h.send(SoundRequest::play(music));
        h.step();

        h.backend.advance(1200);
        let events = h.step();
        assert!(events.iter().any(|e| matches!(
            e,
            SoundEvent::StreamStepped {
                buffers_refilled: 1,
                ..
            }
        )));

        for _ in 0..4 {
            h.backend.advance(2000);
            h.step();
        }
        assert_eq!(h.engine.pool().active_count(), 0);
        assert_eq!(h.backend.object_counts().buffers, 0);
    }

    #[test]
    fn test_stream_decode_error_stops_only_its_voice() {
        let mut h = Harness::new(2);
        let wind = h.clip("wind.wav", 500).into_shared();
        let radio = SoundAsset::streamed("radio.ogg").into_shared();
        // Enough data to prime both buffers, then the first refill fails.
        h.decoder
            .register_broken(radio.path(), PcmFormat::new(RATE, 1), 2000);

        h.send(SoundRequest::play_looping(wind.clone()));
        h.send(SoundRequest::play(radio.clone()));
        h.step();
        assert_eq!(h.playing_assets(), vec![wind.id(), radio.id()]);

        h.backend.advance(1200);
        let events = h.step();
        assert!(events.iter().any(
            |e| matches!(e, SoundEvent::DecodeIo { asset, .. } if *asset == radio.id())
        ));
        assert!(events.iter().any(
            |e| matches!(e, SoundEvent::VoiceStopped { asset, .. } if *asset == radio.id())
        ));
        assert!(!events.iter().any(
            |e| matches!(e, SoundEvent::VoiceStopped { asset, .. } if *asset == wind.id())
        ));
        assert_eq!(h.playing_assets(), vec![wind.id()]);
        h.assert_conserved();

        h.backend.advance(1200);
        h.step();
        assert_eq!(h.playing_assets(), vec![wind.id()]);
    }

    #[test]
    fn test_stream_underrun_restarts_playback() {
        let mut h = Harness::new(1);
        let music = h.stream("music.ogg", 3500);
        h.send(SoundRequest::play(music.clone()));
        h.step();
        let source = h.engine.pool().voice(h.engine.pool().active()[0]).source();

        // Both primed buffers drain before the next update.
        h.backend.advance(2500);
        assert_eq!(h.backend.playback_state(source), PlaybackState::Stopped);

        let events = h.step();
        assert!(events.iter().any(|e| matches!(
            e,
            SoundEvent::StreamStepped {
                buffers_refilled: 2,
                ..
            }
        )));
        assert_eq!(h.backend.playback_state(source), PlaybackState::Playing);
        assert_eq!(h.playing_assets(), vec![music.id()]);
    }

    #[test]
    fn test_evicted_clip_outlives_its_voice() {
        let mut h = Harness::with_desc(SoundSystemDesc::new().voices(2).cache_budget(6000));
        let a = h.clip("a.wav", 1000).into_shared();
        let b = h.clip("b.wav", 1000).into_shared();

        h.send(SoundRequest::play_looping(a.clone()));
        h.step();
        h.send(SoundRequest::play_looping(b.clone()));
        h.step();

        assert!(!h.engine.cache().contains(a.id()));
        assert!(h.engine.cache().contains(b.id()));
        assert_eq!(h.backend.object_counts().buffers, 2);

        h.send(SoundRequest::stop().asset(a));
        h.step();
        assert_eq!(h.backend.object_counts().buffers, 1);
        assert_eq!(h.playing_assets(), vec![b.id()]);
    }

    #[test]
    fn test_oversized_clip_plays_uncached() {
        let mut h = Harness::with_desc(SoundSystemDesc::new().voices(1).cache_budget(100));
        let asset = h.clip("long.wav", 1000).into_shared();

        h.send(SoundRequest::play(asset.clone()));
        h.step();
        assert!(h.engine.cache().is_empty());
        assert_eq!(h.playing_assets(), vec![asset.id()]);

        h.send(SoundRequest::stop_all());
        h.step();
        assert_eq!(h.backend.object_counts().buffers, 0);
    }

    #[test]
    fn test_shutdown_releases_every_backend_object() {
        let mut h = Harness::new(3);
        let clip = h.clip("hit.wav", 500).into_shared();
        let music = h.stream("music.ogg", 3000);
        let ambience = h.stream("ambience.ogg", 3000);

        h.send(SoundRequest::play_looping(clip));
        h.send(SoundRequest::play(music));
        h.send(SoundRequest::precache(ambience));
        h.step();
        assert!(h.backend.object_counts().buffers > 0);

        h.engine.shutdown();
        assert_eq!(h.backend.object_counts(), ObjectCounts::default());

        h.engine.tick();
        assert_eq!(h.engine.stats().snapshot().active_voices, 0);
    }

    #[test]
    fn test_stats_track_pool_occupancy() {
        let mut h = Harness::new(3);
        let asset = h.clip("loop.wav", 500).into_shared();
        h.send(SoundRequest::play_looping(asset));
        h.step();

        let stats = h.engine.stats().snapshot();
        assert_eq!(stats.active_voices, 1);
        assert_eq!(stats.free_voices, 2);
        assert_eq!(stats.ticks, 1);
    }
}
