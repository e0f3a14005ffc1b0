use crate::backend::AudioBackend;
use crate::config::SoundSystemDesc;
use crate::decoder::AudioDecoder;
use crate::engine::{Command, EngineStats, RequestKind, SoundEngine, SoundRequest, StatsSnapshot};
use crate::error::{Result, SonorityError};
use crate::events::SoundEvent;
use crate::math::Vec3;
use crate::sound::{SoundAsset, SoundLocation, SoundScape};
use crate::spatial::OcclusionFunction;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Entry point of the library: a voice engine running on its own thread.
///
/// `SoundSystem` is the handle the rest of the program talks to. Every call
/// enqueues a command and returns immediately; the processing thread drains
/// the queue at the start of its next tick.
///
/// # Architecture
///
/// - **Caller threads**: build assets, groups and locations, submit requests
/// - **Processing thread**: owns the backend, allocates voices, spatializes and refills streams
///
/// Groups and locations are shared through `Arc` and use atomics, so moving a
/// location or changing a group's gain from any thread is picked up on the
/// next voice update without a command.
pub struct SoundSystem {
    commands: Sender<Command>,
    stats: Arc<EngineStats>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SoundSystem {
    /// Validates `desc`, creates every voice on `backend` and starts the processing thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, if the backend cannot
    /// create the requested voices, or if the thread cannot be spawned.
    pub fn new(
        desc: SoundSystemDesc,
        backend: Box<dyn AudioBackend>,
        decoder: Arc<dyn AudioDecoder>,
    ) -> Result<Self> {
        let (commands, receiver) = unbounded();
        let tick_interval = desc.tick_interval;
        let mut engine = SoundEngine::new(desc, backend, decoder, receiver)?;
        let stats = engine.stats();
        let shutdown = Arc::new(AtomicBool::new(false));

        let stop = shutdown.clone();
        let thread = thread::Builder::new()
            .name("sound-processor".into())
            .spawn(move || {
                log::info!("Sound processor started");
                while !stop.load(Ordering::Acquire) {
                    let started = Instant::now();
                    engine.tick();
                    if let Some(rest) = tick_interval.checked_sub(started.elapsed()) {
                        thread::sleep(rest);
                    }
                }
                engine.shutdown();
                log::info!("Sound processor stopped");
            })
            .map_err(|e| {
                SonorityError::Engine(format!("Failed to spawn sound processor: {}", e))
            })?;

        Ok(Self {
            commands,
            stats,
            shutdown,
            thread: Some(thread),
        })
    }

    fn send(&self, command: Command, what: &str) -> Result<()> {
        self.commands.send(command).map_err(|e| {
            SonorityError::Engine(format!("Failed to send {} command: {}", what, e))
        })
    }

    /// Enqueues any request.
    pub fn submit(&self, request: SoundRequest) -> Result<()> {
        self.send(Command::Sound(request), "sound")
    }

    /// Plays `request.asset` once. The request kind is forced to play.
    pub fn play(&self, request: SoundRequest) -> Result<()> {
        self.submit(request.kind(RequestKind::Play))
    }

    pub fn play_looping(&self, request: SoundRequest) -> Result<()> {
        self.submit(request.kind(RequestKind::PlayLoop))
    }

    /// Stops the voices the request selects: by location (and channel), else group, else asset.
    pub fn stop(&self, request: SoundRequest) -> Result<()> {
        self.submit(request.kind(RequestKind::Stop))
    }

    pub fn stop_all(&self) -> Result<()> {
        self.submit(SoundRequest::stop_all())
    }

    pub fn pause(&self, request: SoundRequest) -> Result<()> {
        self.submit(request.kind(RequestKind::Pause))
    }

    pub fn resume(&self, request: SoundRequest) -> Result<()> {
        self.submit(request.kind(RequestKind::Resume))
    }

    /// Decodes a cached asset into the clip cache, or primes a streamed one,
    /// so a later play starts without decoding.
    pub fn precache(&self, asset: Arc<SoundAsset>) -> Result<()> {
        self.submit(SoundRequest::precache(asset))
    }

    /// Replaces the observer every voice is spatialized against.
    pub fn set_observer(&self, observer: Arc<SoundLocation>) -> Result<()> {
        self.send(Command::SetObserver(observer), "observer")
    }

    /// Switches the environment. Playing voices pick up the new effect
    /// parameters on their next update. `None` leaves the effect slots as
    /// they are and mutes the sends.
    pub fn set_soundscape(&self, soundscape: Option<Arc<SoundScape>>) -> Result<()> {
        self.send(Command::SetSoundScape(soundscape), "soundscape")
    }

    /// Installs the occlusion query used for voices in occludable groups.
    ///
    /// The function receives the sound and observer positions and returns how
    /// occluded the path between them is, `0` meaning clear and `1` fully blocked.
    pub fn set_occlusion<F>(&self, occlusion: F) -> Result<()>
    where
        F: Fn(Vec3, Vec3) -> f32 + Send + Sync + 'static,
    {
        let occlusion: Arc<dyn OcclusionFunction> = Arc::new(occlusion);
        self.send(Command::SetOcclusion(Some(occlusion)), "occlusion")
    }

    pub fn clear_occlusion(&self) -> Result<()> {
        self.send(Command::SetOcclusion(None), "occlusion")
    }

    /// Registers a handler that runs on the processing thread for every event.
    pub fn add_handler<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&SoundEvent) + Send + 'static,
    {
        self.send(Command::AddHandler(Box::new(handler)), "handler")
    }

    /// Returns a channel that receives every event emitted from the next tick on.
    pub fn subscribe(&self) -> Result<Receiver<SoundEvent>> {
        let (sender, receiver) = unbounded();
        self.send(Command::Subscribe(sender), "subscribe")?;
        Ok(receiver)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// Stops the processing thread and releases every backend object.
    /// Blocks until the thread has exited. Calling it again does nothing.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::Release);
        if thread.join().is_err() {
            log::error!("Sound processor panicked");
        }
    }
}

impl Drop for SoundSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
