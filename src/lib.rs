//! # Sonority
//!
//! Voice management and spatialization for games, on top of an OpenAL-style
//! positional audio backend.
//!
//! A fixed pool of backend voices is shared by every sound the program asks
//! for. Requests are queued from any thread and processed by a dedicated
//! thread, which allocates voices under group, channel and per-asset limits,
//! decodes or streams the audio, and keeps every playing voice spatialized
//! relative to the observer.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sonority::*;
//! use std::sync::Arc;
//!
//! let backend = SoftwareBackend::default();
//! let mut system = SoundSystem::new(
//!     SoundSystemDesc::default(),
//!     Box::new(backend.clone()),
//!     Arc::new(SymphoniaDecoder::new()),
//! )?;
//!
//! let footsteps = Arc::new(
//!     SoundCategory::new("footsteps").rolloff(Rolloff::new(1.0, 25.0, Falloff::Linear)),
//! );
//! let step = SoundAsset::new("sounds/step.wav").pitch_variance(0.05).into_shared();
//! let player = Arc::new(SoundLocation::at(4.0, 2.0, 0.0));
//!
//! system.play(
//!     SoundRequest::play(step)
//!         .category(footsteps)
//!         .location(player.clone())
//!         .channel(0),
//! )?;
//!
//! // Locations are shared; moving one is picked up on the next voice update.
//! player.set_position(Vec3::new(5.0, 2.0, 0.0));
//!
//! for event in system.subscribe()?.try_iter() {
//!     if event.is_error() {
//!         eprintln!("{:?}", event);
//!     }
//! }
//!
//! system.shutdown();
//! # Ok::<(), SonorityError>(())
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod events;
pub mod math;
pub mod pool;
pub mod sound;
pub mod spatial;
pub mod stream;
pub mod system;
pub mod voice;

#[cfg(feature = "device")]
pub use backend::DeviceOutput;
pub use backend::{AudioBackend, PcmFormat, PlaybackState, SoftwareBackend};
pub use config::SoundSystemDesc;
pub use decoder::{AudioDecoder, DecoderHandle, MemoryDecoder, SymphoniaDecoder};
pub use engine::{Command, RequestKind, SoundEngine, SoundRequest, StatsSnapshot};
pub use error::{DecodeError, Result, SonorityError};
pub use events::{RejectReason, SoundEvent};
pub use math::Vec3;
pub use sound::{
    DecodeMode, EchoParams, Falloff, OcclusionParams, ReverbParams, Rolloff, SoundAsset,
    SoundCategory, SoundGroup, SoundLocation, SoundScape,
};
pub use system::SoundSystem;
pub use voice::VoiceId;
