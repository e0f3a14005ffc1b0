//! Event types for Sonority

use crate::sound::AssetId;
use crate::voice::VoiceId;
use crossbeam_channel::{Receiver, Sender, unbounded};

/// Why a play request did not produce a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Every voice is busy and nothing could be stolen.
    NoFreeVoice,
    /// The asset is at its concurrency limit and does not replace old instances.
    LimitReached,
    /// The computed gain at the requested location is zero.
    Inaudible,
    /// The asset was previously found to be undecodable.
    UnsupportedAsset,
    /// Decoding failed while preparing the voice.
    DecodeFailed,
    /// A play request arrived without an asset.
    MissingAsset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SoundEvent {
    VoiceAllocated {
        voice: VoiceId,
        asset: AssetId,
    },
    VoicePrepared {
        voice: VoiceId,
        asset: AssetId,
    },
    VoicePlayed {
        voice: VoiceId,
        asset: AssetId,
        looping: bool,
    },
    VoiceStopped {
        voice: VoiceId,
        asset: AssetId,
    },
    VoiceDeallocated {
        voice: VoiceId,
        asset: AssetId,
    },
    VoiceRejected {
        asset: Option<AssetId>,
        reason: RejectReason,
    },
    /// A must-play request was parked in the retry queue for the next tick.
    RequestDeferred {
        asset: AssetId,
        reason: RejectReason,
    },
    StreamStarted {
        voice: Option<VoiceId>,
        asset: AssetId,
    },
    StreamStepped {
        voice: VoiceId,
        asset: AssetId,
        buffers_refilled: usize,
    },
    SoundCached {
        asset: AssetId,
        bytes: usize,
    },
    DecodeUnsupported {
        asset: AssetId,
        message: String,
    },
    DecodeIo {
        asset: AssetId,
        message: String,
    },
}

impl SoundEvent {
    pub fn voice_id(&self) -> Option<VoiceId> {
        match self {
            Self::VoiceAllocated { voice, .. }
            | Self::VoicePrepared { voice, .. }
            | Self::VoicePlayed { voice, .. }
            | Self::VoiceStopped { voice, .. }
            | Self::VoiceDeallocated { voice, .. }
            | Self::StreamStepped { voice, .. } => Some(*voice),
            Self::StreamStarted { voice, .. } => *voice,
            _ => None,
        }
    }

    pub fn asset_id(&self) -> Option<AssetId> {
        match self {
            Self::VoiceAllocated { asset, .. }
            | Self::VoicePrepared { asset, .. }
            | Self::VoicePlayed { asset, .. }
            | Self::VoiceStopped { asset, .. }
            | Self::VoiceDeallocated { asset, .. }
            | Self::RequestDeferred { asset, .. }
            | Self::StreamStarted { asset, .. }
            | Self::StreamStepped { asset, .. }
            | Self::SoundCached { asset, .. }
            | Self::DecodeUnsupported { asset, .. }
            | Self::DecodeIo { asset, .. } => Some(*asset),
            Self::VoiceRejected { asset, .. } => *asset,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::DecodeUnsupported { .. } | Self::DecodeIo { .. }
        )
    }
}

pub type EventHandler = Box<dyn Fn(&SoundEvent) + Send>;

/// Fans events out to registered handlers and channel subscribers.
///
/// Lives on the processing thread; handlers run inline there and should not block.
#[derive(Default)]
pub struct EventHub {
    handlers: Vec<EventHandler>,
    subscribers: Vec<Sender<SoundEvent>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, handler: EventHandler) {
        self.handlers.push(handler);
    }

    pub fn add_subscriber(&mut self, sender: Sender<SoundEvent>) {
        self.subscribers.push(sender);
    }

    pub fn subscribe(&mut self) -> Receiver<SoundEvent> {
        let (sender, receiver) = unbounded();
        self.subscribers.push(sender);
        receiver
    }

    pub fn emit(&mut self, event: SoundEvent) {
        log::trace!("event: {:?}", event);
        for handler in &self.handlers {
            handler(&event);
        }
        // Drop subscribers whose receiver is gone.
        self.subscribers
            .retain(|sender| sender.send(event.clone()).is_ok());
    }
}
