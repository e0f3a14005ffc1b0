//! Circles a beeping emitter around the observer inside a cave soundscape.
//!
//! Run with `cargo run --example soundscape_demo --features device [path/to/music.ogg]`.
//! The music file is decoded up front and streamed from memory.

use anyhow::Result;
use sonority::decoder::decode_all;
use sonority::*;
use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

const RATE: u32 = 48000;

fn tone(frequency: f32, seconds: f32) -> Vec<f32> {
    let frames = (RATE as f32 * seconds) as usize;
    (0..frames)
        .map(|i| {
            let t = i as f32 / RATE as f32;
            let envelope = (1.0 - t / seconds).max(0.0);
            (TAU * frequency * t).sin() * envelope * 0.3
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .init();

    let music_path = std::env::args().nth(1);

    let backend = SoftwareBackend::new(RATE);
    let mut output = DeviceOutput::start(backend.clone(), 2)?;

    let generated = MemoryDecoder::new();
    let beep = SoundAsset::new("generated/beep").into_shared();
    generated.register(beep.path(), tone(880.0, 0.25), PcmFormat::new(RATE, 1));

    let mut system = SoundSystem::new(
        SoundSystemDesc::default().voices(16),
        Box::new(backend),
        Arc::new(generated.clone()),
    )?;
    let events = system.subscribe()?;

    let music_group = SoundGroup::new("music").two_dimensional(true).into_shared();
    music_group.set_gain(0.4);
    if let Some(path) = &music_path {
        let music = SoundAsset::streamed(path).into_shared();
        let mut handle = SymphoniaDecoder::new().open(&music)?;
        let format = handle.format();
        let pcm = decode_all(handle.as_mut())?;
        log::info!("Decoded {} ({} samples, {:?})", path, pcm.len(), format);
        generated.register(music.path(), pcm, format);
        system.play_looping(SoundRequest::play(music).group(music_group.clone()))?;
    }

    let world = Arc::new(
        SoundCategory::new("world")
            .rolloff(Rolloff::new(1.0, 30.0, Falloff::Cosine))
            .lowpass_rolloff(Rolloff::new(5.0, 40.0, Falloff::Linear)),
    );
    let emitters = SoundGroup::new("emitters").occludable(true).into_shared();
    let emitter = Arc::new(SoundLocation::at(0.0, 10.0, 0.0));

    // Anything on the negative x side is behind a wall.
    system.set_occlusion(|sound: Vec3, _observer: Vec3| if sound.x < 0.0 { 0.8 } else { 0.0 })?;
    system.set_soundscape(Some(Arc::new(
        SoundScape::new("cave")
            .reverb(ReverbParams::CAVE)
            .occlusion(OcclusionParams {
                gain: 0.5,
                lowpass_gain: 0.2,
                highpass_gain: 1.0,
            })
            .effect_ramp(0.2, 20.0),
    )))?;

    for step in 0..48 {
        let angle = step as f32 / 48.0 * TAU;
        emitter.set_position(Vec3::new(angle.sin() * 10.0, angle.cos() * 10.0, 0.0));

        if step % 4 == 0 {
            system.play(
                SoundRequest::play(beep.clone())
                    .category(world.clone())
                    .group(emitters.clone())
                    .location(emitter.clone())
                    .channel(0),
            )?;
        }

        for event in events.try_iter() {
            if event.is_error() {
                log::warn!("{:?}", event);
            }
        }
        std::thread::sleep(Duration::from_millis(125));
    }

    let stats = system.stats();
    log::info!(
        "{} voices active, {} free, {} frames rendered",
        stats.active_voices,
        stats.free_voices,
        output.frames_rendered()
    );

    system.shutdown();
    output.stop();
    Ok(())
}
