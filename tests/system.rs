use sonority::backend::ObjectCounts;
use sonority::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const RATE: u32 = 1000;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn start(voices: usize) -> (SoundSystem, SoftwareBackend, MemoryDecoder) {
    init_logging();
    let backend = SoftwareBackend::new(RATE);
    let decoder = MemoryDecoder::new();
    let system = SoundSystem::new(
        SoundSystemDesc::new()
            .voices(voices)
            .tick_interval(Duration::from_millis(1))
            .voice_update_interval(1)
            .rng_seed(11),
        Box::new(backend.clone()),
        Arc::new(decoder.clone()),
    )
    .unwrap();
    (system, backend, decoder)
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn test_requests_from_many_threads() {
    let (mut system, backend, decoder) = start(8);
    let asset = SoundAsset::new("tick.wav").into_shared();
    decoder.register(asset.path(), vec![0.2; 100_000], PcmFormat::new(RATE, 1));

    let events = system.subscribe().unwrap();
    let system = Arc::new(std::sync::Mutex::new(system));
    let producers: Vec<_> = (0..4)
        .map(|_| {
            let system = system.clone();
            let asset = asset.clone();
            std::thread::spawn(move || {
                for _ in 0..5 {
                    let system = system.lock().unwrap();
                    system.play(SoundRequest::play(asset.clone())).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let mut played = 0;
    let mut rejected = 0;
    assert!(wait_for(|| {
        for event in events.try_iter() {
            match event {
                SoundEvent::VoicePlayed { .. } => played += 1,
                SoundEvent::VoiceRejected {
                    reason: RejectReason::NoFreeVoice,
                    ..
                } => rejected += 1,
                _ => {}
            }
        }
        played + rejected == 20
    }));
    assert_eq!(played, 8);

    let stats = system.lock().unwrap().stats();
    assert_eq!(stats.active_voices + stats.free_voices, 8);

    system.lock().unwrap().shutdown();
    assert_eq!(backend.object_counts(), ObjectCounts::default());
}

#[test]
fn test_handler_sees_clip_finish() {
    let (mut system, backend, decoder) = start(2);
    let asset = SoundAsset::new("blip.wav").into_shared();
    decoder.register(asset.path(), vec![0.5; 200], PcmFormat::new(RATE, 1));

    let finished = Arc::new(AtomicUsize::new(0));
    let counter = finished.clone();
    system
        .add_handler(move |event| {
            if matches!(event, SoundEvent::VoiceDeallocated { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
    system.play(SoundRequest::play(asset)).unwrap();

    assert!(wait_for(|| system.stats().active_voices == 1));
    backend.advance(300);
    assert!(wait_for(|| finished.load(Ordering::SeqCst) == 1));
    assert_eq!(system.stats().free_voices, 2);

    system.shutdown();
}

#[test]
fn test_moving_location_updates_voice() {
    let (mut system, backend, decoder) = start(1);
    let asset = SoundAsset::new("hum.wav").into_shared();
    decoder.register(asset.path(), vec![0.5; 500], PcmFormat::new(RATE, 1));

    let category = Arc::new(
        SoundCategory::new("world").rolloff(Rolloff::new(0.0, 10.0, Falloff::Linear)),
    );
    let location = Arc::new(SoundLocation::at(0.0, 2.0, 0.0));
    system
        .play_looping(
            SoundRequest::play(asset)
                .category(category)
                .location(location.clone()),
        )
        .unwrap();
    assert!(wait_for(|| system.stats().active_voices == 1));

    // The only voice's source is the first object the backend hands out.
    let source = backend::SourceHandle::from_raw(1);
    assert!(wait_for(|| backend
        .source_snapshot(source)
        .is_some_and(|s| (s.gain - 0.8).abs() < 1e-4)));

    location.set_position(Vec3::new(0.0, 5.0, 0.0));
    assert!(wait_for(|| backend
        .source_snapshot(source)
        .is_some_and(|s| (s.gain - 0.5).abs() < 1e-4)));

    system.shutdown();
}
