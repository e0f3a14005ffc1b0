use super::SoftwareBackend;
use crate::error::{Result, SonorityError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Plays a [`SoftwareBackend`] mix on the default output device.
pub struct DeviceOutput {
    stream: Option<cpal::Stream>,
    is_running: Arc<AtomicBool>,
    frames_rendered: Arc<AtomicUsize>,
    sample_rate: u32,
    channels: u16,
}

impl DeviceOutput {
    /// Opens the default output device at the backend's output rate and starts rendering.
    pub fn start(backend: SoftwareBackend, channels: u16) -> Result<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            SonorityError::Backend("No default output device available".into())
        })?;

        let sample_rate = backend.output_rate();
        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let default_config = device.default_output_config().map_err(|e| {
            SonorityError::Backend(format!("Failed to get default config: {}", e))
        })?;

        let is_running = Arc::new(AtomicBool::new(true));
        let frames_rendered = Arc::new(AtomicUsize::new(0));

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => create_stream::<f32>(
                &device,
                &config,
                backend,
                is_running.clone(),
                frames_rendered.clone(),
            )?,
            cpal::SampleFormat::I16 => create_stream::<i16>(
                &device,
                &config,
                backend,
                is_running.clone(),
                frames_rendered.clone(),
            )?,
            cpal::SampleFormat::U16 => create_stream::<u16>(
                &device,
                &config,
                backend,
                is_running.clone(),
                frames_rendered.clone(),
            )?,
            format => {
                return Err(SonorityError::Backend(format!(
                    "Unsupported sample format {:?}",
                    format
                )));
            }
        };

        stream
            .play()
            .map_err(|e| SonorityError::Backend(format!("Failed to start stream: {}", e)))?;

        log::info!(
            "Output device started at {} Hz, {} channels",
            sample_rate,
            channels
        );

        Ok(Self {
            stream: Some(stream),
            is_running,
            frames_rendered,
            sample_rate,
            channels,
        })
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.is_running.store(false, Ordering::Relaxed);
            drop(stream);
            log::info!("Output device stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    pub fn frames_rendered(&self) -> usize {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

fn create_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    backend: SoftwareBackend,
    is_running: Arc<AtomicBool>,
    frames_rendered: Arc<AtomicUsize>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels;
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if !is_running.load(Ordering::Relaxed) {
                    for sample in data.iter_mut() {
                        *sample = T::from_sample(0.0f32);
                    }
                    return;
                }

                scratch.resize(data.len(), 0.0);
                backend.render(&mut scratch, channels);
                for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(*sample);
                }

                frames_rendered.fetch_add(data.len() / channels.max(1) as usize, Ordering::Relaxed);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| SonorityError::Backend(format!("Failed to build stream: {}", e)))
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
