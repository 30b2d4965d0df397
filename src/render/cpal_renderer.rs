//! cpal-backed output sink
//!
//! Negotiates a device configuration close to the pipeline's working format
//! (44.1kHz stereo f32 preferred), falling back to the device default, and
//! drives the pull callback from the hardware stream.

use crate::error::{Error, Result};
use crate::render::{AudioRenderer, AudioSpec, PullFn, SampleFormat};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat as CpalFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct CpalRenderer {
    device: Device,
    config: StreamConfig,
    sample_format: CpalFormat,
    stream: Option<Stream>,
    failed: Arc<AtomicBool>,
}

impl CpalRenderer {
    /// Open an output device, preferring `device_name` with fallback to the
    /// host default.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => {
                let found = host
                    .output_devices()
                    .map_err(|e| Error::Device(format!("Failed to enumerate devices: {e}")))?
                    .find(|d| d.name().ok().as_deref() == Some(name));
                match found {
                    Some(dev) => {
                        info!("Using requested audio device: {name}");
                        dev
                    }
                    None => {
                        warn!("Device '{name}' not found, falling back to default");
                        host.default_output_device().ok_or_else(|| {
                            Error::Device(format!(
                                "Device '{name}' not found and no default device available"
                            ))
                        })?
                    }
                }
            }
            None => host
                .default_output_device()
                .ok_or_else(|| Error::Device("No default output device found".to_string()))?,
        };

        let (config, sample_format) = Self::best_config(&device)?;
        debug!(
            "Audio config: sample_rate={}, channels={}, format={:?}",
            config.sample_rate.0, config.channels, sample_format
        );

        Ok(Self {
            device,
            config,
            sample_format,
            stream: None,
            failed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Prefer 44.1kHz stereo f32 to match the pipeline's working format;
    /// otherwise take whatever the device defaults to.
    fn best_config(device: &Device) -> Result<(StreamConfig, CpalFormat)> {
        let mut supported = device
            .supported_output_configs()
            .map_err(|e| Error::Device(format!("Failed to get device configs: {e}")))?;

        let preferred = supported.find(|c| {
            c.channels() == 2
                && c.min_sample_rate().0 <= 44100
                && c.max_sample_rate().0 >= 44100
                && c.sample_format() == CpalFormat::F32
        });

        if let Some(config) = preferred {
            let sample_format = config.sample_format();
            let config = config.with_sample_rate(cpal::SampleRate(44100)).config();
            return Ok((config, sample_format));
        }

        let config = device
            .default_output_config()
            .map_err(|e| Error::Device(format!("Failed to get default config: {e}")))?;
        let sample_format = config.sample_format();
        Ok((config.config(), sample_format))
    }

    fn build_stream_f32(&self, mut pull: PullFn) -> Result<Stream> {
        let failed = Arc::clone(&self.failed);
        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| pull(data),
                move |err| {
                    error!("Audio stream error: {err}");
                    failed.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::Device(format!("Failed to build stream: {e}")))
    }

    fn build_stream_i16(&self, mut pull: PullFn) -> Result<Stream> {
        let failed = Arc::clone(&self.failed);
        let mut scratch = vec![0.0f32; 4096];
        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    if scratch.len() < data.len() {
                        // Only grows on the rare quantum-size change, not in
                        // steady state.
                        scratch.resize(data.len(), 0.0);
                    }
                    let scratch = &mut scratch[..data.len()];
                    pull(scratch);
                    for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                        *out = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    }
                },
                move |err| {
                    error!("Audio stream error: {err}");
                    failed.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::Device(format!("Failed to build stream: {e}")))
    }
}

impl AudioRenderer for CpalRenderer {
    fn preferred_spec(&self) -> AudioSpec {
        AudioSpec {
            sample_rate: self.config.sample_rate.0,
            channels: self.config.channels,
            format: match self.sample_format {
                CpalFormat::I16 => SampleFormat::I16,
                _ => SampleFormat::F32,
            },
        }
    }

    fn start(&mut self, _spec: AudioSpec, pull: PullFn) -> Result<()> {
        info!("Starting audio stream");

        let stream = match self.sample_format {
            CpalFormat::F32 => self.build_stream_f32(pull)?,
            CpalFormat::I16 => self.build_stream_i16(pull)?,
            other => {
                return Err(Error::Device(format!(
                    "Unsupported device sample format: {other:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::Device(format!("Failed to start stream: {e}")))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            info!("Stopping audio stream");
            stream
                .pause()
                .map_err(|e| Error::Device(format!("Failed to pause stream: {e}")))?;
        }
        Ok(())
    }

    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

impl Drop for CpalRenderer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
