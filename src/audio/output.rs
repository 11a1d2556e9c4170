// Audio output backends
// The sync engine owns exactly one of these and reads its clock while playing

use anyhow::Result;
use log::debug;
use std::sync::Arc;
use std::time::Instant;

use super::AudioBuffer;

/// A sink that can play one buffer at a time and exposes a monotonic clock.
pub trait AudioOutput {
    /// Start playing `buffer` from `offset` seconds.
    fn start(&mut self, buffer: Arc<AudioBuffer>, offset: f64) -> Result<()>;

    /// Stop the current source. Safe to call when nothing is playing.
    fn stop(&mut self);

    /// Seconds on the output's clock. Never goes backwards.
    fn clock(&self) -> f64;
}

/// Output that renders nothing and keeps time with the system clock.
pub struct SilentOutput {
    origin: Instant,
    playing: bool,
}

impl SilentOutput {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            playing: false,
        }
    }
}

impl Default for SilentOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for SilentOutput {
    fn start(&mut self, buffer: Arc<AudioBuffer>, offset: f64) -> Result<()> {
        debug!(
            "Silent output started at {:.2}s of {:.2}s",
            offset,
            buffer.duration()
        );
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.playing {
            debug!("Silent output stopped");
        }
        self.playing = false;
    }

    fn clock(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

#[cfg(feature = "playback")]
pub use device::DeviceOutput;

#[cfg(feature = "playback")]
mod device {
    use anyhow::{anyhow, Context, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Stream, StreamConfig};
    use log::{debug, error};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use super::AudioOutput;
    use crate::audio::AudioBuffer;

    struct Playhead {
        buffer: Arc<AudioBuffer>,
        position: f64,
        step: f64,
    }

    impl Playhead {
        fn next_sample(&mut self) -> Option<f32> {
            let sample = self.buffer.samples.get(self.position as usize).copied();
            self.position += self.step;
            sample
        }
    }

    /// Output on the default sound device.
    ///
    /// The stream runs for the lifetime of the output and plays silence while
    /// no source is attached, so the frame counter behind [`AudioOutput::clock`]
    /// advances in step with what is actually heard.
    pub struct DeviceOutput {
        _stream: Stream,
        playhead: Arc<Mutex<Option<Playhead>>>,
        frames_rendered: Arc<AtomicU64>,
        sample_rate: u32,
    }

    impl DeviceOutput {
        pub fn new() -> Result<Self> {
            let host = cpal::default_host();

            let device = host
                .default_output_device()
                .ok_or_else(|| anyhow!("No output device available"))?;

            let config = device
                .default_output_config()
                .context("Failed to get default output config")?;

            let sample_rate = config.sample_rate().0;
            let playhead = Arc::new(Mutex::new(None));
            let frames_rendered = Arc::new(AtomicU64::new(0));

            let stream = match config.sample_format() {
                cpal::SampleFormat::F32 => Self::build_stream::<f32>(
                    &device,
                    &config.into(),
                    playhead.clone(),
                    frames_rendered.clone(),
                )?,
                cpal::SampleFormat::I16 => Self::build_stream::<i16>(
                    &device,
                    &config.into(),
                    playhead.clone(),
                    frames_rendered.clone(),
                )?,
                cpal::SampleFormat::U16 => Self::build_stream::<u16>(
                    &device,
                    &config.into(),
                    playhead.clone(),
                    frames_rendered.clone(),
                )?,
                format => return Err(anyhow!("Unsupported sample format: {:?}", format)),
            };

            stream.play().context("Failed to start output stream")?;
            debug!("Opened output device at {} Hz", sample_rate);

            Ok(Self {
                _stream: stream,
                playhead,
                frames_rendered,
                sample_rate,
            })
        }

        fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
            device: &cpal::Device,
            config: &StreamConfig,
            playhead: Arc<Mutex<Option<Playhead>>>,
            frames_rendered: Arc<AtomicU64>,
        ) -> Result<Stream> {
            let channels = config.channels.max(1) as usize;

            let stream = device
                .build_output_stream(
                    config,
                    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                        let mut playhead = playhead.lock();
                        let mut frames = 0u64;

                        for frame in data.chunks_mut(channels) {
                            let value = match playhead.as_mut().and_then(Playhead::next_sample) {
                                Some(value) => value,
                                None => {
                                    *playhead = None;
                                    0.0
                                }
                            };
                            for sample in frame.iter_mut() {
                                *sample = T::from_sample(value);
                            }
                            frames += 1;
                        }

                        frames_rendered.fetch_add(frames, Ordering::Relaxed);
                    },
                    move |err| {
                        error!("Audio output error: {}", err);
                    },
                    None,
                )
                .context("Failed to build output stream")?;

            Ok(stream)
        }
    }

    impl AudioOutput for DeviceOutput {
        fn start(&mut self, buffer: Arc<AudioBuffer>, offset: f64) -> Result<()> {
            let position = (offset.max(0.0) * buffer.sample_rate as f64).floor();
            let step = buffer.sample_rate as f64 / self.sample_rate as f64;
            *self.playhead.lock() = Some(Playhead {
                buffer,
                position,
                step,
            });
            Ok(())
        }

        fn stop(&mut self) {
            self.playhead.lock().take();
        }

        fn clock(&self) -> f64 {
            self.frames_rendered.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
        }
    }
}
