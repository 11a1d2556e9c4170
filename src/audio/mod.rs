use log::{debug, warn};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use thiserror::Error;

pub mod output;

pub use output::{AudioOutput, SilentOutput};
#[cfg(feature = "playback")]
pub use output::DeviceOutput;

/// Decoded audio, downmixed to a single channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Length of the buffer in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to read audio: {0}")]
    Io(#[from] std::io::Error),
    #[error("unrecognised audio container: {0}")]
    Probe(#[source] SymphoniaError),
    #[error("no decodable audio track")]
    NoTrack,
    #[error("audio codec error: {0}")]
    Codec(#[source] SymphoniaError),
    #[error("audio stream contained no samples")]
    Empty,
}

pub fn decode_file<P: AsRef<Path>>(path: P) -> Result<AudioBuffer, DecodeError> {
    let path = path.as_ref();
    let file = File::open(path)?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    decode_source(Box::new(file), hint)
}

/// Decodes an in-memory payload, using `mime` as a container hint when known.
#[cfg(any(feature = "whisper", test))]
pub fn decode_bytes(bytes: Vec<u8>, mime: Option<&str>) -> Result<AudioBuffer, DecodeError> {
    let mut hint = Hint::new();
    if let Some(mime) = mime {
        hint.mime_type(mime);
    }

    decode_source(Box::new(std::io::Cursor::new(bytes)), hint)
}

fn decode_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<AudioBuffer, DecodeError> {
    let mss = MediaSourceStream::new(source, Default::default());

    let format_opts = FormatOptions::default();
    let metadata_opts = MetadataOptions::default();
    let decoder_opts = DecoderOptions::default();

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &metadata_opts)
        .map_err(DecodeError::Probe)?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &decoder_opts)
        .map_err(DecodeError::Codec)?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(DecodeError::Codec(e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                if sample_rate == 0 {
                    sample_rate = spec.rate;
                }
                let channels = spec.channels.count().max(1);

                let mut interleaved = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                interleaved.copy_interleaved_ref(decoded);

                samples.extend(
                    interleaved
                        .samples()
                        .chunks(channels)
                        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                );
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping corrupt audio packet: {}", e);
                continue;
            }
            Err(e) => return Err(DecodeError::Codec(e)),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(DecodeError::Empty);
    }

    debug!("Decoded {} samples at {} Hz", samples.len(), sample_rate);

    Ok(AudioBuffer {
        samples,
        sample_rate,
    })
}

/// A decode running on a worker thread.
///
/// The host keeps polling [`PendingDecode::try_take`] from its own loop and
/// hands the buffer to the engine once it arrives.
pub struct PendingDecode {
    path: PathBuf,
    rx: Option<Receiver<Result<AudioBuffer, DecodeError>>>,
}

impl PendingDecode {
    pub fn spawn<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::channel();
        let worker_path = path.clone();

        thread::spawn(move || {
            let _ = tx.send(decode_file(&worker_path));
        });

        Self { path, rx: Some(rx) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the outcome exactly once, as soon as the worker has finished.
    pub fn try_take(&mut self) -> Option<Result<AudioBuffer, DecodeError>> {
        let rx = self.rx.as_ref()?;
        let outcome = match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(DecodeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "decoder thread exited without a result",
            ))),
        };
        self.rx = None;
        Some(outcome)
    }
}

/// Short-window loudness meter over a decoded buffer.
pub struct LevelMeter {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl LevelMeter {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(2);
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(window_size),
            window: hann_window(window_size),
        }
    }

    /// Mean spectral magnitude of the window starting at `time`, mapped from
    /// -100..0 dB onto 0..1.
    pub fn level(&self, buffer: &AudioBuffer, time: f64) -> f32 {
        let window_size = self.window.len();
        let start = (time.max(0.0) * buffer.sample_rate as f64) as usize;
        if start >= buffer.samples.len() {
            return 0.0;
        }

        let mut frame: Vec<Complex<f32>> = self
            .window
            .iter()
            .enumerate()
            .map(|(i, &w)| {
                let s = buffer.samples.get(start + i).copied().unwrap_or(0.0);
                Complex::new(s * w, 0.0)
            })
            .collect();

        self.fft.process(&mut frame);

        let bins = &frame[..window_size / 2];
        let mean = bins.iter().map(|c| c.norm()).sum::<f32>() / bins.len() as f32;
        let db = 20.0 * (mean / window_size as f32).max(1e-10).log10();

        ((db + 100.0) / 100.0).clamp(0.0, 1.0)
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos()))
        .collect()
}
