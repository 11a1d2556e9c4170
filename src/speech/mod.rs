use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[cfg(feature = "whisper")]
pub use whisper::WhisperExtractor;

/// MIME types the extractor accepts for uploaded audio.
pub const SUPPORTED_MIME_TYPES: &[&str] = &["audio/mpeg", "audio/mp3", "audio/wav"];

#[derive(Debug, Error)]
pub enum DataUriError {
    #[error("not a data URI")]
    MissingScheme,
    #[error("data URI payload is not base64 encoded")]
    NotBase64,
    #[error("invalid base64 payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),
    #[error("unsupported audio type: {0}")]
    UnsupportedMime(String),
    #[error("cannot infer audio type from {0:?}")]
    UnknownExtension(String),
    #[error("failed to read audio file: {0}")]
    Io(#[from] std::io::Error),
}

/// Self-describing audio payload: `data:<mime>;base64,<bytes>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUri {
    pub fn new(mime: &str, bytes: Vec<u8>) -> Result<Self, DataUriError> {
        let mime = mime.trim().to_ascii_lowercase();
        if !SUPPORTED_MIME_TYPES.contains(&mime.as_str()) {
            return Err(DataUriError::UnsupportedMime(mime));
        }
        Ok(Self { mime, bytes })
    }

    /// Reads an audio file, taking its type from the extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DataUriError> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let mime = match ext.as_str() {
            "mp3" => "audio/mpeg",
            "wav" => "audio/wav",
            _ => return Err(DataUriError::UnknownExtension(path.display().to_string())),
        };
        Self::new(mime, std::fs::read(path)?)
    }
}

impl fmt::Display for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

impl FromStr for DataUri {
    type Err = DataUriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix("data:").ok_or(DataUriError::MissingScheme)?;
        let (header, payload) = rest.split_once(',').ok_or(DataUriError::MissingScheme)?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or(DataUriError::NotBase64)?;
        let bytes = STANDARD.decode(payload.trim())?;
        Self::new(mime, bytes)
    }
}

/// Extraction input, carrying the audio in its `data:` text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractLyricsRequest {
    pub audio_data_uri: String,
}

impl ExtractLyricsRequest {
    pub fn new(audio: &DataUri) -> Self {
        Self {
            audio_data_uri: audio.to_string(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DataUriError> {
        Ok(Self::new(&DataUri::from_file(path)?))
    }

    /// Parses the payload back out of the wire text.
    pub fn audio(&self) -> Result<DataUri, DataUriError> {
        self.audio_data_uri.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractLyricsResponse {
    /// Plain text, one phrase per line.
    pub lyrics: String,
}

/// Something that can turn an audio payload into lyric text.
///
/// Implementations may be slow and may fail; callers decide how to report it.
pub trait LyricExtractor {
    fn extract(&self, request: &ExtractLyricsRequest) -> Result<ExtractLyricsResponse>;
}

#[cfg(feature = "whisper")]
mod whisper {
    use anyhow::{anyhow, Result};
    use log::{debug, info, warn};
    use std::path::{Path, PathBuf};
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext};

    use super::{ExtractLyricsRequest, ExtractLyricsResponse, LyricExtractor};
    use crate::audio::{decode_bytes, AudioBuffer};

    const WHISPER_SAMPLE_RATE: u32 = 16000;

    /// Local transcription with a ggml Whisper model.
    pub struct WhisperExtractor {
        model: PathBuf,
        language: String,
    }

    impl WhisperExtractor {
        pub fn new<P: AsRef<Path>>(model: P) -> Self {
            Self {
                model: model.as_ref().to_path_buf(),
                language: "en".to_string(),
            }
        }

        pub fn with_language(mut self, language: &str) -> Self {
            self.language = language.to_string();
            self
        }
    }

    fn prepare_samples(buffer: AudioBuffer) -> Vec<f32> {
        let mut samples = buffer.samples;

        let max_abs = samples.iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        if max_abs > 1.0 {
            debug!("Normalizing samples...");
            for sample in &mut samples {
                *sample /= max_abs;
            }
        }

        if buffer.sample_rate != WHISPER_SAMPLE_RATE {
            debug!("Resampling from {}Hz to 16kHz...", buffer.sample_rate);
            let ratio = WHISPER_SAMPLE_RATE as f32 / buffer.sample_rate as f32;
            let new_len = (samples.len() as f32 * ratio) as usize;
            samples = (0..new_len)
                .filter_map(|i| samples.get((i as f32 / ratio) as usize).copied())
                .collect();
        }

        samples
    }

    impl LyricExtractor for WhisperExtractor {
        fn extract(&self, request: &ExtractLyricsRequest) -> Result<ExtractLyricsResponse> {
            let uri = request.audio()?;
            let buffer = decode_bytes(uri.bytes, Some(&uri.mime))?;
            let audio_samples = prepare_samples(buffer);

            info!("Loading Whisper model from {:?}", self.model);
            let model = self
                .model
                .to_str()
                .ok_or_else(|| anyhow!("Model path is not valid UTF-8: {:?}", self.model))?;
            let ctx = WhisperContext::new(model)
                .map_err(|e| anyhow!("Failed to load Whisper model: {}", e))?;

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_language(Some(&self.language));
            params.set_print_special(false);
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);
            params.set_translate(false);
            params.set_no_context(true);
            params.set_single_segment(false);

            let mut state = ctx
                .create_state()
                .map_err(|e| anyhow!("Failed to create Whisper state: {}", e))?;

            info!("Transcribing {} samples", audio_samples.len());
            state
                .full(params, &audio_samples)
                .map_err(|e| anyhow!("Failed to process audio: {}", e))?;

            let num_segments = state
                .full_n_segments()
                .map_err(|e| anyhow!("Failed to get segments: {}", e))?;

            let mut lines = Vec::new();
            for i in 0..num_segments {
                let segment_text = state
                    .full_get_segment_text(i)
                    .map_err(|e| anyhow!("Failed to get segment text: {}", e))?;
                let segment_text = segment_text.trim();
                if !segment_text.is_empty() {
                    lines.push(segment_text.to_string());
                }
            }

            if lines.is_empty() {
                warn!("Whisper produced no lyric lines");
            }

            Ok(ExtractLyricsResponse {
                lyrics: lines.join("\n"),
            })
        }
    }
}
