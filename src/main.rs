use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod audio;
mod init;
mod speech;
mod sync;
mod visualization;

use audio::{AudioOutput, PendingDecode};
use speech::{ExtractLyricsRequest, LyricExtractor};
use sync::SyncEngine;
use visualization::{Visualizer, VisualizerOptions};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the audio file to synchronise against
    #[arg(short, long)]
    input: PathBuf,

    /// Plain-text lyrics, one phrase per line
    #[arg(short, long, conflicts_with = "transcribe")]
    lyrics: Option<PathBuf>,

    /// Extract the lyrics from the audio instead of reading a file
    #[arg(short, long)]
    transcribe: bool,

    /// Whisper model used by --transcribe
    #[arg(long, default_value = "whisper-base.bin")]
    model: PathBuf,

    /// Language spoken in the track, for --transcribe
    #[arg(long, default_value = "en")]
    language: String,

    /// Sampling loop period in milliseconds
    #[arg(long, default_value = "50")]
    tick_ms: u64,

    /// Seconds skipped by the left/right keys
    #[arg(long, default_value = "10")]
    seek_step: f64,

    /// FFT size for the level meter (must be a power of 2)
    #[arg(short, long, default_value = "1024")]
    window_size: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let lyrics = match (&cli.lyrics, cli.transcribe) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read lyrics from {:?}", path))?,
        (None, true) => {
            println!("Extracting lyrics...");
            let extractor = extractor(&cli)?;
            extract_lyrics(extractor.as_ref(), &cli.input)?
        }
        (None, false) => bail!("Provide --lyrics <file> or --transcribe"),
    };

    let options = VisualizerOptions {
        seek_step: cli.seek_step,
        level_window: cli.window_size,
    };
    let tick = Duration::from_millis(cli.tick_ms);
    let pending = PendingDecode::spawn(&cli.input);

    run(output()?, &lyrics, tick, pending, options)
}

fn run<O: AudioOutput>(
    output: O,
    lyrics: &str,
    tick: Duration,
    pending: PendingDecode,
    options: VisualizerOptions,
) -> Result<()> {
    let engine = SyncEngine::with_lyrics(output, lyrics).with_tick(tick);
    Visualizer::new(engine, options)
        .with_pending_decode(pending)
        .run()
}

fn extract_lyrics(extractor: &dyn LyricExtractor, input: &Path) -> Result<String> {
    let request = ExtractLyricsRequest::from_file(input)?;
    let response = extractor
        .extract(&request)
        .context("Failed to extract lyrics")?;
    info!("Extracted {} lines of lyrics", response.lyrics.lines().count());
    Ok(response.lyrics)
}

#[cfg(feature = "whisper")]
fn extractor(cli: &Cli) -> Result<Box<dyn LyricExtractor>> {
    Ok(Box::new(
        speech::WhisperExtractor::new(&cli.model).with_language(&cli.language),
    ))
}

#[cfg(not(feature = "whisper"))]
fn extractor(cli: &Cli) -> Result<Box<dyn LyricExtractor>> {
    bail!(
        "--transcribe needs a build with the `whisper` feature (model: {:?}, language: {})",
        cli.model,
        cli.language
    )
}

#[cfg(feature = "playback")]
fn output() -> Result<audio::DeviceOutput> {
    audio::DeviceOutput::new()
}

#[cfg(not(feature = "playback"))]
fn output() -> Result<audio::SilentOutput> {
    Ok(audio::SilentOutput::new())
}
