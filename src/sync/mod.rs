use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::{decode_file, AudioBuffer, AudioOutput, DecodeError};

pub mod timeline;

/// Placeholder length given to each phrase before it has been timed.
pub const PLACEHOLDER_PHRASE_SECONDS: f64 = 5.0;

/// Default period of the sampling loop.
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct LyricPhrase {
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
}

impl LyricPhrase {
    /// Half-open: a phrase owns its start but not its end.
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start_time && time < self.end_time
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynchronizedLyrics {
    pub phrases: Vec<LyricPhrase>,
    pub audio_duration: f64,
}

impl SynchronizedLyrics {
    /// One phrase per non-blank line, each given a placeholder window.
    pub fn from_text(text: &str) -> Self {
        let phrases: Vec<LyricPhrase> = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| LyricPhrase {
                text: line.to_string(),
                start_time: i as f64 * PLACEHOLDER_PHRASE_SECONDS,
                end_time: (i + 1) as f64 * PLACEHOLDER_PHRASE_SECONDS,
            })
            .collect();

        let audio_duration = phrases.len() as f64 * PLACEHOLDER_PHRASE_SECONDS;
        Self {
            phrases,
            audio_duration,
        }
    }

    /// Length implied by the phrases alone: the placeholder span or the
    /// furthest phrase end, whichever is later.
    pub fn lyric_duration(&self) -> f64 {
        let placeholder = self.phrases.len() as f64 * PLACEHOLDER_PHRASE_SECONDS;
        self.phrases
            .iter()
            .map(|p| p.end_time)
            .fold(placeholder, f64::max)
    }

    /// Index of the first phrase containing `time`, in array order.
    pub fn phrase_at(&self, time: f64) -> Option<usize> {
        self.phrases.iter().position(|p| p.contains(time))
    }

    /// Phrase bounds as fractions of the total duration.
    pub fn span_fraction(&self, index: usize) -> Option<(f64, f64)> {
        if self.audio_duration <= 0.0 {
            return None;
        }
        let phrase = self.phrases.get(index)?;
        Some((
            phrase.start_time / self.audio_duration,
            phrase.end_time / self.audio_duration,
        ))
    }
}

/// Everything a view needs to render the engine.
///
/// Cloning is cheap: the decoded audio sits behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    pub synchronized_lyrics: Option<SynchronizedLyrics>,
    pub current_phrase: Option<usize>,
    pub is_playing: bool,
    pub current_time: f64,
    pub is_synchronized: bool,
    pub audio_buffer: Option<Arc<AudioBuffer>>,
}

impl SyncState {
    /// Upper bound for playback time.
    pub fn duration(&self) -> f64 {
        match (&self.synchronized_lyrics, &self.audio_buffer) {
            (Some(lyrics), _) => lyrics.audio_duration,
            (None, Some(buffer)) => buffer.duration(),
            (None, None) => 0.0,
        }
    }

    /// Playback position as a fraction in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        let duration = self.duration();
        if duration <= 0.0 {
            return 0.0;
        }
        (self.current_time / duration).clamp(0.0, 1.0)
    }

    pub fn phrases(&self) -> &[LyricPhrase] {
        self.synchronized_lyrics
            .as_ref()
            .map(|l| l.phrases.as_slice())
            .unwrap_or(&[])
    }

    fn phrase_at(&self, time: f64) -> Option<usize> {
        self.synchronized_lyrics.as_ref()?.phrase_at(time)
    }
}

/// Where the running source started, on both timelines.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    clock_at_start: f64,
    time_at_start: f64,
}

#[derive(Debug, Clone, Copy)]
struct SamplingLoop {
    next_due: f64,
}

/// Playback and timing controller for one set of lyrics and one audio track.
pub struct SyncEngine<O: AudioOutput> {
    output: O,
    state: SyncState,
    tick: Duration,
    anchor: Option<Anchor>,
    sampler: Option<SamplingLoop>,
}

impl<O: AudioOutput> SyncEngine<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            state: SyncState::default(),
            tick: DEFAULT_TICK,
            anchor: None,
            sampler: None,
        }
    }

    pub fn with_lyrics(output: O, lyrics: &str) -> Self {
        let mut engine = Self::new(output);
        engine.set_lyrics(lyrics);
        engine
    }

    /// Sets the sampling period; zero is raised to one millisecond.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn snapshot(&self) -> SyncState {
        self.state.clone()
    }

    /// Number of running sampling loops, either 0 or 1.
    #[cfg(test)]
    pub fn active_loops(&self) -> usize {
        usize::from(self.sampler.is_some())
    }

    pub fn set_lyrics(&mut self, text: &str) {
        let mut lyrics = SynchronizedLyrics::from_text(text);
        if let Some(buffer) = &self.state.audio_buffer {
            lyrics.audio_duration = lyrics.audio_duration.max(buffer.duration());
        }
        info!("Loaded {} lyric phrases", lyrics.phrases.len());

        self.state.synchronized_lyrics = Some(lyrics);
        self.state.is_synchronized = false;
        self.state.current_time = self.state.current_time.min(self.state.duration());
        self.state.current_phrase = self.state.phrase_at(self.state.current_time);
    }

    /// Decodes `path` and installs the result. State is untouched on failure.
    pub fn load_audio<P: AsRef<Path>>(&mut self, path: P) -> Result<(), DecodeError> {
        let path = path.as_ref();
        match decode_file(path) {
            Ok(buffer) => {
                info!("Decoded {:?} ({:.2}s)", path, buffer.duration());
                self.set_audio_buffer(buffer);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to decode {:?}: {}", path, e);
                Err(e)
            }
        }
    }

    /// Replaces the current buffer, stopping any playback of the old one.
    pub fn set_audio_buffer(&mut self, buffer: AudioBuffer) {
        self.halt();

        if let Some(lyrics) = self.state.synchronized_lyrics.as_mut() {
            lyrics.audio_duration = lyrics.lyric_duration().max(buffer.duration());
        }
        self.state.audio_buffer = Some(Arc::new(buffer));
        self.state.current_time = self.state.current_time.min(self.state.duration());
    }

    pub fn play(&mut self) {
        if self.state.is_playing {
            return;
        }
        let Some(buffer) = self.state.audio_buffer.clone() else {
            debug!("play() ignored: no audio loaded");
            return;
        };

        let duration = self.state.duration();
        if duration <= 0.0 {
            return;
        }
        if self.state.current_time >= duration {
            self.state.current_time = 0.0;
            self.state.current_phrase = self.state.phrase_at(0.0);
        }

        // Never let two sources or two loops run at once.
        self.halt();

        let offset = self.state.current_time;
        if let Err(e) = self.output.start(buffer, offset) {
            warn!("Failed to start playback: {:#}", e);
            return;
        }

        let clock = self.output.clock();
        self.anchor = Some(Anchor {
            clock_at_start: clock,
            time_at_start: offset,
        });
        self.sampler = Some(SamplingLoop {
            next_due: clock + self.tick.as_secs_f64(),
        });
        self.state.is_playing = true;
        debug!("Playing from {:.2}s", offset);
    }

    pub fn pause(&mut self) {
        if self.state.is_playing {
            debug!("Paused at {:.2}s", self.state.current_time);
        }
        self.halt();
    }

    pub fn seek(&mut self, time: f64) {
        let time = if time.is_nan() { 0.0 } else { time };
        let was_playing = self.state.is_playing;
        if was_playing {
            self.pause();
        }

        self.state.current_time = time.clamp(0.0, self.state.duration());
        self.state.current_phrase = self.state.phrase_at(self.state.current_time);

        // Seeking to the very end while playing ends playback instead of rewinding.
        if was_playing && self.state.current_time < self.state.duration() {
            self.play();
        }
    }

    pub fn select_phrase(&mut self, index: usize) {
        if index < self.state.phrases().len() {
            self.state.current_phrase = Some(index);
        }
    }

    pub fn update_timing(&mut self, index: usize, start_time: f64, end_time: f64) {
        if !(start_time < end_time) || !start_time.is_finite() || !end_time.is_finite() {
            debug!(
                "update_timing({}) ignored: [{}, {}) is not a valid window",
                index, start_time, end_time
            );
            return;
        }
        let Some(lyrics) = self.state.synchronized_lyrics.as_mut() else {
            return;
        };
        let Some(slot) = lyrics.phrases.get_mut(index) else {
            return;
        };

        *slot = LyricPhrase {
            text: std::mem::take(&mut slot.text),
            start_time,
            end_time,
        };
        self.state.is_synchronized = true;
    }

    pub fn reset(&mut self) {
        self.halt();
        self.state = SyncState::default();
        info!("Sync engine reset");
    }

    /// Runs one sampling tick if the loop is due. Returns whether it ran.
    pub fn poll(&mut self) -> bool {
        let Some(sampler) = self.sampler else {
            return false;
        };
        let clock = self.output.clock();
        let at_boundary = self.boundary_due().is_some_and(|due| clock >= due);
        if clock < sampler.next_due && !at_boundary {
            return false;
        }

        self.sample(clock);
        if let Some(sampler) = self.sampler.as_mut() {
            sampler.next_due = clock + self.tick.as_secs_f64();
        }
        true
    }

    /// How long the host can wait before calling [`SyncEngine::poll`] again.
    ///
    /// While playing this is the time to the next tick or the next phrase
    /// boundary, whichever comes first, so highlights change on time even
    /// with a coarse tick.
    pub fn next_deadline(&self) -> Option<Duration> {
        let sampler = self.sampler?;
        let clock = self.output.clock();
        let due = self
            .boundary_due()
            .map_or(sampler.next_due, |b| b.min(sampler.next_due));

        Some(Duration::from_secs_f64((due - clock).max(0.0)))
    }

    /// Output clock value at which playback crosses the next boundary.
    fn boundary_due(&self) -> Option<f64> {
        let anchor = self.anchor?;
        let boundary = self.next_boundary()?;
        Some(anchor.clock_at_start + (boundary - anchor.time_at_start))
    }

    fn next_boundary(&self) -> Option<f64> {
        let now = self.state.current_time;
        self.state
            .phrases()
            .iter()
            .flat_map(|p| [p.start_time, p.end_time])
            .chain(std::iter::once(self.state.duration()))
            .filter(|&t| t > now)
            .min_by(|a, b| a.total_cmp(b))
    }

    fn sample(&mut self, clock: f64) {
        let Some(anchor) = self.anchor else {
            return;
        };
        let duration = self.state.duration();
        let elapsed = (clock - anchor.clock_at_start).max(0.0);

        self.state.current_time = (anchor.time_at_start + elapsed).min(duration);
        self.state.current_phrase = self.state.phrase_at(self.state.current_time);

        if self.state.current_time >= duration {
            debug!("Reached end of track at {:.2}s", duration);
            self.halt();
        }
    }

    /// Stops the source and the loop unconditionally.
    fn halt(&mut self) {
        self.output.stop();
        self.anchor = None;
        self.sampler = None;
        self.state.is_playing = false;
    }
}

impl<O: AudioOutput> Drop for SyncEngine<O> {
    fn drop(&mut self) {
        self.output.stop();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::Result;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Output driven by a hand-set clock that records overlapping sources.
    #[derive(Clone, Default)]
    pub(crate) struct ManualOutput {
        pub clock: Rc<Cell<f64>>,
        pub active: Rc<Cell<usize>>,
        pub max_active: Rc<Cell<usize>>,
        pub starts: Rc<Cell<usize>>,
        pub last_offset: Rc<Cell<f64>>,
    }

    impl ManualOutput {
        pub fn advance(&self, seconds: f64) {
            self.clock.set(self.clock.get() + seconds);
        }
    }

    impl AudioOutput for ManualOutput {
        fn start(&mut self, _buffer: Arc<AudioBuffer>, offset: f64) -> Result<()> {
            self.active.set(self.active.get() + 1);
            self.max_active.set(self.max_active.get().max(self.active.get()));
            self.starts.set(self.starts.get() + 1);
            self.last_offset.set(offset);
            Ok(())
        }

        fn stop(&mut self) {
            self.active.set(0);
        }

        fn clock(&self) -> f64 {
            self.clock.get()
        }
    }

    fn buffer(seconds: f64) -> AudioBuffer {
        AudioBuffer {
            samples: vec![0.0; (seconds * 100.0) as usize],
            sample_rate: 100,
        }
    }

    fn engine(lyrics: &str) -> (SyncEngine<ManualOutput>, ManualOutput) {
        let output = ManualOutput::default();
        let engine = SyncEngine::with_lyrics(output.clone(), lyrics);
        (engine, output)
    }

    fn playing_engine(lyrics: &str, audio_seconds: f64) -> (SyncEngine<ManualOutput>, ManualOutput) {
        let (mut engine, output) = engine(lyrics);
        engine.set_audio_buffer(buffer(audio_seconds));
        (engine, output)
    }

    fn run_for(engine: &mut SyncEngine<ManualOutput>, output: &ManualOutput, seconds: f64) {
        let steps = (seconds / 0.05).round() as usize;
        for _ in 0..steps {
            output.advance(0.05);
            engine.poll();
        }
    }

    #[test]
    fn placeholder_timing_is_five_seconds_per_line() {
        let lyrics = SynchronizedLyrics::from_text("one\n\ntwo\r\n   \nthree\n");

        assert_eq!(lyrics.phrases.len(), 3);
        for (i, phrase) in lyrics.phrases.iter().enumerate() {
            assert_eq!(phrase.start_time, 5.0 * i as f64);
            assert_eq!(phrase.end_time, 5.0 * i as f64 + 5.0);
        }
        assert_eq!(lyrics.phrases[1].text, "two");
        assert_eq!(lyrics.audio_duration, 15.0);
    }

    #[test]
    fn phrase_text_is_kept_as_written() {
        let lyrics = SynchronizedLyrics::from_text("  indented line\ttrailing tab\t\r\n\t\nlast ");

        assert_eq!(lyrics.phrases.len(), 2);
        assert_eq!(lyrics.phrases[0].text, "  indented line\ttrailing tab\t");
        assert_eq!(lyrics.phrases[1].text, "last ");
        assert_eq!(lyrics.audio_duration, 10.0);
    }

    #[test]
    fn empty_text_has_no_phrases() {
        let lyrics = SynchronizedLyrics::from_text("\n\n  \n");
        assert!(lyrics.phrases.is_empty());
        assert_eq!(lyrics.audio_duration, 0.0);
        assert_eq!(lyrics.span_fraction(0), None);
    }

    #[test]
    fn hello_world_seek_scenario() {
        let (mut engine, _) = engine("Hello\nWorld");
        let lyrics = engine.state().synchronized_lyrics.clone().unwrap();
        assert_eq!(
            lyrics.phrases,
            vec![
                LyricPhrase { text: "Hello".into(), start_time: 0.0, end_time: 5.0 },
                LyricPhrase { text: "World".into(), start_time: 5.0, end_time: 10.0 },
            ]
        );
        assert_eq!(lyrics.audio_duration, 10.0);

        engine.seek(6.0);
        assert_eq!(engine.state().current_phrase, Some(1));
        engine.seek(4.0);
        assert_eq!(engine.state().current_phrase, Some(0));
        engine.seek(10.0);
        assert_eq!(engine.state().current_phrase, None);
    }

    #[test]
    fn seek_clamps_into_range() {
        let (mut engine, _) = engine("a\nb");

        engine.seek(-3.0);
        assert_eq!(engine.state().current_time, 0.0);
        assert_eq!(engine.state().current_phrase, Some(0));

        engine.seek(99.0);
        assert_eq!(engine.state().current_time, 10.0);
        assert_eq!(engine.state().current_phrase, None);

        engine.seek(f64::NAN);
        assert_eq!(engine.state().current_time, 0.0);
    }

    #[test]
    fn overlapping_phrases_resolve_to_first() {
        let (mut engine, _) = engine("a\nb\nc");
        engine.update_timing(2, 1.0, 4.0);

        engine.seek(2.0);
        assert_eq!(engine.state().current_phrase, Some(0));
        engine.seek(11.0);
        assert_eq!(engine.state().current_phrase, None);
    }

    #[test]
    fn play_without_audio_is_ignored() {
        let (mut engine, output) = engine("Hello\nWorld");
        let before = engine.snapshot();

        engine.play();

        assert!(!engine.state().is_playing);
        assert_eq!(engine.active_loops(), 0);
        assert_eq!(output.starts.get(), 0);
        assert_eq!(engine.state().current_time, before.current_time);
        assert_eq!(engine.state().synchronized_lyrics, before.synchronized_lyrics);
    }

    #[test]
    fn double_play_keeps_one_source_and_one_loop() {
        let (mut engine, output) = playing_engine("a\nb", 10.0);

        engine.play();
        engine.play();

        assert!(engine.state().is_playing);
        assert_eq!(output.starts.get(), 1);
        assert_eq!(output.active.get(), 1);
        assert_eq!(engine.active_loops(), 1);
    }

    #[test]
    fn seeking_while_playing_never_overlaps_sources() {
        let (mut engine, output) = playing_engine("a\nb\nc", 15.0);

        engine.play();
        run_for(&mut engine, &output, 1.0);
        engine.seek(7.5);
        engine.seek(2.0);
        run_for(&mut engine, &output, 0.5);

        assert!(engine.state().is_playing);
        assert_eq!(output.max_active.get(), 1);
        assert_eq!(engine.active_loops(), 1);
        assert_eq!(output.last_offset.get(), 2.0);
        assert!((engine.state().current_time - 2.5).abs() < 1e-9);
    }

    #[test]
    fn seeking_to_the_end_while_playing_stops() {
        let (mut engine, output) = playing_engine("a\nb", 10.0);

        engine.play();
        engine.seek(50.0);

        assert!(!engine.state().is_playing);
        assert_eq!(engine.state().current_time, 10.0);
        assert_eq!(output.active.get(), 0);
        assert_eq!(engine.active_loops(), 0);
    }

    #[test]
    fn sampling_tracks_the_clock_and_phrase() {
        let (mut engine, output) = playing_engine("a\nb", 10.0);

        engine.play();
        run_for(&mut engine, &output, 6.0);

        assert!((engine.state().current_time - 6.0).abs() < 1e-6);
        assert_eq!(engine.state().current_phrase, Some(1));
    }

    #[test]
    fn poll_waits_for_the_tick() {
        let (mut engine, output) = playing_engine("a", 5.0);

        engine.play();
        output.advance(0.01);
        assert!(!engine.poll());
        assert_eq!(engine.state().current_time, 0.0);

        output.advance(0.05);
        assert!(engine.poll());
        assert!((engine.state().current_time - 0.06).abs() < 1e-9);
    }

    #[test]
    fn pause_then_play_resumes_where_it_stopped() {
        let (mut engine, output) = playing_engine("a\nb", 10.0);

        engine.play();
        run_for(&mut engine, &output, 3.0);
        engine.pause();
        let paused_at = engine.state().current_time;

        output.advance(20.0);
        engine.poll();
        assert_eq!(engine.state().current_time, paused_at);
        assert_eq!(engine.active_loops(), 0);
        assert_eq!(output.active.get(), 0);

        engine.play();
        assert_eq!(output.last_offset.get(), paused_at);
        run_for(&mut engine, &output, 1.0);
        assert!((engine.state().current_time - (paused_at + 1.0)).abs() < 1e-6);
    }

    #[test]
    fn pause_and_reset_are_safe_when_idle() {
        let (mut engine, _) = engine("a");
        engine.pause();
        engine.reset();
        engine.pause();
        assert_eq!(engine.active_loops(), 0);
    }

    #[test]
    fn playback_stops_at_the_end() {
        let (mut engine, output) = playing_engine("a\nb", 10.0);

        engine.seek(9.0);
        engine.play();
        run_for(&mut engine, &output, 2.0);

        assert!(!engine.state().is_playing);
        assert_eq!(engine.state().current_time, 10.0);
        assert_eq!(engine.state().current_phrase, None);
        assert_eq!(engine.active_loops(), 0);
        assert_eq!(output.active.get(), 0);
        assert_eq!(engine.next_deadline(), None);
    }

    #[test]
    fn play_at_the_end_starts_over() {
        let (mut engine, output) = playing_engine("a", 5.0);

        engine.seek(5.0);
        engine.play();

        assert!(engine.state().is_playing);
        assert_eq!(output.last_offset.get(), 0.0);
    }

    #[test]
    fn update_timing_touches_only_one_phrase() {
        let (mut engine, _) = engine("a\nb\nc");
        let before = engine.state().synchronized_lyrics.clone().unwrap();

        engine.update_timing(1, 5.5, 9.25);

        let after = engine.state().synchronized_lyrics.clone().unwrap();
        assert_eq!(after.audio_duration, before.audio_duration);
        assert_eq!(after.phrases[0], before.phrases[0]);
        assert_eq!(after.phrases[2], before.phrases[2]);
        assert_eq!(after.phrases[1].text, "b");
        assert_eq!(after.phrases[1].start_time, 5.5);
        assert_eq!(after.phrases[1].end_time, 9.25);
        assert!(engine.state().is_synchronized);
    }

    #[test]
    fn invalid_timing_updates_are_ignored() {
        let (mut engine, _) = engine("a\nb");
        let before = engine.snapshot();

        engine.update_timing(7, 1.0, 2.0);
        engine.update_timing(0, 3.0, 3.0);
        engine.update_timing(0, 4.0, f64::INFINITY);

        assert_eq!(engine.state().synchronized_lyrics, before.synchronized_lyrics);
        assert!(!engine.state().is_synchronized);
    }

    #[test]
    fn select_phrase_leaves_time_alone() {
        let (mut engine, _) = engine("a\nb\nc");
        engine.seek(1.0);

        engine.select_phrase(2);
        assert_eq!(engine.state().current_phrase, Some(2));
        assert_eq!(engine.state().current_time, 1.0);

        engine.select_phrase(3);
        assert_eq!(engine.state().current_phrase, Some(2));
    }

    #[test]
    fn reset_discards_everything() {
        let (mut engine, output) = playing_engine("a\nb", 10.0);
        engine.play();
        run_for(&mut engine, &output, 1.0);

        engine.reset();

        let state = engine.state();
        assert!(state.synchronized_lyrics.is_none());
        assert!(state.audio_buffer.is_none());
        assert!(!state.is_playing);
        assert_eq!(state.current_time, 0.0);
        assert_eq!(state.current_phrase, None);
        assert_eq!(output.active.get(), 0);
        assert_eq!(engine.active_loops(), 0);
    }

    #[test]
    fn longer_audio_extends_the_duration() {
        let (mut engine, _) = playing_engine("a\nb", 42.0);
        assert_eq!(engine.state().duration(), 42.0);

        engine.set_audio_buffer(buffer(12.0));
        assert_eq!(engine.state().duration(), 12.0);
    }

    #[test]
    fn shorter_replacement_audio_lowers_the_ceiling() {
        let (mut engine, output) = playing_engine("a", 42.0);
        engine.set_audio_buffer(buffer(3.0));
        assert_eq!(engine.state().duration(), 5.0);

        engine.play();
        run_for(&mut engine, &output, 20.0);

        assert!(!engine.state().is_playing);
        assert_eq!(engine.state().current_time, 5.0);
        assert_eq!(output.active.get(), 0);
    }

    #[test]
    fn retimed_phrases_keep_their_span_after_a_new_buffer() {
        let (mut engine, _) = playing_engine("a\nb", 42.0);
        engine.update_timing(1, 20.0, 25.0);

        engine.set_audio_buffer(buffer(3.0));
        assert_eq!(engine.state().duration(), 25.0);
    }

    #[test]
    fn failed_load_leaves_state_unchanged() {
        let (mut engine, _) = playing_engine("a\nb", 10.0);
        engine.seek(3.0);
        let before = engine.snapshot();

        assert!(engine.load_audio("/nonexistent/lyric-sync/track.wav").is_err());

        let after = engine.state();
        assert_eq!(after.current_time, before.current_time);
        assert_eq!(after.synchronized_lyrics, before.synchronized_lyrics);
        assert!(Arc::ptr_eq(
            after.audio_buffer.as_ref().unwrap(),
            before.audio_buffer.as_ref().unwrap()
        ));
    }

    #[test]
    fn load_audio_replaces_previous_buffer() {
        let dir = std::env::temp_dir().join(format!("lyric-sync-engine-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("short.wav");
        let samples = vec![0i16; 8000 * 12];
        std::fs::write(&path, crate::audio::tests::wav_bytes(&samples, 8000, 1)).unwrap();

        let (mut engine, _) = playing_engine("a", 2.0);
        engine.load_audio(&path).unwrap();

        let buffer = engine.state().audio_buffer.clone().unwrap();
        assert_eq!(buffer.sample_rate, 8000);
        assert!((engine.state().duration() - 12.0).abs() < 1e-9);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn deadline_tracks_tick_and_phrase_boundaries() {
        let (mut engine, _) = playing_engine("a\nb", 10.0);
        assert_eq!(engine.next_deadline(), None);

        engine.play();
        let deadline = engine.next_deadline().unwrap();
        assert!(deadline <= Duration::from_millis(51));

        engine.pause();
        engine.seek(4.99);
        engine.play();
        let deadline = engine.next_deadline().unwrap();
        assert!(deadline < Duration::from_millis(20));
    }

    #[test]
    fn waking_at_a_boundary_moves_the_highlight() {
        let output = ManualOutput::default();
        let mut engine =
            SyncEngine::with_lyrics(output.clone(), "a\nb").with_tick(Duration::from_secs(1));
        engine.set_audio_buffer(buffer(10.0));
        engine.seek(4.9);
        engine.play();

        let wait = engine.next_deadline().unwrap();
        assert!(wait < Duration::from_millis(150));
        output.advance(wait.as_secs_f64() + 0.001);

        assert!(engine.poll());
        assert_eq!(engine.state().current_phrase, Some(1));
        let next = engine.next_deadline().unwrap();
        assert!(next > Duration::from_millis(900));
    }

    #[test]
    fn progress_and_span_fractions() {
        let (mut engine, _) = engine("a\nb\nc\nd");
        engine.seek(5.0);

        let state = engine.snapshot();
        assert_eq!(state.progress(), 0.25);
        let lyrics = state.synchronized_lyrics.unwrap();
        assert_eq!(lyrics.span_fraction(1), Some((0.25, 0.5)));
        assert_eq!(lyrics.span_fraction(9), None);
    }
}
