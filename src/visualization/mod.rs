use anyhow::Result;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
    MouseEvent, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use log::{info, warn};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Axis, Block, Borders, Chart, Dataset, Gauge, GraphType, Paragraph};
use ratatui::Terminal;
use std::io::stdout;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{AudioBuffer, AudioOutput, LevelMeter, PendingDecode};
use crate::sync::timeline::{column_to_time, time_to_column, DragGesture};
use crate::sync::{SyncEngine, SyncState};

/// Redraw period while nothing is playing.
const IDLE_REDRAW: Duration = Duration::from_millis(250);
const WAVEFORM_POINTS: usize = 512;

#[derive(Debug, Clone, Copy)]
pub struct VisualizerOptions {
    pub seek_step: f64,
    pub level_window: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub struct Visualizer<O: AudioOutput> {
    engine: SyncEngine<O>,
    pending: Option<PendingDecode>,
    audio_path: Option<PathBuf>,
    options: VisualizerOptions,
    meter: LevelMeter,
    waveform: Vec<(f64, f64)>,
    timeline_area: Rect,
    drag: Option<DragGesture>,
    status: String,
}

impl<O: AudioOutput> Visualizer<O> {
    pub fn new(engine: SyncEngine<O>, options: VisualizerOptions) -> Self {
        let waveform = engine
            .state()
            .audio_buffer
            .as_deref()
            .map(|buffer| waveform_points(buffer, WAVEFORM_POINTS))
            .unwrap_or_default();

        Self {
            engine,
            pending: None,
            audio_path: None,
            options,
            meter: LevelMeter::new(options.level_window),
            waveform,
            timeline_area: Rect::default(),
            drag: None,
            status: String::new(),
        }
    }

    pub fn with_pending_decode(mut self, pending: PendingDecode) -> Self {
        self.status = format!("Decoding {}...", pending.path().display());
        self.audio_path = Some(pending.path().to_path_buf());
        self.pending = Some(pending);
        self
    }

    pub fn run(mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut out = stdout();
        execute!(out, EnterAlternateScreen, EnableMouseCapture)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(out))?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
        terminal.show_cursor()?;
        self.engine.pause();
        result
    }

    fn event_loop<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        loop {
            self.poll_decode();
            self.engine.poll();

            terminal.draw(|frame| self.draw(frame))?;

            let timeout = self.engine.next_deadline().unwrap_or(IDLE_REDRAW);
            if event::poll(timeout)? {
                let flow = match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => self.handle_key(key.code),
                    Event::Mouse(mouse) => {
                        self.handle_mouse(mouse);
                        Flow::Continue
                    }
                    _ => Flow::Continue,
                };
                if flow == Flow::Quit {
                    return Ok(());
                }
            }
        }
    }

    fn poll_decode(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        let Some(outcome) = pending.try_take() else {
            return;
        };
        let path = pending.path().display().to_string();
        self.pending = None;

        match outcome {
            Ok(buffer) => {
                self.waveform = waveform_points(&buffer, WAVEFORM_POINTS);
                self.engine.set_audio_buffer(buffer);
                self.status = format!("Loaded {}", path);
            }
            Err(e) => {
                warn!("Could not decode {}: {}", path, e);
                self.status = format!("Could not decode {}: {}", path, e);
            }
        }
    }

    fn handle_key(&mut self, code: KeyCode) -> Flow {
        let state = self.engine.state();
        let step = self.options.seek_step;

        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Flow::Quit,
            KeyCode::Char(' ') => {
                if state.is_playing {
                    self.engine.pause();
                } else if state.audio_buffer.is_none() {
                    self.status = "Audio is not loaded yet".to_string();
                } else {
                    self.engine.play();
                }
            }
            KeyCode::Left => {
                let target = (state.current_time - step).max(0.0);
                self.engine.seek(target);
            }
            KeyCode::Right => {
                let target = (state.current_time + step).min(state.duration());
                self.engine.seek(target);
            }
            KeyCode::Up => self.step_phrase(false),
            KeyCode::Down => self.step_phrase(true),
            KeyCode::Char('l') | KeyCode::Char('L') => self.reload_audio(),
            KeyCode::Char('r') | KeyCode::Char('R') => {
                self.engine.reset();
                self.waveform.clear();
                self.drag = None;
                self.status = "Reset: lyrics and audio discarded".to_string();
            }
            _ => {}
        }
        Flow::Continue
    }

    /// Decodes the track again in the foreground, keeping the old buffer on failure.
    fn reload_audio(&mut self) {
        if self.pending.is_some() {
            return;
        }
        let Some(path) = self.audio_path.clone() else {
            return;
        };

        match self.engine.load_audio(&path) {
            Ok(()) => {
                self.waveform = self
                    .engine
                    .state()
                    .audio_buffer
                    .as_deref()
                    .map(|buffer| waveform_points(buffer, WAVEFORM_POINTS))
                    .unwrap_or_default();
                self.status = format!("Reloaded {}", path.display());
            }
            Err(e) => self.status = format!("Could not decode {}: {}", path.display(), e),
        }
    }

    fn step_phrase(&mut self, forward: bool) {
        let state = self.engine.state();
        let count = state.phrases().len();
        if count == 0 {
            return;
        }

        let next = match (state.current_phrase, forward) {
            (None, true) => 0,
            (None, false) => count - 1,
            (Some(i), true) => (i + 1).min(count - 1),
            (Some(i), false) => i.saturating_sub(1),
        };
        let start = state.phrases()[next].start_time;

        self.engine.select_phrase(next);
        self.engine.seek(start);
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        let area = self.timeline_area;
        let inside = mouse.column >= area.x
            && mouse.column < area.x + area.width
            && mouse.row >= area.y
            && mouse.row < area.y + area.height;

        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) if inside => {
                let duration = self.engine.state().duration();
                let time = column_to_time(mouse.column - area.x, area.width, duration);

                let hit = self
                    .engine
                    .state()
                    .synchronized_lyrics
                    .as_ref()
                    .and_then(|l| l.phrase_at(time));

                match hit {
                    Some(index) => {
                        self.engine.select_phrase(index);
                        self.drag = DragGesture::begin(
                            index,
                            mouse.column as f64,
                            area.width as f64 / duration,
                        );
                    }
                    None => self.engine.seek(time),
                }
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                let Some(drag) = self.drag.as_mut() else {
                    return;
                };
                let Some(phrase) = self.engine.state().phrases().get(drag.index).cloned() else {
                    self.drag = None;
                    return;
                };
                if let Some((start, end)) = drag.update(mouse.column as f64, &phrase) {
                    let index = drag.index;
                    self.engine.update_timing(index, start, end);
                    self.status = format!(
                        "Phrase {} now {} - {}",
                        index + 1,
                        format_time(start),
                        format_time(end)
                    );
                }
            }
            MouseEventKind::Up(MouseButton::Left) => {
                if let Some(drag) = self.drag.take() {
                    info!("Finished retiming phrase {}", drag.index);
                }
            }
            _ => {}
        }
    }

    fn draw(&mut self, frame: &mut ratatui::Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(6),
                Constraint::Length(3),
                Constraint::Percentage(30),
                Constraint::Length(3),
                Constraint::Length(4),
                Constraint::Length(1),
            ])
            .margin(1)
            .split(frame.size());

        let state = self.engine.snapshot();

        self.draw_lyrics(frame, chunks[0], &state);
        self.draw_progress(frame, chunks[1], &state);
        self.draw_waveform(frame, chunks[2], &state);
        self.draw_level(frame, chunks[3], &state);
        self.timeline_area = self.draw_timeline(frame, chunks[4], &state);
        self.draw_status(frame, chunks[5]);
    }

    fn draw_lyrics(&self, frame: &mut ratatui::Frame, area: Rect, state: &SyncState) {
        let lines: Vec<Line> = state
            .phrases()
            .iter()
            .enumerate()
            .map(|(i, phrase)| {
                let style = if state.current_phrase == Some(i) {
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                Line::from(vec![
                    Span::styled(
                        format!(
                            "[{} - {}] ",
                            format_time(phrase.start_time),
                            format_time(phrase.end_time)
                        ),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::styled(phrase.text.clone(), style),
                ])
            })
            .collect();

        let visible = area.height.saturating_sub(2) as usize;
        let scroll = state
            .current_phrase
            .map(|i| i.saturating_sub(visible / 2))
            .unwrap_or(0);

        let title = if state.is_synchronized {
            "Lyrics (timed)"
        } else {
            "Lyrics"
        };
        let paragraph = Paragraph::new(lines)
            .block(Block::default().title(title).borders(Borders::ALL))
            .scroll((scroll as u16, 0));
        frame.render_widget(paragraph, area);
    }

    fn draw_progress(&self, frame: &mut ratatui::Frame, area: Rect, state: &SyncState) {
        let icon = if state.is_playing { "▶" } else { "⏸" };
        let gauge = Gauge::default()
            .block(Block::default().title("Playback").borders(Borders::ALL))
            .gauge_style(Style::default().fg(Color::Cyan))
            .ratio(state.progress())
            .label(format!(
                "{} {} / {}",
                icon,
                format_time(state.current_time),
                format_time(state.duration())
            ));
        frame.render_widget(gauge, area);
    }

    fn draw_waveform(&self, frame: &mut ratatui::Frame, area: Rect, state: &SyncState) {
        let duration = state.duration().max(f64::EPSILON);
        let playhead = [(state.current_time, -1.0), (state.current_time, 1.0)];

        let time_labels: Vec<Span> = (0..=5)
            .map(|i| Span::raw(format!("{:.1}s", duration * i as f64 / 5.0)))
            .collect();

        let datasets = vec![
            Dataset::default()
                .name("Waveform")
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(Color::Cyan))
                .data(&self.waveform),
            Dataset::default()
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(Color::Yellow))
                .data(&playhead),
        ];

        let chart = Chart::new(datasets)
            .block(Block::default().title("Waveform").borders(Borders::ALL))
            .x_axis(
                Axis::default()
                    .title("Time (s)")
                    .bounds([0.0, duration])
                    .labels(time_labels),
            )
            .y_axis(
                Axis::default()
                    .bounds([-1.0, 1.0])
                    .labels(vec!["-1.0", "0.0", "1.0"].into_iter().map(Span::raw).collect()),
            );

        frame.render_widget(chart, area);
    }

    fn draw_level(&self, frame: &mut ratatui::Frame, area: Rect, state: &SyncState) {
        let level = state
            .audio_buffer
            .as_deref()
            .filter(|_| state.is_playing)
            .map(|buffer| self.meter.level(buffer, state.current_time))
            .unwrap_or(0.0);

        let color = match level {
            l if l > 0.75 => Color::Red,
            l if l > 0.5 => Color::Yellow,
            _ => Color::Green,
        };
        let gauge = Gauge::default()
            .block(Block::default().title("Level").borders(Borders::ALL))
            .gauge_style(Style::default().fg(color))
            .ratio(level as f64)
            .label(String::new());
        frame.render_widget(gauge, area);
    }

    /// Draws the phrase timeline and returns the inner area used for hit testing.
    fn draw_timeline(&self, frame: &mut ratatui::Frame, area: Rect, state: &SyncState) -> Rect {
        let block = Block::default()
            .title("Timeline (drag a phrase to retime)")
            .borders(Borders::ALL);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let duration = state.duration();
        let lyrics = state.synchronized_lyrics.as_ref();
        let cursor = time_to_column(state.current_time, inner.width, duration);

        let width = inner.width as usize;
        let mut marks = vec![" "; width];
        if let Some(lyrics) = lyrics.filter(|_| width > 0) {
            for index in 0..lyrics.phrases.len() {
                if let Some((start, _)) = lyrics.span_fraction(index) {
                    let column = ((start * width as f64).floor().max(0.0) as usize).min(width - 1);
                    marks[column] = "╵";
                }
            }
        }
        if width > 0 {
            marks[cursor as usize] = "▲";
        }

        let mut blocks = Vec::with_capacity(width);
        for column in 0..inner.width {
            let time = column_to_time(column, inner.width, duration);
            let phrase = lyrics.and_then(|l| l.phrase_at(time));

            let style = match phrase {
                Some(i) if state.current_phrase == Some(i) => Style::default().fg(Color::Yellow),
                Some(i) if i % 2 == 0 => Style::default().fg(Color::Blue),
                Some(_) => Style::default().fg(Color::Green),
                None => Style::default().fg(Color::DarkGray),
            };
            let symbol = if phrase.is_some() { "█" } else { "·" };
            blocks.push(Span::styled(symbol, style));
        }
        let marker: Vec<Span> = marks
            .into_iter()
            .map(|m| Span::styled(m, Style::default().fg(Color::Yellow)))
            .collect();

        let paragraph = Paragraph::new(vec![Line::from(blocks), Line::from(marker)]);
        frame.render_widget(paragraph, inner);
        inner
    }

    fn draw_status(&self, frame: &mut ratatui::Frame, area: Rect) {
        let help = "space play/pause  ←/→ seek  ↑/↓ phrase  L reload  R reset  q quit";
        let text = if self.status.is_empty() {
            help.to_string()
        } else {
            format!("{}  |  {}", self.status, help)
        };
        frame.render_widget(
            Paragraph::new(text).style(Style::default().fg(Color::DarkGray)),
            area,
        );
    }
}

/// `m:ss`, truncating fractional seconds.
pub fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// RMS envelope of the buffer, reduced to about `points` samples.
fn waveform_points(buffer: &AudioBuffer, points: usize) -> Vec<(f64, f64)> {
    if buffer.samples.is_empty() || buffer.sample_rate == 0 {
        return Vec::new();
    }

    let max_amplitude = buffer
        .samples
        .iter()
        .map(|&x| x.abs())
        .fold(0.0f32, f32::max);
    let scale = if max_amplitude > 0.0 { 0.95 / max_amplitude } else { 1.0 };

    let per_point = (buffer.samples.len() / points.max(1)).max(1);
    buffer
        .samples
        .chunks(per_point)
        .enumerate()
        .map(|(i, chunk)| {
            let rms = (chunk.iter().map(|&x| x * x).sum::<f32>() / chunk.len() as f32).sqrt();
            (
                i as f64 * per_point as f64 / buffer.sample_rate as f64,
                (rms * scale) as f64,
            )
        })
        .collect()
}
