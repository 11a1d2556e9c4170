// Timeline geometry and drag-to-retime
// Screen units are whatever the view measures in; the scale is always supplied by the caller

use super::LyricPhrase;

/// Time at `column` of a timeline `width` units wide that spans `duration` seconds.
pub fn column_to_time(column: u16, width: u16, duration: f64) -> f64 {
    if width == 0 || duration <= 0.0 {
        return 0.0;
    }
    (column as f64 / width as f64 * duration).clamp(0.0, duration)
}

/// Column a given time falls into, clamped to the last column.
pub fn time_to_column(time: f64, width: u16, duration: f64) -> u16 {
    if width == 0 || duration <= 0.0 {
        return 0;
    }
    let column = (time / duration * width as f64).floor();
    column.clamp(0.0, (width - 1) as f64) as u16
}

/// An in-progress drag of one phrase along the timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragGesture {
    pub index: usize,
    last_x: f64,
    pixels_per_second: f64,
}

impl DragGesture {
    /// Returns `None` for a non-positive scale, since no delta could be mapped.
    pub fn begin(index: usize, x: f64, pixels_per_second: f64) -> Option<Self> {
        if !(pixels_per_second > 0.0) || !pixels_per_second.is_finite() {
            return None;
        }
        Some(Self {
            index,
            last_x: x,
            pixels_per_second,
        })
    }

    /// New `(start, end)` for the dragged phrase after the pointer moved to `x`.
    ///
    /// Both ends shift by the same amount so the phrase keeps its length, and
    /// the window never starts before zero. `None` when the pointer did not move.
    pub fn update(&mut self, x: f64, phrase: &LyricPhrase) -> Option<(f64, f64)> {
        let delta = (x - self.last_x) / self.pixels_per_second;
        self.last_x = x;
        if delta == 0.0 {
            return None;
        }

        let length = phrase.duration();
        let start = (phrase.start_time + delta).max(0.0);
        Some((start, start + length))
    }
}
