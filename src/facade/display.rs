use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::debug;

use super::args::CallArgs;
use crate::error::{BridgeError, Result};
use crate::kernel::{PhaseController, PhaseGuard, POLL_INTERVAL};
use crate::modules::{leds, Display};

/// Renders text into pixel rows for the LED panels.
pub trait TextRasteriser: Send + Sync {
    /// Returns `text` as 8 rows of equal width, top row first. Unlit pixels
    /// are 0, lit pixels carry `colour`.
    fn rasterise(&self, text: &str, colour: u32) -> anyhow::Result<Vec<Vec<u32>>>;
}

/// Blank columns on either side of scrolled text.
const SCROLL_MARGIN: usize = 16;
/// Columns visible at once, including the seam column skipped by `with_gap`.
const SCROLL_VIEW: usize = 17;

pub struct DisplayService {
    display: Display,
    phase: PhaseController,
    rasteriser: Option<Arc<dyn TextRasteriser>>,
}

impl DisplayService {
    pub fn new(display: Display, phase: PhaseController, rasteriser: Option<Arc<dyn TextRasteriser>>) -> Self {
        Self {
            display,
            phase,
            rasteriser,
        }
    }

    pub async fn dispatch(&self, method: &str, mut args: CallArgs) -> Result<Option<Value>> {
        let result = match method {
            "set_leds" => {
                let colours: Map<String, Value> = args.required(0, "coordinate_string_to_colour")?;
                let show = args.or(1, "show", true)?;
                args.finish()?;
                self.set_leds(&colours, show).await?
            }
            "set_led" => {
                let x: i64 = args.required(0, "x")?;
                let y: i64 = args.required(1, "y")?;
                let colour: Value = args.required(2, "colour")?;
                let show = args.or(3, "show", true)?;
                args.finish()?;
                self.set_coordinates(vec![((x, y), colour)], show).await?
            }
            "set_all" => {
                let colour: Value = args.required(0, "colour")?;
                let show = args.or(1, "show", true)?;
                args.finish()?;
                let all = leds::all_coordinates().map(|xy| (xy, colour.clone())).collect();
                self.set_coordinates(all, show).await?
            }
            "set_3d" => {
                let colours: Map<String, Value> = args.required(0, "coordinate_string_to_colour")?;
                let show = args.or(1, "show", true)?;
                args.finish()?;
                self.set_3d(&colours, show).await?
            }
            "set_panel" => {
                let panel: String = args.required(0, "panel")?;
                let rows: Vec<Vec<Value>> = args.required(1, "colour_array")?;
                let show = args.or(2, "show", true)?;
                args.finish()?;
                let placed = leds::panel_coordinates(&panel, &rows)?;
                self.set_coordinates(placed, show).await?
            }
            "scroll_text" => {
                let text: String = args.required(0, "text")?;
                let colour = args.or(1, "colour", 0xFFFFFFu32)?;
                let background = args.or(2, "background_colour", 0u32)?;
                let speed = args.or(3, "speed", 1.0f64)?;
                let with_gap = args.or(4, "with_gap", true)?;
                args.finish()?;
                self.scroll_text(&text, colour, background, speed, with_gap)
                    .await?;
                Value::Null
            }
            _ => return Ok(None),
        };
        Ok(Some(result))
    }

    pub async fn set_leds(&self, colours: &Map<String, Value>, show: bool) -> Result<Value> {
        let mut indexed = Vec::with_capacity(colours.len());
        for (coordinate, colour) in colours {
            let xy = leds::parse_coordinate(coordinate, 2)?;
            if let Some(index) = leds::led_index(xy[0], xy[1]) {
                indexed.push((index, colour.clone()));
            }
        }
        self.display.set(leds::index_map(indexed), show).await
    }

    pub async fn set_3d(&self, colours: &Map<String, Value>, show: bool) -> Result<Value> {
        let mut indexed = Vec::with_capacity(colours.len());
        for (coordinate, colour) in colours {
            let xyz = leds::parse_coordinate(coordinate, 3)?;
            if let Some(index) = leds::led_index_3d(xyz[0], xyz[1], xyz[2]) {
                indexed.push((index, colour.clone()));
            }
        }
        self.display.set(leds::index_map(indexed), show).await
    }

    async fn set_coordinates(&self, colours: Vec<((i64, i64), Value)>, show: bool) -> Result<Value> {
        let indexed = colours
            .into_iter()
            .filter_map(|((x, y), colour)| leds::led_index(x, y).map(|index| (index, colour)));
        self.display.set(leds::index_map(indexed), show).await
    }

    /// Scrolls `text` right to left, one column per frame, until it has
    /// passed or the phase moves on.
    pub async fn scroll_text(
        &self,
        text: &str,
        colour: u32,
        background: u32,
        speed: f64,
        with_gap: bool,
    ) -> Result<()> {
        let guard = self.phase.guard();
        let rasteriser = self
            .rasteriser
            .as_ref()
            .ok_or_else(|| BridgeError::Unavailable("text rasteriser".to_string()))?;
        if !(speed > 0.0 && speed.is_finite()) {
            return Err(BridgeError::invalid("speed must be a positive number"));
        }
        let period = Duration::try_from_secs_f64(0.05 / speed)
            .map_err(|_| BridgeError::invalid(format!("speed {} is too slow to scroll", speed)))?;

        let rows = rasteriser
            .rasterise(text, colour)
            .map_err(|e| BridgeError::invalid(format!("cannot render {:?}: {}", text, e)))?;
        let canvas = pad_rows(&rows);
        let width = canvas.first().map(Vec::len).unwrap_or(0);

        for offset in 0..width {
            let started = Instant::now();
            let frame = scroll_frame(&canvas, offset, background, with_gap);
            if !frame_due(&guard, started, period).await {
                debug!(offset, "scroll interrupted");
                break;
            }
            self.set_coordinates(frame, true).await?;
        }
        Ok(())
    }
}

/// Waits out one frame period in poll-sized steps. False once interrupted.
async fn frame_due(guard: &PhaseGuard, started: Instant, period: Duration) -> bool {
    loop {
        if guard.interrupted() {
            return false;
        }
        let left = period.saturating_sub(started.elapsed());
        if left.is_zero() {
            return true;
        }
        tokio::time::sleep(left.min(POLL_INTERVAL)).await;
    }
}

fn pad_rows(rows: &[Vec<u32>]) -> Vec<Vec<u32>> {
    rows.iter()
        .map(|row| {
            let mut padded = vec![0; SCROLL_MARGIN];
            padded.extend_from_slice(row);
            padded.extend(std::iter::repeat(0).take(SCROLL_MARGIN));
            padded
        })
        .collect()
}

/// Colours of the left and right panels for one scroll position.
///
/// With `with_gap` the column that would straddle the panel seam is
/// dropped so letters don't bend around the edge.
pub fn scroll_frame(canvas: &[Vec<u32>], offset: usize, background: u32, with_gap: bool) -> Vec<((i64, i64), Value)> {
    let mut frame = Vec::new();
    for (y, row) in canvas.iter().enumerate() {
        let end = (offset + SCROLL_VIEW).min(row.len());
        if offset >= end {
            continue;
        }
        for (column, pixel) in row[offset..end].iter().enumerate() {
            let colour = if *pixel == 0 { background } else { *pixel };
            let mut x = column as i64;
            if with_gap && x > 8 {
                x -= 1;
            }
            if x < 16 {
                frame.push(((x, 7 - y as i64), Value::from(colour)));
            }
        }
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_drops_the_seam_column() {
        let canvas = vec![(1..=17).collect::<Vec<u32>>()];
        let frame = scroll_frame(&canvas, 0, 0, true);
        // Columns 8 and 9 both land on x = 8; the later one wins downstream
        let at_eight: Vec<_> = frame.iter().filter(|((x, _), _)| *x == 8).collect();
        assert_eq!(at_eight.len(), 2);
        assert_eq!(frame.last().unwrap().0, (15, 7));

        let no_gap = scroll_frame(&canvas, 0, 0, false);
        assert_eq!(no_gap.len(), 16);
    }

    #[test]
    fn background_fills_unlit_pixels() {
        let canvas = pad_rows(&[vec![5]]);
        let frame = scroll_frame(&canvas, 0, 7, false);
        assert!(frame.iter().all(|(_, colour)| *colour == Value::from(7)));
    }
}
