use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use super::args::CallArgs;
use super::resolve_media_path;
use crate::error::{BridgeError, Result};
use crate::kernel::PhaseController;
use crate::modules::Screen;

pub const NATIVE_WIDTH: i64 = 320;
pub const NATIVE_HEIGHT: i64 = 240;

/// Usable area at the current scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub width: i64,
    pub height: i64,
}

impl Bounds {
    pub fn for_scaling(scaling: f64) -> Self {
        Self {
            width: (NATIVE_WIDTH as f64 / scaling) as i64,
            height: (NATIVE_HEIGHT as f64 / scaling) as i64,
        }
    }

    pub fn check_origin(&self, x: i64, y: i64) -> Result<()> {
        if x < 0 || x > self.width {
            return Err(BridgeError::invalid(format!("x must be between 0 and {}", self.width)));
        }
        if y < 0 || y > self.height {
            return Err(BridgeError::invalid(format!("y must be between 0 and {}", self.height)));
        }
        Ok(())
    }

    /// Overflowing sums are out of range.
    pub fn check_extent(&self, x: i64, y: i64, width: i64, height: i64) -> Result<()> {
        let within = |origin: i64, length: i64, limit: i64| {
            length >= 0 && origin.checked_add(length).is_some_and(|end| end <= limit)
        };
        if !within(x, width, self.width) {
            return Err(BridgeError::invalid(format!(
                "x + width must be between 0 and {}",
                self.width
            )));
        }
        if !within(y, height, self.height) {
            return Err(BridgeError::invalid(format!(
                "y + height must be between 0 and {}",
                self.height
            )));
        }
        Ok(())
    }
}

pub struct ScreenService {
    screen: Screen,
    phase: PhaseController,
    media_root: PathBuf,
}

impl ScreenService {
    pub fn new(screen: Screen, phase: PhaseController, media_root: PathBuf) -> Self {
        Self {
            screen,
            phase,
            media_root,
        }
    }

    pub async fn dispatch(&self, method: &str, mut args: CallArgs) -> Result<Option<Value>> {
        match method {
            "set_pixel" => {
                let x: i64 = args.required(0, "x")?;
                let y: i64 = args.required(1, "y")?;
                let colour: u32 = args.required(2, "colour")?;
                args.finish()?;
                self.screen.draw_rectangle(x, y, 1, 1, colour).await?;
            }
            "set_pixels" => {
                let x = args.or(0, "x", 0i64)?;
                let y = args.or(1, "y", 0i64)?;
                let width = args.or(2, "width", NATIVE_WIDTH)?;
                let height = args.or(3, "height", NATIVE_HEIGHT)?;
                let pixels: Vec<Value> = args.or(4, "pixels", Vec::new())?;
                args.finish()?;
                self.set_pixels(x, y, width, height, &pixels).await?;
            }
            "draw_image" => {
                let path: String = args.required(0, "relative_or_absolute_path")?;
                let x = args.or(1, "x", 0i64)?;
                let y = args.or(2, "y", 0i64)?;
                let width = args.or(3, "width", NATIVE_WIDTH)?;
                let height = args.or(4, "height", NATIVE_HEIGHT)?;
                args.finish()?;
                self.draw_image(Path::new(&path), x, y, width, height).await?;
            }
            _ => return Ok(None),
        }
        Ok(Some(Value::Null))
    }

    /// Writes a `width` x `height` block row by row, each row as two half rows.
    pub async fn set_pixels(&self, x: i64, y: i64, width: i64, height: i64, pixels: &[Value]) -> Result<()> {
        let guard = self.phase.guard();
        let bounds = Bounds::for_scaling(self.screen.resolution_scaling().await?);
        bounds.check_origin(x, y)?;
        bounds.check_extent(x, y, width, height)?;
        if width.checked_mul(height) != Some(pixels.len() as i64) {
            return Err(BridgeError::invalid("array must have length width * height"));
        }

        let width = width as usize;
        for (j, row) in pixels.chunks(width.max(1)).enumerate() {
            if guard.interrupted() {
                debug!(row = j, "set_pixels interrupted");
                break;
            }
            let (left, right) = row.split_at(row.len() / 2);
            let y = y + j as i64;
            self.screen.set_half_row(x, y, left).await?;
            self.screen
                .set_half_row(x + left.len() as i64, y, right)
                .await?;
        }
        Ok(())
    }

    /// Loads, resizes and draws an image. A width of 320 or height of 240
    /// means "the whole screen" at the current scaling.
    pub async fn draw_image(&self, path: &Path, x: i64, y: i64, width: i64, height: i64) -> Result<()> {
        let bounds = Bounds::for_scaling(self.screen.resolution_scaling().await?);
        let width = if width == NATIVE_WIDTH {
            bounds.width
        } else {
            bounds.check_origin(x, 0)?;
            width
        };
        let height = if height == NATIVE_HEIGHT {
            bounds.height
        } else {
            bounds.check_origin(0, y)?;
            height
        };
        bounds.check_extent(x, y, width, height)?;

        let path = resolve_media_path(&self.media_root, path);
        let (w, h) = (width as u32, height as u32);
        let pixels = tokio::task::spawn_blocking(move || load_pixels(&path, w, h))
            .await
            .map_err(|e| BridgeError::Unavailable(format!("image decoder ({})", e)))??;

        self.set_pixels(x, y, width, height, &pixels).await
    }
}

fn load_pixels(path: &Path, width: u32, height: u32) -> Result<Vec<Value>> {
    let img = image::open(path)
        .map_err(|e| BridgeError::invalid(format!("cannot open image {}: {}", path.display(), e)))?;
    let rgb = img
        .resize_exact(width, height, image::imageops::FilterType::Triangle)
        .to_rgb8();
    Ok(rgb
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            Value::from(u32::from(r) << 16 | u32::from(g) << 8 | u32::from(b))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_follow_scaling() {
        let bounds = Bounds::for_scaling(2.0);
        assert_eq!(bounds, Bounds { width: 160, height: 120 });
        assert!(bounds.check_origin(160, 120).is_ok());
        assert!(bounds.check_origin(161, 0).is_err());
        assert!(bounds.check_extent(100, 0, 61, 1).is_err());
        assert!(bounds.check_extent(100, 0, 60, 120).is_ok());
        assert!(bounds.check_extent(i64::MAX, 0, 1, 1).is_err());
        assert!(bounds.check_extent(0, i64::MAX - 1, 0, i64::MAX).is_err());
    }

    #[test]
    fn image_pixels_are_packed_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        image::RgbImage::from_pixel(4, 4, image::Rgb([255, 0, 0]))
            .save(&path)
            .unwrap();

        let pixels = load_pixels(&path, 2, 3).unwrap();
        assert_eq!(pixels.len(), 6);
        assert!(pixels.iter().all(|p| *p == Value::from(0xFF0000u32)));
    }
}
