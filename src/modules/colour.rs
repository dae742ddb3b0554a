//! Colour constants and helpers shared by display and screen calls.
//! Colours are packed `0xRRGGBB`.

pub const BLACK: u32 = 0;
pub const GREY: u32 = 0x808080;
pub const WHITE: u32 = 0xFFFFFF;
pub const RED: u32 = 0xFF0000;
pub const ORANGE: u32 = 0xFF8C00;
pub const YELLOW: u32 = 0xFFFF00;
pub const GREEN: u32 = 0x00FF00;
pub const CYAN: u32 = 0x00FFFF;
pub const BLUE: u32 = 0x0000FF;
pub const MAGENTA: u32 = 0xFF00FF;
pub const PINK: u32 = 0xFF007F;
pub const PURPLE: u32 = 0x800080;

pub fn rgb(r: u8, g: u8, b: u8) -> u32 {
    (r as u32) << 16 | (g as u32) << 8 | b as u32
}

/// Packs an HSV colour. Hue wraps, saturation and value are clamped to [0, 1].
pub fn hsv(hue: f64, saturation: f64, value: f64) -> u32 {
    let hue = hue.rem_euclid(1.0);
    let s = saturation.clamp(0.0, 1.0);
    let v = value.clamp(0.0, 1.0);

    let (r, g, b) = if s == 0.0 {
        (v, v, v)
    } else {
        let sector = (hue * 6.0).floor();
        let f = hue * 6.0 - sector;
        let p = v * (1.0 - s);
        let q = v * (1.0 - s * f);
        let t = v * (1.0 - s * (1.0 - f));
        match sector as u32 % 6 {
            0 => (v, t, p),
            1 => (q, v, p),
            2 => (p, v, t),
            3 => (p, q, v),
            4 => (t, p, v),
            _ => (v, p, q),
        }
    };

    rgb((r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8)
}
