//! Typed view of the daemon's modules.
//!
//! Each module kind declares a fixed set of field and method names. Handles
//! check names against these lists before any frame is written.

pub mod client;
pub mod colour;
pub mod handles;
pub mod leds;

pub use client::ModuleClient;
pub use handles::{
    Buttons, Cube, Display, EnvSensor, Imu, LightSensor, Microphone, ModuleHandle, Pi, Screen,
    Speaker,
};

use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;

/// Methods every module answers.
pub const COMMON_METHODS: &[&str] = &["get_fields", "set_fields"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Buttons,
    EnvSensor,
    LightSensor,
    Display,
    Screen,
    Speaker,
    Microphone,
    Imu,
    Pi,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 9] = [
        ModuleKind::Buttons,
        ModuleKind::EnvSensor,
        ModuleKind::LightSensor,
        ModuleKind::Display,
        ModuleKind::Screen,
        ModuleKind::Speaker,
        ModuleKind::Microphone,
        ModuleKind::Imu,
        ModuleKind::Pi,
    ];

    /// Name used on the wire.
    pub fn name(self) -> &'static str {
        match self {
            ModuleKind::Buttons => "buttons",
            ModuleKind::EnvSensor => "env_sensor",
            ModuleKind::LightSensor => "light_sensor",
            ModuleKind::Display => "display",
            ModuleKind::Screen => "screen",
            ModuleKind::Speaker => "speaker",
            ModuleKind::Microphone => "microphone",
            ModuleKind::Imu => "imu",
            ModuleKind::Pi => "pi",
        }
    }

    pub fn fields(self) -> &'static [&'static str] {
        match self {
            ModuleKind::Buttons => &[
                "bottom_pressed",
                "bottom_pressed_count",
                "middle_pressed",
                "middle_pressed_count",
                "top_pressed",
                "top_pressed_count",
            ],
            ModuleKind::EnvSensor => &["humidity", "pressure", "temperature"],
            ModuleKind::LightSensor => &[
                "ambient_light",
                "blue",
                "green",
                "last_gesture",
                "num_gestures",
                "num_times_within_proximity",
                "red",
                "within_proximity",
            ],
            ModuleKind::Display => &[
                "brightness",
                "estimated_current",
                "gamma_correction_blue",
                "gamma_correction_enabled",
                "gamma_correction_green",
                "gamma_correction_red",
                "max_current",
                "panel_height",
                "panel_width",
                "refresh_period",
                "show",
            ],
            ModuleKind::Screen => &["invert_colours", "resolution_scaling", "rotation"],
            ModuleKind::Speaker => &["volume"],
            ModuleKind::Microphone => &[],
            ModuleKind::Imu => &[
                "roll",
                "pitch",
                "yaw",
                "gravity_x",
                "gravity_y",
                "gravity_z",
                "acceleration_x",
                "acceleration_y",
                "acceleration_z",
            ],
            ModuleKind::Pi => &[],
        }
    }

    /// Module-specific methods, excluding [`COMMON_METHODS`].
    pub fn methods(self) -> &'static [&'static str] {
        match self {
            ModuleKind::Buttons => &["get_next_action"],
            ModuleKind::EnvSensor => &[],
            ModuleKind::LightSensor => &["get_next_gesture"],
            ModuleKind::Display => &[
                "set",
                "scroll_text",
                "set_leds",
                "set_led",
                "set_all",
                "set_3d",
                "set_panel",
            ],
            ModuleKind::Screen => &[
                "set_pixel",
                "set_pixels",
                "draw_rectangle",
                "set_half_row",
                "write_text",
                "draw_image",
            ],
            ModuleKind::Speaker => &["play", "stop", "say", "tone"],
            ModuleKind::Microphone => &[
                "start_recording",
                "stop_recording",
                "start_voice_recognition",
                "wait_for_sentence",
                "stop_voice_recognition",
                "start_recording_for_frequency_analysis",
                "get_frequency_buckets",
            ],
            ModuleKind::Imu => &[],
            ModuleKind::Pi => &[
                "ip_address",
                "cpu_temp",
                "cpu_percent",
                "ram_percent_used",
                "disk_percent",
            ],
        }
    }

    pub fn has_field(self, field: &str) -> bool {
        self.fields().contains(&field)
    }

    pub fn has_method(self, method: &str) -> bool {
        COMMON_METHODS.contains(&method) || self.methods().contains(&method)
    }

    pub fn check_method(self, method: &str) -> Result<(), BridgeError> {
        if self.has_method(method) {
            Ok(())
        } else {
            Err(self.unknown(method))
        }
    }

    pub fn check_field(self, field: &str) -> Result<(), BridgeError> {
        if self.has_field(field) {
            Ok(())
        } else {
            Err(self.unknown(field))
        }
    }

    fn unknown(self, name: &str) -> BridgeError {
        BridgeError::UnknownMethod {
            module: self.name().to_string(),
            method: name.to_string(),
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModuleKind {
    type Err = BridgeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        ModuleKind::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| BridgeError::invalid(format!("no such module: {}", name)))
    }
}
