use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::leds;
use super::{ModuleClient, ModuleKind};
use crate::error::{BridgeError, Result};
use crate::protocol::Arguments;
use crate::transport::{Connection, TransportConfig};

/// Client-side view of one daemon module. Owns no daemon state.
#[derive(Clone)]
pub struct ModuleHandle {
    kind: ModuleKind,
    client: ModuleClient,
}

impl ModuleHandle {
    pub fn new(kind: ModuleKind, client: ModuleClient) -> Self {
        Self { kind, client }
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn client(&self) -> &ModuleClient {
        &self.client
    }

    /// Calls a declared method. Undeclared names fail before any I/O.
    pub async fn call(&self, method: &str, arguments: Arguments) -> Result<Value> {
        self.kind.check_method(method)?;
        self.client.invoke(self.kind.name(), method, arguments).await
    }

    pub async fn get_fields(&self) -> Result<Map<String, Value>> {
        match self.call("get_fields", Arguments::new()).await? {
            Value::Object(fields) => Ok(fields),
            Value::Null => Ok(Map::new()),
            other => Err(BridgeError::ProtocolError(format!(
                "get_fields on {} returned {}",
                self.kind, other
            ))),
        }
    }

    pub async fn set_fields(&self, fields: Value, asynchronous: bool) -> Result<Value> {
        self.call(
            "set_fields",
            Arguments::new().arg(fields).kwarg("asynchronous", asynchronous),
        )
        .await
    }

    /// Reads one field; a field the daemon does not report reads as null.
    pub async fn field(&self, name: &str) -> Result<Value> {
        self.kind.check_field(name)?;
        let mut fields = self.get_fields().await?;
        Ok(fields.remove(name).unwrap_or(Value::Null))
    }

    pub async fn set_field(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.kind.check_field(name)?;
        let mut fields = Map::new();
        fields.insert(name.to_string(), value.into());
        self.set_fields(Value::Object(fields), true).await?;
        Ok(())
    }

    /// Reads several fields from one `get_fields` reply.
    pub async fn fields_of<const N: usize>(&self, names: [&str; N]) -> Result<[Value; N]> {
        for name in names {
            self.kind.check_field(name)?;
        }
        let mut fields = self.get_fields().await?;
        Ok(names.map(|name| fields.remove(name).unwrap_or(Value::Null)))
    }
}

macro_rules! module_handle {
    ($(#[$meta:meta])* $name:ident => $kind:expr) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name(ModuleHandle);

        impl $name {
            pub fn new(client: ModuleClient) -> Self {
                Self(ModuleHandle::new($kind, client))
            }
        }

        impl Deref for $name {
            type Target = ModuleHandle;

            fn deref(&self) -> &ModuleHandle {
                &self.0
            }
        }
    };
}

module_handle!(Buttons => ModuleKind::Buttons);
module_handle!(EnvSensor => ModuleKind::EnvSensor);
module_handle!(LightSensor => ModuleKind::LightSensor);
module_handle!(
    /// The three 8x8 LED panels.
    Display => ModuleKind::Display
);
module_handle!(
    /// 320x240 LCD, divided by `resolution_scaling`.
    Screen => ModuleKind::Screen
);
module_handle!(Speaker => ModuleKind::Speaker);
module_handle!(Microphone => ModuleKind::Microphone);
module_handle!(Imu => ModuleKind::Imu);
module_handle!(Pi => ModuleKind::Pi);

fn timeout_arg(arguments: Arguments, timeout: Option<f64>) -> Arguments {
    match timeout {
        Some(seconds) => arguments.kwarg("timeout", seconds),
        None => arguments,
    }
}

fn into_optional_string(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        _ => None,
    }
}

fn as_count(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| value.as_f64().map(|v| v as u64))
}

impl Buttons {
    pub async fn get_next_action(&self, timeout: Option<f64>) -> Result<Option<String>> {
        let reply = self
            .call("get_next_action", timeout_arg(Arguments::new(), timeout))
            .await?;
        Ok(into_optional_string(reply))
    }

    /// `[top, middle, bottom]` press counters.
    pub async fn pressed_counts(&self) -> Result<[Option<u64>; 3]> {
        let counts = self
            .fields_of([
                "top_pressed_count",
                "middle_pressed_count",
                "bottom_pressed_count",
            ])
            .await?;
        Ok([as_count(&counts[0]), as_count(&counts[1]), as_count(&counts[2])])
    }
}

impl EnvSensor {
    pub async fn temperature(&self) -> Result<Option<f64>> {
        Ok(self.field("temperature").await?.as_f64())
    }

    pub async fn humidity(&self) -> Result<Option<f64>> {
        Ok(self.field("humidity").await?.as_f64())
    }

    pub async fn pressure(&self) -> Result<Option<f64>> {
        Ok(self.field("pressure").await?.as_f64())
    }
}

impl LightSensor {
    pub async fn get_next_gesture(&self, timeout: Option<f64>) -> Result<Option<String>> {
        let reply = self
            .call("get_next_gesture", timeout_arg(Arguments::new(), timeout))
            .await?;
        Ok(into_optional_string(reply))
    }

    /// `(num_gestures, last_gesture)`.
    pub async fn gesture_counter(&self) -> Result<(Option<u64>, Option<u64>)> {
        let [count, last] = self.fields_of(["num_gestures", "last_gesture"]).await?;
        Ok((as_count(&count), as_count(&last)))
    }

    pub async fn ambient_light(&self) -> Result<Option<f64>> {
        Ok(self.field("ambient_light").await?.as_f64())
    }
}

impl Display {
    /// Sets LEDs by raw index: `colours` maps index to `0xRRGGBB`.
    pub async fn set(&self, colours: Value, show: bool) -> Result<Value> {
        self.call("set", Arguments::new().arg(colours).kwarg("show", show))
            .await
    }

    /// Maps `(x, y)` coordinates to indices locally; off-panel entries are ignored.
    pub async fn set_leds(&self, colours: &[((i64, i64), u32)], show: bool) -> Result<Value> {
        let indexed = colours
            .iter()
            .filter_map(|&((x, y), colour)| leds::led_index(x, y).map(|index| (index, colour)));
        self.set(leds::index_map(indexed), show).await
    }

    pub async fn set_led(&self, x: i64, y: i64, colour: u32, show: bool) -> Result<Value> {
        self.set_leds(&[((x, y), colour)], show).await
    }

    pub async fn set_all(&self, colour: u32, show: bool) -> Result<Value> {
        let all: Vec<_> = leds::all_coordinates().map(|xy| (xy, colour)).collect();
        self.set_leds(&all, show).await
    }

    pub async fn set_3d(&self, colours: &[((i64, i64, i64), u32)], show: bool) -> Result<Value> {
        let indexed = colours.iter().filter_map(|&((x, y, z), colour)| {
            leds::led_index_3d(x, y, z).map(|index| (index, colour))
        });
        self.set(leds::index_map(indexed), show).await
    }

    pub async fn set_panel(&self, panel: &str, rows: &[Vec<u32>], show: bool) -> Result<Value> {
        let placed = leds::panel_coordinates(panel, rows)?;
        self.set_leds(&placed, show).await
    }

    pub async fn scroll_text(&self, text: &str, colour: u32, background_colour: u32) -> Result<Value> {
        self.call(
            "scroll_text",
            Arguments::new()
                .arg(text)
                .kwarg("colour", colour)
                .kwarg("background_colour", background_colour),
        )
        .await
    }

    pub async fn set_brightness(&self, brightness: u32) -> Result<()> {
        self.set_field("brightness", brightness).await
    }
}

impl Screen {
    pub async fn resolution_scaling(&self) -> Result<f64> {
        let scaling = self.field("resolution_scaling").await?;
        scaling
            .as_f64()
            .filter(|value| *value > 0.0)
            .ok_or_else(|| BridgeError::ProtocolError(format!("resolution_scaling is {}", scaling)))
    }

    pub async fn draw_rectangle(&self, x: i64, y: i64, width: i64, height: i64, colour: u32) -> Result<Value> {
        self.call(
            "draw_rectangle",
            Arguments::from_positional(vec![
                json!(x),
                json!(y),
                json!(width),
                json!(height),
                json!(colour),
            ]),
        )
        .await
    }

    pub async fn set_half_row(&self, x: i64, y: i64, pixels: &[Value]) -> Result<Value> {
        self.call(
            "set_half_row",
            Arguments::new().arg(x).arg(y).arg(Value::Array(pixels.to_vec())),
        )
        .await
    }

    pub async fn write_text(&self, text: &str, x: i64, y: i64, colour: u32) -> Result<Value> {
        self.call(
            "write_text",
            Arguments::new().arg(text).arg(x).arg(y).arg(colour),
        )
        .await
    }
}

impl Speaker {
    pub async fn say(&self, text: &str) -> Result<Value> {
        self.call("say", Arguments::new().arg(text)).await
    }

    pub async fn play(&self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref().to_string_lossy().into_owned();
        self.call("play", Arguments::new().arg(path)).await
    }

    pub async fn stop(&self) -> Result<Value> {
        self.call("stop", Arguments::new()).await
    }

    pub async fn tone(&self, frequency: f64, duration: f64) -> Result<Value> {
        self.call(
            "tone",
            Arguments::new()
                .kwarg("frequency", frequency)
                .kwarg("duration", duration),
        )
        .await
    }

    pub async fn set_volume(&self, volume: u32) -> Result<()> {
        self.set_field("volume", volume).await
    }
}

impl Microphone {
    pub async fn start_voice_recognition(&self) -> Result<Value> {
        self.call("start_voice_recognition", Arguments::new()).await
    }

    pub async fn wait_for_sentence(&self, timeout: Option<f64>) -> Result<Option<String>> {
        let reply = self
            .call("wait_for_sentence", timeout_arg(Arguments::new(), timeout))
            .await?;
        Ok(into_optional_string(reply))
    }

    pub async fn stop_voice_recognition(&self) -> Result<Value> {
        self.call("stop_voice_recognition", Arguments::new()).await
    }

    pub async fn get_frequency_buckets(&self, num_buckets: u32, min_hz: f64, max_hz: f64) -> Result<Value> {
        self.call(
            "get_frequency_buckets",
            Arguments::new()
                .kwarg("num_buckets", num_buckets)
                .kwarg("min_hz", min_hz)
                .kwarg("max_hz", max_hz),
        )
        .await
    }
}

impl Imu {
    /// `(roll, pitch, yaw)` in degrees.
    pub async fn orientation(&self) -> Result<(Option<f64>, Option<f64>, Option<f64>)> {
        let [roll, pitch, yaw] = self.fields_of(["roll", "pitch", "yaw"]).await?;
        Ok((roll.as_f64(), pitch.as_f64(), yaw.as_f64()))
    }
}

impl Pi {
    pub async fn cpu_temp(&self) -> Result<Value> {
        self.call("cpu_temp", Arguments::new()).await
    }

    pub async fn ip_address(&self) -> Result<Value> {
        self.call("ip_address", Arguments::new()).await
    }
}

/// One handle per module, all sharing a single connection.
#[derive(Clone)]
pub struct Cube {
    client: ModuleClient,
    pub buttons: Buttons,
    pub env_sensor: EnvSensor,
    pub light_sensor: LightSensor,
    pub display: Display,
    pub screen: Screen,
    pub speaker: Speaker,
    pub microphone: Microphone,
    pub imu: Imu,
    pub pi: Pi,
}

impl Cube {
    pub fn new(client: ModuleClient) -> Self {
        Self {
            buttons: Buttons::new(client.clone()),
            env_sensor: EnvSensor::new(client.clone()),
            light_sensor: LightSensor::new(client.clone()),
            display: Display::new(client.clone()),
            screen: Screen::new(client.clone()),
            speaker: Speaker::new(client.clone()),
            microphone: Microphone::new(client.clone()),
            imu: Imu::new(client.clone()),
            pi: Pi::new(client.clone()),
            client,
        }
    }

    pub async fn connect_unix(path: impl AsRef<Path>, config: &TransportConfig) -> Result<Self> {
        let connection = Connection::connect_unix(path, config).await?;
        Ok(Self::new(ModuleClient::new(Arc::new(connection))))
    }

    pub fn client(&self) -> &ModuleClient {
        &self.client
    }

    pub fn handle(&self, kind: ModuleKind) -> ModuleHandle {
        ModuleHandle::new(kind, self.client.clone())
    }
}
