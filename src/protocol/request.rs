use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{json, Map, Value};

use crate::error::{BridgeError, Result};

/// Command code for a module method invocation.
pub const COMMAND_METHOD: u16 = 16;
/// Addressable type code for modules.
pub const TYPE_MODULE: u8 = 1;

/// Key of a mapping argument before normalisation.
///
/// The wire format only carries string keys, so integer and composite keys are
/// flattened: `5` becomes `"5"`, `(3, 4)` becomes `"3,4"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapKey {
    Int(i64),
    Str(String),
    Tuple(Vec<MapKey>),
}

impl MapKey {
    pub fn normalize(&self) -> String {
        match self {
            MapKey::Int(value) => value.to_string(),
            MapKey::Str(value) => value.clone(),
            MapKey::Tuple(parts) => parts
                .iter()
                .map(MapKey::normalize)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl From<i64> for MapKey {
    fn from(value: i64) -> Self {
        MapKey::Int(value)
    }
}

impl From<i32> for MapKey {
    fn from(value: i32) -> Self {
        MapKey::Int(value as i64)
    }
}

impl From<u32> for MapKey {
    fn from(value: u32) -> Self {
        MapKey::Int(value as i64)
    }
}

impl From<&str> for MapKey {
    fn from(value: &str) -> Self {
        MapKey::Str(value.to_string())
    }
}

impl From<String> for MapKey {
    fn from(value: String) -> Self {
        MapKey::Str(value)
    }
}

impl<A: Into<MapKey>, B: Into<MapKey>> From<(A, B)> for MapKey {
    fn from((a, b): (A, B)) -> Self {
        MapKey::Tuple(vec![a.into(), b.into()])
    }
}

impl<A: Into<MapKey>, B: Into<MapKey>, C: Into<MapKey>> From<(A, B, C)> for MapKey {
    fn from((a, b, c): (A, B, C)) -> Self {
        MapKey::Tuple(vec![a.into(), b.into(), c.into()])
    }
}

/// Builds a JSON object from arbitrary keys, normalising each key.
pub fn keyed_map<K, V, I>(entries: I) -> Value
where
    K: Into<MapKey>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    let map: Map<String, Value> = entries
        .into_iter()
        .map(|(key, value)| (key.into().normalize(), value.into()))
        .collect();
    Value::Object(map)
}

/// Positional and keyword arguments of one method call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_positional(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keyword: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.push((name.into(), value.into()));
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self) -> &[(String, Value)] {
        &self.keyword
    }

    /// Argument container sent to the daemon.
    ///
    /// Without keywords this is the ordered positional array. With keywords it
    /// is an object keyed by the decimal index of each positional argument,
    /// followed by the keyword names.
    pub fn to_json(&self) -> Value {
        if self.keyword.is_empty() {
            return Value::Array(self.positional.clone());
        }

        let mut map = Map::new();
        for (index, value) in self.positional.iter().enumerate() {
            map.insert(index.to_string(), value.clone());
        }
        for (name, value) in &self.keyword {
            map.insert(name.clone(), value.clone());
        }
        Value::Object(map)
    }

    /// Inverse of [`Arguments::to_json`]: consecutive `"0"`, `"1"`, ... keys
    /// are positional, everything else is a keyword.
    pub fn from_json(arguments: Value) -> Result<Self> {
        match arguments {
            Value::Array(positional) => Ok(Self::from_positional(positional)),
            Value::Object(mut map) => {
                let mut positional = Vec::new();
                while let Some(value) = map.remove(&positional.len().to_string()) {
                    positional.push(value);
                }
                Ok(Self {
                    positional,
                    keyword: map.into_iter().collect(),
                })
            }
            other => Err(BridgeError::invalid(format!(
                "expected either a list or a dict of arguments, got {}",
                other
            ))),
        }
    }
}

/// A module method call, ready to be framed.
#[derive(Debug, Clone)]
pub struct MethodRequest<'a> {
    pub module: &'a str,
    pub method: &'a str,
    pub arguments: &'a Arguments,
}

impl MethodRequest<'_> {
    /// Encodes the frame body (everything after the 6-byte header).
    pub fn encode(&self) -> Result<Bytes> {
        let module = name_bytes("module", self.module)?;
        let method = name_bytes("method", self.method)?;
        let envelope = serde_json::to_vec(&json!({ "arguments": self.arguments.to_json() }))?;

        let mut buf = BytesMut::with_capacity(6 + module.len() + method.len() + envelope.len());
        buf.put_u16_le(COMMAND_METHOD);
        buf.put_u8(TYPE_MODULE);
        buf.put_u8(module.len() as u8);
        buf.extend_from_slice(module);
        buf.put_u8(method.len() as u8);
        buf.extend_from_slice(method);
        buf.extend_from_slice(&envelope);
        Ok(buf.freeze())
    }
}

fn name_bytes<'a>(what: &str, name: &'a str) -> Result<&'a [u8]> {
    if !name.is_ascii() || name.len() > u8::MAX as usize {
        return Err(BridgeError::invalid(format!(
            "{} name {:?} must be ASCII and at most 255 bytes",
            what, name
        )));
    }
    Ok(name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_only_is_an_array() {
        let args = Arguments::new().arg(1).arg(2);
        assert_eq!(args.to_json(), json!([1, 2]));
    }

    #[test]
    fn keywords_switch_to_indexed_object() {
        let args = Arguments::new().arg("a").kwarg("show", true);
        assert_eq!(args.to_json(), json!({"0": "a", "show": true}));
    }

    #[test]
    fn tuple_keys_are_comma_joined() {
        assert_eq!(MapKey::from((3, 4)).normalize(), "3,4");
        assert_eq!(MapKey::from((1, (2, 3))).normalize(), "1,2,3");
        assert_eq!(MapKey::from(5).normalize(), "5");

        let map = keyed_map(vec![((3, 4), 0xFF0000)]);
        assert_eq!(map, json!({"3,4": 0xFF0000}));
    }

    #[test]
    fn from_json_splits_indexed_keys() {
        let args = Arguments::from_json(json!({"0": 1, "1": 2, "3": 9, "show": false})).unwrap();
        assert_eq!(args.positional(), &[json!(1), json!(2)]);
        assert_eq!(args.keyword().len(), 2);
        assert!(Arguments::from_json(json!("nope")).is_err());
    }

    #[test]
    fn body_layout() {
        let args = Arguments::new();
        let body = MethodRequest {
            module: "pi",
            method: "cpu_temp",
            arguments: &args,
        }
        .encode()
        .unwrap();

        assert_eq!(&body[..4], &[16, 0, 1, 2]);
        assert_eq!(&body[4..6], b"pi");
        assert_eq!(body[6], 8);
        assert_eq!(&body[7..15], b"cpu_temp");
        assert_eq!(&body[15..], br#"{"arguments":[]}"#);
    }

    #[test]
    fn long_names_are_rejected() {
        let args = Arguments::new();
        let long = "x".repeat(256);
        let request = MethodRequest {
            module: &long,
            method: "set",
            arguments: &args,
        };
        assert!(matches!(request.encode(), Err(BridgeError::InvalidArgument(_))));
    }
}
