use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{BridgeError, Result};
use crate::protocol::Arguments;

/// Binds call arguments to named parameters, positionally or by keyword.
pub struct CallArgs {
    method: String,
    positional: Vec<Option<Value>>,
    keyword: Vec<(String, Option<Value>)>,
}

impl CallArgs {
    pub fn new(method: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            method: method.into(),
            positional: arguments.positional().iter().cloned().map(Some).collect(),
            keyword: arguments
                .keyword()
                .iter()
                .map(|(name, value)| (name.clone(), Some(value.clone())))
                .collect(),
        }
    }

    fn take(&mut self, index: usize, name: &str) -> Result<Option<Value>> {
        let by_position = self.positional.get_mut(index).and_then(Option::take);
        let by_name = self
            .keyword
            .iter_mut()
            .find(|(keyword, _)| keyword == name)
            .and_then(|(_, value)| value.take());

        match (by_position, by_name) {
            (Some(_), Some(_)) => Err(BridgeError::invalid(format!(
                "{}() got multiple values for argument '{}'",
                self.method, name
            ))),
            (value, None) | (None, value) => Ok(value),
        }
    }

    fn decode<T: DeserializeOwned>(&self, name: &str, value: Value) -> Result<T> {
        serde_json::from_value(value).map_err(|e| {
            BridgeError::invalid(format!("{}() argument '{}': {}", self.method, name, e))
        })
    }

    pub fn required<T: DeserializeOwned>(&mut self, index: usize, name: &str) -> Result<T> {
        match self.take(index, name)? {
            Some(value) => self.decode(name, value),
            None => Err(BridgeError::invalid(format!(
                "{}() missing required argument '{}'",
                self.method, name
            ))),
        }
    }

    /// Missing or null reads as `None`.
    pub fn optional<T: DeserializeOwned>(&mut self, index: usize, name: &str) -> Result<Option<T>> {
        match self.take(index, name)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => self.decode(name, value).map(Some),
        }
    }

    pub fn or<T: DeserializeOwned>(&mut self, index: usize, name: &str, default: T) -> Result<T> {
        Ok(self.optional(index, name)?.unwrap_or(default))
    }

    /// Fails if any argument was not bound to a parameter.
    pub fn finish(self) -> Result<()> {
        if let Some(extra) = self.positional.iter().position(Option::is_some) {
            return Err(BridgeError::invalid(format!(
                "{}() takes {} positional arguments but {} were given",
                self.method,
                extra,
                self.positional.len()
            )));
        }
        if let Some((name, _)) = self.keyword.iter().find(|(_, value)| value.is_some()) {
            return Err(BridgeError::invalid(format!(
                "{}() got an unexpected keyword argument '{}'",
                self.method, name
            )));
        }
        Ok(())
    }
}
