use serde_json::Value;

use crate::error::{BridgeError, Result};

/// Interprets a reply body (header already stripped).
///
/// - empty body -> `null`
/// - `{"result": v}` -> `v`
/// - `{"error": msg}` -> [`BridgeError::RemoteError`]
/// - anything else -> [`BridgeError::ProtocolError`]
pub fn decode_reply(body: &[u8]) -> Result<Value> {
    if body.is_empty() {
        return Ok(Value::Null);
    }

    let decoded: Value = serde_json::from_slice(body)
        .map_err(|e| BridgeError::ProtocolError(format!("reply is not valid JSON: {}", e)))?;

    let Value::Object(mut object) = decoded else {
        return Err(BridgeError::ProtocolError(format!(
            "reply is not an object: {}",
            decoded
        )));
    };

    if let Some(result) = object.remove("result") {
        return Ok(result);
    }

    match object.remove("error") {
        Some(Value::String(message)) => Err(BridgeError::RemoteError(message)),
        Some(other) => Err(BridgeError::RemoteError(other.to_string())),
        None => Err(BridgeError::ProtocolError(
            "reply has neither result nor error".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_shapes() {
        assert_eq!(decode_reply(b"").unwrap(), Value::Null);
        assert_eq!(decode_reply(br#"{"result": 5}"#).unwrap(), json!(5));
        assert_eq!(decode_reply(br#"{"result": null}"#).unwrap(), Value::Null);

        match decode_reply(br#"{"error": "boom"}"#) {
            Err(BridgeError::RemoteError(message)) => assert_eq!(message, "boom"),
            other => panic!("expected remote error, got {:?}", other),
        }

        assert!(matches!(decode_reply(b"{}"), Err(BridgeError::ProtocolError(_))));
        assert!(matches!(decode_reply(b"[1]"), Err(BridgeError::ProtocolError(_))));
        assert!(matches!(decode_reply(b"{nope"), Err(BridgeError::ProtocolError(_))));
    }
}
