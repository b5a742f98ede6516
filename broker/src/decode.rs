use tracing::warn;

/// Decode a broker payload as a UTF-8 JSON object. Malformed payloads
/// are dropped with a warning rather than propagated (spec §4.1).
pub fn decode_payload(topic: &str, bytes: &[u8]) -> Option<serde_json::Value> {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!(topic, error = %e, "dropping non-utf8 broker payload");
            return None;
        }
    };

    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value @ serde_json::Value::Object(_)) => Some(value),
        Ok(_) => {
            warn!(topic, "dropping broker payload that is not a JSON object");
            None
        }
        Err(e) => {
            warn!(topic, error = %e, "dropping malformed JSON broker payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_json_object() {
        let v = decode_payload("t", br#"{"a":1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn rejects_non_object_json() {
        assert!(decode_payload("t", b"42").is_none());
        assert!(decode_payload("t", b"[1,2]").is_none());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(decode_payload("t", b"{not json").is_none());
    }

    #[test]
    fn rejects_non_utf8() {
        assert!(decode_payload("t", &[0xff, 0xfe, 0x00]).is_none());
    }
}
