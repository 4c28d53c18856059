//! Opaque pagination cursors.
//!
//! Wire format, which must stay stable because clients hold on to cursors:
//! standard padded base64 of either the raw identifier string (simple) or the
//! JSON object `{"deviceUuid": .., "time": <RFC 3339>}` (composite).

use crate::errors::CursorError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Resume position keyed by device and event time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeKey {
    pub device_uuid: String,
    pub time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompositeWire {
    device_uuid: String,
    time: String,
}

pub fn encode_simple(id: &str) -> String {
    STANDARD.encode(id.as_bytes())
}

pub fn encode_composite(key: &CompositeKey) -> String {
    let wire = CompositeWire {
        device_uuid: key.device_uuid.clone(),
        time: key.time.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    };
    // Serializing two strings cannot fail.
    let json = serde_json::to_string(&wire).unwrap_or_default();
    STANDARD.encode(json.as_bytes())
}

fn is_base64(cursor: &str) -> bool {
    !cursor.is_empty()
        && cursor.len() % 4 == 0
        && cursor
            .trim_end_matches('=')
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
        && cursor.len() - cursor.trim_end_matches('=').len() <= 2
}

fn decode_text(cursor: &str) -> Result<String, CursorError> {
    if !is_base64(cursor) {
        return Err(CursorError::InvalidBase64 {
            cursor: cursor.to_string(),
        });
    }
    let bytes = STANDARD
        .decode(cursor)
        .map_err(|_| CursorError::InvalidBase64 {
            cursor: cursor.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|_| CursorError::InvalidUtf8 {
        cursor: cursor.to_string(),
    })
}

pub fn decode_simple(cursor: &str) -> Result<String, CursorError> {
    let id = decode_text(cursor)?;
    if id.is_empty() {
        return Err(CursorError::InvalidPayload {
            cursor: cursor.to_string(),
            reason: "empty identifier".to_string(),
        });
    }
    Ok(id)
}

pub fn decode_composite(cursor: &str) -> Result<CompositeKey, CursorError> {
    let text = decode_text(cursor)?;
    let wire: CompositeWire =
        serde_json::from_str(&text).map_err(|e| CursorError::InvalidPayload {
            cursor: cursor.to_string(),
            reason: e.to_string(),
        })?;
    if wire.device_uuid.is_empty() {
        return Err(CursorError::InvalidPayload {
            cursor: cursor.to_string(),
            reason: "empty deviceUuid".to_string(),
        });
    }
    let time = DateTime::parse_from_rfc3339(&wire.time)
        .map_err(|_| CursorError::InvalidTime {
            cursor: cursor.to_string(),
            value: wire.time.clone(),
        })?
        .with_timezone(&Utc);
    Ok(CompositeKey {
        device_uuid: wire.device_uuid,
        time,
    })
}

/// Lenient composite decode: an absent or undecodable cursor becomes
/// `default`. Only for call sites where "no cursor" means start of range.
pub fn decode_composite_or(
    cursor: Option<&str>,
    default: Option<CompositeKey>,
) -> Option<CompositeKey> {
    let Some(cursor) = cursor else {
        return default;
    };
    match decode_composite(cursor) {
        Ok(key) => Some(key),
        Err(e) => {
            warn!(error = %e, "ignoring undecodable cursor");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_simple_round_trip() {
        let encoded = encode_simple("1234567");
        assert_eq!(decode_simple(&encoded).unwrap(), "1234567");
    }

    #[test]
    fn test_composite_round_trip_keeps_subsecond_precision() {
        let key = CompositeKey {
            device_uuid: "station-7".to_string(),
            time: Utc.timestamp_micros(1_717_236_000_123_456).unwrap(),
        };
        let encoded = encode_composite(&key);
        assert_eq!(decode_composite(&encoded).unwrap(), key);
    }

    #[test]
    fn test_composite_wire_format_is_stable() {
        let key = CompositeKey {
            device_uuid: "d1".to_string(),
            time: Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
        };
        let decoded = STANDARD.decode(encode_composite(&key)).unwrap();
        assert_eq!(
            String::from_utf8(decoded).unwrap(),
            r#"{"deviceUuid":"d1","time":"2024-06-01T10:00:00Z"}"#
        );
    }

    #[test]
    fn test_rejects_non_base64() {
        for bad in ["", "not base64!", "abc", "ab=c", "a==="] {
            assert_eq!(
                decode_simple(bad),
                Err(CursorError::InvalidBase64 {
                    cursor: bad.to_string()
                }),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        let cursor = STANDARD.encode([0xff, 0xfe, 0xfd]);
        assert!(matches!(
            decode_simple(&cursor),
            Err(CursorError::InvalidUtf8 { .. })
        ));
    }

    #[test]
    fn test_composite_rejects_wrong_structure() {
        let cursor = encode_simple("12345");
        assert!(matches!(
            decode_composite(&cursor),
            Err(CursorError::InvalidPayload { .. })
        ));

        let cursor = STANDARD.encode(r#"{"deviceUuid":"d1"}"#);
        assert!(matches!(
            decode_composite(&cursor),
            Err(CursorError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_composite_rejects_bad_time() {
        let cursor = STANDARD.encode(r#"{"deviceUuid":"d1","time":"yesterday"}"#);
        assert_eq!(
            decode_composite(&cursor),
            Err(CursorError::InvalidTime {
                cursor: cursor.clone(),
                value: "yesterday".to_string()
            })
        );
    }

    #[test]
    fn test_lenient_decoder_falls_back() {
        let default = CompositeKey {
            device_uuid: "d0".to_string(),
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        assert_eq!(
            decode_composite_or(Some("%%%"), Some(default.clone())),
            Some(default.clone())
        );
        assert_eq!(decode_composite_or(None, None), None);
    }
}
