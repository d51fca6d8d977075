//! Record codec: turns loosely-typed record-objects from the script side into
//! validated [`CallLogEntry`] values.
//!
//! Decoding is all-or-nothing per batch. The first bad entry fails the batch
//! and nothing from it reaches the store.

use calllog_types::{CallLogEntry, CallType};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("entries must be an array, got {found}")]
    NotAnArray { found: &'static str },
    #[error("entry {index}: expected an object, got {found}")]
    NotAnObject { index: usize, found: &'static str },
    #[error("entry {index}: {source}")]
    Entry {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct RawRecord {
    number: String,
    date: i64,
    duration: i64,
    #[serde(rename = "type")]
    call_type: i32,
    #[serde(deserialize_with = "flag")]
    new: bool,
    #[serde(deserialize_with = "flag")]
    is_read: bool,
}

/// Integer flags (`0` / non-zero) and plain booleans are both accepted.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(i != 0),
            None => Err(de::Error::custom(format!("expected integer flag, got {n}"))),
        },
        other => Err(de::Error::custom(format!(
            "expected integer or boolean flag, got {}",
            kind(&other)
        ))),
    }
}

impl From<RawRecord> for CallLogEntry {
    fn from(raw: RawRecord) -> Self {
        CallLogEntry {
            number: raw.number,
            timestamp_millis: raw.date,
            duration_seconds: raw.duration,
            call_type: CallType::from(raw.call_type),
            is_new: raw.new,
            is_read: raw.is_read,
        }
    }
}

pub fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Decode one record-object. `index` is only used for diagnostics.
pub fn decode(index: usize, record: &Value) -> Result<CallLogEntry, DecodeError> {
    if !record.is_object() {
        return Err(DecodeError::NotAnObject {
            index,
            found: kind(record),
        });
    }
    RawRecord::deserialize(record)
        .map(CallLogEntry::from)
        .map_err(|source| DecodeError::Entry { index, source })
}

/// Decode a whole batch, stopping at the first invalid entry.
pub fn decode_batch(records: &Value) -> Result<Vec<CallLogEntry>, DecodeError> {
    let Value::Array(items) = records else {
        return Err(DecodeError::NotAnArray {
            found: kind(records),
        });
    };
    items
        .iter()
        .enumerate()
        .map(|(i, record)| decode(i, record))
        .collect()
}

/// Lenient boolean read: anything but a JSON `true` is `false`.
pub fn opt_bool(args: &[Value], index: usize) -> bool {
    args.get(index).and_then(Value::as_bool).unwrap_or(false)
}

/// Raw argument at `index`, `null` when absent.
pub fn opt_value(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "number": "555-0100",
            "date": 1_700_000_000_000i64,
            "duration": 42,
            "type": 1,
            "new": 0,
            "is_read": 1
        })
    }

    #[test]
    fn decodes_well_formed_record() {
        let entry = decode(0, &sample()).unwrap();
        assert_eq!(entry.number, "555-0100");
        assert_eq!(entry.timestamp_millis, 1_700_000_000_000);
        assert_eq!(entry.duration_seconds, 42);
        assert_eq!(entry.call_type, CallType::Incoming);
        assert!(!entry.is_new);
        assert!(entry.is_read);
    }

    #[test]
    fn flags_accept_booleans() {
        let mut rec = sample();
        rec["new"] = json!(true);
        rec["is_read"] = json!(false);
        let entry = decode(0, &rec).unwrap();
        assert!(entry.is_new);
        assert!(!entry.is_read);
    }

    #[test]
    fn extra_fields_are_ignored() {
        let mut rec = sample();
        rec["name"] = json!("Alice");
        assert!(decode(0, &rec).is_ok());
    }

    #[test]
    fn missing_field_names_entry_and_field() {
        let mut bad = sample();
        bad.as_object_mut().unwrap().remove("date");
        let err = decode_batch(&json!([sample(), bad])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("entry 1:"), "{msg}");
        assert!(msg.contains("date"), "{msg}");
    }

    #[test]
    fn mistyped_fields_are_rejected() {
        for (field, value) in [
            ("number", json!(5550100)),
            ("date", json!("yesterday")),
            ("duration", json!(1.5)),
            ("type", json!(i64::MAX)),
            ("new", json!("yes")),
            ("is_read", json!(null)),
        ] {
            let mut rec = sample();
            rec[field] = value;
            assert!(decode(0, &rec).is_err(), "{field} should be rejected");
        }
    }

    #[test]
    fn batch_container_must_be_array_of_objects() {
        assert!(matches!(
            decode_batch(&json!({"number": "1"})),
            Err(DecodeError::NotAnArray { found: "object" })
        ));
        assert!(matches!(
            decode_batch(&json!([sample(), 7])),
            Err(DecodeError::NotAnObject { index: 1, .. })
        ));
        assert!(decode_batch(&json!([])).unwrap().is_empty());
    }

    #[test]
    fn permission_flag_is_lenient() {
        let args = vec![json!([]), json!(true)];
        assert!(opt_bool(&args, 1));
        assert!(!opt_bool(&args, 0));
        assert!(!opt_bool(&args, 5));
        assert!(!opt_bool(&[json!("true")], 0));
    }
}
