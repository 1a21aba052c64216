//! # JSON <-> Protobuf Codec
//!
//! Converts between a `MessageDescriptor` and JSON without generated types.
//!
//! ## How it works
//!
//! 1. **Encoding (JSON -> Proto)**:
//!    - Walks the JSON object against the descriptor, field by field, producing the tagged
//!      `prost_reflect::Value` variants (scalar, message, list, map).
//!    - Validation is strict: unknown keys, shape mismatches and out-of-range numbers are
//!      rejected with a [`CodecError`] naming the exact field path (`items[2].tags["a"]`).
//!    - An object repeating a key is rejected too, instead of keeping the last value.
//!    - Enums accept names or declared numbers and are stored as numbers.
//!
//! 2. **Decoding (Proto -> JSON)**:
//!    - Reads raw bytes into a `DynamicMessage`.
//!    - Renders canonical proto3 JSON using proto field names, enum names and numeric 64-bit
//!      integers. Default-valued fields are omitted.
//!
//! The [`DynamicCodec`] plugs both directions into `tonic`.
mod encode;
mod json;
mod template;
mod wire;

pub use template::template;
pub use wire::DynamicCodec;

use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor, SerializeOptions};

/// A payload that does not fit its message descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {reason}", location(.field_path))]
pub struct CodecError {
    /// Path of the offending field, empty when the problem is the payload itself.
    pub field_path: String,
    pub reason: String,
}

impl CodecError {
    pub fn new(field_path: &str, reason: impl Into<String>) -> Self {
        Self {
            field_path: field_path.to_owned(),
            reason: reason.into(),
        }
    }
}

fn location(path: &str) -> &str {
    if path.is_empty() { "<root>" } else { path }
}

/// Parses JSON text, reporting syntax errors at the root path and repeated object keys at
/// their own path.
pub fn parse(text: &str) -> Result<serde_json::Value, CodecError> {
    json::parse(text)
}

/// Encodes JSON text into the binary form of `descriptor`.
pub fn encode(descriptor: &MessageDescriptor, json: &str) -> Result<Vec<u8>, CodecError> {
    let value = parse(json)?;
    Ok(to_message(descriptor, &value)?.encode_to_vec())
}

/// Decodes a binary message of type `descriptor` into JSON text.
pub fn decode(descriptor: &MessageDescriptor, bytes: &[u8]) -> Result<String, CodecError> {
    let message = DynamicMessage::decode(descriptor.clone(), bytes).map_err(|err| {
        CodecError::new("", format!("failed to decode protobuf bytes: {err}"))
    })?;
    let value = to_json(&message)?;
    serde_json::to_string(&value).map_err(|err| CodecError::new("", err.to_string()))
}

/// Builds a validated `DynamicMessage` from a JSON value.
pub fn to_message(
    descriptor: &MessageDescriptor,
    value: &serde_json::Value,
) -> Result<DynamicMessage, CodecError> {
    encode::message(descriptor, value, "")
}

/// Same as [`to_message`], reporting errors below `path` (used for elements of a
/// message sequence, e.g. `[3]`).
pub fn to_message_at(
    descriptor: &MessageDescriptor,
    value: &serde_json::Value,
    path: &str,
) -> Result<DynamicMessage, CodecError> {
    encode::message(descriptor, value, path)
}

/// Renders a message as canonical proto3 JSON.
pub fn to_json(message: &DynamicMessage) -> Result<serde_json::Value, CodecError> {
    let options = SerializeOptions::new()
        .stringify_64_bit_integers(false)
        .use_proto_field_name(true);

    message
        .serialize_with_options(serde_json::value::Serializer, &options)
        .map_err(|err| CodecError::new("", format!("failed to map message to JSON: {err}")))
}

fn join_field(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_owned()
    } else {
        format!("{path}.{name}")
    }
}

fn join_index(path: &str, index: usize) -> String {
    format!("{path}[{index}]")
}

fn join_key(path: &str, key: &str) -> String {
    format!("{path}[{key:?}]")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fixtures;
    use serde_json::json;

    fn sink() -> MessageDescriptor {
        fixtures::compile(&["kitchen.proto"])
            .pool()
            .get_message_by_name("kitchen.Sink")
            .unwrap()
    }

    fn round_trip(value: &serde_json::Value) -> serde_json::Value {
        let desc = sink();
        let bytes = encode(&desc, &value.to_string()).unwrap();
        serde_json::from_str(&decode(&desc, &bytes).unwrap()).unwrap()
    }

    fn encode_err(value: serde_json::Value) -> CodecError {
        encode(&sink(), &value.to_string()).unwrap_err()
    }

    #[test]
    fn round_trips_every_field_kind() {
        let value = json!({
            "ratio": 0.25,
            "weight": 1.5,
            "small": -7,
            "big": 9007199254740993i64,
            "count": 42,
            "huge": 18446744073709551615u64,
            "delta": -3,
            "stamp": 77,
            "enabled": true,
            "name": "kitchen",
            "blob": "aGVsbG8=",
            "color": "GREEN",
            "inner": { "label": "a", "tags": ["x", "y"] },
            "inners": [{ "label": "b" }, { "label": "c", "tags": ["z"] }],
            "numbers": [3, 1, 2],
            "by_name": { "first": { "label": "d" } },
            "by_id": { "7": "seven" },
            "text": "chosen",
            "created_at": "2024-01-02T03:04:05Z",
            "child": { "name": "nested", "color": "RED" }
        });

        assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn normalizes_enum_numbers() {
        let decoded = round_trip(&json!({ "color": 2 }));
        assert_eq!(decoded, json!({ "color": "GREEN" }));
    }

    #[test]
    fn accepts_json_names_and_string_integers() {
        let decoded = round_trip(&json!({ "byId": { "1": "one" }, "big": "-12", "createdAt": null }));
        assert_eq!(decoded, json!({ "by_id": { "1": "one" }, "big": -12 }));
    }

    #[test]
    fn rejects_unknown_fields_by_path() {
        let err = encode_err(json!({ "nam": "Ada" }));
        assert_eq!(err.field_path, "nam");
        assert_eq!(err.reason, "unknown field");

        let err = encode_err(json!({ "inners": [{ "label": "a" }, { "lable": "b" }] }));
        assert_eq!(err.field_path, "inners[1].lable");

        let err = encode_err(json!({ "by_name": { "k": { "oops": 1 } } }));
        assert_eq!(err.field_path, r#"by_name["k"].oops"#);
        assert_eq!(err.to_string(), r#"by_name["k"].oops: unknown field"#);
    }

    #[test]
    fn rejects_shape_mismatches() {
        let err = encode_err(json!({ "small": "abc" }));
        assert_eq!(err.field_path, "small");

        let err = encode_err(json!({ "enabled": 1 }));
        assert_eq!(err.field_path, "enabled");
        assert!(err.reason.contains("boolean"), "{err}");

        let err = encode_err(json!({ "numbers": 5 }));
        assert_eq!(err.field_path, "numbers");
        assert!(err.reason.contains("array"), "{err}");

        let err = encode_err(json!({ "numbers": [1, "two"] }));
        assert_eq!(err.field_path, "numbers[1]");

        let err = encode_err(json!({ "inner": "flat" }));
        assert_eq!(err.field_path, "inner");
        assert!(err.reason.contains("object"), "{err}");

        let err = encode_err(json!({ "by_id": { "seven": "x" } }));
        assert_eq!(err.field_path, r#"by_id["seven"]"#);
    }

    #[test]
    fn rejects_out_of_range_numbers() {
        assert_eq!(encode_err(json!({ "small": 3_000_000_000u64 })).field_path, "small");
        assert_eq!(encode_err(json!({ "count": -1 })).field_path, "count");
        assert_eq!(encode_err(json!({ "small": 1.5 })).field_path, "small");
    }

    #[test]
    fn rejects_unknown_enum_values() {
        assert_eq!(encode_err(json!({ "color": "PURPLE" })).field_path, "color");
        assert_eq!(encode_err(json!({ "color": 9 })).field_path, "color");
    }

    #[test]
    fn rejects_two_members_of_a_oneof() {
        let err = encode_err(json!({ "text": "a", "code": 1 }));
        assert_eq!(err.field_path, "code");
        assert!(err.reason.contains("choice"), "{err}");
    }

    #[test]
    fn rejects_a_field_set_twice() {
        let err = encode_err(json!({ "by_id": {}, "byId": {} }));
        assert_eq!(err.field_path, "byId");
    }

    #[test]
    fn rejects_non_object_payloads() {
        let err = encode(&sink(), "[1, 2]").unwrap_err();
        assert_eq!(err.field_path, "");
        assert!(err.to_string().starts_with("<root>: "));

        let err = encode(&sink(), "{ not json").unwrap_err();
        assert_eq!(err.field_path, "");
        assert!(err.reason.starts_with("invalid JSON"));
    }

    #[test]
    fn rejects_a_repeated_key() {
        let err = encode(&sink(), r#"{ "name": "a", "name": "b" }"#).unwrap_err();
        assert_eq!(err.field_path, "name");

        let err = encode(&sink(), r#"{ "inners": [{ "label": "a", "label": "a" }] }"#).unwrap_err();
        assert_eq!(err.field_path, "inners[0].label");
    }

    #[test]
    fn null_leaves_fields_unset() {
        let bytes = encode(&sink(), r#"{ "name": null, "inner": null }"#).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode(&sink(), &[0xff, 0xff, 0xff]).unwrap_err();
        assert_eq!(err.field_path, "");
    }
}
