use super::{CodecError, join_field, join_index, join_key};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use prost::bytes::Bytes;
use prost_reflect::{
    DynamicMessage, EnumDescriptor, FieldDescriptor, Kind, MapKey, MessageDescriptor, Value,
};
use serde_json::Value as Json;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

const NULL_VALUE: &str = "google.protobuf.NullValue";
const STRUCT_VALUE: &str = "google.protobuf.Value";

pub(super) fn message(
    desc: &MessageDescriptor,
    json: &Json,
    path: &str,
) -> Result<DynamicMessage, CodecError> {
    // Well-known types have bespoke JSON forms (timestamps as RFC 3339, etc).
    if desc.full_name().starts_with("google.protobuf.") {
        return DynamicMessage::deserialize(desc.clone(), json)
            .map_err(|err| CodecError::new(path, err.to_string()));
    }

    let object = json
        .as_object()
        .ok_or_else(|| mismatch(path, "an object", json))?;

    let mut message = DynamicMessage::new(desc.clone());
    let mut seen_fields = HashSet::new();
    let mut seen_oneofs: HashMap<String, String> = HashMap::new();

    for (key, value) in object {
        let field_path = join_field(path, key);

        let field = desc
            .get_field_by_name(key)
            .or_else(|| desc.get_field_by_json_name(key))
            .ok_or_else(|| CodecError::new(&field_path, "unknown field"))?;

        if !seen_fields.insert(field.number()) {
            return Err(CodecError::new(&field_path, "field is set more than once"));
        }

        if value.is_null() && !accepts_null(&field) {
            continue;
        }

        if let Some(oneof) = field.containing_oneof().filter(|o| !o.is_synthetic()) {
            if let Some(other) = seen_oneofs.insert(oneof.name().to_owned(), key.clone()) {
                return Err(CodecError::new(
                    &field_path,
                    format!("oneof '{}' is already set by '{other}'", oneof.name()),
                ));
            }
        }

        let value = field_value(&field, value, &field_path)?;
        message
            .try_set_field(&field, value)
            .map_err(|err| CodecError::new(&field_path, err.to_string()))?;
    }

    Ok(message)
}

fn accepts_null(field: &FieldDescriptor) -> bool {
    if field.is_list() || field.is_map() {
        return false;
    }
    match field.kind() {
        Kind::Message(m) => m.full_name() == STRUCT_VALUE,
        Kind::Enum(e) => e.full_name() == NULL_VALUE,
        _ => false,
    }
}

fn field_value(field: &FieldDescriptor, json: &Json, path: &str) -> Result<Value, CodecError> {
    if field.is_map() {
        if let Kind::Message(entry) = field.kind() {
            return map(&entry, json, path);
        }
    }

    if field.is_list() {
        let items = json
            .as_array()
            .ok_or_else(|| mismatch(path, "an array", json))?;
        let kind = field.kind();

        return items
            .iter()
            .enumerate()
            .map(|(index, item)| singular(&kind, item, &join_index(path, index)))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List);
    }

    singular(&field.kind(), json, path)
}

fn map(entry: &MessageDescriptor, json: &Json, path: &str) -> Result<Value, CodecError> {
    let object = json
        .as_object()
        .ok_or_else(|| mismatch(path, "an object", json))?;

    let key_kind = entry.map_entry_key_field().kind();
    let value_kind = entry.map_entry_value_field().kind();
    let mut map = HashMap::with_capacity(object.len());

    for (key, value) in object {
        let entry_path = join_key(path, key);
        let map_key = map_key(&key_kind, key, &entry_path)?;
        let value = singular(&value_kind, value, &entry_path)?;

        if map.insert(map_key, value).is_some() {
            return Err(CodecError::new(&entry_path, "duplicate map key"));
        }
    }

    Ok(Value::Map(map))
}

fn map_key(kind: &Kind, key: &str, path: &str) -> Result<MapKey, CodecError> {
    let invalid = || CodecError::new(path, format!("invalid map key {key:?}"));

    match kind {
        Kind::String => Ok(MapKey::String(key.to_owned())),
        Kind::Bool => match key {
            "true" => Ok(MapKey::Bool(true)),
            "false" => Ok(MapKey::Bool(false)),
            _ => Err(invalid()),
        },
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => {
            key.parse().map(MapKey::I32).map_err(|_| invalid())
        }
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => {
            key.parse().map(MapKey::I64).map_err(|_| invalid())
        }
        Kind::Uint32 | Kind::Fixed32 => key.parse().map(MapKey::U32).map_err(|_| invalid()),
        Kind::Uint64 | Kind::Fixed64 => key.parse().map(MapKey::U64).map_err(|_| invalid()),
        _ => Err(CodecError::new(path, "unsupported map key type")),
    }
}

fn singular(kind: &Kind, json: &Json, path: &str) -> Result<Value, CodecError> {
    match kind {
        Kind::Double => float(json, path).map(Value::F64),
        Kind::Float => {
            let value = float(json, path)?;
            let narrowed = value as f32;
            if value.is_finite() && narrowed.is_infinite() {
                return Err(CodecError::new(path, format!("{value} is out of range for float")));
            }
            Ok(Value::F32(narrowed))
        }
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => integer::<i32>(json, path).map(Value::I32),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => integer::<i64>(json, path).map(Value::I64),
        Kind::Uint32 | Kind::Fixed32 => integer::<u32>(json, path).map(Value::U32),
        Kind::Uint64 | Kind::Fixed64 => integer::<u64>(json, path).map(Value::U64),
        Kind::Bool => json
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| mismatch(path, "a boolean", json)),
        Kind::String => json
            .as_str()
            .map(|s| Value::String(s.to_owned()))
            .ok_or_else(|| mismatch(path, "a string", json)),
        Kind::Bytes => bytes(json, path).map(Value::Bytes),
        Kind::Enum(desc) => enumeration(desc, json, path).map(Value::EnumNumber),
        Kind::Message(desc) => message(desc, json, path).map(Value::Message),
    }
}

fn integer<T>(json: &Json, path: &str) -> Result<T, CodecError>
where
    T: TryFrom<i64> + TryFrom<u64> + FromStr,
{
    let out_of_range = || {
        CodecError::new(
            path,
            format!("{json} is out of range for {}", std::any::type_name::<T>()),
        )
    };

    match json {
        Json::Number(number) => {
            if let Some(value) = number.as_u64() {
                <T as TryFrom<u64>>::try_from(value).map_err(|_| out_of_range())
            } else if let Some(value) = number.as_i64() {
                <T as TryFrom<i64>>::try_from(value).map_err(|_| out_of_range())
            } else {
                match number.as_f64() {
                    // 2^53: past this point floats stop being exact integers.
                    Some(value) if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 => {
                        <T as TryFrom<i64>>::try_from(value as i64).map_err(|_| out_of_range())
                    }
                    _ => Err(CodecError::new(
                        path,
                        format!("expected an integer, found {number}"),
                    )),
                }
            }
        }
        Json::String(text) => text
            .trim()
            .parse::<T>()
            .map_err(|_| CodecError::new(path, format!("expected an integer, found {text:?}"))),
        other => Err(mismatch(path, "an integer", other)),
    }
}

fn float(json: &Json, path: &str) -> Result<f64, CodecError> {
    match json {
        Json::Number(number) => number
            .as_f64()
            .ok_or_else(|| CodecError::new(path, format!("{number} is not a valid float"))),
        Json::String(text) => match text.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => other
                .parse()
                .map_err(|_| CodecError::new(path, format!("expected a number, found {other:?}"))),
        },
        other => Err(mismatch(path, "a number", other)),
    }
}

fn bytes(json: &Json, path: &str) -> Result<Bytes, CodecError> {
    let text = json
        .as_str()
        .ok_or_else(|| mismatch(path, "a base64 string", json))?;

    [STANDARD, URL_SAFE, STANDARD_NO_PAD, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(text).ok())
        .map(Bytes::from)
        .ok_or_else(|| CodecError::new(path, "invalid base64 string"))
}

fn enumeration(desc: &EnumDescriptor, json: &Json, path: &str) -> Result<i32, CodecError> {
    match json {
        Json::String(name) => desc
            .get_value_by_name(name)
            .map(|value| value.number())
            .ok_or_else(|| {
                CodecError::new(
                    path,
                    format!("unknown value {name:?} for enum {}", desc.full_name()),
                )
            }),
        Json::Number(_) => {
            let number = integer::<i32>(json, path)?;
            desc.get_value(number)
                .map(|value| value.number())
                .ok_or_else(|| {
                    CodecError::new(
                        path,
                        format!("unknown value {number} for enum {}", desc.full_name()),
                    )
                })
        }
        Json::Null if desc.full_name() == NULL_VALUE => Ok(0),
        other => Err(mismatch(path, "an enum name or number", other)),
    }
}

fn mismatch(path: &str, expected: &str, found: &Json) -> CodecError {
    let found = match found {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    };
    CodecError::new(path, format!("expected {expected}, found {found}"))
}
