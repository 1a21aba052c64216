use prost_reflect::{Kind, MessageDescriptor};
use serde_json::{Map, Value as Json, json};
use std::collections::HashSet;

/// Builds a JSON skeleton of `descriptor` with every field at its default value.
///
/// Only the first member of each oneof is listed, well-known types are left as `null`
/// and a message that contains itself stops at `{}`.
pub fn template(descriptor: &MessageDescriptor) -> Json {
    skeleton(descriptor, &mut Vec::new())
}

fn skeleton(descriptor: &MessageDescriptor, stack: &mut Vec<String>) -> Json {
    let name = descriptor.full_name().to_owned();
    if stack.contains(&name) {
        return Json::Object(Map::new());
    }
    stack.push(name);

    let mut object = Map::new();
    let mut oneofs = HashSet::new();

    for field in descriptor.fields() {
        if let Some(oneof) = field.containing_oneof().filter(|o| !o.is_synthetic()) {
            if !oneofs.insert(oneof.name().to_owned()) {
                continue;
            }
        }

        let value = if field.is_map() {
            Json::Object(Map::new())
        } else if field.is_list() {
            Json::Array(Vec::new())
        } else {
            default_value(&field.kind(), stack)
        };

        object.insert(field.name().to_owned(), value);
    }

    stack.pop();
    Json::Object(object)
}

fn default_value(kind: &Kind, stack: &mut Vec<String>) -> Json {
    match kind {
        Kind::Double | Kind::Float => json!(0.0),
        Kind::Bool => json!(false),
        Kind::String | Kind::Bytes => json!(""),
        Kind::Enum(desc) => json!(desc.default_value().name()),
        Kind::Message(desc) if desc.full_name().starts_with("google.protobuf.") => Json::Null,
        Kind::Message(desc) => skeleton(desc, stack),
        _ => json!(0),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec;
    use crate::fixtures;

    #[test]
    fn lists_every_field_with_its_default() {
        let set = fixtures::compile(&["kitchen.proto"]);
        let sink = set.pool().get_message_by_name("kitchen.Sink").unwrap();

        let value = template(&sink);

        assert_eq!(value["small"], json!(0));
        assert_eq!(value["name"], json!(""));
        assert_eq!(value["color"], json!("COLOR_UNSPECIFIED"));
        assert_eq!(value["inner"], json!({ "label": "", "tags": [] }));
        assert_eq!(value["by_name"], json!({}));
        assert_eq!(value["created_at"], Json::Null);
        // Recursion stops at the first repetition.
        assert_eq!(value["child"], json!({}));
        // Only the first oneof member.
        assert!(value.get("text").is_some());
        assert!(value.get("code").is_none());
    }

    #[test]
    fn templates_are_valid_payloads() {
        let set = fixtures::compile(&["kitchen.proto", "shop/orders.proto"]);

        for name in ["kitchen.Sink", "shop.Order", "shop.Summary"] {
            let desc = set.pool().get_message_by_name(name).unwrap();
            let payload = template(&desc).to_string();
            assert!(codec::encode(&desc, &payload).is_ok(), "{name}: {payload}");
        }
    }
}
