//! Mapping between domain messages and AMQP message sections.

use fe2o3_amqp::types::messaging::{
    ApplicationProperties as AmqpProperties, Body, Data, Message,
};
use fe2o3_amqp::types::primitives::{Binary, SimpleValue, Value};

use crate::domain::{ApplicationProperties, BodyValue, InboundBody, PropertyValue};

/// Domain property to an AMQP simple value.
///
/// Arrays and objects become their compact JSON text.
pub fn to_simple_value(value: &PropertyValue) -> SimpleValue {
    match value {
        PropertyValue::Null => SimpleValue::Null,
        PropertyValue::Bool(b) => SimpleValue::Bool(*b),
        PropertyValue::Int(i) => SimpleValue::Long(*i),
        PropertyValue::Double(d) => SimpleValue::Double((*d).into()),
        PropertyValue::String(s) => SimpleValue::String(s.clone()),
        PropertyValue::Array(_) | PropertyValue::Object(_) => SimpleValue::String(value.to_json()),
    }
}

/// AMQP simple value to a domain property.
pub fn from_simple_value(value: &SimpleValue) -> PropertyValue {
    match value {
        SimpleValue::Null => PropertyValue::Null,
        SimpleValue::Bool(b) => PropertyValue::Bool(*b),
        SimpleValue::Ubyte(v) => PropertyValue::Int(i64::from(*v)),
        SimpleValue::Ushort(v) => PropertyValue::Int(i64::from(*v)),
        SimpleValue::Uint(v) => PropertyValue::Int(i64::from(*v)),
        SimpleValue::Ulong(v) => match i64::try_from(*v) {
            Ok(i) => PropertyValue::Int(i),
            Err(_) => PropertyValue::String(v.to_string()),
        },
        SimpleValue::Byte(v) => PropertyValue::Int(i64::from(*v)),
        SimpleValue::Short(v) => PropertyValue::Int(i64::from(*v)),
        SimpleValue::Int(v) => PropertyValue::Int(i64::from(*v)),
        SimpleValue::Long(v) => PropertyValue::Int(*v),
        SimpleValue::Float(v) => PropertyValue::Double(f64::from(v.into_inner())),
        SimpleValue::Double(v) => PropertyValue::Double(v.into_inner()),
        SimpleValue::String(s) => PropertyValue::String(s.clone()),
        SimpleValue::Symbol(s) => PropertyValue::String(s.0.clone()),
        SimpleValue::Binary(b) => PropertyValue::String(String::from_utf8_lossy(b).into_owned()),
        other => PropertyValue::String(format!("{:?}", other)),
    }
}

/// Domain properties to the AMQP section.
pub fn to_amqp_properties(properties: &ApplicationProperties) -> AmqpProperties {
    properties
        .iter()
        .fold(AmqpProperties::builder(), |builder, (key, value)| {
            builder.insert(key.clone(), to_simple_value(value))
        })
        .build()
}

/// AMQP section (if any) to domain properties.
pub fn from_amqp_properties(properties: Option<&AmqpProperties>) -> ApplicationProperties {
    properties
        .map(|section| {
            section
                .0
                .iter()
                .map(|(key, value)| (key.clone(), from_simple_value(value)))
                .collect()
        })
        .unwrap_or_default()
}

/// One data section with `body`, plus properties.
pub fn outbound_message(body: Vec<u8>, properties: &ApplicationProperties) -> Message<Data> {
    Message::builder()
        .application_properties(to_amqp_properties(properties))
        .data(Binary::from(body))
        .build()
}

/// Received body sections to the domain view.
pub fn inbound_body(body: &Body<Value>) -> InboundBody {
    match body {
        Body::Data(batch) => InboundBody::Data(batch.iter().map(|data| data.0.to_vec()).collect()),
        Body::Value(value) => InboundBody::Value(body_value(&value.0)),
        _ => InboundBody::Empty,
    }
}

fn body_value(value: &Value) -> BodyValue {
    match value {
        Value::Binary(bytes) => BodyValue::Binary(bytes.to_vec()),
        Value::String(s) => BodyValue::String(s.clone()),
        Value::Symbol(s) => BodyValue::String(s.0.clone()),
        Value::Null => BodyValue::Scalar(PropertyValue::Null),
        Value::Bool(b) => BodyValue::Scalar(PropertyValue::Bool(*b)),
        Value::Int(i) => BodyValue::Scalar(PropertyValue::Int(i64::from(*i))),
        Value::Long(i) => BodyValue::Scalar(PropertyValue::Int(*i)),
        Value::Uint(i) => BodyValue::Scalar(PropertyValue::Int(i64::from(*i))),
        Value::Double(d) => BodyValue::Scalar(PropertyValue::Double(d.into_inner())),
        other => BodyValue::String(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> ApplicationProperties {
        ApplicationProperties::from_json_str(r#"{"k":"v","n":3,"flag":true,"list":[1,"a"]}"#)
            .unwrap()
    }

    #[test]
    fn test_nested_values_travel_as_json_text() {
        let section = to_amqp_properties(&props());
        assert_eq!(
            section.0.get("list"),
            Some(&SimpleValue::String(r#"[1,"a"]"#.to_string()))
        );
        assert_eq!(section.0.get("n"), Some(&SimpleValue::Long(3)));
    }

    #[test]
    fn test_properties_survive_the_section() {
        let section = to_amqp_properties(&props());
        let back = from_amqp_properties(Some(&section));

        assert_eq!(back.get("k"), Some(&PropertyValue::String("v".into())));
        assert_eq!(back.get("n"), Some(&PropertyValue::Int(3)));
        assert_eq!(back.get("flag"), Some(&PropertyValue::Bool(true)));
        assert_eq!(back.get("list"), Some(&PropertyValue::String(r#"[1,"a"]"#.into())));
    }

    #[test]
    fn test_missing_section_is_empty() {
        assert!(from_amqp_properties(None).is_empty());
    }

    #[test]
    fn test_narrow_integers_widen() {
        assert_eq!(from_simple_value(&SimpleValue::Ubyte(7)), PropertyValue::Int(7));
        assert_eq!(from_simple_value(&SimpleValue::Short(-2)), PropertyValue::Int(-2));
        assert_eq!(
            from_simple_value(&SimpleValue::Ulong(u64::MAX)),
            PropertyValue::String(u64::MAX.to_string())
        );
    }

    #[test]
    fn test_outbound_message_has_one_data_section() {
        let message = outbound_message(b"hello".to_vec(), &props());
        assert_eq!(message.body.0.to_vec(), b"hello".to_vec());
        assert!(message.application_properties.is_some());
    }

    #[test]
    fn test_sent_message_decodes_on_the_receiving_side() {
        let mut sent = ApplicationProperties::new();
        sent.insert("k", PropertyValue::String("v".into()));
        let message = outbound_message(b"hello".to_vec(), &sent);

        let received = crate::domain::InboundMessage {
            sequence: 1,
            body: inbound_body(&Body::<Value>::from(message.body)),
            properties: from_amqp_properties(message.application_properties.as_ref()),
        };
        let decoded = crate::domain::decode(&received).unwrap();

        assert_eq!(decoded.body, "hello");
        assert_eq!(decoded.properties.get("k"), Some(&PropertyValue::String("v".into())));
        assert_eq!(decoded.properties, sent);
    }
}
