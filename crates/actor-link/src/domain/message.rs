//! Messages exchanged over a link and their application properties.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::DecodeError;

/// Application property value.
///
/// Mirrors the JSON data model. AMQP application properties only carry
/// simple values, so arrays and objects travel as their compact JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Integral number.
    Int(i64),
    /// Any other number.
    Double(f64),
    /// Text.
    String(String),
    /// JSON array.
    Array(Vec<PropertyValue>),
    /// JSON object.
    Object(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Compact JSON text of this value.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Double(d) => write!(f, "{}", d),
            Self::Array(_) | Self::Object(_) => f.write_str(&self.to_json()),
        }
    }
}

/// Flat string-keyed property mapping.
///
/// Keys are kept sorted; order carries no meaning beyond stable log output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationProperties(BTreeMap<String, PropertyValue>);

impl ApplicationProperties {
    /// Empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object document.
    pub fn from_json_str(document: &str) -> Result<Self, DecodeError> {
        let value: serde_json::Value = serde_json::from_str(document)
            .map_err(|e| DecodeError::InvalidProperties(e.to_string()))?;
        match value {
            serde_json::Value::Object(map) => Ok(Self(
                map.into_iter()
                    .map(|(k, v)| (k, PropertyValue::from(v)))
                    .collect(),
            )),
            other => Err(DecodeError::InvalidProperties(format!(
                "got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Insert or replace a property.
    pub fn insert(&mut self, key: impl Into<String>, value: PropertyValue) {
        self.0.insert(key.into(), value);
    }

    /// Look up a property.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    /// Iterate in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no properties.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compact JSON with sorted keys, for logs.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

impl FromIterator<(String, PropertyValue)> for ApplicationProperties {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Message built by the sender: one binary data section plus properties.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Data section bytes.
    pub body: Vec<u8>,
    /// Application properties.
    pub properties: ApplicationProperties,
}

impl OutboundMessage {
    /// Message with a UTF-8 text body.
    pub fn text(body: impl Into<String>, properties: ApplicationProperties) -> Self {
        Self {
            body: body.into().into_bytes(),
            properties,
        }
    }
}

/// Scalar carried in an AMQP value body section.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyValue {
    /// `binary`
    Binary(Vec<u8>),
    /// `string` or `symbol`
    String(String),
    /// Any other value, already mapped.
    Scalar(PropertyValue),
}

/// Body sections of a received message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundBody {
    /// One or more data sections, in order.
    Data(Vec<Vec<u8>>),
    /// An amqp-value section.
    Value(BodyValue),
    /// No body (or a sequence body, which these flows never produce).
    Empty,
}

/// Message as handed over by a receiving link.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Adapter-assigned number used to acknowledge this delivery.
    pub sequence: u64,
    /// Body sections.
    pub body: InboundBody,
    /// Application properties (empty when absent).
    pub properties: ApplicationProperties,
}

/// Textual view of a received message.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    /// Body text.
    pub body: String,
    /// Copied application properties.
    pub properties: ApplicationProperties,
}

/// Decode a received message into text.
///
/// Data sections win over a value section; a value is coerced to text; no
/// body decodes to an empty string. Invalid UTF-8 is reported with a lossy
/// rendition so the caller can still log and acknowledge.
pub fn decode(message: &InboundMessage) -> Result<DecodedMessage, DecodeError> {
    let body = match &message.body {
        InboundBody::Data(sections) => utf8(sections.concat())?,
        InboundBody::Value(BodyValue::Binary(bytes)) => utf8(bytes.clone())?,
        InboundBody::Value(BodyValue::String(s)) => s.clone(),
        InboundBody::Value(BodyValue::Scalar(value)) => value.to_string(),
        InboundBody::Empty => String::new(),
    };

    Ok(DecodedMessage {
        body,
        properties: message.properties.clone(),
    })
}

fn utf8(bytes: Vec<u8>) -> Result<String, DecodeError> {
    String::from_utf8(bytes).map_err(|e| DecodeError::InvalidUtf8 {
        lossy: String::from_utf8_lossy(e.as_bytes()).into_owned(),
        reason: e.utf8_error().to_string(),
    })
}
