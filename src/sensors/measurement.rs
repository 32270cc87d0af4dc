//! Measurement records produced by the protocol decoder.
//!
//! A record is an ordered list of named fields. Field order follows the order
//! the decoder emits them in and is preserved when serialized.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Field names emitted by the decoder.
pub mod fields {
    pub const HEART_RATE: &str = "heart_rate";
    pub const POWER: &str = "power";
    pub const CADENCE: &str = "cadence";
    pub const RAW_DATA: &str = "raw_data";
    pub const FLAGS: &str = "flags";
    pub const FLAG_DETAILS: &str = "flag_details";
    pub const DATA_LENGTH: &str = "data_length";
    pub const CORE_TEMPERATURE: &str = "core_temperature";
    pub const SKIN_TEMPERATURE: &str = "skin_temperature";
    pub const SMO2: &str = "smo2";
    pub const THB: &str = "thb";
    pub const RESPONSE_CODE: &str = "response_code";
    pub const REQUEST_OP_CODE: &str = "request_op_code";
    pub const RESULT_CODE: &str = "result_code";
    pub const RESULT: &str = "result";
}

/// Value of a single measurement field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Numeric quantity
    Number(f64),
    /// Diagnostic text (hex dump, flag summary)
    Text(String),
    /// Field not present in this notification
    Null,
}

impl FieldValue {
    /// Numeric value, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Text value, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the field is null.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Null => write!(f, "-"),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Number(n) => serializer.serialize_f64(*n),
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::Null => serializer.serialize_none(),
        }
    }
}

/// Decoded notification: ordered field name to value mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementRecord {
    fields: Vec<(&'static str, FieldValue)>,
}

impl MeasurementRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, replacing an earlier one with the same name.
    pub fn with(mut self, name: &'static str, value: FieldValue) -> Self {
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
        self
    }

    /// Append a numeric field.
    pub fn with_number(self, name: &'static str, value: impl Into<f64>) -> Self {
        self.with(name, FieldValue::Number(value.into()))
    }

    /// Append an optional numeric field, null when `None`.
    pub fn with_optional(self, name: &'static str, value: Option<impl Into<f64>>) -> Self {
        match value {
            Some(v) => self.with_number(name, v),
            None => self.with_null(name),
        }
    }

    /// Append a text field.
    pub fn with_text(self, name: &'static str, value: impl Into<String>) -> Self {
        self.with(name, FieldValue::Text(value.into()))
    }

    /// Append a null field.
    pub fn with_null(self, name: &'static str) -> Self {
        self.with(name, FieldValue::Null)
    }

    /// Look up a field.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Numeric value of a field, `None` when absent, null or text.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FieldValue::as_number)
    }

    /// Text value of a field.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    /// Whether the field exists and is null.
    pub fn is_null(&self, name: &str) -> bool {
        self.get(name).is_some_and(FieldValue::is_null)
    }

    /// Fields in emission order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (*n, v))
    }

    /// Field names in emission order.
    pub fn names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|(n, _)| *n).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for MeasurementRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl std::fmt::Display for MeasurementRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}

/// Format bytes as upper-case hex pairs separated by spaces.
pub fn hex_string(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
