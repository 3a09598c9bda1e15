//! Format decoder: turns raw payloads into an ordered record stream.

mod csv;
mod json;

pub use self::csv::decode_csv;
pub use json::{
    auto_descend_nested, navigate, next_page_link, normalize_records, parse_json,
};

use serde_json::{Map, Value};

/// Decoded payload: records plus the discovered field names in first-seen
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub fields: Vec<String>,
    pub records: Vec<Map<String, Value>>,
}

impl DecodedPayload {
    pub fn from_records(records: Vec<Map<String, Value>>) -> Self {
        let mut fields = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !fields.iter().any(|f| f == key) {
                    fields.push(key.clone());
                }
            }
        }
        Self { fields, records }
    }

    pub fn empty() -> Self {
        Self {
            fields: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
