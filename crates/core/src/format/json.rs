//! JSON decoding: an array of flat objects, or an object wrapping that array
//! under `items`.

use serde_json::Value;

use super::{malformed, RawRow};
use crate::error::CoreError;

pub(super) struct ObjectRows {
    items: std::vec::IntoIter<Value>,
}

impl ObjectRows {
    pub(super) fn new(bytes: &[u8]) -> Result<Self, CoreError> {
        let document: Value = serde_json::from_slice(bytes)
            .map_err(|e| malformed(format!("invalid JSON: {e}")))?;
        let items = match document {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove("items") {
                Some(Value::Array(items)) => items,
                _ => return Err(malformed("JSON object must carry an 'items' array")),
            },
            _ => return Err(malformed("JSON export must be an array of objects")),
        };
        Ok(Self {
            items: items.into_iter(),
        })
    }

    pub(super) fn next_row(&mut self, index: usize) -> Option<Result<RawRow, CoreError>> {
        let item = self.items.next()?;
        let Value::Object(obj) = item else {
            return Some(Err(malformed(format!(
                "JSON element {index} is not an object"
            ))));
        };
        let values = obj
            .into_iter()
            .filter_map(|(key, value)| {
                let key = key.trim().to_string();
                if key.is_empty() {
                    return None;
                }
                cell_text(value).map(|text| (key, text))
            })
            .collect();
        Some(Ok(RawRow { index, values }))
    }
}

/// Scalars become their text form, nulls are absent, nested values are kept
/// as opaque JSON text.
fn cell_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        nested => Some(nested.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use crate::error::CoreError;
    use crate::format::{parse, RawRow};
    use assert_matches::assert_matches;

    fn rows(data: &str) -> Result<Vec<RawRow>, CoreError> {
        parse(data.as_bytes(), "json")?.collect()
    }

    #[test]
    fn top_level_array_of_objects() {
        let parsed = rows(r#"[{"Name":"Salt","Price":1.5,"Active":true},{"Name":"Pepper"}]"#).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].get("Price"), Some("1.5"));
        assert_eq!(parsed[0].get("Active"), Some("true"));
        assert_eq!(parsed[1].index, 1);
        assert_eq!(parsed[1].get("Price"), None);
    }

    #[test]
    fn items_wrapper_is_accepted() {
        let parsed = rows(r#"{"exported_at":"2024-01-01","items":[{"sku":"A-1"}]}"#).unwrap();
        assert_eq!(parsed[0].get("sku"), Some("A-1"));
    }

    #[test]
    fn nulls_are_absent_and_nested_values_are_opaque() {
        let parsed = rows(r#"[{"Name":null,"Tags":["a","b"]}]"#).unwrap();
        assert_eq!(parsed[0].get("Name"), None);
        assert_eq!(parsed[0].get("Tags"), Some(r#"["a","b"]"#));
    }

    #[test]
    fn non_object_element_fails_the_stream() {
        assert_matches!(
            rows(r#"[{"Name":"Salt"}, 42]"#),
            Err(CoreError::MalformedInput(msg)) if msg.contains("element 1")
        );
    }

    #[test]
    fn empty_array_is_malformed() {
        assert_matches!(rows("[]"), Err(CoreError::MalformedInput(_)));
    }

    #[test]
    fn scalar_document_is_malformed() {
        assert_matches!(rows("\"hello\""), Err(CoreError::MalformedInput(_)));
        assert_matches!(rows("{\"data\": []}"), Err(CoreError::MalformedInput(_)));
    }
}
