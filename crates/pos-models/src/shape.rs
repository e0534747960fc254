//! Normalization of backend list responses.
//!
//! Different endpoints wrap collections differently. Rather than probing
//! properties at every call site, responses are classified once into a
//! [`ListResponse`] and consumers read items from that.

use serde_json::Value;

/// Known list envelopes returned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ListResponse {
    /// `[ ... ]`
    Bare(Vec<Value>),
    /// `{ "content": [ ... ], ... }` (paged endpoints)
    Content(Vec<Value>),
    /// `{ "data": { "items": [ ... ] } }`
    DataItems(Vec<Value>),
    /// `{ "data": [ ... ] }`
    Data(Vec<Value>),
    /// Anything else, kept verbatim.
    Other(Value),
}

impl ListResponse {
    /// Classify a response body.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => ListResponse::Bare(items),
            Value::Object(mut map) => {
                if let Some(Value::Array(items)) = map.remove("content") {
                    return ListResponse::Content(items);
                }
                match map.remove("data") {
                    Some(Value::Array(items)) => ListResponse::Data(items),
                    Some(Value::Object(mut data)) => match data.remove("items") {
                        Some(Value::Array(items)) => ListResponse::DataItems(items),
                        Some(other) => {
                            data.insert("items".to_string(), other);
                            map.insert("data".to_string(), Value::Object(data));
                            ListResponse::Other(Value::Object(map))
                        }
                        None => {
                            map.insert("data".to_string(), Value::Object(data));
                            ListResponse::Other(Value::Object(map))
                        }
                    },
                    Some(other) => {
                        map.insert("data".to_string(), other);
                        ListResponse::Other(Value::Object(map))
                    }
                    None => ListResponse::Other(Value::Object(map)),
                }
            }
            other => ListResponse::Other(other),
        }
    }

    /// Items of the list; unrecognized shapes yield no items.
    pub fn into_items(self) -> Vec<Value> {
        match self {
            ListResponse::Bare(items)
            | ListResponse::Content(items)
            | ListResponse::DataItems(items)
            | ListResponse::Data(items) => items,
            ListResponse::Other(_) => Vec::new(),
        }
    }

    /// True when the body matched none of the known envelopes.
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, ListResponse::Other(_))
    }
}

/// Extract list items from any known envelope.
pub fn normalize_list(value: Value) -> Vec<Value> {
    ListResponse::from_value(value).into_items()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_array() {
        assert_eq!(normalize_list(json!([1, 2])), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_paged_content() {
        let shape = ListResponse::from_value(json!({"content": [{"id": 1}], "totalPages": 3}));
        assert_eq!(shape, ListResponse::Content(vec![json!({"id": 1})]));
    }

    #[test]
    fn test_data_items() {
        let shape = ListResponse::from_value(json!({"data": {"items": ["a"], "total": 1}}));
        assert_eq!(shape, ListResponse::DataItems(vec![json!("a")]));
    }

    #[test]
    fn test_data_array() {
        assert_eq!(normalize_list(json!({"data": ["x"]})), vec![json!("x")]);
    }

    #[test]
    fn test_unknown_shape_is_preserved() {
        let body = json!({"data": {"count": 3}});
        let shape = ListResponse::from_value(body.clone());
        assert!(shape.is_unrecognized());
        assert_eq!(shape, ListResponse::Other(body));
        assert!(normalize_list(json!("nope")).is_empty());
    }
}
