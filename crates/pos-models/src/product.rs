//! Product payloads used by the product resource service.
//!
//! Only the fields the access layer needs are typed; everything else the
//! backend sends is carried through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A product as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub stock: Option<i64>,
    /// Fields this crate does not model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body for creating or updating a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<i64>,
}

/// `GET /products/count` answers either `{"count": n}` or a bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProductCount {
    Wrapped { count: u64 },
    Bare(u64),
}

impl ProductCount {
    pub fn value(&self) -> u64 {
        match self {
            ProductCount::Wrapped { count } => *count,
            ProductCount::Bare(count) => *count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_product_keeps_unknown_fields() {
        let product: Product = serde_json::from_value(json!({
            "id": "p1",
            "name": "Espresso",
            "categoryId": "c9"
        }))
        .unwrap();
        assert_eq!(product.extra.get("categoryId"), Some(&json!("c9")));
        assert!(product.price.is_none());
    }

    #[test]
    fn test_count_shapes() {
        let wrapped: ProductCount = serde_json::from_value(json!({"count": 12})).unwrap();
        let bare: ProductCount = serde_json::from_value(json!(12)).unwrap();
        assert_eq!(wrapped.value(), 12);
        assert_eq!(bare.value(), 12);
    }
}
