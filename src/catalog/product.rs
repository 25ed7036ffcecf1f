//! Record model: one immutable catalog entry.

use crate::error::{CatalogError, CatalogResult};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_CURRENCY: &str = "USD";

/// Non-negative amount plus currency code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Money {
    #[serde(rename = "price", with = "rust_decimal::serde::float")]
    amount: Decimal,
    currency: String,
}

impl Money {
    /// Rejects negative amounts; a blank currency falls back to [`DEFAULT_CURRENCY`].
    pub fn new(amount: Decimal, currency: &str) -> CatalogResult<Self> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(CatalogError::NegativePrice(amount));
        }
        let currency = match currency.trim() {
            "" => DEFAULT_CURRENCY.to_string(),
            trimmed => trimmed.to_string(),
        };
        Ok(Self { amount, currency })
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount.round_dp(2).normalize(), self.currency)
    }
}

/// One product. Field order here is the serialized order, which feeds the fingerprint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    id: String,
    name: String,
    image_url: String,
    description: String,
    #[serde(flatten)]
    price: Money,
    #[serde(with = "rust_decimal::serde::float")]
    rating: Decimal,
    specifications: BTreeMap<String, String>,
}

impl Product {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: Money) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image_url: String::new(),
            description: String::new(),
            price,
            rating: Decimal::ZERO,
            specifications: BTreeMap::new(),
        }
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = image_url.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Rating is nominally 0..=5 but not enforced here.
    pub fn with_rating(mut self, rating: Decimal) -> Self {
        self.rating = rating;
        self
    }

    pub fn with_specification(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.specifications.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image_url(&self) -> &str {
        &self.image_url
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn price(&self) -> &Money {
        &self.price
    }

    pub fn rating(&self) -> Decimal {
        self.rating
    }

    pub fn specifications(&self) -> &BTreeMap<String, String> {
        &self.specifications
    }

    /// Business-key equality: same id, ignoring ASCII/Unicode case.
    pub fn same_id(&self, other: &Product) -> bool {
        id_key(&self.id) == id_key(&other.id)
    }

    /// Decode one array element. Field names match case-insensitively,
    /// unknown fields are ignored, `null` counts as absent.
    pub fn from_json(index: usize, value: &Value) -> CatalogResult<Self> {
        let obj = value.as_object().ok_or_else(|| CatalogError::InvalidRecord {
            index,
            reason: format!("expected object, found {}", json_kind(value)),
        })?;
        let fields = fold_keys(obj);
        let invalid = |reason: String| CatalogError::InvalidRecord { index, reason };

        let id = string_field(&fields, "id").map_err(&invalid)?;
        let id = match id {
            Some(id) if !id.trim().is_empty() => id,
            _ => return Err(invalid("missing or blank 'id'".to_string())),
        };
        let amount = decimal_field(&fields, "price")
            .map_err(&invalid)?
            .unwrap_or(Decimal::ZERO);
        let currency = string_field(&fields, "currency")
            .map_err(&invalid)?
            .unwrap_or_default();
        let price = match Money::new(amount, &currency) {
            Ok(price) => price,
            Err(CatalogError::NegativePrice(_)) => {
                return Err(invalid(format!("negative price {amount} for '{id}'")));
            }
            Err(other) => return Err(other),
        };

        Ok(Self {
            name: string_field(&fields, "name").map_err(&invalid)?.unwrap_or_default(),
            image_url: string_field(&fields, "imageurl")
                .map_err(&invalid)?
                .unwrap_or_default(),
            description: string_field(&fields, "description")
                .map_err(&invalid)?
                .unwrap_or_default(),
            rating: decimal_field(&fields, "rating")
                .map_err(&invalid)?
                .unwrap_or(Decimal::ZERO),
            specifications: spec_field(&fields, "specifications").map_err(&invalid)?,
            id,
            price,
        })
    }
}

/// Normalized lookup key for an identifier.
pub fn id_key(id: &str) -> String {
    id.to_lowercase()
}

// ── Field helpers ───────────────────────────────────────────

fn fold_keys(obj: &Map<String, Value>) -> BTreeMap<String, &Value> {
    obj.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.to_lowercase(), v))
        .collect()
}

fn string_field(fields: &BTreeMap<String, &Value>, name: &str) -> Result<Option<String>, String> {
    match fields.get(name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(format!("'{name}' must be a string, found {}", json_kind(other))),
    }
}

fn decimal_field(fields: &BTreeMap<String, &Value>, name: &str) -> Result<Option<Decimal>, String> {
    match fields.get(name) {
        None => Ok(None),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .map(Some)
            .map_err(|e| format!("'{name}' is not a decimal: {e}")),
        Some(other) => Err(format!("'{name}' must be a number, found {}", json_kind(other))),
    }
}

fn spec_field(
    fields: &BTreeMap<String, &Value>,
    name: &str,
) -> Result<BTreeMap<String, String>, String> {
    let obj = match fields.get(name) {
        None => return Ok(BTreeMap::new()),
        Some(Value::Object(obj)) => obj,
        Some(other) => {
            return Err(format!("'{name}' must be an object, found {}", json_kind(other)));
        }
    };
    obj.iter()
        .map(|(k, v)| match v {
            Value::String(s) => Ok((k.clone(), s.clone())),
            other => Err(format!(
                "'{name}.{k}' must be a string, found {}",
                json_kind(other)
            )),
        })
        .collect()
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
