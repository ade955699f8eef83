//! Result modifiers and their serialized form.
//!
//! A result modifier reshapes a query's output without changing the query
//! core: `DISTINCT [ON]`, `LIMIT`, `LIMIT PERCENT` and `ORDER BY`. Modifiers
//! travel with serialized plans, so their wire form is stable: a JSON object
//! tagged by a `type` field drawn from a closed enumeration. Unknown tags
//! fail deserialization.

use serde::{Deserialize, Serialize};

use crate::error::{EmberError, Result};

/// Sort direction of an `ORDER BY` item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderDirection {
    Ascending,
    Descending,
}

/// Null placement of an `ORDER BY` item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NullOrder {
    NullsFirst,
    NullsLast,
}

/// One `ORDER BY` item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub direction: OrderDirection,
    pub null_order: NullOrder,
    pub expression: String,
}

impl OrderSpec {
    pub fn new(
        direction: OrderDirection,
        null_order: NullOrder,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            direction,
            null_order,
            expression: expression.into(),
        }
    }
}

/// A modifier applied to a query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResultModifier {
    /// `DISTINCT` / `DISTINCT ON (targets)`.
    #[serde(rename = "DISTINCT")]
    Distinct { distinct_on_targets: Vec<String> },

    /// `LIMIT n [OFFSET m]`; both parts optional.
    #[serde(rename = "LIMIT")]
    Limit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<u64>,
    },

    /// `LIMIT n PERCENT [OFFSET m]`.
    #[serde(rename = "LIMIT_PERCENT")]
    LimitPercent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<u64>,
    },

    /// `ORDER BY`.
    #[serde(rename = "ORDER")]
    Order { orders: Vec<OrderSpec> },
}

impl ResultModifier {
    /// Serialize the modifier to its JSON wire form.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| EmberError::serialization(format!("failed to serialize modifier: {}", e)))
    }

    /// Deserialize a modifier from its JSON wire form.
    ///
    /// Fails on unknown `type` tags and on missing required properties.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| EmberError::serialization(format!("failed to deserialize modifier: {}", e)))
    }
}
