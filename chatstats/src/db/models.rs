//! Row types for decoded aggregation results.

use serde::Deserialize;

/// Distinct-user count for one UTC day (`day` formatted as `%Y-%m-%d`).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DailyUniqueUsers {
    #[serde(rename = "_id")]
    pub day: String,
    pub count: i64,
}

/// Grouped count (messages, errors, or token sum) keyed by model.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelCount {
    #[serde(rename = "_id")]
    pub model: String,
    pub count: i64,
}

/// Message count for one model on one UTC day.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelDailyMessages {
    #[serde(rename = "_id")]
    pub key: ModelDay,
    pub count: i64,
}

/// Composite group key for per-model-per-day aggregations.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelDay {
    pub model: String,
    pub day: String,
}

/// Grouped count where the group key itself is irrelevant (e.g. per-user counts,
/// which are only fed into descriptive statistics and never exposed as labels).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GroupCount {
    pub count: i64,
}

/// Single-row result of an `_id: null` token sum.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TokenTotal {
    pub total: i64,
}
