//! Aggregation pipelines over the chat collections.
//!
//! Every query here is a point-in-time read; the collector assembles them into a
//! snapshot and only then touches the metric registry. Pipelines are built by
//! standalone functions so their shapes can be checked without a live database.
//!
//! Field conventions in the message documents:
//! - `sender` is `"User"` for human messages, the model name otherwise
//! - `tokenCount` is only present on messages that were billed for tokens
//! - `model` may be missing or null, which gets folded into `"unknown"`

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    Collection,
    bson::{self, Document, doc},
};
use serde::de::DeserializeOwned;

use crate::{
    db::{
        ChatDb,
        models::{DailyUniqueUsers, GroupCount, ModelCount, ModelDailyMessages, TokenTotal},
    },
    errors::{Error, Result},
};

/// Label used when a message document has no model field.
pub const UNKNOWN_MODEL: &str = "unknown";

/// Day labels follow the Prometheus-friendly `YYYY-MM-DD` form.
const DAY_FORMAT: &str = "%Y-%m-%d";

impl ChatDb {
    pub async fn total_messages(&self) -> Result<u64> {
        Ok(self.messages.count_documents(doc! {}).await?)
    }

    pub async fn total_errors(&self) -> Result<u64> {
        Ok(self.messages.count_documents(doc! { "error": true }).await?)
    }

    pub async fn total_conversations(&self) -> Result<u64> {
        Ok(self.conversations.count_documents(doc! {}).await?)
    }

    /// Sum of `tokenCount` across all user-sent messages.
    pub async fn total_input_tokens(&self) -> Result<i64> {
        self.token_sum(token_sum_pipeline(input_message_filter()), "input token sum")
            .await
    }

    /// Sum of `tokenCount` across all model responses.
    pub async fn total_output_tokens(&self) -> Result<i64> {
        self.token_sum(token_sum_pipeline(output_message_filter()), "output token sum")
            .await
    }

    pub async fn messages_per_model(&self) -> Result<Vec<ModelCount>> {
        collect_rows(&self.messages, per_model_count_pipeline(output_message_filter())).await
    }

    pub async fn errors_per_model(&self) -> Result<Vec<ModelCount>> {
        collect_rows(&self.messages, per_model_count_pipeline(doc! { "error": true })).await
    }

    pub async fn input_tokens_per_model(&self) -> Result<Vec<ModelCount>> {
        collect_rows(&self.messages, per_model_token_pipeline(input_message_filter())).await
    }

    pub async fn output_tokens_per_model(&self) -> Result<Vec<ModelCount>> {
        collect_rows(&self.messages, per_model_token_pipeline(output_message_filter())).await
    }

    /// Users with at least one message since `since`.
    pub async fn active_users(&self, since: DateTime<Utc>) -> Result<u64> {
        let users = self.messages.distinct("user", created_since(since)).await?;
        Ok(users.len() as u64)
    }

    /// Conversations with at least one message since `since`.
    pub async fn active_conversations(&self, since: DateTime<Utc>) -> Result<u64> {
        let conversations = self
            .messages
            .distinct("conversationId", created_since(since))
            .await?;
        Ok(conversations.len() as u64)
    }

    /// Users with at least one message in the half-open interval `[start, end)`.
    pub async fn unique_users_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64> {
        let filter = doc! {
            "createdAt": {
                "$gte": bson::DateTime::from_millis(start.timestamp_millis()),
                "$lt": bson::DateTime::from_millis(end.timestamp_millis()),
            },
            "user": { "$ne": null },
        };
        let users = self.messages.distinct("user", filter).await?;
        Ok(users.len() as u64)
    }

    /// Distinct-user count per UTC day since `since`, sorted by day.
    pub async fn daily_unique_users(&self, since: DateTime<Utc>) -> Result<Vec<DailyUniqueUsers>> {
        collect_rows(&self.messages, daily_unique_users_pipeline(since)).await
    }

    /// Message count per user since `since`. Group keys are discarded; only the
    /// counts feed the mean/stddev gauges, so no user identifier leaves this layer.
    pub async fn messages_per_user(&self, since: DateTime<Utc>) -> Result<Vec<i64>> {
        let rows: Vec<GroupCount> =
            collect_rows(&self.messages, messages_per_user_pipeline(since)).await?;
        Ok(rows.into_iter().map(|r| r.count).collect())
    }

    /// Model response count per (model, day) pair since `since`.
    pub async fn model_daily_messages(&self, since: DateTime<Utc>) -> Result<Vec<ModelDailyMessages>> {
        collect_rows(&self.messages, model_daily_messages_pipeline(since)).await
    }

    async fn token_sum(&self, pipeline: Vec<Document>, query: &'static str) -> Result<i64> {
        let mut cursor = self.messages.aggregate(pipeline).await?;
        match cursor.try_next().await? {
            // An empty collection produces no output row at all
            None => Ok(0),
            Some(row) => {
                let total: TokenTotal =
                    bson::from_document(row).map_err(|source| Error::Malformed { query, source })?;
                Ok(total.total)
            }
        }
    }
}

async fn collect_rows<T>(collection: &Collection<Document>, pipeline: Vec<Document>) -> Result<Vec<T>>
where
    T: DeserializeOwned,
{
    let mut cursor = collection.aggregate(pipeline).await?.with_type::<T>();
    let mut rows = Vec::new();
    while let Some(row) = cursor.try_next().await? {
        rows.push(row);
    }
    Ok(rows)
}

fn created_since(since: DateTime<Utc>) -> Document {
    doc! { "createdAt": { "$gte": bson::DateTime::from_millis(since.timestamp_millis()) } }
}

fn input_message_filter() -> Document {
    doc! { "sender": "User", "tokenCount": { "$exists": true, "$ne": null } }
}

fn output_message_filter() -> Document {
    doc! { "sender": { "$ne": "User" } }
}

/// Group key that folds missing/null models into [`UNKNOWN_MODEL`].
fn model_key() -> Document {
    doc! { "$ifNull": ["$model", UNKNOWN_MODEL] }
}

fn day_key() -> Document {
    doc! { "$dateToString": { "format": DAY_FORMAT, "date": "$createdAt" } }
}

fn token_sum_pipeline(filter: Document) -> Vec<Document> {
    vec![
        doc! { "$match": filter },
        doc! { "$group": { "_id": null, "total": { "$sum": "$tokenCount" } } },
    ]
}

fn per_model_count_pipeline(filter: Document) -> Vec<Document> {
    vec![
        doc! { "$match": filter },
        doc! { "$group": { "_id": model_key(), "count": { "$sum": 1 } } },
        doc! { "$sort": { "_id": 1 } },
    ]
}

fn per_model_token_pipeline(mut filter: Document) -> Vec<Document> {
    filter.insert("tokenCount", doc! { "$exists": true, "$ne": null });
    vec![
        doc! { "$match": filter },
        doc! { "$group": { "_id": model_key(), "count": { "$sum": "$tokenCount" } } },
        doc! { "$sort": { "_id": 1 } },
    ]
}

fn daily_unique_users_pipeline(since: DateTime<Utc>) -> Vec<Document> {
    let mut filter = created_since(since);
    filter.insert("user", doc! { "$ne": null });
    vec![
        doc! { "$match": filter },
        doc! { "$group": { "_id": day_key(), "users": { "$addToSet": "$user" } } },
        doc! { "$project": { "count": { "$size": "$users" } } },
        doc! { "$sort": { "_id": 1 } },
    ]
}

fn messages_per_user_pipeline(since: DateTime<Utc>) -> Vec<Document> {
    let mut filter = created_since(since);
    filter.insert("user", doc! { "$ne": null });
    vec![
        doc! { "$match": filter },
        doc! { "$group": { "_id": "$user", "count": { "$sum": 1 } } },
    ]
}

fn model_daily_messages_pipeline(since: DateTime<Utc>) -> Vec<Document> {
    let mut filter = created_since(since);
    filter.insert("sender", doc! { "$ne": "User" });
    vec![
        doc! { "$match": filter },
        doc! { "$group": {
            "_id": { "model": model_key(), "day": day_key() },
            "count": { "$sum": 1 },
        } },
        doc! { "$sort": { "_id.model": 1, "_id.day": 1 } },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_sum_pipeline_shape() {
        let pipeline = token_sum_pipeline(input_message_filter());
        assert_eq!(pipeline.len(), 2);

        let filter = pipeline[0].get_document("$match").unwrap();
        assert_eq!(filter.get_str("sender").unwrap(), "User");

        let group = pipeline[1].get_document("$group").unwrap();
        assert!(group.get("_id").unwrap().as_null().is_some());
        assert_eq!(
            group.get_document("total").unwrap().get_str("$sum").unwrap(),
            "$tokenCount"
        );
    }

    #[test]
    fn test_per_model_pipeline_folds_missing_models() {
        let pipeline = per_model_count_pipeline(output_message_filter());
        let group = pipeline[1].get_document("$group").unwrap();
        let key = group.get_document("_id").unwrap();
        let if_null = key.get_array("$ifNull").unwrap();
        assert_eq!(if_null[0].as_str(), Some("$model"));
        assert_eq!(if_null[1].as_str(), Some(UNKNOWN_MODEL));
    }

    #[test]
    fn test_per_model_token_pipeline_requires_token_count() {
        let pipeline = per_model_token_pipeline(output_message_filter());
        let filter = pipeline[0].get_document("$match").unwrap();
        let token_filter = filter.get_document("tokenCount").unwrap();
        assert_eq!(token_filter.get_bool("$exists"), Ok(true));
    }

    #[test]
    fn test_daily_unique_users_pipeline_shape() {
        let since = Utc::now();
        let pipeline = daily_unique_users_pipeline(since);
        assert_eq!(pipeline.len(), 4);

        let filter = pipeline[0].get_document("$match").unwrap();
        assert!(filter.get_document("createdAt").unwrap().get("$gte").is_some());
        // Anonymous messages must not inflate the counts
        assert!(filter.get_document("user").is_ok());

        let group = pipeline[1].get_document("$group").unwrap();
        assert_eq!(
            group.get_document("users").unwrap().get_str("$addToSet").unwrap(),
            "$user"
        );

        let day_expr = group.get_document("_id").unwrap().get_document("$dateToString").unwrap();
        assert_eq!(day_expr.get_str("format").unwrap(), DAY_FORMAT);

        let project = pipeline[2].get_document("$project").unwrap();
        assert_eq!(
            project.get_document("count").unwrap().get_str("$size").unwrap(),
            "$users"
        );
    }

    #[test]
    fn test_model_daily_pipeline_groups_on_model_and_day() {
        let pipeline = model_daily_messages_pipeline(Utc::now());
        let group = pipeline[1].get_document("$group").unwrap();
        let key = group.get_document("_id").unwrap();
        assert!(key.get_document("model").is_ok());
        assert!(key.get_document("day").is_ok());

        let sort = pipeline[2].get_document("$sort").unwrap();
        assert_eq!(sort.get_i32("_id.model"), Ok(1));
        assert_eq!(sort.get_i32("_id.day"), Ok(1));
    }

    #[test]
    fn test_messages_per_user_pipeline_excludes_anonymous() {
        let pipeline = messages_per_user_pipeline(Utc::now());
        let filter = pipeline[0].get_document("$match").unwrap();
        let user_filter = filter.get_document("user").unwrap();
        assert!(user_filter.get("$ne").unwrap().as_null().is_some());
    }
}
