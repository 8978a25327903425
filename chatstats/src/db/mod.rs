//! Read-only access to the chat application's MongoDB collections.
//!
//! All aggregation happens database-side; the handlers in [`usage`] only build
//! pipelines and decode the grouped result rows.

pub mod models;
pub mod usage;

use mongodb::{Client, Collection, bson::Document};

/// Handles to the chat collections the exporter reads from.
#[derive(Clone)]
pub struct ChatDb {
    pub(crate) messages: Collection<Document>,
    pub(crate) conversations: Collection<Document>,
}

impl ChatDb {
    pub fn new(client: &Client, db_name: &str) -> Self {
        let db = client.database(db_name);
        Self {
            messages: db.collection("messages"),
            conversations: db.collection("conversations"),
        }
    }
}
