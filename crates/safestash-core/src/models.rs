//! Data models for SafeStash
//!
//! Every stored record carries an id and two timestamps; the rest of its
//! fields are free-form JSON owned by the application.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Field names managed by the store, never taken from caller data
pub const RESERVED_FIELDS: [&str; 3] = ["id", "createdAt", "updatedAt"];

/// Length of the random part of generated ids
const ID_SUFFIX_LEN: usize = 9;

/// A stored domain record
///
/// Serialized flat: `{"id": .., "createdAt": .., "updatedAt": .., ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    /// Unique identifier
    pub id: String,
    /// When this record was created
    pub created_at: DateTime<Utc>,
    /// When this record was last updated
    pub updated_at: DateTime<Utc>,
    /// Application fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    /// Create a record with a fresh id, stamped now
    pub fn new(fields: Map<String, Value>) -> Self {
        Self::stamped(generate_id(), Utc::now(), fields)
    }

    /// Create a record with explicit id and creation time
    ///
    /// Reserved field names in `fields` are dropped.
    pub fn stamped(id: String, now: DateTime<Utc>, mut fields: Map<String, Value>) -> Self {
        strip_reserved(&mut fields);
        Self {
            id,
            created_at: now,
            updated_at: now,
            fields,
        }
    }

    /// Get an application field
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Set an application field
    ///
    /// Reserved names are ignored.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if !RESERVED_FIELDS.contains(&name.as_str()) {
            self.fields.insert(name, value);
            self.updated_at = Utc::now();
        }
    }

    /// Merge `updates` over the current fields and refresh `updated_at`
    ///
    /// The id and creation time never change.
    pub fn apply(&mut self, mut updates: Map<String, Value>, now: DateTime<Utc>) {
        strip_reserved(&mut updates);
        self.fields.extend(updates);
        self.updated_at = now;
    }
}

/// Layer `data` over `defaults`
pub fn merge_defaults(defaults: &Map<String, Value>, data: Map<String, Value>) -> Map<String, Value> {
    let mut merged = defaults.clone();
    merged.extend(data);
    merged
}

fn strip_reserved(fields: &mut Map<String, Value>) {
    for name in RESERVED_FIELDS {
        fields.remove(name);
    }
}

static LAST_ID_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Generate a record id: `<millis>_<lowercase alphanumeric>`
///
/// The millisecond part is strictly increasing within a process, so two
/// calls never return the same id even when made in the same millisecond.
pub fn generate_id() -> String {
    let now = Utc::now().timestamp_millis().max(1);
    let previous = LAST_ID_MILLIS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    let millis = now.max(previous + 1);

    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", millis, &suffix[..ID_SUFFIX_LEN])
}
