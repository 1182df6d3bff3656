use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A published event: immutable once persisted, never mutated, only referenced
/// by deliveries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier
    pub id: Uuid,

    /// Topic this event was published to
    pub topic_id: Uuid,

    /// Store-minted monotonic publish order; not wall clock, to tolerate clock skew
    pub sequence: u64,

    /// Serialized payload blob, opaque to the core
    pub payload: Vec<u8>,

    /// Free-form headers, order irrelevant
    pub headers: HashMap<String, String>,

    /// Caller-supplied correlation key used for per-key ordering
    pub functional_key: Option<String>,

    /// Publish timestamp
    pub published_at: DateTime<Utc>,
}

impl Event {
    /// Create a new event ready for publishing
    pub fn new(
        topic_id: Uuid,
        sequence: u64,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
        functional_key: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic_id,
            sequence,
            payload,
            headers,
            functional_key,
            published_at: Utc::now(),
        }
    }
}
